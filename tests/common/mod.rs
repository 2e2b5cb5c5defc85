#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub const TEACHER_CODE: &str = "TEACH-2024";
pub const ADMIN_CODE: &str = "ADMIN-2024";
pub const PASSWORD: &str = "s3cret-pass";

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Sidecar {
    pub fn spawn_with(args: &[&str]) -> Self {
        let exe = env!("CARGO_BIN_EXE_schoold");
        let mut child = Command::new(exe)
            .args(["--bcrypt-cost", "4"])
            .args(args)
            .env_remove("SCHOOLD_WORKSPACE")
            .env_remove("SCHOOLD_TEACHER_CODE")
            .env_remove("SCHOOLD_ADMIN_CODE")
            .env_remove("SCHOOLD_BCRYPT_COST")
            .env_remove("SCHOOLD_NO_CACHE")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn schoold");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        Self {
            child,
            stdin,
            reader: BufReader::new(stdout),
            next_id: 0,
        }
    }

    /// Sidecar with both registration codes configured and `workspace` open.
    pub fn open(workspace: &Path) -> Self {
        let ws = workspace.to_string_lossy().to_string();
        Self::spawn_with(&[
            "--workspace",
            &ws,
            "--teacher-code",
            TEACHER_CODE,
            "--admin-code",
            ADMIN_CODE,
        ])
    }

    pub fn send_raw(&mut self, line: &str) -> serde_json::Value {
        writeln!(self.stdin, "{}", line).expect("write request");
        self.stdin.flush().expect("flush request");
        let mut out = String::new();
        self.reader.read_line(&mut out).expect("read response line");
        assert!(!out.trim().is_empty(), "empty response for {}", line);
        serde_json::from_str(out.trim()).expect("parse response json")
    }

    pub fn call(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let payload = json!({ "id": id, "method": method, "params": params });
        let value = self.send_raw(&payload.to_string());
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    pub fn ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let value = self.call(method, params);
        assert!(
            value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
            "{} failed: {}",
            method,
            value
        );
        value.get("result").cloned().unwrap_or_else(|| json!({}))
    }

    /// Asserts failure and returns the error code.
    pub fn fails(&mut self, method: &str, params: serde_json::Value) -> String {
        let value = self.call(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            value
        );
        value["error"]["code"].as_str().unwrap_or("").to_string()
    }

    /// Creates an account and activates it; returns the user id.
    pub fn active_user(&mut self, username: &str, role: &str, group: Option<&str>) -> String {
        let created = self.ok(
            "users.create",
            json!({
                "username": username,
                "password": PASSWORD,
                "fullName": format!("{} Person", username),
                "role": role,
                "groupName": group,
            }),
        );
        let user_id = created["userId"].as_str().expect("userId").to_string();
        self.ok("users.setActive", json!({ "userId": user_id, "active": true }));
        user_id
    }

    pub fn class_for(&mut self, teacher_id: &str, name: &str) -> (String, String) {
        let created = self.ok("classes.create", json!({ "teacherId": teacher_id, "name": name }));
        (
            created["classId"].as_str().expect("classId").to_string(),
            created["accessCode"].as_str().expect("accessCode").to_string(),
        )
    }

    /// Subject owned by `teacher_id`, linked to `class_id`; returns the offering id.
    pub fn offering(&mut self, teacher_id: &str, class_id: &str, subject: &str) -> String {
        let s = self.ok("subjects.create", json!({ "teacherId": teacher_id, "name": subject }));
        let subject_id = s["subjectId"].as_str().expect("subjectId").to_string();
        let cs = self.ok(
            "courseSubjects.link",
            json!({ "classId": class_id, "subjectId": subject_id }),
        );
        cs["courseSubjectId"].as_str().expect("courseSubjectId").to_string()
    }

    pub fn assignment(
        &mut self,
        course_subject_id: &str,
        title: &str,
        category_id: Option<&str>,
        period: i64,
    ) -> String {
        let a = self.ok(
            "assignments.create",
            json!({
                "courseSubjectId": course_subject_id,
                "title": title,
                "deadline": "2030-06-01",
                "kind": "assignment",
                "categoryId": category_id,
                "submissionType": "digital",
                "period": period,
            }),
        );
        a["assignmentId"].as_str().expect("assignmentId").to_string()
    }

    pub fn grade(&mut self, student_id: &str, assignment_id: &str, grade: f64) {
        self.ok(
            "grades.gradeDirect",
            json!({ "studentId": student_id, "assignmentId": assignment_id, "grade": grade }),
        );
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
