use super::announcements::unread_count;
use crate::auth::Role;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{self, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

const UPCOMING_LIMIT: i64 = 10;

/// Landing view for one role.
pub trait Dashboard {
    fn open(&self, conn: &Connection, user_id: &str) -> Result<serde_json::Value, HandlerErr>;
}

pub struct StudentDashboard;
pub struct TeacherDashboard;
pub struct AdminDashboard;

pub fn for_role(role: Role) -> &'static dyn Dashboard {
    match role {
        Role::Student => &StudentDashboard,
        Role::Teacher => &TeacherDashboard,
        Role::Admin => &AdminDashboard,
    }
}

impl Dashboard for StudentDashboard {
    fn open(&self, conn: &Connection, user_id: &str) -> Result<serde_json::Value, HandlerErr> {
        let mut stmt = conn
            .prepare(
                "SELECT c.id, c.name
                 FROM enrollments e
                 JOIN classes c ON c.id = e.class_id
                 WHERE e.student_id = ?
                 ORDER BY c.name",
            )
            .map_err(HandlerErr::query)?;
        let enrolled = stmt
            .query_map([user_id], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::query)?;
        let mut classes = Vec::with_capacity(enrolled.len());
        for (id, name) in enrolled {
            let unread = unread_count(conn, user_id, &id)?.unwrap_or(0);
            classes.push(json!({ "classId": id, "name": name, "unreadAnnouncements": unread }));
        }

        let today = chrono::Local::now().date_naive().format("%Y-%m-%d").to_string();
        let mut stmt = conn
            .prepare(
                "SELECT a.id, a.title, a.deadline, a.kind, s.name, c.name,
                        EXISTS(SELECT 1 FROM submissions sb
                               WHERE sb.assignment_id = a.id AND sb.student_id = ?1)
                 FROM assignments a
                 JOIN course_subjects cs ON cs.id = a.course_subject_id
                 JOIN subjects s ON s.id = cs.subject_id
                 JOIN classes c ON c.id = cs.class_id
                 WHERE cs.class_id IN (SELECT class_id FROM enrollments WHERE student_id = ?1)
                   AND a.deadline >= ?2
                 ORDER BY a.deadline, a.rowid
                 LIMIT ?3",
            )
            .map_err(HandlerErr::query)?;
        let upcoming = stmt
            .query_map((user_id, &today, UPCOMING_LIMIT), |r| {
                let id: String = r.get(0)?;
                let title: String = r.get(1)?;
                let deadline: String = r.get(2)?;
                let kind: String = r.get(3)?;
                let subject: String = r.get(4)?;
                let class_name: String = r.get(5)?;
                let submitted: i64 = r.get(6)?;
                Ok(json!({
                    "assignmentId": id,
                    "title": title,
                    "deadline": deadline,
                    "kind": kind,
                    "subjectName": subject,
                    "className": class_name,
                    "submitted": submitted != 0,
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::query)?;

        Ok(json!({ "classes": classes, "upcoming": upcoming }))
    }
}

impl Dashboard for TeacherDashboard {
    fn open(&self, conn: &Connection, user_id: &str) -> Result<serde_json::Value, HandlerErr> {
        let mut stmt = conn
            .prepare(
                "SELECT c.id, c.name, c.access_code,
                        CASE WHEN c.teacher_id = ?1 THEN 'owner' ELSE 'collaborator' END,
                        (SELECT COUNT(*) FROM enrollments e WHERE e.class_id = c.id)
                 FROM classes c
                 WHERE c.teacher_id = ?1
                    OR c.id IN (SELECT class_id FROM class_collaborators WHERE teacher_id = ?1)
                 ORDER BY c.name",
            )
            .map_err(HandlerErr::query)?;
        let classes = stmt
            .query_map([user_id], |r| {
                let id: String = r.get(0)?;
                let name: String = r.get(1)?;
                let code: String = r.get(2)?;
                let role: String = r.get(3)?;
                let students: i64 = r.get(4)?;
                Ok(json!({
                    "classId": id,
                    "name": name,
                    "accessCode": code,
                    "role": role,
                    "studentCount": students,
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::query)?;

        let mut stmt = conn
            .prepare("SELECT id, name FROM subjects WHERE teacher_id = ? ORDER BY name")
            .map_err(HandlerErr::query)?;
        let subjects = stmt
            .query_map([user_id], |r| {
                let id: String = r.get(0)?;
                let name: String = r.get(1)?;
                Ok(json!({ "subjectId": id, "name": name }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::query)?;

        let pending: i64 = conn
            .query_row(
                "SELECT COUNT(*)
                 FROM join_requests jr
                 JOIN classes c ON c.id = jr.class_id
                 WHERE jr.status = 'pending' AND c.teacher_id = ?",
                [user_id],
                |r| r.get(0),
            )
            .map_err(HandlerErr::query)?;

        Ok(json!({
            "classes": classes,
            "subjects": subjects,
            "pendingRequests": pending,
        }))
    }
}

impl Dashboard for AdminDashboard {
    fn open(&self, conn: &Connection, _user_id: &str) -> Result<serde_json::Value, HandlerErr> {
        let (pending_users, users, classes, institutions, tariffs): (i64, i64, i64, i64, i64) = conn
            .query_row(
                "SELECT
                   (SELECT COUNT(*) FROM users WHERE is_active = 0),
                   (SELECT COUNT(*) FROM users),
                   (SELECT COUNT(*) FROM classes),
                   (SELECT COUNT(*) FROM institutions),
                   (SELECT COUNT(*) FROM group_tariffs)",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
            )
            .map_err(HandlerErr::query)?;
        let pending_requests: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM join_requests WHERE status = 'pending'",
                [],
                |r| r.get(0),
            )
            .map_err(HandlerErr::query)?;
        Ok(json!({
            "pendingUsers": pending_users,
            "pendingRequests": pending_requests,
            "institutions": institutions,
            "tariffs": tariffs,
            "counts": { "users": users, "classes": classes },
        }))
    }
}

fn dashboard_open(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let user_id = required_str(params, "userId")?;
    let conn = helpers::db(state)?;
    let role = helpers::user_role(conn, &user_id)?;
    let summary = for_role(role).open(conn, &user_id)?;
    Ok(json!({ "role": role.as_str(), "dashboard": summary }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "dashboard.open" => Some(respond(&req.id, dashboard_open(state, &req.params))),
        _ => None,
    }
}
