use crate::cache::CachedQuery;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{
    self, cached, encode_base64, new_id, now_rfc3339, optional_base64, optional_text,
    required_str,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;

fn submissions_submit(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let assignment_id = required_str(params, "assignmentId")?;
    let student_id = required_str(params, "studentId")?;
    let file_name = optional_text(params, "fileName")?;
    let file_data = optional_base64(params, "fileBase64")?;
    let link = optional_text(params, "link")?;
    if file_data.is_none() && link.is_none() {
        return Err(HandlerErr::bad_params("provide a file or a link"));
    }
    if file_data.is_some() && file_name.is_none() {
        return Err(HandlerErr::bad_params("fileName is required with fileBase64"));
    }

    let conn = helpers::db(state)?;
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT cs.class_id, a.submission_type
             FROM assignments a
             JOIN course_subjects cs ON cs.id = a.course_subject_id
             WHERE a.id = ?",
            [&assignment_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    let Some((class_id, submission_type)) = row else {
        return Err(HandlerErr::not_found("assignment not found"));
    };
    if submission_type == "physical" {
        return Err(HandlerErr::bad_params(
            "this assignment is handed in physically",
        ));
    }
    let enrolled: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM enrollments WHERE student_id = ? AND class_id = ?",
            (&student_id, &class_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    if enrolled.is_none() {
        return Err(HandlerErr::conflict("student is not enrolled in this class"));
    }

    // Resubmitting replaces the previous upload.
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM submissions WHERE assignment_id = ? AND student_id = ?",
            (&assignment_id, &student_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    let submitted_at = now_rfc3339();
    let submission_id = match existing {
        Some(id) => {
            conn.execute(
                "UPDATE submissions
                 SET file_name = ?, file_data = ?, submission_link = ?, submitted_at = ?
                 WHERE id = ?",
                (&file_name, &file_data, &link, &submitted_at, &id),
            )
            .map_err(|e| HandlerErr::update("submissions", e))?;
            id
        }
        None => {
            let id = new_id();
            conn.execute(
                "INSERT INTO submissions(id, assignment_id, student_id, file_name, file_data,
                                         submission_link, submitted_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?)",
                (
                    &id,
                    &assignment_id,
                    &student_id,
                    &file_name,
                    &file_data,
                    &link,
                    &submitted_at,
                ),
            )
            .map_err(|e| HandlerErr::insert("submissions", e))?;
            id
        }
    };

    tracing::debug!(
        submission_id = %submission_id,
        bytes = file_data.as_ref().map(|d| d.len()).unwrap_or(0),
        "submission stored"
    );
    state.cache.invalidate(&[CachedQuery::SubjectSubmissions]);
    Ok(json!({ "submissionId": submission_id, "submittedAt": submitted_at }))
}

fn submissions_list_for_subject(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course_subject_id = required_str(params, "courseSubjectId")?;
    cached(state, CachedQuery::SubjectSubmissions, &course_subject_id, |conn| {
        let mut stmt = conn
            .prepare(
                "SELECT s.id, a.id, a.title, u.id, u.full_name, s.file_name,
                        COALESCE(LENGTH(s.file_data), 0), s.submission_link, s.submitted_at,
                        g.grade
                 FROM submissions s
                 JOIN assignments a ON a.id = s.assignment_id
                 JOIN users u ON u.id = s.student_id
                 LEFT JOIN grades g ON g.student_id = s.student_id AND g.assignment_id = s.assignment_id
                 WHERE a.course_subject_id = ?
                 ORDER BY a.deadline, u.full_name",
            )
            .map_err(HandlerErr::query)?;
        let rows = stmt
            .query_map([&course_subject_id], |r| {
                let id: String = r.get(0)?;
                let assignment_id: String = r.get(1)?;
                let title: String = r.get(2)?;
                let student_id: String = r.get(3)?;
                let student_name: String = r.get(4)?;
                let file_name: Option<String> = r.get(5)?;
                let size: i64 = r.get(6)?;
                let link: Option<String> = r.get(7)?;
                let submitted_at: Option<String> = r.get(8)?;
                let grade: Option<f64> = r.get(9)?;
                Ok(json!({
                    "id": id,
                    "assignmentId": assignment_id,
                    "assignmentTitle": title,
                    "studentId": student_id,
                    "studentName": student_name,
                    "fileName": file_name,
                    "sizeBytes": size,
                    "link": link,
                    "submittedAt": submitted_at,
                    "grade": grade,
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::query)?;
        Ok(json!({ "submissions": rows }))
    })
}

fn submissions_status(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let assignment_id = required_str(params, "assignmentId")?;
    let student_id = required_str(params, "studentId")?;
    let conn = helpers::db(state)?;
    helpers::require_row(conn, "assignments", &assignment_id, "assignment")?;

    let submission: Option<(String, Option<String>, Option<String>, Option<String>)> = conn
        .query_row(
            "SELECT id, file_name, submission_link, submitted_at
             FROM submissions WHERE assignment_id = ? AND student_id = ?",
            (&assignment_id, &student_id),
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    let grade: Option<(Option<f64>, Option<String>)> = conn
        .query_row(
            "SELECT grade, feedback FROM grades WHERE assignment_id = ? AND student_id = ?",
            (&assignment_id, &student_id),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    let (grade, feedback) = grade.unwrap_or((None, None));

    Ok(match submission {
        Some((id, file_name, link, submitted_at)) => json!({
            "submitted": true,
            "submissionId": id,
            "fileName": file_name,
            "link": link,
            "submittedAt": submitted_at,
            "grade": grade,
            "feedback": feedback,
        }),
        None => json!({
            "submitted": false,
            "grade": grade,
            "feedback": feedback,
        }),
    })
}

fn submissions_download(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let submission_id = required_str(params, "submissionId")?;
    let conn = helpers::db(state)?;
    let row: Option<(Option<String>, Option<Vec<u8>>, Option<String>)> = conn
        .query_row(
            "SELECT file_name, file_data, submission_link FROM submissions WHERE id = ?",
            [&submission_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    let Some((file_name, data, link)) = row else {
        return Err(HandlerErr::not_found("submission not found"));
    };
    Ok(json!({
        "fileName": file_name,
        "dataBase64": data.as_deref().map(encode_base64),
        "link": link,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let p = &req.params;
    let result = match req.method.as_str() {
        "submissions.submit" => submissions_submit(state, p),
        "submissions.listForSubject" => submissions_list_for_subject(state, p),
        "submissions.status" => submissions_status(state, p),
        "submissions.download" => submissions_download(state, p),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
