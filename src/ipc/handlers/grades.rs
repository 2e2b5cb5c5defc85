use crate::cache::CachedQuery;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{self, cached, new_id, optional_grade, optional_text, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

const GRADE_CACHES: &[CachedQuery] = &[CachedQuery::StudentGrades, CachedQuery::SubjectSubmissions];

fn upsert_grade(
    conn: &Connection,
    student_id: &str,
    assignment_id: &str,
    grade: Option<f64>,
    feedback: Option<&str>,
    submission_id: Option<&str>,
) -> Result<(), HandlerErr> {
    conn.execute(
        "INSERT INTO grades(id, student_id, assignment_id, grade, feedback, submission_id)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, assignment_id) DO UPDATE SET
           grade = excluded.grade,
           feedback = excluded.feedback,
           submission_id = COALESCE(excluded.submission_id, grades.submission_id)",
        (new_id(), student_id, assignment_id, grade, feedback, submission_id),
    )
    .map_err(|e| HandlerErr::insert("grades", e))?;
    Ok(())
}

fn grades_grade_submission(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let submission_id = required_str(params, "submissionId")?;
    let grade = optional_grade(params, "grade")?;
    let feedback = optional_text(params, "feedback")?;

    let conn = helpers::db(state)?;
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT student_id, assignment_id FROM submissions WHERE id = ?",
            [&submission_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    let Some((student_id, assignment_id)) = row else {
        return Err(HandlerErr::not_found("submission not found"));
    };
    upsert_grade(
        conn,
        &student_id,
        &assignment_id,
        grade,
        feedback.as_deref(),
        Some(&submission_id),
    )?;
    state.cache.invalidate(GRADE_CACHES);
    Ok(json!({ "ok": true, "grade": grade }))
}

fn grades_grade_direct(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let assignment_id = required_str(params, "assignmentId")?;
    let grade = optional_grade(params, "grade")?;
    let feedback = optional_text(params, "feedback")?;

    let conn = helpers::db(state)?;
    let enrolled: Option<i64> = conn
        .query_row(
            "SELECT 1
             FROM assignments a
             JOIN course_subjects cs ON cs.id = a.course_subject_id
             JOIN enrollments e ON e.class_id = cs.class_id
             WHERE a.id = ? AND e.student_id = ?",
            (&assignment_id, &student_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    if enrolled.is_none() {
        helpers::require_row(conn, "assignments", &assignment_id, "assignment")?;
        return Err(HandlerErr::conflict("student is not enrolled in this class"));
    }
    upsert_grade(conn, &student_id, &assignment_id, grade, feedback.as_deref(), None)?;
    state.cache.invalidate(GRADE_CACHES);
    Ok(json!({ "ok": true, "grade": grade }))
}

fn grades_for_student(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let course_subject_id = required_str(params, "courseSubjectId")?;
    let key = format!("{}|{}", student_id, course_subject_id);
    cached(state, CachedQuery::StudentGrades, &key, |conn| {
        let mut stmt = conn
            .prepare(
                "SELECT a.id, a.title, a.kind, a.period, a.deadline, gc.name, g.grade, g.feedback
                 FROM assignments a
                 LEFT JOIN grades g ON g.assignment_id = a.id AND g.student_id = ?1
                 LEFT JOIN grading_categories gc ON gc.id = a.category_id
                 WHERE a.course_subject_id = ?2
                 ORDER BY a.period, a.deadline, a.rowid",
            )
            .map_err(HandlerErr::query)?;
        let rows = stmt
            .query_map((&student_id, &course_subject_id), |r| {
                let assignment_id: String = r.get(0)?;
                let title: String = r.get(1)?;
                let kind: String = r.get(2)?;
                let period: i64 = r.get(3)?;
                let deadline: String = r.get(4)?;
                let category: Option<String> = r.get(5)?;
                let grade: Option<f64> = r.get(6)?;
                let feedback: Option<String> = r.get(7)?;
                Ok(json!({
                    "assignmentId": assignment_id,
                    "title": title,
                    "kind": kind,
                    "period": period,
                    "deadline": deadline,
                    "categoryName": category,
                    "grade": grade,
                    "feedback": feedback,
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::query)?;
        Ok(json!({ "grades": rows }))
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let p = &req.params;
    let result = match req.method.as_str() {
        "grades.gradeSubmission" => grades_grade_submission(state, p),
        "grades.gradeDirect" => grades_grade_direct(state, p),
        "grades.forStudent" => grades_for_student(state, p),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
