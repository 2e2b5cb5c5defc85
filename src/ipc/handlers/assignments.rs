use crate::cache::CachedQuery;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{
    self, cached, new_id, optional_i64, optional_text, required_str, required_text,
};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

const ASSIGNMENT_CACHES: &[CachedQuery] = &[
    CachedQuery::SubjectAssignments,
    CachedQuery::ClassAssignments,
];

const KINDS: &[&str] = &["assignment", "exam"];
const SUBMISSION_TYPES: &[&str] = &["digital", "physical"];

fn one_of(params: &serde_json::Value, key: &str, allowed: &[&str], default: &str) -> Result<String, HandlerErr> {
    let raw = optional_text(params, key)?.unwrap_or_else(|| default.to_string());
    let v = raw.to_ascii_lowercase();
    if !allowed.contains(&v.as_str()) {
        return Err(HandlerErr::bad_params(format!(
            "{} must be one of: {}",
            key,
            allowed.join(", ")
        )));
    }
    Ok(v)
}

fn deadline(params: &serde_json::Value) -> Result<String, HandlerErr> {
    let raw = required_text(params, "deadline")?;
    let date = NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .map_err(|_| HandlerErr::bad_params("deadline must be a YYYY-MM-DD date"))?;
    Ok(date.format("%Y-%m-%d").to_string())
}

fn checked_period(conn: &Connection, course_subject_id: &str, params: &serde_json::Value) -> Result<i64, HandlerErr> {
    let class = helpers::course_subject_class(conn, course_subject_id)?;
    let period = optional_i64(params, "period")?.unwrap_or(1);
    class
        .system
        .check_period(period)
        .map_err(|e| HandlerErr::bad_params(e.to_string()))
}

fn check_category(conn: &Connection, course_subject_id: &str, category_id: Option<&str>) -> Result<(), HandlerErr> {
    let Some(category_id) = category_id else {
        return Ok(());
    };
    let owner: Option<String> = conn
        .query_row(
            "SELECT course_subject_id FROM grading_categories WHERE id = ?",
            [category_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    match owner {
        None => Err(HandlerErr::not_found("category not found")),
        Some(cs) if cs != course_subject_id => Err(HandlerErr::bad_params(
            "category belongs to a different subject",
        )),
        Some(_) => Ok(()),
    }
}

fn assignment_course_subject(conn: &Connection, assignment_id: &str) -> Result<String, HandlerErr> {
    let cs: Option<String> = conn
        .query_row(
            "SELECT course_subject_id FROM assignments WHERE id = ?",
            [assignment_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    cs.ok_or_else(|| HandlerErr::not_found("assignment not found"))
}

fn assignments_create(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course_subject_id = required_str(params, "courseSubjectId")?;
    let title = required_text(params, "title")?;
    let description = optional_text(params, "description")?;
    let deadline = deadline(params)?;
    let kind = one_of(params, "kind", KINDS, "assignment")?;
    let submission_type = one_of(params, "submissionType", SUBMISSION_TYPES, "digital")?;
    let category_id = optional_text(params, "categoryId")?;

    let conn = helpers::db(state)?;
    let period = checked_period(conn, &course_subject_id, params)?;
    check_category(conn, &course_subject_id, category_id.as_deref())?;

    let assignment_id = new_id();
    conn.execute(
        "INSERT INTO assignments(id, course_subject_id, title, description, deadline, kind,
                                 category_id, period, submission_type)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &assignment_id,
            &course_subject_id,
            &title,
            &description,
            &deadline,
            &kind,
            &category_id,
            period,
            &submission_type,
        ),
    )
    .map_err(|e| HandlerErr::insert("assignments", e))?;
    state.cache.invalidate(ASSIGNMENT_CACHES);
    Ok(json!({ "assignmentId": assignment_id }))
}

fn assignments_update(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let assignment_id = required_str(params, "assignmentId")?;
    let title = required_text(params, "title")?;
    let description = optional_text(params, "description")?;
    let deadline = deadline(params)?;
    let kind = one_of(params, "kind", KINDS, "assignment")?;
    let submission_type = one_of(params, "submissionType", SUBMISSION_TYPES, "digital")?;

    let conn = helpers::db(state)?;
    let course_subject_id = assignment_course_subject(conn, &assignment_id)?;
    let period = checked_period(conn, &course_subject_id, params)?;
    conn.execute(
        "UPDATE assignments
         SET title = ?, description = ?, deadline = ?, kind = ?, submission_type = ?, period = ?
         WHERE id = ?",
        (
            &title,
            &description,
            &deadline,
            &kind,
            &submission_type,
            period,
            &assignment_id,
        ),
    )
    .map_err(|e| HandlerErr::update("assignments", e))?;
    state.cache.invalidate(ASSIGNMENT_CACHES);
    state.cache.invalidate(&[CachedQuery::StudentGrades]);
    Ok(json!({ "ok": true }))
}

fn assignments_set_category(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let assignment_id = required_str(params, "assignmentId")?;
    let category_id = optional_text(params, "categoryId")?;
    let conn = helpers::db(state)?;
    let course_subject_id = assignment_course_subject(conn, &assignment_id)?;
    check_category(conn, &course_subject_id, category_id.as_deref())?;
    conn.execute(
        "UPDATE assignments SET category_id = ? WHERE id = ?",
        (&category_id, &assignment_id),
    )
    .map_err(|e| HandlerErr::update("assignments", e))?;
    state.cache.invalidate(ASSIGNMENT_CACHES);
    state.cache.invalidate(&[CachedQuery::StudentGrades]);
    Ok(json!({ "ok": true }))
}

fn assignments_delete(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let assignment_id = required_str(params, "assignmentId")?;
    let conn = helpers::db(state)?;
    helpers::require_row(conn, "assignments", &assignment_id, "assignment")?;
    helpers::run_cascade(
        conn,
        &[
            ("grades", "DELETE FROM grades WHERE assignment_id = ?1"),
            ("submissions", "DELETE FROM submissions WHERE assignment_id = ?1"),
            ("assignments", "DELETE FROM assignments WHERE id = ?1"),
        ],
        [&assignment_id],
    )?;
    state.cache.invalidate(ASSIGNMENT_CACHES);
    state.cache.invalidate(&[CachedQuery::StudentGrades, CachedQuery::SubjectSubmissions]);
    Ok(json!({ "ok": true }))
}

fn assignments_list_for_subject(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course_subject_id = required_str(params, "courseSubjectId")?;
    cached(state, CachedQuery::SubjectAssignments, &course_subject_id, |conn| {
        let mut stmt = conn
            .prepare(
                "SELECT a.id, a.title, a.description, a.deadline, a.kind, a.category_id,
                        gc.name, a.period, a.submission_type
                 FROM assignments a
                 LEFT JOIN grading_categories gc ON gc.id = a.category_id
                 WHERE a.course_subject_id = ?
                 ORDER BY a.deadline, a.rowid",
            )
            .map_err(HandlerErr::query)?;
        let rows = stmt
            .query_map([&course_subject_id], |r| {
                let id: String = r.get(0)?;
                let title: String = r.get(1)?;
                let description: Option<String> = r.get(2)?;
                let deadline: String = r.get(3)?;
                let kind: String = r.get(4)?;
                let category_id: Option<String> = r.get(5)?;
                let category_name: Option<String> = r.get(6)?;
                let period: i64 = r.get(7)?;
                let submission_type: String = r.get(8)?;
                Ok(json!({
                    "id": id,
                    "title": title,
                    "description": description,
                    "deadline": deadline,
                    "kind": kind,
                    "categoryId": category_id,
                    "categoryName": category_name,
                    "period": period,
                    "submissionType": submission_type,
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::query)?;
        Ok(json!({ "assignments": rows }))
    })
}

fn assignments_list_for_class(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    cached(state, CachedQuery::ClassAssignments, &class_id, |conn| {
        let mut stmt = conn
            .prepare(
                "SELECT a.id, a.title, a.deadline, a.kind, a.period, a.submission_type,
                        cs.id, s.name
                 FROM assignments a
                 JOIN course_subjects cs ON cs.id = a.course_subject_id
                 JOIN subjects s ON s.id = cs.subject_id
                 WHERE cs.class_id = ?
                 ORDER BY a.deadline DESC, a.rowid DESC",
            )
            .map_err(HandlerErr::query)?;
        let rows = stmt
            .query_map([&class_id], |r| {
                let id: String = r.get(0)?;
                let title: String = r.get(1)?;
                let deadline: String = r.get(2)?;
                let kind: String = r.get(3)?;
                let period: i64 = r.get(4)?;
                let submission_type: String = r.get(5)?;
                let course_subject_id: String = r.get(6)?;
                let subject_name: String = r.get(7)?;
                Ok(json!({
                    "id": id,
                    "title": title,
                    "deadline": deadline,
                    "kind": kind,
                    "period": period,
                    "submissionType": submission_type,
                    "courseSubjectId": course_subject_id,
                    "subjectName": subject_name,
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::query)?;
        Ok(json!({ "assignments": rows }))
    })
}

fn assignments_gradable_students(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    let assignment_id = required_str(params, "assignmentId")?;
    let conn = helpers::db(state)?;
    helpers::require_row(conn, "assignments", &assignment_id, "assignment")?;

    let mut stmt = conn
        .prepare(
            "SELECT u.id, u.full_name, s.id, s.submitted_at, g.grade, g.feedback
             FROM enrollments e
             JOIN users u ON u.id = e.student_id
             LEFT JOIN submissions s ON s.student_id = u.id AND s.assignment_id = ?2
             LEFT JOIN grades g ON g.student_id = u.id AND g.assignment_id = ?2
             WHERE e.class_id = ?1
             ORDER BY u.full_name",
        )
        .map_err(HandlerErr::query)?;
    let students = stmt
        .query_map((&class_id, &assignment_id), |r| {
            let id: String = r.get(0)?;
            let name: String = r.get(1)?;
            let submission_id: Option<String> = r.get(2)?;
            let submitted_at: Option<String> = r.get(3)?;
            let grade: Option<f64> = r.get(4)?;
            let feedback: Option<String> = r.get(5)?;
            Ok(json!({
                "studentId": id,
                "fullName": name,
                "submissionId": submission_id,
                "submittedAt": submitted_at,
                "grade": grade,
                "feedback": feedback,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "students": students }))
}

fn calendar_events(conn: &Connection, class_filter: &str, user_id: &str) -> Result<serde_json::Value, HandlerErr> {
    let sql = format!(
        "SELECT a.id, a.title, a.deadline, a.kind, c.id, c.name, s.name
         FROM assignments a
         JOIN course_subjects cs ON cs.id = a.course_subject_id
         JOIN classes c ON c.id = cs.class_id
         JOIN subjects s ON s.id = cs.subject_id
         WHERE {}
         ORDER BY a.deadline, a.rowid",
        class_filter
    );
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::query)?;
    let events = stmt
        .query_map([user_id], |r| {
            let id: String = r.get(0)?;
            let title: String = r.get(1)?;
            let deadline: String = r.get(2)?;
            let kind: String = r.get(3)?;
            let class_id: String = r.get(4)?;
            let class_name: String = r.get(5)?;
            let subject_name: String = r.get(6)?;
            Ok(json!({
                "assignmentId": id,
                "classId": class_id,
                "title": format!("{} ({} - {})", title, class_name, subject_name),
                "start": deadline,
                "kind": kind,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "events": events }))
}

fn calendar_for_student(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let conn = helpers::db(state)?;
    calendar_events(
        conn,
        "c.id IN (SELECT class_id FROM enrollments WHERE student_id = ?1)",
        &student_id,
    )
}

fn calendar_for_teacher(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = required_str(params, "teacherId")?;
    let conn = helpers::db(state)?;
    calendar_events(
        conn,
        "(c.teacher_id = ?1
          OR c.id IN (SELECT class_id FROM class_collaborators WHERE teacher_id = ?1))",
        &teacher_id,
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let p = &req.params;
    let result = match req.method.as_str() {
        "assignments.create" => assignments_create(state, p),
        "assignments.update" => assignments_update(state, p),
        "assignments.setCategory" => assignments_set_category(state, p),
        "assignments.delete" => assignments_delete(state, p),
        "assignments.listForSubject" => assignments_list_for_subject(state, p),
        "assignments.listForClass" => assignments_list_for_class(state, p),
        "assignments.gradableStudents" => assignments_gradable_students(state, p),
        "calendar.forStudent" => calendar_for_student(state, p),
        "calendar.forTeacher" => calendar_for_teacher(state, p),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
