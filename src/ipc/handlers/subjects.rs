use crate::auth::Role;
use crate::cache::CachedQuery;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{self, cached, new_id, required_i64, required_str, required_text, Membership};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;

/// Everything hanging off a subject-offering.
const OFFERING_CACHES: &[CachedQuery] = &[
    CachedQuery::TeacherSubjects,
    CachedQuery::ClassSubjects,
    CachedQuery::Categories,
    CachedQuery::SubjectAssignments,
    CachedQuery::ClassAssignments,
    CachedQuery::SubjectSubmissions,
    CachedQuery::StudentGrades,
    CachedQuery::Materials,
];

fn subjects_create(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = required_str(params, "teacherId")?;
    let name = required_text(params, "name")?;
    let conn = helpers::db(state)?;
    if helpers::user_role(conn, &teacher_id)? != Role::Teacher {
        return Err(HandlerErr::bad_params("only teachers own subjects"));
    }
    let subject_id = new_id();
    conn.execute(
        "INSERT INTO subjects(id, teacher_id, name) VALUES(?, ?, ?)",
        (&subject_id, &teacher_id, &name),
    )
    .map_err(|e| HandlerErr::insert("subjects", e))?;
    state.cache.invalidate(&[CachedQuery::TeacherSubjects]);
    Ok(json!({ "subjectId": subject_id }))
}

fn subjects_list(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = required_str(params, "teacherId")?;
    cached(state, CachedQuery::TeacherSubjects, &teacher_id, |conn| {
        let mut stmt = conn
            .prepare(
                "SELECT s.id, s.name,
                        (SELECT COUNT(*) FROM course_subjects cs WHERE cs.subject_id = s.id)
                 FROM subjects s
                 WHERE s.teacher_id = ?
                 ORDER BY s.name",
            )
            .map_err(HandlerErr::query)?;
        let subjects = stmt
            .query_map([&teacher_id], |r| {
                let id: String = r.get(0)?;
                let name: String = r.get(1)?;
                let offerings: i64 = r.get(2)?;
                Ok(json!({ "id": id, "name": name, "offeringCount": offerings }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::query)?;
        Ok(json!({ "subjects": subjects }))
    })
}

fn subjects_delete(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = required_str(params, "subjectId")?;
    let conn = helpers::db(state)?;
    helpers::require_row(conn, "subjects", &subject_id, "subject")?;

    helpers::run_cascade(
        conn,
        &[
            (
                "grades",
                "DELETE FROM grades WHERE assignment_id IN (
                   SELECT a.id FROM assignments a
                   JOIN course_subjects cs ON cs.id = a.course_subject_id
                   WHERE cs.subject_id = ?1)",
            ),
            (
                "submissions",
                "DELETE FROM submissions WHERE assignment_id IN (
                   SELECT a.id FROM assignments a
                   JOIN course_subjects cs ON cs.id = a.course_subject_id
                   WHERE cs.subject_id = ?1)",
            ),
            (
                "assignments",
                "DELETE FROM assignments WHERE course_subject_id IN (
                   SELECT id FROM course_subjects WHERE subject_id = ?1)",
            ),
            (
                "grading_categories",
                "DELETE FROM grading_categories WHERE course_subject_id IN (
                   SELECT id FROM course_subjects WHERE subject_id = ?1)",
            ),
            (
                "materials",
                "DELETE FROM materials WHERE course_subject_id IN (
                   SELECT id FROM course_subjects WHERE subject_id = ?1)",
            ),
            ("course_subjects", "DELETE FROM course_subjects WHERE subject_id = ?1"),
            ("subjects", "DELETE FROM subjects WHERE id = ?1"),
        ],
        [&subject_id],
    )?;
    state.cache.invalidate(OFFERING_CACHES);
    Ok(json!({ "ok": true }))
}

fn course_subjects_link(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    let subject_id = required_str(params, "subjectId")?;
    let conn = helpers::db(state)?;
    helpers::require_row(conn, "classes", &class_id, "class")?;

    let teacher_id: Option<String> = conn
        .query_row(
            "SELECT teacher_id FROM subjects WHERE id = ?",
            [&subject_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    let Some(teacher_id) = teacher_id else {
        return Err(HandlerErr::not_found("subject not found"));
    };
    if helpers::membership_status(conn, &teacher_id, &class_id)? != Membership::Member {
        return Err(HandlerErr::conflict(
            "the subject's teacher does not teach in this class",
        ));
    }

    let already: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM course_subjects WHERE class_id = ? AND subject_id = ?",
            (&class_id, &subject_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    if already.is_some() {
        return Err(HandlerErr::conflict("subject is already linked to this class"));
    }

    let course_subject_id = new_id();
    conn.execute(
        "INSERT INTO course_subjects(id, class_id, subject_id, teacher_id) VALUES(?, ?, ?, ?)",
        (&course_subject_id, &class_id, &subject_id, &teacher_id),
    )
    .map_err(|e| HandlerErr::insert("course_subjects", e))?;
    state.cache.invalidate(&[CachedQuery::ClassSubjects, CachedQuery::TeacherSubjects]);
    Ok(json!({ "courseSubjectId": course_subject_id }))
}

fn course_subjects_list(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    cached(state, CachedQuery::ClassSubjects, &class_id, |conn| {
        let mut stmt = conn
            .prepare(
                "SELECT cs.id, s.id, s.name, u.id, u.full_name,
                        cs.weight_assignments, cs.weight_exams
                 FROM course_subjects cs
                 JOIN subjects s ON s.id = cs.subject_id
                 JOIN users u ON u.id = cs.teacher_id
                 WHERE cs.class_id = ?
                 ORDER BY s.name",
            )
            .map_err(HandlerErr::query)?;
        let rows = stmt
            .query_map([&class_id], |r| {
                let id: String = r.get(0)?;
                let subject_id: String = r.get(1)?;
                let subject_name: String = r.get(2)?;
                let teacher_id: String = r.get(3)?;
                let teacher_name: String = r.get(4)?;
                let weight_assignments: i64 = r.get(5)?;
                let weight_exams: i64 = r.get(6)?;
                Ok(json!({
                    "id": id,
                    "subjectId": subject_id,
                    "subjectName": subject_name,
                    "teacherId": teacher_id,
                    "teacherName": teacher_name,
                    "weightAssignments": weight_assignments,
                    "weightExams": weight_exams,
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::query)?;
        Ok(json!({ "courseSubjects": rows }))
    })
}

fn course_subjects_unlink(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course_subject_id = required_str(params, "courseSubjectId")?;
    let conn = helpers::db(state)?;
    helpers::require_row(conn, "course_subjects", &course_subject_id, "course subject")?;

    helpers::run_cascade(
        conn,
        &[
            (
                "grades",
                "DELETE FROM grades WHERE assignment_id IN (
                   SELECT id FROM assignments WHERE course_subject_id = ?1)",
            ),
            (
                "submissions",
                "DELETE FROM submissions WHERE assignment_id IN (
                   SELECT id FROM assignments WHERE course_subject_id = ?1)",
            ),
            ("assignments", "DELETE FROM assignments WHERE course_subject_id = ?1"),
            (
                "grading_categories",
                "DELETE FROM grading_categories WHERE course_subject_id = ?1",
            ),
            ("materials", "DELETE FROM materials WHERE course_subject_id = ?1"),
            ("course_subjects", "DELETE FROM course_subjects WHERE id = ?1"),
        ],
        [&course_subject_id],
    )?;
    state.cache.invalidate(OFFERING_CACHES);
    Ok(json!({ "ok": true }))
}

fn course_subjects_update_weights(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course_subject_id = required_str(params, "courseSubjectId")?;
    let weight_assignments = required_i64(params, "weightAssignments")?;
    let weight_exams = required_i64(params, "weightExams")?;
    if !(0..=100).contains(&weight_assignments) || !(0..=100).contains(&weight_exams) {
        return Err(HandlerErr::bad_params("weights must be between 0 and 100"));
    }
    if weight_assignments + weight_exams != 100 {
        return Err(HandlerErr::bad_params("weights must add up to 100"));
    }

    let conn = helpers::db(state)?;
    let changed = conn
        .execute(
            "UPDATE course_subjects SET weight_assignments = ?, weight_exams = ? WHERE id = ?",
            (weight_assignments, weight_exams, &course_subject_id),
        )
        .map_err(|e| HandlerErr::update("course_subjects", e))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("course subject not found"));
    }
    state.cache.invalidate(&[CachedQuery::ClassSubjects]);
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let p = &req.params;
    let result = match req.method.as_str() {
        "subjects.create" => subjects_create(state, p),
        "subjects.list" => subjects_list(state, p),
        "subjects.delete" => subjects_delete(state, p),
        "courseSubjects.link" => course_subjects_link(state, p),
        "courseSubjects.list" => course_subjects_list(state, p),
        "courseSubjects.unlink" => course_subjects_unlink(state, p),
        "courseSubjects.updateWeights" => course_subjects_update_weights(state, p),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
