use crate::auth::{self, Role};
use crate::cache::CachedQuery;
use crate::calc::EvaluationSystem;
use crate::config::MAX_GRADE;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{
    self, cached, new_id, now_rfc3339, required_f64, required_str, required_text, Membership,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

const ACCESS_CODE_ATTEMPTS: usize = 16;

pub(super) const MEMBERSHIP_CACHES: &[CachedQuery] = &[
    CachedQuery::TeacherClasses,
    CachedQuery::StudentClasses,
    CachedQuery::ClassCollaborators,
    CachedQuery::TeacherCollaborations,
    CachedQuery::InstitutionStats,
    CachedQuery::InstitutionClasses,
];

fn require_role(conn: &Connection, user_id: &str, expected: Role) -> Result<(), HandlerErr> {
    let role = helpers::user_role(conn, user_id)?;
    if role != expected {
        return Err(HandlerErr::bad_params(format!(
            "user is a {}, expected a {}",
            role.as_str(),
            expected.as_str()
        )));
    }
    Ok(())
}

/// Inserts the enrollment unless it already exists; returns whether a row was added.
pub(super) fn enroll_student(conn: &Connection, student_id: &str, class_id: &str) -> Result<bool, HandlerErr> {
    let changed = conn
        .execute(
            "INSERT INTO enrollments(student_id, class_id) VALUES(?, ?)
             ON CONFLICT(student_id, class_id) DO NOTHING",
            (student_id, class_id),
        )
        .map_err(|e| HandlerErr::insert("enrollments", e))?;
    Ok(changed > 0)
}

pub(super) fn add_collaborator(conn: &Connection, teacher_id: &str, class_id: &str) -> Result<bool, HandlerErr> {
    let changed = conn
        .execute(
            "INSERT INTO class_collaborators(teacher_id, class_id) VALUES(?, ?)
             ON CONFLICT(teacher_id, class_id) DO NOTHING",
            (teacher_id, class_id),
        )
        .map_err(|e| HandlerErr::insert("class_collaborators", e))?;
    Ok(changed > 0)
}

fn class_by_code(conn: &Connection, raw_code: &str) -> Result<(String, String, String), HandlerErr> {
    let code = auth::normalize_access_code(raw_code);
    let row = conn
        .query_row(
            "SELECT id, name, teacher_id FROM classes WHERE access_code = ?",
            [&code],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    row.ok_or_else(|| HandlerErr::not_found("Invalid access code."))
}

fn classes_create(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = required_str(params, "teacherId")?;
    let name = required_text(params, "name")?;
    let conn = helpers::db(state)?;
    require_role(conn, &teacher_id, Role::Teacher)?;

    let class_id = new_id();
    let created_at = now_rfc3339();
    let mut access_code = None;
    for _ in 0..ACCESS_CODE_ATTEMPTS {
        let code = auth::generate_access_code();
        match conn.execute(
            "INSERT INTO classes(id, teacher_id, name, access_code, created_at)
             VALUES(?, ?, ?, ?, ?)",
            (&class_id, &teacher_id, &name, &code, &created_at),
        ) {
            Ok(_) => {
                access_code = Some(code);
                break;
            }
            Err(e) if helpers::is_unique_violation(&e) => {
                tracing::debug!(%code, "access code collision, retrying");
            }
            Err(e) => return Err(HandlerErr::insert("classes", e)),
        }
    }
    let Some(access_code) = access_code else {
        return Err(HandlerErr::new(
            "db_insert_failed",
            "could not allocate a unique access code",
        )
        .with_details(json!({ "table": "classes" })));
    };

    tracing::info!(class_id = %class_id, %teacher_id, "class created");
    state.cache.invalidate(MEMBERSHIP_CACHES);
    Ok(json!({ "classId": class_id, "accessCode": access_code }))
}

fn class_summary(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let id: String = r.get(0)?;
    let name: String = r.get(1)?;
    let access_code: String = r.get(2)?;
    let passing_grade: f64 = r.get(3)?;
    let system: String = r.get(4)?;
    let teacher_name: String = r.get(5)?;
    let students: i64 = r.get(6)?;
    let role: String = r.get(7)?;
    Ok(json!({
        "id": id,
        "name": name,
        "accessCode": access_code,
        "passingGrade": passing_grade,
        "evaluationSystem": system,
        "teacherName": teacher_name,
        "studentCount": students,
        "role": role,
    }))
}

fn classes_list_for_teacher(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = required_str(params, "teacherId")?;
    cached(state, CachedQuery::TeacherClasses, &teacher_id, |conn| {
        let mut stmt = conn
            .prepare(
                "SELECT c.id, c.name, c.access_code, c.passing_grade, c.evaluation_system,
                        u.full_name,
                        (SELECT COUNT(*) FROM enrollments e WHERE e.class_id = c.id),
                        CASE WHEN c.teacher_id = ?1 THEN 'owner' ELSE 'collaborator' END
                 FROM classes c
                 JOIN users u ON u.id = c.teacher_id
                 WHERE c.teacher_id = ?1
                    OR c.id IN (SELECT class_id FROM class_collaborators WHERE teacher_id = ?1)
                 ORDER BY c.name",
            )
            .map_err(HandlerErr::query)?;
        let classes = stmt
            .query_map([&teacher_id], class_summary)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::query)?;
        Ok(json!({ "classes": classes }))
    })
}

fn classes_list_for_student(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    cached(state, CachedQuery::StudentClasses, &student_id, |conn| {
        let mut stmt = conn
            .prepare(
                "SELECT c.id, c.name, c.access_code, c.passing_grade, c.evaluation_system,
                        u.full_name,
                        (SELECT COUNT(*) FROM enrollments e2 WHERE e2.class_id = c.id),
                        'student'
                 FROM enrollments e
                 JOIN classes c ON c.id = e.class_id
                 JOIN users u ON u.id = c.teacher_id
                 WHERE e.student_id = ?
                 ORDER BY c.name",
            )
            .map_err(HandlerErr::query)?;
        let classes = stmt
            .query_map([&student_id], class_summary)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::query)?;
        Ok(json!({ "classes": classes }))
    })
}

fn classes_update_settings(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    let passing_grade = required_f64(params, "passingGrade")?;
    if !(0.0..=MAX_GRADE).contains(&passing_grade) {
        return Err(HandlerErr::bad_params(format!(
            "passingGrade must be between 0 and {}",
            MAX_GRADE
        )));
    }
    let system = EvaluationSystem::parse(&required_str(params, "evaluationSystem")?)
        .map_err(|e| HandlerErr::bad_params(e.to_string()))?;

    let conn = helpers::db(state)?;
    helpers::class_settings(conn, &class_id)?;

    // Shrinking the period count would strand assignments in periods that no
    // longer exist.
    let stranded: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM assignments a
             JOIN course_subjects cs ON cs.id = a.course_subject_id
             WHERE cs.class_id = ? AND a.period > ?",
            (&class_id, system.period_count()),
            |r| r.get(0),
        )
        .map_err(HandlerErr::query)?;
    if stranded > 0 {
        return Err(HandlerErr::conflict(format!(
            "{} assignment(s) fall outside the periods of a {} system",
            stranded,
            system.as_str()
        )));
    }

    conn.execute(
        "UPDATE classes SET passing_grade = ?, evaluation_system = ? WHERE id = ?",
        (passing_grade, system.as_str(), &class_id),
    )
    .map_err(|e| HandlerErr::update("classes", e))?;
    state.cache.invalidate(MEMBERSHIP_CACHES);
    Ok(json!({ "ok": true }))
}

fn classes_delete(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    let conn = helpers::db(state)?;
    helpers::require_row(conn, "classes", &class_id, "class")?;

    // Explicit dependency order; the schema has no ON DELETE CASCADE.
    helpers::run_cascade(
        conn,
        &[
            (
                "grades",
                "DELETE FROM grades WHERE assignment_id IN (
                   SELECT a.id FROM assignments a
                   JOIN course_subjects cs ON cs.id = a.course_subject_id
                   WHERE cs.class_id = ?1)",
            ),
            (
                "submissions",
                "DELETE FROM submissions WHERE assignment_id IN (
                   SELECT a.id FROM assignments a
                   JOIN course_subjects cs ON cs.id = a.course_subject_id
                   WHERE cs.class_id = ?1)",
            ),
            (
                "assignments",
                "DELETE FROM assignments WHERE course_subject_id IN (
                   SELECT id FROM course_subjects WHERE class_id = ?1)",
            ),
            (
                "grading_categories",
                "DELETE FROM grading_categories WHERE course_subject_id IN (
                   SELECT id FROM course_subjects WHERE class_id = ?1)",
            ),
            (
                "materials",
                "DELETE FROM materials WHERE course_subject_id IN (
                   SELECT id FROM course_subjects WHERE class_id = ?1)",
            ),
            ("course_subjects", "DELETE FROM course_subjects WHERE class_id = ?1"),
            ("enrollments", "DELETE FROM enrollments WHERE class_id = ?1"),
            (
                "class_collaborators",
                "DELETE FROM class_collaborators WHERE class_id = ?1",
            ),
            ("join_requests", "DELETE FROM join_requests WHERE class_id = ?1"),
            ("announcements", "DELETE FROM announcements WHERE class_id = ?1"),
            ("classes", "DELETE FROM classes WHERE id = ?1"),
        ],
        [&class_id],
    )?;

    tracing::info!(class_id = %class_id, "class deleted");
    // Nearly every cached view can reference a class.
    state.cache.clear();
    Ok(json!({ "ok": true }))
}

fn classes_enroll_by_code(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let code = required_text(params, "accessCode")?;
    let conn = helpers::db(state)?;
    require_role(conn, &student_id, Role::Student)?;
    let (class_id, class_name, _) = class_by_code(conn, &code)?;

    if !enroll_student(conn, &student_id, &class_id)? {
        return Err(HandlerErr::conflict("You are already enrolled in this class."));
    }
    state.cache.invalidate(MEMBERSHIP_CACHES);
    Ok(json!({
        "classId": class_id,
        "message": format!("Enrolled in {}.", class_name),
    }))
}

fn classes_join_by_code(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = required_str(params, "teacherId")?;
    let code = required_text(params, "accessCode")?;
    let conn = helpers::db(state)?;
    require_role(conn, &teacher_id, Role::Teacher)?;
    let (class_id, class_name, owner_id) = class_by_code(conn, &code)?;

    if owner_id == teacher_id {
        return Err(HandlerErr::conflict("You are the owner of this class."));
    }
    if !add_collaborator(conn, &teacher_id, &class_id)? {
        return Err(HandlerErr::conflict(
            "You are already a collaborator in this class.",
        ));
    }
    state.cache.invalidate(MEMBERSHIP_CACHES);
    Ok(json!({
        "classId": class_id,
        "message": format!("Joined {} as a collaborator.", class_name),
    }))
}

fn enrollments_add(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let class_id = required_str(params, "classId")?;
    let conn = helpers::db(state)?;
    require_role(conn, &student_id, Role::Student)?;
    helpers::require_row(conn, "classes", &class_id, "class")?;
    let added = enroll_student(conn, &student_id, &class_id)?;
    state.cache.invalidate(MEMBERSHIP_CACHES);
    Ok(json!({ "added": added }))
}

fn enrollments_list(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    let conn = helpers::db(state)?;
    let mut stmt = conn
        .prepare(
            "SELECT u.id, u.username, u.full_name, u.group_name
             FROM enrollments e
             JOIN users u ON u.id = e.student_id
             WHERE e.class_id = ?
             ORDER BY u.full_name",
        )
        .map_err(HandlerErr::query)?;
    let students = stmt
        .query_map([&class_id], |r| {
            let id: String = r.get(0)?;
            let username: String = r.get(1)?;
            let full_name: String = r.get(2)?;
            let group_name: Option<String> = r.get(3)?;
            Ok(json!({
                "id": id,
                "username": username,
                "fullName": full_name,
                "groupName": group_name,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "students": students }))
}

fn enrollments_remove(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let class_id = required_str(params, "classId")?;
    let conn = helpers::db(state)?;
    let enrolled: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM enrollments WHERE student_id = ? AND class_id = ?",
            (&student_id, &class_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    if enrolled.is_none() {
        return Err(HandlerErr::not_found("student is not enrolled in this class"));
    }

    helpers::run_cascade(
        conn,
        &[
            (
                "grades",
                "DELETE FROM grades WHERE student_id = ?1 AND assignment_id IN (
                   SELECT a.id FROM assignments a
                   JOIN course_subjects cs ON cs.id = a.course_subject_id
                   WHERE cs.class_id = ?2)",
            ),
            (
                "submissions",
                "DELETE FROM submissions WHERE student_id = ?1 AND assignment_id IN (
                   SELECT a.id FROM assignments a
                   JOIN course_subjects cs ON cs.id = a.course_subject_id
                   WHERE cs.class_id = ?2)",
            ),
            (
                "enrollments",
                "DELETE FROM enrollments WHERE student_id = ?1 AND class_id = ?2",
            ),
        ],
        (&student_id, &class_id),
    )?;

    state.cache.invalidate(MEMBERSHIP_CACHES);
    state.cache.invalidate(&[CachedQuery::StudentGrades, CachedQuery::SubjectSubmissions]);
    Ok(json!({ "ok": true }))
}

fn collaborators_add(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = required_str(params, "teacherId")?;
    let class_id = required_str(params, "classId")?;
    let conn = helpers::db(state)?;
    require_role(conn, &teacher_id, Role::Teacher)?;
    let class = helpers::class_settings(conn, &class_id)?;
    if class.teacher_id == teacher_id {
        return Err(HandlerErr::conflict("teacher already owns this class"));
    }
    let added = add_collaborator(conn, &teacher_id, &class_id)?;
    state.cache.invalidate(MEMBERSHIP_CACHES);
    Ok(json!({ "added": added }))
}

fn collaborators_list(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    cached(state, CachedQuery::ClassCollaborators, &class_id, |conn| {
        let mut stmt = conn
            .prepare(
                "SELECT u.id, u.username, u.full_name
                 FROM class_collaborators cc
                 JOIN users u ON u.id = cc.teacher_id
                 WHERE cc.class_id = ?
                 ORDER BY u.full_name",
            )
            .map_err(HandlerErr::query)?;
        let teachers = stmt
            .query_map([&class_id], |r| {
                let id: String = r.get(0)?;
                let username: String = r.get(1)?;
                let full_name: String = r.get(2)?;
                Ok(json!({ "id": id, "username": username, "fullName": full_name }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::query)?;
        Ok(json!({ "collaborators": teachers }))
    })
}

fn collaborators_remove(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = required_str(params, "teacherId")?;
    let class_id = required_str(params, "classId")?;
    let conn = helpers::db(state)?;
    let changed = conn
        .execute(
            "DELETE FROM class_collaborators WHERE teacher_id = ? AND class_id = ?",
            (&teacher_id, &class_id),
        )
        .map_err(|e| HandlerErr::delete("class_collaborators", e))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("collaboration not found"));
    }
    state.cache.invalidate(MEMBERSHIP_CACHES);
    Ok(json!({ "ok": true }))
}

fn collaborators_for_teacher(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = required_str(params, "teacherId")?;
    cached(state, CachedQuery::TeacherCollaborations, &teacher_id, |conn| {
        let mut stmt = conn
            .prepare(
                "SELECT c.id, c.name, u.full_name
                 FROM class_collaborators cc
                 JOIN classes c ON c.id = cc.class_id
                 JOIN users u ON u.id = c.teacher_id
                 WHERE cc.teacher_id = ?
                 ORDER BY c.name",
            )
            .map_err(HandlerErr::query)?;
        let classes = stmt
            .query_map([&teacher_id], |r| {
                let id: String = r.get(0)?;
                let name: String = r.get(1)?;
                let owner: String = r.get(2)?;
                Ok(json!({ "classId": id, "name": name, "ownerName": owner }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::query)?;
        Ok(json!({ "classes": classes }))
    })
}

fn membership_check(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let user_id = required_str(params, "userId")?;
    let class_id = required_str(params, "classId")?;
    let conn = helpers::db(state)?;
    let status = helpers::membership_status(conn, &user_id, &class_id)?;
    let message = match status {
        Membership::Member => "You are a member of this class.",
        Membership::Pending => "Your request to join this class is pending.",
        Membership::NotMember => "You are not a member of this class.",
    };
    Ok(json!({
        "member": status == Membership::Member,
        "status": status.as_str(),
        "message": message,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let p = &req.params;
    let result = match req.method.as_str() {
        "classes.create" => classes_create(state, p),
        "classes.listForTeacher" => classes_list_for_teacher(state, p),
        "classes.listForStudent" => classes_list_for_student(state, p),
        "classes.updateSettings" => classes_update_settings(state, p),
        "classes.delete" => classes_delete(state, p),
        "classes.enrollByCode" => classes_enroll_by_code(state, p),
        "classes.joinByCode" => classes_join_by_code(state, p),
        "enrollments.add" => enrollments_add(state, p),
        "enrollments.list" => enrollments_list(state, p),
        "enrollments.remove" => enrollments_remove(state, p),
        "collaborators.add" => collaborators_add(state, p),
        "collaborators.list" => collaborators_list(state, p),
        "collaborators.remove" => collaborators_remove(state, p),
        "collaborators.forTeacher" => collaborators_for_teacher(state, p),
        "membership.check" => membership_check(state, p),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
