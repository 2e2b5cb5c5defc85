use crate::cache::CachedQuery;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{self, cached, new_id, required_str, required_text};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

// An institution is matched to users through `users.group_name`.

fn stats_for(conn: &Connection, name: &str) -> Result<serde_json::Value, HandlerErr> {
    let (teachers, students, classes): (i64, i64, i64) = conn
        .query_row(
            "SELECT
               (SELECT COUNT(*) FROM users WHERE group_name = ?1 AND role = 'teacher'),
               (SELECT COUNT(*) FROM users WHERE group_name = ?1 AND role = 'student'),
               (SELECT COUNT(*) FROM classes c JOIN users u ON u.id = c.teacher_id
                 WHERE u.group_name = ?1)",
            [name],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .map_err(HandlerErr::query)?;
    Ok(json!({
        "name": name,
        "teachers": teachers,
        "students": students,
        "classes": classes,
    }))
}

fn classes_for(conn: &Connection, name: &str) -> Result<Vec<serde_json::Value>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT c.id, c.name, u.full_name,
                    (SELECT COUNT(*) FROM enrollments e WHERE e.class_id = c.id)
             FROM classes c
             JOIN users u ON u.id = c.teacher_id
             WHERE u.group_name = ?
             ORDER BY c.name",
        )
        .map_err(HandlerErr::query)?;
    stmt.query_map([name], |r| {
        let id: String = r.get(0)?;
        let class_name: String = r.get(1)?;
        let teacher: String = r.get(2)?;
        let students: i64 = r.get(3)?;
        Ok(json!({
            "id": id,
            "name": class_name,
            "teacherName": teacher,
            "studentCount": students,
        }))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::query)
}

fn institutions_list(state: &mut AppState) -> Result<serde_json::Value, HandlerErr> {
    cached(state, CachedQuery::Institutions, "", |conn| {
        let mut stmt = conn
            .prepare("SELECT id, name FROM institutions ORDER BY name")
            .map_err(HandlerErr::query)?;
        let rows = stmt
            .query_map([], |r| {
                let id: String = r.get(0)?;
                let name: String = r.get(1)?;
                Ok(json!({ "id": id, "name": name }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::query)?;
        Ok(json!({ "institutions": rows }))
    })
}

fn institutions_create(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = required_text(params, "name")?;
    let conn = helpers::db(state)?;
    let id = new_id();
    if let Err(e) = conn.execute(
        "INSERT INTO institutions(id, name) VALUES(?, ?)",
        (&id, &name),
    ) {
        if helpers::is_unique_violation(&e) {
            return Err(HandlerErr::conflict(format!(
                "institution '{}' already exists",
                name
            )));
        }
        return Err(HandlerErr::insert("institutions", e));
    }
    state.cache.invalidate(&[CachedQuery::Institutions]);
    Ok(json!({ "institutionId": id }))
}

fn institutions_delete(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let institution_id = required_str(params, "institutionId")?;
    let conn = helpers::db(state)?;
    let changed = conn
        .execute("DELETE FROM institutions WHERE id = ?", [&institution_id])
        .map_err(|e| HandlerErr::delete("institutions", e))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("institution not found"));
    }
    state.cache.invalidate(&[
        CachedQuery::Institutions,
        CachedQuery::InstitutionStats,
        CachedQuery::InstitutionClasses,
    ]);
    Ok(json!({ "ok": true }))
}

fn institutions_stats(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = required_text(params, "name")?;
    cached(state, CachedQuery::InstitutionStats, &name, |conn| {
        stats_for(conn, &name)
    })
}

fn institutions_classes(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = required_text(params, "name")?;
    cached(state, CachedQuery::InstitutionClasses, &name, |conn| {
        Ok(json!({ "classes": classes_for(conn, &name)? }))
    })
}

fn institutions_view(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let user_id = required_str(params, "userId")?;
    let conn = helpers::db(state)?;
    let group: Option<Option<String>> = conn
        .query_row(
            "SELECT group_name FROM users WHERE id = ?",
            [&user_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    let Some(group) = group else {
        return Err(HandlerErr::not_found("user not found"));
    };
    let Some(name) = group else {
        return Ok(json!({ "institution": null, "stats": null, "classes": [] }));
    };

    let stats = stats_for(conn, &name)?;
    let mut classes = classes_for(conn, &name)?;
    for class in classes.iter_mut() {
        let class_id = class
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        class["status"] = json!(helpers::membership_status(conn, &user_id, &class_id)?.as_str());
    }
    Ok(json!({ "institution": name, "stats": stats, "classes": classes }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let p = &req.params;
    let result = match req.method.as_str() {
        "institutions.list" => institutions_list(state),
        "institutions.create" => institutions_create(state, p),
        "institutions.delete" => institutions_delete(state, p),
        "institutions.stats" => institutions_stats(state, p),
        "institutions.classes" => institutions_classes(state, p),
        "institutions.view" => institutions_view(state, p),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
