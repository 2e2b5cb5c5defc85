use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{self, new_id, now_rfc3339, required_str, required_text, Membership};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

/// Announcements newer than the student's read marker. `None` when the
/// student is not enrolled.
pub(super) fn unread_count(conn: &Connection, student_id: &str, class_id: &str) -> Result<Option<i64>, HandlerErr> {
    let marker: Option<i64> = conn
        .query_row(
            "SELECT last_read_announcement_seq FROM enrollments WHERE student_id = ? AND class_id = ?",
            (student_id, class_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    let Some(marker) = marker else {
        return Ok(None);
    };
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM announcements WHERE class_id = ? AND seq > ?",
            (class_id, marker),
            |r| r.get(0),
        )
        .map_err(HandlerErr::query)?;
    Ok(Some(count))
}

fn announcements_create(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    let teacher_id = required_str(params, "teacherId")?;
    let title = required_text(params, "title")?;
    let content = required_text(params, "content")?;

    let conn = helpers::db(state)?;
    helpers::require_row(conn, "classes", &class_id, "class")?;
    if helpers::membership_status(conn, &teacher_id, &class_id)? != Membership::Member
        || helpers::user_role(conn, &teacher_id)? != crate::auth::Role::Teacher
    {
        return Err(HandlerErr::conflict("only the class's teachers can post announcements"));
    }

    let id = new_id();
    conn.execute(
        "INSERT INTO announcements(id, seq, class_id, teacher_id, title, content, created_at)
         VALUES(?, (SELECT COALESCE(MAX(seq), 0) + 1 FROM announcements), ?, ?, ?, ?, ?)",
        (&id, &class_id, &teacher_id, &title, &content, now_rfc3339()),
    )
    .map_err(|e| HandlerErr::insert("announcements", e))?;
    Ok(json!({ "announcementId": id }))
}

fn announcements_list(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    let conn = helpers::db(state)?;
    let mut stmt = conn
        .prepare(
            "SELECT a.id, a.title, a.content, a.created_at, u.full_name
             FROM announcements a
             JOIN users u ON u.id = a.teacher_id
             WHERE a.class_id = ?
             ORDER BY a.seq DESC",
        )
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map([&class_id], |r| {
            let id: String = r.get(0)?;
            let title: String = r.get(1)?;
            let content: String = r.get(2)?;
            let created_at: Option<String> = r.get(3)?;
            let author: String = r.get(4)?;
            Ok(json!({
                "id": id,
                "title": title,
                "content": content,
                "createdAt": created_at,
                "authorName": author,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "announcements": rows }))
}

fn announcements_update(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let announcement_id = required_str(params, "announcementId")?;
    let title = required_text(params, "title")?;
    let content = required_text(params, "content")?;
    let conn = helpers::db(state)?;
    let changed = conn
        .execute(
            "UPDATE announcements SET title = ?, content = ? WHERE id = ?",
            (&title, &content, &announcement_id),
        )
        .map_err(|e| HandlerErr::update("announcements", e))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("announcement not found"));
    }
    Ok(json!({ "ok": true }))
}

fn announcements_delete(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let announcement_id = required_str(params, "announcementId")?;
    let conn = helpers::db(state)?;
    let changed = conn
        .execute("DELETE FROM announcements WHERE id = ?", [&announcement_id])
        .map_err(|e| HandlerErr::delete("announcements", e))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("announcement not found"));
    }
    Ok(json!({ "ok": true }))
}

fn announcements_unread_count(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let class_id = required_str(params, "classId")?;
    let conn = helpers::db(state)?;
    match unread_count(conn, &student_id, &class_id)? {
        Some(count) => Ok(json!({ "unread": count })),
        None => Err(HandlerErr::not_found("student is not enrolled in this class")),
    }
}

fn announcements_mark_read(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let class_id = required_str(params, "classId")?;
    let conn = helpers::db(state)?;
    let changed = conn
        .execute(
            "UPDATE enrollments
             SET last_read_announcement_seq =
               (SELECT COALESCE(MAX(seq), 0) FROM announcements WHERE class_id = ?1)
             WHERE student_id = ?2 AND class_id = ?1",
            (&class_id, &student_id),
        )
        .map_err(|e| HandlerErr::update("enrollments", e))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("student is not enrolled in this class"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let p = &req.params;
    let result = match req.method.as_str() {
        "announcements.create" => announcements_create(state, p),
        "announcements.list" => announcements_list(state, p),
        "announcements.update" => announcements_update(state, p),
        "announcements.delete" => announcements_delete(state, p),
        "announcements.unreadCount" => announcements_unread_count(state, p),
        "announcements.markRead" => announcements_mark_read(state, p),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
