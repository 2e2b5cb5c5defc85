use super::classes::{add_collaborator, enroll_student, MEMBERSHIP_CACHES};
use crate::auth::Role;
use crate::cache::CachedQuery;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{self, cached, new_id, now_rfc3339, required_str, Membership};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;

const REQUEST_CACHES: &[CachedQuery] = &[
    CachedQuery::PendingRequestsForTeacher,
    CachedQuery::AllPendingRequests,
];

fn request_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let id: String = r.get(0)?;
    let user_id: String = r.get(1)?;
    let user_name: String = r.get(2)?;
    let class_id: String = r.get(3)?;
    let class_name: String = r.get(4)?;
    let role: String = r.get(5)?;
    let created_at: Option<String> = r.get(6)?;
    Ok(json!({
        "id": id,
        "userId": user_id,
        "userName": user_name,
        "classId": class_id,
        "className": class_name,
        "role": role,
        "createdAt": created_at,
    }))
}

const PENDING_SELECT: &str = "SELECT jr.id, jr.user_id, u.full_name, jr.class_id, c.name, jr.role, jr.created_at
     FROM join_requests jr
     JOIN users u ON u.id = jr.user_id
     JOIN classes c ON c.id = jr.class_id
     WHERE jr.status = 'pending'";

fn join_requests_create(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let user_id = required_str(params, "userId")?;
    let class_id = required_str(params, "classId")?;
    let role = Role::parse(&required_str(params, "role")?)
        .map_err(|e| HandlerErr::bad_params(e.to_string()))?;
    if role == Role::Admin {
        return Err(HandlerErr::bad_params("admins do not join classes"));
    }

    let conn = helpers::db(state)?;
    let actual = helpers::user_role(conn, &user_id)?;
    if actual != role {
        return Err(HandlerErr::bad_params(format!(
            "user is a {}, not a {}",
            actual.as_str(),
            role.as_str()
        )));
    }
    helpers::require_row(conn, "classes", &class_id, "class")?;

    match helpers::membership_status(conn, &user_id, &class_id)? {
        Membership::Member => {
            return Err(HandlerErr::conflict("You are already a member of this class."))
        }
        Membership::Pending => {
            return Err(HandlerErr::conflict(
                "You already have a pending request for this class.",
            ))
        }
        Membership::NotMember => {}
    }

    let request_id = new_id();
    conn.execute(
        "INSERT INTO join_requests(id, user_id, class_id, role, status, created_at)
         VALUES(?, ?, ?, ?, 'pending', ?)",
        (&request_id, &user_id, &class_id, role.as_str(), now_rfc3339()),
    )
    .map_err(|e| HandlerErr::insert("join_requests", e))?;
    state.cache.invalidate(REQUEST_CACHES);
    Ok(json!({ "requestId": request_id, "message": "Join request sent." }))
}

fn join_requests_list_for_teacher(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = required_str(params, "teacherId")?;
    cached(state, CachedQuery::PendingRequestsForTeacher, &teacher_id, |conn| {
        let sql = format!(
            "{} AND c.teacher_id = ? ORDER BY jr.created_at, jr.rowid",
            PENDING_SELECT
        );
        let mut stmt = conn.prepare(&sql).map_err(HandlerErr::query)?;
        let rows = stmt
            .query_map([&teacher_id], request_json)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::query)?;
        Ok(json!({ "requests": rows }))
    })
}

fn join_requests_list_all(state: &mut AppState) -> Result<serde_json::Value, HandlerErr> {
    cached(state, CachedQuery::AllPendingRequests, "", |conn| {
        let sql = format!("{} ORDER BY jr.created_at, jr.rowid", PENDING_SELECT);
        let mut stmt = conn.prepare(&sql).map_err(HandlerErr::query)?;
        let rows = stmt
            .query_map([], request_json)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::query)?;
        Ok(json!({ "requests": rows }))
    })
}

fn join_requests_resolve(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let request_id = required_str(params, "requestId")?;
    let action = required_str(params, "action")?;
    if action != "approved" && action != "rejected" {
        return Err(HandlerErr::bad_params(
            "action must be 'approved' or 'rejected'",
        ));
    }

    let conn = helpers::db(state)?;
    let row: Option<(String, String, String, String)> = conn
        .query_row(
            "SELECT user_id, class_id, role, status FROM join_requests WHERE id = ?",
            [&request_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    let Some((user_id, class_id, role, status)) = row else {
        return Err(HandlerErr::not_found("join request not found"));
    };
    if status != "pending" {
        return Err(HandlerErr::conflict(format!(
            "join request was already {}",
            status
        )));
    }

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    if let Err(e) = tx.execute(
        "UPDATE join_requests SET status = ? WHERE id = ?",
        (&action, &request_id),
    ) {
        let _ = tx.rollback();
        return Err(HandlerErr::update("join_requests", e));
    }
    if action == "approved" {
        let role = Role::parse(&role).map_err(|e| HandlerErr::new("bad_data", e.to_string()));
        let added = role.and_then(|role| match role {
            Role::Teacher => add_collaborator(&tx, &user_id, &class_id),
            _ => enroll_student(&tx, &user_id, &class_id),
        });
        if let Err(e) = added {
            let _ = tx.rollback();
            return Err(e);
        }
    }
    tx.commit().map_err(HandlerErr::commit)?;

    tracing::info!(request_id = %request_id, %action, "join request resolved");
    state.cache.invalidate(REQUEST_CACHES);
    if action == "approved" {
        state.cache.invalidate(MEMBERSHIP_CACHES);
    }
    Ok(json!({ "ok": true, "status": action }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let p = &req.params;
    let result = match req.method.as_str() {
        "joinRequests.create" => join_requests_create(state, p),
        "joinRequests.listForTeacher" => join_requests_list_for_teacher(state, p),
        "joinRequests.listAll" => join_requests_list_all(state),
        "joinRequests.resolve" => join_requests_resolve(state, p),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
