use crate::db;
use crate::ipc::error::{err, ok, respond, HandlerErr};
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "cacheEnabled": state.cache.enabled(),
        }),
    )
}

pub fn open_workspace(state: &mut AppState, path: PathBuf) -> anyhow::Result<()> {
    let conn = db::open_db(&path)?;
    state.cache.clear();
    state.workspace = Some(path);
    state.db = Some(conn);
    Ok(())
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match open_workspace(state, path.clone()) {
        Ok(()) => ok(&req.id, json!({ "workspacePath": path.to_string_lossy() })),
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

fn system_migrate(state: &mut AppState) -> Result<serde_json::Value, HandlerErr> {
    let conn = helpers::db(state)?;
    let applied = db::run_migrations(conn)
        .map_err(|e| HandlerErr::new("db_update_failed", format!("{e:?}")))?;
    state.cache.clear();
    Ok(json!({ "applied": applied, "message": "Migration successful." }))
}

fn system_status(state: &mut AppState) -> Result<serde_json::Value, HandlerErr> {
    let conn = helpers::db(state)?;
    let (classes, assignments, submissions, users): (i64, i64, i64, i64) = conn
        .query_row(
            "SELECT
               (SELECT COUNT(*) FROM classes),
               (SELECT COUNT(*) FROM assignments),
               (SELECT COUNT(*) FROM submissions),
               (SELECT COUNT(*) FROM users)",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .map_err(HandlerErr::query)?;
    Ok(json!({
        "classes": classes,
        "assignments": assignments,
        "submissions": submissions,
        "users": users,
        "cacheEntries": state.cache.len(),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "system.migrate" => Some(respond(&req.id, system_migrate(state))),
        "system.status" => Some(respond(&req.id, system_status(state))),
        _ => None,
    }
}
