use crate::auth::{self, AuthError, Role};
use crate::cache::CachedQuery;
use crate::config::Config;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{
    self, cached, new_id, now_rfc3339, optional_text, required_bool, required_str,
    required_str_list, required_text,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::json;

const USER_CACHES: &[CachedQuery] = &[
    CachedQuery::Users,
    CachedQuery::PendingUsers,
    CachedQuery::UserCountsByGroup,
    CachedQuery::InstitutionStats,
    CachedQuery::InstitutionClasses,
];

fn user_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let id: String = r.get(0)?;
    let username: String = r.get(1)?;
    let full_name: String = r.get(2)?;
    let role: String = r.get(3)?;
    let active: i64 = r.get(4)?;
    let group_name: Option<String> = r.get(5)?;
    Ok(json!({
        "id": id,
        "username": username,
        "fullName": full_name,
        "role": role,
        "active": active != 0,
        "groupName": group_name,
    }))
}

fn check_registration_code(config: &Config, role: Role, code: Option<&str>) -> Result<(), HandlerErr> {
    let expected = match role {
        Role::Student => return Ok(()),
        Role::Teacher => config.teacher_code.as_deref(),
        Role::Admin => config.admin_code.as_deref(),
    };
    let Some(expected) = expected else {
        return Err(HandlerErr::new(
            "registration_closed",
            format!("{} self-registration is disabled", role.as_str()),
        ));
    };
    if code != Some(expected) {
        return Err(HandlerErr::new(
            "invalid_credentials",
            "Incorrect registration code.",
        ));
    }
    Ok(())
}

fn insert_user(
    conn: &Connection,
    params: &serde_json::Value,
    role: Role,
    bcrypt_cost: u32,
) -> Result<serde_json::Value, HandlerErr> {
    let username = required_text(params, "username")?;
    let password = required_str(params, "password")?;
    let full_name = required_text(params, "fullName")?;
    let group_name = optional_text(params, "groupName")?;

    let hashed = hash_or_reject(&password, bcrypt_cost)?;
    let active = role.active_on_registration();
    let user_id = new_id();
    if let Err(e) = conn.execute(
        "INSERT INTO users(id, username, password_hash, full_name, role, is_active, group_name, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &user_id,
            &username,
            &hashed,
            &full_name,
            role.as_str(),
            active as i64,
            &group_name,
            now_rfc3339(),
        ),
    ) {
        if helpers::is_unique_violation(&e) {
            return Err(HandlerErr::conflict("Username already taken."));
        }
        return Err(HandlerErr::insert("users", e));
    }

    tracing::info!(%username, role = role.as_str(), active, "registered user");
    let message = if active {
        "Registration successful! Please login."
    } else {
        "Registration successful! Awaiting admin approval."
    };
    Ok(json!({ "userId": user_id, "active": active, "message": message }))
}

fn hash_or_reject(password: &str, cost: u32) -> Result<String, HandlerErr> {
    auth::hash_password(password, cost).map_err(|e| match e {
        AuthError::EmptyPassword => HandlerErr::bad_params(e.to_string()),
        _ => HandlerErr::new("hash_failed", e.to_string()),
    })
}

fn parse_role(params: &serde_json::Value) -> Result<Role, HandlerErr> {
    let raw = required_str(params, "role")?;
    Role::parse(&raw).map_err(|e| HandlerErr::bad_params(e.to_string()))
}

fn auth_register(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let role = parse_role(params)?;
    let code = optional_text(params, "registrationCode")?;
    check_registration_code(&state.config, role, code.as_deref())?;
    let cost = state.config.bcrypt_cost;
    let result = insert_user(helpers::db(state)?, params, role, cost)?;
    state.cache.invalidate(USER_CACHES);
    Ok(result)
}

fn users_create(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let role = parse_role(params)?;
    let cost = state.config.bcrypt_cost;
    let result = insert_user(helpers::db(state)?, params, role, cost)?;
    state.cache.invalidate(USER_CACHES);
    Ok(result)
}

fn auth_login(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = helpers::db(state)?;
    let username = required_text(params, "username")?;
    let password = required_str(params, "password")?;

    let row = conn
        .query_row(
            "SELECT id, username, full_name, role, is_active, group_name, password_hash
             FROM users WHERE username = ?",
            [&username],
            |r| {
                let user = user_json(r)?;
                let hash: String = r.get(6)?;
                Ok((user, hash))
            },
        )
        .optional()
        .map_err(HandlerErr::query)?;

    let Some((user, hash)) = row else {
        tracing::warn!(%username, "login rejected: unknown user");
        return Err(HandlerErr::new("invalid_credentials", "Invalid credentials"));
    };
    match auth::verify_password(&password, &hash) {
        Ok(true) => {}
        Ok(false) => {
            tracing::warn!(%username, "login rejected: bad password");
            return Err(HandlerErr::new("invalid_credentials", "Invalid credentials"));
        }
        Err(e) => {
            tracing::warn!(%username, error = %e, "login rejected: unreadable password hash");
            return Err(HandlerErr::new("invalid_credentials", "Invalid credentials"));
        }
    }
    if user.get("active").and_then(|v| v.as_bool()) != Some(true) {
        return Err(HandlerErr::new(
            "pending_approval",
            "Your account is pending approval by an administrator.",
        ));
    }
    Ok(json!({ "user": user }))
}

fn users_list(state: &mut AppState) -> Result<serde_json::Value, HandlerErr> {
    cached(state, CachedQuery::Users, "", |conn| {
        let mut stmt = conn
            .prepare(
                "SELECT id, username, full_name, role, is_active, group_name
                 FROM users
                 ORDER BY role, full_name",
            )
            .map_err(HandlerErr::query)?;
        let users = stmt
            .query_map([], user_json)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::query)?;
        Ok(json!({ "users": users }))
    })
}

fn users_pending(state: &mut AppState) -> Result<serde_json::Value, HandlerErr> {
    cached(state, CachedQuery::PendingUsers, "", |conn| {
        let mut stmt = conn
            .prepare(
                "SELECT id, username, full_name, role, is_active, group_name
                 FROM users
                 WHERE is_active = 0
                 ORDER BY created_at DESC, rowid DESC",
            )
            .map_err(HandlerErr::query)?;
        let users = stmt
            .query_map([], user_json)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::query)?;
        Ok(json!({ "users": users }))
    })
}

fn users_counts_by_group(state: &mut AppState) -> Result<serde_json::Value, HandlerErr> {
    cached(state, CachedQuery::UserCountsByGroup, "", |conn| {
        let mut stmt = conn
            .prepare(
                "SELECT group_name, role, COUNT(*)
                 FROM users
                 GROUP BY group_name, role
                 ORDER BY group_name, role",
            )
            .map_err(HandlerErr::query)?;
        let counts = stmt
            .query_map([], |r| {
                let group_name: Option<String> = r.get(0)?;
                let role: String = r.get(1)?;
                let count: i64 = r.get(2)?;
                Ok(json!({ "groupName": group_name, "role": role, "count": count }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::query)?;
        Ok(json!({ "counts": counts }))
    })
}

fn update_one(
    state: &mut AppState,
    sql: &str,
    binds: Vec<Value>,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = helpers::db(state)?;
    let changed = conn
        .execute(sql, params_from_iter(binds))
        .map_err(|e| HandlerErr::update("users", e))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("user not found"));
    }
    state.cache.invalidate(USER_CACHES);
    Ok(json!({ "ok": true }))
}

fn users_approve(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let user_id = required_str(params, "userId")?;
    let full_name = required_text(params, "fullName")?;
    let group_name = optional_text(params, "groupName")?;
    update_one(
        state,
        "UPDATE users SET full_name = ?, group_name = ?, is_active = 1 WHERE id = ?",
        vec![
            Value::Text(full_name),
            group_name.map(Value::Text).unwrap_or(Value::Null),
            Value::Text(user_id),
        ],
    )
}

fn users_set_active(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let user_id = required_str(params, "userId")?;
    let active = required_bool(params, "active")?;
    update_one(
        state,
        "UPDATE users SET is_active = ? WHERE id = ?",
        vec![Value::Integer(active as i64), Value::Text(user_id)],
    )
}

fn users_set_password(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let user_id = required_str(params, "userId")?;
    let password = required_str(params, "password")?;
    let hashed = hash_or_reject(&password, state.config.bcrypt_cost)?;
    update_one(
        state,
        "UPDATE users SET password_hash = ? WHERE id = ?",
        vec![Value::Text(hashed), Value::Text(user_id)],
    )
}

fn users_set_group(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let user_id = required_str(params, "userId")?;
    let group_name = optional_text(params, "groupName")?;
    update_one(
        state,
        "UPDATE users SET group_name = ? WHERE id = ?",
        vec![
            group_name.map(Value::Text).unwrap_or(Value::Null),
            Value::Text(user_id),
        ],
    )
}

fn users_bulk_set_active(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let role = parse_role(params)?;
    let active = required_bool(params, "active")?;
    let conn = helpers::db(state)?;
    let changed = conn
        .execute(
            "UPDATE users SET is_active = ? WHERE role = ?",
            (active as i64, role.as_str()),
        )
        .map_err(|e| HandlerErr::update("users", e))?;
    state.cache.invalidate(USER_CACHES);
    Ok(json!({ "updated": changed }))
}

fn users_bulk_assign_group(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let user_ids = required_str_list(params, "userIds")?;
    let group_name = optional_text(params, "groupName")?;
    if user_ids.is_empty() {
        return Ok(json!({ "updated": 0 }));
    }
    let conn = helpers::db(state)?;

    let placeholders = std::iter::repeat("?")
        .take(user_ids.len())
        .collect::<Vec<_>>()
        .join(",");
    let sql = format!(
        "UPDATE users SET group_name = ? WHERE id IN ({})",
        placeholders
    );
    let mut binds: Vec<Value> = Vec::with_capacity(user_ids.len() + 1);
    binds.push(group_name.map(Value::Text).unwrap_or(Value::Null));
    for id in user_ids {
        binds.push(Value::Text(id));
    }
    let changed = conn
        .execute(&sql, params_from_iter(binds))
        .map_err(|e| HandlerErr::update("users", e))?;
    state.cache.invalidate(USER_CACHES);
    Ok(json!({ "updated": changed }))
}

fn users_delete(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let user_id = required_str(params, "userId")?;
    let conn = helpers::db(state)?;
    helpers::require_row(conn, "users", &user_id, "user")?;

    let owned: i64 = conn
        .query_row(
            "SELECT (SELECT COUNT(*) FROM classes WHERE teacher_id = ?1)
                  + (SELECT COUNT(*) FROM subjects WHERE teacher_id = ?1)",
            [&user_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::query)?;
    if owned > 0 {
        return Err(HandlerErr::conflict(
            "user still owns classes or subjects; delete those first",
        ));
    }

    helpers::run_cascade(
        conn,
        &[
            ("grades", "DELETE FROM grades WHERE student_id = ?"),
            ("submissions", "DELETE FROM submissions WHERE student_id = ?"),
            ("enrollments", "DELETE FROM enrollments WHERE student_id = ?"),
            (
                "class_collaborators",
                "DELETE FROM class_collaborators WHERE teacher_id = ?",
            ),
            ("join_requests", "DELETE FROM join_requests WHERE user_id = ?"),
            ("announcements", "DELETE FROM announcements WHERE teacher_id = ?"),
            ("users", "DELETE FROM users WHERE id = ?"),
        ],
        [&user_id],
    )?;

    state.cache.invalidate(USER_CACHES);
    state.cache.invalidate(&[
        CachedQuery::StudentClasses,
        CachedQuery::ClassCollaborators,
        CachedQuery::TeacherCollaborations,
        CachedQuery::TeacherClasses,
        CachedQuery::PendingRequestsForTeacher,
        CachedQuery::AllPendingRequests,
        CachedQuery::StudentGrades,
        CachedQuery::SubjectSubmissions,
    ]);
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let p = &req.params;
    let result = match req.method.as_str() {
        "auth.register" => auth_register(state, p),
        "auth.login" => auth_login(state, p),
        "users.create" => users_create(state, p),
        "users.list" => users_list(state),
        "users.pending" => users_pending(state),
        "users.countsByGroup" => users_counts_by_group(state),
        "users.approve" => users_approve(state, p),
        "users.setActive" => users_set_active(state, p),
        "users.setPassword" => users_set_password(state, p),
        "users.setGroup" => users_set_group(state, p),
        "users.bulkSetActive" => users_bulk_set_active(state, p),
        "users.bulkAssignGroup" => users_bulk_assign_group(state, p),
        "users.delete" => users_delete(state, p),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
