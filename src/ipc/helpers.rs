use crate::auth::Role;
use crate::cache::CachedQuery;
use crate::calc::{EvaluationSystem, GradingCategory};
use crate::config::MAX_GRADE;
use crate::ipc::error::HandlerErr;
use crate::ipc::types::AppState;
use base64::{engine::general_purpose, Engine as _};
use rusqlite::{Connection, OptionalExtension};

pub fn db(state: &AppState) -> Result<&Connection, HandlerErr> {
    state.db.as_ref().ok_or_else(HandlerErr::no_workspace)
}

/// Runs `load` through the query cache. Splits the borrow of `state` so the
/// loader can use the connection while the cache is updated.
pub fn cached<F>(
    state: &mut AppState,
    query: CachedQuery,
    key: &str,
    load: F,
) -> Result<serde_json::Value, HandlerErr>
where
    F: FnOnce(&Connection) -> Result<serde_json::Value, HandlerErr>,
{
    let AppState { db, cache, .. } = state;
    let conn = db.as_ref().ok_or_else(HandlerErr::no_workspace)?;
    cache.get_or_load(query, key, || load(conn))
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Required, trimmed and non-empty.
pub fn required_text(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    let v = required_str(params, key)?.trim().to_string();
    if v.is_empty() {
        return Err(HandlerErr::bad_params(format!("{} must not be empty", key)));
    }
    Ok(v)
}

/// Missing, null and blank all map to `None`.
pub fn optional_text(params: &serde_json::Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let Some(s) = v.as_str() else {
                return Err(HandlerErr::bad_params(format!(
                    "{} must be a string or null",
                    key
                )));
            };
            let t = s.trim();
            Ok(if t.is_empty() { None } else { Some(t.to_string()) })
        }
    }
}

pub fn required_bool(params: &serde_json::Value, key: &str) -> Result<bool, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_bool())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn required_f64(params: &serde_json::Value, key: &str) -> Result<f64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a number", key)))
}

pub fn required_i64(params: &serde_json::Value, key: &str) -> Result<i64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an integer", key)))
}

pub fn optional_i64(params: &serde_json::Value, key: &str) -> Result<Option<i64>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an integer", key))),
    }
}

pub fn required_str_list(params: &serde_json::Value, key: &str) -> Result<Vec<String>, HandlerErr> {
    let Some(raw) = params.get(key).and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params(format!("missing {}", key)));
    };
    let mut out = Vec::with_capacity(raw.len());
    for v in raw {
        let Some(s) = v.as_str() else {
            return Err(HandlerErr::bad_params(format!(
                "{} must contain only strings",
                key
            )));
        };
        let t = s.trim();
        if !t.is_empty() && !out.iter().any(|o: &String| o == t) {
            out.push(t.to_string());
        }
    }
    Ok(out)
}

/// `null` clears a grade; numbers must lie in `[0, MAX_GRADE]`.
pub fn optional_grade(params: &serde_json::Value, key: &str) -> Result<Option<f64>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let Some(g) = v.as_f64() else {
                return Err(HandlerErr::bad_params(format!(
                    "{} must be a number or null",
                    key
                )));
            };
            if !(0.0..=MAX_GRADE).contains(&g) {
                return Err(HandlerErr::bad_params(format!(
                    "{} must be between 0 and {}",
                    key, MAX_GRADE
                )));
            }
            Ok(Some(g))
        }
    }
}

pub fn optional_base64(params: &serde_json::Value, key: &str) -> Result<Option<Vec<u8>>, HandlerErr> {
    match optional_text(params, key)? {
        None => Ok(None),
        Some(s) => general_purpose::STANDARD
            .decode(s.as_bytes())
            .map(Some)
            .map_err(|e| HandlerErr::bad_params(format!("{} is not valid base64: {}", key, e))),
    }
}

pub fn encode_base64(bytes: &[u8]) -> String {
    general_purpose::STANDARD.encode(bytes)
}

pub fn is_unique_violation(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(f, _) => {
            f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        }
        _ => false,
    }
}

/// `table` is always a literal from the caller, never user input.
pub fn row_exists(conn: &Connection, table: &str, id: &str) -> Result<bool, HandlerErr> {
    conn.query_row(
        &format!("SELECT 1 FROM {} WHERE id = ?", table),
        [id],
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::query)
}

pub fn require_row(conn: &Connection, table: &str, id: &str, what: &str) -> Result<(), HandlerErr> {
    if row_exists(conn, table, id)? {
        Ok(())
    } else {
        Err(HandlerErr::not_found(format!("{} not found", what)))
    }
}

pub fn user_role(conn: &Connection, user_id: &str) -> Result<Role, HandlerErr> {
    let raw: Option<String> = conn
        .query_row("SELECT role FROM users WHERE id = ?", [user_id], |r| r.get(0))
        .optional()
        .map_err(HandlerErr::query)?;
    let Some(raw) = raw else {
        return Err(HandlerErr::not_found("user not found"));
    };
    Role::parse(&raw).map_err(|e| HandlerErr::new("bad_data", e.to_string()))
}

#[derive(Debug, Clone)]
pub struct ClassSettings {
    pub id: String,
    pub name: String,
    pub teacher_id: String,
    pub passing_grade: f64,
    pub system: EvaluationSystem,
}

pub fn class_settings(conn: &Connection, class_id: &str) -> Result<ClassSettings, HandlerErr> {
    let row = conn
        .query_row(
            "SELECT id, name, teacher_id, passing_grade, evaluation_system FROM classes WHERE id = ?",
            [class_id],
            |r| {
                let system: Option<String> = r.get(4)?;
                Ok(ClassSettings {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    teacher_id: r.get(2)?,
                    passing_grade: r
                        .get::<_, Option<f64>>(3)?
                        .unwrap_or(crate::config::DEFAULT_PASSING_GRADE),
                    system: EvaluationSystem::from_stored(system.as_deref()),
                })
            },
        )
        .optional()
        .map_err(HandlerErr::query)?;
    row.ok_or_else(|| HandlerErr::not_found("class not found"))
}

/// Class that owns a subject-offering.
pub fn course_subject_class(conn: &Connection, course_subject_id: &str) -> Result<ClassSettings, HandlerErr> {
    let class_id: Option<String> = conn
        .query_row(
            "SELECT class_id FROM course_subjects WHERE id = ?",
            [course_subject_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    let Some(class_id) = class_id else {
        return Err(HandlerErr::not_found("course subject not found"));
    };
    class_settings(conn, &class_id)
}

pub fn load_categories(conn: &Connection, course_subject_id: &str) -> Result<Vec<GradingCategory>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, weight, course_subject_id
             FROM grading_categories
             WHERE course_subject_id = ?
             ORDER BY sort_order, rowid",
        )
        .map_err(HandlerErr::query)?;
    stmt.query_map([course_subject_id], |r| {
        Ok(GradingCategory {
            id: r.get(0)?,
            name: r.get(1)?,
            weight: r.get(2)?,
            course_subject_id: r.get(3)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::query)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    Member,
    Pending,
    NotMember,
}

impl Membership {
    pub fn as_str(self) -> &'static str {
        match self {
            Membership::Member => "member",
            Membership::Pending => "pending",
            Membership::NotMember => "none",
        }
    }
}

/// Owner, collaborator and enrolled student all count as members.
pub fn membership_status(conn: &Connection, user_id: &str, class_id: &str) -> Result<Membership, HandlerErr> {
    let member: i64 = conn
        .query_row(
            "SELECT
               EXISTS(SELECT 1 FROM enrollments WHERE student_id = ?1 AND class_id = ?2)
               OR EXISTS(SELECT 1 FROM class_collaborators WHERE teacher_id = ?1 AND class_id = ?2)
               OR EXISTS(SELECT 1 FROM classes WHERE teacher_id = ?1 AND id = ?2)",
            (user_id, class_id),
            |r| r.get(0),
        )
        .map_err(HandlerErr::query)?;
    if member != 0 {
        return Ok(Membership::Member);
    }
    let pending: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM join_requests
             WHERE user_id = ? AND class_id = ? AND status = 'pending'
             LIMIT 1",
            (user_id, class_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    Ok(if pending.is_some() {
        Membership::Pending
    } else {
        Membership::NotMember
    })
}

/// Runs each delete in one transaction, rolling back on the first failure.
pub fn run_cascade<P>(conn: &Connection, steps: &[(&str, &str)], params: P) -> Result<(), HandlerErr>
where
    P: rusqlite::Params + Copy,
{
    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    for (table, sql) in steps {
        if let Err(e) = tx.execute(sql, params) {
            let _ = tx.rollback();
            return Err(HandlerErr::delete(table, e));
        }
    }
    tx.commit().map_err(HandlerErr::commit)
}
