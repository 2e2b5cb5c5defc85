use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// Failure raised inside a handler; turned into an error envelope at the edge.
#[derive(Debug)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("conflict", message)
    }

    pub fn no_workspace() -> Self {
        Self::new("no_workspace", "select a workspace first")
    }

    pub fn query(e: rusqlite::Error) -> Self {
        Self::new("db_query_failed", e.to_string())
    }

    pub fn insert(table: &str, e: rusqlite::Error) -> Self {
        Self::new("db_insert_failed", e.to_string()).with_details(json!({ "table": table }))
    }

    pub fn update(table: &str, e: rusqlite::Error) -> Self {
        Self::new("db_update_failed", e.to_string()).with_details(json!({ "table": table }))
    }

    pub fn delete(table: &str, e: rusqlite::Error) -> Self {
        Self::new("db_delete_failed", e.to_string()).with_details(json!({ "table": table }))
    }

    pub fn tx(e: rusqlite::Error) -> Self {
        Self::new("db_tx_failed", e.to_string())
    }

    pub fn commit(e: rusqlite::Error) -> Self {
        Self::new("db_commit_failed", e.to_string())
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        if self.code.starts_with("db_") {
            tracing::error!(code = self.code, message = %self.message, "request failed");
        }
        err(id, self.code, self.message, self.details)
    }
}

pub fn respond(id: &str, result: Result<serde_json::Value, HandlerErr>) -> serde_json::Value {
    match result {
        Ok(v) => ok(id, v),
        Err(e) => e.response(id),
    }
}
