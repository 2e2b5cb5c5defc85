use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

type TryHandle = fn(&mut AppState, &Request) -> Option<serde_json::Value>;

const HANDLERS: &[TryHandle] = &[
    handlers::core::try_handle,
    handlers::users::try_handle,
    handlers::institutions::try_handle,
    handlers::billing::try_handle,
    handlers::classes::try_handle,
    handlers::requests::try_handle,
    handlers::subjects::try_handle,
    handlers::categories::try_handle,
    handlers::assignments::try_handle,
    handlers::submissions::try_handle,
    handlers::grades::try_handle,
    handlers::gradebook::try_handle,
    handlers::announcements::try_handle,
    handlers::materials::try_handle,
    handlers::dashboard::try_handle,
];

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    tracing::debug!(id = %req.id, method = %req.method, "request");
    for handle in HANDLERS {
        if let Some(resp) = handle(state, &req) {
            return resp;
        }
    }

    tracing::warn!(method = %req.method, "unknown method");
    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
