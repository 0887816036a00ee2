use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::session::EditSession;
use rusqlite::Connection;

pub type HandlerResult = Result<serde_json::Value, HandlerErr>;

/// Runs `f` against the open workspace, or answers `no_workspace`.
pub fn handle_with_db(
    state: &mut AppState,
    req: &Request,
    f: impl FnOnce(&Connection, &mut Option<EditSession>, &serde_json::Value) -> HandlerResult,
) -> serde_json::Value {
    let AppState { db, session, .. } = state;
    let Some(conn) = db.as_ref() else {
        return HandlerErr::no_workspace().response(&req.id);
    };
    respond(&req.id, f(conn, session, &req.params))
}

/// Like [`handle_with_db`] but also requires a selected student.
pub fn handle_with_session(
    state: &mut AppState,
    req: &Request,
    f: impl FnOnce(&Connection, &mut EditSession, &serde_json::Value) -> HandlerResult,
) -> serde_json::Value {
    handle_with_db(state, req, |conn, session, params| {
        let Some(session) = session.as_mut() else {
            return Err(HandlerErr::no_student_selected());
        };
        f(conn, session, params)
    })
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}
