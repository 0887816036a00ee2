use crate::calc;
use crate::grades::View;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_required_str, handle_with_session, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::session::EditSession;
use serde_json::{json, Value};

pub(crate) fn parse_view(params: &Value) -> Result<View, HandlerErr> {
    let raw = get_required_str(params, "view")?;
    View::parse(&raw).ok_or_else(|| {
        HandlerErr::bad_params(format!("unknown view: {} (expected report or record)", raw))
    })
}

fn grade_table(session: &EditSession, params: &Value) -> HandlerResult {
    let view = parse_view(params)?;
    let table = calc::grade_table(&session.snapshot(), view);
    Ok(json!({
        "view": view.as_str(),
        "title": view.title(),
        "student": session.displayed_profile(),
        "header": table.header,
        "rows": table.rows,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.gradeTable" => Some(handle_with_session(state, req, |_, session, params| {
            grade_table(session, params)
        })),
        _ => None,
    }
}
