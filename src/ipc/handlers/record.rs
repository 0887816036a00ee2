use crate::grades::{Bimester, Metric, Subject};
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::students::roster_err;
use crate::ipc::helpers::{get_required_str, handle_with_session, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::session::{EditSession, SessionError};
use rusqlite::Connection;
use serde_json::{json, Value};

fn session_err(e: SessionError) -> HandlerErr {
    match e {
        SessionError::Profile(inner) => roster_err(inner),
        other => HandlerErr::new(other.code(), other.to_string()),
    }
}

fn record_view(session: &EditSession) -> Value {
    json!({
        "student": session.displayed_profile(),
        "mode": session.mode(),
        "grades": session.grades().record().to_persisted(),
        "dirty": session.grades().is_dirty(),
    })
}

fn parse_bimester(v: Option<&Value>) -> Result<Bimester, HandlerErr> {
    let parsed = match v {
        Some(Value::Number(n)) => n.as_i64().and_then(Bimester::from_number),
        Some(Value::String(s)) => Bimester::parse(s),
        _ => None,
    };
    parsed.ok_or_else(|| HandlerErr::bad_params("bimester must be 1..4"))
}

fn cell_text(v: Option<&Value>) -> Result<String, HandlerErr> {
    match v {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(_) => Err(HandlerErr::bad_params("value must be a string or number")),
    }
}

fn set_grade(session: &mut EditSession, params: &Value) -> HandlerResult {
    let subject_raw = get_required_str(params, "subject")?;
    let subject = Subject::parse(&subject_raw)
        .ok_or_else(|| HandlerErr::bad_params(format!("unknown subject: {}", subject_raw)))?;
    let bimester = parse_bimester(params.get("bimester"))?;
    let metric_raw = get_required_str(params, "metric")?;
    let metric = Metric::parse(&metric_raw)
        .ok_or_else(|| HandlerErr::bad_params(format!("unknown metric: {}", metric_raw)))?;
    let value = cell_text(params.get("value"))?;

    session.set_grade(subject, bimester, metric, value);
    Ok(json!({ "ok": true }))
}

fn update_profile(session: &mut EditSession, params: &Value) -> HandlerResult {
    let patch = params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::bad_params("patch must be an object"))?;
    let draft = session.update_profile(patch).map_err(session_err)?;
    Ok(json!({ "student": draft }))
}

fn save(conn: &Connection, session: &mut EditSession) -> HandlerResult {
    let outcome = session.save(conn).map_err(|e| {
        tracing::error!(student_id = %session.student_id(), error = %e, "save failed");
        session_err(e)
    })?;
    Ok(json!({
        "mode": outcome.mode,
        "profileCommitted": outcome.profile_committed,
        "student": session.profile(),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "record.get" => handle_with_session(state, req, |_, session, _| Ok(record_view(session))),
        "record.toggleEdit" => handle_with_session(state, req, |_, session, _| {
            let mode = session.toggle_edit();
            Ok(json!({ "mode": mode, "student": session.displayed_profile() }))
        }),
        "record.updateProfile" => {
            handle_with_session(state, req, |_, session, params| update_profile(session, params))
        }
        "record.setGrade" => {
            handle_with_session(state, req, |_, session, params| set_grade(session, params))
        }
        "record.save" => handle_with_session(state, req, |conn, session, _| save(conn, session)),
        _ => return None,
    };
    Some(resp)
}
