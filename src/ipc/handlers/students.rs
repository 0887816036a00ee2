use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_required_str, handle_with_db};
use crate::ipc::handlers::setup::load_institution;
use crate::ipc::types::{AppState, Request};
use crate::roster::{self, RosterError, RosterStore, StudentProfile, MAX_ROSTER_SIZE};
use crate::session::EditSession;
use rusqlite::Connection;
use serde_json::json;

pub(crate) fn roster_err(e: RosterError) -> HandlerErr {
    let details = match &e {
        RosterError::MissingRequired(fields) => Some(json!({ "missing": fields })),
        RosterError::Full { max } => Some(json!({ "capacity": max })),
        _ => None,
    };
    let code = match &e {
        RosterError::Storage(_) => "db_query_failed",
        other => other.code(),
    };
    HandlerErr {
        code,
        message: e.to_string(),
        details,
    }
}

fn list_students(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let search = params.get("search").and_then(|v| v.as_str());
    let count = conn
        .count_profiles()
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let students = roster::search_students(conn, search)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    Ok(json!({
        "students": students,
        "count": count,
        "capacity": MAX_ROSTER_SIZE,
    }))
}

fn open_session(conn: &Connection, profile: StudentProfile) -> Result<EditSession, HandlerErr> {
    EditSession::open(conn, profile).map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))
}

fn create_student(
    conn: &Connection,
    session: &mut Option<EditSession>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let fields = params
        .get("profile")
        .unwrap_or(params)
        .as_object()
        .ok_or_else(|| HandlerErr::bad_params("profile must be an object"))?;
    let draft = StudentProfile::from_fields(fields).map_err(roster_err)?;
    let institution =
        load_institution(conn).map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let created = roster::create_student(conn, draft, &institution).map_err(roster_err)?;
    *session = Some(open_session(conn, created.clone())?);
    Ok(json!({ "student": created }))
}

fn select_student(
    conn: &Connection,
    session: &mut Option<EditSession>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let profile = conn
        .load_profile(&student_id)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?
        .ok_or_else(|| HandlerErr::new("not_found", format!("student not found: {}", student_id)))?;
    let opened = open_session(conn, profile)?;
    let result = json!({
        "student": opened.profile(),
        "mode": opened.mode(),
        "migration": opened.migration(),
    });
    *session = Some(opened);
    tracing::debug!(student_id = %student_id, "student selected");
    Ok(result)
}

fn delete_student(
    conn: &Connection,
    session: &mut Option<EditSession>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    roster::delete_student(conn, &student_id).map_err(|e| match e {
        RosterError::Storage(inner) => HandlerErr::new("db_update_failed", inner.to_string()),
        other => roster_err(other),
    })?;
    if session.as_ref().map(|s| s.student_id() == student_id).unwrap_or(false) {
        *session = None;
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_with_db(state, req, |conn, _, params| {
            list_students(conn, params)
        })),
        "students.create" => Some(handle_with_db(state, req, create_student)),
        "students.select" => Some(handle_with_db(state, req, select_student)),
        "students.delete" => Some(handle_with_db(state, req, delete_student)),
        _ => None,
    }
}
