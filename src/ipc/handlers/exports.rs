use crate::calc;
use crate::export::pdf::{self, ImageFileSurface, RasterOptions};
use crate::export::{self, docx, xlsx, ExportError, ExportFormat};
use crate::grades::View;
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::reports::parse_view;
use crate::ipc::handlers::setup::{load_export_settings, ExportSettings};
use crate::ipc::helpers::{get_required_str, handle_with_session, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::session::EditSession;
use rusqlite::Connection;
use serde_json::{json, Value};
use std::path::PathBuf;

const DEFAULT_EXPORT_DIR: &str = "exports";

fn export_err(e: ExportError) -> HandlerErr {
    match e {
        ExportError::InvalidScale { .. } => HandlerErr::bad_params(e.to_string()),
        other => HandlerErr::new("export_failed", other.to_string()),
    }
}

fn settings(conn: &Connection) -> Result<ExportSettings, HandlerErr> {
    load_export_settings(conn).map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))
}

/// `params.outDir`, else the configured default, else `<workspace>/exports`.
fn resolve_out_dir(
    conn: &Connection,
    params: &Value,
    cfg: &ExportSettings,
) -> Result<PathBuf, HandlerErr> {
    if let Some(dir) = params.get("outDir").and_then(|v| v.as_str()) {
        if !dir.trim().is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    if let Some(dir) = cfg.default_out_dir.as_deref() {
        return Ok(PathBuf::from(dir));
    }
    let workspace = conn
        .path()
        .map(PathBuf::from)
        .and_then(|db_path| db_path.parent().map(|p| p.to_path_buf()))
        .ok_or_else(HandlerErr::no_workspace)?;
    Ok(workspace.join(DEFAULT_EXPORT_DIR))
}

fn finish(
    conn: &Connection,
    session: &EditSession,
    params: &Value,
    cfg: &ExportSettings,
    view: View,
    format: ExportFormat,
    bytes: &[u8],
) -> Result<Value, HandlerErr> {
    let out_dir = resolve_out_dir(conn, params, cfg)?;
    let filename = export::export_filename(view, &session.profile().full_name, format);
    let written = export::write_export(&out_dir, &filename, format, bytes).map_err(export_err)?;
    serde_json::to_value(written).map_err(|e| HandlerErr::new("export_failed", e.to_string()))
}

fn export_tabular(
    conn: &Connection,
    session: &EditSession,
    params: &Value,
    format: ExportFormat,
) -> HandlerResult {
    let view = parse_view(params)?;
    let cfg = settings(conn)?;
    let table = calc::grade_table(&session.snapshot(), view);
    let bytes = match format {
        ExportFormat::Xlsx => xlsx::render_xlsx(&table),
        ExportFormat::Docx => docx::render_docx(session.profile(), &table),
        ExportFormat::Pdf => return Err(HandlerErr::bad_params("use exports.pdf")),
    }
    .map_err(export_err)?;
    finish(conn, session, params, &cfg, view, format, &bytes)
}

fn export_pdf(conn: &Connection, session: &EditSession, params: &Value) -> HandlerResult {
    let view = parse_view(params)?;
    let image_path = get_required_str(params, "imagePath")?;
    let cfg = settings(conn)?;
    let scale = match params.get("scale") {
        None | Some(Value::Null) => cfg.raster_scale(view),
        Some(v) => v
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| HandlerErr::bad_params("scale must be a positive integer"))?,
    };
    let title = format!("{} - {}", view.title(), session.profile().full_name);
    let surface = ImageFileSurface::new(image_path);
    let (bytes, placement) = pdf::render_pdf(
        &surface,
        view,
        &title,
        RasterOptions {
            scale,
            jpeg_quality: cfg.jpeg_quality,
        },
    )
    .map_err(|e| {
        tracing::error!(error = %e, view = view.as_str(), "pdf export failed");
        export_err(e)
    })?;

    let mut result = finish(conn, session, params, &cfg, view, ExportFormat::Pdf, &bytes)?;
    result["placement"] = json!(placement);
    result["scale"] = json!(scale);
    Ok(result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "exports.xlsx" => handle_with_session(state, req, |conn, session, params| {
            export_tabular(conn, session, params, ExportFormat::Xlsx)
        }),
        "exports.docx" => handle_with_session(state, req, |conn, session, params| {
            export_tabular(conn, session, params, ExportFormat::Docx)
        }),
        "exports.pdf" => handle_with_session(state, req, |conn, session, params| {
            export_pdf(conn, session, params)
        }),
        _ => return None,
    };
    Some(resp)
}
