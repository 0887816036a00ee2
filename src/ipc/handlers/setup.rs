use crate::db;
use crate::export::pdf::{MAX_RASTER_SCALE, MIN_RASTER_SCALE};
use crate::grades::View;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::roster::Institution;
use serde::Deserialize;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Institution,
    Export,
}

impl SetupSection {
    const ALL: [SetupSection; 2] = [SetupSection::Institution, SetupSection::Export];

    fn parse(s: &str) -> Option<Self> {
        match s {
            "institution" => Some(Self::Institution),
            "export" => Some(Self::Export),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Institution => "institution",
            Self::Export => "export",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Institution => "setup.institution",
            Self::Export => "setup.export",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Institution => {
            serde_json::to_value(Institution::default()).unwrap_or_else(|_| json!({}))
        }
        SetupSection::Export => json!({
            "reportRasterScale": 2,
            "recordRasterScale": 3,
            "jpegQuality": 92,
            "defaultOutDir": null
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.chars().count() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn parse_nullable_string_max(v: &Value, key: &str, max_len: usize) -> Result<Value, String> {
    if v.is_null() {
        return Ok(Value::Null);
    }
    let s = parse_string_max(v, key, max_len)?;
    if s.is_empty() {
        return Ok(Value::Null);
    }
    Ok(Value::String(s))
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Institution => match k.as_str() {
                "escola" | "endereco" | "cidade" | "secretaria" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 200)?));
                }
                "cep" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 16)?));
                }
                _ => return Err(format!("unknown institution field: {}", k)),
            },
            SetupSection::Export => match k.as_str() {
                "reportRasterScale" | "recordRasterScale" => {
                    let scale = parse_i64_range(
                        v,
                        k,
                        i64::from(MIN_RASTER_SCALE),
                        i64::from(MAX_RASTER_SCALE),
                    )?;
                    obj.insert(k.clone(), Value::from(scale));
                }
                "jpegQuality" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 50, 100)?));
                }
                "defaultOutDir" => {
                    obj.insert(k.clone(), parse_nullable_string_max(v, k, 1024)?);
                }
                _ => return Err(format!("unknown export field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed saved values fall back to defaults.
            if let Err(msg) = merge_section_patch(section, &mut current, saved_obj) {
                tracing::warn!(section = section.name(), error = %msg, "ignoring saved setup values");
                current = default_section(section);
            }
        }
    }
    Ok(current)
}

pub fn load_institution(conn: &rusqlite::Connection) -> anyhow::Result<Institution> {
    let value = load_section(conn, SetupSection::Institution)?;
    Ok(serde_json::from_value(value)?)
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSettings {
    pub report_raster_scale: u32,
    pub record_raster_scale: u32,
    pub jpeg_quality: u8,
    pub default_out_dir: Option<String>,
}

impl ExportSettings {
    pub fn raster_scale(&self, view: View) -> u32 {
        match view {
            View::Report => self.report_raster_scale,
            View::Record => self.record_raster_scale,
        }
    }
}

pub fn load_export_settings(conn: &rusqlite::Connection) -> anyhow::Result<ExportSettings> {
    let value = load_section(conn, SetupSection::Export)?;
    Ok(serde_json::from_value(value)?)
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let mut sections = Map::new();
    for section in SetupSection::ALL {
        match load_section(conn, section) {
            Ok(v) => {
                sections.insert(section.name().to_string(), v);
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }
    ok(&req.id, Value::Object(sections))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    tracing::info!(section = section.name(), "setup updated");
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
