use crate::grades::GradeRecord;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub const MAX_ROSTER_SIZE: usize = 500;

const REQUIRED_FIELDS: [&str; 3] = ["nome", "dataNascimento", "anoSerie"];

/// Biographical and institutional data for one student. Field names on the
/// wire follow the UI's Portuguese keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudentProfile {
    pub id: String,
    #[serde(rename = "nome")]
    pub full_name: String,
    #[serde(rename = "dataNascimento")]
    pub birth_date: String,
    #[serde(rename = "sexo")]
    pub sex: String,
    #[serde(rename = "pai")]
    pub father: String,
    #[serde(rename = "mae")]
    pub mother: String,
    #[serde(rename = "naturalidade")]
    pub birthplace: String,
    #[serde(rename = "estado")]
    pub birth_state: String,
    #[serde(rename = "nacionalidade")]
    pub nationality: String,
    #[serde(rename = "ano")]
    pub enrollment_year: String,
    #[serde(rename = "anoSerie")]
    pub grade_level: String,
    #[serde(rename = "minPromocao")]
    pub promotion_threshold: String,
    #[serde(rename = "diasLetivos")]
    pub school_days: String,
    #[serde(rename = "chAnual")]
    pub annual_hours: String,
    #[serde(rename = "moduloAula")]
    pub lesson_slot: String,
    #[serde(rename = "escola")]
    pub school: String,
    #[serde(rename = "endereco")]
    pub address: String,
    #[serde(rename = "cidade")]
    pub city: String,
    #[serde(rename = "cep")]
    pub postal_code: String,
}

/// School metadata used when a profile leaves its own copy blank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Institution {
    pub escola: String,
    pub endereco: String,
    pub cidade: String,
    pub cep: String,
    pub secretaria: String,
}

impl Default for Institution {
    fn default() -> Self {
        Self {
            escola: "ESCOLA MUNICIPAL JOAQUIM DIAS ALMEIDA".to_string(),
            endereco: "AV.JOAQUIM PINHEIRO DE ALMEIDA-126".to_string(),
            cidade: "Fronteira Dos vales - Minas Gerais".to_string(),
            cep: "39870-000".to_string(),
            secretaria: "SECRETARIA MUNICIPAL DE EDUCAÇÃO".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RosterError {
    #[error("O sistema suporta no máximo {max} alunos. Por favor, remova alguns alunos para adicionar novos.")]
    Full { max: usize },
    #[error("Por favor, preencha pelo menos o nome, data de nascimento e ano/série.")]
    MissingRequired(Vec<String>),
    #[error("invalid birth date (expected YYYY-MM-DD): {0}")]
    InvalidBirthDate(String),
    #[error("unknown profile field: {0}")]
    UnknownField(String),
    #[error("profile field {0} must be a string")]
    NotAString(String),
    #[error("student id is immutable")]
    ImmutableId,
    #[error("student not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl RosterError {
    pub fn code(&self) -> &'static str {
        match self {
            RosterError::Full { .. } => "roster_full",
            RosterError::MissingRequired(_) => "missing_required_fields",
            RosterError::InvalidBirthDate(_)
            | RosterError::UnknownField(_)
            | RosterError::NotAString(_)
            | RosterError::ImmutableId => "bad_params",
            RosterError::NotFound(_) => "not_found",
            RosterError::Storage(_) => "db_update_failed",
        }
    }
}

impl StudentProfile {
    /// Parses a UI payload. Unknown keys are rejected so typos do not vanish.
    pub fn from_fields(fields: &Map<String, Value>) -> Result<Self, RosterError> {
        let mut profile = StudentProfile::default();
        profile.apply_patch(fields)?;
        Ok(profile)
    }

    pub fn apply_patch(&mut self, patch: &Map<String, Value>) -> Result<(), RosterError> {
        let mut current = match serde_json::to_value(&*self) {
            Ok(Value::Object(obj)) => obj,
            Ok(_) => return Err(anyhow::anyhow!("profile did not serialize to an object").into()),
            Err(e) => return Err(anyhow::Error::from(e).into()),
        };
        for (k, v) in patch {
            if k == "id" {
                if v.as_str().map(|s| s == self.id).unwrap_or(false) {
                    continue;
                }
                return Err(RosterError::ImmutableId);
            }
            if !current.contains_key(k) {
                return Err(RosterError::UnknownField(k.clone()));
            }
            let text = match v {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                Value::Number(n) => n.to_string(),
                _ => return Err(RosterError::NotAString(k.clone())),
            };
            current.insert(k.clone(), Value::String(text));
        }
        *self = serde_json::from_value(Value::Object(current)).map_err(anyhow::Error::from)?;
        Ok(())
    }

    pub fn missing_required(&self) -> Vec<String> {
        let values = [&self.full_name, &self.birth_date, &self.grade_level];
        REQUIRED_FIELDS
            .iter()
            .zip(values)
            .filter(|(_, v)| v.trim().is_empty())
            .map(|(k, _)| k.to_string())
            .collect()
    }

    pub fn validate(&self) -> Result<(), RosterError> {
        let missing = self.missing_required();
        if !missing.is_empty() {
            return Err(RosterError::MissingRequired(missing));
        }
        parse_birth_date(&self.birth_date)?;
        Ok(())
    }

    /// Fills the optional fields the registration form pre-populates.
    pub fn fill_defaults(&mut self, institution: &Institution, year: i32) {
        fn default_to(field: &mut String, value: &str) {
            if field.trim().is_empty() {
                *field = value.to_string();
            }
        }
        default_to(&mut self.nationality, "Brasileira");
        default_to(&mut self.enrollment_year, &year.to_string());
        default_to(&mut self.promotion_threshold, "60%");
        default_to(&mut self.school_days, "200");
        default_to(&mut self.annual_hours, "833:20");
        default_to(&mut self.lesson_slot, "0:50");
        default_to(&mut self.school, &institution.escola);
        default_to(&mut self.address, &institution.endereco);
        default_to(&mut self.city, &institution.cidade);
        default_to(&mut self.postal_code, &institution.cep);
    }

    /// `dd/mm/yyyy`, or the stored text when it is not an ISO date.
    pub fn birth_date_display(&self) -> String {
        match parse_birth_date(&self.birth_date) {
            Ok(d) => d.format("%d/%m/%Y").to_string(),
            Err(_) => self.birth_date.clone(),
        }
    }

    pub fn filiation_line(&self) -> String {
        format!("{} / {}", self.father, self.mother)
    }

    pub fn origin_line(&self) -> String {
        format!(
            "{} / {} / {}",
            self.birthplace, self.birth_state, self.nationality
        )
    }
}

fn parse_birth_date(raw: &str) -> Result<NaiveDate, RosterError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| RosterError::InvalidBirthDate(raw.to_string()))
}

/// Persistence collaborator for profiles and per-student grade blobs.
pub trait RosterStore {
    fn count_profiles(&self) -> anyhow::Result<usize>;
    fn list_profiles(&self) -> anyhow::Result<Vec<StudentProfile>>;
    fn load_profile(&self, id: &str) -> anyhow::Result<Option<StudentProfile>>;
    fn create_profile(&self, profile: &StudentProfile) -> anyhow::Result<()>;
    fn save_profile(&self, profile: &StudentProfile) -> anyhow::Result<()>;
    /// Removes the profile and its grade blob. False when the id is unknown.
    fn delete_profile(&self, id: &str) -> anyhow::Result<bool>;
    fn load_record(&self, id: &str) -> anyhow::Result<Option<Value>>;
    /// Writes the grade blob (with a denormalized profile copy) and, when
    /// `update_profile` is set, the roster entry, as one unit.
    fn commit(
        &self,
        profile: &StudentProfile,
        update_profile: bool,
        grades: &GradeRecord,
    ) -> anyhow::Result<()>;
}

pub fn create_student(
    store: &dyn RosterStore,
    mut draft: StudentProfile,
    institution: &Institution,
) -> Result<StudentProfile, RosterError> {
    let count = store.count_profiles()?;
    if count >= MAX_ROSTER_SIZE {
        return Err(RosterError::Full {
            max: MAX_ROSTER_SIZE,
        });
    }
    draft.validate()?;
    draft.fill_defaults(institution, chrono::Local::now().year());
    draft.id = uuid::Uuid::new_v4().to_string();
    store.create_profile(&draft)?;
    tracing::info!(student_id = %draft.id, roster_size = count + 1, "student created");
    Ok(draft)
}

pub fn search_students(
    store: &dyn RosterStore,
    search: Option<&str>,
) -> anyhow::Result<Vec<StudentProfile>> {
    let all = store.list_profiles()?;
    let needle = search.map(|s| s.trim().to_lowercase()).unwrap_or_default();
    if needle.is_empty() {
        return Ok(all);
    }
    Ok(all
        .into_iter()
        .filter(|p| p.full_name.to_lowercase().contains(&needle))
        .collect())
}

pub fn delete_student(store: &dyn RosterStore, id: &str) -> Result<(), RosterError> {
    if !store.delete_profile(id)? {
        return Err(RosterError::NotFound(id.to_string()));
    }
    tracing::info!(student_id = %id, "student deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(v: Value) -> Map<String, Value> {
        v.as_object().cloned().expect("object")
    }

    #[test]
    fn required_fields_are_reported_by_wire_name() {
        let p = StudentProfile::from_fields(&fields(json!({ "nome": "Ana" }))).unwrap();
        assert_eq!(
            p.missing_required(),
            vec!["dataNascimento".to_string(), "anoSerie".to_string()]
        );
        assert!(matches!(p.validate(), Err(RosterError::MissingRequired(_))));
    }

    #[test]
    fn birth_date_must_be_iso() {
        let p = StudentProfile::from_fields(&fields(json!({
            "nome": "Ana", "dataNascimento": "31/02/2015", "anoSerie": "3º ano"
        })))
        .unwrap();
        assert!(matches!(p.validate(), Err(RosterError::InvalidBirthDate(_))));
    }

    #[test]
    fn defaults_fill_only_blank_fields() {
        let mut p = StudentProfile::from_fields(&fields(json!({
            "nome": "Ana", "dataNascimento": "2015-03-09", "anoSerie": "3º ano",
            "nacionalidade": "Portuguesa"
        })))
        .unwrap();
        p.fill_defaults(&Institution::default(), 2025);
        assert_eq!(p.nationality, "Portuguesa");
        assert_eq!(p.enrollment_year, "2025");
        assert_eq!(p.annual_hours, "833:20");
        assert_eq!(p.school, "ESCOLA MUNICIPAL JOAQUIM DIAS ALMEIDA");
        assert_eq!(p.birth_date_display(), "09/03/2015");
    }

    #[test]
    fn patch_rejects_unknown_fields_and_id_changes() {
        let mut p = StudentProfile {
            id: "s1".into(),
            ..Default::default()
        };
        assert!(matches!(
            p.apply_patch(&fields(json!({ "apelido": "x" }))),
            Err(RosterError::UnknownField(_))
        ));
        assert!(matches!(
            p.apply_patch(&fields(json!({ "id": "s2" }))),
            Err(RosterError::ImmutableId)
        ));
        p.apply_patch(&fields(json!({ "id": "s1", "sexo": "F", "pai": null })))
            .unwrap();
        assert_eq!(p.sex, "F");
        assert_eq!(p.id, "s1");
    }

    #[test]
    fn wire_names_round_trip() {
        let p = StudentProfile {
            id: "s1".into(),
            full_name: "Maria Clara".into(),
            grade_level: "5º ano".into(),
            ..Default::default()
        };
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["nome"], json!("Maria Clara"));
        assert_eq!(v["anoSerie"], json!("5º ano"));
        let back: StudentProfile = serde_json::from_value(v).unwrap();
        assert_eq!(back, p);
    }
}
