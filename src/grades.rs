use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Subject {
    LinguaPortuguesa,
    Matematica,
    Historia,
    Geografia,
    Artes,
    Ciencias,
    EnsinoReligioso,
    EducacaoFisica,
    Ingles,
    Lem,
}

impl Subject {
    pub const ALL: [Subject; 10] = [
        Subject::LinguaPortuguesa,
        Subject::Matematica,
        Subject::Historia,
        Subject::Geografia,
        Subject::Artes,
        Subject::Ciencias,
        Subject::EnsinoReligioso,
        Subject::EducacaoFisica,
        Subject::Ingles,
        Subject::Lem,
    ];

    /// Canonical label, also the subject part of a compact key.
    pub fn label(self) -> &'static str {
        match self {
            Subject::LinguaPortuguesa => "Língua Portuguesa",
            Subject::Matematica => "Matemática",
            Subject::Historia => "História",
            Subject::Geografia => "Geografia",
            Subject::Artes => "Artes",
            Subject::Ciencias => "Ciências",
            Subject::EnsinoReligioso => "Ensino Religioso",
            Subject::EducacaoFisica => "Educação Física",
            Subject::Ingles => "Inglês",
            Subject::Lem => "L.E.M",
        }
    }

    fn aliases(self) -> &'static [&'static str] {
        match self {
            Subject::LinguaPortuguesa => &["Português"],
            _ => &[],
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let s = raw.trim();
        Subject::ALL
            .into_iter()
            .find(|subj| subj.label() == s || subj.aliases().contains(&s))
    }
}

/// Which student view a table or export belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum View {
    /// Class report card ("boletim").
    Report,
    /// Individual student record ("ficha").
    Record,
}

const REPORT_SUBJECTS: [Subject; 9] = [
    Subject::LinguaPortuguesa,
    Subject::Matematica,
    Subject::Historia,
    Subject::Geografia,
    Subject::Artes,
    Subject::Ciencias,
    Subject::Ingles,
    Subject::EducacaoFisica,
    Subject::EnsinoReligioso,
];

const RECORD_SUBJECTS: [Subject; 10] = [
    Subject::LinguaPortuguesa,
    Subject::Matematica,
    Subject::Historia,
    Subject::Geografia,
    Subject::Artes,
    Subject::Ciencias,
    Subject::EnsinoReligioso,
    Subject::EducacaoFisica,
    Subject::Ingles,
    Subject::Lem,
];

impl View {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "report" | "boletim" => Some(View::Report),
            "record" | "ficha" => Some(View::Record),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            View::Report => "report",
            View::Record => "record",
        }
    }

    /// Subjects in display order for this view.
    pub fn subjects(self) -> &'static [Subject] {
        match self {
            View::Report => &REPORT_SUBJECTS,
            View::Record => &RECORD_SUBJECTS,
        }
    }

    pub fn subject_label(self, subject: Subject) -> &'static str {
        match (self, subject) {
            (View::Report, Subject::LinguaPortuguesa) => "Português",
            _ => subject.label(),
        }
    }

    /// Filename prefix used by every exporter.
    pub fn file_prefix(self) -> &'static str {
        match self {
            View::Report => "boletim",
            View::Record => "ficha",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            View::Report => "Boletim Escolar",
            View::Record => "Ficha Individual do Aluno",
        }
    }

    pub fn sheet_name(self) -> &'static str {
        match self {
            View::Report => "Boletim",
            View::Record => "Ficha",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Bimester {
    First,
    Second,
    Third,
    Fourth,
}

impl Bimester {
    pub const ALL: [Bimester; 4] = [
        Bimester::First,
        Bimester::Second,
        Bimester::Third,
        Bimester::Fourth,
    ];

    pub fn number(self) -> u8 {
        match self {
            Bimester::First => 1,
            Bimester::Second => 2,
            Bimester::Third => 3,
            Bimester::Fourth => 4,
        }
    }

    pub fn from_number(n: i64) -> Option<Self> {
        match n {
            1 => Some(Bimester::First),
            2 => Some(Bimester::Second),
            3 => Some(Bimester::Third),
            4 => Some(Bimester::Fourth),
            _ => None,
        }
    }

    /// "1º", the bimester part of a compact key and of column headers.
    pub fn token(self) -> String {
        format!("{}º", self.number())
    }

    #[cfg(test)]
    fn legacy_token(self) -> String {
        format!("{}º Bim", self.number())
    }

    /// Accepts `"2"`, `"2º"` and `"2º Bim"`.
    pub fn parse(raw: &str) -> Option<Self> {
        Self::parse_token(raw).map(|(b, _)| b)
    }

    /// Returns the bimester and whether the legacy spelling was used.
    fn parse_token(raw: &str) -> Option<(Self, bool)> {
        let s = raw.trim();
        let (digits, legacy) = match s.strip_suffix(" Bim") {
            Some(head) => (head, true),
            None => (s, false),
        };
        let digits = digits.strip_suffix('º').unwrap_or(digits);
        let n = digits.parse::<i64>().ok()?;
        Some((Bimester::from_number(n)?, legacy))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Metric {
    Grade,
    Absence,
}

impl Metric {
    pub fn token(self) -> &'static str {
        match self {
            Metric::Grade => "nota",
            Metric::Absence => "faltas",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "nota" | "grade" => Some(Metric::Grade),
            "faltas" | "absence" | "absences" => Some(Metric::Absence),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GradeKey {
    pub subject: Subject,
    pub bimester: Bimester,
    pub metric: Metric,
}

impl GradeKey {
    pub fn new(subject: Subject, bimester: Bimester, metric: Metric) -> Self {
        Self {
            subject,
            bimester,
            metric,
        }
    }

    /// `Matemática-1º-nota`
    pub fn compact_key(&self) -> String {
        format!(
            "{}-{}-{}",
            self.subject.label(),
            self.bimester.token(),
            self.metric.token()
        )
    }

    /// `Matemática-1º Bim-nota`
    #[cfg(test)]
    pub fn legacy_key(&self) -> String {
        format!(
            "{}-{}-{}",
            self.subject.label(),
            self.bimester.legacy_token(),
            self.metric.token()
        )
    }

    /// Parses either spelling. The flag is true when the key is not already
    /// in compact canonical form.
    pub fn parse(raw: &str) -> Option<(Self, bool)> {
        let mut parts = raw.rsplitn(3, '-');
        let metric = Metric::parse(parts.next()?)?;
        let (bimester, legacy_bim) = Bimester::parse_token(parts.next()?)?;
        let subject_raw = parts.next()?;
        let subject = Subject::parse(subject_raw)?;
        let key = GradeKey::new(subject, bimester, metric);
        let non_canonical = legacy_bim || raw != key.compact_key();
        Some((key, non_canonical))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    /// Entries read under a legacy spelling and rewritten to compact keys.
    pub migrated: usize,
    /// Compact keys whose legacy twin carried a different value.
    pub conflicts: Vec<String>,
    /// Keys that do not name a grade cell; carried through untouched.
    pub unrecognized: usize,
}

impl MigrationReport {
    pub fn is_clean(&self) -> bool {
        self.migrated == 0 && self.conflicts.is_empty()
    }
}

/// Canonical per-student grade table keyed by typed cell keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GradeRecord {
    cells: BTreeMap<GradeKey, String>,
    unrecognized: BTreeMap<String, Value>,
}

fn raw_value_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl GradeRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a persisted blob, rewriting every legacy spelling into the
    /// canonical table. A compact entry wins over its legacy twin even when
    /// it holds an empty string.
    pub fn from_persisted(blob: &Value) -> (Self, MigrationReport) {
        let mut record = GradeRecord::new();
        let mut report = MigrationReport::default();
        let Some(obj) = blob.as_object() else {
            return (record, report);
        };

        let mut legacy: Vec<(GradeKey, String)> = Vec::new();
        let mut compact: BTreeMap<GradeKey, String> = BTreeMap::new();
        for (raw_key, raw_value) in obj {
            let Some((key, non_canonical)) = GradeKey::parse(raw_key) else {
                report.unrecognized += 1;
                record
                    .unrecognized
                    .insert(raw_key.clone(), raw_value.clone());
                continue;
            };
            if raw_value.is_null() {
                continue;
            }
            let Some(text) = raw_value_text(raw_value) else {
                report.unrecognized += 1;
                record
                    .unrecognized
                    .insert(raw_key.clone(), raw_value.clone());
                continue;
            };
            if non_canonical {
                legacy.push((key, text));
            } else {
                compact.insert(key, text);
            }
        }

        for (key, text) in legacy {
            report.migrated += 1;
            match compact.get(&key).or_else(|| record.cells.get(&key)) {
                Some(existing) => {
                    if *existing != text && !text.is_empty() {
                        report.conflicts.push(key.compact_key());
                    }
                }
                None => {
                    if !text.is_empty() {
                        record.cells.insert(key, text);
                    }
                }
            }
        }
        for (key, text) in compact {
            if !text.is_empty() {
                record.cells.insert(key, text);
            }
        }
        report.conflicts.sort();
        report.conflicts.dedup();

        (record, report)
    }

    /// Serializes under compact keys only.
    pub fn to_persisted(&self) -> Value {
        let mut obj = Map::new();
        for (raw_key, v) in &self.unrecognized {
            obj.insert(raw_key.clone(), v.clone());
        }
        for (key, text) in &self.cells {
            obj.insert(key.compact_key(), Value::String(text.clone()));
        }
        Value::Object(obj)
    }

    pub fn get(&self, key: &GradeKey) -> &str {
        self.cells.get(key).map(|s| s.as_str()).unwrap_or("")
    }

    /// Last write wins; a blank value clears the cell.
    pub fn set(&mut self, key: GradeKey, value: impl Into<String>) {
        let value = value.into();
        if value.trim().is_empty() {
            self.cells.remove(&key);
        } else {
            self.cells.insert(key, value);
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Grade cells of the one student currently being worked on.
#[derive(Debug, Clone, Default)]
pub struct GradeStore {
    record: GradeRecord,
    dirty: bool,
}

impl GradeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_record(record: GradeRecord) -> Self {
        Self {
            record,
            dirty: false,
        }
    }

    pub fn get(&self, subject: Subject, bimester: Bimester, metric: Metric) -> &str {
        self.record.get(&GradeKey::new(subject, bimester, metric))
    }

    pub fn set(
        &mut self,
        subject: Subject,
        bimester: Bimester,
        metric: Metric,
        value: impl Into<String>,
    ) {
        self.record
            .set(GradeKey::new(subject, bimester, metric), value);
        self.dirty = true;
    }

    /// Deep copy handed to exporters.
    pub fn snapshot(&self) -> GradeRecord {
        self.record.clone()
    }

    pub fn record(&self) -> &GradeRecord {
        &self.record
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(subject: Subject, n: i64, metric: Metric) -> GradeKey {
        GradeKey::new(subject, Bimester::from_number(n).unwrap(), metric)
    }

    #[test]
    fn compact_and_legacy_spellings() {
        let k = key(Subject::Matematica, 1, Metric::Grade);
        assert_eq!(k.compact_key(), "Matemática-1º-nota");
        assert_eq!(k.legacy_key(), "Matemática-1º Bim-nota");
        assert_eq!(GradeKey::parse("Matemática-1º-nota"), Some((k, false)));
        assert_eq!(GradeKey::parse("Matemática-1º Bim-nota"), Some((k, true)));
        assert_eq!(GradeKey::parse("Matemática-5º-nota"), None);
        assert_eq!(GradeKey::parse("Química-1º-nota"), None);
    }

    #[test]
    fn report_label_alias_maps_to_canonical_subject() {
        let (k, non_canonical) = GradeKey::parse("Português-2º Bim-faltas").unwrap();
        assert_eq!(k, key(Subject::LinguaPortuguesa, 2, Metric::Absence));
        assert!(non_canonical);
        assert_eq!(
            View::Report.subject_label(Subject::LinguaPortuguesa),
            "Português"
        );
        assert_eq!(
            View::Record.subject_label(Subject::LinguaPortuguesa),
            "Língua Portuguesa"
        );
    }

    #[test]
    fn legacy_only_cell_resolves_after_load() {
        let blob = json!({ "Matemática-1º Bim-nota": "8.5" });
        let (record, report) = GradeRecord::from_persisted(&blob);
        let store = GradeStore::from_record(record);
        assert_eq!(
            store.get(Subject::Matematica, Bimester::First, Metric::Grade),
            "8.5"
        );
        assert_eq!(report.migrated, 1);
        assert!(report.conflicts.is_empty());
    }

    #[test]
    fn compact_wins_over_divergent_legacy() {
        let blob = json!({
            "Matemática-1º-nota": "7",
            "Matemática-1º Bim-nota": "3",
            "História-2º Bim-faltas": 2,
        });
        let (record, report) = GradeRecord::from_persisted(&blob);
        assert_eq!(record.get(&key(Subject::Matematica, 1, Metric::Grade)), "7");
        assert_eq!(record.get(&key(Subject::Historia, 2, Metric::Absence)), "2");
        assert_eq!(report.migrated, 2);
        assert_eq!(report.conflicts, vec!["Matemática-1º-nota".to_string()]);
    }

    #[test]
    fn cleared_compact_cell_shadows_legacy_value() {
        let blob = json!({
            "Matemática-1º-nota": "",
            "Matemática-1º Bim-nota": "8",
            "Artes-2º-faltas": "",
            "Artes-2º Bim-faltas": "",
        });
        let (record, report) = GradeRecord::from_persisted(&blob);
        assert_eq!(report.migrated, 2);
        assert_eq!(report.conflicts, vec!["Matemática-1º-nota".to_string()]);

        let store = GradeStore::from_record(record.clone());
        assert_eq!(store.get(Subject::Matematica, Bimester::First, Metric::Grade), "");
        assert_eq!(store.get(Subject::Artes, Bimester::Second, Metric::Absence), "");

        let out = record.to_persisted();
        assert!(out.get("Matemática-1º Bim-nota").is_none());
        assert_ne!(out.get("Matemática-1º-nota"), Some(&json!("8")));
    }

    #[test]
    fn persisted_form_is_compact_and_keeps_unknown_keys() {
        let blob = json!({
            "Artes-4º Bim-nota": "9",
            "observacoes": "ok",
            "Ciências-3º-nota": null,
        });
        let (record, report) = GradeRecord::from_persisted(&blob);
        assert_eq!(report.unrecognized, 1);
        let out = record.to_persisted();
        assert_eq!(out["Artes-4º-nota"], json!("9"));
        assert_eq!(out["observacoes"], json!("ok"));
        assert!(out.get("Artes-4º Bim-nota").is_none());
        assert!(out.get("Ciências-3º-nota").is_none());
    }

    #[test]
    fn set_is_last_write_wins_and_blank_clears() {
        let mut store = GradeStore::new();
        store.set(Subject::Artes, Bimester::Second, Metric::Grade, "6");
        store.set(Subject::Artes, Bimester::Second, Metric::Grade, "7");
        assert_eq!(
            store.get(Subject::Artes, Bimester::Second, Metric::Grade),
            "7"
        );
        assert!(store.is_dirty());
        store.set(Subject::Artes, Bimester::Second, Metric::Grade, "  ");
        assert_eq!(
            store.get(Subject::Artes, Bimester::Second, Metric::Grade),
            ""
        );
        assert!(store.record().is_empty());
    }

    #[test]
    fn snapshot_is_detached_from_store() {
        let mut store = GradeStore::new();
        store.set(Subject::Geografia, Bimester::Third, Metric::Absence, "1");
        let snap = store.snapshot();
        store.set(Subject::Geografia, Bimester::Third, Metric::Absence, "5");
        assert_eq!(snap.get(&key(Subject::Geografia, 3, Metric::Absence)), "1");
    }
}
