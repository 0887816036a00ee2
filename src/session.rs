use crate::grades::{Bimester, GradeRecord, GradeStore, Metric, MigrationReport, Subject};
use crate::roster::{RosterError, RosterStore, StudentProfile};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EditMode {
    Viewing,
    Editing,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("profile fields can only be changed while editing")]
    NotEditing,
    #[error(transparent)]
    Profile(#[from] RosterError),
    #[error("failed to save record: {0}")]
    Persist(#[source] anyhow::Error),
}

impl SessionError {
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::NotEditing => "not_editing",
            SessionError::Profile(e) => e.code(),
            SessionError::Persist(_) => "db_update_failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveOutcome {
    pub profile_committed: bool,
    pub mode: EditMode,
}

/// The selected student's record view: committed profile, an optional
/// profile draft while editing, and the grade cells being worked on.
#[derive(Debug)]
pub struct EditSession {
    profile: StudentProfile,
    draft: Option<StudentProfile>,
    grades: GradeStore,
    migration: MigrationReport,
}

impl EditSession {
    /// Loads the persisted blob for `profile`. Records still carrying legacy
    /// key spellings are rewritten in compact form right away.
    pub fn open(store: &dyn RosterStore, profile: StudentProfile) -> anyhow::Result<Self> {
        let (record, migration) = match store.load_record(&profile.id)? {
            Some(blob) => GradeRecord::from_persisted(&blob),
            None => (GradeRecord::new(), MigrationReport::default()),
        };

        if !migration.is_clean() {
            tracing::warn!(
                student_id = %profile.id,
                migrated = migration.migrated,
                conflicts = migration.conflicts.len(),
                "rewrote legacy grade keys"
            );
            for key in &migration.conflicts {
                tracing::warn!(student_id = %profile.id, key = %key, "legacy value discarded in favour of compact key");
            }
            store.commit(&profile, false, &record)?;
        }

        Ok(Self {
            profile,
            draft: None,
            grades: GradeStore::from_record(record),
            migration,
        })
    }

    pub fn student_id(&self) -> &str {
        &self.profile.id
    }

    /// Last committed profile; what the exporters print.
    pub fn profile(&self) -> &StudentProfile {
        &self.profile
    }

    /// Draft while editing, committed profile otherwise.
    pub fn displayed_profile(&self) -> &StudentProfile {
        self.draft.as_ref().unwrap_or(&self.profile)
    }

    pub fn mode(&self) -> EditMode {
        if self.draft.is_some() {
            EditMode::Editing
        } else {
            EditMode::Viewing
        }
    }

    pub fn migration(&self) -> &MigrationReport {
        &self.migration
    }

    /// Viewing -> Editing starts a draft; Editing -> Viewing drops it.
    pub fn toggle_edit(&mut self) -> EditMode {
        self.draft = match self.draft.take() {
            Some(_) => None,
            None => Some(self.profile.clone()),
        };
        self.mode()
    }

    pub fn update_profile(
        &mut self,
        patch: &Map<String, Value>,
    ) -> Result<&StudentProfile, SessionError> {
        let Some(draft) = self.draft.as_mut() else {
            return Err(SessionError::NotEditing);
        };
        let mut next = draft.clone();
        next.apply_patch(patch)?;
        *draft = next;
        Ok(draft)
    }

    pub fn set_grade(
        &mut self,
        subject: Subject,
        bimester: Bimester,
        metric: Metric,
        value: impl Into<String>,
    ) {
        self.grades.set(subject, bimester, metric, value);
    }

    pub fn grades(&self) -> &GradeStore {
        &self.grades
    }

    pub fn snapshot(&self) -> GradeRecord {
        self.grades.snapshot()
    }

    /// Commits the grades, plus the profile draft when editing, in one
    /// store transaction. On failure the session is left as it was.
    pub fn save(&mut self, store: &dyn RosterStore) -> Result<SaveOutcome, SessionError> {
        let editing = self.draft.is_some();
        if let Some(draft) = self.draft.as_ref() {
            draft.validate()?;
        }
        let profile = self.draft.as_ref().unwrap_or(&self.profile);
        store
            .commit(profile, editing, self.grades.record())
            .map_err(SessionError::Persist)?;

        if let Some(draft) = self.draft.take() {
            self.profile = draft;
        }
        self.grades.mark_clean();
        tracing::info!(
            student_id = %self.profile.id,
            profile_committed = editing,
            cells = self.grades.record().len(),
            "record saved"
        );
        Ok(SaveOutcome {
            profile_committed: editing,
            mode: self.mode(),
        })
    }
}
