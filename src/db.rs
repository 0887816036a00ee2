use crate::grades::GradeRecord;
use crate::roster::{RosterStore, StudentProfile};
use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "boletim.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            sort_order INTEGER NOT NULL,
            profile_json TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_sort ON students(sort_order)",
        [],
    )?;

    // One blob per student; student_json is the profile as of the last grade save.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_records(
            student_id TEXT PRIMARY KEY,
            grades_json TEXT NOT NULL,
            student_json TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id) ON DELETE CASCADE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(text) => Ok(Some(
            serde_json::from_str(&text).with_context(|| format!("settings {} is invalid JSON", key))?,
        )),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

fn now_text() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn profile_from_json(id: &str, text: &str) -> anyhow::Result<StudentProfile> {
    let mut profile: StudentProfile = serde_json::from_str(text)
        .with_context(|| format!("profile {} is invalid JSON", id))?;
    profile.id = id.to_string();
    Ok(profile)
}

impl RosterStore for Connection {
    fn count_profiles(&self) -> anyhow::Result<usize> {
        let n: i64 = self.query_row("SELECT COUNT(*) FROM students", [], |r| r.get(0))?;
        Ok(n.max(0) as usize)
    }

    fn list_profiles(&self) -> anyhow::Result<Vec<StudentProfile>> {
        let mut stmt =
            self.prepare("SELECT id, profile_json FROM students ORDER BY sort_order, rowid")?;
        let rows = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.iter()
            .map(|(id, text)| profile_from_json(id, text))
            .collect()
    }

    fn load_profile(&self, id: &str) -> anyhow::Result<Option<StudentProfile>> {
        let text: Option<String> = self
            .query_row(
                "SELECT profile_json FROM students WHERE id = ?",
                [id],
                |r| r.get(0),
            )
            .optional()?;
        text.map(|t| profile_from_json(id, &t)).transpose()
    }

    fn create_profile(&self, profile: &StudentProfile) -> anyhow::Result<()> {
        let next_sort: i64 = self.query_row(
            "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM students",
            [],
            |r| r.get(0),
        )?;
        self.execute(
            "INSERT INTO students(id, sort_order, profile_json, created_at) VALUES(?, ?, ?, ?)",
            (
                &profile.id,
                next_sort,
                serde_json::to_string(profile)?,
                now_text(),
            ),
        )?;
        Ok(())
    }

    fn save_profile(&self, profile: &StudentProfile) -> anyhow::Result<()> {
        let changed = self.execute(
            "UPDATE students SET profile_json = ?, updated_at = ? WHERE id = ?",
            (serde_json::to_string(profile)?, now_text(), &profile.id),
        )?;
        if changed == 0 {
            anyhow::bail!("student not found: {}", profile.id);
        }
        Ok(())
    }

    fn delete_profile(&self, id: &str) -> anyhow::Result<bool> {
        let tx = self.unchecked_transaction()?;
        tx.execute("DELETE FROM grade_records WHERE student_id = ?", [id])?;
        let removed = tx.execute("DELETE FROM students WHERE id = ?", [id])?;
        tx.commit()?;
        Ok(removed > 0)
    }

    fn load_record(&self, id: &str) -> anyhow::Result<Option<serde_json::Value>> {
        let text: Option<String> = self
            .query_row(
                "SELECT grades_json FROM grade_records WHERE student_id = ?",
                [id],
                |r| r.get(0),
            )
            .optional()?;
        match text {
            Some(t) => Ok(Some(serde_json::from_str(&t).with_context(|| {
                format!("grade record for {} is invalid JSON", id)
            })?)),
            None => Ok(None),
        }
    }

    fn commit(
        &self,
        profile: &StudentProfile,
        update_profile: bool,
        grades: &GradeRecord,
    ) -> anyhow::Result<()> {
        let profile_json = serde_json::to_string(profile)?;
        let grades_json = serde_json::to_string(&grades.to_persisted())?;
        let now = now_text();

        let tx = self.unchecked_transaction()?;
        if update_profile {
            tx.save_profile(profile)?;
        }
        tx.execute(
            "INSERT INTO grade_records(student_id, grades_json, student_json, updated_at)
             VALUES(?, ?, ?, ?)
             ON CONFLICT(student_id) DO UPDATE SET
                grades_json = excluded.grades_json,
                student_json = excluded.student_json,
                updated_at = excluded.updated_at",
            (&profile.id, &grades_json, &profile_json, &now),
        )
        .context("failed to write grade record")?;
        tx.commit()?;
        Ok(())
    }
}
