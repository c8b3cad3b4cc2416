//! SQLite storage implementation.
//!
//! Writes go through [`SqliteStorage::mutate`], which wraps the change in an
//! IMMEDIATE transaction.

use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, Result, Transaction};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::storage::schema::apply_schema;

/// SQLite-backed store.
#[derive(Debug)]
pub struct SqliteStorage {
    conn: Connection,
}

/// Outcome of a publish pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    Success,
    Failed,
    Cancelled,
}

impl SyncOutcome {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "success" => Self::Success,
            "cancelled" => Self::Cancelled,
            _ => Self::Failed,
        }
    }
}

/// One row of publish history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: String,
    pub project: String,
    pub map_id: Option<i64>,
    pub outcome: SyncOutcome,
    /// JSON summary (counts, failing layer, message).
    pub detail: Option<serde_json::Value>,
    /// Who ran the pass.
    pub actor: String,
    pub created_at: i64,
}

impl SqliteStorage {
    /// Open (or create) a database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, None)
    }

    /// Open a database with an optional busy timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open_with_timeout(path: &Path, timeout_ms: Option<u64>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_millis(timeout_ms.unwrap_or(5000)))?;
        apply_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Open an in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    #[cfg(test)]
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Execute a mutation inside an IMMEDIATE transaction. Rolls back on
    /// error.
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails.
    pub fn mutate<F, R>(&mut self, op: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction) -> Result<R>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        let result = f(&tx)?;
        tx.commit()?;
        debug!(op, "Store updated");
        Ok(result)
    }

    // ==================
    // Project Entries
    // ==================

    /// Read a persisted value.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_entry(&self, project: &str, key: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT value FROM project_entries WHERE project = ?1 AND key = ?2",
                rusqlite::params![project, key],
                |row| row.get(0),
            )
            .optional()
    }

    /// Write a persisted value, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn set_entry(&mut self, project: &str, key: &str, value: &str) -> Result<()> {
        if self.get_entry(project, key)?.as_deref() == Some(value) {
            return Ok(());
        }
        let now = chrono::Utc::now().timestamp_millis();

        self.mutate("set_entry", |tx| {
            tx.execute(
                "INSERT INTO project_entries (project, key, value, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(project, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                rusqlite::params![project, key, value, now],
            )?;
            Ok(())
        })
    }

    /// Remove a persisted value. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn remove_entry(&mut self, project: &str, key: &str) -> Result<bool> {
        self.mutate("remove_entry", |tx| {
            let n = tx.execute(
                "DELETE FROM project_entries WHERE project = ?1 AND key = ?2",
                rusqlite::params![project, key],
            )?;
            Ok(n > 0)
        })
    }

    // ==================
    // Sync History
    // ==================

    /// Append a publish pass to the history. Returns the run id.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn record_sync_run(
        &mut self,
        project: &str,
        map_id: Option<i64>,
        outcome: SyncOutcome,
        detail: Option<&serde_json::Value>,
        actor: &str,
    ) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp_millis();
        let detail = detail.map(serde_json::Value::to_string);

        self.mutate("record_sync_run", |tx| {
            tx.execute(
                "INSERT INTO sync_runs (id, project, map_id, outcome, detail, actor, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![id, project, map_id, outcome.as_str(), detail, actor, now],
            )?;
            Ok(())
        })?;
        Ok(id)
    }

    /// Most recent publish passes of a project, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_sync_runs(&self, project: &str, limit: u32) -> Result<Vec<SyncRun>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, project, map_id, outcome, detail, actor, created_at
             FROM sync_runs WHERE project = ?1
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![project, limit], |row| {
            let detail: Option<String> = row.get(4)?;
            Ok(SyncRun {
                id: row.get(0)?,
                project: row.get(1)?,
                map_id: row.get(2)?,
                outcome: SyncOutcome::parse(row.get::<_, String>(3)?.as_str()),
                detail: detail.and_then(|d| serde_json::from_str(&d).ok()),
                actor: row.get(5)?,
                created_at: row.get(6)?,
            })
        })?;
        rows.collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_set_get_remove() {
        let mut db = SqliteStorage::open_memory().unwrap();
        assert_eq!(db.get_entry("p", "map_id").unwrap(), None);

        db.set_entry("p", "map_id", "12").unwrap();
        db.set_entry("p", "map_id", "13").unwrap();
        db.set_entry("other", "map_id", "99").unwrap();
        assert_eq!(db.get_entry("p", "map_id").unwrap().as_deref(), Some("13"));

        assert!(db.remove_entry("p", "map_id").unwrap());
        assert!(!db.remove_entry("p", "map_id").unwrap());
        assert_eq!(db.get_entry("other", "map_id").unwrap().as_deref(), Some("99"));
    }

    #[test]
    fn test_failed_mutation_rolls_back() {
        let mut db = SqliteStorage::open_memory().unwrap();
        db.set_entry("p", "map_name", "A").unwrap();

        let result: Result<()> = db.mutate("rename", |tx| {
            tx.execute("UPDATE project_entries SET value = 'B' WHERE project = 'p'", [])?;
            tx.execute("INSERT INTO missing_table VALUES (1)", [])?;
            Ok(())
        });
        assert!(result.is_err());
        assert_eq!(db.get_entry("p", "map_name").unwrap().as_deref(), Some("A"));
    }

    #[test]
    fn test_sync_runs_history() {
        let mut db = SqliteStorage::open_memory().unwrap();
        db.record_sync_run("p", None, SyncOutcome::Failed, None, "ann")
            .unwrap();
        let detail = serde_json::json!({"layers": 3});
        db.record_sync_run("p", Some(7), SyncOutcome::Success, Some(&detail), "bob")
            .unwrap();

        let runs = db.list_sync_runs("p", 10).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].outcome, SyncOutcome::Success);
        assert_eq!(runs[0].map_id, Some(7));
        assert_eq!(runs[0].detail.as_ref().unwrap()["layers"], 3);
        assert_eq!(runs[0].actor, "bob");
        assert_eq!(runs[1].outcome, SyncOutcome::Failed);
        assert_eq!(runs[1].actor, "ann");

        assert!(db.list_sync_runs("q", 10).unwrap().is_empty());
    }
}
