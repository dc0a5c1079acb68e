//! Audit trail sink.
//!
//! Engines hand every committed mutation to an [`AuditSink`]. Recording is
//! best effort: a failing sink is logged and ignored so that audit problems
//! never undo or block a financial operation.

use std::path::PathBuf;

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::db::get_connection;
use crate::error::Result;

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub action: &'static str,
    pub entity_type: &'static str,
    pub entity_id: Option<String>,
    pub old_values: Option<Value>,
    pub new_values: Option<Value>,
    pub reason: Option<String>,
}

impl AuditEntry {
    pub fn new(action: &'static str, entity_type: &'static str, entity_id: impl ToString) -> Self {
        Self {
            action,
            entity_type,
            entity_id: Some(entity_id.to_string()),
            old_values: None,
            new_values: None,
            reason: None,
        }
    }

    pub fn old(mut self, values: Value) -> Self {
        self.old_values = Some(values);
        self
    }

    pub fn new_values(mut self, values: Value) -> Self {
        self.new_values = Some(values);
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

pub trait AuditSink {
    fn record(&self, entry: &AuditEntry) -> Result<()>;
}

/// Hands `entry` to `sink`, logging instead of propagating failures.
pub fn emit(sink: &dyn AuditSink, entry: AuditEntry) {
    if let Err(e) = sink.record(&entry) {
        warn!(
            action = entry.action,
            entity_type = entry.entity_type,
            error = %e,
            "audit record dropped"
        );
    }
}

/// Writes audit entries as `info` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, entry: &AuditEntry) -> Result<()> {
        info!(
            target: "audit",
            action = entry.action,
            entity_type = entry.entity_type,
            entity_id = entry.entity_id.as_deref().unwrap_or(""),
            reason = entry.reason.as_deref().unwrap_or(""),
            "audit"
        );
        Ok(())
    }
}

/// Appends to the `audit_log` table through a connection of its own, so an
/// audit write never joins the caller's unit of work.
#[derive(Debug, Clone)]
pub struct SqliteAuditSink {
    db_path: PathBuf,
}

impl SqliteAuditSink {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }
}

impl AuditSink for SqliteAuditSink {
    fn record(&self, entry: &AuditEntry) -> Result<()> {
        let conn = get_connection(&self.db_path)?;
        conn.execute(
            "INSERT INTO audit_log (action, entity_type, entity_id, old_values, new_values, reason) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                entry.action,
                entry.entity_type,
                entry.entity_id,
                entry.old_values.as_ref().map(Value::to_string),
                entry.new_values.as_ref().map(Value::to_string),
                entry.reason,
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::cell::RefCell;

    use super::*;
    use crate::error::LedgerError;

    /// Keeps entries in memory for assertions.
    #[derive(Default)]
    pub struct MemoryAuditSink {
        pub entries: RefCell<Vec<AuditEntry>>,
    }

    impl MemoryAuditSink {
        pub fn actions(&self) -> Vec<&'static str> {
            self.entries.borrow().iter().map(|e| e.action).collect()
        }
    }

    impl AuditSink for MemoryAuditSink {
        fn record(&self, entry: &AuditEntry) -> Result<()> {
            self.entries.borrow_mut().push(entry.clone());
            Ok(())
        }
    }

    /// Always fails.
    pub struct BrokenAuditSink;

    impl AuditSink for BrokenAuditSink {
        fn record(&self, _entry: &AuditEntry) -> Result<()> {
            Err(LedgerError::Corrupt("audit store offline".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::db::init_db;
    use serde_json::json;

    #[test]
    fn test_sqlite_sink_appends_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.db");
        let conn = get_connection(&path).unwrap();
        init_db(&conn).unwrap();

        let sink = SqliteAuditSink::new(&path);
        emit(
            &sink,
            AuditEntry::new("journal.post", "journal", "abc")
                .new_values(json!({"lines": 2}))
                .reason("test"),
        );

        let (action, new_values): (String, String) = conn
            .query_row("SELECT action, new_values FROM audit_log", [], |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap();
        assert_eq!(action, "journal.post");
        assert_eq!(new_values, r#"{"lines":2}"#);
    }

    #[test]
    fn test_emit_swallows_sink_failure() {
        emit(&BrokenAuditSink, AuditEntry::new("x", "y", 1));
    }

    #[test]
    fn test_memory_sink_records() {
        let sink = MemoryAuditSink::default();
        emit(&sink, AuditEntry::new("a", "b", 1).old(json!({"x": 1})));
        assert_eq!(sink.actions(), vec!["a"]);
    }
}
