//! Append-only audit trail of mutating operations.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RepoError, RepoResult};

/// Directory holding the audit log, relative to the repository root.
pub const LOG_DIR: &str = "log";
const AUDIT_FILE: &str = "audit.log";

/// One line of the audit log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub kind: String,
    pub params: Value,
    pub user: Option<String>,
    pub pid: u32,
}

/// JSON-lines audit sink. A disabled log accepts and drops records.
#[derive(Debug)]
pub struct AuditLog {
    path: Option<PathBuf>,
    write: Mutex<()>,
}

impl AuditLog {
    /// Log to `<root>/log/audit.log`.
    pub fn open(root: &Path) -> RepoResult<Self> {
        let dir = root.join(LOG_DIR);
        fs::create_dir_all(&dir)?;
        Ok(Self {
            path: Some(dir.join(AUDIT_FILE)),
            write: Mutex::new(()),
        })
    }

    pub fn disabled() -> Self {
        Self {
            path: None,
            write: Mutex::new(()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.path.is_some()
    }

    /// Append a record for an operation about to run.
    pub fn record(&self, kind: &str, params: Value) -> RepoResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let record = AuditRecord {
            timestamp: Utc::now(),
            kind: kind.to_string(),
            params,
            user: std::env::var("USER").ok(),
            pid: std::process::id(),
        };
        let mut line = serde_json::to_vec(&record).map_err(std::io::Error::from)?;
        line.push(b'\n');
        let _guard = self.write.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(&line)?;
        Ok(())
    }

    /// Read every record back, oldest first.
    pub fn read_all(&self) -> RepoResult<Vec<AuditRecord>> {
        let Some(path) = &self.path else {
            return Ok(Vec::new());
        };
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        text.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| {
                serde_json::from_str::<AuditRecord>(l)
                    .map_err(|e| RepoError::from(std::io::Error::from(e)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn records_append_as_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::open(dir.path()).unwrap();
        log.record("import", json!({ "key": "app:1" })).unwrap();
        log.record("delete", json!({ "key": "app:1" })).unwrap();

        let records = log.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].kind, "import");
        assert_eq!(records[1].params["key"], "app:1");
        assert_eq!(records[0].pid, std::process::id());
        let text = fs::read_to_string(dir.path().join(LOG_DIR).join(AUDIT_FILE)).unwrap();
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn disabled_log_writes_nothing() {
        let log = AuditLog::disabled();
        log.record("import", Value::Null).unwrap();
        assert!(log.read_all().unwrap().is_empty());
    }
}
