//! Log references, log batches and backups.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    Stdout,
    Stderr,
    Mixed,
}

impl LogSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
            Self::Mixed => "mixed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "stdout" => Ok(Self::Stdout),
            "stderr" => Ok(Self::Stderr),
            "mixed" => Ok(Self::Mixed),
            other => Err(Error::validation(format!("unknown log source {other:?}"))),
        }
    }
}

/// Append-only pointer to an archived log object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogReference {
    pub log_ref_id: i64,
    pub session_id: i64,
    /// Object store URL, `s3://bucket/key`.
    pub file_path: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub line_count: i64,
    pub source: LogSource,
}

/// Deterministic object key for an archived batch:
/// `logs/<session_id>/<start_ts>-<batch_id>.log`.
pub fn log_object_key(session_id: i64, start_time: DateTime<Utc>, batch_id: Uuid) -> String {
    format!("logs/{session_id}/{}-{batch_id}.log", start_time.timestamp())
}

/// Object key for a staged backup:
/// `backups/<sgc_id>/<session_id>/<ts>-<uuid>.tar.gz`.
pub fn backup_object_key(sgc_id: i64, session_id: i64, at: DateTime<Utc>, id: Uuid) -> String {
    format!("backups/{sgc_id}/{session_id}/{}-{id}.tar.gz", at.timestamp())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backup {
    pub backup_id: i64,
    pub session_id: i64,
    pub sgc_id: i64,
    pub object_url: String,
    pub size_bytes: i64,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn object_keys_are_deterministic() {
        let ts = Utc.timestamp_opt(1000, 0).unwrap();
        let id = Uuid::nil();
        assert_eq!(
            log_object_key(300, ts, id),
            "logs/300/1000-00000000-0000-0000-0000-000000000000.log"
        );
        assert_eq!(
            backup_object_key(42, 300, ts, id),
            "backups/42/300/1000-00000000-0000-0000-0000-000000000000.tar.gz"
        );
    }
}
