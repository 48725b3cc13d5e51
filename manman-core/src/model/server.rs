//! Registered hosts and their capability samples.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Online,
    Offline,
    Starting,
    Draining,
}

impl ServerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Starting => "starting",
            Self::Draining => "draining",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "online" => Ok(Self::Online),
            "offline" => Ok(Self::Offline),
            "starting" => Ok(Self::Starting),
            "draining" => Ok(Self::Draining),
            other => Err(Error::validation(format!("unknown server status {other:?}"))),
        }
    }

    /// Whether the host accepts new sessions.
    pub fn accepts_work(&self) -> bool {
        matches!(self, Self::Online)
    }
}

/// One row per registered host manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Server {
    pub server_id: i64,
    pub name: String,
    pub environment: Option<String>,
    pub status: ServerStatus,
    pub last_seen: Option<DateTime<Utc>>,
    pub is_default: bool,
}

/// Append-only capability sample, taken at registration and on every
/// heartbeat.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySample {
    pub total_memory_mb: i64,
    pub available_memory_mb: i64,
    pub cpu_cores: i32,
    pub available_cpu_millicores: i64,
    pub docker_version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_online_accepts_work() {
        assert!(ServerStatus::Online.accepts_work());
        assert!(!ServerStatus::Starting.accepts_work());
        assert!(!ServerStatus::Draining.accepts_work());
        assert!(!ServerStatus::Offline.accepts_work());
    }
}
