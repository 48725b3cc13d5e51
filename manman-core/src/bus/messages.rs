//! Broker payloads: commands to hosts and status reports back.
//!
//! Everything is UTF-8 JSON. Numeric ids are produced as JSON numbers but
//! accepted as decimal strings too, so payloads hand-written by operators
//! or emitted by older tooling keep working.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::model::{
    CapabilitySample, InstallationStatus, LogSource, PortBinding, ServerStatus, SessionStats,
    SessionStatus, Volume,
};

/// Accept an id as a JSON number or a decimal string.
pub(crate) fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(i64),
        String(String),
    }

    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::String(s) => s
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid id {s:?}"))),
    }
}

/// A rendered configuration file carried inside a start command, written
/// by the host beneath the deployment data dir.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedFile {
    /// Relative path under the deployment data dir.
    pub path: String,
    pub content: String,
}

/// One addon the host must have installed before the session starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddonInstallSpec {
    #[serde(deserialize_with = "lenient_i64")]
    pub installation_id: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub addon_id: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub workshop_id: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub steam_app_id: i64,
    /// Relative to the deployment data dir.
    pub install_path: String,
    /// Last known status at publish time; the host skips `installed` rows.
    pub status: InstallationStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartSessionCommand {
    #[serde(deserialize_with = "lenient_i64")]
    pub session_id: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub sgc_id: i64,
    pub force: bool,
    pub image: String,
    /// Rendered environment for the container.
    pub env: BTreeMap<String, String>,
    /// Rendered argv; no shell interpolation.
    pub args: Vec<String>,
    pub volumes: Vec<Volume>,
    pub port_bindings: Vec<PortBinding>,
    /// Rendered configuration files to materialize before start.
    pub files: Vec<RenderedFile>,
    /// Addons that must be installed before the container starts.
    pub addons: Vec<AddonInstallSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadAddonCommand {
    #[serde(deserialize_with = "lenient_i64")]
    pub installation_id: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub sgc_id: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub addon_id: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub workshop_id: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub steam_app_id: i64,
    /// Relative to the deployment data dir.
    pub install_path: String,
}

/// Commands consumed from a per-server queue, FIFO per server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    StartSession(StartSessionCommand),
    StopSession {
        #[serde(deserialize_with = "lenient_i64")]
        session_id: i64,
        force: bool,
    },
    KillSession {
        #[serde(deserialize_with = "lenient_i64")]
        session_id: i64,
    },
    SendInput {
        #[serde(deserialize_with = "lenient_i64")]
        session_id: i64,
        /// Raw bytes, base64 on the wire.
        #[serde(with = "base64_bytes")]
        input: Vec<u8>,
    },
    DownloadAddon(DownloadAddonCommand),
}

impl Command {
    /// The session this command addresses, when it addresses one.
    pub fn session_id(&self) -> Option<i64> {
        match self {
            Self::StartSession(cmd) => Some(cmd.session_id),
            Self::StopSession { session_id, .. }
            | Self::KillSession { session_id }
            | Self::SendInput { session_id, .. } => Some(*session_id),
            Self::DownloadAddon(_) => None,
        }
    }
}

/// Session lifecycle report published by the supervisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatusUpdate {
    #[serde(deserialize_with = "lenient_i64")]
    pub session_id: i64,
    pub status: SessionStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostStatusUpdate {
    #[serde(deserialize_with = "lenient_i64")]
    pub server_id: i64,
    pub status: ServerStatus,
    pub timestamp: DateTime<Utc>,
}

/// Heartbeat published every 5 s while the host manager runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostHealthUpdate {
    #[serde(deserialize_with = "lenient_i64")]
    pub server_id: i64,
    pub status: ServerStatus,
    pub timestamp: DateTime<Utc>,
    pub sessions: SessionStats,
    pub capabilities: CapabilitySample,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallationStatusUpdate {
    #[serde(deserialize_with = "lenient_i64")]
    pub installation_id: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub sgc_id: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub addon_id: i64,
    pub status: InstallationStatus,
    pub progress_percent: i32,
    #[serde(default)]
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// A gzipped multi-line log chunk on `logs.batched`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogBatchMessage {
    #[serde(deserialize_with = "lenient_i64")]
    pub session_id: i64,
    pub batch_id: Uuid,
    pub start_ts: DateTime<Utc>,
    pub end_ts: DateTime<Utc>,
    pub line_count: i64,
    pub source: LogSource,
    /// Gzip-compressed log lines, base64 on the wire.
    #[serde(with = "base64_bytes")]
    pub compressed_logs: Vec<u8>,
}

/// Base64 transport encoding for binary payload fields.
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_accept_numbers_and_strings() {
        let from_number: DownloadAddonCommand = serde_json::from_str(
            r#"{"installation_id":1,"sgc_id":42,"addon_id":11,"workshop_id":123456789,"steam_app_id":550,"install_path":"addons"}"#,
        )
        .unwrap();
        let from_string: DownloadAddonCommand = serde_json::from_str(
            r#"{"installation_id":"1","sgc_id":"42","addon_id":"11","workshop_id":"123456789","steam_app_id":"550","install_path":"addons"}"#,
        )
        .unwrap();
        assert_eq!(from_number, from_string);
        assert_eq!(from_string.workshop_id, 123456789);
    }

    #[test]
    fn command_envelope_round_trips() {
        let cmd = Command::StopSession {
            session_id: 101,
            force: false,
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains("\"type\":\"stop_session\""));
        let back: Command = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cmd);
        assert_eq!(back.session_id(), Some(101));
    }

    #[test]
    fn send_input_carries_bytes_as_base64() {
        let cmd = Command::SendInput {
            session_id: 101,
            input: b"say hello\n".to_vec(),
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains("c2F5IGhlbGxvCg=="));
        let back: Command = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cmd);
    }

    #[test]
    fn bad_string_id_is_rejected() {
        let result: Result<DownloadAddonCommand, _> = serde_json::from_str(
            r#"{"installation_id":"x","sgc_id":1,"addon_id":1,"workshop_id":1,"steam_app_id":1,"install_path":"a"}"#,
        );
        assert!(result.is_err());
    }
}
