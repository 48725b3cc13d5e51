//! Games, game configs and deployments.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Root of everything game-specific; deleting a game cascades.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Game {
    pub game_id: i64,
    pub name: String,
    pub steam_app_id: Option<i64>,
    pub metadata: GameMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameMetadata {
    #[serde(default)]
    pub genre: String,
    #[serde(default)]
    pub publisher: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A reusable template for how to run a game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameConfig {
    pub config_id: i64,
    pub game_id: i64,
    pub name: String,
    pub image: String,
    pub args_template: Vec<String>,
    pub env_template: BTreeMap<String, String>,
    pub volumes: Vec<Volume>,
    pub created_at: DateTime<Utc>,
}

/// A bind mount declared per game config, materialized on the host as
/// `<host_data_dir>/sgc-[<env>-]<sgc_id>/<host_subpath>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,
    pub container_path: String,
    pub host_subpath: String,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortProtocol {
    Tcp,
    Udp,
}

impl PortProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            other => Err(Error::validation(format!("unknown protocol {other:?}"))),
        }
    }
}

/// Unique per `(server_id, host_port, protocol)` while any owning
/// deployment is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortBinding {
    pub container_port: u16,
    pub host_port: u16,
    pub protocol: PortProtocol,
}

/// A game config bound to one host, with per-host overrides (the SGC).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub sgc_id: i64,
    pub server_id: i64,
    pub game_config_id: i64,
    pub port_bindings: Vec<PortBinding>,
    pub parameters: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl Deployment {
    /// Directory name of this deployment under the host data dir:
    /// `sgc-<sgc_id>` or `sgc-<env>-<sgc_id>` when an environment is set.
    pub fn data_dir_name(sgc_id: i64, environment: Option<&str>) -> String {
        match environment {
            Some(env) if !env.is_empty() => format!("sgc-{env}-{sgc_id}"),
            _ => format!("sgc-{sgc_id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_dir_name_includes_environment_when_set() {
        assert_eq!(Deployment::data_dir_name(42, None), "sgc-42");
        assert_eq!(Deployment::data_dir_name(42, Some("")), "sgc-42");
        assert_eq!(Deployment::data_dir_name(42, Some("dev")), "sgc-dev-42");
    }

    #[test]
    fn protocol_round_trip() {
        assert_eq!(PortProtocol::parse("tcp").unwrap(), PortProtocol::Tcp);
        assert_eq!(PortProtocol::Udp.as_str(), "udp");
        assert!(PortProtocol::parse("sctp").is_err());
    }
}
