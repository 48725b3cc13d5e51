//! Parameter definitions and scoped values.
//!
//! Values are stored at three scopes (game config, deployment, session);
//! the effective value of a key is the first non-null of
//! session -> deployment -> game config -> definition default.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    Int,
    Bool,
    Secret,
}

impl ParameterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Bool => "bool",
            Self::Secret => "secret",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "string" => Ok(Self::String),
            "int" => Ok(Self::Int),
            "bool" => Ok(Self::Bool),
            "secret" => Ok(Self::Secret),
            other => Err(Error::validation(format!("unknown parameter type {other:?}"))),
        }
    }
}

/// `(game_id, key)` is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDefinition {
    pub param_id: i64,
    pub game_id: i64,
    pub key: String,
    pub param_type: ParameterType,
    pub required: bool,
    pub default_value: Option<String>,
    pub min_value: Option<i64>,
    pub max_value: Option<i64>,
    pub allowed_values: Vec<String>,
}

impl ParameterDefinition {
    /// Validate a candidate value against the definition's type and
    /// constraints.
    pub fn validate_value(&self, value: &str) -> Result<()> {
        match self.param_type {
            ParameterType::Int => {
                let n: i64 = value.parse().map_err(|_| {
                    Error::validation(format!("parameter {:?} expects an integer", self.key))
                })?;
                if let Some(min) = self.min_value {
                    if n < min {
                        return Err(Error::validation(format!(
                            "parameter {:?} below minimum {min}",
                            self.key
                        )));
                    }
                }
                if let Some(max) = self.max_value {
                    if n > max {
                        return Err(Error::validation(format!(
                            "parameter {:?} above maximum {max}",
                            self.key
                        )));
                    }
                }
            }
            ParameterType::Bool => {
                if !matches!(value, "true" | "false") {
                    return Err(Error::validation(format!(
                        "parameter {:?} expects true or false",
                        self.key
                    )));
                }
            }
            ParameterType::String | ParameterType::Secret => {}
        }
        if !self.allowed_values.is_empty() && !self.allowed_values.iter().any(|v| v == value) {
            return Err(Error::validation(format!(
                "parameter {:?} must be one of {:?}",
                self.key, self.allowed_values
            )));
        }
        Ok(())
    }
}

/// Scope a parameter value or a configuration patch applies at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchLevel {
    GameConfig,
    ServerGameConfig,
    Session,
}

impl PatchLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GameConfig => "game_config",
            Self::ServerGameConfig => "server_game_config",
            Self::Session => "session",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "game_config" => Ok(Self::GameConfig),
            "server_game_config" => Ok(Self::ServerGameConfig),
            "session" => Ok(Self::Session),
            other => Err(Error::validation(format!("unknown patch level {other:?}"))),
        }
    }
}

/// A stored value for one parameter at one scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterValue {
    pub param_id: i64,
    pub scope: PatchLevel,
    pub entity_id: i64,
    pub value: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(param_type: ParameterType) -> ParameterDefinition {
        ParameterDefinition {
            param_id: 1,
            game_id: 1,
            key: "max_players".into(),
            param_type,
            required: false,
            default_value: None,
            min_value: Some(1),
            max_value: Some(64),
            allowed_values: vec![],
        }
    }

    #[test]
    fn int_bounds_are_enforced() {
        let d = def(ParameterType::Int);
        assert!(d.validate_value("32").is_ok());
        assert!(d.validate_value("0").is_err());
        assert!(d.validate_value("65").is_err());
        assert!(d.validate_value("lots").is_err());
    }

    #[test]
    fn bool_accepts_only_literals() {
        let d = def(ParameterType::Bool);
        assert!(d.validate_value("true").is_ok());
        assert!(d.validate_value("yes").is_err());
    }

    #[test]
    fn allowed_values_restrict_strings() {
        let mut d = def(ParameterType::String);
        d.allowed_values = vec!["easy".into(), "normal".into()];
        assert!(d.validate_value("normal").is_ok());
        assert!(d.validate_value("peaceful").is_err());
    }

    #[test]
    fn patch_levels_order_by_specificity() {
        assert!(PatchLevel::GameConfig < PatchLevel::ServerGameConfig);
        assert!(PatchLevel::ServerGameConfig < PatchLevel::Session);
    }
}
