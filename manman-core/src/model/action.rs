//! Operator-defined actions: command templates bound to input fields,
//! resolved through the game <- config <- deployment chain and sent to a
//! live session's stdin.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionLevel {
    Game,
    GameConfig,
    Deployment,
}

impl ActionLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Game => "game",
            Self::GameConfig => "game_config",
            Self::Deployment => "deployment",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "game" => Ok(Self::Game),
            "game_config" => Ok(Self::GameConfig),
            "deployment" => Ok(Self::Deployment),
            other => Err(Error::validation(format!("unknown action level {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Int,
    Bool,
    Select,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Bool => "bool",
            Self::Select => "select",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "string" => Ok(Self::String),
            "int" => Ok(Self::Int),
            "bool" => Ok(Self::Bool),
            "select" => Ok(Self::Select),
            other => Err(Error::validation(format!("unknown field type {other:?}"))),
        }
    }
}

/// Typed constraints for one input field, stored as a JSON column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldConstraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputOption {
    pub value: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputField {
    pub field_id: i64,
    pub key: String,
    pub label: String,
    pub field_type: FieldType,
    pub required: bool,
    pub default_value: Option<String>,
    pub constraints: FieldConstraints,
    pub options: Vec<InputOption>,
}

impl InputField {
    /// Validate a submitted value against the field's type and constraints.
    pub fn validate(&self, value: &str) -> Result<()> {
        match self.field_type {
            FieldType::Int => {
                let n: i64 = value.parse().map_err(|_| {
                    Error::validation(format!("field {:?} expects an integer", self.key))
                })?;
                if self.constraints.min.is_some_and(|min| n < min)
                    || self.constraints.max.is_some_and(|max| n > max)
                {
                    return Err(Error::validation(format!(
                        "field {:?} out of range",
                        self.key
                    )));
                }
            }
            FieldType::Bool => {
                if !matches!(value, "true" | "false") {
                    return Err(Error::validation(format!(
                        "field {:?} expects true or false",
                        self.key
                    )));
                }
            }
            FieldType::Select => {
                if !self.options.iter().any(|o| o.value == value) {
                    return Err(Error::validation(format!(
                        "field {:?} must be one of its options",
                        self.key
                    )));
                }
            }
            FieldType::String => {
                if let Some(ref pattern) = self.constraints.pattern {
                    let re = regex::Regex::new(pattern).map_err(|_| {
                        Error::internal(format!("field {:?} has a bad pattern", self.key))
                    })?;
                    if !re.is_match(value) {
                        return Err(Error::validation(format!(
                            "field {:?} does not match the expected pattern",
                            self.key
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDefinition {
    pub action_id: i64,
    pub level: ActionLevel,
    pub entity_id: i64,
    pub name: String,
    pub description: String,
    pub command_template: String,
    pub fields: Vec<InputField>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionExecution {
    pub execution_id: i64,
    pub action_id: i64,
    pub session_id: i64,
    pub rendered_command: String,
    pub executed_at: DateTime<Utc>,
}

/// Merge action lists walking game -> config -> deployment, deduplicating
/// by name with the most specific level winning.
///
/// `levels` must be ordered least-specific first.
pub fn resolve_actions(levels: Vec<Vec<ActionDefinition>>) -> Vec<ActionDefinition> {
    let mut by_name: std::collections::BTreeMap<String, ActionDefinition> =
        std::collections::BTreeMap::new();
    for level in levels {
        for action in level {
            by_name.insert(action.name.clone(), action);
        }
    }
    by_name.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(id: i64, level: ActionLevel, name: &str) -> ActionDefinition {
        ActionDefinition {
            action_id: id,
            level,
            entity_id: 1,
            name: name.to_string(),
            description: String::new(),
            command_template: "say {{message}}".into(),
            fields: vec![],
        }
    }

    #[test]
    fn child_level_wins_on_name_collision() {
        let resolved = resolve_actions(vec![
            vec![action(1, ActionLevel::Game, "restart"), action(2, ActionLevel::Game, "say")],
            vec![action(3, ActionLevel::GameConfig, "say")],
            vec![action(4, ActionLevel::Deployment, "restart")],
        ]);
        assert_eq!(resolved.len(), 2);
        let restart = resolved.iter().find(|a| a.name == "restart").unwrap();
        let say = resolved.iter().find(|a| a.name == "say").unwrap();
        assert_eq!(restart.action_id, 4);
        assert_eq!(say.action_id, 3);
    }

    #[test]
    fn select_field_requires_known_option() {
        let field = InputField {
            field_id: 1,
            key: "difficulty".into(),
            label: "Difficulty".into(),
            field_type: FieldType::Select,
            required: true,
            default_value: None,
            constraints: FieldConstraints::default(),
            options: vec![InputOption {
                value: "peaceful".into(),
                label: "Peaceful".into(),
            }],
        };
        assert!(field.validate("peaceful").is_ok());
        assert!(field.validate("nightmare").is_err());
    }

    #[test]
    fn int_field_respects_bounds() {
        let field = InputField {
            field_id: 1,
            key: "count".into(),
            label: "Count".into(),
            field_type: FieldType::Int,
            required: true,
            default_value: None,
            constraints: FieldConstraints {
                min: Some(1),
                max: Some(10),
                pattern: None,
            },
            options: vec![],
        };
        assert!(field.validate("5").is_ok());
        assert!(field.validate("11").is_err());
    }
}
