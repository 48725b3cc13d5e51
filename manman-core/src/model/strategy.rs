//! Configuration strategies, parameter bindings and layered patches.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::PatchLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyType {
    CliArgs,
    EnvVars,
    FileProperties,
    FileJson,
    FileYaml,
    FileIni,
    FileXml,
    FileLua,
    FileCustom,
}

impl StrategyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CliArgs => "cli_args",
            Self::EnvVars => "env_vars",
            Self::FileProperties => "file_properties",
            Self::FileJson => "file_json",
            Self::FileYaml => "file_yaml",
            Self::FileIni => "file_ini",
            Self::FileXml => "file_xml",
            Self::FileLua => "file_lua",
            Self::FileCustom => "file_custom",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "cli_args" => Ok(Self::CliArgs),
            "env_vars" => Ok(Self::EnvVars),
            "file_properties" => Ok(Self::FileProperties),
            "file_json" => Ok(Self::FileJson),
            "file_yaml" => Ok(Self::FileYaml),
            "file_ini" => Ok(Self::FileIni),
            "file_xml" => Ok(Self::FileXml),
            "file_lua" => Ok(Self::FileLua),
            "file_custom" => Ok(Self::FileCustom),
            other => Err(Error::validation(format!("unknown strategy type {other:?}"))),
        }
    }

    /// Whether rendering produces a file (as opposed to argv / env output).
    pub fn writes_file(&self) -> bool {
        !matches!(self, Self::CliArgs | Self::EnvVars)
    }
}

/// Typed render options; one variant per strategy family. Stored as a JSON
/// column, surfaced as a tagged union.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "snake_case")]
pub enum StrategyOptions {
    CliArgs {
        #[serde(default)]
        skip_unresolved: bool,
    },
    EnvVars {
        #[serde(default)]
        uppercase_keys: bool,
    },
    KeyValue {
        #[serde(default = "default_separator")]
        separator: String,
        #[serde(default)]
        keep_comments: bool,
    },
    Json {
        #[serde(default)]
        pretty: bool,
    },
    Yaml {
        #[serde(default = "default_true")]
        replace_sequences: bool,
    },
    Text {
        #[serde(default)]
        strict: bool,
    },
}

fn default_separator() -> String {
    "=".to_string()
}

fn default_true() -> bool {
    true
}

impl StrategyOptions {
    /// The natural options variant for a strategy type.
    pub fn default_for(strategy_type: StrategyType) -> Self {
        match strategy_type {
            StrategyType::CliArgs => Self::CliArgs {
                skip_unresolved: false,
            },
            StrategyType::EnvVars => Self::EnvVars {
                uppercase_keys: false,
            },
            StrategyType::FileProperties | StrategyType::FileIni => Self::KeyValue {
                separator: default_separator(),
                keep_comments: true,
            },
            StrategyType::FileJson => Self::Json { pretty: false },
            StrategyType::FileYaml => Self::Yaml {
                replace_sequences: true,
            },
            StrategyType::FileXml | StrategyType::FileLua | StrategyType::FileCustom => {
                Self::Text { strict: false }
            }
        }
    }
}

/// One rendering pipeline for one configuration output; `apply_order`
/// sequences strategies of the same session, ties broken by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationStrategy {
    pub strategy_id: i64,
    pub game_id: i64,
    pub name: String,
    pub strategy_type: StrategyType,
    pub target_path: Option<String>,
    pub base_template: Option<String>,
    pub render_options: StrategyOptions,
    pub apply_order: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingType {
    Direct,
    Template,
    JsonPath,
    Xpath,
    IniSection,
}

impl BindingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Template => "template",
            Self::JsonPath => "json_path",
            Self::Xpath => "xpath",
            Self::IniSection => "ini_section",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "direct" => Ok(Self::Direct),
            "template" => Ok(Self::Template),
            "json_path" => Ok(Self::JsonPath),
            "xpath" => Ok(Self::Xpath),
            "ini_section" => Ok(Self::IniSection),
            other => Err(Error::validation(format!("unknown binding type {other:?}"))),
        }
    }
}

/// Maps one parameter into one strategy output key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyParameterBinding {
    pub binding_id: i64,
    pub strategy_id: i64,
    pub param_id: i64,
    pub binding_type: BindingType,
    pub target_key: String,
    pub value_template: Option<String>,
    pub condition_expr: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchFormat {
    Template,
    JsonMergePatch,
    JsonPatch,
    YamlMerge,
}

impl PatchFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Template => "template",
            Self::JsonMergePatch => "json_merge_patch",
            Self::JsonPatch => "json_patch",
            Self::YamlMerge => "yaml_merge",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "template" => Ok(Self::Template),
            "json_merge_patch" => Ok(Self::JsonMergePatch),
            "json_patch" => Ok(Self::JsonPatch),
            "yaml_merge" => Ok(Self::YamlMerge),
            other => Err(Error::validation(format!("unknown patch format {other:?}"))),
        }
    }
}

/// A layered override for one strategy at one level; unique on
/// `(strategy_id, patch_level, entity_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationPatch {
    pub patch_id: i64,
    pub strategy_id: i64,
    pub patch_level: PatchLevel,
    pub entity_id: i64,
    pub patch_content: String,
    pub patch_format: PatchFormat,
}

/// Sort strategies into render order: `apply_order` ascending, stable
/// tiebreak by `strategy_id`.
pub fn sort_for_render(strategies: &mut [ConfigurationStrategy]) {
    strategies.sort_by_key(|s| (s.apply_order, s.strategy_id));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strategy(id: i64, apply_order: i32) -> ConfigurationStrategy {
        ConfigurationStrategy {
            strategy_id: id,
            game_id: 1,
            name: format!("s{id}"),
            strategy_type: StrategyType::FileProperties,
            target_path: Some("server.properties".into()),
            base_template: None,
            render_options: StrategyOptions::default_for(StrategyType::FileProperties),
            apply_order,
        }
    }

    #[test]
    fn render_order_uses_apply_order_then_id() {
        let mut list = vec![strategy(3, 10), strategy(1, 20), strategy(2, 10)];
        sort_for_render(&mut list);
        let ids: Vec<i64> = list.iter().map(|s| s.strategy_id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[test]
    fn options_round_trip_as_tagged_json() {
        let opts = StrategyOptions::Yaml {
            replace_sequences: false,
        };
        let json = serde_json::to_string(&opts).unwrap();
        assert!(json.contains("\"variant\":\"yaml\""));
        let back: StrategyOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(back, opts);
    }

    #[test]
    fn file_strategies_write_files() {
        assert!(StrategyType::FileJson.writes_file());
        assert!(!StrategyType::CliArgs.writes_file());
        assert!(!StrategyType::EnvVars.writes_file());
    }
}
