//! Effective parameter resolution.
//!
//! `effective[key] = session ?? deployment ?? game_config ?? default`.
//! A required parameter with no value at any scope fails the render with a
//! validation error naming the key.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};
use crate::model::ParameterDefinition;

/// Parameter values collected per scope, keyed by parameter key.
#[derive(Debug, Clone, Default)]
pub struct ParamScopes {
    pub game_config: BTreeMap<String, String>,
    pub deployment: BTreeMap<String, String>,
    pub session: BTreeMap<String, String>,
}

/// Resolve the effective parameter map for a session.
///
/// Values present at any scope are carried even without a definition; the
/// definitions contribute defaults, the required check and value
/// validation.
pub fn resolve_effective(
    definitions: &[ParameterDefinition],
    scopes: &ParamScopes,
) -> Result<BTreeMap<String, String>> {
    let mut keys: BTreeSet<&str> = BTreeSet::new();
    keys.extend(scopes.session.keys().map(String::as_str));
    keys.extend(scopes.deployment.keys().map(String::as_str));
    keys.extend(scopes.game_config.keys().map(String::as_str));
    keys.extend(definitions.iter().map(|d| d.key.as_str()));

    let mut effective = BTreeMap::new();
    for key in keys {
        let definition = definitions.iter().find(|d| d.key == key);
        let value = scopes
            .session
            .get(key)
            .or_else(|| scopes.deployment.get(key))
            .or_else(|| scopes.game_config.get(key))
            .cloned()
            .or_else(|| definition.and_then(|d| d.default_value.clone()));

        match value {
            Some(value) => {
                if let Some(def) = definition {
                    def.validate_value(&value)?;
                }
                effective.insert(key.to_string(), value);
            }
            None => {
                if definition.is_some_and(|d| d.required) {
                    return Err(Error::validation(format!(
                        "required parameter {key:?} has no value and no default"
                    )));
                }
            }
        }
    }
    Ok(effective)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ParameterType;

    fn definition(key: &str, required: bool, default: Option<&str>) -> ParameterDefinition {
        ParameterDefinition {
            param_id: 1,
            game_id: 1,
            key: key.into(),
            param_type: ParameterType::String,
            required,
            default_value: default.map(Into::into),
            min_value: None,
            max_value: None,
            allowed_values: vec![],
        }
    }

    #[test]
    fn session_wins_over_lower_scopes() {
        let scopes = ParamScopes {
            game_config: BTreeMap::from([("difficulty".into(), "normal".into())]),
            deployment: BTreeMap::from([("difficulty".into(), "hard".into())]),
            session: BTreeMap::from([("difficulty".into(), "peaceful".into())]),
        };
        let effective = resolve_effective(&[], &scopes).unwrap();
        assert_eq!(effective["difficulty"], "peaceful");
    }

    #[test]
    fn deployment_beats_game_config() {
        let scopes = ParamScopes {
            game_config: BTreeMap::from([("port".into(), "80".into())]),
            deployment: BTreeMap::from([("port".into(), "8080".into())]),
            session: BTreeMap::new(),
        };
        let effective = resolve_effective(&[], &scopes).unwrap();
        assert_eq!(effective["port"], "8080");
    }

    #[test]
    fn default_fills_missing_value() {
        let defs = vec![definition("motd", false, Some("welcome"))];
        let effective = resolve_effective(&defs, &ParamScopes::default()).unwrap();
        assert_eq!(effective["motd"], "welcome");
    }

    #[test]
    fn missing_required_names_the_key() {
        let defs = vec![definition("server_token", true, None)];
        let err = resolve_effective(&defs, &ParamScopes::default()).unwrap_err();
        assert!(err.to_string().contains("server_token"));
    }

    #[test]
    fn optional_without_value_is_absent() {
        let defs = vec![definition("seed", false, None)];
        let effective = resolve_effective(&defs, &ParamScopes::default()).unwrap();
        assert!(!effective.contains_key("seed"));
    }
}
