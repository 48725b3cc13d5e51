//! Pure configuration rendering.
//!
//! Given a strategy, its bindings, the ordered patch layers
//! `[game_config, server_game_config, session]` and the effective
//! parameter map, produce one deterministic string (plus an argv list or
//! env set for the non-file strategies). No I/O happens here; the control
//! plane renders at session start and for previews with the same code
//! path.

mod keyvalue;
mod params;
mod structured;
mod template;

pub use keyvalue::KeyValueDoc;
pub use params::{resolve_effective, ParamScopes};
pub use structured::{json_merge_patch, json_patch, sort_yaml, yaml_merge};
pub use template::{substitute, Unresolved};

use std::collections::BTreeMap;

use serde_json::Value as Json;
use serde_yaml::Value as Yaml;

use crate::error::{Error, Result};
use crate::model::{
    BindingType, ConfigurationPatch, ConfigurationStrategy, ParameterDefinition, PatchFormat,
    PatchLevel, StrategyOptions, StrategyParameterBinding, StrategyType,
};

/// One patch layer echoed back by previews.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchLayer {
    pub level: PatchLevel,
    pub content: String,
}

/// The rendered result of one strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedStrategy {
    pub strategy_id: i64,
    pub strategy_name: String,
    pub strategy_type: StrategyType,
    pub target_path: Option<String>,
    pub rendered_content: String,
    pub base_content: String,
    pub layers: Vec<PatchLayer>,
    /// Populated for `cli_args` strategies only.
    pub argv: Vec<String>,
    /// Populated for `env_vars` strategies only.
    pub env: BTreeMap<String, String>,
}

/// Render every strategy for a session in `apply_order` (ties by id).
///
/// `patches_for` and `bindings_for` select the rows belonging to one
/// strategy; patches must already be ordered least-specific first.
pub fn render_all<'a>(
    mut strategies: Vec<ConfigurationStrategy>,
    definitions: &[ParameterDefinition],
    bindings_for: impl Fn(i64) -> Vec<&'a StrategyParameterBinding>,
    patches_for: impl Fn(i64) -> Vec<&'a ConfigurationPatch>,
    effective: &BTreeMap<String, String>,
) -> Result<Vec<RenderedStrategy>> {
    crate::model::sort_for_render(&mut strategies);
    let mut outputs = Vec::with_capacity(strategies.len());
    for strategy in strategies.iter() {
        outputs.push(render_strategy(
            strategy,
            &bindings_for(strategy.strategy_id),
            &patches_for(strategy.strategy_id),
            definitions,
            effective,
        )?);
    }
    Ok(outputs)
}

/// Render one strategy.
pub fn render_strategy(
    strategy: &ConfigurationStrategy,
    bindings: &[&StrategyParameterBinding],
    patches: &[&ConfigurationPatch],
    definitions: &[ParameterDefinition],
    effective: &BTreeMap<String, String>,
) -> Result<RenderedStrategy> {
    let base_content = strategy.base_template.clone().unwrap_or_default();
    let layers: Vec<PatchLayer> = patches
        .iter()
        .map(|p| PatchLayer {
            level: p.patch_level,
            content: p.patch_content.clone(),
        })
        .collect();

    let mut out = RenderedStrategy {
        strategy_id: strategy.strategy_id,
        strategy_name: strategy.name.clone(),
        strategy_type: strategy.strategy_type,
        target_path: strategy.target_path.clone(),
        rendered_content: String::new(),
        base_content: base_content.clone(),
        layers,
        argv: Vec::new(),
        env: BTreeMap::new(),
    };

    match strategy.strategy_type {
        StrategyType::CliArgs => render_cli_args(strategy, bindings, patches, definitions, effective, &mut out)?,
        StrategyType::EnvVars => render_env_vars(strategy, bindings, patches, definitions, effective, &mut out)?,
        StrategyType::FileProperties | StrategyType::FileIni => {
            render_key_value(strategy, bindings, patches, definitions, effective, &mut out)?
        }
        StrategyType::FileJson => render_json(strategy, bindings, patches, definitions, effective, &mut out)?,
        StrategyType::FileYaml => render_yaml(strategy, patches, effective, &mut out)?,
        StrategyType::FileXml | StrategyType::FileLua | StrategyType::FileCustom => {
            render_text(strategy, bindings, patches, definitions, effective, &mut out)?
        }
    }
    Ok(out)
}

fn render_cli_args(
    strategy: &ConfigurationStrategy,
    bindings: &[&StrategyParameterBinding],
    patches: &[&ConfigurationPatch],
    definitions: &[ParameterDefinition],
    effective: &BTreeMap<String, String>,
    out: &mut RenderedStrategy,
) -> Result<()> {
    let skip_unresolved = matches!(
        strategy.render_options,
        StrategyOptions::CliArgs {
            skip_unresolved: true
        }
    );

    let mut fragments: Vec<String> = out
        .base_content
        .split_whitespace()
        .map(str::to_string)
        .collect();
    for patch in patches {
        expect_format(patch, &[PatchFormat::Template])?;
        fragments.extend(patch.patch_content.split_whitespace().map(str::to_string));
    }
    for binding in bindings {
        let Some(value) = binding_value(binding, definitions, effective)? else {
            continue;
        };
        match binding.binding_type {
            BindingType::Template => {
                let rendered = render_binding_template(binding, &value, effective)?;
                fragments.extend(rendered.split_whitespace().map(str::to_string));
            }
            _ => {
                fragments.push(binding.target_key.clone());
                fragments.push(value);
            }
        }
    }

    let mut argv = Vec::with_capacity(fragments.len());
    for fragment in fragments {
        if skip_unresolved {
            let rendered = substitute(&fragment, effective, Unresolved::Keep)?;
            if template::has_placeholder(&rendered) {
                continue;
            }
            argv.push(rendered);
        } else {
            argv.push(substitute(&fragment, effective, Unresolved::Fail)?);
        }
    }
    out.rendered_content = argv.join(" ");
    out.argv = argv;
    Ok(())
}

fn render_env_vars(
    strategy: &ConfigurationStrategy,
    bindings: &[&StrategyParameterBinding],
    patches: &[&ConfigurationPatch],
    definitions: &[ParameterDefinition],
    effective: &BTreeMap<String, String>,
    out: &mut RenderedStrategy,
) -> Result<()> {
    let uppercase = matches!(
        strategy.render_options,
        StrategyOptions::EnvVars {
            uppercase_keys: true
        }
    );

    let mut env: BTreeMap<String, String> = BTreeMap::new();
    let mut absorb = |text: &str| -> Result<()> {
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                Error::validation(format!("env line {line:?} is not KEY=value"))
            })?;
            env.insert(
                key.trim().to_string(),
                substitute(value.trim(), effective, Unresolved::Fail)?,
            );
        }
        Ok(())
    };

    absorb(&out.base_content)?;
    for patch in patches {
        expect_format(patch, &[PatchFormat::Template])?;
        absorb(&patch.patch_content)?;
    }
    for binding in bindings {
        let Some(value) = binding_value(binding, definitions, effective)? else {
            continue;
        };
        let value = match binding.binding_type {
            BindingType::Template => render_binding_template(binding, &value, effective)?,
            _ => value,
        };
        env.insert(binding.target_key.clone(), value);
    }

    if uppercase {
        env = env
            .into_iter()
            .map(|(k, v)| (k.to_uppercase(), v))
            .collect();
    }

    out.rendered_content = env
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("\n");
    out.env = env;
    Ok(())
}

fn render_key_value(
    strategy: &ConfigurationStrategy,
    bindings: &[&StrategyParameterBinding],
    patches: &[&ConfigurationPatch],
    definitions: &[ParameterDefinition],
    effective: &BTreeMap<String, String>,
    out: &mut RenderedStrategy,
) -> Result<()> {
    let (separator, keep_comments) = match &strategy.render_options {
        StrategyOptions::KeyValue {
            separator,
            keep_comments,
        } => (separator.clone(), *keep_comments),
        _ => ("=".to_string(), true),
    };

    let base = substitute(&out.base_content, effective, Unresolved::Fail)?;
    let mut doc = KeyValueDoc::parse(&base, &separator);
    for patch in patches {
        expect_format(patch, &[PatchFormat::Template])?;
        let content = substitute(&patch.patch_content, effective, Unresolved::Fail)?;
        doc.merge(&KeyValueDoc::parse(&content, &separator));
    }
    for binding in bindings {
        let Some(value) = binding_value(binding, definitions, effective)? else {
            continue;
        };
        let value = match binding.binding_type {
            BindingType::Template => render_binding_template(binding, &value, effective)?,
            _ => value,
        };
        doc.set(&binding.target_key, &value);
    }
    out.rendered_content = doc.render(keep_comments);
    Ok(())
}

fn render_json(
    strategy: &ConfigurationStrategy,
    bindings: &[&StrategyParameterBinding],
    patches: &[&ConfigurationPatch],
    definitions: &[ParameterDefinition],
    effective: &BTreeMap<String, String>,
    out: &mut RenderedStrategy,
) -> Result<()> {
    let pretty = matches!(strategy.render_options, StrategyOptions::Json { pretty: true });

    let base = substitute(&out.base_content, effective, Unresolved::Fail)?;
    let mut doc: Json = if base.trim().is_empty() {
        Json::Object(Default::default())
    } else {
        serde_json::from_str(&base)?
    };

    for patch in patches {
        let content = substitute(&patch.patch_content, effective, Unresolved::Fail)?;
        match patch.patch_format {
            PatchFormat::JsonMergePatch => {
                let patch_doc: Json = serde_json::from_str(&content)?;
                json_merge_patch(&mut doc, &patch_doc);
            }
            PatchFormat::JsonPatch => {
                let ops: Json = serde_json::from_str(&content)?;
                json_patch(&mut doc, &ops)?;
            }
            PatchFormat::Template => {
                // Whole-document override.
                doc = serde_json::from_str(&content)?;
            }
            PatchFormat::YamlMerge => {
                return Err(Error::validation(
                    "yaml_merge patch on a file_json strategy",
                ))
            }
        }
    }

    for binding in bindings {
        let Some(value) = binding_value(binding, definitions, effective)? else {
            continue;
        };
        let pointer = if binding.target_key.starts_with('/') {
            binding.target_key.clone()
        } else {
            format!("/{}", binding.target_key.replace('.', "/"))
        };
        let ops = serde_json::json!([
            {"op": "add", "path": pointer, "value": typed_json_value(&value)}
        ]);
        json_patch(&mut doc, &ops)?;
    }

    out.rendered_content = if pretty {
        serde_json::to_string_pretty(&doc)?
    } else {
        serde_json::to_string(&doc)?
    };
    Ok(())
}

fn render_yaml(
    strategy: &ConfigurationStrategy,
    patches: &[&ConfigurationPatch],
    effective: &BTreeMap<String, String>,
    out: &mut RenderedStrategy,
) -> Result<()> {
    let replace_sequences = match strategy.render_options {
        StrategyOptions::Yaml { replace_sequences } => replace_sequences,
        _ => true,
    };

    let base = substitute(&out.base_content, effective, Unresolved::Fail)?;
    let mut doc: Yaml = if base.trim().is_empty() {
        Yaml::Mapping(Default::default())
    } else {
        serde_yaml::from_str(&base)
            .map_err(|e| Error::validation(format!("bad YAML base template: {e}")))?
    };

    for patch in patches {
        expect_format(patch, &[PatchFormat::YamlMerge, PatchFormat::Template])?;
        let content = substitute(&patch.patch_content, effective, Unresolved::Fail)?;
        let patch_doc: Yaml = serde_yaml::from_str(&content)
            .map_err(|e| Error::validation(format!("bad YAML patch: {e}")))?;
        match patch.patch_format {
            PatchFormat::Template => doc = patch_doc,
            _ => yaml_merge(&mut doc, &patch_doc, replace_sequences),
        }
    }

    out.rendered_content = serde_yaml::to_string(&sort_yaml(doc))
        .map_err(|e| Error::internal(format!("YAML serialization: {e}")))?;
    Ok(())
}

// XML, Lua and custom formats are rendered as text templates; XPath
// bindings are applied textually by placeholder name. The patch formats
// beyond `template` are underspecified for these types and rejected.
fn render_text(
    strategy: &ConfigurationStrategy,
    bindings: &[&StrategyParameterBinding],
    patches: &[&ConfigurationPatch],
    definitions: &[ParameterDefinition],
    effective: &BTreeMap<String, String>,
    out: &mut RenderedStrategy,
) -> Result<()> {
    let strict = matches!(strategy.render_options, StrategyOptions::Text { strict: true });

    // Later layers replace the document wholesale.
    let mut text = out.base_content.clone();
    for patch in patches {
        expect_format(patch, &[PatchFormat::Template])?;
        text = patch.patch_content.clone();
    }

    let mut values = effective.clone();
    for binding in bindings {
        let Some(value) = binding_value(binding, definitions, effective)? else {
            continue;
        };
        let value = match binding.binding_type {
            BindingType::Template => render_binding_template(binding, &value, effective)?,
            _ => value,
        };
        values.insert(binding.target_key.clone(), value);
    }

    let mode = if strict { Unresolved::Fail } else { Unresolved::Keep };
    out.rendered_content = substitute(&text, &values, mode)?;
    Ok(())
}

/// The value a binding feeds into the output, when its parameter has a
/// value and its condition holds.
fn binding_value(
    binding: &StrategyParameterBinding,
    definitions: &[ParameterDefinition],
    effective: &BTreeMap<String, String>,
) -> Result<Option<String>> {
    let definition = definitions
        .iter()
        .find(|d| d.param_id == binding.param_id)
        .ok_or_else(|| {
            Error::not_found(format!(
                "binding {} references unknown parameter {}",
                binding.binding_id, binding.param_id
            ))
        })?;
    if !condition_holds(binding.condition_expr.as_deref(), effective) {
        return Ok(None);
    }
    Ok(effective.get(&definition.key).cloned())
}

/// Render a binding's `value_template`, exposing `{{value}}` alongside the
/// effective parameters.
fn render_binding_template(
    binding: &StrategyParameterBinding,
    value: &str,
    effective: &BTreeMap<String, String>,
) -> Result<String> {
    let template = binding
        .value_template
        .as_deref()
        .ok_or_else(|| {
            Error::validation(format!(
                "template binding {} has no value_template",
                binding.binding_id
            ))
        })?;
    let mut values = effective.clone();
    values.insert("value".to_string(), value.to_string());
    substitute(template, &values, Unresolved::Fail)
}

/// Minimal condition language: `key` (present and not "false"),
/// `!key` (absent or "false"), `key=value` (equality).
fn condition_holds(expr: Option<&str>, effective: &BTreeMap<String, String>) -> bool {
    let Some(expr) = expr.map(str::trim).filter(|e| !e.is_empty()) else {
        return true;
    };
    if let Some((key, expected)) = expr.split_once('=') {
        return effective.get(key.trim()).map(String::as_str) == Some(expected.trim());
    }
    if let Some(key) = expr.strip_prefix('!') {
        return !effective
            .get(key.trim())
            .is_some_and(|v| !v.is_empty() && v != "false");
    }
    effective.get(expr).is_some_and(|v| !v.is_empty() && v != "false")
}

/// Best-effort typing for values inserted into JSON documents.
fn typed_json_value(value: &str) -> Json {
    if let Ok(n) = value.parse::<i64>() {
        return Json::from(n);
    }
    if let Ok(f) = value.parse::<f64>() {
        if f.is_finite() {
            return serde_json::Number::from_f64(f).map(Json::Number).unwrap_or_else(|| Json::from(value))
        }
    }
    match value {
        "true" => Json::Bool(true),
        "false" => Json::Bool(false),
        "null" => Json::Null,
        other => Json::from(other),
    }
}

fn expect_format(patch: &ConfigurationPatch, allowed: &[PatchFormat]) -> Result<()> {
    if allowed.contains(&patch.patch_format) {
        Ok(())
    } else {
        Err(Error::validation(format!(
            "patch {} has format {} which this strategy type does not accept",
            patch.patch_id,
            patch.patch_format.as_str()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ParameterType;

    fn strategy(strategy_type: StrategyType, base: &str) -> ConfigurationStrategy {
        ConfigurationStrategy {
            strategy_id: 9,
            game_id: 1,
            name: "main".into(),
            strategy_type,
            target_path: strategy_type.writes_file().then(|| "conf/server.cfg".to_string()),
            base_template: Some(base.to_string()),
            render_options: StrategyOptions::default_for(strategy_type),
            apply_order: 0,
        }
    }

    fn patch(level: PatchLevel, format: PatchFormat, content: &str) -> ConfigurationPatch {
        ConfigurationPatch {
            patch_id: 1,
            strategy_id: 9,
            patch_level: level,
            entity_id: 1,
            patch_content: content.to_string(),
            patch_format: format,
        }
    }

    fn definition(id: i64, key: &str) -> ParameterDefinition {
        ParameterDefinition {
            param_id: id,
            game_id: 1,
            key: key.into(),
            param_type: ParameterType::String,
            required: false,
            default_value: None,
            min_value: None,
            max_value: None,
            allowed_values: vec![],
        }
    }

    #[test]
    fn properties_layering_matches_preview_contract() {
        let strategy = strategy(StrategyType::FileProperties, "max-players=20\ndifficulty=normal");
        let game_patch = patch(PatchLevel::GameConfig, PatchFormat::Template, "max-players=50");
        let session_patch = patch(PatchLevel::Session, PatchFormat::Template, "difficulty=peaceful");
        let out = render_strategy(
            &strategy,
            &[],
            &[&game_patch, &session_patch],
            &[],
            &BTreeMap::new(),
        )
        .unwrap();
        assert_eq!(out.rendered_content, "max-players=50\ndifficulty=peaceful");
        assert_eq!(out.layers.len(), 2);
        assert_eq!(out.layers[0].level, PatchLevel::GameConfig);
        assert_eq!(out.layers[1].level, PatchLevel::Session);
    }

    #[test]
    fn cli_args_produce_argv_without_shell_quoting() {
        let strategy = strategy(StrategyType::CliArgs, "-port {{port}} +exec server.cfg");
        let effective = BTreeMap::from([("port".to_string(), "27015".to_string())]);
        let out = render_strategy(&strategy, &[], &[], &[], &effective).unwrap();
        assert_eq!(out.argv, vec!["-port", "27015", "+exec", "server.cfg"]);
        assert_eq!(out.rendered_content, "-port 27015 +exec server.cfg");
    }

    #[test]
    fn cli_args_missing_param_fails_naming_key() {
        let strategy = strategy(StrategyType::CliArgs, "-port {{port}}");
        let err = render_strategy(&strategy, &[], &[], &[], &BTreeMap::new()).unwrap_err();
        assert!(err.to_string().contains("port"));
    }

    #[test]
    fn env_vars_render_sorted_key_value_lines() {
        let strategy = strategy(StrategyType::EnvVars, "PORT={{port}}\nMODE=coop");
        let binding = StrategyParameterBinding {
            binding_id: 1,
            strategy_id: 9,
            param_id: 5,
            binding_type: BindingType::Direct,
            target_key: "ADMIN".into(),
            value_template: None,
            condition_expr: None,
        };
        let defs = vec![definition(5, "admin_name")];
        let effective = BTreeMap::from([
            ("port".to_string(), "80".to_string()),
            ("admin_name".to_string(), "op".to_string()),
        ]);
        let out = render_strategy(&strategy, &[&binding], &[], &defs, &effective).unwrap();
        assert_eq!(out.rendered_content, "ADMIN=op\nMODE=coop\nPORT=80");
        assert_eq!(out.env["PORT"], "80");
    }

    #[test]
    fn json_merge_and_binding_render_deterministically() {
        let strategy = strategy(StrategyType::FileJson, r#"{"players":{"max":20},"name":"srv"}"#);
        let merge = patch(
            PatchLevel::GameConfig,
            PatchFormat::JsonMergePatch,
            r#"{"players":{"max":50}}"#,
        );
        let binding = StrategyParameterBinding {
            binding_id: 1,
            strategy_id: 9,
            param_id: 5,
            binding_type: BindingType::JsonPath,
            target_key: "players.reserved".into(),
            value_template: None,
            condition_expr: None,
        };
        let defs = vec![definition(5, "reserved_slots")];
        let effective = BTreeMap::from([("reserved_slots".to_string(), "4".to_string())]);
        let first =
            render_strategy(&strategy, &[&binding], &[&merge], &defs, &effective).unwrap();
        let second =
            render_strategy(&strategy, &[&binding], &[&merge], &defs, &effective).unwrap();
        assert_eq!(first.rendered_content, second.rendered_content);
        assert_eq!(
            first.rendered_content,
            r#"{"name":"srv","players":{"max":50,"reserved":4}}"#
        );
    }

    #[test]
    fn yaml_strategic_merge_applies() {
        let strategy = strategy(StrategyType::FileYaml, "server:\n  port: 1\n  motd: hi");
        let p = patch(PatchLevel::Session, PatchFormat::YamlMerge, "server:\n  port: 2");
        let out = render_strategy(&strategy, &[], &[&p], &[], &BTreeMap::new()).unwrap();
        assert_eq!(out.rendered_content, "server:\n  motd: hi\n  port: 2\n");
    }

    #[test]
    fn text_strategy_last_template_layer_wins() {
        let strategy = strategy(StrategyType::FileLua, "mode = \"{{mode}}\"");
        let p = patch(PatchLevel::Session, PatchFormat::Template, "mode = \"{{mode}}\" -- patched");
        let effective = BTreeMap::from([("mode".to_string(), "versus".to_string())]);
        let out = render_strategy(&strategy, &[], &[&p], &[], &effective).unwrap();
        assert_eq!(out.rendered_content, "mode = \"versus\" -- patched");
    }

    #[test]
    fn conditional_binding_is_skipped() {
        let strategy = strategy(StrategyType::FileProperties, "a=1");
        let binding = StrategyParameterBinding {
            binding_id: 1,
            strategy_id: 9,
            param_id: 5,
            binding_type: BindingType::Direct,
            target_key: "password".into(),
            value_template: None,
            condition_expr: Some("private=true".into()),
        };
        let defs = vec![definition(5, "server_password")];
        let effective = BTreeMap::from([("server_password".to_string(), "s3cret".to_string())]);
        let out = render_strategy(&strategy, &[&binding], &[], &defs, &effective).unwrap();
        assert_eq!(out.rendered_content, "a=1");
    }

    #[test]
    fn condition_language() {
        let values = BTreeMap::from([
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "false".to_string()),
        ]);
        assert!(condition_holds(None, &values));
        assert!(condition_holds(Some("a"), &values));
        assert!(!condition_holds(Some("b"), &values));
        assert!(condition_holds(Some("!b"), &values));
        assert!(condition_holds(Some("a=1"), &values));
        assert!(!condition_holds(Some("a=2"), &values));
    }

    #[test]
    fn typed_json_values() {
        assert_eq!(typed_json_value("42"), Json::from(42));
        assert_eq!(typed_json_value("true"), Json::Bool(true));
        assert_eq!(typed_json_value("de_dust2"), Json::from("de_dust2"));
    }
}
