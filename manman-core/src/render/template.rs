//! `{{key}}` placeholder substitution.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Error, Result};

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("valid regex"))
}

/// How to treat a placeholder with no value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unresolved {
    /// Fail the render naming the key.
    Fail,
    /// Leave the placeholder text untouched.
    Keep,
    /// Substitute an empty string.
    Drop,
}

/// Substitute `{{key}}` placeholders from `values`.
pub fn substitute(
    text: &str,
    values: &BTreeMap<String, String>,
    unresolved: Unresolved,
) -> Result<String> {
    let mut missing: Option<String> = None;
    let out = placeholder_re().replace_all(text, |caps: &regex::Captures<'_>| {
        let key = &caps[1];
        match values.get(key) {
            Some(value) => value.clone(),
            None => match unresolved {
                Unresolved::Fail => {
                    if missing.is_none() {
                        missing = Some(key.to_string());
                    }
                    String::new()
                }
                Unresolved::Keep => caps[0].to_string(),
                Unresolved::Drop => String::new(),
            },
        }
    });
    if let Some(key) = missing {
        return Err(Error::validation(format!(
            "no value for template placeholder {key:?}"
        )));
    }
    Ok(out.into_owned())
}

/// Whether `text` still contains an unresolved placeholder.
pub fn has_placeholder(text: &str) -> bool {
    placeholder_re().is_match(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("max_players".to_string(), "50".to_string()),
            ("map.name".to_string(), "de_dust2".to_string()),
        ])
    }

    #[test]
    fn substitutes_known_keys() {
        let out = substitute("-maxplayers {{max_players}} +map {{map.name}}", &values(), Unresolved::Fail)
            .unwrap();
        assert_eq!(out, "-maxplayers 50 +map de_dust2");
    }

    #[test]
    fn whitespace_inside_braces_is_tolerated() {
        let out = substitute("{{ max_players }}", &values(), Unresolved::Fail).unwrap();
        assert_eq!(out, "50");
    }

    #[test]
    fn missing_key_fails_by_name() {
        let err = substitute("{{season}}", &values(), Unresolved::Fail).unwrap_err();
        assert!(err.to_string().contains("season"));
    }

    #[test]
    fn keep_leaves_placeholder() {
        let out = substitute("{{season}}", &values(), Unresolved::Keep).unwrap();
        assert_eq!(out, "{{season}}");
    }

    #[test]
    fn drop_erases_placeholder() {
        let out = substitute("x{{season}}y", &values(), Unresolved::Drop).unwrap();
        assert_eq!(out, "xy");
    }
}
