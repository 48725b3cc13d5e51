//! Structured merges: JSON merge patch (RFC 7386), a minimal JSON patch
//! (RFC 6902 add/replace/remove), and YAML strategic merge.
//!
//! JSON output is deterministic because `serde_json::Map` keeps keys
//! sorted; YAML mappings are re-sorted before serialization.

use serde_json::Value as Json;
use serde_yaml::Value as Yaml;

use crate::error::{Error, Result};

/// RFC 7386 merge: objects merge recursively, null deletes, everything
/// else replaces.
pub fn json_merge_patch(target: &mut Json, patch: &Json) {
    match patch {
        Json::Object(patch_map) => {
            if !target.is_object() {
                *target = Json::Object(Default::default());
            }
            let target_map = target.as_object_mut().expect("object ensured above");
            for (key, value) in patch_map {
                if value.is_null() {
                    target_map.remove(key);
                } else {
                    json_merge_patch(target_map.entry(key.clone()).or_insert(Json::Null), value);
                }
            }
        }
        other => *target = other.clone(),
    }
}

/// Apply an RFC 6902 patch document. Only `add`, `replace` and `remove`
/// are supported; `test`/`move`/`copy` are rejected.
pub fn json_patch(target: &mut Json, ops: &Json) -> Result<()> {
    let ops = ops
        .as_array()
        .ok_or_else(|| Error::validation("json_patch content must be an array of operations"))?;
    for op in ops {
        let kind = op
            .get("op")
            .and_then(Json::as_str)
            .ok_or_else(|| Error::validation("json_patch operation missing \"op\""))?;
        let path = op
            .get("path")
            .and_then(Json::as_str)
            .ok_or_else(|| Error::validation("json_patch operation missing \"path\""))?;
        match kind {
            "add" | "replace" => {
                let value = op
                    .get("value")
                    .ok_or_else(|| Error::validation("json_patch add/replace missing \"value\""))?;
                set_pointer(target, path, value.clone())?;
            }
            "remove" => remove_pointer(target, path)?,
            other => {
                return Err(Error::validation(format!(
                    "unsupported json_patch op {other:?}"
                )))
            }
        }
    }
    Ok(())
}

fn split_pointer(path: &str) -> Result<Vec<String>> {
    if path.is_empty() {
        return Ok(vec![]);
    }
    if !path.starts_with('/') {
        return Err(Error::validation(format!("bad JSON pointer {path:?}")));
    }
    Ok(path[1..]
        .split('/')
        .map(|seg| seg.replace("~1", "/").replace("~0", "~"))
        .collect())
}

/// Parse an intermediate array segment. `-` (append) is only meaningful
/// as the final segment, so anything but an in-range index is an error.
fn array_index(segment: &str, len: usize) -> Result<usize> {
    let idx: usize = segment
        .parse()
        .map_err(|_| Error::validation(format!("bad array index {segment:?}")))?;
    if idx >= len {
        return Err(Error::validation(format!("index {idx} out of bounds")));
    }
    Ok(idx)
}

fn set_pointer(target: &mut Json, path: &str, value: Json) -> Result<()> {
    let segments = split_pointer(path)?;
    if segments.is_empty() {
        *target = value;
        return Ok(());
    }
    let mut node = target;
    for segment in &segments[..segments.len() - 1] {
        node = match node {
            Json::Array(items) => {
                let idx = array_index(segment, items.len())?;
                &mut items[idx]
            }
            other => {
                if !other.is_object() {
                    *other = Json::Object(Default::default());
                }
                other
                    .as_object_mut()
                    .expect("object ensured above")
                    .entry(segment.clone())
                    .or_insert(Json::Null)
            }
        };
    }
    let last = &segments[segments.len() - 1];
    match node {
        Json::Array(items) => {
            if last == "-" {
                items.push(value);
            } else {
                let idx: usize = last
                    .parse()
                    .map_err(|_| Error::validation(format!("bad array index {last:?}")))?;
                if idx > items.len() {
                    return Err(Error::validation(format!("index {idx} out of bounds")));
                }
                if idx == items.len() {
                    items.push(value);
                } else {
                    items[idx] = value;
                }
            }
        }
        other => {
            if !other.is_object() {
                *other = Json::Object(Default::default());
            }
            other
                .as_object_mut()
                .expect("object ensured above")
                .insert(last.clone(), value);
        }
    }
    Ok(())
}

fn remove_pointer(target: &mut Json, path: &str) -> Result<()> {
    let segments = split_pointer(path)?;
    if segments.is_empty() {
        *target = Json::Null;
        return Ok(());
    }
    let mut node = target;
    // Removing a missing path is a no-op throughout.
    for segment in &segments[..segments.len() - 1] {
        node = match node {
            Json::Array(items) => {
                match segment.parse::<usize>().ok().filter(|idx| *idx < items.len()) {
                    Some(idx) => &mut items[idx],
                    None => return Ok(()),
                }
            }
            Json::Object(map) => match map.get_mut(segment) {
                Some(next) => next,
                None => return Ok(()),
            },
            _ => return Ok(()),
        };
    }
    let last = &segments[segments.len() - 1];
    match node {
        Json::Object(map) => {
            map.remove(last);
        }
        Json::Array(items) => {
            if let Ok(idx) = last.parse::<usize>() {
                if idx < items.len() {
                    items.remove(idx);
                }
            }
        }
        _ => {}
    }
    Ok(())
}

/// Strategic YAML merge: mappings merge recursively; sequences are
/// replaced (the default) or concatenated; scalars replace.
pub fn yaml_merge(target: &mut Yaml, patch: &Yaml, replace_sequences: bool) {
    match (target, patch) {
        (Yaml::Mapping(target_map), Yaml::Mapping(patch_map)) => {
            for (key, value) in patch_map {
                match target_map.get_mut(key) {
                    Some(existing) => yaml_merge(existing, value, replace_sequences),
                    None => {
                        target_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (Yaml::Sequence(target_seq), Yaml::Sequence(patch_seq)) if !replace_sequences => {
            target_seq.extend(patch_seq.iter().cloned());
        }
        (target, patch) => *target = patch.clone(),
    }
}

/// Rebuild every mapping with keys in sorted order so serialization is
/// byte-stable across renders.
pub fn sort_yaml(value: Yaml) -> Yaml {
    match value {
        Yaml::Mapping(map) => {
            let mut entries: Vec<(Yaml, Yaml)> =
                map.into_iter().map(|(k, v)| (k, sort_yaml(v))).collect();
            entries.sort_by(|(a, _), (b, _)| yaml_key_ord(a).cmp(&yaml_key_ord(b)));
            Yaml::Mapping(entries.into_iter().collect())
        }
        Yaml::Sequence(seq) => Yaml::Sequence(seq.into_iter().map(sort_yaml).collect()),
        scalar => scalar,
    }
}

fn yaml_key_ord(key: &Yaml) -> String {
    match key {
        Yaml::String(s) => s.clone(),
        other => serde_yaml::to_string(other).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_patch_merges_and_deletes() {
        let mut doc = json!({"a": {"b": 1, "c": 2}, "d": 3});
        json_merge_patch(&mut doc, &json!({"a": {"b": 9, "c": null}, "e": 4}));
        assert_eq!(doc, json!({"a": {"b": 9}, "d": 3, "e": 4}));
    }

    #[test]
    fn merge_patch_replaces_non_objects() {
        let mut doc = json!({"a": [1, 2]});
        json_merge_patch(&mut doc, &json!({"a": [3]}));
        assert_eq!(doc, json!({"a": [3]}));
    }

    #[test]
    fn json_patch_add_replace_remove() {
        let mut doc = json!({"players": {"max": 20}, "maps": ["a", "b"]});
        json_patch(
            &mut doc,
            &json!([
                {"op": "replace", "path": "/players/max", "value": 50},
                {"op": "add", "path": "/maps/-", "value": "c"},
                {"op": "remove", "path": "/maps/0"}
            ]),
        )
        .unwrap();
        assert_eq!(doc, json!({"players": {"max": 50}, "maps": ["b", "c"]}));
    }

    #[test]
    fn json_patch_rejects_unsupported_ops() {
        let mut doc = json!({});
        let err = json_patch(&mut doc, &json!([{"op": "test", "path": "/a", "value": 1}]));
        assert!(err.is_err());
    }

    #[test]
    fn json_patch_traverses_arrays_mid_path() {
        let mut doc = json!({"mods": [{"name": "a", "enabled": false}, {"name": "b"}]});
        json_patch(
            &mut doc,
            &json!([
                {"op": "replace", "path": "/mods/0/enabled", "value": true},
                {"op": "remove", "path": "/mods/1/name"}
            ]),
        )
        .unwrap();
        assert_eq!(doc, json!({"mods": [{"name": "a", "enabled": true}, {}]}));
    }

    #[test]
    fn json_patch_rejects_out_of_range_mid_path_index() {
        let mut doc = json!({"mods": ["a"]});
        let err = json_patch(
            &mut doc,
            &json!([{"op": "add", "path": "/mods/5/enabled", "value": true}]),
        );
        assert!(err.is_err());
        // The document is untouched on failure.
        assert_eq!(doc, json!({"mods": ["a"]}));
    }

    #[test]
    fn json_patch_remove_through_missing_array_path_is_a_noop() {
        let mut doc = json!({"mods": ["a"]});
        json_patch(&mut doc, &json!([{"op": "remove", "path": "/mods/5/x"}])).unwrap();
        assert_eq!(doc, json!({"mods": ["a"]}));
    }

    #[test]
    fn json_serialization_sorts_keys() {
        let mut doc = json!({});
        json_merge_patch(&mut doc, &json!({"zebra": 1, "alpha": 2}));
        assert_eq!(serde_json::to_string(&doc).unwrap(), r#"{"alpha":2,"zebra":1}"#);
    }

    #[test]
    fn yaml_maps_merge_sequences_replace() {
        let mut base: Yaml = serde_yaml::from_str("server:\n  port: 1\n  mods: [a, b]").unwrap();
        let patch: Yaml = serde_yaml::from_str("server:\n  mods: [c]").unwrap();
        yaml_merge(&mut base, &patch, true);
        let rendered = serde_yaml::to_string(&sort_yaml(base)).unwrap();
        assert_eq!(rendered, "server:\n  mods:\n  - c\n  port: 1\n");
    }

    #[test]
    fn yaml_sequences_concat_when_configured() {
        let mut base: Yaml = serde_yaml::from_str("mods: [a]").unwrap();
        let patch: Yaml = serde_yaml::from_str("mods: [b]").unwrap();
        yaml_merge(&mut base, &patch, false);
        let rendered = serde_yaml::to_string(&base).unwrap();
        assert_eq!(rendered, "mods:\n- a\n- b\n");
    }
}
