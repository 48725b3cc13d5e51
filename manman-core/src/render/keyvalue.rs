//! Line-oriented rendering for properties and INI files.
//!
//! Patches are applied by key (or `section.key` for INI); after patching,
//! duplicate keys keep the last write. Comment and blank lines from the
//! base template are preserved when the options ask for it.

use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
enum Line {
    Blank,
    Comment(String),
    Section(String),
    Pair { key: String, value: String },
}

/// A parsed key-value document that preserves line order.
#[derive(Debug, Clone, Default)]
pub struct KeyValueDoc {
    lines: Vec<Line>,
    separator: String,
}

impl KeyValueDoc {
    pub fn parse(text: &str, separator: &str) -> Self {
        let mut lines = Vec::new();
        for raw in text.lines() {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                lines.push(Line::Blank);
            } else if trimmed.starts_with('#') || trimmed.starts_with(';') {
                lines.push(Line::Comment(raw.to_string()));
            } else if trimmed.starts_with('[') && trimmed.ends_with(']') {
                lines.push(Line::Section(trimmed[1..trimmed.len() - 1].to_string()));
            } else if let Some((key, value)) = trimmed.split_once(separator) {
                lines.push(Line::Pair {
                    key: key.trim().to_string(),
                    value: value.trim().to_string(),
                });
            } else {
                // A bare token; keep it verbatim so renders stay faithful.
                lines.push(Line::Comment(raw.to_string()));
            }
        }
        Self {
            lines,
            separator: separator.to_string(),
        }
    }

    /// Set `key` (or `section.key`) to `value`. The last occurrence is
    /// rewritten in place; unknown keys are appended (inside the section
    /// for qualified keys, creating it when absent).
    pub fn set(&mut self, qualified_key: &str, value: &str) {
        let (section, key) = match qualified_key.split_once('.') {
            Some((section, key)) if self.has_section(section) || self.has_any_section() => {
                (Some(section.to_string()), key.to_string())
            }
            _ => (None, qualified_key.to_string()),
        };

        let mut current: Option<String> = None;
        let mut last_match: Option<usize> = None;
        for (idx, line) in self.lines.iter().enumerate() {
            match line {
                Line::Section(name) => current = Some(name.clone()),
                Line::Pair { key: k, .. } if *k == key && current.as_deref() == section.as_deref() => {
                    last_match = Some(idx);
                }
                _ => {}
            }
        }

        if let Some(idx) = last_match {
            self.lines[idx] = Line::Pair {
                key,
                value: value.to_string(),
            };
            return;
        }

        match section {
            None => self.lines.push(Line::Pair {
                key,
                value: value.to_string(),
            }),
            Some(section) => {
                // Insert at the end of the section, creating it if missing.
                let insert_at = self.section_end(&section).unwrap_or_else(|| {
                    self.lines.push(Line::Section(section.clone()));
                    self.lines.len()
                });
                self.lines.insert(
                    insert_at,
                    Line::Pair {
                        key,
                        value: value.to_string(),
                    },
                );
            }
        }
    }

    /// Merge every pair of `other` into `self` (last write wins).
    pub fn merge(&mut self, other: &KeyValueDoc) {
        let mut current: Option<String> = None;
        for line in &other.lines {
            match line {
                Line::Section(name) => current = Some(name.clone()),
                Line::Pair { key, value } => {
                    let qualified = match &current {
                        Some(section) => format!("{section}.{key}"),
                        None => key.clone(),
                    };
                    self.set(&qualified, value);
                }
                _ => {}
            }
        }
    }

    pub fn get(&self, qualified_key: &str) -> Option<&str> {
        let (section, key) = match qualified_key.split_once('.') {
            Some((s, k)) if self.has_section(s) => (Some(s), k),
            _ => (None, qualified_key),
        };
        let mut current: Option<&str> = None;
        let mut found = None;
        for line in &self.lines {
            match line {
                Line::Section(name) => current = Some(name.as_str()),
                Line::Pair { key: k, value } if k == key && current == section => {
                    found = Some(value.as_str());
                }
                _ => {}
            }
        }
        found
    }

    /// Render back to text. Duplicate keys collapse to the last write.
    pub fn render(&self, keep_comments: bool) -> String {
        // Identify the surviving occurrence per (section, key).
        let mut last: BTreeMap<(Option<String>, String), usize> = BTreeMap::new();
        let mut current: Option<String> = None;
        for (idx, line) in self.lines.iter().enumerate() {
            match line {
                Line::Section(name) => current = Some(name.clone()),
                Line::Pair { key, .. } => {
                    last.insert((current.clone(), key.clone()), idx);
                }
                _ => {}
            }
        }

        let mut out = Vec::new();
        current = None;
        for (idx, line) in self.lines.iter().enumerate() {
            match line {
                Line::Blank => {
                    if keep_comments {
                        out.push(String::new());
                    }
                }
                Line::Comment(text) => {
                    if keep_comments {
                        out.push(text.clone());
                    }
                }
                Line::Section(name) => {
                    current = Some(name.clone());
                    out.push(format!("[{name}]"));
                }
                Line::Pair { key, value } => {
                    if last.get(&(current.clone(), key.clone())) == Some(&idx) {
                        out.push(format!("{key}{}{value}", self.separator));
                    }
                }
            }
        }
        out.join("\n")
    }

    fn has_section(&self, name: &str) -> bool {
        self.lines
            .iter()
            .any(|l| matches!(l, Line::Section(s) if s == name))
    }

    fn has_any_section(&self) -> bool {
        self.lines.iter().any(|l| matches!(l, Line::Section(_)))
    }

    /// Index just past the last line of `section`.
    fn section_end(&self, section: &str) -> Option<usize> {
        let mut start = None;
        for (idx, line) in self.lines.iter().enumerate() {
            if let Line::Section(name) = line {
                if start.is_some() {
                    return Some(idx);
                }
                if name == section {
                    start = Some(idx);
                }
            }
        }
        start.map(|_| self.lines.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_by_key_keeps_order() {
        let mut doc = KeyValueDoc::parse("max-players=20\ndifficulty=normal", "=");
        let patch = KeyValueDoc::parse("max-players=50", "=");
        doc.merge(&patch);
        let session = KeyValueDoc::parse("difficulty=peaceful", "=");
        doc.merge(&session);
        assert_eq!(doc.render(true), "max-players=50\ndifficulty=peaceful");
    }

    #[test]
    fn unknown_keys_append() {
        let mut doc = KeyValueDoc::parse("a=1", "=");
        doc.merge(&KeyValueDoc::parse("b=2", "="));
        assert_eq!(doc.render(true), "a=1\nb=2");
    }

    #[test]
    fn duplicate_keys_keep_last_write() {
        let doc = KeyValueDoc::parse("a=1\na=2\nb=3", "=");
        assert_eq!(doc.render(true), "a=2\nb=3");
        assert_eq!(doc.get("a"), Some("2"));
    }

    #[test]
    fn comments_survive_when_kept() {
        let mut doc = KeyValueDoc::parse("# settings\na=1", "=");
        doc.merge(&KeyValueDoc::parse("a=9", "="));
        assert_eq!(doc.render(true), "# settings\na=9");
        assert_eq!(doc.render(false), "a=9");
    }

    #[test]
    fn ini_sections_address_by_qualified_key() {
        let mut doc = KeyValueDoc::parse("[server]\nport=27015\n[game]\nmode=coop", "=");
        doc.set("server.port", "27016");
        doc.set("game.map", "c1m1");
        let rendered = doc.render(true);
        assert_eq!(rendered, "[server]\nport=27016\n[game]\nmode=coop\nmap=c1m1");
    }

    #[test]
    fn ini_merge_respects_sections() {
        let mut doc = KeyValueDoc::parse("[server]\nport=27015", "=");
        doc.merge(&KeyValueDoc::parse("[server]\nport=27020", "="));
        assert_eq!(doc.get("server.port"), Some("27020"));
    }

    #[test]
    fn missing_section_is_created_on_set() {
        let mut doc = KeyValueDoc::parse("[a]\nx=1", "=");
        doc.set("b.y", "2");
        assert_eq!(doc.render(true), "[a]\nx=1\n[b]\ny=2");
    }
}
