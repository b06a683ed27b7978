//! Initial-letter permutations for CJK titles.
//!
//! Sort keys for titles are built from the first letter of each character's
//! readings. A polyphonic character contributes every distinct initial, so a
//! title expands into the cartesian product of its characters' initials.

use crate::error::Result;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Upper bound on generated permutations.
pub const MAX_PERMUTATIONS: usize = 4096;

/// Character → readings table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CharMap {
    readings: HashMap<char, Vec<String>>,
}

impl CharMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a JSON object mapping single characters to lists of readings.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let map = Self::from_json(&bytes)?;
        tracing::info!(path = %path.display(), entries = map.len(), "loaded character table");
        Ok(map)
    }

    /// Like [`CharMap::load`], but a missing or broken table yields an empty
    /// one; queries then fall back to alphanumeric passthrough.
    pub fn load_or_empty<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(map) => map,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "character table unavailable");
                Self::new()
            }
        }
    }

    /// Parses the table. Keys that are not a single character are skipped; a
    /// reading may be given as a string or a list of strings.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let raw: HashMap<String, Value> = serde_json::from_slice(bytes)?;
        let mut readings = HashMap::with_capacity(raw.len());
        for (key, value) in raw {
            let mut chars = key.chars();
            let (Some(ch), None) = (chars.next(), chars.next()) else {
                continue;
            };
            let list = match value {
                Value::String(s) => vec![s],
                Value::Array(items) => items
                    .into_iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
                _ => continue,
            };
            readings.insert(ch, list);
        }
        Ok(Self { readings })
    }

    pub fn insert(&mut self, ch: char, readings: Vec<String>) {
        self.readings.insert(ch, readings);
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Distinct uppercased initials of `ch`, in reading order. Characters
    /// without usable readings map to themselves if alphanumeric.
    fn initials(&self, ch: char) -> Vec<String> {
        let mut initials: Vec<String> = Vec::new();
        if let Some(readings) = self.readings.get(&ch) {
            for reading in readings {
                if let Some(first) = reading.chars().next() {
                    let upper: String = first.to_uppercase().collect();
                    if !initials.contains(&upper) {
                        initials.push(upper);
                    }
                }
            }
        }
        if initials.is_empty() && ch.is_alphanumeric() {
            initials.push(ch.to_uppercase().collect());
        }
        initials
    }

    /// All initial-letter spellings of `text`, deduplicated in first-seen
    /// order and joined with `|`.
    pub fn permutations(&self, text: &str) -> String {
        if text.is_empty() {
            return String::new();
        }

        let mut results = vec![String::new()];
        for ch in text.chars() {
            let initials = self.initials(ch);
            if initials.is_empty() {
                continue;
            }

            let mut seen = HashSet::new();
            let mut next = Vec::with_capacity(results.len() * initials.len());
            'expand: for prefix in &results {
                for initial in &initials {
                    let candidate = format!("{}{}", prefix, initial);
                    if seen.insert(candidate.clone()) {
                        next.push(candidate);
                        if next.len() >= MAX_PERMUTATIONS {
                            tracing::warn!(text = %text, limit = MAX_PERMUTATIONS, "permutation limit reached, output truncated");
                            break 'expand;
                        }
                    }
                }
            }
            results = next;
        }
        results.join("|")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> CharMap {
        CharMap::from_json(
            r#"{
                "重": ["chong", "zhong"],
                "庆": ["qing"],
                "长": ["chang", "zhang"],
                "行": ["xing", "hang", "heng"],
                "空": [],
                "ab": ["ignored"]
            }"#
            .as_bytes(),
        )
        .unwrap()
    }

    #[test]
    fn test_polyphonic_product_order() {
        assert_eq!(table().permutations("重庆"), "CQ|ZQ");
        assert_eq!(table().permutations("长重"), "CC|CZ|ZC|ZZ");
    }

    #[test]
    fn test_duplicate_initials_collapse() {
        // xing/hang/heng give X and H only
        assert_eq!(table().permutations("行"), "X|H");
    }

    #[test]
    fn test_passthrough_and_drop() {
        let map = table();
        assert_eq!(map.permutations("重庆2"), "CQ2|ZQ2");
        assert_eq!(map.permutations("a-b c"), "ABC");
        assert_eq!(map.permutations("空"), "空");
        assert_eq!(map.permutations("!?"), "");
        assert_eq!(map.permutations(""), "");
    }

    #[test]
    fn test_multi_char_keys_skipped() {
        let map = table();
        assert_eq!(map.len(), 5);
        assert_eq!(map.permutations("ab"), "AB");
    }

    #[test]
    fn test_permutation_limit() {
        let mut map = CharMap::new();
        map.insert('x', vec!["a".into(), "b".into()]);
        let text = "x".repeat(16);
        let out = map.permutations(&text);
        assert_eq!(out.split('|').count(), MAX_PERMUTATIONS);
        assert!(out.starts_with(&"A".repeat(16)));
    }

    #[test]
    fn test_load_or_empty() {
        let dir = tempfile::tempdir().unwrap();
        let missing = CharMap::load_or_empty(dir.path().join("char_map.json"));
        assert!(missing.is_empty());

        let path = dir.path().join("char_map.json");
        std::fs::write(&path, r#"{"庆": "qing"}"#).unwrap();
        assert_eq!(CharMap::load(&path).unwrap().permutations("庆"), "Q");
    }
}
