//! Slider index → target list mapping
//!
//! Built once per config load and shared read-only as `Arc<SliderMapping>`.
//! A reload replaces the whole snapshot, so readers never observe a
//! half-updated mapping.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::warn;

/// Slider key as written in YAML (`0:` or `"0":`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SliderKey {
    Index(i64),
    Text(String),
}

impl SliderKey {
    /// Parse into a slider index, if it is one
    pub fn index(&self) -> Option<usize> {
        match self {
            SliderKey::Index(n) => usize::try_from(*n).ok(),
            SliderKey::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// One target or several (`0: master` or `0: [master, mic]`)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum TargetList {
    Single(String),
    Many(Vec<String>),
}

impl TargetList {
    pub fn as_slice(&self) -> &[String] {
        match self {
            TargetList::Single(s) => std::slice::from_ref(s),
            TargetList::Many(v) => v,
        }
    }
}

/// Immutable slider mapping snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SliderMapping {
    map: BTreeMap<usize, Vec<String>>,
}

impl SliderMapping {
    /// Merge the user mapping with the internal one
    ///
    /// User targets come first and are kept as written (minus empty
    /// strings). Internal targets are appended only if the exact same
    /// string isn't already mapped on that slider.
    pub fn from_configs(
        user: &HashMap<SliderKey, TargetList>,
        internal: &HashMap<SliderKey, TargetList>,
    ) -> Self {
        let mut map: BTreeMap<usize, Vec<String>> = BTreeMap::new();

        for (key, targets) in user {
            let Some(idx) = Self::resolve_key(key) else { continue };

            let filtered: Vec<String> = targets
                .as_slice()
                .iter()
                .filter(|t| !t.is_empty())
                .cloned()
                .collect();

            if !filtered.is_empty() {
                map.entry(idx).or_default().extend(filtered);
            }
        }

        for (key, targets) in internal {
            let Some(idx) = Self::resolve_key(key) else { continue };

            let existing = map.entry(idx).or_default();
            for target in targets.as_slice() {
                if !target.is_empty() && !existing.contains(target) {
                    existing.push(target.clone());
                }
            }
        }

        map.retain(|_, targets| !targets.is_empty());

        Self { map }
    }

    fn resolve_key(key: &SliderKey) -> Option<usize> {
        let idx = key.index();
        if idx.is_none() {
            warn!(?key, "Ignoring slider mapping entry with a non-numeric key");
        }
        idx
    }

    /// Targets configured for a slider
    pub fn get(&self, slider_id: usize) -> Option<&[String]> {
        self.map.get(&slider_id).map(Vec::as_slice)
    }

    /// Iterate sliders in ascending order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &[String])> {
        self.map.iter().map(|(idx, targets)| (*idx, targets.as_slice()))
    }

    /// Every configured target across all sliders
    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.map.values().flatten().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl FromIterator<(usize, Vec<String>)> for SliderMapping {
    fn from_iter<I: IntoIterator<Item = (usize, Vec<String>)>>(iter: I) -> Self {
        let mut map = BTreeMap::new();
        for (idx, targets) in iter {
            if !targets.is_empty() {
                map.insert(idx, targets);
            }
        }
        Self { map }
    }
}

impl fmt::Display for SliderMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let target_count: usize = self.map.values().map(Vec::len).sum();
        write!(f, "<{} sliders mapped to {} targets>", self.map.len(), target_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(entries: &[(i64, &[&str])]) -> HashMap<SliderKey, TargetList> {
        entries
            .iter()
            .map(|(idx, targets)| {
                (
                    SliderKey::Index(*idx),
                    TargetList::Many(targets.iter().map(|t| t.to_string()).collect()),
                )
            })
            .collect()
    }

    #[test]
    fn test_user_first_then_internal_deduplicated() {
        let user = mapping(&[(0, &["Chrome.exe", ""])]);
        let internal = mapping(&[(0, &["Chrome.exe", "chrome.exe", "spotify.exe"])]);

        let merged = SliderMapping::from_configs(&user, &internal);
        // Dedup is literal: the lowercase variant is a different string
        assert_eq!(
            merged.get(0).unwrap(),
            &["Chrome.exe", "chrome.exe", "spotify.exe"].map(String::from)[..]
        );
    }

    #[test]
    fn test_empty_entries_are_dropped() {
        let user = mapping(&[(0, &[""]), (1, &[])]);
        let merged = SliderMapping::from_configs(&user, &HashMap::new());
        assert!(merged.is_empty());
    }

    #[test]
    fn test_string_and_invalid_keys() {
        let mut user = HashMap::new();
        user.insert(SliderKey::Text("2".to_string()), TargetList::Single("mic".to_string()));
        user.insert(SliderKey::Text("two".to_string()), TargetList::Single("master".to_string()));
        user.insert(SliderKey::Index(-1), TargetList::Single("system".to_string()));

        let merged = SliderMapping::from_configs(&user, &HashMap::new());
        assert_eq!(merged.len(), 1);
        assert_eq!(merged.get(2).unwrap(), &["mic".to_string()][..]);
    }

    #[test]
    fn test_display() {
        let merged: SliderMapping = vec![
            (0, vec!["master".to_string()]),
            (1, vec!["a".to_string(), "b".to_string()]),
        ]
        .into_iter()
        .collect();
        assert_eq!(merged.to_string(), "<2 sliders mapped to 3 targets>");
    }

    #[test]
    fn test_yaml_shapes() {
        let parsed: HashMap<SliderKey, TargetList> =
            serde_yaml::from_str("0: master\n\"1\": [a, b]\n").unwrap();
        let merged = SliderMapping::from_configs(&parsed, &HashMap::new());
        assert_eq!(merged.targets().collect::<Vec<_>>(), vec!["master", "a", "b"]);
    }
}
