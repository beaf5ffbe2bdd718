//! Label sets and label transformations.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ordered set of string labels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelSet {
    labels: BTreeMap<String, String>,
}

impl LabelSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            labels: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.labels.insert(name.into(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.labels.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.labels.iter()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Merge another set into this one; values from `other` win.
    pub fn merge(&mut self, other: &LabelSet) {
        for (k, v) in other.iter() {
            self.labels.insert(k.clone(), v.clone());
        }
    }

    /// Add labels from `other` that are not already present.
    pub fn merge_missing(&mut self, other: &LabelSet) {
        for (k, v) in other.iter() {
            self.labels.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }
}

/// Label transformation applied when a contract, context, service or rule is selected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelOperations {
    /// Labels to set (overwriting existing values)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub set: BTreeMap<String, String>,

    /// Labels to remove, applied after `set`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove: Vec<String>,
}

impl LabelOperations {
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.remove.is_empty()
    }

    pub fn apply_to(&self, labels: &LabelSet) -> LabelSet {
        let mut result = labels.clone();
        for (k, v) in &self.set {
            result.insert(k.clone(), v.clone());
        }
        for k in &self.remove {
            result.remove(k);
        }
        result
    }

    /// Label names touched by this transformation.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.set
            .keys()
            .map(String::as_str)
            .chain(self.remove.iter().map(String::as_str))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_sets_then_removes() {
        let labels = LabelSet::from_pairs([("a", "1"), ("b", "2")]);
        let ops = LabelOperations {
            set: BTreeMap::from([("b".to_string(), "3".to_string()), ("c".to_string(), "4".to_string())]),
            remove: vec!["a".to_string(), "c".to_string()],
        };

        let result = ops.apply_to(&labels);
        assert_eq!(result, LabelSet::from_pairs([("b", "3")]));
        // source is untouched
        assert_eq!(labels.get("a"), Some("1"));
    }

    #[test]
    fn test_merge_prefers_other() {
        let mut labels = LabelSet::from_pairs([("team", "a"), ("keep", "x")]);
        labels.merge(&LabelSet::from_pairs([("team", "b")]));
        assert_eq!(labels.get("team"), Some("b"));
        assert_eq!(labels.get("keep"), Some("x"));
    }

    #[test]
    fn test_merge_missing_keeps_existing() {
        let mut labels = LabelSet::from_pairs([("team", "a")]);
        labels.merge_missing(&LabelSet::from_pairs([("team", "b"), ("new", "y")]));
        assert_eq!(labels.get("team"), Some("a"));
        assert_eq!(labels.get("new"), Some("y"));
    }

    #[test]
    fn test_label_operations_from_toml() {
        let ops: LabelOperations = toml::from_str(
            r#"
            set = { tier = "gold" }
            remove = ["debug"]
            "#,
        )
        .unwrap();
        assert_eq!(ops.set.get("tier").map(String::as_str), Some("gold"));
        assert_eq!(ops.names().collect::<Vec<_>>(), vec!["tier", "debug"]);
    }
}
