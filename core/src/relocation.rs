//! Original locator → digest-pinned locator mapping.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Snapshot of where each image of a bundle now lives.
///
/// Built once per push or pull. There is no API for mutating a map after
/// construction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelocationMap(BTreeMap<String, String>);

impl RelocationMap {
    /// Digest-pinned locator for `original`.
    pub fn get(&self, original: &str) -> Option<&str> {
        self.0.get(original).map(String::as_str)
    }

    pub fn contains(&self, original: &str) -> bool {
        self.0.contains_key(original)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Entries in original-locator order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn into_inner(self) -> BTreeMap<String, String> {
        self.0
    }
}

impl From<BTreeMap<String, String>> for RelocationMap {
    fn from(entries: BTreeMap<String, String>) -> Self {
        Self(entries)
    }
}

impl FromIterator<(String, String)> for RelocationMap {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a RelocationMap {
    type Item = (&'a String, &'a String);
    type IntoIter = std::collections::btree_map::Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_as_plain_object() {
        let map: RelocationMap = [(
            "nginx:2.12".to_string(),
            "my.registry/ns/app@sha256:abc".to_string(),
        )]
        .into_iter()
        .collect();
        assert_eq!(
            serde_json::to_string(&map).unwrap(),
            r#"{"nginx:2.12":"my.registry/ns/app@sha256:abc"}"#
        );
    }

    #[test]
    fn test_lookup() {
        let map: RelocationMap = [("a".to_string(), "b".to_string())].into_iter().collect();
        assert_eq!(map.get("a"), Some("b"));
        assert!(map.contains("a"));
        assert!(map.get("b").is_none());
        assert_eq!(map.len(), 1);
        assert!(RelocationMap::default().is_empty());
    }
}
