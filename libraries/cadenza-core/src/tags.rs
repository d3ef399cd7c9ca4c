//! Ordered tag maps
//!
//! Media metadata is an ordered list of key/value pairs. Lookups are
//! case-insensitive by default, matching how most tag containers behave;
//! an exact-case lookup is available for formats that distinguish case.

use serde::{Deserialize, Serialize};

/// Ordered key/value tag map with case-insensitive lookup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagMap {
    entries: Vec<(String, String)>,
}

impl TagMap {
    /// Create an empty tag map
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tags
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no tags are present
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get a tag value, matching the key case-insensitively
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Get a tag value, matching the key exactly
    pub fn get_case(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set or delete a tag
    ///
    /// A `Some` value replaces an existing entry in place (preserving order)
    /// or appends a new one. `None` deletes the entry if present.
    pub fn set(&mut self, key: &str, value: Option<&str>) {
        match value {
            Some(value) => {
                if let Some(entry) = self
                    .entries
                    .iter_mut()
                    .find(|(k, _)| k.eq_ignore_ascii_case(key))
                {
                    entry.1 = value.to_string();
                } else {
                    self.entries.push((key.to_string(), value.to_string()));
                }
            }
            None => {
                self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(key));
            }
        }
    }

    /// Iterate over tags in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Merge another map into this one, overwriting matching keys
    pub fn merge(&mut self, other: &TagMap) {
        for (k, v) in other.iter() {
            self.set(k, Some(v));
        }
    }
}

impl FromIterator<(String, String)> for TagMap {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.set(&k, Some(&v));
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let mut tags = TagMap::new();
        tags.set("Title", Some("Song"));
        assert_eq!(tags.get("title"), Some("Song"));
        assert_eq!(tags.get("TITLE"), Some("Song"));
        assert_eq!(tags.get_case("title"), None);
        assert_eq!(tags.get_case("Title"), Some("Song"));
    }

    #[test]
    fn set_replaces_in_place() {
        let mut tags = TagMap::new();
        tags.set("artist", Some("A"));
        tags.set("title", Some("T"));
        tags.set("ARTIST", Some("B"));
        assert_eq!(tags.len(), 2);
        let keys: Vec<&str> = tags.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["artist", "title"]);
        assert_eq!(tags.get("artist"), Some("B"));
    }

    #[test]
    fn none_deletes() {
        let mut tags = TagMap::new();
        tags.set("comment", Some("hello"));
        tags.set("Comment", None);
        assert!(tags.is_empty());
    }

    #[test]
    fn merge_overwrites() {
        let mut a = TagMap::new();
        a.set("title", Some("old"));
        let mut b = TagMap::new();
        b.set("title", Some("new"));
        b.set("album", Some("X"));
        a.merge(&b);
        assert_eq!(a.get("title"), Some("new"));
        assert_eq!(a.get("album"), Some("X"));
    }
}
