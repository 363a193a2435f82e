//! Invalidation Index
//!
//! Reverse indices for bulk invalidation: tag → keys and dependency →
//! dependents. The maps shard internally, so concurrent writers on
//! unrelated keys never serialize on one lock. Re-indexing a key first
//! removes its prior indexing, so overwrites do not leak stale reverse
//! entries.

use std::collections::HashSet;

use dashmap::DashMap;

use crate::entry::CacheEntry;

/// Labels a key was last indexed under, kept so an overwrite can unwind
/// exactly what it previously contributed
struct IndexedLabels {
    tags: HashSet<String>,
    dependencies: HashSet<String>,
}

/// Tag and dependency reverse indices
pub struct InvalidationIndex {
    /// tag -> keys carrying it
    tags: DashMap<String, HashSet<String>>,
    /// dependency key -> keys that declared it
    dependents: DashMap<String, HashSet<String>>,
    /// key -> labels currently indexed
    indexed: DashMap<String, IndexedLabels>,
}

impl InvalidationIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self {
            tags: DashMap::new(),
            dependents: DashMap::new(),
            indexed: DashMap::new(),
        }
    }

    /// Index an entry's tags and dependencies, unwinding any prior indexing
    /// for the same key first
    pub fn index_entry(&self, entry: &CacheEntry) {
        let key = entry.key.as_str();
        self.remove_from_index(key);

        if entry.tags().is_empty() && entry.dependencies().is_empty() {
            return;
        }

        for tag in entry.tags() {
            self.tags
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
        for dep in entry.dependencies() {
            self.dependents
                .entry(dep.clone())
                .or_default()
                .insert(key.to_string());
        }
        self.indexed.insert(
            key.to_string(),
            IndexedLabels {
                tags: entry.tags().clone(),
                dependencies: entry.dependencies().clone(),
            },
        );
    }

    /// Remove a key's outgoing indexing (its tags and declared
    /// dependencies). Incoming edges (other keys depending on this one)
    /// are owned by those keys and stay.
    pub fn remove_from_index(&self, key: &str) -> bool {
        let Some((_, labels)) = self.indexed.remove(key) else {
            return false;
        };

        for tag in &labels.tags {
            if let Some(mut keys) = self.tags.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    drop(keys);
                    self.tags.remove_if(tag, |_, v| v.is_empty());
                }
            }
        }
        for dep in &labels.dependencies {
            if let Some(mut keys) = self.dependents.get_mut(dep) {
                keys.remove(key);
                if keys.is_empty() {
                    drop(keys);
                    self.dependents.remove_if(dep, |_, v| v.is_empty());
                }
            }
        }
        true
    }

    /// Keys currently carrying `tag`
    pub fn keys_for_tag(&self, tag: &str) -> HashSet<String> {
        self.tags
            .get(tag)
            .map(|keys| keys.clone())
            .unwrap_or_default()
    }

    /// Keys that declared a dependency on `key`
    pub fn dependents_of(&self, key: &str) -> HashSet<String> {
        self.dependents
            .get(key)
            .map(|keys| keys.clone())
            .unwrap_or_default()
    }

    /// Drop everything
    pub fn clear(&self) {
        self.tags.clear();
        self.dependents.clear();
        self.indexed.clear();
    }

    /// Number of keys with any indexing
    pub fn indexed_keys(&self) -> usize {
        self.indexed.len()
    }
}

impl Default for InvalidationIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Glob match with `*` (any run, including empty) and `?` (any single
/// character). Iterative two-pointer with backtracking to the last star.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let txt: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut star_t = 0usize;

    while t < txt.len() {
        if p < pat.len() && (pat[p] == '?' || pat[p] == txt[t]) {
            p += 1;
            t += 1;
        } else if p < pat.len() && pat[p] == '*' {
            star = Some(p);
            star_t = t;
            p += 1;
        } else if let Some(sp) = star {
            // Let the last star absorb one more character
            p = sp + 1;
            star_t += 1;
            t = star_t;
        } else {
            return false;
        }
    }

    while p < pat.len() && pat[p] == '*' {
        p += 1;
    }
    p == pat.len()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use proptest::prelude::*;

    fn entry(key: &str, tags: &[&str], deps: &[&str]) -> CacheEntry {
        CacheEntry::new(key, Bytes::from_static(b"v"), 0)
            .with_tags(tags.iter().copied())
            .with_dependencies(deps.iter().copied())
    }

    #[test]
    fn test_tag_indexing() {
        let index = InvalidationIndex::new();
        index.index_entry(&entry("k1", &["users"], &[]));
        index.index_entry(&entry("k2", &["users", "admins"], &[]));

        let users = index.keys_for_tag("users");
        assert_eq!(users.len(), 2);
        assert!(users.contains("k1"));
        assert!(users.contains("k2"));

        assert_eq!(index.keys_for_tag("admins").len(), 1);
        assert!(index.keys_for_tag("ghosts").is_empty());
    }

    #[test]
    fn test_dependency_indexing() {
        let index = InvalidationIndex::new();
        index.index_entry(&entry("child1", &[], &["parent"]));
        index.index_entry(&entry("child2", &[], &["parent", "other"]));

        let deps = index.dependents_of("parent");
        assert_eq!(deps.len(), 2);
        assert!(index.dependents_of("other").contains("child2"));
    }

    #[test]
    fn test_overwrite_prunes_stale_indexing() {
        let index = InvalidationIndex::new();
        index.index_entry(&entry("k", &["old-tag"], &["old-dep"]));

        // Re-index under different labels: the old ones must disappear
        index.index_entry(&entry("k", &["new-tag"], &[]));

        assert!(index.keys_for_tag("old-tag").is_empty());
        assert!(index.dependents_of("old-dep").is_empty());
        assert!(index.keys_for_tag("new-tag").contains("k"));
    }

    #[test]
    fn test_remove_keeps_incoming_edges() {
        let index = InvalidationIndex::new();
        index.index_entry(&entry("parent", &["p"], &[]));
        index.index_entry(&entry("child", &[], &["parent"]));

        index.remove_from_index("parent");

        // child still declares its dependency on parent
        assert!(index.dependents_of("parent").contains("child"));
        assert!(index.keys_for_tag("p").is_empty());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let index = InvalidationIndex::new();
        index.index_entry(&entry("k", &["t"], &[]));

        assert!(index.remove_from_index("k"));
        assert!(!index.remove_from_index("k"));
        assert_eq!(index.indexed_keys(), 0);
    }

    #[test]
    fn test_unlabeled_entry_not_tracked() {
        let index = InvalidationIndex::new();
        index.index_entry(&entry("plain", &[], &[]));
        assert_eq!(index.indexed_keys(), 0);
    }

    #[test]
    fn test_glob_literal_and_wildcards() {
        assert!(glob_match("user:1", "user:1"));
        assert!(!glob_match("user:1", "user:2"));

        assert!(glob_match("user:*", "user:1"));
        assert!(glob_match("user:*", "user:"));
        assert!(!glob_match("user:*", "session:1"));

        assert!(glob_match("user:?", "user:7"));
        assert!(!glob_match("user:?", "user:42"));

        assert!(glob_match("*:profile:*", "user:42:profile:avatar"));
        assert!(glob_match("*", ""));
        assert!(glob_match("**", "anything"));
        assert!(!glob_match("", "x"));
        assert!(glob_match("", ""));
    }

    #[test]
    fn test_glob_backtracking() {
        assert!(glob_match("a*b*c", "axxbxxc"));
        assert!(glob_match("a*b*c", "abc"));
        assert!(!glob_match("a*b*c", "axxbxx"));
        assert!(glob_match("*abc", "xxabc"));
        assert!(!glob_match("*abc", "xxab"));
    }

    proptest! {
        #[test]
        fn prop_star_matches_everything(text in "[a-z:0-9]{0,40}") {
            prop_assert!(glob_match("*", &text));
        }

        #[test]
        fn prop_literal_matches_itself(text in "[a-z:0-9]{0,40}") {
            prop_assert!(glob_match(&text, &text));
        }

        #[test]
        fn prop_prefix_star(text in "[a-z]{1,20}") {
            let pattern = format!("{}*", &text[..1]);
            prop_assert!(glob_match(&pattern, &text));
        }
    }
}
