use super::color::ColorKey;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// Result of one visibility pass.
///
/// `seen` and `unseen` are edges relative to the previous pass; `visible` is
/// everything resolved in this pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewUpdate<K: Eq + Hash> {
    pub pass: u64,
    pub seen: HashSet<K>,
    pub unseen: HashSet<K>,
    pub visible: HashSet<K>,
}

impl<K: Eq + Hash> ViewUpdate<K> {
    pub fn is_unchanged(&self) -> bool {
        self.seen.is_empty() && self.unseen.is_empty()
    }
}

/// Resolves decoded colors to keys and diffs against the previous pass
#[derive(Debug)]
pub struct VisibilityDiffer<K> {
    identities: HashMap<ColorKey, K>,
    previous: HashSet<K>,
}

impl<K: Clone + Eq + Hash> VisibilityDiffer<K> {
    pub fn new() -> Self {
        Self {
            identities: HashMap::new(),
            previous: HashSet::new(),
        }
    }

    pub fn register(&mut self, color: ColorKey, key: K) {
        self.identities.insert(color, key);
    }

    pub fn unregister(&mut self, color: ColorKey) -> Option<K> {
        let key = self.identities.remove(&color)?;
        self.previous.remove(&key);
        Some(key)
    }

    pub fn resolve(&self, color: ColorKey) -> Option<&K> {
        self.identities.get(&color)
    }

    pub fn previous(&self) -> &HashSet<K> {
        &self.previous
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn diff(&mut self, colors: &HashSet<ColorKey>, pass: u64) -> ViewUpdate<K> {
        let visible: HashSet<K> = colors
            .iter()
            .filter_map(|color| self.identities.get(color).cloned())
            .collect();

        let seen = visible.difference(&self.previous).cloned().collect();
        let unseen = self.previous.difference(&visible).cloned().collect();
        self.previous = visible.clone();

        ViewUpdate {
            pass,
            seen,
            unseen,
            visible,
        }
    }

    pub fn reset(&mut self) {
        self.identities.clear();
        self.previous.clear();
    }
}

impl<K: Clone + Eq + Hash> Default for VisibilityDiffer<K> {
    fn default() -> Self {
        Self::new()
    }
}
