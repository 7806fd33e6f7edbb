//! Ordered list of key/value pairs.
//!
//! Block trees care about insertion order: children are iterated and named in
//! the order they were added, and flattened parameters keep that order too.
//! `PairList` is a thin wrapper over `Vec<(K, V)>` with map-like lookups.
//! Keys are not required to be unique; callers that need uniqueness check it
//! with [`PairList::first_duplicate`].

use std::borrow::Borrow;
use std::collections::HashSet;
use std::hash::Hash;

#[derive(Debug, Clone, PartialEq)]
pub struct PairList<K, V> {
    pairs: Vec<(K, V)>,
}

impl<K, V> PairList<K, V> {
    pub fn new() -> Self {
        Self { pairs: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            pairs: Vec::with_capacity(capacity),
        }
    }

    /// Appends a pair at the end of the list.
    pub fn add(&mut self, key: K, value: V) {
        self.pairs.push((key, value));
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Returns the value of the first pair whose key equals `key`.
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        self.pairs
            .iter()
            .find(|(k, _)| k.borrow() == key)
            .map(|(_, v)| v)
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        self.pairs
            .iter_mut()
            .find(|(k, _)| k.borrow() == key)
            .map(|(_, v)| v)
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        self.get(key).is_some()
    }

    /// Removes and returns the first pair whose key equals `key`.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        let index = self.pairs.iter().position(|(k, _)| k.borrow() == key)?;
        Some(self.pairs.remove(index).1)
    }

    pub fn key_at(&self, index: usize) -> Option<&K> {
        self.pairs.get(index).map(|(k, _)| k)
    }

    pub fn value_at(&self, index: usize) -> Option<&V> {
        self.pairs.get(index).map(|(_, v)| v)
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.pairs.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.pairs.iter().map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.pairs.iter().map(|(k, v)| (k, v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&K, &mut V)> {
        self.pairs.iter_mut().map(|(k, v)| (&*k, v))
    }

    /// Returns the first key that appears more than once.
    pub fn first_duplicate(&self) -> Option<&K>
    where
        K: Eq + Hash,
    {
        let mut seen = HashSet::with_capacity(self.pairs.len());
        self.pairs.iter().map(|(k, _)| k).find(|k| !seen.insert(*k))
    }
}

impl<K, V> Default for PairList<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> FromIterator<(K, V)> for PairList<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            pairs: iter.into_iter().collect(),
        }
    }
}

impl<K, V> Extend<(K, V)> for PairList<K, V> {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        self.pairs.extend(iter);
    }
}

impl<K, V> IntoIterator for PairList<K, V> {
    type Item = (K, V);
    type IntoIter = std::vec::IntoIter<(K, V)>;

    fn into_iter(self) -> Self::IntoIter {
        self.pairs.into_iter()
    }
}

impl<K, V> From<Vec<(K, V)>> for PairList<K, V> {
    fn from(pairs: Vec<(K, V)>) -> Self {
        Self { pairs }
    }
}
