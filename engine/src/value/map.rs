//! Insertion-ordered map of vars.

use crate::error::{Error, Result};
use crate::value::{Tag, Var};

/// A map from scalar-tagged vars to vars.
///
/// Entries keep insertion order; iteration always replays the order keys
/// first appeared. Lookup is a linear scan, which is the right trade for the
/// small maps scripts and schemas produce.
///
/// Keys are restricted to the scalar tags `Int`, `Uint`, `Bool` and
/// `String`; any other tag is rejected with
/// [`IncompatibleDataTypes`](Error::IncompatibleDataTypes).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VarMap {
    entries: Vec<(Var, Var)>,
}

fn key_allowed(key: &Var) -> bool {
    matches!(key.tag(), Tag::Int | Tag::Uint | Tag::Bool | Tag::String)
}

impl VarMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when the map holds no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or replace. Returns the previous value for a replaced key.
    pub fn insert(&mut self, key: Var, value: Var) -> Result<Option<Var>> {
        if !key_allowed(&key) {
            return Err(Error::IncompatibleDataTypes);
        }
        for (k, v) in &mut self.entries {
            if *k == key {
                return Ok(Some(std::mem::replace(v, value)));
            }
        }
        self.entries.push((key, value));
        Ok(None)
    }

    /// Look up a value.
    pub fn get(&self, key: &Var) -> Option<&Var> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Mutable slot for `key`, inserting `Nil` when absent.
    ///
    /// The reference is invalidated by any operation that resizes the map.
    pub fn at(&mut self, key: Var) -> Result<&mut Var> {
        if !key_allowed(&key) {
            return Err(Error::IncompatibleDataTypes);
        }
        if let Some(idx) = self.entries.iter().position(|(k, _)| *k == key) {
            return Ok(&mut self.entries[idx].1);
        }
        self.entries.push((key, Var::Nil));
        Ok(&mut self.entries.last_mut().unwrap().1)
    }

    /// Remove an entry, returning its value.
    pub fn remove(&mut self, key: &Var) -> Option<Var> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&Var, &Var)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    /// Iterate keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &Var> {
        self.entries.iter().map(|(k, _)| k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get() {
        let mut map = VarMap::new();

        map.insert(Var::from("a"), Var::Int(1)).unwrap();
        map.insert(Var::Int(2), Var::from("two")).unwrap();

        assert_eq!(map.get(&Var::from("a")), Some(&Var::Int(1)));
        assert_eq!(map.get(&Var::Int(2)), Some(&Var::from("two")));
        assert_eq!(map.get(&Var::Int(3)), None);
    }

    #[test]
    fn insert_replaces_and_returns_previous() {
        let mut map = VarMap::new();

        map.insert(Var::from("k"), Var::Int(1)).unwrap();
        let prev = map.insert(Var::from("k"), Var::Int(2)).unwrap();

        assert_eq!(prev, Some(Var::Int(1)));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&Var::from("k")), Some(&Var::Int(2)));
    }

    #[test]
    fn iteration_keeps_insertion_order() {
        let mut map = VarMap::new();
        map.insert(Var::from("c"), Var::Int(3)).unwrap();
        map.insert(Var::from("a"), Var::Int(1)).unwrap();
        map.insert(Var::from("b"), Var::Int(2)).unwrap();

        // Replacing does not move the key.
        map.insert(Var::from("a"), Var::Int(10)).unwrap();

        let keys: Vec<&str> = map.keys().map(|k| k.as_str().unwrap()).collect();
        assert_eq!(keys, vec!["c", "a", "b"]);
    }

    #[test]
    fn non_scalar_keys_rejected() {
        let mut map = VarMap::new();

        assert_eq!(
            map.insert(Var::Array(vec![]), Var::Nil),
            Err(Error::IncompatibleDataTypes)
        );
        assert_eq!(
            map.insert(Var::Double(1.0), Var::Nil),
            Err(Error::IncompatibleDataTypes)
        );
        assert!(map.at(Var::Nil).is_err());
    }

    #[test]
    fn at_creates_missing_slot() {
        let mut map = VarMap::new();

        assert!(map.at(Var::from("new")).unwrap().is_nil());
        *map.at(Var::from("new")).unwrap() = Var::Bool(true);

        assert_eq!(map.get(&Var::from("new")), Some(&Var::Bool(true)));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn remove_drops_entry() {
        let mut map = VarMap::new();
        map.insert(Var::from("k"), Var::Int(1)).unwrap();

        assert_eq!(map.remove(&Var::from("k")), Some(Var::Int(1)));
        assert_eq!(map.remove(&Var::from("k")), None);
        assert!(map.is_empty());
    }
}
