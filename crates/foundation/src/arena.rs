use std::collections::BTreeMap;

/// Keyed storage that remembers insertion order.
///
/// Lookups go through the key map; iteration follows the order in which keys
/// were first inserted, so "first remaining item" is well defined after
/// removals.
#[derive(Debug, Clone)]
pub struct Arena<K, T> {
    order: Vec<K>,
    items: BTreeMap<K, T>,
}

impl<K: Ord + Copy, T> Default for Arena<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Copy, T> Arena<K, T> {
    pub fn new() -> Self {
        Arena {
            order: Vec::new(),
            items: BTreeMap::new(),
        }
    }

    /// Insert or replace. A replaced key keeps its original position.
    pub fn insert(&mut self, key: K, v: T) -> Option<T> {
        let old = self.items.insert(key, v);
        if old.is_none() {
            self.order.push(key);
        }
        old
    }

    pub fn remove(&mut self, key: K) -> Option<T> {
        let v = self.items.remove(&key)?;
        self.order.retain(|k| *k != key);
        Some(v)
    }

    pub fn get(&self, key: K) -> Option<&T> {
        self.items.get(&key)
    }

    pub fn get_mut(&mut self, key: K) -> Option<&mut T> {
        self.items.get_mut(&key)
    }

    pub fn contains(&self, key: K) -> bool {
        self.items.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> &[K] {
        &self.order
    }

    pub fn first_key(&self) -> Option<K> {
        self.order.first().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, &T)> + '_ {
        self.order
            .iter()
            .filter_map(|k| self.items.get(k).map(|v| (*k, v)))
    }
}

#[cfg(test)]
mod tests {
    use super::Arena;

    #[test]
    fn iterates_in_insertion_order() {
        let mut arena = Arena::new();
        arena.insert(7, "a");
        arena.insert(2, "b");
        arena.insert(5, "c");
        let keys: Vec<_> = arena.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![7, 2, 5]);
    }

    #[test]
    fn replace_keeps_position_and_remove_updates_first() {
        let mut arena = Arena::new();
        arena.insert(1, 10);
        arena.insert(2, 20);
        assert_eq!(arena.insert(1, 11), Some(10));
        assert_eq!(arena.keys(), &[1, 2]);
        assert_eq!(arena.remove(1), Some(11));
        assert_eq!(arena.first_key(), Some(2));
        assert_eq!(arena.remove(1), None);
        assert_eq!(arena.len(), 1);
    }
}
