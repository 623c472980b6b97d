//! Ordered map/set/multimap/multiset built on [`super::RbTree`].

use core::ops::{Index, IndexMut};

use super::arena::NodeHandle;
use super::RbTree;
use crate::error::AllocError;

fn less<K: Ord>(a: &K, b: &K) -> bool {
    a < b
}

type OrdCmp<K> = fn(&K, &K) -> bool;

/// Ordered map with unique keys, backed by an intrusive red-black tree.
pub struct OrderedMap<K: Ord, V> {
    tree: RbTree<K, V, OrdCmp<K>>,
}

impl<K: Ord, V> OrderedMap<K, V> {
    pub const fn new() -> Self {
        Self {
            tree: RbTree::new(less::<K>, false),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn clear(&mut self) {
        self.tree.clear();
    }

    /// Returns `(handle, true)` if inserted, `(handle_to_existing, false)`
    /// if `key` was already present (the existing value is left unchanged).
    pub fn insert(&mut self, key: K, value: V) -> (NodeHandle, bool) {
        self.tree.insert(key, Some(value))
    }

    /// Same contract as [`insert`](Self::insert), but surfaces allocation
    /// failure as `Err(AllocError)` instead of panicking, e.g.
    /// `map.try_insert(k, v).map_err(|e| ...)`.
    pub fn try_insert(&mut self, key: K, value: V) -> Result<(NodeHandle, bool), AllocError> {
        self.tree.try_insert(key, Some(value))
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.tree.find(key).and_then(|h| self.tree.value(h))
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let h = self.tree.find(key)?;
        self.tree.value_mut(h)
    }

    pub fn remove(&mut self, key: &K) -> usize {
        self.tree.erase_key(key)
    }

    pub fn begin(&self) -> Option<NodeHandle> {
        self.tree.begin()
    }

    pub fn rbegin(&self) -> Option<NodeHandle> {
        self.tree.rbegin()
    }

    pub fn next(&self, h: NodeHandle) -> Option<NodeHandle> {
        self.tree.next(h)
    }

    pub fn erase(&mut self, h: NodeHandle) -> Option<NodeHandle> {
        self.tree.erase(h)
    }

    pub fn key(&self, h: NodeHandle) -> &K {
        self.tree.key(h)
    }

    pub fn value(&self, h: NodeHandle) -> &V {
        self.tree.value(h).expect("map node always carries a value")
    }

    pub fn check(&self) -> u32 {
        self.tree.check()
    }

    pub fn tree(&self) -> &RbTree<K, V, OrdCmp<K>> {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut RbTree<K, V, OrdCmp<K>> {
        &mut self.tree
    }
}

impl<K: Ord + Clone, V: Default> Index<K> for OrderedMap<K, V> {
    type Output = V;

    fn index(&self, key: K) -> &V {
        self.get(&key).expect("no entry found for key")
    }
}

impl<K: Ord + Clone, V: Default> IndexMut<K> for OrderedMap<K, V> {
    /// Default-constructs a value on first access, matching `std::map`'s
    /// `operator[]`.
    fn index_mut(&mut self, key: K) -> &mut V {
        if self.get(&key).is_none() {
            self.insert(key.clone(), V::default());
        }
        self.get_mut(&key).expect("just inserted")
    }
}

/// Ordered set with unique keys.
pub struct OrderedSet<K: Ord> {
    tree: RbTree<K, (), OrdCmp<K>>,
}

impl<K: Ord> OrderedSet<K> {
    pub const fn new() -> Self {
        Self {
            tree: RbTree::new(less::<K>, false),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn insert(&mut self, key: K) -> (NodeHandle, bool) {
        self.tree.insert(key, None)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.tree.find(key).is_some()
    }

    pub fn remove(&mut self, key: &K) -> usize {
        self.tree.erase_key(key)
    }

    pub fn begin(&self) -> Option<NodeHandle> {
        self.tree.begin()
    }

    pub fn next(&self, h: NodeHandle) -> Option<NodeHandle> {
        self.tree.next(h)
    }

    pub fn key(&self, h: NodeHandle) -> &K {
        self.tree.key(h)
    }

    pub fn check(&self) -> u32 {
        self.tree.check()
    }
}

/// Ordered map permitting duplicate keys, inserted after existing equals.
pub struct Multimap<K: Ord, V> {
    tree: RbTree<K, V, OrdCmp<K>>,
}

impl<K: Ord, V> Multimap<K, V> {
    pub const fn new() -> Self {
        Self {
            tree: RbTree::new(less::<K>, true),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn insert(&mut self, key: K, value: V) -> NodeHandle {
        self.tree.insert(key, Some(value)).0
    }

    pub fn erase_key(&mut self, key: &K) -> usize {
        self.tree.erase_key(key)
    }

    pub fn count(&self, key: &K) -> usize {
        self.tree.count(key)
    }

    pub fn equal_range(&self, key: &K) -> (Option<NodeHandle>, Option<NodeHandle>) {
        self.tree.equal_range(key)
    }

    pub fn begin(&self) -> Option<NodeHandle> {
        self.tree.begin()
    }

    pub fn next(&self, h: NodeHandle) -> Option<NodeHandle> {
        self.tree.next(h)
    }

    pub fn key(&self, h: NodeHandle) -> &K {
        self.tree.key(h)
    }

    pub fn value(&self, h: NodeHandle) -> &V {
        self.tree.value(h).expect("multimap node always carries a value")
    }

    pub fn check(&self) -> u32 {
        self.tree.check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn index_mut_default_inserts_in_key_order() {
        let mut m: OrderedMap<i32, char> = OrderedMap::new();
        m[10] = 'a';
        m[15] = 'b';
        m[5] = 'c';

        let mut cur = m.begin();
        let mut seen = vec::Vec::new();
        while let Some(h) = cur {
            seen.push((*m.key(h), *m.value(h)));
            cur = m.next(h);
        }
        assert_eq!(seen, vec![(5, 'c'), (10, 'a'), (15, 'b')]);
    }

    #[test]
    fn index_mut_leaves_existing_value_on_repeat_access() {
        let mut m: OrderedMap<i32, i32> = OrderedMap::new();
        m.insert(1, 100);
        assert_eq!(m[1], 100);
        m[1] += 1;
        assert_eq!(m[1], 101);
    }

    #[test]
    fn try_insert_reports_duplicates_without_allocating() {
        let mut m: OrderedMap<i32, char> = OrderedMap::new();
        let (h1, inserted1) = m.try_insert(1, 'a').expect("insert must succeed");
        assert!(inserted1);

        let (h2, inserted2) = m.try_insert(1, 'z').expect("duplicate lookup must succeed");
        assert!(!inserted2);
        assert_eq!(h1, h2);
        assert_eq!(m[1], 'a', "duplicate try_insert must not overwrite the existing value");
    }

    #[test]
    fn multiset_counts_duplicates_and_stays_balanced() {
        let mut s: Multiset<i32> = Multiset::new();
        for k in [1, 1, 2, 2, 2, 3] {
            s.insert(k);
        }
        assert_eq!(s.count(&2), 3);
        assert_eq!(s.len(), 6);
        assert_ne!(s.check(), 0);
    }
}

/// Ordered set permitting duplicate keys.
pub struct Multiset<K: Ord> {
    tree: RbTree<K, (), OrdCmp<K>>,
}

impl<K: Ord> Multiset<K> {
    pub const fn new() -> Self {
        Self {
            tree: RbTree::new(less::<K>, true),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn insert(&mut self, key: K) -> NodeHandle {
        self.tree.insert(key, None).0
    }

    pub fn erase_key(&mut self, key: &K) -> usize {
        self.tree.erase_key(key)
    }

    pub fn count(&self, key: &K) -> usize {
        self.tree.count(key)
    }

    pub fn begin(&self) -> Option<NodeHandle> {
        self.tree.begin()
    }

    pub fn next(&self, h: NodeHandle) -> Option<NodeHandle> {
        self.tree.next(h)
    }

    pub fn key(&self, h: NodeHandle) -> &K {
        self.tree.key(h)
    }

    pub fn check(&self) -> u32 {
        self.tree.check()
    }
}
