//! Intrusive-style red-black tree, the shared ordering engine behind every
//! ordered associative container (`OrderedMap`, `OrderedSet`, `Multimap`,
//! `Multiset`) exposed from [`map`].
//!
//! Nodes live in an arena (see [`arena`]) and are addressed by
//! [`arena::NodeHandle`] rather than raw pointers, per the redesign this
//! engine takes instead of the cyclic parent/child pointers a hosted C++
//! implementation would use.

pub mod arena;
pub mod map;

use alloc::vec::Vec;
use arena::{Arena, Color, Node, NodeHandle};

use crate::error::AllocError;

/// A red-black tree ordered by `Cmp::cmp(a, b)` meaning "a precedes b".
///
/// `multi` selects the duplicate-key policy at construction: `false`
/// rejects an equivalent key on insert (`unique`), `true` accepts it,
/// inserted after any existing equivalents in in-order position (`multi`).
pub struct RbTree<K, V, Cmp> {
    arena: Arena<K, V>,
    root: Option<NodeHandle>,
    len: usize,
    cmp: Cmp,
    multi: bool,
}

impl<K, V, Cmp> RbTree<K, V, Cmp>
where
    Cmp: Fn(&K, &K) -> bool,
{
    pub const fn new(cmp: Cmp, multi: bool) -> Self {
        Self {
            arena: Arena::new(),
            root: None,
            len: 0,
            cmp,
            multi,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.arena.clear();
        self.root = None;
        self.len = 0;
    }

    /// O(1): swaps roots, lengths, and the comparator is left untouched
    /// (both trees keep their own `Cmp`). Arenas are swapped wholesale, so
    /// every existing handle is re-homed to the other tree transparently.
    pub fn swap(&mut self, other: &mut Self) {
        core::mem::swap(&mut self.arena, &mut other.arena);
        core::mem::swap(&mut self.root, &mut other.root);
        core::mem::swap(&mut self.len, &mut other.len);
        core::mem::swap(&mut self.multi, &mut other.multi);
    }

    pub fn begin(&self) -> Option<NodeHandle> {
        self.root.map(|r| self.minimum(r))
    }

    /// Mirrors `--end()`: the maximum element, or `None` if the tree is empty.
    pub fn rbegin(&self) -> Option<NodeHandle> {
        self.root.map(|r| self.maximum(r))
    }

    pub fn key(&self, h: NodeHandle) -> &K {
        &self.arena.get(h).key
    }

    pub fn value(&self, h: NodeHandle) -> Option<&V> {
        self.arena.get(h).value.as_ref()
    }

    pub fn value_mut(&mut self, h: NodeHandle) -> Option<&mut V> {
        self.arena.get_mut(h).value.as_mut()
    }

    pub fn set_value(&mut self, h: NodeHandle, value: V) {
        self.arena.get_mut(h).value = Some(value);
    }

    /// In-order successor, or `None` if `h` is the maximum element.
    pub fn next(&self, h: NodeHandle) -> Option<NodeHandle> {
        let node = self.arena.get(h);
        if let Some(right) = node.right {
            return Some(self.minimum(right));
        }
        let mut cur = h;
        let mut parent = node.parent;
        while let Some(p) = parent {
            if self.arena.get(p).left == Some(cur) {
                return Some(p);
            }
            cur = p;
            parent = self.arena.get(p).parent;
        }
        None
    }

    /// In-order predecessor. Passing `None` (the end sentinel) yields the
    /// maximum element, matching `--end()`.
    pub fn prev(&self, h: Option<NodeHandle>) -> Option<NodeHandle> {
        let Some(h) = h else {
            return self.rbegin();
        };
        let node = self.arena.get(h);
        if let Some(left) = node.left {
            return Some(self.maximum(left));
        }
        let mut cur = h;
        let mut parent = node.parent;
        while let Some(p) = parent {
            if self.arena.get(p).right == Some(cur) {
                return Some(p);
            }
            cur = p;
            parent = self.arena.get(p).parent;
        }
        None
    }

    fn minimum(&self, mut h: NodeHandle) -> NodeHandle {
        while let Some(l) = self.arena.get(h).left {
            h = l;
        }
        h
    }

    fn maximum(&self, mut h: NodeHandle) -> NodeHandle {
        while let Some(r) = self.arena.get(h).right {
            h = r;
        }
        h
    }

    pub fn find(&self, key: &K) -> Option<NodeHandle> {
        let mut cur = self.root;
        while let Some(h) = cur {
            let node = self.arena.get(h);
            if (self.cmp)(key, &node.key) {
                cur = node.left;
            } else if (self.cmp)(&node.key, key) {
                cur = node.right;
            } else {
                return Some(h);
            }
        }
        None
    }

    pub fn count(&self, key: &K) -> usize {
        let (mut lo, hi) = (self.lower_bound(key), self.upper_bound(key));
        let mut n = 0;
        while lo != hi {
            n += 1;
            lo = match lo {
                Some(h) => self.next(h),
                None => break,
            };
        }
        n
    }

    /// First element not less than `key`.
    pub fn lower_bound(&self, key: &K) -> Option<NodeHandle> {
        let mut cur = self.root;
        let mut result = None;
        while let Some(h) = cur {
            let node = self.arena.get(h);
            if !(self.cmp)(&node.key, key) {
                result = Some(h);
                cur = node.left;
            } else {
                cur = node.right;
            }
        }
        result
    }

    /// First element strictly greater than `key`.
    pub fn upper_bound(&self, key: &K) -> Option<NodeHandle> {
        let mut cur = self.root;
        let mut result = None;
        while let Some(h) = cur {
            let node = self.arena.get(h);
            if (self.cmp)(key, &node.key) {
                result = Some(h);
                cur = node.left;
            } else {
                cur = node.right;
            }
        }
        result
    }

    pub fn equal_range(&self, key: &K) -> (Option<NodeHandle>, Option<NodeHandle>) {
        (self.lower_bound(key), self.upper_bound(key))
    }

    /// Inserts `key`/`value`. For `unique` trees, returns `(handle, false)`
    /// and leaves the tree unchanged if an equivalent key already exists.
    ///
    /// Allocation failure is treated as fatal here; use
    /// [`try_insert`](Self::try_insert) to propagate it as an
    /// [`AllocError`] instead.
    pub fn insert(&mut self, key: K, value: Option<V>) -> (NodeHandle, bool) {
        self.try_insert(key, value)
            .unwrap_or_else(|_| panic!("rbtree allocation failed"))
    }

    /// Same contract as [`insert`](Self::insert), but surfaces allocator
    /// exhaustion as `Err(AllocError)` instead of aborting. No partial
    /// mutation is visible on the error path: the tree is left exactly as
    /// it was before the call.
    pub fn try_insert(&mut self, key: K, value: Option<V>) -> Result<(NodeHandle, bool), AllocError> {
        let mut parent = None;
        let mut cur = self.root;
        let mut go_left = true;

        while let Some(h) = cur {
            let node_key_precedes_new = (self.cmp)(&self.arena.get(h).key, &key);
            let new_precedes_node_key = (self.cmp)(&key, &self.arena.get(h).key);

            if !self.multi && !node_key_precedes_new && !new_precedes_node_key {
                return Ok((h, false));
            }

            parent = Some(h);
            if new_precedes_node_key {
                go_left = true;
                cur = self.arena.get(h).left;
            } else {
                go_left = false;
                cur = self.arena.get(h).right;
            }
        }

        let new_handle = self.arena.try_alloc(Node {
            key,
            value,
            color: Color::Red,
            left: None,
            right: None,
            parent,
        })?;

        match parent {
            None => self.root = Some(new_handle),
            Some(p) => {
                if go_left {
                    self.arena.get_mut(p).left = Some(new_handle);
                } else {
                    self.arena.get_mut(p).right = Some(new_handle);
                }
            }
        }

        self.len += 1;
        self.insert_fixup(new_handle);
        Ok((new_handle, true))
    }

    /// Insert with a positional hint. The hint is honored only when it
    /// names the immediate predecessor or successor of the new key;
    /// otherwise this falls back to the unhinted insertion path (still
    /// correct, just without the hinted O(1) amortised benefit).
    pub fn insert_hint(&mut self, hint: Option<NodeHandle>, key: K, value: Option<V>) -> (NodeHandle, bool) {
        if let Some(h) = hint {
            let hint_precedes_new = (self.cmp)(self.key(h), &key);
            let new_precedes_hint = (self.cmp)(&key, self.key(h));

            if hint_precedes_new {
                let strictly_adjacent = match self.next(h) {
                    None => true,
                    Some(s) => (self.cmp)(&key, self.key(s)),
                };
                if strictly_adjacent {
                    return self.splice_as_successor(h, key, value);
                }
            } else if new_precedes_hint {
                let strictly_adjacent = match self.prev(Some(h)) {
                    None => true,
                    Some(p) => (self.cmp)(self.key(p), &key),
                };
                if strictly_adjacent {
                    return self.splice_as_predecessor(h, key, value);
                }
            }
        }
        self.insert(key, value)
    }

    /// Splices a new node as `h`'s in-order successor: `h`'s right child if
    /// it has none, otherwise the left slot of the minimum of `h`'s right
    /// subtree (which, being the minimum, has none). Caller guarantees
    /// `key` belongs strictly between `h` and whatever follows it.
    fn splice_as_successor(&mut self, h: NodeHandle, key: K, value: Option<V>) -> (NodeHandle, bool) {
        let on_left = self.right(h).is_some();
        let parent = match self.right(h) {
            Some(r) => self.minimum(r),
            None => h,
        };
        self.splice_child(parent, on_left, key, value)
    }

    /// Mirrors [`splice_as_successor`](Self::splice_as_successor): splices
    /// a new node as `h`'s in-order predecessor.
    fn splice_as_predecessor(&mut self, h: NodeHandle, key: K, value: Option<V>) -> (NodeHandle, bool) {
        let on_left = self.left(h).is_none();
        let parent = match self.left(h) {
            Some(l) => self.maximum(l),
            None => h,
        };
        self.splice_child(parent, on_left, key, value)
    }

    fn splice_child(&mut self, parent: NodeHandle, on_left: bool, key: K, value: Option<V>) -> (NodeHandle, bool) {
        let new_handle = self.arena.alloc(Node {
            key,
            value,
            color: Color::Red,
            left: None,
            right: None,
            parent: Some(parent),
        });
        if on_left {
            self.arena.get_mut(parent).left = Some(new_handle);
        } else {
            self.arena.get_mut(parent).right = Some(new_handle);
        }
        self.len += 1;
        self.insert_fixup(new_handle);
        (new_handle, true)
    }

    fn color(&self, h: Option<NodeHandle>) -> Color {
        h.map(|h| self.arena.get(h).color).unwrap_or(Color::Black)
    }

    fn set_color(&mut self, h: Option<NodeHandle>, color: Color) {
        if let Some(h) = h {
            self.arena.get_mut(h).color = color;
        }
    }

    fn left(&self, h: NodeHandle) -> Option<NodeHandle> {
        self.arena.get(h).left
    }

    fn right(&self, h: NodeHandle) -> Option<NodeHandle> {
        self.arena.get(h).right
    }

    fn parent_of(&self, h: NodeHandle) -> Option<NodeHandle> {
        self.arena.get(h).parent
    }

    fn rotate_left(&mut self, x: NodeHandle) {
        let y = self.right(x).expect("rotate_left requires a right child");
        let y_left = self.left(y);
        self.arena.get_mut(x).right = y_left;
        if let Some(yl) = y_left {
            self.arena.get_mut(yl).parent = Some(x);
        }
        let x_parent = self.parent_of(x);
        self.arena.get_mut(y).parent = x_parent;
        match x_parent {
            None => self.root = Some(y),
            Some(p) => {
                if self.left(p) == Some(x) {
                    self.arena.get_mut(p).left = Some(y);
                } else {
                    self.arena.get_mut(p).right = Some(y);
                }
            }
        }
        self.arena.get_mut(y).left = Some(x);
        self.arena.get_mut(x).parent = Some(y);
    }

    fn rotate_right(&mut self, x: NodeHandle) {
        let y = self.left(x).expect("rotate_right requires a left child");
        let y_right = self.right(y);
        self.arena.get_mut(x).left = y_right;
        if let Some(yr) = y_right {
            self.arena.get_mut(yr).parent = Some(x);
        }
        let x_parent = self.parent_of(x);
        self.arena.get_mut(y).parent = x_parent;
        match x_parent {
            None => self.root = Some(y),
            Some(p) => {
                if self.right(p) == Some(x) {
                    self.arena.get_mut(p).right = Some(y);
                } else {
                    self.arena.get_mut(p).left = Some(y);
                }
            }
        }
        self.arena.get_mut(y).right = Some(x);
        self.arena.get_mut(x).parent = Some(y);
    }

    fn insert_fixup(&mut self, mut z: NodeHandle) {
        while let Some(parent) = self.parent_of(z) {
            if self.color(Some(parent)) == Color::Black {
                break;
            }
            // parent is red, so it has a parent (root is always black).
            let grandparent = self.parent_of(parent).expect("red node must have a parent");
            if Some(parent) == self.left(grandparent) {
                let uncle = self.right(grandparent);
                if self.color(uncle) == Color::Red {
                    self.set_color(Some(parent), Color::Black);
                    self.set_color(uncle, Color::Black);
                    self.set_color(Some(grandparent), Color::Red);
                    z = grandparent;
                } else {
                    if Some(z) == self.right(parent) {
                        z = parent;
                        self.rotate_left(z);
                    }
                    let parent = self.parent_of(z).unwrap();
                    let grandparent = self.parent_of(parent).unwrap();
                    self.set_color(Some(parent), Color::Black);
                    self.set_color(Some(grandparent), Color::Red);
                    self.rotate_right(grandparent);
                }
            } else {
                let uncle = self.left(grandparent);
                if self.color(uncle) == Color::Red {
                    self.set_color(Some(parent), Color::Black);
                    self.set_color(uncle, Color::Black);
                    self.set_color(Some(grandparent), Color::Red);
                    z = grandparent;
                } else {
                    if Some(z) == self.left(parent) {
                        z = parent;
                        self.rotate_right(z);
                    }
                    let parent = self.parent_of(z).unwrap();
                    let grandparent = self.parent_of(parent).unwrap();
                    self.set_color(Some(parent), Color::Black);
                    self.set_color(Some(grandparent), Color::Red);
                    self.rotate_left(grandparent);
                }
            }
        }
        self.set_color(self.root, Color::Black);
    }

    fn transplant(&mut self, u: NodeHandle, v: Option<NodeHandle>) {
        let u_parent = self.parent_of(u);
        match u_parent {
            None => self.root = v,
            Some(p) => {
                if self.left(p) == Some(u) {
                    self.arena.get_mut(p).left = v;
                } else {
                    self.arena.get_mut(p).right = v;
                }
            }
        }
        if let Some(v) = v {
            self.arena.get_mut(v).parent = u_parent;
        }
    }

    /// Removes the node named by `h`, returning the handle that was its
    /// in-order successor before removal (the "next iterator" the public
    /// contract promises), or `None` if `h` named the maximum element.
    ///
    /// `h` itself must not be used again: its arena slot is freed. Every
    /// other handle into this tree remains valid and keeps pointing at the
    /// same key/value it did before the call.
    pub fn erase(&mut self, h: NodeHandle) -> Option<NodeHandle> {
        let next = self.next(h);

        let original_color;
        let fixup_info; // (x, x_parent) to rebalance from, if original color was black

        let node_left = self.left(h);
        let node_right = self.right(h);

        if node_left.is_none() {
            original_color = self.color(Some(h));
            let x = node_right;
            let x_parent = self.parent_of(h);
            self.transplant(h, x);
            fixup_info = (x, x_parent);
        } else if node_right.is_none() {
            original_color = self.color(Some(h));
            let x = node_left;
            let x_parent = self.parent_of(h);
            self.transplant(h, x);
            fixup_info = (x, x_parent);
        } else {
            let y = self.minimum(node_right.unwrap());
            original_color = self.color(Some(y));
            let x = self.right(y);

            if self.parent_of(y) == Some(h) {
                let x_parent = Some(y);
                if let Some(x) = x {
                    self.arena.get_mut(x).parent = Some(y);
                }
                fixup_info = (x, x_parent);
            } else {
                let y_parent = self.parent_of(y).unwrap();
                self.transplant(y, x);
                self.arena.get_mut(y).right = node_right;
                self.arena.get_mut(node_right.unwrap()).parent = Some(y);
                fixup_info = (x, Some(y_parent));
            }

            self.transplant(h, Some(y));
            self.arena.get_mut(y).left = node_left;
            self.arena.get_mut(node_left.unwrap()).parent = Some(y);
            self.set_color(Some(y), self.color(Some(h)));
        }

        self.arena.free(h);
        self.len -= 1;

        if original_color == Color::Black {
            self.erase_fixup(fixup_info.0, fixup_info.1);
        }

        next
    }

    pub fn erase_key(&mut self, key: &K) -> usize {
        let mut removed = 0;
        // `find` returns whichever equal node the root-to-leaf descent hits
        // first, not the in-order-first one, so a single forward walk from
        // there can miss equivalents in an unvisited subtree. Re-finding
        // after every erase guarantees every remaining equivalent is seen.
        while let Some(h) = self.find(key) {
            self.erase(h);
            removed += 1;
        }
        removed
    }

    fn erase_fixup(&mut self, mut x: Option<NodeHandle>, mut x_parent: Option<NodeHandle>) {
        while x != self.root && self.color(x) == Color::Black {
            let Some(parent) = x_parent else { break };

            if x == self.left(parent) {
                let mut w = self.right(parent).expect("sibling must exist for a black-height deficit");
                if self.color(Some(w)) == Color::Red {
                    self.set_color(Some(w), Color::Black);
                    self.set_color(Some(parent), Color::Red);
                    self.rotate_left(parent);
                    w = self.right(parent).expect("sibling must exist");
                }
                if self.color(self.left(w)) == Color::Black && self.color(self.right(w)) == Color::Black {
                    self.set_color(Some(w), Color::Red);
                    x = Some(parent);
                    x_parent = self.parent_of(parent);
                } else {
                    if self.color(self.right(w)) == Color::Black {
                        self.set_color(self.left(w), Color::Black);
                        self.set_color(Some(w), Color::Red);
                        self.rotate_right(w);
                        w = self.right(parent).expect("sibling must exist");
                    }
                    self.set_color(Some(w), self.color(Some(parent)));
                    self.set_color(Some(parent), Color::Black);
                    self.set_color(self.right(w), Color::Black);
                    self.rotate_left(parent);
                    x = self.root;
                    x_parent = None;
                }
            } else {
                let mut w = self.left(parent).expect("sibling must exist for a black-height deficit");
                if self.color(Some(w)) == Color::Red {
                    self.set_color(Some(w), Color::Black);
                    self.set_color(Some(parent), Color::Red);
                    self.rotate_right(parent);
                    w = self.left(parent).expect("sibling must exist");
                }
                if self.color(self.right(w)) == Color::Black && self.color(self.left(w)) == Color::Black {
                    self.set_color(Some(w), Color::Red);
                    x = Some(parent);
                    x_parent = self.parent_of(parent);
                } else {
                    if self.color(self.left(w)) == Color::Black {
                        self.set_color(self.right(w), Color::Black);
                        self.set_color(Some(w), Color::Red);
                        self.rotate_left(w);
                        w = self.left(parent).expect("sibling must exist");
                    }
                    self.set_color(Some(w), self.color(Some(parent)));
                    self.set_color(Some(parent), Color::Black);
                    self.set_color(self.left(w), Color::Black);
                    self.rotate_right(parent);
                    x = self.root;
                    x_parent = None;
                }
            }
        }
        self.set_color(x, Color::Black);
    }

    /// Verifies all four red-black invariants plus in-order sortedness.
    /// Returns the black-height if every invariant holds, zero otherwise.
    pub fn check(&self) -> u32 {
        if self.color(self.root) != Color::Black {
            return 0;
        }

        fn walk<K, V, Cmp>(
            tree: &RbTree<K, V, Cmp>,
            h: Option<NodeHandle>,
            last_key: &mut Option<*const K>,
        ) -> Option<u32>
        where
            Cmp: Fn(&K, &K) -> bool,
        {
            let Some(h) = h else { return Some(1) };
            let node = &tree.arena.get(h);

            if node.color == Color::Red {
                if tree.color(node.left) == Color::Red || tree.color(node.right) == Color::Red {
                    return None;
                }
            }

            let left_bh = walk(tree, node.left, last_key)?;

            if let Some(prev) = *last_key {
                // SAFETY: prev was the key of the previously-visited node,
                // which is still alive (we never mutate during check()).
                let prev_key = unsafe { &*prev };
                if (tree.cmp)(&node.key, prev_key) {
                    return None;
                }
            }
            *last_key = Some(&node.key as *const K);

            let right_bh = walk(tree, node.right, last_key)?;

            if left_bh != right_bh {
                return None;
            }

            let add = if node.color == Color::Black { 1 } else { 0 };
            Some(left_bh + add)
        }

        let mut last_key: Option<*const K> = None;
        walk(self, self.root, &mut last_key).unwrap_or(0)
    }

    /// In-order key/value pairs, for tests and diagnostics.
    pub fn iter(&self) -> Vec<NodeHandle> {
        let mut out = Vec::with_capacity(self.len);
        let mut cur = self.begin();
        while let Some(h) = cur {
            out.push(h);
            cur = self.next(h);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn less(a: &i32, b: &i32) -> bool {
        a < b
    }

    /// Deterministic xorshift so the stress test is reproducible without
    /// pulling in a `rand` dependency just for this.
    struct Xorshift(u32);
    impl Xorshift {
        fn next(&mut self) -> u32 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 17;
            self.0 ^= self.0 << 5;
            self.0
        }
    }

    #[test]
    fn stress_insert_and_erase_keep_invariants() {
        let mut tree = RbTree::<i32, (), _>::new(less, false);
        let mut rng = Xorshift(0x1234_5678);
        let mut present = vec![false; 1000];

        for _ in 0..1500 {
            let key = (rng.next() % 1000) as i32;
            if present[key as usize] {
                assert!(tree.erase_key(&key) > 0 || !tree.multi);
                present[key as usize] = false;
            } else {
                let (_, inserted) = tree.insert(key, None);
                assert!(inserted);
                present[key as usize] = true;
            }
            assert_ne!(tree.check(), 0, "invariants broken after mutating key {key}");
        }

        let expected_len = present.iter().filter(|p| **p).count();
        assert_eq!(tree.len(), expected_len);
    }

    #[test]
    fn try_insert_succeeds_and_behaves_like_insert() {
        let mut tree = RbTree::<i32, &str, _>::new(less, false);

        let (h1, inserted1) = tree.try_insert(1, Some("a")).expect("first insert must succeed");
        assert!(inserted1);
        assert_eq!(tree.value(h1), Some(&"a"));

        let (h2, inserted2) = tree.try_insert(1, Some("b")).expect("duplicate lookup must succeed");
        assert!(!inserted2, "unique tree must reject the duplicate key");
        assert_eq!(h1, h2);
        assert_ne!(tree.check(), 0, "invariants must hold after try_insert");
    }

    #[test]
    fn iterator_order_survives_interleaved_insert_and_erase() {
        let mut tree = RbTree::<i32, (), _>::new(less, false);
        for k in [1, 3, 5] {
            tree.insert(k, None);
        }
        for k in [2, 4, 6] {
            tree.insert(k, None);
        }

        let five = tree.find(&5).unwrap();
        tree.erase(five);

        let order: vec::Vec<i32> = tree.iter().iter().map(|h| *tree.key(*h)).collect();
        assert_eq!(order, vec![1, 2, 3, 4, 6]);
        assert_ne!(tree.check(), 0);
    }
}
