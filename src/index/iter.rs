//! Index iterators
//!
//! In-order traversal over the arena using parent links, so iteration needs
//! no auxiliary stack and can be restarted simply by calling `iter()` again.

use super::rbtree::{NodeId, RbTree, NIL};

/// Iterator over `(key, value)` pairs in ascending key order
pub struct Iter<'a, V> {
    tree: &'a RbTree<V>,
    next: NodeId,
    remaining: usize,
}

impl<'a, V> Iter<'a, V> {
    pub(super) fn new(tree: &'a RbTree<V>) -> Self {
        let next = match tree.root() {
            NIL => NIL,
            root => tree.minimum(root),
        };
        Self {
            tree,
            next,
            remaining: tree.len(),
        }
    }
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = (&'a [u8], &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next == NIL {
            return None;
        }
        let current = self.next;
        self.next = self.tree.successor(current);
        self.remaining -= 1;
        Some(self.tree.key_value(current))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<V> ExactSizeIterator for Iter<'_, V> {}

impl<V> std::iter::FusedIterator for Iter<'_, V> {}

/// Iterator over keys in ascending order
pub struct Keys<'a, V> {
    inner: Iter<'a, V>,
}

impl<'a, V> Keys<'a, V> {
    pub(super) fn new(inner: Iter<'a, V>) -> Self {
        Self { inner }
    }
}

impl<'a, V> Iterator for Keys<'a, V> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(key, _)| key)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<V> ExactSizeIterator for Keys<'_, V> {}
