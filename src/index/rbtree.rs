//! Red-black tree implementation
//!
//! Arena-backed tree with a shared `NIL` sentinel.

use std::cmp::Ordering;
use std::fmt;
use std::mem;

use super::iter::{Iter, Keys};

/// Slot index into the node arena
pub(super) type NodeId = usize;

/// The shared sentinel leaf. Always black.
pub(super) const NIL: NodeId = 0;

/// Node color
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Red,
    Black,
}

struct Entry<V> {
    key: Vec<u8>,
    value: V,
}

struct Node<V> {
    color: Color,
    parent: NodeId,
    left: NodeId,
    right: NodeId,
    /// None for the sentinel and for freed slots
    entry: Option<Entry<V>>,
}

impl<V> Node<V> {
    fn vacant() -> Self {
        Self {
            color: Color::Black,
            parent: NIL,
            left: NIL,
            right: NIL,
            entry: None,
        }
    }
}

/// A broken red-black or ordering invariant, reported by [`RbTree::validate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    RedRoot,
    RedRedEdge { key: Vec<u8> },
    BlackHeightMismatch { key: Vec<u8>, left: usize, right: usize },
    OutOfOrder { key: Vec<u8> },
    BrokenParentLink { key: Vec<u8> },
    LengthMismatch { counted: usize, recorded: usize },
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RedRoot => write!(f, "root is red"),
            Self::RedRedEdge { key } => write!(f, "red node {:?} has a red child", key),
            Self::BlackHeightMismatch { key, left, right } => write!(
                f,
                "black height differs under {:?}: left {}, right {}",
                key, left, right
            ),
            Self::OutOfOrder { key } => write!(f, "key {:?} is out of order", key),
            Self::BrokenParentLink { key } => write!(f, "parent link of {:?} is wrong", key),
            Self::LengthMismatch { counted, recorded } => write!(
                f,
                "tree holds {} nodes but records {}",
                counted, recorded
            ),
        }
    }
}

impl std::error::Error for InvariantViolation {}

/// Ordered map from byte-string keys to `V`
pub struct RbTree<V> {
    nodes: Vec<Node<V>>,
    free: Vec<NodeId>,
    root: NodeId,
    len: usize,
}

impl<V> RbTree<V> {
    /// Create an empty tree
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::vacant()],
            free: Vec::new(),
            root: NIL,
            len: 0,
        }
    }

    /// Number of keys in the tree
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Drop every entry and release the arena
    pub fn clear(&mut self) {
        self.nodes.truncate(1);
        self.nodes[NIL] = Node::vacant();
        self.free.clear();
        self.root = NIL;
        self.len = 0;
    }

    // =========================================================================
    // Point Operations
    // =========================================================================

    /// Insert or overwrite a key, returning the previous value
    pub fn insert(&mut self, key: Vec<u8>, value: V) -> Option<V> {
        let mut parent = NIL;
        let mut cursor = self.root;
        let mut went_left = false;

        while cursor != NIL {
            parent = cursor;
            match key.as_slice().cmp(self.key(cursor)) {
                Ordering::Less => {
                    cursor = self.nodes[cursor].left;
                    went_left = true;
                }
                Ordering::Greater => {
                    cursor = self.nodes[cursor].right;
                    went_left = false;
                }
                Ordering::Equal => {
                    let entry = self.entry_mut(cursor);
                    return Some(mem::replace(&mut entry.value, value));
                }
            }
        }

        let node = self.alloc(key, value);
        self.nodes[node].parent = parent;
        if parent == NIL {
            self.root = node;
        } else if went_left {
            self.nodes[parent].left = node;
        } else {
            self.nodes[parent].right = node;
        }

        self.insert_fixup(node);
        self.len += 1;
        None
    }

    /// Look up a key
    pub fn get(&self, key: &[u8]) -> Option<&V> {
        match self.find(key) {
            NIL => None,
            node => Some(&self.entry(node).value),
        }
    }

    /// Look up a key for in-place modification
    ///
    /// Only the value is reachable, so the tree shape cannot change.
    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut V> {
        match self.find(key) {
            NIL => None,
            node => Some(&mut self.entry_mut(node).value),
        }
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.find(key) != NIL
    }

    /// Remove a key, returning its value
    pub fn remove(&mut self, key: &[u8]) -> Option<V> {
        let node = self.find(key);
        if node == NIL {
            return None;
        }
        self.delete(node);
        self.len -= 1;
        self.release(node).map(|entry| entry.value)
    }

    // =========================================================================
    // Iteration
    // =========================================================================

    /// Iterate over `(key, value)` pairs in ascending key order
    pub fn iter(&self) -> Iter<'_, V> {
        Iter::new(self)
    }

    /// Iterate over keys in ascending order
    pub fn keys(&self) -> Keys<'_, V> {
        Keys::new(self.iter())
    }

    /// Smallest key and its value
    pub fn first(&self) -> Option<(&[u8], &V)> {
        match self.root {
            NIL => None,
            root => {
                let node = self.minimum(root);
                let entry = self.entry(node);
                Some((entry.key.as_slice(), &entry.value))
            }
        }
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Check every red-black and ordering invariant
    ///
    /// Returns the black height of the tree. O(n); meant for tests and
    /// debug assertions.
    pub fn validate(&self) -> Result<usize, InvariantViolation> {
        if self.nodes[self.root].color == Color::Red {
            return Err(InvariantViolation::RedRoot);
        }
        let mut counted = 0;
        let height = self.validate_subtree(self.root, NIL, None, None, &mut counted)?;
        if counted != self.len {
            return Err(InvariantViolation::LengthMismatch {
                counted,
                recorded: self.len,
            });
        }
        Ok(height)
    }

    fn validate_subtree(
        &self,
        node: NodeId,
        parent: NodeId,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        counted: &mut usize,
    ) -> Result<usize, InvariantViolation> {
        if node == NIL {
            return Ok(1);
        }
        *counted += 1;

        let n = &self.nodes[node];
        let key = self.key(node);
        if n.parent != parent {
            return Err(InvariantViolation::BrokenParentLink { key: key.to_vec() });
        }
        if lower.map_or(false, |low| key <= low) || upper.map_or(false, |up| key >= up) {
            return Err(InvariantViolation::OutOfOrder { key: key.to_vec() });
        }
        if n.color == Color::Red
            && (self.nodes[n.left].color == Color::Red || self.nodes[n.right].color == Color::Red)
        {
            return Err(InvariantViolation::RedRedEdge { key: key.to_vec() });
        }

        let left = self.validate_subtree(n.left, node, lower, Some(key), counted)?;
        let right = self.validate_subtree(n.right, node, Some(key), upper, counted)?;
        if left != right {
            return Err(InvariantViolation::BlackHeightMismatch {
                key: key.to_vec(),
                left,
                right,
            });
        }

        Ok(left + usize::from(n.color == Color::Black))
    }

    // =========================================================================
    // Arena Helpers
    // =========================================================================

    fn alloc(&mut self, key: Vec<u8>, value: V) -> NodeId {
        let node = Node {
            color: Color::Red,
            parent: NIL,
            left: NIL,
            right: NIL,
            entry: Some(Entry { key, value }),
        };
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = node;
                slot
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn release(&mut self, node: NodeId) -> Option<Entry<V>> {
        let entry = mem::replace(&mut self.nodes[node], Node::vacant()).entry;
        self.free.push(node);
        entry
    }

    fn find(&self, key: &[u8]) -> NodeId {
        let mut cursor = self.root;
        while cursor != NIL {
            match key.cmp(self.key(cursor)) {
                Ordering::Less => cursor = self.nodes[cursor].left,
                Ordering::Greater => cursor = self.nodes[cursor].right,
                Ordering::Equal => return cursor,
            }
        }
        NIL
    }

    fn entry(&self, node: NodeId) -> &Entry<V> {
        match &self.nodes[node].entry {
            Some(entry) => entry,
            None => unreachable!("linked node {} has no entry", node),
        }
    }

    fn entry_mut(&mut self, node: NodeId) -> &mut Entry<V> {
        match &mut self.nodes[node].entry {
            Some(entry) => entry,
            None => unreachable!("linked node {} has no entry", node),
        }
    }

    pub(super) fn key(&self, node: NodeId) -> &[u8] {
        &self.entry(node).key
    }

    pub(super) fn key_value(&self, node: NodeId) -> (&[u8], &V) {
        let entry = self.entry(node);
        (entry.key.as_slice(), &entry.value)
    }

    pub(super) fn root(&self) -> NodeId {
        self.root
    }

    pub(super) fn minimum(&self, mut node: NodeId) -> NodeId {
        while self.nodes[node].left != NIL {
            node = self.nodes[node].left;
        }
        node
    }

    /// In-order successor, or NIL after the last node
    pub(super) fn successor(&self, mut node: NodeId) -> NodeId {
        if self.nodes[node].right != NIL {
            return self.minimum(self.nodes[node].right);
        }
        let mut parent = self.nodes[node].parent;
        while parent != NIL && node == self.nodes[parent].right {
            node = parent;
            parent = self.nodes[parent].parent;
        }
        parent
    }

    fn color(&self, node: NodeId) -> Color {
        self.nodes[node].color
    }

    fn set_color(&mut self, node: NodeId, color: Color) {
        self.nodes[node].color = color;
    }

    fn parent(&self, node: NodeId) -> NodeId {
        self.nodes[node].parent
    }

    fn left(&self, node: NodeId) -> NodeId {
        self.nodes[node].left
    }

    fn right(&self, node: NodeId) -> NodeId {
        self.nodes[node].right
    }

    // =========================================================================
    // Rebalancing
    // =========================================================================

    fn rotate_left(&mut self, x: NodeId) {
        let y = self.right(x);
        let y_left = self.left(y);

        self.nodes[x].right = y_left;
        if y_left != NIL {
            self.nodes[y_left].parent = x;
        }

        let x_parent = self.parent(x);
        self.nodes[y].parent = x_parent;
        if x_parent == NIL {
            self.root = y;
        } else if x == self.left(x_parent) {
            self.nodes[x_parent].left = y;
        } else {
            self.nodes[x_parent].right = y;
        }

        self.nodes[y].left = x;
        self.nodes[x].parent = y;
    }

    fn rotate_right(&mut self, x: NodeId) {
        let y = self.left(x);
        let y_right = self.right(y);

        self.nodes[x].left = y_right;
        if y_right != NIL {
            self.nodes[y_right].parent = x;
        }

        let x_parent = self.parent(x);
        self.nodes[y].parent = x_parent;
        if x_parent == NIL {
            self.root = y;
        } else if x == self.right(x_parent) {
            self.nodes[x_parent].right = y;
        } else {
            self.nodes[x_parent].left = y;
        }

        self.nodes[y].right = x;
        self.nodes[x].parent = y;
    }

    fn insert_fixup(&mut self, mut z: NodeId) {
        while self.color(self.parent(z)) == Color::Red {
            let parent = self.parent(z);
            let grandparent = self.parent(parent);

            if parent == self.left(grandparent) {
                let uncle = self.right(grandparent);
                if self.color(uncle) == Color::Red {
                    self.set_color(parent, Color::Black);
                    self.set_color(uncle, Color::Black);
                    self.set_color(grandparent, Color::Red);
                    z = grandparent;
                } else {
                    if z == self.right(parent) {
                        z = parent;
                        self.rotate_left(z);
                    }
                    let parent = self.parent(z);
                    let grandparent = self.parent(parent);
                    self.set_color(parent, Color::Black);
                    self.set_color(grandparent, Color::Red);
                    self.rotate_right(grandparent);
                }
            } else {
                let uncle = self.left(grandparent);
                if self.color(uncle) == Color::Red {
                    self.set_color(parent, Color::Black);
                    self.set_color(uncle, Color::Black);
                    self.set_color(grandparent, Color::Red);
                    z = grandparent;
                } else {
                    if z == self.left(parent) {
                        z = parent;
                        self.rotate_right(z);
                    }
                    let parent = self.parent(z);
                    let grandparent = self.parent(parent);
                    self.set_color(parent, Color::Black);
                    self.set_color(grandparent, Color::Red);
                    self.rotate_left(grandparent);
                }
            }
        }
        let root = self.root;
        self.set_color(root, Color::Black);
    }

    /// Replace the subtree rooted at `u` with the one rooted at `v`
    ///
    /// Sets `v`'s parent even when `v` is NIL; the delete fixup reads it.
    fn transplant(&mut self, u: NodeId, v: NodeId) {
        let u_parent = self.parent(u);
        if u_parent == NIL {
            self.root = v;
        } else if u == self.left(u_parent) {
            self.nodes[u_parent].left = v;
        } else {
            self.nodes[u_parent].right = v;
        }
        self.nodes[v].parent = u_parent;
    }

    /// Unlink `z` from the tree and rebalance. The slot is not freed here.
    fn delete(&mut self, z: NodeId) {
        let mut removed_color = self.color(z);
        let x;

        if self.left(z) == NIL {
            x = self.right(z);
            self.transplant(z, x);
        } else if self.right(z) == NIL {
            x = self.left(z);
            self.transplant(z, x);
        } else {
            let y = self.minimum(self.right(z));
            removed_color = self.color(y);
            x = self.right(y);

            if self.parent(y) == z {
                self.nodes[x].parent = y;
            } else {
                self.transplant(y, x);
                let z_right = self.right(z);
                self.nodes[y].right = z_right;
                self.nodes[z_right].parent = y;
            }

            self.transplant(z, y);
            let z_left = self.left(z);
            self.nodes[y].left = z_left;
            self.nodes[z_left].parent = y;
            let z_color = self.color(z);
            self.set_color(y, z_color);
        }

        if removed_color == Color::Black {
            self.delete_fixup(x);
        }

        // The sentinel's parent is scratch space for the fixup only.
        self.nodes[NIL].parent = NIL;
        self.nodes[NIL].color = Color::Black;
    }

    fn delete_fixup(&mut self, mut x: NodeId) {
        while x != self.root && self.color(x) == Color::Black {
            let parent = self.parent(x);

            if x == self.left(parent) {
                let mut sibling = self.right(parent);
                if self.color(sibling) == Color::Red {
                    self.set_color(sibling, Color::Black);
                    self.set_color(parent, Color::Red);
                    self.rotate_left(parent);
                    sibling = self.right(self.parent(x));
                }

                if self.color(self.left(sibling)) == Color::Black
                    && self.color(self.right(sibling)) == Color::Black
                {
                    self.set_color(sibling, Color::Red);
                    x = self.parent(x);
                } else {
                    if self.color(self.right(sibling)) == Color::Black {
                        let nephew = self.left(sibling);
                        self.set_color(nephew, Color::Black);
                        self.set_color(sibling, Color::Red);
                        self.rotate_right(sibling);
                        sibling = self.right(self.parent(x));
                    }
                    let parent = self.parent(x);
                    let parent_color = self.color(parent);
                    self.set_color(sibling, parent_color);
                    self.set_color(parent, Color::Black);
                    let nephew = self.right(sibling);
                    self.set_color(nephew, Color::Black);
                    self.rotate_left(parent);
                    x = self.root;
                }
            } else {
                let mut sibling = self.left(parent);
                if self.color(sibling) == Color::Red {
                    self.set_color(sibling, Color::Black);
                    self.set_color(parent, Color::Red);
                    self.rotate_right(parent);
                    sibling = self.left(self.parent(x));
                }

                if self.color(self.right(sibling)) == Color::Black
                    && self.color(self.left(sibling)) == Color::Black
                {
                    self.set_color(sibling, Color::Red);
                    x = self.parent(x);
                } else {
                    if self.color(self.left(sibling)) == Color::Black {
                        let nephew = self.right(sibling);
                        self.set_color(nephew, Color::Black);
                        self.set_color(sibling, Color::Red);
                        self.rotate_left(sibling);
                        sibling = self.left(self.parent(x));
                    }
                    let parent = self.parent(x);
                    let parent_color = self.color(parent);
                    self.set_color(sibling, parent_color);
                    self.set_color(parent, Color::Black);
                    let nephew = self.left(sibling);
                    self.set_color(nephew, Color::Black);
                    self.rotate_right(parent);
                    x = self.root;
                }
            }
        }
        self.set_color(x, Color::Black);
    }
}

impl<V> Default for RbTree<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: fmt::Debug> fmt::Debug for RbTree<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<V> FromIterator<(Vec<u8>, V)> for RbTree<V> {
    fn from_iter<I: IntoIterator<Item = (Vec<u8>, V)>>(iter: I) -> Self {
        let mut tree = RbTree::new();
        for (key, value) in iter {
            tree.insert(key, value);
        }
        tree
    }
}

impl<V> Extend<(Vec<u8>, V)> for RbTree<V> {
    fn extend<I: IntoIterator<Item = (Vec<u8>, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.insert(key, value);
        }
    }
}

impl<'a, V> IntoIterator for &'a RbTree<V> {
    type Item = (&'a [u8], &'a V);
    type IntoIter = Iter<'a, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
