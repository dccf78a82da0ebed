//! Index Module
//!
//! In-memory ordered key index.
//!
//! ## Responsibilities
//! - Map each byte-string key to exactly one value
//! - O(log n) insert, lookup and remove
//! - Ordered iteration for snapshotting
//!
//! ## Data Structure Choice
//! A red-black tree stored in an arena:
//! - Nodes live in a `Vec` and link to each other by slot index
//! - Slot 0 is a shared black `NIL` sentinel, so rotations and the delete
//!   fixup never special-case missing children
//! - Parent links are plain indices used for traversal only; the arena owns
//!   every node, so there are no reference cycles or dangling pointers
//! - Freed slots go on a free list and are reused by later inserts
//!
//! The tree itself is not synchronized. The engine wraps it in a
//! `parking_lot::RwLock`: every mutation (and its rebalancing) runs under the
//! write lock, lookups and iteration under the read lock.

mod iter;
mod rbtree;

pub use iter::{Iter, Keys};
pub use rbtree::{Color, InvariantViolation, RbTree};
