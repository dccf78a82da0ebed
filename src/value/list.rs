//! List records
//!
//! Zero-based from the head. A negative index `i` addresses `len + i`, so
//! `-1` is the tail entry.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Which end of a list a push targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListEnd {
    Head,
    Tail,
}

/// What `ListValue::set` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetOutcome {
    /// The entry at `position` was overwritten
    Replaced { position: usize, previous: Vec<u8> },

    /// The index fell outside the list, so the entry went on the tail
    Appended,
}

/// Which list entries a ranged operation touches
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Inclusive range `[start, end]`, clamped to the list bounds
    Range { start: i64, end: i64 },

    /// An explicit set of indexes; out-of-range ones are ignored
    Indexes(Vec<i64>),
}

impl Selection {
    /// Select exactly one index
    pub fn single(index: i64) -> Self {
        Selection::Range {
            start: index,
            end: index,
        }
    }

    /// Select the whole list
    pub fn all() -> Self {
        Selection::Range { start: 0, end: -1 }
    }

    /// Resolve against a list of `len` entries
    ///
    /// Ranges yield ascending positions. Index sets keep the caller's order
    /// (duplicates included) and drop anything outside `0..len`.
    pub fn resolve(&self, len: usize) -> Vec<usize> {
        match self {
            Selection::Range { start, end } => match resolve_range(*start, *end, len) {
                Some((first, last)) => (first..=last).collect(),
                None => Vec::new(),
            },
            Selection::Indexes(indexes) => indexes
                .iter()
                .filter_map(|&index| resolve_index(index, len))
                .collect(),
        }
    }
}

fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let resolved = if index < 0 { index + len } else { index };
    if (0..len).contains(&resolved) {
        Some(resolved as usize)
    } else {
        None
    }
}

fn resolve_range(start: i64, end: i64, len: usize) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let n = len as i64;
    let start = (if start < 0 { start + n } else { start }).max(0);
    let end = (if end < 0 { end + n } else { end }).min(n - 1);
    if start > end {
        return None;
    }
    Some((start as usize, end as usize))
}

/// Copy bytes into a fresh buffer, surfacing allocation failure
fn owned_entry(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut entry = Vec::new();
    entry.try_reserve_exact(bytes.len())?;
    entry.extend_from_slice(bytes);
    Ok(entry)
}

/// An ordered list of byte-string entries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListValue {
    entries: VecDeque<Vec<u8>>,
}

impl ListValue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries from head to tail
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &[u8]> {
        self.entries.iter().map(|entry| entry.as_slice())
    }

    /// Entry at `index` (negative counts from the tail)
    pub fn get(&self, index: i64) -> Option<&[u8]> {
        resolve_index(index, self.len()).map(|i| self.entries[i].as_slice())
    }

    /// Sorted, de-duplicated positions that `selection` touches
    pub fn positions(&self, selection: &Selection) -> Vec<usize> {
        let mut positions = selection.resolve(self.len());
        if matches!(selection, Selection::Indexes(_)) {
            positions.sort_unstable();
            positions.dedup();
        }
        positions
    }

    /// Push at either end, returning the new length
    pub fn push(&mut self, end: ListEnd, entry: &[u8]) -> Result<usize> {
        match end {
            ListEnd::Head => self.push_front(entry),
            ListEnd::Tail => self.push_back(entry),
        }
    }

    /// Append at the tail, returning the new length
    pub fn push_back(&mut self, entry: &[u8]) -> Result<usize> {
        let entry = owned_entry(entry)?;
        self.entries.try_reserve(1)?;
        self.entries.push_back(entry);
        Ok(self.len())
    }

    /// Prepend at the head, returning the new length
    pub fn push_front(&mut self, entry: &[u8]) -> Result<usize> {
        let entry = owned_entry(entry)?;
        self.entries.try_reserve(1)?;
        self.entries.push_front(entry);
        Ok(self.len())
    }

    /// Overwrite the entry at `index`, or append when `index` resolves past
    /// either end
    pub fn set(&mut self, index: i64, entry: &[u8]) -> Result<SetOutcome> {
        match resolve_index(index, self.len()) {
            Some(position) => {
                let entry = owned_entry(entry)?;
                let previous = std::mem::replace(&mut self.entries[position], entry);
                Ok(SetOutcome::Replaced { position, previous })
            }
            None => {
                self.push_back(entry)?;
                Ok(SetOutcome::Appended)
            }
        }
    }

    /// Overwrite the entry at a resolved position
    ///
    /// Returns the replaced entry, or `None` if `position` is out of range.
    pub fn replace(&mut self, position: usize, entry: &[u8]) -> Result<Option<Vec<u8>>> {
        if position >= self.len() {
            return Ok(None);
        }
        let entry = owned_entry(entry)?;
        Ok(Some(std::mem::replace(&mut self.entries[position], entry)))
    }

    /// Remove the selected entries, returning how many were removed
    pub fn remove(&mut self, selection: &Selection) -> usize {
        let positions = self.positions(selection);
        self.remove_positions(&positions)
    }

    /// Remove entries at sorted, de-duplicated positions
    ///
    /// Positions past the end are ignored. Returns how many were removed.
    pub fn remove_positions(&mut self, positions: &[usize]) -> usize {
        let len = self.len();
        let in_range = positions.partition_point(|&p| p < len);
        let doomed = &positions[..in_range];
        match (doomed.first(), doomed.last()) {
            (Some(&first), Some(&last)) if last - first + 1 == doomed.len() => {
                self.entries.drain(first..=last).count()
            }
            (Some(_), Some(_)) => {
                let mut position = 0;
                self.entries.retain(|_| {
                    let keep = doomed.binary_search(&position).is_err();
                    position += 1;
                    keep
                });
                doomed.len()
            }
            _ => 0,
        }
    }

    /// Copy out the selected entries
    pub fn lookup(&self, selection: &Selection) -> Vec<Vec<u8>> {
        selection
            .resolve(self.len())
            .into_iter()
            .map(|i| self.entries[i].clone())
            .collect()
    }
}

impl<T: Into<Vec<u8>>> FromIterator<T> for ListValue {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(Into::into).collect(),
        }
    }
}
