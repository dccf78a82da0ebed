//! Tests for Value Records
//!
//! These tests verify:
//! - Head/tail insertion order
//! - Range and index-set selections, negative indexes
//! - Removal and overwrite semantics, by selection and by resolved position
//! - String/list type checks

use emberkv::error::EmberError;
use emberkv::value::{ListEnd, ListValue, Selection, SetOutcome, Value};

// =============================================================================
// Helper Functions
// =============================================================================

fn list_of(entries: &[&str]) -> ListValue {
    entries.iter().map(|e| e.as_bytes().to_vec()).collect()
}

fn contents(list: &ListValue) -> Vec<String> {
    list.iter()
        .map(|e| String::from_utf8(e.to_vec()).unwrap())
        .collect()
}

fn strings(entries: Vec<Vec<u8>>) -> Vec<String> {
    entries
        .into_iter()
        .map(|e| String::from_utf8(e).unwrap())
        .collect()
}

// =============================================================================
// Push Tests
// =============================================================================

#[test]
fn test_push_order() {
    let mut list = ListValue::new();

    list.push_front(b"a").unwrap();
    list.push_front(b"b").unwrap();
    list.push_back(b"c").unwrap();

    assert_eq!(contents(&list), vec!["b", "a", "c"]);
}

#[test]
fn test_push_returns_new_length() {
    let mut list = ListValue::new();

    assert_eq!(list.push_back(b"x").unwrap(), 1);
    assert_eq!(list.push_front(b"y").unwrap(), 2);
    assert_eq!(list.len(), 2);
}

#[test]
fn test_get_with_negative_index() {
    let list = list_of(&["a", "b", "c"]);

    assert_eq!(list.get(0), Some(&b"a"[..]));
    assert_eq!(list.get(-1), Some(&b"c"[..]));
    assert_eq!(list.get(-3), Some(&b"a"[..]));
    assert_eq!(list.get(-4), None);
    assert_eq!(list.get(3), None);
}

// =============================================================================
// Lookup Tests
// =============================================================================

#[test]
fn test_lookup_range_inclusive() {
    let list = list_of(&["a", "b", "c", "d"]);

    let entries = list.lookup(&Selection::Range { start: 1, end: 2 });

    assert_eq!(strings(entries), vec!["b", "c"]);
}

#[test]
fn test_lookup_single_index() {
    let list = list_of(&["a", "b", "c"]);

    assert_eq!(strings(list.lookup(&Selection::single(1))), vec!["b"]);
    assert_eq!(strings(list.lookup(&Selection::single(-1))), vec!["c"]);
}

#[test]
fn test_lookup_all() {
    let list = list_of(&["a", "b", "c"]);

    assert_eq!(strings(list.lookup(&Selection::all())), vec!["a", "b", "c"]);
}

#[test]
fn test_lookup_range_is_clamped() {
    let list = list_of(&["a", "b", "c"]);

    let entries = list.lookup(&Selection::Range { start: -10, end: 10 });

    assert_eq!(strings(entries), vec!["a", "b", "c"]);
}

#[test]
fn test_lookup_inverted_or_out_of_range_is_empty() {
    let list = list_of(&["a", "b", "c"]);

    assert!(list.lookup(&Selection::Range { start: 2, end: 1 }).is_empty());
    assert!(list.lookup(&Selection::Range { start: 5, end: 9 }).is_empty());
    assert!(ListValue::new().lookup(&Selection::all()).is_empty());
}

#[test]
fn test_lookup_index_set_keeps_caller_order() {
    let list = list_of(&["a", "b", "c", "d"]);

    let entries = list.lookup(&Selection::Indexes(vec![3, 0, 9, -2]));

    assert_eq!(strings(entries), vec!["d", "a", "c"]);
}

// =============================================================================
// Remove Tests
// =============================================================================

#[test]
fn test_remove_range() {
    let mut list = list_of(&["a", "b", "c", "d", "e"]);

    let removed = list.remove(&Selection::Range { start: 1, end: 3 });

    assert_eq!(removed, 3);
    assert_eq!(contents(&list), vec!["a", "e"]);
}

#[test]
fn test_remove_index_set_ignores_out_of_range() {
    let mut list = list_of(&["a", "b", "c", "d"]);

    let removed = list.remove(&Selection::Indexes(vec![0, 2, 7, -100]));

    assert_eq!(removed, 2);
    assert_eq!(contents(&list), vec!["b", "d"]);
}

#[test]
fn test_remove_index_set_counts_duplicates_once() {
    let mut list = list_of(&["a", "b", "c"]);

    let removed = list.remove(&Selection::Indexes(vec![1, 1, -2]));

    assert_eq!(removed, 1);
    assert_eq!(contents(&list), vec!["a", "c"]);
}

#[test]
fn test_remove_from_empty_list() {
    let mut list = ListValue::new();

    assert_eq!(list.remove(&Selection::all()), 0);
    assert_eq!(list.remove(&Selection::Indexes(vec![0])), 0);
}

#[test]
fn test_remove_preserves_relative_order() {
    let mut list = list_of(&["1", "2", "3", "4", "5", "6"]);

    list.remove(&Selection::Indexes(vec![4, 1]));

    assert_eq!(contents(&list), vec!["1", "3", "4", "6"]);
}

// =============================================================================
// Set Tests
// =============================================================================

#[test]
fn test_set_overwrites_entry() {
    let mut list = list_of(&["a", "b", "c"]);

    let outcome = list.set(-2, b"B").unwrap();

    assert_eq!(
        outcome,
        SetOutcome::Replaced {
            position: 1,
            previous: b"b".to_vec(),
        }
    );
    assert_eq!(contents(&list), vec!["a", "B", "c"]);
}

#[test]
fn test_set_past_end_appends() {
    let mut list = list_of(&["a"]);

    let outcome = list.set(10, b"z").unwrap();

    assert_eq!(outcome, SetOutcome::Appended);
    assert_eq!(contents(&list), vec!["a", "z"]);
}

// =============================================================================
// Resolved Position Tests
// =============================================================================

#[test]
fn test_positions_are_sorted_and_unique() {
    let list = list_of(&["a", "b", "c", "d"]);

    assert_eq!(list.positions(&Selection::Indexes(vec![3, -4, 3, 9])), vec![0, 3]);
    assert_eq!(list.positions(&Selection::Range { start: -2, end: 10 }), vec![2, 3]);
}

#[test]
fn test_remove_positions() {
    let mut contiguous = list_of(&["a", "b", "c", "d", "e"]);
    let mut scattered = contiguous.clone();

    assert_eq!(contiguous.remove_positions(&[1, 2, 3]), 3);
    assert_eq!(scattered.remove_positions(&[0, 2, 4, 8]), 3);

    assert_eq!(contents(&contiguous), vec!["a", "e"]);
    assert_eq!(contents(&scattered), vec!["b", "d"]);
    assert_eq!(scattered.remove_positions(&[]), 0);
}

#[test]
fn test_replace_and_push_by_end() {
    let mut list = ListValue::new();
    list.push(ListEnd::Tail, b"b").unwrap();
    list.push(ListEnd::Head, b"a").unwrap();

    assert_eq!(list.replace(1, b"B").unwrap(), Some(b"b".to_vec()));
    assert_eq!(list.replace(2, b"x").unwrap(), None);
    assert_eq!(contents(&list), vec!["a", "B"]);
}

// =============================================================================
// Value Tests
// =============================================================================

#[test]
fn test_value_type_checks() {
    let string = Value::string_from(b"hello").unwrap();
    let list = Value::from(list_of(&["x"]));

    assert_eq!(string.as_string().unwrap(), b"hello");
    assert_eq!(list.as_list().unwrap().len(), 1);
    assert_eq!(string.type_name(), "string");
    assert_eq!(list.type_name(), "list");

    match string.as_list() {
        Err(EmberError::WrongType { expected, found }) => {
            assert_eq!(expected, "list");
            assert_eq!(found, "string");
        }
        other => panic!("expected WrongType, got {:?}", other),
    }
    assert!(matches!(list.as_string(), Err(EmberError::WrongType { .. })));
}

#[test]
fn test_value_size() {
    assert_eq!(Value::String(b"abcd".to_vec()).size(), 4);
    assert_eq!(Value::from(list_of(&["ab", "cde"])).size(), 5);
}
