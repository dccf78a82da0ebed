//! Concurrency tests for Engine
//!
//! These tests verify:
//! - Interleaved mutations from many threads keep the index a valid
//!   red-black tree (checked after every mutation)
//! - Readers run alongside writers
//! - The persisted state matches memory after a concurrent workload

use std::sync::Arc;
use std::thread;

use emberkv::config::{Config, SyncStrategy};
use emberkv::engine::Engine;
use emberkv::error::EmberError;
use emberkv::value::Selection;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_shared_engine() -> (TempDir, Arc<Engine>) {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .sync_strategy(SyncStrategy::EveryNRecords { count: 256 })
        .build();
    (temp_dir, Arc::new(Engine::open(config).unwrap()))
}

/// One random operation; "expected" errors are part of the workload
fn random_operation(engine: &Engine, rng: &mut StdRng) {
    let key = format!("key{:03}", rng.gen_range(0..200)).into_bytes();
    let result = match rng.gen_range(0..6) {
        0 => engine.string_insert(&key, b"v").map(drop),
        1 => engine.key_delete(&key).map(drop),
        2 => engine.list_rpush(&key, b"r").map(drop),
        3 => engine.list_lpush(&key, b"l").map(drop),
        4 => engine.list_remove(&key, &Selection::single(0)).map(drop),
        _ => engine.string_remove(&key).map(drop),
    };
    match result {
        Ok(()) | Err(EmberError::NotFound) | Err(EmberError::WrongType { .. }) => {}
        Err(e) => panic!("unexpected error: {}", e),
    }
}

// =============================================================================
// Concurrent Access Tests
// =============================================================================

#[test]
fn test_concurrent_mutations_keep_invariants() {
    let (_temp, engine) = setup_shared_engine();

    let workers: Vec<_> = (0..8u64)
        .map(|seed| {
            let engine = engine.clone();
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(seed);
                for step in 0..500 {
                    random_operation(&engine, &mut rng);
                    if let Err(violation) = engine.validate_index() {
                        panic!("thread {} step {}: {}", seed, step, violation);
                    }
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
    engine.validate_index().unwrap();
}

#[test]
fn test_concurrent_pushes_are_all_applied() {
    let (_temp, engine) = setup_shared_engine();

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let engine = engine.clone();
            thread::spawn(move || {
                for i in 0..250 {
                    engine
                        .list_rpush(b"shared", format!("{}-{}", t, i).as_bytes())
                        .unwrap();
                }
            })
        })
        .collect();

    for writer in writers {
        writer.join().unwrap();
    }

    assert_eq!(engine.list_length(b"shared").unwrap(), 1000);
}

#[test]
fn test_readers_alongside_writers() {
    let (_temp, engine) = setup_shared_engine();
    for i in 0..100 {
        engine.string_insert(format!("stable{:03}", i).as_bytes(), b"fixed").unwrap();
    }

    let writer = {
        let engine = engine.clone();
        thread::spawn(move || {
            let mut rng = StdRng::seed_from_u64(7);
            for _ in 0..2_000 {
                random_operation(&engine, &mut rng);
            }
        })
    };
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let engine = engine.clone();
            thread::spawn(move || {
                for round in 0..2_000 {
                    let key = format!("stable{:03}", round % 100);
                    assert_eq!(engine.string_lookup(key.as_bytes()).unwrap(), b"fixed");
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
}

#[test]
fn test_persisted_state_matches_memory() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .dump_on_exit(false)
        .compact_on_open(false)
        .build();
    let engine = Arc::new(Engine::open(config.clone()).unwrap());

    let workers: Vec<_> = (0..4u64)
        .map(|seed| {
            let engine = engine.clone();
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(100 + seed);
                for _ in 0..300 {
                    random_operation(&engine, &mut rng);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let expected: Vec<_> = engine
        .keys()
        .into_iter()
        .map(|key| {
            let value = engine.string_lookup(&key).ok();
            let list = engine.list_lookup(&key, &Selection::all()).ok();
            (key, value, list)
        })
        .collect();
    engine.exit().unwrap();
    drop(engine);

    // Reloaded purely from the write-back log.
    let reopened = Engine::open(config).unwrap();
    let actual: Vec<_> = reopened
        .keys()
        .into_iter()
        .map(|key| {
            let value = reopened.string_lookup(&key).ok();
            let list = reopened.list_lookup(&key, &Selection::all()).ok();
            (key, value, list)
        })
        .collect();

    assert_eq!(actual, expected);
}
