//! # EmberKV
//!
//! An embeddable key-value storage engine with:
//! - An in-memory red-black tree index of string and list records
//! - Asynchronous write-back through a background I/O queue
//! - A named background-worker pool with signal-based wakeups
//! - Snapshot dump/load plus a checksummed write-back log
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Engine (Request)                        │
//! │            (read lock: lookups, write lock: mutations)      │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │    Index    │          │  bio queue  │
//!   │  (RB tree)  │          │   (FIFO)    │
//!   └─────────────┘          └──────┬──────┘
//!                                   │  bio-worker (bg pool)
//!                                   ▼
//!                           ┌─────────────┐
//!                           │    Disk     │
//!                           │ (log, dump) │
//!                           └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod hash;

pub mod index;
pub mod value;
pub mod request;
pub mod bg;
pub mod bio;
pub mod disk;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{EmberError, Result};
pub use config::{Config, SyncStrategy};
pub use engine::{Engine, EngineStats};
pub use request::{Operation, Request, RequestKind, Response};
pub use value::{ListEnd, ListValue, Selection, Value};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of EmberKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
