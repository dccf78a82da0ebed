//! Error types for EmberKV
//!
//! Provides a unified error type for all operations.

use std::collections::TryReserveError;

use thiserror::Error;

/// Result type alias using EmberError
pub type Result<T> = std::result::Result<T, EmberError>;

/// Unified error type for EmberKV operations
#[derive(Debug, Error)]
pub enum EmberError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Request Errors
    // -------------------------------------------------------------------------
    #[error("Key not found")]
    NotFound,

    #[error("Invalid request type: {0}")]
    InvalidRequestType(String),

    #[error("Wrong record type: expected {expected}, found {found}")]
    WrongType {
        expected: &'static str,
        found: &'static str,
    },

    // -------------------------------------------------------------------------
    // Memory Errors
    // -------------------------------------------------------------------------
    #[error("Allocation failure: {0}")]
    AllocationFailure(#[from] TryReserveError),

    // -------------------------------------------------------------------------
    // Background Worker Errors
    // -------------------------------------------------------------------------
    #[error("Worker not found: {0}")]
    WorkerNotFound(String),

    #[error("Worker name already registered: {0}")]
    DuplicateName(String),

    #[error("Shutting down: {0}")]
    Shutdown(String),

    // -------------------------------------------------------------------------
    // Persistence Errors
    // -------------------------------------------------------------------------
    #[error("Corrupt data: {0}")]
    CorruptData(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}
