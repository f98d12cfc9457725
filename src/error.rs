//! Error types and result handling for pg-watermark-sync.
//!
//! This module defines the main error type [`Error`] and a convenience
//! [`Result`] type alias used throughout the crate.
//!
//! # Example
//!
//! ```rust
//! use pg_watermark_sync::{Error, Result};
//!
//! fn read_watermark() -> Result<()> {
//!     Err(Error::StoreUnavailable {
//!         message: "state file is locked".to_string(),
//!     })
//! }
//!
//! match read_watermark() {
//!     Ok(()) => println!("Watermark read"),
//!     Err(Error::StoreUnavailable { message }) => eprintln!("Store down: {}", message),
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! ```

use thiserror::Error;

/// The main error type for pg-watermark-sync operations.
///
/// The first four variants are the per-table failure taxonomy. The
/// orchestrator turns any of them into a failed table result without
/// touching sibling tables.
#[derive(Error, Debug)]
pub enum Error {
    /// The watermark store could not be read or written.
    ///
    /// The table must not be extracted with a guessed lower bound.
    #[error("Watermark store unavailable: {message}")]
    StoreUnavailable {
        /// Description of the store failure
        message: String,
    },

    /// The source stream broke before it was exhausted.
    #[error("Source read error on table {table}: {message}")]
    SourceRead {
        /// Table being extracted
        table: String,
        /// Description of the read failure
        message: String,
    },

    /// The destination rejected or failed part of the row sequence.
    #[error("Sink write error on table {table}: {message}")]
    SinkWrite {
        /// Table being loaded
        table: String,
        /// Description of the write failure
        message: String,
    },

    /// A watermark commit was attempted before extraction completed.
    ///
    /// This always indicates an orchestration bug.
    #[error("Premature commit on table {table}: extraction did not complete")]
    PrematureCommit {
        /// Table whose tracker was misused
        table: String,
    },

    /// Configuration error, from the config file or environment overrides.
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization error when encoding rows or state.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Operation timeout.
    #[error("Timeout error: {message}")]
    Timeout {
        /// Description of what timed out
        message: String,
    },

    /// Graceful shutdown was requested (e.g., via Ctrl+C).
    ///
    /// Tables still in flight when this fires are abandoned without commit.
    #[error("Shutdown requested")]
    Shutdown,
}

impl Error {
    pub(crate) fn store(message: impl Into<String>) -> Self {
        Error::StoreUnavailable {
            message: message.into(),
        }
    }

    pub(crate) fn source_read(table: &str, message: impl std::fmt::Display) -> Self {
        Error::SourceRead {
            table: table.to_string(),
            message: message.to_string(),
        }
    }

    pub(crate) fn sink_write(table: &str, message: impl std::fmt::Display) -> Self {
        Error::SinkWrite {
            table: table.to_string(),
            message: message.to_string(),
        }
    }

    /// Short machine-friendly name of the error kind, used in run summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::StoreUnavailable { .. } => "store_unavailable",
            Error::SourceRead { .. } => "source_read",
            Error::SinkWrite { .. } => "sink_write",
            Error::PrematureCommit { .. } => "premature_commit",
            Error::Config(_) => "config",
            Error::Serialization(_) => "serialization",
            Error::Timeout { .. } => "timeout",
            Error::Shutdown => "shutdown",
        }
    }
}

/// A convenient Result type alias for pg-watermark-sync operations.
///
/// This is equivalent to `std::result::Result<T, pg_watermark_sync::Error>`.
pub type Result<T> = std::result::Result<T, Error>;
