//! Error types for the NFSv4.1 client.
//!
//! This module provides a unified error type [`Nfs4Error`] for all client
//! operations, along with a convenient [`Result`] type alias.
//!
//! # Error Categories
//!
//! - **Transport**: connection, framing and RPC-level failures
//! - **Protocol**: a terminal NFS status returned by the server
//! - **Sequencing**: slot sequence violations detected on either side
//! - **State**: operations attempted in the wrong session lifecycle state
//! - **Decoding**: malformed XDR or attribute blobs
//! - **Configuration**: invalid settings
//!
//! # Example
//!
//! ```rust
//! use nfs41_client::error::{Nfs4Error, Result};
//! use nfs41_client::nfs::NfsStatus;
//!
//! fn check(status: NfsStatus) -> Result<()> {
//!     if status.is_success() {
//!         return Ok(());
//!     }
//!     Err(Nfs4Error::Protocol { status, tag: "demo".into(), op: None })
//! }
//!
//! let err = check(NfsStatus::Noent).unwrap_err();
//! assert_eq!(err.status(), Some(NfsStatus::Noent));
//! assert!(!err.is_retryable());
//! ```

use crate::nfs::{NfsOpNum4, NfsStatus};
use std::io;
use thiserror::Error;

/// Main error type for client operations.
#[derive(Error, Debug)]
pub enum Nfs4Error {
    // Transport errors
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Request timed out: {0}")]
    Timeout(String),

    // Server status errors
    #[error("Compound '{tag}' failed with {status} at {op:?}")]
    Protocol {
        status: NfsStatus,
        tag: String,
        op: Option<NfsOpNum4>,
    },

    #[error("Server returned unknown status code {0}")]
    UnknownStatus(u32),

    #[error("Compound '{tag}' still failing with {status} after {attempts} attempts")]
    RetriesExhausted {
        tag: String,
        status: NfsStatus,
        attempts: u32,
    },

    // Sequencing errors
    #[error("Sequence {sequence} misordered on slot {slot}")]
    SequenceMisordered { slot: u32, sequence: u32 },

    #[error("Retry of sequence {sequence} on slot {slot} has no cached reply")]
    UncachedRetry { slot: u32, sequence: u32 },

    // Lifecycle errors
    #[error("Session state conflict: {0}")]
    StateConflict(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // Decoding errors
    #[error("XDR error: {0}")]
    Xdr(String),

    #[error("Malformed attribute: {0}")]
    MalformedAttribute(String),

    #[error("Malformed layout: {0}")]
    MalformedLayout(String),

    // pNFS errors
    #[error("No layout segment covers offset {0}")]
    NoLayout(u64),

    #[error("Data server {0} is unreachable")]
    DataServerUnreachable(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, Nfs4Error>;

impl Nfs4Error {
    /// Shorthand for a decoding failure.
    pub fn xdr(msg: impl Into<String>) -> Self {
        Nfs4Error::Xdr(msg.into())
    }

    /// Server status carried by this error, if any.
    pub fn status(&self) -> Option<NfsStatus> {
        match self {
            Nfs4Error::Protocol { status, .. } | Nfs4Error::RetriesExhausted { status, .. } => {
                Some(*status)
            }
            Nfs4Error::SequenceMisordered { .. } => Some(NfsStatus::SeqMisordered),
            Nfs4Error::UncachedRetry { .. } => Some(NfsStatus::RetryUncachedRep),
            _ => None,
        }
    }

    /// Check if the operation could succeed if attempted again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Nfs4Error::Timeout(_) | Nfs4Error::RetriesExhausted { .. } => true,
            Nfs4Error::Protocol { status, .. } => status.is_retryable(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Nfs4Error {
    fn from(e: serde_json::Error) -> Self {
        Nfs4Error::Config(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for Nfs4Error {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        Nfs4Error::Timeout(e.to_string())
    }
}
