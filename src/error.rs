//! Error types for the safety rating pipeline.
//!
//! Every failure the pipeline can observe is represented here with enough
//! structured context to decide whether it is worth retrying.
//!
//! ## Error Categories
//!
//! - **Decode Errors**: malformed or unexpected datagrams, dropped by the loop
//! - **Session Conflicts**: impossible or duplicate lifecycle transitions, ignored
//! - **Store Errors**: persistence failures, retried on the next scheduled tick
//! - **Startup Errors**: socket bind and configuration failures, fatal before the loop
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use srtrack::SrError;
//!
//! let error = SrError::store_write("sync_progress", "database is locked");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::types::PacketKind;

/// Result type alias for pipeline operations.
pub type Result<T, E = SrError> = std::result::Result<T, E>;

/// Reasons a datagram could not be turned into a [`TelemetryFrame`](crate::TelemetryFrame).
///
/// Decode errors never change pipeline state; the telemetry loop counts and drops them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DecodeError {
    #[error("Truncated {kind} packet: expected {expected} bytes, got {actual}")]
    TruncatedPacket { kind: String, expected: usize, actual: usize },

    #[error("Unknown packet kind {id}")]
    UnknownPacketKind { id: u8 },

    #[error("Packet header mismatch: {reason}")]
    HeaderMismatch { reason: String },
}

impl DecodeError {
    /// Datagram shorter than the fixed size its header (or the header itself) requires.
    pub fn truncated(kind: impl Into<String>, expected: usize, actual: usize) -> Self {
        DecodeError::TruncatedPacket { kind: kind.into(), expected, actual }
    }

    /// Header fields that do not describe a packet this decoder accepts.
    pub fn header_mismatch(reason: impl Into<String>) -> Self {
        DecodeError::HeaderMismatch { reason: reason.into() }
    }

    /// Datagram longer than the fixed size declared for its kind.
    pub fn size_mismatch(kind: PacketKind, expected: usize, actual: usize) -> Self {
        DecodeError::HeaderMismatch {
            reason: format!("{kind} packet must be {expected} bytes, got {actual}"),
        }
    }
}

/// Persistence failure reported by a [`Store`](crate::store::Store) implementation.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StoreError {
    #[error("Store write failed during {operation}")]
    Write {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Store read failed during {operation}")]
    Read {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Stored data is corrupt in {context}: {details}")]
    Corrupt { context: String, details: String },
}

impl StoreError {
    pub fn write(
        operation: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        StoreError::Write { operation: operation.into(), source: source.into() }
    }

    pub fn read(
        operation: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        StoreError::Read { operation: operation.into(), source: source.into() }
    }

    pub fn corrupt(context: impl Into<String>, details: impl Into<String>) -> Self {
        StoreError::Corrupt { context: context.into(), details: details.into() }
    }

    /// Whether the failure happened on the write path.
    pub fn is_write(&self) -> bool {
        matches!(self, StoreError::Write { .. })
    }
}

/// Main error type for the tracker.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SrError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("Session transition conflict: {reason}")]
    SessionTransitionConflict { reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to bind telemetry socket on {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Telemetry source error: {reason}")]
    Source {
        reason: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Capture file error: {path}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    #[error("Telemetry loop is not running ({context})")]
    LoopUnavailable { context: String },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },
}

impl SrError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            SrError::Decode(_) => false,
            SrError::SessionTransitionConflict { .. } => false,
            SrError::Store(StoreError::Corrupt { .. }) => false,
            SrError::Store(_) => true,
            SrError::Bind { .. } => false,
            SrError::Source { .. } => true,
            SrError::File { .. } => false,
            SrError::Config { .. } => false,
            SrError::LoopUnavailable { .. } => true,
            SrError::Timeout { .. } => true,
        }
    }

    /// Whether a Read API caller should see this as a temporary outage.
    pub fn is_service_unavailable(&self) -> bool {
        matches!(
            self,
            SrError::Store(_) | SrError::LoopUnavailable { .. } | SrError::Timeout { .. }
        )
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            SrError::Decode(_) => vec![
                "Set the game's UDP format to 2019",
                "Check that only one game instance sends to this port",
            ],
            SrError::SessionTransitionConflict { .. } => {
                vec!["No action needed, the duplicate transition was ignored"]
            }
            SrError::Store(StoreError::Corrupt { .. }) => vec![
                "Back up and inspect the history database",
                "Reset the rating to rewrite the profile row",
            ],
            SrError::Store(_) => vec![
                "Check free disk space",
                "Close other programs holding the history database",
                "Wait for the next sync tick to retry",
            ],
            SrError::Bind { .. } => vec![
                "Check that no other telemetry tool is bound to the port",
                "Choose a different port with --udp-port",
            ],
            SrError::Source { .. } => vec![
                "Check network connectivity to the game host",
                "Restart the telemetry stream in the game settings",
            ],
            SrError::File { .. } => vec![
                "Check the capture file exists and is readable",
                "Re-record the capture with --record",
            ],
            SrError::Config { .. } => vec![
                "Fix the reported field in the configuration file",
                "Remove the file to fall back to defaults",
            ],
            SrError::LoopUnavailable { .. } => vec![
                "Restart the tracker",
                "Check the logs for a telemetry loop shutdown",
            ],
            SrError::Timeout { .. } => {
                vec!["Retry the request", "Check the tracker is not overloaded"]
            }
        }
    }

    /// Helper constructor for session lifecycle conflicts.
    pub fn transition_conflict(reason: impl Into<String>) -> Self {
        SrError::SessionTransitionConflict { reason: reason.into() }
    }

    /// Helper constructor for store write failures.
    pub fn store_write(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        let reason: String = reason.into();
        SrError::Store(StoreError::write(operation, reason))
    }

    /// Helper constructor for store read failures.
    pub fn store_read(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        let reason: String = reason.into();
        SrError::Store(StoreError::read(operation, reason))
    }

    /// Helper constructor for configuration errors.
    pub fn config(reason: impl Into<String>) -> Self {
        SrError::Config { reason: reason.into() }
    }

    /// Helper constructor for capture file errors with path context.
    pub fn file_error(path: PathBuf, source: std::io::Error) -> Self {
        SrError::File { path, source }
    }

    /// Helper constructor for a stopped telemetry loop.
    pub fn loop_unavailable(context: impl Into<String>) -> Self {
        SrError::LoopUnavailable { context: context.into() }
    }
}

/// Failure of a Read API call, shaped for the HTTP surface.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ApiError {
    /// Store or loop temporarily unreachable; the caller may retry.
    #[error("Service unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("{what} not found")]
    NotFound { what: String },

    #[error("Bad request: {reason}")]
    BadRequest { reason: String },

    #[error("Internal error: {reason}")]
    Internal { reason: String },
}

impl ApiError {
    pub fn not_found(what: impl Into<String>) -> Self {
        ApiError::NotFound { what: what.into() }
    }

    pub fn bad_request(reason: impl Into<String>) -> Self {
        ApiError::BadRequest { reason: reason.into() }
    }
}

impl From<SrError> for ApiError {
    fn from(err: SrError) -> Self {
        if err.is_service_unavailable() {
            ApiError::Unavailable { reason: err.to_string() }
        } else {
            ApiError::Internal { reason: err.to_string() }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        SrError::from(err).into()
    }
}

impl From<std::io::Error> for SrError {
    fn from(err: std::io::Error) -> Self {
        SrError::Source { reason: err.to_string(), source: Some(err) }
    }
}
