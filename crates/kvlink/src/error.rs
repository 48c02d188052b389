// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for the client engine.
//!
//! One error enum covers the whole pipeline. Configuration mistakes
//! (`InvalidArgument`) surface synchronously to the caller that supplied
//! the bad input; runtime connection errors fail only the pending commands
//! they affect. Errors are `Clone` so a single failure can complete every
//! handle that observes it (I/O errors are captured as kind + message for
//! that reason).

use std::fmt;
use std::io;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, KvError>;

/// Errors surfaced by the client engine.
#[derive(Clone, Debug)]
pub enum KvError {
    /// No active transport and reconnection is suspended, exhausted, or
    /// disabled. Pending commands fail with this when a connection is lost
    /// under the fail-pending policy.
    ConnectionUnavailable,

    /// A blocking invocation did not complete within its deadline.
    Timeout,

    /// A non-control command was attempted while a transaction block is
    /// open on a shared connection.
    TransactionState(&'static str),

    /// A reply could not be matched or decoded. Fatal to the connection;
    /// forces a reconnect.
    Decode(String),

    /// Malformed configuration input (backoff bounds, CIDR blocks,
    /// unknown read preference). Raised eagerly, never mid-operation.
    InvalidArgument(String),

    /// Cooperative cancellation of a blocking wait or a reconnect attempt.
    Interrupted,

    /// The connection was explicitly closed.
    Closed,

    /// The server answered with an error reply.
    Server(String),

    /// Transport-level I/O failure.
    Io {
        /// The original `io::ErrorKind`.
        kind: io::ErrorKind,
        /// Human-readable description of the failure.
        message: String,
    },
}

impl fmt::Display for KvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KvError::ConnectionUnavailable => write!(f, "connection unavailable"),
            KvError::Timeout => write!(f, "command timed out"),
            KvError::TransactionState(msg) => write!(f, "transaction state violation: {}", msg),
            KvError::Decode(msg) => write!(f, "protocol decode error: {}", msg),
            KvError::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            KvError::Interrupted => write!(f, "operation interrupted"),
            KvError::Closed => write!(f, "connection closed"),
            KvError::Server(msg) => write!(f, "server error: {}", msg),
            KvError::Io { kind, message } => write!(f, "io error ({:?}): {}", kind, message),
        }
    }
}

impl std::error::Error for KvError {}

impl From<io::Error> for KvError {
    fn from(err: io::Error) -> Self {
        KvError::Io {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl KvError {
    /// Whether this error is fatal to the connection it occurred on.
    ///
    /// Fatal errors force a transport teardown and reconnect; non-fatal
    /// errors fail only the command they belong to.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(self, KvError::Decode(_) | KvError::Io { .. })
    }
}

// ============================================================================
// Tests
// ============================================================================
