//! # Error Taxonomy
//!
//! Purpose: One error type shared by the protocol connection, the pool
//! manager, and configuration loading.
//!
//! ## Design Principles
//! 1. **Distinct Kinds**: Callers can tell "overloaded" (`Timeout`) apart
//!    from "rejected" (`SetFailed`) and "unreachable" (`Connect`).
//! 2. **No Sub-Classification of Set Failures**: Every way a set can fail
//!    surfaces as `SetFailed`, carrying only a human-readable reason.
//! 3. **I/O Awareness**: `is_io` drives the pool's release health check.

use std::io;

use thiserror::Error;

/// Result type used across the workspace.
pub type McResult<T> = Result<T, McError>;

/// Errors surfaced by the client, the pool manager and config loading.
#[derive(Debug, Error)]
pub enum McError {
    /// Transport could not be established.
    #[error("could not connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    /// Address did not resolve, or the network family is unsupported here.
    #[error("invalid address: {address}")]
    InvalidAddress { address: String },

    /// Read or write failure on an established connection.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// `flush_all` was answered with something other than `OK`.
    #[error("could not flush_all")]
    FlushFailed,

    /// A set was refused, answered with `ERROR`, or lost to the transport.
    #[error("could not set: {reason}")]
    SetFailed { reason: String },

    /// No connection became available within the acquire window.
    #[error("timed out waiting for a connection ({operation})")]
    Timeout { operation: String },

    /// `set` named a shard that was never configured.
    #[error("could not find shard: name={name}")]
    ShardNotFound { name: String },

    /// Configuration failed validation or parsing.
    #[error("invalid config: {reason}")]
    InvalidConfig { reason: String },
}

impl McError {
    /// Creates a set failure with the given reason.
    pub fn set_failed<S: Into<String>>(reason: S) -> Self {
        McError::SetFailed {
            reason: reason.into(),
        }
    }

    /// Creates a timeout for the named operation.
    pub fn timeout<S: Into<String>>(operation: S) -> Self {
        McError::Timeout {
            operation: operation.into(),
        }
    }

    /// Creates a shard lookup failure.
    pub fn shard_not_found<S: Into<String>>(name: S) -> Self {
        McError::ShardNotFound { name: name.into() }
    }

    /// Creates a configuration error.
    pub fn invalid_config<S: Into<String>>(reason: S) -> Self {
        McError::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// True when the error came from the transport of a live connection.
    ///
    /// A connection that produced such an error must not go back to its pool.
    pub fn is_io(&self) -> bool {
        matches!(self, McError::Io(_))
    }

    /// True for acquire timeouts.
    pub fn is_timeout(&self) -> bool {
        matches!(self, McError::Timeout { .. })
    }
}
