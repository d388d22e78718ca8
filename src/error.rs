//! Error types for the cache client pool.

use std::io;
use thiserror::Error;

/// Result type alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the cache client pool.
#[derive(Error, Debug)]
pub enum Error {
    /// A single node failed an operation that had no fallback.
    #[error("node {node} unavailable: {source}")]
    NodeUnavailable {
        node: String,
        #[source]
        source: StorageError,
    },

    /// Selection produced no usable candidate for the operation.
    #[error("no available nodes for {operation}")]
    NoAvailableNodes { operation: Operation },

    /// Some replicas succeeded but the write requirement was not met.
    #[error("partial write failure: succeeded {succeeded:?}, failed {failed:?}")]
    PartialWriteFailure {
        succeeded: Vec<String>,
        failed: Vec<String>,
    },

    /// Only local replicas accepted a write that requires a network replica.
    #[error("no network replica accepted the write (local replicas: {succeeded:?})")]
    NoNetworkReplica { succeeded: Vec<String> },

    /// Every candidate failed.
    #[error("all {} nodes failed for {operation}", .failures.len())]
    AllNodesFailed {
        operation: Operation,
        failures: Vec<(String, StorageError)>,
    },

    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),

    /// No node with this name is configured.
    #[error("unknown node: {0}")]
    UnknownNode(String),

    /// The aggregate operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// The operation was cancelled by the caller.
    #[error("operation cancelled")]
    Cancelled,

    /// The pool has been disposed.
    #[error("pool disposed")]
    Disposed,
}

impl Error {
    /// Check if this error means no node could serve the request.
    pub fn is_no_available_nodes(&self) -> bool {
        matches!(self, Error::NoAvailableNodes { .. })
    }

    /// Check if this error is a deadline or per-node timeout.
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Timeout => true,
            Error::NodeUnavailable { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}

/// The pool operation an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    ExistKey,
    Get,
    Set,
    Remove,
    GetKeys,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Operation::ExistKey => "exist_key",
            Operation::Get => "get",
            Operation::Set => "set",
            Operation::Remove => "remove",
            Operation::GetKeys => "get_keys",
        };
        f.write_str(name)
    }
}

/// Errors raised by an individual storage backend.
///
/// Backends translate their own failures into these variants so that nothing
/// lower level escapes a node boundary.
#[derive(Error, Debug, Clone)]
pub enum StorageError {
    /// The backend could not be reached.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The backend did not answer in time.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The backend refused to store the value.
    #[error("write rejected")]
    Rejected,

    /// I/O error.
    #[error("storage io error: {0}")]
    Io(String),

    /// Encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The backend has been closed.
    #[error("storage closed")]
    Closed,
}

impl StorageError {
    /// Check if this is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, StorageError::Timeout(_))
    }

    /// Short label used in metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            StorageError::Unavailable(_) => "unavailable",
            StorageError::Timeout(_) => "timeout",
            StorageError::Rejected => "rejected",
            StorageError::Io(_) => "io",
            StorageError::Serialization(_) => "serialization",
            StorageError::Closed => "closed",
        }
    }
}

impl From<io::Error> for StorageError {
    fn from(e: io::Error) -> Self {
        StorageError::Io(e.to_string())
    }
}

impl From<bincode::Error> for StorageError {
    fn from(e: bincode::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}
