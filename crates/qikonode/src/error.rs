//! Error types for qikonode.

use thiserror::Error;

/// Errors that can occur in node operations.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Configuration error. Never retried.
    #[error("configuration error: {0}")]
    Config(String),

    /// Socket-level failure while talking to the broker.
    #[error("{operation} failed: {source}")]
    Transport {
        /// Connection manager operation that failed.
        operation: &'static str,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },

    /// The connection went away mid-operation (peer half-close or a local
    /// disconnect).
    #[error("connection closed during {operation}")]
    ConnectionClosed {
        /// Connection manager operation that observed the close.
        operation: &'static str,
    },

    /// Malformed or unsupported inbound frame.
    #[error("protocol error: {0}")]
    Protocol(#[from] qiko_proto::ProtoError),

    /// A local side-effect action failed.
    #[error("action failed: {0}")]
    Action(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl NodeError {
    /// Build a transport error for the given operation.
    pub(crate) fn transport(operation: &'static str) -> impl FnOnce(std::io::Error) -> Self {
        move |source| Self::Transport { operation, source }
    }

    /// Whether the error is a connection-layer failure worth retrying.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::ConnectionClosed { .. })
    }
}
