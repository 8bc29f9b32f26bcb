//! Error types for busrpc.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Well-known bus error names used in error replies.
pub mod names {
    /// No route for the requested (interface, method).
    pub const UNKNOWN_METHOD: &str = "org.freedesktop.DBus.Error.UnknownMethod";
    /// Arguments did not match the handler's expected shape.
    pub const INVALID_ARGS: &str = "org.freedesktop.DBus.Error.InvalidArgs";
    /// Generic failure, also used for handler faults.
    pub const FAILED: &str = "org.freedesktop.DBus.Error.Failed";
    /// The callee went away without replying.
    pub const NO_REPLY: &str = "org.freedesktop.DBus.Error.NoReply";
    /// No connection owns the destination name.
    pub const SERVICE_UNKNOWN: &str = "org.freedesktop.DBus.Error.ServiceUnknown";
    /// The queried name has no owner.
    pub const NAME_HAS_NO_OWNER: &str = "org.freedesktop.DBus.Error.NameHasNoOwner";
    /// The connection is closed.
    pub const DISCONNECTED: &str = "org.freedesktop.DBus.Error.Disconnected";
}

/// A named error carried by an error reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodError {
    /// Error name, e.g. `org.freedesktop.DBus.Error.UnknownMethod`.
    pub name: String,
    /// Human readable message.
    pub message: String,
}

impl MethodError {
    /// Create a new method error.
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }

    /// `UnknownMethod` with the standard message.
    pub fn unknown_method() -> Self {
        Self::new(names::UNKNOWN_METHOD, "Method not found")
    }

    /// `InvalidArgs` with the given detail.
    pub fn invalid_args(message: impl Into<String>) -> Self {
        Self::new(names::INVALID_ARGS, message)
    }

    /// `Failed` with the given detail.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(names::FAILED, message)
    }

    /// Check the error name.
    pub fn is(&self, name: &str) -> bool {
        self.name == name
    }
}

impl std::fmt::Display for MethodError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for MethodError {}

/// Main error type for all busrpc operations.
#[derive(Debug, Error)]
pub enum BusrpcError {
    /// The bus could not hand out a connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The requested service name could not be owned.
    #[error("Name error: cannot own {name}: {reason}")]
    Name { name: String, reason: String },

    /// A method call could not be composed.
    #[error("Compose error: {0}")]
    Compose(String),

    /// The transport rejected the call.
    #[error("Send error: {0}")]
    Send(MethodError),

    /// No reply arrived within the protocol timeout.
    #[error("Timeout: no reply after {0:?}")]
    Timeout(std::time::Duration),

    /// The reply did not have the expected shape.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The callee answered with an error reply.
    #[error("Remote error: {0}")]
    Remote(MethodError),

    /// The connection is closed.
    #[error("Disconnected")]
    Disconnected,

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// JSON configuration error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The inbound queue of a connection was already claimed.
    #[error("Inbound queue already claimed by another accept loop")]
    AlreadyClaimed,

    /// Configuration value rejected.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl BusrpcError {
    /// The remote error, if this is an error reply.
    pub fn as_remote(&self) -> Option<&MethodError> {
        match self {
            BusrpcError::Remote(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type alias using [`BusrpcError`].
pub type Result<T> = std::result::Result<T, BusrpcError>;
