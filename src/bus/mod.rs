//! Bus module - the substrate the RPC layer runs on.
//!
//! The RPC layer only needs a handful of primitives from a message bus,
//! captured by the [`Bus`] trait:
//!
//! - own a well-known name ([`Bus::request_name`])
//! - compose a call ([`Bus::new_method_call`])
//! - send a call and get a handle on its reply ([`Bus::send_with_reply`])
//! - send any other message ([`Bus::send`])
//! - claim the inbound queue ([`Bus::take_inbound`])
//!
//! [`BusConnection`] wraps one implementation behind a shared handle that
//! every client and server in the process borrows. [`LocalBus`] is the
//! in-process substrate shipped with the crate.

mod connection;
pub mod local;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::codec::MsgPackCodec;
use crate::error::{names, BusrpcError, MethodError, Result};
use crate::message::{Lease, LeaseCounter, Message, MethodCall, Reply};

pub use connection::BusConnection;
pub use local::{LocalBus, LocalConnection};

/// Boxed future returned by bus primitives.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Well-known name of the bus daemon itself.
pub const DAEMON_NAME: &str = "org.freedesktop.DBus";

/// Object path of the bus daemon.
pub const DAEMON_PATH: &str = "/org/freedesktop/DBus";

/// Default time to wait for a reply.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(25);

/// Environment variable selecting the bus type.
pub const BUS_TYPE_ENV: &str = "BUSRPC_BUS";

/// Which bus to connect to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusType {
    /// System-wide bus.
    System,
    /// Per-login-session bus.
    #[default]
    Session,
}

impl BusType {
    /// Read the bus type from `BUSRPC_BUS`, defaulting to `Session`.
    pub fn from_env() -> Result<Self> {
        match std::env::var(BUS_TYPE_ENV) {
            Ok(value) => value.parse(),
            Err(_) => Ok(BusType::default()),
        }
    }
}

impl FromStr for BusType {
    type Err = BusrpcError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "system" => Ok(BusType::System),
            "session" => Ok(BusType::Session),
            other => Err(BusrpcError::InvalidConfig(format!("unknown bus type: {other:?}"))),
        }
    }
}

impl fmt::Display for BusType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusType::System => f.write_str("system"),
            BusType::Session => f.write_str("session"),
        }
    }
}

/// Flags for [`Bus::request_name`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NameFlags {
    /// Let a later requester take the name over.
    pub allow_replacement: bool,
    /// Take the name from its owner if the owner allows it.
    pub replace_existing: bool,
    /// Fail instead of waiting in the owner queue.
    pub do_not_queue: bool,
}

impl NameFlags {
    /// Flags used by servers: replace if allowed, never queue.
    pub fn server() -> Self {
        Self {
            allow_replacement: false,
            replace_existing: true,
            do_not_queue: true,
        }
    }
}

/// Outcome of a name request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestNameReply {
    /// The caller now owns the name.
    PrimaryOwner,
    /// The caller waits in the owner queue.
    InQueue,
    /// Someone else owns the name and did not let go.
    Exists,
    /// The caller already owned the name.
    AlreadyOwner,
}

impl RequestNameReply {
    /// Check if the caller owns the name afterwards.
    pub fn is_owner(self) -> bool {
        matches!(self, RequestNameReply::PrimaryOwner | RequestNameReply::AlreadyOwner)
    }
}

/// Handle on the reply to a sent call.
///
/// The bus delivers the encoded reply; it is decoded here, at the boundary.
/// Dropping the handle, whether the reply arrived or not, runs the bus's
/// cleanup for the call.
pub struct PendingReply {
    serial: u32,
    rx: oneshot::Receiver<Bytes>,
    reply_leases: Option<Arc<LeaseCounter>>,
    on_drop: Option<Box<dyn FnOnce() + Send>>,
}

impl PendingReply {
    /// Create a pending reply for the call with `serial`.
    pub fn new(serial: u32, rx: oneshot::Receiver<Bytes>) -> Self {
        Self {
            serial,
            rx,
            reply_leases: None,
            on_drop: None,
        }
    }

    /// Run `cleanup` once this handle is gone.
    pub fn on_drop(mut self, cleanup: impl FnOnce() + Send + 'static) -> Self {
        self.on_drop = Some(Box::new(cleanup));
        self
    }

    /// Attach a lease counted by `counter` to the decoded reply.
    pub fn track_reply(mut self, counter: &Arc<LeaseCounter>) -> Self {
        self.reply_leases = Some(counter.clone());
        self
    }

    /// Serial of the call.
    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// Wait for the reply, up to `timeout`.
    pub async fn wait(mut self, timeout: Duration) -> Result<Reply> {
        let bytes = match tokio::time::timeout(timeout, &mut self.rx).await {
            Err(_) => return Err(BusrpcError::Timeout(timeout)),
            Ok(Err(_)) => {
                return Err(BusrpcError::Send(MethodError::new(
                    names::DISCONNECTED,
                    "connection closed before the reply arrived",
                )))
            }
            Ok(Ok(bytes)) => bytes,
        };

        match MsgPackCodec::decode_message(&bytes)? {
            Message::Reply(mut reply) => {
                if let Some(counter) = &self.reply_leases {
                    reply.header.lease = Lease::tracked(counter);
                }
                Ok(reply)
            }
            other => Err(BusrpcError::Decode(format!(
                "expected a reply to serial {}, got {:?}",
                self.serial,
                other.kind()
            ))),
        }
    }
}

impl fmt::Debug for PendingReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingReply")
            .field("serial", &self.serial)
            .field("tracked", &self.reply_leases.is_some())
            .finish()
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        if let Some(cleanup) = self.on_drop.take() {
            cleanup();
        }
    }
}

/// Inbound message queue of a connection.
///
/// Only one `Inbound` exists per connection; whoever holds it is the only
/// reader.
pub trait Inbound: Send {
    /// Wait until at least one message is queued.
    ///
    /// Returns `false` once the connection can never deliver again.
    fn readable(&mut self) -> BoxFuture<'_, bool>;

    /// Pop the next queued message, decoded; `None` if nothing usable is queued.
    fn pop(&mut self) -> Option<Message>;
}

/// Primitive operations of a message bus connection.
pub trait Bus: Send + Sync + 'static {
    /// Unique connection name assigned by the bus, e.g. `:1.7`.
    fn unique_name(&self) -> &str;

    /// Ask the bus for ownership of a well-known name.
    fn request_name(&self, name: &str, flags: NameFlags) -> Result<RequestNameReply>;

    /// Give up a well-known name. Returns `false` if it was not owned.
    fn release_name(&self, name: &str) -> Result<bool>;

    /// Compose a method call.
    fn new_method_call(
        &self,
        destination: &str,
        path: &str,
        interface: &str,
        member: &str,
    ) -> Result<MethodCall> {
        MethodCall::new(destination, path, interface, member)
    }

    /// Send a call and return a handle on its reply.
    ///
    /// The call is consumed; it is released once the bus accepted it.
    fn send_with_reply(&self, call: MethodCall) -> Result<PendingReply>;

    /// Send a message without waiting for anything. Returns its serial.
    fn send(&self, message: Message) -> Result<u32>;

    /// Claim the inbound queue. Fails with [`BusrpcError::AlreadyClaimed`] the
    /// second time.
    fn take_inbound(&self) -> Result<Box<dyn Inbound>>;
}
