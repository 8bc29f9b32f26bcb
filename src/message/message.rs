//! Message types exchanged over the bus.
//!
//! Every inbound message is decoded once, at the boundary, into the closed
//! [`Message`] sum type:
//!
//! ```text
//! Message::MethodCall  ── request, may expect a reply
//! Message::Reply       ── MethodReturn (args) | MethodError (name, message)
//! Message::Signal      ── broadcast, never answered
//! ```

use serde::{Deserialize, Serialize};

use super::args::Args;
use super::lease::Lease;
use super::names;
use crate::error::{MethodError, Result};

/// Fields shared by every message.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Header {
    /// Serial assigned by the sending connection (0 = not sent yet).
    pub serial: u32,
    /// Unique name of the sender, filled in by the bus.
    pub sender: Option<String>,
    /// Destination bus name (unique or well-known).
    pub destination: Option<String>,
    /// Serial of the call this message answers.
    pub reply_serial: Option<u32>,
    /// The sender does not want a reply.
    pub no_reply_expected: bool,
    /// Release token; never crosses the bus.
    #[serde(skip)]
    pub lease: Lease,
}

/// Where a reply to a given call must go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyTo {
    /// Serial of the call.
    pub serial: u32,
    /// Unique name of the caller.
    pub sender: Option<String>,
}

/// An outbound or inbound method call.
#[derive(Debug, Serialize, Deserialize)]
pub struct MethodCall {
    /// Message header.
    pub header: Header,
    /// Target object path.
    pub path: String,
    /// Target interface.
    pub interface: String,
    /// Method name.
    pub member: String,
    /// Call arguments.
    pub args: Args,
}

impl MethodCall {
    /// Compose a method call, validating every name.
    ///
    /// Invalid names are reported as [`BusrpcError::Compose`](crate::BusrpcError::Compose).
    pub fn new(destination: &str, path: &str, interface: &str, member: &str) -> Result<Self> {
        names::validate_bus_name(destination)?;
        names::validate_object_path(path)?;
        names::validate_interface(interface)?;
        names::validate_member(member)?;

        Ok(Self {
            header: Header {
                destination: Some(destination.to_string()),
                ..Header::default()
            },
            path: path.to_string(),
            interface: interface.to_string(),
            member: member.to_string(),
            args: Args::new(),
        })
    }

    /// Attach a release lease.
    pub fn with_lease(mut self, lease: Lease) -> Self {
        self.header.lease = lease;
        self
    }

    /// Mark the call as fire-and-forget.
    pub fn with_no_reply(mut self) -> Self {
        self.header.no_reply_expected = true;
        self
    }

    /// Mutable access to the arguments (for appenders).
    pub fn args_mut(&mut self) -> &mut Args {
        &mut self.args
    }

    /// Check the call targets `interface.member`.
    pub fn is_method_call(&self, interface: &str, member: &str) -> bool {
        self.interface == interface && self.member == member
    }

    /// Check if the caller waits for a reply.
    pub fn expects_reply(&self) -> bool {
        !self.header.no_reply_expected
    }

    /// Destination name.
    pub fn destination(&self) -> Option<&str> {
        self.header.destination.as_deref()
    }

    /// Sender unique name.
    pub fn sender(&self) -> Option<&str> {
        self.header.sender.as_deref()
    }

    /// Addressing information for the reply.
    pub fn reply_to(&self) -> ReplyTo {
        ReplyTo {
            serial: self.header.serial,
            sender: self.header.sender.clone(),
        }
    }
}

/// Result of a method call: return arguments or a named error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MethodReply {
    /// Successful return with arguments.
    Return(Args),
    /// Error reply.
    Error(MethodError),
}

impl MethodReply {
    /// Check if this is an error reply.
    pub fn is_error(&self) -> bool {
        matches!(self, MethodReply::Error(_))
    }

    /// Error name, if any.
    pub fn error_name(&self) -> Option<&str> {
        match self {
            MethodReply::Error(e) => Some(&e.name),
            MethodReply::Return(_) => None,
        }
    }

    /// Convert into a plain result.
    pub fn into_result(self) -> std::result::Result<Args, MethodError> {
        match self {
            MethodReply::Return(args) => Ok(args),
            MethodReply::Error(e) => Err(e),
        }
    }
}

impl From<std::result::Result<Args, MethodError>> for MethodReply {
    fn from(result: std::result::Result<Args, MethodError>) -> Self {
        match result {
            Ok(args) => MethodReply::Return(args),
            Err(e) => MethodReply::Error(e),
        }
    }
}

/// A reply message on the wire.
#[derive(Debug, Serialize, Deserialize)]
pub struct Reply {
    /// Message header; `reply_serial` correlates to the call.
    pub header: Header,
    /// Return arguments or error.
    pub body: MethodReply,
}

impl Reply {
    /// Build a reply addressed to the caller of a call.
    pub fn to(target: &ReplyTo, body: MethodReply) -> Self {
        Self {
            header: Header {
                destination: target.sender.clone(),
                reply_serial: Some(target.serial),
                no_reply_expected: true,
                ..Header::default()
            },
            body,
        }
    }

    /// Serial of the call this reply answers.
    pub fn reply_serial(&self) -> Option<u32> {
        self.header.reply_serial
    }
}

/// A broadcast signal.
#[derive(Debug, Serialize, Deserialize)]
pub struct Signal {
    /// Message header.
    pub header: Header,
    /// Emitting object path.
    pub path: String,
    /// Signal interface.
    pub interface: String,
    /// Signal name.
    pub member: String,
    /// Signal arguments.
    pub args: Args,
}

/// Message type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Method call.
    MethodCall,
    /// Successful reply.
    MethodReturn,
    /// Error reply.
    MethodError,
    /// Signal.
    Signal,
}

/// Any message that can cross the bus.
#[derive(Debug, Serialize, Deserialize)]
pub enum Message {
    /// Method call.
    MethodCall(MethodCall),
    /// Method return or error.
    Reply(Reply),
    /// Signal.
    Signal(Signal),
}

impl Message {
    /// Type of this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::MethodCall(_) => MessageKind::MethodCall,
            Message::Reply(r) if r.body.is_error() => MessageKind::MethodError,
            Message::Reply(_) => MessageKind::MethodReturn,
            Message::Signal(_) => MessageKind::Signal,
        }
    }

    /// Shared header.
    pub fn header(&self) -> &Header {
        match self {
            Message::MethodCall(m) => &m.header,
            Message::Reply(m) => &m.header,
            Message::Signal(m) => &m.header,
        }
    }

    /// Mutable header.
    pub fn header_mut(&mut self) -> &mut Header {
        match self {
            Message::MethodCall(m) => &mut m.header,
            Message::Reply(m) => &mut m.header,
            Message::Signal(m) => &mut m.header,
        }
    }
}
