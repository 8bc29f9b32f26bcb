//! Message module - calls, replies, signals and their arguments.
//!
//! This module implements the value types of the RPC layer:
//! - [`Args`] / [`Value`] - ordered, typed call and reply arguments
//! - [`MethodCall`] / [`MethodReply`] / [`Reply`] / [`Signal`] - message shapes
//! - [`Message`] - the closed sum type inbound messages are decoded into
//! - [`Lease`] - release tracking for bus-allocated messages

mod args;
mod lease;
#[allow(clippy::module_inception)]
mod message;
pub mod names;
mod value;

pub use args::{Args, ArgsReader, FromArgs, IntoArgs};
pub use lease::{Lease, LeaseCounter};
pub use message::{
    Header, Message, MessageKind, MethodCall, MethodReply, Reply, ReplyTo, Signal,
};
pub use value::{Arg, Value, SIG_DICT_SU, SIG_STRING, SIG_UINT32};
