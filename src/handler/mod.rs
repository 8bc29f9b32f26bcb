//! Handler module - routing inbound calls to handler functions.
//!
//! Provides:
//! - [`Router`] - maps `(interface, method)` to handlers
//! - [`Handler`] / [`TypedHandler`] - argument decoding around plain functions

mod router;

pub use router::{
    Handler, HandlerResult, Router, TypedHandler, INTROSPECTABLE_INTERFACE, PEER_INTERFACE,
};
