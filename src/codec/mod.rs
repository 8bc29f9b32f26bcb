//! Codec module - marshalling of messages crossing the bus.
//!
//! - [`MsgPackCodec`] - MessagePack using `rmp-serde` (`to_vec_named`)
//!
//! Codecs are marker structs with static methods rather than trait objects;
//! the local bus marshals every message through it so no in-memory object
//! is ever shared between two peers.

mod msgpack;

pub use msgpack::MsgPackCodec;
