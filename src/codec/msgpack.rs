//! MsgPack codec using `rmp-serde`.
//!
//! Always `to_vec_named`: structs are written as maps with field names, so a
//! message decoded by a peer built from a different revision of a struct
//! still finds its fields by name.
//!
//! # Example
//!
//! ```
//! use busrpc::codec::MsgPackCodec;
//! use busrpc::message::{Message, MethodCall};
//!
//! let call = MethodCall::new(
//!     "com.example.HelloService",
//!     "/com/example/HelloService",
//!     "com.example.HelloInterface",
//!     "Hello",
//! )
//! .unwrap();
//!
//! let bytes = MsgPackCodec::encode_message(&Message::MethodCall(call)).unwrap();
//! let decoded = MsgPackCodec::decode_message(&bytes).unwrap();
//! assert!(matches!(decoded, Message::MethodCall(_)));
//! ```

use bytes::Bytes;

use crate::error::Result;
use crate::message::Message;

/// MessagePack codec for structured data.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    /// Encode a whole message for transport.
    ///
    /// The header lease is not part of the encoding.
    pub fn encode_message(message: &Message) -> Result<Bytes> {
        Self::encode(message).map(Bytes::from)
    }

    /// Decode a message received from transport (with an untracked lease).
    pub fn decode_message(bytes: &[u8]) -> Result<Message> {
        Self::decode(bytes)
    }
}
