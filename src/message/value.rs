//! Marshallable argument values.
//!
//! The bus layer only needs three argument shapes:
//!
//! | Value         | Signature | Rust type                  |
//! |---------------|-----------|----------------------------|
//! | `Value::Str`  | `s`       | `String`                   |
//! | `Value::U32`  | `u`       | `u32`                      |
//! | `Value::Dict` | `a{su}`   | `HashMap<String, u32>`     |
//!
//! Byte-level type tags are left to the codec.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Signature of a string argument.
pub const SIG_STRING: &str = "s";
/// Signature of an unsigned 32-bit argument.
pub const SIG_UINT32: &str = "u";
/// Signature of a string to unsigned 32-bit dictionary.
pub const SIG_DICT_SU: &str = "a{su}";

/// A single argument value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    /// UTF-8 string.
    Str(String),
    /// Unsigned 32-bit integer.
    U32(u32),
    /// String-keyed dictionary of unsigned 32-bit integers.
    Dict(HashMap<String, u32>),
}

impl Value {
    /// Type signature of this value.
    pub fn signature(&self) -> &'static str {
        match self {
            Value::Str(_) => SIG_STRING,
            Value::U32(_) => SIG_UINT32,
            Value::Dict(_) => SIG_DICT_SU,
        }
    }

    /// Borrow as a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Read as an unsigned integer.
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Value::U32(n) => Some(*n),
            _ => None,
        }
    }

    /// Borrow as a dictionary.
    pub fn as_dict(&self) -> Option<&HashMap<String, u32>> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::U32(n)
    }
}

impl From<HashMap<String, u32>> for Value {
    fn from(d: HashMap<String, u32>) -> Self {
        Value::Dict(d)
    }
}

/// A Rust type that maps to exactly one [`Value`] variant.
pub trait Arg: Sized {
    /// Type signature of the value.
    const SIGNATURE: &'static str;

    /// Convert into a value.
    fn into_value(self) -> Value;

    /// Convert from a value, `None` on variant mismatch.
    fn from_value(value: &Value) -> Option<Self>;
}

impl Arg for String {
    const SIGNATURE: &'static str = SIG_STRING;

    fn into_value(self) -> Value {
        Value::Str(self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        value.as_str().map(str::to_string)
    }
}

impl Arg for u32 {
    const SIGNATURE: &'static str = SIG_UINT32;

    fn into_value(self) -> Value {
        Value::U32(self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        value.as_u32()
    }
}

impl Arg for HashMap<String, u32> {
    const SIGNATURE: &'static str = SIG_DICT_SU;

    fn into_value(self) -> Value {
        Value::Dict(self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        value.as_dict().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signatures() {
        assert_eq!(Value::from("x").signature(), "s");
        assert_eq!(Value::from(7u32).signature(), "u");
        assert_eq!(Value::from(HashMap::new()).signature(), "a{su}");
    }

    #[test]
    fn test_variant_mismatch_is_none() {
        let v = Value::U32(1);
        assert!(v.as_str().is_none());
        assert!(String::from_value(&v).is_none());
        assert_eq!(u32::from_value(&v), Some(1));
    }
}
