//! Ordered argument lists and typed conversions.
//!
//! [`Args`] is the body of every call, reply and signal. Handlers and
//! clients usually go through [`FromArgs`] / [`IntoArgs`] instead of
//! touching values directly:
//!
//! ```
//! use busrpc::message::{Args, FromArgs, IntoArgs};
//!
//! let args = ("World".to_string(),).into_args();
//! assert_eq!(args.signature(), "s");
//!
//! let (name,): (String,) = FromArgs::from_args(&args).unwrap();
//! assert_eq!(name, "World");
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::value::{Arg, Value};
use crate::error::{BusrpcError, Result};

/// Ordered sequence of typed arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Args(Vec<Value>);

impl Args {
    /// Create an empty argument list.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a value.
    pub fn push(&mut self, value: impl Into<Value>) -> &mut Self {
        self.0.push(value.into());
        self
    }

    /// Number of arguments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if there are no arguments.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Get the argument at `index`.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    /// Iterate over the arguments.
    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.0.iter()
    }

    /// Concatenated type signature, e.g. `"su"`.
    pub fn signature(&self) -> String {
        self.0.iter().map(Value::signature).collect()
    }

    /// Start reading arguments in order.
    pub fn reader(&self) -> ArgsReader<'_> {
        ArgsReader { args: self, pos: 0 }
    }
}

impl From<Vec<Value>> for Args {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

impl<'a> IntoIterator for &'a Args {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Sequential reader over [`Args`].
///
/// Every read checks the type at the current position; a mismatch or a
/// missing argument is a [`BusrpcError::Decode`].
pub struct ArgsReader<'a> {
    args: &'a Args,
    pos: usize,
}

impl<'a> ArgsReader<'a> {
    /// Read the next argument as `T`.
    pub fn read<T: Arg>(&mut self) -> Result<T> {
        let value = self.args.get(self.pos).ok_or_else(|| {
            BusrpcError::Decode(format!(
                "expected {} at position {}, found end of arguments",
                T::SIGNATURE,
                self.pos
            ))
        })?;

        let parsed = T::from_value(value).ok_or_else(|| {
            BusrpcError::Decode(format!(
                "expected {} at position {}, found {}",
                T::SIGNATURE,
                self.pos,
                value.signature()
            ))
        })?;

        self.pos += 1;
        Ok(parsed)
    }

    /// Read the next argument as a borrowed string.
    pub fn read_str(&mut self) -> Result<&'a str> {
        let args = self.args;
        let value = args.get(self.pos).ok_or_else(|| {
            BusrpcError::Decode(format!(
                "expected s at position {}, found end of arguments",
                self.pos
            ))
        })?;
        let s = value.as_str().ok_or_else(|| {
            BusrpcError::Decode(format!(
                "expected s at position {}, found {}",
                self.pos,
                value.signature()
            ))
        })?;
        self.pos += 1;
        Ok(s)
    }

    /// Fail if unread arguments remain.
    pub fn finish(self) -> Result<()> {
        if self.pos == self.args.len() {
            Ok(())
        } else {
            Err(BusrpcError::Decode(format!(
                "expected {} argument(s), found {} (signature \"{}\")",
                self.pos,
                self.args.len(),
                self.args.signature()
            )))
        }
    }
}

/// Types that can be decoded from a whole argument list.
pub trait FromArgs: Sized {
    /// Expected signature, e.g. `"s"`.
    fn signature() -> String;

    /// Decode, failing with [`BusrpcError::Decode`] on shape mismatch.
    fn from_args(args: &Args) -> Result<Self>;
}

/// Types that can be encoded into a whole argument list.
pub trait IntoArgs {
    /// Produced signature.
    fn signature() -> String;

    /// Encode.
    fn into_args(self) -> Args;
}

impl FromArgs for () {
    fn signature() -> String {
        String::new()
    }

    fn from_args(args: &Args) -> Result<Self> {
        args.reader().finish()
    }
}

impl IntoArgs for () {
    fn signature() -> String {
        String::new()
    }

    fn into_args(self) -> Args {
        Args::new()
    }
}

impl IntoArgs for Args {
    fn signature() -> String {
        // Only known at runtime; see `Args::signature`.
        String::new()
    }

    fn into_args(self) -> Args {
        self
    }
}

macro_rules! impl_single_arg {
    ($($ty:ty),*) => {
        $(
            impl FromArgs for $ty {
                fn signature() -> String {
                    <$ty as Arg>::SIGNATURE.to_string()
                }

                fn from_args(args: &Args) -> Result<Self> {
                    let mut reader = args.reader();
                    let value = reader.read::<$ty>()?;
                    reader.finish()?;
                    Ok(value)
                }
            }

            impl IntoArgs for $ty {
                fn signature() -> String {
                    <$ty as Arg>::SIGNATURE.to_string()
                }

                fn into_args(self) -> Args {
                    Args::from(vec![Arg::into_value(self)])
                }
            }
        )*
    };
}

impl_single_arg!(String, u32, HashMap<String, u32>);

macro_rules! impl_tuple_args {
    ($($name:ident $var:ident),+) => {
        impl<$($name: Arg),+> FromArgs for ($($name,)+) {
            fn signature() -> String {
                let mut sig = String::new();
                $( sig.push_str($name::SIGNATURE); )+
                sig
            }

            fn from_args(args: &Args) -> Result<Self> {
                let mut reader = args.reader();
                let tuple = ($( reader.read::<$name>()?, )+);
                reader.finish()?;
                Ok(tuple)
            }
        }

        impl<$($name: Arg),+> IntoArgs for ($($name,)+) {
            fn signature() -> String {
                let mut sig = String::new();
                $( sig.push_str($name::SIGNATURE); )+
                sig
            }

            fn into_args(self) -> Args {
                let ($($var,)+) = self;
                Args::from(vec![$( $var.into_value(), )+])
            }
        }
    };
}

impl_tuple_args!(A a);
impl_tuple_args!(A a, B b);
impl_tuple_args!(A a, B b, C c);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_signature() {
        let mut args = Args::new();
        args.push("name").push(42u32);
        assert_eq!(args.len(), 2);
        assert_eq!(args.signature(), "su");
    }

    #[test]
    fn test_reader_type_mismatch() {
        let args = 7u32.into_args();
        let err = String::from_args(&args).unwrap_err();
        match err {
            BusrpcError::Decode(msg) => assert!(msg.contains("expected s at position 0, found u")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_reader_missing_argument() {
        let args = Args::new();
        assert!(matches!(String::from_args(&args), Err(BusrpcError::Decode(_))));
    }

    #[test]
    fn test_trailing_arguments_rejected() {
        let args = ("a".to_string(), "b".to_string()).into_args();
        assert!(matches!(String::from_args(&args), Err(BusrpcError::Decode(_))));
        assert!(<() as FromArgs>::from_args(&args).is_err());
    }

    #[test]
    fn test_tuple_signature() {
        assert_eq!(<(String, u32) as FromArgs>::signature(), "su");
        assert_eq!(<HashMap<String, u32> as IntoArgs>::signature(), "a{su}");
    }

    #[test]
    fn test_dict_decode() {
        let mut stats = HashMap::new();
        stats.insert("Serial".to_string(), 12u32);
        let args = stats.clone().into_args();

        let decoded = HashMap::<String, u32>::from_args(&args).unwrap();
        assert_eq!(decoded, stats);
    }

    #[test]
    fn test_read_str_borrows() {
        let args = ("World".to_string(),).into_args();
        let mut reader = args.reader();
        assert_eq!(reader.read_str().unwrap(), "World");
        assert!(reader.finish().is_ok());
    }
}
