//! Value types for Ferrite client responses.

use bytes::Bytes;
use std::fmt;

use crate::error::{Error, Result};

/// Represents a RESP2 value exchanged with the server.
///
/// Error replies are kept as a value (`Value::Error`) instead of being raised
/// while decoding: inside a pipeline one rejected command must not hide the
/// replies that follow it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// A bulk string.
    String(Bytes),

    /// An integer reply.
    Integer(i64),

    /// An array of values.
    Array(Vec<Value>),

    /// Null bulk string or null array.
    Nil,

    /// A simple string such as `+OK`.
    Status(String),

    /// An error reply such as `-NOGROUP ...`.
    Error(String),
}

impl Value {
    /// Returns the value as a string slice, if it is a valid UTF-8 string or status.
    ///
    /// # Examples
    /// ```
    /// # use ferrite_rs::types::Value;
    /// let val = Value::String(bytes::Bytes::from("1-0"));
    /// assert_eq!(val.as_str(), Some("1-0"));
    /// ```
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(b) => std::str::from_utf8(b).ok(),
            Value::Status(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Returns the value as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns `true` if the value is nil/null.
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Turns an error reply into `Err(Error::Server)`, passing every other value through.
    pub fn into_result(self) -> Result<Value> {
        match self {
            Value::Error(msg) => Err(Error::Server(msg)),
            other => Ok(other),
        }
    }

    /// Converts the value into a `String`.
    pub fn into_string(self) -> Result<String> {
        match self {
            Value::String(b) => String::from_utf8(b.to_vec())
                .map_err(|e| Error::Protocol(format!("invalid UTF-8 in string value: {}", e))),
            Value::Status(s) => Ok(s),
            Value::Error(msg) => Err(Error::Server(msg)),
            other => Err(other.unexpected("string")),
        }
    }

    /// Converts the value into raw bytes.
    pub fn into_bytes(self) -> Result<Bytes> {
        match self {
            Value::String(b) => Ok(b),
            Value::Status(s) => Ok(Bytes::from(s)),
            Value::Error(msg) => Err(Error::Server(msg)),
            other => Err(other.unexpected("bulk string")),
        }
    }

    /// Converts the value into an `i64`.
    ///
    /// Bulk strings holding a decimal integer are accepted too, since some
    /// replies (XPENDING per-consumer counts) carry numbers as strings.
    pub fn into_integer(self) -> Result<i64> {
        match self {
            Value::Integer(n) => Ok(n),
            Value::String(ref b) => std::str::from_utf8(b)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| self.unexpected("integer")),
            Value::Error(msg) => Err(Error::Server(msg)),
            other => Err(other.unexpected("integer")),
        }
    }

    /// Converts the value into a `Vec<Value>`. A nil reply is an empty array.
    pub fn into_array(self) -> Result<Vec<Value>> {
        match self {
            Value::Array(arr) => Ok(arr),
            Value::Nil => Ok(vec![]),
            Value::Error(msg) => Err(Error::Server(msg)),
            other => Err(other.unexpected("array")),
        }
    }

    /// Returns a human-readable type name for this value.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Integer(_) => "integer",
            Value::Array(_) => "array",
            Value::Nil => "nil",
            Value::Status(_) => "status",
            Value::Error(_) => "error",
        }
    }

    fn unexpected(&self, expected: &'static str) -> Error {
        Error::UnexpectedResponse {
            expected,
            actual: self.type_name().to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(b) => match std::str::from_utf8(b) {
                Ok(s) => write!(f, "\"{}\"", s),
                Err(_) => write!(f, "<binary {} bytes>", b.len()),
            },
            Value::Integer(n) => write!(f, "(integer) {}", n),
            Value::Array(arr) => {
                for (i, val) in arr.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}) {}", i + 1, val)?;
                }
                Ok(())
            }
            Value::Nil => write!(f, "(nil)"),
            Value::Status(s) => write!(f, "{}", s),
            Value::Error(s) => write!(f, "(error) {}", s),
        }
    }
}

/// Trait for types that can be converted into command arguments.
pub trait ToArg {
    /// Encode this value as a RESP bulk string argument.
    fn to_arg(&self) -> Bytes;
}

impl ToArg for &str {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl ToArg for String {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl ToArg for &String {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl ToArg for Bytes {
    fn to_arg(&self) -> Bytes {
        self.clone()
    }
}

impl ToArg for &[u8] {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl ToArg for u64 {
    fn to_arg(&self) -> Bytes {
        Bytes::from(self.to_string())
    }
}

impl ToArg for usize {
    fn to_arg(&self) -> Bytes {
        Bytes::from(self.to_string())
    }
}
