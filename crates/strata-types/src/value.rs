use std::fmt;

use bytes::Bytes;

/// A typed field passed to `set_key`/`set_value` and to the packer.
///
/// Each variant covers a family of format characters: signed integers
/// (`b h i l q`), unsigned integers and record numbers (`B H I L Q r t`),
/// strings (`s S`) and byte arrays (`u U`). Integers are accepted across
/// signedness when the value fits the field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    /// A signed integer.
    Int(i64),
    /// An unsigned integer or record number.
    Uint(u64),
    /// A UTF-8 string.
    Str(String),
    /// A byte array. Cloning shares the underlying allocation.
    Bytes(Bytes),
}

/// A typed field borrowed from a cursor's key or value buffer.
///
/// Returned by `get_key`/`get_value` and by the unpacker. Strings and byte
/// arrays point into the buffer they were decoded from; no copy is made.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueRef<'a> {
    /// A signed integer.
    Int(i64),
    /// An unsigned integer or record number.
    Uint(u64),
    /// A UTF-8 string, without its terminator.
    Str(&'a str),
    /// A byte array.
    Bytes(&'a [u8]),
}

impl Value {
    /// Short name of the variant, used in type-mismatch errors.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "signed integer",
            Self::Uint(_) => "unsigned integer",
            Self::Str(_) => "string",
            Self::Bytes(_) => "byte array",
        }
    }

    /// Borrow this value as a [`ValueRef`].
    #[must_use]
    pub fn as_value_ref(&self) -> ValueRef<'_> {
        match self {
            Self::Int(i) => ValueRef::Int(*i),
            Self::Uint(u) => ValueRef::Uint(*u),
            Self::Str(s) => ValueRef::Str(s),
            Self::Bytes(b) => ValueRef::Bytes(b),
        }
    }
}

impl<'a> ValueRef<'a> {
    /// Short name of the variant, used in type-mismatch errors.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "signed integer",
            Self::Uint(_) => "unsigned integer",
            Self::Str(_) => "string",
            Self::Bytes(_) => "byte array",
        }
    }

    /// Copy into an owned [`Value`].
    #[must_use]
    pub fn to_value(&self) -> Value {
        match *self {
            Self::Int(i) => Value::Int(i),
            Self::Uint(u) => Value::Uint(u),
            Self::Str(s) => Value::Str(s.to_owned()),
            Self::Bytes(b) => Value::Bytes(Bytes::copy_from_slice(b)),
        }
    }

    /// The value as a signed integer, if it is an integer that fits.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::Int(i) => Some(i),
            Self::Uint(u) => i64::try_from(u).ok(),
            _ => None,
        }
    }

    /// The value as an unsigned integer, if it is a non-negative integer.
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Self::Int(i) => u64::try_from(i).ok(),
            Self::Uint(u) => Some(u),
            _ => None,
        }
    }

    /// The value as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> Option<&'a str> {
        match *self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The value as a byte slice. Strings are returned as their UTF-8 bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> Option<&'a [u8]> {
        match *self {
            Self::Bytes(b) => Some(b),
            Self::Str(s) => Some(s.as_bytes()),
            _ => None,
        }
    }
}

impl fmt::Display for ValueRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Uint(u) => write!(f, "{u}"),
            Self::Str(s) => f.write_str(s),
            Self::Bytes(b) => {
                for byte in *b {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

impl PartialEq<ValueRef<'_>> for Value {
    fn eq(&self, other: &ValueRef<'_>) -> bool {
        self.as_value_ref() == *other
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::Uint(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::Uint(u64::from(v))
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Self::Uint(u64::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<Bytes> for Value {
    fn from(v: Bytes) -> Self {
        Self::Bytes(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(v))
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Self::Bytes(Bytes::copy_from_slice(v))
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(v: ValueRef<'_>) -> Self {
        v.to_value()
    }
}
