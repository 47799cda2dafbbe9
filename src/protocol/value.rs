//! Dynamically typed payload values.
//!
//! Method parameters, results and remote error payloads are arbitrary trees of
//! [`Value`]. The enum derives bincode's `Encode`, so every encoded value
//! carries its own variant tag and length prefixes and can be decoded without any
//! external framing.
//!
//! Decoding is written by hand: it reads the same layout the derive writes, but
//! stops at [`MAX_DEPTH`] levels of nesting and rejects length prefixes that could
//! not fit in a single message, so a hostile peer can neither exhaust the stack
//! nor force a large allocation with a few bytes.
use std::{fmt, mem};

use bincode::{
    Decode, Encode,
    de::{Decoder, read::Reader},
    error::{AllowedEnumVariants, DecodeError},
};

use super::codec::MAX_MESSAGE_SIZE;

/// Deepest nesting of arrays and maps accepted on the wire. A scalar has depth 1.
pub const MAX_DEPTH: usize = 512;

// Upper bound on speculative preallocation for decoded containers.
const PREALLOC: usize = 1024;

#[derive(Debug, Clone, PartialEq, Encode)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Bin(Vec<u8>),
    Array(Vec<Value>),
    Map(Vec<(Value, Value)>),
}

impl Value {
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Returns the value as an unsigned integer, accepting non-negative signed ints.
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Value::UInt(n) => Some(n),
            Value::Int(n) => u64::try_from(n).ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Int(n) => Some(n),
            Value::UInt(n) => i64::try_from(n).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Float(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Value::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Nesting depth of the tree, counted without recursion.
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut pending = vec![(self, 1)];
        while let Some((value, depth)) = pending.pop() {
            deepest = deepest.max(depth);
            match value {
                Value::Array(items) => pending.extend(items.iter().map(|v| (v, depth + 1))),
                Value::Map(entries) => {
                    for (k, v) in entries {
                        pending.push((k, depth + 1));
                        pending.push((v, depth + 1));
                    }
                }
                _ => {}
            }
        }
        deepest
    }
}

impl<Context> Decode<Context> for Value {
    fn decode<D: Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, DecodeError> {
        decode_value(decoder, 1)
    }
}

// Variant indices follow the declaration order used by the derived `Encode`.
fn decode_value<D: Decoder>(decoder: &mut D, depth: usize) -> Result<Value, DecodeError> {
    if depth > MAX_DEPTH {
        return Err(DecodeError::Other("value nesting exceeds the depth limit"));
    }

    let value = match u32::decode(decoder)? {
        0 => Value::Nil,
        1 => Value::Bool(bool::decode(decoder)?),
        2 => Value::Int(i64::decode(decoder)?),
        3 => Value::UInt(u64::decode(decoder)?),
        4 => Value::Float(f64::decode(decoder)?),
        5 => {
            let bytes = decode_bytes(decoder)?;
            let s = String::from_utf8(bytes).map_err(|e| DecodeError::Utf8 {
                inner: e.utf8_error(),
            })?;
            Value::Str(s)
        }
        6 => Value::Bin(decode_bytes(decoder)?),
        7 => {
            let len = decode_len(decoder)?;
            let mut items = Vec::with_capacity(len.min(PREALLOC));
            for _ in 0..len {
                decoder.claim_bytes_read(mem::size_of::<Value>())?;
                items.push(decode_value(decoder, depth + 1)?);
            }
            Value::Array(items)
        }
        8 => {
            let len = decode_len(decoder)?;
            let mut entries = Vec::with_capacity(len.min(PREALLOC));
            for _ in 0..len {
                decoder.claim_bytes_read(mem::size_of::<(Value, Value)>())?;
                let key = decode_value(decoder, depth + 1)?;
                let value = decode_value(decoder, depth + 1)?;
                entries.push((key, value));
            }
            Value::Map(entries)
        }
        found => {
            return Err(DecodeError::UnexpectedVariant {
                type_name: "Value",
                allowed: &AllowedEnumVariants::Range { min: 0, max: 8 },
                found,
            });
        }
    };
    Ok(value)
}

/// Every element takes at least one byte, so no honest length exceeds the message cap.
fn decode_len<D: Decoder>(decoder: &mut D) -> Result<usize, DecodeError> {
    let len = u64::decode(decoder)?;
    match usize::try_from(len) {
        Ok(len) if len <= MAX_MESSAGE_SIZE => Ok(len),
        _ => Err(DecodeError::Other("length prefix exceeds the message size limit")),
    }
}

fn decode_bytes<D: Decoder>(decoder: &mut D) -> Result<Vec<u8>, DecodeError> {
    let len = decode_len(decoder)?;
    decoder.claim_bytes_read(len)?;
    let mut bytes = vec![0u8; len];
    decoder.reader().read(&mut bytes)?;
    Ok(bytes)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::UInt(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Bin(bytes) => write!(f, "<{} bytes>", bytes.len()),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Map(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

macro_rules! impl_from {
    ($variant:ident, $cast:ty, $($t:ty),+) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::$variant(v as $cast)
                }
            }
        )+
    };
}

impl_from!(Int, i64, i8, i16, i32, i64);
impl_from!(UInt, u64, u8, u16, u32, u64);
impl_from!(Float, f64, f32, f64);

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Nil, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_accessors_cross_signedness() {
        assert_eq!(Value::Int(5).as_u64(), Some(5));
        assert_eq!(Value::Int(-1).as_u64(), None);
        assert_eq!(Value::UInt(u64::MAX).as_i64(), None);
        assert_eq!(Value::UInt(7).as_i64(), Some(7));
    }

    #[test]
    fn conversions() {
        assert_eq!(Value::from(3i32), Value::Int(3));
        assert_eq!(Value::from(3u8), Value::UInt(3));
        assert_eq!(Value::from("sum"), Value::Str("sum".into()));
        assert_eq!(Value::from(None::<i32>), Value::Nil);
        assert_eq!(
            Value::from(vec![Value::from(1i64), Value::from(true)]),
            Value::Array(vec![Value::Int(1), Value::Bool(true)])
        );
    }

    #[test]
    fn depth_counts_containers() {
        assert_eq!(Value::Nil.depth(), 1);
        assert_eq!(Value::Array(vec![]).depth(), 1);
        let value = Value::Map(vec![(Value::Nil, Value::Array(vec![Value::Int(1)]))]);
        assert_eq!(value.depth(), 3);
    }

    #[test]
    fn display_nested() {
        let value = Value::Map(vec![(
            Value::from("xs"),
            Value::Array(vec![Value::Int(1), Value::Nil]),
        )]);
        assert_eq!(value.to_string(), r#"{"xs": [1, nil]}"#);
    }
}
