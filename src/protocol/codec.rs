//! Byte-level encoding of [`Value`] trees.
//!
//! Values are serialized with bincode. The encoding is self-delimiting, so a
//! receiver can feed arbitrarily sized chunks into a [`StreamDecoder`] and pull out
//! complete values as soon as their last byte arrives; whatever follows stays
//! buffered for the next message.
use bincode::{
    config::{BigEndian, Configuration, Fixint, Limit, LittleEndian, Varint},
    decode_from_slice, encode_to_vec,
    error::DecodeError,
};
use log::trace;

use crate::error::{Result, RpcError};

use super::{Envelope, MAX_DEPTH, Value};

/// Upper bound on a single encoded message, in wire bytes.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

// Memory bincode may claim while decoding. Each container element claims the size of
// a `Value` and takes at least one wire byte, so any message under the wire cap fits.
const DECODE_BUDGET: usize = MAX_MESSAGE_SIZE * std::mem::size_of::<Value>();

type CompactConfig = Configuration<LittleEndian, Varint, Limit<DECODE_BUDGET>>;
type FixedConfig = Configuration<BigEndian, Fixint, Limit<DECODE_BUDGET>>;

/// Integer layout used on the wire. Both peers must agree.
///
/// Strings are always UTF-8; this only selects how integers and length prefixes
/// are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    /// Little-endian, variable-length integers.
    #[default]
    Compact,
    /// Big-endian, fixed-width integers.
    Fixed,
}

impl Encoding {
    fn compact() -> CompactConfig {
        bincode::config::standard().with_limit::<DECODE_BUDGET>()
    }

    fn fixed() -> FixedConfig {
        bincode::config::standard()
            .with_big_endian()
            .with_fixed_int_encoding()
            .with_limit::<DECODE_BUDGET>()
    }

    /// Serializes a single value.
    ///
    /// Fails with a serialization error if the value nests deeper than
    /// [`MAX_DEPTH`] or encodes to more than [`MAX_MESSAGE_SIZE`] bytes, since the
    /// receiving side would reject it.
    pub fn pack(self, value: &Value) -> Result<Vec<u8>> {
        let depth = value.depth();
        if depth > MAX_DEPTH {
            return Err(RpcError::Serialization(format!(
                "value nests {depth} levels deep, limit is {MAX_DEPTH}"
            )));
        }

        let bytes = match self {
            Encoding::Compact => encode_to_vec(value, Self::compact())?,
            Encoding::Fixed => encode_to_vec(value, Self::fixed())?,
        };

        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(RpcError::Serialization(format!(
                "encoded message is {} bytes, limit is {MAX_MESSAGE_SIZE}",
                bytes.len()
            )));
        }
        Ok(bytes)
    }

    fn unpack(self, bytes: &[u8]) -> std::result::Result<(Value, usize), DecodeError> {
        match self {
            Encoding::Compact => decode_from_slice(bytes, Self::compact()),
            Encoding::Fixed => decode_from_slice(bytes, Self::fixed()),
        }
    }
}

/// Encodes an envelope into one contiguous byte run.
pub fn encode(envelope: Envelope, encoding: Encoding) -> Result<Vec<u8>> {
    encoding.pack(&envelope.into_value())
}

/// Incremental decoder that retains partial input across feeds.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    encoding: Encoding,
    buf: Vec<u8>,
    // Lower bound on the buffer length before another decode attempt can succeed.
    wanted: usize,
}

impl StreamDecoder {
    pub fn new(encoding: Encoding) -> Self {
        Self {
            encoding,
            buf: Vec::new(),
            wanted: 0,
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of bytes received but not yet consumed by a decoded value.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Returns the next complete value, or `None` if more input is needed.
    pub fn try_next(&mut self) -> Result<Option<Value>> {
        if self.buf.is_empty() || self.buf.len() < self.wanted {
            return Ok(None);
        }

        match self.encoding.unpack(&self.buf) {
            Ok((_, consumed)) if consumed > MAX_MESSAGE_SIZE => {
                self.reset();
                Err(oversized())
            }
            Ok((value, consumed)) => {
                trace!("decoded {consumed} bytes, {} left", self.buf.len() - consumed);
                self.buf.drain(..consumed);
                self.wanted = 0;
                Ok(Some(value))
            }
            // The message starts at the head of the buffer, so this bounds its length.
            Err(DecodeError::UnexpectedEnd { additional }) => {
                let wanted = self.buf.len().saturating_add(additional);
                if wanted > MAX_MESSAGE_SIZE {
                    self.reset();
                    return Err(oversized());
                }
                self.wanted = wanted;
                Ok(None)
            }
            Err(e) => {
                self.reset();
                Err(e.into())
            }
        }
    }

    fn reset(&mut self) {
        self.buf.clear();
        self.wanted = 0;
    }
}

fn oversized() -> RpcError {
    RpcError::Protocol(format!("incoming message exceeds {MAX_MESSAGE_SIZE} bytes"))
}

impl Iterator for StreamDecoder {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        self.try_next().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sum_request() -> Envelope {
        Envelope::request(7, "sum", vec![Value::Int(1), Value::Int(2)])
    }

    #[test]
    fn request_round_trip() {
        for encoding in [Encoding::Compact, Encoding::Fixed] {
            let bytes = encode(sum_request(), encoding).unwrap();
            let mut decoder = StreamDecoder::new(encoding);
            decoder.feed(&bytes);

            let value = decoder.try_next().unwrap().unwrap();
            assert_eq!(Envelope::from_value(value).unwrap(), sum_request());
            assert_eq!(decoder.buffered(), 0);
        }
    }

    #[test]
    fn decodes_byte_at_a_time() {
        let bytes = encode(sum_request(), Encoding::Compact).unwrap();
        let mut decoder = StreamDecoder::new(Encoding::Compact);

        let (last, head) = bytes.split_last().unwrap();
        for b in head {
            decoder.feed(std::slice::from_ref(b));
            assert_eq!(decoder.try_next().unwrap(), None);
        }
        decoder.feed(std::slice::from_ref(last));
        assert!(decoder.try_next().unwrap().is_some());
    }

    #[test]
    fn retains_bytes_of_the_next_message() {
        let first = encode(sum_request(), Encoding::Compact).unwrap();
        let second = encode(
            Envelope::request(8, "echo", vec![Value::from("hi")]),
            Encoding::Compact,
        )
        .unwrap();

        let mut decoder = StreamDecoder::new(Encoding::Compact);
        decoder.feed(&first);
        decoder.feed(&second[..2]);

        let value = decoder.try_next().unwrap().unwrap();
        assert_eq!(Envelope::from_value(value).unwrap().msgid(), Some(7));
        assert_eq!(decoder.buffered(), 2);
        assert_eq!(decoder.try_next().unwrap(), None);

        decoder.feed(&second[2..]);
        let value = decoder.try_next().unwrap().unwrap();
        assert_eq!(Envelope::from_value(value).unwrap().msgid(), Some(8));
    }

    #[test]
    fn iterates_over_complete_values() {
        let mut decoder = StreamDecoder::new(Encoding::Fixed);
        for i in 0..3u64 {
            decoder.feed(&Encoding::Fixed.pack(&Value::UInt(i)).unwrap());
        }

        let values: Vec<Value> = decoder.by_ref().map(|v| v.unwrap()).collect();
        assert_eq!(values, vec![Value::UInt(0), Value::UInt(1), Value::UInt(2)]);
        assert_eq!(decoder.next().map(|v| v.is_ok()), None);
    }

    #[test]
    fn rejects_unknown_variant_tag() {
        let mut decoder = StreamDecoder::new(Encoding::Compact);
        decoder.feed(&[0xfa, 0x00]);
        assert!(matches!(decoder.try_next(), Err(RpcError::Protocol(_))));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn large_array_round_trips() {
        let value = Value::Array((0..600_000u64).map(|i| Value::UInt(i % 100)).collect());
        for encoding in [Encoding::Compact, Encoding::Fixed] {
            let bytes = encoding.pack(&value).unwrap();
            let mut decoder = StreamDecoder::new(encoding);
            decoder.feed(&bytes);
            assert_eq!(decoder.try_next().unwrap().as_ref(), Some(&value));
        }
    }

    #[test]
    fn large_map_round_trips() {
        let value = Value::Map(
            (0..300_000u64)
                .map(|i| (Value::UInt(i % 7), Value::Nil))
                .collect(),
        );
        let bytes = Encoding::Compact.pack(&value).unwrap();
        let mut decoder = StreamDecoder::new(Encoding::Compact);
        decoder.feed(&bytes);
        assert_eq!(decoder.try_next().unwrap(), Some(value));
    }

    fn nested(levels: usize) -> Value {
        let mut value = Value::Nil;
        for _ in 1..levels {
            value = Value::Array(vec![value]);
        }
        value
    }

    #[test]
    fn rejects_deeply_nested_values() {
        // One-element arrays: variant 7, length 1, innermost nil.
        let mut bytes = [7u8, 1].repeat(200_000);
        bytes.push(0);

        let mut decoder = StreamDecoder::new(Encoding::Compact);
        decoder.feed(&bytes);
        assert!(matches!(decoder.try_next(), Err(RpcError::Protocol(_))));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn nesting_up_to_the_limit_is_accepted() {
        let value = nested(MAX_DEPTH);
        let bytes = Encoding::Compact.pack(&value).unwrap();
        let mut decoder = StreamDecoder::new(Encoding::Compact);
        decoder.feed(&bytes);
        assert_eq!(decoder.try_next().unwrap(), Some(value));

        assert!(matches!(
            Encoding::Compact.pack(&nested(MAX_DEPTH + 1)),
            Err(RpcError::Serialization(_))
        ));
    }

    #[test]
    fn rejects_oversized_length_prefix() {
        // Bin with a u64 length of 2^40 behind a varint marker.
        let mut bytes = vec![6u8, 0xfd];
        bytes.extend((1u64 << 40).to_le_bytes());

        let mut decoder = StreamDecoder::new(Encoding::Compact);
        decoder.feed(&bytes);
        assert!(matches!(decoder.try_next(), Err(RpcError::Protocol(_))));
    }

    #[test]
    fn rejects_messages_over_the_size_cap() {
        // Two byte strings that each fit, but not together.
        let half = (MAX_MESSAGE_SIZE / 2 + 1) as u32;
        let mut bytes = vec![7u8, 2, 6, 0xfc];
        bytes.extend(half.to_le_bytes());
        bytes.resize(bytes.len() + half as usize, 0);
        bytes.extend([6u8, 0xfc]);
        bytes.extend(half.to_le_bytes());

        let mut decoder = StreamDecoder::new(Encoding::Compact);
        decoder.feed(&bytes);
        assert!(matches!(decoder.try_next(), Err(RpcError::Protocol(_))));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn rejects_oversized_values_when_packing() {
        let value = Value::Bin(vec![0; MAX_MESSAGE_SIZE]);
        assert!(matches!(
            Encoding::Compact.pack(&value),
            Err(RpcError::Serialization(_))
        ));
    }

    #[test]
    fn encodings_are_not_interchangeable() {
        let bytes = Encoding::Fixed.pack(&Value::UInt(300)).unwrap();
        let compact = Encoding::Compact.pack(&Value::UInt(300)).unwrap();
        assert_ne!(bytes, compact);
    }
}
