//! Self-describing value encoding used on every read/write path. The wire
//! layout is `[4-byte big-endian checksum][1-byte tag][payload]`; empty raw
//! bytes denote a deletion tombstone rather than any concrete type.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::{Mutex, PoisonError};

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use crc32fast::Hasher;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::duration::Duration;
use crate::encoding::{
    EncodingError, MAX_VARINT_LEN64, decode_duration_ascending, decode_nonsorting_decimal,
    decode_time_ascending, decode_uint32_ascending, decode_uint64_ascending,
    encode_duration_ascending, encode_nonsorting_decimal, encode_time_ascending,
    encode_uint64_ascending, multi_varint_ascending_len, put_varint,
    upper_bound_nonsorting_decimal_size, varint,
};
use crate::keys::{Key, pretty_key};
use crate::timeseries::InternalTimeSeriesData;
use crate::timestamp::Timestamp;

/// Size of the leading checksum field.
pub const CHECKSUM_SIZE: usize = 4;
/// Offset of the type tag byte.
pub const TAG_POS: usize = CHECKSUM_SIZE;
/// Combined size of the checksum and tag header.
pub const HEADER_SIZE: usize = TAG_POS + 1;

const CHECKSUM_UNINITIALIZED: u32 = 0;

const TIME_SIZE_ESTIMATE: usize = 16;
const DURATION_SIZE_ESTIMATE: usize = 28;

/// Type tag identifying how a value payload is encoded. Discriminants are
/// part of the storage format and must not be reassigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ValueTag {
    Unknown = 0,
    Int = 1,
    Float = 2,
    Bytes = 3,
    Time = 4,
    Decimal = 5,
    Duration = 6,
    Null = 7,
    DelimitedBytes = 8,
    DelimitedDecimal = 9,
    /// Same payload shape as `Bytes` (a serialized time-series batch);
    /// distinguished purely by tag.
    Timeseries = 100,
}

impl ValueTag {
    pub fn from_byte(b: u8) -> Option<ValueTag> {
        match b {
            0 => Some(ValueTag::Unknown),
            1 => Some(ValueTag::Int),
            2 => Some(ValueTag::Float),
            3 => Some(ValueTag::Bytes),
            4 => Some(ValueTag::Time),
            5 => Some(ValueTag::Decimal),
            6 => Some(ValueTag::Duration),
            7 => Some(ValueTag::Null),
            8 => Some(ValueTag::DelimitedBytes),
            9 => Some(ValueTag::DelimitedDecimal),
            100 => Some(ValueTag::Timeseries),
            _ => None,
        }
    }
}

impl fmt::Display for ValueTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueTag::Unknown => "UNKNOWN",
            ValueTag::Int => "INT",
            ValueTag::Float => "FLOAT",
            ValueTag::Bytes => "BYTES",
            ValueTag::Time => "TIME",
            ValueTag::Decimal => "DECIMAL",
            ValueTag::Duration => "DURATION",
            ValueTag::Null => "NULL",
            ValueTag::DelimitedBytes => "DELIMITED_BYTES",
            ValueTag::DelimitedDecimal => "DELIMITED_DECIMAL",
            ValueTag::Timeseries => "TIMESERIES",
        };
        f.write_str(name)
    }
}

/// Recoverable errors raised by the value codec.
#[derive(Debug, Error)]
pub enum ValueError {
    #[error("buffer is empty")]
    Empty,
    #[error("unknown value tag {0}")]
    UnknownTag(u8),
    #[error("value type is not {expected}: {actual}")]
    TagMismatch {
        expected: ValueTag,
        actual: ValueTag,
    },
    #[error("value type is not {expected} or {alternate}: {actual}")]
    EitherTagMismatch {
        expected: ValueTag,
        alternate: ValueTag,
        actual: ValueTag,
    },
    #[error("not a self-delimiting tag: {0}")]
    NotSelfDelimiting(ValueTag),
    #[error("float64 value should be exactly 8 bytes: {0}")]
    BadFloatLength(usize),
    #[error("negative length prefix: {0}")]
    NegativeLength(i64),
    #[error("payload truncated: need {needed} bytes, have {have}")]
    TruncatedPayload { needed: usize, have: usize },
    #[error("{key}: invalid header size: {size}")]
    InvalidHeaderSize { key: String, size: usize },
    #[error("{key}: invalid checksum: stored {stored:08x}, computed {computed:08x}")]
    ChecksumMismatch {
        key: String,
        stored: u32,
        computed: u32,
    },
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    #[error("proto decoding failed: {0}")]
    ProtoDecode(#[from] prost::DecodeError),
}

/// Pool of reusable CRC-32 accumulators for the checksum hot path.
/// Acquisition yields an accumulator no other caller holds; release resets
/// it before returning it to the pool.
#[derive(Default)]
struct ChecksumPool {
    hashers: Mutex<Vec<Hasher>>,
}

impl ChecksumPool {
    fn acquire(&self) -> PooledHasher<'_> {
        let hasher = self
            .hashers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_default();
        PooledHasher { pool: self, hasher }
    }
}

struct PooledHasher<'a> {
    pool: &'a ChecksumPool,
    hasher: Hasher,
}

impl PooledHasher<'_> {
    fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    fn sum32(&self) -> u32 {
        self.hasher.clone().finalize()
    }
}

impl Drop for PooledHasher<'_> {
    fn drop(&mut self) {
        self.hasher.reset();
        self.pool
            .hashers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(std::mem::take(&mut self.hasher));
    }
}

static CHECKSUM_POOL: Lazy<ChecksumPool> = Lazy::new(ChecksumPool::default);

fn expect_tag(b: &[u8], expected: ValueTag) -> Result<&[u8], ValueError> {
    match b.split_first() {
        None => Err(ValueError::Empty),
        Some((&byte, rest)) => {
            let actual = ValueTag::from_byte(byte).ok_or(ValueError::UnknownTag(byte))?;
            if actual != expected {
                return Err(ValueError::TagMismatch { expected, actual });
            }
            Ok(rest)
        }
    }
}

fn delimited_slice(b: &[u8]) -> Result<(&[u8], &[u8]), ValueError> {
    let (len, n) = varint(b)?;
    let len = usize::try_from(len).map_err(|_| ValueError::NegativeLength(len))?;
    let end = n + len;
    if b.len() < end {
        return Err(ValueError::TruncatedPayload {
            needed: end,
            have: b.len(),
        });
    }
    Ok((&b[end..], &b[n..end]))
}

/// Appends an INT value (tag plus zig-zag varint).
pub fn encode_int_value(mut append_to: Vec<u8>, i: i64) -> Vec<u8> {
    append_to.push(ValueTag::Int as u8);
    put_varint(append_to, i)
}

/// Appends a FLOAT value (tag plus the big-endian IEEE-754 bit pattern).
pub fn encode_float_value(mut append_to: Vec<u8>, f: f64) -> Vec<u8> {
    append_to.push(ValueTag::Float as u8);
    encode_uint64_ascending(append_to, f.to_bits())
}

/// Appends a BYTES or DELIMITED_BYTES value. The non-delimited form carries
/// no length; its extent must come from an external bound such as the total
/// buffer length.
pub fn encode_bytes_value(mut append_to: Vec<u8>, data: &[u8], delimited: bool) -> Vec<u8> {
    if delimited {
        append_to.push(ValueTag::DelimitedBytes as u8);
        append_to = put_varint(append_to, data.len() as i64);
    } else {
        append_to.push(ValueTag::Bytes as u8);
    }
    append_to.extend_from_slice(data);
    append_to
}

/// Appends a TIME value.
pub fn encode_time_value(mut append_to: Vec<u8>, t: DateTime<Utc>) -> Vec<u8> {
    append_to.push(ValueTag::Time as u8);
    encode_time_ascending(append_to, t)
}

/// Appends a DURATION value; fails when the duration cannot be flattened for
/// ordering.
pub fn encode_duration_value(mut append_to: Vec<u8>, d: Duration) -> Result<Vec<u8>, ValueError> {
    append_to.push(ValueTag::Duration as u8);
    Ok(encode_duration_ascending(append_to, d)?)
}

/// Appends a DECIMAL or DELIMITED_DECIMAL value.
pub fn encode_decimal_value(mut append_to: Vec<u8>, d: &BigDecimal, delimited: bool) -> Vec<u8> {
    if delimited {
        append_to.push(ValueTag::DelimitedDecimal as u8);
        let payload = encode_nonsorting_decimal(Vec::new(), d);
        append_to = put_varint(append_to, payload.len() as i64);
        append_to.extend_from_slice(&payload);
        return append_to;
    }
    append_to.push(ValueTag::Decimal as u8);
    encode_nonsorting_decimal(append_to, d)
}

/// Decodes a value written by [`encode_int_value`], returning the unconsumed
/// tail alongside the value.
pub fn decode_int_value(b: &[u8]) -> Result<(&[u8], i64), ValueError> {
    let b = expect_tag(b, ValueTag::Int)?;
    let (i, n) = varint(b)?;
    Ok((&b[n..], i))
}

/// Decodes a value written by [`encode_float_value`].
pub fn decode_float_value(b: &[u8]) -> Result<(&[u8], f64), ValueError> {
    let b = expect_tag(b, ValueTag::Float)?;
    if b.len() < 8 {
        return Err(ValueError::BadFloatLength(b.len()));
    }
    let (rest, bits) = decode_uint64_ascending(b)?;
    Ok((rest, f64::from_bits(bits)))
}

/// Decodes a value written by [`encode_bytes_value`]. The non-delimited form
/// consumes the remainder of the buffer.
pub fn decode_bytes_value(b: &[u8]) -> Result<(&[u8], &[u8]), ValueError> {
    let (&byte, rest) = b.split_first().ok_or(ValueError::Empty)?;
    let tag = ValueTag::from_byte(byte).ok_or(ValueError::UnknownTag(byte))?;
    match tag {
        ValueTag::Bytes => Ok((&rest[rest.len()..], rest)),
        ValueTag::DelimitedBytes => delimited_slice(rest),
        actual => Err(ValueError::EitherTagMismatch {
            expected: ValueTag::Bytes,
            alternate: ValueTag::DelimitedBytes,
            actual,
        }),
    }
}

/// Decodes a value written by [`encode_time_value`].
pub fn decode_time_value(b: &[u8]) -> Result<(&[u8], DateTime<Utc>), ValueError> {
    let b = expect_tag(b, ValueTag::Time)?;
    Ok(decode_time_ascending(b)?)
}

/// Decodes a value written by [`encode_duration_value`].
pub fn decode_duration_value(b: &[u8]) -> Result<(&[u8], Duration), ValueError> {
    let b = expect_tag(b, ValueTag::Duration)?;
    Ok(decode_duration_ascending(b)?)
}

/// Decodes a value written by [`encode_decimal_value`]. The non-delimited
/// form consumes the remainder of the buffer.
pub fn decode_decimal_value(b: &[u8]) -> Result<(&[u8], BigDecimal), ValueError> {
    let (&byte, rest) = b.split_first().ok_or(ValueError::Empty)?;
    let tag = ValueTag::from_byte(byte).ok_or(ValueError::UnknownTag(byte))?;
    match tag {
        ValueTag::Decimal => {
            let d = decode_nonsorting_decimal(rest)?;
            Ok((&rest[rest.len()..], d))
        }
        ValueTag::DelimitedDecimal => {
            let (tail, payload) = delimited_slice(rest)?;
            Ok((tail, decode_nonsorting_decimal(payload)?))
        }
        actual => Err(ValueError::EitherTagMismatch {
            expected: ValueTag::Decimal,
            alternate: ValueTag::DelimitedDecimal,
            actual,
        }),
    }
}

/// Returns how many bytes the single encoded value at the head of `b`
/// occupies, without decoding it. Success does not guarantee that decoding
/// will succeed.
pub fn peek_value_length(b: &[u8]) -> Result<usize, ValueError> {
    let &byte = b.first().ok_or(ValueError::Empty)?;
    let tag = ValueTag::from_byte(byte).ok_or(ValueError::UnknownTag(byte))?;
    match tag {
        ValueTag::Null => Ok(1),
        ValueTag::Int => {
            let (_, n) = varint(&b[1..])?;
            Ok(1 + n)
        }
        ValueTag::Float => Ok(9),
        ValueTag::DelimitedBytes | ValueTag::DelimitedDecimal => {
            let (len, n) = varint(&b[1..])?;
            let len = usize::try_from(len).map_err(|_| ValueError::NegativeLength(len))?;
            Ok(1 + n + len)
        }
        ValueTag::Time => Ok(1 + multi_varint_ascending_len(&b[1..], 2)?),
        ValueTag::Duration => Ok(1 + multi_varint_ascending_len(&b[1..], 3)?),
        ValueTag::Bytes | ValueTag::Decimal => Err(ValueError::NotSelfDelimiting(tag)),
        ValueTag::Unknown | ValueTag::Timeseries => Err(ValueError::UnknownTag(byte)),
    }
}

fn header_buffer(payload_estimate: usize) -> Vec<u8> {
    let mut b = Vec::with_capacity(HEADER_SIZE + payload_estimate);
    b.resize(CHECKSUM_SIZE, 0);
    b
}

/// A self-describing value paired with its MVCC timestamp.
///
/// Empty `raw_bytes` mean "no value" (an absence marker or deletion
/// tombstone); non-empty raw bytes are at least [`HEADER_SIZE`] long. A
/// stored checksum of zero means the checksum has not been computed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Value {
    pub raw_bytes: Vec<u8>,
    pub timestamp: Timestamp,
}

impl Value {
    /// Returns a value with bytes and tag set.
    pub fn from_bytes(data: &[u8]) -> Value {
        let mut v = Value::default();
        v.set_bytes(data);
        v
    }

    /// Returns a value with bytes and tag set; specialized for strings.
    pub fn from_string(s: &str) -> Value {
        let mut v = Value::default();
        v.set_string(s);
        v
    }

    /// Returns a value with bytes, timestamp and tag set.
    pub fn from_bytes_and_timestamp(data: &[u8], timestamp: Timestamp) -> Value {
        let mut v = Value {
            timestamp,
            ..Value::default()
        };
        v.set_bytes(data);
        v
    }

    /// The stored checksum, or zero when the raw bytes are too short to hold
    /// one.
    pub fn checksum(&self) -> u32 {
        if self.raw_bytes.len() < CHECKSUM_SIZE {
            return 0;
        }
        decode_uint32_ascending(&self.raw_bytes[..CHECKSUM_SIZE])
            .map(|(_, sum)| sum)
            .unwrap_or(CHECKSUM_UNINITIALIZED)
    }

    fn set_checksum(&mut self, sum: u32) {
        if self.raw_bytes.len() >= CHECKSUM_SIZE {
            self.raw_bytes[..CHECKSUM_SIZE].copy_from_slice(&sum.to_be_bytes());
        }
    }

    /// Computes and stores a checksum over the supplied key and the value's
    /// tag and payload. A no-op on an empty value.
    ///
    /// # Panics
    ///
    /// Panics when a checksum was already initialized without an intervening
    /// [`Value::clear_checksum`]; double initialization is a caller contract
    /// violation.
    pub fn init_checksum(&mut self, key: &[u8]) {
        if self.raw_bytes.is_empty() {
            return;
        }
        let existing = self.checksum();
        if existing != CHECKSUM_UNINITIALIZED {
            panic!("initialized checksum = {existing:x}");
        }
        let sum = self.compute_checksum(key);
        self.set_checksum(sum);
    }

    /// Resets the checksum field to the uninitialized sentinel.
    pub fn clear_checksum(&mut self) {
        self.set_checksum(CHECKSUM_UNINITIALIZED);
    }

    /// Recomputes the checksum against the supplied key and compares it to
    /// the stored one. A no-op when no checksum was stored.
    pub fn verify(&self, key: &[u8]) -> Result<(), ValueError> {
        let n = self.raw_bytes.len();
        if n > 0 && n < HEADER_SIZE {
            return Err(ValueError::InvalidHeaderSize {
                key: pretty_key(key),
                size: n,
            });
        }
        let stored = self.checksum();
        if stored != CHECKSUM_UNINITIALIZED {
            let computed = self.compute_checksum(key);
            if computed != stored {
                warn!(
                    key = %pretty_key(key),
                    stored, computed, "value checksum mismatch"
                );
                return Err(ValueError::ChecksumMismatch {
                    key: pretty_key(key),
                    stored,
                    computed,
                });
            }
        }
        Ok(())
    }

    /// CRC-32 (IEEE) over the key bytes and the value's tag and payload. The
    /// reserved sentinel zero is never returned; a raw sum of zero is folded
    /// to one.
    fn compute_checksum(&self, key: &[u8]) -> u32 {
        if self.raw_bytes.len() < HEADER_SIZE {
            return 0;
        }
        let mut crc = CHECKSUM_POOL.acquire();
        crc.update(key);
        crc.update(&self.raw_bytes[CHECKSUM_SIZE..]);
        let sum = crc.sum32();
        if sum == CHECKSUM_UNINITIALIZED {
            return 1;
        }
        sum
    }

    /// The value's type tag, or `Unknown` when the raw bytes are too short
    /// to carry one.
    pub fn tag(&self) -> ValueTag {
        if self.raw_bytes.len() <= TAG_POS {
            return ValueTag::Unknown;
        }
        ValueTag::from_byte(self.raw_bytes[TAG_POS]).unwrap_or(ValueTag::Unknown)
    }

    fn set_tag(&mut self, tag: ValueTag) {
        self.raw_bytes[TAG_POS] = tag as u8;
    }

    /// The tag byte and payload, skipping the checksum field.
    fn tagged_bytes(&self) -> &[u8] {
        &self.raw_bytes[CHECKSUM_SIZE.min(self.raw_bytes.len())..]
    }

    fn data_bytes(&self) -> &[u8] {
        &self.raw_bytes[HEADER_SIZE..]
    }

    /// Sets the bytes and tag field of the receiver and clears the checksum.
    pub fn set_bytes(&mut self, data: &[u8]) {
        self.raw_bytes = encode_bytes_value(header_buffer(1 + data.len()), data, false);
    }

    /// Identical to [`Value::set_bytes`], specialized for a string argument.
    pub fn set_string(&mut self, s: &str) {
        self.set_bytes(s.as_bytes());
    }

    /// Encodes an int into the receiver, sets the tag and clears the
    /// checksum.
    pub fn set_int(&mut self, i: i64) {
        self.raw_bytes = encode_int_value(header_buffer(1 + MAX_VARINT_LEN64), i);
    }

    /// Encodes a float into the receiver, sets the tag and clears the
    /// checksum.
    pub fn set_float(&mut self, f: f64) {
        self.raw_bytes = encode_float_value(header_buffer(9), f);
    }

    /// Encodes an instant into the receiver, sets the tag and clears the
    /// checksum.
    pub fn set_time(&mut self, t: DateTime<Utc>) {
        self.raw_bytes = encode_time_value(header_buffer(TIME_SIZE_ESTIMATE), t);
    }

    /// Encodes a calendar duration into the receiver, sets the tag and
    /// clears the checksum.
    pub fn set_duration(&mut self, d: Duration) -> Result<(), ValueError> {
        self.raw_bytes = encode_duration_value(header_buffer(DURATION_SIZE_ESTIMATE), d)?;
        Ok(())
    }

    /// Encodes a decimal into the receiver, sets the tag and clears the
    /// checksum.
    pub fn set_decimal(&mut self, d: &BigDecimal) {
        self.raw_bytes = encode_decimal_value(
            header_buffer(1 + upper_bound_nonsorting_decimal_size(d)),
            d,
            false,
        );
    }

    /// Marshals a structured message into the receiver and clears the
    /// checksum. A message of the distinguished time-series type is tagged
    /// `TIMESERIES` rather than `BYTES` so it decodes only via
    /// [`Value::get_timeseries`].
    pub fn set_proto<M>(&mut self, msg: &M)
    where
        M: prost::Message + Any,
    {
        let data = msg.encode_to_vec();
        self.set_bytes(&data);
        if (msg as &dyn Any)
            .downcast_ref::<InternalTimeSeriesData>()
            .is_some()
        {
            self.set_tag(ValueTag::Timeseries);
        }
    }

    /// The raw payload when the tag is `BYTES`.
    pub fn get_bytes(&self) -> Result<&[u8], ValueError> {
        // Skips decode_bytes_value; a direct tag check avoids the dispatch on
        // the hot read path.
        let tag = self.tag();
        if tag != ValueTag::Bytes {
            return Err(ValueError::TagMismatch {
                expected: ValueTag::Bytes,
                actual: tag,
            });
        }
        Ok(self.data_bytes())
    }

    /// Decodes an int payload; fails unless the tag is `INT`.
    pub fn get_int(&self) -> Result<i64, ValueError> {
        let (_, i) = decode_int_value(self.tagged_bytes())?;
        Ok(i)
    }

    /// Decodes a float payload; fails unless the tag is `FLOAT`.
    pub fn get_float(&self) -> Result<f64, ValueError> {
        let (_, f) = decode_float_value(self.tagged_bytes())?;
        Ok(f)
    }

    /// Decodes an instant payload; fails unless the tag is `TIME`.
    pub fn get_time(&self) -> Result<DateTime<Utc>, ValueError> {
        let (_, t) = decode_time_value(self.tagged_bytes())?;
        Ok(t)
    }

    /// Decodes a duration payload; fails unless the tag is `DURATION`.
    pub fn get_duration(&self) -> Result<Duration, ValueError> {
        let (_, d) = decode_duration_value(self.tagged_bytes())?;
        Ok(d)
    }

    /// Decodes a decimal payload; fails unless the tag is `DECIMAL`.
    pub fn get_decimal(&self) -> Result<BigDecimal, ValueError> {
        let (_, d) = decode_decimal_value(self.tagged_bytes())?;
        Ok(d)
    }

    /// Unmarshals the payload into a structured message. Expects the
    /// `TIMESERIES` tag for the distinguished time-series type and `BYTES`
    /// for everything else.
    pub fn get_proto<M>(&self) -> Result<M, ValueError>
    where
        M: prost::Message + Default + Any,
    {
        let expected = if TypeId::of::<M>() == TypeId::of::<InternalTimeSeriesData>() {
            ValueTag::Timeseries
        } else {
            ValueTag::Bytes
        };
        let actual = self.tag();
        if actual != expected {
            return Err(ValueError::TagMismatch { expected, actual });
        }
        Ok(M::decode(self.data_bytes())?)
    }

    /// Decodes a time-series batch; fails unless the tag is `TIMESERIES`.
    pub fn get_timeseries(&self) -> Result<InternalTimeSeriesData, ValueError> {
        self.get_proto()
    }
}

/// A key paired with the value stored at it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: Key,
    pub value: Value,
}

/// Sorts key/value pairs by key, byte-lexicographically.
pub fn sort_key_values(kvs: &mut [KeyValue]) {
    kvs.sort_by(|a, b| a.key.cmp(&b.key));
}
