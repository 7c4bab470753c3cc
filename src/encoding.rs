//! Low-level byte encodings shared by the value codec: big-endian fixed-width
//! integers, the standard zig-zag varint, and an order-preserving varint used
//! by the multi-field time and duration payloads.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use num_bigint::BigInt;
use thiserror::Error;

use crate::duration::{Duration, DurationError};

/// Maximum encoded size of a zig-zag varint.
pub const MAX_VARINT_LEN64: usize = 10;

// Marker-byte layout of the order-preserving varint. Markers below INT_ZERO
// denote negative values (payload width 8 down to 1), markers in
// [INT_ZERO, INT_ZERO+INT_SMALL] encode small non-negative values inline,
// and markers above encode the payload width (1 up to 8).
const INT_MIN: u8 = 0x80;
const INT_MAX_WIDTH: i32 = 8;
const INT_ZERO: i32 = INT_MIN as i32 + INT_MAX_WIDTH;
const INT_MAX: u8 = 0xfd;
const INT_SMALL: i32 = INT_MAX as i32 - INT_ZERO - INT_MAX_WIDTH;

/// Recoverable malformed-input errors raised while decoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodingError {
    #[error("insufficient bytes to decode {what}: need {needed}, have {have}")]
    BufferTooShort {
        what: &'static str,
        needed: usize,
        have: usize,
    },
    #[error("varint decoding failed: truncated input")]
    VarintTruncated,
    #[error("varint decoding failed: value overflows 64 bits")]
    VarintOverflow,
    #[error("invalid uvarint length marker {0:#04x}")]
    InvalidUvarintLength(u8),
    #[error("varint decodes to a value out of the signed range")]
    VarintOutOfRange,
    #[error("invalid time payload: {seconds}s {nanos}ns")]
    InvalidTime { seconds: i64, nanos: i64 },
    #[error(transparent)]
    Duration(#[from] DurationError),
}

/// Appends a big-endian `u32`; the byte order preserves numeric order.
pub fn encode_uint32_ascending(mut append_to: Vec<u8>, v: u32) -> Vec<u8> {
    append_to.extend_from_slice(&v.to_be_bytes());
    append_to
}

/// Decodes a value written by [`encode_uint32_ascending`], returning the
/// unconsumed tail.
pub fn decode_uint32_ascending(b: &[u8]) -> Result<(&[u8], u32), EncodingError> {
    if b.len() < 4 {
        return Err(EncodingError::BufferTooShort {
            what: "uint32",
            needed: 4,
            have: b.len(),
        });
    }
    let v = u32::from_be_bytes([b[0], b[1], b[2], b[3]]);
    Ok((&b[4..], v))
}

/// Appends a big-endian `u64`; the byte order preserves numeric order.
pub fn encode_uint64_ascending(mut append_to: Vec<u8>, v: u64) -> Vec<u8> {
    append_to.extend_from_slice(&v.to_be_bytes());
    append_to
}

/// Decodes a value written by [`encode_uint64_ascending`], returning the
/// unconsumed tail.
pub fn decode_uint64_ascending(b: &[u8]) -> Result<(&[u8], u64), EncodingError> {
    if b.len() < 8 {
        return Err(EncodingError::BufferTooShort {
            what: "uint64",
            needed: 8,
            have: b.len(),
        });
    }
    let v = u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]);
    Ok((&b[8..], v))
}

/// Appends a standard zig-zag LEB128 varint.
pub fn put_varint(mut append_to: Vec<u8>, x: i64) -> Vec<u8> {
    let mut ux = ((x << 1) ^ (x >> 63)) as u64;
    while ux >= 0x80 {
        append_to.push(ux as u8 | 0x80);
        ux >>= 7;
    }
    append_to.push(ux as u8);
    append_to
}

/// Decodes a zig-zag varint from the head of `b`, returning the value and the
/// number of bytes consumed.
pub fn varint(b: &[u8]) -> Result<(i64, usize), EncodingError> {
    let mut ux: u64 = 0;
    let mut shift = 0u32;
    for (i, &byte) in b.iter().enumerate() {
        if i >= MAX_VARINT_LEN64 {
            return Err(EncodingError::VarintOverflow);
        }
        if byte < 0x80 {
            if i == MAX_VARINT_LEN64 - 1 && byte > 1 {
                return Err(EncodingError::VarintOverflow);
            }
            ux |= (byte as u64) << shift;
            let x = ((ux >> 1) as i64) ^ -((ux & 1) as i64);
            return Ok((x, i + 1));
        }
        ux |= ((byte & 0x7f) as u64) << shift;
        shift += 7;
    }
    Err(EncodingError::VarintTruncated)
}

/// Appends an order-preserving unsigned varint: encoded byte strings compare
/// lexicographically in the same order as the values they encode.
pub fn encode_uvarint_ascending(mut append_to: Vec<u8>, v: u64) -> Vec<u8> {
    if v <= INT_SMALL as u64 {
        append_to.push((INT_ZERO + v as i32) as u8);
        return append_to;
    }
    let be = v.to_be_bytes();
    let width = 8 - v.leading_zeros() as usize / 8;
    append_to.push(INT_MAX - 8 + width as u8);
    append_to.extend_from_slice(&be[8 - width..]);
    append_to
}

/// Appends an order-preserving signed varint.
pub fn encode_varint_ascending(mut append_to: Vec<u8>, v: i64) -> Vec<u8> {
    if v >= 0 {
        return encode_uvarint_ascending(append_to, v as u64);
    }
    let be = (v as u64).to_be_bytes();
    let width = match v {
        v if v >= -0xff => 1,
        v if v >= -0xffff => 2,
        v if v >= -0xff_ffff => 3,
        v if v >= -0xffff_ffff => 4,
        v if v >= -0xff_ffff_ffff => 5,
        v if v >= -0xffff_ffff_ffff => 6,
        v if v >= -0xff_ffff_ffff_ffff => 7,
        _ => 8,
    };
    append_to.push(INT_MIN + (8 - width as u8));
    append_to.extend_from_slice(&be[8 - width..]);
    append_to
}

/// Decodes a value written by [`encode_uvarint_ascending`], returning the
/// unconsumed tail.
pub fn decode_uvarint_ascending(b: &[u8]) -> Result<(&[u8], u64), EncodingError> {
    if b.is_empty() {
        return Err(EncodingError::BufferTooShort {
            what: "uvarint marker",
            needed: 1,
            have: 0,
        });
    }
    let length = b[0] as i32 - INT_ZERO;
    let rest = &b[1..];
    if length < 0 {
        return Err(EncodingError::InvalidUvarintLength(b[0]));
    }
    if length <= INT_SMALL {
        return Ok((rest, length as u64));
    }
    let width = (length - INT_SMALL) as usize;
    if width > INT_MAX_WIDTH as usize {
        return Err(EncodingError::InvalidUvarintLength(b[0]));
    }
    if rest.len() < width {
        return Err(EncodingError::BufferTooShort {
            what: "uvarint payload",
            needed: width,
            have: rest.len(),
        });
    }
    let mut v: u64 = 0;
    for &byte in &rest[..width] {
        v = (v << 8) | byte as u64;
    }
    Ok((&rest[width..], v))
}

/// Decodes a value written by [`encode_varint_ascending`], returning the
/// unconsumed tail.
pub fn decode_varint_ascending(b: &[u8]) -> Result<(&[u8], i64), EncodingError> {
    if b.is_empty() {
        return Err(EncodingError::BufferTooShort {
            what: "varint marker",
            needed: 1,
            have: 0,
        });
    }
    let length = b[0] as i32 - INT_ZERO;
    if length < 0 {
        let width = (-length) as usize;
        let rest = &b[1..];
        if width > INT_MAX_WIDTH as usize {
            return Err(EncodingError::InvalidUvarintLength(b[0]));
        }
        if rest.len() < width {
            return Err(EncodingError::BufferTooShort {
                what: "varint payload",
                needed: width,
                have: rest.len(),
            });
        }
        // Sign-extend by shifting into an all-ones accumulator.
        let mut v: i64 = -1;
        for &byte in &rest[..width] {
            v = (v << 8) | byte as i64;
        }
        return Ok((&rest[width..], v));
    }
    let (rest, uv) = decode_uvarint_ascending(b)?;
    if uv > i64::MAX as u64 {
        return Err(EncodingError::VarintOutOfRange);
    }
    Ok((rest, uv as i64))
}

/// Returns the total encoded length of the ascending varint at the head of
/// `b`, inspecting only its marker byte.
pub fn varint_ascending_len(b: &[u8]) -> Result<usize, EncodingError> {
    if b.is_empty() {
        return Err(EncodingError::BufferTooShort {
            what: "varint marker",
            needed: 1,
            have: 0,
        });
    }
    let length = b[0] as i32 - INT_ZERO;
    let width = if length < 0 {
        (-length) as usize
    } else if length <= INT_SMALL {
        0
    } else {
        (length - INT_SMALL) as usize
    };
    if width > INT_MAX_WIDTH as usize {
        return Err(EncodingError::InvalidUvarintLength(b[0]));
    }
    Ok(1 + width)
}

/// Returns the combined encoded length of `count` consecutive ascending
/// varints at the head of `b`.
pub fn multi_varint_ascending_len(b: &[u8], count: usize) -> Result<usize, EncodingError> {
    let mut len = 0usize;
    for _ in 0..count {
        len += varint_ascending_len(&b[len.min(b.len())..])?;
    }
    Ok(len)
}

/// Appends an order-preserving encoding of an absolute instant: Unix seconds
/// followed by the sub-second nanoseconds, both as ascending varints.
pub fn encode_time_ascending(append_to: Vec<u8>, t: DateTime<Utc>) -> Vec<u8> {
    let b = encode_varint_ascending(append_to, t.timestamp());
    encode_varint_ascending(b, t.timestamp_subsec_nanos() as i64)
}

/// Decodes an instant written by [`encode_time_ascending`], returning the
/// unconsumed tail.
pub fn decode_time_ascending(b: &[u8]) -> Result<(&[u8], DateTime<Utc>), EncodingError> {
    let (b, seconds) = decode_varint_ascending(b)?;
    let (b, nanos) = decode_varint_ascending(b)?;
    let subsec =
        u32::try_from(nanos).map_err(|_| EncodingError::InvalidTime { seconds, nanos })?;
    let t = DateTime::from_timestamp(seconds, subsec)
        .ok_or(EncodingError::InvalidTime { seconds, nanos })?;
    Ok((b, t))
}

/// Appends an order-preserving encoding of a calendar duration: the
/// flattened nanosecond count first (which carries the sort order), then the
/// months and days needed to reconstruct the original fields.
pub fn encode_duration_ascending(
    append_to: Vec<u8>,
    d: Duration,
) -> Result<Vec<u8>, EncodingError> {
    let (sort_nanos, months, days) = d.encode()?;
    let b = encode_varint_ascending(append_to, sort_nanos);
    let b = encode_varint_ascending(b, months);
    Ok(encode_varint_ascending(b, days))
}

/// Decodes a duration written by [`encode_duration_ascending`], returning
/// the unconsumed tail.
pub fn decode_duration_ascending(b: &[u8]) -> Result<(&[u8], Duration), EncodingError> {
    let (b, sort_nanos) = decode_varint_ascending(b)?;
    let (b, months) = decode_varint_ascending(b)?;
    let (b, days) = decode_varint_ascending(b)?;
    Ok((b, Duration::decode(sort_nanos, months, days)))
}

/// Appends a compact, non-sortable encoding of an arbitrary-precision
/// decimal: the zig-zag varint scale followed by the signed big-endian
/// coefficient. The encoding is not self-delimiting.
pub fn encode_nonsorting_decimal(append_to: Vec<u8>, d: &BigDecimal) -> Vec<u8> {
    let (coefficient, scale) = d.as_bigint_and_exponent();
    let mut b = put_varint(append_to, scale);
    b.extend_from_slice(&coefficient.to_signed_bytes_be());
    b
}

/// Decodes a decimal written by [`encode_nonsorting_decimal`], consuming the
/// entire buffer.
pub fn decode_nonsorting_decimal(b: &[u8]) -> Result<BigDecimal, EncodingError> {
    let (scale, n) = varint(b)?;
    let coefficient = BigInt::from_signed_bytes_be(&b[n..]);
    Ok(BigDecimal::new(coefficient, scale))
}

/// Conservative upper bound on the encoded size of a decimal, used to
/// pre-size buffers.
pub fn upper_bound_nonsorting_decimal_size(d: &BigDecimal) -> usize {
    let (coefficient, _) = d.as_bigint_and_exponent();
    MAX_VARINT_LEN64 + coefficient.bits() as usize / 8 + 2
}
