//! Order-preserving variable-length integer packing.
//!
//! Small values stay small (one byte for -64..=63, two bytes up to roughly
//! ±8K) and the packed bytes compare lexicographically in the same order as
//! the integers they encode, so packed keys sort without decoding.
//!
//! | First byte    | Extra bytes | Min value        | Max value          |
//! |---------------|-------------|------------------|--------------------|
//! | `0001 llll`   | 8 - l       | -2^63            | -2^13 - 2^6 - 1    |
//! | `001x xxxx`   | 1           | -2^13 - 2^6      | -2^6 - 1           |
//! | `01xx xxxx`   | 0           | -2^6             | -1                 |
//! | `10xx xxxx`   | 0           | 0                | 2^6 - 1            |
//! | `110x xxxx`   | 1           | 2^6              | 2^13 + 2^6 - 1     |
//! | `1110 llll`   | l           | 2^13 + 2^6       | 2^64 - 1           |
//!
//! For large negative numbers the low nibble stores the count of leading
//! `0xff` bytes, which keeps more-negative values sorting first.

use strata_error::{Result, StrataError};

/// Longest possible packed integer: one marker byte plus eight data bytes.
pub const MAX_PACKED_INT_LEN: usize = 9;

const NEG_MULTI_MARKER: u8 = 0x10;
const NEG_2BYTE_MARKER: u8 = 0x20;
const NEG_1BYTE_MARKER: u8 = 0x40;
const POS_1BYTE_MARKER: u8 = 0x80;
const POS_2BYTE_MARKER: u8 = 0xc0;
const POS_MULTI_MARKER: u8 = 0xe0;

const NEG_1BYTE_MIN: i64 = -(1 << 6);
const NEG_2BYTE_MIN: i64 = -(1 << 13) + NEG_1BYTE_MIN;
const POS_1BYTE_MAX: u64 = (1 << 6) - 1;
const POS_2BYTE_MAX: u64 = (1 << 13) + POS_1BYTE_MAX;

/// Bits `[end, start)` of `x`.
#[inline]
#[allow(clippy::cast_possible_truncation)]
const fn get_bits(x: u64, start: u32, end: u32) -> u8 {
    ((x & ((1_u64 << start) - 1)) >> end) as u8
}

/// Number of leading zero bytes; 8 for zero.
#[inline]
const fn leading_zero_bytes(x: u64) -> usize {
    (x.leading_zeros() / 8) as usize
}

#[inline]
fn reinterpret_signed(x: i64) -> u64 {
    u64::from_ne_bytes(x.to_ne_bytes())
}

#[inline]
fn reinterpret_unsigned(x: u64) -> i64 {
    i64::from_ne_bytes(x.to_ne_bytes())
}

fn check_len(buf_len: usize, needed: usize) -> Result<()> {
    if buf_len < needed {
        return Err(StrataError::ShortBuffer {
            expected: needed,
            actual: buf_len,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Sizes
// ---------------------------------------------------------------------------

/// Packed length of an unsigned integer.
#[must_use]
pub const fn uint_len(x: u64) -> usize {
    if x <= POS_1BYTE_MAX {
        1
    } else if x <= POS_2BYTE_MAX + 1 {
        2
    } else {
        1 + 8 - leading_zero_bytes(x - (POS_2BYTE_MAX + 1))
    }
}

/// Packed length of a signed integer.
#[must_use]
pub fn int_len(x: i64) -> usize {
    if x < NEG_2BYTE_MIN {
        1 + 8 - leading_zero_bytes(!reinterpret_signed(x))
    } else if x < NEG_1BYTE_MIN {
        2
    } else if x < 0 {
        1
    } else {
        uint_len(reinterpret_signed(x))
    }
}

// ---------------------------------------------------------------------------
// Packing
// ---------------------------------------------------------------------------

/// Write the big-endian significant bytes of `x` after a marker byte whose
/// low nibble is `nibble`.
#[allow(clippy::cast_possible_truncation)]
fn pack_multi(buf: &mut [u8], marker: u8, nibble: usize, x: u64, len: usize) {
    buf[0] = marker | (nibble as u8 & 0x0f);
    for (i, slot) in buf[1..=len].iter_mut().enumerate() {
        let shift = (len - 1 - i) * 8;
        *slot = (x >> shift) as u8;
    }
}

/// Pack an unsigned integer into `buf`, returning the number of bytes written.
pub fn pack_uint(buf: &mut [u8], x: u64) -> Result<usize> {
    let len = uint_len(x);
    check_len(buf.len(), len)?;

    if x <= POS_1BYTE_MAX {
        buf[0] = POS_1BYTE_MARKER | get_bits(x, 6, 0);
    } else if x <= POS_2BYTE_MAX {
        let x = x - (POS_1BYTE_MAX + 1);
        buf[0] = POS_2BYTE_MARKER | get_bits(x, 13, 8);
        buf[1] = get_bits(x, 8, 0);
    } else if x == POS_2BYTE_MAX + 1 {
        // Could be a bare marker byte, but keep the encoding from getting
        // shorter than its neighbours.
        buf[0] = POS_MULTI_MARKER | 0x1;
        buf[1] = 0;
    } else {
        let x = x - (POS_2BYTE_MAX + 1);
        let n = 8 - leading_zero_bytes(x);
        pack_multi(buf, POS_MULTI_MARKER, n, x, n);
    }
    Ok(len)
}

/// Pack a signed integer into `buf`, returning the number of bytes written.
pub fn pack_int(buf: &mut [u8], x: i64) -> Result<usize> {
    let len = int_len(x);
    check_len(buf.len(), len)?;

    if x < NEG_2BYTE_MIN {
        let ux = reinterpret_signed(x);
        let lz = leading_zero_bytes(!ux);
        pack_multi(buf, NEG_MULTI_MARKER, lz, ux, 8 - lz);
    } else if x < NEG_1BYTE_MIN {
        let x = reinterpret_signed(x - NEG_2BYTE_MIN);
        buf[0] = NEG_2BYTE_MARKER | get_bits(x, 13, 8);
        buf[1] = get_bits(x, 8, 0);
    } else if x < 0 {
        let x = reinterpret_signed(x - NEG_1BYTE_MIN);
        buf[0] = NEG_1BYTE_MARKER | get_bits(x, 6, 0);
    } else {
        return pack_uint(buf, reinterpret_signed(x));
    }
    Ok(len)
}

// ---------------------------------------------------------------------------
// Unpacking
// ---------------------------------------------------------------------------

fn bad_marker(first: u8) -> StrataError {
    StrataError::bad_format("packed integer", format!("invalid marker byte 0x{first:02x}"))
}

/// Unpack an unsigned integer, returning `(value, bytes_consumed)`.
pub fn unpack_uint(buf: &[u8]) -> Result<(u64, usize)> {
    let Some(&first) = buf.first() else {
        return Err(StrataError::ShortBuffer {
            expected: 1,
            actual: 0,
        });
    };

    match first & 0xf0 {
        0x80 | 0x90 | 0xa0 | 0xb0 => Ok((u64::from(first & 0x3f), 1)),
        0xc0 | 0xd0 => {
            check_len(buf.len(), 2)?;
            let x = (u64::from(first & 0x1f) << 8) | u64::from(buf[1]);
            Ok((x + POS_1BYTE_MAX + 1, 2))
        }
        0xe0 => {
            let len = usize::from(first & 0x0f);
            if len > 8 {
                return Err(bad_marker(first));
            }
            check_len(buf.len(), 1 + len)?;
            let x = buf[1..=len]
                .iter()
                .fold(0_u64, |acc, &b| (acc << 8) | u64::from(b));
            let x = x
                .checked_add(POS_2BYTE_MAX + 1)
                .ok_or_else(|| bad_marker(first))?;
            Ok((x, 1 + len))
        }
        _ => Err(bad_marker(first)),
    }
}

/// Unpack a signed integer, returning `(value, bytes_consumed)`.
pub fn unpack_int(buf: &[u8]) -> Result<(i64, usize)> {
    let Some(&first) = buf.first() else {
        return Err(StrataError::ShortBuffer {
            expected: 1,
            actual: 0,
        });
    };

    match first & 0xf0 {
        NEG_MULTI_MARKER => {
            let lz = usize::from(first & 0x0f);
            if lz > 8 {
                return Err(bad_marker(first));
            }
            let len = 8 - lz;
            check_len(buf.len(), 1 + len)?;
            let x = buf[1..=len]
                .iter()
                .fold(u64::MAX, |acc, &b| (acc << 8) | u64::from(b));
            Ok((reinterpret_unsigned(x), 1 + len))
        }
        0x20 | 0x30 => {
            check_len(buf.len(), 2)?;
            let x = (i64::from(first & 0x1f) << 8) | i64::from(buf[1]);
            Ok((x + NEG_2BYTE_MIN, 2))
        }
        0x40 | 0x50 | 0x60 | 0x70 => Ok((NEG_1BYTE_MIN + i64::from(first & 0x3f), 1)),
        _ => {
            let (x, len) = unpack_uint(buf)?;
            let x = i64::try_from(x).map_err(|_| StrataError::ValueOutOfRange {
                what: "signed packed integer".to_owned(),
                value: x.to_string(),
            })?;
            Ok((x, len))
        }
    }
}
