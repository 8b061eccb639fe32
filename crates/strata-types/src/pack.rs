//! Format-string driven struct packing.
//!
//! A format string is a sequence of type characters, each optionally
//! prefixed by a decimal count:
//!
//! | Char | Argument | Encoding |
//! |------|----------|----------|
//! | `x` | none | `count` zero bytes |
//! | `b h i l q` | signed 8/16/32/32/64-bit | packed signed integer |
//! | `B H I L Q r` | unsigned 8/16/32/32/64-bit | packed unsigned integer |
//! | `s` | string | exactly `count` bytes, NUL padded or truncated |
//! | `S` | string | bytes then `\0`; with a count, same as `s` |
//! | `t` | unsigned, `count` bits (1..=8) | one byte |
//! | `u` | bytes | with a count: exactly `count` bytes; as the final field: as-is; otherwise length prefixed |
//! | `U` | bytes | length prefixed |
//!
//! For integer types the count is a repeat count: `3i` is `iii`.

use memchr::memchr;

use strata_error::{Result, StrataError};

use crate::intpack::{self, MAX_PACKED_INT_LEN};
use crate::value::{Value, ValueRef};

// ---------------------------------------------------------------------------
// Format parsing
// ---------------------------------------------------------------------------

/// Encoding class of a format field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// `x`: padding, takes no argument.
    Pad,
    /// `b h i l q`: signed integer of the given width.
    Int { bits: u32 },
    /// `B H I L Q`: unsigned integer of the given width.
    Uint { bits: u32 },
    /// `r`: record number.
    Recno,
    /// `s`: fixed-length string.
    FixedStr,
    /// `S`: NUL-terminated string.
    Str,
    /// `t`: bitfield.
    Bitfield,
    /// `u`: byte array.
    Bytes,
    /// `U`: length-prefixed byte array.
    PrefixedBytes,
}

impl FieldKind {
    const fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            b'x' => Self::Pad,
            b'b' => Self::Int { bits: 8 },
            b'h' => Self::Int { bits: 16 },
            b'i' | b'l' => Self::Int { bits: 32 },
            b'q' => Self::Int { bits: 64 },
            b'B' => Self::Uint { bits: 8 },
            b'H' => Self::Uint { bits: 16 },
            b'I' | b'L' => Self::Uint { bits: 32 },
            b'Q' => Self::Uint { bits: 64 },
            b'r' => Self::Recno,
            b's' => Self::FixedStr,
            b'S' => Self::Str,
            b't' => Self::Bitfield,
            b'u' => Self::Bytes,
            b'U' => Self::PrefixedBytes,
            _ => return None,
        })
    }
}

/// One field of a parsed format string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub kind: FieldKind,
    /// The format character.
    pub code: char,
    /// Size or bit count. Always `None` for integer fields, whose counts are
    /// expanded into repeated fields.
    pub count: Option<usize>,
}

impl Field {
    /// Whether the field consumes an argument.
    #[must_use]
    pub const fn takes_value(&self) -> bool {
        !matches!(self.kind, FieldKind::Pad)
    }

    /// The argument type the field accepts, for error messages.
    #[must_use]
    pub const fn expected_type(&self) -> &'static str {
        match self.kind {
            FieldKind::Pad => "nothing",
            FieldKind::Int { .. } => "signed integer",
            FieldKind::Uint { .. } | FieldKind::Recno | FieldKind::Bitfield => {
                "unsigned integer"
            }
            FieldKind::FixedStr | FieldKind::Str => "string",
            FieldKind::Bytes | FieldKind::PrefixedBytes => "byte array",
        }
    }

    fn out_of_range(&self, value: impl ToString) -> StrataError {
        StrataError::ValueOutOfRange {
            what: format!("'{}' field", self.code),
            value: value.to_string(),
        }
    }
}

/// Parse a format string into its fields.
pub fn fields(format: &str) -> Result<Vec<Field>> {
    let bytes = format.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut pos = 0;
    let mut fixed_size: usize = 0;

    while pos < bytes.len() {
        let start = pos;
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
        let count = if pos > start {
            Some(
                format[start..pos]
                    .parse::<usize>()
                    .map_err(|_| StrataError::bad_format(format, "count too large"))?,
            )
        } else {
            None
        };

        let Some(&code) = bytes.get(pos) else {
            return Err(StrataError::bad_format(format, "count without a type"));
        };
        pos += 1;
        let kind = FieldKind::from_code(code).ok_or_else(|| {
            StrataError::bad_format(format, format!("unknown type '{}'", char::from(code)))
        })?;
        let code = char::from(code);

        match kind {
            FieldKind::Int { .. } | FieldKind::Uint { .. } | FieldKind::Recno => {
                for _ in 0..count.unwrap_or(1) {
                    out.push(Field {
                        kind,
                        code,
                        count: None,
                    });
                }
            }
            FieldKind::Bitfield if !matches!(count, None | Some(1..=8)) => {
                return Err(StrataError::bad_format(
                    format,
                    "bitfield width must be between 1 and 8",
                ));
            }
            _ => out.push(Field { kind, code, count }),
        }

        if let (FieldKind::Pad | FieldKind::FixedStr | FieldKind::Bytes, Some(n)) = (kind, count) {
            fixed_size = fixed_size
                .checked_add(n)
                .ok_or_else(|| StrataError::bad_format(format, "fixed sizes overflow"))?;
        }
    }
    Ok(out)
}

/// Whether `format` is a single bitfield (`t` or `Nt`), which cursors store
/// as one byte without going through the packer.
#[must_use]
pub fn is_single_bitfield(format: &str) -> bool {
    format
        .strip_suffix('t')
        .is_some_and(|digits| digits.bytes().all(|b| b.is_ascii_digit()))
}

// ---------------------------------------------------------------------------
// Packing
// ---------------------------------------------------------------------------

/// Output cursor shared by the sizing and writing passes. With no buffer it
/// only counts.
struct Packer<'b> {
    out: Option<&'b mut [u8]>,
    pos: usize,
}

impl Packer<'_> {
    fn region(&mut self, len: usize) -> Result<Option<&mut [u8]>> {
        let start = self.pos;
        let end = start
            .checked_add(len)
            .ok_or_else(|| StrataError::ValueOutOfRange {
                what: "packed size".to_owned(),
                value: format!("{start} + {len}"),
            })?;
        self.pos = end;
        match self.out.as_deref_mut() {
            None => Ok(None),
            Some(buf) => {
                let actual = buf.len();
                buf.get_mut(start..end)
                    .map(Some)
                    .ok_or(StrataError::ShortBuffer {
                        expected: end,
                        actual,
                    })
            }
        }
    }

    fn put(&mut self, bytes: &[u8]) -> Result<()> {
        if let Some(dst) = self.region(bytes.len())? {
            dst.copy_from_slice(bytes);
        }
        Ok(())
    }

    fn zeros(&mut self, len: usize) -> Result<()> {
        if let Some(dst) = self.region(len)? {
            dst.fill(0);
        }
        Ok(())
    }

    fn put_uint(&mut self, x: u64) -> Result<()> {
        let mut tmp = [0_u8; MAX_PACKED_INT_LEN];
        let n = intpack::pack_uint(&mut tmp, x)?;
        self.put(&tmp[..n])
    }

    fn put_int(&mut self, x: i64) -> Result<()> {
        let mut tmp = [0_u8; MAX_PACKED_INT_LEN];
        let n = intpack::pack_int(&mut tmp, x)?;
        self.put(&tmp[..n])
    }

    /// Write `bytes` into a region of exactly `size` bytes, zero padded.
    fn put_fixed(&mut self, bytes: &[u8], size: usize) -> Result<()> {
        let take = bytes.len().min(size);
        self.put(&bytes[..take])?;
        self.zeros(size - take)
    }
}

fn signed_arg(field: &Field, value: &Value, bits: u32) -> Result<i64> {
    let v = match value {
        Value::Int(i) => *i,
        Value::Uint(u) => i64::try_from(*u).map_err(|_| field.out_of_range(u))?,
        other => {
            return Err(StrataError::type_mismatch(
                field.expected_type(),
                other.type_name(),
            ));
        }
    };
    if bits < 64 {
        let max = (1_i64 << (bits - 1)) - 1;
        let min = -max - 1;
        if !(min..=max).contains(&v) {
            return Err(field.out_of_range(v));
        }
    }
    Ok(v)
}

fn unsigned_arg(field: &Field, value: &Value, bits: u32) -> Result<u64> {
    let v = match value {
        Value::Uint(u) => *u,
        Value::Int(i) => u64::try_from(*i).map_err(|_| field.out_of_range(i))?,
        other => {
            return Err(StrataError::type_mismatch(
                field.expected_type(),
                other.type_name(),
            ));
        }
    };
    if bits < 64 && v >> bits != 0 {
        return Err(field.out_of_range(v));
    }
    Ok(v)
}

fn str_arg<'v>(field: &Field, value: &'v Value) -> Result<&'v str> {
    match value {
        Value::Str(s) => Ok(s),
        other => Err(StrataError::type_mismatch(
            field.expected_type(),
            other.type_name(),
        )),
    }
}

fn bytes_arg<'v>(field: &Field, value: &'v Value) -> Result<&'v [u8]> {
    match value {
        Value::Bytes(b) => Ok(b),
        other => Err(StrataError::type_mismatch(
            field.expected_type(),
            other.type_name(),
        )),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn pack_field(p: &mut Packer<'_>, field: &Field, last: bool, value: &Value) -> Result<()> {
    match field.kind {
        FieldKind::Pad => p.zeros(field.count.unwrap_or(1)),
        FieldKind::Int { bits } => p.put_int(signed_arg(field, value, bits)?),
        FieldKind::Uint { bits } => p.put_uint(unsigned_arg(field, value, bits)?),
        FieldKind::Recno => p.put_uint(unsigned_arg(field, value, 64)?),
        FieldKind::FixedStr => {
            let s = str_arg(field, value)?.as_bytes();
            p.put_fixed(s, field.count.unwrap_or(1))
        }
        FieldKind::Str => {
            let s = str_arg(field, value)?.as_bytes();
            match field.count {
                Some(size) => p.put_fixed(s, size),
                None => {
                    let end = memchr(0, s).unwrap_or(s.len());
                    p.put(&s[..end])?;
                    p.zeros(1)
                }
            }
        }
        FieldKind::Bitfield => {
            let bits = field.count.unwrap_or(1) as u32;
            let v = unsigned_arg(field, value, bits)?;
            p.put(&[v as u8])
        }
        FieldKind::Bytes => {
            let b = bytes_arg(field, value)?;
            match field.count {
                Some(size) if b.len() > size => Err(field.out_of_range(format!(
                    "{} bytes for a {size}-byte field",
                    b.len()
                ))),
                Some(size) => p.put_fixed(b, size),
                None if last => p.put(b),
                None => {
                    p.put_uint(b.len() as u64)?;
                    p.put(b)
                }
            }
        }
        FieldKind::PrefixedBytes => {
            let b = bytes_arg(field, value)?;
            p.put_uint(b.len() as u64)?;
            p.put(b)
        }
    }
}

fn pack_into(p: &mut Packer<'_>, format: &str, values: &[Value]) -> Result<()> {
    let fields = fields(format)?;
    let expected = fields.iter().filter(|f| f.takes_value()).count();
    if values.len() != expected {
        return Err(StrataError::invalid_argument(format!(
            "format '{format}' takes {expected} values, got {}",
            values.len()
        )));
    }

    let mut args = values.iter();
    for (i, field) in fields.iter().enumerate() {
        if !field.takes_value() {
            p.zeros(field.count.unwrap_or(1))?;
            continue;
        }
        let value = args
            .next()
            .ok_or_else(|| StrataError::internal("argument count checked above"))?;
        pack_field(p, field, i + 1 == fields.len(), value)?;
    }
    Ok(())
}

/// Size in bytes of `values` packed with `format`.
pub fn struct_size(format: &str, values: &[Value]) -> Result<usize> {
    let mut p = Packer { out: None, pos: 0 };
    pack_into(&mut p, format, values)?;
    Ok(p.pos)
}

/// Pack `values` into `buf`, returning the number of bytes written.
///
/// `buf` is usually sized by a prior [`struct_size`] call.
pub fn struct_pack(buf: &mut [u8], format: &str, values: &[Value]) -> Result<usize> {
    let mut p = Packer {
        out: Some(buf),
        pos: 0,
    };
    pack_into(&mut p, format, values)?;
    Ok(p.pos)
}

/// Pack `values` into a new vector.
pub fn struct_pack_vec(format: &str, values: &[Value]) -> Result<Vec<u8>> {
    let mut buf = vec![0_u8; struct_size(format, values)?];
    struct_pack(&mut buf, format, values)?;
    Ok(buf)
}

// ---------------------------------------------------------------------------
// Unpacking
// ---------------------------------------------------------------------------

fn take(rest: &[u8], len: usize) -> Result<(&[u8], &[u8])> {
    if rest.len() < len {
        return Err(StrataError::ShortBuffer {
            expected: len,
            actual: rest.len(),
        });
    }
    Ok(rest.split_at(len))
}

fn utf8(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|e| StrataError::Utf8 {
        detail: e.to_string(),
    })
}

fn until_nul(bytes: &[u8]) -> &[u8] {
    memchr(0, bytes).map_or(bytes, |end| &bytes[..end])
}

fn prefixed(rest: &[u8]) -> Result<(&[u8], &[u8])> {
    let (len, n) = intpack::unpack_uint(rest)?;
    let len = usize::try_from(len).map_err(|_| StrataError::ShortBuffer {
        expected: usize::MAX,
        actual: rest.len(),
    })?;
    take(&rest[n..], len)
}

/// Unpack `buf` according to `format`.
///
/// Strings and byte arrays borrow from `buf`.
pub fn struct_unpack<'a>(format: &str, buf: &'a [u8]) -> Result<Vec<ValueRef<'a>>> {
    let fields = fields(format)?;
    let mut out = Vec::with_capacity(fields.len());
    let mut rest = buf;

    for (i, field) in fields.iter().enumerate() {
        let last = i + 1 == fields.len();
        match field.kind {
            FieldKind::Pad => {
                rest = take(rest, field.count.unwrap_or(1))?.1;
            }
            FieldKind::Int { .. } => {
                let (v, n) = intpack::unpack_int(rest)?;
                out.push(ValueRef::Int(v));
                rest = &rest[n..];
            }
            FieldKind::Uint { .. } | FieldKind::Recno => {
                let (v, n) = intpack::unpack_uint(rest)?;
                out.push(ValueRef::Uint(v));
                rest = &rest[n..];
            }
            FieldKind::FixedStr => {
                let (s, tail) = take(rest, field.count.unwrap_or(1))?;
                out.push(ValueRef::Str(utf8(until_nul(s))?));
                rest = tail;
            }
            FieldKind::Str => {
                if let Some(size) = field.count {
                    let (s, tail) = take(rest, size)?;
                    out.push(ValueRef::Str(utf8(until_nul(s))?));
                    rest = tail;
                } else {
                    let end = memchr(0, rest).ok_or(StrataError::ShortBuffer {
                        expected: rest.len() + 1,
                        actual: rest.len(),
                    })?;
                    out.push(ValueRef::Str(utf8(&rest[..end])?));
                    rest = &rest[end + 1..];
                }
            }
            FieldKind::Bitfield => {
                let (b, tail) = take(rest, 1)?;
                out.push(ValueRef::Uint(u64::from(b[0])));
                rest = tail;
            }
            FieldKind::Bytes => {
                let (b, tail) = match field.count {
                    Some(size) => take(rest, size)?,
                    None if last => (rest, &rest[rest.len()..]),
                    None => prefixed(rest)?,
                };
                out.push(ValueRef::Bytes(b));
                rest = tail;
            }
            FieldKind::PrefixedBytes => {
                let (b, tail) = prefixed(rest)?;
                out.push(ValueRef::Bytes(b));
                rest = tail;
            }
        }
    }
    Ok(out)
}
