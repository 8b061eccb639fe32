//! Default key/value accessors.
//!
//! Keys and values cross the API as typed fields and are stored in the
//! cursor's [`Item`] buffers in canonical packed form. A few common formats
//! take a fast path that skips the packer:
//!
//! - record-number keys (`r`) live in the cursor's `recno` field;
//! - byte arrays (`u`) and raw-mode access reference the caller's bytes;
//! - single strings (`S`) are stored NUL-terminated;
//! - single bitfield values (`t`, `Nt`) are one byte.
//!
//! Setters clear the key/value set flags first. A failure is returned and
//! also stashed on the cursor so the next accessor or positioning call that
//! needs the key/value reports why it is missing.

use bytes::Bytes;
use memchr::memchr;
use tracing::trace;

use strata_error::{Result, StrataError};
use strata_types::{Item, Value, ValueRef, intpack, pack};

use crate::cursor::{Cursor, CursorFlags};

// ---------------------------------------------------------------------------
// Get
// ---------------------------------------------------------------------------

/// Default `get_key`.
pub fn get_key(cursor: &mut Cursor) -> Result<Vec<ValueRef<'_>>> {
    if !cursor.key_is_set() {
        return Err(cursor.not_set("key"));
    }
    let raw = cursor.flags.contains(CursorFlags::RAW);

    if cursor.is_recno_key() {
        if !raw {
            return Ok(vec![ValueRef::Uint(cursor.recno)]);
        }
        // The raw form is the signed encoding of the same 64 bits.
        let bits = i64::from_ne_bytes(cursor.recno.to_ne_bytes());
        let len = intpack::pack_int(&mut cursor.raw_recno_buf, bits)?;
        return Ok(vec![ValueRef::Bytes(&cursor.raw_recno_buf[..len])]);
    }

    get_item(&cursor.key, &cursor.key_format, raw, false)
}

/// Default `get_value`.
pub fn get_value(cursor: &mut Cursor) -> Result<Vec<ValueRef<'_>>> {
    if !cursor.value_is_set() {
        return Err(cursor.not_set("value"));
    }
    let raw = cursor.flags.contains(CursorFlags::RAW);
    get_item(&cursor.value, &cursor.value_format, raw, true)
}

fn get_item<'c>(
    item: &'c Item,
    format: &str,
    raw: bool,
    is_value: bool,
) -> Result<Vec<ValueRef<'c>>> {
    let data = item.as_slice();
    if raw || format == "u" {
        return Ok(vec![ValueRef::Bytes(data)]);
    }
    if format == "S" {
        let text = memchr(0, data).map_or(data, |end| &data[..end]);
        let text = std::str::from_utf8(text).map_err(|e| StrataError::Utf8 {
            detail: e.to_string(),
        })?;
        return Ok(vec![ValueRef::Str(text)]);
    }
    if is_value && pack::is_single_bitfield(format) {
        let byte = data.first().ok_or(StrataError::ShortBuffer {
            expected: 1,
            actual: 0,
        })?;
        return Ok(vec![ValueRef::Uint(u64::from(*byte))]);
    }
    pack::struct_unpack(format, data)
}

// ---------------------------------------------------------------------------
// Set
// ---------------------------------------------------------------------------

/// Default `set_key`.
pub fn set_key(cursor: &mut Cursor, values: &[Value]) -> Result<()> {
    cursor.flags.remove(CursorFlags::KEY_SET);
    match set_key_inner(cursor, values) {
        Ok(()) => {
            cursor.saved_err = None;
            cursor.flags.insert(CursorFlags::KEY_EXT);
            Ok(())
        }
        Err(err) => Err(stash(cursor, "set_key", err)),
    }
}

/// Default `set_value`.
pub fn set_value(cursor: &mut Cursor, values: &[Value]) -> Result<()> {
    cursor.flags.remove(CursorFlags::VALUE_SET);
    let raw = cursor.flags.contains(CursorFlags::RAW);
    match set_item(&mut cursor.value, &cursor.value_format, raw, true, values) {
        Ok(()) => {
            cursor.flags.insert(CursorFlags::VALUE_EXT);
            Ok(())
        }
        Err(err) => Err(stash(cursor, "set_value", err)),
    }
}

fn stash(cursor: &mut Cursor, operation: &'static str, err: StrataError) -> StrataError {
    trace!(cursor_id = %cursor.id, operation, error = %err, "stashing marshaling error");
    cursor.saved_err = Some(err.clone());
    err
}

fn set_key_inner(cursor: &mut Cursor, values: &[Value]) -> Result<()> {
    let raw = cursor.flags.contains(CursorFlags::RAW);

    if cursor.is_recno_key() {
        let recno = if raw {
            let packed = bytes_arg(single(values)?)?;
            let (bits, _) = intpack::unpack_int(&packed)?;
            u64::from_ne_bytes(bits.to_ne_bytes())
        } else {
            recno_arg(single(values)?)?
        };
        if recno == 0 {
            return Err(StrataError::ZeroRecordNumber);
        }
        cursor.recno = recno;
        return cursor.key.set_copy(&recno.to_ne_bytes());
    }

    set_item(&mut cursor.key, &cursor.key_format, raw, false, values)?;
    match cursor.key.len() {
        0 => Err(StrataError::EmptyKey),
        len => check_key_size(len).map(|_| ()),
    }
}

/// Key sizes must fit the 32-bit size field.
pub(crate) fn check_key_size(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| StrataError::KeySizeOutOfRange { size: len as u64 })
}

fn set_item(
    item: &mut Item,
    format: &str,
    raw: bool,
    is_value: bool,
    values: &[Value],
) -> Result<()> {
    if raw || format == "u" {
        item.set_shared(bytes_arg(single(values)?)?);
        return Ok(());
    }
    if format == "S" {
        let s = match single(values)? {
            Value::Str(s) => s,
            other => return Err(StrataError::type_mismatch("string", other.type_name())),
        };
        let text = s.as_bytes();
        let text = memchr(0, text).map_or(text, |end| &text[..end]);
        let mut buf = Vec::with_capacity(text.len() + 1);
        buf.extend_from_slice(text);
        buf.push(0);
        item.set_shared(Bytes::from(buf));
        return Ok(());
    }
    if is_value && pack::is_single_bitfield(format) {
        // Bits beyond the field width are rejected by the packer.
        let mut byte = [0_u8; 1];
        pack::struct_pack(&mut byte, format, values)?;
        return item.set_copy(&byte);
    }

    let size = pack::struct_size(format, values)?;
    pack::struct_pack(item.init_size(size)?, format, values)?;
    Ok(())
}

fn single(values: &[Value]) -> Result<&Value> {
    match values {
        [v] => Ok(v),
        _ => Err(StrataError::invalid_argument(format!(
            "expected a single field, got {}",
            values.len()
        ))),
    }
}

fn bytes_arg(value: &Value) -> Result<Bytes> {
    match value {
        Value::Bytes(b) => Ok(b.clone()),
        other => Err(StrataError::type_mismatch("byte array", other.type_name())),
    }
}

fn recno_arg(value: &Value) -> Result<u64> {
    match value {
        Value::Uint(u) => Ok(*u),
        Value::Int(i) => u64::try_from(*i).map_err(|_| StrataError::ValueOutOfRange {
            what: "record number".to_owned(),
            value: i.to_string(),
        }),
        other => Err(StrataError::type_mismatch("record number", other.type_name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Connection, Session};

    fn cursor(session: &Session, key_format: &str, value_format: &str) -> Cursor {
        Cursor::detached(session, key_format, value_format)
    }

    #[test]
    fn test_not_set_errors() {
        let conn = Connection::new();
        let session = conn.open_session();
        let mut c = cursor(&session, "S", "S");
        assert_eq!(c.get_key().unwrap_err(), StrataError::not_set("key", None));
        assert_eq!(
            c.get_value().unwrap_err(),
            StrataError::not_set("value", None)
        );
    }

    #[test]
    fn test_string_key_is_nul_terminated() {
        let conn = Connection::new();
        let session = conn.open_session();
        let mut c = cursor(&session, "S", "S");
        c.set_key(&[Value::from("hello")]).unwrap();
        assert_eq!(c.key_item().as_slice(), b"hello\0");
        assert!(c.flags().contains(CursorFlags::KEY_EXT));
        assert_eq!(c.get_key().unwrap(), [ValueRef::Str("hello")]);
    }

    #[test]
    fn test_bytes_value_is_referenced() {
        let conn = Connection::new();
        let session = conn.open_session();
        let mut c = cursor(&session, "S", "u");
        let payload = Bytes::from(vec![0_u8, 1, 2]);
        c.set_value(&[Value::Bytes(payload.clone())]).unwrap();
        assert!(c.value_item().is_shared());
        assert_eq!(c.value_item().as_slice().as_ptr(), payload.as_ptr());
    }

    #[test]
    fn test_bitfield_value() {
        let conn = Connection::new();
        let session = conn.open_session();
        let mut c = cursor(&session, "r", "3t");
        c.set_value(&[Value::Uint(5)]).unwrap();
        assert_eq!(c.value_item().as_slice(), [5]);
        assert_eq!(c.get_value().unwrap(), [ValueRef::Uint(5)]);

        let err = c.set_value(&[Value::Uint(8)]).unwrap_err();
        assert!(matches!(err, StrataError::ValueOutOfRange { .. }));
        assert!(!c.value_is_set());
    }

    #[test]
    fn test_packed_formats_use_private_buffer() {
        let conn = Connection::new();
        let session = conn.open_session();
        let mut c = cursor(&session, "qS", "iu");
        c.set_key(&[Value::Int(-5), Value::from("k")]).unwrap();
        c.set_value(&[Value::Int(9), Value::from(vec![7_u8, 7])])
            .unwrap();
        assert!(c.key_item().is_private());
        assert_eq!(
            c.get_key().unwrap(),
            [ValueRef::Int(-5), ValueRef::Str("k")]
        );
        assert_eq!(
            c.get_value().unwrap(),
            [ValueRef::Int(9), ValueRef::Bytes(&[7, 7])]
        );
    }

    #[test]
    fn test_record_number_keys() {
        let conn = Connection::new();
        let session = conn.open_session();
        let mut c = cursor(&session, "r", "S");

        c.set_key(&[Value::Uint(42)]).unwrap();
        assert_eq!(c.recno(), 42);
        assert_eq!(c.key_item().len(), 8);
        assert_eq!(c.get_key().unwrap(), [ValueRef::Uint(42)]);

        let raw = c.get_raw_key().unwrap();
        assert_eq!(&raw[..], [0x80 | 42]);

        c.set_raw_key(Bytes::from_static(&[0x81])).unwrap();
        assert_eq!(c.recno(), 1);
    }

    #[test]
    fn test_record_numbers_above_i64_max_round_trip_raw() {
        let conn = Connection::new();
        let session = conn.open_session();
        let mut c = cursor(&session, "r", "S");

        for recno in [1_u64 << 63, u64::MAX, i64::MAX as u64] {
            c.set_key(&[Value::Uint(recno)]).unwrap();
            let raw = c.get_raw_key().unwrap();
            c.set_key(&[Value::Uint(7)]).unwrap();
            c.set_raw_key(raw).unwrap();
            assert_eq!(c.recno(), recno);
            assert_eq!(c.get_key().unwrap(), [ValueRef::Uint(recno)]);
        }

        let err = c.set_key(&[Value::Int(-1)]).unwrap_err();
        assert!(matches!(err, StrataError::ValueOutOfRange { .. }));
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn test_zero_record_number_rejected_and_stashed() {
        let conn = Connection::new();
        let session = conn.open_session();
        let mut c = cursor(&session, "r", "S");
        c.set_key(&[Value::Uint(3)]).unwrap();

        let err = c.set_key(&[Value::Uint(0)]).unwrap_err();
        assert_eq!(err, StrataError::ZeroRecordNumber);
        assert!(err.is_invalid_argument());
        assert!(!c.key_is_set());
        assert_eq!(c.saved_error(), Some(&StrataError::ZeroRecordNumber));

        let err = c.get_key().unwrap_err();
        assert_eq!(
            err,
            StrataError::not_set("key", Some(StrataError::ZeroRecordNumber))
        );

        c.set_key(&[Value::Uint(4)]).unwrap();
        assert!(c.saved_error().is_none());
    }

    #[test]
    fn test_empty_key_rejected() {
        let conn = Connection::new();
        let session = conn.open_session();
        let mut c = cursor(&session, "u", "u");
        let err = c.set_key(&[Value::from(Vec::new())]).unwrap_err();
        assert_eq!(err, StrataError::EmptyKey);
        assert!(!c.key_is_set());

        // An empty string still packs its terminator.
        let mut c = cursor(&session, "S", "u");
        c.set_key(&[Value::from("")]).unwrap();
        assert_eq!(c.key_item().len(), 1);
    }

    #[test]
    fn test_oversized_key_size() {
        assert_eq!(check_key_size(16).unwrap(), 16);
        #[cfg(target_pointer_width = "64")]
        assert_eq!(
            check_key_size(1 << 32).unwrap_err(),
            StrataError::KeySizeOutOfRange { size: 1 << 32 }
        );
    }

    #[test]
    fn test_value_failure_keeps_key() {
        let conn = Connection::new();
        let session = conn.open_session();
        let mut c = cursor(&session, "S", "i");
        c.set_key(&[Value::from("k")]).unwrap();
        let err = c.set_value(&[Value::from("not a number")]).unwrap_err();
        assert!(matches!(err, StrataError::TypeMismatch { .. }));
        assert!(c.key_is_set());
        assert_eq!(
            c.get_value().unwrap_err(),
            StrataError::not_set("value", Some(err))
        );
    }
}
