//! Dump adapter: a cursor presenting another cursor's records as text.
//!
//! The adapter's key and value formats are both `S`. Getters render the
//! wrapped cursor's canonical bytes as hex, as printable text with `\xx`
//! escapes, or as a JSON object whose members are the typed fields
//! (`key0`, `key1`, ... and `value0`, ...). Setters parse the same text
//! back. Positioning and mutation are delegated to the wrapped cursor,
//! which the adapter owns and closes first.

use std::cmp::Ordering;

use bytes::Bytes;
use serde_json::{Map, Number, Value as Json};

use strata_error::{Result, StrataError};
use strata_types::pack::{self, FieldKind};
use strata_types::{Value, ValueRef};

use crate::cursor::{Cursor, CursorFlags, CursorKind};
use crate::methods::{self, CursorMethods, Slot};
use crate::session::Session;

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// Text representation produced by a dump adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpFormat {
    Json,
    Print,
    Hex,
}

impl DumpFormat {
    /// Parse the `dump` configuration value; empty means no adapter.
    pub fn from_config(value: &str) -> Result<Option<Self>> {
        match value {
            "" => Ok(None),
            "json" => Ok(Some(Self::Json)),
            "print" => Ok(Some(Self::Print)),
            "hex" => Ok(Some(Self::Hex)),
            other => Err(StrataError::invalid_argument(format!(
                "unknown dump format '{other}'"
            ))),
        }
    }

    /// The cursor flag recording this format.
    #[must_use]
    pub const fn flag(self) -> CursorFlags {
        match self {
            Self::Json => CursorFlags::DUMP_JSON,
            Self::Print => CursorFlags::DUMP_PRINT,
            Self::Hex => CursorFlags::DUMP_HEX,
        }
    }
}

/// Variant state of a dump adapter.
#[derive(Debug)]
pub struct DumpCursor {
    child: Box<Cursor>,
    format: DumpFormat,
}

impl DumpCursor {
    #[must_use]
    pub const fn format(&self) -> DumpFormat {
        self.format
    }

    /// The wrapped cursor.
    #[must_use]
    pub fn child(&self) -> &Cursor {
        &self.child
    }
}

/// Wrap `child` in an unregistered dump adapter.
#[must_use]
pub fn wrap(session: &Session, child: Cursor, format: DumpFormat) -> Cursor {
    let methods = CursorMethods {
        compare: Slot::Bound(compare),
        next: Slot::Bound(next),
        prev: Slot::Bound(prev),
        reset: Slot::Bound(reset),
        search: Slot::Bound(search),
        search_near: Slot::Bound(search_near),
        insert: Slot::Bound(insert),
        update: Slot::Bound(update),
        remove: Slot::Bound(remove),
        get_key: Slot::Bound(get_key),
        get_value: Slot::Bound(get_value),
        set_key: Slot::Bound(set_key),
        set_value: Slot::Bound(set_value),
        close,
    };
    let uri = child.uri.clone();
    let internal_uri = child.internal_uri.clone();
    let kind = CursorKind::Dump(DumpCursor {
        child: Box::new(child),
        format,
    });
    let mut adapter = Cursor::new(session, &uri, "S", "S", kind, methods);
    adapter.internal_uri = internal_uri;
    adapter
}

/// The cursor wrapped by a dump adapter.
pub fn child_mut(cursor: &mut Cursor) -> Option<&mut Cursor> {
    match &mut cursor.kind {
        CursorKind::Dump(dump) => Some(&mut *dump.child),
        _ => None,
    }
}

fn child_of(cursor: &mut Cursor) -> Result<&mut Cursor> {
    child_mut(cursor).ok_or_else(|| StrataError::internal("dump method on a non-dump cursor"))
}

// ---------------------------------------------------------------------------
// Methods
// ---------------------------------------------------------------------------

fn next(cursor: &mut Cursor) -> Result<()> {
    child_of(cursor)?.next()
}

fn prev(cursor: &mut Cursor) -> Result<()> {
    child_of(cursor)?.prev()
}

fn reset(cursor: &mut Cursor) -> Result<()> {
    child_of(cursor)?.reset()
}

fn search(cursor: &mut Cursor) -> Result<()> {
    child_of(cursor)?.search()
}

fn search_near(cursor: &mut Cursor) -> Result<Ordering> {
    child_of(cursor)?.search_near()
}

fn insert(cursor: &mut Cursor) -> Result<()> {
    child_of(cursor)?.insert()
}

fn update(cursor: &mut Cursor) -> Result<()> {
    child_of(cursor)?.update()
}

fn remove(cursor: &mut Cursor) -> Result<()> {
    child_of(cursor)?.remove()
}

fn compare(a: &mut Cursor, b: &mut Cursor) -> Result<Ordering> {
    let other = child_of(b)?;
    child_of(a)?.compare(other)
}

fn get_key(cursor: &mut Cursor) -> Result<Vec<ValueRef<'_>>> {
    get_text(cursor, true)
}

fn get_value(cursor: &mut Cursor) -> Result<Vec<ValueRef<'_>>> {
    get_text(cursor, false)
}

fn set_key(cursor: &mut Cursor, values: &[Value]) -> Result<()> {
    set_text(cursor, values, true)
}

fn set_value(cursor: &mut Cursor, values: &[Value]) -> Result<()> {
    set_text(cursor, values, false)
}

fn get_text(cursor: &mut Cursor, is_key: bool) -> Result<Vec<ValueRef<'_>>> {
    let raw = cursor.flags.contains(CursorFlags::RAW);
    let Cursor { kind, key, value, .. } = cursor;
    let CursorKind::Dump(dump) = kind else {
        return Err(StrataError::internal("dump method on a non-dump cursor"));
    };

    let (item, bytes, format, prefix) = if is_key {
        (key, dump.child.get_raw_key()?, dump.child.key_format.as_str(), "key")
    } else {
        (value, dump.child.get_raw_value()?, dump.child.value_format.as_str(), "value")
    };

    if raw {
        item.set_shared(bytes);
        return Ok(vec![ValueRef::Bytes(item.as_slice())]);
    }

    let text = match dump.format {
        DumpFormat::Hex => to_hex(&bytes),
        DumpFormat::Print => to_print(&bytes),
        DumpFormat::Json => to_json(format, &bytes, prefix)?,
    };
    item.set_shared(Bytes::from(text.into_bytes()));
    let text = std::str::from_utf8(item.as_slice()).map_err(|e| StrataError::Utf8 {
        detail: e.to_string(),
    })?;
    Ok(vec![ValueRef::Str(text)])
}

fn set_text(cursor: &mut Cursor, values: &[Value], is_key: bool) -> Result<()> {
    let raw = cursor.flags.contains(CursorFlags::RAW);
    let CursorKind::Dump(dump) = &mut cursor.kind else {
        return Err(StrataError::internal("dump method on a non-dump cursor"));
    };
    let child = &mut *dump.child;
    let (format, prefix) = if is_key {
        (child.key_format.as_str(), "key")
    } else {
        (child.value_format.as_str(), "value")
    };

    let parsed = match values {
        [Value::Bytes(b)] if raw => Ok(b.clone()),
        [Value::Str(text)] => match dump.format {
            DumpFormat::Hex => from_hex(text),
            DumpFormat::Print => from_print(text),
            DumpFormat::Json => from_json(format, text, prefix),
        },
        [other] => Err(StrataError::type_mismatch("string", other.type_name())),
        _ => Err(StrataError::invalid_argument(format!(
            "expected a single field, got {}",
            values.len()
        ))),
    };

    match parsed {
        Ok(bytes) if is_key => child.set_raw_key(bytes),
        Ok(bytes) => child.set_raw_value(bytes),
        Err(err) => {
            let set = if is_key {
                CursorFlags::KEY_SET
            } else {
                CursorFlags::VALUE_SET
            };
            child.flags.remove(set);
            child.saved_err = Some(err.clone());
            Err(err)
        }
    }
}

fn close(mut cursor: Cursor, session: &mut Session) -> Result<()> {
    let child = match std::mem::replace(&mut cursor.kind, CursorKind::Detached) {
        CursorKind::Dump(dump) => Some(dump.child),
        _ => None,
    };
    let child_result = match child {
        Some(child) => (*child).close(session),
        None => Ok(()),
    };
    let own_result = methods::default_close(cursor, session);
    child_result.and(own_result)
}

// ---------------------------------------------------------------------------
// Text encodings
// ---------------------------------------------------------------------------

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        out.push(char::from(HEX_DIGITS[usize::from(b >> 4)]));
        out.push(char::from(HEX_DIGITS[usize::from(b & 0x0f)]));
    }
    out
}

fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

fn hex_pair(hi: u8, lo: u8) -> Option<u8> {
    Some((hex_value(hi)? << 4) | hex_value(lo)?)
}

fn from_hex(text: &str) -> Result<Bytes> {
    let digits = text.as_bytes();
    if digits.len() % 2 != 0 {
        return Err(StrataError::invalid_argument(
            "hex dump has an odd number of digits",
        ));
    }
    digits
        .chunks_exact(2)
        .map(|pair| hex_pair(pair[0], pair[1]))
        .collect::<Option<Vec<u8>>>()
        .map(Bytes::from)
        .ok_or_else(|| StrataError::invalid_argument(format!("invalid hex dump '{text}'")))
}

/// Printable ASCII as-is, backslash doubled, everything else as `\xx`.
fn to_print(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        match b {
            b'\\' => out.push_str("\\\\"),
            0x20..=0x7e => out.push(char::from(b)),
            _ => {
                out.push('\\');
                out.push(char::from(HEX_DIGITS[usize::from(b >> 4)]));
                out.push(char::from(HEX_DIGITS[usize::from(b & 0x0f)]));
            }
        }
    }
    out
}

fn from_print(text: &str) -> Result<Bytes> {
    let src = text.as_bytes();
    let mut out = Vec::with_capacity(src.len());
    let mut pos = 0;
    while pos < src.len() {
        if src[pos] != b'\\' {
            out.push(src[pos]);
            pos += 1;
            continue;
        }
        match src.get(pos + 1) {
            Some(b'\\') => {
                out.push(b'\\');
                pos += 2;
            }
            Some(_) => {
                let byte = src
                    .get(pos + 1..pos + 3)
                    .and_then(|pair| hex_pair(pair[0], pair[1]))
                    .ok_or_else(|| {
                        StrataError::invalid_argument(format!("invalid escape at offset {pos}"))
                    })?;
                out.push(byte);
                pos += 3;
            }
            None => {
                return Err(StrataError::invalid_argument(format!(
                    "truncated escape at offset {pos}"
                )));
            }
        }
    }
    Ok(Bytes::from(out))
}

fn field_to_json(field: ValueRef<'_>) -> Json {
    match field {
        ValueRef::Int(i) => Json::Number(Number::from(i)),
        ValueRef::Uint(u) => Json::Number(Number::from(u)),
        ValueRef::Str(s) => Json::String(s.to_owned()),
        // One char per byte, so any byte string survives the round trip.
        ValueRef::Bytes(b) => Json::String(b.iter().copied().map(char::from).collect()),
    }
}

fn to_json(format: &str, bytes: &[u8], prefix: &str) -> Result<String> {
    let fields = pack::struct_unpack(format, bytes)?;
    let object: Map<String, Json> = fields
        .into_iter()
        .enumerate()
        .map(|(i, field)| (format!("{prefix}{i}"), field_to_json(field)))
        .collect();
    serde_json::to_string(&object).map_err(|e| StrataError::internal(e.to_string()))
}

fn json_to_field(kind: FieldKind, name: &str, json: &Json) -> Result<Value> {
    let mismatch = || StrataError::type_mismatch(format!("{name} of kind {kind:?}"), json.to_string());
    match kind {
        FieldKind::Int { .. } => json.as_i64().map(Value::Int).ok_or_else(mismatch),
        FieldKind::Uint { .. } | FieldKind::Recno | FieldKind::Bitfield => {
            json.as_u64().map(Value::Uint).ok_or_else(mismatch)
        }
        FieldKind::FixedStr | FieldKind::Str => {
            json.as_str().map(Value::from).ok_or_else(mismatch)
        }
        FieldKind::Bytes | FieldKind::PrefixedBytes => json
            .as_str()
            .ok_or_else(mismatch)?
            .chars()
            .map(|c| u8::try_from(c).map_err(|_| mismatch()))
            .collect::<Result<Vec<u8>>>()
            .map(Value::from),
        FieldKind::Pad => Err(StrataError::internal("padding has no value")),
    }
}

fn from_json(format: &str, text: &str, prefix: &str) -> Result<Bytes> {
    let json: Json = serde_json::from_str(text)
        .map_err(|e| StrataError::invalid_argument(format!("invalid JSON dump: {e}")))?;
    let object = json
        .as_object()
        .ok_or_else(|| StrataError::invalid_argument("JSON dump is not an object"))?;

    let values = pack::fields(format)?
        .into_iter()
        .filter(pack::Field::takes_value)
        .enumerate()
        .map(|(i, field)| {
            let name = format!("{prefix}{i}");
            let json = object.get(&name).ok_or_else(|| {
                StrataError::invalid_argument(format!("JSON dump is missing '{name}'"))
            })?;
            json_to_field(field.kind, &name, json)
        })
        .collect::<Result<Vec<Value>>>()?;
    pack::struct_pack_vec(format, &values).map(Bytes::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Connection;
    use std::sync::Arc;

    fn setup(key_format: &str, value_format: &str) -> (Arc<Connection>, Session) {
        let conn = Connection::new();
        conn.create_table("table:t", key_format, value_format)
            .unwrap();
        let session = conn.open_session();
        (conn, session)
    }

    fn text(fields: &[ValueRef<'_>]) -> String {
        fields[0].as_str().unwrap().to_owned()
    }

    #[test]
    fn test_dump_format_config() {
        assert_eq!(DumpFormat::from_config("").unwrap(), None);
        assert_eq!(DumpFormat::from_config("hex").unwrap(), Some(DumpFormat::Hex));
        assert!(DumpFormat::from_config("xml").is_err());
    }

    #[test]
    fn test_print_escapes() {
        assert_eq!(to_print(b"a\\b\x00\x7f"), "a\\\\b\\00\\7f");
        assert_eq!(&from_print("a\\\\b\\00\\7f").unwrap()[..], b"a\\b\x00\x7f");
        assert!(from_print("bad\\0").is_err());
        assert!(from_print("bad\\zz").is_err());
    }

    #[test]
    fn test_hex_codec() {
        assert_eq!(to_hex(&[0x00, 0xab, 0x10]), "00ab10");
        assert_eq!(&from_hex("00AB10").unwrap()[..], [0x00, 0xab, 0x10]);
        assert!(from_hex("abc").is_err());
        assert!(from_hex("zz").is_err());
    }

    #[test]
    fn test_adapter_registration_and_close_order() {
        let (conn, mut session) = setup("S", "S");
        let adapter = session.open_cursor("table:t", Some("dump=hex")).unwrap();
        let CursorKind::Dump(dump) = adapter.kind() else {
            panic!("expected a dump adapter");
        };
        let child_id = dump.child().id();
        assert_eq!(dump.format(), DumpFormat::Hex);
        assert!(dump.child().flags().contains(CursorFlags::DUMP_HEX));
        assert_eq!(dump.child().owner(), Some(adapter.id()));
        assert_eq!(adapter.key_format(), "S");
        assert_eq!(
            session.cursors().iter().collect::<Vec<_>>(),
            [adapter.id(), child_id]
        );
        assert_eq!(session.open_cursor_count(), 2);

        let teardown = session.cursors().teardown_order();
        assert_eq!(teardown, [child_id, adapter.id()]);

        adapter.close(&mut session).unwrap();
        assert!(session.cursors().is_empty());
        assert_eq!(conn.stats().cursor_open(), 0);
    }

    #[test]
    fn test_hex_round_trip_through_table() {
        let (_conn, mut session) = setup("S", "u");
        let mut dump = session.open_cursor("table:t", Some("dump=hex")).unwrap();
        dump.set_key(&[Value::from("6b00")]).unwrap();
        dump.set_value(&[Value::from("00ff")]).unwrap();
        dump.insert().unwrap();

        let mut plain = session.open_cursor("table:t", None).unwrap();
        plain.set_key(&[Value::from("k")]).unwrap();
        plain.search().unwrap();
        assert_eq!(plain.get_value().unwrap(), [ValueRef::Bytes(&[0x00, 0xff])]);

        dump.reset().unwrap();
        dump.next().unwrap();
        assert_eq!(text(&dump.get_key().unwrap()), "6b00");
        assert_eq!(text(&dump.get_value().unwrap()), "00ff");

        plain.close(&mut session).unwrap();
        dump.close(&mut session).unwrap();
    }

    #[test]
    fn test_print_dump() {
        let (_conn, mut session) = setup("S", "u");
        let mut plain = session.open_cursor("table:t", None).unwrap();
        plain.set_key(&[Value::from("a\\b")]).unwrap();
        plain.set_value(&[Value::from(vec![b'x', 0x01])]).unwrap();
        plain.insert().unwrap();

        let mut dump = session.open_cursor("table:t", Some("dump=print")).unwrap();
        dump.next().unwrap();
        assert_eq!(text(&dump.get_key().unwrap()), "a\\\\b\\00");
        assert_eq!(text(&dump.get_value().unwrap()), "x\\01");

        plain.close(&mut session).unwrap();
        dump.close(&mut session).unwrap();
    }

    #[test]
    fn test_json_round_trip() {
        let (_conn, mut session) = setup("qS", "Iu");
        let mut dump = session.open_cursor("table:t", Some("dump=json")).unwrap();
        dump.set_key(&[Value::from(r#"{"key0":-3,"key1":"name"}"#)])
            .unwrap();
        dump.set_value(&[Value::from(r#"{"value0":7,"value1":"\u0000ÿ"}"#)])
            .unwrap();
        dump.insert().unwrap();

        let mut plain = session.open_cursor("table:t", None).unwrap();
        plain.next().unwrap();
        assert_eq!(
            plain.get_key().unwrap(),
            [ValueRef::Int(-3), ValueRef::Str("name")]
        );
        assert_eq!(
            plain.get_value().unwrap(),
            [ValueRef::Uint(7), ValueRef::Bytes(&[0x00, 0xff])]
        );

        dump.reset().unwrap();
        dump.next().unwrap();
        let key: Json = serde_json::from_str(&text(&dump.get_key().unwrap())).unwrap();
        assert_eq!(key["key0"], -3);
        assert_eq!(key["key1"], "name");

        plain.close(&mut session).unwrap();
        dump.close(&mut session).unwrap();
    }

    #[test]
    fn test_json_errors_are_stashed() {
        let (_conn, mut session) = setup("qS", "S");
        let mut dump = session.open_cursor("table:t", Some("dump=json")).unwrap();
        let err = dump
            .set_key(&[Value::from(r#"{"key0":"oops","key1":"x"}"#)])
            .unwrap_err();
        assert!(matches!(err, StrataError::TypeMismatch { .. }));
        assert!(dump.set_key(&[Value::from(r#"{"key0":1}"#)]).is_err());
        assert!(dump.set_key(&[Value::from("not json")]).is_err());

        let Some(child) = child_mut(&mut dump) else {
            panic!("expected a dump adapter");
        };
        assert!(!child.key_is_set());
        assert!(child.saved_error().is_some());
        assert!(matches!(
            dump.search().unwrap_err(),
            StrataError::NotSet { .. }
        ));
        dump.close(&mut session).unwrap();
    }

    #[test]
    fn test_raw_mode_passes_bytes_through() {
        let (_conn, mut session) = setup("S", "S");
        let mut dump = session.open_cursor("table:t", Some("dump=hex")).unwrap();
        dump.set_raw_key(Bytes::from_static(b"k\0")).unwrap();
        dump.set_raw_value(Bytes::from_static(b"v\0")).unwrap();
        dump.insert().unwrap();

        dump.reset().unwrap();
        dump.next().unwrap();
        assert_eq!(&dump.get_raw_key().unwrap()[..], b"k\0");
        assert_eq!(text(&dump.get_key().unwrap()), "6b00");
        dump.close(&mut session).unwrap();
    }
}
