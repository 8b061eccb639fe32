//! In-memory tables and their cursors.
//!
//! A [`MemTable`] is an ordered map from canonical key bytes to canonical
//! value bytes. Record-number tables store keys as big-endian `u64` so the
//! map order is numeric order. Positioning a cursor hands it `Bytes`
//! handles to the stored key and value; the table lock is never held
//! between calls.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use rand::Rng;

use strata_error::{Result, StrataError};
use strata_types::{config, pack};

use crate::cursor::{Cursor, CursorFlags, CursorKind};
use crate::methods::{CursorMethods, DisabledReason, Slot};
use crate::session::Session;

/// An ordered in-memory table.
#[derive(Debug)]
pub struct MemTable {
    uri: String,
    key_format: String,
    value_format: String,
    rows: RwLock<BTreeMap<Bytes, Bytes>>,
}

impl MemTable {
    /// Create an empty table, validating both formats.
    pub fn new(uri: &str, key_format: &str, value_format: &str) -> Result<Self> {
        pack::fields(key_format)?;
        pack::fields(value_format)?;
        if key_format.is_empty() {
            return Err(StrataError::bad_format(key_format, "key format is empty"));
        }
        Ok(Self {
            uri: uri.to_owned(),
            key_format: key_format.to_owned(),
            value_format: value_format.to_owned(),
            rows: RwLock::new(BTreeMap::new()),
        })
    }

    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    #[must_use]
    pub fn key_format(&self) -> &str {
        &self.key_format
    }

    #[must_use]
    pub fn value_format(&self) -> &str {
        &self.value_format
    }

    /// Whether keys are record numbers.
    #[must_use]
    pub fn is_recno(&self) -> bool {
        self.key_format == "r"
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

/// Variant state of a table cursor.
#[derive(Debug)]
pub struct TableCursor {
    table: Arc<MemTable>,
    /// Stored key of the current record, if positioned.
    position: Option<Bytes>,
}

impl TableCursor {
    #[must_use]
    pub const fn table(&self) -> &Arc<MemTable> {
        &self.table
    }

    #[must_use]
    pub const fn is_positioned(&self) -> bool {
        self.position.is_some()
    }
}

/// Build an unregistered cursor over `table`.
///
/// With `next_random=true` the cursor only samples: `next` returns a random
/// record and every other positioning or mutation method is disabled.
pub fn open(session: &Session, table: Arc<MemTable>, cfg: &[&str]) -> Result<Cursor> {
    let next_random = config::gets_def(cfg, "next_random", 0)?.as_bool();

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
        ..CursorMethods::default()
    };
    let uri = table.uri.clone();
    let key_format = table.key_format.clone();
    let value_format = table.value_format.clone();
    let kind = CursorKind::Table(TableCursor {
        table,
        position: None,
    });
    let mut cursor = Cursor::new(session, &uri, &key_format, &value_format, kind, methods);

    if next_random {
        cursor.set_notsup(DisabledReason::RandomSampling);
        cursor.methods.next = Slot::Bound(next_random_record);
    }
    Ok(cursor)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn state(cursor: &mut Cursor) -> Result<&mut TableCursor> {
    match &mut cursor.kind {
        CursorKind::Table(state) => Ok(state),
        _ => Err(StrataError::internal("table method on a non-table cursor")),
    }
}

fn table_of(cursor: &mut Cursor) -> Result<Arc<MemTable>> {
    state(cursor).map(|s| Arc::clone(&s.table))
}

/// The stored form of the cursor's key.
fn stored_key(cursor: &Cursor) -> Result<Bytes> {
    if !cursor.key_is_set() {
        return Err(cursor.not_set("key"));
    }
    if cursor.is_recno_key() {
        return Ok(Bytes::copy_from_slice(&cursor.recno.to_be_bytes()));
    }
    Ok(cursor.key.to_bytes())
}

fn stored_value(cursor: &Cursor) -> Result<Bytes> {
    if !cursor.value_is_set() {
        return Err(cursor.not_set("value"));
    }
    Ok(cursor.value.to_bytes())
}

/// A table-owned copy of bytes that may reference application memory.
fn owned(bytes: &Bytes) -> Bytes {
    Bytes::copy_from_slice(bytes)
}

fn recno_from_stored(key: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] = key
        .try_into()
        .map_err(|_| StrataError::internal("stored record number is not 8 bytes"))?;
    Ok(u64::from_be_bytes(bytes))
}

/// Point the cursor at a stored record.
fn position_at(cursor: &mut Cursor, key: Bytes, value: Bytes) -> Result<()> {
    if cursor.is_recno_key() {
        cursor.recno = recno_from_stored(&key)?;
        cursor.key.set_copy(&cursor.recno.to_ne_bytes())?;
    } else {
        cursor.key.set_shared(key.clone());
    }
    cursor.value.set_shared(value);
    cursor.flags.remove(CursorFlags::KEY_SET | CursorFlags::VALUE_SET);
    cursor.flags.insert(CursorFlags::KEY_INT | CursorFlags::VALUE_INT);
    state(cursor)?.position = Some(key);
    Ok(())
}

/// Forget the position and any key or value.
fn clear_position(cursor: &mut Cursor) -> Result<()> {
    cursor.flags.remove(CursorFlags::KEY_SET | CursorFlags::VALUE_SET);
    state(cursor)?.position = None;
    Ok(())
}

fn step(cursor: &mut Cursor, forward: bool) -> Result<()> {
    let table = table_of(cursor)?;
    let position = state(cursor)?.position.clone();
    let found = {
        let rows = table.rows.read();
        let mut range = match (&position, forward) {
            (Some(k), true) => rows.range::<Bytes, _>((Bound::Excluded(k), Bound::Unbounded)),
            (Some(k), false) => rows.range::<Bytes, _>((Bound::Unbounded, Bound::Excluded(k))),
            (None, _) => rows.range::<Bytes, _>(..),
        };
        let entry = if forward { range.next() } else { range.next_back() };
        entry.map(|(k, v)| (k.clone(), v.clone()))
    };
    match found {
        Some((k, v)) => position_at(cursor, k, v),
        None => {
            clear_position(cursor)?;
            Err(StrataError::NotFound)
        }
    }
}

// ---------------------------------------------------------------------------
// Methods
// ---------------------------------------------------------------------------

fn next(cursor: &mut Cursor) -> Result<()> {
    step(cursor, true)
}

fn prev(cursor: &mut Cursor) -> Result<()> {
    step(cursor, false)
}

fn reset(cursor: &mut Cursor) -> Result<()> {
    clear_position(cursor)
}

fn search(cursor: &mut Cursor) -> Result<()> {
    let key = stored_key(cursor)?;
    let table = table_of(cursor)?;
    let found = table
        .rows
        .read()
        .get_key_value(&key)
        .map(|(k, v)| (k.clone(), v.clone()));
    match found {
        Some((k, v)) => position_at(cursor, k, v),
        None => {
            cursor.flags.remove(CursorFlags::VALUE_SET);
            state(cursor)?.position = None;
            Err(StrataError::NotFound)
        }
    }
}

fn search_near(cursor: &mut Cursor) -> Result<Ordering> {
    let key = stored_key(cursor)?;
    let table = table_of(cursor)?;
    let found = {
        let rows = table.rows.read();
        rows.range::<Bytes, _>(&key..)
            .next()
            .or_else(|| rows.range::<Bytes, _>(..&key).next_back())
            .map(|(k, v)| (k.clone(), v.clone()))
    };
    let Some((k, v)) = found else {
        cursor.flags.remove(CursorFlags::VALUE_SET);
        state(cursor)?.position = None;
        return Err(StrataError::NotFound);
    };
    let ordering = k.cmp(&key);
    position_at(cursor, k, v)?;
    Ok(ordering)
}

fn insert(cursor: &mut Cursor) -> Result<()> {
    let table = table_of(cursor)?;
    let value = stored_value(cursor)?;

    if table.is_recno() && cursor.flags.contains(CursorFlags::APPEND) {
        let recno = {
            let mut rows = table.rows.write();
            let last = match rows.last_key_value() {
                Some((k, _)) => recno_from_stored(k)?,
                None => 0,
            };
            let recno = last
                .checked_add(1)
                .ok_or_else(|| StrataError::internal("record numbers exhausted"))?;
            rows.insert(Bytes::copy_from_slice(&recno.to_be_bytes()), owned(&value));
            recno
        };
        cursor.recno = recno;
        cursor.key.set_copy(&recno.to_ne_bytes())?;
        cursor.flags.remove(CursorFlags::KEY_SET);
        cursor.flags.insert(CursorFlags::KEY_INT);
        state(cursor)?.position = None;
        return Ok(());
    }

    let key = stored_key(cursor)?;
    {
        let mut rows = table.rows.write();
        if !cursor.flags.contains(CursorFlags::OVERWRITE) && rows.contains_key(&key) {
            return Err(StrataError::DuplicateKey);
        }
        rows.insert(owned(&key), owned(&value));
    }
    state(cursor)?.position = None;
    Ok(())
}

fn update(cursor: &mut Cursor) -> Result<()> {
    let table = table_of(cursor)?;
    let key = stored_key(cursor)?;
    let value = stored_value(cursor)?;
    let (key, value) = {
        let mut rows = table.rows.write();
        let existing = rows.get_key_value(&key).map(|(k, _)| k.clone());
        if existing.is_none() && !cursor.flags.contains(CursorFlags::OVERWRITE) {
            return Err(StrataError::NotFound);
        }
        let key = existing.unwrap_or_else(|| owned(&key));
        let value = owned(&value);
        rows.insert(key.clone(), value.clone());
        (key, value)
    };
    position_at(cursor, key, value)
}

fn remove(cursor: &mut Cursor) -> Result<()> {
    let table = table_of(cursor)?;
    let key = stored_key(cursor)?;
    let removed = table.rows.write().remove(&key).is_some();
    cursor.flags.remove(CursorFlags::VALUE_SET);
    state(cursor)?.position = None;
    if removed || cursor.flags.contains(CursorFlags::OVERWRITE) {
        Ok(())
    } else {
        Err(StrataError::NotFound)
    }
}

fn compare(a: &mut Cursor, b: &mut Cursor) -> Result<Ordering> {
    let (ta, tb) = (table_of(a)?, table_of(b)?);
    if !Arc::ptr_eq(&ta, &tb) {
        return Err(StrataError::invalid_argument(format!(
            "cannot compare cursors on different tables ({} and {})",
            ta.uri, tb.uri
        )));
    }
    Ok(stored_key(a)?.cmp(&stored_key(b)?))
}

fn next_random_record(cursor: &mut Cursor) -> Result<()> {
    let table = table_of(cursor)?;
    let found = {
        let rows = table.rows.read();
        if rows.is_empty() {
            None
        } else {
            let pick = rand::thread_rng().gen_range(0..rows.len());
            rows.iter().nth(pick).map(|(k, v)| (k.clone(), v.clone()))
        }
    };
    match found {
        Some((k, v)) => position_at(cursor, k, v),
        None => {
            clear_position(cursor)?;
            Err(StrataError::NotFound)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Connection;
    use strata_types::{Value, ValueRef};

    fn setup(key_format: &str, value_format: &str) -> (Arc<Connection>, Session) {
        let conn = Connection::new();
        conn.create_table("table:t", key_format, value_format)
            .unwrap();
        let session = conn.open_session();
        (conn, session)
    }

    fn put(cursor: &mut Cursor, key: &str, value: &str) {
        cursor.set_key(&[Value::from(key)]).unwrap();
        cursor.set_value(&[Value::from(value)]).unwrap();
        cursor.insert().unwrap();
    }

    fn key_str(cursor: &mut Cursor) -> String {
        cursor.get_key().unwrap()[0].as_str().unwrap().to_owned()
    }

    #[test]
    fn test_iteration_in_key_order() {
        let (_conn, mut session) = setup("S", "S");
        let mut c = session.open_cursor("table:t", None).unwrap();
        for k in ["b", "c", "a"] {
            put(&mut c, k, k);
        }
        c.reset().unwrap();

        let mut seen = Vec::new();
        while c.next().is_ok() {
            seen.push(key_str(&mut c));
        }
        assert_eq!(seen, ["a", "b", "c"]);
        assert!(!c.key_is_set());
        let CursorKind::Table(state) = c.kind() else {
            panic!("expected a table cursor");
        };
        assert!(!state.is_positioned());
        assert_eq!(state.table().len(), 3);

        c.prev().unwrap();
        assert_eq!(key_str(&mut c), "c");
        c.close(&mut session).unwrap();
    }

    #[test]
    fn test_search_positions_on_table_memory() {
        let (_conn, mut session) = setup("S", "S");
        let mut c = session.open_cursor("table:t", None).unwrap();
        put(&mut c, "k", "v");

        c.set_key(&[Value::from("k")]).unwrap();
        assert!(c.flags().contains(CursorFlags::KEY_EXT));
        c.search().unwrap();
        assert!(c.flags().contains(CursorFlags::KEY_INT | CursorFlags::VALUE_INT));
        assert!(!c.flags().intersects(CursorFlags::KEY_EXT | CursorFlags::VALUE_EXT));
        assert!(c.key_item().is_shared());
        assert_eq!(c.get_value().unwrap(), [ValueRef::Str("v")]);

        c.set_key(&[Value::from("missing")]).unwrap();
        assert_eq!(c.search().unwrap_err(), StrataError::NotFound);
        assert!(c.key_is_set());
        c.close(&mut session).unwrap();
    }

    #[test]
    fn test_positioning_detaches_from_application_memory() {
        let (conn, mut session) = setup("u", "u");
        let mut c = session.open_cursor("table:t", None).unwrap();
        let app_key = Bytes::from(b"key".to_vec());
        let app_value = Bytes::from(b"value".to_vec());
        c.set_key(&[Value::Bytes(app_key.clone())]).unwrap();
        c.set_value(&[Value::Bytes(app_value.clone())]).unwrap();
        c.insert().unwrap();
        {
            let table = conn.table("table:t").unwrap();
            let rows = table.rows.read();
            let (k, v) = rows.iter().next().unwrap();
            assert_ne!(k.as_ptr(), app_key.as_ptr());
            assert_ne!(v.as_ptr(), app_value.as_ptr());
        }

        c.set_key(&[Value::Bytes(app_key.clone())]).unwrap();
        assert_eq!(c.key_item().as_slice().as_ptr(), app_key.as_ptr());
        c.search().unwrap();
        assert_ne!(c.key_item().as_slice().as_ptr(), app_key.as_ptr());
        assert_ne!(c.value_item().as_slice().as_ptr(), app_value.as_ptr());

        let replacement = Bytes::from(b"other".to_vec());
        c.set_key(&[Value::Bytes(app_key.clone())]).unwrap();
        c.set_value(&[Value::Bytes(replacement.clone())]).unwrap();
        c.update().unwrap();
        assert!(c.flags().contains(CursorFlags::KEY_INT | CursorFlags::VALUE_INT));
        assert_ne!(c.key_item().as_slice().as_ptr(), app_key.as_ptr());
        assert_ne!(c.value_item().as_slice().as_ptr(), replacement.as_ptr());
        assert_eq!(c.get_value().unwrap(), [ValueRef::Bytes(b"other")]);
        c.close(&mut session).unwrap();
    }

    #[test]
    fn test_search_near() {
        let (_conn, mut session) = setup("S", "S");
        let mut c = session.open_cursor("table:t", None).unwrap();
        put(&mut c, "b", "1");
        put(&mut c, "d", "2");

        c.set_key(&[Value::from("c")]).unwrap();
        assert_eq!(c.search_near().unwrap(), Ordering::Greater);
        assert_eq!(key_str(&mut c), "d");

        c.set_key(&[Value::from("e")]).unwrap();
        assert_eq!(c.search_near().unwrap(), Ordering::Less);
        assert_eq!(key_str(&mut c), "d");

        c.set_key(&[Value::from("b")]).unwrap();
        assert_eq!(c.search_near().unwrap(), Ordering::Equal);
        c.close(&mut session).unwrap();
    }

    #[test]
    fn test_overwrite_semantics() {
        let (_conn, mut session) = setup("S", "S");
        let mut c = session
            .open_cursor("table:t", Some("overwrite=false"))
            .unwrap();
        put(&mut c, "k", "v1");

        c.set_key(&[Value::from("k")]).unwrap();
        c.set_value(&[Value::from("v2")]).unwrap();
        assert_eq!(c.insert().unwrap_err(), StrataError::DuplicateKey);
        c.update().unwrap();
        assert_eq!(c.get_value().unwrap(), [ValueRef::Str("v2")]);

        c.set_key(&[Value::from("absent")]).unwrap();
        c.set_value(&[Value::from("x")]).unwrap();
        assert_eq!(c.update().unwrap_err(), StrataError::NotFound);
        assert_eq!(c.remove().unwrap_err(), StrataError::NotFound);
        c.close(&mut session).unwrap();

        let mut c = session.open_cursor("table:t", None).unwrap();
        c.set_key(&[Value::from("absent")]).unwrap();
        c.remove().unwrap();
        c.close(&mut session).unwrap();
    }

    #[test]
    fn test_record_number_append() {
        let (conn, mut session) = setup("r", "S");
        let mut c = session.open_cursor("table:t", Some("append")).unwrap();
        for v in ["one", "two"] {
            c.set_value(&[Value::from(v)]).unwrap();
            c.insert().unwrap();
        }
        assert_eq!(c.recno(), 2);
        assert_eq!(c.get_key().unwrap(), [ValueRef::Uint(2)]);
        assert_eq!(conn.table("table:t").unwrap().len(), 2);

        c.set_key(&[Value::Uint(1)]).unwrap();
        c.search().unwrap();
        assert_eq!(c.get_value().unwrap(), [ValueRef::Str("one")]);
        c.close(&mut session).unwrap();
    }

    #[test]
    fn test_record_numbers_iterate_numerically() {
        let (_conn, mut session) = setup("r", "S");
        let mut c = session.open_cursor("table:t", None).unwrap();
        for recno in [300_u64, 2, 70_000] {
            c.set_key(&[Value::Uint(recno)]).unwrap();
            c.set_value(&[Value::from("x")]).unwrap();
            c.insert().unwrap();
        }
        c.reset().unwrap();
        let mut seen = Vec::new();
        while c.next().is_ok() {
            seen.push(c.recno());
        }
        assert_eq!(seen, [2, 300, 70_000]);
        c.close(&mut session).unwrap();
    }

    #[test]
    fn test_insert_requires_key_and_value() {
        let (_conn, mut session) = setup("S", "S");
        let mut c = session.open_cursor("table:t", None).unwrap();
        c.set_value(&[Value::from("v")]).unwrap();
        assert_eq!(c.insert().unwrap_err(), StrataError::not_set("key", None));
        c.close(&mut session).unwrap();
    }

    #[test]
    fn test_compare() {
        let (conn, mut session) = setup("S", "S");
        conn.create_table("table:other", "S", "S").unwrap();
        let mut a = session.open_cursor("table:t", None).unwrap();
        let mut b = session.open_cursor("table:t", None).unwrap();
        let mut o = session.open_cursor("table:other", None).unwrap();

        a.set_key(&[Value::from("a")]).unwrap();
        b.set_key(&[Value::from("b")]).unwrap();
        o.set_key(&[Value::from("a")]).unwrap();
        assert_eq!(a.compare(&mut b).unwrap(), Ordering::Less);
        assert_eq!(b.compare(&mut a).unwrap(), Ordering::Greater);
        assert!(a.compare(&mut o).unwrap_err().is_invalid_argument());

        for c in [a, b, o] {
            c.close(&mut session).unwrap();
        }
    }

    #[test]
    fn test_next_random() {
        let (_conn, mut session) = setup("S", "S");
        let mut writer = session.open_cursor("table:t", None).unwrap();
        for k in ["a", "b", "c"] {
            put(&mut writer, k, k);
        }

        let mut sampler = session
            .open_cursor("table:t", Some("next_random=true"))
            .unwrap();
        assert_eq!(sampler.disabled(), Some(&DisabledReason::RandomSampling));
        for _ in 0..10 {
            sampler.next().unwrap();
            let k = key_str(&mut sampler);
            assert!(["a", "b", "c"].contains(&k.as_str()));
        }
        assert!(sampler.prev().unwrap_err().is_unsupported());
        assert!(sampler.search().unwrap_err().is_unsupported());
        sampler.set_value(&[Value::from("x")]).unwrap();
        assert!(sampler.insert().unwrap_err().is_unsupported());
        sampler.reset().unwrap();

        sampler.close(&mut session).unwrap();
        writer.close(&mut session).unwrap();
    }
}
