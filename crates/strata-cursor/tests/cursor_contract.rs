//! Integration tests for the cursor contract: marshaling, construction,
//! registry accounting and the dump adapter, driven through sessions on
//! in-memory tables.

use std::collections::BTreeMap;
use std::sync::Arc;

use proptest::prelude::*;

use strata_cursor::{
    Connection, Cursor, CursorFlags, CursorKind, DumpFormat, Session, dup_position,
};
use strata_error::StrataError;
use strata_types::{Value, ValueRef};

fn session_with(key_format: &str, value_format: &str) -> (Arc<Connection>, Session) {
    let conn = Connection::new();
    conn.create_table("table:t", key_format, value_format)
        .expect("create table");
    let session = conn.open_session();
    (conn, session)
}

fn put(cursor: &mut Cursor, key: &[Value], value: &[Value]) {
    cursor.set_key(key).expect("set key");
    cursor.set_value(value).expect("set value");
    cursor.insert().expect("insert");
}

// ===========================================================================
// 1. MARSHALING
// ===========================================================================

proptest! {
    #[test]
    fn composite_keys_read_back_and_iterate_in_order(
        rows in prop::collection::btree_map(
            (any::<i64>(), "[a-z]{0,8}"),
            prop::collection::vec(any::<u8>(), 0..16),
            1..24,
        )
    ) {
        let (_conn, mut session) = session_with("qS", "u");
        let mut cursor = session.open_cursor("table:t", None).unwrap();
        for ((n, s), v) in &rows {
            put(
                &mut cursor,
                &[Value::Int(*n), Value::from(s.as_str())],
                &[Value::from(v.clone())],
            );
        }

        cursor.reset().unwrap();
        let mut seen = Vec::new();
        while cursor.next().is_ok() {
            let key = cursor.get_key().unwrap();
            let n = key[0].as_i64().unwrap();
            let s = key[1].as_str().unwrap().to_owned();
            let v = cursor.get_value().unwrap()[0].as_bytes().unwrap().to_vec();
            seen.push(((n, s), v));
        }
        let expected: Vec<_> = rows.into_iter().collect();
        prop_assert_eq!(seen, expected);
        cursor.close(&mut session).unwrap();
    }

    #[test]
    fn record_number_keys_round_trip(recnos in prop::collection::btree_set(1_u64..=i64::MAX as u64, 1..16)) {
        let (_conn, mut session) = session_with("r", "S");
        let mut cursor = session.open_cursor("table:t", None).unwrap();
        for &r in &recnos {
            put(&mut cursor, &[Value::Uint(r)], &[Value::from(r.to_string())]);
        }

        for &r in &recnos {
            cursor.set_key(&[Value::Uint(r)]).unwrap();
            cursor.search().unwrap();
            prop_assert_eq!(cursor.get_key().unwrap(), vec![ValueRef::Uint(r)]);
            let expected = r.to_string();
            prop_assert_eq!(
                cursor.get_value().unwrap(),
                vec![ValueRef::Str(expected.as_str())]
            );
        }

        cursor.reset().unwrap();
        let mut order = Vec::new();
        while cursor.next().is_ok() {
            order.push(cursor.get_key().unwrap()[0].as_u64().unwrap());
        }
        prop_assert_eq!(order, recnos.into_iter().collect::<Vec<_>>());
        cursor.close(&mut session).unwrap();
    }

    #[test]
    fn raw_accessors_preserve_raw_setting(raw in any::<bool>(), key in "[a-z]{1,8}") {
        let (_conn, mut session) = session_with("S", "S");
        let mut cursor = session.open_cursor("table:t", None).unwrap();
        cursor.set_raw(raw);

        let mut bytes = key.clone().into_bytes();
        bytes.push(0);
        cursor.set_raw_key(bytes.clone().into()).unwrap();
        prop_assert_eq!(cursor.flags().contains(CursorFlags::RAW), raw);
        prop_assert_eq!(&cursor.get_raw_key().unwrap()[..], &bytes[..]);
        prop_assert_eq!(cursor.flags().contains(CursorFlags::RAW), raw);

        cursor.set_raw(false);
        prop_assert_eq!(cursor.get_key().unwrap(), vec![ValueRef::Str(key.as_str())]);
        cursor.close(&mut session).unwrap();
    }
}

#[test]
fn test_failed_set_key_is_reported_by_later_calls() {
    let (_conn, mut session) = session_with("r", "S");
    let mut cursor = session.open_cursor("table:t", None).unwrap();

    let err = cursor.set_key(&[Value::Uint(0)]).unwrap_err();
    assert_eq!(err, StrataError::ZeroRecordNumber);
    assert!(!cursor.key_is_set());

    match cursor.search().unwrap_err() {
        StrataError::NotSet { cause, .. } => {
            assert_eq!(cause.as_deref(), Some(&StrataError::ZeroRecordNumber));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    cursor.set_key(&[Value::Uint(1)]).unwrap();
    assert!(cursor.saved_error().is_none());
    cursor.close(&mut session).unwrap();
}

// ===========================================================================
// 2. CONSTRUCTION AND REGISTRY
// ===========================================================================

proptest! {
    #[test]
    fn counters_track_open_cursors(
        plan in prop::collection::vec((any::<bool>(), any::<prop::sample::Index>()), 1..32)
    ) {
        let conn = Connection::new();
        conn.create_table("table:t", "S", "S").unwrap();
        let mut session = conn.open_session();
        let mut open: Vec<Cursor> = Vec::new();

        for (dump, pick) in plan {
            if !open.is_empty() && pick.index(3) == 0 {
                let cursor = open.swap_remove(pick.index(open.len()));
                cursor.close(&mut session).unwrap();
            } else {
                let config = dump.then_some("dump=print");
                open.push(session.open_cursor("table:t", config).unwrap());
            }

            let registered = open
                .iter()
                .map(|c| if matches!(c.kind(), CursorKind::Dump(_)) { 2 } else { 1 })
                .sum::<u64>();
            prop_assert_eq!(session.open_cursor_count(), registered);
            prop_assert_eq!(conn.stats().cursor_open(), registered);
            prop_assert_eq!(session.cursors().len() as u64, registered);
        }

        for cursor in open {
            cursor.close(&mut session).unwrap();
        }
        prop_assert!(session.cursors().is_empty());
        prop_assert_eq!(conn.stats().cursor_open(), 0);
    }
}

#[test]
fn test_dependents_close_before_owners() {
    let (_conn, mut session) = session_with("S", "S");
    let plain = session.open_cursor("table:t", None).unwrap();
    let adapter = session.open_cursor("table:t", Some("dump=json")).unwrap();
    let CursorKind::Dump(dump) = adapter.kind() else {
        panic!("expected a dump adapter");
    };
    let child = dump.child().id();

    let order = session.cursors().teardown_order();
    let pos = |id| order.iter().position(|&c| c == id).unwrap();
    assert!(pos(child) < pos(adapter.id()));
    assert_eq!(order.len(), 3);
    assert_eq!(order[0], plain.id());

    adapter.close(&mut session).unwrap();
    plain.close(&mut session).unwrap();
}

#[test]
fn test_later_configuration_wins() {
    let (_conn, mut session) = session_with("S", "S");
    let cursor = session
        .open_cursor("table:t", Some("overwrite=false,overwrite=true,raw=false"))
        .unwrap();
    assert!(cursor.flags().contains(CursorFlags::OVERWRITE));
    assert!(!cursor.flags().contains(CursorFlags::RAW));
    cursor.close(&mut session).unwrap();
}

#[test]
fn test_readonly_cursor_still_reads() {
    let (_conn, mut session) = session_with("S", "S");
    let mut writer = session.open_cursor("table:t", None).unwrap();
    put(&mut writer, &[Value::from("k")], &[Value::from("v")]);

    let mut reader = session.open_cursor("table:t", Some("readonly=true")).unwrap();
    reader.set_key(&[Value::from("k")]).unwrap();
    reader.search().unwrap();
    assert_eq!(reader.get_value().unwrap(), [ValueRef::Str("v")]);

    reader.set_value(&[Value::from("w")]).unwrap();
    let err = reader.update().unwrap_err();
    assert!(err.is_unsupported());

    // Other cursors on the same table keep their write methods.
    writer.set_key(&[Value::from("k")]).unwrap();
    writer.set_value(&[Value::from("w")]).unwrap();
    writer.update().unwrap();

    reader.close(&mut session).unwrap();
    writer.close(&mut session).unwrap();
}

// ===========================================================================
// 3. DUMP AND DUPLICATION
// ===========================================================================

#[test]
fn test_dump_formats_render_the_same_record() {
    let (_conn, mut session) = session_with("S", "QS");
    let mut writer = session.open_cursor("table:t", None).unwrap();
    put(
        &mut writer,
        &[Value::from("id")],
        &[Value::Uint(42), Value::from("x\ty")],
    );

    let mut rendered = BTreeMap::new();
    for format in ["hex", "print", "json"] {
        let config = format!("dump={format}");
        let mut dump = session.open_cursor("table:t", Some(&config)).unwrap();
        assert!(DumpFormat::from_config(format).unwrap().is_some());
        dump.next().unwrap();
        let value = dump.get_value().unwrap()[0].as_str().unwrap().to_owned();
        rendered.insert(format, value);
        dump.close(&mut session).unwrap();
    }

    // 42 packs to the single byte 0xaa.
    assert_eq!(rendered["hex"], "aa78097900");
    assert_eq!(rendered["print"], "\\aax\\09y\\00");
    let json: serde_json::Value = serde_json::from_str(&rendered["json"]).unwrap();
    assert_eq!(json["value0"], 42);
    assert_eq!(json["value1"], "x\ty");

    writer.close(&mut session).unwrap();
}

#[test]
fn test_dup_position_across_formats() {
    let (_conn, mut session) = session_with("qS", "S");
    let mut writer = session.open_cursor("table:t", None).unwrap();
    for i in 0..5 {
        put(
            &mut writer,
            &[Value::Int(i), Value::from("k")],
            &[Value::from(format!("v{i}"))],
        );
    }
    writer.set_key(&[Value::Int(3), Value::from("k")]).unwrap();
    writer.search().unwrap();

    let mut dump = session.open_cursor("table:t", Some("dump=hex")).unwrap();
    dup_position(&mut writer, &mut dump).unwrap();
    let mut other = session.open_cursor("table:t", None).unwrap();
    dup_position(&mut dump, &mut other).unwrap();
    assert_eq!(other.get_value().unwrap(), [ValueRef::Str("v3")]);

    for cursor in [other, dump, writer] {
        cursor.close(&mut session).unwrap();
    }
}
