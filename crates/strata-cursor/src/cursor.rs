//! The cursor handle and its dispatch surface.

use std::cmp::Ordering;
use std::fmt;

use bytes::Bytes;

use strata_error::{Result, StrataError};
use strata_types::intpack::MAX_PACKED_INT_LEN;
use strata_types::{Item, Value, ValueRef};

use crate::dump::DumpCursor;
use crate::methods::{CursorMethods, DisabledReason, OpFn, Slot};
use crate::session::{Session, SessionId};
use crate::table::TableCursor;

// ---------------------------------------------------------------------------
// Identifiers and flags
// ---------------------------------------------------------------------------

/// Cursor handle, unique within a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CursorId(pub(crate) u64);

impl CursorId {
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CursorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

bitflags::bitflags! {
    /// Cursor state and configuration bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CursorFlags: u32 {
        /// Key references memory owned by the application.
        const KEY_EXT = 1 << 0;
        /// Key references memory owned by the cursor's table.
        const KEY_INT = 1 << 1;
        /// Value references memory owned by the application.
        const VALUE_EXT = 1 << 2;
        /// Value references memory owned by the cursor's table.
        const VALUE_INT = 1 << 3;
        /// Accessors read and write canonical bytes, bypassing the formats.
        const RAW = 1 << 4;
        /// Insert replaces existing records; update and remove tolerate
        /// missing ones.
        const OVERWRITE = 1 << 5;
        /// Insert on a record-number table allocates the next record number.
        const APPEND = 1 << 6;
        /// Registered with the session.
        const OPEN = 1 << 7;
        const DUMP_JSON = 1 << 8;
        const DUMP_PRINT = 1 << 9;
        const DUMP_HEX = 1 << 10;

        const KEY_SET = Self::KEY_EXT.bits() | Self::KEY_INT.bits();
        const VALUE_SET = Self::VALUE_EXT.bits() | Self::VALUE_INT.bits();
        const DUMP_MASK = Self::DUMP_JSON.bits() | Self::DUMP_PRINT.bits() | Self::DUMP_HEX.bits();
    }
}

/// Variant state.
#[derive(Debug)]
pub enum CursorKind {
    /// No storage behind the cursor; only the default accessors work.
    Detached,
    /// Cursor over an in-memory table.
    Table(TableCursor),
    /// Text adapter over another cursor.
    Dump(DumpCursor),
}

// ---------------------------------------------------------------------------
// Cursor
// ---------------------------------------------------------------------------

/// A cursor: a position in a table plus the key and value buffers used to
/// exchange records with the application.
#[derive(Debug)]
pub struct Cursor {
    pub(crate) id: CursorId,
    pub(crate) session: SessionId,
    pub(crate) uri: String,
    pub(crate) internal_uri: Option<String>,
    pub(crate) key_format: String,
    pub(crate) value_format: String,
    pub(crate) key: Item,
    pub(crate) value: Item,
    pub(crate) recno: u64,
    pub(crate) raw_recno_buf: [u8; MAX_PACKED_INT_LEN],
    pub(crate) flags: CursorFlags,
    pub(crate) saved_err: Option<StrataError>,
    pub(crate) owner: Option<CursorId>,
    pub(crate) methods: CursorMethods,
    pub(crate) disabled: Option<DisabledReason>,
    pub(crate) kind: CursorKind,
}

impl Cursor {
    /// Initialize the fields every cursor shares. The cursor is not yet
    /// configured or registered; pass it to [`crate::cursor_init`].
    #[must_use]
    pub fn new(
        session: &Session,
        uri: &str,
        key_format: &str,
        value_format: &str,
        kind: CursorKind,
        methods: CursorMethods,
    ) -> Self {
        Self {
            id: session.connection().allocate_cursor_id(),
            session: session.id(),
            uri: uri.to_owned(),
            internal_uri: None,
            key_format: key_format.to_owned(),
            value_format: value_format.to_owned(),
            key: Item::new(),
            value: Item::new(),
            recno: 0,
            raw_recno_buf: [0; MAX_PACKED_INT_LEN],
            flags: CursorFlags::empty(),
            saved_err: None,
            owner: None,
            methods,
            disabled: None,
            kind,
        }
    }

    /// A cursor with the default method table and no storage.
    #[must_use]
    pub fn detached(session: &Session, key_format: &str, value_format: &str) -> Self {
        Self::new(
            session,
            "",
            key_format,
            value_format,
            CursorKind::Detached,
            CursorMethods::default(),
        )
    }

    #[must_use]
    pub const fn id(&self) -> CursorId {
        self.id
    }

    #[must_use]
    pub const fn session_id(&self) -> SessionId {
        self.session
    }

    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    #[must_use]
    pub fn internal_uri(&self) -> Option<&str> {
        self.internal_uri.as_deref()
    }

    #[must_use]
    pub fn key_format(&self) -> &str {
        &self.key_format
    }

    #[must_use]
    pub fn value_format(&self) -> &str {
        &self.value_format
    }

    #[must_use]
    pub const fn flags(&self) -> CursorFlags {
        self.flags
    }

    /// The cursor this one was registered after, if any.
    #[must_use]
    pub const fn owner(&self) -> Option<CursorId> {
        self.owner
    }

    /// Current record number; meaningful for record-number keys once set.
    #[must_use]
    pub const fn recno(&self) -> u64 {
        self.recno
    }

    #[must_use]
    pub const fn disabled(&self) -> Option<&DisabledReason> {
        self.disabled.as_ref()
    }

    /// The error stashed by the last failed `set_key`/`set_value`.
    #[must_use]
    pub const fn saved_error(&self) -> Option<&StrataError> {
        self.saved_err.as_ref()
    }

    #[must_use]
    pub const fn methods(&self) -> &CursorMethods {
        &self.methods
    }

    pub fn methods_mut(&mut self) -> &mut CursorMethods {
        &mut self.methods
    }

    #[must_use]
    pub const fn key_item(&self) -> &Item {
        &self.key
    }

    #[must_use]
    pub const fn value_item(&self) -> &Item {
        &self.value
    }

    #[must_use]
    pub const fn kind(&self) -> &CursorKind {
        &self.kind
    }

    /// Whether keys are record numbers.
    #[must_use]
    pub fn is_recno_key(&self) -> bool {
        self.key_format == "r"
    }

    /// Whether a key is set, from the application or from a positioning call.
    #[must_use]
    pub const fn key_is_set(&self) -> bool {
        self.flags.intersects(CursorFlags::KEY_SET)
    }

    /// Whether a value is set, from the application or from a positioning
    /// call.
    #[must_use]
    pub const fn value_is_set(&self) -> bool {
        self.flags.intersects(CursorFlags::VALUE_SET)
    }

    /// Set or clear `RAW`.
    pub fn set_raw(&mut self, raw: bool) {
        self.flags.set(CursorFlags::RAW, raw);
    }

    /// The not-set error for the key or value, carrying any stashed cause.
    pub(crate) fn not_set(&self, what: &'static str) -> StrataError {
        StrataError::not_set(what, self.saved_err.clone())
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    fn call(&mut self, operation: &'static str, slot: Slot<OpFn>) -> Result<()> {
        match slot {
            Slot::Bound(f) => f(self),
            Slot::Noop => Ok(()),
            Slot::NotSupported => Err(self.not_supported(operation)),
        }
    }

    /// Move to the next record.
    pub fn next(&mut self) -> Result<()> {
        self.call("next", self.methods.next)
    }

    /// Move to the previous record.
    pub fn prev(&mut self) -> Result<()> {
        self.call("prev", self.methods.prev)
    }

    /// Drop the position and any key or value.
    pub fn reset(&mut self) -> Result<()> {
        self.call("reset", self.methods.reset)
    }

    /// Position on the record matching the key.
    pub fn search(&mut self) -> Result<()> {
        self.call("search", self.methods.search)
    }

    /// Insert the key and value.
    pub fn insert(&mut self) -> Result<()> {
        self.call("insert", self.methods.insert)
    }

    /// Replace the value of an existing record.
    pub fn update(&mut self) -> Result<()> {
        self.call("update", self.methods.update)
    }

    /// Remove the record matching the key.
    pub fn remove(&mut self) -> Result<()> {
        self.call("remove", self.methods.remove)
    }

    /// Position on the record nearest the key, returning how the found key
    /// compares to the search key.
    pub fn search_near(&mut self) -> Result<Ordering> {
        match self.methods.search_near {
            Slot::Bound(f) => f(self),
            Slot::Noop => Ok(Ordering::Equal),
            Slot::NotSupported => Err(self.not_supported("search_near")),
        }
    }

    /// Compare this cursor's key with `other`'s.
    pub fn compare(&mut self, other: &mut Self) -> Result<Ordering> {
        match self.methods.compare {
            Slot::Bound(f) => f(self, other),
            Slot::Noop => Ok(Ordering::Equal),
            Slot::NotSupported => Err(self.not_supported("compare")),
        }
    }

    /// The key as typed fields.
    pub fn get_key(&mut self) -> Result<Vec<ValueRef<'_>>> {
        match self.methods.get_key {
            Slot::Bound(f) => f(self),
            Slot::Noop => Ok(Vec::new()),
            Slot::NotSupported => Err(self.not_supported("get_key")),
        }
    }

    /// The value as typed fields.
    pub fn get_value(&mut self) -> Result<Vec<ValueRef<'_>>> {
        match self.methods.get_value {
            Slot::Bound(f) => f(self),
            Slot::Noop => Ok(Vec::new()),
            Slot::NotSupported => Err(self.not_supported("get_value")),
        }
    }

    /// Set the key from typed fields.
    ///
    /// A failure is also stashed and reported again by the next call that
    /// needs the key.
    pub fn set_key(&mut self, values: &[Value]) -> Result<()> {
        match self.methods.set_key {
            Slot::Bound(f) => f(self, values),
            Slot::Noop => Ok(()),
            Slot::NotSupported => Err(self.not_supported("set_key")),
        }
    }

    /// Set the value from typed fields.
    pub fn set_value(&mut self, values: &[Value]) -> Result<()> {
        match self.methods.set_value {
            Slot::Bound(f) => f(self, values),
            Slot::Noop => Ok(()),
            Slot::NotSupported => Err(self.not_supported("set_value")),
        }
    }

    /// Close the cursor, removing it from `session`.
    pub fn close(self, session: &mut Session) -> Result<()> {
        let close = self.methods.close;
        close(self, session)
    }

    // -----------------------------------------------------------------------
    // Raw accessors
    // -----------------------------------------------------------------------

    /// Run `f` with `RAW` forced on, restoring the previous setting whether
    /// or not `f` succeeds.
    fn with_raw<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let was_raw = self.flags.contains(CursorFlags::RAW);
        self.flags.insert(CursorFlags::RAW);
        let result = f(self);
        self.flags.set(CursorFlags::RAW, was_raw);
        result
    }

    /// The key's canonical bytes.
    pub fn get_raw_key(&mut self) -> Result<Bytes> {
        self.with_raw(|c| single_bytes(&c.get_key()?))
    }

    /// Set the key from canonical bytes, without copying them.
    pub fn set_raw_key(&mut self, key: Bytes) -> Result<()> {
        self.with_raw(|c| c.set_key(&[Value::Bytes(key)]))
    }

    /// The value's canonical bytes.
    pub fn get_raw_value(&mut self) -> Result<Bytes> {
        self.with_raw(|c| single_bytes(&c.get_value()?))
    }

    /// Set the value from canonical bytes, without copying them.
    pub fn set_raw_value(&mut self, value: Bytes) -> Result<()> {
        self.with_raw(|c| c.set_value(&[Value::Bytes(value)]))
    }
}

fn single_bytes(fields: &[ValueRef<'_>]) -> Result<Bytes> {
    match fields {
        [ValueRef::Bytes(b)] => Ok(Bytes::copy_from_slice(b)),
        _ => Err(StrataError::internal(
            "raw accessor did not return a single byte array",
        )),
    }
}
