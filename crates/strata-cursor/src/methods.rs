//! Per-cursor method table.
//!
//! Every cursor carries its own [`CursorMethods`]. A variant binds the
//! operations it implements; the rest stay [`Slot::NotSupported`]. Disabling
//! a capability (read-only, checkpoint, random sampling) rebinds slots on
//! that one cursor instance and never touches other cursors of the same
//! variant.

use std::cmp::Ordering;
use std::fmt;

use tracing::debug;

use strata_error::{Result, StrataError};
use strata_types::config;
use strata_types::{Value, ValueRef};

use crate::cursor::{Cursor, CursorFlags};
use crate::marshal;
use crate::session::Session;

/// Positioning and mutation: `next`, `prev`, `reset`, `search`, `insert`,
/// `update`, `remove`.
pub type OpFn = fn(&mut Cursor) -> Result<()>;
/// `get_key` / `get_value`.
pub type GetFn = for<'c> fn(&'c mut Cursor) -> Result<Vec<ValueRef<'c>>>;
/// `set_key` / `set_value`.
pub type SetFn = fn(&mut Cursor, &[Value]) -> Result<()>;
/// `search_near`: ordering of the found key relative to the search key.
pub type SearchNearFn = fn(&mut Cursor) -> Result<Ordering>;
/// `compare`: ordering of the first cursor's key relative to the second's.
pub type CompareFn = fn(&mut Cursor, &mut Cursor) -> Result<Ordering>;
/// `close`. Consumes the cursor.
pub type CloseFn = fn(Cursor, &mut Session) -> Result<()>;

/// A method-table entry.
#[derive(Clone, Copy)]
pub enum Slot<F> {
    /// Bound to an implementation.
    Bound(F),
    /// Fails with [`StrataError::Unsupported`].
    NotSupported,
    /// Succeeds without doing anything.
    Noop,
}

impl<F> Slot<F> {
    #[must_use]
    pub const fn is_bound(&self) -> bool {
        matches!(self, Self::Bound(_))
    }

    #[must_use]
    pub const fn is_not_supported(&self) -> bool {
        matches!(self, Self::NotSupported)
    }

    #[must_use]
    pub const fn is_noop(&self) -> bool {
        matches!(self, Self::Noop)
    }
}

impl<F> fmt::Debug for Slot<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Bound(_) => "Bound",
            Self::NotSupported => "NotSupported",
            Self::Noop => "Noop",
        })
    }
}

/// Why a cursor's capabilities were removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisabledReason {
    /// Opened with `readonly=true`.
    ReadOnly,
    /// Opened on a named checkpoint.
    Checkpoint(String),
    /// Opened with `next_random=true`.
    RandomSampling,
    /// The cursor type never implemented the method.
    Variant,
}

impl fmt::Display for DisabledReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadOnly => f.write_str("read-only cursor"),
            Self::Checkpoint(name) => write!(f, "checkpoint cursor '{name}'"),
            Self::RandomSampling => f.write_str("random sampling cursor"),
            Self::Variant => f.write_str("not implemented by this cursor type"),
        }
    }
}

/// The method table.
#[derive(Clone, Copy)]
pub struct CursorMethods {
    pub compare: Slot<CompareFn>,
    pub next: Slot<OpFn>,
    pub prev: Slot<OpFn>,
    pub reset: Slot<OpFn>,
    pub search: Slot<OpFn>,
    pub search_near: Slot<SearchNearFn>,
    pub insert: Slot<OpFn>,
    pub update: Slot<OpFn>,
    pub remove: Slot<OpFn>,
    pub get_key: Slot<GetFn>,
    pub get_value: Slot<GetFn>,
    pub set_key: Slot<SetFn>,
    pub set_value: Slot<SetFn>,
    pub close: CloseFn,
}

impl Default for CursorMethods {
    /// Format-driven accessors, the default close and a no-op reset;
    /// everything else unsupported.
    fn default() -> Self {
        Self {
            compare: Slot::NotSupported,
            next: Slot::NotSupported,
            prev: Slot::NotSupported,
            reset: Slot::Noop,
            search: Slot::NotSupported,
            search_near: Slot::NotSupported,
            insert: Slot::NotSupported,
            update: Slot::NotSupported,
            remove: Slot::NotSupported,
            get_key: Slot::Bound(marshal::get_key),
            get_value: Slot::Bound(marshal::get_value),
            set_key: Slot::Bound(marshal::set_key),
            set_value: Slot::Bound(marshal::set_value),
            close: default_close,
        }
    }
}

impl fmt::Debug for CursorMethods {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CursorMethods")
            .field("compare", &self.compare)
            .field("next", &self.next)
            .field("prev", &self.prev)
            .field("reset", &self.reset)
            .field("search", &self.search)
            .field("search_near", &self.search_near)
            .field("insert", &self.insert)
            .field("update", &self.update)
            .field("remove", &self.remove)
            .field("get_key", &self.get_key)
            .field("get_value", &self.get_value)
            .field("set_key", &self.set_key)
            .field("set_value", &self.set_value)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Disabling capabilities
// ---------------------------------------------------------------------------

impl Cursor {
    /// Rebind `insert`, `update` and `remove` to not-supported.
    pub fn disable_writes(&mut self, reason: DisabledReason) {
        debug!(cursor_id = %self.id, uri = %self.uri, %reason, "cursor writes disabled");
        self.methods.insert = Slot::NotSupported;
        self.methods.update = Slot::NotSupported;
        self.methods.remove = Slot::NotSupported;
        self.disabled = Some(reason);
    }

    /// Rebind every method except `close` and the key/value accessors to
    /// not-supported. `reset` becomes a no-op so resetting every cursor in
    /// a session never fails on a disabled one.
    pub fn set_notsup(&mut self, reason: DisabledReason) {
        debug!(cursor_id = %self.id, uri = %self.uri, %reason, "cursor methods disabled");
        let m = &mut self.methods;
        m.compare = Slot::NotSupported;
        m.next = Slot::NotSupported;
        m.prev = Slot::NotSupported;
        m.reset = Slot::Noop;
        m.search = Slot::NotSupported;
        m.search_near = Slot::NotSupported;
        m.insert = Slot::NotSupported;
        m.update = Slot::NotSupported;
        m.remove = Slot::NotSupported;
        self.disabled = Some(reason);
    }

    pub(crate) fn not_supported(&self, operation: &'static str) -> StrataError {
        let reason = self
            .disabled
            .as_ref()
            .unwrap_or(&DisabledReason::Variant)
            .to_string();
        StrataError::unsupported(operation, reason)
    }
}

/// Apply the `readonly` configuration key, defaulting to `default` when no
/// configuration string sets it.
pub fn config_readonly(cursor: &mut Cursor, cfg: &[&str], default: bool) -> Result<()> {
    let readonly = config::gets_def(cfg, "readonly", i64::from(default))?;
    if readonly.as_bool() {
        cursor.disable_writes(DisabledReason::ReadOnly);
    }
    Ok(())
}

/// Default `close`: release the buffers and, if the cursor was registered,
/// remove it from the session and decrement the open counters. Fails if
/// `session` is not the session the cursor was opened in.
pub fn default_close(mut cursor: Cursor, session: &mut Session) -> Result<()> {
    if cursor.session != session.id() {
        return Err(StrataError::invalid_argument(format!(
            "cursor {} belongs to session {}, not session {}",
            cursor.id,
            cursor.session,
            session.id()
        )));
    }
    cursor.key.free();
    cursor.value.free();
    cursor.saved_err = None;

    if cursor.flags.contains(CursorFlags::OPEN) {
        session.unregister(cursor.id);
        cursor.flags.remove(CursorFlags::OPEN);
    }
    debug!(cursor_id = %cursor.id, uri = %cursor.uri, "cursor closed");
    Ok(())
}
