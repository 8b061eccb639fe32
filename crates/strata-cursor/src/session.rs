//! Connections and sessions.
//!
//! A [`Connection`] owns the table catalogue and the connection-wide open
//! cursor counter. A [`Session`] owns the cursor registry and its own open
//! cursor counter; it is used from one thread at a time, while the
//! connection counter is shared by every session.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use strata_error::{Result, StrataError};
use strata_types::OPEN_CURSOR_DEFAULTS;

use crate::cursor::{Cursor, CursorId};
use crate::init::cursor_init;
use crate::registry::CursorRegistry;
use crate::table::{self, MemTable};

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Connection-wide cursor counters.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    cursor_open: AtomicU64,
}

impl ConnectionStats {
    fn cursor_opened(&self) {
        self.cursor_open.fetch_add(1, Ordering::Relaxed);
    }

    fn cursors_closed(&self, count: u64) {
        self.cursor_open.fetch_sub(count, Ordering::Relaxed);
    }

    /// Cursors currently open across every session.
    #[must_use]
    pub fn cursor_open(&self) -> u64 {
        self.cursor_open.load(Ordering::Relaxed)
    }
}

/// Per-session cursor counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub cursor_open: u64,
}

/// Point-in-time view of the open-cursor counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CursorStatsSnapshot {
    /// Cursors open in the session that took the snapshot.
    pub session_cursor_open: u64,
    /// Cursors open across the connection.
    pub connection_cursor_open: u64,
}

impl fmt::Display for CursorStatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "session_cursor_open={} connection_cursor_open={}",
            self.session_cursor_open, self.connection_cursor_open,
        )
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// Shared state for every session: tables, id allocation and counters.
#[derive(Debug, Default)]
pub struct Connection {
    tables: Mutex<HashMap<String, Arc<MemTable>>>,
    next_session_id: AtomicU64,
    next_cursor_id: AtomicU64,
    stats: ConnectionStats,
}

impl Connection {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Open a session on this connection.
    #[must_use]
    pub fn open_session(self: &Arc<Self>) -> Session {
        let id = SessionId(self.next_session_id.fetch_add(1, Ordering::Relaxed) + 1);
        debug!(session_id = %id, "session opened");
        Session {
            id,
            conn: Arc::clone(self),
            cursors: CursorRegistry::new(),
            stats: SessionStats::default(),
        }
    }

    /// Create an in-memory table.
    pub fn create_table(&self, uri: &str, key_format: &str, value_format: &str) -> Result<()> {
        let table = MemTable::new(uri, key_format, value_format)?;
        let mut tables = self.tables.lock();
        if tables.contains_key(uri) {
            return Err(StrataError::TableExists {
                name: uri.to_owned(),
            });
        }
        tables.insert(uri.to_owned(), Arc::new(table));
        debug!(uri, key_format, value_format, "table created");
        Ok(())
    }

    /// Look up a table by URI.
    pub fn table(&self, uri: &str) -> Result<Arc<MemTable>> {
        self.tables
            .lock()
            .get(uri)
            .cloned()
            .ok_or_else(|| StrataError::NoSuchTable {
                name: uri.to_owned(),
            })
    }

    #[must_use]
    pub const fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    pub(crate) fn allocate_cursor_id(&self) -> CursorId {
        CursorId(self.next_cursor_id.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Session handle, unique within a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single-threaded context that opens and owns cursors.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    conn: Arc<Connection>,
    cursors: CursorRegistry,
    stats: SessionStats,
}

impl Session {
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub const fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    /// Open a cursor on the table at `uri`.
    ///
    /// `config` is applied over [`OPEN_CURSOR_DEFAULTS`].
    pub fn open_cursor(&mut self, uri: &str, config: Option<&str>) -> Result<Cursor> {
        let cfg: Vec<&str> = std::iter::once(OPEN_CURSOR_DEFAULTS)
            .chain(config)
            .collect();
        let table = self.conn.table(uri)?;
        let cursor = table::open(self, table, &cfg)?;
        cursor_init(self, cursor, uri, None, &cfg)
    }

    /// The registry of open cursors.
    #[must_use]
    pub const fn cursors(&self) -> &CursorRegistry {
        &self.cursors
    }

    #[must_use]
    pub const fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Cursors currently open in this session.
    #[must_use]
    pub const fn open_cursor_count(&self) -> u64 {
        self.stats.cursor_open
    }

    #[must_use]
    pub fn stats_snapshot(&self) -> CursorStatsSnapshot {
        CursorStatsSnapshot {
            session_cursor_open: self.stats.cursor_open,
            connection_cursor_open: self.conn.stats.cursor_open(),
        }
    }

    /// Close the session. Fails if cursors are still open; their counts are
    /// released either way.
    pub fn close(self) -> Result<()> {
        let open = self.cursors.len();
        drop(self);
        if open == 0 {
            Ok(())
        } else {
            Err(StrataError::invalid_argument(format!(
                "session closed with {open} open cursors"
            )))
        }
    }

    /// Add `id` to the registry, after `owner` if given, and count it.
    pub(crate) fn register(&mut self, id: CursorId, owner: Option<CursorId>) -> Result<()> {
        match owner {
            Some(owner) => self.cursors.insert_after(owner, id)?,
            None => self.cursors.insert_head(id),
        }
        self.stats.cursor_open += 1;
        self.conn.stats.cursor_opened();
        Ok(())
    }

    /// Remove `id` from the registry, uncounting it if it was registered.
    pub(crate) fn unregister(&mut self, id: CursorId) -> bool {
        let removed = self.cursors.remove(id);
        if removed {
            self.stats.cursor_open -= 1;
            self.conn.stats.cursors_closed(1);
        }
        removed
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.cursors.is_empty() {
            warn!(
                session_id = %self.id,
                open = self.cursors.len(),
                cursors = ?self.cursors.teardown_order(),
                "session dropped with open cursors"
            );
            self.conn.stats.cursors_closed(self.stats.cursor_open);
            self.stats.cursor_open = 0;
        }
        debug!(session_id = %self.id, "session closed");
    }
}
