//! Generic cursor layer: the cursor handle, its overridable method table,
//! format-driven key/value marshaling, construction from configuration
//! strings, the per-session cursor registry and the dump adapter.

pub mod cursor;
pub mod dump;
pub mod dup;
pub mod init;
pub mod marshal;
pub mod methods;
pub mod registry;
pub mod session;
pub mod table;

pub use cursor::{Cursor, CursorFlags, CursorId, CursorKind};
pub use dump::{DumpCursor, DumpFormat};
pub use dup::dup_position;
pub use init::cursor_init;
pub use methods::{CursorMethods, DisabledReason, Slot, config_readonly, default_close};
pub use registry::CursorRegistry;
pub use session::{
    Connection, ConnectionStats, CursorStatsSnapshot, Session, SessionId, SessionStats,
};
pub use table::{MemTable, TableCursor};
