//! Copying a position from one cursor to another.

use tracing::trace;

use strata_error::Result;

use crate::cursor::Cursor;

/// Position `to` on the record `from` is positioned on.
///
/// The key is moved as canonical bytes, so the formats and raw settings of
/// both cursors are left alone. Fails if `from` has no key or if the record
/// cannot be found through `to`.
pub fn dup_position(from: &mut Cursor, to: &mut Cursor) -> Result<()> {
    let key = from.get_raw_key()?;
    trace!(from = %from.id(), to = %to.id(), key_len = key.len(), "duplicating position");
    to.set_raw_key(key)?;
    to.search()
}
