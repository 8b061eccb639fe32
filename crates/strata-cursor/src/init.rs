//! Cursor configuration and registration.

use tracing::debug;

use strata_error::{Result, StrataError};
use strata_types::{ConfigKind, config};

use crate::cursor::{Cursor, CursorFlags, CursorId};
use crate::dump::{self, DumpFormat};
use crate::methods::{self, DisabledReason};
use crate::session::Session;

/// Configure a freshly built cursor and register it with `session`.
///
/// Applies `overwrite`, `append` (record-number keys only), `checkpoint`,
/// `dump`, `raw` and `readonly` from `cfg`. A cursor opened without an
/// owner and with a `dump` format is wrapped in a dump adapter: the adapter
/// is registered first and the wrapped cursor directly after it, and the
/// adapter is returned. Otherwise the cursor is registered after `owner`, or
/// at the head of the session's list.
///
/// Every configuration value is read before the registry changes, so a
/// failure leaves nothing registered.
pub fn cursor_init(
    session: &mut Session,
    mut cursor: Cursor,
    uri: &str,
    owner: Option<CursorId>,
    cfg: &[&str],
) -> Result<Cursor> {
    if cursor.session != session.id() {
        return Err(StrataError::invalid_argument(format!(
            "cursor {} was built for session {}, not session {}",
            cursor.id,
            cursor.session,
            session.id()
        )));
    }
    if let Some(owner) = owner {
        if !session.cursors().contains(owner) {
            return Err(StrataError::invalid_argument(format!(
                "owner cursor {owner} is not open in this session"
            )));
        }
    }

    if cursor.internal_uri.is_none() {
        cursor.internal_uri = Some(uri.to_owned());
    }
    if cursor.uri.is_empty() {
        cursor.uri = uri.to_owned();
    }

    let overwrite = config::gets_def(cfg, "overwrite", 1)?;
    cursor.flags.set(CursorFlags::OVERWRITE, overwrite.as_bool());

    if cursor.is_recno_key() {
        let append = config::gets_def(cfg, "append", 0)?;
        cursor.flags.set(CursorFlags::APPEND, append.as_bool());
    }

    let checkpoint = config::gets_def(cfg, "checkpoint", 0)?;
    if !checkpoint.is_empty() {
        cursor.disable_writes(DisabledReason::Checkpoint(checkpoint.str));
    }

    let dump_format = match owner {
        Some(_) => None,
        None => {
            let dump = config::gets_def(cfg, "dump", 0)?;
            if dump.kind == ConfigKind::Bool && dump.is_empty() {
                return Err(StrataError::invalid_argument(
                    "dump requires a format: json, print or hex",
                ));
            }
            DumpFormat::from_config(&dump.str)?
        }
    };
    if let Some(format) = dump_format {
        cursor.flags.insert(format.flag());
    }

    if config::gets_def(cfg, "raw", 0)?.as_bool() {
        cursor.flags.insert(CursorFlags::RAW);
    }

    methods::config_readonly(&mut cursor, cfg, false)?;

    let Some(format) = dump_format else {
        register(session, &mut cursor, owner)?;
        return Ok(cursor);
    };

    let mut adapter = dump::wrap(session, cursor, format);
    register(session, &mut adapter, None)?;
    let adapter_id = adapter.id;
    if let Some(child) = dump::child_mut(&mut adapter) {
        register(session, child, Some(adapter_id))?;
    }
    Ok(adapter)
}

fn register(session: &mut Session, cursor: &mut Cursor, owner: Option<CursorId>) -> Result<()> {
    session.register(cursor.id, owner)?;
    cursor.owner = owner;
    cursor.flags.insert(CursorFlags::OPEN);
    debug!(
        cursor_id = %cursor.id,
        uri = %cursor.uri,
        owner = ?owner.map(CursorId::get),
        flags = ?cursor.flags,
        "cursor opened"
    );
    Ok(())
}
