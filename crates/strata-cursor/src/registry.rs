//! Per-session list of open cursors.
//!
//! New cursors go to the head of the list. A cursor opened on behalf of
//! another (the table cursor inside a dump adapter) goes immediately after
//! its owner, so walking the list in reverse visits dependents before the
//! cursors that own them.

use strata_error::{Result, StrataError};

use crate::cursor::CursorId;

/// Ordered set of the cursors open in one session.
#[derive(Debug, Default, Clone)]
pub struct CursorRegistry {
    ids: Vec<CursorId>,
}

impl CursorRegistry {
    #[must_use]
    pub const fn new() -> Self {
        Self { ids: Vec::new() }
    }

    /// Insert at the head of the list.
    pub fn insert_head(&mut self, id: CursorId) {
        self.ids.insert(0, id);
    }

    /// Insert immediately after `owner`.
    pub fn insert_after(&mut self, owner: CursorId, id: CursorId) -> Result<()> {
        let pos = self
            .position(owner)
            .ok_or_else(|| StrataError::internal(format!("owner cursor {owner} not registered")))?;
        self.ids.insert(pos + 1, id);
        Ok(())
    }

    /// Remove `id`, returning whether it was registered.
    pub fn remove(&mut self, id: CursorId) -> bool {
        match self.position(id) {
            Some(pos) => {
                self.ids.remove(pos);
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn contains(&self, id: CursorId) -> bool {
        self.position(id).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Cursors in list order, most recently opened first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = CursorId> + '_ {
        self.ids.iter().copied()
    }

    /// The order in which to close every cursor: dependents before owners.
    #[must_use]
    pub fn teardown_order(&self) -> Vec<CursorId> {
        self.ids.iter().rev().copied().collect()
    }

    fn position(&self, id: CursorId) -> Option<usize> {
        self.ids.iter().position(|&c| c == id)
    }
}
