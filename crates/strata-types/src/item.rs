//! Growable byte buffer for cursor keys and values.
//!
//! An [`Item`] is in one of three states:
//!
//! - **empty**: no data;
//! - **shared**: the item references memory it does not own (application
//!   memory handed to `set_key`, or table memory after a search) through a
//!   [`Bytes`] handle; no copy is made;
//! - **private**: the item owns a copy in its growable allocation.
//!
//! The private allocation is kept across state changes so a cursor that
//! repeatedly packs keys reuses one buffer.

use bytes::Bytes;

use strata_error::{Result, StrataError};

#[derive(Debug, Clone, Default)]
enum ItemData {
    #[default]
    Empty,
    Shared(Bytes),
    /// Private copy; the payload is `mem[..len]`.
    Private(usize),
}

/// Owned, growable byte region with an explicit size.
#[derive(Debug, Default)]
pub struct Item {
    data: ItemData,
    /// Backing allocation for private data. Its length is the usable size.
    mem: Vec<u8>,
}

impl Item {
    /// Create an empty item with no allocation.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            data: ItemData::Empty,
            mem: Vec::new(),
        }
    }

    /// Current contents.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        match &self.data {
            ItemData::Empty => &[],
            ItemData::Shared(bytes) => bytes,
            ItemData::Private(len) => &self.mem[..*len],
        }
    }

    /// Size of the current contents in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        match &self.data {
            ItemData::Empty => 0,
            ItemData::Shared(bytes) => bytes.len(),
            ItemData::Private(len) => *len,
        }
    }

    /// Whether the item holds no bytes.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the item references memory owned elsewhere.
    #[must_use]
    pub const fn is_shared(&self) -> bool {
        matches!(self.data, ItemData::Shared(_))
    }

    /// Whether the item holds a private copy.
    #[must_use]
    pub const fn is_private(&self) -> bool {
        matches!(self.data, ItemData::Private(_))
    }

    /// Size of the private allocation.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.mem.len()
    }

    /// Reference `data` without copying it.
    pub fn set_shared(&mut self, data: Bytes) {
        self.data = ItemData::Shared(data);
    }

    /// Grow the private allocation to at least `size` bytes and make the
    /// item private with exactly `size` bytes, returning them for writing.
    ///
    /// Previous contents of the returned region are unspecified.
    pub fn init_size(&mut self, size: usize) -> Result<&mut [u8]> {
        self.grow(size)?;
        self.data = ItemData::Private(size);
        Ok(&mut self.mem[..size])
    }

    /// Replace the contents with a private copy of `data`.
    pub fn set_copy(&mut self, data: &[u8]) -> Result<()> {
        self.init_size(data.len())?.copy_from_slice(data);
        Ok(())
    }

    /// Convert a shared reference into a private copy. Empty and private
    /// items are unchanged.
    pub fn make_private(&mut self) -> Result<()> {
        if let ItemData::Shared(bytes) = std::mem::take(&mut self.data) {
            self.set_copy(&bytes)?;
        }
        Ok(())
    }

    /// A handle to the contents that outlives this item.
    ///
    /// Shared items hand out another reference to the same memory; private
    /// items are copied.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        match &self.data {
            ItemData::Empty => Bytes::new(),
            ItemData::Shared(bytes) => bytes.clone(),
            ItemData::Private(len) => Bytes::copy_from_slice(&self.mem[..*len]),
        }
    }

    /// Drop the current contents but keep the private allocation.
    pub fn clear(&mut self) {
        self.data = ItemData::Empty;
    }

    /// Drop the current contents and release the private allocation.
    pub fn free(&mut self) {
        self.data = ItemData::Empty;
        self.mem = Vec::new();
    }

    fn grow(&mut self, size: usize) -> Result<()> {
        if self.mem.len() < size {
            self.mem
                .try_reserve(size - self.mem.len())
                .map_err(|_| StrataError::OutOfMemory { requested: size })?;
            self.mem.resize(size, 0);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_item_is_empty() {
        let item = Item::new();
        assert!(item.is_empty());
        assert!(!item.is_shared());
        assert!(!item.is_private());
        assert_eq!(item.capacity(), 0);
    }

    #[test]
    fn test_shared_references_without_copy() {
        let source = Bytes::from_static(b"page memory");
        let mut item = Item::new();
        item.set_shared(source.clone());
        assert!(item.is_shared());
        assert_eq!(item.as_slice().as_ptr(), source.as_ptr());
        assert_eq!(item.to_bytes().as_ptr(), source.as_ptr());
        assert_eq!(item.capacity(), 0, "sharing must not allocate");
    }

    #[test]
    fn test_init_size_reuses_allocation() {
        let mut item = Item::new();
        item.init_size(32).unwrap().fill(7);
        assert_eq!(item.len(), 32);
        let ptr = item.as_slice().as_ptr();

        item.init_size(8).unwrap();
        assert_eq!(item.len(), 8);
        assert_eq!(item.capacity(), 32);
        assert_eq!(item.as_slice().as_ptr(), ptr);
    }

    #[test]
    fn test_make_private_detaches_from_source() {
        let source = Bytes::from(b"application".to_vec());
        let mut item = Item::new();
        item.set_shared(source.clone());
        item.make_private().unwrap();
        drop(source);

        assert!(item.is_private());
        assert_eq!(item.as_slice(), b"application");
        assert_ne!(item.to_bytes().as_ptr(), item.as_slice().as_ptr());
    }

    #[test]
    fn test_clear_keeps_allocation_free_releases() {
        let mut item = Item::new();
        item.set_copy(b"abc").unwrap();
        item.clear();
        assert!(item.is_empty());
        assert_eq!(item.capacity(), 3);

        item.free();
        assert_eq!(item.capacity(), 0);
    }
}
