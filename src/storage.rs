//! Storage backend abstraction for the image cache.
//!
//! The cache needs a durable byte-keyed store with atomic point operations;
//! prefix iteration is deliberately not part of the contract. Backends are
//! swappable behind [`StorageBackend`]; [`Store`] adds the locking shared by
//! all request handlers.

use crate::error::Result;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// Trait for storage backend implementations.
pub trait StorageBackend: Send {
    /// Insert or update a key-value pair.
    fn put(&mut self, key: &[u8], value: Bytes) -> Result<()>;

    /// Get a value by key.
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>>;

    /// Delete a key and return the old value if it existed.
    fn delete(&mut self, key: &[u8]) -> Result<Option<Bytes>>;

    /// Check if a key exists.
    fn contains_key(&self, key: &[u8]) -> Result<bool>;

    /// Total number of keys.
    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Flush any pending writes to persistent storage.
    fn sync(&mut self) -> Result<()>;

    /// Close the storage backend.
    fn close(&mut self) -> Result<()>;
}

/// In-memory storage backend using a BTreeMap.
#[derive(Default)]
pub struct MemoryBackend {
    data: BTreeMap<Bytes, Bytes>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = (&Bytes, &Bytes)> {
        self.data.iter()
    }
}

impl StorageBackend for MemoryBackend {
    fn put(&mut self, key: &[u8], value: Bytes) -> Result<()> {
        self.data.insert(Bytes::copy_from_slice(key), value);
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        Ok(self.data.get(key).cloned())
    }

    fn delete(&mut self, key: &[u8]) -> Result<Option<Bytes>> {
        Ok(self.data.remove(key))
    }

    fn contains_key(&self, key: &[u8]) -> Result<bool> {
        Ok(self.data.contains_key(key))
    }

    fn len(&self) -> Result<usize> {
        Ok(self.data.len())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.data.clear();
        Ok(())
    }
}

/// Thread-safe handle over a storage backend. Writes are serialised by the
/// internal lock; the lock is never held across expensive work.
pub struct Store {
    inner: Mutex<Box<dyn StorageBackend>>,
}

impl Store {
    pub fn new(backend: Box<dyn StorageBackend>) -> Self {
        Store {
            inner: Mutex::new(backend),
        }
    }

    pub fn memory() -> Self {
        Self::new(Box::new(MemoryBackend::new()))
    }

    pub fn put(&self, key: impl AsRef<[u8]>, value: Bytes) -> Result<()> {
        self.inner.lock().put(key.as_ref(), value)
    }

    pub fn get(&self, key: impl AsRef<[u8]>) -> Result<Option<Bytes>> {
        self.inner.lock().get(key.as_ref())
    }

    pub fn delete(&self, key: impl AsRef<[u8]>) -> Result<Option<Bytes>> {
        self.inner.lock().delete(key.as_ref())
    }

    pub fn contains_key(&self, key: impl AsRef<[u8]>) -> Result<bool> {
        self.inner.lock().contains_key(key.as_ref())
    }

    pub fn len(&self) -> Result<usize> {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.inner.lock().is_empty()
    }

    pub fn sync(&self) -> Result<()> {
        self.inner.lock().sync()
    }

    pub fn close(&self) -> Result<()> {
        self.inner.lock().close()
    }
}
