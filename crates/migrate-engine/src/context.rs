//! Shared key-value store handed to unit loaders
//!
//! Units of one kind often need the same slow-to-compute lookup data (the
//! plugin list of the target system, known templates). Instead of
//! process-wide statics, the engine owns a `SharedContext` and passes it to
//! its loader for every unit it creates, so lifetime and isolation are
//! explicit.

use dashmap::DashMap;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

type Entry = Arc<dyn Any + Send + Sync>;

/// Thread-safe, type-erased store shared by every unit of an engine
///
/// Cloning is cheap and yields a handle to the same store.
#[derive(Clone, Default)]
pub struct SharedContext {
    inner: Arc<DashMap<String, Entry>>,
}

impl SharedContext {
    /// Create an empty context
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, replacing any previous one under the key
    pub fn insert<T>(&self, key: impl Into<String>, value: T)
    where
        T: Any + Send + Sync,
    {
        self.inner.insert(key.into(), Arc::new(value));
    }

    /// Read a value; `None` if absent or stored with another type
    #[must_use]
    pub fn get<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let entry = self.inner.get(key)?.value().clone();
        entry.downcast::<T>().ok()
    }

    /// Read a value, computing and storing it on first use
    ///
    /// The initializer runs at most once per key, even when several units
    /// race for it. The initializer must not touch this context: it runs
    /// while the key's shard is locked. Returns `None` if the key already
    /// holds another type.
    pub fn get_or_insert_with<T, F>(&self, key: &str, init: F) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        let entry = self
            .inner
            .entry(key.to_string())
            .or_insert_with(|| -> Entry { Arc::new(init()) })
            .value()
            .clone();
        entry.downcast::<T>().ok()
    }

    /// Fallible variant of `get_or_insert_with`
    ///
    /// Nothing is stored when the initializer fails.
    ///
    /// # Errors
    /// Returns the initializer's error
    pub fn try_get_or_insert_with<T, E, F>(&self, key: &str, init: F) -> Result<Option<Arc<T>>, E>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Result<T, E>,
    {
        let entry = match self.inner.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(occupied) => occupied.get().clone(),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let value: Entry = Arc::new(init()?);
                vacant.insert(value.clone());
                value
            }
        };
        Ok(entry.downcast::<T>().ok())
    }

    /// Remove a key; returns whether it was present
    pub fn remove(&self, key: &str) -> bool {
        self.inner.remove(key).is_some()
    }

    /// Whether a key is present
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    /// Number of stored keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.inner.clear();
    }
}

impl fmt::Debug for SharedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<String> = self.inner.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        f.debug_struct("SharedContext").field("keys", &keys).finish()
    }
}
