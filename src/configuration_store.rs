//! A thread-safe in-memory storage for the currently active configuration. [`ConfigurationStore`]
//! provides concurrent access for readers (flag evaluation) and writers (load race, poller).
use std::{
    io,
    sync::{Arc, Mutex, PoisonError, RwLock},
};

use crate::{cache_file::ConfigurationCache, parser::ParseError, Error, Result};

/// `ConfigurationStore` provides a thread-safe (`Sync`) storage for a configuration snapshot
/// that allows concurrent access for readers and writers.
///
/// The snapshot itself is always immutable and can only be replaced completely. Before anything
/// is loaded the store holds `C::default()`, the empty configuration.
///
/// The store also owns the optional on-disk cache. Cache writes are serialized so at most one
/// write is in flight, and they never block readers of the in-memory snapshot.
pub struct ConfigurationStore<C> {
    slot: RwLock<Slot<C>>,
    cache: Option<Arc<dyn ConfigurationCache>>,
    cache_write_lock: Mutex<()>,
}

struct Slot<C> {
    configuration: Arc<C>,
    /// Set once a fetched configuration has been stored. Cached configurations that finish
    /// loading afterwards are discarded.
    loaded_from_fetch: bool,
}

impl<C: Default> ConfigurationStore<C> {
    /// Create a store holding the empty configuration.
    pub fn new(cache: Option<Arc<dyn ConfigurationCache>>) -> Self {
        ConfigurationStore {
            slot: RwLock::new(Slot {
                configuration: Arc::new(C::default()),
                loaded_from_fetch: false,
            }),
            cache,
            cache_write_lock: Mutex::new(()),
        }
    }

    /// Get currently-active configuration.
    pub fn get_configuration(&self) -> Arc<C> {
        // A poisoned lock only means a writer panicked after replacing the Arc, the slot itself
        // is always consistent.
        let slot = self.slot.read().unwrap_or_else(PoisonError::into_inner);
        slot.configuration.clone()
    }

    /// Returns `true` if the active configuration came from a network fetch.
    pub fn loaded_from_fetch(&self) -> bool {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .loaded_from_fetch
    }

    /// Replace the active configuration unconditionally, without marking it as fetched.
    pub fn set_configuration(&self, configuration: Arc<C>) {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        slot.configuration = configuration;
    }

    /// Store a freshly fetched configuration. Fetched data is always authoritative.
    pub(crate) fn set_from_fetch(&self, configuration: Arc<C>) {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        slot.configuration = configuration;
        slot.loaded_from_fetch = true;
    }

    /// Store a configuration read from the cache unless a fetched configuration is already
    /// active. Returns whether the configuration was applied.
    pub(crate) fn set_from_cache(&self, configuration: Arc<C>) -> bool {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        if slot.loaded_from_fetch {
            return false;
        }
        slot.configuration = configuration;
        true
    }

    pub(crate) fn has_cache(&self) -> bool {
        self.cache.is_some()
    }

    /// Read and parse the cached configuration.
    ///
    /// A cache that cannot be parsed is deleted.
    pub(crate) fn read_cache(
        &self,
        parse: impl FnOnce(&[u8]) -> std::result::Result<C, ParseError>,
    ) -> Result<C> {
        let Some(cache) = &self.cache else {
            return Err(Error::from(io::Error::from(io::ErrorKind::NotFound)));
        };

        let Some(bytes) = cache.read()? else {
            return Err(Error::from(io::Error::from(io::ErrorKind::NotFound)));
        };

        parse(&bytes).map_err(|err| {
            log::warn!(target: "eppo", error:display = err; "cached configuration is corrupt");
            self.delete_stale_cache(cache.as_ref());
            Error::ConfigurationParseError(err)
        })
    }

    /// Delete a corrupt cache unless a fetch has already replaced it.
    fn delete_stale_cache(&self, cache: &dyn ConfigurationCache) {
        // Same lock as `write_cache`, so a fetched body is never deleted mid-write.
        let _guard = self
            .cache_write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.loaded_from_fetch() {
            log::debug!(target: "eppo", "cache was rewritten by a fetch, keeping it");
            return;
        }
        if let Err(err) = cache.delete() {
            log::warn!(target: "eppo", error:display = err; "failed to delete cached configuration");
        }
    }

    /// Persist the body of a successful fetch. Errors are logged and otherwise ignored.
    pub(crate) fn write_cache(&self, bytes: &[u8]) {
        let Some(cache) = &self.cache else {
            return;
        };

        let _guard = self
            .cache_write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match cache.write(bytes) {
            Ok(()) => log::trace!(target: "eppo", "cached configuration updated"),
            Err(err) => {
                log::warn!(target: "eppo", error:display = err; "failed to write configuration cache")
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        io,
        sync::{Arc, Mutex},
    };

    use crate::{cache_file::ConfigurationCache, parser::ParseError, Error};

    use super::ConfigurationStore;

    /// In-memory [`ConfigurationCache`].
    #[derive(Default)]
    pub(crate) struct MemoryCache {
        pub(crate) bytes: Mutex<Option<Vec<u8>>>,
    }

    impl MemoryCache {
        pub(crate) fn with(bytes: &[u8]) -> MemoryCache {
            MemoryCache {
                bytes: Mutex::new(Some(bytes.to_vec())),
            }
        }

        pub(crate) fn contents(&self) -> Option<Vec<u8>> {
            self.bytes.lock().unwrap().clone()
        }
    }

    impl ConfigurationCache for MemoryCache {
        fn read(&self) -> io::Result<Option<Vec<u8>>> {
            Ok(self.bytes.lock().unwrap().clone())
        }

        fn write(&self, bytes: &[u8]) -> io::Result<()> {
            *self.bytes.lock().unwrap() = Some(bytes.to_vec());
            Ok(())
        }

        fn delete(&self) -> io::Result<()> {
            *self.bytes.lock().unwrap() = None;
            Ok(())
        }
    }

    fn parse(bytes: &[u8]) -> Result<String, ParseError> {
        let value: String = serde_json::from_slice(bytes)?;
        if value.is_empty() {
            return Err(ParseError::MissingFlags);
        }
        Ok(value)
    }

    #[test]
    fn can_set_configuration_from_another_thread() {
        let store = Arc::new(ConfigurationStore::<String>::new(None));

        assert_eq!(*store.get_configuration(), "");

        {
            let store = store.clone();
            let _ = std::thread::spawn(move || {
                store.set_from_fetch(Arc::new("fetched".to_owned()));
            })
            .join();
        }

        assert_eq!(*store.get_configuration(), "fetched");
        assert!(store.loaded_from_fetch());
    }

    #[test]
    fn cache_does_not_override_fetch() {
        let store = ConfigurationStore::<String>::new(None);

        assert!(store.set_from_cache(Arc::new("cached".to_owned())));
        assert_eq!(*store.get_configuration(), "cached");

        store.set_from_fetch(Arc::new("fetched".to_owned()));
        assert!(!store.set_from_cache(Arc::new("stale".to_owned())));
        assert_eq!(*store.get_configuration(), "fetched");
    }

    #[test]
    fn read_cache() {
        let cache = Arc::new(MemoryCache::with(br#""cached""#));
        let store = ConfigurationStore::<String>::new(Some(cache.clone()));

        assert_eq!(store.read_cache(parse).unwrap(), "cached");
        assert!(cache.contents().is_some());
    }

    #[test]
    fn missing_cache() {
        let store = ConfigurationStore::<String>::new(None);
        assert!(matches!(store.read_cache(parse), Err(Error::Io(_))));

        let store = ConfigurationStore::<String>::new(Some(Arc::new(MemoryCache::default())));
        assert!(matches!(store.read_cache(parse), Err(Error::Io(_))));
    }

    #[test]
    fn corrupt_cache_is_deleted() {
        let _ = env_logger::builder().is_test(true).try_init();

        let cache = Arc::new(MemoryCache::with(b"{not json"));
        let store = ConfigurationStore::<String>::new(Some(cache.clone()));

        assert!(matches!(
            store.read_cache(parse),
            Err(Error::ConfigurationParseError(ParseError::Json(_)))
        ));
        assert_eq!(cache.contents(), None);

        let cache = Arc::new(MemoryCache::with(br#""""#));
        let store = ConfigurationStore::<String>::new(Some(cache.clone()));
        assert!(matches!(
            store.read_cache(parse),
            Err(Error::ConfigurationParseError(ParseError::MissingFlags))
        ));
        assert_eq!(cache.contents(), None);
    }

    #[test]
    fn corrupt_cache_keeps_body_written_by_fetch() {
        let cache = Arc::new(MemoryCache::with(b"{not json"));
        let store = ConfigurationStore::<String>::new(Some(cache.clone()));

        // A fetch completes while the stale cache is being parsed.
        let result = store.read_cache(|_| {
            store.set_from_fetch(Arc::new("fetched".to_owned()));
            store.write_cache(b"\"fetched\"");
            Err(ParseError::MissingFlags)
        });

        assert!(matches!(result, Err(Error::ConfigurationParseError(_))));
        assert_eq!(cache.contents().as_deref(), Some(&b"\"fetched\""[..]));
        assert_eq!(*store.get_configuration(), "fetched");
    }

    #[test]
    fn write_cache() {
        let cache = Arc::new(MemoryCache::default());
        let store = ConfigurationStore::<String>::new(Some(cache.clone()));

        store.write_cache(b"body");
        assert_eq!(cache.contents().as_deref(), Some(&b"body"[..]));
    }
}
