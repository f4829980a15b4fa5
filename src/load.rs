//! Initial configuration load: the cached configuration and a network fetch race each other, the
//! first one to succeed completes the load.
use std::{
    sync::{
        mpsc::{channel, Receiver},
        Arc, Condvar, Mutex, PoisonError,
    },
    time::Duration,
};

use crate::{
    cache_file::ConfigurationCache,
    configuration_fetcher::{fetch_into_store, Fetcher},
    configuration_store::ConfigurationStore,
    parser::ConfigurationParser,
    poller::Poller,
    Error, Result,
};

/// Completion handle of a configuration load.
///
/// Holds `None` until the load completes, then `Some(Ok(()))` if any source succeeded or
/// `Some(Err(...))` with the fetch error if all of them failed.
#[derive(Clone)]
pub struct LoadHandle {
    state: Arc<(Mutex<Option<Result<()>>>, Condvar)>,
}

impl LoadHandle {
    fn new() -> LoadHandle {
        LoadHandle {
            state: Arc::new((Mutex::new(None), Condvar::new())),
        }
    }

    pub(crate) fn completed(result: Result<()>) -> LoadHandle {
        let handle = LoadHandle::new();
        handle.complete(result);
        handle
    }

    fn complete(&self, result: Result<()>) {
        let (lock, condvar) = &*self.state;
        *lock.lock().unwrap_or_else(PoisonError::into_inner) = Some(result);
        condvar.notify_all();
    }

    /// Block waiting for the load to complete.
    pub fn wait(&self) -> Result<()> {
        let (lock, condvar) = &*self.state;
        let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let guard = condvar
            .wait_while(guard, |result| result.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        guard.clone().unwrap_or(Err(Error::ThreadPanicked))
    }

    /// Block waiting for the load to complete for at most `timeout`. Returns `None` if the load is
    /// still in progress.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<()>> {
        let (lock, condvar) = &*self.state;
        let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = condvar
            .wait_timeout_while(guard, timeout, |result| result.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        guard.clone()
    }

    /// Result of the load if it has completed.
    pub fn try_result(&self) -> Option<Result<()>> {
        let (lock, _) = &*self.state;
        lock.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

enum Attempt {
    Cache(Result<()>),
    Fetch(Result<()>),
}

/// Run `read_cache` and `fetch` concurrently on their own threads.
///
/// `on_complete` is called exactly once, with the result of the first source that succeeds or
/// with the fetch error if every source failed, right before the returned handle completes. A
/// fetch that finishes after the cache has already won still updates the store, it just doesn't
/// complete the load again.
pub(crate) fn load_race<R, F, K>(
    read_cache: Option<R>,
    fetch: Option<F>,
    on_complete: K,
) -> Result<LoadHandle>
where
    R: FnOnce() -> Result<()> + Send + 'static,
    F: FnOnce() -> Result<()> + Send + 'static,
    K: FnOnce(&Result<()>) + Send + 'static,
{
    if read_cache.is_none() && fetch.is_none() {
        let result = Ok(());
        on_complete(&result);
        return Ok(LoadHandle::completed(result));
    }

    let (sender, receiver) = channel();

    if let Some(read_cache) = read_cache {
        let sender = sender.clone();
        std::thread::Builder::new()
            .name("eppo-cache-load".to_owned())
            .spawn(move || {
                // Error means the load has already completed.
                let _ = sender.send(Attempt::Cache(read_cache()));
            })?;
    }

    if let Some(fetch) = fetch {
        let sender = sender.clone();
        std::thread::Builder::new()
            .name("eppo-fetch".to_owned())
            .spawn(move || {
                let _ = sender.send(Attempt::Fetch(fetch()));
            })?;
    }

    // Only worker threads hold senders now, so the channel disconnects once all of them are done.
    drop(sender);

    let handle = LoadHandle::new();
    {
        let handle = handle.clone();
        std::thread::Builder::new()
            .name("eppo-load".to_owned())
            .spawn(move || {
                let result = first_success(receiver);
                on_complete(&result);
                handle.complete(result);
            })?;
    }

    Ok(handle)
}

/// Wait for the first successful attempt. If none succeeds, return the fetch error, falling back
/// to the cache error.
fn first_success(receiver: Receiver<Attempt>) -> Result<()> {
    let mut cache_error = None;
    let mut fetch_error = None;

    for attempt in receiver {
        match attempt {
            Attempt::Cache(Ok(())) => {
                log::info!(target: "eppo", "configuration loaded from cache");
                return Ok(());
            }
            Attempt::Fetch(Ok(())) => {
                log::info!(target: "eppo", "configuration loaded from server");
                return Ok(());
            }
            Attempt::Cache(Err(err)) => {
                log::debug!(target: "eppo", "failed to load cached configuration: {err}");
                cache_error = Some(err);
            }
            Attempt::Fetch(Err(err)) => {
                log::warn!(target: "eppo", "failed to fetch configuration: {err}");
                fetch_error = Some(err);
            }
        }
    }

    Err(fetch_error
        .or(cache_error)
        .unwrap_or(Error::ThreadPanicked))
}

/// How a client obtains its first configuration.
#[derive(Debug, Clone, Default)]
pub(crate) struct LoadOptions {
    /// Payload applied synchronously at construction. Replaces the cache as a load source.
    pub initial_configuration: Option<Vec<u8>>,
    /// Never fetch: only the cache and the initial configuration are used. Disables polling.
    pub offline: bool,
    pub ignore_cached_configuration: bool,
    /// Interval and maximum jitter. Polling starts once the initial load completes.
    pub polling: Option<(Duration, Duration)>,
}

/// Store, fetcher and poller backing one client.
pub(crate) struct ConfigurationSource<F: Fetcher> {
    store: Arc<ConfigurationStore<F::Configuration>>,
    fetcher: Arc<Mutex<F>>,
    parser: Arc<dyn ConfigurationParser>,
    poller: Arc<Poller>,
    options: LoadOptions,
}

impl<F: Fetcher> ConfigurationSource<F> {
    pub(crate) fn new(
        fetcher: F,
        parser: Arc<dyn ConfigurationParser>,
        cache: Option<Arc<dyn ConfigurationCache>>,
        options: LoadOptions,
    ) -> ConfigurationSource<F> {
        let store = Arc::new(ConfigurationStore::new(cache));
        let fetcher = Arc::new(Mutex::new(fetcher));
        let poller = {
            let store = store.clone();
            let fetcher = fetcher.clone();
            Arc::new(Poller::new(move || fetch_into_store(&fetcher, &store)))
        };

        if let Some(bytes) = &options.initial_configuration {
            match F::parse_cached(parser.as_ref(), bytes) {
                Ok(configuration) => {
                    log::debug!(target: "eppo", "applied initial configuration");
                    store.set_configuration(Arc::new(configuration));
                }
                Err(err) => {
                    log::warn!(target: "eppo", error:display = err; "failed to parse initial configuration");
                }
            }
        }

        ConfigurationSource {
            store,
            fetcher,
            parser,
            poller,
            options,
        }
    }

    pub(crate) fn store(&self) -> &ConfigurationStore<F::Configuration> {
        &self.store
    }

    /// Race the cache against a fetch according to the load options.
    pub(crate) fn load(&self) -> Result<LoadHandle> {
        let use_cache = self.store.has_cache()
            && self.options.initial_configuration.is_none()
            && !self.options.ignore_cached_configuration;

        let read_cache = use_cache.then(|| {
            let store = self.store.clone();
            let parser = self.parser.clone();
            move || {
                let configuration =
                    store.read_cache(|bytes| F::parse_cached(parser.as_ref(), bytes))?;
                if !store.set_from_cache(Arc::new(configuration)) {
                    log::debug!(target: "eppo", "cached configuration arrived after a fetch, discarding it");
                }
                Ok(())
            }
        });

        let fetch = (!self.options.offline).then(|| {
            let store = self.store.clone();
            let fetcher = self.fetcher.clone();
            move || fetch_into_store(&fetcher, &store)
        });

        let polling = self.options.polling.filter(|_| !self.options.offline);
        let poller = self.poller.clone();
        load_race(read_cache, fetch, move |result| {
            if let Err(err) = result {
                log::warn!(target: "eppo", "failed to load configuration: {err}");
            }
            // Polling starts even when the load failed, so that later ticks can recover.
            if let Some((interval, jitter)) = polling {
                if let Err(err) = poller.start(interval, jitter) {
                    log::warn!(target: "eppo", "failed to start polling: {err}");
                }
            }
        })
    }

    /// Fetch once on the calling thread.
    pub(crate) fn fetch(&self) -> Result<()> {
        fetch_into_store(&self.fetcher, &self.store)
    }

    pub(crate) fn poller(&self) -> &Poller {
        &self.poller
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            mpsc, Arc, Mutex,
        },
        time::Duration,
    };

    use crate::{
        cache_file::ConfigurationCache,
        configuration_fetcher::{FetchOutcome, Fetcher},
        parser::{ConfigurationParser, JsonConfigurationParser, ParseError},
        Error, Result,
    };

    use super::{load_race, ConfigurationSource, LoadHandle, LoadOptions};

    type Attempt = Box<dyn FnOnce() -> Result<()> + Send>;

    fn ok() -> Option<Attempt> {
        Some(Box::new(|| Ok(())))
    }

    fn failing(err: Error) -> Option<Attempt> {
        Some(Box::new(move || Err(err)))
    }

    /// Attempt that finishes with `result` once `gate` receives a message.
    fn gated(gate: mpsc::Receiver<()>, result: Result<()>) -> Option<Attempt> {
        Some(Box::new(move || {
            let _ = gate.recv();
            result
        }))
    }

    fn race(cache: Option<Attempt>, fetch: Option<Attempt>) -> (LoadHandle, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = {
            let calls = calls.clone();
            load_race(cache, fetch, move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap()
        };
        (handle, calls)
    }

    #[test]
    fn cache_only_success_completes_once() {
        let (handle, calls) = race(ok(), failing(Error::UnexpectedStatus(500)));
        assert!(handle.wait().is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fetch_success_wins_over_cache_failure() {
        let (handle, calls) = race(failing(Error::ThreadPanicked), ok());
        assert!(handle.wait().is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn both_failed_reports_fetch_error() {
        let (handle, calls) = race(
            failing(Error::ThreadPanicked),
            failing(Error::UnexpectedStatus(503)),
        );
        assert!(matches!(handle.wait(), Err(Error::UnexpectedStatus(503))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cache_failure_reported_without_fetch() {
        let (handle, _) = race(failing(Error::Unauthorized), None);
        assert!(matches!(handle.wait(), Err(Error::Unauthorized)));
    }

    #[test]
    fn early_success_does_not_wait_for_slow_source() {
        let (gate_sender, gate) = mpsc::channel();
        let (handle, calls) = race(ok(), gated(gate, Ok(())));

        assert!(handle.wait_timeout(Duration::from_secs(5)).unwrap().is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        gate_sender.send(()).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn pending_until_a_source_completes() {
        let (gate_sender, gate) = mpsc::channel();
        let (handle, calls) = race(None, gated(gate, Ok(())));

        assert!(handle.try_result().is_none());
        assert!(handle.wait_timeout(Duration::from_millis(20)).is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        gate_sender.send(()).unwrap();
        assert!(handle.wait().is_ok());
        assert!(handle.try_result().unwrap().is_ok());
    }

    #[test]
    fn no_sources() {
        let (handle, calls) = race(None, None);
        assert!(handle.try_result().unwrap().is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    /// Cache whose reads block until the gate opens, then return the stale payload.
    struct GatedCache {
        gate: Mutex<mpsc::Receiver<()>>,
        written: Mutex<Option<Vec<u8>>>,
    }

    impl ConfigurationCache for GatedCache {
        fn read(&self) -> std::io::Result<Option<Vec<u8>>> {
            let _ = self.gate.lock().unwrap().recv();
            Ok(Some(br#""cached""#.to_vec()))
        }

        fn write(&self, bytes: &[u8]) -> std::io::Result<()> {
            *self.written.lock().unwrap() = Some(bytes.to_vec());
            Ok(())
        }

        fn delete(&self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct StaticFetcher;

    impl Fetcher for StaticFetcher {
        type Configuration = String;

        fn fetch(&mut self) -> Result<FetchOutcome<String>> {
            Ok(FetchOutcome::Updated {
                configuration: "fetched".to_owned(),
                body: br#""fetched""#.to_vec(),
            })
        }

        fn parse_cached(
            _parser: &dyn ConfigurationParser,
            bytes: &[u8],
        ) -> std::result::Result<String, ParseError> {
            Ok(serde_json::from_slice(bytes)?)
        }
    }

    #[test]
    fn slow_cache_does_not_replace_fetched_configuration() {
        let _ = env_logger::builder().is_test(true).try_init();

        let (gate_sender, gate) = mpsc::channel();
        let cache = Arc::new(GatedCache {
            gate: Mutex::new(gate),
            written: Mutex::new(None),
        });
        let source = ConfigurationSource::new(
            StaticFetcher,
            Arc::new(JsonConfigurationParser),
            Some(cache.clone() as Arc<dyn ConfigurationCache>),
            LoadOptions::default(),
        );

        let handle = source.load().unwrap();
        assert!(handle.wait_timeout(Duration::from_secs(5)).unwrap().is_ok());
        assert_eq!(*source.store().get_configuration(), "fetched");

        gate_sender.send(()).unwrap();
        std::thread::sleep(Duration::from_millis(50));

        assert_eq!(*source.store().get_configuration(), "fetched");
        assert!(source.store().loaded_from_fetch());
        assert_eq!(
            cache.written.lock().unwrap().as_deref(),
            Some(&br#""fetched""#[..])
        );
    }
}
