use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Duration};

use crate::{
    assignment_cache::{AssignmentCache, LruAssignmentCache},
    attributes::ContextAttributes,
    cache_file::{CacheFile, ConfigurationCache},
    configuration_fetcher,
    events::{NoopAssignmentLogger, NoopBanditLogger},
    http::{HttpClient, ReqwestHttpClient},
    load::LoadOptions,
    parser::{ConfigurationParser, JsonConfigurationParser},
    precomputed, AssignmentLogger, BanditLogger, Client, PrecomputedClient, Result,
};

pub(crate) const SDK_NAME: &str = "rust";
pub(crate) const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Precomputed polling jitter, as a fraction of the interval, when none is given.
const DEFAULT_JITTER_RATIO: u32 = 10;

/// Configuration for [`Client`].
pub struct ClientConfig<'a> {
    pub(crate) api_key: String,
    pub(crate) base_url: String,
    pub(crate) assignment_logger: Box<dyn AssignmentLogger + Send + Sync + 'a>,
    pub(crate) assignment_cache: Option<Arc<dyn AssignmentCache>>,
    pub(crate) graceful_mode: bool,
    pub(crate) cache_directory: Option<PathBuf>,
    pub(crate) configuration_cache: Option<Arc<dyn ConfigurationCache>>,
    pub(crate) http_client: Option<Arc<dyn HttpClient>>,
    pub(crate) parser: Arc<dyn ConfigurationParser>,
    pub(crate) load_options: LoadOptions,
}

impl<'a> ClientConfig<'a> {
    /// Create a default Eppo configuration using the specified API key.
    ///
    /// ```
    /// # use eppo_client::ClientConfig;
    /// ClientConfig::from_api_key("api-key");
    /// ```
    pub fn from_api_key(api_key: impl Into<String>) -> Self {
        ClientConfig {
            api_key: api_key.into(),
            base_url: ClientConfig::DEFAULT_BASE_URL.to_owned(),
            assignment_logger: Box::new(NoopAssignmentLogger),
            assignment_cache: Some(Arc::new(LruAssignmentCache::default())),
            graceful_mode: true,
            cache_directory: None,
            configuration_cache: None,
            http_client: None,
            parser: Arc::new(JsonConfigurationParser),
            load_options: LoadOptions::default(),
        }
    }

    /// Default base URL for API calls.
    pub const DEFAULT_BASE_URL: &'static str = configuration_fetcher::DEFAULT_BASE_URL;

    /// Override base URL for API calls. Clients should use the default setting in most cases.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set assignment logger to pass variation assignments to your data warehouse.
    ///
    /// ```
    /// # use eppo_client::{AssignmentEvent, ClientConfig};
    /// let config = ClientConfig::from_api_key("api-key").assignment_logger(|event: AssignmentEvent| {
    ///   println!("{:?}", event);
    /// });
    /// ```
    pub fn assignment_logger(
        mut self,
        assignment_logger: impl AssignmentLogger + Send + Sync + 'a,
    ) -> Self {
        self.assignment_logger = Box::new(assignment_logger);
        self
    }

    /// Replace the cache used to deduplicate assignment events.
    pub fn assignment_cache(mut self, assignment_cache: impl AssignmentCache + 'static) -> Self {
        self.assignment_cache = Some(Arc::new(assignment_cache));
        self
    }

    /// Log every assignment, including repeated identical ones.
    pub fn disable_assignment_cache(mut self) -> Self {
        self.assignment_cache = None;
        self
    }

    /// In graceful mode (the default), evaluation errors are logged and the default value is
    /// returned. Otherwise they are returned to the caller.
    pub fn graceful_mode(mut self, graceful_mode: bool) -> Self {
        self.graceful_mode = graceful_mode;
        self
    }

    /// Persist fetched configurations in `directory` and load them on startup.
    pub fn cache_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.cache_directory = Some(directory.into());
        self
    }

    /// Use a custom configuration cache. Takes precedence over [`ClientConfig::cache_directory`].
    pub fn configuration_cache(mut self, cache: impl ConfigurationCache + 'static) -> Self {
        self.configuration_cache = Some(Arc::new(cache));
        self
    }

    /// Use a custom [`HttpClient`] instead of [`ReqwestHttpClient`](crate::ReqwestHttpClient).
    pub fn http_client(mut self, http_client: impl HttpClient + 'static) -> Self {
        self.http_client = Some(Arc::new(http_client));
        self
    }

    /// Use a custom [`ConfigurationParser`].
    pub fn parser(mut self, parser: impl ConfigurationParser + 'static) -> Self {
        self.parser = Arc::new(parser);
        self
    }

    /// Configuration payload applied before anything is loaded. The cache is not read when an
    /// initial configuration is given.
    pub fn initial_configuration(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.load_options.initial_configuration = Some(bytes.into());
        self
    }

    /// Never contact the server.
    pub fn offline(mut self, offline: bool) -> Self {
        self.load_options.offline = offline;
        self
    }

    /// Skip the cached configuration and wait for the server.
    pub fn ignore_cached_configuration(mut self, ignore: bool) -> Self {
        self.load_options.ignore_cached_configuration = ignore;
        self
    }

    /// Poll for configuration updates every `interval` plus a random delay of up to `jitter`,
    /// starting once the initial load completes.
    pub fn polling(mut self, interval: Duration, jitter: Duration) -> Self {
        self.load_options.polling = Some((interval, jitter));
        self
    }

    pub(crate) fn resolve_configuration_cache(&self) -> Option<Arc<dyn ConfigurationCache>> {
        self.configuration_cache.clone().or_else(|| {
            let directory = self.cache_directory.as_ref()?;
            let cache = CacheFile::for_flags(directory, &self.api_key);
            Some(Arc::new(cache) as Arc<dyn ConfigurationCache>)
        })
    }

    /// Create a new [`Client`] using the specified configuration.
    ///
    /// The client starts with an empty configuration. Call [`Client::load_configuration`] to
    /// load one.
    ///
    /// ```
    /// # use eppo_client::{ClientConfig, Client};
    /// let client: Client = ClientConfig::from_api_key("api-key").to_client().unwrap();
    /// ```
    pub fn to_client(self) -> Result<Client<'a>> {
        Client::new(self)
    }
}

/// Configuration for [`PrecomputedClient`].
pub struct PrecomputedClientConfig<'a> {
    pub(crate) api_key: String,
    pub(crate) subject_key: String,
    pub(crate) subject_attributes: ContextAttributes,
    pub(crate) bandit_actions: Option<HashMap<String, HashMap<String, ContextAttributes>>>,
    pub(crate) base_url: String,
    pub(crate) assignment_logger: Box<dyn AssignmentLogger + Send + Sync + 'a>,
    pub(crate) bandit_logger: Box<dyn BanditLogger + Send + Sync + 'a>,
    pub(crate) assignment_cache: Option<Arc<dyn AssignmentCache>>,
    pub(crate) bandit_cache: Option<Arc<dyn AssignmentCache>>,
    pub(crate) graceful_mode: bool,
    pub(crate) cache_directory: Option<PathBuf>,
    pub(crate) configuration_cache: Option<Arc<dyn ConfigurationCache>>,
    pub(crate) http_client: Option<Arc<dyn HttpClient>>,
    pub(crate) parser: Arc<dyn ConfigurationParser>,
    pub(crate) polling_interval: Option<Duration>,
    pub(crate) polling_jitter: Option<Duration>,
    pub(crate) load_options: LoadOptions,
}

impl<'a> PrecomputedClientConfig<'a> {
    /// Configuration for a client serving assignments precomputed for `subject_key`.
    pub fn new(api_key: impl Into<String>, subject_key: impl Into<String>) -> Self {
        PrecomputedClientConfig {
            api_key: api_key.into(),
            subject_key: subject_key.into(),
            subject_attributes: ContextAttributes::default(),
            bandit_actions: None,
            base_url: PrecomputedClientConfig::DEFAULT_BASE_URL.to_owned(),
            assignment_logger: Box::new(NoopAssignmentLogger),
            bandit_logger: Box::new(NoopBanditLogger),
            assignment_cache: Some(Arc::new(LruAssignmentCache::default())),
            bandit_cache: Some(Arc::new(LruAssignmentCache::default())),
            graceful_mode: true,
            cache_directory: None,
            configuration_cache: None,
            http_client: None,
            parser: Arc::new(JsonConfigurationParser),
            polling_interval: None,
            polling_jitter: None,
            load_options: LoadOptions::default(),
        }
    }

    /// Default base URL of the precomputed assignments service.
    pub const DEFAULT_BASE_URL: &'static str = precomputed::DEFAULT_BASE_URL;

    /// Attributes sent to the server when computing assignments.
    pub fn subject_attributes(mut self, subject_attributes: impl Into<ContextAttributes>) -> Self {
        self.subject_attributes = subject_attributes.into();
        self
    }

    /// Candidate actions per bandit flag: flag key -> action key -> action attributes.
    pub fn bandit_actions(
        mut self,
        bandit_actions: HashMap<String, HashMap<String, ContextAttributes>>,
    ) -> Self {
        self.bandit_actions = Some(bandit_actions);
        self
    }

    /// Override base URL of the precomputed assignments service.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set assignment logger to pass variation assignments to your data warehouse.
    pub fn assignment_logger(
        mut self,
        assignment_logger: impl AssignmentLogger + Send + Sync + 'a,
    ) -> Self {
        self.assignment_logger = Box::new(assignment_logger);
        self
    }

    /// Set bandit logger to pass bandit action selections to your data warehouse.
    pub fn bandit_logger(mut self, bandit_logger: impl BanditLogger + Send + Sync + 'a) -> Self {
        self.bandit_logger = Box::new(bandit_logger);
        self
    }

    /// Replace the cache used to deduplicate assignment events.
    pub fn assignment_cache(mut self, assignment_cache: impl AssignmentCache + 'static) -> Self {
        self.assignment_cache = Some(Arc::new(assignment_cache));
        self
    }

    /// Log every assignment, including repeated identical ones.
    pub fn disable_assignment_cache(mut self) -> Self {
        self.assignment_cache = None;
        self
    }

    /// Replace the cache used to deduplicate bandit events.
    pub fn bandit_cache(mut self, bandit_cache: impl AssignmentCache + 'static) -> Self {
        self.bandit_cache = Some(Arc::new(bandit_cache));
        self
    }

    /// Log every bandit action, including repeated identical ones.
    pub fn disable_bandit_cache(mut self) -> Self {
        self.bandit_cache = None;
        self
    }

    /// See [`ClientConfig::graceful_mode`].
    pub fn graceful_mode(mut self, graceful_mode: bool) -> Self {
        self.graceful_mode = graceful_mode;
        self
    }

    /// Persist fetched assignments in `directory` and load them on startup.
    pub fn cache_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.cache_directory = Some(directory.into());
        self
    }

    /// Use a custom configuration cache. Takes precedence over the cache directory.
    pub fn configuration_cache(mut self, cache: impl ConfigurationCache + 'static) -> Self {
        self.configuration_cache = Some(Arc::new(cache));
        self
    }

    /// Use a custom [`HttpClient`].
    pub fn http_client(mut self, http_client: impl HttpClient + 'static) -> Self {
        self.http_client = Some(Arc::new(http_client));
        self
    }

    /// Use a custom [`ConfigurationParser`].
    pub fn parser(mut self, parser: impl ConfigurationParser + 'static) -> Self {
        self.parser = Arc::new(parser);
        self
    }

    /// Apply `bytes` as the configuration at construction. The cache is not read.
    pub fn initial_configuration(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.load_options.initial_configuration = Some(bytes.into());
        self
    }

    /// Never contact the server. Polling is disabled.
    pub fn offline(mut self, offline: bool) -> Self {
        self.load_options.offline = offline;
        self
    }

    /// Skip reading the configuration cache on load. Fetches are still cached.
    pub fn ignore_cached_configuration(mut self, ignore: bool) -> Self {
        self.load_options.ignore_cached_configuration = ignore;
        self
    }

    /// Poll for updated assignments every `interval`, starting once the initial load completes.
    pub fn polling(mut self, interval: Duration) -> Self {
        self.polling_interval = Some(interval);
        self
    }

    /// Maximum random delay added to each polling interval. Defaults to 10% of the interval.
    pub fn polling_jitter(mut self, jitter: Duration) -> Self {
        self.polling_jitter = Some(jitter);
        self
    }

    pub(crate) fn resolve_configuration_cache(&self) -> Option<Arc<dyn ConfigurationCache>> {
        self.configuration_cache.clone().or_else(|| {
            let directory = self.cache_directory.as_ref()?;
            Some(Arc::new(CacheFile::for_precomputed(
                directory,
                &self.api_key,
                &self.subject_key,
            )) as Arc<dyn ConfigurationCache>)
        })
    }

    pub(crate) fn resolve_load_options(&self) -> LoadOptions {
        let polling = self.polling_interval.map(|interval| {
            let jitter = self
                .polling_jitter
                .unwrap_or(interval / DEFAULT_JITTER_RATIO);
            (interval, jitter)
        });
        LoadOptions {
            polling,
            ..self.load_options.clone()
        }
    }

    /// Create a new [`PrecomputedClient`].
    ///
    /// Fails with [`Error::MissingApiKey`](crate::Error::MissingApiKey) or
    /// [`Error::MissingSubjectKey`](crate::Error::MissingSubjectKey) regardless of
    /// graceful mode.
    pub fn to_client(self) -> Result<PrecomputedClient<'a>> {
        PrecomputedClient::new(self)
    }
}

pub(crate) fn http_client_or_default(
    http_client: Option<Arc<dyn HttpClient>>,
) -> Result<Arc<dyn HttpClient>> {
    match http_client {
        Some(http_client) => Ok(http_client),
        None => Ok(Arc::new(ReqwestHttpClient::new()?)),
    }
}
