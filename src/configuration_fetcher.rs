//! Fetches the flag configuration (and bandit parameters) from the server.
use std::sync::{Arc, Mutex, PoisonError};

use crate::{
    configuration::{BanditResponse, Configuration},
    configuration_store::ConfigurationStore,
    http::{interpret, HttpClient, HttpMethod, HttpRequest, ResponseOutcome},
    parser::{ConfigurationParser, ParseError},
    ufc::UniversalFlagConfig,
    Error, Result,
};

/// Settings of [`ConfigurationFetcher`].
pub struct ConfigurationFetcherConfig {
    /// Base URL of the configuration CDN.
    pub base_url: String,
    /// SDK key sent with every request.
    pub api_key: String,
    /// SDK name. Usually, language name.
    pub sdk_name: String,
    /// Version of SDK.
    pub sdk_version: String,
}

/// Default base URL of the configuration CDN.
pub const DEFAULT_BASE_URL: &str = "https://fscdn.eppo.cloud/api";

const UFC_ENDPOINT: &str = "/flag-config/v1/config";
const BANDIT_ENDPOINT: &str = "/flag-config/v1/bandits";

/// Result of a single fetch.
#[derive(Debug)]
pub enum FetchOutcome<C> {
    /// Server returned a new configuration.
    Updated {
        /// Parsed configuration.
        configuration: C,
        /// Raw payload for the disk cache.
        body: Vec<u8>,
    },
    /// Server confirmed the last fetched configuration is still current.
    NotModified,
}

/// Source of fresh configurations for a [`ConfigurationStore`].
pub(crate) trait Fetcher: Send + 'static {
    type Configuration: Default + Send + Sync + 'static;

    fn fetch(&mut self) -> Result<FetchOutcome<Self::Configuration>>;

    /// Parse a payload previously written to the disk cache. Doesn't need the fetcher itself, so
    /// reading the cache never waits for an in-flight fetch.
    fn parse_cached(
        parser: &dyn ConfigurationParser,
        bytes: &[u8],
    ) -> std::result::Result<Self::Configuration, ParseError>;
}

/// Fetch once and apply the result to `store`, writing the payload through to the disk cache.
pub(crate) fn fetch_into_store<F: Fetcher>(
    fetcher: &Mutex<F>,
    store: &ConfigurationStore<F::Configuration>,
) -> Result<()> {
    // Holding the lock for the whole fetch so that two fetches for one client never overlap.
    let outcome = fetcher
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .fetch()?;

    match outcome {
        FetchOutcome::Updated {
            configuration,
            body,
        } => {
            store.set_from_fetch(Arc::new(configuration));
            store.write_cache(&body);
        }
        FetchOutcome::NotModified => {
            log::debug!(target: "eppo", "configuration not modified");
        }
    }
    Ok(())
}

/// A client that fetches Eppo configuration from the server.
pub struct ConfigurationFetcher {
    http: Arc<dyn HttpClient>,
    parser: Arc<dyn ConfigurationParser>,
    config: ConfigurationFetcherConfig,
    /// `ETag` of the last successfully applied configuration.
    etag: Option<String>,
    /// If we receive a 401 Unauthorized error during a request, it means the API key is not
    /// valid. We cache this error so we don't issue additional requests to the server.
    unauthorized: bool,
}

impl ConfigurationFetcher {
    /// Create a fetcher. No request is made until [`ConfigurationFetcher::fetch_configuration`].
    pub fn new(
        config: ConfigurationFetcherConfig,
        http: Arc<dyn HttpClient>,
        parser: Arc<dyn ConfigurationParser>,
    ) -> ConfigurationFetcher {
        ConfigurationFetcher {
            http,
            parser,
            config,
            etag: None,
            unauthorized: false,
        }
    }

    /// Fetch flags, then bandits if any flag references them.
    ///
    /// Returns [`FetchOutcome::NotModified`] when the server reports the configuration unchanged.
    pub fn fetch_configuration(&mut self) -> Result<FetchOutcome<Configuration>> {
        if self.unauthorized {
            return Err(Error::Unauthorized);
        }

        log::debug!(target: "eppo", "fetching UFC configuration");
        let request = self.request(UFC_ENDPOINT, self.etag.clone());
        let (body, etag) = match self.execute(&request)? {
            ResponseOutcome::NotModified => return Ok(FetchOutcome::NotModified),
            ResponseOutcome::Modified { body, etag } => (body, etag),
        };

        let flags = self.parser.parse_flag_config(&body)?;
        let bandits = self.fetch_bandits_if_referenced(&flags);

        self.etag = etag;
        log::debug!(target: "eppo", "successfully fetched UFC configuration");

        Ok(FetchOutcome::Updated {
            configuration: Configuration::from_server_response(flags, bandits),
            body,
        })
    }

    fn fetch_bandits_if_referenced(
        &mut self,
        flags: &UniversalFlagConfig,
    ) -> Option<BanditResponse> {
        if flags.bandit_references.is_empty() {
            return None;
        }

        log::debug!(target: "eppo", "fetching bandit parameters");
        let request = self.request(BANDIT_ENDPOINT, None);
        let result = self.execute(&request).and_then(|outcome| match outcome {
            ResponseOutcome::Modified { body, .. } => {
                Ok(Some(self.parser.parse_bandit_params(&body)?))
            }
            ResponseOutcome::NotModified => Ok(None),
        });

        match result {
            Ok(bandits) => bandits,
            Err(err) => {
                log::warn!(target: "eppo", "failed to fetch bandit parameters, continuing without bandits: {err}");
                None
            }
        }
    }

    fn request(&self, resource_path: &str, last_version_id: Option<String>) -> HttpRequest {
        HttpRequest {
            base_url: self.config.base_url.clone(),
            resource_path: resource_path.to_owned(),
            query_params: vec![
                ("apiKey".to_owned(), self.config.api_key.clone()),
                ("sdkName".to_owned(), self.config.sdk_name.clone()),
                ("sdkVersion".to_owned(), self.config.sdk_version.clone()),
            ],
            method: HttpMethod::Get,
            body: None,
            last_version_id,
        }
    }

    fn execute(&mut self, request: &HttpRequest) -> Result<ResponseOutcome> {
        let response = self.http.execute(request)?;
        interpret(response).map_err(|err| {
            if let Error::Unauthorized = err {
                log::warn!(target: "eppo", "client is not authorized. Check your API key");
                self.unauthorized = true;
            } else {
                log::warn!(target: "eppo", "received non-200 response while fetching new configuration: {err}");
            }
            err
        })
    }
}

impl Fetcher for ConfigurationFetcher {
    type Configuration = Configuration;

    fn fetch(&mut self) -> Result<FetchOutcome<Configuration>> {
        self.fetch_configuration()
    }

    fn parse_cached(
        parser: &dyn ConfigurationParser,
        bytes: &[u8],
    ) -> std::result::Result<Configuration, ParseError> {
        let flags = parser.parse_flag_config(bytes)?;
        if flags.flags.is_empty() {
            return Err(ParseError::MissingFlags);
        }
        Ok(Configuration::from_server_response(flags, None))
    }
}
