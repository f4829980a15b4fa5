//! Fetches precomputed assignments for one subject.
use std::{collections::HashMap, sync::Arc};

use crate::{
    attributes::ContextAttributes,
    configuration_fetcher::{FetchOutcome, Fetcher},
    http::{interpret, HttpClient, HttpMethod, HttpRequest, ResponseOutcome},
    parser::{ConfigurationParser, ParseError},
    Error, Result,
};

use super::{PrecomputedConfiguration, PrecomputedRequest};

/// Default base URL of the precomputed assignments service.
pub const DEFAULT_BASE_URL: &str = "https://fs-edge-assignment.eppo.cloud";

const ASSIGNMENTS_ENDPOINT: &str = "/assignments";

/// Settings of [`PrecomputedFetcher`].
pub struct PrecomputedFetcherConfig {
    /// Base URL of the precomputed assignments service.
    pub base_url: String,
    /// SDK key sent with every request.
    pub api_key: String,
    /// SDK name. Usually, language name.
    pub sdk_name: String,
    /// Version of SDK.
    pub sdk_version: String,
    /// Subject the assignments are computed for.
    pub subject_key: String,
    /// Attributes of the subject.
    pub subject_attributes: ContextAttributes,
    /// Flag key -> action key -> action attributes.
    pub bandit_actions: Option<HashMap<String, HashMap<String, ContextAttributes>>>,
}

/// Fetches precomputed assignments for a single subject.
pub struct PrecomputedFetcher {
    http: Arc<dyn HttpClient>,
    parser: Arc<dyn ConfigurationParser>,
    config: PrecomputedFetcherConfig,
    etag: Option<String>,
    /// Set after a 401 response. The API key won't become valid later, so no more requests are
    /// made.
    unauthorized: bool,
}

impl PrecomputedFetcher {
    /// Create a fetcher. No request is made until [`PrecomputedFetcher::fetch_configuration`].
    pub fn new(
        config: PrecomputedFetcherConfig,
        http: Arc<dyn HttpClient>,
        parser: Arc<dyn ConfigurationParser>,
    ) -> PrecomputedFetcher {
        PrecomputedFetcher {
            http,
            parser,
            config,
            etag: None,
            unauthorized: false,
        }
    }

    /// Request assignments for the configured subject.
    pub fn fetch_configuration(&mut self) -> Result<FetchOutcome<PrecomputedConfiguration>> {
        if self.unauthorized {
            return Err(Error::Unauthorized);
        }

        let body = serde_json::to_vec(&PrecomputedRequest {
            subject_key: &self.config.subject_key,
            subject_attributes: &self.config.subject_attributes,
            bandit_actions: self.config.bandit_actions.as_ref(),
        })
        .map_err(ParseError::from)?;

        let request = HttpRequest {
            base_url: self.config.base_url.clone(),
            resource_path: ASSIGNMENTS_ENDPOINT.to_owned(),
            query_params: vec![
                ("apiKey".to_owned(), self.config.api_key.clone()),
                ("sdkVersion".to_owned(), self.config.sdk_version.clone()),
                ("sdkName".to_owned(), self.config.sdk_name.clone()),
            ],
            method: HttpMethod::Post,
            body: Some(body),
            last_version_id: self.etag.clone(),
        };

        log::debug!(target: "eppo", subject_key:display = self.config.subject_key; "fetching precomputed assignments");
        let response = self.http.execute(&request)?;
        let (body, etag) = match interpret(response) {
            Ok(ResponseOutcome::NotModified) => return Ok(FetchOutcome::NotModified),
            Ok(ResponseOutcome::Modified { body, etag }) => (body, etag),
            Err(Error::Unauthorized) => {
                log::warn!(target: "eppo", "client is not authorized. Check your API key");
                self.unauthorized = true;
                return Err(Error::Unauthorized);
            }
            Err(err) => {
                log::warn!(target: "eppo", "failed to fetch precomputed assignments: {err}");
                return Err(err);
            }
        };

        let configuration = self.parser.parse_precomputed_config(&body)?;
        self.etag = etag;
        log::debug!(target: "eppo",
                    flags:display = configuration.flags.len(),
                    bandits:display = configuration.bandits.len();
                    "successfully fetched precomputed assignments");

        Ok(FetchOutcome::Updated {
            configuration,
            body,
        })
    }
}

impl Fetcher for PrecomputedFetcher {
    type Configuration = PrecomputedConfiguration;

    fn fetch(&mut self) -> Result<FetchOutcome<PrecomputedConfiguration>> {
        self.fetch_configuration()
    }

    fn parse_cached(
        parser: &dyn ConfigurationParser,
        bytes: &[u8],
    ) -> std::result::Result<PrecomputedConfiguration, ParseError> {
        let configuration = parser.parse_precomputed_config(bytes)?;
        if configuration.flags.is_empty() {
            return Err(ParseError::MissingFlags);
        }
        Ok(configuration)
    }
}
