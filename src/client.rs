use std::{sync::Arc, time::Duration};

use chrono::Utc;

use crate::{
    assignment_cache::{AssignmentCache, AssignmentCacheKey, AssignmentCacheValue},
    attributes::Attributes,
    config::{http_client_or_default, SDK_NAME, SDK_VERSION},
    configuration::Configuration,
    configuration_fetcher::{ConfigurationFetcher, ConfigurationFetcherConfig},
    error::FlagEvaluationError,
    events::AssignmentEvent,
    load::{ConfigurationSource, LoadHandle},
    sharder::Md5Sharder,
    ufc::{AssignmentValue, EvaluationResult, VariationType},
    AssignmentLogger, ClientConfig, Error, Result,
};

/// A client for Eppo API.
///
/// In order to create a client instance, first create [`ClientConfig`].
///
/// # Examples
/// ```
/// # use eppo_client::{Client, ClientConfig};
/// let client: Client = ClientConfig::from_api_key("api-key").to_client().unwrap();
/// ```
pub struct Client<'a> {
    source: ConfigurationSource<ConfigurationFetcher>,
    assignment_logger: Box<dyn AssignmentLogger + Send + Sync + 'a>,
    assignment_cache: Option<Arc<dyn AssignmentCache>>,
    graceful_mode: bool,
}

impl<'a> Client<'a> {
    /// Create a new `Client` using the specified configuration. Same as
    /// [`ClientConfig::to_client`].
    ///
    /// Fails with [`Error::MissingApiKey`] if the API key is empty.
    pub fn new(config: ClientConfig<'a>) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(Error::MissingApiKey);
        }

        let configuration_cache = config.resolve_configuration_cache();
        let fetcher = ConfigurationFetcher::new(
            ConfigurationFetcherConfig {
                base_url: config.base_url,
                api_key: config.api_key,
                sdk_name: SDK_NAME.to_owned(),
                sdk_version: SDK_VERSION.to_owned(),
            },
            http_client_or_default(config.http_client)?,
            config.parser.clone(),
        );

        Ok(Client {
            source: ConfigurationSource::new(
                fetcher,
                config.parser,
                configuration_cache,
                config.load_options,
            ),
            assignment_logger: config.assignment_logger,
            assignment_cache: config.assignment_cache,
            graceful_mode: config.graceful_mode,
        })
    }

    /// Load the configuration: the cached configuration (if any) races a fetch from the server
    /// and the first one to succeed completes the returned handle. A fetch that completes later
    /// still replaces a cached configuration.
    ///
    /// Polling, if configured, starts once the load completes.
    pub fn load_configuration(&self) -> Result<LoadHandle> {
        self.source.load()
    }

    /// Fetch the configuration once, blocking the current thread.
    pub fn fetch_configuration(&self) -> Result<()> {
        self.source.fetch()
    }

    /// Get the currently active configuration snapshot.
    pub fn get_configuration(&self) -> Arc<Configuration> {
        self.source.store().get_configuration()
    }

    /// Returns `true` if the active configuration came from the server rather than the cache or
    /// the initial configuration.
    pub fn is_configuration_loaded_from_fetch(&self) -> bool {
        self.source.store().loaded_from_fetch()
    }

    /// Keys of all flags in the active configuration. Hashed for obfuscated configurations.
    pub fn get_flag_keys(&self) -> Vec<String> {
        self.get_configuration()
            .flag_keys()
            .map(str::to_owned)
            .collect()
    }

    /// Variation type of `flag_key`, or `None` if the flag is not in the active configuration.
    pub fn get_flag_variation_type(&self, flag_key: &str) -> Option<VariationType> {
        self.get_configuration().get_flag_variation_type(flag_key)
    }

    /// Start polling for configuration updates. Does nothing if polling is already running.
    pub fn start_polling(&self, interval: Duration, jitter: Duration) -> Result<()> {
        self.source.poller().start(interval, jitter)
    }

    /// Stop polling, keeping the timer thread around for [`Client::resume_polling`].
    pub fn pause_polling(&self) {
        self.source.poller().pause()
    }

    /// Resume polling with the settings of the last [`Client::start_polling`].
    pub fn resume_polling(&self) -> Result<()> {
        self.source.poller().resume()
    }

    /// Stop polling and shut down the timer thread.
    pub fn stop_polling(&self) {
        self.source.poller().stop()
    }

    /// Whether configuration polling is currently active.
    pub fn is_polling(&self) -> bool {
        self.source.poller().is_running()
    }

    /// Get variation assignment for the given subject.
    ///
    /// Returns `Ok(None)` if the flag is unknown, disabled, or no allocation matched, in which
    /// case the caller should use its default.
    pub fn get_assignment(
        &self,
        flag_key: &str,
        subject_key: &str,
        subject_attributes: &Attributes,
    ) -> Result<Option<AssignmentValue>> {
        let result = self.get_assignment_inner(flag_key, subject_key, subject_attributes, None);
        self.recover(flag_key, subject_key, result, None)
    }

    /// Get a string assignment, or `default` if nothing is assigned.
    pub fn get_string_assignment(
        &self,
        flag_key: &str,
        subject_key: &str,
        subject_attributes: &Attributes,
        default: impl Into<String>,
    ) -> Result<String> {
        self.get_typed_assignment(
            flag_key,
            subject_key,
            subject_attributes,
            VariationType::String,
            default.into(),
            AssignmentValue::into_string,
        )
    }

    /// Get a boolean assignment, or `default` if nothing is assigned.
    pub fn get_boolean_assignment(
        &self,
        flag_key: &str,
        subject_key: &str,
        subject_attributes: &Attributes,
        default: bool,
    ) -> Result<bool> {
        self.get_typed_assignment(
            flag_key,
            subject_key,
            subject_attributes,
            VariationType::Boolean,
            default,
            |value| value.as_boolean(),
        )
    }

    /// Get an integer assignment, or `default` if nothing is assigned.
    pub fn get_integer_assignment(
        &self,
        flag_key: &str,
        subject_key: &str,
        subject_attributes: &Attributes,
        default: i64,
    ) -> Result<i64> {
        self.get_typed_assignment(
            flag_key,
            subject_key,
            subject_attributes,
            VariationType::Integer,
            default,
            |value| value.as_integer(),
        )
    }

    /// Numeric flags accept integer variations.
    pub fn get_numeric_assignment(
        &self,
        flag_key: &str,
        subject_key: &str,
        subject_attributes: &Attributes,
        default: f64,
    ) -> Result<f64> {
        self.get_typed_assignment(
            flag_key,
            subject_key,
            subject_attributes,
            VariationType::Numeric,
            default,
            |value| value.as_numeric(),
        )
    }

    /// Get a JSON assignment, or `default` if nothing is assigned.
    pub fn get_json_assignment(
        &self,
        flag_key: &str,
        subject_key: &str,
        subject_attributes: &Attributes,
        default: serde_json::Value,
    ) -> Result<serde_json::Value> {
        self.get_typed_assignment(
            flag_key,
            subject_key,
            subject_attributes,
            VariationType::Json,
            default,
            AssignmentValue::into_json,
        )
    }

    fn get_typed_assignment<T>(
        &self,
        flag_key: &str,
        subject_key: &str,
        subject_attributes: &Attributes,
        expected_type: VariationType,
        default: T,
        convert: impl FnOnce(AssignmentValue) -> Option<T>,
    ) -> Result<T> {
        let result = self
            .get_assignment_inner(flag_key, subject_key, subject_attributes, Some(expected_type))
            .map(|value| value.and_then(convert));
        Ok(self
            .recover(flag_key, subject_key, result, None)?
            .unwrap_or(default))
    }

    /// Apply graceful mode: log the error and fall back to `fallback`.
    fn recover<T>(
        &self,
        flag_key: &str,
        subject_key: &str,
        result: Result<T>,
        fallback: T,
    ) -> Result<T> {
        match result {
            Ok(value) => Ok(value),
            Err(err) if self.graceful_mode => {
                log::warn!(target: "eppo", flag_key, subject_key; "returning default assignment: {err}");
                Ok(fallback)
            }
            Err(err) => Err(err),
        }
    }

    fn get_assignment_inner(
        &self,
        flag_key: &str,
        subject_key: &str,
        subject_attributes: &Attributes,
        expected_type: Option<VariationType>,
    ) -> Result<Option<AssignmentValue>> {
        if subject_key.is_empty() {
            return Err(Error::MissingSubjectKey);
        }

        let configuration = self.get_configuration();
        let flag = match configuration.get_flag(flag_key) {
            Ok(flag) => flag,
            Err(FlagEvaluationError::ConfigurationMissing) => {
                log::warn!(target: "eppo", flag_key, subject_key; "evaluating a flag before Eppo configuration has been loaded");
                return Ok(None);
            }
            Err(err) if err.is_normal() => {
                log::trace!(target: "eppo", flag_key, subject_key; "{err}");
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };

        let result_type = match expected_type {
            None => flag.variation_type,
            Some(expected) if expected == flag.variation_type => expected,
            Some(VariationType::Numeric) if flag.variation_type == VariationType::Integer => {
                VariationType::Numeric
            }
            Some(expected) => {
                return Err(FlagEvaluationError::InvalidType {
                    expected,
                    found: flag.variation_type,
                }
                .into())
            }
        };

        let evaluation = flag
            .eval(
                flag_key,
                subject_key,
                subject_attributes,
                configuration.is_obfuscated(),
                &Md5Sharder,
                Utc::now(),
            )
            .inspect_err(|err| {
                log::warn!(target: "eppo",
                    flag_key,
                    subject_key,
                    subject_attributes:serde;
                    "error occurred while evaluating a flag: {err}",
                );
            })?;

        let Some(variation) = &evaluation.variation else {
            return Ok(None);
        };

        let value = variation
            .value
            .to_assignment_value(result_type)
            .ok_or_else(|| {
                log::warn!(target: "eppo",
                           flag_key,
                           subject_key,
                           variation_key:display = variation.key;
                           "variation value does not match flag type");
                FlagEvaluationError::ConfigurationError
            })?;

        log::trace!(target: "eppo",
                    flag_key,
                    subject_key,
                    subject_attributes:serde,
                    assignment:serde = value;
                    "evaluated a flag");

        self.log_assignment(&evaluation, configuration.is_obfuscated());

        Ok(Some(value))
    }

    fn log_assignment(&self, evaluation: &EvaluationResult, obfuscated: bool) {
        if !evaluation.do_log {
            return;
        }
        let Some(event) = AssignmentEvent::from_result(evaluation, obfuscated, Utc::now()) else {
            return;
        };

        if let Some(cache) = &self.assignment_cache {
            let is_new = cache.put_if_absent(
                AssignmentCacheKey {
                    subject_key: event.subject.clone(),
                    flag_key: event.feature_flag.clone(),
                },
                AssignmentCacheValue::Variation {
                    allocation_key: event.allocation.clone(),
                    variation_key: event.variation.clone(),
                },
            );
            if !is_new {
                log::trace!(target: "eppo",
                            flag_key:display = event.feature_flag,
                            subject_key:display = event.subject;
                            "assignment already logged");
                return;
            }
        }

        log::trace!(target: "eppo",
                    event:serde;
                    "logging assignment");
        self.assignment_logger.log_assignment(event);
    }
}
