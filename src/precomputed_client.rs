use std::{sync::Arc, time::Duration};

use chrono::Utc;

use crate::{
    assignment_cache::{AssignmentCache, AssignmentCacheKey, AssignmentCacheValue},
    attributes::ContextAttributes,
    config::{http_client_or_default, SDK_NAME, SDK_VERSION},
    events::{AssignmentEvent, BanditEvent, EventMetaData},
    load::{ConfigurationSource, LoadHandle},
    parser::ConfigurationParser,
    precomputed::{
        PrecomputedAssignment, PrecomputedBanditAction, PrecomputedConfiguration,
        PrecomputedFetcher, PrecomputedFetcherConfig,
    },
    ufc::{AssignmentValue, VariationType},
    AssignmentLogger, BanditLogger, Error, PrecomputedClientConfig, Result,
};

/// Cache value standing in for a missing action, so that repeated "no action" selections are
/// deduplicated like any other.
const NO_ACTION_CACHE_KEY: &str = "__eppo_no_action";

/// Variation and bandit action selected for a subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BanditResult {
    /// Assigned variation, or the default when nothing is assigned.
    pub variation: String,
    /// `None` when the bandit selected no action.
    pub action: Option<String>,
}

/// A client serving assignments precomputed by the server for a single subject.
///
/// No rules are evaluated locally: every lookup is a hash map access into the latest
/// [`PrecomputedConfiguration`].
pub struct PrecomputedClient<'a> {
    source: ConfigurationSource<PrecomputedFetcher>,
    parser: Arc<dyn ConfigurationParser>,
    subject_key: String,
    subject_attributes: ContextAttributes,
    assignment_logger: Box<dyn AssignmentLogger + Send + Sync + 'a>,
    bandit_logger: Box<dyn BanditLogger + Send + Sync + 'a>,
    assignment_cache: Option<Arc<dyn AssignmentCache>>,
    bandit_cache: Option<Arc<dyn AssignmentCache>>,
    graceful_mode: bool,
}

impl<'a> PrecomputedClient<'a> {
    /// Same as [`PrecomputedClientConfig::to_client`].
    ///
    /// Fails with [`Error::MissingApiKey`] or [`Error::MissingSubjectKey`] regardless of
    /// graceful mode.
    pub fn new(config: PrecomputedClientConfig<'a>) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(Error::MissingApiKey);
        }
        if config.subject_key.is_empty() {
            return Err(Error::MissingSubjectKey);
        }

        let configuration_cache = config.resolve_configuration_cache();
        let load_options = config.resolve_load_options();
        let fetcher = PrecomputedFetcher::new(
            PrecomputedFetcherConfig {
                base_url: config.base_url,
                api_key: config.api_key,
                sdk_name: SDK_NAME.to_owned(),
                sdk_version: SDK_VERSION.to_owned(),
                subject_key: config.subject_key.clone(),
                subject_attributes: config.subject_attributes.clone(),
                bandit_actions: config.bandit_actions,
            },
            http_client_or_default(config.http_client)?,
            config.parser.clone(),
        );

        Ok(PrecomputedClient {
            source: ConfigurationSource::new(
                fetcher,
                config.parser.clone(),
                configuration_cache,
                load_options,
            ),
            parser: config.parser,
            subject_key: config.subject_key,
            subject_attributes: config.subject_attributes,
            assignment_logger: config.assignment_logger,
            bandit_logger: config.bandit_logger,
            assignment_cache: config.assignment_cache,
            bandit_cache: config.bandit_cache,
            graceful_mode: config.graceful_mode,
        })
    }

    /// Subject the assignments were computed for.
    pub fn subject_key(&self) -> &str {
        &self.subject_key
    }

    /// Load precomputed assignments: the cached assignments race a fetch from the server.
    /// Polling, if configured, starts once the load completes.
    pub fn load_configuration(&self) -> Result<LoadHandle> {
        self.source.load()
    }

    /// Fetch precomputed assignments once, blocking the current thread.
    pub fn fetch_configuration(&self) -> Result<()> {
        self.source.fetch()
    }

    /// Get currently-active precomputed configuration.
    pub fn get_configuration(&self) -> Arc<PrecomputedConfiguration> {
        self.source.store().get_configuration()
    }

    /// Whether the active configuration came from a network fetch.
    pub fn is_configuration_loaded_from_fetch(&self) -> bool {
        self.source.store().loaded_from_fetch()
    }

    /// Start polling for updated assignments. Does nothing if polling is already running.
    pub fn start_polling(&self, interval: Duration, jitter: Duration) -> Result<()> {
        self.source.poller().start(interval, jitter)
    }

    /// Stop polling, keeping the timer thread around for resuming.
    pub fn pause_polling(&self) {
        self.source.poller().pause()
    }

    /// Resume polling with the settings of the last start.
    pub fn resume_polling(&self) -> Result<()> {
        self.source.poller().resume()
    }

    /// Stop polling and shut down the timer thread.
    pub fn stop_polling(&self) {
        self.source.poller().stop()
    }

    /// Whether polling is currently active.
    pub fn is_polling(&self) -> bool {
        self.source.poller().is_running()
    }

    /// Get a string assignment, or `default` if nothing is assigned.
    pub fn get_string_assignment(
        &self,
        flag_key: &str,
        default: impl Into<String>,
    ) -> Result<String> {
        self.get_typed_assignment(
            flag_key,
            VariationType::String,
            default.into(),
            AssignmentValue::into_string,
        )
    }

    /// Get a boolean assignment, or `default` if nothing is assigned.
    pub fn get_boolean_assignment(&self, flag_key: &str, default: bool) -> Result<bool> {
        self.get_typed_assignment(flag_key, VariationType::Boolean, default, |value| {
            value.as_boolean()
        })
    }

    /// Get an integer assignment, or `default` if nothing is assigned.
    pub fn get_integer_assignment(&self, flag_key: &str, default: i64) -> Result<i64> {
        self.get_typed_assignment(flag_key, VariationType::Integer, default, |value| {
            value.as_integer()
        })
    }

    /// Numeric flags accept integer variations.
    pub fn get_numeric_assignment(&self, flag_key: &str, default: f64) -> Result<f64> {
        self.get_typed_assignment(flag_key, VariationType::Numeric, default, |value| {
            value.as_numeric()
        })
    }

    /// Get a JSON assignment, or `default` if nothing is assigned.
    pub fn get_json_assignment(
        &self,
        flag_key: &str,
        default: serde_json::Value,
    ) -> Result<serde_json::Value> {
        self.get_typed_assignment(
            flag_key,
            VariationType::Json,
            default,
            AssignmentValue::into_json,
        )
    }

    /// Get the bandit action selected for the subject along with the flag's string variation.
    ///
    /// Returns `default` with no action if the flag has no bandit.
    pub fn get_bandit_action(
        &self,
        flag_key: &str,
        default: impl Into<String>,
    ) -> Result<BanditResult> {
        let default = default.into();
        let result = self.get_bandit_action_inner(flag_key, &default);
        self.recover(
            flag_key,
            result,
            BanditResult {
                variation: default,
                action: None,
            },
        )
    }

    fn get_typed_assignment<T>(
        &self,
        flag_key: &str,
        expected_type: VariationType,
        default: T,
        convert: impl FnOnce(AssignmentValue) -> Option<T>,
    ) -> Result<T> {
        let result = self
            .get_assignment_inner(flag_key, expected_type)
            .map(|value| value.and_then(convert));
        Ok(self.recover(flag_key, result, None)?.unwrap_or(default))
    }

    /// Apply graceful mode: log the error and fall back to `fallback`.
    fn recover<T>(&self, flag_key: &str, result: Result<T>, fallback: T) -> Result<T> {
        match result {
            Ok(value) => Ok(value),
            Err(err) if self.graceful_mode => {
                log::warn!(target: "eppo",
                           flag_key,
                           subject_key:display = self.subject_key;
                           "returning default assignment: {err}");
                Ok(fallback)
            }
            Err(err) => Err(err),
        }
    }

    fn get_assignment_inner(
        &self,
        flag_key: &str,
        expected_type: VariationType,
    ) -> Result<Option<AssignmentValue>> {
        if flag_key.is_empty() {
            log::warn!(target: "eppo", "flag_key must not be empty");
            return Ok(None);
        }

        let assignment = self.get_configuration().resolve_flag(
            flag_key,
            Some(expected_type),
            self.parser.as_ref(),
        )?;

        log::trace!(target: "eppo",
                    flag_key,
                    subject_key:display = self.subject_key,
                    assignment:serde = assignment.value;
                    "resolved a precomputed flag");

        if assignment.do_log {
            self.log_assignment(flag_key, &assignment);
        }
        Ok(assignment.value)
    }

    fn get_bandit_action_inner(&self, flag_key: &str, default: &str) -> Result<BanditResult> {
        if flag_key.is_empty() {
            log::warn!(target: "eppo", "flag_key must not be empty");
            return Ok(BanditResult {
                variation: default.to_owned(),
                action: None,
            });
        }

        let bandit = self.get_configuration().resolve_bandit(flag_key)?;
        let variation = self.get_string_assignment(flag_key, default)?;

        self.log_bandit_action(flag_key, &bandit);

        Ok(BanditResult {
            variation,
            action: bandit.action,
        })
    }

    fn log_assignment(&self, flag_key: &str, assignment: &PrecomputedAssignment) {
        let (Some(allocation_key), Some(variation_key)) =
            (&assignment.allocation_key, &assignment.variation_key)
        else {
            log::trace!(target: "eppo", flag_key; "precomputed flag has no allocation, not logging");
            return;
        };

        if let Some(cache) = &self.assignment_cache {
            let is_new = cache.put_if_absent(
                AssignmentCacheKey {
                    subject_key: self.subject_key.clone(),
                    flag_key: flag_key.to_owned(),
                },
                AssignmentCacheValue::Variation {
                    allocation_key: allocation_key.clone(),
                    variation_key: variation_key.clone(),
                },
            );
            if !is_new {
                return;
            }
        }

        let event = AssignmentEvent {
            feature_flag: flag_key.to_owned(),
            allocation: allocation_key.clone(),
            experiment: format!("{flag_key}-{allocation_key}"),
            variation: variation_key.clone(),
            subject: self.subject_key.clone(),
            subject_attributes: self.subject_attributes.to_generic_attributes(),
            timestamp: Utc::now(),
            meta_data: EventMetaData::new(true),
            extra_logging: assignment.extra_logging.clone(),
        };
        log::trace!(target: "eppo", event:serde; "logging assignment");
        self.assignment_logger.log_assignment(event);
    }

    fn log_bandit_action(&self, flag_key: &str, bandit: &PrecomputedBanditAction) {
        if let Some(cache) = &self.bandit_cache {
            let is_new = cache.put_if_absent(
                AssignmentCacheKey {
                    subject_key: self.subject_key.clone(),
                    flag_key: flag_key.to_owned(),
                },
                AssignmentCacheValue::Bandit {
                    bandit_key: bandit.bandit_key.clone(),
                    action_key: bandit
                        .action
                        .clone()
                        .unwrap_or_else(|| NO_ACTION_CACHE_KEY.to_owned()),
                },
            );
            if !is_new {
                return;
            }
        }

        let event = BanditEvent {
            flag_key: flag_key.to_owned(),
            bandit_key: bandit.bandit_key.clone(),
            subject: self.subject_key.clone(),
            action: bandit.action.clone(),
            action_probability: bandit.action_probability,
            optimality_gap: bandit.optimality_gap,
            model_version: bandit.model_version.clone(),
            timestamp: Utc::now(),
            subject_numeric_attributes: self.subject_attributes.numeric.clone(),
            subject_categorical_attributes: self.subject_attributes.categorical.clone(),
            action_numeric_attributes: bandit.action_numeric_attributes.clone(),
            action_categorical_attributes: bandit.action_categorical_attributes.clone(),
            meta_data: EventMetaData::new(true),
        };
        log::trace!(target: "eppo", event:serde; "logging bandit action");
        self.bandit_logger.log_bandit_action(event);
    }
}
