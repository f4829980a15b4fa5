//! The Rust SDK for Eppo, a next-generation feature flagging and experimentation platform.
//!
//! # Overview
//!
//! The SDK revolves around a [`Client`] that evaluates feature flag values for `subjects`, where
//! each subject has a unique key and key-value attributes associated with it. Feature flag
//! evaluation results in an [`AssignmentValue`] being returned, representing a specific feature
//! flag value assigned to the subject. Evaluation happens locally against the latest
//! [`Configuration`] snapshot: no request is made per evaluation.
//!
//! A [`PrecomputedClient`] serves a single subject whose assignments were already resolved by the
//! server. It also selects bandit actions.
//!
//! An [`AssignmentLogger`] should be provided to save assignment events to your storage,
//! facilitating tracking of which user received which feature flag values. Identical assignments
//! are only logged once, see [`AssignmentCache`].
//!
//! Configuration is loaded with [`Client::load_configuration`]: the configuration cached on disk
//! races a fetch from the server, the first one to succeed completes the returned
//! [`LoadHandle`]. The client can then keep polling for updates.
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum.
//!
//! Clients run in graceful mode by default: evaluation errors are logged and the caller's default
//! value is returned. Disable graceful mode while developing to surface them. Missing API and
//! subject keys are always reported when building a client.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging
//! messages under the `eppo` target. Consider integrating a `log`-compatible logger
//! implementation for better visibility into SDK operations.

#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

mod assignment_cache;
mod attributes;
mod cache_file;
mod client;
mod config;
mod configuration;
mod configuration_fetcher;
mod configuration_store;
mod error;
mod events;
mod http;
mod load;
mod obfuscation;
mod parser;
mod poller;
mod precomputed;
mod precomputed_client;
mod sharder;
pub mod ufc;

pub use assignment_cache::{
    AssignmentCache, AssignmentCacheKey, AssignmentCacheValue, LruAssignmentCache,
    DEFAULT_ASSIGNMENT_CACHE_SIZE,
};
pub use attributes::{AttributeValue, Attributes, ContextAttributes};
pub use cache_file::{CacheFile, ConfigurationCache};
pub use client::Client;
pub use config::{ClientConfig, PrecomputedClientConfig};
pub use configuration::{BanditConfiguration, BanditResponse, Configuration};
pub use configuration_fetcher::{ConfigurationFetcher, ConfigurationFetcherConfig, FetchOutcome};
pub use configuration_store::ConfigurationStore;
pub use error::{Error, FlagEvaluationError, Result};
pub use events::{
    AssignmentEvent, AssignmentLogger, BanditEvent, BanditLogger, EventMetaData,
};
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, ReqwestHttpClient};
pub use load::LoadHandle;
pub use obfuscation::DecodeError;
pub use parser::{ConfigurationParser, JsonConfigurationParser, ParseError};
pub use precomputed::{
    PrecomputedAssignment, PrecomputedBandit, PrecomputedBanditAction, PrecomputedConfiguration,
    PrecomputedFetcher, PrecomputedFetcherConfig, PrecomputedFlag,
};
pub use precomputed_client::{BanditResult, PrecomputedClient};
pub use sharder::{Md5Sharder, ShardRange, Sharder};
pub use ufc::{AssignmentValue, EvaluationResult, VariationType};
