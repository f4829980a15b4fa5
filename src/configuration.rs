use std::{borrow::Cow, collections::HashMap};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{
    attributes::Attributes,
    error::FlagEvaluationError,
    obfuscation::md5_hex,
    sharder::Sharder,
    ufc::{
        ConfigurationFormat, EvaluationResult, Flag, Timestamp, TryParse, UniversalFlagConfig,
        VariationType,
    },
};

/// Immutable snapshot of everything the standard client evaluates against.
///
/// A snapshot is never modified after construction. New data always produces a new snapshot
/// that replaces the previous one in [`ConfigurationStore`](crate::ConfigurationStore).
#[derive(Debug, Default, Clone)]
pub struct Configuration {
    /// Time the snapshot was loaded. `None` only for the empty configuration.
    pub fetched_at: Option<Timestamp>,
    /// Flag configuration.
    pub flags: UniversalFlagConfig,
    /// Bandit model parameters, present when flags reference bandits.
    pub bandits: Option<BanditResponse>,
}

impl Configuration {
    /// Configuration used before anything has been loaded. Every flag lookup against it reports
    /// [`FlagEvaluationError::ConfigurationMissing`].
    pub fn empty() -> Configuration {
        Configuration::default()
    }

    /// Snapshot fetched now from the given server payloads.
    pub fn from_server_response(
        flags: UniversalFlagConfig,
        bandits: Option<BanditResponse>,
    ) -> Configuration {
        Configuration {
            fetched_at: Some(Utc::now()),
            flags,
            bandits,
        }
    }

    /// Returns `true` for the configuration used before anything has been loaded.
    pub fn is_empty(&self) -> bool {
        self.fetched_at.is_none()
    }

    /// Whether flag keys, rules and values are obfuscated (`CLIENT` format).
    pub fn is_obfuscated(&self) -> bool {
        self.flags.format == ConfigurationFormat::Client
    }

    /// Creation time reported by the server.
    pub fn created_at(&self) -> Option<Timestamp> {
        self.flags.created_at
    }

    /// Keys of all flags in the configuration. Hashed for obfuscated configurations.
    pub fn flag_keys(&self) -> impl Iterator<Item = &str> {
        self.flags.flags.keys().map(String::as_str)
    }

    /// Look up a flag, hashing the key for obfuscated configurations.
    pub fn get_flag(&self, flag_key: &str) -> Result<&Flag, FlagEvaluationError> {
        if self.is_empty() {
            return Err(FlagEvaluationError::ConfigurationMissing);
        }

        let key = if self.is_obfuscated() {
            Cow::Owned(md5_hex(flag_key))
        } else {
            Cow::Borrowed(flag_key)
        };

        match self.flags.flags.get(key.as_ref()) {
            Some(TryParse::Parsed(flag)) => Ok(flag),
            Some(TryParse::ParseFailed(_)) => Err(FlagEvaluationError::ConfigurationParseError),
            None => Err(FlagEvaluationError::FlagNotFound),
        }
    }

    /// Variation type of `flag_key`, if the flag exists and parsed.
    pub fn get_flag_variation_type(&self, flag_key: &str) -> Option<VariationType> {
        self.get_flag(flag_key).ok().map(|flag| flag.variation_type)
    }

    /// Parameters of the bandit with `bandit_key`.
    pub fn get_bandit(&self, bandit_key: &str) -> Option<&BanditConfiguration> {
        self.bandits.as_ref()?.bandits.get(bandit_key)
    }

    /// Evaluate `flag_key` for the subject at time `now`.
    pub fn eval_flag(
        &self,
        flag_key: &str,
        subject_key: &str,
        subject_attributes: &Attributes,
        sharder: &impl Sharder,
        now: Timestamp,
    ) -> Result<EvaluationResult, FlagEvaluationError> {
        self.get_flag(flag_key)?.eval(
            flag_key,
            subject_key,
            subject_attributes,
            self.is_obfuscated(),
            sharder,
            now,
        )
    }
}

/// Bandit parameters served by the bandits endpoint.
///
/// Model data is kept opaque: scoring happens server-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BanditResponse {
    /// Bandit key -> bandit parameters.
    pub bandits: HashMap<String, BanditConfiguration>,
    /// Last time any bandit model was updated.
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
}

/// Parameters of a single bandit model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BanditConfiguration {
    /// Key the bandit is referenced by.
    pub bandit_key: String,
    /// Name of the model type.
    pub model_name: String,
    /// Version logged with bandit events.
    pub model_version: String,
    /// Model coefficients. Not interpreted by the client.
    #[serde(default)]
    pub model_data: serde_json::Value,
    /// Last time the model was updated.
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
}
