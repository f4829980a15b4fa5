use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{
    attributes::ContextAttributes,
    ufc::{ConfigurationFormat, Environment, Timestamp, TryParse, VariationType},
};

/// Assignments resolved by the server for a single subject.
///
/// Flags and bandits are keyed by the salted MD5 of the flag key. Every string inside them is
/// base64-encoded.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrecomputedConfiguration {
    /// Always [`ConfigurationFormat::Precomputed`].
    #[serde(default)]
    pub format: ConfigurationFormat,
    /// Whether flags are obfuscated.
    #[serde(default)]
    pub obfuscated: bool,
    /// Creation time of the configuration.
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    /// Environment the configuration belongs to.
    #[serde(default)]
    pub environment: Option<Environment>,
    /// Salt for hashing flag keys. `None` only for the empty configuration.
    #[serde(default)]
    pub salt: Option<String>,
    /// Salted flag key hash -> flag.
    pub flags: HashMap<String, TryParse<PrecomputedFlag>>,
    /// Salted flag key hash -> bandit.
    #[serde(default)]
    pub bandits: HashMap<String, TryParse<PrecomputedBandit>>,
}

/// Precomputed assignment of a single flag. Strings are base64-encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrecomputedFlag {
    /// Base64-encoded allocation key.
    #[serde(default)]
    pub allocation_key: Option<String>,
    /// Base64-encoded variation key.
    #[serde(default)]
    pub variation_key: Option<String>,
    /// Type of the assigned variation.
    pub variation_type: VariationType,
    /// Base64-encoded variation value.
    pub variation_value: String,
    /// Base64-encoded extra logging fields.
    #[serde(default)]
    pub extra_logging: Option<HashMap<String, String>>,
    /// Whether assignment events should be logged.
    pub do_log: bool,
}

/// Precomputed bandit action of a single flag. Strings are base64-encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrecomputedBandit {
    /// Base64-encoded bandit key.
    pub bandit_key: String,
    /// `None` when the bandit selected no action.
    #[serde(default)]
    pub action: Option<String>,
    /// Base64-encoded model version.
    pub model_version: String,
    /// Probability of the action being selected.
    pub action_probability: f64,
    /// Score gap between the selected action and the best one.
    pub optimality_gap: f64,
    /// Values are base64-encoded numbers.
    #[serde(default)]
    pub action_numeric_attributes: HashMap<String, String>,
    /// Base64-encoded categorical attributes of the action.
    #[serde(default)]
    pub action_categorical_attributes: HashMap<String, String>,
}

/// Body of the precomputed assignments request.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct PrecomputedRequest<'a> {
    pub subject_key: &'a str,
    pub subject_attributes: &'a ContextAttributes,
    /// Flag key -> action key -> action attributes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bandit_actions: Option<&'a HashMap<String, HashMap<String, ContextAttributes>>>,
}
