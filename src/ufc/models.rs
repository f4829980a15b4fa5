use std::collections::HashMap;

use chrono::{DateTime, Utc};
use derive_more::From;
use serde::{Deserialize, Serialize};

use crate::sharder::ShardRange;

use super::AssignmentValue;

/// Timestamps are always UTC.
pub type Timestamp = DateTime<Utc>;

/// Universal Flag Configuration: the body served by the flag configuration endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UniversalFlagConfig {
    /// Creation time of the configuration.
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    /// `CLIENT` configurations are obfuscated, `SERVER` configurations are plain text.
    #[serde(default)]
    pub format: ConfigurationFormat,
    /// Environment the configuration belongs to.
    #[serde(default)]
    pub environment: Option<Environment>,
    /// Flags configuration.
    ///
    /// Value is wrapped in `TryParse` so that if we fail to parse one flag (e.g., new server
    /// format), we can still serve other flags.
    pub flags: HashMap<String, TryParse<Flag>>,
    /// Bandit key -> flag variations that reference the bandit.
    #[serde(default)]
    pub bandit_references: HashMap<String, BanditReference>,
}

/// Format of a configuration payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfigurationFormat {
    /// Plain text, served to server SDKs.
    #[default]
    Server,
    /// Obfuscated, served to client SDKs.
    Client,
    /// Precomputed assignments for a single subject.
    Precomputed,
}

/// Environment the configuration was produced for. Accepts both `"Test"` and `{"name": "Test"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "EnvironmentWire")]
pub struct Environment {
    /// Environment name, e.g. `Production`.
    pub name: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EnvironmentWire {
    Name(String),
    Object { name: String },
}

impl From<EnvironmentWire> for Environment {
    fn from(value: EnvironmentWire) -> Self {
        match value {
            EnvironmentWire::Name(name) | EnvironmentWire::Object { name } => Environment { name },
        }
    }
}

/// `TryParse` allows the subfield to fail parsing without failing the parsing of the whole
/// structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TryParse<T> {
    /// Successfully parsed value.
    Parsed(T),
    /// Raw value that failed to parse.
    ParseFailed(serde_json::Value),
}
impl<T> From<TryParse<T>> for Option<T> {
    fn from(value: TryParse<T>) -> Self {
        match value {
            TryParse::Parsed(v) => Some(v),
            TryParse::ParseFailed(_) => None,
        }
    }
}
impl<'a, T> From<&'a TryParse<T>> for Option<&'a T> {
    fn from(value: &TryParse<T>) -> Option<&T> {
        match value {
            TryParse::Parsed(v) => Some(v),
            TryParse::ParseFailed(_) => None,
        }
    }
}

/// A single feature flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flag {
    /// Flag key. MD5-hashed in obfuscated configurations.
    pub key: String,
    /// Disabled flags never assign.
    pub enabled: bool,
    /// Type of all variation values.
    pub variation_type: VariationType,
    /// Variation key -> variation.
    pub variations: HashMap<String, Variation>,
    /// Ordered by priority.
    pub allocations: Vec<Allocation>,
    /// Number of shards subjects are split into.
    #[serde(default = "default_total_shards")]
    pub total_shards: u64,
}

fn default_total_shards() -> u64 {
    10_000
}

/// Type of the variation values of a flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VariationType {
    /// String variations.
    String,
    /// Integer variations.
    Integer,
    /// Floating-point number.
    Numeric,
    /// Boolean variations.
    Boolean,
    /// JSON object or array, encoded as a string.
    Json,
}

/// Raw value found in variations and condition values.
///
/// `Value` is untagged, so we don't know the exact type of a variation until we combine it with
/// [`VariationType`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, From)]
#[serde(untagged)]
pub enum Value {
    /// Missing value.
    Null,
    /// Boolean value.
    Boolean(bool),
    /// Number maps to either [`AssignmentValue::Integer`] or [`AssignmentValue::Numeric`].
    Number(f64),
    /// String maps to either [`AssignmentValue::String`] or [`AssignmentValue::Json`]. In
    /// obfuscated configurations every variation value is a base64 string.
    String(String),
    /// Operand of `ONE_OF` and `NOT_ONE_OF`.
    StringList(Vec<String>),
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl Value {
    pub(crate) fn to_assignment_value(&self, ty: VariationType) -> Option<AssignmentValue> {
        Some(match ty {
            VariationType::String => AssignmentValue::String(self.as_str()?.to_owned()),
            VariationType::Integer => AssignmentValue::Integer(self.as_integer()?),
            VariationType::Numeric => AssignmentValue::Numeric(self.as_number()?),
            VariationType::Boolean => AssignmentValue::Boolean(self.as_boolean()?),
            VariationType::Json => {
                AssignmentValue::Json(serde_json::from_str(self.as_str()?).ok()?)
            }
        })
    }

    /// Coerce a deobfuscated variation value according to the flag's type.
    pub(crate) fn from_decoded(decoded: String, ty: VariationType) -> Option<Value> {
        Some(match ty {
            VariationType::Boolean => Value::Boolean(decoded == "true"),
            VariationType::Integer | VariationType::Numeric => {
                Value::Number(decoded.trim().parse().ok()?)
            }
            VariationType::String | VariationType::Json => Value::String(decoded),
        })
    }

    pub(crate) fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    fn as_boolean(&self) -> Option<bool> {
        match self {
            Self::Boolean(value) => Some(*value),
            _ => None,
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            _ => None,
        }
    }

    fn as_integer(&self) -> Option<i64> {
        let f = self.as_number()?;
        let i = f as i64;
        if i as f64 == f {
            Some(i)
        } else {
            None
        }
    }
}

/// A value a flag can assign.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Variation {
    /// Variation key.
    pub key: String,
    /// Raw value, interpreted according to the flag's [`VariationType`].
    pub value: Value,
}

/// Targeting and traffic split of a flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    /// Allocation key.
    pub key: String,
    /// All rules are ORed. An empty list matches every subject.
    #[serde(default)]
    pub rules: Vec<Rule>,
    /// Allocation is inactive before this time.
    #[serde(default)]
    pub start_at: Option<TimeBound>,
    /// Allocation is inactive from this time.
    #[serde(default)]
    pub end_at: Option<TimeBound>,
    /// Ordered by priority.
    pub splits: Vec<Split>,
    /// Whether assignments from this allocation are logged.
    #[serde(default = "default_do_log")]
    pub do_log: bool,
}

fn default_do_log() -> bool {
    true
}

/// Allocation start or end time.
///
/// Obfuscated configurations carry base64-encoded timestamps, so a value that does not parse as
/// a timestamp is kept as-is and decoded during evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeBound {
    /// Parsed timestamp.
    Timestamp(Timestamp),
    /// Base64-encoded timestamp from an obfuscated configuration.
    Encoded(String),
}

/// A set of conditions that must all match.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// Conditions are ANDed.
    pub conditions: Vec<Condition>,
}

/// A single check of a subject attribute.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Attribute name. MD5-hashed in obfuscated configurations.
    pub attribute: String,
    /// Comparison to apply.
    pub operator: ConditionOperator,
    /// Operand. Hashed or encoded in obfuscated configurations.
    pub value: Value,
}

/// Comparison applied by a [`Condition`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionOperator {
    /// Attribute matches a regular expression.
    Matches,
    /// Attribute does not match a regular expression.
    NotMatches,
    /// Attribute is greater than or equal to the value. Numbers and semver.
    Gte,
    /// Attribute is greater than the value.
    Gt,
    /// Attribute is less than or equal to the value.
    Lte,
    /// Attribute is less than the value.
    Lt,
    /// Attribute is one of a list of strings.
    OneOf,
    /// Attribute is not one of a list of strings. Missing attributes never match.
    NotOneOf,
    /// Attribute presence check.
    IsNull,
    /// Operator introduced by a newer server version. Never matches.
    #[serde(other)]
    Unknown,
}

/// Traffic share assigned to a variation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Split {
    /// Empty shards list matches every subject.
    pub shards: Vec<Shard>,
    /// Variation assigned to subjects in the shards.
    pub variation_key: String,
    /// Extra fields attached to assignment events.
    #[serde(default)]
    pub extra_logging: HashMap<String, String>,
}

/// Subjects whose salted hash falls into any of `ranges`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shard {
    /// Salt prepended to the subject key before hashing.
    pub salt: String,
    /// Shard ranges matched by this shard.
    pub ranges: Vec<ShardRange>,
}

/// Bandit referenced by one or more flags.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BanditReference {
    /// Version of the referenced bandit model.
    pub model_version: String,
    /// Flag variations that select the bandit.
    pub flag_variations: Vec<BanditVariation>,
}

/// Flag variation that selects a bandit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BanditVariation {
    /// Bandit key.
    pub key: String,
    /// Flag the variation belongs to.
    pub flag_key: String,
    /// Variation key.
    pub variation_key: String,
    /// Variation value, equal to the bandit key.
    pub variation_value: String,
}
