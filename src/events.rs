//! Events emitted for analytics and the loggers that receive them.
use std::collections::HashMap;

use serde::Serialize;

use crate::{
    attributes::Attributes,
    ufc::{EvaluationResult, Timestamp},
};

/// Additional metadata attached to every event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetaData {
    /// Whether the configuration was obfuscated.
    pub obfuscated: bool,
    /// Always `"rust"`.
    pub sdk_language: &'static str,
    /// Version of this crate.
    pub sdk_lib_version: &'static str,
}

impl EventMetaData {
    pub(crate) fn new(obfuscated: bool) -> EventMetaData {
        EventMetaData {
            obfuscated,
            sdk_language: "rust",
            sdk_lib_version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// Represents an event capturing the assignment of a feature flag to a subject and its logging
/// details.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentEvent {
    /// The key of the feature flag being assigned.
    pub feature_flag: String,
    /// The key of the allocation that the subject was assigned to.
    pub allocation: String,
    /// `"{feature_flag}-{allocation}"`.
    pub experiment: String,
    /// The key of the variation assigned to the subject.
    pub variation: String,
    /// The key identifying the subject receiving the assignment.
    pub subject: String,
    /// Attributes used for evaluation.
    pub subject_attributes: Attributes,
    /// When the assignment was made.
    pub timestamp: Timestamp,
    /// Metadata about the SDK.
    pub meta_data: EventMetaData,
    /// Additional user-defined logging fields.
    #[serde(flatten)]
    pub extra_logging: HashMap<String, String>,
}

impl AssignmentEvent {
    /// Build the event for a matched evaluation. Returns `None` when nothing matched.
    pub(crate) fn from_result(
        result: &EvaluationResult,
        obfuscated: bool,
        timestamp: Timestamp,
    ) -> Option<AssignmentEvent> {
        let allocation = result.allocation_key.as_ref()?;
        let variation = result.variation.as_ref()?;
        Some(AssignmentEvent {
            feature_flag: result.flag_key.clone(),
            allocation: allocation.clone(),
            experiment: format!("{}-{}", result.flag_key, allocation),
            variation: variation.key.clone(),
            subject: result.subject_key.clone(),
            subject_attributes: result.subject_attributes.clone(),
            timestamp,
            meta_data: EventMetaData::new(obfuscated),
            extra_logging: result.extra_logging.clone(),
        })
    }
}

/// Bandit action selection that needs to be logged to analytics storage.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BanditEvent {
    /// Key of the bandit flag.
    pub flag_key: String,
    /// Key of the bandit that selected the action.
    pub bandit_key: String,
    /// Subject key.
    pub subject: String,
    /// `None` when the bandit selected no action.
    pub action: Option<String>,
    /// Probability of the action being selected.
    pub action_probability: f64,
    /// Score gap between the selected action and the best one.
    pub optimality_gap: f64,
    /// Version of the bandit model.
    pub model_version: String,
    /// When the action was selected.
    pub timestamp: Timestamp,
    /// Numeric attributes of the subject.
    pub subject_numeric_attributes: HashMap<String, f64>,
    /// Categorical attributes of the subject.
    pub subject_categorical_attributes: HashMap<String, String>,
    /// Numeric attributes of the action.
    pub action_numeric_attributes: HashMap<String, f64>,
    /// Categorical attributes of the action.
    pub action_categorical_attributes: HashMap<String, String>,
    /// Metadata about the SDK.
    pub meta_data: EventMetaData,
}

/// Receives assignment events. Implemented for any `Fn(AssignmentEvent)`.
pub trait AssignmentLogger {
    /// Called for every assignment that should be logged. Must not block.
    fn log_assignment(&self, event: AssignmentEvent);
}

pub(crate) struct NoopAssignmentLogger;
impl AssignmentLogger for NoopAssignmentLogger {
    fn log_assignment(&self, _event: AssignmentEvent) {}
}

impl<T: Fn(AssignmentEvent)> AssignmentLogger for T {
    fn log_assignment(&self, event: AssignmentEvent) {
        self(event);
    }
}

/// Receives bandit events. Implemented for any `Fn(BanditEvent)`.
pub trait BanditLogger {
    /// Called for every bandit action selection that should be logged. Must not block.
    fn log_bandit_action(&self, event: BanditEvent);
}

pub(crate) struct NoopBanditLogger;
impl BanditLogger for NoopBanditLogger {
    fn log_bandit_action(&self, _event: BanditEvent) {}
}

impl<T: Fn(BanditEvent)> BanditLogger for T {
    fn log_bandit_action(&self, event: BanditEvent) {
        self(event);
    }
}
