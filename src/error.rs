use std::sync::Arc;

use thiserror::Error;

use crate::{parser::ParseError, ufc::VariationType};

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the client, its builders and the background machinery.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// `api_key` was empty when building a client.
    #[error("api_key is required")]
    MissingApiKey,

    /// `subject_key` was empty when building a precomputed client or evaluating a flag.
    #[error("subject_key is required")]
    MissingSubjectKey,

    /// Flag evaluation failed. Only returned when graceful mode is disabled.
    #[error(transparent)]
    FlagEvaluation(#[from] FlagEvaluationError),

    /// Payload could not be parsed.
    #[error("error parsing configuration: {0}")]
    ConfigurationParseError(#[from] ParseError),

    /// `base_url` does not form a valid URL.
    #[error("invalid base_url configuration")]
    InvalidBaseUrl(#[source] url::ParseError),

    /// The server rejected the API key.
    #[error("unauthorized, api_key is likely invalid")]
    Unauthorized,

    /// The server responded with a status code that is neither success nor 304/401.
    #[error("unexpected response status: {0}")]
    UnexpectedStatus(u16),

    // reqwest::Error is not clonable, so we're wrapping it in an Arc.
    /// Network or transport failure.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),

    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    /// Configuration cache could not be accessed.
    #[error(transparent)]
    Io(Arc<std::io::Error>),

    /// A background worker panicked before reporting its result.
    #[error("background thread panicked")]
    ThreadPanicked,
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Self::Network(Arc::new(value))
    }
}

/// Enum representing possible errors that can occur during flag evaluation.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
#[non_exhaustive]
pub enum FlagEvaluationError {
    /// Configuration has not been loaded yet.
    #[error("configuration missing")]
    ConfigurationMissing,

    /// The requested flag was not found in the configuration.
    #[error("flag not found")]
    FlagNotFound,

    /// Requested flag has invalid type.
    #[error("invalid flag type (expected: {expected:?}, found: {found:?})")]
    InvalidType {
        /// Expected type of the flag.
        expected: VariationType,
        /// Actual type of the flag.
        found: VariationType,
    },

    /// The flag entry is present but could not be parsed (server sent unexpected data).
    #[error("error parsing configuration, try upgrading Eppo SDK")]
    ConfigurationParseError,

    /// Configuration is internally inconsistent, e.g. a split references an undeclared variation.
    #[error("configuration error, try upgrading Eppo SDK")]
    ConfigurationError,
}

impl FlagEvaluationError {
    /// Return `true` if the error is a normal running condition and the default value should be
    /// returned silently.
    pub(crate) fn is_normal(self) -> bool {
        match self {
            FlagEvaluationError::ConfigurationMissing | FlagEvaluationError::FlagNotFound => true,

            FlagEvaluationError::InvalidType { .. }
            | FlagEvaluationError::ConfigurationParseError
            | FlagEvaluationError::ConfigurationError => false,
        }
    }
}
