//! Decoding of server payloads into the configuration model.
use std::sync::Arc;

use crate::{
    configuration::BanditResponse,
    obfuscation::{decode_base64, DecodeError},
    precomputed::PrecomputedConfiguration,
    ufc::UniversalFlagConfig,
};

/// Error returned when a payload cannot be decoded.
#[derive(thiserror::Error, Debug, Clone)]
pub enum ParseError {
    // serde_json::Error is not clonable, so we're wrapping it in an Arc.
    /// Payload is not valid JSON for the expected type.
    #[error(transparent)]
    Json(Arc<serde_json::Error>),

    /// Obfuscated value could not be decoded.
    #[error(transparent)]
    Base64(#[from] DecodeError),

    /// Payload parsed but carries no flags.
    #[error("configuration has no flags")]
    MissingFlags,
}

impl From<serde_json::Error> for ParseError {
    fn from(value: serde_json::Error) -> Self {
        ParseError::Json(Arc::new(value))
    }
}

/// Turns raw bytes (fetch bodies, cache files, encoded JSON variations) into typed values.
///
/// The default implementation is [`JsonConfigurationParser`]. Custom implementations can be
/// installed through the client builders.
pub trait ConfigurationParser: Send + Sync {
    /// Parse a flag configuration body.
    fn parse_flag_config(&self, bytes: &[u8]) -> Result<UniversalFlagConfig, ParseError>;

    /// Parse a bandit parameters body.
    fn parse_bandit_params(&self, bytes: &[u8]) -> Result<BanditResponse, ParseError>;

    /// Parse a precomputed assignments body.
    fn parse_precomputed_config(
        &self,
        bytes: &[u8],
    ) -> Result<PrecomputedConfiguration, ParseError>;

    /// Decode a base64-encoded JSON document.
    fn parse_json_value(&self, encoded: &str) -> Result<serde_json::Value, ParseError>;
}

/// [`ConfigurationParser`] backed by `serde_json`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonConfigurationParser;

impl ConfigurationParser for JsonConfigurationParser {
    fn parse_flag_config(&self, bytes: &[u8]) -> Result<UniversalFlagConfig, ParseError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn parse_bandit_params(&self, bytes: &[u8]) -> Result<BanditResponse, ParseError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn parse_precomputed_config(
        &self,
        bytes: &[u8],
    ) -> Result<PrecomputedConfiguration, ParseError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn parse_json_value(&self, encoded: &str) -> Result<serde_json::Value, ParseError> {
        let decoded = decode_base64(encoded)?;
        Ok(serde_json::from_str(&decoded)?)
    }
}

#[cfg(test)]
mod tests {
    use crate::obfuscation::encode_base64;

    use super::{ConfigurationParser, JsonConfigurationParser, ParseError};

    #[test]
    fn missing_flags_field_is_an_error() {
        let result = JsonConfigurationParser.parse_flag_config(br#"{"format": "SERVER"}"#);
        assert!(matches!(result, Err(ParseError::Json(_))));
    }

    #[test]
    fn parse_bandit_params() {
        let bandits = JsonConfigurationParser
            .parse_bandit_params(
                br#"{
                  "updatedAt": "2024-04-17T19:40:53.716Z",
                  "bandits": {
                    "banner": {
                      "banditKey": "banner",
                      "modelName": "falcon",
                      "modelVersion": "v123",
                      "modelData": {"gamma": 1.0}
                    }
                  }
                }"#,
            )
            .unwrap();
        assert_eq!(bandits.bandits["banner"].model_version, "v123");
        assert_eq!(bandits.bandits["banner"].model_data["gamma"], 1.0);
    }

    #[test]
    fn parse_json_value() {
        let encoded = encode_base64(r#"{"a": [1, 2]}"#);
        assert_eq!(
            JsonConfigurationParser.parse_json_value(&encoded).unwrap(),
            serde_json::json!({"a": [1, 2]})
        );
        assert!(matches!(
            JsonConfigurationParser.parse_json_value("not base64!"),
            Err(ParseError::Base64(_))
        ));
        assert!(matches!(
            JsonConfigurationParser.parse_json_value(&encode_base64("{oops")),
            Err(ParseError::Json(_))
        ));
    }
}
