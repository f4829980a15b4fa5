use std::collections::HashMap;

use crate::{
    error::FlagEvaluationError,
    obfuscation::{decode_base64, salted_md5_hex},
    parser::ConfigurationParser,
    ufc::{AssignmentValue, TryParse, VariationType},
};

use super::{PrecomputedBandit, PrecomputedConfiguration, PrecomputedFlag};

/// Decoded precomputed flag.
#[derive(Debug, Clone, PartialEq)]
pub struct PrecomputedAssignment {
    /// `None` if the stored value could not be decoded. Callers fall back to their default.
    pub value: Option<AssignmentValue>,
    /// Decoded allocation key.
    pub allocation_key: Option<String>,
    /// Decoded variation key.
    pub variation_key: Option<String>,
    /// Decoded extra logging fields.
    pub extra_logging: HashMap<String, String>,
    /// Whether an assignment event should be logged.
    pub do_log: bool,
}

/// Decoded precomputed bandit.
#[derive(Debug, Clone, PartialEq)]
pub struct PrecomputedBanditAction {
    /// Decoded bandit key.
    pub bandit_key: String,
    /// `None` when the bandit selected no action.
    pub action: Option<String>,
    /// Decoded model version.
    pub model_version: String,
    /// Probability of the action being selected.
    pub action_probability: f64,
    /// Score gap between the selected action and the best one.
    pub optimality_gap: f64,
    /// Numeric attributes of the action.
    pub action_numeric_attributes: HashMap<String, f64>,
    /// Categorical attributes of the action.
    pub action_categorical_attributes: HashMap<String, String>,
}

impl PrecomputedConfiguration {
    /// Returns `true` for the configuration used before anything has been loaded.
    pub fn is_empty(&self) -> bool {
        self.salt.is_none()
    }

    fn lookup<'a, T>(
        &self,
        entries: &'a HashMap<String, TryParse<T>>,
        flag_key: &str,
    ) -> Result<&'a T, FlagEvaluationError> {
        let Some(salt) = &self.salt else {
            return Err(FlagEvaluationError::ConfigurationMissing);
        };
        match entries.get(&salted_md5_hex(salt, flag_key)) {
            Some(TryParse::Parsed(entry)) => Ok(entry),
            Some(TryParse::ParseFailed(_)) => Err(FlagEvaluationError::ConfigurationParseError),
            None => Err(FlagEvaluationError::FlagNotFound),
        }
    }

    /// Look up the raw precomputed flag for `flag_key`.
    pub fn get_flag(&self, flag_key: &str) -> Result<&PrecomputedFlag, FlagEvaluationError> {
        self.lookup(&self.flags, flag_key)
    }

    /// Look up the raw precomputed bandit for `flag_key`.
    pub fn get_bandit(&self, flag_key: &str) -> Result<&PrecomputedBandit, FlagEvaluationError> {
        self.lookup(&self.bandits, flag_key)
    }

    /// Resolve `flag_key`, checking its stored type against `expected_type` (any type if `None`).
    pub fn resolve_flag(
        &self,
        flag_key: &str,
        expected_type: Option<VariationType>,
        parser: &dyn ConfigurationParser,
    ) -> Result<PrecomputedAssignment, FlagEvaluationError> {
        let flag = self.get_flag(flag_key)?;

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
                })
            }
        };

        let value = decode_value(flag_key, &flag.variation_value, result_type, parser);

        let extra_logging = flag
            .extra_logging
            .iter()
            .flatten()
            .filter_map(|(key, value)| Some((decode_field(key)?, decode_field(value)?)))
            .collect();

        Ok(PrecomputedAssignment {
            value,
            allocation_key: flag.allocation_key.as_deref().and_then(decode_field),
            variation_key: flag.variation_key.as_deref().and_then(decode_field),
            extra_logging,
            do_log: flag.do_log,
        })
    }

    /// Decode the bandit action precomputed for `flag_key`.
    pub fn resolve_bandit(
        &self,
        flag_key: &str,
    ) -> Result<PrecomputedBanditAction, FlagEvaluationError> {
        let bandit = self.get_bandit(flag_key)?;

        let (Some(bandit_key), Some(model_version)) = (
            decode_field(&bandit.bandit_key),
            decode_field(&bandit.model_version),
        ) else {
            return Err(FlagEvaluationError::ConfigurationParseError);
        };

        let action_numeric_attributes = bandit
            .action_numeric_attributes
            .iter()
            .filter_map(|(key, value)| {
                let key = decode_field(key)?;
                match decode_field(value)?.trim().parse::<f64>() {
                    Ok(value) => Some((key, value)),
                    Err(_) => {
                        log::warn!(target: "eppo", flag_key, attribute:display = key; "failed to parse numeric action attribute");
                        None
                    }
                }
            })
            .collect();

        let action_categorical_attributes = bandit
            .action_categorical_attributes
            .iter()
            .filter_map(|(key, value)| Some((decode_field(key)?, decode_field(value)?)))
            .collect();

        Ok(PrecomputedBanditAction {
            bandit_key,
            action: bandit.action.as_deref().and_then(decode_field),
            model_version,
            action_probability: bandit.action_probability,
            optimality_gap: bandit.optimality_gap,
            action_numeric_attributes,
            action_categorical_attributes,
        })
    }
}

fn decode_field(encoded: &str) -> Option<String> {
    decode_base64(encoded)
        .map_err(|err| {
            log::warn!(target: "eppo", "failed to decode precomputed field: {err}");
        })
        .ok()
}

fn decode_value(
    flag_key: &str,
    encoded: &str,
    ty: VariationType,
    parser: &dyn ConfigurationParser,
) -> Option<AssignmentValue> {
    if ty == VariationType::Json {
        return match parser.parse_json_value(encoded) {
            Ok(value) => Some(AssignmentValue::Json(value)),
            Err(err) => {
                log::warn!(target: "eppo", flag_key; "failed to parse JSON value: {err}");
                None
            }
        };
    }

    let decoded = decode_field(encoded)?;
    let value = match ty {
        VariationType::String => return Some(AssignmentValue::String(decoded)),
        VariationType::Boolean => Some(AssignmentValue::Boolean(
            decoded.eq_ignore_ascii_case("true"),
        )),
        VariationType::Integer => decoded.trim().parse::<i64>().ok().map(AssignmentValue::Integer),
        VariationType::Numeric => decoded.trim().parse::<f64>().ok().map(AssignmentValue::Numeric),
        VariationType::Json => None,
    };
    if value.is_none() {
        log::warn!(target: "eppo", flag_key, value:display = decoded; "failed to parse {ty:?} value");
    }
    value
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;

    use crate::{
        error::FlagEvaluationError,
        obfuscation::{encode_base64, salted_md5_hex},
        parser::JsonConfigurationParser,
        precomputed::PrecomputedConfiguration,
        ufc::{AssignmentValue, VariationType},
    };

    pub(crate) const SALT: &str = "test-salt";

    fn flag_json(variation_type: &str, value: &str) -> String {
        format!(
            r#"{{
              "allocationKey": "{}",
              "variationKey": "{}",
              "variationType": "{}",
              "variationValue": "{}",
              "extraLogging": {{"{}": "{}"}},
              "doLog": true
            }}"#,
            encode_base64("allocation-1"),
            encode_base64("variation-1"),
            variation_type,
            encode_base64(value),
            encode_base64("holdout"),
            encode_base64("h1"),
        )
    }

    /// Precomputed response as the server would produce it.
    pub(crate) fn response_json() -> String {
        let flags = [
            ("string_flag", flag_json("STRING", "red")),
            ("bool_flag", flag_json("BOOLEAN", "TRUE")),
            ("int_flag", flag_json("INTEGER", "42")),
            ("numeric_flag", flag_json("NUMERIC", "2.5")),
            ("json_flag", flag_json("JSON", r#"{"a": 1}"#)),
            ("bad_int_flag", flag_json("INTEGER", "forty-two")),
        ]
        .map(|(key, flag)| format!(r#""{}": {}"#, salted_md5_hex(SALT, key), flag))
        .join(",");

        let bandits = format!(
            r#""{}": {{
              "banditKey": "{}",
              "action": "{}",
              "modelVersion": "{}",
              "actionProbability": 0.25,
              "optimalityGap": 0.5,
              "actionNumericAttributes": {{"{}": "{}", "{}": "{}"}},
              "actionCategoricalAttributes": {{"{}": "{}"}}
            }},
            "{}": {{
              "banditKey": "{}",
              "modelVersion": "{}",
              "actionProbability": 1.0,
              "optimalityGap": 0.0
            }}"#,
            salted_md5_hex(SALT, "string_flag"),
            encode_base64("banner"),
            encode_base64("nike"),
            encode_base64("v12"),
            encode_base64("price"),
            encode_base64("99.5"),
            encode_base64("discount"),
            encode_base64("lots"),
            encode_base64("brand"),
            encode_base64("nike"),
            salted_md5_hex(SALT, "bool_flag"),
            encode_base64("banner"),
            encode_base64("v12"),
        );

        format!(
            r#"{{
              "format": "PRECOMPUTED",
              "obfuscated": true,
              "createdAt": "2024-11-18T14:23:39.456Z",
              "environment": {{"name": "Test"}},
              "salt": "{SALT}",
              "flags": {{{flags}}},
              "bandits": {{{bandits}}}
            }}"#
        )
    }

    fn configuration() -> PrecomputedConfiguration {
        serde_json::from_str(&response_json()).unwrap()
    }

    fn resolve(flag_key: &str, ty: VariationType) -> Option<AssignmentValue> {
        configuration()
            .resolve_flag(flag_key, Some(ty), &JsonConfigurationParser)
            .unwrap()
            .value
    }

    #[test]
    fn decodes_values_by_type() {
        assert_eq!(
            resolve("string_flag", VariationType::String),
            Some(AssignmentValue::String("red".to_owned()))
        );
        assert_eq!(
            resolve("bool_flag", VariationType::Boolean),
            Some(AssignmentValue::Boolean(true))
        );
        assert_eq!(
            resolve("int_flag", VariationType::Integer),
            Some(AssignmentValue::Integer(42))
        );
        assert_eq!(
            resolve("numeric_flag", VariationType::Numeric),
            Some(AssignmentValue::Numeric(2.5))
        );
        assert_eq!(
            resolve("json_flag", VariationType::Json),
            Some(AssignmentValue::Json(serde_json::json!({"a": 1})))
        );
    }

    #[test]
    fn decodes_logging_fields() {
        let assignment = configuration()
            .resolve_flag("string_flag", None, &JsonConfigurationParser)
            .unwrap();
        assert_eq!(assignment.allocation_key.as_deref(), Some("allocation-1"));
        assert_eq!(assignment.variation_key.as_deref(), Some("variation-1"));
        assert_eq!(assignment.extra_logging["holdout"], "h1");
        assert!(assignment.do_log);
    }

    #[test]
    fn numeric_widens_integer() {
        assert_eq!(
            resolve("int_flag", VariationType::Numeric),
            Some(AssignmentValue::Numeric(42.0))
        );
    }

    #[test]
    fn type_mismatch() {
        assert_eq!(
            configuration()
                .resolve_flag(
                    "numeric_flag",
                    Some(VariationType::Integer),
                    &JsonConfigurationParser
                )
                .err(),
            Some(FlagEvaluationError::InvalidType {
                expected: VariationType::Integer,
                found: VariationType::Numeric,
            })
        );
    }

    #[test]
    fn malformed_number_has_no_value() {
        let _ = env_logger::builder().is_test(true).try_init();
        assert_eq!(resolve("bad_int_flag", VariationType::Integer), None);
    }

    #[test]
    fn missing_flag_and_salt() {
        assert_eq!(
            configuration()
                .resolve_flag("unknown", None, &JsonConfigurationParser)
                .err(),
            Some(FlagEvaluationError::FlagNotFound)
        );
        assert_eq!(
            PrecomputedConfiguration::default()
                .resolve_flag("string_flag", None, &JsonConfigurationParser)
                .err(),
            Some(FlagEvaluationError::ConfigurationMissing)
        );
    }

    #[test]
    fn decodes_bandit() {
        let bandit = configuration().resolve_bandit("string_flag").unwrap();
        assert_eq!(bandit.bandit_key, "banner");
        assert_eq!(bandit.action.as_deref(), Some("nike"));
        assert_eq!(bandit.model_version, "v12");
        assert_eq!(bandit.action_probability, 0.25);
        // Unparsable numeric attributes are dropped.
        assert_eq!(
            bandit.action_numeric_attributes,
            HashMap::from([("price".to_owned(), 99.5)])
        );
        assert_eq!(
            bandit.action_categorical_attributes,
            HashMap::from([("brand".to_owned(), "nike".to_owned())])
        );

        let no_action = configuration().resolve_bandit("bool_flag").unwrap();
        assert_eq!(no_action.action, None);

        assert_eq!(
            configuration().resolve_bandit("int_flag").err(),
            Some(FlagEvaluationError::FlagNotFound)
        );
    }
}
