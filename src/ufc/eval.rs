use std::{borrow::Cow, collections::HashMap};

use serde::Serialize;

use crate::{
    attributes::Attributes,
    error::FlagEvaluationError,
    obfuscation::{decode_base64, DecodeError},
    sharder::Sharder,
};

use super::{
    rules::find_matching_rule, Allocation, Flag, Shard, Split, TimeBound, Timestamp, Value,
    Variation,
};

/// Outcome of evaluating a single flag for a subject.
///
/// `allocation_key` and `variation` are `None` when no allocation matched. In obfuscated
/// configurations every field is already decoded.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    /// Flag that was evaluated.
    pub flag_key: String,
    /// Subject the flag was evaluated for.
    pub subject_key: String,
    /// Attributes used for evaluation.
    pub subject_attributes: Attributes,
    /// `None` if no allocation matched.
    pub allocation_key: Option<String>,
    /// `None` if no allocation matched.
    pub variation: Option<Variation>,
    /// Extra logging fields of the matched split.
    pub extra_logging: HashMap<String, String>,
    /// Whether an assignment event should be logged.
    pub do_log: bool,
}

impl EvaluationResult {
    fn no_match(flag_key: &str, subject_key: &str, subject_attributes: &Attributes) -> Self {
        EvaluationResult {
            flag_key: flag_key.to_owned(),
            subject_key: subject_key.to_owned(),
            subject_attributes: subject_attributes.clone(),
            allocation_key: None,
            variation: None,
            extra_logging: HashMap::new(),
            do_log: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum DeobfuscationError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("variation value cannot be coerced to the flag type")]
    InvalidValue,
}

impl Flag {
    /// Resolve the flag for `subject_key`.
    ///
    /// `flag_key` is the caller-facing key: in obfuscated configurations `self.key` is hashed.
    pub fn eval(
        &self,
        flag_key: &str,
        subject_key: &str,
        subject_attributes: &Attributes,
        obfuscated: bool,
        sharder: &impl Sharder,
        now: Timestamp,
    ) -> Result<EvaluationResult, FlagEvaluationError> {
        let mut result = EvaluationResult::no_match(flag_key, subject_key, subject_attributes);

        if !self.enabled {
            return Ok(result);
        }

        if self.total_shards == 0 {
            log::warn!(target: "eppo", flag_key, subject_key; "internal: flag has zero total shards");
            return Err(FlagEvaluationError::ConfigurationError);
        }

        // Augmenting subject_attributes with id, so that subject_key can be used in the rules.
        let augmented_subject_attributes = {
            let mut sa = subject_attributes.clone();
            sa.entry("id".into()).or_insert_with(|| subject_key.into());
            sa
        };

        let Some((allocation, split)) = self.allocations.iter().find_map(|allocation| {
            allocation
                .get_matching_split(
                    subject_key,
                    &augmented_subject_attributes,
                    sharder,
                    self.total_shards,
                    obfuscated,
                    now,
                )
                .map(|split| (allocation, split))
        }) else {
            log::trace!(target: "eppo", flag_key, subject_key; "no allocation matched");
            return Ok(result);
        };

        let variation = self.variations.get(&split.variation_key).ok_or_else(|| {
            log::warn!(target: "eppo",
                       flag_key,
                       subject_key,
                       variation_key:display = split.variation_key;
                       "internal: unable to find variation");
            FlagEvaluationError::ConfigurationError
        })?;

        if !obfuscated {
            result.allocation_key = Some(allocation.key.clone());
            result.variation = Some(variation.clone());
            result.extra_logging = split.extra_logging.clone();
            result.do_log = allocation.do_log;
            return Ok(result);
        }

        match self.deobfuscate(allocation, split, variation) {
            Ok((allocation_key, variation, extra_logging)) => {
                result.allocation_key = Some(allocation_key);
                result.variation = Some(variation);
                result.extra_logging = extra_logging;
                result.do_log = allocation.do_log;
            }
            Err(err) => {
                log::warn!(target: "eppo",
                           flag_key,
                           subject_key;
                           "failed to decode obfuscated assignment: {err}");
            }
        }
        Ok(result)
    }

    fn deobfuscate(
        &self,
        allocation: &Allocation,
        split: &Split,
        variation: &Variation,
    ) -> Result<(String, Variation, HashMap<String, String>), DeobfuscationError> {
        let allocation_key = decode_base64(&allocation.key)?;
        let variation_key = decode_base64(&variation.key)?;
        let raw_value = variation
            .value
            .as_str()
            .ok_or(DeobfuscationError::InvalidValue)?;
        let value = Value::from_decoded(decode_base64(raw_value)?, self.variation_type)
            .ok_or(DeobfuscationError::InvalidValue)?;
        let extra_logging = split
            .extra_logging
            .iter()
            .map(|(k, v)| -> Result<(String, String), DecodeError> {
                Ok((decode_base64(k)?, decode_base64(v)?))
            })
            .collect::<Result<HashMap<_, _>, _>>()?;

        Ok((
            allocation_key,
            Variation {
                key: variation_key,
                value,
            },
            extra_logging,
        ))
    }
}

impl Allocation {
    fn get_matching_split(
        &self,
        subject_key: &str,
        augmented_subject_attributes: &Attributes,
        sharder: &impl Sharder,
        total_shards: u64,
        obfuscated: bool,
        now: Timestamp,
    ) -> Option<&Split> {
        if self.is_allowed_by_time(now, obfuscated)
            && self.is_allowed_by_rules(augmented_subject_attributes, obfuscated)
        {
            self.splits
                .iter()
                .find(|split| split.matches(subject_key, sharder, total_shards, obfuscated))
        } else {
            None
        }
    }

    fn is_allowed_by_time(&self, now: Timestamp, obfuscated: bool) -> bool {
        let resolve = |bound: &Option<TimeBound>| match bound {
            None => Some(None),
            Some(bound) => bound.resolve(obfuscated).map(Some),
        };
        let (Some(start_at), Some(end_at)) = (resolve(&self.start_at), resolve(&self.end_at))
        else {
            log::warn!(target: "eppo",
                       allocation_key:display = self.key;
                       "skipping allocation with malformed time bounds");
            return false;
        };

        let forbidden = matches!(start_at, Some(t) if now < t)
            || matches!(end_at, Some(t) if now > t);
        !forbidden
    }

    fn is_allowed_by_rules(&self, augmented_subject_attributes: &Attributes, obfuscated: bool) -> bool {
        self.rules.is_empty()
            || find_matching_rule(&self.rules, augmented_subject_attributes, obfuscated).is_some()
    }
}

impl TimeBound {
    fn resolve(&self, obfuscated: bool) -> Option<Timestamp> {
        match self {
            TimeBound::Timestamp(t) => Some(*t),
            TimeBound::Encoded(s) if obfuscated => decode_base64(s).ok()?.parse().ok(),
            TimeBound::Encoded(_) => None,
        }
    }
}

impl Split {
    /// Return `true` if `subject_key` matches the given split under the provided `sharder`.
    ///
    /// To match a split, subject must match all underlying shards.
    fn matches(
        &self,
        subject_key: &str,
        sharder: &impl Sharder,
        total_shards: u64,
        obfuscated: bool,
    ) -> bool {
        self.shards
            .iter()
            .all(|shard| shard.matches(subject_key, sharder, total_shards, obfuscated))
    }
}

impl Shard {
    /// Return `true` if `subject_key` matches the given shard under the provided `sharder`.
    fn matches(
        &self,
        subject_key: &str,
        sharder: &impl Sharder,
        total_shards: u64,
        obfuscated: bool,
    ) -> bool {
        let salt = if obfuscated {
            match decode_base64(&self.salt) {
                Ok(salt) => Cow::Owned(salt),
                Err(err) => {
                    log::warn!(target: "eppo", subject_key; "failed to decode shard salt: {err}");
                    return false;
                }
            }
        } else {
            Cow::Borrowed(self.salt.as_str())
        };
        let h = sharder.get_shard(format!("{salt}-{subject_key}"), total_shards);
        self.ranges.iter().any(|range| range.contains(h))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::Utc;

    use crate::{
        attributes::Attributes,
        error::FlagEvaluationError,
        obfuscation::md5_hex,
        sharder::Md5Sharder,
        ufc::{Flag, TryParse, UniversalFlagConfig, Value, Variation},
    };

    use super::EvaluationResult;

    const CONFIG: &str = r#"
      {
        "format": "SERVER",
        "flags": {
          "onboarding": {
            "key": "onboarding",
            "enabled": true,
            "variationType": "STRING",
            "totalShards": 10000,
            "variations": {
              "na": {"key": "na", "value": "north-america"},
              "senior": {"key": "senior", "value": "senior"},
              "control": {"key": "control", "value": "control"}
            },
            "allocations": [
              {
                "key": "na-only",
                "rules": [{"conditions": [
                  {"attribute": "country", "operator": "ONE_OF", "value": ["US", "Canada", "Mexico"]}
                ]}],
                "splits": [{"variationKey": "na", "shards": [], "extraLogging": {"holdout": "na-holdout"}}]
              },
              {
                "key": "seniors",
                "rules": [{"conditions": [
                  {"attribute": "age", "operator": "GTE", "value": 50}
                ]}],
                "splits": [{"variationKey": "senior", "shards": []}]
              },
              {
                "key": "everyone",
                "splits": [{"variationKey": "control", "shards": []}],
                "doLog": false
              }
            ]
          },
          "bucketed": {
            "key": "bucketed",
            "enabled": true,
            "variationType": "INTEGER",
            "totalShards": 10000,
            "variations": {
              "in": {"key": "in", "value": 1},
              "out": {"key": "out", "value": 0}
            },
            "allocations": [{
              "key": "rollout",
              "splits": [
                {"variationKey": "in", "shards": [{"salt": "salt", "ranges": [{"start": 3000, "end": 4000}]}]},
                {"variationKey": "out", "shards": []}
              ]
            }]
          },
          "zero-exposure": {
            "key": "zero-exposure",
            "enabled": true,
            "variationType": "NUMERIC",
            "totalShards": 10000,
            "variations": {
              "a": {"key": "a", "value": 1.5},
              "b": {"key": "b", "value": 2.5}
            },
            "allocations": [
              {
                "key": "nobody",
                "splits": [{"variationKey": "a", "shards": [{"salt": "s", "ranges": [{"start": 0, "end": 0}]}]}]
              },
              {
                "key": "fallback",
                "splits": [{"variationKey": "b", "shards": []}]
              }
            ]
          },
          "windowed": {
            "key": "windowed",
            "enabled": true,
            "variationType": "BOOLEAN",
            "variations": {
              "on": {"key": "on", "value": true},
              "off": {"key": "off", "value": false}
            },
            "allocations": [
              {"key": "expired", "endAt": "2000-01-01T00:00:00Z", "splits": [{"variationKey": "on", "shards": []}]},
              {"key": "future", "startAt": "2999-01-01T00:00:00Z", "splits": [{"variationKey": "on", "shards": []}]},
              {"key": "current", "startAt": "2000-01-01T00:00:00Z", "endAt": "2999-01-01T00:00:00Z", "splits": [{"variationKey": "off", "shards": []}]}
            ]
          },
          "by-id": {
            "key": "by-id",
            "enabled": true,
            "variationType": "JSON",
            "variations": {"obj": {"key": "obj", "value": "{\"a\":1}"}},
            "allocations": [{
              "key": "alice-only",
              "rules": [{"conditions": [{"attribute": "id", "operator": "ONE_OF", "value": ["alice"]}]}],
              "splits": [{"variationKey": "obj", "shards": []}]
            }]
          },
          "disabled": {
            "key": "disabled",
            "enabled": false,
            "variationType": "STRING",
            "variations": {"a": {"key": "a", "value": "a"}},
            "allocations": [{"key": "all", "splits": [{"variationKey": "a", "shards": []}]}]
          },
          "broken": {
            "key": "broken",
            "enabled": true,
            "variationType": "STRING",
            "variations": {},
            "allocations": [{"key": "all", "splits": [{"variationKey": "missing", "shards": []}]}]
          }
        }
      }
    "#;

    fn config() -> UniversalFlagConfig {
        serde_json::from_str(CONFIG).unwrap()
    }

    fn get_flag<'a>(config: &'a UniversalFlagConfig, key: &str) -> &'a Flag {
        match config.flags.get(key) {
            Some(TryParse::Parsed(flag)) => flag,
            _ => panic!("flag {key} is missing"),
        }
    }

    fn eval(flag_key: &str, subject_key: &str, attributes: &Attributes) -> EvaluationResult {
        let config = config();
        get_flag(&config, flag_key)
            .eval(
                flag_key,
                subject_key,
                attributes,
                false,
                &Md5Sharder,
                Utc::now(),
            )
            .unwrap()
    }

    fn variation_value(result: &EvaluationResult) -> Option<&Value> {
        result.variation.as_ref().map(|v| &v.value)
    }

    #[test]
    fn north_america_allocation_wins_over_catch_all() {
        let attributes = HashMap::from([("country".to_owned(), "US".into())]);
        let result = eval("onboarding", "subject", &attributes);

        assert_eq!(result.allocation_key.as_deref(), Some("na-only"));
        assert_eq!(
            result.variation,
            Some(Variation {
                key: "na".to_owned(),
                value: "north-america".into()
            })
        );
        assert_eq!(
            result.extra_logging,
            HashMap::from([("holdout".to_owned(), "na-holdout".to_owned())])
        );
        assert!(result.do_log);
        assert_eq!(result.subject_attributes, attributes);
    }

    #[test]
    fn falls_through_to_next_matching_allocation() {
        let senior = eval(
            "onboarding",
            "subject",
            &HashMap::from([("age".to_owned(), 50.0.into())]),
        );
        assert_eq!(senior.allocation_key.as_deref(), Some("seniors"));

        let other = eval(
            "onboarding",
            "subject",
            &HashMap::from([("country".to_owned(), "France".into())]),
        );
        assert_eq!(other.allocation_key.as_deref(), Some("everyone"));
        assert!(!other.do_log);
    }

    #[test]
    fn catch_all_assigns_every_subject() {
        for i in 0..100 {
            let result = eval("onboarding", &format!("subject-{i}"), &HashMap::new());
            assert_eq!(variation_value(&result), Some(&Value::from("control")));
        }
    }

    #[test]
    fn zero_exposure_never_wins() {
        for i in 0..100 {
            let result = eval("zero-exposure", &format!("subject-{i}"), &HashMap::new());
            assert_eq!(result.allocation_key.as_deref(), Some("fallback"));
            assert_eq!(variation_value(&result), Some(&Value::Number(2.5)));
        }
    }

    #[test]
    fn split_uses_salted_subject_shard() {
        // md5("salt-alice") lands in shard 3619, md5("salt-bob") in shard 1723.
        let alice = eval("bucketed", "alice", &HashMap::new());
        assert_eq!(variation_value(&alice), Some(&Value::Number(1.0)));

        let bob = eval("bucketed", "bob", &HashMap::new());
        assert_eq!(variation_value(&bob), Some(&Value::Number(0.0)));
    }

    #[test]
    fn respects_time_window() {
        let result = eval("windowed", "subject", &HashMap::new());
        assert_eq!(result.allocation_key.as_deref(), Some("current"));
        assert_eq!(variation_value(&result), Some(&Value::Boolean(false)));
    }

    #[test]
    fn injects_subject_key_as_id() {
        let alice = eval("by-id", "alice", &HashMap::new());
        assert_eq!(alice.allocation_key.as_deref(), Some("alice-only"));
        // The injected id is not reported back as a caller attribute.
        assert!(alice.subject_attributes.is_empty());

        let bob = eval("by-id", "bob", &HashMap::new());
        assert_eq!(bob.variation, None);

        // Caller-provided id takes precedence.
        let overridden = eval(
            "by-id",
            "bob",
            &HashMap::from([("id".to_owned(), "alice".into())]),
        );
        assert_eq!(overridden.allocation_key.as_deref(), Some("alice-only"));
    }

    #[test]
    fn disabled_flag_has_no_assignment() {
        let result = eval("disabled", "subject", &HashMap::new());
        assert_eq!(result.allocation_key, None);
        assert_eq!(result.variation, None);
        assert!(!result.do_log);
    }

    #[test]
    fn undeclared_variation_is_configuration_error() {
        let config = config();
        let result = get_flag(&config, "broken").eval(
            "broken",
            "subject",
            &HashMap::new(),
            false,
            &Md5Sharder,
            Utc::now(),
        );
        assert_eq!(result, Err(FlagEvaluationError::ConfigurationError));
    }

    #[test]
    fn evaluation_is_idempotent() {
        let plain = config();
        let obfuscated = plain.obfuscate();
        let attributes = HashMap::from([("age".to_owned(), 70.0.into())]);
        let now = Utc::now();

        for (config, key, is_obfuscated) in [
            (&plain, "onboarding".to_owned(), false),
            (&obfuscated, md5_hex("onboarding"), true),
        ] {
            let flag = get_flag(config, &key);
            let first = flag.eval("onboarding", "subject", &attributes, is_obfuscated, &Md5Sharder, now);
            let second = flag.eval("onboarding", "subject", &attributes, is_obfuscated, &Md5Sharder, now);
            assert_eq!(first, second);
        }
    }

    #[test]
    fn obfuscated_evaluation_matches_plain() {
        let _ = env_logger::builder().is_test(true).try_init();

        let plain = config();
        let obfuscated = plain.obfuscate();
        let now = Utc::now();

        let attribute_sets: Vec<Attributes> = vec![
            HashMap::new(),
            HashMap::from([("country".to_owned(), "Canada".into())]),
            HashMap::from([("country".to_owned(), "France".into())]),
            HashMap::from([("age".to_owned(), 50.0.into())]),
            HashMap::from([("age".to_owned(), 49.0.into())]),
            HashMap::from([("id".to_owned(), "alice".into())]),
        ];

        for flag_key in plain.flags.keys() {
            let plain_flag = get_flag(&plain, flag_key);
            let obfuscated_flag = get_flag(&obfuscated, &md5_hex(flag_key));
            for subject in ["alice", "bob", "charlie", "subject-1", "subject-2"] {
                for attributes in &attribute_sets {
                    let expected =
                        plain_flag.eval(flag_key, subject, attributes, false, &Md5Sharder, now);
                    let actual =
                        obfuscated_flag.eval(flag_key, subject, attributes, true, &Md5Sharder, now);
                    assert_eq!(expected, actual, "flag {flag_key}, subject {subject}");
                }
            }
        }
    }

    #[test]
    fn malformed_obfuscated_payload_degrades_to_no_match() {
        let mut obfuscated = config().obfuscate();
        let key = md5_hex("onboarding");
        if let Some(TryParse::Parsed(flag)) = obfuscated.flags.get_mut(&key) {
            for allocation in &mut flag.allocations {
                allocation.key = "%%% not base64".to_owned();
            }
        }

        let result = get_flag(&obfuscated, &key)
            .eval("onboarding", "subject", &HashMap::new(), true, &Md5Sharder, Utc::now())
            .unwrap();
        assert_eq!(result.variation, None);
        assert_eq!(result.allocation_key, None);
    }
}
