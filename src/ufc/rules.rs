use std::{borrow::Cow, cmp::Ordering};

use regex::Regex;
use semver::Version;

use crate::{
    attributes::{AttributeValue, Attributes},
    obfuscation::{decode_base64, md5_hex, DecodeError},
};

use super::{Condition, ConditionOperator, Rule, Value};

/// Reason a condition could not be applied. The condition is treated as not matching.
#[derive(Debug, thiserror::Error)]
pub(crate) enum ConditionError {
    #[error("unknown operator")]
    UnknownOperator,
    #[error("condition value has unexpected type for the operator")]
    InvalidConditionValue,
    #[error("failed to decode obfuscated condition value: {0}")]
    Decode(#[from] DecodeError),
    #[error("invalid regex: {0}")]
    InvalidRegex(#[from] regex::Error),
    #[error("values are neither numbers nor semantic versions")]
    NotComparable,
}

/// Return the first rule that is fully satisfied by `attributes`.
pub(crate) fn find_matching_rule<'a>(
    rules: &'a [Rule],
    attributes: &Attributes,
    obfuscated: bool,
) -> Option<&'a Rule> {
    rules.iter().find(|rule| rule.eval(attributes, obfuscated))
}

impl Rule {
    /// A rule matches when all of its conditions match. An empty rule always matches.
    pub(crate) fn eval(&self, attributes: &Attributes, obfuscated: bool) -> bool {
        self.conditions
            .iter()
            .all(|condition| condition.eval(attributes, obfuscated))
    }
}

impl Condition {
    pub(crate) fn eval(&self, attributes: &Attributes, obfuscated: bool) -> bool {
        let attribute = if obfuscated {
            // Attribute names are hashed in obfuscated configurations.
            attributes
                .iter()
                .find(|(name, _)| md5_hex(name) == self.attribute)
                .map(|(_, value)| value)
        } else {
            attributes.get(&self.attribute)
        };

        match self.operator.try_eval(attribute, &self.value, obfuscated) {
            Ok(result) => result,
            Err(err) => {
                log::trace!(target: "eppo",
                            attribute:display = self.attribute,
                            operator:debug = self.operator;
                            "condition does not match: {err}");
                false
            }
        }
    }
}

impl ConditionOperator {
    /// Applying `ConditionOperator` to the values. Returns `false` if the operator cannot be
    /// applied or there's a misconfiguration.
    #[cfg(test)]
    pub(crate) fn eval(
        &self,
        attribute: Option<&AttributeValue>,
        condition_value: &Value,
        obfuscated: bool,
    ) -> bool {
        self.try_eval(attribute, condition_value, obfuscated)
            .unwrap_or(false)
    }

    fn try_eval(
        &self,
        attribute: Option<&AttributeValue>,
        condition_value: &Value,
        obfuscated: bool,
    ) -> Result<bool, ConditionError> {
        let attribute = attribute.filter(|value| !value.is_null());

        match self {
            Self::IsNull => {
                let expect_null = match condition_value {
                    Value::Boolean(b) => *b,
                    Value::String(hash) if obfuscated => *hash == md5_hex("true"),
                    _ => return Err(ConditionError::InvalidConditionValue),
                };
                Ok(expect_null == attribute.is_none())
            }
            Self::Unknown => Err(ConditionError::UnknownOperator),
            _ => match attribute {
                Some(attribute) => self.eval_present(attribute, condition_value, obfuscated),
                // Every other operator fails on missing attributes.
                None => Ok(false),
            },
        }
    }

    fn eval_present(
        &self,
        attribute: &AttributeValue,
        condition_value: &Value,
        obfuscated: bool,
    ) -> Result<bool, ConditionError> {
        let attribute_str = attribute
            .to_comparison_string()
            .ok_or(ConditionError::InvalidConditionValue)?;

        match self {
            Self::Matches | Self::NotMatches => {
                let Value::String(pattern) = condition_value else {
                    return Err(ConditionError::InvalidConditionValue);
                };
                let pattern = decode_if_obfuscated(pattern, obfuscated)?;
                let regex = Regex::new(&format!("^(?:{pattern})$"))?;
                let matches = regex.is_match(&attribute_str);
                Ok(if *self == Self::Matches {
                    matches
                } else {
                    !matches
                })
            }

            Self::OneOf | Self::NotOneOf => {
                let Value::StringList(values) = condition_value else {
                    return Err(ConditionError::InvalidConditionValue);
                };
                // The server pre-hashes the list in obfuscated configurations.
                let needle = if obfuscated {
                    Cow::Owned(md5_hex(&attribute_str))
                } else {
                    attribute_str
                };
                let is_one_of = values.iter().any(|v| *v == *needle);
                Ok(if *self == Self::OneOf {
                    is_one_of
                } else {
                    !is_one_of
                })
            }

            Self::Gte => Ok(compare(attribute, &attribute_str, condition_value, obfuscated)?
                .is_some_and(Ordering::is_ge)),
            Self::Gt => Ok(compare(attribute, &attribute_str, condition_value, obfuscated)?
                .is_some_and(Ordering::is_gt)),
            Self::Lte => Ok(compare(attribute, &attribute_str, condition_value, obfuscated)?
                .is_some_and(Ordering::is_le)),
            Self::Lt => Ok(compare(attribute, &attribute_str, condition_value, obfuscated)?
                .is_some_and(Ordering::is_lt)),

            Self::IsNull | Self::Unknown => Err(ConditionError::UnknownOperator),
        }
    }
}

/// Order `attribute` relative to the condition value: numerically if both sides are numbers,
/// otherwise as semantic versions. `None` when a number is NaN.
fn compare(
    attribute: &AttributeValue,
    attribute_str: &str,
    condition_value: &Value,
    obfuscated: bool,
) -> Result<Option<Ordering>, ConditionError> {
    let condition_str = match condition_value {
        Value::Number(n) => Cow::Owned(n.to_string()),
        Value::String(s) => decode_if_obfuscated(s, obfuscated)?,
        _ => return Err(ConditionError::InvalidConditionValue),
    };

    let attribute_number = match attribute {
        AttributeValue::Number(n) => Some(*n),
        AttributeValue::String(s) => s.parse::<f64>().ok(),
        _ => None,
    };

    if let (Some(a), Ok(c)) = (attribute_number, condition_str.parse::<f64>()) {
        return Ok(a.partial_cmp(&c));
    }

    let (Ok(a), Ok(c)) = (Version::parse(attribute_str), Version::parse(&condition_str)) else {
        return Err(ConditionError::NotComparable);
    };
    Ok(Some(a.cmp(&c)))
}

fn decode_if_obfuscated(value: &str, obfuscated: bool) -> Result<Cow<'_, str>, DecodeError> {
    if obfuscated {
        decode_base64(value).map(Cow::Owned)
    } else {
        Ok(Cow::Borrowed(value))
    }
}
