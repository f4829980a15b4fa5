use std::{borrow::Cow, collections::HashMap};

use derive_more::From;
use serde::{Deserialize, Serialize};

/// Subject or action attributes used for targeting.
pub type Attributes = HashMap<String, AttributeValue>;

/// Value of a single attribute.
#[derive(Debug, Serialize, Deserialize, PartialEq, PartialOrd, From, Clone)]
#[serde(untagged)]
pub enum AttributeValue {
    /// A string value.
    String(String),
    /// A number. Integers are represented as `f64` as well.
    Number(f64),
    /// A boolean value.
    Boolean(bool),
    /// Explicitly missing value. Treated the same as an absent attribute.
    Null,
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl AttributeValue {
    pub(crate) fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }

    /// String form used for list membership, regex matching and version parsing.
    ///
    /// Integral numbers render without a fractional part (`42`, not `42.0`).
    pub(crate) fn to_comparison_string(&self) -> Option<Cow<'_, str>> {
        match self {
            AttributeValue::String(s) => Some(Cow::Borrowed(s)),
            AttributeValue::Number(n) => Some(Cow::Owned(n.to_string())),
            AttributeValue::Boolean(b) => Some(Cow::Borrowed(if *b { "true" } else { "false" })),
            AttributeValue::Null => None,
        }
    }
}

/// `ContextAttributes` are subject or action attributes split by their semantics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextAttributes {
    /// Numeric attributes are quantitative (e.g., real numbers) and define a scale.
    #[serde(rename = "numericAttributes", default)]
    pub numeric: HashMap<String, f64>,
    /// Categorical attributes have a finite set of values that are not directly comparable.
    #[serde(rename = "categoricalAttributes", default)]
    pub categorical: HashMap<String, String>,
}

impl From<Attributes> for ContextAttributes {
    fn from(value: Attributes) -> Self {
        ContextAttributes::from_iter(value)
    }
}

impl<K, V> FromIterator<(K, V)> for ContextAttributes
where
    K: Into<String>,
    V: Into<AttributeValue>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        iter.into_iter()
            .fold(ContextAttributes::default(), |mut acc, (key, value)| {
                match value.into() {
                    AttributeValue::String(value) => {
                        acc.categorical.insert(key.into(), value);
                    }
                    AttributeValue::Number(value) => {
                        acc.numeric.insert(key.into(), value);
                    }
                    AttributeValue::Boolean(value) => {
                        acc.categorical.insert(key.into(), value.to_string());
                    }
                    // Nulls are missing values.
                    AttributeValue::Null => {}
                }
                acc
            })
    }
}

impl ContextAttributes {
    /// Convert contextual attributes to generic `Attributes`.
    pub fn to_generic_attributes(&self) -> Attributes {
        let mut result = HashMap::with_capacity(self.numeric.len() + self.categorical.len());
        for (key, value) in &self.numeric {
            result.insert(key.clone(), AttributeValue::Number(*value));
        }
        for (key, value) in &self.categorical {
            result.insert(key.clone(), AttributeValue::String(value.clone()));
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{AttributeValue, Attributes, ContextAttributes};

    #[test]
    fn comparison_string() {
        assert_eq!(
            AttributeValue::from(42.0).to_comparison_string().as_deref(),
            Some("42")
        );
        assert_eq!(
            AttributeValue::from(3.5).to_comparison_string().as_deref(),
            Some("3.5")
        );
        assert_eq!(
            AttributeValue::from(true).to_comparison_string().as_deref(),
            Some("true")
        );
        assert_eq!(
            AttributeValue::from("US").to_comparison_string().as_deref(),
            Some("US")
        );
        assert_eq!(AttributeValue::Null.to_comparison_string(), None);
    }

    #[test]
    fn splits_attributes_by_kind() {
        let attributes: Attributes = HashMap::from([
            ("age".to_owned(), 30.0.into()),
            ("country".to_owned(), "US".into()),
            ("premium".to_owned(), true.into()),
            ("nothing".to_owned(), AttributeValue::Null),
        ]);

        let context = ContextAttributes::from(attributes);

        assert_eq!(context.numeric, HashMap::from([("age".to_owned(), 30.0)]));
        assert_eq!(
            context.categorical,
            HashMap::from([
                ("country".to_owned(), "US".to_owned()),
                ("premium".to_owned(), "true".to_owned()),
            ])
        );
    }

    #[test]
    fn serializes_wire_names() {
        let context = ContextAttributes::from_iter([("age", 30.0)]);
        assert_eq!(
            serde_json::to_value(&context).unwrap(),
            serde_json::json!({"numericAttributes": {"age": 30.0}, "categoricalAttributes": {}})
        );
    }
}
