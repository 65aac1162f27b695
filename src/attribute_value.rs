use std::collections::HashMap;

use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A JSON-shaped value. Context attributes, clause values and flag variations all use this
/// representation, so operators can dispatch on the tag instead of probing types at runtime.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// A string.
    String(String),
    /// An ordered list of values.
    Array(Vec<AttributeValue>),
    /// A number. JSON does not distinguish integers from floats and neither does this type.
    Number(f64),
    /// A boolean.
    Bool(bool),
    /// A map of values.
    Object(HashMap<String, AttributeValue>),
    /// JSON null.
    Null,
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::String(s.to_owned())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::String(s)
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        AttributeValue::Bool(b)
    }
}

impl From<i64> for AttributeValue {
    fn from(i: i64) -> Self {
        AttributeValue::Number(i as f64)
    }
}

impl From<f64> for AttributeValue {
    fn from(f: f64) -> Self {
        AttributeValue::Number(f)
    }
}

impl<T> From<Vec<T>> for AttributeValue
where
    AttributeValue: From<T>,
{
    fn from(v: Vec<T>) -> Self {
        AttributeValue::Array(v.into_iter().map(AttributeValue::from).collect())
    }
}

impl From<&Value> for AttributeValue {
    fn from(v: &Value) -> Self {
        match v {
            Value::Null => AttributeValue::Null,
            Value::Bool(b) => AttributeValue::Bool(*b),
            Value::Number(n) => match n.as_f64() {
                Some(f) => AttributeValue::Number(f),
                None => {
                    warn!("number {} cannot be represented as f64, keeping it as a string", n);
                    AttributeValue::String(n.to_string())
                }
            },
            Value::String(s) => AttributeValue::String(s.clone()),
            Value::Array(items) => {
                AttributeValue::Array(items.iter().map(AttributeValue::from).collect())
            }
            Value::Object(map) => AttributeValue::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), AttributeValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&AttributeValue> for Value {
    fn from(v: &AttributeValue) -> Self {
        match v {
            AttributeValue::Null => Value::Null,
            AttributeValue::Bool(b) => Value::Bool(*b),
            AttributeValue::Number(f) => Value::from(*f),
            AttributeValue::String(s) => Value::String(s.clone()),
            AttributeValue::Array(items) => Value::Array(items.iter().map(Value::from).collect()),
            AttributeValue::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl AttributeValue {
    /// Returns the string if this is a [AttributeValue::String]. Never converts.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the number if this is a [AttributeValue::Number]. Never converts.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Number(f) => Some(*f),
            _ => None,
        }
    }

    /// Returns the boolean if this is a [AttributeValue::Bool]. Never converts.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }

    /// Applies `p` existentially: to every element of an array, or to the value itself for any
    /// other non-null value. Returns the first value satisfying `p`. Null never matches.
    pub fn find<P>(&self, p: P) -> Option<&AttributeValue>
    where
        P: Fn(&AttributeValue) -> bool,
    {
        match self {
            AttributeValue::Null => None,
            AttributeValue::Array(values) => values.iter().find(|v| p(v)),
            _ => p(self).then_some(self),
        }
    }
}
