//! Typed extraction from loosely-typed tool parameter maps.

use std::fmt;

use serde_json::{Map, Value};

use crate::ids::InstanceId;

/// Expected type of a parameter, used in validation messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Number,
    Integer,
    Boolean,
    InstanceId,
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::String => "a string",
            Self::Number => "a number",
            Self::Integer => "an integer",
            Self::Boolean => "a boolean",
            Self::InstanceId => "an integer or numeric string",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParamError {
    #[error("missing required parameter: {0}")]
    Missing(String),
    #[error("parameter {key} must be {expected}")]
    WrongType { key: String, expected: ParamKind },
    #[error("parameter {key} is out of range: {reason}")]
    OutOfRange { key: String, reason: String },
}

impl ParamError {
    pub fn out_of_range(key: &str, reason: impl Into<String>) -> Self {
        Self::OutOfRange {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Self::Missing(key) => key,
            Self::WrongType { key, .. } | Self::OutOfRange { key, .. } => key,
        }
    }
}

/// A value that can be converted out of a JSON parameter.
///
/// Conversions are lenient where clients commonly send the wrong JSON type:
/// numeric strings are accepted for numbers, and numbers for strings.
pub trait FromParam: Sized {
    const KIND: ParamKind;
    fn from_param(value: &Value) -> Option<Self>;
}

impl FromParam for String {
    const KIND: ParamKind = ParamKind::String;
    fn from_param(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

impl FromParam for f64 {
    const KIND: ParamKind = ParamKind::Number;
    fn from_param(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
            _ => None,
        }
    }
}

impl FromParam for i64 {
    const KIND: ParamKind = ParamKind::Integer;
    fn from_param(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64)
                    .map(|f| f as i64)
            }),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl FromParam for bool {
    const KIND: ParamKind = ParamKind::Boolean;
    fn from_param(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.trim() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }
}

impl FromParam for InstanceId {
    const KIND: ParamKind = ParamKind::InstanceId;
    fn from_param(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_u64().map(|n| InstanceId::from_raw(n.to_string())),
            Value::String(s) if !s.trim().is_empty() => {
                Some(InstanceId::from_raw(s.as_str()).normalized())
            }
            _ => None,
        }
    }
}

/// Parameters passed to a tool. Keys are unique; order is irrelevant.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Parameters(Map<String, Value>);

impl Parameters {
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// `None` unless `value` is a JSON object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn raw(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    /// Look up `key` and convert it; absent or null is [`ParamError::Missing`].
    pub fn require<T: FromParam>(&self, key: &str) -> Result<T, ParamError> {
        self.optional(key)?
            .ok_or_else(|| ParamError::Missing(key.to_string()))
    }

    /// Like [`Parameters::require`], but absent or null yields `Ok(None)`.
    pub fn optional<T: FromParam>(&self, key: &str) -> Result<Option<T>, ParamError> {
        match self.raw(key) {
            None => Ok(None),
            Some(value) => T::from_param(value)
                .map(Some)
                .ok_or_else(|| ParamError::WrongType {
                    key: key.to_string(),
                    expected: T::KIND,
                }),
        }
    }

    pub fn instance_id(&self) -> Result<InstanceId, ParamError> {
        self.require("instance_id")
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for Parameters {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Parameters {
        Parameters::from_value(value).unwrap()
    }

    #[test]
    fn from_value_requires_object() {
        assert!(Parameters::from_value(json!({})).is_some());
        assert!(Parameters::from_value(json!([1])).is_none());
        assert!(Parameters::from_value(Value::Null).is_none());
    }

    #[test]
    fn require_typed_values() {
        let p = params(json!({"x": 10.5, "n": 3, "name": "home", "flag": true}));
        assert_eq!(p.require::<f64>("x").unwrap(), 10.5);
        assert_eq!(p.require::<i64>("n").unwrap(), 3);
        assert_eq!(p.require::<String>("name").unwrap(), "home");
        assert!(p.require::<bool>("flag").unwrap());
    }

    #[test]
    fn lenient_conversions() {
        let p = params(json!({"x": "12.5", "n": "7", "whole": 4.0, "label": 9, "b": "false"}));
        assert_eq!(p.require::<f64>("x").unwrap(), 12.5);
        assert_eq!(p.require::<i64>("n").unwrap(), 7);
        assert_eq!(p.require::<i64>("whole").unwrap(), 4);
        assert_eq!(p.require::<String>("label").unwrap(), "9");
        assert!(!p.require::<bool>("b").unwrap());
    }

    #[test]
    fn missing_and_wrong_type_are_classified() {
        let p = params(json!({"x": "left", "n": 2.5, "nothing": null}));
        assert_eq!(
            p.require::<f64>("y"),
            Err(ParamError::Missing("y".into()))
        );
        assert_eq!(
            p.require::<f64>("nothing"),
            Err(ParamError::Missing("nothing".into()))
        );
        assert_eq!(
            p.require::<f64>("x"),
            Err(ParamError::WrongType {
                key: "x".into(),
                expected: ParamKind::Number
            })
        );
        let err = p.require::<i64>("n").unwrap_err();
        assert_eq!(err.key(), "n");
        assert_eq!(err.to_string(), "parameter n must be an integer");
    }

    #[test]
    fn optional_distinguishes_absent_from_invalid() {
        let p = params(json!({"limit": "many"}));
        assert_eq!(p.optional::<i64>("absent"), Ok(None));
        assert!(p.optional::<i64>("limit").is_err());
    }

    #[test]
    fn instance_id_accepts_integer_or_string() {
        assert_eq!(
            params(json!({"instance_id": 2})).instance_id().unwrap(),
            InstanceId::from_raw("2")
        );
        assert_eq!(
            params(json!({"instance_id": " 5 "})).instance_id().unwrap(),
            InstanceId::from_raw("5")
        );
        assert_eq!(
            params(json!({"instance_id": " 05 "})).instance_id().unwrap(),
            InstanceId::from(5)
        );
        assert!(params(json!({"instance_id": -1})).instance_id().is_err());
        assert!(params(json!({"instance_id": ""})).instance_id().is_err());
        assert!(params(json!({})).instance_id().is_err());
    }
}
