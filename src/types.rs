use serde::{Deserialize, Serialize};

use crate::error::ScanError;
use std::collections::BTreeMap;
use std::fmt;

/// Native value representation for everything that flows through a scan.
///
/// Stream payloads, point values and positions are all normalized into this
/// type so no transport-specific representation ever reaches the engine.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Array(Vec<Value>),
    Record(BTreeMap<String, Value>),
}

/// A scan position is an opaque value handed unchanged to writers, validators and hooks
pub type Position = Value;

// Conversion traits for Value
impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::Int(value as i64)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float(value as f64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<Vec<f64>> for Value {
    fn from(value: Vec<f64>) -> Self {
        Value::Array(value.into_iter().map(Value::Float).collect())
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::Array(value)
    }
}

impl TryFrom<Value> for f64 {
    type Error = ScanError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        value.as_f64()
    }
}

impl TryFrom<Value> for i64 {
    type Error = ScanError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        value.as_i64()
    }
}

impl TryFrom<Value> for bool {
    type Error = ScanError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Bool(v) => Ok(v),
            _ => Err(ScanError::Type(format!("Expected bool, got {value:?}"))),
        }
    }
}

impl TryFrom<Value> for String {
    type Error = ScanError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Text(v) => Ok(v),
            _ => Err(ScanError::Type(format!("Expected string, got {value:?}"))),
        }
    }
}

impl Value {
    /// Numeric view; integers are widened
    pub fn as_f64(&self) -> Result<f64, ScanError> {
        match self {
            Value::Float(v) => Ok(*v),
            Value::Int(v) => Ok(*v as f64),
            _ => Err(ScanError::Type(format!("Expected number, got {self:?}"))),
        }
    }

    pub fn as_i64(&self) -> Result<i64, ScanError> {
        match self {
            Value::Int(v) => Ok(*v),
            _ => Err(ScanError::Type(format!("Expected integer, got {self:?}"))),
        }
    }

    pub fn as_str(&self) -> Result<&str, ScanError> {
        match self {
            Value::Text(s) => Ok(s),
            _ => Err(ScanError::Type(format!("Expected string, got {self:?}"))),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Components of a position: array elements, or the value itself for scalars
    pub fn components(&self) -> Vec<&Value> {
        match self {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        }
    }

    /// Equality with an absolute tolerance for numeric values
    pub fn approx_eq(&self, other: &Value, tolerance: f64) -> bool {
        match (self.as_f64(), other.as_f64()) {
            (Ok(a), Ok(b)) => (a - b).abs() <= tolerance,
            _ => self == other,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "{v}"),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Record(fields) => {
                write!(f, "{{")?;
                for (i, (key, item)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {item}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// One logical read result
///
/// `Multi` holds one value per configured readable, in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Measurement {
    Multi(Vec<Value>),
    Single(Value),
}

impl Measurement {
    /// Collapse a list of readable values: one readable gives a bare value
    pub fn from_values(mut values: Vec<Value>) -> Self {
        if values.len() == 1 {
            Measurement::Single(values.remove(0))
        } else {
            Measurement::Multi(values)
        }
    }

    pub fn values(&self) -> &[Value] {
        match self {
            Measurement::Single(value) => std::slice::from_ref(value),
            Measurement::Multi(values) => values,
        }
    }

    pub fn into_values(self) -> Vec<Value> {
        match self {
            Measurement::Single(value) => vec![value],
            Measurement::Multi(values) => values,
        }
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values().get(index)
    }

    pub fn len(&self) -> usize {
        self.values().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values().is_empty()
    }
}

/// Everything acquired at one position
///
/// A single measurement per position is kept unwrapped; callers that
/// configure several measurements get them in acquisition order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PositionData {
    Repeated(Vec<Measurement>),
    Single(Measurement),
}

impl PositionData {
    pub fn measurements(&self) -> &[Measurement] {
        match self {
            PositionData::Single(measurement) => std::slice::from_ref(measurement),
            PositionData::Repeated(measurements) => measurements,
        }
    }

    /// The first acquired measurement, regardless of shape
    pub fn first(&self) -> Option<&Measurement> {
        self.measurements().first()
    }
}

/// Lifecycle state of a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScanState {
    Initialized,
    Running,
    Paused,
    Aborted,
    Finished,
}

impl ScanState {
    /// Aborted and Finished are never left
    pub fn is_terminal(self) -> bool {
        matches!(self, ScanState::Aborted | ScanState::Finished)
    }
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScanState::Initialized => "INITIALIZED",
            ScanState::Running => "RUNNING",
            ScanState::Paused => "PAUSED",
            ScanState::Aborted => "ABORTED",
            ScanState::Finished => "FINISHED",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_numeric_conversions() {
        assert_eq!(Value::from(3).as_f64().unwrap(), 3.0);
        assert_eq!(f64::try_from(Value::Float(2.5)).unwrap(), 2.5);
        assert!(Value::from("x").as_f64().is_err());
        assert!(i64::try_from(Value::Float(1.0)).is_err());
    }

    #[test]
    fn test_value_components() {
        let position = Value::from(vec![1.0, 2.0]);
        assert_eq!(position.components().len(), 2);
        let scalar = Value::Int(4);
        assert_eq!(scalar.components(), vec![&Value::Int(4)]);
    }

    #[test]
    fn test_value_display() {
        let value = Value::Array(vec![Value::Int(1), Value::Float(2.5), Value::Null]);
        assert_eq!(value.to_string(), "[1, 2.5, null]");
    }

    #[test]
    fn test_approx_eq() {
        assert!(Value::Float(1.0).approx_eq(&Value::Int(1), 1e-9));
        assert!(!Value::Float(1.1).approx_eq(&Value::Int(1), 0.01));
        assert!(Value::from("a").approx_eq(&Value::from("a"), 0.0));
    }

    #[test]
    fn test_single_readable_is_unwrapped() {
        let single = Measurement::from_values(vec![Value::Int(7)]);
        assert_eq!(single, Measurement::Single(Value::Int(7)));
        let multi = Measurement::from_values(vec![Value::Int(7), Value::Int(8)]);
        assert_eq!(multi.len(), 2);
        assert_eq!(multi.get(1), Some(&Value::Int(8)));
    }

    #[test]
    fn test_measurement_serializes_without_tags() {
        let data = PositionData::Repeated(vec![
            Measurement::Single(Value::Int(1)),
            Measurement::Multi(vec![Value::Int(2), Value::from("a")]),
        ]);
        let json = serde_json::to_string(&data).unwrap();
        assert_eq!(json, r#"[1,[2,"a"]]"#);
    }

    #[test]
    fn test_terminal_states() {
        assert!(ScanState::Aborted.is_terminal());
        assert!(ScanState::Finished.is_terminal());
        assert!(!ScanState::Paused.is_terminal());
        assert_eq!(ScanState::Running.to_string(), "RUNNING");
    }
}
