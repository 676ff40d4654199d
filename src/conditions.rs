use crate::acquisition::Validator;
use crate::error::{Result, ScanError};
use crate::points::SharedPoints;
use crate::stream::{FieldSpec, SharedStreamReader};
use crate::types::{Measurement, Position, Value};
use log::{debug, warn};

type CheckFn = Box<dyn FnMut(&Position, &Measurement) -> Result<bool>>;

enum Check {
    PointEquals { points: SharedPoints, id: String },
    StreamFieldEquals { reader: SharedStreamReader, field: String },
    Function(CheckFn),
}

/// A named check evaluated against every measurement
pub struct Condition {
    name: String,
    check: Check,
    expected: Value,
    tolerance: f64,
}

impl Condition {
    /// Holds while the point reads `expected`
    pub fn point_equals(
        name: impl Into<String>,
        points: SharedPoints,
        id: impl Into<String>,
        expected: impl Into<Value>,
    ) -> Self {
        Self {
            name: name.into(),
            check: Check::PointEquals {
                points,
                id: id.into(),
            },
            expected: expected.into(),
            tolerance: 0.0,
        }
    }

    /// Holds while `field` of the message behind the last stream read equals `expected`
    pub fn stream_field_equals(
        name: impl Into<String>,
        reader: SharedStreamReader,
        field: impl Into<String>,
        expected: impl Into<Value>,
    ) -> Self {
        Self {
            name: name.into(),
            check: Check::StreamFieldEquals {
                reader,
                field: field.into(),
            },
            expected: expected.into(),
            tolerance: 0.0,
        }
    }

    pub fn function(
        name: impl Into<String>,
        check: impl FnMut(&Position, &Measurement) -> Result<bool> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            check: Check::Function(Box::new(check)),
            expected: Value::Bool(true),
            tolerance: 0.0,
        }
    }

    /// Numeric comparisons accept values within `tolerance`
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn evaluate(&mut self, position: &Position, measurement: &Measurement) -> Result<bool> {
        let actual = match &mut self.check {
            Check::PointEquals { points, id } => points.lock().get(id)?,
            Check::StreamFieldEquals { reader, field } => {
                let spec = FieldSpec::new(field.as_str());
                reader
                    .lock()
                    .read_cached(std::slice::from_ref(&spec))?
                    .into_iter()
                    .next()
                    .ok_or_else(|| ScanError::MissingField(field.clone()))?
            }
            Check::Function(check) => return check(position, measurement),
        };

        let holds = actual.approx_eq(&self.expected, self.tolerance);
        if !holds {
            debug!(
                "Condition '{}' expected {} but got {actual}",
                self.name, self.expected
            );
        }
        Ok(holds)
    }
}

/// All conditions must hold for a measurement to be accepted
#[derive(Default)]
pub struct Conditions {
    conditions: Vec<Condition>,
}

impl Conditions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Evaluate in order, stopping at the first failure
    ///
    /// A condition that cannot be evaluated counts as failed so the
    /// measurement is retried.
    pub fn check(&mut self, position: &Position, measurement: &Measurement) -> bool {
        for condition in &mut self.conditions {
            match condition.evaluate(position, measurement) {
                Ok(true) => {}
                Ok(false) => {
                    warn!("Condition '{}' failed at position {position}", condition.name);
                    return false;
                }
                Err(e) => {
                    warn!(
                        "Condition '{}' could not be evaluated at position {position}: {e}",
                        condition.name
                    );
                    return false;
                }
            }
        }
        true
    }

    pub fn into_validator(mut self) -> Validator {
        Box::new(move |position: &Position, measurement: &Measurement| {
            self.check(position, measurement)
        })
    }
}
