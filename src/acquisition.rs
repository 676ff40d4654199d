use crate::error::{Result, ScanError};
use crate::readers::Reader;
use crate::settings::ScanSettings;
use crate::types::{Measurement, Position, PositionData};
use crate::utils::sleep_for;
use log::{debug, warn};
use std::time::Duration;

/// Decides whether a measurement taken at a position is usable
pub type Validator = Box<dyn FnMut(&Position, &Measurement) -> bool>;

/// Read until `validator` accepts the measurement, at most `limit` attempts
///
/// Reader errors are not retried. The delay is only slept between attempts.
pub fn acquire(
    position: &Position,
    reader: &mut dyn Reader,
    validator: &mut dyn FnMut(&Position, &Measurement) -> bool,
    limit: u32,
    delay: Duration,
) -> Result<Measurement> {
    for attempt in 1..=limit {
        let measurement = reader.read()?;
        if validator(position, &measurement) {
            return Ok(measurement);
        }

        warn!("Invalid data at position {position} (attempt {attempt}/{limit})");
        if attempt < limit {
            sleep_for(delay);
        }
    }

    Err(ScanError::ValidationExceeded {
        limit,
        position: position.clone(),
    })
}

/// Per-position acquisition plan derived from the scan settings
#[derive(Debug, Clone, PartialEq)]
pub struct Acquisition {
    pub measurements_per_position: u32,
    pub measurement_interval: Duration,
    pub retry_limit: u32,
    pub retry_delay: Duration,
}

impl Acquisition {
    pub fn from_settings(settings: &ScanSettings) -> Self {
        Self {
            measurements_per_position: settings.measurements_per_position,
            measurement_interval: settings.measurement_interval,
            retry_limit: settings.acquisition_retry_limit,
            retry_delay: settings.acquisition_retry_delay,
        }
    }

    pub fn acquire_valid(
        &self,
        position: &Position,
        reader: &mut dyn Reader,
        validator: &mut dyn FnMut(&Position, &Measurement) -> bool,
    ) -> Result<Measurement> {
        acquire(position, reader, validator, self.retry_limit, self.retry_delay)
    }

    /// All measurements for one position
    pub fn acquire(
        &self,
        position: &Position,
        reader: &mut dyn Reader,
        validator: &mut dyn FnMut(&Position, &Measurement) -> bool,
    ) -> Result<PositionData> {
        if self.measurements_per_position <= 1 {
            return self
                .acquire_valid(position, reader, validator)
                .map(PositionData::Single);
        }

        let mut measurements = Vec::with_capacity(self.measurements_per_position as usize);
        for index in 0..self.measurements_per_position {
            if index > 0 {
                sleep_for(self.measurement_interval);
            }
            measurements.push(self.acquire_valid(position, reader, validator)?);
        }
        debug!(
            "Acquired {} measurements at position {position}",
            measurements.len()
        );
        Ok(PositionData::Repeated(measurements))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;
    use std::time::Instant;

    fn counting_reader(count: &mut u32) -> impl FnMut() -> Result<Measurement> + '_ {
        move || {
            *count += 1;
            Ok(Measurement::Single(Value::from(*count)))
        }
    }

    #[test]
    fn test_retry_limit_reached_after_exact_attempts() {
        let mut attempts = 0;
        let mut reader = counting_reader(&mut attempts);
        let delay = Duration::from_millis(20);

        let start = Instant::now();
        let result = acquire(&Value::Float(1.5), &mut reader, &mut |_, _| false, 3, delay);
        let elapsed = start.elapsed();
        drop(reader);

        match result {
            Err(ScanError::ValidationExceeded { limit, position }) => {
                assert_eq!(limit, 3);
                assert_eq!(position, Value::Float(1.5));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(attempts, 3);
        assert!(elapsed >= delay * 2);
    }

    #[test]
    fn test_valid_on_second_attempt() {
        let mut attempts = 0;
        let mut reader = counting_reader(&mut attempts);
        let measurement = acquire(
            &Value::Int(0),
            &mut reader,
            &mut |_, m| m.get(0) == Some(&Value::Int(2)),
            3,
            Duration::ZERO,
        )
        .unwrap();
        assert_eq!(measurement, Measurement::Single(Value::Int(2)));
    }

    #[test]
    fn test_reader_error_not_retried() {
        let mut calls = 0;
        let mut reader = || -> Result<Measurement> {
            calls += 1;
            Err(ScanError::MissingField("X".to_string()))
        };
        let result = acquire(&Value::Null, &mut reader, &mut |_, _| true, 5, Duration::ZERO);
        drop(reader);
        assert!(matches!(result, Err(ScanError::MissingField(_))));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_single_and_repeated_position_data() {
        let settings = ScanSettings::default().with_retry(1, Duration::ZERO);
        let single = Acquisition::from_settings(&settings);
        let mut attempts = 0;
        let mut reader = counting_reader(&mut attempts);
        let data = single.acquire(&Value::Null, &mut reader, &mut |_, _| true).unwrap();
        assert_eq!(data, PositionData::Single(Measurement::Single(Value::Int(1))));

        let repeated = Acquisition::from_settings(
            &settings.with_measurements(3, Duration::from_millis(1)),
        );
        let data = repeated.acquire(&Value::Null, &mut reader, &mut |_, _| true).unwrap();
        assert_eq!(
            data,
            PositionData::Repeated(vec![
                Measurement::Single(Value::Int(2)),
                Measurement::Single(Value::Int(3)),
                Measurement::Single(Value::Int(4)),
            ])
        );
    }
}
