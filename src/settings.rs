use crate::error::{Result, ScanError};
use crate::stream::{MessageFilter, MessageSource, MissingFieldPolicy, SynchronizedReader};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Called with `(positions_done, total_positions)`
pub type ProgressCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Immutable configuration of one scan
#[derive(Clone)]
pub struct ScanSettings {
    pub measurements_per_position: u32,
    pub measurement_interval: Duration,
    pub settling_time: Duration,
    pub progress_callback: Option<ProgressCallback>,
    pub acquisition_retry_limit: u32,
    pub acquisition_retry_delay: Duration,
    pub stream_read_timeout: Duration,
    pub stream_receive_timeout: Duration,
    pub pause_poll_interval: Duration,
    pub stream_read_filter: Option<MessageFilter>,
    pub missing_field_default: MissingFieldPolicy,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            measurements_per_position: 1,
            measurement_interval: Duration::ZERO,
            settling_time: Duration::ZERO,
            progress_callback: None,
            acquisition_retry_limit: 3,
            acquisition_retry_delay: Duration::from_secs(1),
            stream_read_timeout: Duration::from_secs(10),
            stream_receive_timeout: Duration::from_millis(100),
            pause_poll_interval: Duration::from_millis(100),
            stream_read_filter: None,
            missing_field_default: MissingFieldPolicy::Raise,
        }
    }
}

impl fmt::Debug for ScanSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanSettings")
            .field("measurements_per_position", &self.measurements_per_position)
            .field("measurement_interval", &self.measurement_interval)
            .field("settling_time", &self.settling_time)
            .field("progress_callback", &self.progress_callback.is_some())
            .field("acquisition_retry_limit", &self.acquisition_retry_limit)
            .field("acquisition_retry_delay", &self.acquisition_retry_delay)
            .field("stream_read_timeout", &self.stream_read_timeout)
            .field("stream_receive_timeout", &self.stream_receive_timeout)
            .field("pause_poll_interval", &self.pause_poll_interval)
            .field("stream_read_filter", &self.stream_read_filter.is_some())
            .field("missing_field_default", &self.missing_field_default)
            .finish()
    }
}

impl ScanSettings {
    pub fn with_measurements(mut self, measurements_per_position: u32, interval: Duration) -> Self {
        self.measurements_per_position = measurements_per_position;
        self.measurement_interval = interval;
        self
    }

    pub fn with_settling_time(mut self, settling_time: Duration) -> Self {
        self.settling_time = settling_time;
        self
    }

    pub fn with_progress(
        mut self,
        callback: impl Fn(usize, usize) + Send + Sync + 'static,
    ) -> Self {
        self.progress_callback = Some(Arc::new(callback));
        self
    }

    pub fn with_retry(mut self, limit: u32, delay: Duration) -> Self {
        self.acquisition_retry_limit = limit;
        self.acquisition_retry_delay = delay;
        self
    }

    pub fn with_stream_timeouts(
        mut self,
        read_timeout: Duration,
        receive_timeout: Duration,
    ) -> Self {
        self.stream_read_timeout = read_timeout;
        self.stream_receive_timeout = receive_timeout;
        self
    }

    pub fn with_pause_poll_interval(mut self, interval: Duration) -> Self {
        self.pause_poll_interval = interval;
        self
    }

    pub fn with_stream_filter(
        mut self,
        filter: impl Fn(&crate::stream::SynchronizedMessage) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.stream_read_filter = Some(Arc::new(filter));
        self
    }

    pub fn with_missing_field_default(mut self, policy: MissingFieldPolicy) -> Self {
        self.missing_field_default = policy;
        self
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.measurements_per_position == 0 {
            return Err(ScanError::InvalidSettings(
                "measurements_per_position must be at least 1".to_string(),
            ));
        }
        if self.acquisition_retry_limit == 0 {
            return Err(ScanError::InvalidSettings(
                "acquisition_retry_limit must be at least 1".to_string(),
            ));
        }
        if self.stream_receive_timeout.is_zero() {
            return Err(ScanError::InvalidSettings(
                "stream_receive_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn report_progress(&self, done: usize, total: usize) {
        if let Some(callback) = &self.progress_callback {
            callback(done, total);
        }
    }

    /// Synchronized reader over `source` with this scan's stream knobs applied
    pub fn stream_reader(&self, source: impl MessageSource + 'static) -> SynchronizedReader {
        SynchronizedReader::new(source)
            .with_filter(self.stream_read_filter.clone())
            .with_default_policy(self.missing_field_default.clone())
            .with_receive_timeout(self.stream_receive_timeout)
            .with_read_timeout(self.stream_read_timeout)
    }
}

/// File-loadable subset of [`ScanSettings`]; durations are in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub measurements_per_position: u32,
    pub measurement_interval_ms: u64,
    pub settling_time_ms: u64,
    pub acquisition_retry_limit: u32,
    pub acquisition_retry_delay_ms: u64,
    pub stream_read_timeout_ms: u64,
    pub stream_receive_timeout_ms: u64,
    pub pause_poll_interval_ms: u64,
    /// Substituted for missing stream fields; unset means missing fields raise
    pub missing_field_default: Option<crate::types::Value>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        let settings = ScanSettings::default();
        Self {
            measurements_per_position: settings.measurements_per_position,
            measurement_interval_ms: settings.measurement_interval.as_millis() as u64,
            settling_time_ms: settings.settling_time.as_millis() as u64,
            acquisition_retry_limit: settings.acquisition_retry_limit,
            acquisition_retry_delay_ms: settings.acquisition_retry_delay.as_millis() as u64,
            stream_read_timeout_ms: settings.stream_read_timeout.as_millis() as u64,
            stream_receive_timeout_ms: settings.stream_receive_timeout.as_millis() as u64,
            pause_poll_interval_ms: settings.pause_poll_interval.as_millis() as u64,
            missing_field_default: None,
        }
    }
}

impl ScanConfig {
    pub fn to_settings(&self) -> ScanSettings {
        ScanSettings {
            measurements_per_position: self.measurements_per_position,
            measurement_interval: Duration::from_millis(self.measurement_interval_ms),
            settling_time: Duration::from_millis(self.settling_time_ms),
            acquisition_retry_limit: self.acquisition_retry_limit,
            acquisition_retry_delay: Duration::from_millis(self.acquisition_retry_delay_ms),
            stream_read_timeout: Duration::from_millis(self.stream_read_timeout_ms),
            stream_receive_timeout: Duration::from_millis(self.stream_receive_timeout_ms),
            pause_poll_interval: Duration::from_millis(self.pause_poll_interval_ms),
            missing_field_default: match &self.missing_field_default {
                Some(value) => MissingFieldPolicy::UseDefault(value.clone()),
                None => MissingFieldPolicy::Raise,
            },
            ..ScanSettings::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;
    use parking_lot::Mutex;

    #[test]
    fn test_defaults_are_valid() {
        assert!(ScanSettings::default().validate().is_ok());
    }

    #[test]
    fn test_zero_measurements_rejected() {
        let settings = ScanSettings::default().with_measurements(0, Duration::ZERO);
        assert!(matches!(settings.validate(), Err(ScanError::InvalidSettings(_))));
        let settings = ScanSettings::default().with_retry(0, Duration::ZERO);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_progress_callback_invoked() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let calls_clone = calls.clone();
        let settings = ScanSettings::default()
            .with_progress(move |done, total| calls_clone.lock().push((done, total)));

        settings.report_progress(0, 2);
        settings.clone().report_progress(1, 2);

        assert_eq!(*calls.lock(), vec![(0, 2), (1, 2)]);
    }

    #[test]
    fn test_config_round_trips_into_settings() {
        let config = ScanConfig {
            measurements_per_position: 3,
            measurement_interval_ms: 250,
            missing_field_default: Some(Value::Int(-999)),
            ..ScanConfig::default()
        };
        let settings = config.to_settings();

        assert_eq!(settings.measurements_per_position, 3);
        assert_eq!(settings.measurement_interval, Duration::from_millis(250));
        assert_eq!(
            settings.missing_field_default,
            MissingFieldPolicy::UseDefault(Value::Int(-999))
        );
        assert_eq!(settings.acquisition_retry_limit, 3);
    }

    #[test]
    fn test_debug_hides_callbacks() {
        let settings = ScanSettings::default().with_progress(|_, _| {});
        let text = format!("{settings:?}");
        assert!(text.contains("progress_callback: true"));
        assert!(text.contains("stream_read_filter: false"));
    }
}
