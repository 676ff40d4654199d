use std::time::{Duration, Instant};

use crate::error::ScanError;

/// Error type for polling operations
#[derive(Debug)]
pub enum PollError<E> {
    /// Operation timed out
    Timeout,
    /// Error occurred in the condition/operation function
    ConditionError(E),
}

impl<E> std::fmt::Display for PollError<E>
where
    E: std::fmt::Display,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PollError::Timeout => write!(f, "Operation timed out"),
            PollError::ConditionError(e) => write!(f, "Condition error: {}", e),
        }
    }
}

impl<E> std::error::Error for PollError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PollError::Timeout => None,
            PollError::ConditionError(e) => Some(e),
        }
    }
}

impl From<PollError<ScanError>> for ScanError {
    fn from(value: PollError<ScanError>) -> Self {
        match value {
            PollError::Timeout => ScanError::Protocol("Operation timed out".to_string()),
            PollError::ConditionError(e) => e,
        }
    }
}

/// Poll a condition with timeout
///
/// Repeatedly calls `condition` until it returns `Ok(true)` or timeout is reached.
///
/// # Arguments
/// * `condition` - Function that returns `Ok(true)` when complete, `Ok(false)` to continue polling
/// * `timeout` - Maximum duration to wait
/// * `poll_interval` - Duration to sleep between condition checks
///
/// # Example
/// ```
/// use std::time::Duration;
/// use rusty_scan::points::{MemoryPoints, PointAccess};
/// use rusty_scan::utils::poll_until;
///
/// let mut points = MemoryPoints::new().with_point("MOTOR:GET", 1.0);
/// poll_until(
///     || points.get("MOTOR:GET").and_then(|v| v.as_f64()).map(|v| v >= 1.0),
///     Duration::from_secs(1),
///     Duration::from_millis(10),
/// )?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn poll_until<F, E>(
    mut condition: F,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<(), PollError<E>>
where
    F: FnMut() -> Result<bool, E>,
{
    let start = Instant::now();

    loop {
        if start.elapsed() >= timeout {
            return Err(PollError::Timeout);
        }

        match condition() {
            Ok(true) => return Ok(()),
            Ok(false) => sleep_for(poll_interval),
            Err(e) => return Err(PollError::ConditionError(e)),
        }
    }
}

/// Poll with timeout for operations that may return a result
///
/// Repeatedly calls `operation` until it returns `Ok(Some(T))` or timeout is reached.
/// A zero `poll_interval` re-polls immediately, for operations that block on their own.
///
/// # Returns
/// * `Ok(Some(T))` when operation returns `Ok(Some(T))`
/// * `Ok(None)` when timeout is reached
/// * `Err(PollError::ConditionError(e))` when operation returns an error
///
/// # Example
/// ```
/// use std::time::Duration;
/// use rusty_scan::utils::poll_with_timeout;
///
/// let mut attempts = 0;
/// let result = poll_with_timeout(
///     || {
///         attempts += 1;
///         Ok::<_, &str>(if attempts >= 3 { Some(attempts) } else { None })
///     },
///     Duration::from_secs(1),
///     Duration::from_millis(10),
/// );
///
/// assert_eq!(result.unwrap(), Some(3));
/// ```
pub fn poll_with_timeout<F, T, E>(
    mut operation: F,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<Option<T>, PollError<E>>
where
    F: FnMut() -> Result<Option<T>, E>,
{
    let start = Instant::now();

    loop {
        if start.elapsed() >= timeout {
            return Ok(None);
        }

        match operation() {
            Ok(Some(result)) => return Ok(Some(result)),
            Ok(None) => sleep_for(poll_interval),
            Err(e) => return Err(PollError::ConditionError(e)),
        }
    }
}

/// Sleep unless the duration is zero
pub fn sleep_for(duration: Duration) {
    if !duration.is_zero() {
        std::thread::sleep(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_until_success() {
        let mut count = 0;

        let result = poll_until(
            || {
                count += 1;
                Ok::<bool, &str>(count >= 3)
            },
            Duration::from_millis(500),
            Duration::from_millis(10),
        );

        assert!(result.is_ok());
        assert!(count >= 3);
    }

    #[test]
    fn test_poll_until_timeout() {
        let result = poll_until(
            || Ok::<bool, &str>(false),
            Duration::from_millis(50),
            Duration::from_millis(10),
        );

        assert!(matches!(result, Err(PollError::Timeout)));
    }

    #[test]
    fn test_poll_until_error() {
        let result = poll_until(
            || Err::<bool, &str>("test error"),
            Duration::from_millis(100),
            Duration::from_millis(10),
        );

        assert!(matches!(result, Err(PollError::ConditionError("test error"))));
    }

    #[test]
    fn test_poll_with_timeout_zero_interval() {
        let mut count = 0;
        let result = poll_with_timeout(
            || {
                count += 1;
                Ok::<Option<i32>, &str>(if count >= 5 { Some(count) } else { None })
            },
            Duration::from_millis(500),
            Duration::ZERO,
        );

        assert_eq!(result.unwrap(), Some(5));
    }

    #[test]
    fn test_poll_with_timeout_timeout() {
        let result = poll_with_timeout(
            || Ok::<Option<()>, &str>(None),
            Duration::from_millis(50),
            Duration::from_millis(10),
        );

        assert_eq!(result.unwrap(), None);
    }

    #[test]
    fn test_poll_error_converts_into_scan_error() {
        let err: ScanError = PollError::ConditionError(ScanError::Point("x".into())).into();
        assert!(matches!(err, ScanError::Point(_)));
        let err: ScanError = PollError::<ScanError>::Timeout.into();
        assert!(matches!(err, ScanError::Protocol(_)));
    }
}
