use std::time::Duration;

use thiserror::Error;

use crate::types::Value;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error(
        "Number of maximum read attempts ({limit}) exceeded. Cannot read valid data at position {position}."
    )]
    ValidationExceeded { limit: u32, position: Value },
    #[error(
        "Read timeout exceeded for stream ({timeout:?}). Could not find a fresh message in time."
    )]
    AcquisitionTimeout { timeout: Duration },
    #[error("Property '{0}' missing in stream.")]
    MissingField(String),
    #[error("User aborted scan.")]
    UserAbort,
    #[error("Hook '{hook}' failed: {source}")]
    Hook {
        hook: &'static str,
        #[source]
        source: Box<ScanError>,
    },
    #[error("Message cache is empty, cannot read fields {0:?}.")]
    EmptyCache(Vec<String>),
    #[error("IO error ({context}): {source}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },
    #[error("Type error: {0}")]
    Type(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Point access error: {0}")]
    Point(String),
    #[error("Condition failed: {0}")]
    Condition(String),
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ScanError {
    /// True for the control signal raised when the user aborts a scan
    pub fn is_user_abort(&self) -> bool {
        matches!(self, ScanError::UserAbort)
    }

    pub(crate) fn io(source: std::io::Error, context: impl Into<String>) -> Self {
        ScanError::Io {
            source,
            context: context.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_field_message() {
        let err = ScanError::MissingField("CAMERA1:X".to_string());
        assert_eq!(err.to_string(), "Property 'CAMERA1:X' missing in stream.");
    }

    #[test]
    fn test_user_abort_is_distinguishable() {
        assert!(ScanError::UserAbort.is_user_abort());
        let err = ScanError::ValidationExceeded {
            limit: 3,
            position: Value::Float(1.5),
        };
        assert!(!err.is_user_abort());
        assert!(err.to_string().contains("(3)"));
        assert!(err.to_string().contains("1.5"));
    }

    #[test]
    fn test_hook_error_keeps_source() {
        let err = ScanError::Hook {
            hook: "finalization",
            source: Box::new(ScanError::Point("PUMP:SET unreachable".to_string())),
        };
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(
            source.as_deref(),
            Some("Point access error: PUMP:SET unreachable")
        );
    }
}
