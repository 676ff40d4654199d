use crate::error::{Result, ScanError};
use crate::scanner::ScanControl;
use crate::types::Position;
use log::error;
use std::fmt;

/// Runs once before the first or after the last position
pub type ControlHook = Box<dyn FnMut(&ScanControl) -> Result<()>>;

/// Runs at a fixed point of every position iteration
pub type PositionHook = Box<dyn FnMut(&Position) -> Result<()>>;

/// Optional callbacks around the scan and each position
#[derive(Default)]
pub struct Hooks {
    pub initialization: Option<ControlHook>,
    pub finalization: Option<ControlHook>,
    pub before_move: Option<PositionHook>,
    pub after_move: Option<PositionHook>,
    pub before_measurement: Option<PositionHook>,
    pub after_measurement: Option<PositionHook>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("initialization", &self.initialization.is_some())
            .field("finalization", &self.finalization.is_some())
            .field("before_move", &self.before_move.is_some())
            .field("after_move", &self.after_move.is_some())
            .field("before_measurement", &self.before_measurement.is_some())
            .field("after_measurement", &self.after_measurement.is_some())
            .finish()
    }
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initialization(
        mut self,
        hook: impl FnMut(&ScanControl) -> Result<()> + 'static,
    ) -> Self {
        self.initialization = Some(Box::new(hook));
        self
    }

    pub fn with_finalization(
        mut self,
        hook: impl FnMut(&ScanControl) -> Result<()> + 'static,
    ) -> Self {
        self.finalization = Some(Box::new(hook));
        self
    }

    pub fn with_before_move(mut self, hook: impl FnMut(&Position) -> Result<()> + 'static) -> Self {
        self.before_move = Some(Box::new(hook));
        self
    }

    pub fn with_after_move(mut self, hook: impl FnMut(&Position) -> Result<()> + 'static) -> Self {
        self.after_move = Some(Box::new(hook));
        self
    }

    pub fn with_before_measurement(
        mut self,
        hook: impl FnMut(&Position) -> Result<()> + 'static,
    ) -> Self {
        self.before_measurement = Some(Box::new(hook));
        self
    }

    pub fn with_after_measurement(
        mut self,
        hook: impl FnMut(&Position) -> Result<()> + 'static,
    ) -> Self {
        self.after_measurement = Some(Box::new(hook));
        self
    }
}

/// Wrap a hook failure so the caller can tell which hook failed
///
/// A hook returning [`ScanError::UserAbort`] requests an abort and is passed through.
fn wrap(hook: &'static str, err: ScanError) -> ScanError {
    if err.is_user_abort() {
        return err;
    }
    error!("Hook '{hook}' failed: {err}");
    ScanError::Hook {
        hook,
        source: Box::new(err),
    }
}

pub(crate) fn run_control(
    hook: &mut Option<ControlHook>,
    name: &'static str,
    control: &ScanControl,
) -> Result<()> {
    match hook {
        Some(hook) => hook(control).map_err(|e| wrap(name, e)),
        None => Ok(()),
    }
}

pub(crate) fn run_position(
    hook: &mut Option<PositionHook>,
    name: &'static str,
    position: &Position,
) -> Result<()> {
    match hook {
        Some(hook) => hook(position).map_err(|e| wrap(name, e)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    #[test]
    fn test_missing_hook_is_noop() {
        let mut hooks = Hooks::new();
        assert!(run_position(&mut hooks.before_move, "before_move", &Value::Null).is_ok());
        assert!(run_control(&mut hooks.finalization, "finalization", &ScanControl::new()).is_ok());
    }

    #[test]
    fn test_failure_is_wrapped_with_name() {
        let mut hooks =
            Hooks::new().with_after_move(|_| Err(ScanError::Point("motor offline".to_string())));

        let err = run_position(&mut hooks.after_move, "after_move", &Value::Int(1)).unwrap_err();
        match err {
            ScanError::Hook { hook, source } => {
                assert_eq!(hook, "after_move");
                assert!(matches!(*source, ScanError::Point(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_abort_request_passes_through() {
        let mut hooks = Hooks::new().with_before_measurement(|_| Err(ScanError::UserAbort));
        let err = run_position(&mut hooks.before_measurement, "before_measurement", &Value::Null)
            .unwrap_err();
        assert!(err.is_user_abort());
    }

    #[test]
    fn test_debug_lists_configured_hooks() {
        let hooks = Hooks::new().with_initialization(|_| Ok(()));
        let text = format!("{hooks:?}");
        assert!(text.contains("initialization: true"));
        assert!(text.contains("finalization: false"));
    }
}
