//! Step-scan engine
//!
//! [`Scanner::run`] visits every position of a [`Positioner`] in order:
//! move, settle, acquire, hand the data to the processor, report progress
//! and finally check the control signals. Pause and abort requests come in
//! through a [`ScanControl`] handle from any thread and are only acted upon
//! at that checkpoint, so a position is never left half-processed.

use crate::acquisition::{Acquisition, Validator};
use crate::conditions::Conditions;
use crate::error::{Result, ScanError};
use crate::hooks::{run_control, run_position, Hooks};
use crate::positioner::Positioner;
use crate::processor::DataProcessor;
use crate::readers::{Reader, Writer};
use crate::settings::ScanSettings;
use crate::types::{Measurement, Position, ScanState};
use crate::utils::sleep_for;
use log::{debug, error, info, warn};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
struct ControlState {
    status: ScanState,
    pause: bool,
    abort: bool,
}

/// Cloneable handle to pause, resume, abort and observe a scan
#[derive(Debug, Clone)]
pub struct ScanControl {
    inner: Arc<(Mutex<ControlState>, Condvar)>,
}

impl Default for ScanControl {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanControl {
    pub fn new() -> Self {
        Self {
            inner: Arc::new((
                Mutex::new(ControlState {
                    status: ScanState::Initialized,
                    pause: false,
                    abort: false,
                }),
                Condvar::new(),
            )),
        }
    }

    /// Pause after the current position completes
    pub fn pause(&self) {
        self.inner.0.lock().pause = true;
        info!("Scan pause requested");
    }

    pub fn resume(&self) {
        let (lock, condvar) = &*self.inner;
        lock.lock().pause = false;
        condvar.notify_all();
        info!("Scan resume requested");
    }

    /// Abort after the current position completes; also ends a pause
    pub fn abort(&self) {
        let (lock, condvar) = &*self.inner;
        lock.lock().abort = true;
        condvar.notify_all();
        info!("Scan abort requested");
    }

    pub fn status(&self) -> ScanState {
        self.inner.0.lock().status
    }

    pub fn is_abort_requested(&self) -> bool {
        self.inner.0.lock().abort
    }

    pub fn is_pause_requested(&self) -> bool {
        self.inner.0.lock().pause
    }

    fn set_status(&self, status: ScanState) {
        self.inner.0.lock().status = status;
    }

    /// Terminal transition; an aborted scan stays aborted
    fn finish(&self) {
        let mut state = self.inner.0.lock();
        if state.status != ScanState::Aborted {
            state.status = ScanState::Finished;
        }
    }

    /// Act on pending signals
    ///
    /// Abort wins over pause, also while paused. `poll_interval` bounds each
    /// condvar wait.
    fn checkpoint(&self, poll_interval: Duration) -> Result<()> {
        let (lock, condvar) = &*self.inner;
        let mut state = lock.lock();

        if state.abort {
            state.status = ScanState::Aborted;
            return Err(ScanError::UserAbort);
        }

        if state.pause {
            state.status = ScanState::Paused;
            info!("Scan paused");

            while state.pause && !state.abort {
                if poll_interval.is_zero() {
                    condvar.wait(&mut state);
                } else {
                    condvar.wait_for(&mut state, poll_interval);
                }
            }

            if state.abort {
                state.status = ScanState::Aborted;
                warn!("Scan aborted while paused");
                return Err(ScanError::UserAbort);
            }

            state.status = ScanState::Running;
            info!("Scan resumed");
        }

        Ok(())
    }
}

/// A single step scan over `P`, collecting data into `D`
///
/// An engine runs once; build a new one for the next scan.
pub struct Scanner<P, D>
where
    P: Positioner,
    D: DataProcessor,
{
    positioner: P,
    reader: Box<dyn Reader>,
    processor: D,
    writer: Option<Box<dyn Writer>>,
    validator: Option<Validator>,
    hooks: Hooks,
    settings: ScanSettings,
    control: ScanControl,
    started: bool,
}

impl<P, D> Scanner<P, D>
where
    P: Positioner,
    D: DataProcessor,
{
    pub fn new(positioner: P, reader: impl Reader + 'static, processor: D) -> Self {
        Self {
            positioner,
            reader: Box::new(reader),
            processor,
            writer: None,
            validator: None,
            hooks: Hooks::default(),
            settings: ScanSettings::default(),
            control: ScanControl::new(),
            started: false,
        }
    }

    pub fn with_writer(mut self, writer: impl Writer + 'static) -> Self {
        self.writer = Some(Box::new(writer));
        self
    }

    /// Measurements rejected by `validator` are re-acquired
    pub fn with_validator(
        mut self,
        validator: impl FnMut(&Position, &Measurement) -> bool + 'static,
    ) -> Self {
        self.validator = Some(Box::new(validator));
        self
    }

    pub fn with_conditions(mut self, conditions: Conditions) -> Self {
        self.validator = Some(conditions.into_validator());
        self
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_settings(mut self, settings: ScanSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Handle for controlling this scan from other threads
    pub fn control(&self) -> ScanControl {
        self.control.clone()
    }

    pub fn settings(&self) -> &ScanSettings {
        &self.settings
    }

    pub fn pause(&self) {
        self.control.pause();
    }

    pub fn resume(&self) {
        self.control.resume();
    }

    pub fn abort(&self) {
        self.control.abort();
    }

    pub fn status(&self) -> ScanState {
        self.control.status()
    }

    /// Run the scan to completion and return the processor's data
    ///
    /// Finalization runs whatever happens. A user abort is not an error: the
    /// data gathered so far is returned and the status stays `Aborted`.
    pub fn run(&mut self) -> Result<D::Output> {
        if self.started {
            return Err(ScanError::InvalidState(format!(
                "Scan already ran (status {}); create a new scanner",
                self.control.status()
            )));
        }
        self.settings.validate()?;
        self.started = true;
        self.control.set_status(ScanState::Running);

        let outcome = self.scan_positions();
        if matches!(&outcome, Err(e) if e.is_user_abort()) {
            self.control.set_status(ScanState::Aborted);
        }

        let finalization = run_control(&mut self.hooks.finalization, "finalization", &self.control);
        self.control.finish();

        let outcome = match (outcome, finalization) {
            (Ok(()), Ok(())) => Ok(()),
            (Ok(()), Err(fin)) => Err(fin),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(fin)) if e.is_user_abort() => Err(fin),
            (Err(e), Err(fin)) => {
                error!("Finalization failed after scan error: {fin}");
                Err(e)
            }
        };

        match outcome {
            Ok(()) => info!("Scan finished"),
            Err(e) if e.is_user_abort() => info!("Scan aborted by user"),
            Err(e) => {
                error!("Scan failed: {e}");
                return Err(e);
            }
        }

        self.processor.data()
    }

    fn scan_positions(&mut self) -> Result<()> {
        let total = self.positioner.count();
        info!("Starting scan over {total} positions");
        self.settings.report_progress(0, total);

        run_control(&mut self.hooks.initialization, "initialization", &self.control)?;

        let acquisition = Acquisition::from_settings(&self.settings);
        let mut accept_all = |_: &Position, _: &Measurement| true;

        for (index, position) in (1..).zip(self.positioner.positions()) {
            debug!("Position {index}/{total}: {position}");

            run_position(&mut self.hooks.before_move, "before_move", &position)?;
            if let Some(writer) = &mut self.writer {
                writer.write(&position)?;
            }
            sleep_for(self.settings.settling_time);
            run_position(&mut self.hooks.after_move, "after_move", &position)?;

            run_position(
                &mut self.hooks.before_measurement,
                "before_measurement",
                &position,
            )?;
            let validator: &mut dyn FnMut(&Position, &Measurement) -> bool =
                match &mut self.validator {
                    Some(validator) => validator.as_mut(),
                    None => &mut accept_all,
                };
            let data = acquisition.acquire(&position, self.reader.as_mut(), validator)?;
            self.processor.process(&position, &data)?;
            run_position(
                &mut self.hooks.after_measurement,
                "after_measurement",
                &position,
            )?;

            self.settings.report_progress(index, total);
            self.control.checkpoint(self.settings.pause_poll_interval)?;
        }

        Ok(())
    }
}
