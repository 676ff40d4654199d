//! Reusable hook bodies operating on the point backend
//!
//! Actions are plain fallible closures. [`sequence`] and [`per_position`]
//! turn a list of them into a scan hook, run in order and stopping at the
//! first failure.

use crate::error::Result;
use crate::hooks::{ControlHook, PositionHook};
use crate::points::{snapshot, SharedPoints};
use crate::scanner::ScanControl;
use crate::types::{Position, Value};
use log::{debug, info};

pub type Action = Box<dyn FnMut() -> Result<()>>;

/// Write a fixed value to a point
pub fn set_point(points: SharedPoints, id: impl Into<String>, value: impl Into<Value>) -> Action {
    let id = id.into();
    let value = value.into();
    Box::new(move || {
        debug!("Setting {id} to {value}");
        points.lock().put(&id, value.clone())
    })
}

/// Capture the current values of `ids` and return an action writing them back
///
/// The snapshot is taken when this is called, so build it before the scan
/// starts moving anything.
pub fn restore_points(points: SharedPoints, ids: &[&str]) -> Result<Action> {
    let ids: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
    let saved = snapshot(&points, &ids)?;
    info!("Captured {} point values for restore", saved.len());

    Ok(Box::new(move || {
        let mut points = points.lock();
        for (id, value) in &saved {
            points.put(id, value.clone())?;
        }
        info!("Restored {} points", saved.len());
        Ok(())
    }))
}

/// Run actions in order as an initialization or finalization hook
pub fn sequence(mut actions: Vec<Action>) -> ControlHook {
    Box::new(move |_control: &ScanControl| actions.iter_mut().try_for_each(|action| action()))
}

/// Run actions in order at every position
pub fn per_position(mut actions: Vec<Action>) -> PositionHook {
    Box::new(move |_position: &Position| actions.iter_mut().try_for_each(|action| action()))
}
