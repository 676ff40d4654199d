use crate::error::{Result, ScanError};
use crate::readers::{split_position, Reader, Writer};
use crate::types::{Measurement, Position, Value};
use crate::utils::{poll_until, PollError};
use log::{debug, trace, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Named process variables that can be read and written
pub trait PointAccess: Send {
    fn get(&mut self, id: &str) -> Result<Value>;
    fn put(&mut self, id: &str, value: Value) -> Result<()>;
}

/// Point backend shared between readers, writers, conditions and actions
pub type SharedPoints = Arc<Mutex<dyn PointAccess>>;

/// In-memory point backend
///
/// Every put is recorded, so tests and the simulated runner can check what
/// was written and in which order. A linked readback follows its setpoint.
#[derive(Debug, Default, Clone)]
pub struct MemoryPoints {
    values: HashMap<String, Value>,
    history: HashMap<String, Vec<Value>>,
    links: HashMap<String, String>,
}

impl MemoryPoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_point(mut self, id: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(id.into(), value.into());
        self
    }

    /// Mirror every write to `setpoint` into `readback`
    pub fn with_link(mut self, setpoint: impl Into<String>, readback: impl Into<String>) -> Self {
        let (setpoint, readback) = (setpoint.into(), readback.into());
        let initial = self.values.get(&setpoint).cloned().unwrap_or_default();
        self.values.entry(readback.clone()).or_insert(initial);
        self.links.insert(setpoint, readback);
        self
    }

    /// Set a value without recording it as a write
    pub fn set(&mut self, id: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(id.into(), value.into());
    }

    pub fn contains(&self, id: &str) -> bool {
        self.values.contains_key(id)
    }

    pub fn last_written(&self, id: &str) -> Option<&Value> {
        self.history.get(id).and_then(|writes| writes.last())
    }

    pub fn writes(&self, id: &str) -> &[Value] {
        self.history.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn into_shared(self) -> Arc<Mutex<MemoryPoints>> {
        Arc::new(Mutex::new(self))
    }
}

impl PointAccess for MemoryPoints {
    fn get(&mut self, id: &str) -> Result<Value> {
        self.values
            .get(id)
            .cloned()
            .ok_or_else(|| ScanError::Point(format!("Unknown point '{id}'")))
    }

    fn put(&mut self, id: &str, value: Value) -> Result<()> {
        if !self.values.contains_key(id) {
            return Err(ScanError::Point(format!("Unknown point '{id}'")));
        }
        trace!("put {id} = {value}");
        if let Some(readback) = self.links.get(id) {
            self.values.insert(readback.clone(), value.clone());
        }
        self.history.entry(id.to_string()).or_default().push(value.clone());
        self.values.insert(id.to_string(), value);
        Ok(())
    }
}

/// Current values of `ids`, in order
pub fn snapshot(points: &SharedPoints, ids: &[String]) -> Result<Vec<(String, Value)>> {
    let mut points = points.lock();
    ids.iter()
        .map(|id| Ok((id.clone(), points.get(id)?)))
        .collect()
}

/// Reads a fixed list of points per measurement
pub struct PointReader {
    points: SharedPoints,
    ids: Vec<String>,
}

impl PointReader {
    pub fn new(points: SharedPoints, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            points,
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }
}

impl Reader for PointReader {
    fn read(&mut self) -> Result<Measurement> {
        let mut points = self.points.lock();
        let values = self
            .ids
            .iter()
            .map(|id| points.get(id))
            .collect::<Result<Vec<_>>>()?;
        Ok(Measurement::from_values(values))
    }
}

/// Writes positions to setpoints, optionally waiting for readbacks to settle
pub struct PointWriter {
    points: SharedPoints,
    setpoints: Vec<String>,
    readbacks: Vec<String>,
    tolerance: f64,
    move_timeout: Duration,
    poll_interval: Duration,
}

impl PointWriter {
    pub fn new(
        points: SharedPoints,
        setpoints: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            points,
            setpoints: setpoints.into_iter().map(Into::into).collect(),
            readbacks: Vec::new(),
            tolerance: 1e-6,
            move_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(10),
        }
    }

    /// Wait after each write until every readback matches its setpoint
    pub fn with_readbacks(
        mut self,
        readbacks: impl IntoIterator<Item = impl Into<String>>,
        tolerance: f64,
    ) -> Result<Self> {
        let readbacks: Vec<String> = readbacks.into_iter().map(Into::into).collect();
        if readbacks.len() != self.setpoints.len() {
            return Err(ScanError::InvalidSettings(format!(
                "{} readbacks configured for {} setpoints",
                readbacks.len(),
                self.setpoints.len()
            )));
        }
        self.readbacks = readbacks;
        self.tolerance = tolerance;
        Ok(self)
    }

    pub fn with_move_timeout(mut self, timeout: Duration, poll_interval: Duration) -> Self {
        self.move_timeout = timeout;
        self.poll_interval = poll_interval;
        self
    }

    fn wait_for_readbacks(&self, targets: &[Value]) -> Result<()> {
        let points = &self.points;
        let readbacks = &self.readbacks;
        let tolerance = self.tolerance;

        let result = poll_until(
            || -> Result<bool> {
                let mut points = points.lock();
                for (readback, target) in readbacks.iter().zip(targets) {
                    if !points.get(readback)?.approx_eq(target, tolerance) {
                        return Ok(false);
                    }
                }
                Ok(true)
            },
            self.move_timeout,
            self.poll_interval,
        );

        match result {
            Ok(()) => Ok(()),
            Err(PollError::Timeout) => {
                warn!("Readbacks {readbacks:?} did not reach {targets:?}");
                Err(ScanError::Protocol(format!(
                    "Move to {targets:?} not completed within {:?}",
                    self.move_timeout
                )))
            }
            Err(PollError::ConditionError(e)) => Err(e),
        }
    }
}

impl Writer for PointWriter {
    fn write(&mut self, position: &Position) -> Result<()> {
        let targets: Vec<Value> = split_position(position, self.setpoints.len())?
            .into_iter()
            .cloned()
            .collect();

        {
            let mut points = self.points.lock();
            for (id, value) in self.setpoints.iter().zip(&targets) {
                points.put(id, value.clone())?;
            }
        }

        if !self.readbacks.is_empty() {
            self.wait_for_readbacks(&targets)?;
        }
        debug!("Moved {:?} to {position}", self.setpoints);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_memory_points_records_writes() {
        let mut points = MemoryPoints::new().with_point("PYSCAN:TEST:MOTOR1:SET", 0.0);
        points.put("PYSCAN:TEST:MOTOR1:SET", Value::Float(1.0)).unwrap();
        points.put("PYSCAN:TEST:MOTOR1:SET", Value::Float(2.0)).unwrap();

        assert_eq!(points.writes("PYSCAN:TEST:MOTOR1:SET").len(), 2);
        assert_eq!(points.last_written("PYSCAN:TEST:MOTOR1:SET"), Some(&Value::Float(2.0)));
        assert!(points.put("UNKNOWN", Value::Null).is_err());
        assert!(!points.contains("UNKNOWN"));
        assert!(matches!(points.get("UNKNOWN"), Err(ScanError::Point(_))));
    }

    #[test]
    fn test_point_reader_reads_in_order() {
        let points: SharedPoints = MemoryPoints::new()
            .with_point("A", 1.0)
            .with_point("B", 2.0)
            .into_shared();
        let mut reader = PointReader::new(points.clone(), ["B", "A"]);
        assert_eq!(
            reader.read().unwrap(),
            Measurement::Multi(vec![Value::Float(2.0), Value::Float(1.0)])
        );

        let mut single = PointReader::new(points, ["A"]);
        assert_eq!(single.read().unwrap(), Measurement::Single(Value::Float(1.0)));
    }

    #[test]
    fn test_point_writer_waits_for_linked_readbacks() {
        let memory = MemoryPoints::new()
            .with_point("M1:SET", 0.0)
            .with_point("M2:SET", 0.0)
            .with_link("M1:SET", "M1:GET")
            .with_link("M2:SET", "M2:GET")
            .into_shared();
        let points: SharedPoints = memory.clone();

        let mut writer = PointWriter::new(points, ["M1:SET", "M2:SET"])
            .with_readbacks(["M1:GET", "M2:GET"], 0.01)
            .unwrap()
            .with_move_timeout(Duration::from_millis(200), Duration::from_millis(5));
        writer.write(&Value::from(vec![1.5, -2.0])).unwrap();

        let memory = memory.lock();
        assert_eq!(memory.last_written("M1:SET"), Some(&Value::Float(1.5)));
        assert_eq!(memory.last_written("M2:SET"), Some(&Value::Float(-2.0)));
    }

    #[test]
    fn test_point_writer_times_out_on_stuck_readback() {
        let memory = MemoryPoints::new()
            .with_point("M1:SET", 0.0)
            .with_point("M1:GET", 0.0)
            .into_shared();
        let mut writer = PointWriter::new(memory.clone() as SharedPoints, ["M1:SET"])
            .with_readbacks(["M1:GET"], 0.01)
            .unwrap()
            .with_move_timeout(Duration::from_millis(50), Duration::from_millis(5));

        assert!(matches!(writer.write(&Value::Float(3.0)), Err(ScanError::Protocol(_))));

        // a readback catching up late still completes the move
        let lagging = memory.clone();
        let mover = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            lagging.lock().set("M1:GET", 4.0);
        });
        let mut writer = writer.with_move_timeout(Duration::from_secs(1), Duration::from_millis(5));
        writer.write(&Value::Float(4.0)).unwrap();
        mover.join().unwrap();
    }

    #[test]
    fn test_readback_count_must_match() {
        let points: SharedPoints = MemoryPoints::new().with_point("A", 0.0).into_shared();
        assert!(PointWriter::new(points, ["A"]).with_readbacks(Vec::<String>::new(), 0.1).is_err());
    }

    #[test]
    fn test_snapshot_reads_current_values() {
        let points: SharedPoints = MemoryPoints::new()
            .with_point("A", 1)
            .with_point("B", "idle")
            .into_shared();
        let snap = snapshot(&points, &["A".to_string(), "B".to_string()]).unwrap();
        assert_eq!(
            snap,
            vec![
                ("A".to_string(), Value::Int(1)),
                ("B".to_string(), Value::Text("idle".to_string()))
            ]
        );
    }
}
