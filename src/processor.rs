use crate::error::{Result, ScanError};
use crate::logger::RecordLogger;
use crate::types::{Measurement, Position, PositionData, Value};
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Sink for the data acquired at each position
pub trait DataProcessor {
    type Output;

    fn process(&mut self, position: &Position, data: &PositionData) -> Result<()>;

    /// Accumulated result, collected once the scan has ended
    fn data(&mut self) -> Result<Self::Output>;
}

/// Keeps every position and its data in memory
#[derive(Debug, Default, Clone)]
pub struct SimpleDataProcessor {
    positions: Vec<Position>,
    data: Vec<PositionData>,
}

impl SimpleDataProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }
}

impl DataProcessor for SimpleDataProcessor {
    type Output = Vec<PositionData>;

    fn process(&mut self, position: &Position, data: &PositionData) -> Result<()> {
        self.positions.push(position.clone());
        self.data.push(data.clone());
        Ok(())
    }

    fn data(&mut self) -> Result<Self::Output> {
        Ok(self.data.clone())
    }
}

/// Labels each readable value with its name
///
/// Every measurement becomes one record; repeated measurements at a position
/// give several records for that position.
#[derive(Debug, Clone)]
pub struct KeyedDataProcessor {
    names: Vec<String>,
    records: Vec<Vec<BTreeMap<String, Value>>>,
}

impl KeyedDataProcessor {
    pub fn new(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            records: Vec::new(),
        }
    }

    fn label(&self, measurement: &Measurement) -> Result<BTreeMap<String, Value>> {
        if measurement.len() != self.names.len() {
            return Err(ScanError::Type(format!(
                "Measurement has {} values but {} names are configured",
                measurement.len(),
                self.names.len()
            )));
        }
        Ok(self
            .names
            .iter()
            .cloned()
            .zip(measurement.values().iter().cloned())
            .collect())
    }
}

impl DataProcessor for KeyedDataProcessor {
    type Output = Vec<Vec<BTreeMap<String, Value>>>;

    fn process(&mut self, _position: &Position, data: &PositionData) -> Result<()> {
        let records = data
            .measurements()
            .iter()
            .map(|measurement| self.label(measurement))
            .collect::<Result<Vec<_>>>()?;
        self.records.push(records);
        Ok(())
    }

    fn data(&mut self) -> Result<Self::Output> {
        Ok(self.records.clone())
    }
}

/// One line of a scan output file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    pub index: usize,
    pub position: Position,
    pub data: PositionData,
    pub timestamp: DateTime<Utc>,
}

/// Streams every position to disk as it is acquired
pub struct JsonlDataProcessor {
    logger: RecordLogger<ScanRecord>,
    processed: usize,
}

impl JsonlDataProcessor {
    pub fn new(path: impl Into<PathBuf>, buffer_size: usize, final_format_json: bool) -> Self {
        Self {
            logger: RecordLogger::new(path, buffer_size, final_format_json),
            processed: 0,
        }
    }

    pub fn path(&self) -> &std::path::Path {
        self.logger.path()
    }
}

impl DataProcessor for JsonlDataProcessor {
    /// Path of the written file
    type Output = PathBuf;

    fn process(&mut self, position: &Position, data: &PositionData) -> Result<()> {
        let record = ScanRecord {
            index: self.processed,
            position: position.clone(),
            data: data.clone(),
            timestamp: Utc::now(),
        };
        self.processed += 1;
        self.logger.add(record)
    }

    fn data(&mut self) -> Result<Self::Output> {
        self.logger.finalize()?;
        debug!("Wrote {} scan records", self.processed);
        Ok(self.logger.path().to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(value: impl Into<Value>) -> PositionData {
        PositionData::Single(Measurement::Single(value.into()))
    }

    #[test]
    fn test_simple_processor_keeps_order() {
        let mut processor = SimpleDataProcessor::new();
        for index in 0..3 {
            processor.process(&Value::from(index), &single(index * 10)).unwrap();
        }

        assert_eq!(processor.positions(), &[Value::from(0), Value::from(1), Value::from(2)]);
        assert_eq!(processor.data().unwrap(), vec![single(0), single(10), single(20)]);
    }

    #[test]
    fn test_keyed_processor_labels_values() {
        let mut processor = KeyedDataProcessor::new(["x", "y"]);
        let data = PositionData::Repeated(vec![
            Measurement::Multi(vec![1.into(), 2.into()]),
            Measurement::Multi(vec![3.into(), 4.into()]),
        ]);
        processor.process(&Value::Null, &data).unwrap();

        let records = processor.data().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0][1]["y"], Value::Int(4));

        assert!(processor.process(&Value::Null, &single(1)).is_err());
    }

    #[test]
    fn test_jsonl_processor_writes_records() {
        let path = std::env::temp_dir().join(format!("rusty_scan_{}_records", std::process::id()));
        let mut processor = JsonlDataProcessor::new(&path, 1, false);
        let _ = std::fs::remove_file(processor.path());

        processor.process(&Value::Float(0.5), &single(1.25)).unwrap();
        processor
            .process(
                &Value::Float(1.0),
                &PositionData::Repeated(vec![Measurement::Single(1.into()); 2]),
            )
            .unwrap();
        let written = processor.data().unwrap();

        let content = std::fs::read_to_string(&written).unwrap();
        let records: Vec<ScanRecord> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].index, 0);
        assert_eq!(records[0].data, single(1.25));
        assert_eq!(records[1].position, Value::Float(1.0));
        assert_eq!(records[1].data.measurements().len(), 2);
        std::fs::remove_file(&written).unwrap();
    }
}
