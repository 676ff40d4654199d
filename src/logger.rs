use log::{error, info, warn};
use serde::{de::DeserializeOwned, Serialize};
use std::{io::Write, path::PathBuf};

use crate::error::{Result, ScanError};

/// Buffered JSONL writer for scan records
///
/// Records are appended one per line on every flush. With `final_format_json`
/// the file is rewritten as a pretty JSON array when the logger is finalized.
/// Transient flush failures keep the records buffered; only repeated failures
/// are reported as errors so a flaky disk does not kill a running scan.
#[derive(Debug)]
pub struct RecordLogger<T>
where
    T: Serialize + DeserializeOwned,
{
    buffer: Vec<T>,
    buffer_size: usize,
    file_path: PathBuf,
    final_format_json: bool,
    finalized: bool,
    flush_failures: usize,
    max_flush_failures: usize,
}

impl<T> RecordLogger<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new<P: Into<PathBuf>>(
        file_path: P,
        buffer_size: usize,
        final_format_json: bool,
    ) -> Self {
        let mut path = file_path.into();

        let extension = if final_format_json { "json" } else { "jsonl" };
        if path.extension() != Some(std::ffi::OsStr::new(extension)) {
            path.set_extension(extension);
        }

        Self {
            buffer: Vec::with_capacity(buffer_size),
            buffer_size: buffer_size.max(1),
            file_path: path,
            final_format_json,
            finalized: false,
            flush_failures: 0,
            max_flush_failures: 10,
        }
    }

    pub fn with_max_flush_failures(mut self, max_flush_failures: usize) -> Self {
        self.max_flush_failures = max_flush_failures.max(1);
        self
    }

    pub fn path(&self) -> &std::path::Path {
        &self.file_path
    }

    pub fn add(&mut self, record: T) -> Result<()> {
        self.buffer.push(record);

        if self.buffer.len() >= self.buffer_size {
            self.flush()?;
        }

        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        match self.append_buffer() {
            Ok(()) => {
                self.flush_failures = 0;
                info!(
                    "Flushed {} records to {:?}",
                    self.buffer.len(),
                    self.file_path
                );
                self.buffer.clear();
                Ok(())
            }
            Err(e) => {
                self.flush_failures += 1;
                error!(
                    "Flush failure {}/{}: {}",
                    self.flush_failures, self.max_flush_failures, e
                );

                if self.flush_failures % 3 == 0 {
                    warn!(
                        "Experiencing intermittent flush failures ({}/{})",
                        self.flush_failures, self.max_flush_failures
                    );
                }

                if self.flush_failures >= self.max_flush_failures {
                    return Err(ScanError::io(
                        std::io::Error::other(e.to_string()),
                        format!(
                            "Too many consecutive flush failures ({}) for {:?}",
                            self.max_flush_failures, self.file_path
                        ),
                    ));
                }

                Ok(())
            }
        }
    }

    fn append_buffer(&self) -> Result<()> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)
            .map_err(|e| ScanError::io(e, format!("Failed to open {:?}", self.file_path)))?;

        let mut writer = std::io::BufWriter::new(file);
        for record in &self.buffer {
            let line = serde_json::to_string(record)?;
            writeln!(writer, "{line}")
                .map_err(|e| ScanError::io(e, "Failed to write record"))?;
        }
        writer
            .flush()
            .map_err(|e| ScanError::io(e, "Failed to flush records"))
    }

    /// Flush remaining records and, if configured, rewrite the file as a JSON array
    pub fn finalize(&mut self) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        self.flush()?;
        if !self.buffer.is_empty() {
            return Err(ScanError::io(
                std::io::Error::other("records still buffered"),
                format!("Could not flush final records to {:?}", self.file_path),
            ));
        }
        self.finalized = true;

        if !self.final_format_json || !self.file_path.exists() {
            return Ok(());
        }

        let content = std::fs::read_to_string(&self.file_path).map_err(|source| {
            ScanError::io(source, format!("Could not read JSONL file at {:?}", self.file_path))
        })?;

        let mut entries = Vec::new();
        for line in content.lines() {
            if !line.trim().is_empty() {
                let record: T = serde_json::from_str(line)?;
                entries.push(record);
            }
        }

        let json_output = serde_json::to_string_pretty(&entries)?;
        std::fs::write(&self.file_path, json_output).map_err(|source| {
            ScanError::io(source, format!("Could not write JSON file at {:?}", self.file_path))
        })?;

        info!("Converted {} records from JSONL to JSON format", entries.len());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl<T> Drop for RecordLogger<T>
where
    T: Serialize + DeserializeOwned,
{
    fn drop(&mut self) {
        if let Err(e) = self.finalize() {
            error!("Failed to finalize record log {:?}: {e}", self.file_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Sample {
        index: usize,
        value: f64,
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("rusty_scan_{}_{name}", std::process::id()))
    }

    #[test]
    fn test_jsonl_flushes_on_buffer_size() {
        let path = temp_path("buffered");
        let mut logger = RecordLogger::new(&path, 2, false);
        let file = logger.path().to_path_buf();
        let _ = std::fs::remove_file(&file);

        logger.add(Sample { index: 0, value: 1.0 }).unwrap();
        assert_eq!(logger.len(), 1);
        assert!(!file.exists());

        logger.add(Sample { index: 1, value: 2.0 }).unwrap();
        assert!(logger.is_empty());

        let content = std::fs::read_to_string(&file).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert_eq!(file.extension().unwrap(), "jsonl");
        drop(logger);
        std::fs::remove_file(&file).unwrap();
    }

    #[test]
    fn test_finalize_converts_to_json_array() {
        let path = temp_path("final");
        let mut logger = RecordLogger::new(&path, 10, true);
        let file = logger.path().to_path_buf();
        let _ = std::fs::remove_file(&file);

        for index in 0..3 {
            logger.add(Sample { index, value: index as f64 * 0.5 }).unwrap();
        }
        logger.finalize().unwrap();

        let content = std::fs::read_to_string(&file).unwrap();
        let records: Vec<Sample> = serde_json::from_str(&content).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2], Sample { index: 2, value: 1.0 });

        // a second finalize (e.g. from drop) leaves the array intact
        drop(logger);
        let again: Vec<Sample> =
            serde_json::from_str(&std::fs::read_to_string(&file).unwrap()).unwrap();
        assert_eq!(again, records);
        std::fs::remove_file(&file).unwrap();
    }

    #[test]
    fn test_unwritable_path_tolerated_until_limit() {
        let dir = temp_path("missing_dir");
        let mut logger =
            RecordLogger::new(dir.join("nested").join("log"), 1, false).with_max_flush_failures(2);

        assert!(logger.add(Sample { index: 0, value: 0.0 }).is_ok());
        assert!(matches!(
            logger.add(Sample { index: 1, value: 0.0 }),
            Err(ScanError::Io { .. })
        ));
        assert_eq!(logger.len(), 2);
    }
}
