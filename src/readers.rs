use crate::error::{Result, ScanError};
use crate::stream::{FieldSpec, SharedStreamReader};
use crate::types::{Measurement, Position, Value};
use log::trace;

/// Produces one logical measurement per call
pub trait Reader {
    fn read(&mut self) -> Result<Measurement>;
}

/// Moves the scanned device to a position, returning once the move is complete
pub trait Writer {
    fn write(&mut self, position: &Position) -> Result<()>;
}

impl<F> Reader for F
where
    F: FnMut() -> Result<Measurement>,
{
    fn read(&mut self) -> Result<Measurement> {
        self()
    }
}

impl<F> Writer for F
where
    F: FnMut(&Position) -> Result<()>,
{
    fn write(&mut self, position: &Position) -> Result<()> {
        self(position)
    }
}

/// Readables backed by plain functions, one value each
#[derive(Default)]
pub struct FunctionReader {
    functions: Vec<Box<dyn FnMut() -> Result<Value>>>,
}

impl FunctionReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_function(mut self, function: impl FnMut() -> Result<Value> + 'static) -> Self {
        self.functions.push(Box::new(function));
        self
    }
}

impl Reader for FunctionReader {
    fn read(&mut self) -> Result<Measurement> {
        let values = self
            .functions
            .iter_mut()
            .map(|function| function())
            .collect::<Result<Vec<_>>>()?;
        Ok(Measurement::from_values(values))
    }
}

/// Writables backed by plain functions; position components are handed out in order
#[derive(Default)]
pub struct FunctionWriter {
    functions: Vec<Box<dyn FnMut(&Value) -> Result<()>>>,
}

impl FunctionWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_function(mut self, function: impl FnMut(&Value) -> Result<()> + 'static) -> Self {
        self.functions.push(Box::new(function));
        self
    }
}

impl Writer for FunctionWriter {
    fn write(&mut self, position: &Position) -> Result<()> {
        let components = split_position(position, self.functions.len())?;
        for (function, value) in self.functions.iter_mut().zip(components) {
            function(value)?;
        }
        Ok(())
    }
}

/// Distribute a position over `count` writables
///
/// A single writable receives the whole position; several writables need an
/// array position with exactly one component each.
pub(crate) fn split_position(position: &Position, count: usize) -> Result<Vec<&Value>> {
    if count == 1 {
        return Ok(vec![position]);
    }
    let components = position.components();
    if components.len() != count {
        return Err(ScanError::Type(format!(
            "Position {position} has {} components but {count} writables are configured",
            components.len()
        )));
    }
    Ok(components)
}

/// Several readers merged into one measurement, in declaration order
#[derive(Default)]
pub struct CompositeReader {
    readers: Vec<Box<dyn Reader>>,
}

impl CompositeReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reader(mut self, reader: impl Reader + 'static) -> Self {
        self.readers.push(Box::new(reader));
        self
    }

    pub fn len(&self) -> usize {
        self.readers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readers.is_empty()
    }
}

impl Reader for CompositeReader {
    fn read(&mut self) -> Result<Measurement> {
        let mut values = Vec::new();
        for reader in &mut self.readers {
            values.extend(reader.read()?.into_values());
        }
        Ok(Measurement::from_values(values))
    }
}

/// Stream properties read from a fresh message, plus monitors from the same snapshot
pub struct StreamReadGroup {
    reader: SharedStreamReader,
    properties: Vec<FieldSpec>,
    monitors: Vec<FieldSpec>,
    append_monitors: bool,
}

impl StreamReadGroup {
    pub fn new(reader: SharedStreamReader, properties: Vec<FieldSpec>) -> Self {
        Self {
            reader,
            properties,
            monitors: Vec::new(),
            append_monitors: false,
        }
    }

    /// Fields sampled alongside the properties; appended to each measurement when `append` is set
    pub fn with_monitors(mut self, monitors: Vec<FieldSpec>, append: bool) -> Self {
        self.monitors = monitors;
        self.append_monitors = append;
        self
    }

    /// Monitor values belonging to the last read
    pub fn monitors(&self) -> Result<Vec<Value>> {
        self.reader.lock().read_cached(&self.monitors)
    }

    pub fn shared_reader(&self) -> SharedStreamReader {
        self.reader.clone()
    }

    /// Release the stream connection
    pub fn close(&self) {
        self.reader.lock().close();
    }
}

impl Reader for StreamReadGroup {
    fn read(&mut self) -> Result<Measurement> {
        let mut reader = self.reader.lock();
        let mut values = reader.read_fresh(&self.properties)?;
        if self.append_monitors {
            values.extend(reader.read_cached(&self.monitors)?);
        }
        trace!("Stream read group returned {} values", values.len());
        Ok(Measurement::from_values(values))
    }
}
