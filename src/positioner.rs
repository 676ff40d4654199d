use crate::error::{Result, ScanError};
use crate::types::{Position, Value};

/// Source of scan positions
///
/// `positions()` must be restartable: the scanner enumerates it once to count
/// the positions and a second time to drive the scan.
pub trait Positioner {
    fn positions(&self) -> Box<dyn Iterator<Item = Position> + '_>;

    fn count(&self) -> usize {
        self.positions().count()
    }
}

impl<T: Positioner + ?Sized> Positioner for Box<T> {
    fn positions(&self) -> Box<dyn Iterator<Item = Position> + '_> {
        (**self).positions()
    }

    fn count(&self) -> usize {
        (**self).count()
    }
}

/// Explicit list of positions, visited in order
#[derive(Debug, Clone, PartialEq)]
pub struct VectorPositioner {
    positions: Vec<Position>,
}

impl VectorPositioner {
    pub fn new(positions: impl IntoIterator<Item = impl Into<Position>>) -> Self {
        Self {
            positions: positions.into_iter().map(Into::into).collect(),
        }
    }
}

impl Positioner for VectorPositioner {
    fn positions(&self) -> Box<dyn Iterator<Item = Position> + '_> {
        Box::new(self.positions.iter().cloned())
    }
}

/// `n` acquisitions without moving; positions are the indices `0..n`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticPositioner {
    n: usize,
}

impl StaticPositioner {
    pub fn new(n: usize) -> Self {
        Self { n }
    }
}

impl Positioner for StaticPositioner {
    fn positions(&self) -> Box<dyn Iterator<Item = Position> + '_> {
        Box::new((0..self.n).map(Value::from))
    }
}

/// Evenly spaced positions from `start` to `end` inclusive
///
/// Each axis is interpolated independently, so `start` and `end` of length
/// `k` give `k`-component array positions; a single axis gives scalar
/// positions.
#[derive(Debug, Clone, PartialEq)]
pub struct LinePositioner {
    start: Vec<f64>,
    end: Vec<f64>,
    steps: usize,
}

impl LinePositioner {
    /// `steps` intervals, `steps + 1` positions
    pub fn new(start: Vec<f64>, end: Vec<f64>, steps: usize) -> Result<Self> {
        if start.is_empty() || start.len() != end.len() {
            return Err(ScanError::InvalidSettings(format!(
                "Line start {start:?} and end {end:?} must have the same non-zero length"
            )));
        }
        if steps == 0 {
            return Err(ScanError::InvalidSettings(
                "Line positioner needs at least one step".to_string(),
            ));
        }
        Ok(Self { start, end, steps })
    }

    fn point(&self, index: usize) -> Position {
        let fraction = index as f64 / self.steps as f64;
        let mut axes: Vec<f64> = self
            .start
            .iter()
            .zip(&self.end)
            .map(|(start, end)| start + (end - start) * fraction)
            .collect();

        if axes.len() == 1 {
            Value::Float(axes.remove(0))
        } else {
            Value::from(axes)
        }
    }
}

impl Positioner for LinePositioner {
    fn positions(&self) -> Box<dyn Iterator<Item = Position> + '_> {
        Box::new((0..=self.steps).map(move |index| self.point(index)))
    }

    fn count(&self) -> usize {
        self.steps + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_positioner_restartable() {
        let positioner = VectorPositioner::new([1.0, 2.0, 3.0]);
        let first: Vec<_> = positioner.positions().collect();
        let second: Vec<_> = positioner.positions().collect();
        assert_eq!(first, second);
        assert_eq!(positioner.count(), 3);
    }

    #[test]
    fn test_static_positioner_yields_indices() {
        let positions: Vec<_> = StaticPositioner::new(4).positions().collect();
        assert_eq!(positions, vec![Value::from(0), Value::from(1), Value::from(2), Value::from(3)]);
        assert_eq!(StaticPositioner::new(0).count(), 0);
    }

    #[test]
    fn test_line_positioner_inclusive() {
        let line = LinePositioner::new(vec![0.0], vec![1.0], 4).unwrap();
        let positions: Vec<f64> = line.positions().map(|p| p.as_f64().unwrap()).collect();
        assert_eq!(positions, vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        assert_eq!(line.count(), 5);
    }

    #[test]
    fn test_line_positioner_multiple_axes() {
        let line = LinePositioner::new(vec![0.0, 10.0], vec![2.0, 0.0], 2).unwrap();
        let positions: Vec<_> = line.positions().collect();
        assert_eq!(positions[1], Value::from(vec![1.0, 5.0]));
        assert_eq!(positions[2], Value::from(vec![2.0, 0.0]));
    }

    #[test]
    fn test_boxed_positioner_delegates() {
        let boxed: Box<dyn Positioner> =
            Box::new(LinePositioner::new(vec![0.0], vec![2.0], 2).unwrap());
        assert_eq!(boxed.count(), 3);
        assert_eq!(boxed.positions().last(), Some(Value::Float(2.0)));
    }

    #[test]
    fn test_line_positioner_rejects_bad_input() {
        assert!(LinePositioner::new(vec![0.0], vec![1.0, 2.0], 3).is_err());
        assert!(LinePositioner::new(vec![], vec![], 3).is_err());
        assert!(LinePositioner::new(vec![0.0], vec![1.0], 0).is_err());
    }
}
