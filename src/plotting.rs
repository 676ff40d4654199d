use crate::types::{PositionData, Value};
use textplots::{Chart, Plot};

/// Determine the best scale and unit prefix for a given maximum value
fn determine_scale(max_value: f64) -> (f64, &'static str) {
    if max_value == 0.0 || max_value >= 1.0 {
        (1.0, "")
    } else if max_value >= 1e-3 {
        (1e3, "m")
    } else if max_value >= 1e-6 {
        (1e6, "μ")
    } else if max_value >= 1e-9 {
        (1e9, "n")
    } else {
        (1e12, "p")
    }
}

/// Numeric series of one readable over a scan
///
/// Repeated measurements at a position are averaged. Positions where the
/// readable is missing or not numeric are skipped.
pub fn readable_series(data: &[PositionData], readable: usize) -> Vec<f64> {
    data.iter()
        .filter_map(|position_data| {
            let values: Vec<f64> = position_data
                .measurements()
                .iter()
                .filter_map(|measurement| measurement.get(readable))
                .filter_map(|value| value.as_f64().ok())
                .collect();
            if values.is_empty() {
                None
            } else {
                Some(values.iter().sum::<f64>() / values.len() as f64)
            }
        })
        .collect()
}

/// X coordinates for a scan plot: scalar positions when all are numeric, indices otherwise
pub fn position_axis(positions: &[Value]) -> Vec<f64> {
    let numeric: Option<Vec<f64>> = positions.iter().map(|p| p.as_f64().ok()).collect();
    numeric.unwrap_or_else(|| (0..positions.len()).map(|i| i as f64).collect())
}

/// Plot any slice of f64 values against their index with automatic scaling
///
/// # Examples
/// ```
/// use rusty_scan::plotting::plot_values;
///
/// let data = vec![1e-12, 2e-12, 1.5e-12, 3e-12];
/// plot_values(&data, Some("Detector current"), None, None).unwrap();
/// ```
pub fn plot_values(
    values: &[f64],
    title: Option<&str>,
    width: Option<usize>,
    height: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let axis: Vec<f64> = (0..values.len()).map(|i| i as f64).collect();
    plot_xy(&axis, values, title.unwrap_or("Data Plot"), "Sample Index", width, height)
}

/// Plot one readable of a finished scan against the scan positions
pub fn plot_scan(
    positions: &[Value],
    data: &[PositionData],
    readable: usize,
    title: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    if positions.len() != data.len() {
        return Err(format!(
            "{} positions but {} data points",
            positions.len(),
            data.len()
        )
        .into());
    }

    let axis = position_axis(positions);
    let (axis, values): (Vec<f64>, Vec<f64>) = axis
        .into_iter()
        .zip(data)
        .filter_map(|(x, position_data)| {
            readable_series(std::slice::from_ref(position_data), readable)
                .first()
                .map(|&y| (x, y))
        })
        .unzip();

    let default_title = format!("Readable {readable}");
    plot_xy(
        &axis,
        &values,
        title.unwrap_or(&default_title),
        "Position",
        None,
        None,
    )
}

fn plot_xy(
    axis: &[f64],
    values: &[f64],
    title: &str,
    axis_label: &str,
    width: Option<usize>,
    height: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    if values.is_empty() {
        return Err("Cannot plot empty data".into());
    }

    let width = width.unwrap_or(140);
    let height = height.unwrap_or(60);

    let min_value = values.iter().fold(f64::INFINITY, |a, &b| a.min(b));
    let max_value = values.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    let (value_scale, value_unit) = determine_scale(max_value.abs().max(min_value.abs()));

    let frame: Vec<(f32, f32)> = axis
        .iter()
        .zip(values)
        .map(|(&x, &value)| (x as f32, (value * value_scale) as f32))
        .collect();

    let x_min = axis.iter().fold(f64::INFINITY, |a, &b| a.min(b)) as f32;
    let mut x_max = axis.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b)) as f32;
    if x_max <= x_min {
        x_max = x_min + 1.0;
    }

    println!("{title}");
    println!("X-axis: {axis_label} | Y-axis: {value_unit}units");
    println!(
        "Range: {} points | Values: {:.3} to {:.3} {}units",
        values.len(),
        min_value * value_scale,
        max_value * value_scale,
        value_unit
    );
    println!("{}", "─".repeat(width));

    Chart::new(width as u32, height as u32, x_min, x_max)
        .lineplot(&textplots::Shape::Lines(&frame))
        .nice();

    println!("{axis_label} →");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Measurement;

    #[test]
    fn test_determine_scale() {
        assert_eq!(determine_scale(5.0), (1.0, ""));
        assert_eq!(determine_scale(0.0), (1.0, ""));
        assert_eq!(determine_scale(0.005), (1e3, "m"));
        assert_eq!(determine_scale(5e-6), (1e6, "μ"));
        assert_eq!(determine_scale(5e-9), (1e9, "n"));
        assert_eq!(determine_scale(5e-12), (1e12, "p"));
    }

    #[test]
    fn test_readable_series_averages_repeats() {
        let data = vec![
            PositionData::Single(Measurement::Multi(vec![1.into(), "a".into()])),
            PositionData::Repeated(vec![
                Measurement::Multi(vec![2.into(), "b".into()]),
                Measurement::Multi(vec![4.into(), "c".into()]),
            ]),
        ];
        assert_eq!(readable_series(&data, 0), vec![1.0, 3.0]);
        assert!(readable_series(&data, 1).is_empty());
    }

    #[test]
    fn test_position_axis_falls_back_to_indices() {
        assert_eq!(position_axis(&[Value::Float(0.5), Value::Int(2)]), vec![0.5, 2.0]);
        assert_eq!(
            position_axis(&[Value::from(vec![0.0, 1.0]), Value::from(vec![1.0, 1.0])]),
            vec![0.0, 1.0]
        );
    }

    #[test]
    fn test_plot_values_basic() {
        let data = vec![1.0, 2.0, 3.0, 2.0, 1.0];
        assert!(plot_values(&data, Some("Test Plot"), None, None).is_ok());
        assert!(plot_values(&[], None, None, None).is_err());
    }

    #[test]
    fn test_plot_scan_single_point() {
        let positions = vec![Value::Float(1.0)];
        let data = vec![PositionData::Single(Measurement::Single(Value::Float(2e-9)))];
        assert!(plot_scan(&positions, &data, 0, None).is_ok());
        assert!(plot_scan(&positions, &[], 0, None).is_err());
    }
}
