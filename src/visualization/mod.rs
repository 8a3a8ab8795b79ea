//! Visualization of Lagrangian time series.
//!
//! Draws the Lagrangian radii of one population against time as PNG line
//! plots using the plotters library.

use std::path::Path;

use plotters::prelude::*;
use plotters_bitmap::BitMapBackend;
use thiserror::Error;

use crate::core::series::SeriesTable;

/// Errors that can occur during visualization.
#[derive(Error, Debug)]
pub enum VisualizationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Plotting error: {0}")]
    PlottingError(String),

    #[error("Empty time series")]
    EmptySeries,

    #[error("time axis has {times} entries, radius table has {rows} rows")]
    LengthMismatch { times: usize, rows: usize },
}

/// Result type for visualization operations.
pub type Result<T> = std::result::Result<T, VisualizationError>;

/// Default plot width in pixels.
const DEFAULT_WIDTH: u32 = 1600;

/// Default plot height in pixels.
const DEFAULT_HEIGHT: u32 = 900;

/// One color per mass fraction, cycled if there are more fractions.
const LINE_COLORS: &[(u8, u8, u8)] = &[
    (228, 26, 28),   // Red
    (55, 126, 184),  // Blue
    (77, 175, 74),   // Green
    (152, 78, 163),  // Purple
    (255, 127, 0),   // Orange
    (166, 86, 40),   // Brown
    (247, 129, 191), // Pink
    (0, 206, 209),   // Turquoise
];

/// Core radius line color (black).
const CORE_COLOR: (u8, u8, u8) = (0, 0, 0);

/// Plot every column of `radii` against `times` and save as PNG.
///
/// The last column is the core radius and is drawn in black; the others are
/// the Lagrangian radii in mass-fraction order.
///
/// # Arguments
///
/// * `output_path` - Path to save the PNG image
/// * `times` - Time of every row
/// * `radii` - Radius table, one row per snapshot
pub fn plot_lagrangian_radii(output_path: &Path, times: &[f64], radii: &SeriesTable) -> Result<()> {
    if times.is_empty() || radii.is_empty() {
        return Err(VisualizationError::EmptySeries);
    }
    if times.len() != radii.len() {
        return Err(VisualizationError::LengthMismatch {
            times: times.len(),
            rows: radii.len(),
        });
    }

    let (t_min, t_max, r_min, r_max) = compute_bounds(times, radii);
    let r_padding = (r_max - r_min) * 0.05;

    let root = BitMapBackend::new(output_path, (DEFAULT_WIDTH, DEFAULT_HEIGHT))
        .into_drawing_area();

    root.fill(&WHITE).map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .build_cartesian_2d(t_min..t_max, (r_min - r_padding).max(0.0)..(r_max + r_padding))
        .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .disable_y_mesh()
        .draw()
        .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    let core_col = radii.ncols() - 1;
    for col in 0..radii.ncols() {
        let (r, g, b) = if col == core_col {
            CORE_COLOR
        } else {
            LINE_COLORS[col % LINE_COLORS.len()]
        };
        let points: Vec<(f64, f64)> = times
            .iter()
            .copied()
            .zip(radii.column(col))
            .collect();

        chart
            .draw_series(LineSeries::new(points, RGBColor(r, g, b).stroke_width(2)))
            .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;
    }

    root.present().map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    Ok(())
}

/// Compute the bounds (min/max) for time and radius.
fn compute_bounds(times: &[f64], radii: &SeriesTable) -> (f64, f64, f64, f64) {
    let mut t_min = f64::MAX;
    let mut t_max = f64::MIN;
    for &t in times {
        t_min = t_min.min(t);
        t_max = t_max.max(t);
    }

    let mut r_min = f64::MAX;
    let mut r_max = f64::MIN;
    for row in radii.rows() {
        for &r in row {
            r_min = r_min.min(r);
            r_max = r_max.max(r);
        }
    }

    if (t_max - t_min).abs() < f64::EPSILON {
        t_min -= 1.0;
        t_max += 1.0;
    }
    if (r_max - r_min).abs() < f64::EPSILON {
        r_min -= 1.0;
        r_max += 1.0;
    }

    (t_min, t_max, r_min, r_max)
}
