//! Partitioning of a radially sorted population into Lagrangian bins.

use std::ops::Range;

use crate::config::AverageMode;

/// Bin layout of one population for one snapshot.
///
/// Every vector has one entry per mass fraction followed by one trailing
/// entry for the core radius.
#[derive(Debug, Clone, PartialEq)]
pub struct ShellPartition {
    /// Lagrangian radii, then the core radius
    pub radius: Vec<f64>,
    /// Particle count per bin
    pub count: Vec<usize>,
    /// Average particle mass per bin, 0 for empty bins
    pub avg_mass: Vec<f64>,
    /// Index range of the particles aggregated in each bin
    pub ranges: Vec<Range<usize>>,
}

impl ShellPartition {
    /// Number of bins including the core bin.
    #[inline]
    pub fn n_bins(&self) -> usize {
        self.radius.len()
    }
}

/// Running sum of masses.
pub fn cumulative_mass(mass: &[f64]) -> Vec<f64> {
    mass.iter()
        .scan(0.0, |acc, &m| {
            *acc += m;
            Some(*acc)
        })
        .collect()
}

/// Index of the first particle whose cumulative mass reaches each threshold.
///
/// Thresholds are `fraction * total_mass`. Indices never decrease with the
/// fraction and are clamped to the last particle. `mass_cum` must be non-empty.
pub fn mass_indices(mass_cum: &[f64], fractions: &[f64]) -> Vec<usize> {
    let total = mass_cum.last().copied().unwrap_or(0.0);
    let last = mass_cum.len().saturating_sub(1);

    let mut floor = 0;
    fractions
        .iter()
        .map(|&fraction| {
            let threshold = fraction * total;
            let index = mass_cum.partition_point(|&m| m < threshold).min(last);
            floor = floor.max(index);
            floor
        })
        .collect()
}

/// Split a population sorted by ascending `r2` into Lagrangian bins.
///
/// `mass` and `r2` must be in the same sorted order and hold at least one
/// particle. The core bin holds every particle with `r2 < rc^2`.
pub fn partition(
    mass: &[f64],
    r2: &[f64],
    fractions: &[f64],
    rc: f64,
    mode: AverageMode,
) -> ShellPartition {
    let n_bins = fractions.len() + 1;
    let mass_cum = cumulative_mass(mass);
    let indices = mass_indices(&mass_cum, fractions);

    let mut radius = Vec::with_capacity(n_bins);
    let mut count = Vec::with_capacity(n_bins);
    let mut avg_mass = Vec::with_capacity(n_bins);
    let mut ranges = Vec::with_capacity(n_bins);

    let mut previous: Option<usize> = None;
    for &index in &indices {
        radius.push(r2[index].sqrt());

        let range = match (mode, previous) {
            (AverageMode::Shell, Some(prev)) => (prev + 1)..(index + 1),
            _ => 0..(index + 1),
        };
        let enclosed = match range.start {
            0 => mass_cum[index],
            start => mass_cum[index] - mass_cum[start - 1],
        };
        let n = range.len();

        count.push(n);
        avg_mass.push(if n > 0 { enclosed / n as f64 } else { 0.0 });
        ranges.push(range);
        previous = Some(index);
    }

    let rc2 = rc * rc;
    let n_core = r2.partition_point(|&r| r < rc2);
    radius.push(rc);
    count.push(n_core);
    avg_mass.push(if n_core > 0 {
        mass_cum[n_core - 1] / n_core as f64
    } else {
        0.0
    });
    ranges.push(0..n_core);

    ShellPartition {
        radius,
        count,
        avg_mass,
        ranges,
    }
}
