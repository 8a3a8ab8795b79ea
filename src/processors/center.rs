//! Cluster centre and core radius estimation.
//!
//! Two centre estimators are provided:
//! - [`potential_center`]: potential-weighted mean over bound singles and all binaries
//! - [`density_center`]: density-weighted mean using the nearest-neighbour
//!   density estimator of Casertano & Hut (1985)
//!
//! [`core_radius`] uses the same density column, so both quantities always
//! share one neighbour convention (see [`estimate_density`]).

use log::warn;
use rayon::prelude::*;
use thiserror::Error;

use crate::config::CenterMethod;
use crate::core::particles::{Center, ParticleError, ParticleSet};
use crate::core::series::{SeriesError, SeriesTable};

use super::neighbors::NeighborSearch;

/// Errors raised while establishing the cluster frame.
#[derive(Debug, Error, PartialEq)]
pub enum CenterError {
    #[error("{method} center is undefined: weight sum is {weight_sum}")]
    DegenerateCenter { method: CenterMethod, weight_sum: f64 },

    #[error("core radius is undefined: sum of squared density is {0}")]
    DegenerateCoreRadius(f64),

    #[error("neighbor index covers {index_len} points but the population has {population}")]
    IndexMismatch { index_len: usize, population: usize },

    #[error(transparent)]
    Particles(#[from] ParticleError),

    #[error(transparent)]
    Series(#[from] SeriesError),
}

/// Result type for centre operations.
pub type Result<T> = std::result::Result<T, CenterError>;

/// Local density of every particle from its `k` nearest neighbours.
///
/// Neighbour convention: the query includes the particle itself as its own
/// 0th neighbour, so `k` neighbours are the particle plus its `k - 1`
/// closest companions. The enclosed mass is the sum over those `k` entries
/// plus the particle's own mass once more, and the radius is the distance to
/// the last (k-th) entry:
///
/// `rho_i = (sum_{j in nb(i)} m_j + m_i) / d_k(i)^3`
///
/// If the index holds fewer than `k` points the farthest available
/// neighbour is used. A particle whose farthest neighbour sits at distance 0
/// (it is alone, or shares its position with every neighbour) gets density 0;
/// coincident particles are reported with a warning.
///
/// `index` must be built over `particles.pos` in the same order.
pub fn estimate_density<S>(particles: &ParticleSet, index: &S, k: usize) -> Result<Vec<f64>>
where
    S: NeighborSearch + Sync,
{
    if index.len() != particles.len() {
        return Err(CenterError::IndexMismatch {
            index_len: index.len(),
            population: particles.len(),
        });
    }

    let estimates: Vec<Option<f64>> = particles
        .pos
        .par_iter()
        .enumerate()
        .map(|(i, pos)| {
            let neighbors = index.nearest(pos, k);
            let radius = neighbors.last().map_or(0.0, |nb| nb.distance);
            if radius <= 0.0 {
                return None;
            }
            let enclosed: f64 =
                neighbors.iter().map(|nb| particles.mass[nb.index]).sum::<f64>() + particles.mass[i];
            Some(enclosed / (radius * radius * radius))
        })
        .collect();

    let unresolved = estimates.iter().filter(|rho| rho.is_none()).count();
    if unresolved > 0 && particles.len() > 1 {
        warn!(
            "{} of {} particles share their position with all {} nearest neighbours; density set to 0",
            unresolved,
            particles.len(),
            k
        );
    }

    Ok(estimates.into_iter().map(|rho| rho.unwrap_or(0.0)).collect())
}

/// Weighted mean position and velocity; `None` when the weights cancel.
fn weighted_center<'a, I>(items: I) -> (Option<Center>, f64)
where
    I: IntoIterator<Item = (f64, &'a [f64; 3], &'a [f64; 3])>,
{
    let mut weight_sum = 0.0;
    let mut pos = [0.0; 3];
    let mut vel = [0.0; 3];

    for (w, p, v) in items {
        weight_sum += w;
        for axis in 0..3 {
            pos[axis] += w * p[axis];
            vel[axis] += w * v[axis];
        }
    }

    if weight_sum == 0.0 || !weight_sum.is_finite() {
        return (None, weight_sum);
    }
    for axis in 0..3 {
        pos[axis] /= weight_sum;
        vel[axis] /= weight_sum;
    }
    (Some(Center { pos, vel }), weight_sum)
}

/// Potential-weighted centre: `r_cm = sum_i pot_i r_i / sum_i pot_i`.
///
/// Only singles with negative potential contribute; every binary
/// contributes. Binary potentials must already be present.
pub fn potential_center(single: &ParticleSet, binary: &ParticleSet) -> Result<Center> {
    let pot_s = single.potential()?;
    let pot_b = binary.potential()?;

    let bound_singles = pot_s
        .iter()
        .zip(single.pos.iter().zip(single.vel.iter()))
        .filter(|&(&pot, _)| pot < 0.0)
        .map(|(&pot, (p, v))| (pot, p, v));
    let binaries = pot_b
        .iter()
        .zip(binary.pos.iter().zip(binary.vel.iter()))
        .map(|(&pot, (p, v))| (pot, p, v));

    match weighted_center(bound_singles.chain(binaries)) {
        (Some(center), _) => Ok(center),
        (None, weight_sum) => Err(CenterError::DegenerateCenter {
            method: CenterMethod::Potential,
            weight_sum,
        }),
    }
}

/// Density-weighted centre (Casertano & Hut 1985).
///
/// Estimates the density of every particle with [`estimate_density`],
/// stores it as the particle set's `density` column and returns the
/// density-weighted mean position and velocity.
pub fn density_center<S>(particles: &mut ParticleSet, index: &S, k: usize) -> Result<Center>
where
    S: NeighborSearch + Sync,
{
    let density = estimate_density(particles, index, k)?;

    let result = weighted_center(
        density
            .iter()
            .zip(particles.pos.iter().zip(particles.vel.iter()))
            .map(|(&rho, (p, v))| (rho, p, v)),
    );
    particles.set_density(density)?;

    match result {
        (Some(center), _) => Ok(center),
        (None, weight_sum) => Err(CenterError::DegenerateCenter {
            method: CenterMethod::Density,
            weight_sum,
        }),
    }
}

/// Core radius `rc = sqrt(sum_i rho_i^2 r_i^2 / sum_i rho_i^2)` (Casertano & Hut 1985).
///
/// Requires the `density` and `r2` columns; `r2` must be measured from the
/// chosen centre.
pub fn core_radius(particles: &ParticleSet) -> Result<f64> {
    let density = particles.densities()?;
    let r2 = particles.radius_squared()?;

    let (weighted, rho2_sum) = density
        .iter()
        .zip(r2.iter())
        .fold((0.0, 0.0), |(num, den), (&rho, &r2)| {
            let rho2 = rho * rho;
            (num + rho2 * r2, den + rho2)
        });

    if rho2_sum == 0.0 || !rho2_sum.is_finite() {
        return Err(CenterError::DegenerateCoreRadius(rho2_sum));
    }
    Ok((weighted / rho2_sum).sqrt())
}

/// Time series of cluster centre and core radius, one row per snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct CoreHistory {
    pub time: Vec<f64>,
    pub pos: Vec<[f64; 3]>,
    pub vel: Vec<[f64; 3]>,
    pub rc: Vec<f64>,
}

impl CoreHistory {
    /// Column names of the flat table layout.
    pub const COLUMNS: [&'static str; 8] = [
        "time", "pos.x", "pos.y", "pos.z", "vel.x", "vel.y", "vel.z", "rc",
    ];

    pub fn new() -> Self {
        Self {
            time: Vec::new(),
            pos: Vec::new(),
            vel: Vec::new(),
            rc: Vec::new(),
        }
    }

    /// Number of snapshots recorded.
    #[inline]
    pub fn len(&self) -> usize {
        self.time.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Append one snapshot.
    pub fn push(&mut self, time: f64, center: &Center, rc: f64) {
        self.time.push(time);
        self.pos.push(center.pos);
        self.vel.push(center.vel);
        self.rc.push(rc);
    }

    /// Flatten into a table with [`Self::COLUMNS`] layout.
    pub fn to_table(&self) -> Result<SeriesTable> {
        let mut table = SeriesTable::with_capacity(Self::COLUMNS.len(), self.len());
        for i in 0..self.len() {
            let p = self.pos[i];
            let v = self.vel[i];
            table.push_row(&[self.time[i], p[0], p[1], p[2], v[0], v[1], v[2], self.rc[i]])?;
        }
        Ok(table)
    }

    /// Rebuild from a table with [`Self::COLUMNS`] layout.
    pub fn from_table(table: &SeriesTable) -> Result<Self> {
        if table.ncols() != Self::COLUMNS.len() {
            return Err(SeriesError::RowWidth {
                expected: Self::COLUMNS.len(),
                found: table.ncols(),
            }
            .into());
        }
        let mut history = Self::new();
        for row in table.rows() {
            let center = Center {
                pos: [row[1], row[2], row[3]],
                vel: [row[4], row[5], row[6]],
            };
            history.push(row[0], &center, row[7]);
        }
        Ok(history)
    }
}

impl Default for CoreHistory {
    fn default() -> Self {
        Self::new()
    }
}
