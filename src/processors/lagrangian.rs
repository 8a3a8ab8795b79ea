//! Lagrangian radii time series for one population and for the
//! single / binary / combined triple.
//!
//! Every snapshot appends exactly one row per population. A row holds, for
//! each of the N mass-fraction bins plus the trailing core bin: the radius,
//! the average mass, the particle count, and the seven mean velocity and
//! seven velocity dispersion channels of [`VelocityStats`].

use log::{debug, warn};
use regex::Regex;
use thiserror::Error;

use crate::config::{AverageMode, ConfigError, MassFractions};
use crate::core::particles::{ParticleError, ParticleSet};
use crate::core::series::{SeriesError, SeriesTable};

use super::kinematics::{aggregate, VelocityStats};
use super::shells::partition;

/// Errors raised while appending to or rebuilding Lagrangian series.
#[derive(Debug, Error)]
pub enum LagrangianError {
    #[error(
        "time series out of step: time={time}, single={single}, binary={binary}, all={all} rows"
    )]
    ShapeConsistency {
        time: usize,
        single: usize,
        binary: usize,
        all: usize,
    },

    #[error("mass fractions {found:?} in stored table do not match configured {expected:?}")]
    FractionMismatch { expected: Vec<f64>, found: Vec<f64> },

    #[error("invalid Lagrangian table header: {0}")]
    InvalidHeader(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Series(#[from] SeriesError),

    #[error(transparent)]
    Particles(#[from] ParticleError),
}

/// Result type for Lagrangian operations.
pub type Result<T> = std::result::Result<T, LagrangianError>;

/// Number of per-bin quantities stored for one population.
const N_QUANTITIES: usize = 3 + 2 * VelocityStats::CHANNELS.len();

/// Name prefixes of the three populations, in table order.
pub const POPULATIONS: [&str; 3] = ["single", "binary", "all"];

/// One computed row of a population, ready to be appended.
#[derive(Debug, Clone, PartialEq)]
pub struct LagrangianRow {
    pub radius: Vec<f64>,
    pub avg_mass: Vec<f64>,
    pub count: Vec<usize>,
    pub vel: VelocityStats,
    pub sigma: VelocityStats,
}

impl LagrangianRow {
    /// Padding row used when a population has fewer than two particles.
    pub fn zeros(n_bins: usize) -> Self {
        Self {
            radius: vec![0.0; n_bins],
            avg_mass: vec![0.0; n_bins],
            count: vec![0; n_bins],
            vel: VelocityStats::zeros(n_bins),
            sigma: VelocityStats::zeros(n_bins),
        }
    }

    /// Flatten in table column order.
    pub fn values(&self) -> Vec<f64> {
        let n_bins = self.radius.len();
        let mut out = Vec::with_capacity(N_QUANTITIES * n_bins);
        out.extend_from_slice(&self.radius);
        out.extend_from_slice(&self.avg_mass);
        out.extend(self.count.iter().map(|&c| c as f64));
        for channel in self.vel.channels() {
            out.extend_from_slice(channel);
        }
        for channel in self.sigma.channels() {
            out.extend_from_slice(channel);
        }
        out
    }
}

/// One velocity statistic, one table per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct VelocitySeries {
    pub abs: SeriesTable,
    pub x: SeriesTable,
    pub y: SeriesTable,
    pub z: SeriesTable,
    pub rad: SeriesTable,
    pub tan: SeriesTable,
    pub rot: SeriesTable,
}

impl VelocitySeries {
    fn new(n_bins: usize) -> Self {
        Self {
            abs: SeriesTable::new(n_bins),
            x: SeriesTable::new(n_bins),
            y: SeriesTable::new(n_bins),
            z: SeriesTable::new(n_bins),
            rad: SeriesTable::new(n_bins),
            tan: SeriesTable::new(n_bins),
            rot: SeriesTable::new(n_bins),
        }
    }

    /// Tables in [`VelocityStats::CHANNELS`] order.
    pub fn tables(&self) -> [&SeriesTable; 7] {
        [
            &self.abs, &self.x, &self.y, &self.z, &self.rad, &self.tan, &self.rot,
        ]
    }

    fn tables_mut(&mut self) -> [&mut SeriesTable; 7] {
        [
            &mut self.abs,
            &mut self.x,
            &mut self.y,
            &mut self.z,
            &mut self.rad,
            &mut self.tan,
            &mut self.rot,
        ]
    }
}

/// Lagrangian time series of one population.
#[derive(Debug, Clone, PartialEq)]
pub struct Lagrangian {
    mass_fraction: MassFractions,
    /// Lagrangian radii, then the core radius
    pub r: SeriesTable,
    /// Average particle mass per bin
    pub m: SeriesTable,
    /// Particle count per bin
    pub n: SeriesTable,
    /// Mass-weighted mean velocity
    pub vel: VelocitySeries,
    /// Mass-weighted velocity dispersion
    pub sigma: VelocitySeries,
}

impl Lagrangian {
    pub fn new(mass_fraction: MassFractions) -> Self {
        let n_bins = mass_fraction.n_bins();
        Self {
            mass_fraction,
            r: SeriesTable::new(n_bins),
            m: SeriesTable::new(n_bins),
            n: SeriesTable::new(n_bins),
            vel: VelocitySeries::new(n_bins),
            sigma: VelocitySeries::new(n_bins),
        }
    }

    pub fn mass_fraction(&self) -> &MassFractions {
        &self.mass_fraction
    }

    /// Bins per row: one per mass fraction plus the core bin.
    #[inline]
    pub fn n_bins(&self) -> usize {
        self.mass_fraction.n_bins()
    }

    /// Width of a flattened row.
    #[inline]
    pub fn ncols(&self) -> usize {
        N_QUANTITIES * self.n_bins()
    }

    /// Number of snapshots recorded.
    #[inline]
    pub fn len(&self) -> usize {
        self.r.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.r.is_empty()
    }

    fn tables(&self) -> impl Iterator<Item = &SeriesTable> {
        [&self.r, &self.m, &self.n]
            .into_iter()
            .chain(self.vel.tables())
            .chain(self.sigma.tables())
    }

    /// Compute the row of one snapshot without touching the series.
    ///
    /// `particles` must be sorted by ascending `r2` measured from the
    /// cluster centre. Populations with fewer than two particles yield an
    /// all-zero row.
    pub fn compute_row(
        &self,
        particles: &ParticleSet,
        rc: f64,
        mode: AverageMode,
    ) -> Result<LagrangianRow> {
        if particles.len() <= 1 {
            warn!(
                "population has {} particle(s), appending a zero row",
                particles.len()
            );
            return Ok(LagrangianRow::zeros(self.n_bins()));
        }

        let r2 = particles.radius_squared()?;
        let shells = partition(
            &particles.mass,
            r2,
            self.mass_fraction.as_slice(),
            rc,
            mode,
        );
        debug!("bin ranges {:?}", shells.ranges);

        let kin = aggregate(particles, &shells);
        Ok(LagrangianRow {
            radius: shells.radius,
            avg_mass: shells.avg_mass,
            count: shells.count,
            vel: kin.mean,
            sigma: kin.sigma,
        })
    }

    /// Append a computed row.
    pub fn push_row(&mut self, row: &LagrangianRow) -> Result<()> {
        self.push_values(&row.values())
    }

    /// Append a flattened row. Nothing is appended if the width is wrong.
    pub fn push_values(&mut self, values: &[f64]) -> Result<()> {
        let n_bins = self.n_bins();
        if values.len() != self.ncols() {
            return Err(SeriesError::RowWidth {
                expected: self.ncols(),
                found: values.len(),
            }
            .into());
        }

        let tables = [&mut self.r, &mut self.m, &mut self.n]
            .into_iter()
            .chain(self.vel.tables_mut())
            .chain(self.sigma.tables_mut());
        for (table, chunk) in tables.zip(values.chunks_exact(n_bins)) {
            table.push_row(chunk)?;
        }
        Ok(())
    }

    /// Compute and append the row of one snapshot.
    pub fn calc_one_snapshot(
        &mut self,
        particles: &ParticleSet,
        rc: f64,
        mode: AverageMode,
    ) -> Result<()> {
        let row = self.compute_row(particles, rc, mode)?;
        self.push_row(&row)
    }

    /// Flattened row `index`, or `None` past the end.
    pub fn row_values(&self, index: usize) -> Option<Vec<f64>> {
        let mut out = Vec::with_capacity(self.ncols());
        for table in self.tables() {
            out.extend_from_slice(table.row(index)?);
        }
        Some(out)
    }

    /// Column names of a flattened row, e.g. `all.vel.rad[0.5]`.
    pub fn column_names(&self, prefix: &str) -> Vec<String> {
        let labels = self.mass_fraction.labels();
        let mut names = Vec::with_capacity(self.ncols());

        for kind in ["r", "m", "n"] {
            names.extend(labels.iter().map(|l| format!("{prefix}.{kind}[{l}]")));
        }
        for group in ["vel", "sigma"] {
            for channel in VelocityStats::CHANNELS {
                names.extend(
                    labels
                        .iter()
                        .map(|l| format!("{prefix}.{group}.{channel}[{l}]")),
                );
            }
        }
        names
    }
}

/// Lagrangian series of singles, binaries and both combined, sharing one
/// time axis.
#[derive(Debug, Clone, PartialEq)]
pub struct LagrangianMultiple {
    time: Vec<f64>,
    single: Lagrangian,
    binary: Lagrangian,
    all: Lagrangian,
}

impl LagrangianMultiple {
    pub fn new(mass_fraction: MassFractions) -> Self {
        Self {
            time: Vec::new(),
            single: Lagrangian::new(mass_fraction.clone()),
            binary: Lagrangian::new(mass_fraction.clone()),
            all: Lagrangian::new(mass_fraction),
        }
    }

    pub fn mass_fraction(&self) -> &MassFractions {
        self.all.mass_fraction()
    }

    pub fn time(&self) -> &[f64] {
        &self.time
    }

    pub fn single(&self) -> &Lagrangian {
        &self.single
    }

    pub fn binary(&self) -> &Lagrangian {
        &self.binary
    }

    pub fn all(&self) -> &Lagrangian {
        &self.all
    }

    /// Population by name (`single`, `binary` or `all`).
    pub fn population(&self, name: &str) -> Option<&Lagrangian> {
        match name {
            "single" => Some(&self.single),
            "binary" => Some(&self.binary),
            "all" => Some(&self.all),
            _ => None,
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

    /// Reserve room for `additional` more snapshots.
    pub fn reserve(&mut self, additional: usize) {
        self.time.reserve(additional);
        for lagr in [&mut self.single, &mut self.binary, &mut self.all] {
            lagr.r.reserve(additional);
            lagr.m.reserve(additional);
            lagr.n.reserve(additional);
            for table in lagr.vel.tables_mut() {
                table.reserve(additional);
            }
            for table in lagr.sigma.tables_mut() {
                table.reserve(additional);
            }
        }
    }

    /// Fail if the four series do not have the same number of rows.
    pub fn check_shape(&self) -> Result<()> {
        let (time, single, binary, all) = (
            self.time.len(),
            self.single.len(),
            self.binary.len(),
            self.all.len(),
        );
        if time == single && single == binary && binary == all {
            Ok(())
        } else {
            Err(LagrangianError::ShapeConsistency {
                time,
                single,
                binary,
                all,
            })
        }
    }

    /// Compute the three rows of one snapshot without touching the series.
    ///
    /// `single` and `binary` must already be expressed relative to the
    /// cluster centre; their squared radii are computed here. Both input sets
    /// are left untouched.
    pub fn compute_rows(
        &self,
        single: &ParticleSet,
        binary: &ParticleSet,
        rc: f64,
        mode: AverageMode,
    ) -> Result<[LagrangianRow; 3]> {
        let n_single = single.len();

        let mut all = single.join(binary);
        all.calc_r2();
        let order = all.argsort_r2()?;

        // the combined order restricted to each side is that side's sorted order
        let (single_idx, binary_idx): (Vec<usize>, Vec<usize>) =
            order.iter().partition(|&&i| i < n_single);

        let single_sorted = all.select(&single_idx);
        let binary_sorted = all.select(&binary_idx);
        let all_sorted = all.select(&order);

        Ok([
            self.single.compute_row(&single_sorted, rc, mode)?,
            self.binary.compute_row(&binary_sorted, rc, mode)?,
            self.all.compute_row(&all_sorted, rc, mode)?,
        ])
    }

    /// Append precomputed rows of one snapshot.
    pub fn push_rows(&mut self, time: f64, rows: &[LagrangianRow; 3]) -> Result<()> {
        self.check_shape()?;
        let width = self.all.ncols();
        let [single, binary, all] = [&rows[0], &rows[1], &rows[2]].map(LagrangianRow::values);
        if let Some(found) = [&single, &binary, &all]
            .iter()
            .map(|v| v.len())
            .find(|&len| len != width)
        {
            return Err(SeriesError::RowWidth {
                expected: width,
                found,
            }
            .into());
        }

        self.time.push(time);
        self.single.push_values(&single)?;
        self.binary.push_values(&binary)?;
        self.all.push_values(&all)?;
        self.check_shape()
    }

    /// Compute and append the rows of one snapshot.
    pub fn calc_one_snapshot(
        &mut self,
        time: f64,
        single: &ParticleSet,
        binary: &ParticleSet,
        rc: f64,
        mode: AverageMode,
    ) -> Result<()> {
        let rows = self.compute_rows(single, binary, rc, mode)?;
        self.push_rows(time, &rows)
    }

    /// Column names of the flat table: `time`, then single, binary, all.
    pub fn column_names(&self) -> Vec<String> {
        let mut names = vec!["time".to_string()];
        names.extend(self.single.column_names(POPULATIONS[0]));
        names.extend(self.binary.column_names(POPULATIONS[1]));
        names.extend(self.all.column_names(POPULATIONS[2]));
        names
    }

    /// Flatten into one table row per snapshot.
    pub fn to_table(&self) -> Result<SeriesTable> {
        self.check_shape()?;
        let mut table = SeriesTable::with_capacity(1 + 3 * self.all.ncols(), self.len());
        let mut row = Vec::with_capacity(table.ncols());

        for (i, &time) in self.time.iter().enumerate() {
            row.clear();
            row.push(time);
            for lagr in [&self.single, &self.binary, &self.all] {
                if let Some(values) = lagr.row_values(i) {
                    row.extend(values);
                }
            }
            table.push_row(&row)?;
        }
        Ok(table)
    }

    /// Rebuild from a flat table written with [`Self::column_names`].
    ///
    /// The mass fractions encoded in `headers` must equal `mass_fraction`.
    pub fn from_table(
        mass_fraction: &MassFractions,
        headers: &[String],
        table: &SeriesTable,
    ) -> Result<Self> {
        let found = fractions_from_headers(headers)?;
        if found != *mass_fraction {
            return Err(LagrangianError::FractionMismatch {
                expected: mass_fraction.as_slice().to_vec(),
                found: found.as_slice().to_vec(),
            });
        }

        let mut multi = Self::new(found);
        let expected = multi.column_names();
        if headers != expected.as_slice() {
            return Err(LagrangianError::InvalidHeader(format!(
                "expected {} columns in standard order, found {}",
                expected.len(),
                headers.len()
            )));
        }
        if table.ncols() != expected.len() {
            return Err(SeriesError::RowWidth {
                expected: expected.len(),
                found: table.ncols(),
            }
            .into());
        }

        multi.reserve(table.len());
        let width = multi.all.ncols();
        for row in table.rows() {
            let (time, rest) = row.split_at(1);
            multi.time.push(time[0]);
            multi.single.push_values(&rest[..width])?;
            multi.binary.push_values(&rest[width..2 * width])?;
            multi.all.push_values(&rest[2 * width..])?;
        }
        multi.check_shape()?;
        Ok(multi)
    }
}

/// Recover the mass fractions from the `single.r[...]` column labels.
pub fn fractions_from_headers(headers: &[String]) -> Result<MassFractions> {
    let pattern = Regex::new(r"^single\.r\[([^\]]+)\]$")
        .map_err(|e| LagrangianError::InvalidHeader(e.to_string()))?;

    let mut fractions = Vec::new();
    for label in headers
        .iter()
        .filter_map(|h| pattern.captures(h))
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .filter(|&l| l != "rc")
    {
        let value = label.parse::<f64>().map_err(|_| {
            LagrangianError::InvalidHeader(format!("mass fraction label '{label}'"))
        })?;
        fractions.push(value);
    }

    Ok(MassFractions::new(fractions)?)
}
