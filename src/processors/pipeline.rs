//! Per-snapshot analysis and batch processing.
//!
//! For one snapshot the cluster frame is established first (centre and core
//! radius), both populations are moved into that frame, and the three
//! Lagrangian rows are computed. Snapshots are independent, so a batch is
//! analysed in parallel; results are sorted by time before they are
//! appended, since row order is time order.

use std::path::PathBuf;

use log::{debug, error, info, warn};
use rayon::prelude::*;
use thiserror::Error;

use crate::config::{AverageMode, CenterMethod, PipelineConfig};
use crate::core::loaders::{load_snapshot, LoaderError, Snapshot, SnapshotEntry};
use crate::core::particles::{Center, ParticleSet};

use super::center::{
    core_radius, density_center, estimate_density, potential_center, CenterError, CoreHistory,
};
use super::lagrangian::{LagrangianError, LagrangianMultiple, LagrangianRow};
use super::neighbors::KdTreeIndex;

/// Failure of one processing stage.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("load failed: {0}")]
    Load(#[from] LoaderError),

    #[error("frame failed: {0}")]
    Center(#[from] CenterError),

    #[error("Lagrangian step failed: {0}")]
    Lagrangian(#[from] LagrangianError),
}

/// Errors raised while processing snapshots.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// One snapshot failed; other snapshots are unaffected.
    #[error("snapshot '{}' (t = {time}): {source}", .path.display())]
    Snapshot {
        path: PathBuf,
        time: f64,
        #[source]
        source: StageError,
    },

    /// Appending finished rows failed.
    #[error(transparent)]
    Append(#[from] LagrangianError),

    #[error("failed to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Everything computed for one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotResult {
    pub time: f64,
    pub center: Center,
    pub rc: f64,
    /// Single, binary and combined rows
    pub rows: [LagrangianRow; 3],
}

/// Outcome of a batch: how many snapshots were appended and which failed.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub processed: usize,
    pub failures: Vec<PipelineError>,
}

/// Analyses snapshots with one fixed configuration.
#[derive(Debug, Clone)]
pub struct SnapshotProcessor {
    method: CenterMethod,
    mode: AverageMode,
    neighbor_count: usize,
    threads: usize,
}

impl SnapshotProcessor {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            method: config.center.method,
            mode: config.lagrangian.average_mode,
            neighbor_count: config.lagrangian.neighbor_count,
            threads: config.processing.threads,
        }
    }

    /// Centre and core radius of a snapshot.
    ///
    /// The core radius always uses the neighbour density, whichever centre
    /// method is selected.
    pub fn establish_frame(
        &self,
        single: &ParticleSet,
        binary: &ParticleSet,
    ) -> std::result::Result<(Center, f64), CenterError> {
        let mut all = single.join(binary);
        let index = KdTreeIndex::new(&all.pos);

        let center = match self.method {
            CenterMethod::Density => density_center(&mut all, &index, self.neighbor_count)?,
            CenterMethod::Potential => {
                let density = estimate_density(&all, &index, self.neighbor_count)?;
                all.set_density(density)?;
                potential_center(single, binary)?
            }
        };

        all.shift_to(&center);
        all.calc_r2();
        let rc = core_radius(&all)?;
        Ok((center, rc))
    }

    /// Full analysis of one loaded snapshot.
    ///
    /// `lagr` only supplies the mass fractions; it is not modified.
    pub fn analyze(
        &self,
        lagr: &LagrangianMultiple,
        snapshot: Snapshot,
    ) -> std::result::Result<SnapshotResult, StageError> {
        let Snapshot {
            time,
            mut single,
            mut binary,
            ..
        } = snapshot;

        let (center, rc) = self.establish_frame(&single, &binary)?;
        debug!(
            "t = {}: center pos {:?} vel {:?}, rc = {}",
            time, center.pos, center.vel, rc
        );

        single.shift_to(&center);
        binary.shift_to(&center);
        let rows = lagr.compute_rows(&single, &binary, rc, self.mode)?;

        Ok(SnapshotResult {
            time,
            center,
            rc,
            rows,
        })
    }

    fn load_and_analyze(
        &self,
        lagr: &LagrangianMultiple,
        entry: &SnapshotEntry,
    ) -> Result<SnapshotResult> {
        let attribute = |source: StageError| PipelineError::Snapshot {
            path: entry.path.clone(),
            time: entry.time,
            source,
        };

        let snapshot = load_snapshot(&entry.path, entry.time).map_err(|e| attribute(e.into()))?;
        debug!(
            "{}: {} singles, {} binaries",
            entry.path.display(),
            snapshot.single.len(),
            snapshot.binary.len()
        );
        self.analyze(lagr, snapshot).map_err(attribute)
    }

    /// Load and analyse every entry in parallel.
    ///
    /// Results come back in input order; one failing snapshot does not
    /// stop the others.
    pub fn analyze_batch<F>(
        &self,
        lagr: &LagrangianMultiple,
        entries: &[SnapshotEntry],
        on_done: F,
    ) -> Result<Vec<Result<SnapshotResult>>>
    where
        F: Fn(&SnapshotEntry) + Sync,
    {
        let run = || -> Vec<Result<SnapshotResult>> {
            entries
                .par_iter()
                .map(|entry| {
                    let result = self.load_and_analyze(lagr, entry);
                    on_done(entry);
                    result
                })
                .collect()
        };

        if self.threads == 0 {
            Ok(run())
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.threads)
                .build()?;
            Ok(pool.install(run))
        }
    }

    /// Process a batch and append the successful snapshots in time order.
    ///
    /// Failed snapshots are logged and returned in the report; nothing is
    /// appended for them.
    pub fn process_batch<F>(
        &self,
        entries: &[SnapshotEntry],
        lagr: &mut LagrangianMultiple,
        history: &mut CoreHistory,
        on_done: F,
    ) -> Result<BatchReport>
    where
        F: Fn(&SnapshotEntry) + Sync,
    {
        let results = self.analyze_batch(lagr, entries, on_done)?;

        let mut report = BatchReport::default();
        let mut done = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(snapshot) => done.push(snapshot),
                Err(e) => {
                    error!("{}", e);
                    report.failures.push(e);
                }
            }
        }

        report.processed = append_in_time_order(done, lagr, history)?;
        Ok(report)
    }
}

/// Sort results by time and append them.
///
/// Returns the number of snapshots appended.
pub fn append_in_time_order(
    mut results: Vec<SnapshotResult>,
    lagr: &mut LagrangianMultiple,
    history: &mut CoreHistory,
) -> Result<usize> {
    results.sort_by(|a, b| a.time.total_cmp(&b.time));

    if let (Some(&last), Some(first)) = (lagr.time().last(), results.first()) {
        if first.time <= last {
            warn!(
                "appending t = {} after existing t = {}, time axis is not increasing",
                first.time,
                last
            );
        }
    }

    lagr.reserve(results.len());
    for result in &results {
        lagr.push_rows(result.time, &result.rows)?;
        history.push(result.time, &result.center, result.rc);
        info!(
            "t = {}: rc = {:.6}, r_h(all) = {:.6}",
            result.time,
            result.rc,
            half_mass_radius(lagr, &result.rows[2]).unwrap_or(f64::NAN)
        );
    }
    Ok(results.len())
}

/// Radius of the 0.5 mass fraction in `row`, if that fraction is configured.
fn half_mass_radius(lagr: &LagrangianMultiple, row: &LagrangianRow) -> Option<f64> {
    let idx = lagr
        .mass_fraction()
        .as_slice()
        .iter()
        .position(|&f| f == 0.5)?;
    row.radius.get(idx).copied()
}

/// Output file paths for a filename prefix: `(<prefix>.lagr.csv, <prefix>.core.csv)`.
pub fn output_paths(prefix: &str) -> (PathBuf, PathBuf) {
    (
        PathBuf::from(format!("{}.lagr.csv", prefix)),
        PathBuf::from(format!("{}.core.csv", prefix)),
    )
}

/// True if both output files of `prefix` exist.
pub fn outputs_exist(prefix: &str) -> bool {
    let (lagr, core) = output_paths(prefix);
    lagr.exists() && core.exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MassFractions;
    use std::io::Write;
    use std::path::Path;
    use tempfile::tempdir;

    /// Planar cluster with four-fold symmetry: two rings of singles
    /// rotating about z, four binaries at rest in the cluster frame.
    fn write_snapshot(path: &Path, offset: [f64; 3], drift: [f64; 3]) {
        let mut file = std::fs::File::create(path).unwrap();
        writeln!(file, "type,mass,x,y,z,vx,vy,vz,pot").unwrap();
        let mut i = 0;
        for (n, radius) in [(8, 0.5), (16, 2.0)] {
            for k in 0..n {
                let phi = k as f64 * 2.0 * std::f64::consts::PI / n as f64;
                let p = [
                    offset[0] + radius * phi.cos(),
                    offset[1] + radius * phi.sin(),
                    offset[2],
                ];
                let v = [drift[0] - phi.sin(), drift[1] + phi.cos(), drift[2]];
                writeln!(
                    file,
                    "s,1.0,{},{},{},{},{},{},{}",
                    p[0], p[1], p[2], v[0], v[1], v[2], -1.0 / radius
                )
                .unwrap();
                i += 1;
            }
        }
        for k in 0..4 {
            let phi = k as f64 * std::f64::consts::FRAC_PI_2;
            writeln!(
                file,
                "b,2.0,{},{},{},{},{},{},-3.0",
                offset[0] + phi.cos(),
                offset[1] + phi.sin(),
                offset[2],
                drift[0],
                drift[1],
                drift[2]
            )
            .unwrap();
        }
        assert_eq!(i, 24);
    }

    fn config(method: CenterMethod) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.center.method = method;
        config.lagrangian.mass_fraction = MassFractions::new(vec![0.25, 0.5, 0.75]).unwrap();
        config.processing.threads = 2;
        config
    }

    #[test]
    fn test_frame_follows_offset_cluster() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.0");
        write_snapshot(&path, [10.0, -4.0, 2.0], [0.5, 0.0, 0.0]);
        let snapshot = load_snapshot(&path, 0.0).unwrap();

        for method in [CenterMethod::Density, CenterMethod::Potential] {
            let processor = SnapshotProcessor::new(&config(method));
            let (center, rc) = processor
                .establish_frame(&snapshot.single, &snapshot.binary)
                .unwrap();
            assert!((center.pos[0] - 10.0).abs() < 1e-9);
            assert!((center.pos[1] + 4.0).abs() < 1e-9);
            assert!((center.pos[2] - 2.0).abs() < 1e-9);
            assert!((center.vel[0] - 0.5).abs() < 1e-9);
            assert!(rc > 0.0 && rc < 2.0);
        }
    }

    #[test]
    fn test_analysis_is_translation_invariant() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("data.0");
        let b = dir.path().join("data.1");
        write_snapshot(&a, [0.0, 0.0, 0.0], [0.0, 0.0, 0.0]);
        write_snapshot(&b, [3.0, 1.0, -2.0], [0.0, 0.0, 1.0]);

        let cfg = config(CenterMethod::Density);
        let processor = SnapshotProcessor::new(&cfg);
        let lagr = LagrangianMultiple::new(cfg.lagrangian.mass_fraction.clone());

        let ra = processor.analyze(&lagr, load_snapshot(&a, 0.0).unwrap()).unwrap();
        let rb = processor.analyze(&lagr, load_snapshot(&b, 1.0).unwrap()).unwrap();
        assert!((ra.rc - rb.rc).abs() < 1e-9);
        for (x, y) in ra.rows[2].radius.iter().zip(rb.rows[2].radius.iter()) {
            assert!((x - y).abs() < 1e-9);
        }
        assert_eq!(ra.rows[1].count, rb.rows[1].count);
    }

    #[test]
    fn test_repeated_analysis_is_identical() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.0");
        write_snapshot(&path, [0.2, 0.0, 0.0], [0.0, 0.1, 0.0]);

        let cfg = config(CenterMethod::Density);
        let processor = SnapshotProcessor::new(&cfg);
        let lagr = LagrangianMultiple::new(cfg.lagrangian.mass_fraction.clone());
        let snapshot = load_snapshot(&path, 0.0).unwrap();

        let first = processor.analyze(&lagr, snapshot.clone()).unwrap();
        let second = processor.analyze(&lagr, snapshot).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_batch_appends_in_time_order() {
        let dir = tempdir().unwrap();
        let mut entries = Vec::new();
        for (name, time) in [("data.2", 2.0), ("data.0", 0.0), ("data.1", 1.0)] {
            let path = dir.path().join(name);
            write_snapshot(&path, [time, 0.0, 0.0], [0.0, 0.0, 0.0]);
            entries.push(SnapshotEntry { path, time });
        }

        let cfg = config(CenterMethod::Density);
        let processor = SnapshotProcessor::new(&cfg);
        let mut lagr = LagrangianMultiple::new(cfg.lagrangian.mass_fraction.clone());
        let mut history = CoreHistory::new();
        let seen = std::sync::atomic::AtomicUsize::new(0);

        let report = processor
            .process_batch(&entries, &mut lagr, &mut history, |_| {
                seen.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            })
            .unwrap();

        assert_eq!(report.processed, 3);
        assert!(report.failures.is_empty());
        assert_eq!(seen.into_inner(), 3);
        assert_eq!(lagr.time(), &[0.0, 1.0, 2.0]);
        assert_eq!(history.time, vec![0.0, 1.0, 2.0]);
        assert!(lagr.check_shape().is_ok());
        for (i, pos) in history.pos.iter().enumerate() {
            assert!((pos[0] - i as f64).abs() < 1e-9);
        }
    }

    #[test]
    fn test_failed_snapshot_is_attributed() {
        let dir = tempdir().unwrap();
        let good = dir.path().join("data.0");
        write_snapshot(&good, [0.0, 0.0, 0.0], [0.0, 0.0, 0.0]);
        let missing = dir.path().join("data.5");

        let entries = vec![
            SnapshotEntry {
                path: missing.clone(),
                time: 5.0,
            },
            SnapshotEntry {
                path: good,
                time: 0.0,
            },
        ];

        let cfg = config(CenterMethod::Density);
        let processor = SnapshotProcessor::new(&cfg);
        let mut lagr = LagrangianMultiple::new(cfg.lagrangian.mass_fraction.clone());
        let mut history = CoreHistory::new();
        let report = processor
            .process_batch(&entries, &mut lagr, &mut history, |_| {})
            .unwrap();

        assert_eq!(report.processed, 1);
        assert_eq!(lagr.len(), 1);
        assert_eq!(history.len(), 1);
        match &report.failures[..] {
            [PipelineError::Snapshot {
                path,
                time,
                source: StageError::Load(_),
            }] => {
                assert_eq!(path, &missing);
                assert_eq!(*time, 5.0);
            }
            other => panic!("Expected one load failure, got {:?}", other),
        }
    }

    #[test]
    fn test_degenerate_potential_center() {
        let mut single = ParticleSet::new();
        single.push_with_potential(1.0, [1.0, 0.0, 0.0], [0.0; 3], 0.5);
        single.push_with_potential(1.0, [-1.0, 0.0, 0.0], [0.0; 3], 0.5);
        let mut binary = ParticleSet::new();
        binary.pot = Some(Vec::new());

        let processor = SnapshotProcessor::new(&config(CenterMethod::Potential));
        let result = processor.establish_frame(&single, &binary);
        assert!(matches!(
            result,
            Err(CenterError::DegenerateCenter {
                method: CenterMethod::Potential,
                ..
            })
        ));
    }

    #[test]
    fn test_output_paths() {
        let (lagr, core) = output_paths("run/data");
        assert_eq!(lagr, PathBuf::from("run/data.lagr.csv"));
        assert_eq!(core, PathBuf::from("run/data.core.csv"));
        assert!(!outputs_exist("definitely/not/here"));
    }
}
