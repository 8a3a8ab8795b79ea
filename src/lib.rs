//! Structural diagnostics for N-body star cluster snapshots.
//!
//! This crate provides tools for:
//! - Loading snapshot CSV files with single stars and binary centres of mass
//! - Locating the cluster density (or potential) centre and the core radius
//! - Lagrangian radii with mass-weighted velocity means and dispersions for
//!   singles, binaries and all particles, collected as time series
//! - Writing, reloading and plotting those time series
//!
//! # Example
//!
//! ```no_run
//! use lagrangian_pipeline::config::{AverageMode, MassFractions};
//! use lagrangian_pipeline::core::loaders::load_snapshot;
//! use lagrangian_pipeline::processors::lagrangian::LagrangianMultiple;
//! use lagrangian_pipeline::{PipelineConfig, SnapshotProcessor};
//!
//! let snapshot = load_snapshot("data.0", 0.0).unwrap();
//! let processor = SnapshotProcessor::new(&PipelineConfig::default());
//! let mut lagr = LagrangianMultiple::new(MassFractions::default());
//!
//! let (center, rc) = processor.establish_frame(&snapshot.single, &snapshot.binary).unwrap();
//! let mut single = snapshot.single.clone();
//! let mut binary = snapshot.binary.clone();
//! single.shift_to(&center);
//! binary.shift_to(&center);
//! lagr.calc_one_snapshot(0.0, &single, &binary, rc, AverageMode::Sphere).unwrap();
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod processors;
pub mod visualization;

pub use config::{AverageMode, CenterMethod, MassFractions, PipelineConfig};
pub use core::particles::{Center, ParticleSet};
pub use processors::pipeline::SnapshotProcessor;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
