//! Core data types and I/O operations.

pub mod loaders;
pub mod particles;
pub mod series;
pub mod writers;

pub use loaders::{Snapshot, SnapshotEntry};
pub use particles::{Center, ParticleSet};
pub use series::SeriesTable;
pub use writers::{write_core_csv, write_lagrangian_csv, write_table_csv, WriteError};
