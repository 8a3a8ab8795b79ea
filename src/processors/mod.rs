//! Snapshot analysis modules.

pub mod center;
pub mod kinematics;
pub mod lagrangian;
pub mod neighbors;
pub mod pipeline;
pub mod shells;

// Re-export key types for convenience
pub use center::{core_radius, density_center, potential_center, CenterError, CoreHistory};
pub use kinematics::{aggregate, BinKinematics, VelocityStats};
pub use lagrangian::{Lagrangian, LagrangianError, LagrangianMultiple, LagrangianRow};
pub use neighbors::{KdTreeIndex, NeighborSearch};
pub use pipeline::{BatchReport, PipelineError, SnapshotProcessor, SnapshotResult};
pub use shells::{partition, ShellPartition};
