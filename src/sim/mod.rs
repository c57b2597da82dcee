//! In-process cluster used by the simulator binary and the test suites.
mod aide;
mod cluster;
mod mesh;

pub use aide::{SafeTxnTable, SimAide};
pub use cluster::{Decision, SimCluster};
pub use mesh::{InMemoryMesh, LinkFailure};
