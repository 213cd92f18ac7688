//! Materialized prefix hierarchy: per-scope `depth`/`children` maintenance
//! and the per-scope serialization primitive used by writers.

pub mod locks;
pub mod rebuild;
pub mod sweep;

pub use locks::ScopeLocks;
pub use rebuild::{rebuild, rebuild_in, RebuildStats};
pub use sweep::{sweep, HierarchyEntry};
