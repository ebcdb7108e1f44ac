//! voxlink - voxel chunk streaming with authoritative edit replication
//!
//! Worlds stream chunk columns around viewpoints, build them on a worker
//! pool and keep an authority's edits consistent across lagging replicas.

pub mod core;
pub mod math;
pub mod voxel;
pub mod terrain;
pub mod mesh;
pub mod persistence;
pub mod streaming;
pub mod world;
pub mod replication;
pub mod session;
