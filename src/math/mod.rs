//! Ray casting against the voxel grid

pub mod ray;

pub use ray::{Ray, VoxelHit, cast_voxels};
