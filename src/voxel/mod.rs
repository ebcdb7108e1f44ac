//! Voxel data structures and operations

pub mod block;
pub mod chunk;
pub mod data;

pub use block::{BlockId, AIR};
pub use chunk::{
    ChunkKey, LocalIndex,
    CHUNK_SIZE_X, CHUNK_SIZE_Y, CHUNK_SIZE_Z, CHUNK_VOLUME,
    index_of, try_index, coords_of, in_bounds,
    world_to_voxel, voxel_to_local, local_to_voxel, voxel_center,
};
pub use data::{CellOp, VoxelChunkData};
