//! Resident chunk records

use crate::voxel::data::VoxelChunkData;

use super::sink::VisualHandle;

/// A chunk loaded into a world
#[derive(Debug)]
pub struct ChunkRecord {
    pub data: VoxelChunkData,
    /// Handle from the render sink, once geometry is attached
    pub visual: Option<VisualHandle>,
    /// Data changed since the last snapshot handed to a build job
    pub dirty: bool,
}

impl ChunkRecord {
    pub fn new(data: VoxelChunkData) -> Self {
        Self {
            data,
            visual: None,
            dirty: false,
        }
    }

    pub fn is_visible(&self) -> bool {
        self.visual.is_some()
    }
}
