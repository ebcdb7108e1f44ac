//! Render sink seam between the world and whatever displays chunks

use crate::core::types::Vec3;
use crate::mesh::ChunkGeometry;
use crate::voxel::chunk::ChunkKey;

/// Opaque handle to a displayed chunk
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VisualHandle(pub u64);

/// Receives built geometry for display
pub trait RenderSink: Send {
    /// Show `geometry` at `origin`, replacing `existing` when given
    fn attach(
        &mut self,
        key: ChunkKey,
        origin: Vec3,
        geometry: &ChunkGeometry,
        existing: Option<VisualHandle>,
    ) -> VisualHandle;

    /// Stop displaying a chunk
    fn detach(&mut self, handle: VisualHandle);
}

/// Sink for headless worlds; hands out handles and keeps totals
#[derive(Debug, Default)]
pub struct NullSink {
    next_handle: u64,
    live: usize,
    uploaded_vertices: u64,
}

impl NullSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Visuals attached and not yet detached
    pub fn live(&self) -> usize {
        self.live
    }

    pub fn uploaded_vertices(&self) -> u64 {
        self.uploaded_vertices
    }
}

impl RenderSink for NullSink {
    fn attach(
        &mut self,
        key: ChunkKey,
        _origin: Vec3,
        geometry: &ChunkGeometry,
        existing: Option<VisualHandle>,
    ) -> VisualHandle {
        self.uploaded_vertices += geometry.vertex_count() as u64;
        if let Some(handle) = existing {
            return handle;
        }
        self.next_handle += 1;
        self.live += 1;
        log::trace!("Attached chunk {} as visual {}", key, self.next_handle);
        VisualHandle(self.next_handle)
    }

    fn detach(&mut self, _handle: VisualHandle) {
        self.live = self.live.saturating_sub(1);
    }
}
