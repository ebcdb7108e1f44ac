//! Load/save of a chunk's sparse edit list

use std::collections::HashMap;
use std::sync::Mutex;

use crate::core::error::Error;
use crate::core::types::Result;
use crate::voxel::chunk::ChunkKey;
use crate::voxel::data::CellOp;

use super::delta_file::{decode_ops, encode_ops, load_delta, save_delta};
use super::paths::WorldPaths;

/// Byte-level persistence of per-chunk edit overlays
///
/// Called from worker threads, so implementations must be thread-safe.
pub trait PersistenceGateway: Send + Sync {
    /// Stored edits for a chunk, `None` when nothing was ever saved
    fn load_delta(&self, key: ChunkKey) -> Result<Option<Vec<CellOp>>>;

    /// Replace the stored edits for a chunk
    fn save_delta(&self, key: ChunkKey, ops: &[CellOp]) -> Result<()>;
}

/// Stored edits, or an empty list when the file is missing or unreadable
pub fn load_overlay_or_empty(gateway: &dyn PersistenceGateway, key: ChunkKey) -> Vec<CellOp> {
    match gateway.load_delta(key) {
        Ok(Some(ops)) => ops,
        Ok(None) => Vec::new(),
        Err(e) => {
            log::warn!("Discarding unreadable edits for chunk {}: {}", key, e);
            Vec::new()
        }
    }
}

/// Delta files under `<root>/Worlds/<world>/Chunks`
pub struct FileGateway {
    paths: WorldPaths,
}

impl FileGateway {
    pub fn new(paths: WorldPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &WorldPaths {
        &self.paths
    }
}

impl PersistenceGateway for FileGateway {
    fn load_delta(&self, key: ChunkKey) -> Result<Option<Vec<CellOp>>> {
        Ok(load_delta(&self.paths.chunk_file(key))?)
    }

    fn save_delta(&self, key: ChunkKey, ops: &[CellOp]) -> Result<()> {
        save_delta(&self.paths.chunk_file(key), ops)?;
        log::debug!("Saved {} edits for chunk {}", ops.len(), key);
        Ok(())
    }
}

/// In-memory gateway holding encoded delta files
///
/// Keeps the same byte format as [`FileGateway`], so corrupt-data handling
/// can be exercised without touching disk.
#[derive(Default)]
pub struct MemoryGateway {
    files: Mutex<HashMap<ChunkKey, Vec<u8>>>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the raw bytes stored for a chunk
    pub fn put_raw(&self, key: ChunkKey, bytes: Vec<u8>) {
        if let Ok(mut files) = self.files.lock() {
            files.insert(key, bytes);
        }
    }

    /// Number of chunks with stored edits
    pub fn len(&self) -> usize {
        self.files.lock().map(|files| files.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PersistenceGateway for MemoryGateway {
    fn load_delta(&self, key: ChunkKey) -> Result<Option<Vec<CellOp>>> {
        let files = self
            .files
            .lock()
            .map_err(|_| Error::Persistence("memory gateway lock poisoned".into()))?;
        match files.get(&key) {
            Some(bytes) => Ok(Some(decode_ops(bytes)?)),
            None => Ok(None),
        }
    }

    fn save_delta(&self, key: ChunkKey, ops: &[CellOp]) -> Result<()> {
        let mut files = self
            .files
            .lock()
            .map_err(|_| Error::Persistence("memory gateway lock poisoned".into()))?;
        files.insert(key, encode_ops(ops));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_gateway_round_trip() {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let gateway = FileGateway::new(WorldPaths::new(temp_dir.path(), "Test"));
        let key = ChunkKey::new(2, -4);

        assert!(gateway.load_delta(key).unwrap().is_none());
        gateway.save_delta(key, &[CellOp::new(17, 5)]).unwrap();
        assert_eq!(gateway.load_delta(key).unwrap(), Some(vec![CellOp::new(17, 5)]));
        assert!(gateway.paths().chunk_file(key).exists());
    }

    #[test]
    fn test_corrupt_file_reads_as_empty() {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let paths = WorldPaths::new(temp_dir.path(), "Test");
        paths.create_dirs().unwrap();
        let key = ChunkKey::new(0, 0);
        std::fs::write(paths.chunk_file(key), b"garbage!!!!!!").unwrap();

        let gateway = FileGateway::new(paths);
        assert!(gateway.load_delta(key).is_err());
        assert!(load_overlay_or_empty(&gateway, key).is_empty());
    }

    #[test]
    fn test_memory_gateway() {
        let gateway = MemoryGateway::new();
        let key = ChunkKey::new(1, 1);
        assert!(gateway.is_empty());

        gateway.save_delta(key, &[CellOp::new(3, 3)]).unwrap();
        assert_eq!(load_overlay_or_empty(&gateway, key), vec![CellOp::new(3, 3)]);

        gateway.put_raw(key, vec![1, 2, 3]);
        assert!(load_overlay_or_empty(&gateway, key).is_empty());
        assert_eq!(gateway.len(), 1);
    }
}
