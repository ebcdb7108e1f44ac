//! Per-chunk voxel storage: dense base terrain plus a sparse edit overlay.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::block::AIR;
use super::chunk::{ChunkKey, LocalIndex, CHUNK_SIZE_Y, CHUNK_VOLUME, coords_of, try_index};

/// One modified cell: local index and the block id stored there.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellOp {
    pub index: LocalIndex,
    pub block: u8,
}

impl CellOp {
    pub fn new(index: LocalIndex, block: u8) -> Self {
        Self { index, block }
    }

    /// Local (x, y, z) of this cell
    pub fn coords(&self) -> (i32, i32, i32) {
        coords_of(self.index)
    }
}

/// Voxel grid of one chunk.
///
/// The overlay only ever holds cells whose value differs from the base
/// array; writing the base value back deletes the entry.
#[derive(Clone, Debug, PartialEq)]
pub struct VoxelChunkData {
    key: ChunkKey,
    /// Generated terrain, `CHUNK_VOLUME` entries
    base: Vec<u8>,
    /// Edits layered over the base
    overlay: HashMap<LocalIndex, u8>,
}

impl VoxelChunkData {
    /// All-air chunk.
    pub fn empty(key: ChunkKey) -> Self {
        Self {
            key,
            base: vec![AIR; CHUNK_VOLUME],
            overlay: HashMap::new(),
        }
    }

    /// Wrap generated terrain. Short input is padded with air, long input truncated.
    pub fn from_base(key: ChunkKey, mut base: Vec<u8>) -> Self {
        if base.len() != CHUNK_VOLUME {
            log::warn!(
                "Chunk {} base has {} cells, expected {}",
                key,
                base.len(),
                CHUNK_VOLUME
            );
            base.resize(CHUNK_VOLUME, AIR);
        }
        Self {
            key,
            base,
            overlay: HashMap::new(),
        }
    }

    pub fn key(&self) -> ChunkKey {
        self.key
    }

    /// Block at local coordinates; air when out of bounds.
    pub fn get(&self, x: i32, y: i32, z: i32) -> u8 {
        match try_index(x, y, z) {
            Some(index) => self.get_index(index),
            None => AIR,
        }
    }

    /// Block at a flat index; air when out of range.
    pub fn get_index(&self, index: LocalIndex) -> u8 {
        if let Some(&id) = self.overlay.get(&index) {
            return id;
        }
        self.base.get(index as usize).copied().unwrap_or(AIR)
    }

    /// Unedited value at a flat index.
    pub fn base_at(&self, index: LocalIndex) -> u8 {
        self.base.get(index as usize).copied().unwrap_or(AIR)
    }

    /// Write a block at local coordinates.
    ///
    /// Returns whether the visible value changed. Out-of-range writes do nothing.
    pub fn set(&mut self, x: i32, y: i32, z: i32, id: u8) -> bool {
        match try_index(x, y, z) {
            Some(index) => self.set_index(index, id),
            None => false,
        }
    }

    /// Write a block at a flat index, maintaining the overlay invariant.
    pub fn set_index(&mut self, index: LocalIndex, id: u8) -> bool {
        if index as usize >= CHUNK_VOLUME {
            return false;
        }
        let before = self.get_index(index);
        if self.base[index as usize] == id {
            self.overlay.remove(&index);
        } else {
            self.overlay.insert(index, id);
        }
        before != id
    }

    /// Drop any edit at `index`, restoring the base value. Returns whether the value changed.
    pub fn revert_index(&mut self, index: LocalIndex) -> bool {
        match self.overlay.remove(&index) {
            Some(id) => id != self.base_at(index),
            None => false,
        }
    }

    /// Apply a batch of ops. Returns whether any visible value changed.
    pub fn apply_ops<'a>(&mut self, ops: impl IntoIterator<Item = &'a CellOp>) -> bool {
        let mut changed = false;
        for op in ops {
            changed |= self.set_index(op.index, op.block);
        }
        changed
    }

    /// Overlay as ops sorted by index.
    pub fn overlay_ops(&self) -> Vec<CellOp> {
        let mut ops: Vec<CellOp> = self
            .overlay
            .iter()
            .map(|(&index, &block)| CellOp::new(index, block))
            .collect();
        ops.sort_by_key(|op| op.index);
        ops
    }

    pub fn overlay(&self) -> &HashMap<LocalIndex, u8> {
        &self.overlay
    }

    pub fn overlay_len(&self) -> usize {
        self.overlay.len()
    }

    pub fn has_edits(&self) -> bool {
        !self.overlay.is_empty()
    }

    pub fn clear_overlay(&mut self) {
        self.overlay.clear();
    }

    /// Highest non-air Y in a column, if any.
    pub fn column_top(&self, x: i32, z: i32) -> Option<i32> {
        (0..CHUNK_SIZE_Y)
            .rev()
            .find(|&y| self.get(x, y, z) != AIR)
    }
}
