//! Server-owned per-chunk cell lists and per-observer mirrors

use std::collections::HashMap;

use crate::voxel::chunk::{ChunkKey, LocalIndex};
use crate::voxel::data::CellOp;

/// Edited cells of one chunk, replicated to observers
///
/// Entries are keyed by local index with find-or-add semantics; order is
/// first-edit order.
#[derive(Clone, Debug, PartialEq)]
pub struct ReplicatedCellSet {
    key: ChunkKey,
    cells: Vec<CellOp>,
    /// Position of each index in `cells`
    positions: HashMap<LocalIndex, usize>,
    /// Bumped on every change; mirrors skip unchanged sets
    revision: u64,
}

impl ReplicatedCellSet {
    pub fn new(key: ChunkKey) -> Self {
        Self {
            key,
            cells: Vec::new(),
            positions: HashMap::new(),
            revision: 0,
        }
    }

    pub fn key(&self) -> ChunkKey {
        self.key
    }

    /// Find-or-add the entry for `index`; returns whether anything changed
    pub fn upsert(&mut self, index: LocalIndex, block: u8) -> bool {
        match self.positions.get(&index) {
            Some(&pos) if self.cells[pos].block == block => false,
            Some(&pos) => {
                self.cells[pos].block = block;
                self.revision += 1;
                true
            }
            None => {
                self.positions.insert(index, self.cells.len());
                self.cells.push(CellOp::new(index, block));
                self.revision += 1;
                true
            }
        }
    }

    /// Drop the entry for `index`, keeping the order of the rest
    pub fn remove(&mut self, index: LocalIndex) -> bool {
        let Some(pos) = self.positions.remove(&index) else {
            return false;
        };
        self.cells.remove(pos);
        for cell in &self.cells[pos..] {
            if let Some(p) = self.positions.get_mut(&cell.index) {
                *p -= 1;
            }
        }
        self.revision += 1;
        true
    }

    pub fn get(&self, index: LocalIndex) -> Option<u8> {
        self.positions.get(&index).map(|&pos| self.cells[pos].block)
    }

    pub fn cells(&self) -> &[CellOp] {
        &self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }
}

/// Difference between what an observer has seen and a cell set's state
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CellSetDiff {
    pub added: Vec<CellOp>,
    pub changed: Vec<CellOp>,
    pub removed: Vec<LocalIndex>,
}

impl CellSetDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

/// What one observer last received for each cell set
#[derive(Debug, Default)]
pub struct CellSetMirror {
    seen: HashMap<ChunkKey, MirrorEntry>,
}

#[derive(Debug, Default)]
struct MirrorEntry {
    revision: u64,
    cells: HashMap<LocalIndex, u8>,
}

impl CellSetMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Diff `set` against the mirror and record the new state
    ///
    /// The first call for a set yields every cell as added.
    pub fn sync(&mut self, set: &ReplicatedCellSet) -> CellSetDiff {
        let first_sight = !self.seen.contains_key(&set.key());
        let entry = self.seen.entry(set.key()).or_default();
        if !first_sight && entry.revision == set.revision() {
            return CellSetDiff::default();
        }

        let mut diff = CellSetDiff::default();
        for cell in set.cells() {
            match entry.cells.get(&cell.index) {
                None => diff.added.push(*cell),
                Some(&block) if block != cell.block => diff.changed.push(*cell),
                Some(_) => {}
            }
        }
        for index in entry.cells.keys() {
            if set.get(*index).is_none() {
                diff.removed.push(*index);
            }
        }
        diff.removed.sort_unstable();

        entry.revision = set.revision();
        entry.cells = set.cells().iter().map(|c| (c.index, c.block)).collect();
        diff
    }

    /// Forget a set so the next sync is a full initial sync
    pub fn forget(&mut self, key: ChunkKey) -> bool {
        self.seen.remove(&key).is_some()
    }

    pub fn has_seen(&self, key: ChunkKey) -> bool {
        self.seen.contains_key(&key)
    }

    pub fn seen_keys(&self) -> Vec<ChunkKey> {
        self.seen.keys().copied().collect()
    }
}
