//! Wire messages between replicas and the authority

use serde::{Deserialize, Serialize};

use crate::core::types::Vec3;
use crate::voxel::chunk::{ChunkKey, LocalIndex};
use crate::voxel::data::CellOp;

/// What an edit request does to the struck cell
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EditAction {
    /// Fill the cell in front of the struck face
    Place,
    /// Clear the struck cell
    Remove,
}

/// A client's intent to edit, as seen through its own replica
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockEditRequest {
    /// Point on the struck face
    pub hit_point: Vec3,
    /// Outward normal of the struck face
    pub hit_normal: Vec3,
    pub action: EditAction,
    /// Block to place; clamped to a byte, ignored for Remove
    pub block: i32,
    /// Reach the client claims, clamped by the authority
    pub claimed_reach: f32,
}

/// An accepted edit
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockEditOp {
    pub chunk: ChunkKey,
    pub index: LocalIndex,
    pub block: u8,
}

/// Client -> server
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg", content = "body")]
pub enum ClientMessage {
    /// Register as an observer under a player save id
    Hello { player_id: String },
    /// Current viewpoint position
    ViewpointUpdate { position: Vec3 },
    EditRequest(BlockEditRequest),
    /// All edits of one chunk
    ChunkSnapshotRequest { chunk: ChunkKey },
    /// Edits of every chunk within `radius` of `center`
    AreaSnapshotRequest { center: Vec3, radius: i32 },
}

/// Server -> client
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg", content = "body")]
pub enum ServerMessage {
    /// Join accepted; where the player starts and the terrain seed
    Welcome { spawn: Vec3, seed: u32 },
    EditOp(BlockEditOp),
    /// Complete edit list of one chunk
    ChunkSnapshot { chunk: ChunkKey, ops: Vec<CellOp> },
    /// Cell-set changes since the observer's last sync
    CellSetDelta {
        chunk: ChunkKey,
        added: Vec<CellOp>,
        changed: Vec<CellOp>,
        removed: Vec<LocalIndex>,
    },
}
