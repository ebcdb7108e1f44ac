//! Block ids and their presentation attributes

use serde::{Deserialize, Serialize};

/// Raw id of an empty cell
pub const AIR: u8 = 0;

/// Named block kinds
///
/// Chunk data stores raw `u8` ids; any value is legal and unknown ids
/// render with the fallback tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum BlockId {
    Air = 0,
    Dirt = 1,
    Grass = 2,
    Stone = 3,
    Sand = 4,
    Wood = 5,
    Water = 6,
    Gravel = 7,
    Snow = 8,
    Log = 9,
    Leaves = 10,
}

impl BlockId {
    /// Look up a named block from its raw id
    pub fn from_u8(id: u8) -> Option<Self> {
        Some(match id {
            0 => Self::Air,
            1 => Self::Dirt,
            2 => Self::Grass,
            3 => Self::Stone,
            4 => Self::Sand,
            5 => Self::Wood,
            6 => Self::Water,
            7 => Self::Gravel,
            8 => Self::Snow,
            9 => Self::Log,
            10 => Self::Leaves,
            _ => return None,
        })
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Air => "air",
            Self::Dirt => "dirt",
            Self::Grass => "grass",
            Self::Stone => "stone",
            Self::Sand => "sand",
            Self::Wood => "wood",
            Self::Water => "water",
            Self::Gravel => "gravel",
            Self::Snow => "snow",
            Self::Log => "log",
            Self::Leaves => "leaves",
        }
    }

    /// Parse a block name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        (0..=10u8)
            .filter_map(Self::from_u8)
            .find(|b| b.name().eq_ignore_ascii_case(name))
    }
}

impl From<BlockId> for u8 {
    fn from(id: BlockId) -> u8 {
        id as u8
    }
}

/// Tile (column, row) of a block in the 4x4 texture atlas
pub fn atlas_slot(id: u8) -> (u32, u32) {
    match BlockId::from_u8(id) {
        Some(BlockId::Grass) => (0, 0),
        Some(BlockId::Dirt) => (1, 0),
        Some(BlockId::Stone) => (2, 0),
        Some(BlockId::Sand) => (3, 0),
        Some(BlockId::Wood) => (0, 1),
        Some(BlockId::Gravel) => (1, 1),
        Some(BlockId::Snow) => (2, 1),
        Some(BlockId::Log) => (3, 1),
        Some(BlockId::Leaves) => (0, 2),
        Some(BlockId::Water) => (1, 2),
        _ => (3, 3),
    }
}

/// Vertex tint of a block
pub fn block_color(id: u8) -> [f32; 4] {
    match BlockId::from_u8(id) {
        Some(BlockId::Grass) => [0.1, 0.8, 0.1, 1.0],
        Some(BlockId::Dirt) => [0.45, 0.28, 0.13, 1.0],
        Some(BlockId::Stone) => [0.5, 0.5, 0.5, 1.0],
        _ => [1.0, 1.0, 1.0, 1.0],
    }
}
