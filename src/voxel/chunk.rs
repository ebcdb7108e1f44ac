//! Chunk keys, chunk dimensions and the canonical local index

use glam::{IVec3, Vec3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Voxels along X in one chunk
pub const CHUNK_SIZE_X: i32 = 16;
/// Voxels along Y (vertical) in one chunk
pub const CHUNK_SIZE_Y: i32 = 128;
/// Voxels along Z in one chunk
pub const CHUNK_SIZE_Z: i32 = 16;

/// Number of voxels in one chunk
pub const CHUNK_VOLUME: usize = (CHUNK_SIZE_X * CHUNK_SIZE_Y * CHUNK_SIZE_Z) as usize;

/// Flat index of a voxel inside a chunk
pub type LocalIndex = u16;

/// Integer coordinate identifying a chunk column in the world grid
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkKey {
    pub x: i32,
    pub z: i32,
}

impl ChunkKey {
    /// Create a new chunk key
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Chunk key owning the voxel nearest to a world position
    pub fn from_world_pos(pos: Vec3, block_size: f32) -> Self {
        Self::from_voxel(world_to_voxel(pos, block_size))
    }

    /// Chunk key owning a global voxel coordinate
    pub fn from_voxel(voxel: IVec3) -> Self {
        Self {
            x: voxel.x.div_euclid(CHUNK_SIZE_X),
            z: voxel.z.div_euclid(CHUNK_SIZE_Z),
        }
    }

    /// World-space position of local voxel (0, 0, 0)'s center
    pub fn world_origin(&self, block_size: f32) -> Vec3 {
        Vec3::new(
            (self.x * CHUNK_SIZE_X) as f32 * block_size,
            0.0,
            (self.z * CHUNK_SIZE_Z) as f32 * block_size,
        )
    }

    /// World-space position at the middle of the chunk's footprint (y = 0)
    pub fn world_center(&self, block_size: f32) -> Vec3 {
        self.world_origin(block_size)
            + Vec3::new(
                (CHUNK_SIZE_X / 2) as f32 * block_size,
                0.0,
                (CHUNK_SIZE_Z / 2) as f32 * block_size,
            )
    }

    /// Manhattan distance in chunk units
    pub fn manhattan(&self, other: ChunkKey) -> i32 {
        (self.x - other.x).abs() + (self.z - other.z).abs()
    }

    /// Chebyshev distance in chunk units
    pub fn chebyshev(&self, other: ChunkKey) -> i32 {
        (self.x - other.x).abs().max((self.z - other.z).abs())
    }

    /// Key offset by a chunk delta
    pub fn offset(&self, dx: i32, dz: i32) -> Self {
        Self::new(self.x + dx, self.z + dz)
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.z)
    }
}

/// Whether local coordinates fall inside a chunk
#[inline]
pub fn in_bounds(x: i32, y: i32, z: i32) -> bool {
    (0..CHUNK_SIZE_X).contains(&x)
        && (0..CHUNK_SIZE_Y).contains(&y)
        && (0..CHUNK_SIZE_Z).contains(&z)
}

/// Canonical flat index: `x + z * 16 + y * 256`
///
/// Callers must check bounds first; see [`try_index`].
#[inline]
pub fn index_of(x: i32, y: i32, z: i32) -> LocalIndex {
    (x + z * CHUNK_SIZE_X + y * CHUNK_SIZE_X * CHUNK_SIZE_Z) as LocalIndex
}

/// Flat index for in-bounds coordinates, `None` otherwise
#[inline]
pub fn try_index(x: i32, y: i32, z: i32) -> Option<LocalIndex> {
    in_bounds(x, y, z).then(|| index_of(x, y, z))
}

/// Decode a flat index back into local (x, y, z)
#[inline]
pub fn coords_of(index: LocalIndex) -> (i32, i32, i32) {
    let i = index as i32;
    let layer = CHUNK_SIZE_X * CHUNK_SIZE_Z;
    let y = i / layer;
    let rem = i % layer;
    (rem % CHUNK_SIZE_X, y, rem / CHUNK_SIZE_X)
}

/// Whether a raw index (as read from disk or the wire) addresses a voxel
#[inline]
pub fn valid_index(index: i64) -> bool {
    (0..CHUNK_VOLUME as i64).contains(&index)
}

/// Global voxel coordinate whose center is nearest to a world position
///
/// Voxel `i` is centered at `i * block_size` and spans half a block either side.
pub fn world_to_voxel(pos: Vec3, block_size: f32) -> IVec3 {
    let g = (pos / block_size + Vec3::splat(0.5)).floor();
    IVec3::new(g.x as i32, g.y as i32, g.z as i32)
}

/// Split a global voxel coordinate into its chunk key and local coordinate
pub fn voxel_to_local(voxel: IVec3) -> (ChunkKey, IVec3) {
    let key = ChunkKey::from_voxel(voxel);
    let local = IVec3::new(
        voxel.x.rem_euclid(CHUNK_SIZE_X),
        voxel.y,
        voxel.z.rem_euclid(CHUNK_SIZE_Z),
    );
    (key, local)
}

/// Global voxel coordinate of a chunk-local coordinate
pub fn local_to_voxel(key: ChunkKey, local: IVec3) -> IVec3 {
    IVec3::new(
        key.x * CHUNK_SIZE_X + local.x,
        local.y,
        key.z * CHUNK_SIZE_Z + local.z,
    )
}

/// World-space center of a voxel
pub fn voxel_center(voxel: IVec3, block_size: f32) -> Vec3 {
    voxel.as_vec3() * block_size
}
