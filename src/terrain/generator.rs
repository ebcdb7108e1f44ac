//! Noise-based procedural terrain generation

use glam::Vec3;
use noise::{NoiseFn, OpenSimplex};

use crate::voxel::block::{BlockId, AIR};
use crate::voxel::chunk::{ChunkKey, CHUNK_SIZE_X, CHUNK_SIZE_Y, CHUNK_SIZE_Z, CHUNK_VOLUME, index_of};
use crate::voxel::data::VoxelChunkData;

/// Deterministic source of base terrain
///
/// Implementations must be pure functions of (seed, key) so any worker can
/// regenerate a chunk without shared state.
pub trait TerrainSource: Send + Sync {
    /// Seed this source was built with
    fn seed(&self) -> u32;

    /// Highest solid Y of the column at global voxel (x, z)
    fn column_top(&self, world_x: i32, world_z: i32) -> i32;

    /// Base terrain of one chunk, with an empty overlay
    fn generate(&self, key: ChunkKey) -> VoxelChunkData {
        let mut base = vec![AIR; CHUNK_VOLUME];

        for z in 0..CHUNK_SIZE_Z {
            for x in 0..CHUNK_SIZE_X {
                let top = self.column_top(key.x * CHUNK_SIZE_X + x, key.z * CHUNK_SIZE_Z + z);
                for y in 0..=top.min(CHUNK_SIZE_Y - 1) {
                    base[index_of(x, y, z) as usize] = layer_block(top - y).as_u8();
                }
            }
        }

        VoxelChunkData::from_base(key, base)
    }
}

/// Block for a cell `depth` levels below its column top
fn layer_block(depth: i32) -> BlockId {
    match depth {
        0 => BlockId::Grass,
        1..=3 => BlockId::Dirt,
        _ => BlockId::Stone,
    }
}

/// Parameters controlling terrain generation
#[derive(Clone, Debug)]
pub struct TerrainParams {
    pub seed: u32,
    pub frequency: f64,    // Noise input scale per voxel column
    pub height_scale: f32, // Vertical span of the noise
    pub height_offset: f32, // Lowest column height
}

impl Default for TerrainParams {
    fn default() -> Self {
        Self {
            seed: 1337,
            frequency: 0.05,
            height_scale: CHUNK_SIZE_Y as f32 * 0.6,
            height_offset: CHUNK_SIZE_Y as f32 * 0.2,
        }
    }
}

impl TerrainParams {
    pub fn with_seed(seed: u32) -> Self {
        Self { seed, ..Self::default() }
    }
}

/// OpenSimplex heightmap terrain
pub struct NoiseTerrain {
    params: TerrainParams,
    noise: OpenSimplex,
}

impl NoiseTerrain {
    /// Create a new terrain generator with the given parameters
    pub fn new(params: TerrainParams) -> Self {
        let noise = OpenSimplex::new(params.seed);
        Self { params, noise }
    }

    /// Get terrain parameters
    pub fn params(&self) -> &TerrainParams {
        &self.params
    }

    /// Map a noise sample in [-1, 1] to a column height in [1, SIZE_Y - 1]
    fn height_from_noise(&self, n: f64) -> i32 {
        let normalized = ((n as f32) + 1.0) * 0.5;
        let h = (normalized * self.params.height_scale + self.params.height_offset).round() as i32;
        h.clamp(1, CHUNK_SIZE_Y - 1)
    }
}

impl TerrainSource for NoiseTerrain {
    fn seed(&self) -> u32 {
        self.params.seed
    }

    fn column_top(&self, world_x: i32, world_z: i32) -> i32 {
        let nx = world_x as f64 * self.params.frequency;
        let nz = world_z as f64 * self.params.frequency;
        self.height_from_noise(self.noise.get([nx, nz]))
    }
}

/// Constant-height terrain, handy for tests and benchmarks
pub struct FlatTerrain {
    pub height: i32,
}

impl FlatTerrain {
    pub fn new(height: i32) -> Self {
        Self { height: height.clamp(0, CHUNK_SIZE_Y - 1) }
    }
}

impl TerrainSource for FlatTerrain {
    fn seed(&self) -> u32 {
        0
    }

    fn column_top(&self, _world_x: i32, _world_z: i32) -> i32 {
        self.height
    }
}

/// Spawn point above the surface at the middle of chunk (0, 0)
pub fn surface_spawn_point(terrain: &dyn TerrainSource, block_size: f32) -> Vec3 {
    let data = terrain.generate(ChunkKey::new(0, 0));
    let x = CHUNK_SIZE_X / 2;
    let z = CHUNK_SIZE_Z / 2;
    let surface = data.column_top(x, z).unwrap_or(CHUNK_SIZE_Y - 1);

    Vec3::new(
        x as f32 * block_size,
        (surface + 2) as f32 * block_size,
        z as f32 * block_size,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heights_in_range() {
        let terrain = NoiseTerrain::new(TerrainParams::default());
        for x in -64..64 {
            for z in -64..64 {
                let h = terrain.column_top(x * 7, z * 3);
                assert!((1..CHUNK_SIZE_Y).contains(&h), "height {} out of range", h);
            }
        }
    }

    #[test]
    fn test_deterministic() {
        let a = NoiseTerrain::new(TerrainParams::with_seed(42));
        let b = NoiseTerrain::new(TerrainParams::with_seed(42));
        let key = ChunkKey::new(3, -5);
        assert_eq!(a.generate(key), b.generate(key));
    }

    #[test]
    fn test_column_layers() {
        let terrain = NoiseTerrain::new(TerrainParams::default());
        let key = ChunkKey::new(0, 0);
        let data = terrain.generate(key);
        let top = terrain.column_top(0, 0);

        assert_eq!(data.get(0, top, 0), BlockId::Grass.as_u8());
        assert_eq!(data.get(0, top + 1, 0), AIR);
        if top >= 4 {
            assert_eq!(data.get(0, top - 3, 0), BlockId::Dirt.as_u8());
            assert_eq!(data.get(0, top - 4, 0), BlockId::Stone.as_u8());
        }
        assert!(!data.has_edits());
    }

    #[test]
    fn test_flat_terrain() {
        let terrain = FlatTerrain::new(4);
        let data = terrain.generate(ChunkKey::new(9, 9));
        assert_eq!(data.get(7, 4, 7), BlockId::Grass.as_u8());
        assert_eq!(data.get(7, 3, 7), BlockId::Dirt.as_u8());
        assert_eq!(data.get(7, 0, 7), BlockId::Stone.as_u8());
        assert_eq!(data.get(7, 5, 7), AIR);
    }

    #[test]
    fn test_surface_spawn_point() {
        let terrain = FlatTerrain::new(10);
        let spawn = surface_spawn_point(&terrain, 100.0);
        assert_eq!(spawn, Vec3::new(800.0, 1200.0, 800.0));
    }
}
