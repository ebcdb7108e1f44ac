//! Face-culling mesher producing upload-ready vertex buffers

use bytemuck::{Pod, Zeroable};

use crate::voxel::block::{atlas_slot, block_color, AIR};
use crate::voxel::chunk::{CHUNK_SIZE_X, CHUNK_SIZE_Y, CHUNK_SIZE_Z};
use crate::voxel::data::VoxelChunkData;

/// Tiles per atlas row and column
const ATLAS_TILES: f32 = 4.0;
/// Inset per tile edge, as a fraction of the tile
const ATLAS_PADDING: f32 = 0.03;

/// Vertex layout shared with the renderer (48 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct MeshVertex {
    /// Chunk-local position
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
    pub color: [f32; 4],
}

/// Geometry buffers for one chunk
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChunkGeometry {
    pub vertices: Vec<MeshVertex>,
    pub indices: Vec<u32>,
}

impl ChunkGeometry {
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Raw vertex bytes for upload
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    /// Raw index bytes for upload
    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }
}

/// Turns chunk data into geometry; knows nothing about scheduling
pub trait Mesher: Send + Sync {
    fn mesh(&self, data: &VoxelChunkData, block_size: f32) -> ChunkGeometry;
}

/// One quad per solid face that borders air
///
/// Cells outside the chunk count as air, so faces on chunk borders are
/// always emitted.
#[derive(Clone, Copy, Debug, Default)]
pub struct NaiveMesher;

/// Face normal and its four corners (unit cube, counter-clockwise seen from outside)
const FACES: [([f32; 3], [[f32; 3]; 4]); 6] = [
    ([1.0, 0.0, 0.0], [[1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [1.0, 1.0, 1.0], [1.0, 0.0, 1.0]]),
    ([-1.0, 0.0, 0.0], [[0.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 1.0], [0.0, 1.0, 0.0]]),
    ([0.0, 1.0, 0.0], [[0.0, 1.0, 0.0], [0.0, 1.0, 1.0], [1.0, 1.0, 1.0], [1.0, 1.0, 0.0]]),
    ([0.0, -1.0, 0.0], [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 0.0, 1.0], [0.0, 0.0, 1.0]]),
    ([0.0, 0.0, 1.0], [[0.0, 0.0, 1.0], [1.0, 0.0, 1.0], [1.0, 1.0, 1.0], [0.0, 1.0, 1.0]]),
    ([0.0, 0.0, -1.0], [[0.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 1.0, 0.0], [1.0, 0.0, 0.0]]),
];

impl Mesher for NaiveMesher {
    fn mesh(&self, data: &VoxelChunkData, block_size: f32) -> ChunkGeometry {
        let mut geometry = ChunkGeometry::default();
        let half = block_size * 0.5;

        for y in 0..CHUNK_SIZE_Y {
            for z in 0..CHUNK_SIZE_Z {
                for x in 0..CHUNK_SIZE_X {
                    let id = data.get(x, y, z);
                    if id == AIR {
                        continue;
                    }

                    let min = [
                        x as f32 * block_size - half,
                        y as f32 * block_size - half,
                        z as f32 * block_size - half,
                    ];
                    let (uv0, tile) = atlas_uv(id);
                    let color = block_color(id);

                    for (normal, corners) in FACES.iter() {
                        let nx = x + normal[0] as i32;
                        let ny = y + normal[1] as i32;
                        let nz = z + normal[2] as i32;
                        if data.get(nx, ny, nz) != AIR {
                            continue;
                        }

                        let base = geometry.vertices.len() as u32;
                        let uvs = [
                            [uv0[0], uv0[1]],
                            [uv0[0] + tile[0], uv0[1]],
                            [uv0[0] + tile[0], uv0[1] + tile[1]],
                            [uv0[0], uv0[1] + tile[1]],
                        ];
                        for (corner, uv) in corners.iter().zip(uvs) {
                            geometry.vertices.push(MeshVertex {
                                position: [
                                    min[0] + corner[0] * block_size,
                                    min[1] + corner[1] * block_size,
                                    min[2] + corner[2] * block_size,
                                ],
                                normal: *normal,
                                uv,
                                color,
                            });
                        }
                        geometry.indices.extend_from_slice(&[
                            base, base + 1, base + 2,
                            base, base + 2, base + 3,
                        ]);
                    }
                }
            }
        }

        geometry
    }
}

/// Atlas origin and usable tile size for a block, inset by the padding
pub fn atlas_uv(id: u8) -> ([f32; 2], [f32; 2]) {
    let tile = 1.0 / ATLAS_TILES;
    let pad = tile * ATLAS_PADDING;
    let (col, row) = atlas_slot(id);

    (
        [col as f32 * tile + pad, row as f32 * tile + pad],
        [tile - 2.0 * pad, tile - 2.0 * pad],
    )
}
