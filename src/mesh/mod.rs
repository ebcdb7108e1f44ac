//! Chunk geometry generation

pub mod mesher;

pub use mesher::{ChunkGeometry, MeshVertex, Mesher, NaiveMesher, atlas_uv};
