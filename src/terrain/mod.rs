//! Procedural terrain generation

pub mod generator;
pub use generator::{
    TerrainSource, TerrainParams, NoiseTerrain, FlatTerrain,
    surface_spawn_point,
};
