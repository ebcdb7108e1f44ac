//! Chunk streaming: desired sets, build scheduling and drain budgets

pub mod desired;
pub mod budget;
pub mod config;
pub mod pipeline;

pub use desired::{DesiredSet, WorldSizeTier, within_unload_band, within_world_limit};
pub use budget::{DrainBudget, DrainMeter};
pub use config::StreamingConfig;
pub use pipeline::{BuildCompletion, BuildPipeline, BuildSettings, ChunkMeshResult};
