//! World configuration loaded from JSON

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::types::Result;
use crate::streaming::StreamingConfig;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Everything needed to open a world and run it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Folder name under `<save_root>/Worlds`.
    pub world_name: String,
    /// Terrain seed used when the world is first created.
    pub seed: u32,
    /// Edge length of one voxel in world units.
    pub block_size: f32,
    /// Build geometry for drained chunks. Off for a headless authority.
    pub render_meshes: bool,
    /// Directory holding the `Worlds` folder.
    pub save_root: PathBuf,

    // -- Sub-configs -------------------------------------------------------

    /// Desired-set scheduler and build pipeline.
    pub streaming: StreamingConfig,
    /// Edit validation and reconciliation.
    pub replication: ReplicationConfig,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            world_name: "World".to_string(),
            seed: 1337,
            block_size: 100.0,
            render_meshes: true,
            save_root: PathBuf::from("."),
            streaming: StreamingConfig::default(),
            replication: ReplicationConfig::default(),
        }
    }
}

impl WorldConfig {
    /// Read a config file; missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        let mut config: Self = serde_json::from_slice(&bytes)?;
        config.validate();
        Ok(config)
    }

    /// Write the config as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    /// Clamp values into their legal ranges, logging each correction.
    pub fn validate(&mut self) {
        if !(self.block_size.is_finite() && self.block_size > 0.0) {
            log::warn!("block_size {} reset to 100", self.block_size);
            self.block_size = 100.0;
        }
        if self.world_name.trim().is_empty() {
            log::warn!("Empty world_name replaced with 'World'");
            self.world_name = "World".to_string();
        }
        self.streaming.validate();
        self.replication.validate();
    }

    /// Reject configs that cannot open a world.
    pub fn check(&self) -> Result<()> {
        if self.world_name.trim().is_empty() {
            return Err(Error::Config("world_name must not be empty".to_string()));
        }
        if !(self.block_size.is_finite() && self.block_size > 0.0) {
            return Err(Error::Config(format!("invalid block_size {}", self.block_size)));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Replication
// ---------------------------------------------------------------------------

/// Edit validation and reconciliation parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Lower clamp for a client's claimed reach (world units).
    pub min_reach: f32,
    /// Upper clamp for a client's claimed reach (world units).
    pub max_reach: f32,
    /// Minimum gap between snapshot requests for one chunk (ms).
    pub snapshot_cooldown_ms: u64,
    /// Seconds between cell-set replication steps.
    pub cell_set_interval_secs: f32,
    /// Chunks beyond the render radius a cell set stays relevant.
    pub relevance_pad: i32,
    /// Upper bound for area snapshot requests, further clamped to the render radius.
    pub max_area_snapshot_radius: i32,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            min_reach: 150.0,
            max_reach: 800.0,
            snapshot_cooldown_ms: 150,
            cell_set_interval_secs: 0.1,
            relevance_pad: 1,
            max_area_snapshot_radius: 8,
        }
    }
}

impl ReplicationConfig {
    /// Clamp a claimed reach into the configured band.
    pub fn clamp_reach(&self, claimed: f32) -> f32 {
        if claimed.is_nan() {
            return self.min_reach;
        }
        claimed.clamp(self.min_reach, self.max_reach)
    }

    pub fn validate(&mut self) {
        if self.min_reach.is_nan() || self.min_reach < 0.0 {
            log::warn!("min_reach {} clamped to 0", self.min_reach);
            self.min_reach = 0.0;
        }
        if self.max_reach.is_nan() || self.max_reach < self.min_reach {
            log::warn!("max_reach {} raised to min_reach {}", self.max_reach, self.min_reach);
            self.max_reach = self.min_reach;
        }
        if self.cell_set_interval_secs.is_nan() || self.cell_set_interval_secs < 0.0 {
            log::warn!("cell_set_interval_secs {} reset to 0.1", self.cell_set_interval_secs);
            self.cell_set_interval_secs = 0.1;
        }
        if self.relevance_pad < 0 {
            log::warn!("relevance_pad {} clamped to 0", self.relevance_pad);
            self.relevance_pad = 0;
        }
        if self.max_area_snapshot_radius < 0 {
            log::warn!("max_area_snapshot_radius {} clamped to 0", self.max_area_snapshot_radius);
            self.max_area_snapshot_radius = 0;
        }
    }
}
