//! World manifest (`world.json`): name, seed and timestamps

use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::types::Result;

use super::paths::{worlds_root, WorldPaths};

/// Metadata stored alongside each world
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldMeta {
    pub world_name: String,
    pub seed: u32,
    /// Creation time, unix seconds
    pub created: u64,
    /// Last open time, unix seconds
    pub last_played: u64,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Whether a world directory exists under `root`
pub fn world_exists(root: &Path, world_name: &str) -> bool {
    WorldPaths::new(root, world_name).world_dir().is_dir()
}

/// Read a world's manifest
pub fn load_world_meta(root: &Path, world_name: &str) -> Result<WorldMeta> {
    let json = fs::read_to_string(WorldPaths::new(root, world_name).manifest_path())?;
    Ok(serde_json::from_str(&json)?)
}

/// Open a world, creating its directories and manifest on first use
///
/// An existing manifest keeps its seed and creation time and gets
/// `last_played` bumped. `seed` only applies to new worlds.
pub fn open_or_create(root: &Path, world_name: &str, seed: u32) -> Result<WorldMeta> {
    if world_name.is_empty() {
        return Err(Error::Persistence("World name cannot be empty".into()));
    }

    let paths = WorldPaths::new(root, world_name);
    paths.create_dirs()?;

    let manifest_path = paths.manifest_path();
    let meta = if manifest_path.exists() {
        let json = fs::read_to_string(&manifest_path)?;
        let mut meta: WorldMeta = serde_json::from_str(&json)?;
        meta.last_played = unix_now().max(meta.last_played);
        meta
    } else {
        let now = unix_now();
        log::info!("Creating world '{}' with seed {}", world_name, seed);
        WorldMeta {
            world_name: world_name.to_string(),
            seed,
            created: now,
            last_played: now,
        }
    };

    fs::write(&manifest_path, serde_json::to_string_pretty(&meta)?)?;
    Ok(meta)
}

/// Every readable world under `root`, most recently played first
pub fn list_worlds(root: &Path) -> Result<Vec<WorldMeta>> {
    let dir = worlds_root(root);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut worlds = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        match load_world_meta(root, &name) {
            Ok(meta) => worlds.push(meta),
            Err(e) => log::warn!("Skipping world '{}': {}", name, e),
        }
    }

    worlds.sort_by(|a, b| b.last_played.cmp(&a.last_played));
    Ok(worlds)
}
