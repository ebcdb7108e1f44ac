//! On-disk layout of a world's save directory
//!
//! ```text
//! <root>/Worlds/<world>/world.json
//! <root>/Worlds/<world>/Players/<id>.sav
//! <root>/Worlds/<world>/Chunks/<x>_<z>.bin
//! ```

use std::path::{Path, PathBuf};

use crate::voxel::chunk::ChunkKey;

/// Directory holding every world under a save root
pub fn worlds_root(root: &Path) -> PathBuf {
    root.join("Worlds")
}

/// Replace characters outside `[0-9A-Za-z_-]` with `_`; empty ids become `Player`
pub fn sanitize_id(id: &str) -> String {
    let safe: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    if safe.is_empty() {
        "Player".to_string()
    } else {
        safe
    }
}

/// Paths of one named world
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorldPaths {
    root: PathBuf,
    world_name: String,
}

impl WorldPaths {
    pub fn new(root: impl Into<PathBuf>, world_name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            world_name: world_name.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn world_name(&self) -> &str {
        &self.world_name
    }

    pub fn world_dir(&self) -> PathBuf {
        worlds_root(&self.root).join(&self.world_name)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.world_dir().join("world.json")
    }

    pub fn players_dir(&self) -> PathBuf {
        self.world_dir().join("Players")
    }

    pub fn player_file(&self, player_id: &str) -> PathBuf {
        self.players_dir().join(format!("{}.sav", sanitize_id(player_id)))
    }

    pub fn chunks_dir(&self) -> PathBuf {
        self.world_dir().join("Chunks")
    }

    pub fn chunk_file(&self, key: ChunkKey) -> PathBuf {
        self.chunks_dir().join(format!("{}_{}.bin", key.x, key.z))
    }

    /// Create the world, player and chunk directories
    pub fn create_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.players_dir())?;
        std::fs::create_dir_all(self.chunks_dir())
    }
}
