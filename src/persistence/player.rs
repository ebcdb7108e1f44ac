//! Player save blobs: id, last transform and opaque game data

use std::fs;

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::core::types::Result;

use super::paths::WorldPaths;

/// Placement of a player in the world
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayerTransform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl PlayerTransform {
    pub fn at(translation: Vec3) -> Self {
        Self {
            translation,
            ..Self::default()
        }
    }
}

impl Default for PlayerTransform {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

/// Saved state of one player
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayerBlob {
    pub player_id: String,
    pub transform: PlayerTransform,
    /// Game-defined bytes, stored as base64
    #[serde(with = "base64_bytes")]
    pub save_data: Vec<u8>,
}

mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// Write a player's blob to `Players/<sanitized id>.sav`
pub fn save_player(paths: &WorldPaths, blob: &PlayerBlob) -> Result<()> {
    fs::create_dir_all(paths.players_dir())?;
    let path = paths.player_file(&blob.player_id);
    fs::write(&path, serde_json::to_vec_pretty(blob)?)?;
    log::debug!("Saved player '{}' to {}", blob.player_id, path.display());
    Ok(())
}

/// Read a player's blob; `Ok(None)` when the player has never been saved
pub fn load_player(paths: &WorldPaths, player_id: &str) -> Result<Option<PlayerBlob>> {
    let path = paths.player_file(player_id);
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(&path)?;
    Ok(Some(serde_json::from_slice(&bytes)?))
}

/// Last saved transform of a player, if any
pub fn last_player_transform(paths: &WorldPaths, player_id: &str) -> Option<PlayerTransform> {
    match load_player(paths, player_id) {
        Ok(blob) => blob.map(|b| b.transform),
        Err(e) => {
            log::warn!("Failed to read player '{}': {}", player_id, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_round_trip() {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let paths = WorldPaths::new(temp_dir.path(), "World");

        let blob = PlayerBlob {
            player_id: "alice".to_string(),
            transform: PlayerTransform::at(Vec3::new(1.0, 2.0, 3.0)),
            save_data: vec![0, 1, 2, 254, 255],
        };
        save_player(&paths, &blob).unwrap();

        assert_eq!(load_player(&paths, "alice").unwrap(), Some(blob));
        assert_eq!(
            last_player_transform(&paths, "alice").map(|t| t.translation),
            Some(Vec3::new(1.0, 2.0, 3.0))
        );
    }

    #[test]
    fn test_missing_player() {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let paths = WorldPaths::new(temp_dir.path(), "World");
        assert!(load_player(&paths, "nobody").unwrap().is_none());
        assert!(last_player_transform(&paths, "nobody").is_none());
    }

    #[test]
    fn test_unsafe_id_is_sanitized_on_disk() {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let paths = WorldPaths::new(temp_dir.path(), "World");
        let blob = PlayerBlob {
            player_id: "../evil".to_string(),
            transform: PlayerTransform::default(),
            save_data: Vec::new(),
        };
        save_player(&paths, &blob).unwrap();
        assert!(paths.players_dir().join("___evil.sav").exists());
        assert!(load_player(&paths, "../evil").unwrap().is_some());
    }

    #[test]
    fn test_save_data_is_base64() {
        let blob = PlayerBlob {
            player_id: "p".to_string(),
            transform: PlayerTransform::default(),
            save_data: b"hi".to_vec(),
        };
        let json = serde_json::to_string(&blob).unwrap();
        assert!(json.contains("\"save_data\":\"aGk=\""));
    }
}
