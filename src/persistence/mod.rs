//! Save data: chunk edit deltas, world manifests and player blobs

pub mod paths;
pub mod delta_file;
pub mod gateway;
pub mod manifest;
pub mod player;

pub use paths::{WorldPaths, sanitize_id, worlds_root};
pub use delta_file::{encode_ops, decode_ops, save_delta, load_delta};
pub use gateway::{PersistenceGateway, FileGateway, MemoryGateway, load_overlay_or_empty};
pub use manifest::{WorldMeta, open_or_create, world_exists, load_world_meta, list_worlds};
pub use player::{PlayerBlob, PlayerTransform, save_player, load_player, last_player_transform};
