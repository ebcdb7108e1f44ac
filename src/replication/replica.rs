//! Replica side of edit replication

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::core::types::Vec3;
use crate::math::Ray;
use crate::voxel::chunk::ChunkKey;
use crate::world::config::ReplicationConfig;
use crate::world::{NetApply, ViewpointId, WorldContext};

use super::protocol::{BlockEditRequest, ClientMessage, EditAction, ServerMessage};
use super::transport::ClientOutbox;

/// Viewpoint id a replica uses for its own player
pub const LOCAL_VIEWPOINT: ViewpointId = 0;

/// Applies replicated edits to a visual world and keeps it reconciled
#[derive(Debug)]
pub struct ReplicaEndpoint {
    player_id: String,
    snapshot_cooldown: Duration,
    /// When each chunk last had a snapshot requested
    last_snapshot_request: HashMap<ChunkKey, Instant>,
    spawn: Option<Vec3>,
    position: Option<Vec3>,
    /// Chunk the last area snapshot was centered on
    area_center: Option<ChunkKey>,
}

impl ReplicaEndpoint {
    pub fn new(player_id: impl Into<String>, config: &ReplicationConfig) -> Self {
        Self {
            player_id: player_id.into(),
            snapshot_cooldown: Duration::from_millis(config.snapshot_cooldown_ms),
            last_snapshot_request: HashMap::new(),
            spawn: None,
            position: None,
            area_center: None,
        }
    }

    /// Introduce ourselves to the authority
    pub fn join(&self, out: &mut impl ClientOutbox) {
        out.send(ClientMessage::Hello {
            player_id: self.player_id.clone(),
        });
    }

    /// Handle one message from the authority
    pub fn handle_message(
        &mut self,
        world: &mut WorldContext,
        message: ServerMessage,
        out: &mut impl ClientOutbox,
    ) {
        match message {
            ServerMessage::Welcome { spawn, .. } => {
                log::info!("Joined as '{}' at {}", self.player_id, spawn);
                self.spawn = Some(spawn);
                self.set_viewpoint(world, spawn, out);
            }
            ServerMessage::EditOp(op) => {
                if let NetApply::Applied { .. } = world.apply_net_op(op.chunk, op.index, op.block) {
                    self.request_snapshot_at(op.chunk, Instant::now(), out);
                }
            }
            ServerMessage::ChunkSnapshot { chunk, ops } => {
                log::trace!("Snapshot of chunk {}: {} cells", chunk, ops.len());
                world.apply_snapshot(chunk, &ops);
            }
            ServerMessage::CellSetDelta {
                chunk,
                added,
                changed,
                removed,
            } => {
                for cell in added.iter().chain(changed.iter()) {
                    world.apply_net_op(chunk, cell.index, cell.block);
                }
                for index in removed {
                    world.revert_cell(chunk, index);
                }
            }
        }
    }

    /// Move the local viewpoint, refreshing the area snapshot on chunk change
    pub fn set_viewpoint(&mut self, world: &mut WorldContext, position: Vec3, out: &mut impl ClientOutbox) {
        self.position = Some(position);
        world.add_viewpoint(LOCAL_VIEWPOINT, position);
        out.send(ClientMessage::ViewpointUpdate { position });

        let center = ChunkKey::from_world_pos(position, world.block_size());
        if self.area_center != Some(center) {
            self.area_center = Some(center);
            out.send(ClientMessage::AreaSnapshotRequest {
                center: position,
                radius: world.config().streaming.render_radius,
            });
        }
    }

    /// Ask for the edits of chunks that just became resident
    pub fn process_world_events(&mut self, world: &mut WorldContext, out: &mut impl ClientOutbox) {
        let block_size = world.block_size();
        for chunk in world.take_loaded_events() {
            out.send(ClientMessage::AreaSnapshotRequest {
                center: chunk.world_center(block_size),
                radius: 0,
            });
        }
    }

    /// Cast through the local world and send an edit request for the hit
    ///
    /// Returns the request, or `None` when nothing solid is within reach.
    pub fn request_edit(
        &self,
        world: &WorldContext,
        origin: Vec3,
        direction: Vec3,
        action: EditAction,
        block: u8,
        reach: f32,
        out: &mut impl ClientOutbox,
    ) -> Option<BlockEditRequest> {
        let hit = world.raycast(&Ray::new(origin, direction), reach)?;
        let request = BlockEditRequest {
            hit_point: hit.point,
            hit_normal: hit.normal,
            action,
            block: i32::from(block),
            claimed_reach: reach,
        };
        out.send(ClientMessage::EditRequest(request.clone()));
        Some(request)
    }

    /// Request a chunk snapshot unless one was requested within the cooldown
    fn request_snapshot_at(&mut self, chunk: ChunkKey, now: Instant, out: &mut impl ClientOutbox) -> bool {
        if let Some(last) = self.last_snapshot_request.get(&chunk) {
            if now.saturating_duration_since(*last) < self.snapshot_cooldown {
                return false;
            }
        }
        let cooldown = self.snapshot_cooldown;
        self.last_snapshot_request
            .retain(|_, last| now.saturating_duration_since(*last) < cooldown);
        self.last_snapshot_request.insert(chunk, now);
        out.send(ClientMessage::ChunkSnapshotRequest { chunk });
        true
    }

    pub fn player_id(&self) -> &str {
        &self.player_id
    }

    /// Spawn from the authority's welcome
    pub fn spawn(&self) -> Option<Vec3> {
        self.spawn
    }

    pub fn position(&self) -> Option<Vec3> {
        self.position
    }

    pub fn is_welcomed(&self) -> bool {
        self.spawn.is_some()
    }
}
