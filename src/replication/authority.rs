//! Authority side of edit replication

use std::collections::BTreeMap;

use voxlink_net::ConnectionId;

use crate::core::types::Vec3;
use crate::streaming::within_world_limit;
use crate::voxel::chunk::ChunkKey;
use crate::world::WorldContext;

use super::cell_set::CellSetMirror;
use super::protocol::{BlockEditOp, ClientMessage, ServerMessage};
use super::resolve::resolve_edit;
use super::transport::ServerOutbox;

/// A connected replica as the authority sees it
#[derive(Debug, Default)]
pub struct Observer {
    /// Save id from `Hello`
    pub player_id: Option<String>,
    /// Last reported viewpoint
    pub position: Option<Vec3>,
    mirror: CellSetMirror,
}

/// Things the session reacts to
#[derive(Clone, Debug, PartialEq)]
pub enum AuthorityEvent {
    /// Observer said hello; the session answers with [`AuthorityEndpoint::welcome`]
    Joined { id: ConnectionId, player_id: String },
    /// An edit was accepted and broadcast
    EditApplied { id: ConnectionId, op: BlockEditOp },
}

/// Validates requests, applies them to the authoritative world and fans
/// results out to observers
#[derive(Debug, Default)]
pub struct AuthorityEndpoint {
    observers: BTreeMap<ConnectionId, Observer>,
    /// Seconds since the last cell-set replication step
    accumulator: f32,
}

impl AuthorityEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection as an observer
    pub fn connect(&mut self, id: ConnectionId) {
        self.observers.entry(id).or_default();
    }

    /// Forget an observer and its viewpoint
    pub fn disconnect(&mut self, world: &mut WorldContext, id: ConnectionId) -> Option<Observer> {
        world.remove_viewpoint(id.0);
        self.observers.remove(&id)
    }

    /// Confirm a join: track the observer at `spawn` and tell it so
    pub fn welcome(
        &mut self,
        world: &mut WorldContext,
        id: ConnectionId,
        spawn: Vec3,
        out: &mut impl ServerOutbox,
    ) {
        let observer = self.observers.entry(id).or_default();
        observer.position = Some(spawn);
        world.add_viewpoint(id.0, spawn);
        out.send(
            id,
            ServerMessage::Welcome {
                spawn,
                seed: world.config().seed,
            },
        );
    }

    /// Handle one message from an observer
    pub fn handle_message(
        &mut self,
        world: &mut WorldContext,
        id: ConnectionId,
        message: ClientMessage,
        out: &mut impl ServerOutbox,
    ) -> Option<AuthorityEvent> {
        match message {
            ClientMessage::Hello { player_id } => {
                log::info!("Observer {} joined as '{}'", id, player_id);
                self.observers.entry(id).or_default().player_id = Some(player_id.clone());
                Some(AuthorityEvent::Joined { id, player_id })
            }
            ClientMessage::ViewpointUpdate { position } => {
                if !position.is_finite() {
                    log::debug!("Ignoring non-finite viewpoint from {}", id);
                    return None;
                }
                self.observers.entry(id).or_default().position = Some(position);
                world.add_viewpoint(id.0, position);
                None
            }
            ClientMessage::EditRequest(request) => {
                let position = self.observers.get(&id).and_then(|o| o.position);
                let edit = match resolve_edit(
                    &request,
                    position,
                    world.block_size(),
                    &world.config().replication,
                ) {
                    Ok(edit) => edit,
                    Err(rejection) => {
                        log::debug!("Rejected edit from {}: {}", id, rejection);
                        return None;
                    }
                };

                let outcome = world.apply_block_edit(edit.key, edit.local, edit.block)?;
                let op = BlockEditOp {
                    chunk: outcome.key,
                    index: outcome.index,
                    block: outcome.block,
                };
                self.broadcast(ServerMessage::EditOp(op), out);
                Some(AuthorityEvent::EditApplied { id, op })
            }
            ClientMessage::ChunkSnapshotRequest { chunk } => {
                let ops = world.modified_ops(chunk);
                out.send(id, ServerMessage::ChunkSnapshot { chunk, ops });
                None
            }
            ClientMessage::AreaSnapshotRequest { center, radius } => {
                self.send_area_snapshot(world, id, center, radius, out);
                None
            }
        }
    }

    /// Send non-empty snapshots of every chunk around `center`
    fn send_area_snapshot(
        &self,
        world: &WorldContext,
        id: ConnectionId,
        center: Vec3,
        radius: i32,
        out: &mut impl ServerOutbox,
    ) {
        if !center.is_finite() {
            return;
        }
        let config = world.config();
        let max = config
            .streaming
            .render_radius
            .min(config.replication.max_area_snapshot_radius)
            .max(0);
        let radius = radius.clamp(0, max);
        let limit = config.streaming.world_limit();
        let center = ChunkKey::from_world_pos(center, world.block_size());

        let mut sent = 0;
        for dx in -radius..=radius {
            for dz in -radius..=radius {
                let chunk = center.offset(dx, dz);
                if !within_world_limit(chunk, limit) {
                    continue;
                }
                let ops = world.modified_ops(chunk);
                if !ops.is_empty() {
                    out.send(id, ServerMessage::ChunkSnapshot { chunk, ops });
                    sent += 1;
                }
            }
        }
        log::trace!("Area snapshot around {} (r={}) for {}: {} chunks", center, radius, id, sent);
    }

    /// Send a message to every observer, including whoever caused it
    pub fn broadcast(&self, message: ServerMessage, out: &mut impl ServerOutbox) {
        for id in self.observers.keys() {
            out.send(*id, message.clone());
        }
    }

    /// Run cell-set replication when its interval has passed
    pub fn tick(&mut self, world: &mut WorldContext, dt: f32, out: &mut impl ServerOutbox) {
        self.accumulator += dt.max(0.0);
        if self.accumulator >= world.config().replication.cell_set_interval_secs {
            self.accumulator = 0.0;
            self.replicate_cell_sets(world, out);
        }
    }

    /// Diff every relevant cell set against each observer's mirror
    pub fn replicate_cell_sets(&mut self, world: &mut WorldContext, out: &mut impl ServerOutbox) {
        let destroyed = world.take_destroyed_cell_sets();
        let config = world.config();
        let relevance = config.streaming.render_radius + config.replication.relevance_pad;
        let block_size = world.block_size();

        for (id, observer) in self.observers.iter_mut() {
            for key in &destroyed {
                observer.mirror.forget(*key);
            }
            for key in observer.mirror.seen_keys() {
                if world.cell_set(key).is_none() {
                    observer.mirror.forget(key);
                }
            }

            let Some(position) = observer.position else {
                continue;
            };
            let center = ChunkKey::from_world_pos(position, block_size);

            for set in world.cell_sets() {
                if set.key().chebyshev(center) > relevance {
                    observer.mirror.forget(set.key());
                    continue;
                }
                let diff = observer.mirror.sync(set);
                if !diff.is_empty() {
                    out.send(
                        *id,
                        ServerMessage::CellSetDelta {
                            chunk: set.key(),
                            added: diff.added,
                            changed: diff.changed,
                            removed: diff.removed,
                        },
                    );
                }
            }
        }
    }

    pub fn observer(&self, id: ConnectionId) -> Option<&Observer> {
        self.observers.get(&id)
    }

    pub fn observers(&self) -> impl Iterator<Item = (ConnectionId, &Observer)> + '_ {
        self.observers.iter().map(|(id, o)| (*id, o))
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }
}
