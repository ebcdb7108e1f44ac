//! Sessions: a world, its replication endpoint and the transport between them
//!
//! A [`HostSession`] owns the authoritative world and optionally a local
//! visual replica wired to it in process. A [`ClientSession`] owns a
//! replica world fed from a remote host.

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use tokio::runtime::Handle;
use voxlink_net::{ConnectionId, NetClient, NetEvent, NetServer, ServerHandle};

use crate::core::error::Error;
use crate::core::types::{Result, Vec3};
use crate::mesh::NaiveMesher;
use crate::persistence::{
    FileGateway, PersistenceGateway, PlayerBlob, PlayerTransform, WorldMeta, WorldPaths, load_player,
    last_player_transform, open_or_create, save_player,
};
use crate::replication::{
    AuthorityEndpoint, AuthorityEvent, BlockEditRequest, ClientMessage, EditAction, Observer,
    ReplicaEndpoint, ServerMessage, ServerOutbox,
};
use crate::terrain::{NoiseTerrain, TerrainParams, TerrainSource, surface_spawn_point};
use crate::world::{NullSink, RenderSink, WorldConfig, WorldContext, WorldRole};

/// Connection id of the in-process replica on a host
pub const LOCAL_CONNECTION: ConnectionId = ConnectionId(0);

/// Replica living in the host process
struct LocalReplica {
    world: WorldContext,
    endpoint: ReplicaEndpoint,
    /// Authority -> replica, delivered on the next tick
    inbox: Vec<ServerMessage>,
    /// Replica -> authority, delivered on the next tick
    outbox: Vec<ClientMessage>,
}

/// Routes the local connection to the in-process inbox and everything else
/// to the network
struct HostOutbox<'a> {
    network: Option<&'a ServerHandle<ServerMessage>>,
    local: Option<&'a mut Vec<ServerMessage>>,
}

impl<'a> HostOutbox<'a> {
    fn new(server: Option<&'a NetServer<ClientMessage, ServerMessage>>, local: Option<&'a mut LocalReplica>) -> Self {
        Self {
            network: server.map(|s| s.handle()),
            local: local.map(|l| &mut l.inbox),
        }
    }
}

impl ServerOutbox for HostOutbox<'_> {
    fn send(&mut self, to: ConnectionId, message: ServerMessage) {
        if to == LOCAL_CONNECTION {
            if let Some(inbox) = self.local.as_mut() {
                inbox.push(message);
            }
        } else if let Some(network) = self.network {
            if !ServerHandle::send(network, to, message) {
                log::debug!("Dropped message for disconnected client {}", to);
            }
        }
    }
}

/// Authoritative host
pub struct HostSession {
    config: WorldConfig,
    paths: WorldPaths,
    meta: WorldMeta,
    world: WorldContext,
    endpoint: AuthorityEndpoint,
    server: Option<NetServer<ClientMessage, ServerMessage>>,
    local: Option<LocalReplica>,
    spawn_point: Vec3,
}

impl HostSession {
    /// Open (or create) the world named in `config` under its save root
    ///
    /// The seed comes from the world's manifest; `config.seed` only seeds
    /// new worlds. The authoritative world never builds geometry.
    pub fn open(config: WorldConfig) -> Result<Self> {
        let meta = open_or_create(&config.save_root, &config.world_name, config.seed)?;
        let paths = WorldPaths::new(&config.save_root, &config.world_name);

        let mut config = config;
        config.seed = meta.seed;

        let mut authority_config = config.clone();
        authority_config.render_meshes = false;

        let terrain: Arc<dyn TerrainSource> = Arc::new(NoiseTerrain::new(TerrainParams::with_seed(meta.seed)));
        let gateway: Arc<dyn PersistenceGateway> = Arc::new(FileGateway::new(paths.clone()));
        let mut world = WorldContext::new(
            WorldRole::Authority,
            authority_config,
            Arc::clone(&terrain),
            Arc::new(NaiveMesher),
            Some(gateway),
            Box::new(NullSink::new()),
        )?;

        let spawn_point = surface_spawn_point(terrain.as_ref(), world.block_size());
        world.set_default_viewpoint(spawn_point);

        log::info!(
            "Hosting world '{}' (seed {}) from {}",
            meta.world_name,
            meta.seed,
            paths.world_dir().display()
        );

        Ok(Self {
            config,
            paths,
            meta,
            world,
            endpoint: AuthorityEndpoint::new(),
            server: None,
            local: None,
            spawn_point,
        })
    }

    /// Accept remote replicas on `addr`
    pub fn listen(&mut self, addr: impl ToSocketAddrs, runtime: &Handle) -> Result<SocketAddr> {
        let server = NetServer::bind(addr, runtime).map_err(|e| Error::Net(e.to_string()))?;
        let local_addr = server.local_addr();
        self.server = Some(server);
        Ok(local_addr)
    }

    /// Add a visual replica for the host's own player
    ///
    /// It talks to the authority through in-process queues under
    /// [`LOCAL_CONNECTION`].
    pub fn attach_local_player(&mut self, player_id: &str, sink: Box<dyn RenderSink>) -> Result<()> {
        if self.local.is_some() {
            return Err(Error::Config("A local player is already attached".into()));
        }

        let world = WorldContext::new(
            WorldRole::Replica,
            self.config.clone(),
            Arc::clone(self.world.terrain()),
            Arc::new(NaiveMesher),
            None,
            sink,
        )?;
        let endpoint = ReplicaEndpoint::new(player_id, &self.config.replication);

        let mut outbox = Vec::new();
        endpoint.join(&mut outbox);
        self.endpoint.connect(LOCAL_CONNECTION);
        self.local = Some(LocalReplica {
            world,
            endpoint,
            inbox: Vec::new(),
            outbox,
        });
        Ok(())
    }

    /// Advance one host tick
    ///
    /// Network events and local requests are handled first, then the
    /// authoritative world and cell-set replication, then the local replica.
    pub fn tick(&mut self, dt: f32) {
        let events = match self.server.as_mut() {
            Some(server) => server.poll_events(),
            None => Vec::new(),
        };
        for event in events {
            match event {
                NetEvent::Connected { id, addr } => {
                    log::info!("Client {} connected from {}", id, addr);
                    self.endpoint.connect(id);
                }
                NetEvent::Message { id, message } => self.handle_client_message(id, message),
                NetEvent::Disconnected { id } => {
                    log::info!("Client {} disconnected", id);
                    if let Some(observer) = self.endpoint.disconnect(&mut self.world, id) {
                        if let Err(e) = save_observer(&self.paths, &observer) {
                            log::error!("Failed to save player for {}: {}", id, e);
                        }
                    }
                }
            }
        }

        let requests = match self.local.as_mut() {
            Some(local) => std::mem::take(&mut local.outbox),
            None => Vec::new(),
        };
        for message in requests {
            self.handle_client_message(LOCAL_CONNECTION, message);
        }

        self.world.tick(dt);
        {
            let mut out = HostOutbox::new(self.server.as_ref(), self.local.as_mut());
            self.endpoint.tick(&mut self.world, dt, &mut out);
        }

        if let Some(local) = self.local.as_mut() {
            let LocalReplica {
                world,
                endpoint,
                inbox,
                outbox,
            } = local;
            for message in std::mem::take(inbox) {
                endpoint.handle_message(world, message, outbox);
            }
            world.tick(dt);
            endpoint.process_world_events(world, outbox);
        }
    }

    fn handle_client_message(&mut self, id: ConnectionId, message: ClientMessage) {
        let mut out = HostOutbox::new(self.server.as_ref(), self.local.as_mut());
        match self.endpoint.handle_message(&mut self.world, id, message, &mut out) {
            Some(AuthorityEvent::Joined { id, player_id }) => {
                let spawn = last_player_transform(&self.paths, &player_id)
                    .map(|t| t.translation)
                    .filter(|p| p.is_finite())
                    .unwrap_or(self.spawn_point);
                self.endpoint.welcome(&mut self.world, id, spawn, &mut out);
            }
            Some(AuthorityEvent::EditApplied { id, op }) => {
                log::debug!("Edit from {}: chunk {} cell {} -> {}", id, op.chunk, op.index, op.block);
            }
            None => {}
        }
    }

    /// Move the local player, if one is attached
    pub fn move_local_player(&mut self, position: Vec3) -> bool {
        let Some(local) = self.local.as_mut() else {
            return false;
        };
        local.endpoint.set_viewpoint(&mut local.world, position, &mut local.outbox);
        true
    }

    /// Send an edit request on behalf of the local player
    pub fn local_edit(
        &mut self,
        origin: Vec3,
        direction: Vec3,
        action: EditAction,
        block: u8,
        reach: f32,
    ) -> Option<BlockEditRequest> {
        let local = self.local.as_mut()?;
        local
            .endpoint
            .request_edit(&local.world, origin, direction, action, block, reach, &mut local.outbox)
    }

    /// Save every known player and flush edited chunks
    pub fn shutdown(&mut self) -> Result<()> {
        let mut failed = 0;
        for (id, observer) in self.endpoint.observers() {
            if let Err(e) = save_observer(&self.paths, observer) {
                log::error!("Failed to save player for {}: {}", id, e);
                failed += 1;
            }
        }

        let flushed = self.world.flush_dirty_edits()?;
        log::info!(
            "Shut down world '{}': {} chunks flushed, {} players saved",
            self.meta.world_name,
            flushed,
            self.endpoint.observer_count() - failed
        );

        if failed > 0 {
            return Err(Error::Persistence(format!("{} player saves failed", failed)));
        }
        Ok(())
    }

    pub fn world(&self) -> &WorldContext {
        &self.world
    }

    pub fn endpoint(&self) -> &AuthorityEndpoint {
        &self.endpoint
    }

    /// The local player's replica world
    pub fn local_world(&self) -> Option<&WorldContext> {
        self.local.as_ref().map(|l| &l.world)
    }

    pub fn local_player(&self) -> Option<&ReplicaEndpoint> {
        self.local.as_ref().map(|l| &l.endpoint)
    }

    pub fn meta(&self) -> &WorldMeta {
        &self.meta
    }

    pub fn paths(&self) -> &WorldPaths {
        &self.paths
    }

    pub fn spawn_point(&self) -> Vec3 {
        self.spawn_point
    }

    /// Address remote replicas connect to, once listening
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().map(|s| s.local_addr())
    }
}

/// Write an observer's position into its player blob
///
/// Observers that never said hello or never reported a position are
/// skipped. Existing rotation, scale and save data are kept.
fn save_observer(paths: &WorldPaths, observer: &Observer) -> Result<()> {
    let (Some(player_id), Some(position)) = (observer.player_id.as_deref(), observer.position) else {
        return Ok(());
    };

    let mut blob = match load_player(paths, player_id) {
        Ok(Some(blob)) => blob,
        Ok(None) => PlayerBlob {
            player_id: player_id.to_string(),
            transform: PlayerTransform::default(),
            save_data: Vec::new(),
        },
        Err(e) => {
            log::warn!("Replacing unreadable save of player '{}': {}", player_id, e);
            PlayerBlob {
                player_id: player_id.to_string(),
                transform: PlayerTransform::default(),
                save_data: Vec::new(),
            }
        }
    };
    blob.transform.translation = position;
    save_player(paths, &blob)
}

/// Visual replica of a remote host
pub struct ClientSession {
    config: WorldConfig,
    /// Handed to the world once the host's welcome arrives
    sink: Option<Box<dyn RenderSink>>,
    world: Option<WorldContext>,
    endpoint: ReplicaEndpoint,
    client: NetClient<ServerMessage, ClientMessage>,
}

impl ClientSession {
    /// Connect to a host and say hello
    ///
    /// The replica world is created when the welcome arrives, using the
    /// host's seed.
    pub fn connect(
        addr: impl ToSocketAddrs,
        runtime: &Handle,
        config: WorldConfig,
        player_id: &str,
        sink: Box<dyn RenderSink>,
    ) -> Result<Self> {
        let mut client = NetClient::connect(addr, runtime).map_err(|e| Error::Net(e.to_string()))?;
        let endpoint = ReplicaEndpoint::new(player_id, &config.replication);
        endpoint.join(&mut client);

        Ok(Self {
            config,
            sink: Some(sink),
            world: None,
            endpoint,
            client,
        })
    }

    /// Handle received messages and advance the replica world
    pub fn tick(&mut self, dt: f32) -> Result<()> {
        for message in self.client.poll() {
            if let ServerMessage::Welcome { seed, .. } = &message {
                if self.world.is_none() {
                    self.world = Some(self.create_world(*seed)?);
                }
            }
            let Some(world) = self.world.as_mut() else {
                log::debug!("Ignoring message received before welcome");
                continue;
            };
            self.endpoint.handle_message(world, message, &mut self.client);
        }

        if let Some(world) = self.world.as_mut() {
            world.tick(dt);
            self.endpoint.process_world_events(world, &mut self.client);
        }
        Ok(())
    }

    fn create_world(&mut self, seed: u32) -> Result<WorldContext> {
        let mut config = self.config.clone();
        config.seed = seed;
        let sink: Box<dyn RenderSink> = match self.sink.take() {
            Some(sink) => sink,
            None => Box::new(NullSink::new()),
        };
        WorldContext::new(
            WorldRole::Replica,
            config,
            Arc::new(NoiseTerrain::new(TerrainParams::with_seed(seed))),
            Arc::new(NaiveMesher),
            None,
            sink,
        )
    }

    /// Move the player; `false` until welcomed
    pub fn set_viewpoint(&mut self, position: Vec3) -> bool {
        let Some(world) = self.world.as_mut() else {
            return false;
        };
        self.endpoint.set_viewpoint(world, position, &mut self.client);
        true
    }

    /// Raycast through the replica and ask the host for an edit
    pub fn request_edit(
        &mut self,
        origin: Vec3,
        direction: Vec3,
        action: EditAction,
        block: u8,
        reach: f32,
    ) -> Option<BlockEditRequest> {
        let world = self.world.as_ref()?;
        self.endpoint
            .request_edit(world, origin, direction, action, block, reach, &mut self.client)
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    pub fn world(&self) -> Option<&WorldContext> {
        self.world.as_ref()
    }

    pub fn endpoint(&self) -> &ReplicaEndpoint {
        &self.endpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    use crate::voxel::block::BlockId;
    use crate::voxel::chunk::{ChunkKey, world_to_voxel};

    fn test_config(root: &std::path::Path) -> WorldConfig {
        let mut config = WorldConfig::default();
        config.world_name = "Test".to_string();
        config.save_root = root.to_path_buf();
        config.streaming.render_radius = 1;
        config.streaming.worker_threads = 1;
        config.streaming.update_interval_secs = 0.0;
        config.streaming.max_enqueues_per_tick = 16;
        config.streaming.max_concurrent_jobs = 16;
        config.streaming.drain_max_items = 16;
        config
    }

    fn tick_until(host: &mut HostSession, mut done: impl FnMut(&HostSession) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(30);
        while !done(host) {
            assert!(Instant::now() < deadline, "timed out");
            host.tick(0.05);
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn welcomed_and_loaded(host: &HostSession) -> bool {
        match (host.local_player(), host.local_world()) {
            (Some(player), Some(world)) => {
                player.is_welcomed() && world.chunks_ready_around(host.spawn_point())
            }
            _ => false,
        }
    }

    #[test]
    fn test_open_uses_manifest_seed() {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let mut config = test_config(temp_dir.path());
        config.seed = 42;
        let first = HostSession::open(config.clone()).unwrap();
        assert_eq!(first.meta().seed, 42);
        assert!(!first.world().config().render_meshes);
        drop(first);

        config.seed = 7;
        let reopened = HostSession::open(config).unwrap();
        assert_eq!(reopened.meta().seed, 42);
        assert_eq!(reopened.world().config().seed, 42);
    }

    #[test]
    fn test_local_edit_reaches_replica() {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let mut host = HostSession::open(test_config(temp_dir.path())).unwrap();
        host.attach_local_player("alice", Box::new(NullSink::new())).unwrap();
        assert!(host.attach_local_player("bob", Box::new(NullSink::new())).is_err());

        tick_until(&mut host, welcomed_and_loaded);
        let spawn = host.spawn_point();
        assert_eq!(host.local_player().and_then(|p| p.spawn()), Some(spawn));

        let request = host
            .local_edit(spawn, Vec3::NEG_Y, EditAction::Place, BlockId::Stone.as_u8(), 500.0)
            .expect("spawn looks down at the surface");
        assert_eq!(request.hit_normal, Vec3::Y);

        let block_size = host.world().block_size();
        let placed = world_to_voxel(request.hit_point + request.hit_normal * block_size * 0.5, block_size);
        tick_until(&mut host, |h| {
            h.local_world().map(|w| w.block_at(placed)) == Some(BlockId::Stone.as_u8())
        });

        assert_eq!(host.world().block_at(placed), BlockId::Stone.as_u8());
        assert!(host.world().cell_set(ChunkKey::from_voxel(placed)).is_some());
    }

    #[test]
    fn test_shutdown_saves_player_and_chunks() {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let mut host = HostSession::open(test_config(temp_dir.path())).unwrap();
        host.attach_local_player("alice", Box::new(NullSink::new())).unwrap();
        tick_until(&mut host, welcomed_and_loaded);

        let spawn = host.spawn_point();
        host.local_edit(spawn, Vec3::NEG_Y, EditAction::Remove, 0, 500.0)
            .expect("spawn looks down at the surface");
        tick_until(&mut host, |h| h.world().cell_sets().next().is_some());

        let moved = spawn + Vec3::new(10.0, 0.0, 0.0);
        assert!(host.move_local_player(moved));
        tick_until(&mut host, |h| {
            h.endpoint().observer(LOCAL_CONNECTION).and_then(|o| o.position) == Some(moved)
        });

        host.shutdown().unwrap();

        let paths = host.paths().clone();
        let saved = load_player(&paths, "alice").unwrap().expect("player saved");
        assert_eq!(saved.transform.translation, moved);

        let chunk = ChunkKey::from_world_pos(spawn, host.world().block_size());
        assert!(paths.chunk_file(chunk).exists());
    }

    #[test]
    fn test_rejoin_spawns_at_saved_position() {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let config = test_config(temp_dir.path());
        let paths = WorldPaths::new(&config.save_root, &config.world_name);

        let saved_at = Vec3::new(300.0, 9000.0, -200.0);
        let mut host = HostSession::open(config).unwrap();
        save_player(
            &paths,
            &PlayerBlob {
                player_id: "alice".to_string(),
                transform: PlayerTransform::at(saved_at),
                save_data: vec![1, 2, 3],
            },
        )
        .unwrap();

        host.attach_local_player("alice", Box::new(NullSink::new())).unwrap();
        tick_until(&mut host, |h| h.local_player().is_some_and(|p| p.is_welcomed()));
        assert_eq!(host.local_player().and_then(|p| p.spawn()), Some(saved_at));

        host.shutdown().unwrap();
        let blob = load_player(&paths, "alice").unwrap().unwrap();
        assert_eq!(blob.save_data, vec![1, 2, 3]);
    }

    #[test]
    fn test_remote_client_joins() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();

        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let config = test_config(temp_dir.path());
        let mut host = HostSession::open(config.clone()).unwrap();
        let addr = host.listen("127.0.0.1:0", runtime.handle()).unwrap();

        let mut client =
            ClientSession::connect(addr, runtime.handle(), config, "bob", Box::new(NullSink::new())).unwrap();

        let deadline = Instant::now() + Duration::from_secs(30);
        while !client.endpoint().is_welcomed() {
            assert!(Instant::now() < deadline, "timed out");
            host.tick(0.05);
            client.tick(0.05).unwrap();
            std::thread::sleep(Duration::from_millis(2));
        }

        assert!(client.is_connected());
        assert_eq!(host.endpoint().observer_count(), 1);
        let world = client.world().expect("world created on welcome");
        assert_eq!(world.config().seed, host.meta().seed);
        assert_eq!(world.role(), WorldRole::Replica);
        assert_eq!(client.endpoint().spawn(), Some(host.spawn_point()));

        // Same seed, same base terrain
        for (x, z) in [(8, 8), (-40, 130), (500, -7)] {
            assert_eq!(world.terrain().column_top(x, z), host.world().terrain().column_top(x, z));
        }

        assert!(client.set_viewpoint(host.spawn_point() + Vec3::X));
    }
}
