//! One world instance: resident records, streaming scheduler and edit application

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::core::error::Error;
use crate::core::types::{IVec3, Result, Vec3};
use crate::math::{Ray, VoxelHit, cast_voxels};
use crate::mesh::Mesher;
use crate::persistence::gateway::PersistenceGateway;
use crate::replication::cell_set::ReplicatedCellSet;
use crate::streaming::{
    BuildCompletion, BuildPipeline, BuildSettings, DesiredSet, DrainBudget,
    within_unload_band, within_world_limit,
};
use crate::terrain::TerrainSource;
use crate::voxel::block::AIR;
use crate::voxel::chunk::{
    CHUNK_SIZE_X, CHUNK_SIZE_Z, ChunkKey, LocalIndex, coords_of, try_index, voxel_to_local,
};
use crate::voxel::data::CellOp;

use super::config::WorldConfig;
use super::readiness::Readiness;
use super::record::ChunkRecord;
use super::sink::RenderSink;

/// Identifies a tracked viewpoint
pub type ViewpointId = u64;

/// Whether a world owns the truth or mirrors it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorldRole {
    /// Validates edits, persists overlays and owns cell sets
    Authority,
    /// Applies replicated ops; never persists
    Replica,
}

/// Net delta cell waiting for its chunk to become resident
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingCell {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub block: u8,
}

impl PendingCell {
    pub fn from_op(op: CellOp) -> Self {
        let (x, y, z) = op.coords();
        Self { x, y, z, block: op.block }
    }
}

/// Result of applying an edit on the authority
#[derive(Clone, Debug, PartialEq)]
pub struct EditOutcome {
    pub key: ChunkKey,
    pub index: LocalIndex,
    /// Value of the cell after the edit
    pub block: u8,
    /// Whether the visible value changed
    pub changed: bool,
    /// Chunks whose rebuild was kicked, edited chunk first
    pub rebuilt: Vec<ChunkKey>,
}

/// What happened to a replicated op
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetApply {
    /// Chunk resident; `changed` tells whether the value differed
    Applied { changed: bool },
    /// Chunk not resident; queued until it loads
    Queued,
}

/// Owning context for one world
///
/// Every piece of mutable world state lives here and is touched only from
/// the thread running [`WorldContext::tick`]. Build jobs get owned copies.
pub struct WorldContext {
    role: WorldRole,
    config: WorldConfig,
    records: HashMap<ChunkKey, ChunkRecord>,
    /// Ticket of the build currently expected for each key
    building: HashMap<ChunkKey, u64>,
    /// Tickets of builds still running for chunks that were evicted
    orphaned: HashSet<u64>,
    pending_net: HashMap<ChunkKey, Vec<PendingCell>>,
    cell_sets: HashMap<ChunkKey, ReplicatedCellSet>,
    desired: DesiredSet,
    viewpoints: HashMap<ViewpointId, Vec3>,
    default_viewpoint: Vec3,
    pipeline: BuildPipeline,
    sink: Box<dyn RenderSink>,
    /// Seconds since the last streaming pass
    accumulator: f32,
    loaded_events: Vec<ChunkKey>,
    destroyed_cell_sets: Vec<ChunkKey>,
}

impl WorldContext {
    /// Create a world
    ///
    /// # Arguments
    /// * `role` - Authority or replica
    /// * `config` - World settings; validated here
    /// * `terrain` - Base terrain source
    /// * `mesher` - Geometry builder
    /// * `gateway` - Edit persistence (authority only)
    /// * `sink` - Receives built geometry
    pub fn new(
        role: WorldRole,
        mut config: WorldConfig,
        terrain: Arc<dyn TerrainSource>,
        mesher: Arc<dyn Mesher>,
        gateway: Option<Arc<dyn PersistenceGateway>>,
        sink: Box<dyn RenderSink>,
    ) -> Result<Self> {
        config.validate();
        config.check()?;

        let gateway = match role {
            WorldRole::Authority => gateway,
            WorldRole::Replica => {
                if gateway.is_some() {
                    log::warn!("Replica worlds do not persist edits; ignoring gateway");
                }
                None
            }
        };

        let settings = BuildSettings {
            block_size: config.block_size,
            build_geometry: config.render_meshes,
            worker_threads: config.streaming.worker_threads,
        };
        let pipeline = BuildPipeline::new(settings, terrain, mesher, gateway)?;

        log::info!(
            "Created {:?} world '{}' (seed {}, render radius {})",
            role,
            config.world_name,
            config.seed,
            config.streaming.render_radius
        );

        Ok(Self {
            role,
            config,
            records: HashMap::new(),
            building: HashMap::new(),
            orphaned: HashSet::new(),
            pending_net: HashMap::new(),
            cell_sets: HashMap::new(),
            desired: DesiredSet::default(),
            viewpoints: HashMap::new(),
            default_viewpoint: Vec3::ZERO,
            pipeline,
            sink,
            accumulator: 0.0,
            loaded_events: Vec::new(),
            destroyed_cell_sets: Vec::new(),
        })
    }

    // --- Tick ---

    /// Advance the world: drain builds, then run streaming when due
    pub fn tick(&mut self, dt: f32) {
        self.pipeline.poll_saves();
        self.drain_completed();

        self.accumulator += dt.max(0.0);
        if self.accumulator >= self.config.streaming.update_interval_secs {
            self.accumulator = 0.0;
            self.update_streaming();
        }
    }

    /// Drain builds under the configured budget
    pub fn drain_completed(&mut self) -> usize {
        let budget = self.config.streaming.drain_budget();
        self.drain_with(&budget)
    }

    /// Drain builds under an explicit budget
    pub fn drain_with(&mut self, budget: &DrainBudget) -> usize {
        let completions = self.pipeline.drain(budget);
        let count = completions.len();
        for completion in completions {
            self.handle_completion(completion);
        }
        count
    }

    fn handle_completion(&mut self, completion: BuildCompletion) {
        let key = completion.key();
        if self.orphaned.remove(&completion.ticket()) {
            // Built from data that predates the eviction; a reload rebuilds from stored edits
            log::trace!("Discarding orphaned build {} of chunk {}", completion.ticket(), key);
            return;
        }
        match self.building.get(&key) {
            Some(&current) if current != completion.ticket() => {
                log::trace!("Discarding stale build {} of chunk {}", completion.ticket(), key);
                return;
            }
            Some(_) => {
                self.building.remove(&key);
            }
            None => {}
        }

        let result = match completion {
            BuildCompletion::Built(result) => result,
            BuildCompletion::Failed { key, reason, .. } => {
                log::warn!("Build of chunk {} failed: {}", key, reason);
                return;
            }
        };

        let desired = self.desired.contains(key);
        if !desired && !self.records.contains_key(&key) {
            log::trace!("Discarding build of unwanted chunk {}", key);
            return;
        }

        if !self.records.contains_key(&key) {
            let mut record = ChunkRecord::new(result.data);
            if let Some(pending) = self.pending_net.remove(&key) {
                log::debug!("Applying {} queued cells to chunk {}", pending.len(), key);
                for cell in pending {
                    if record.data.set(cell.x, cell.y, cell.z, cell.block) {
                        record.dirty = true;
                    }
                }
            }
            self.records.insert(key, record);
            self.loaded_events.push(key);
        }

        let Some(record) = self.records.get_mut(&key) else {
            return;
        };
        if record.dirty {
            // Geometry is already stale; show the rebuild instead
            self.kick_build(key);
            return;
        }
        if desired || record.visual.is_some() {
            let origin = key.world_origin(result.block_size);
            record.visual = Some(self.sink.attach(key, origin, &result.geometry, record.visual));
        }
    }

    /// One scheduling pass: desired set, unload, then enqueue
    pub fn update_streaming(&mut self) {
        let centers = self.centers();
        let radius = self.config.streaming.render_radius;
        let pad = self.config.streaming.unload_pad;
        self.desired = DesiredSet::compute(&centers, radius, self.config.streaming.world_limit());

        let evict: Vec<ChunkKey> = self
            .records
            .keys()
            .copied()
            .filter(|key| !self.desired.contains(*key) && !within_unload_band(*key, &centers, radius, pad))
            .collect();
        for key in evict {
            self.evict(key);
        }

        let slots = self
            .config
            .streaming
            .max_concurrent_jobs
            .saturating_sub(self.pipeline.in_flight())
            .min(self.config.streaming.max_enqueues_per_tick);
        if slots == 0 {
            return;
        }

        let candidates: Vec<ChunkKey> = self
            .desired
            .iter()
            .filter(|key| {
                !self.building.contains_key(key)
                    && !self.records.get(key).is_some_and(|r| r.visual.is_some())
            })
            .take(slots)
            .collect();

        for key in candidates {
            let snapshot = self.records.get_mut(&key).map(|record| {
                record.dirty = false;
                record.data.clone()
            });
            let ticket = self.pipeline.submit(key, snapshot);
            self.building.insert(key, ticket);
        }
    }

    /// Chunk coordinate of every tracked viewpoint, or of the default one
    pub fn centers(&self) -> Vec<ChunkKey> {
        let block_size = self.config.block_size;
        if self.viewpoints.is_empty() {
            return vec![ChunkKey::from_world_pos(self.default_viewpoint, block_size)];
        }
        let mut centers: Vec<ChunkKey> = self
            .viewpoints
            .values()
            .map(|pos| ChunkKey::from_world_pos(*pos, block_size))
            .collect();
        centers.sort();
        centers.dedup();
        centers
    }

    fn evict(&mut self, key: ChunkKey) {
        let Some(record) = self.records.remove(&key) else {
            return;
        };

        if let Some(handle) = record.visual {
            self.sink.detach(handle);
        }
        if self.role == WorldRole::Authority && record.data.has_edits() {
            self.pipeline.persist_async(key, record.data.overlay_ops());
        }
        if let Some(ticket) = self.building.remove(&key) {
            self.orphaned.insert(ticket);
        }
        if self.cell_sets.remove(&key).is_some() {
            self.destroyed_cell_sets.push(key);
        }

        log::debug!("Unloaded chunk {}", key);
    }

    /// Rebuild a resident chunk from a snapshot, or flag it if a build is running
    pub fn kick_build(&mut self, key: ChunkKey) {
        let Some(record) = self.records.get_mut(&key) else {
            return;
        };
        if self.building.contains_key(&key) {
            record.dirty = true;
            return;
        }
        record.dirty = false;
        let ticket = self.pipeline.submit(key, Some(record.data.clone()));
        self.building.insert(key, ticket);
    }

    // --- Edits ---

    /// Make a chunk resident synchronously, without a visual
    pub fn ensure_loaded_for_edit(&mut self, key: ChunkKey) -> &mut ChunkRecord {
        let pipeline = &self.pipeline;
        self.records.entry(key).or_insert_with(|| {
            log::debug!("Loading chunk {} for edit", key);
            ChunkRecord::new(pipeline.load_chunk_data(key))
        })
    }

    /// Apply a validated edit on the authority
    ///
    /// Returns `None` for out-of-range coordinates or chunks outside the
    /// world limit.
    pub fn apply_block_edit(&mut self, key: ChunkKey, local: IVec3, block: u8) -> Option<EditOutcome> {
        let index = try_index(local.x, local.y, local.z)?;
        if !within_world_limit(key, self.config.streaming.world_limit()) {
            log::debug!("Edit outside world limit at chunk {}", key);
            return None;
        }

        let record = self.ensure_loaded_for_edit(key);
        let changed = record.data.set_index(index, block);
        let block = record.data.get_index(index);
        if changed {
            record.dirty = true;
            if self.role == WorldRole::Authority {
                self.cell_sets
                    .entry(key)
                    .or_insert_with(|| ReplicatedCellSet::new(key))
                    .upsert(index, block);
            }
        }

        let mut rebuilt = vec![key];
        self.kick_build(key);
        for neighbour in border_neighbours(key, local) {
            if self.records.contains_key(&neighbour) {
                self.kick_build(neighbour);
                rebuilt.push(neighbour);
            }
        }

        Some(EditOutcome {
            key,
            index,
            block,
            changed,
            rebuilt,
        })
    }

    /// Apply a replicated op, or queue it until the chunk loads
    pub fn apply_net_op(&mut self, key: ChunkKey, index: LocalIndex, block: u8) -> NetApply {
        let Some(record) = self.records.get_mut(&key) else {
            self.pending_net
                .entry(key)
                .or_default()
                .push(PendingCell::from_op(CellOp::new(index, block)));
            return NetApply::Queued;
        };

        let changed = record.data.set_index(index, block);
        if changed {
            record.dirty = true;
            self.kick_build(key);
        }
        NetApply::Applied { changed }
    }

    /// Replace a chunk's edits with an authoritative op list
    ///
    /// On a resident chunk, overlay cells missing from `ops` revert to base.
    /// A non-resident chunk has its queue replaced.
    pub fn apply_snapshot(&mut self, key: ChunkKey, ops: &[CellOp]) -> NetApply {
        let Some(record) = self.records.get_mut(&key) else {
            if ops.is_empty() {
                self.pending_net.remove(&key);
            } else {
                self.pending_net
                    .insert(key, ops.iter().copied().map(PendingCell::from_op).collect());
            }
            return NetApply::Queued;
        };

        let keep: HashSet<LocalIndex> = ops.iter().map(|op| op.index).collect();
        let stale: Vec<LocalIndex> = record
            .data
            .overlay()
            .keys()
            .copied()
            .filter(|index| !keep.contains(index))
            .collect();

        let mut changed = false;
        for index in stale {
            changed |= record.data.revert_index(index);
        }
        changed |= record.data.apply_ops(ops);

        if changed {
            record.dirty = true;
            self.kick_build(key);
        }
        NetApply::Applied { changed }
    }

    /// Return a cell to its base value
    pub fn revert_cell(&mut self, key: ChunkKey, index: LocalIndex) -> NetApply {
        let Some(record) = self.records.get_mut(&key) else {
            if let Some(queue) = self.pending_net.get_mut(&key) {
                let (x, y, z) = coords_of(index);
                queue.retain(|c| (c.x, c.y, c.z) != (x, y, z));
                if queue.is_empty() {
                    self.pending_net.remove(&key);
                }
            }
            return NetApply::Queued;
        };

        let changed = record.data.revert_index(index);
        if changed {
            record.dirty = true;
            self.kick_build(key);
        }
        NetApply::Applied { changed }
    }

    /// Current edits of a chunk, resident or stored
    pub fn modified_ops(&self, key: ChunkKey) -> Vec<CellOp> {
        match self.records.get(&key) {
            Some(record) => record.data.overlay_ops(),
            None => self.pipeline.stored_overlay(key),
        }
    }

    /// Synchronously save every resident overlay with edits
    ///
    /// Also waits for pending unload saves. Returns the number of chunks
    /// written.
    pub fn flush_dirty_edits(&mut self) -> Result<usize> {
        if self.role != WorldRole::Authority || !self.pipeline.has_gateway() {
            return Ok(0);
        }

        let mut keys: Vec<ChunkKey> = self
            .records
            .iter()
            .filter(|(_, record)| record.data.has_edits())
            .map(|(key, _)| *key)
            .collect();
        keys.sort();

        let mut saved = 0;
        let mut failed = 0;
        for key in keys {
            let ops = self.modified_ops(key);
            match self.pipeline.persist_now(key, &ops) {
                Ok(()) => saved += 1,
                Err(e) => {
                    log::error!("Failed to save edits for chunk {}: {}", key, e);
                    failed += 1;
                }
            }
        }

        if !self.pipeline.wait_for_saves(Duration::from_secs(5)) {
            failed += self.pipeline.pending_saves();
        }

        log::info!("Flushed edits for {} chunks", saved);
        if failed > 0 {
            return Err(Error::Persistence(format!("{} chunk saves failed", failed)));
        }
        Ok(saved)
    }

    // --- Readiness ---

    /// Displayed chunks in the square of `radius` around `pos`
    ///
    /// The radius is clamped to `[1, render_radius]`.
    pub fn readiness_around(&self, pos: Vec3, radius: i32) -> Readiness {
        let max = self.config.streaming.render_radius.max(1);
        let radius = radius.max(1).min(max);
        let center = ChunkKey::from_world_pos(pos, self.config.block_size);
        let limit = self.config.streaming.world_limit();

        let mut readiness = Readiness::default();
        for dx in -radius..=radius {
            for dz in -radius..=radius {
                let key = center.offset(dx, dz);
                if !within_world_limit(key, limit) {
                    continue;
                }
                readiness.needed += 1;
                if self.is_visible(key) {
                    readiness.ready += 1;
                }
            }
        }
        readiness
    }

    /// Whether the full render radius around `pos` is displayed
    pub fn chunks_ready_around(&self, pos: Vec3) -> bool {
        self.readiness_around(pos, self.config.streaming.render_radius)
            .is_complete()
    }

    pub fn chunks_ready_around_clamped(&self, pos: Vec3, radius: i32) -> bool {
        self.readiness_around(pos, radius).is_complete()
    }

    /// No builds in flight and every desired chunk displayed
    pub fn streaming_idle(&self) -> bool {
        self.pipeline.in_flight() == 0 && self.desired.iter().all(|key| self.is_visible(key))
    }

    // --- Viewpoints ---

    /// Track a viewpoint, or move it if already tracked
    pub fn add_viewpoint(&mut self, id: ViewpointId, pos: Vec3) {
        self.viewpoints.insert(id, pos);
    }

    pub fn remove_viewpoint(&mut self, id: ViewpointId) -> bool {
        self.viewpoints.remove(&id).is_some()
    }

    pub fn clear_viewpoints(&mut self) {
        self.viewpoints.clear();
    }

    /// Position used when no viewpoint is tracked
    pub fn set_default_viewpoint(&mut self, pos: Vec3) {
        self.default_viewpoint = pos;
    }

    pub fn viewpoint(&self, id: ViewpointId) -> Option<Vec3> {
        self.viewpoints.get(&id).copied()
    }

    // --- Queries ---

    /// Block at a global voxel coordinate; air when not resident
    pub fn block_at(&self, voxel: IVec3) -> u8 {
        let (key, local) = voxel_to_local(voxel);
        self.records
            .get(&key)
            .map(|r| r.data.get(local.x, local.y, local.z))
            .unwrap_or(AIR)
    }

    /// First solid resident voxel along a ray
    pub fn raycast(&self, ray: &Ray, max_distance: f32) -> Option<VoxelHit> {
        cast_voxels(ray, max_distance, self.config.block_size, |voxel| self.block_at(voxel) != AIR)
    }

    pub fn role(&self) -> WorldRole {
        self.role
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub fn block_size(&self) -> f32 {
        self.config.block_size
    }

    pub fn record(&self, key: ChunkKey) -> Option<&ChunkRecord> {
        self.records.get(&key)
    }

    pub fn is_resident(&self, key: ChunkKey) -> bool {
        self.records.contains_key(&key)
    }

    pub fn is_visible(&self, key: ChunkKey) -> bool {
        self.records.get(&key).is_some_and(|r| r.visual.is_some())
    }

    pub fn is_building(&self, key: ChunkKey) -> bool {
        self.building.contains_key(&key)
    }

    pub fn is_desired(&self, key: ChunkKey) -> bool {
        self.desired.contains(key)
    }

    pub fn resident_count(&self) -> usize {
        self.records.len()
    }

    pub fn resident_keys(&self) -> Vec<ChunkKey> {
        let mut keys: Vec<ChunkKey> = self.records.keys().copied().collect();
        keys.sort();
        keys
    }

    pub fn pending_net(&self, key: ChunkKey) -> &[PendingCell] {
        self.pending_net.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn cell_set(&self, key: ChunkKey) -> Option<&ReplicatedCellSet> {
        self.cell_sets.get(&key)
    }

    pub fn cell_sets(&self) -> impl Iterator<Item = &ReplicatedCellSet> + '_ {
        self.cell_sets.values()
    }

    /// Chunks that became resident since the last call
    pub fn take_loaded_events(&mut self) -> Vec<ChunkKey> {
        std::mem::take(&mut self.loaded_events)
    }

    /// Cell sets destroyed by eviction since the last call
    pub fn take_destroyed_cell_sets(&mut self) -> Vec<ChunkKey> {
        std::mem::take(&mut self.destroyed_cell_sets)
    }

    pub fn pipeline(&self) -> &BuildPipeline {
        &self.pipeline
    }

    pub fn terrain(&self) -> &Arc<dyn TerrainSource> {
        self.pipeline.terrain()
    }
}

/// Resident-or-not neighbours sharing a face with an edited border cell
fn border_neighbours(key: ChunkKey, local: IVec3) -> Vec<ChunkKey> {
    let mut neighbours = Vec::with_capacity(2);
    if local.x == 0 {
        neighbours.push(key.offset(-1, 0));
    } else if local.x == CHUNK_SIZE_X - 1 {
        neighbours.push(key.offset(1, 0));
    }
    if local.z == 0 {
        neighbours.push(key.offset(0, -1));
    } else if local.z == CHUNK_SIZE_Z - 1 {
        neighbours.push(key.offset(0, 1));
    }
    neighbours
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Instant;

    use crate::mesh::{ChunkGeometry, NaiveMesher};
    use crate::persistence::gateway::MemoryGateway;
    use crate::terrain::FlatTerrain;
    use crate::voxel::block::BlockId;
    use crate::voxel::chunk::{CHUNK_VOLUME, index_of};
    use crate::world::sink::{NullSink, VisualHandle};

    const BLOCK: f32 = 100.0;

    /// Sink that records every attach as (key, vertex count)
    #[derive(Clone, Default)]
    struct RecordingSink {
        attached: Arc<Mutex<Vec<(ChunkKey, usize)>>>,
        next: u64,
    }

    impl RecordingSink {
        fn attaches_of(&self, key: ChunkKey) -> Vec<usize> {
            self.attached
                .lock()
                .unwrap()
                .iter()
                .filter(|(k, _)| *k == key)
                .map(|(_, v)| *v)
                .collect()
        }
    }

    impl RenderSink for RecordingSink {
        fn attach(
            &mut self,
            key: ChunkKey,
            _origin: Vec3,
            geometry: &ChunkGeometry,
            existing: Option<VisualHandle>,
        ) -> VisualHandle {
            self.attached.lock().unwrap().push((key, geometry.vertex_count()));
            existing.unwrap_or_else(|| {
                self.next += 1;
                VisualHandle(self.next)
            })
        }

        fn detach(&mut self, _handle: VisualHandle) {}
    }

    fn test_config(radius: i32) -> WorldConfig {
        let mut config = WorldConfig::default();
        config.streaming.render_radius = radius;
        config.streaming.worker_threads = 2;
        config.streaming.max_concurrent_jobs = 64;
        config.streaming.max_enqueues_per_tick = 64;
        config.streaming.drain_max_items = 64;
        config
    }

    fn world(role: WorldRole, radius: i32, gateway: Option<Arc<dyn PersistenceGateway>>) -> WorldContext {
        WorldContext::new(
            role,
            test_config(radius),
            Arc::new(FlatTerrain::new(4)),
            Arc::new(NaiveMesher),
            gateway,
            Box::new(NullSink::new()),
        )
        .expect("world")
    }

    fn wait_for_builds(world: &WorldContext) {
        let deadline = Instant::now() + Duration::from_secs(30);
        while world.pipeline().ready_count() < world.pipeline().in_flight() {
            assert!(Instant::now() < deadline, "timed out waiting for builds");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Run streaming and drain until nothing is left to do
    fn settle(world: &mut WorldContext) {
        let deadline = Instant::now() + Duration::from_secs(30);
        loop {
            world.update_streaming();
            wait_for_builds(world);
            world.drain_with(&DrainBudget::unlimited());
            if world.streaming_idle() {
                return;
            }
            assert!(Instant::now() < deadline, "world did not settle");
        }
    }

    /// World position at the middle of a chunk
    fn chunk_center(x: i32, z: i32) -> Vec3 {
        ChunkKey::new(x, z).world_center(BLOCK)
    }

    #[test]
    fn test_streams_desired_square() {
        let mut world = world(WorldRole::Replica, 1, None);
        settle(&mut world);

        assert_eq!(world.resident_count(), 9);
        for x in -1..=1 {
            for z in -1..=1 {
                assert!(world.is_visible(ChunkKey::new(x, z)));
            }
        }
        assert_eq!(world.take_loaded_events().len(), 9);
        assert!(world.take_loaded_events().is_empty());
    }

    #[test]
    fn test_unload_hysteresis() {
        let mut world = world(WorldRole::Replica, 1, None);
        world.add_viewpoint(1, chunk_center(0, 0));
        settle(&mut world);

        // One chunk over: x = -1 is outside R but inside R + pad
        world.add_viewpoint(1, chunk_center(1, 0));
        settle(&mut world);
        assert!(world.is_resident(ChunkKey::new(-1, 0)));
        assert!(!world.is_desired(ChunkKey::new(-1, 0)));
        assert!(world.is_visible(ChunkKey::new(2, 0)));

        // Far enough to leave the band
        world.add_viewpoint(1, chunk_center(3, 0));
        settle(&mut world);
        assert!(!world.is_resident(ChunkKey::new(-1, 0)));
        assert!(!world.is_resident(ChunkKey::new(0, 0)));
        assert!(world.is_resident(ChunkKey::new(1, 0)));
    }

    #[test]
    fn test_default_viewpoint_used_without_viewpoints() {
        let mut world = world(WorldRole::Replica, 0, None);
        world.set_default_viewpoint(chunk_center(2, 2));
        assert_eq!(world.centers(), vec![ChunkKey::new(2, 2)]);

        world.add_viewpoint(7, chunk_center(-1, 0));
        assert_eq!(world.centers(), vec![ChunkKey::new(-1, 0)]);
        assert!(world.remove_viewpoint(7));
        assert!(!world.remove_viewpoint(7));
        assert_eq!(world.centers(), vec![ChunkKey::new(2, 2)]);
    }

    #[test]
    fn test_enqueue_respects_limits() {
        let mut config = test_config(2);
        config.streaming.max_concurrent_jobs = 4;
        config.streaming.max_enqueues_per_tick = 3;
        let mut world = WorldContext::new(
            WorldRole::Replica,
            config,
            Arc::new(FlatTerrain::new(4)),
            Arc::new(NaiveMesher),
            None,
            Box::new(NullSink::new()),
        )
        .unwrap();

        world.update_streaming();
        assert_eq!(world.pipeline().in_flight(), 3);
        world.update_streaming();
        assert_eq!(world.pipeline().in_flight(), 4);
        // Nearest first
        assert!(world.is_building(ChunkKey::new(0, 0)));
    }

    #[test]
    fn test_edit_creates_record_without_visual() {
        let mut world = world(WorldRole::Authority, 1, None);
        let key = ChunkKey::new(5, 5);
        let outcome = world
            .apply_block_edit(key, IVec3::new(3, 10, 3), BlockId::Stone.as_u8())
            .unwrap();

        assert!(outcome.changed);
        assert_eq!(outcome.rebuilt, vec![key]);
        let record = world.record(key).unwrap();
        assert!(record.visual.is_none());
        assert_eq!(record.data.get(3, 10, 3), BlockId::Stone.as_u8());
        assert_eq!(world.cell_set(key).unwrap().get(index_of(3, 10, 3)), Some(3));
    }

    #[test]
    fn test_edit_rejects_out_of_range() {
        let mut world = world(WorldRole::Authority, 1, None);
        assert!(world.apply_block_edit(ChunkKey::new(0, 0), IVec3::new(0, 128, 0), 1).is_none());
        assert!(world.apply_block_edit(ChunkKey::new(0, 0), IVec3::new(16, 0, 0), 1).is_none());
        assert!(world.apply_block_edit(ChunkKey::new(99, 0), IVec3::new(0, 0, 0), 1).is_none());
        assert_eq!(world.resident_count(), 0);
    }

    #[test]
    fn test_unchanged_edit_still_rebuilds() {
        let mut world = world(WorldRole::Authority, 1, None);
        let key = ChunkKey::new(0, 0);
        // FlatTerrain(4) has grass at y = 4
        let outcome = world
            .apply_block_edit(key, IVec3::new(8, 4, 8), BlockId::Grass.as_u8())
            .unwrap();
        assert!(!outcome.changed);
        assert!(world.is_building(key));
        assert!(world.cell_set(key).is_none());
    }

    #[test]
    fn test_border_edit_rebuilds_resident_neighbours() {
        let mut world = world(WorldRole::Authority, 1, None);
        settle(&mut world);
        let before = world.record(ChunkKey::new(-1, 0)).unwrap().data.clone();

        let outcome = world
            .apply_block_edit(ChunkKey::new(0, 0), IVec3::new(0, 5, 7), 1)
            .unwrap();
        assert_eq!(outcome.rebuilt, vec![ChunkKey::new(0, 0), ChunkKey::new(-1, 0)]);
        assert_eq!(world.record(ChunkKey::new(-1, 0)).unwrap().data, before);

        let outcome = world
            .apply_block_edit(ChunkKey::new(0, 0), IVec3::new(15, 5, 15), 1)
            .unwrap();
        assert_eq!(
            outcome.rebuilt,
            vec![ChunkKey::new(0, 0), ChunkKey::new(1, 0), ChunkKey::new(0, 1)]
        );

        let outcome = world
            .apply_block_edit(ChunkKey::new(0, 0), IVec3::new(7, 5, 7), 1)
            .unwrap();
        assert_eq!(outcome.rebuilt, vec![ChunkKey::new(0, 0)]);

        // Neighbour (2, 0) is not resident
        let outcome = world
            .apply_block_edit(ChunkKey::new(1, 0), IVec3::new(15, 5, 3), 1)
            .unwrap();
        assert_eq!(outcome.rebuilt, vec![ChunkKey::new(1, 0)]);
    }

    #[test]
    fn test_net_op_idempotent() {
        let mut world = world(WorldRole::Replica, 1, None);
        settle(&mut world);
        let key = ChunkKey::new(0, 0);

        assert_eq!(world.apply_net_op(key, 100, 7), NetApply::Applied { changed: true });
        let after_first = world.record(key).unwrap().data.clone();
        assert_eq!(world.apply_net_op(key, 100, 7), NetApply::Applied { changed: false });
        assert_eq!(world.record(key).unwrap().data, after_first);
    }

    #[test]
    fn test_net_op_buffered_until_load() {
        let sink = RecordingSink::default();
        let mut world = WorldContext::new(
            WorldRole::Replica,
            test_config(0),
            Arc::new(FlatTerrain::new(4)),
            Arc::new(NaiveMesher),
            None,
            Box::new(sink.clone()),
        )
        .unwrap();
        let key = ChunkKey::new(0, 0);
        let index = index_of(8, 20, 8);

        assert_eq!(world.apply_net_op(key, index, 3), NetApply::Queued);
        assert_eq!(world.pending_net(key).len(), 1);

        settle(&mut world);
        assert!(world.pending_net(key).is_empty());
        assert_eq!(world.record(key).unwrap().data.get_index(index), 3);

        // The first result predates the queued cell and is never shown
        let attaches = sink.attaches_of(key);
        assert_eq!(attaches.len(), 1);
        let flat = NaiveMesher.mesh(&FlatTerrain::new(4).generate(key), BLOCK).vertex_count();
        assert_eq!(attaches[0], flat + 24);
    }

    #[test]
    fn test_dirty_result_not_displayed() {
        let sink = RecordingSink::default();
        let mut world = WorldContext::new(
            WorldRole::Authority,
            test_config(0),
            Arc::new(FlatTerrain::new(4)),
            Arc::new(NaiveMesher),
            None,
            Box::new(sink.clone()),
        )
        .unwrap();
        settle(&mut world);
        let key = ChunkKey::new(0, 0);

        world.apply_block_edit(key, IVec3::new(8, 10, 8), 1).unwrap();
        // Lands while the first rebuild is running
        world.apply_block_edit(key, IVec3::new(2, 10, 2), 1).unwrap();
        assert!(world.record(key).unwrap().dirty);

        wait_for_builds(&world);
        world.drain_with(&DrainBudget::unlimited());
        assert_eq!(sink.attaches_of(key).len(), 1);
        assert!(world.is_building(key));

        wait_for_builds(&world);
        world.drain_with(&DrainBudget::unlimited());
        let attaches = sink.attaches_of(key);
        assert_eq!(attaches.len(), 2);
        assert_eq!(attaches[1], attaches[0] + 48);
    }

    #[test]
    fn test_snapshot_is_authoritative() {
        let mut world = world(WorldRole::Replica, 0, None);
        settle(&mut world);
        let key = ChunkKey::new(0, 0);

        world.apply_net_op(key, 10, 5);
        world.apply_net_op(key, 11, 5);
        world.apply_snapshot(key, &[CellOp::new(11, 6), CellOp::new(12, 6)]);

        let ops = world.record(key).unwrap().data.overlay_ops();
        assert_eq!(ops, vec![CellOp::new(11, 6), CellOp::new(12, 6)]);

        // Non-resident: queue replaced
        let far = ChunkKey::new(4, 4);
        world.apply_net_op(far, 1, 1);
        world.apply_snapshot(far, &[CellOp::new(2, 2)]);
        assert_eq!(world.pending_net(far), &[PendingCell::from_op(CellOp::new(2, 2))]);
        world.apply_snapshot(far, &[]);
        assert!(world.pending_net(far).is_empty());
    }

    #[test]
    fn test_revert_cell() {
        let mut world = world(WorldRole::Replica, 0, None);
        settle(&mut world);
        let key = ChunkKey::new(0, 0);
        world.apply_net_op(key, 10, 5);
        assert_eq!(world.revert_cell(key, 10), NetApply::Applied { changed: true });
        assert!(!world.record(key).unwrap().data.has_edits());

        let far = ChunkKey::new(3, 3);
        world.apply_net_op(far, 10, 5);
        world.revert_cell(far, 10);
        assert!(world.pending_net(far).is_empty());
    }

    #[test]
    fn test_eviction_persists_and_reloads_edits() {
        let gateway = Arc::new(MemoryGateway::new());
        let mut world = world(WorldRole::Authority, 0, Some(gateway.clone()));
        settle(&mut world);
        let key = ChunkKey::new(0, 0);
        let index = index_of(1, 30, 1);
        world.apply_block_edit(key, IVec3::new(1, 30, 1), 9).unwrap();
        wait_for_builds(&world);
        world.drain_with(&DrainBudget::unlimited());

        world.add_viewpoint(1, chunk_center(5, 0));
        settle(&mut world);
        assert!(!world.is_resident(key));
        assert_eq!(world.take_destroyed_cell_sets(), vec![key]);
        assert!(world.cell_set(key).is_none());
        // Served from the pending save or from storage
        assert_eq!(world.modified_ops(key), vec![CellOp::new(index, 9)]);

        assert!(world.pipeline.wait_for_saves(Duration::from_secs(10)));
        assert_eq!(gateway.load_delta(key).unwrap(), Some(vec![CellOp::new(index, 9)]));

        world.add_viewpoint(1, chunk_center(0, 0));
        settle(&mut world);
        assert_eq!(world.record(key).unwrap().data.get_index(index), 9);
    }

    #[test]
    fn test_stale_build_discarded() {
        let sink = RecordingSink::default();
        let mut world = WorldContext::new(
            WorldRole::Authority,
            test_config(0),
            Arc::new(FlatTerrain::new(4)),
            Arc::new(NaiveMesher),
            Some(Arc::new(MemoryGateway::new())),
            Box::new(sink.clone()),
        )
        .unwrap();
        settle(&mut world);
        let key = ChunkKey::new(0, 0);

        world.apply_block_edit(key, IVec3::new(4, 20, 4), 1).unwrap();
        let old_ticket = world.building[&key];

        // Evict while the rebuild runs, then bring the chunk back
        world.add_viewpoint(1, chunk_center(5, 0));
        world.update_streaming();
        world.add_viewpoint(1, chunk_center(0, 0));
        world.update_streaming();
        assert_ne!(world.building[&key], old_ticket);

        settle(&mut world);
        assert_eq!(sink.attaches_of(key).len(), 2);
        assert_eq!(world.record(key).unwrap().data.get(4, 20, 4), 1);
    }

    #[test]
    fn test_edits_survive_eviction_during_build() {
        let gateway = Arc::new(MemoryGateway::new());
        let mut config = test_config(0);
        config.streaming.max_concurrent_jobs = 1;
        let mut world = WorldContext::new(
            WorldRole::Authority,
            config,
            Arc::new(FlatTerrain::new(4)),
            Arc::new(NaiveMesher),
            Some(gateway.clone()),
            Box::new(NullSink::new()),
        )
        .unwrap();
        settle(&mut world);
        let key = ChunkKey::new(0, 0);
        let first = IVec3::new(1, 30, 1);
        let second = IVec3::new(2, 30, 2);

        // The first edit starts a build; the second only marks the record dirty
        world.apply_block_edit(key, first, 1).unwrap();
        world.apply_block_edit(key, second, 1).unwrap();
        assert!(world.record(key).unwrap().dirty);

        // Leave and return while that build holds the only slot
        world.add_viewpoint(1, chunk_center(5, 0));
        world.update_streaming();
        assert!(!world.is_resident(key));
        world.add_viewpoint(1, chunk_center(0, 0));
        world.update_streaming();
        assert!(!world.is_building(key));

        wait_for_builds(&world);
        world.drain_with(&DrainBudget::unlimited());
        assert!(!world.is_resident(key));

        settle(&mut world);
        assert_eq!(world.block_at(first), 1);
        assert_eq!(world.block_at(second), 1);
        let mut ops = world.modified_ops(key);
        ops.sort_by_key(|op| op.index);
        assert_eq!(
            ops,
            vec![
                CellOp::new(index_of(1, 30, 1), 1),
                CellOp::new(index_of(2, 30, 2), 1),
            ]
        );
    }

    #[test]
    fn test_full_volume_snapshot_replaces_overlay() {
        let mut world = world(WorldRole::Replica, 0, None);
        settle(&mut world);
        let key = ChunkKey::new(0, 0);

        let everything: Vec<CellOp> = (0..CHUNK_VOLUME)
            .map(|i| CellOp::new(i as LocalIndex, 77))
            .collect();
        assert_eq!(world.apply_snapshot(key, &everything), NetApply::Applied { changed: true });
        assert_eq!(world.record(key).unwrap().data.overlay_len(), CHUNK_VOLUME);

        // Keep every other cell; the rest revert to base
        let half: Vec<CellOp> = everything.iter().copied().step_by(2).collect();
        let started = Instant::now();
        world.apply_snapshot(key, &half);
        assert!(started.elapsed() < Duration::from_secs(5));

        let data = &world.record(key).unwrap().data;
        assert_eq!(data.overlay_len(), half.len());
        assert_eq!(data.get_index(0), 77);
        assert_eq!(data.get_index(index_of(1, 30, 0)), AIR);
    }

    #[test]
    fn test_flush_dirty_edits() {
        let gateway = Arc::new(MemoryGateway::new());
        let mut world = world(WorldRole::Authority, 1, Some(gateway.clone()));
        world.apply_block_edit(ChunkKey::new(0, 0), IVec3::new(1, 1, 1), 0).unwrap();
        world.apply_block_edit(ChunkKey::new(1, 0), IVec3::new(1, 1, 1), 0).unwrap();

        assert_eq!(world.flush_dirty_edits().unwrap(), 2);
        assert_eq!(gateway.len(), 2);
    }

    #[test]
    fn test_replica_flush_is_noop() {
        let mut world = world(WorldRole::Replica, 1, Some(Arc::new(MemoryGateway::new())));
        assert!(!world.pipeline().has_gateway());
        assert_eq!(world.flush_dirty_edits().unwrap(), 0);
    }

    #[test]
    fn test_readiness() {
        let mut world = world(WorldRole::Replica, 2, None);
        let origin = chunk_center(0, 0);
        assert_eq!(world.readiness_around(origin, 1), Readiness { needed: 9, ready: 0 });

        settle(&mut world);
        assert!(world.chunks_ready_around(origin));
        // Clamped to at least 1
        assert_eq!(world.readiness_around(origin, 0).needed, 9);
        // Clamped to the render radius
        assert_eq!(world.readiness_around(origin, 10).needed, 25);
        assert!(world.chunks_ready_around_clamped(origin, 1));
        assert!(!world.chunks_ready_around_clamped(chunk_center(4, 0), 1));
    }

    #[test]
    fn test_raycast_hits_terrain() {
        let mut world = world(WorldRole::Replica, 0, None);
        settle(&mut world);
        let ray = Ray::new(Vec3::new(800.0, 1000.0, 800.0), Vec3::NEG_Y);
        let hit = world.raycast(&ray, 2000.0).unwrap();
        assert_eq!(hit.voxel, IVec3::new(8, 4, 8));
        assert_eq!(hit.normal, Vec3::Y);
    }

    #[test]
    fn test_tick_runs_streaming_on_interval() {
        let mut world = world(WorldRole::Replica, 0, None);
        world.tick(0.01);
        assert_eq!(world.pipeline().in_flight(), 0);
        world.tick(0.2);
        assert_eq!(world.pipeline().in_flight(), 1);
    }
}
