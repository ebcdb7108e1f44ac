//! Background chunk builds on a worker pool with a non-blocking completion queue

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::core::error::Error;
use crate::core::types::Result;
use crate::mesh::{ChunkGeometry, Mesher};
use crate::persistence::gateway::{PersistenceGateway, load_overlay_or_empty};
use crate::terrain::TerrainSource;
use crate::voxel::chunk::ChunkKey;
use crate::voxel::data::{CellOp, VoxelChunkData};

use super::budget::DrainBudget;

/// Settings fixed for the lifetime of a pipeline
#[derive(Clone, Copy, Debug)]
pub struct BuildSettings {
    pub block_size: f32,
    /// Skip meshing (headless authority)
    pub build_geometry: bool,
    /// 0 picks one thread per core
    pub worker_threads: usize,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            block_size: 100.0,
            build_geometry: true,
            worker_threads: 0,
        }
    }
}

/// Output of one build job
#[derive(Debug)]
pub struct ChunkMeshResult {
    pub key: ChunkKey,
    /// Identifies the submission this result answers
    pub ticket: u64,
    pub block_size: f32,
    /// Data the geometry was built from
    pub data: VoxelChunkData,
    pub geometry: ChunkGeometry,
}

/// Item on the completion queue
#[derive(Debug)]
pub enum BuildCompletion {
    /// Job finished
    Built(ChunkMeshResult),
    /// Job panicked; the chunk may be resubmitted
    Failed { key: ChunkKey, ticket: u64, reason: String },
}

impl BuildCompletion {
    pub fn key(&self) -> ChunkKey {
        match self {
            Self::Built(result) => result.key,
            Self::Failed { key, .. } => *key,
        }
    }

    pub fn ticket(&self) -> u64 {
        match self {
            Self::Built(result) => result.ticket,
            Self::Failed { ticket, .. } => *ticket,
        }
    }

    /// Vertices this completion hands to the render sink
    pub fn vertex_count(&self) -> usize {
        match self {
            Self::Built(result) => result.geometry.vertex_count(),
            Self::Failed { .. } => 0,
        }
    }
}

/// Acknowledgement of an asynchronous overlay save
#[derive(Debug)]
struct SaveAck {
    key: ChunkKey,
    ticket: u64,
    result: std::result::Result<(), String>,
}

/// Collaborators shared by every job
struct JobShared {
    terrain: Arc<dyn TerrainSource>,
    mesher: Arc<dyn Mesher>,
    gateway: Option<Arc<dyn PersistenceGateway>>,
    settings: BuildSettings,
}

/// Schedules chunk builds and overlay saves on a rayon pool
///
/// Jobs receive owned inputs only: either a data snapshot taken at submit
/// time, or nothing (the job regenerates terrain and reloads edits). Results
/// come back through an unbounded mpsc channel drained with `try_recv`.
pub struct BuildPipeline {
    pool: rayon::ThreadPool,
    shared: Arc<JobShared>,
    result_tx: mpsc::UnboundedSender<BuildCompletion>,
    result_rx: mpsc::UnboundedReceiver<BuildCompletion>,
    /// Result pulled off the queue but refused by the vertex budget
    held: Option<BuildCompletion>,
    save_tx: mpsc::UnboundedSender<SaveAck>,
    save_rx: mpsc::UnboundedReceiver<SaveAck>,
    /// Overlays whose asynchronous save has not been acknowledged
    unsaved: HashMap<ChunkKey, (u64, Arc<Vec<CellOp>>)>,
    /// Newest save ticket per chunk; held while a save writes
    latest_saves: Arc<Mutex<HashMap<ChunkKey, u64>>>,
    next_ticket: u64,
    in_flight: usize,
    /// Completions published by workers
    finished: Arc<AtomicUsize>,
    /// Completions pulled off the queue
    received: usize,
}

impl BuildPipeline {
    /// Create a new pipeline
    ///
    /// # Arguments
    /// * `settings` - Block size, meshing switch and pool size
    /// * `terrain` - Base terrain source
    /// * `mesher` - Geometry builder
    /// * `gateway` - Edit persistence; `None` for replicas without saves
    pub fn new(
        settings: BuildSettings,
        terrain: Arc<dyn TerrainSource>,
        mesher: Arc<dyn Mesher>,
        gateway: Option<Arc<dyn PersistenceGateway>>,
    ) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(settings.worker_threads)
            .thread_name(|i| format!("voxlink-build-{}", i))
            .build()
            .map_err(|e| Error::Streaming(format!("failed to start worker pool: {}", e)))?;

        let (result_tx, result_rx) = mpsc::unbounded_channel();
        let (save_tx, save_rx) = mpsc::unbounded_channel();

        Ok(Self {
            pool,
            shared: Arc::new(JobShared {
                terrain,
                mesher,
                gateway,
                settings,
            }),
            result_tx,
            result_rx,
            held: None,
            save_tx,
            save_rx,
            unsaved: HashMap::new(),
            latest_saves: Arc::new(Mutex::new(HashMap::new())),
            next_ticket: 1,
            in_flight: 0,
            finished: Arc::new(AtomicUsize::new(0)),
            received: 0,
        })
    }

    fn take_ticket(&mut self) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        ticket
    }

    // --- Builds ---

    /// Queue a build and return its ticket
    ///
    /// With a snapshot the job meshes exactly that data; without one it
    /// regenerates base terrain and applies stored edits.
    pub fn submit(&mut self, key: ChunkKey, snapshot: Option<VoxelChunkData>) -> u64 {
        let ticket = self.take_ticket();
        let pending_overlay = match snapshot {
            Some(_) => None,
            None => self.unsaved.get(&key).map(|(_, ops)| Arc::clone(ops)),
        };

        let shared = Arc::clone(&self.shared);
        let tx = self.result_tx.clone();
        let finished = Arc::clone(&self.finished);

        self.pool.spawn(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                run_job(&shared, key, ticket, snapshot, pending_overlay)
            }));
            let completion = match outcome {
                Ok(result) => BuildCompletion::Built(result),
                Err(payload) => {
                    let reason = panic_message(payload.as_ref());
                    log::error!("Build of chunk {} panicked: {}", key, reason);
                    BuildCompletion::Failed { key, ticket, reason }
                }
            };
            if tx.send(completion).is_ok() {
                finished.fetch_add(1, Ordering::Release);
            }
        });

        self.in_flight += 1;
        ticket
    }

    /// Pop completed builds without blocking, within `budget`
    pub fn drain(&mut self, budget: &DrainBudget) -> Vec<BuildCompletion> {
        let mut meter = budget.start();
        let mut drained = Vec::new();

        while meter.has_room() {
            let next = match self.held.take() {
                Some(held) => held,
                None => match self.result_rx.try_recv() {
                    Ok(completion) => {
                        self.received += 1;
                        completion
                    }
                    Err(_) => break,
                },
            };

            let vertices = next.vertex_count();
            if !meter.admits(vertices) {
                self.held = Some(next);
                break;
            }

            meter.record(vertices);
            self.in_flight = self.in_flight.saturating_sub(1);
            drained.push(next);
        }

        if !drained.is_empty() {
            log::trace!(
                "Drained {} builds ({} vertices) in {:?}",
                meter.items(),
                meter.vertices(),
                meter.elapsed()
            );
        }
        drained
    }

    /// Load a chunk's data on the calling thread (generate + stored edits)
    pub fn load_chunk_data(&self, key: ChunkKey) -> VoxelChunkData {
        let mut data = self.shared.terrain.generate(key);
        data.apply_ops(&self.stored_overlay(key));
        data
    }

    /// Edits stored for a chunk, including saves still in flight
    pub fn stored_overlay(&self, key: ChunkKey) -> Vec<CellOp> {
        if let Some((_, ops)) = self.unsaved.get(&key) {
            return ops.as_ref().clone();
        }
        match &self.shared.gateway {
            Some(gateway) => load_overlay_or_empty(gateway.as_ref(), key),
            None => Vec::new(),
        }
    }

    // --- Saves ---

    /// Save an overlay copy on the worker pool
    ///
    /// Until acknowledged, the copy also serves reloads of the same chunk
    /// so a quick unload/reload cannot read a stale file. A save superseded
    /// by a newer one for the same chunk is skipped, so the file always
    /// ends with the newest overlay.
    pub fn persist_async(&mut self, key: ChunkKey, ops: Vec<CellOp>) {
        let Some(gateway) = self.shared.gateway.clone() else {
            return;
        };

        let ticket = self.take_ticket();
        let ops = Arc::new(ops);
        self.unsaved.insert(key, (ticket, Arc::clone(&ops)));
        lock_saves(&self.latest_saves).insert(key, ticket);

        let latest = Arc::clone(&self.latest_saves);
        let tx = self.save_tx.clone();
        self.pool.spawn(move || {
            let result = write_if_latest(&latest, gateway.as_ref(), key, ticket, &ops);
            let _ = tx.send(SaveAck { key, ticket, result });
        });
    }

    /// Save an overlay on the calling thread
    pub fn persist_now(&mut self, key: ChunkKey, ops: &[CellOp]) -> Result<()> {
        let Some(gateway) = self.shared.gateway.clone() else {
            return Ok(());
        };
        let ticket = self.take_ticket();
        lock_saves(&self.latest_saves).insert(key, ticket);
        write_if_latest(&self.latest_saves, gateway.as_ref(), key, ticket, ops)
            .map_err(Error::Persistence)?;
        self.unsaved.remove(&key);
        Ok(())
    }

    /// Process save acknowledgements; failed saves stay cached in memory
    pub fn poll_saves(&mut self) {
        while let Ok(ack) = self.save_rx.try_recv() {
            match ack.result {
                Ok(()) => {
                    if self.unsaved.get(&ack.key).is_some_and(|(t, _)| *t == ack.ticket) {
                        self.unsaved.remove(&ack.key);
                    }
                }
                Err(e) => log::error!("Failed to save edits for chunk {}: {}", ack.key, e),
            }
        }
    }

    /// Block until every asynchronous save is acknowledged or `timeout` passes
    ///
    /// Returns whether all saves completed.
    pub fn wait_for_saves(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.poll_saves();
            if self.unsaved.is_empty() {
                return true;
            }
            if Instant::now() >= deadline {
                log::warn!("{} chunk saves still pending", self.unsaved.len());
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    // --- Queries ---

    /// Builds submitted and not yet drained
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Completions waiting to be drained
    pub fn ready_count(&self) -> usize {
        self.finished
            .load(Ordering::Acquire)
            .saturating_sub(self.received)
            + usize::from(self.held.is_some())
    }

    /// Saves not yet acknowledged
    pub fn pending_saves(&self) -> usize {
        self.unsaved.len()
    }

    pub fn settings(&self) -> &BuildSettings {
        &self.shared.settings
    }

    pub fn terrain(&self) -> &Arc<dyn TerrainSource> {
        &self.shared.terrain
    }

    pub fn has_gateway(&self) -> bool {
        self.shared.gateway.is_some()
    }
}

fn lock_saves(latest: &Mutex<HashMap<ChunkKey, u64>>) -> std::sync::MutexGuard<'_, HashMap<ChunkKey, u64>> {
    latest.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Write `ops` unless a newer save of `key` was requested
///
/// The lock is held across the write so saves of one chunk never interleave.
fn write_if_latest(
    latest: &Mutex<HashMap<ChunkKey, u64>>,
    gateway: &dyn PersistenceGateway,
    key: ChunkKey,
    ticket: u64,
    ops: &[CellOp],
) -> std::result::Result<(), String> {
    let mut latest = lock_saves(latest);
    // A missing entry means a newer save already landed
    if latest.get(&key) != Some(&ticket) {
        log::trace!("Skipping superseded save {} of chunk {}", ticket, key);
        return Ok(());
    }
    let result = gateway.save_delta(key, ops).map_err(|e| e.to_string());
    latest.remove(&key);
    result
}

/// Pure transform from captured inputs to a result
fn run_job(
    shared: &JobShared,
    key: ChunkKey,
    ticket: u64,
    snapshot: Option<VoxelChunkData>,
    pending_overlay: Option<Arc<Vec<CellOp>>>,
) -> ChunkMeshResult {
    let data = match snapshot {
        Some(data) => data,
        None => {
            let mut data = shared.terrain.generate(key);
            let ops = match pending_overlay {
                Some(ops) => ops.as_ref().clone(),
                None => match &shared.gateway {
                    Some(gateway) => load_overlay_or_empty(gateway.as_ref(), key),
                    None => Vec::new(),
                },
            };
            data.apply_ops(&ops);
            data
        }
    };

    let block_size = shared.settings.block_size;
    let geometry = if shared.settings.build_geometry {
        shared.mesher.mesh(&data, block_size)
    } else {
        ChunkGeometry::default()
    };

    ChunkMeshResult {
        key,
        ticket,
        block_size,
        data,
        geometry,
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
