//! Background mosaic service.
//!
//! One worker task per service turns view requests into render snapshots.
//! Each request runs a *pump* on the blocking pool: resolve frames, diff
//! them through the lifecycle manager, open readers for new frames, and
//! publish the result.
//!
//! # Architecture
//!
//! ```text
//!   request() ──► watch ──► worker task
//!                              │ cancel in-flight pump
//!                              ▼
//!                   spawn_blocking(pump)
//!                   ┌────────────────────────────────┐
//!                   │ MosaicResolver::query          │
//!                   │ open readers (cancel polled)   │──► warn + skip on failure
//!                   │ ── state lock ──────────────── │
//!                   │ FrameLifecycleManager::update  │
//!                   │ sweep zombies, publish         │
//!                   └───────────────┬────────────────┘
//!                                   ▼
//!                   watch<Arc<MosaicSnapshot>> ──► snapshot() / subscribe()
//!
//!   release notices ──► unbounded mpsc ──► consumer thread
//! ```
//!
//! A newer request supersedes the pump in flight. The superseded pump stops
//! at its next frame boundary and changes nothing; readers it opened are
//! dropped and cache writes it made are kept.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{CachedTileSource, DiskTileStore, TileCache, TileCacheConfig};
use crate::error::RasterError;
use crate::lifecycle::{
    FrameLifecycleManager, PumpDelta, ReleaseNotice, RenderState, RenderableHandle,
};
use crate::mosaic::{
    Frame, FrameCatalog, MosaicQuery, MosaicResolver, Region, SelectionMode, DEFAULT_BUFFER_PIXELS,
};
use crate::source::{ReaderRegistry, TileSource};

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct MosaicServiceConfig {
    /// Overlap added around accepted frames, in view pixels.
    pub buffer_pixels: f64,

    /// Root of the per-frame tile caches. `None` reads frames uncached.
    pub cache_directory: Option<PathBuf>,

    pub cache: TileCacheConfig,

    /// Levels coarser than this bypass the cache.
    pub min_cache_level: u32,
}

impl Default for MosaicServiceConfig {
    fn default() -> Self {
        Self {
            buffer_pixels: DEFAULT_BUFFER_PIXELS,
            cache_directory: None,
            cache: TileCacheConfig::default(),
            min_cache_level: 0,
        }
    }
}

// =============================================================================
// Requests and snapshots
// =============================================================================

/// What the consumer is looking at.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewRequest {
    pub region: Region,
    pub target_gsd: f64,
    pub mode: SelectionMode,
    pub imagery_types: Option<Vec<String>>,
}

impl ViewRequest {
    pub fn new(region: Region, target_gsd: f64) -> Self {
        Self {
            region,
            target_gsd,
            mode: SelectionMode::default(),
            imagery_types: None,
        }
    }

    pub fn with_mode(mut self, mode: SelectionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_imagery_types(mut self, types: Option<Vec<String>>) -> Self {
        self.imagery_types = types;
        self
    }

    fn to_query(&self) -> MosaicQuery {
        MosaicQuery::new(self.region, self.target_gsd)
            .with_mode(self.mode)
            .with_imagery_types(self.imagery_types.clone())
    }
}

/// One frame ready for the renderer.
#[derive(Clone)]
pub struct RenderItem {
    pub frame: Frame,
    pub handle: RenderableHandle,
    pub state: RenderState,
    pub source: Arc<dyn TileSource>,
}

impl fmt::Debug for RenderItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderItem")
            .field("frame", &self.frame.path)
            .field("handle", &self.handle)
            .field("state", &self.state)
            .field("source", &self.source.uri())
            .finish()
    }
}

/// Result of the latest completed pump, back to front.
#[derive(Debug, Clone, Default)]
pub struct MosaicSnapshot {
    pub generation: u64,
    pub request: Option<ViewRequest>,
    pub items: Vec<RenderItem>,
    pub delta: PumpDelta,
}

// =============================================================================
// Service
// =============================================================================

pub struct MosaicService {
    requests: watch::Sender<Option<ViewRequest>>,
    snapshots: watch::Receiver<Arc<MosaicSnapshot>>,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
    worker: JoinHandle<()>,
}

struct Shared {
    resolver: MosaicResolver,
    registry: ReaderRegistry,
    config: MosaicServiceConfig,
    state: Mutex<PumpState>,
    snapshots: watch::Sender<Arc<MosaicSnapshot>>,
    caches: Mutex<HashMap<PathBuf, Weak<TileCache>>>,
}

struct PumpState {
    lifecycle: FrameLifecycleManager,
    sources: HashMap<RenderableHandle, Arc<dyn TileSource>>,
    unavailable: HashSet<PathBuf>,
    request: Option<ViewRequest>,
    generation: u64,
}

impl MosaicService {
    /// Starts the worker. Must be called from within a Tokio runtime.
    ///
    /// Returns the service and the queue of release notices.
    pub fn start(
        config: MosaicServiceConfig,
        catalog: Arc<dyn FrameCatalog>,
        registry: ReaderRegistry,
    ) -> (Self, mpsc::UnboundedReceiver<ReleaseNotice>) {
        let (lifecycle, releases) = FrameLifecycleManager::new();
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(MosaicSnapshot::default()));
        let (request_tx, request_rx) = watch::channel(None);

        let shared = Arc::new(Shared {
            resolver: MosaicResolver::new(catalog).with_buffer_pixels(config.buffer_pixels),
            registry,
            config,
            state: Mutex::new(PumpState {
                lifecycle,
                sources: HashMap::new(),
                unavailable: HashSet::new(),
                request: None,
                generation: 0,
            }),
            snapshots: snapshot_tx,
            caches: Mutex::new(HashMap::new()),
        });

        let shutdown = CancellationToken::new();
        let worker = tokio::spawn(run(Arc::clone(&shared), request_rx, shutdown.clone()));

        let service = Self {
            requests: request_tx,
            snapshots: snapshot_rx,
            shared,
            shutdown,
            worker,
        };
        (service, releases)
    }

    /// Replaces the current view. Any pump still running for an older view
    /// is canceled.
    pub fn request(&self, request: ViewRequest) {
        self.requests.send_replace(Some(request));
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> Arc<MosaicSnapshot> {
        Arc::clone(&self.snapshots.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<MosaicSnapshot>> {
        self.snapshots.clone()
    }

    /// Records that the renderer has drawn a frame, releasing zombies it no
    /// longer needs. Returns `false` for unknown handles.
    pub fn mark_resolved(&self, handle: RenderableHandle) -> bool {
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        if !state.lifecycle.mark_resolved(handle) {
            return false;
        }

        let mut delta = PumpDelta::default();
        if let Some(region) = state.request.as_ref().map(|r| r.region) {
            delta.released = state.lifecycle.sweep(&region);
            for released in &delta.released {
                state.sources.remove(released);
            }
        }
        self.shared.publish(state, delta);
        true
    }

    /// Frames that failed to open and are no longer offered.
    pub fn unavailable(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.shared.state.lock().unavailable.iter().cloned().collect();
        paths.sort();
        paths
    }

    /// Stops the worker after canceling any pump in flight.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.worker.await {
            warn!(error = %e, "Mosaic worker ended abnormally");
        }
    }
}

async fn run(
    shared: Arc<Shared>,
    mut requests: watch::Receiver<Option<ViewRequest>>,
    shutdown: CancellationToken,
) {
    let mut in_flight: Option<(CancellationToken, JoinHandle<()>)> = None;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            changed = requests.changed() => {
                if changed.is_err() {
                    break;
                }
                let Some(request) = requests.borrow_and_update().clone() else {
                    continue;
                };

                if let Some((token, handle)) = in_flight.take() {
                    token.cancel();
                    if let Err(e) = handle.await {
                        warn!(error = %e, "Mosaic pump ended abnormally");
                    }
                }

                let token = shutdown.child_token();
                let pump_token = token.clone();
                let pump_shared = Arc::clone(&shared);
                let handle = tokio::task::spawn_blocking(move || pump_shared.pump(request, &pump_token));
                in_flight = Some((token, handle));
            }
        }
    }

    if let Some((token, handle)) = in_flight {
        token.cancel();
        if let Err(e) = handle.await {
            warn!(error = %e, "Mosaic pump ended abnormally during shutdown");
        }
    }
    debug!("Mosaic worker stopped");
}

impl Shared {
    /// Resolves, opens readers with the state unlocked, then applies the
    /// new frame set and publishes it in one critical section. A canceled
    /// pump leaves the state untouched.
    fn pump(&self, request: ViewRequest, cancel: &CancellationToken) {
        let started = Instant::now();

        let selection = match self.resolver.query(&request.to_query()) {
            Ok(frames) => frames,
            Err(e) => {
                warn!(error = %e, "Mosaic resolution failed");
                return;
            }
        };

        let mut opened: HashMap<PathBuf, Arc<dyn TileSource>> = HashMap::new();
        let mut failed: HashSet<PathBuf> = HashSet::new();

        let mut guard = loop {
            if cancel.is_cancelled() {
                debug!("Pump superseded while opening frames");
                return;
            }

            let guard = self.state.lock();
            let missing: Vec<Frame> = {
                let live: HashSet<&Path> = guard
                    .lifecycle
                    .visible()
                    .iter()
                    .chain(guard.lifecycle.zombies())
                    .filter(|e| guard.sources.contains_key(&e.handle))
                    .map(|e| e.frame.path())
                    .collect();
                selection
                    .iter()
                    .filter(|f| {
                        !guard.unavailable.contains(&f.path)
                            && !failed.contains(&f.path)
                            && !opened.contains_key(&f.path)
                            && !live.contains(f.path())
                    })
                    .cloned()
                    .collect()
            };
            if missing.is_empty() {
                break guard;
            }
            drop(guard);

            for frame in missing {
                if cancel.is_cancelled() {
                    debug!("Pump superseded while opening frames");
                    return;
                }
                match self.open(&frame) {
                    Ok(source) => {
                        opened.insert(frame.path.clone(), source);
                    }
                    Err(e) => {
                        warn!(path = %frame.path.display(), error = %e, "Skipping unavailable frame");
                        failed.insert(frame.path.clone());
                    }
                }
            }
        };

        if cancel.is_cancelled() {
            debug!("Pump superseded before update");
            return;
        }

        let state = &mut *guard;
        state.unavailable.extend(failed);

        let selection: Vec<Frame> = selection
            .into_iter()
            .filter(|f| !state.unavailable.contains(&f.path))
            .collect();
        let mut delta = state.lifecycle.update(&selection, &request.region);
        for released in &delta.released {
            state.sources.remove(released);
        }

        for handle in &delta.created {
            let Some(entry) = state.lifecycle.entry(*handle) else {
                continue;
            };
            if let Some(source) = opened.remove(&entry.frame.path) {
                state.sources.insert(*handle, source);
            }
        }
        state.request = Some(request.clone());

        let swept = state.lifecycle.sweep(&request.region);
        for released in &swept {
            state.sources.remove(released);
        }
        delta.released.extend(swept);

        let frames = state.lifecycle.visible().len();
        self.publish(state, delta);
        info!(
            frames,
            target_gsd = request.target_gsd,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Mosaic pump complete"
        );
    }

    /// Opens a reader for a frame, behind a disk cache when configured.
    ///
    /// A cache directory has at most one live [`TileCache`]; a frame that
    /// comes back while its old cache is still referenced shares it.
    fn open(&self, frame: &Frame) -> Result<Arc<dyn TileSource>, RasterError> {
        let Some(root) = &self.config.cache_directory else {
            return self.registry.open(&frame.path);
        };

        let dir = root.join(cache_key(&frame.path));
        let mut caches = self.caches.lock();
        if let Some(cache) = caches.get(&dir).and_then(Weak::upgrade) {
            debug!(dir = %dir.display(), "Reusing live tile cache");
            return Ok(self.cached(cache));
        }

        let source = self.registry.open(&frame.path)?;
        match DiskTileStore::open(&dir, source.uri(), *source.grid()) {
            Ok(store) => {
                let cache = Arc::new(TileCache::with_config(source, Arc::new(store), self.config.cache));
                caches.retain(|_, live| live.strong_count() > 0);
                caches.insert(dir, Arc::downgrade(&cache));
                Ok(self.cached(cache))
            }
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Tile cache unavailable, reading uncached");
                Ok(source)
            }
        }
    }

    fn cached(&self, cache: Arc<TileCache>) -> Arc<dyn TileSource> {
        Arc::new(CachedTileSource::new(cache).with_min_cache_level(self.config.min_cache_level))
    }

    fn publish(&self, state: &mut PumpState, delta: PumpDelta) {
        state.generation += 1;
        let items = state
            .lifecycle
            .render_list()
            .into_iter()
            .filter_map(|entry| {
                state.sources.get(&entry.handle).map(|source| RenderItem {
                    frame: entry.frame.clone(),
                    handle: entry.handle,
                    state: entry.state,
                    source: Arc::clone(source),
                })
            })
            .collect();

        self.snapshots.send_replace(Arc::new(MosaicSnapshot {
            generation: state.generation,
            request: state.request.clone(),
            items,
            delta,
        }));
    }
}

/// Directory name of a frame's tile cache under the cache root: the first
/// eight bytes of the SHA-256 of the path, in hex.
pub fn cache_key(path: &Path) -> String {
    let digest = Sha256::digest(path.to_string_lossy().as_bytes());
    digest[..8].iter().map(|b| format!("{:02x}", b)).collect()
}
