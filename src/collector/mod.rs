//! Synchronized multi-device collection
//!
//! [`DataCollector`] owns the devices and drives one background worker per
//! episode. The worker polls every device at a fixed rate, stamps each
//! reading, derives actions relative to a reference pose and appends frames
//! to the current [`Episode`].
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────┐   stop channel    ┌──────────────────┐
//! │ DataCollector │ ────────────────▶ │ CollectionWorker │
//! │ (caller)      │                   │ (thread)         │
//! │               │ ◀──────────────── │                  │
//! └───────────────┘   LatestSlot      └──────────────────┘
//!                     + callbacks
//! ```
//!
//! Lifecycle per episode is `Idle → Warmup → Collecting → Idle`. Misuse
//! (starting twice, stopping while idle) is logged and reported through the
//! return value; it never panics or errors.

mod action;
mod slot;
mod worker;

pub use action::ActionTracker;
pub use slot::LatestSlot;

use crate::config::{AppConfig, CollectorConfig, StorageConfig};
use crate::devices::{DeviceSet, DeviceStats};
use crate::episode::{Episode, Metadata};
use crate::error::{RecorderError, Result};
use crate::storage::{generate_filename, FrameStore};
use crate::types::{ConnectionStatus, LiveFrame, Modality};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use worker::CollectionWorker;

/// Consumer hook invoked with every published frame
pub type FrameCallback = Arc<dyn Fn(&LiveFrame) -> anyhow::Result<()> + Send + Sync>;

/// Collector lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorState {
    /// No episode running
    Idle,
    /// Episode running, frames not yet recorded
    Warmup,
    /// Episode running and recording
    Collecting,
}

impl CollectorState {
    /// Whether an episode is running
    pub fn is_active(&self) -> bool {
        !matches!(self, CollectorState::Idle)
    }

    fn to_u8(self) -> u8 {
        match self {
            CollectorState::Idle => 0,
            CollectorState::Warmup => 1,
            CollectorState::Collecting => 2,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => CollectorState::Warmup,
            2 => CollectorState::Collecting,
            _ => CollectorState::Idle,
        }
    }
}

impl std::fmt::Display for CollectorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectorState::Idle => write!(f, "Idle"),
            CollectorState::Warmup => write!(f, "Warm-up"),
            CollectorState::Collecting => write!(f, "Collecting"),
        }
    }
}

/// Lifecycle state shared with the worker
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(state: CollectorState) -> Self {
        Self(AtomicU8::new(state.to_u8()))
    }

    pub fn get(&self) -> CollectorState {
        CollectorState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub fn set(&self, state: CollectorState) {
        self.0.store(state.to_u8(), Ordering::SeqCst);
    }

    /// Move `from → to` only if still in `from`
    pub fn transition(&self, from: CollectorState, to: CollectorState) -> bool {
        self.0
            .compare_exchange(from.to_u8(), to.to_u8(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// Snapshot of the running episode
#[derive(Debug, Clone)]
pub struct EpisodeStats {
    /// Frames recorded so far
    pub num_frames: usize,
    /// Seconds since the episode started
    pub duration: f64,
    /// Whether the collector is still warming up
    pub warming_up: bool,
    /// Warm-up progress from 0.0 to 1.0 (0.0 when not warming up)
    pub warmup_progress: f64,
    /// Seconds of warm-up left
    pub warmup_remaining: f64,
    /// Per-device read statistics
    pub devices: BTreeMap<Modality, DeviceStats>,
    /// Live frames replaced before a consumer took them
    pub live_frames_dropped: u64,
}

struct WorkerHandle {
    stop_tx: Sender<()>,
    done_rx: Receiver<()>,
    thread: JoinHandle<()>,
}

/// Orchestrates device polling and episode recording
pub struct DataCollector {
    config: CollectorConfig,
    storage: StorageConfig,
    store: FrameStore,
    devices: Arc<Mutex<DeviceSet>>,
    state: Arc<StateCell>,
    episode: Option<Arc<Mutex<Episode>>>,
    live: LatestSlot<LiveFrame>,
    callbacks: Arc<Mutex<Vec<FrameCallback>>>,
    worker: Option<WorkerHandle>,
    started_at: Option<Instant>,
}

impl std::fmt::Debug for DataCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataCollector")
            .field("state", &self.state.get())
            .field("config", &self.config)
            .field("has_episode", &self.episode.is_some())
            .finish()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DataCollector {
    /// Create a collector over `devices`
    pub fn new(devices: DeviceSet, config: &AppConfig) -> Self {
        Self {
            config: config.collector.clone(),
            storage: config.storage.clone(),
            store: FrameStore::from_config(&config.storage),
            devices: Arc::new(Mutex::new(devices)),
            state: Arc::new(StateCell::new(CollectorState::Idle)),
            episode: None,
            live: LatestSlot::new(),
            callbacks: Arc::new(Mutex::new(Vec::new())),
            worker: None,
            started_at: None,
        }
    }

    /// Connect every attached device
    pub fn connect_devices(&self) -> BTreeMap<Modality, ConnectionStatus> {
        let status = lock(&self.devices).connect_all();
        tracing::info!("Device connection status: {:?}", status);
        status
    }

    /// Disconnect every attached device
    pub fn disconnect_devices(&self) -> BTreeMap<Modality, bool> {
        let status = lock(&self.devices).disconnect_all();
        tracing::info!("Device disconnection status: {:?}", status);
        status
    }

    /// Current lifecycle phase
    pub fn state(&self) -> CollectorState {
        self.state.get()
    }

    /// Whether an episode is running (warm-up included)
    pub fn is_collecting(&self) -> bool {
        self.state().is_active()
    }

    /// Whether the running episode is still warming up
    pub fn is_warming_up(&self) -> bool {
        self.state() == CollectorState::Warmup
    }

    /// Warm-up progress from 0.0 to 1.0, or 0.0 when not warming up
    pub fn warmup_progress(&self) -> f64 {
        if !self.is_warming_up() {
            return 0.0;
        }
        let Some(started) = self.started_at else {
            return 0.0;
        };
        let warmup = self.config.warmup().as_secs_f64();
        if warmup <= 0.0 {
            return 1.0;
        }
        (started.elapsed().as_secs_f64() / warmup).min(1.0)
    }

    /// Collector settings
    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Begin a new episode
    ///
    /// Returns false, without side effects, if an episode is already running.
    pub fn start_episode(&mut self, metadata: Metadata) -> bool {
        if self.is_collecting() {
            tracing::warn!("Already collecting data; start ignored");
            return false;
        }
        let mut episode = Episode::new(metadata);
        episode.set_metadata("max_fps", self.config.max_fps);
        episode.set_metadata("warmup_secs", self.config.warmup_secs);
        episode.set_metadata("frame_alignment", self.config.frame_alignment.to_string());
        let episode = Arc::new(Mutex::new(episode));

        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(0);

        lock(&self.devices).reset_stats();
        // A worker left behind by a timed-out stop keeps the old cell
        self.state = Arc::new(StateCell::new(CollectorState::Warmup));
        self.started_at = Some(Instant::now());
        let exit_state = Arc::clone(&self.state);
        let exit_episode = Arc::clone(&episode);

        let worker = CollectionWorker::new(
            Arc::clone(&self.devices),
            Arc::clone(&episode),
            Arc::clone(&self.state),
            self.live.clone(),
            Arc::clone(&self.callbacks),
            ActionTracker::new(self.config.frame_alignment),
            self.config.frame_interval(),
            self.config.warmup(),
            stop_rx,
        );

        let spawn = std::thread::Builder::new()
            .name("collection-worker".to_string())
            .spawn(move || {
                // Dropped on exit, which wakes the joiner
                let _done = done_tx;
                if catch_unwind(AssertUnwindSafe(|| worker.run())).is_err() {
                    tracing::error!("Collection worker panicked; episode closed early");
                    lock(&exit_episode).finalize();
                    exit_state.set(CollectorState::Idle);
                }
            });

        match spawn {
            Ok(thread) => {
                self.worker = Some(WorkerHandle {
                    stop_tx,
                    done_rx,
                    thread,
                });
                self.episode = Some(episode);
                tracing::info!(
                    "Episode collection started (warm-up: {:.1}s)",
                    self.config.warmup_secs
                );
                true
            }
            Err(e) => {
                tracing::error!("Failed to spawn collection worker: {}", e);
                self.state.set(CollectorState::Idle);
                self.started_at = None;
                false
            }
        }
    }

    /// Stop the running episode and finalize it
    ///
    /// `save` overrides the configured auto-save. Returns the saved path when
    /// the episode was written.
    pub fn stop_episode(&mut self, save: Option<bool>) -> Option<PathBuf> {
        if !self.is_collecting() {
            tracing::warn!("Not currently collecting data; stop ignored");
            return None;
        }

        self.state.set(CollectorState::Idle);
        if let Some(handle) = self.worker.take() {
            let _ = handle.stop_tx.try_send(());
            match handle.done_rx.recv_timeout(self.config.join_timeout()) {
                Err(RecvTimeoutError::Timeout) => {
                    tracing::warn!(
                        "Collection worker did not exit within {:?}; continuing without it",
                        self.config.join_timeout()
                    );
                }
                _ => {
                    if handle.thread.join().is_err() {
                        tracing::error!("Collection worker panicked");
                    }
                }
            }
        }
        self.started_at = None;

        let Some(episode) = &self.episode else {
            return None;
        };
        {
            let mut episode = lock(episode);
            episode.finalize();
            tracing::info!(
                "Episode collection stopped ({} frames, {:.2}s)",
                episode.len(),
                episode.elapsed()
            );
        }

        if save.unwrap_or(self.storage.auto_save) {
            match self.save_current_episode(None) {
                Ok(path) => Some(path),
                Err(e) => {
                    tracing::error!("Failed to save episode: {}", e);
                    None
                }
            }
        } else {
            None
        }
    }

    /// Save the current (or last) episode
    ///
    /// Without a path the episode is written to the configured save
    /// directory under a generated name.
    pub fn save_current_episode(&self, path: Option<&Path>) -> Result<PathBuf> {
        let Some(episode) = &self.episode else {
            tracing::warn!("No episode to save");
            return Err(RecorderError::NoEpisode);
        };

        let path = match path {
            Some(p) => p.to_path_buf(),
            None => self
                .storage
                .resolved_save_dir()
                .join(generate_filename("episode")),
        };
        let persisted = lock(episode).to_persistable()?;
        self.store.save(&path, &persisted, false)?;
        Ok(path)
    }

    /// Wait up to `timeout` for the newest live frame
    pub fn latest_frame(&self, timeout: Duration) -> Option<LiveFrame> {
        self.live.wait(timeout)
    }

    /// Handle to the live frame slot, for consumers on other threads
    pub fn live_feed(&self) -> LatestSlot<LiveFrame> {
        self.live.clone()
    }

    /// Register a consumer called with every published frame
    ///
    /// Errors and panics from the callback are logged and otherwise ignored.
    pub fn add_frame_callback<F>(&self, callback: F)
    where
        F: Fn(&LiveFrame) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        lock(&self.callbacks).push(Arc::new(callback));
    }

    /// Statistics for the current (or last) episode
    pub fn episode_stats(&self) -> Option<EpisodeStats> {
        let episode = self.episode.as_ref()?;
        let (num_frames, start) = {
            let ep = lock(episode);
            (ep.len(), ep.start_time())
        };
        let warming_up = self.is_warming_up();
        let warmup_remaining = match (warming_up, self.started_at) {
            (true, Some(started)) => {
                (self.config.warmup_secs - started.elapsed().as_secs_f64()).max(0.0)
            }
            _ => 0.0,
        };

        Some(EpisodeStats {
            num_frames,
            duration: crate::types::unix_timestamp() - start,
            warming_up,
            warmup_progress: self.warmup_progress(),
            warmup_remaining,
            devices: lock(&self.devices).stats_snapshot(),
            live_frames_dropped: self.live.evicted_count(),
        })
    }

    /// Run `f` against the current (or last) episode
    pub fn with_episode<R>(&self, f: impl FnOnce(&Episode) -> R) -> Option<R> {
        self.episode.as_ref().map(|e| f(&lock(e)))
    }

    /// Take ownership of the last episode once collection has stopped
    pub fn take_episode(&mut self) -> Option<Episode> {
        if self.is_collecting() {
            tracing::warn!("Cannot take the episode while collecting");
            return None;
        }
        let episode = self.episode.take()?;
        Some(match Arc::try_unwrap(episode) {
            Ok(m) => m.into_inner().unwrap_or_else(PoisonError::into_inner),
            // A detached worker still holds a handle
            Err(shared) => lock(&shared).clone(),
        })
    }
}

impl Drop for DataCollector {
    fn drop(&mut self) {
        if self.is_collecting() {
            self.stop_episode(None);
        }
    }
}
