//! Collection worker thread
//!
//! The worker runs one poll cycle per frame interval until it is told to
//! stop. Each cycle:
//!
//! 1. Takes the loop timestamp
//! 2. Leaves warm-up once the configured duration has elapsed
//! 3. Reads camera, pose and force, in that order
//! 4. Derives the action from the pose (after warm-up only)
//! 5. Appends the frame to the episode (after warm-up only)
//! 6. Publishes the frame to the live slot and callbacks (every cycle)
//!
//! # Rate Limiting
//!
//! After a cycle the worker waits on the stop channel for whatever is left
//! of the frame interval. An overrunning cycle is followed immediately by
//! the next one; lost time is not made up later.

use super::action::ActionTracker;
use super::slot::LatestSlot;
use super::{CollectorState, FrameCallback, StateCell};
use crate::devices::DeviceSet;
use crate::episode::Episode;
use crate::error::RecorderError;
use crate::types::{unix_timestamp, Frame, LiveFrame};
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// State handed to the worker thread at episode start
pub(crate) struct CollectionWorker {
    pub devices: Arc<Mutex<DeviceSet>>,
    pub episode: Arc<Mutex<Episode>>,
    pub state: Arc<StateCell>,
    pub live: LatestSlot<LiveFrame>,
    pub callbacks: Arc<Mutex<Vec<FrameCallback>>>,
    pub tracker: ActionTracker,
    pub frame_interval: Duration,
    pub warmup: Duration,
    pub started: Instant,
    pub stop_rx: Receiver<()>,
    warming_up: bool,
    cycle: u64,
}

impl CollectionWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        devices: Arc<Mutex<DeviceSet>>,
        episode: Arc<Mutex<Episode>>,
        state: Arc<StateCell>,
        live: LatestSlot<LiveFrame>,
        callbacks: Arc<Mutex<Vec<FrameCallback>>>,
        tracker: ActionTracker,
        frame_interval: Duration,
        warmup: Duration,
        stop_rx: Receiver<()>,
    ) -> Self {
        Self {
            devices,
            episode,
            state,
            live,
            callbacks,
            tracker,
            frame_interval,
            warmup,
            started: Instant::now(),
            stop_rx,
            warming_up: true,
            cycle: 0,
        }
    }

    /// Run the main worker loop
    pub fn run(mut self) {
        tracing::info!(
            "Collection worker started ({:.1} Hz, warm-up {:.2}s)",
            1.0 / self.frame_interval.as_secs_f64().max(f64::EPSILON),
            self.warmup.as_secs_f64()
        );

        loop {
            let cycle_start = Instant::now();
            if !self.run_cycle() {
                break;
            }

            let remaining = self.frame_interval.saturating_sub(cycle_start.elapsed());
            if self.stop_requested(remaining) {
                break;
            }
        }

        tracing::info!("Collection worker stopped after {} cycles", self.cycle);
    }

    /// Wait out the rest of the frame interval, returning true on stop
    fn stop_requested(&self, remaining: Duration) -> bool {
        if remaining.is_zero() {
            return !matches!(self.stop_rx.try_recv(), Err(TryRecvError::Empty));
        }
        !matches!(
            self.stop_rx.recv_timeout(remaining),
            Err(RecvTimeoutError::Timeout)
        )
    }

    fn update_phase(&mut self) {
        if self.warming_up && self.started.elapsed() >= self.warmup {
            self.warming_up = false;
            self.state
                .transition(CollectorState::Warmup, CollectorState::Collecting);
            tracing::info!("Warm-up complete, recording frames");
        }
    }

    /// Execute one poll cycle
    ///
    /// Returns false once the episode no longer accepts frames.
    pub fn run_cycle(&mut self) -> bool {
        let mut frame = Frame::new(unix_timestamp());
        self.update_phase();

        {
            let mut devices = self.devices.lock().unwrap_or_else(PoisonError::into_inner);
            frame.image = devices.read_camera();
            frame.state = devices.read_pose();
            frame.force = devices.read_force();
        }

        if !self.warming_up {
            if let Some(state) = &frame.state {
                frame.action = Some(self.tracker.derive(&state.value));
            }
        }

        let mut keep_running = true;
        if !self.warming_up && frame.has_data() {
            let mut episode = self.episode.lock().unwrap_or_else(PoisonError::into_inner);
            match episode.append(frame.clone()) {
                Ok(()) => {}
                Err(RecorderError::EpisodeFinalized) => {
                    tracing::debug!("Episode finalized, dropping late frame");
                    keep_running = false;
                }
                Err(e) => tracing::warn!("Frame {} not recorded: {}", self.cycle, e),
            }
        }

        let live = LiveFrame {
            frame,
            warming_up: self.warming_up,
            cycle: self.cycle,
        };
        self.cycle += 1;
        self.dispatch(live);
        keep_running
    }

    fn dispatch(&self, live: LiveFrame) {
        // Callbacks run unlocked so they may register further callbacks
        let callbacks: Vec<FrameCallback> = self
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for (i, callback) in callbacks.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| callback(&live))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!("Frame callback {} failed: {:#}", i, e),
                Err(_) => tracing::error!("Frame callback {} panicked", i),
            }
        }
        self.live.push(live);
    }

    /// Cycles executed so far
    pub fn cycles(&self) -> u64 {
        self.cycle
    }

    /// Whether the worker is still in warm-up
    pub fn is_warming_up(&self) -> bool {
        self.warming_up
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::MockDevice;
    use crate::episode::Metadata;
    use crate::transforms::FrameAlignment;
    use crate::types::{Modality, PoseState, Wrench};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn worker_with(devices: DeviceSet, warmup: Duration) -> (CollectionWorker, LatestSlot<LiveFrame>) {
        let (_stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let live = LatestSlot::new();
        let state = Arc::new(StateCell::new(CollectorState::Warmup));
        let worker = CollectionWorker::new(
            Arc::new(Mutex::new(devices)),
            Arc::new(Mutex::new(Episode::new(Metadata::new()))),
            state,
            live.clone(),
            Arc::new(Mutex::new(Vec::new())),
            ActionTracker::new(FrameAlignment::None),
            Duration::from_millis(10),
            warmup,
            stop_rx,
        );
        (worker, live)
    }

    fn pose_sequence() -> MockDevice<PoseState> {
        let mut pose = MockDevice::<PoseState>::new();
        pose.expect_is_connected().return_const(true);
        let mut x = 0.0;
        pose.expect_read().returning(move || {
            x += 0.1;
            Some([x, 0.0, 0.0, 0.0, 0.0, 0.0, 0.5])
        });
        pose
    }

    #[test]
    fn test_warmup_frames_not_recorded() {
        let devices = DeviceSet::new().with_pose(Box::new(pose_sequence()));
        let (mut worker, live) = worker_with(devices, Duration::from_secs(60));

        for _ in 0..3 {
            assert!(worker.run_cycle());
        }
        assert!(worker.is_warming_up());
        assert_eq!(worker.episode.lock().unwrap().len(), 0);
        assert!(worker.tracker.reference().is_none());

        let latest = live.take().unwrap();
        assert!(latest.warming_up);
        assert_eq!(latest.cycle, 2);
        assert!(latest.frame.action.is_none());
        assert!(latest.frame.state.is_some());
    }

    #[test]
    fn test_reference_set_after_warmup() {
        let devices = DeviceSet::new().with_pose(Box::new(pose_sequence()));
        let (mut worker, _live) = worker_with(devices, Duration::ZERO);

        worker.run_cycle();
        worker.run_cycle();
        assert!(!worker.is_warming_up());
        assert_eq!(worker.state.get(), CollectorState::Collecting);

        let episode = worker.episode.lock().unwrap();
        assert_eq!(episode.len(), 2);
        let actions = episode.actions();
        assert_eq!(actions[0], [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.5]);
        assert!((actions[1][0] - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_empty_cycle_not_recorded() {
        let mut force = MockDevice::<Wrench>::new();
        force.expect_is_connected().return_const(true);
        force.expect_read().returning(|| None);

        let devices = DeviceSet::new().with_force(Box::new(force));
        let (mut worker, live) = worker_with(devices, Duration::ZERO);
        worker.run_cycle();

        assert_eq!(worker.episode.lock().unwrap().len(), 0);
        // Published anyway
        assert!(live.take().is_some());
    }

    #[test]
    fn test_failing_callback_does_not_stop_cycle() {
        let devices = DeviceSet::new().with_pose(Box::new(pose_sequence()));
        let (mut worker, live) = worker_with(devices, Duration::ZERO);

        {
            let mut callbacks = worker.callbacks.lock().unwrap();
            callbacks.push(Arc::new(|_: &LiveFrame| -> anyhow::Result<()> {
                Err(anyhow::anyhow!("display closed"))
            }));
            callbacks.push(Arc::new(|_: &LiveFrame| -> anyhow::Result<()> {
                panic!("bad consumer")
            }));
        }

        assert!(worker.run_cycle());
        assert!(worker.run_cycle());
        assert_eq!(worker.episode.lock().unwrap().len(), 2);
        assert_eq!(live.take().unwrap().cycle, 1);
        assert_eq!(worker.cycles(), 2);
    }

    #[test]
    fn test_callback_registering_callback() {
        let devices = DeviceSet::new().with_pose(Box::new(pose_sequence()));
        let (mut worker, _live) = worker_with(devices, Duration::ZERO);

        let late_calls = Arc::new(AtomicUsize::new(0));
        let registry = Arc::clone(&worker.callbacks);
        let counter = Arc::clone(&late_calls);
        worker
            .callbacks
            .lock()
            .unwrap()
            .push(Arc::new(move |live: &LiveFrame| -> anyhow::Result<()> {
                if live.cycle == 0 {
                    let counter = Arc::clone(&counter);
                    registry.lock().unwrap().push(Arc::new(move |_: &LiveFrame| -> anyhow::Result<()> {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }));
                }
                Ok(())
            }));

        assert!(worker.run_cycle());
        assert_eq!(late_calls.load(Ordering::SeqCst), 0);
        assert!(worker.run_cycle());
        assert!(worker.run_cycle());
        assert_eq!(late_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_stops_when_episode_finalized() {
        let devices = DeviceSet::new().with_pose(Box::new(pose_sequence()));
        let (mut worker, _live) = worker_with(devices, Duration::ZERO);
        worker.run_cycle();
        worker.episode.lock().unwrap().finalize();
        assert!(!worker.run_cycle());
        assert_eq!(
            worker.episode.lock().unwrap().modality_len(Modality::Pose),
            1
        );
    }
}
