//! Timing-accurate episode replay
//!
//! [`ReplayEngine`] holds a fully loaded episode and is driven by a host
//! loop calling [`ReplayEngine::update`]. Frame pacing follows the recorded
//! loop timestamps rather than a fixed rate, so playback reproduces the
//! original jitter and pauses.
//!
//! Modalities that were not read on every cycle are mapped back to the
//! cycle they were acquired in using their own timestamps; a frame never
//! pairs data from different cycles.

use crate::error::{RecorderError, Result};
use crate::storage::{FrameStore, PersistedEpisode};
use crate::types::{Frame, Modality, Stamped, ACTION_DIM, POSE_DIM, WRENCH_DIM};
use std::path::Path;
use std::time::{Duration, Instant};

/// Rate used when neither timestamps nor metadata give one
pub const DEFAULT_FPS: f64 = 30.0;

/// Minimum playback speed multiplier
pub const MIN_SPEED: f64 = 0.1;

/// Maximum playback speed multiplier
pub const MAX_SPEED: f64 = 10.0;

/// Playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Paused,
    Playing,
}

/// A frame produced by the engine
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayFrame {
    /// Index into the loop-timestamp sequence
    pub index: usize,
    /// Samples recorded on that cycle
    pub frame: Frame,
}

/// Summary of a loaded episode
#[derive(Debug, Clone)]
pub struct ReplayInfo {
    pub total_frames: usize,
    pub fps: f64,
    pub duration: f64,
    pub has_image: bool,
    pub has_state: bool,
    pub has_action: bool,
    pub has_force: bool,
    pub has_timestamps: bool,
    pub image_shape: Option<(usize, usize, usize)>,
}

/// Replays a persisted episode with speed, seek and loop controls
#[derive(Debug)]
pub struct ReplayEngine {
    episode: PersistedEpisode,
    total: usize,
    fps: f64,
    camera_index: Vec<Option<usize>>,
    pose_index: Vec<Option<usize>>,
    action_index: Vec<Option<usize>>,
    force_index: Vec<Option<usize>>,
    state: PlaybackState,
    current: usize,
    speed: f64,
    looping: bool,
    /// Wall-clock time of the last emission; `None` means "start timing on next update"
    anchor: Option<Instant>,
}

impl ReplayEngine {
    /// Load an episode file
    pub fn open(path: impl AsRef<Path>, store: &FrameStore) -> Result<Self> {
        let path = path.as_ref();
        let episode = store.load(path)?;
        let engine = Self::new(episode)?;
        tracing::info!(
            "Loaded {:?} for replay: {} frames at {:.1} fps",
            path,
            engine.total,
            engine.fps
        );
        Ok(engine)
    }

    /// Prepare an in-memory episode for replay
    pub fn new(episode: PersistedEpisode) -> Result<Self> {
        let total = if !episode.timestamp.is_empty() {
            episode.timestamp.len()
        } else {
            [Modality::Camera, Modality::Pose, Modality::Force]
                .into_iter()
                .map(|m| episode.modality_len(m))
                .find(|&n| n > 0)
                .unwrap_or(0)
        };
        if total == 0 {
            return Err(RecorderError::Malformed(
                "episode contains no frames".to_string(),
            ));
        }

        let fps = ["fps", "camera_fps"]
            .into_iter()
            .filter_map(|k| episode.metadata_f64(k))
            .find(|v| *v > 0.0 && v.is_finite())
            .unwrap_or(DEFAULT_FPS);

        let loop_ts = episode.timestamp.to_vec();
        let index_for = |m: Modality| {
            alignment_index(
                &loop_ts,
                total,
                episode.modality_len(m),
                &episode.modality_timestamps(m).to_vec(),
            )
        };
        let camera_index = index_for(Modality::Camera);
        let pose_index = index_for(Modality::Pose);
        let force_index = index_for(Modality::Force);

        let n_action = episode.action.nrows();
        let action_index = if n_action == episode.modality_len(Modality::Pose) {
            pose_index.clone()
        } else {
            alignment_index(&loop_ts, total, n_action, &[])
        };

        Ok(Self {
            episode,
            total,
            fps,
            camera_index,
            pose_index,
            action_index,
            force_index,
            state: PlaybackState::Paused,
            current: 0,
            speed: 1.0,
            looping: false,
            anchor: None,
        })
    }

    /// The loaded episode
    pub fn episode(&self) -> &PersistedEpisode {
        &self.episode
    }

    pub fn total_frames(&self) -> usize {
        self.total
    }

    pub fn current_frame(&self) -> usize {
        self.current
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    pub fn at_start(&self) -> bool {
        self.current == 0
    }

    pub fn at_end(&self) -> bool {
        self.current + 1 >= self.total
    }

    /// Start or resume playback
    pub fn play(&mut self) {
        self.play_at(Instant::now());
    }

    /// Start or resume playback with an explicit clock reading
    pub fn play_at(&mut self, now: Instant) {
        self.state = PlaybackState::Playing;
        self.anchor = Some(now);
        tracing::debug!("Playback started at frame {}", self.current);
    }

    /// Pause playback
    pub fn pause(&mut self) {
        self.state = PlaybackState::Paused;
        tracing::debug!("Playback paused at frame {}", self.current);
    }

    /// Toggle between playing and paused
    pub fn toggle(&mut self) {
        match self.state {
            PlaybackState::Playing => self.pause(),
            PlaybackState::Paused => self.play(),
        }
    }

    /// Pause and return to the first frame
    pub fn stop(&mut self) {
        self.state = PlaybackState::Paused;
        self.current = 0;
        self.anchor = None;
    }

    /// Jump to a frame, clamped to the episode
    pub fn seek(&mut self, frame: usize) {
        self.current = frame.min(self.total - 1);
        // Timing restarts from the next update
        self.anchor = None;
        tracing::debug!("Seeked to frame {}", self.current);
    }

    /// Jump relative to the current frame
    pub fn seek_relative(&mut self, delta: i64) {
        let target = (self.current as i64).saturating_add(delta).max(0);
        self.seek(usize::try_from(target).unwrap_or(usize::MAX));
    }

    /// Set the speed multiplier, clamped to 0.1-10
    pub fn set_speed(&mut self, speed: f64) {
        self.speed = if speed.is_nan() {
            1.0
        } else {
            speed.clamp(MIN_SPEED, MAX_SPEED)
        };
        tracing::debug!("Playback speed set to {}x", self.speed);
    }

    /// Enable or disable looping
    pub fn set_loop(&mut self, looping: bool) {
        self.looping = looping;
    }

    /// Playback progress as `(current, total, percent)`
    pub fn progress(&self) -> (usize, usize, f64) {
        let denom = self.total.saturating_sub(1).max(1) as f64;
        (self.current, self.total, self.current as f64 / denom * 100.0)
    }

    /// Recorded interval from `index` to the next frame, in seconds
    fn interval_after(&self, index: usize) -> f64 {
        let ts = &self.episode.timestamp;
        if index + 1 < ts.len() {
            (ts[index + 1] - ts[index]).max(0.0)
        } else {
            1.0 / self.fps
        }
    }

    /// Advance playback using the system clock
    pub fn update(&mut self) -> Option<ReplayFrame> {
        self.update_at(Instant::now())
    }

    /// Advance playback given the current clock reading
    ///
    /// Returns the frame to display when one is due.
    pub fn update_at(&mut self, now: Instant) -> Option<ReplayFrame> {
        if !self.is_playing() {
            return None;
        }
        let Some(anchor) = self.anchor else {
            self.anchor = Some(now);
            return None;
        };

        let interval = self.interval_after(self.current) / self.speed;
        let elapsed = now.saturating_duration_since(anchor).as_secs_f64();
        if elapsed < interval {
            return None;
        }

        let mut next_anchor = anchor + Duration::from_secs_f64(interval);
        if now.saturating_duration_since(next_anchor).as_secs_f64() > interval * 2.0 {
            next_anchor = now;
        }
        self.anchor = Some(next_anchor);

        let emitted = self.frame_at(self.current);
        self.current += 1;
        if self.current >= self.total {
            if self.looping {
                self.current = 0;
                self.anchor = Some(now);
                tracing::debug!("Looping back to start");
            } else {
                self.pause();
                self.current = self.total - 1;
                tracing::debug!("Reached end of episode");
            }
        }
        Some(emitted)
    }

    /// Every modality recorded on cycle `index`
    pub fn get_frame(&self, index: usize) -> Result<ReplayFrame> {
        if index >= self.total {
            return Err(RecorderError::FrameOutOfRange {
                index,
                total: self.total,
            });
        }
        Ok(self.frame_at(index))
    }

    fn loop_timestamp(&self, index: usize) -> f64 {
        self.episode
            .timestamp
            .get(index)
            .copied()
            .unwrap_or(index as f64 / self.fps)
    }

    fn sample_timestamp(&self, modality: Modality, sample: usize, index: usize) -> f64 {
        self.episode
            .modality_timestamps(modality)
            .get(sample)
            .copied()
            .unwrap_or_else(|| self.loop_timestamp(index))
    }

    fn frame_at(&self, index: usize) -> ReplayFrame {
        let ep = &self.episode;
        let mut frame = Frame::new(self.loop_timestamp(index));

        if let Some(j) = self.camera_index.get(index).copied().flatten() {
            frame.image = Some(Stamped::new(
                ep.image.index_axis(ndarray::Axis(0), j).to_owned(),
                self.sample_timestamp(Modality::Camera, j, index),
            ));
        }
        if let Some(j) = self.pose_index.get(index).copied().flatten() {
            frame.state = Some(Stamped::new(
                row::<POSE_DIM>(ep.state.row(j)),
                self.sample_timestamp(Modality::Pose, j, index),
            ));
        }
        if let Some(j) = self.action_index.get(index).copied().flatten() {
            frame.action = Some(row::<ACTION_DIM>(ep.action.row(j)));
        }
        if let Some(j) = self.force_index.get(index).copied().flatten() {
            frame.force = Some(Stamped::new(
                row::<WRENCH_DIM>(ep.force.row(j)),
                self.sample_timestamp(Modality::Force, j, index),
            ));
        }

        ReplayFrame { index, frame }
    }

    /// Episode summary
    pub fn info(&self) -> ReplayInfo {
        let ep = &self.episode;
        let ts = &ep.timestamp;
        let duration = if ts.len() >= 2 {
            ts[ts.len() - 1] - ts[0]
        } else {
            self.total as f64 / self.fps
        };
        let image_shape = if ep.image.shape()[0] > 0 {
            let s = ep.image.shape();
            Some((s[1], s[2], s[3]))
        } else {
            None
        };
        ReplayInfo {
            total_frames: self.total,
            fps: self.fps,
            duration,
            has_image: ep.modality_len(Modality::Camera) > 0,
            has_state: ep.modality_len(Modality::Pose) > 0,
            has_action: ep.action.nrows() > 0,
            has_force: ep.modality_len(Modality::Force) > 0,
            has_timestamps: !ts.is_empty(),
            image_shape,
        }
    }
}

fn row<const N: usize>(view: ndarray::ArrayView1<'_, f64>) -> [f64; N] {
    let mut out = [0.0; N];
    for (o, v) in out.iter_mut().zip(view.iter()) {
        *o = *v;
    }
    out
}

/// Map each loop cycle to the sample of one modality recorded on it
///
/// With per-sensor timestamps, sample `j` belongs to cycle `i` when its
/// timestamp falls in `[loop[i], loop[i + 1])`. Without them, samples are
/// taken one per cycle from the start.
fn alignment_index(
    loop_ts: &[f64],
    total: usize,
    n_samples: usize,
    sample_ts: &[f64],
) -> Vec<Option<usize>> {
    if n_samples == 0 {
        return vec![None; total];
    }
    if !loop_ts.is_empty() && sample_ts.len() == n_samples && n_samples < total {
        let mut index = vec![None; total];
        let mut j = 0;
        for (i, slot) in index.iter_mut().enumerate() {
            let start = loop_ts[i];
            let end = loop_ts.get(i + 1).copied().unwrap_or(f64::INFINITY);
            while j < n_samples && sample_ts[j] < start {
                j += 1;
            }
            if j < n_samples && sample_ts[j] < end {
                *slot = Some(j);
                j += 1;
            }
        }
        return index;
    }
    (0..total).map(|i| (i < n_samples).then_some(i)).collect()
}
