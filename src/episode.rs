//! In-memory episode buffer
//!
//! An [`Episode`] accumulates the frames of one recording session. It is
//! append-only and has a single writer (the collection worker). Once
//! [`Episode::finalize`] has run it no longer accepts frames and is ready to
//! be converted with [`Episode::to_persistable`].

use crate::error::{RecorderError, Result};
use crate::storage::PersistedEpisode;
use crate::types::{unix_timestamp, Action, Frame, ImageFrame, Modality, PoseState, Wrench};
use ndarray::{Array1, Array2, Array4, Axis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Scalar value stored in episode metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl MetadataValue {
    /// Numeric view of the value
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Int(v) => Some(*v as f64),
            MetadataValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Text view of the value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl std::fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataValue::Bool(v) => write!(f, "{}", v),
            MetadataValue::Int(v) => write!(f, "{}", v),
            MetadataValue::Float(v) => write!(f, "{}", v),
            MetadataValue::Text(v) => write!(f, "{}", v),
        }
    }
}

impl From<bool> for MetadataValue {
    fn from(v: bool) -> Self {
        MetadataValue::Bool(v)
    }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        MetadataValue::Int(v)
    }
}

impl From<usize> for MetadataValue {
    fn from(v: usize) -> Self {
        MetadataValue::Int(v as i64)
    }
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        MetadataValue::Float(v)
    }
}

impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        MetadataValue::Text(v.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(v: String) -> Self {
        MetadataValue::Text(v)
    }
}

/// Free-form metadata map
pub type Metadata = BTreeMap<String, MetadataValue>;

/// One recording session's frames
#[derive(Debug, Clone, Default)]
pub struct Episode {
    images: Vec<ImageFrame>,
    states: Vec<PoseState>,
    actions: Vec<Action>,
    forces: Vec<Wrench>,
    timestamps: Vec<f64>,
    timestamps_camera: Vec<f64>,
    timestamps_pose: Vec<f64>,
    timestamps_force: Vec<f64>,
    metadata: Metadata,
    start_time: f64,
    end_time: Option<f64>,
}

impl Episode {
    /// Start a new episode now
    pub fn new(metadata: Metadata) -> Self {
        Self::starting_at(unix_timestamp(), metadata)
    }

    /// Start a new episode at an explicit time
    pub fn starting_at(start_time: f64, metadata: Metadata) -> Self {
        Self {
            metadata,
            start_time,
            ..Default::default()
        }
    }

    /// Number of frames (loop cycles) recorded
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Whether no frames have been recorded
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Number of samples recorded for one modality
    pub fn modality_len(&self, modality: Modality) -> usize {
        match modality {
            Modality::Camera => self.images.len(),
            Modality::Pose => self.states.len(),
            Modality::Force => self.forces.len(),
        }
    }

    /// Number of actions recorded
    pub fn action_len(&self) -> usize {
        self.actions.len()
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    pub fn end_time(&self) -> Option<f64> {
        self.end_time
    }

    /// Whether `finalize` has run
    pub fn is_finalized(&self) -> bool {
        self.end_time.is_some()
    }

    /// Metadata map
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Set a metadata entry
    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<MetadataValue>) {
        self.metadata.insert(key.into(), value.into());
    }

    /// Loop timestamps
    pub fn timestamps(&self) -> &[f64] {
        &self.timestamps
    }

    /// Per-sensor timestamps for one modality
    pub fn modality_timestamps(&self, modality: Modality) -> &[f64] {
        match modality {
            Modality::Camera => &self.timestamps_camera,
            Modality::Pose => &self.timestamps_pose,
            Modality::Force => &self.timestamps_force,
        }
    }

    /// Recorded pose states
    pub fn states(&self) -> &[PoseState] {
        &self.states
    }

    /// Recorded actions
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Seconds between start and the last recorded cycle (or end, once finalized)
    pub fn elapsed(&self) -> f64 {
        match self.end_time {
            Some(end) => end - self.start_time,
            None => self
                .timestamps
                .last()
                .map(|t| t - self.start_time)
                .unwrap_or(0.0),
        }
    }

    /// Append one frame
    ///
    /// Every present modality's timestamp must not go backwards, an action
    /// requires a pose, and all images must share a shape. A rejected frame
    /// leaves the episode unchanged.
    pub fn append(&mut self, frame: Frame) -> Result<()> {
        if self.is_finalized() {
            return Err(RecorderError::EpisodeFinalized);
        }

        if let Some(&last) = self.timestamps.last() {
            if frame.loop_timestamp < last {
                return Err(RecorderError::inconsistent(format!(
                    "loop timestamp {} precedes {}",
                    frame.loop_timestamp, last
                )));
            }
        }
        for modality in Modality::ALL {
            if let (Some(ts), Some(&last)) = (
                frame.timestamp_of(modality),
                self.modality_timestamps(modality).last(),
            ) {
                if ts < last {
                    return Err(RecorderError::inconsistent(format!(
                        "{} timestamp {} precedes {}",
                        modality, ts, last
                    )));
                }
            }
        }
        if frame.action.is_some() && frame.state.is_none() {
            return Err(RecorderError::inconsistent("action without a pose state"));
        }
        if let (Some(img), Some(first)) = (&frame.image, self.images.first()) {
            if img.value.dim() != first.dim() {
                return Err(RecorderError::Shape(format!(
                    "image shape {:?} differs from {:?}",
                    img.value.dim(),
                    first.dim()
                )));
            }
        }
        if let Some(img) = &frame.image {
            if img.value.dim().2 != 3 {
                return Err(RecorderError::Shape(format!(
                    "image has {} channels, expected 3",
                    img.value.dim().2
                )));
            }
        }

        if let Some(img) = frame.image {
            self.images.push(img.value);
            self.timestamps_camera.push(img.timestamp);
        }
        if let Some(state) = frame.state {
            self.states.push(state.value);
            self.timestamps_pose.push(state.timestamp);
        }
        if let Some(action) = frame.action {
            self.actions.push(action);
        }
        if let Some(force) = frame.force {
            self.forces.push(force.value);
            self.timestamps_force.push(force.timestamp);
        }
        self.timestamps.push(frame.loop_timestamp);
        Ok(())
    }

    /// Stamp the end time and summary metadata
    ///
    /// Returns false if the episode was already finalized.
    pub fn finalize(&mut self) -> bool {
        self.finalize_at(unix_timestamp())
    }

    /// Finalize with an explicit end time
    pub fn finalize_at(&mut self, end_time: f64) -> bool {
        if self.is_finalized() {
            return false;
        }
        self.end_time = Some(end_time);

        let duration = end_time - self.start_time;
        let num_frames = self.len();
        let fps = if duration > 0.0 {
            num_frames as f64 / duration
        } else {
            0.0
        };

        self.set_metadata("start_time", self.start_time);
        self.set_metadata("end_time", end_time);
        self.set_metadata("duration", duration);
        self.set_metadata("num_frames", num_frames);
        self.set_metadata("fps", fps);
        true
    }

    /// Build the on-disk arrays and a metadata snapshot
    pub fn to_persistable(&self) -> Result<PersistedEpisode> {
        let image = if self.images.is_empty() {
            Array4::zeros((0, 0, 0, 3))
        } else {
            let views: Vec<_> = self.images.iter().map(|i| i.view()).collect();
            ndarray::stack(Axis(0), &views)?
        };

        Ok(PersistedEpisode {
            image,
            state: rows_to_array(&self.states)?,
            action: rows_to_array(&self.actions)?,
            force: rows_to_array(&self.forces)?,
            timestamp: Array1::from(self.timestamps.clone()),
            timestamp_camera: Array1::from(self.timestamps_camera.clone()),
            timestamp_pose: Array1::from(self.timestamps_pose.clone()),
            timestamp_force: Array1::from(self.timestamps_force.clone()),
            metadata: self.metadata.clone(),
        })
    }
}

fn rows_to_array<const N: usize>(rows: &[[f64; N]]) -> Result<Array2<f64>> {
    let flat: Vec<f64> = rows.iter().flat_map(|r| r.iter().copied()).collect();
    Ok(Array2::from_shape_vec((rows.len(), N), flat)?)
}
