//! Core types used throughout teleop-rec
//!
//! This module defines the sample types produced by devices and the frame
//! type that flows from the collection loop into an episode.

use ndarray::Array3;
use serde::{Deserialize, Serialize};

/// Pose state `[x, y, z, roll, pitch, yaw, gripper]`
pub type PoseState = [f64; 7];

/// Action `[dx, dy, dz, droll, dpitch, dyaw, gripper]`
///
/// The first six components are deltas relative to the reference pose; the
/// gripper is always the absolute value.
pub type Action = [f64; 7];

/// Force/torque sample `[fx, fy, fz, mx, my, mz]`
pub type Wrench = [f64; 6];

/// Camera image as height × width × 3 bytes
pub type ImageFrame = Array3<u8>;

/// Number of elements in a pose state
pub const POSE_DIM: usize = 7;

/// Number of elements in an action
pub const ACTION_DIM: usize = 7;

/// Number of elements in a force/torque sample
pub const WRENCH_DIM: usize = 6;

/// Index of the gripper component within a pose or action
pub const GRIPPER_INDEX: usize = 6;

/// Seconds since the Unix epoch with sub-microsecond resolution
pub fn unix_timestamp() -> f64 {
    let now = chrono::Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_nanos()) * 1e-9
}

/// A value tagged with the moment its read call returned
#[derive(Debug, Clone, PartialEq)]
pub struct Stamped<T> {
    /// The sample
    pub value: T,
    /// Acquisition time (Unix seconds)
    pub timestamp: f64,
}

impl<T> Stamped<T> {
    /// Create a new stamped value
    pub fn new(value: T, timestamp: f64) -> Self {
        Self { value, timestamp }
    }

    /// Map the inner value, keeping the timestamp
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Stamped<U> {
        Stamped {
            value: f(self.value),
            timestamp: self.timestamp,
        }
    }
}

/// The three sensing modalities an episode can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Camera,
    Pose,
    Force,
}

impl Modality {
    /// All modalities in poll order
    pub const ALL: [Modality; 3] = [Modality::Camera, Modality::Pose, Modality::Force];

    /// Name of the data array this modality is stored under
    pub fn array_name(&self) -> &'static str {
        match self {
            Modality::Camera => "image",
            Modality::Pose => "state",
            Modality::Force => "force",
        }
    }

    /// Name of the per-sensor timestamp array for this modality
    pub fn timestamp_name(&self) -> &'static str {
        match self {
            Modality::Camera => "timestamp_camera",
            Modality::Pose => "timestamp_pose",
            Modality::Force => "timestamp_force",
        }
    }
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Modality::Camera => write!(f, "camera"),
            Modality::Pose => write!(f, "pose"),
            Modality::Force => write!(f, "force"),
        }
    }
}

/// One poll cycle's worth of samples
///
/// Every modality is optional. `action` is only present when a pose was
/// read after warm-up.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    /// When the poll cycle began (Unix seconds)
    pub loop_timestamp: f64,
    /// Camera image
    pub image: Option<Stamped<ImageFrame>>,
    /// Pose state
    pub state: Option<Stamped<PoseState>>,
    /// Action derived from the pose state
    pub action: Option<Action>,
    /// Force/torque sample
    pub force: Option<Stamped<Wrench>>,
}

impl Frame {
    /// Create an empty frame for a cycle starting at `loop_timestamp`
    pub fn new(loop_timestamp: f64) -> Self {
        Self {
            loop_timestamp,
            ..Default::default()
        }
    }

    /// Whether at least one modality is present
    pub fn has_data(&self) -> bool {
        self.image.is_some() || self.state.is_some() || self.force.is_some()
    }

    /// Whether the given modality is present
    pub fn has(&self, modality: Modality) -> bool {
        match modality {
            Modality::Camera => self.image.is_some(),
            Modality::Pose => self.state.is_some(),
            Modality::Force => self.force.is_some(),
        }
    }

    /// Acquisition timestamp of the given modality, if present
    pub fn timestamp_of(&self, modality: Modality) -> Option<f64> {
        match modality {
            Modality::Camera => self.image.as_ref().map(|s| s.timestamp),
            Modality::Pose => self.state.as_ref().map(|s| s.timestamp),
            Modality::Force => self.force.as_ref().map(|s| s.timestamp),
        }
    }
}

/// A frame published to live consumers
#[derive(Debug, Clone)]
pub struct LiveFrame {
    /// The samples
    pub frame: Frame,
    /// Whether the collector was still warming up on this cycle
    pub warming_up: bool,
    /// Cycle counter since episode start
    pub cycle: u64,
}

/// Represents the connection status of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    /// Not connected
    #[default]
    Disconnected,
    /// Connected and ready
    Connected,
    /// Connection attempt failed
    Error,
}

impl ConnectionStatus {
    /// Build from a `connect()` result
    pub fn from_connect(ok: bool) -> Self {
        if ok {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Error
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "Disconnected"),
            ConnectionStatus::Connected => write!(f, "Connected"),
            ConnectionStatus::Error => write!(f, "Error"),
        }
    }
}
