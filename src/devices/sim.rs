//! Simulated devices for running without hardware
//!
//! Each simulated device produces deterministic data as a function of its
//! own read counter, so recordings made from them are reproducible.
//!
//! # Signal Patterns
//!
//! - [`SignalPattern::Constant`] - Fixed value
//! - [`SignalPattern::Sine`] - Sinusoid with frequency, amplitude and offset
//! - [`SignalPattern::Ramp`] - Linear drift from an offset
//! - [`SignalPattern::Sawtooth`] - Linear ramp that resets periodically
//! - [`SignalPattern::Square`] - Square wave alternating between two values
//! - [`SignalPattern::Triangle`] - Triangle wave
//!
//! # Example
//!
//! ```ignore
//! use teleop_rec::devices::sim::{SimPoseSensor, PoseTrajectory};
//!
//! let pose = SimPoseSensor::new(PoseTrajectory::linear_drift([0.0; 7], [0.01, 0.0, 0.0, 0.0, 0.0, 0.0]))
//!     .with_latency(std::time::Duration::from_millis(2))
//!     .with_dropout_every(10);
//! ```

use super::{Device, DeviceSet};
use crate::config::AppConfig;
use crate::types::{ImageFrame, PoseState, Wrench, GRIPPER_INDEX};
use ndarray::Array3;
use std::f64::consts::PI;
use std::time::Duration;

/// Pattern for generating a scalar signal over time
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SignalPattern {
    /// Constant value
    Constant(f64),
    /// Sine wave
    Sine {
        frequency: f64,
        amplitude: f64,
        offset: f64,
    },
    /// Linear drift `offset + slope * t`
    Ramp { slope: f64, offset: f64 },
    /// Sawtooth wave
    Sawtooth { period: f64, amplitude: f64 },
    /// Square wave
    Square { period: f64, amplitude: f64 },
    /// Triangle wave
    Triangle { period: f64, amplitude: f64 },
}

impl Default for SignalPattern {
    fn default() -> Self {
        SignalPattern::Constant(0.0)
    }
}

impl SignalPattern {
    /// Evaluate the pattern at `t` seconds
    pub fn value_at(&self, t: f64) -> f64 {
        match *self {
            SignalPattern::Constant(v) => v,
            SignalPattern::Sine {
                frequency,
                amplitude,
                offset,
            } => offset + amplitude * (2.0 * PI * frequency * t).sin(),
            SignalPattern::Ramp { slope, offset } => offset + slope * t,
            SignalPattern::Sawtooth { period, amplitude } => {
                let p = t % period;
                amplitude * (p / period)
            }
            SignalPattern::Square { period, amplitude } => {
                let p = t % period;
                if p < period / 2.0 {
                    amplitude
                } else {
                    -amplitude
                }
            }
            SignalPattern::Triangle { period, amplitude } => {
                let p = t % period;
                let half = period / 2.0;
                if p < half {
                    amplitude * (2.0 * p / half - 1.0)
                } else {
                    amplitude * (1.0 - 2.0 * (p - half) / half)
                }
            }
        }
    }
}

/// Small xorshift generator so each device owns its own noise sequence
#[derive(Debug, Clone)]
struct Noise {
    state: u64,
    amplitude: f64,
}

impl Noise {
    fn new(seed: u64, amplitude: f64) -> Self {
        Self {
            state: seed.max(1),
            amplitude,
        }
    }

    fn sample(&mut self) -> f64 {
        if self.amplitude <= 0.0 {
            return 0.0;
        }
        let mut s = self.state;
        s ^= s << 13;
        s ^= s >> 7;
        s ^= s << 17;
        self.state = s;
        ((s as f64) / (u64::MAX as f64) - 0.5) * 2.0 * self.amplitude
    }
}

/// Behaviour shared by the simulated devices
#[derive(Debug, Clone)]
struct SimBehaviour {
    connected: bool,
    fail_connect: bool,
    latency: Duration,
    dropout_every: Option<u64>,
    sample_rate: f64,
    reads: u64,
}

impl SimBehaviour {
    fn new(sample_rate: f64) -> Self {
        Self {
            connected: false,
            fail_connect: false,
            latency: Duration::ZERO,
            dropout_every: None,
            sample_rate: if sample_rate > 0.0 { sample_rate } else { 1.0 },
            reads: 0,
        }
    }

    fn connect(&mut self) -> bool {
        self.connected = !self.fail_connect;
        self.connected
    }

    fn disconnect(&mut self) -> bool {
        self.connected = false;
        true
    }

    /// Advance the read counter; returns the sample time, or `None` on dropout
    fn next(&mut self) -> Option<f64> {
        if !self.connected {
            return None;
        }
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        let index = self.reads;
        self.reads += 1;
        if let Some(n) = self.dropout_every {
            if n > 0 && (index + 1) % n == 0 {
                return None;
            }
        }
        Some(index as f64 / self.sample_rate)
    }
}

macro_rules! sim_builders {
    () => {
        /// Simulated read latency
        pub fn with_latency(mut self, latency: Duration) -> Self {
            self.behaviour.latency = latency;
            self
        }

        /// Return nothing on every `n`th read
        pub fn with_dropout_every(mut self, n: u64) -> Self {
            self.behaviour.dropout_every = Some(n);
            self
        }

        /// Make `connect()` fail
        pub fn failing_connect(mut self) -> Self {
            self.behaviour.fail_connect = true;
            self
        }

        /// Rate used to turn the read counter into time
        pub fn with_sample_rate(mut self, hz: f64) -> Self {
            if hz > 0.0 {
                self.behaviour.sample_rate = hz;
            }
            self
        }

        /// Number of read calls made while connected
        pub fn reads(&self) -> u64 {
            self.behaviour.reads
        }
    };
}

// ==================== Camera ====================

/// Camera producing a moving diagonal gradient
#[derive(Debug, Clone)]
pub struct SimCamera {
    width: usize,
    height: usize,
    behaviour: SimBehaviour,
}

impl SimCamera {
    /// Create a camera producing `height × width × 3` frames
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            behaviour: SimBehaviour::new(30.0),
        }
    }

    sim_builders!();

    fn render(&self, frame_index: u64) -> ImageFrame {
        let shift = (frame_index % 256) as usize;
        Array3::from_shape_fn((self.height, self.width, 3), |(y, x, c)| {
            ((x + y + shift + c * 85) % 256) as u8
        })
    }
}

impl Device<ImageFrame> for SimCamera {
    fn connect(&mut self) -> bool {
        self.behaviour.connect()
    }

    fn disconnect(&mut self) -> bool {
        self.behaviour.disconnect()
    }

    fn is_connected(&self) -> bool {
        self.behaviour.connected
    }

    fn read(&mut self) -> Option<ImageFrame> {
        self.behaviour.next()?;
        Some(self.render(self.behaviour.reads - 1))
    }
}

// ==================== Pose ====================

/// Path followed by a simulated pose tracker
#[derive(Debug, Clone, PartialEq)]
pub enum PoseTrajectory {
    /// Fixed pose
    Static(PoseState),
    /// Constant-velocity drift of all six pose components
    LinearDrift {
        start: PoseState,
        velocity: [f64; 6],
    },
    /// Horizontal circle with the tracker yawing to follow the tangent
    Circle {
        center: [f64; 3],
        radius: f64,
        period: f64,
    },
}

impl PoseTrajectory {
    /// Linear drift starting at `start`
    pub fn linear_drift(start: PoseState, velocity: [f64; 6]) -> Self {
        PoseTrajectory::LinearDrift { start, velocity }
    }

    /// Pose at `t` seconds; the gripper is filled in by the sensor
    pub fn pose_at(&self, t: f64) -> PoseState {
        match self {
            PoseTrajectory::Static(p) => *p,
            PoseTrajectory::LinearDrift { start, velocity } => {
                let mut p = *start;
                for (i, v) in velocity.iter().enumerate() {
                    p[i] += v * t;
                }
                p
            }
            PoseTrajectory::Circle {
                center,
                radius,
                period,
            } => {
                let angle = if *period > 0.0 { 2.0 * PI * t / period } else { 0.0 };
                let yaw = (angle + PI / 2.0 + PI).rem_euclid(2.0 * PI) - PI;
                [
                    center[0] + radius * angle.cos(),
                    center[1] + radius * angle.sin(),
                    center[2],
                    0.0,
                    0.0,
                    yaw,
                    0.0,
                ]
            }
        }
    }
}

/// Pose tracker following a [`PoseTrajectory`]
#[derive(Debug, Clone)]
pub struct SimPoseSensor {
    trajectory: PoseTrajectory,
    gripper: Option<SignalPattern>,
    noise: Noise,
    behaviour: SimBehaviour,
}

impl SimPoseSensor {
    /// Create a pose sensor
    pub fn new(trajectory: PoseTrajectory) -> Self {
        Self {
            trajectory,
            gripper: None,
            noise: Noise::new(0x5EED_0001, 0.0),
            behaviour: SimBehaviour::new(30.0),
        }
    }

    /// Drive the gripper from a signal instead of the trajectory
    pub fn with_gripper(mut self, pattern: SignalPattern) -> Self {
        self.gripper = Some(pattern);
        self
    }

    /// Add uniform position noise of the given amplitude
    pub fn with_noise(mut self, amplitude: f64) -> Self {
        self.noise.amplitude = amplitude;
        self
    }

    sim_builders!();
}

impl Device<PoseState> for SimPoseSensor {
    fn connect(&mut self) -> bool {
        self.behaviour.connect()
    }

    fn disconnect(&mut self) -> bool {
        self.behaviour.disconnect()
    }

    fn is_connected(&self) -> bool {
        self.behaviour.connected
    }

    fn read(&mut self) -> Option<PoseState> {
        let t = self.behaviour.next()?;
        let mut pose = self.trajectory.pose_at(t);
        for v in pose.iter_mut().take(3) {
            *v += self.noise.sample();
        }
        if let Some(g) = &self.gripper {
            pose[GRIPPER_INDEX] = g.value_at(t).clamp(0.0, 1.0);
        }
        Some(pose)
    }
}

// ==================== Force ====================

/// Force/torque sensor with one signal per axis
#[derive(Debug, Clone)]
pub struct SimForceSensor {
    axes: [SignalPattern; 6],
    noise: Noise,
    behaviour: SimBehaviour,
}

impl Default for SimForceSensor {
    fn default() -> Self {
        let mut axes = [SignalPattern::default(); 6];
        for (i, axis) in axes.iter_mut().enumerate() {
            *axis = SignalPattern::Sine {
                frequency: 0.5 + 0.25 * i as f64,
                amplitude: if i < 3 { 5.0 } else { 0.2 },
                offset: 0.0,
            };
        }
        Self::new(axes)
    }
}

impl SimForceSensor {
    /// Create a sensor from per-axis patterns `[fx, fy, fz, mx, my, mz]`
    pub fn new(axes: [SignalPattern; 6]) -> Self {
        Self {
            axes,
            noise: Noise::new(0x5EED_0002, 0.0),
            behaviour: SimBehaviour::new(100.0),
        }
    }

    /// Add uniform noise of the given amplitude to every axis
    pub fn with_noise(mut self, amplitude: f64) -> Self {
        self.noise.amplitude = amplitude;
        self
    }

    sim_builders!();
}

impl Device<Wrench> for SimForceSensor {
    fn connect(&mut self) -> bool {
        self.behaviour.connect()
    }

    fn disconnect(&mut self) -> bool {
        self.behaviour.disconnect()
    }

    fn is_connected(&self) -> bool {
        self.behaviour.connected
    }

    fn read(&mut self) -> Option<Wrench> {
        let t = self.behaviour.next()?;
        let mut w = [0.0; 6];
        for (out, axis) in w.iter_mut().zip(self.axes.iter()) {
            *out = axis.value_at(t) + self.noise.sample();
        }
        Some(w)
    }
}

/// Build a full simulated rig from the configuration
///
/// The camera uses the configured resolution, the pose sensor drifts slowly
/// while the gripper opens and closes, and the force sensor runs at the
/// collector rate.
pub fn simulated_rig(config: &AppConfig) -> DeviceSet {
    let fps = config.collector.max_fps;
    let camera = SimCamera::new(config.devices.camera.width, config.devices.camera.height)
        .with_sample_rate(fps);
    let pose = SimPoseSensor::new(PoseTrajectory::linear_drift(
        [0.0, 0.0, 0.3, 0.0, 0.0, 0.0, 0.0],
        [0.02, 0.01, 0.0, 0.0, 0.0, 0.05],
    ))
    .with_gripper(SignalPattern::Sine {
        frequency: 0.2,
        amplitude: 0.5,
        offset: 0.5,
    })
    .with_sample_rate(fps);
    let force = SimForceSensor::default().with_noise(0.05).with_sample_rate(fps);

    DeviceSet::new()
        .with_camera(Box::new(camera))
        .with_pose(Box::new(pose))
        .with_force(Box::new(force))
}
