//! Device trait for the three sensing modalities
//!
//! This module provides a common trait for camera, pose tracker and
//! force/torque sensor readers, so that real hardware drivers and the
//! simulated devices in [`sim`] are interchangeable.
//!
//! A read returning `None` is a normal outcome (no new sample, transient
//! failure). Nothing here returns an error to the collection loop.

pub mod sim;

use crate::types::{unix_timestamp, ConnectionStatus, ImageFrame, Modality, PoseState, Stamped, Wrench};
use std::collections::{BTreeMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};

/// Number of recent read latencies kept for jitter
const LATENCY_WINDOW: usize = 100;

/// Capability set shared by every device reader
#[cfg_attr(test, mockall::automock)]
pub trait Device<T: Send + 'static>: Send {
    /// Open the device. Returns whether it is now usable.
    fn connect(&mut self) -> bool;

    /// Close the device. Returns whether it closed cleanly.
    fn disconnect(&mut self) -> bool;

    /// Whether the device is currently usable
    fn is_connected(&self) -> bool;

    /// Read one sample, or `None` if nothing is available
    fn read(&mut self) -> Option<T>;
}

/// A camera producing H×W×3 images
pub type Camera = Box<dyn Device<ImageFrame>>;

/// A tracker producing 7-element pose states
pub type PoseSensor = Box<dyn Device<PoseState>>;

/// A sensor producing 6-axis force/torque samples
pub type ForceSensor = Box<dyn Device<Wrench>>;

/// Per-modality read health for the running episode
///
/// Every read issued by the collection loop lands in exactly one of three
/// buckets: it returned a sample, it returned nothing, or the driver
/// panicked. Latency is measured from the read call to its return, which is
/// also when the sample is stamped.
#[derive(Debug, Clone, Default)]
pub struct DeviceStats {
    /// Reads that returned a sample
    pub samples: u64,
    /// Reads that returned nothing
    pub empty_reads: u64,
    /// Reads that panicked inside the driver
    pub panics: u64,
    /// Unix time of the most recent sample
    pub last_sample_at: Option<f64>,
    /// Latency of the most recent read
    pub last_latency: Duration,
    /// Slowest read so far
    pub max_latency: Duration,
    total_latency: Duration,
    recent_latencies: VecDeque<Duration>,
}

impl DeviceStats {
    /// Reads issued, whatever their outcome
    pub fn reads(&self) -> u64 {
        self.samples + self.empty_reads + self.panics
    }

    /// Reads that did not produce a sample
    pub fn failed_reads(&self) -> u64 {
        self.empty_reads + self.panics
    }

    /// Share of reads that produced a sample, in percent
    pub fn success_rate(&self) -> f64 {
        match self.reads() {
            0 => 100.0,
            n => self.samples as f64 / n as f64 * 100.0,
        }
    }

    /// Mean latency over every read
    pub fn mean_latency(&self) -> Duration {
        match u32::try_from(self.reads()) {
            Ok(0) => Duration::ZERO,
            Ok(n) => self.total_latency / n,
            Err(_) => Duration::from_secs_f64(
                self.total_latency.as_secs_f64() / self.reads() as f64,
            ),
        }
    }

    /// Spread (slowest minus fastest) of the recent read latencies
    pub fn latency_jitter(&self) -> Duration {
        let min = self.recent_latencies.iter().min();
        let max = self.recent_latencies.iter().max();
        match (min, max) {
            (Some(min), Some(max)) => max.saturating_sub(*min),
            _ => Duration::ZERO,
        }
    }

    /// Recent read latencies, oldest first
    pub fn recent_latencies(&self) -> impl Iterator<Item = Duration> + '_ {
        self.recent_latencies.iter().copied()
    }

    /// Record a read that returned a sample stamped at `timestamp`
    pub fn record_sample(&mut self, latency: Duration, timestamp: f64) {
        self.samples += 1;
        self.last_sample_at = Some(timestamp);
        self.record_latency(latency);
    }

    /// Record a read that returned nothing
    pub fn record_empty(&mut self, latency: Duration) {
        self.empty_reads += 1;
        self.record_latency(latency);
    }

    /// Record a read that panicked
    pub fn record_panic(&mut self, latency: Duration) {
        self.panics += 1;
        self.record_latency(latency);
    }

    fn record_latency(&mut self, latency: Duration) {
        self.last_latency = latency;
        self.max_latency = self.max_latency.max(latency);
        self.total_latency += latency;
        self.recent_latencies.push_back(latency);
        if self.recent_latencies.len() > LATENCY_WINDOW {
            self.recent_latencies.pop_front();
        }
    }

    /// Reset all statistics
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Read one sample, stamping it when the read returns
///
/// A panicking driver is contained here: the read counts as failed and the
/// modality is simply absent for this cycle.
fn read_stamped<T: Send + 'static>(
    modality: Modality,
    device: &mut Option<Box<dyn Device<T>>>,
    stats: &mut DeviceStats,
) -> Option<Stamped<T>> {
    let device = device.as_mut()?;
    if !device.is_connected() {
        return None;
    }

    let started = Instant::now();
    let value = catch_unwind(AssertUnwindSafe(|| device.read()));
    let timestamp = unix_timestamp();
    let latency = started.elapsed();

    match value {
        Ok(Some(v)) => {
            stats.record_sample(latency, timestamp);
            Some(Stamped::new(v, timestamp))
        }
        Ok(None) => {
            stats.record_empty(latency);
            None
        }
        Err(_) => {
            stats.record_panic(latency);
            tracing::error!(
                "{} read panicked ({} so far); skipping it this cycle",
                modality,
                stats.panics
            );
            None
        }
    }
}

fn connect_one<T: Send + 'static>(
    modality: Modality,
    device: &mut Option<Box<dyn Device<T>>>,
) -> Option<ConnectionStatus> {
    let device = device.as_mut()?;
    let status = ConnectionStatus::from_connect(device.connect());
    match status {
        ConnectionStatus::Connected => tracing::info!("{} connected", modality),
        _ => tracing::warn!("{} failed to connect", modality),
    }
    Some(status)
}

fn disconnect_one<T: Send + 'static>(modality: Modality, device: &mut Option<Box<dyn Device<T>>>) -> Option<bool> {
    let device = device.as_mut()?;
    let ok = device.disconnect();
    if ok {
        tracing::info!("{} disconnected", modality);
    } else {
        tracing::warn!("{} did not disconnect cleanly", modality);
    }
    Some(ok)
}

/// The devices attached to one collector
///
/// Every slot is optional; an absent device simply never contributes its
/// modality.
#[derive(Default)]
pub struct DeviceSet {
    camera: Option<Camera>,
    pose: Option<PoseSensor>,
    force: Option<ForceSensor>,
    stats: BTreeMap<Modality, DeviceStats>,
}

impl std::fmt::Debug for DeviceSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSet")
            .field("camera", &self.camera.is_some())
            .field("pose", &self.pose.is_some())
            .field("force", &self.force.is_some())
            .finish()
    }
}

impl DeviceSet {
    /// Create an empty device set
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a camera
    pub fn with_camera(mut self, camera: Camera) -> Self {
        self.camera = Some(camera);
        self
    }

    /// Attach a pose tracker
    pub fn with_pose(mut self, pose: PoseSensor) -> Self {
        self.pose = Some(pose);
        self
    }

    /// Attach a force/torque sensor
    pub fn with_force(mut self, force: ForceSensor) -> Self {
        self.force = Some(force);
        self
    }

    /// Whether a device is attached for the modality
    pub fn has(&self, modality: Modality) -> bool {
        match modality {
            Modality::Camera => self.camera.is_some(),
            Modality::Pose => self.pose.is_some(),
            Modality::Force => self.force.is_some(),
        }
    }

    /// Whether the modality's device is attached and connected
    pub fn is_connected(&self, modality: Modality) -> bool {
        match modality {
            Modality::Camera => self.camera.as_ref().is_some_and(|d| d.is_connected()),
            Modality::Pose => self.pose.as_ref().is_some_and(|d| d.is_connected()),
            Modality::Force => self.force.as_ref().is_some_and(|d| d.is_connected()),
        }
    }

    /// Connect every attached device
    pub fn connect_all(&mut self) -> BTreeMap<Modality, ConnectionStatus> {
        let mut result = BTreeMap::new();
        if let Some(s) = connect_one(Modality::Camera, &mut self.camera) {
            result.insert(Modality::Camera, s);
        }
        if let Some(s) = connect_one(Modality::Pose, &mut self.pose) {
            result.insert(Modality::Pose, s);
        }
        if let Some(s) = connect_one(Modality::Force, &mut self.force) {
            result.insert(Modality::Force, s);
        }
        result
    }

    /// Disconnect every attached device
    pub fn disconnect_all(&mut self) -> BTreeMap<Modality, bool> {
        let mut result = BTreeMap::new();
        if let Some(ok) = disconnect_one(Modality::Camera, &mut self.camera) {
            result.insert(Modality::Camera, ok);
        }
        if let Some(ok) = disconnect_one(Modality::Pose, &mut self.pose) {
            result.insert(Modality::Pose, ok);
        }
        if let Some(ok) = disconnect_one(Modality::Force, &mut self.force) {
            result.insert(Modality::Force, ok);
        }
        result
    }

    /// Read the camera, stamping the sample when the read returns
    pub fn read_camera(&mut self) -> Option<Stamped<ImageFrame>> {
        read_stamped(
            Modality::Camera,
            &mut self.camera,
            self.stats.entry(Modality::Camera).or_default(),
        )
    }

    /// Read the pose tracker, stamping the sample when the read returns
    pub fn read_pose(&mut self) -> Option<Stamped<PoseState>> {
        read_stamped(
            Modality::Pose,
            &mut self.pose,
            self.stats.entry(Modality::Pose).or_default(),
        )
    }

    /// Read the force sensor, stamping the sample when the read returns
    pub fn read_force(&mut self) -> Option<Stamped<Wrench>> {
        read_stamped(
            Modality::Force,
            &mut self.force,
            self.stats.entry(Modality::Force).or_default(),
        )
    }

    /// Read statistics for one modality
    pub fn stats(&self, modality: Modality) -> Option<&DeviceStats> {
        self.stats.get(&modality)
    }

    /// Copy of all read statistics
    pub fn stats_snapshot(&self) -> BTreeMap<Modality, DeviceStats> {
        self.stats.clone()
    }

    /// Clear read statistics
    pub fn reset_stats(&mut self) {
        self.stats.values_mut().for_each(DeviceStats::reset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_stats_default() {
        let stats = DeviceStats::default();
        assert_eq!(stats.reads(), 0);
        assert_eq!(stats.mean_latency(), Duration::ZERO);
        assert_eq!(stats.success_rate(), 100.0);
        assert_eq!(stats.latency_jitter(), Duration::ZERO);
        assert!(stats.last_sample_at.is_none());
    }

    #[test]
    fn test_device_stats_record() {
        let mut stats = DeviceStats::default();
        stats.record_sample(Duration::from_micros(100), 10.0);
        stats.record_sample(Duration::from_micros(300), 10.05);
        stats.record_empty(Duration::from_micros(200));
        stats.record_panic(Duration::from_micros(400));

        assert_eq!(stats.samples, 2);
        assert_eq!(stats.failed_reads(), 2);
        assert_eq!(stats.reads(), 4);
        assert_eq!(stats.mean_latency(), Duration::from_micros(250));
        assert_eq!(stats.max_latency, Duration::from_micros(400));
        assert_eq!(stats.last_latency, Duration::from_micros(400));
        assert_eq!(stats.latency_jitter(), Duration::from_micros(300));
        assert_eq!(stats.last_sample_at, Some(10.05));
        assert_eq!(stats.success_rate(), 50.0);

        stats.reset();
        assert_eq!(stats.reads(), 0);
    }

    #[test]
    fn test_latency_window_is_bounded() {
        let mut stats = DeviceStats::default();
        for i in 0..(LATENCY_WINDOW as u64 + 50) {
            stats.record_empty(Duration::from_micros(i));
        }
        assert_eq!(stats.recent_latencies().count(), LATENCY_WINDOW);
        assert_eq!(
            stats.latency_jitter(),
            Duration::from_micros(LATENCY_WINDOW as u64 - 1)
        );
        assert_eq!(stats.empty_reads, LATENCY_WINDOW as u64 + 50);
    }

    /// Pose tracker whose driver panics on one read
    struct FaultyTracker {
        reads: u32,
        fault_on: u32,
    }

    impl Device<PoseState> for FaultyTracker {
        fn connect(&mut self) -> bool {
            true
        }

        fn disconnect(&mut self) -> bool {
            true
        }

        fn is_connected(&self) -> bool {
            true
        }

        fn read(&mut self) -> Option<PoseState> {
            self.reads += 1;
            if self.reads == self.fault_on {
                panic!("tracker driver fault");
            }
            Some([0.0; 7])
        }
    }

    #[test]
    fn test_panicking_read_is_contained() {
        let tracker = FaultyTracker { reads: 0, fault_on: 2 };
        let mut set = DeviceSet::new().with_pose(Box::new(tracker));
        assert!(set.read_pose().is_some());
        assert!(set.read_pose().is_none());
        assert!(set.read_pose().is_some());

        let stats = set.stats(Modality::Pose).unwrap();
        assert_eq!(stats.samples, 2);
        assert_eq!(stats.panics, 1);
        assert_eq!(stats.empty_reads, 0);
        assert!((stats.success_rate() - 66.666).abs() < 0.01);
    }

    #[test]
    fn test_read_skips_disconnected_device() {
        let mut force = MockDevice::<Wrench>::new();
        force.expect_is_connected().return_const(false);
        force.expect_read().never();

        let mut set = DeviceSet::new().with_force(Box::new(force));
        assert!(set.read_force().is_none());
        assert!(set.stats(Modality::Force).is_some_and(|s| s.reads() == 0));
    }

    #[test]
    fn test_read_stamps_after_return() {
        let mut pose = MockDevice::<PoseState>::new();
        pose.expect_is_connected().return_const(true);
        pose.expect_read().times(1).returning(|| {
            std::thread::sleep(std::time::Duration::from_millis(5));
            Some([0.0; 7])
        });

        let mut set = DeviceSet::new().with_pose(Box::new(pose));
        let before = unix_timestamp();
        let sample = set.read_pose().unwrap();
        assert!(sample.timestamp - before >= 0.004);
        let stats = set.stats(Modality::Pose).unwrap();
        assert!(stats.last_latency >= Duration::from_millis(4));
        assert_eq!(stats.last_sample_at, Some(sample.timestamp));
    }

    #[test]
    fn test_empty_read_counts_as_failure() {
        let mut cam = MockDevice::<ImageFrame>::new();
        cam.expect_is_connected().return_const(true);
        cam.expect_read().returning(|| None);

        let mut set = DeviceSet::new().with_camera(Box::new(cam));
        assert!(set.read_camera().is_none());
        assert_eq!(set.stats(Modality::Camera).unwrap().empty_reads, 1);
    }

    #[test]
    fn test_connect_all_reports_only_attached() {
        let mut pose = MockDevice::<PoseState>::new();
        pose.expect_connect().return_const(true);
        let mut force = MockDevice::<Wrench>::new();
        force.expect_connect().return_const(false);

        let mut set = DeviceSet::new()
            .with_pose(Box::new(pose))
            .with_force(Box::new(force));
        let status = set.connect_all();
        assert_eq!(status.len(), 2);
        assert_eq!(status[&Modality::Pose], ConnectionStatus::Connected);
        assert_eq!(status[&Modality::Force], ConnectionStatus::Error);
        assert!(!set.has(Modality::Camera));
    }
}
