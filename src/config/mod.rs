//! Configuration module for teleop-rec
//!
//! This module handles the recorder configuration:
//! - Device parameters (camera, pose tracker, force/torque sensor)
//! - Storage settings (output directory, compression, auto-save)
//! - Collection loop settings (rate, warm-up, frame alignment)
//!
//! Configuration files may be TOML (`.toml`) or JSON (`.json`). Every
//! section is `#[serde(default)]`, so a partial file only overrides the
//! fields it names.
//!
//! # Example
//!
//! ```ignore
//! use teleop_rec::config::AppConfig;
//!
//! let config = AppConfig::load_or_default("recorder.toml");
//! println!("Saving to {}", config.storage.resolved_save_dir().display());
//! ```

use crate::error::{RecorderError, Result};
use crate::storage::CompressionKind;
use crate::transforms::FrameAlignment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application identifier for data directories
pub const APP_ID: &str = "teleop-rec";

/// Default collection rate in Hz
pub const DEFAULT_MAX_FPS: f64 = 20.0;

/// Accepted collection rates in Hz
pub const MIN_MAX_FPS: f64 = 0.1;
pub const MAX_MAX_FPS: f64 = 1000.0;

/// Default warm-up duration in seconds
pub const DEFAULT_WARMUP_SECS: f64 = 2.0;

/// Longest accepted warm-up in seconds
pub const MAX_WARMUP_SECS: f64 = 3600.0;

/// Default bound on waiting for the worker thread at stop
pub const DEFAULT_JOIN_TIMEOUT_MS: u64 = 2000;

/// Default gzip level for saved episodes
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 4;

// ==================== Device Configuration ====================

/// Camera settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// OS capture device index
    pub device_id: u32,
    /// Frame width in pixels
    pub width: usize,
    /// Frame height in pixels
    pub height: usize,
    /// Nominal capture rate
    pub fps: f64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_id: 3,
            width: 480,
            height: 480,
            fps: 20.0,
        }
    }
}

/// Pose tracker settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseConfig {
    /// Tracker name as known to the tracking runtime
    pub device_name: String,
    /// Optional tracking runtime configuration file
    pub config_file: Option<PathBuf>,
    /// Optional serial port for the gripper encoder
    pub gripper_port: Option<String>,
}

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            device_name: "tracker_1".to_string(),
            config_file: None,
            gripper_port: None,
        }
    }
}

/// Force/torque sensor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForceConfig {
    /// Sensor IP address
    pub ip_addr: String,
    /// Sensor TCP port
    pub port: u16,
    /// Sampling rate in Hz
    pub sample_rate: u32,
}

impl Default for ForceConfig {
    fn default() -> Self {
        Self {
            ip_addr: "192.168.0.108".to_string(),
            port: 4008,
            sample_rate: 100,
        }
    }
}

/// All device settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevicesConfig {
    pub camera: CameraConfig,
    pub pose: PoseConfig,
    pub force: ForceConfig,
}

// ==================== Storage Configuration ====================

/// Where and how episodes are written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Output directory for episodes
    pub save_dir: PathBuf,
    /// Payload compression
    pub compression: CompressionKind,
    /// Compression level (0-9)
    pub compression_level: u32,
    /// Save automatically when an episode stops
    pub auto_save: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            save_dir: PathBuf::from("./data"),
            compression: CompressionKind::Gzip,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            auto_save: true,
        }
    }
}

impl StorageConfig {
    /// Resolve the save directory
    ///
    /// Relative paths resolve against the working directory. An empty path
    /// falls back to the platform data directory.
    pub fn resolved_save_dir(&self) -> PathBuf {
        if self.save_dir.as_os_str().is_empty() {
            return app_data_dir()
                .map(|d| d.join("episodes"))
                .unwrap_or_else(|| PathBuf::from("./data"));
        }
        self.save_dir.clone()
    }
}

// ==================== Collector Configuration ====================

/// Collection loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Target loop rate in Hz
    pub max_fps: f64,
    /// Seconds after start during which frames are not recorded
    pub warmup_secs: f64,
    /// Rotation applied to derived actions
    pub frame_alignment: FrameAlignment,
    /// Bound on waiting for the worker thread at stop
    pub join_timeout_ms: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            max_fps: DEFAULT_MAX_FPS,
            warmup_secs: DEFAULT_WARMUP_SECS,
            frame_alignment: FrameAlignment::None,
            join_timeout_ms: DEFAULT_JOIN_TIMEOUT_MS,
        }
    }
}

impl CollectorConfig {
    /// Target period of one poll cycle
    ///
    /// Rates outside the accepted range are clamped; a non-finite or
    /// non-positive rate means no rate limit.
    pub fn frame_interval(&self) -> Duration {
        if self.max_fps <= 0.0 || !self.max_fps.is_finite() {
            return Duration::ZERO;
        }
        let fps = self.max_fps.clamp(MIN_MAX_FPS, MAX_MAX_FPS);
        Duration::try_from_secs_f64(1.0 / fps).unwrap_or(Duration::ZERO)
    }

    /// Warm-up as a duration, clamped to `0..=MAX_WARMUP_SECS`
    pub fn warmup(&self) -> Duration {
        let secs = if self.warmup_secs.is_nan() {
            0.0
        } else {
            self.warmup_secs.clamp(0.0, MAX_WARMUP_SECS)
        };
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
    }

    /// Join timeout as a duration
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

// ==================== App Configuration ====================

/// Top-level recorder configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub devices: DevicesConfig,
    pub storage: StorageConfig,
    pub collector: CollectorConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigFormat {
    Toml,
    Json,
}

fn format_for(path: &Path) -> Result<ConfigFormat> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => Ok(ConfigFormat::Toml),
        Some("json") => Ok(ConfigFormat::Json),
        other => Err(RecorderError::Config(format!(
            "Unsupported config format {:?} for {:?}",
            other.unwrap_or(""),
            path
        ))),
    }
}

impl AppConfig {
    /// Load a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let format = format_for(path)?;

        if !path.exists() {
            return Err(RecorderError::FileNotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            RecorderError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config: Self = match format {
            ConfigFormat::Toml => toml::from_str(&content).map_err(|e| {
                RecorderError::Config(format!("Failed to parse config file {:?}: {}", path, e))
            })?,
            ConfigFormat::Json => serde_json::from_str(&content).map_err(|e| {
                RecorderError::Config(format!("Failed to parse config file {:?}: {}", path, e))
            })?,
        };

        config.validate()?;
        tracing::info!("Configuration loaded from {:?}", path);
        Ok(config)
    }

    /// Load a configuration file, returning defaults on any error
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(path.as_ref()).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save the configuration, choosing the format from the extension
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let format = format_for(path)?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    RecorderError::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = match format {
            ConfigFormat::Toml => toml::to_string_pretty(self)
                .map_err(|e| RecorderError::Config(format!("Failed to serialize config: {}", e)))?,
            ConfigFormat::Json => serde_json::to_string_pretty(self)
                .map_err(|e| RecorderError::Config(format!("Failed to serialize config: {}", e)))?,
        };

        std::fs::write(path, content).map_err(|e| {
            RecorderError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }

    /// Reject values the collector cannot run with
    pub fn validate(&self) -> Result<()> {
        let fps = self.collector.max_fps;
        if !(MIN_MAX_FPS..=MAX_MAX_FPS).contains(&fps) {
            return Err(RecorderError::Config(format!(
                "collector.max_fps must be {}-{}, got {}",
                MIN_MAX_FPS, MAX_MAX_FPS, fps
            )));
        }
        let warmup = self.collector.warmup_secs;
        if !(0.0..=MAX_WARMUP_SECS).contains(&warmup) {
            return Err(RecorderError::Config(format!(
                "collector.warmup_secs must be 0-{}, got {}",
                MAX_WARMUP_SECS, warmup
            )));
        }
        if self.storage.compression_level > 9 {
            return Err(RecorderError::Config(format!(
                "storage.compression_level must be 0-9, got {}",
                self.storage.compression_level
            )));
        }
        Ok(())
    }
}

// ==================== App Data Directory ====================

/// Platform data directory for this application
pub fn app_data_dir() -> Option<PathBuf> {
    dirs_next::data_dir().map(|p| p.join(APP_ID))
}

/// Format a file size for display
pub fn format_file_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

// ==================== Tests ====================
