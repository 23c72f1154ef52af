//! # teleop-rec: Teleoperation Episode Recorder
//!
//! Records synchronized camera, pose and force/torque streams from a
//! hand-held teleoperation rig into self-contained episode files, and
//! replays them with their original timing.
//!
//! ## Architecture
//!
//! - **Devices**: one [`devices::Device`] per modality, polled by the collector
//! - **Collector**: a worker thread running fixed-rate poll cycles with a
//!   warm-up phase, action derivation and a latest-only live feed
//! - **Episode**: in-memory frame accumulator with per-sensor timestamps
//! - **Storage**: compressed single-file containers, sessions and browsing
//! - **Replay**: timestamp-paced playback driven by a host loop
//! - **Analysis / Dataset**: timing diagnostics and export consistency checks
//!
//! ## Example
//!
//! ```ignore
//! use teleop_rec::{
//!     collector::DataCollector,
//!     config::AppConfig,
//!     devices::sim::simulated_rig,
//!     episode::Metadata,
//! };
//!
//! let config = AppConfig::load_or_default("recorder.toml");
//! let mut collector = DataCollector::new(simulated_rig(&config), &config);
//! collector.connect_devices();
//! collector.start_episode(Metadata::new());
//! std::thread::sleep(std::time::Duration::from_secs(5));
//! let saved = collector.stop_episode(None);
//! ```

pub mod analysis;
pub mod collector;
pub mod config;
pub mod dataset;
pub mod devices;
pub mod episode;
pub mod error;
pub mod replay;
pub mod storage;
pub mod transforms;
pub mod types;

// Re-export commonly used types
pub use collector::{CollectorState, DataCollector, EpisodeStats};
pub use config::AppConfig;
pub use episode::{Episode, Metadata, MetadataValue};
pub use error::{RecorderError, Result};
pub use replay::{ReplayEngine, ReplayFrame};
pub use storage::{FrameStore, PersistedEpisode};
pub use types::{Action, Frame, ImageFrame, LiveFrame, Modality, PoseState, Wrench};
