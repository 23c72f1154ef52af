//! Episode persistence
//!
//! [`FrameStore`] writes a [`PersistedEpisode`] to a single container file
//! and reads it back. Arrays are stored under stable names (see
//! [`names`]); per-sensor timestamp arrays are only written when they have
//! samples, and any absent array loads back as empty.
//!
//! Recordings are organised either flat (`<root>/*.epz`) or in session
//! directories (`<root>/session_YYYYMMDD_HHMMSS/*.epz`).

pub mod codec;
pub mod container;

pub use codec::{codec_for, Codec, CompressionKind, GzipCodec, RawCodec};

use crate::config::StorageConfig;
use crate::episode::MetadataValue;
use crate::error::{RecorderError, Result, ResultExt};
use crate::types::{Modality, ACTION_DIM, POSE_DIM, WRENCH_DIM};
use container::{read_container, read_header, write_container, ArrayData, ArrayRef, ContainerHeader};
use ndarray::{Array1, Array2, Array4, Ix1, Ix2, Ix4};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

/// Episode file extension
pub const EPISODE_EXTENSION: &str = "epz";

/// Prefix of session directories
pub const SESSION_PREFIX: &str = "session";

/// Stable array names inside a container
pub mod names {
    pub const IMAGE: &str = "image";
    pub const STATE: &str = "state";
    pub const ACTION: &str = "action";
    pub const FORCE: &str = "force";
    pub const TIMESTAMP: &str = "timestamp";
    pub const TIMESTAMP_CAMERA: &str = "timestamp_camera";
    pub const TIMESTAMP_POSE: &str = "timestamp_pose";
    pub const TIMESTAMP_FORCE: &str = "timestamp_force";
}

/// On-disk form of an episode
///
/// Every array's first dimension is its own frame count; an absent array has
/// first dimension zero. `timestamp` (the loop timestamps) is the canonical
/// episode length.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedEpisode {
    /// `N × H × W × 3`
    pub image: Array4<u8>,
    /// `N × 7`
    pub state: Array2<f64>,
    /// `N × 7`
    pub action: Array2<f64>,
    /// `N × 6`
    pub force: Array2<f64>,
    /// Loop timestamps
    pub timestamp: Array1<f64>,
    pub timestamp_camera: Array1<f64>,
    pub timestamp_pose: Array1<f64>,
    pub timestamp_force: Array1<f64>,
    /// Scalar attributes
    pub metadata: BTreeMap<String, MetadataValue>,
}

impl Default for PersistedEpisode {
    fn default() -> Self {
        Self {
            image: Array4::zeros((0, 0, 0, 3)),
            state: Array2::zeros((0, POSE_DIM)),
            action: Array2::zeros((0, ACTION_DIM)),
            force: Array2::zeros((0, WRENCH_DIM)),
            timestamp: Array1::zeros(0),
            timestamp_camera: Array1::zeros(0),
            timestamp_pose: Array1::zeros(0),
            timestamp_force: Array1::zeros(0),
            metadata: BTreeMap::new(),
        }
    }
}

impl PersistedEpisode {
    /// Number of loop cycles recorded
    pub fn num_frames(&self) -> usize {
        self.timestamp.len()
    }

    /// Number of samples recorded for a modality
    pub fn modality_len(&self, modality: Modality) -> usize {
        match modality {
            Modality::Camera => self.image.shape()[0],
            Modality::Pose => self.state.nrows(),
            Modality::Force => self.force.nrows(),
        }
    }

    /// Per-sensor timestamps for a modality (empty when not recorded)
    pub fn modality_timestamps(&self, modality: Modality) -> &Array1<f64> {
        match modality {
            Modality::Camera => &self.timestamp_camera,
            Modality::Pose => &self.timestamp_pose,
            Modality::Force => &self.timestamp_force,
        }
    }

    /// Numeric metadata value
    pub fn metadata_f64(&self, key: &str) -> Option<f64> {
        self.metadata.get(key).and_then(MetadataValue::as_f64)
    }

    /// Check the per-array length rules
    pub fn validate(&self) -> Result<()> {
        for modality in Modality::ALL {
            let data_len = self.modality_len(modality);
            let ts_len = self.modality_timestamps(modality).len();
            if ts_len > 0 && ts_len != data_len {
                return Err(RecorderError::inconsistent(format!(
                    "{} has {} samples but {} timestamps",
                    modality, data_len, ts_len
                )));
            }
            if !self.timestamp.is_empty() && data_len > self.timestamp.len() {
                return Err(RecorderError::inconsistent(format!(
                    "{} has {} samples but only {} loop cycles",
                    modality,
                    data_len,
                    self.timestamp.len()
                )));
            }
        }
        if self.state.ncols() != POSE_DIM && self.state.nrows() > 0 {
            return Err(RecorderError::Shape(format!(
                "state rows have {} elements, expected {}",
                self.state.ncols(),
                POSE_DIM
            )));
        }
        if self.action.ncols() != ACTION_DIM && self.action.nrows() > 0 {
            return Err(RecorderError::Shape(format!(
                "action rows have {} elements, expected {}",
                self.action.ncols(),
                ACTION_DIM
            )));
        }
        if self.force.ncols() != WRENCH_DIM && self.force.nrows() > 0 {
            return Err(RecorderError::Shape(format!(
                "force rows have {} elements, expected {}",
                self.force.ncols(),
                WRENCH_DIM
            )));
        }
        if self.image.shape()[0] > 0 && self.image.shape()[3] != 3 {
            return Err(RecorderError::Shape(format!(
                "images have {} channels, expected 3",
                self.image.shape()[3]
            )));
        }
        Ok(())
    }

    fn arrays(&self) -> Vec<(&'static str, ArrayRef<'_>)> {
        let mut out = Vec::new();
        if self.image.shape()[0] > 0 {
            out.push((names::IMAGE, ArrayRef::U8(self.image.view().into_dyn())));
        }
        let f64_arrays: [(&'static str, ndarray::ArrayViewD<'_, f64>, usize); 7] = [
            (names::STATE, self.state.view().into_dyn(), self.state.nrows()),
            (names::ACTION, self.action.view().into_dyn(), self.action.nrows()),
            (names::FORCE, self.force.view().into_dyn(), self.force.nrows()),
            (names::TIMESTAMP, self.timestamp.view().into_dyn(), self.timestamp.len()),
            (
                names::TIMESTAMP_CAMERA,
                self.timestamp_camera.view().into_dyn(),
                self.timestamp_camera.len(),
            ),
            (
                names::TIMESTAMP_POSE,
                self.timestamp_pose.view().into_dyn(),
                self.timestamp_pose.len(),
            ),
            (
                names::TIMESTAMP_FORCE,
                self.timestamp_force.view().into_dyn(),
                self.timestamp_force.len(),
            ),
        ];
        for (name, view, len) in f64_arrays {
            if len > 0 {
                out.push((name, ArrayRef::F64(view)));
            }
        }
        out
    }

    fn from_arrays(
        header: ContainerHeader,
        mut arrays: BTreeMap<String, ArrayData>,
    ) -> Result<Self> {
        let mut episode = PersistedEpisode {
            metadata: header.attributes,
            ..Default::default()
        };

        if let Some(data) = arrays.remove(names::IMAGE) {
            episode.image = take_u8(names::IMAGE, data)?
                .into_dimensionality::<Ix4>()
                .map_err(|e| shape_err(names::IMAGE, e))?;
        }
        for (name, slot) in [
            (names::STATE, &mut episode.state),
            (names::ACTION, &mut episode.action),
            (names::FORCE, &mut episode.force),
        ] {
            if let Some(data) = arrays.remove(name) {
                *slot = take_f64(name, data)?
                    .into_dimensionality::<Ix2>()
                    .map_err(|e| shape_err(name, e))?;
            }
        }
        for (name, slot) in [
            (names::TIMESTAMP, &mut episode.timestamp),
            (names::TIMESTAMP_CAMERA, &mut episode.timestamp_camera),
            (names::TIMESTAMP_POSE, &mut episode.timestamp_pose),
            (names::TIMESTAMP_FORCE, &mut episode.timestamp_force),
        ] {
            if let Some(data) = arrays.remove(name) {
                *slot = take_f64(name, data)?
                    .into_dimensionality::<Ix1>()
                    .map_err(|e| shape_err(name, e))?;
            }
        }

        for name in arrays.keys() {
            tracing::debug!("Ignoring unknown array '{}'", name);
        }

        episode
            .validate()
            .map_err(|e| RecorderError::Malformed(e.to_string()))?;
        Ok(episode)
    }
}

fn shape_err(name: &str, e: ndarray::ShapeError) -> RecorderError {
    RecorderError::Malformed(format!("array '{}' has the wrong rank: {}", name, e))
}

fn take_u8(name: &str, data: ArrayData) -> Result<ndarray::ArrayD<u8>> {
    match data {
        ArrayData::U8(a) => Ok(a),
        ArrayData::F64(_) => Err(RecorderError::Malformed(format!(
            "array '{}' should be u8",
            name
        ))),
    }
}

fn take_f64(name: &str, data: ArrayData) -> Result<ndarray::ArrayD<f64>> {
    match data {
        ArrayData::F64(a) => Ok(a),
        ArrayData::U8(_) => Err(RecorderError::Malformed(format!(
            "array '{}' should be f64",
            name
        ))),
    }
}

/// Metadata and shapes of a stored episode, read without loading arrays
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeInfo {
    pub path: PathBuf,
    pub file_size: u64,
    pub shapes: BTreeMap<String, Vec<usize>>,
    pub attributes: BTreeMap<String, MetadataValue>,
}

impl EpisodeInfo {
    /// Number of loop cycles
    pub fn num_frames(&self) -> usize {
        self.shapes
            .get(names::TIMESTAMP)
            .and_then(|s| s.first().copied())
            .or_else(|| {
                self.attributes
                    .get("num_frames")
                    .and_then(MetadataValue::as_f64)
                    .map(|v| v as usize)
            })
            .unwrap_or(0)
    }

    /// Number of samples stored for a modality
    pub fn modality_len(&self, modality: Modality) -> usize {
        self.shapes
            .get(modality.array_name())
            .and_then(|s| s.first().copied())
            .unwrap_or(0)
    }

    /// Whether any samples were stored for a modality
    pub fn has(&self, modality: Modality) -> bool {
        self.modality_len(modality) > 0
    }

    /// Recorded duration in seconds
    pub fn duration(&self) -> f64 {
        self.attributes
            .get("duration")
            .and_then(MetadataValue::as_f64)
            .unwrap_or(0.0)
    }

    /// Effective recording rate
    pub fn fps(&self) -> f64 {
        self.attributes
            .get("fps")
            .and_then(MetadataValue::as_f64)
            .unwrap_or(0.0)
    }
}

/// Reads and writes episode containers
pub struct FrameStore {
    codec: Box<dyn Codec>,
}

impl std::fmt::Debug for FrameStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameStore")
            .field("codec", &self.codec.kind())
            .finish()
    }
}

impl Default for FrameStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameStore {
    /// Store using gzip at the default level
    pub fn new() -> Self {
        Self::with_codec(Box::new(GzipCodec::default()))
    }

    /// Store using a specific codec for writing
    pub fn with_codec(codec: Box<dyn Codec>) -> Self {
        Self { codec }
    }

    /// Store configured from the storage section
    pub fn from_config(config: &StorageConfig) -> Self {
        Self::with_codec(codec_for(config.compression, config.compression_level))
    }

    /// Codec used for writing
    pub fn compression(&self) -> CompressionKind {
        self.codec.kind()
    }

    /// Write an episode to `path`
    ///
    /// Fails with [`RecorderError::FileExists`] when the file exists and
    /// `overwrite` is false; the existing file is not touched, even if it
    /// appears while the episode is being written. The data is written to a
    /// sibling temporary file and then published in one step.
    pub fn save(
        &self,
        path: impl AsRef<Path>,
        episode: &PersistedEpisode,
        overwrite: bool,
    ) -> Result<()> {
        let path = path.as_ref();
        if path.exists() && !overwrite {
            tracing::error!("Refusing to overwrite existing episode {:?}", path);
            return Err(RecorderError::FileExists(path.to_path_buf()));
        }
        episode
            .validate()
            .with_context(|| format!("Episode for {:?} failed validation", path))?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory {:?}", parent))?;
            }
        }

        let tmp = temp_path_for(path);
        let result = self
            .write_to(&tmp, episode)
            .and_then(|()| publish(&tmp, path, overwrite));
        if let Err(e) = result {
            let _ = std::fs::remove_file(&tmp);
            tracing::error!("Failed to save episode to {:?}: {}", path, e);
            return Err(e);
        }

        tracing::info!(
            "Episode saved to {:?} ({} frames, {})",
            path,
            episode.num_frames(),
            self.codec.kind()
        );
        Ok(())
    }

    fn write_to(&self, tmp: &Path, episode: &PersistedEpisode) -> Result<()> {
        let file = File::create(tmp).with_context(|| format!("Failed to create {:?}", tmp))?;
        let mut writer = BufWriter::new(file);
        write_container(
            &mut writer,
            &episode.metadata,
            &episode.arrays(),
            self.codec.as_ref(),
        )?;
        let file = writer
            .into_inner()
            .map_err(|e| RecorderError::Io(e.into_error()))?;
        file.sync_all()?;
        Ok(())
    }

    /// Read an episode from `path`
    pub fn load(&self, path: impl AsRef<Path>) -> Result<PersistedEpisode> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(RecorderError::FileNotFound(path.to_path_buf()));
        }
        let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
        let (header, arrays) = read_container(BufReader::new(file))
            .with_context(|| format!("Failed to read episode {:?}", path))?;
        let episode = PersistedEpisode::from_arrays(header, arrays)
            .with_context(|| format!("Failed to read episode {:?}", path))?;
        tracing::info!("Episode loaded from {:?} ({} frames)", path, episode.num_frames());
        Ok(episode)
    }

    /// Read metadata and shapes without decoding any array
    pub fn info(&self, path: impl AsRef<Path>) -> Result<EpisodeInfo> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(RecorderError::FileNotFound(path.to_path_buf()));
        }
        let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
        let file_size = file.metadata().map(|m| m.len()).unwrap_or(0);
        let header = read_header(&mut BufReader::new(file))
            .with_context(|| format!("Failed to read episode header {:?}", path))?;

        let shapes = header
            .arrays
            .iter()
            .map(|a| (a.name.clone(), a.shape.clone()))
            .collect();
        Ok(EpisodeInfo {
            path: path.to_path_buf(),
            file_size,
            shapes,
            attributes: header.attributes,
        })
    }

    /// Create a `session_YYYYMMDD_HHMMSS` directory under `root`
    pub fn create_session_dir(root: impl AsRef<Path>) -> Result<PathBuf> {
        let dir = root.as_ref().join(format!(
            "{}_{}",
            SESSION_PREFIX,
            chrono::Local::now().format("%Y%m%d_%H%M%S")
        ));
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create session directory {:?}", dir))?;
        tracing::info!("Created session directory {:?}", dir);
        Ok(dir)
    }

    /// Session directories under `root`, sorted
    pub fn list_sessions(root: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Ok(Vec::new());
        }
        let mut sessions = Vec::new();
        for entry in std::fs::read_dir(root).with_context(|| format!("Failed to list {:?}", root))? {
            let path = entry?.path();
            let is_session = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(&format!("{}_", SESSION_PREFIX)));
            if path.is_dir() && is_session {
                sessions.push(path);
            }
        }
        sessions.sort();
        Ok(sessions)
    }

    /// Episode files directly inside `dir`, sorted
    pub fn list_episodes(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut episodes = Vec::new();
        for entry in std::fs::read_dir(dir).with_context(|| format!("Failed to list {:?}", dir))? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|e| e == EPISODE_EXTENSION) {
                episodes.push(path);
            }
        }
        episodes.sort();
        Ok(episodes)
    }
}

/// `<prefix>_YYYYMMDD_HHMMSS.epz` using local time
pub fn generate_filename(prefix: &str) -> String {
    format!(
        "{}_{}.{}",
        prefix,
        chrono::Local::now().format("%Y%m%d_%H%M%S"),
        EPISODE_EXTENSION
    )
}

/// Move a finished temp file to `path`
///
/// Without `overwrite` the file is hard-linked, which fails if `path` already
/// exists, so a file created after the initial check is never replaced.
fn publish(tmp: &Path, path: &Path, overwrite: bool) -> Result<()> {
    if overwrite {
        return std::fs::rename(tmp, path)
            .with_context(|| format!("Failed to move episode into place at {:?}", path));
    }
    match std::fs::hard_link(tmp, path) {
        Ok(()) => {
            let _ = std::fs::remove_file(tmp);
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            tracing::error!("Episode {:?} appeared while saving; keeping it", path);
            Err(RecorderError::FileExists(path.to_path_buf()))
        }
        Err(e) => Err(RecorderError::Io(e)
            .with_context(format!("Failed to link episode into place at {:?}", path))),
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "episode".to_string());
    path.with_file_name(format!(".{}.{}.tmp", name, std::process::id()))
}
