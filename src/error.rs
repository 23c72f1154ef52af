//! Error handling for teleop-rec
//!
//! This module defines the crate error type and a Result alias used by the
//! storage, replay and analysis layers. The collection loop itself never
//! surfaces these to its caller while running: device failures are reported
//! as empty reads and lifecycle misuse as logged no-ops.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for teleop-rec operations
#[derive(Error, Debug)]
pub enum RecorderError {
    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Destination already exists and overwrite was not requested
    #[error("File already exists: {}", .0.display())]
    FileExists(PathBuf),

    /// Source file is missing
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// Container could be opened but its contents are corrupt
    #[error("Malformed episode container: {0}")]
    Malformed(String),

    /// Container magic or version is not recognised
    #[error("Unsupported episode container: {0}")]
    Unsupported(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Compression codec errors
    #[error("Codec error: {0}")]
    Codec(String),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Array or sample shape does not match what the episode expects
    #[error("Shape error: {0}")]
    Shape(String),

    /// Replay lookup outside the loaded episode
    #[error("Frame {index} out of range (episode has {total} frames)")]
    FrameOutOfRange { index: usize, total: usize },

    /// Per-modality data does not line up
    #[error("Inconsistent episode data: {reason}")]
    Inconsistent { reason: String },

    /// Append attempted on an episode that has already been finalized
    #[error("Episode is finalized and can no longer be modified")]
    EpisodeFinalized,

    /// Operation needs an episode but none has been started
    #[error("No episode available")]
    NoEpisode,

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<RecorderError>,
    },
}

impl RecorderError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        RecorderError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Create an inconsistency error
    pub fn inconsistent(reason: impl Into<String>) -> Self {
        RecorderError::Inconsistent {
            reason: reason.into(),
        }
    }

    /// Strip any context wrappers and return the underlying error
    pub fn root(&self) -> &RecorderError {
        match self {
            RecorderError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<serde_json::Error> for RecorderError {
    fn from(err: serde_json::Error) -> Self {
        RecorderError::Serialization(err.to_string())
    }
}

impl From<ndarray::ShapeError> for RecorderError {
    fn from(err: ndarray::ShapeError) -> Self {
        RecorderError::Shape(err.to_string())
    }
}

/// Result type alias for teleop-rec operations
pub type Result<T> = std::result::Result<T, RecorderError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| RecorderError::Io(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| RecorderError::Io(e).with_context(f()))
    }
}
