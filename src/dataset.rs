//! Episode discovery and export consistency checks
//!
//! Training pipelines need every modality present on every frame. Episodes
//! recorded with a missing or intermittent sensor are detected here and
//! skipped instead of being converted with misaligned rows.

use crate::error::{RecorderError, Result};
use crate::storage::{FrameStore, PersistedEpisode};
use crate::types::Modality;
use std::path::{Path, PathBuf};

/// Episodes found in one directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeGroup {
    /// Session directory name, or the root's own name for the flat layout
    pub name: String,
    pub episodes: Vec<PathBuf>,
}

/// Locate episodes under `root`
///
/// Session directories are preferred; a root without sessions is scanned
/// as a flat directory of episode files. Groups without episodes are
/// omitted.
pub fn find_episodes(root: impl AsRef<Path>) -> Result<Vec<EpisodeGroup>> {
    let root = root.as_ref();
    let group_name = |dir: &Path| {
        dir.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| dir.display().to_string())
    };

    let sessions = FrameStore::list_sessions(root)?;
    let mut groups = Vec::new();
    if sessions.is_empty() {
        let episodes = FrameStore::list_episodes(root)?;
        if !episodes.is_empty() {
            groups.push(EpisodeGroup {
                name: group_name(root),
                episodes,
            });
        }
    } else {
        for session in sessions {
            let episodes = FrameStore::list_episodes(&session)?;
            if !episodes.is_empty() {
                groups.push(EpisodeGroup {
                    name: group_name(&session),
                    episodes,
                });
            }
        }
    }

    tracing::debug!(
        "Found {} episode groups under {:?}",
        groups.len(),
        root
    );
    Ok(groups)
}

/// Common frame count when image, state, action and force all line up
pub fn validate_for_export(episode: &PersistedEpisode) -> Result<usize> {
    let counts = [
        ("image", episode.modality_len(Modality::Camera)),
        ("state", episode.modality_len(Modality::Pose)),
        ("action", episode.action.nrows()),
        ("force", episode.modality_len(Modality::Force)),
    ];
    let t = counts[0].1;
    if t == 0 {
        return Err(RecorderError::inconsistent("episode has no image frames"));
    }
    if let Some((name, n)) = counts.iter().find(|(_, n)| *n != t) {
        return Err(RecorderError::inconsistent(format!(
            "{} has {} rows, expected {}",
            name, n, t
        )));
    }
    Ok(t)
}

/// An episode that can be exported
#[derive(Debug, Clone)]
pub struct AcceptedEpisode {
    pub path: PathBuf,
    pub frames: usize,
}

/// An episode left out of the export
#[derive(Debug, Clone)]
pub struct SkippedEpisode {
    pub path: PathBuf,
    pub reason: String,
}

/// Outcome of [`scan_for_export`]
#[derive(Debug, Clone, Default)]
pub struct ExportScan {
    pub accepted: Vec<AcceptedEpisode>,
    pub skipped: Vec<SkippedEpisode>,
}

impl ExportScan {
    pub fn total_frames(&self) -> usize {
        self.accepted.iter().map(|a| a.frames).sum()
    }
}

/// Load every episode under `root` and sort it into accepted or skipped
///
/// Unreadable files are skipped with the load error as the reason.
pub fn scan_for_export(root: impl AsRef<Path>, store: &FrameStore) -> Result<ExportScan> {
    let mut scan = ExportScan::default();
    for group in find_episodes(root)? {
        for path in group.episodes {
            let outcome = store.load(&path).and_then(|ep| validate_for_export(&ep));
            match outcome {
                Ok(frames) => scan.accepted.push(AcceptedEpisode { path, frames }),
                Err(e) => {
                    tracing::warn!("Skipping {:?}: {}", path, e);
                    scan.skipped.push(SkippedEpisode {
                        path,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }
    Ok(scan)
}
