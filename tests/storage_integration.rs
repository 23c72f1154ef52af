//! Integration tests for episode persistence
//!
//! These tests validate the path from an in-memory episode to disk and back:
//! - Absent and intermittent modalities
//! - Overwrite protection
//! - Header-only inspection
//! - Session layout and codec selection

mod common;

use common::builders::{expected_len, EpisodeBuilder};
use tempfile::TempDir;
use teleop_rec::storage::{FrameStore, RawCodec, EPISODE_EXTENSION};
use teleop_rec::types::Modality;
use teleop_rec::RecorderError;

#[test]
fn test_roundtrip_without_camera() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("episode_nocam.epz");
    let store = FrameStore::new();

    let episode = EpisodeBuilder::new(5).build();
    store
        .save(&path, &episode.to_persistable().unwrap(), false)
        .unwrap();

    let loaded = store.load(&path).unwrap();
    assert_eq!(loaded.num_frames(), 5);
    assert_eq!(loaded.modality_len(Modality::Camera), 0);
    assert_eq!(loaded.modality_len(Modality::Pose), 5);
    assert_eq!(loaded.modality_len(Modality::Force), 5);
    assert_eq!(loaded.action.nrows(), 5);
    assert!(loaded.timestamp_camera.is_empty());
    assert_eq!(loaded.timestamp.to_vec(), episode.timestamps());
    assert_eq!(
        loaded.timestamp_pose.to_vec(),
        episode.modality_timestamps(Modality::Pose)
    );

    let info = store.info(&path).unwrap();
    assert!(!info.shapes.contains_key("image"));
    assert!(!info.has(Modality::Camera));
    assert_eq!(info.num_frames(), 5);
}

#[test]
fn test_roundtrip_with_camera_preserves_pixels() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("episode_cam.epz");
    let store = FrameStore::new();

    let episode = EpisodeBuilder::new(3).with_camera(8, 6).build();
    let persisted = episode.to_persistable().unwrap();
    store.save(&path, &persisted, false).unwrap();

    let loaded = store.load(&path).unwrap();
    assert_eq!(loaded.image.shape(), &[3, 6, 8, 3]);
    assert_eq!(loaded.image, persisted.image);
    assert_eq!(loaded.metadata, persisted.metadata);
}

#[test]
fn test_intermittent_force_keeps_own_length() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("episode_sparse.epz");
    let store = FrameStore::new();

    let builder = EpisodeBuilder::new(6).force_every(2);
    let expected_force = expected_len(&builder, Modality::Force);
    let episode = builder.build();
    store
        .save(&path, &episode.to_persistable().unwrap(), false)
        .unwrap();

    let loaded = store.load(&path).unwrap();
    assert_eq!(loaded.num_frames(), 6);
    assert_eq!(loaded.modality_len(Modality::Force), expected_force);
    assert_eq!(loaded.timestamp_force.len(), expected_force);
}

#[test]
fn test_overwrite_protection() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("episode_keep.epz");
    let store = FrameStore::new();

    store
        .save(&path, &EpisodeBuilder::new(4).build().to_persistable().unwrap(), false)
        .unwrap();
    let original = std::fs::read(&path).unwrap();

    let other = EpisodeBuilder::new(9).build().to_persistable().unwrap();
    let err = store.save(&path, &other, false).unwrap_err();
    assert!(matches!(err, RecorderError::FileExists(_)));
    assert_eq!(std::fs::read(&path).unwrap(), original);

    store.save(&path, &other, true).unwrap();
    assert_eq!(store.load(&path).unwrap().num_frames(), 9);
}

#[test]
fn test_load_missing_and_corrupt() {
    let dir = TempDir::new().unwrap();
    let store = FrameStore::new();

    let missing = store.load(dir.path().join("nope.epz")).unwrap_err();
    assert!(matches!(missing, RecorderError::FileNotFound(_)));

    let junk = dir.path().join("junk.epz");
    std::fs::write(&junk, b"definitely not an episode").unwrap();
    let err = store.load(&junk).unwrap_err();
    assert!(matches!(
        err.root(),
        RecorderError::Unsupported(_) | RecorderError::Malformed(_)
    ));
}

#[test]
fn test_load_rejects_impossible_shape() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("episode_huge.epz");
    let header = br#"{"arrays":[{"name":"image","dtype":"u8","shape":[4611686018427387904],"codec":"gzip","offset":0,"length":0}]}"#;
    let mut bytes = b"TREC\x01".to_vec();
    bytes.extend_from_slice(&(header.len() as u32).to_le_bytes());
    bytes.extend_from_slice(header);
    std::fs::write(&path, bytes).unwrap();

    let err = FrameStore::new().load(&path).unwrap_err();
    assert!(matches!(err.root(), RecorderError::Malformed(_)));
}

#[test]
fn test_raw_file_readable_by_gzip_store() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("episode_raw.epz");

    let raw = FrameStore::with_codec(Box::new(RawCodec));
    let persisted = EpisodeBuilder::new(3).with_camera(4, 4).build().to_persistable().unwrap();
    raw.save(&path, &persisted, false).unwrap();

    let loaded = FrameStore::new().load(&path).unwrap();
    assert_eq!(loaded, persisted);
}

#[test]
fn test_session_layout() {
    let dir = TempDir::new().unwrap();
    let store = FrameStore::new();

    let session = FrameStore::create_session_dir(dir.path()).unwrap();
    for name in ["episode_b", "episode_a"] {
        let path = session.join(format!("{}.{}", name, EPISODE_EXTENSION));
        store
            .save(&path, &EpisodeBuilder::new(2).build().to_persistable().unwrap(), false)
            .unwrap();
    }

    let sessions = FrameStore::list_sessions(dir.path()).unwrap();
    assert_eq!(sessions, vec![session.clone()]);

    let episodes = FrameStore::list_episodes(&session).unwrap();
    let names: Vec<_> = episodes
        .iter()
        .map(|p| p.file_stem().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["episode_a", "episode_b"]);
}
