//! Integration tests for export scanning over a session layout

mod common;

use common::builders::EpisodeBuilder;
use tempfile::TempDir;
use teleop_rec::dataset::{find_episodes, scan_for_export};
use teleop_rec::storage::FrameStore;

#[test]
fn test_scan_sessions_for_export() {
    let root = TempDir::new().unwrap();
    let store = FrameStore::new();

    let s1 = root.path().join("session_20250101_090000");
    let s2 = root.path().join("session_20250101_100000");
    let complete = EpisodeBuilder::new(5).with_camera(4, 4);
    let no_camera = EpisodeBuilder::new(5);
    let flaky_force = EpisodeBuilder::new(5).with_camera(4, 4).force_every(2);

    store
        .save(s1.join("episode_0.epz"), &complete.build().to_persistable().unwrap(), false)
        .unwrap();
    store
        .save(s1.join("episode_1.epz"), &no_camera.build().to_persistable().unwrap(), false)
        .unwrap();
    store
        .save(s2.join("episode_0.epz"), &flaky_force.build().to_persistable().unwrap(), false)
        .unwrap();

    let groups = find_episodes(root.path()).unwrap();
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].episodes.len(), 2);
    assert_eq!(groups[1].name, "session_20250101_100000");

    let scan = scan_for_export(root.path(), &store).unwrap();
    assert_eq!(scan.accepted.len(), 1);
    assert_eq!(scan.accepted[0].frames, 5);
    assert!(scan.accepted[0].path.starts_with(&s1));
    assert_eq!(scan.skipped.len(), 2);
    assert!(scan
        .skipped
        .iter()
        .any(|s| s.reason.contains("no image frames")));
    assert!(scan.skipped.iter().any(|s| s.reason.contains("force")));
}

#[test]
fn test_empty_root() {
    let root = TempDir::new().unwrap();
    assert!(find_episodes(root.path()).unwrap().is_empty());
    let scan = scan_for_export(root.path(), &FrameStore::new()).unwrap();
    assert!(scan.accepted.is_empty());
    assert!(scan.skipped.is_empty());
}
