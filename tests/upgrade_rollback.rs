// tests/upgrade_rollback.rs

//! Upgrade capture (bundle + delta + history) and both rollback paths:
//! reinstalling the kept archive, and restoring the bundle after the
//! archive is gone.

mod common;

use common::{sha256_of, TestEnv};
use mortar::db::Action;
use mortar::package::BuiltPackage;
use mortar::{delta, install, rollback, Evr};
use std::fs;

fn build_v1(env: &TestEnv) -> BuiltPackage {
    let staging = env.stage_tree(&[
        ("usr/lib/libz.so.1.3", "old zlib object"),
        ("usr/share/doc/zlib/README", "readme"),
    ]);
    env.packager()
        .package("zlib", &Evr::parse("1.3").unwrap(), staging.path())
        .unwrap()
}

fn build_v2(env: &TestEnv) -> BuiltPackage {
    let staging = env.stage_tree(&[
        ("usr/lib/libz.so.1.3.1", "new zlib object"),
        ("usr/share/doc/zlib/README", "readme"),
    ]);
    env.packager()
        .package("zlib", &Evr::parse("1.3.1").unwrap(), staging.path())
        .unwrap()
}

#[test]
fn upgrade_captures_bundle_delta_and_history() {
    let env = TestEnv::new();
    let v1 = build_v1(&env);
    let v2 = build_v2(&env);

    install::install_pkg(&env.paths, &env.db, &v1.archive_path, &env.target_root).unwrap();
    let old_hash = sha256_of(&env.target_root.join("usr/lib/libz.so.1.3"));

    install::upgrade(&env.paths, &env.db, &v2.archive_path, &env.target_root, false).unwrap();

    // new payload on disk, stale path removed
    assert!(env.target_root.join("usr/lib/libz.so.1.3.1").exists());
    assert!(!env.target_root.join("usr/lib/libz.so.1.3").exists());

    // rollback bundle exists with the preserved manifest
    let old_evr = Evr::parse("1.3").unwrap();
    let new_evr = Evr::parse("1.3.1").unwrap();
    assert!(rollback::find_bundle(&env.paths.rollback_dir(), "zlib", &old_evr).is_some());
    let preserved = rollback::bundle_manifest(&env.paths.rollback_dir(), "zlib", &old_evr).unwrap();
    assert_eq!(
        preserved.get("/usr/lib/libz.so.1.3").unwrap().hash.as_deref(),
        Some(old_hash.as_str())
    );

    // delta file with the expected sections
    let d = delta::read_delta(&env.paths.delta_dir(), "zlib", &old_evr, &new_evr).unwrap();
    assert!(d.added.contains(&"/usr/lib/libz.so.1.3.1".to_string()));
    assert!(d.removed.contains(&"/usr/lib/libz.so.1.3".to_string()));
    assert!(d.unchanged.contains(&"/usr/share/doc/zlib/README".to_string()));

    // history: INSTALL, SAVE, UPGRADE
    let log = fs::read_to_string(env.paths.history_dir().join("zlib.log")).unwrap();
    assert!(log.contains("INSTALL zlib - -> 0:1.3-1"));
    assert!(log.contains("UPGRADE zlib 0:1.3-1 -> 0:1.3.1-1"));

    // record now points at the new EVR
    let record = env.db.read_installed("zlib").unwrap().unwrap();
    assert_eq!(record.evr, new_evr);
}

#[test]
fn downgrade_refused_without_force() {
    let env = TestEnv::new();
    let v1 = build_v1(&env);
    let v2 = build_v2(&env);

    install::install_pkg(&env.paths, &env.db, &v2.archive_path, &env.target_root).unwrap();
    let err = install::upgrade(&env.paths, &env.db, &v1.archive_path, &env.target_root, false)
        .unwrap_err();
    assert!(matches!(err, mortar::Error::DowngradeRefused { .. }));
    assert_eq!(err.exit_code(), 2);

    // forced downgrade goes through
    install::upgrade(&env.paths, &env.db, &v1.archive_path, &env.target_root, true).unwrap();
    let record = env.db.read_installed("zlib").unwrap().unwrap();
    assert_eq!(record.evr, Evr::parse("1.3").unwrap());
}

#[test]
fn upgrade_of_identical_archive_is_noop() {
    let env = TestEnv::new();
    let v1 = build_v1(&env);
    install::install_pkg(&env.paths, &env.db, &v1.archive_path, &env.target_root).unwrap();
    let events_before = env.db.history().read("zlib").unwrap().len();

    install::upgrade(&env.paths, &env.db, &v1.archive_path, &env.target_root, false).unwrap();
    // no SAVE/UPGRADE appended, no bundle captured
    assert_eq!(env.db.history().read("zlib").unwrap().len(), events_before);
    assert!(rollback::find_bundle(
        &env.paths.rollback_dir(),
        "zlib",
        &Evr::parse("1.3").unwrap()
    )
    .is_none());
}

#[test]
fn rollback_prefers_kept_archive() {
    let env = TestEnv::new();
    let v1 = build_v1(&env);
    let v2 = build_v2(&env);

    install::install_pkg(&env.paths, &env.db, &v1.archive_path, &env.target_root).unwrap();
    let old_hash = sha256_of(&env.target_root.join("usr/lib/libz.so.1.3"));
    install::upgrade(&env.paths, &env.db, &v2.archive_path, &env.target_root, false).unwrap();

    rollback::rollback(&env.paths, &env.db, "zlib", None).unwrap();

    let restored = env.target_root.join("usr/lib/libz.so.1.3");
    assert_eq!(sha256_of(&restored), old_hash);
    assert!(!env.target_root.join("usr/lib/libz.so.1.3.1").exists());

    let record = env.db.read_installed("zlib").unwrap().unwrap();
    assert_eq!(record.evr, Evr::parse("1.3").unwrap());
    // archive was present, so the record points at it
    assert_eq!(record.archive_path, v1.archive_path);
}

#[test]
fn rollback_falls_back_to_bundle_when_archive_is_gone() {
    let env = TestEnv::new();
    let v1 = build_v1(&env);
    let v2 = build_v2(&env);

    install::install_pkg(&env.paths, &env.db, &v1.archive_path, &env.target_root).unwrap();
    let old_hash = sha256_of(&env.target_root.join("usr/lib/libz.so.1.3"));
    install::upgrade(&env.paths, &env.db, &v2.archive_path, &env.target_root, false).unwrap();

    // simulate garbage collection of the old archive
    fs::remove_file(&v1.archive_path).unwrap();

    rollback::rollback(&env.paths, &env.db, "zlib", None).unwrap();

    // bundle path restored the exact old file set
    let restored = env.target_root.join("usr/lib/libz.so.1.3");
    assert_eq!(sha256_of(&restored), old_hash);

    // minimal record regenerated from the preserved manifest
    let record = env.db.read_installed("zlib").unwrap().unwrap();
    assert_eq!(record.evr, Evr::parse("1.3").unwrap());
    assert!(record
        .manifest_path
        .display()
        .to_string()
        .ends_with("manifest.old"));

    // verification against the preserved manifest passes
    assert!(install::verify(&env.db, "zlib").unwrap().is_empty());

    // ROLLBACK event appended
    let log = fs::read_to_string(env.paths.history_dir().join("zlib.log")).unwrap();
    assert!(log.contains("ROLLBACK zlib 0:1.3.1-1 -> 0:1.3-1"));
}
