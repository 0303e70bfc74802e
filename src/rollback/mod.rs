// src/rollback/mod.rs

//! Rollback bundles and the rollback operation
//!
//! Before an upgrade replaces `name@old`, the exact file and symlink set
//! listed by the old manifest is tarred out of the target root into
//! `rollback/<name>/<old-evr>/bundle.<ext>`, with the old manifest copied
//! alongside as `manifest.old`. The bundle is content-complete: a rollback
//! works even after the old package archive has been garbage-collected.
//!
//! Rollback itself prefers reinstalling the target EVR's archive; when
//! that archive is gone it restores the bundle directly and regenerates a
//! minimal installed record pointing at the preserved manifest.

use crate::config::Paths;
use crate::db::{Action, Database, InstalledRecord};
use crate::error::{Error, Result};
use crate::fsutil;
use crate::install;
use crate::package::{Compression, Manifest, PackageFilename};
use crate::version::Evr;
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{info, warn};

/// Directory holding one bundle: `rollback/<name>/<evr>/`
pub fn bundle_dir(rollback_root: &Path, name: &str, evr: &Evr) -> PathBuf {
    rollback_root.join(name).join(evr.to_string())
}

/// Bundle archive path within a bundle directory
fn bundle_file(dir: &Path, compression: Compression) -> PathBuf {
    dir.join(format!("bundle.{}", compression.extension()))
}

/// Capture a rollback bundle for `name@evr` from the target root.
///
/// Paths listed by the manifest but already missing on disk are skipped
/// with a warning; the bundle records what was actually there.
pub fn capture_bundle(
    rollback_root: &Path,
    name: &str,
    evr: &Evr,
    target_root: &Path,
    manifest: &Manifest,
    compression: Compression,
) -> Result<PathBuf> {
    crate::host::require("tar")?;
    let dir = bundle_dir(rollback_root, name, evr);
    fs::create_dir_all(&dir)?;

    // Relative path list for tar, one per line
    let mut listing = String::new();
    for path in manifest.payload_paths() {
        let on_disk = Manifest::path_under(target_root, path);
        if on_disk.symlink_metadata().is_err() {
            warn!("bundle {}@{}: {} missing on disk, skipped", name, evr, path);
            continue;
        }
        listing.push_str(path.trim_start_matches('/'));
        listing.push('\n');
    }
    let list_path = dir.join("files.list");
    fs::write(&list_path, &listing)?;

    let bundle_path = bundle_file(&dir, compression);
    let part = dir.join("bundle.part");
    let output = Command::new("tar")
        .arg("--create")
        .arg(compression.tar_flag())
        .arg("--file")
        .arg(&part)
        .arg("-C")
        .arg(target_root)
        .arg("--verbatim-files-from")
        .arg("--files-from")
        .arg(&list_path)
        .output()?;
    if !output.status.success() {
        let _ = fs::remove_file(&part);
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!(
                "tar failed capturing bundle for {}@{}: {}",
                name,
                evr,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        )));
    }
    fsutil::rename_atomic(&part, &bundle_path)?;
    fs::remove_file(&list_path)?;

    // Preserve the manifest beside the bundle
    fsutil::write_atomic(&dir.join("manifest.old"), manifest.render().as_bytes())?;

    info!("captured rollback bundle {}", bundle_path.display());
    Ok(bundle_path)
}

/// The preserved manifest of a captured bundle
pub fn bundle_manifest(rollback_root: &Path, name: &str, evr: &Evr) -> Result<Manifest> {
    Manifest::read(&bundle_dir(rollback_root, name, evr).join("manifest.old"))
}

/// Locate a bundle's archive, trying each known compression
pub fn find_bundle(rollback_root: &Path, name: &str, evr: &Evr) -> Option<PathBuf> {
    let dir = bundle_dir(rollback_root, name, evr);
    for compression in [Compression::Zstd, Compression::Xz, Compression::Gzip] {
        let path = bundle_file(&dir, compression);
        if path.exists() {
            return Some(path);
        }
    }
    None
}

/// EVRs with a captured bundle for `name`, newest first
pub fn list_bundles(rollback_root: &Path, name: &str) -> Result<Vec<Evr>> {
    let dir = rollback_root.join(name);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut evrs = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Ok(evr) = Evr::parse(&entry.file_name().to_string_lossy()) {
            evrs.push(evr);
        }
    }
    evrs.sort();
    evrs.reverse();
    Ok(evrs)
}

/// Extract a bundle back over the target root
fn restore_bundle(bundle: &Path, target_root: &Path) -> Result<()> {
    crate::host::require("tar")?;
    fs::create_dir_all(target_root)?;
    let output = Command::new("tar")
        .arg("--extract")
        .arg("-p")
        .arg("--no-same-owner")
        .arg("--file")
        .arg(bundle)
        .arg("-C")
        .arg(target_root)
        .output()?;
    if !output.status.success() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!(
                "tar failed restoring {}: {}",
                bundle.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        )));
    }
    Ok(())
}

/// Roll `name` back to `target`.
///
/// `target` of `None` means "the previous version": the newest bundled
/// EVR older than the installed one. The archive path is preferred; the
/// bundle path is the fallback when the archive is gone.
pub fn rollback(paths: &Paths, db: &Database, name: &str, target: Option<&Evr>) -> Result<()> {
    let locks = crate::lock::LockSet::new(paths.locks_dir());
    let _guard = locks.acquire(
        &crate::lock::install_lock(name),
        crate::lock::INSTALL_TIMEOUT,
    )?;

    let current = db.require_installed(name)?;
    let target_evr = match target {
        Some(evr) => evr.clone(),
        None => list_bundles(&paths.rollback_dir(), name)?
            .into_iter()
            .find(|evr| *evr < current.evr)
            .ok_or_else(|| {
                Error::NotFound(format!("no rollback bundle older than {} for {}", current.evr, name))
            })?,
    };

    info!("rolling back {} {} -> {}", name, current.evr, target_evr);
    let target_root = current.target_root.clone();
    let from_evr = current.evr.clone();

    // Already serialized by the install-<name> lock above; replacing the
    // installation means reverse-dep refusal does not apply
    install::uninstall_unlocked(paths, db, name, &target_root, true)?;

    let archive = find_archive(&paths.packages_dir(), name, &target_evr);
    match archive {
        Some(archive_path) => {
            install::install_pkg_unlocked(paths, db, &archive_path, &target_root)?;
        }
        None => {
            let bundle = find_bundle(&paths.rollback_dir(), name, &target_evr).ok_or_else(|| {
                Error::NotFound(format!("neither archive nor bundle for {}@{}", name, target_evr))
            })?;
            info!("archive for {}@{} gone, restoring bundle", name, target_evr);
            restore_bundle(&bundle, &target_root)?;

            // Minimal record pointing at the preserved manifest
            let manifest_path = bundle_dir(&paths.rollback_dir(), name, &target_evr).join("manifest.old");
            let record = InstalledRecord {
                name: name.to_string(),
                evr: target_evr.clone(),
                target_root: target_root.clone(),
                archive_path: PathBuf::new(),
                manifest_path,
                install_time: Utc::now(),
                build_time: current.build_time,
                deps: current.deps.clone(),
                dep_versions: Default::default(),
                env_fingerprint: String::new(),
                abi_fingerprint: String::new(),
                toolchain_fingerprint: String::new(),
            };
            db.write_installed(&record)?;
        }
    }

    db.history()
        .append(name, Action::Rollback, Some(&from_evr), &target_evr)?;
    Ok(())
}

/// Find a built archive for `name@evr` under the packages directory
pub fn find_archive(packages_dir: &Path, name: &str, evr: &Evr) -> Option<PathBuf> {
    for compression in [Compression::Zstd, Compression::Xz, Compression::Gzip] {
        let filename = PackageFilename::new(name, evr, compression).to_filename();
        let path = packages_dir.join(filename);
        if path.exists() {
            return Some(path);
        }
    }
    None
}
