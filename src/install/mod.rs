// src/install/mod.rs

//! Installer: atomic apply, uninstall, upgrade and verify
//!
//! A package archive is extracted into a scratch staging directory, then
//! applied to the target root in a single ordered pass (directories, then
//! file contents via temp+rename, then symlinks as recorded). Only after
//! the full overlay do stale paths from a prior installation of the same
//! name get removed, and only then is the installed record rewritten —
//! so a crash mid-operation never leaves the database pointing at files
//! that are not there.
//!
//! Uninstall walks the manifest in reverse: modified files are preserved
//! as `<path>.save`, pristine files are removed, then empty directories
//! fall bottom-up. Upgrade composes the two with a rollback bundle and a
//! manifest delta captured first, plus a downgrade guard.

use crate::config::Paths;
use crate::db::{Action, BuiltRecord, Database, InstalledRecord};
use crate::delta;
use crate::error::{Error, Result};
use crate::hash;
use crate::lock::{self, LockSet};
use crate::package::{EntryKind, Manifest, PackageFilename};
use crate::rollback;
use crate::version::Evr;
use crate::workspace;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Build-time facts recorded alongside an installation
#[derive(Debug, Clone)]
pub struct InstallInfo {
    pub deps: Vec<String>,
    pub dep_versions: BTreeMap<String, String>,
    pub build_time: DateTime<Utc>,
    pub env_fingerprint: String,
    pub abi_fingerprint: String,
    pub toolchain_fingerprint: String,
}

impl Default for InstallInfo {
    fn default() -> Self {
        Self {
            deps: Vec::new(),
            dep_versions: BTreeMap::new(),
            build_time: Utc::now(),
            env_fingerprint: String::new(),
            abi_fingerprint: String::new(),
            toolchain_fingerprint: String::new(),
        }
    }
}

impl InstallInfo {
    /// Adopt the build-time facts of a built-but-not-installed marker
    fn from_built(built: &BuiltRecord) -> Self {
        Self {
            deps: built.deps.clone(),
            dep_versions: built.dep_versions.clone(),
            build_time: built.build_time,
            env_fingerprint: built.env_fingerprint.clone(),
            abi_fingerprint: built.abi_fingerprint.clone(),
            toolchain_fingerprint: built.toolchain_fingerprint.clone(),
        }
    }
}

/// Install an archive into `target_root` under the `install-<name>` lock
pub fn install_pkg(
    paths: &Paths,
    db: &Database,
    archive: &Path,
    target_root: &Path,
) -> Result<InstalledRecord> {
    let filename = archive_filename(archive)?;
    let locks = LockSet::new(paths.locks_dir());
    let _guard = locks.acquire(&lock::install_lock(&filename.name), lock::INSTALL_TIMEOUT)?;
    install_pkg_unlocked(paths, db, archive, target_root)
}

/// Install without taking the lock (callers already hold it)
pub(crate) fn install_pkg_unlocked(
    paths: &Paths,
    db: &Database,
    archive: &Path,
    target_root: &Path,
) -> Result<InstalledRecord> {
    let filename = archive_filename(archive)?;
    let evr = evr_for_archive(db, &filename, archive)?;
    let info = match db.read_built(&filename.name)? {
        Some(built) if built.archive_path == archive => InstallInfo::from_built(&built),
        _ => InstallInfo::default(),
    };

    let prior = db.read_installed(&filename.name)?;
    let from = prior.as_ref().map(|r| r.evr.clone());
    apply_archive(
        paths,
        db,
        archive,
        &filename,
        &evr,
        target_root,
        info,
        Action::Install,
        from.as_ref(),
    )
}

/// Upgrade to `archive`, capturing a rollback bundle and delta first.
///
/// A candidate older than the installed EVR is refused without `force`;
/// a byte-identical reinstall of the same EVR is a no-op.
pub fn upgrade(
    paths: &Paths,
    db: &Database,
    archive: &Path,
    target_root: &Path,
    force: bool,
) -> Result<InstalledRecord> {
    let filename = archive_filename(archive)?;
    let locks = LockSet::new(paths.locks_dir());
    let _guard = locks.acquire(&lock::install_lock(&filename.name), lock::INSTALL_TIMEOUT)?;

    let Some(old) = db.read_installed(&filename.name)? else {
        // Nothing installed: an upgrade degenerates to a fresh install
        return install_pkg_unlocked(paths, db, archive, target_root);
    };

    let new_evr = evr_for_archive(db, &filename, archive)?;
    if new_evr < old.evr && !force {
        return Err(Error::DowngradeRefused {
            name: filename.name.clone(),
            installed: old.evr.to_string(),
            candidate: new_evr.to_string(),
        });
    }
    if new_evr == old.evr
        && old.archive_path.exists()
        && hash::hash_file(archive)? == hash::hash_file(&old.archive_path)?
    {
        // Byte-identical archive: never touch the filesystem. A fresh
        // built marker still refreshes recorded build facts (dep EVRs,
        // fingerprints), otherwise the smart planner would flag this
        // package stale forever.
        if let Some(built) = db.read_built(&old.name)? {
            if built.archive_path == archive {
                let info = InstallInfo::from_built(&built);
                let record = InstalledRecord {
                    build_time: info.build_time,
                    deps: info.deps,
                    dep_versions: info.dep_versions,
                    env_fingerprint: info.env_fingerprint,
                    abi_fingerprint: info.abi_fingerprint,
                    toolchain_fingerprint: info.toolchain_fingerprint,
                    ..old
                };
                db.write_installed(&record)?;
                db.clear_built(&record.name)?;
                info!("{} {}: identical archive, refreshed build facts", record.name, record.evr);
                return Ok(record);
            }
        }
        info!("{} {} already installed from identical archive", old.name, old.evr);
        return Ok(old);
    }

    // Precondition snapshot: bundle + delta before anything is overlaid
    let old_manifest = Manifest::read(&old.manifest_path)?;
    rollback::capture_bundle(
        &paths.rollback_dir(),
        &old.name,
        &old.evr,
        target_root,
        &old_manifest,
        filename.compression,
    )?;
    db.history()
        .append(&old.name, Action::Save, Some(&old.evr), &old.evr)?;

    let info = match db.read_built(&filename.name)? {
        Some(built) if built.archive_path == archive => InstallInfo::from_built(&built),
        _ => InstallInfo::default(),
    };
    let record = apply_archive(
        paths,
        db,
        archive,
        &filename,
        &new_evr,
        target_root,
        info,
        Action::Upgrade,
        Some(&old.evr),
    )?;

    let new_manifest = Manifest::read(&record.manifest_path)?;
    delta::write_delta(
        &paths.delta_dir(),
        &record.name,
        &old.evr,
        &new_evr,
        &old_manifest,
        &new_manifest,
    )?;

    Ok(record)
}

/// Remove an installed package from its target root.
///
/// Refused while other installed packages depend on it, unless forced.
pub fn uninstall(
    paths: &Paths,
    db: &Database,
    name: &str,
    target_root: &Path,
    force: bool,
) -> Result<()> {
    let locks = LockSet::new(paths.locks_dir());
    let _guard = locks.acquire(&lock::uninstall_lock(name), lock::INSTALL_TIMEOUT)?;
    uninstall_unlocked(paths, db, name, target_root, force)
}

pub(crate) fn uninstall_unlocked(
    _paths: &Paths,
    db: &Database,
    name: &str,
    target_root: &Path,
    force: bool,
) -> Result<()> {
    let record = db.require_installed(name)?;

    if !force {
        let dependents = db.reverse_deps(name)?;
        if !dependents.is_empty() {
            return Err(Error::ReverseDepsPresent {
                name: name.to_string(),
                dependents,
            });
        }
    }

    let manifest = Manifest::read(&record.manifest_path)?;
    info!("uninstalling {}-{} from {}", name, record.evr, target_root.display());

    // Reverse manifest order: children before parents
    for entry in manifest.entries().iter().rev() {
        let on_disk = Manifest::path_under(target_root, &entry.path);
        match entry.kind {
            EntryKind::File => {
                let Ok(meta) = on_disk.symlink_metadata() else {
                    debug!("{} already gone", entry.path);
                    continue;
                };
                if !meta.is_file() {
                    continue;
                }
                let expected = entry.hash.as_deref().unwrap_or("");
                match hash::verify_file(&on_disk, expected)? {
                    Ok(()) => fs::remove_file(&on_disk)?,
                    Err(_) => {
                        let save = PathBuf::from(format!("{}.save", on_disk.display()));
                        warn!("{} modified, preserving as {}", entry.path, save.display());
                        fs::rename(&on_disk, &save)?;
                    }
                }
            }
            EntryKind::Symlink => {
                if on_disk.symlink_metadata().is_ok() {
                    fs::remove_file(&on_disk)?;
                }
            }
            EntryKind::Dir => {
                // Only empty directories fall; shared ones stay
                let _ = fs::remove_dir(&on_disk);
            }
        }
    }

    db.remove_installed(name)?;
    Ok(())
}

/// Re-hash every regular file of an installed package against its
/// manifest. Returns the mismatching (or missing) paths; empty means the
/// installation is intact.
pub fn verify(db: &Database, name: &str) -> Result<Vec<String>> {
    let record = db.require_installed(name)?;
    let manifest = Manifest::read(&record.manifest_path)?;

    let mut mismatches = Vec::new();
    for entry in manifest.entries() {
        if entry.kind != EntryKind::File {
            continue;
        }
        let on_disk = Manifest::path_under(&record.target_root, &entry.path);
        let expected = entry.hash.as_deref().unwrap_or("");
        let ok = on_disk.is_file() && hash::verify_file(&on_disk, expected)?.is_ok();
        if !ok {
            warn!("verify mismatch: {}", entry.path);
            mismatches.push(entry.path.clone());
        }
    }
    Ok(mismatches)
}

// --- internals ---

fn archive_filename(archive: &Path) -> Result<PackageFilename> {
    let name = archive
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::NotFound(format!("archive {}", archive.display())))?;
    PackageFilename::parse(name)
}

/// Archive filenames carry no epoch; the built marker does. Prefer it
/// when it refers to this exact archive.
fn evr_for_archive(db: &Database, filename: &PackageFilename, archive: &Path) -> Result<Evr> {
    if let Some(built) = db.read_built(&filename.name)? {
        if built.archive_path == archive
            && built.evr.version == filename.version
            && built.evr.release == filename.release
        {
            return Ok(built.evr);
        }
    }
    Ok(Evr::new(0, filename.version.clone(), filename.release.clone()))
}

/// Extract, overlay, clean up prior paths, record. The shared core of
/// install and upgrade.
#[allow(clippy::too_many_arguments)]
fn apply_archive(
    paths: &Paths,
    db: &Database,
    archive: &Path,
    filename: &PackageFilename,
    evr: &Evr,
    target_root: &Path,
    info: InstallInfo,
    action: Action,
    from: Option<&Evr>,
) -> Result<InstalledRecord> {
    if !archive.exists() {
        return Err(Error::NotFound(format!("archive {}", archive.display())));
    }

    fs::create_dir_all(paths.work_dir())?;
    let staging = TempDir::new_in(paths.work_dir())?;
    workspace::extract(archive, staging.path())?;

    let manifest = load_or_create_manifest(paths, &filename.name, evr, staging.path())?;
    let prior = db.read_installed(&filename.name)?;

    info!(
        "applying {}-{} to {} ({} entries)",
        filename.name,
        evr,
        target_root.display(),
        manifest.len()
    );
    overlay(&manifest, staging.path(), target_root)?;

    // Prior paths with no counterpart in the new manifest leave the root
    if let Some(prior_record) = &prior {
        if let Ok(prior_manifest) = Manifest::read(&prior_record.manifest_path) {
            remove_stale_paths(&prior_manifest, &manifest, target_root)?;
        }
    }

    let record = InstalledRecord {
        name: filename.name.clone(),
        evr: evr.clone(),
        target_root: target_root.to_path_buf(),
        archive_path: archive.to_path_buf(),
        manifest_path: manifest_store_path(paths, &filename.name, evr),
        install_time: Utc::now(),
        build_time: info.build_time,
        deps: info.deps,
        dep_versions: info.dep_versions,
        env_fingerprint: info.env_fingerprint,
        abi_fingerprint: info.abi_fingerprint,
        toolchain_fingerprint: info.toolchain_fingerprint,
    };
    db.write_installed(&record)?;
    db.clear_built(&filename.name)?;
    db.history().append(&filename.name, action, from, evr)?;
    Ok(record)
}

fn manifest_store_path(paths: &Paths, name: &str, evr: &Evr) -> PathBuf {
    paths.manifests_dir().join(format!("{}-{}.manifest", name, evr))
}

/// The packager's side-car manifest when present, else one generated from
/// the extracted tree (covers archives that arrived without metadata).
fn load_or_create_manifest(
    paths: &Paths,
    name: &str,
    evr: &Evr,
    staging: &Path,
) -> Result<Manifest> {
    let path = manifest_store_path(paths, name, evr);
    if path.exists() {
        return Manifest::read(&path);
    }
    debug!("no stored manifest for {}-{}, generating from archive", name, evr);
    let manifest = Manifest::from_tree(staging)?;
    crate::fsutil::write_atomic(&path, manifest.render().as_bytes())?;
    Ok(manifest)
}

/// Apply a staged tree to the target root in one ordered pass
fn overlay(manifest: &Manifest, staging: &Path, target_root: &Path) -> Result<()> {
    fs::create_dir_all(target_root)?;

    for entry in manifest.entries() {
        let staged = Manifest::path_under(staging, &entry.path);
        let target = Manifest::path_under(target_root, &entry.path);

        match entry.kind {
            EntryKind::Dir => {
                fs::create_dir_all(&target)?;
                fs::set_permissions(&target, fs::Permissions::from_mode(entry.mode))?;
            }
            EntryKind::File => {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                // temp + rename keeps readers off half-written files
                let tmp = PathBuf::from(format!("{}.mortar-new", target.display()));
                fs::copy(&staged, &tmp)?;
                fs::set_permissions(&tmp, fs::Permissions::from_mode(entry.mode))?;
                fs::rename(&tmp, &target)?;
            }
            EntryKind::Symlink => {
                let link_target = fs::read_link(&staged)?;
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                if target.symlink_metadata().is_ok() {
                    fs::remove_file(&target)?;
                }
                symlink(&link_target, &target)?;
            }
        }
    }
    Ok(())
}

/// Remove prior-manifest paths absent from the new manifest
fn remove_stale_paths(prior: &Manifest, new: &Manifest, target_root: &Path) -> Result<()> {
    for entry in prior.entries().iter().rev() {
        if new.get(&entry.path).is_some() {
            continue;
        }
        let on_disk = Manifest::path_under(target_root, &entry.path);
        match entry.kind {
            EntryKind::Dir => {
                let _ = fs::remove_dir(&on_disk);
            }
            _ => {
                if on_disk.symlink_metadata().is_ok() {
                    debug!("removing stale path {}", entry.path);
                    fs::remove_file(&on_disk)?;
                }
            }
        }
    }
    Ok(())
}
