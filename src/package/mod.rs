// src/package/mod.rs

//! Packager: strip, manifest, reproducible archive
//!
//! Turns a populated staging root into a compressed package archive plus
//! its side-car manifest. The archive is created with reproducibility
//! flags (sorted names, numeric zeroed ownership, pinned mtimes, posix
//! headers with volatile pax fields removed), so two runs over the same
//! staging root with the same SOURCE_DATE_EPOCH are byte-identical.

mod manifest;

pub use manifest::{EntryKind, Manifest, ManifestEntry};

use crate::error::{Error, Result};
use crate::fsutil;
use crate::host;
use crate::version::Evr;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

/// Archive compression choices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    Zstd,
    Xz,
    /// Used by tests and constrained hosts; always available to GNU tar
    Gzip,
}

impl Compression {
    pub fn extension(&self) -> &'static str {
        match self {
            Compression::Zstd => "tar.zst",
            Compression::Xz => "tar.xz",
            Compression::Gzip => "tar.gz",
        }
    }

    pub fn tar_flag(&self) -> &'static str {
        match self {
            Compression::Zstd => "--zstd",
            Compression::Xz => "-J",
            Compression::Gzip => "-z",
        }
    }

    /// Host program the archiver shells out to for this format
    pub fn host_program(&self) -> &'static str {
        match self {
            Compression::Zstd => "zstd",
            Compression::Xz => "xz",
            Compression::Gzip => "gzip",
        }
    }

    pub fn from_filename(name: &str) -> Option<Self> {
        if name.ends_with(".tar.zst") {
            Some(Compression::Zstd)
        } else if name.ends_with(".tar.xz") {
            Some(Compression::Xz)
        } else if name.ends_with(".tar.gz") {
            Some(Compression::Gzip)
        } else {
            None
        }
    }
}

/// Parsed `<name>-<version>-<release>.<ext>` archive filename.
///
/// Names may contain `-`, so the tokenizer works from the right: the last
/// two dash-separated fields are release and version, the rest is the name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageFilename {
    pub name: String,
    pub version: String,
    pub release: String,
    pub compression: Compression,
}

impl PackageFilename {
    pub fn new(name: &str, evr: &Evr, compression: Compression) -> Self {
        Self {
            name: name.to_string(),
            version: evr.version.clone(),
            release: evr.release.clone(),
            compression,
        }
    }

    pub fn parse(filename: &str) -> Result<Self> {
        let compression = Compression::from_filename(filename).ok_or_else(|| {
            Error::UnsupportedFormat(filename.to_string())
        })?;
        let stem = filename
            .strip_suffix(compression.extension())
            .and_then(|s| s.strip_suffix('.'))
            .expect("suffix checked by from_filename");

        let mut fields = stem.rsplitn(3, '-');
        let release = fields.next().unwrap_or_default();
        let version = fields.next().unwrap_or_default();
        let name = fields.next().unwrap_or_default();
        if name.is_empty() || version.is_empty() || release.is_empty() {
            return Err(Error::Parse {
                file: filename.to_string(),
                reason: "expected <name>-<version>-<release>.<ext>".to_string(),
            });
        }

        Ok(Self {
            name: name.to_string(),
            version: version.to_string(),
            release: release.to_string(),
            compression,
        })
    }

    pub fn to_filename(&self) -> String {
        format!(
            "{}-{}-{}.{}",
            self.name,
            self.version,
            self.release,
            self.compression.extension()
        )
    }
}

/// A built package: the archive and its side-car manifest
#[derive(Debug, Clone)]
pub struct BuiltPackage {
    pub name: String,
    pub evr: Evr,
    pub archive_path: PathBuf,
    pub manifest_path: PathBuf,
    pub manifest: Manifest,
}

/// Produces package archives from staging roots
#[derive(Debug, Clone)]
pub struct Packager {
    packages_dir: PathBuf,
    manifests_dir: PathBuf,
    compression: Compression,
    strip: bool,
    source_date_epoch: i64,
}

/// Directories searched for strippable ELF objects, relative to staging
const STRIP_DIRS: &[&str] = &[
    "usr/bin",
    "usr/sbin",
    "usr/lib",
    "usr/lib64",
    "usr/libexec",
    "bin",
    "sbin",
    "lib",
    "lib64",
];

impl Packager {
    pub fn new(packages_dir: impl Into<PathBuf>, manifests_dir: impl Into<PathBuf>) -> Self {
        Self {
            packages_dir: packages_dir.into(),
            manifests_dir: manifests_dir.into(),
            compression: Compression::default(),
            strip: true,
            source_date_epoch: crate::build::DEFAULT_SOURCE_EPOCH,
        }
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_strip(mut self, strip: bool) -> Self {
        self.strip = strip;
        self
    }

    pub fn with_source_date_epoch(mut self, epoch: i64) -> Self {
        self.source_date_epoch = epoch;
        self
    }

    /// Manifest side-car path for a package
    pub fn manifest_path(&self, name: &str, evr: &Evr) -> PathBuf {
        self.manifests_dir.join(format!("{}-{}.manifest", name, evr))
    }

    /// Strip, manifest and archive a staging root.
    pub fn package(&self, name: &str, evr: &Evr, staging_root: &Path) -> Result<BuiltPackage> {
        if self.strip {
            self.strip_binaries(staging_root)?;
        }

        let manifest = Manifest::from_tree(staging_root)?;
        if manifest.is_empty() {
            return Err(Error::StageFailed {
                stage: "package".into(),
                reason: "staging root is empty".into(),
            });
        }

        let filename = PackageFilename::new(name, evr, self.compression).to_filename();
        let archive_path = self.packages_dir.join(&filename);
        self.write_archive(staging_root, &archive_path)?;
        readback_entry_count(&archive_path, manifest.len())?;

        let manifest_path = self.manifest_path(name, evr);
        fsutil::write_atomic(&manifest_path, manifest.render().as_bytes())?;

        info!(
            "packaged {}-{}: {} ({} entries)",
            name,
            evr,
            archive_path.display(),
            manifest.len()
        );
        Ok(BuiltPackage {
            name: name.to_string(),
            evr: evr.clone(),
            archive_path,
            manifest_path,
            manifest,
        })
    }

    /// Strip ELF objects under the recognized binary directories.
    ///
    /// Setuid/setgid files are skipped with a warning; strip failures on
    /// odd objects are logged, not fatal.
    fn strip_binaries(&self, staging_root: &Path) -> Result<()> {
        host::require("strip")?;
        for rel in STRIP_DIRS {
            let dir = staging_root.join(rel);
            if !dir.is_dir() {
                continue;
            }
            for entry in walkdir::WalkDir::new(&dir).into_iter().filter_map(|e| e.ok()) {
                let path = entry.path();
                let meta = match fs::symlink_metadata(path) {
                    Ok(m) => m,
                    Err(_) => continue,
                };
                if !meta.is_file() || !is_elf(path) {
                    continue;
                }
                if meta.mode() & 0o6000 != 0 {
                    warn!("skipping strip of setuid/setgid file {}", path.display());
                    continue;
                }
                let output = Command::new("strip")
                    .arg("--strip-unneeded")
                    .arg(path)
                    .output()?;
                if !output.status.success() {
                    debug!(
                        "strip skipped {}: {}",
                        path.display(),
                        String::from_utf8_lossy(&output.stderr).trim()
                    );
                }
            }
        }
        Ok(())
    }

    /// Create the compressed archive with reproducibility flags, writing
    /// to a temp path and renaming into place.
    fn write_archive(&self, staging_root: &Path, archive_path: &Path) -> Result<()> {
        host::require("tar")?;
        host::require(self.compression.host_program())?;
        fs::create_dir_all(&self.packages_dir)?;

        let part = archive_path.with_extension("part");
        let output = Command::new("tar")
            .arg("--create")
            .arg(self.compression.tar_flag())
            .arg("--sort=name")
            .arg("--numeric-owner")
            .arg("--owner=0")
            .arg("--group=0")
            .arg(format!("--mtime=@{}", self.source_date_epoch))
            .arg("--format=posix")
            .arg("--pax-option=exthdr.name=%d/PaxHeaders/%f,delete=atime,delete=ctime")
            .arg("--xattrs")
            .arg("--file")
            .arg(&part)
            .arg("-C")
            .arg(staging_root)
            .arg(".")
            .output()?;

        if !output.status.success() {
            let _ = fs::remove_file(&part);
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!(
                    "tar failed creating {}: {}",
                    archive_path.display(),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            )));
        }
        fsutil::rename_atomic(&part, archive_path)?;
        Ok(())
    }
}

/// Read the freshly written archive back and check that it holds exactly
/// the manifested entry count. Catches a tar/compressor that exited zero
/// but wrote garbage before the package enters circulation.
fn readback_entry_count(archive_path: &Path, expected: usize) -> Result<()> {
    let name = archive_path.to_string_lossy();
    let format = crate::compression::CompressionFormat::from_extension(&name);
    let file = fs::File::open(archive_path)?;
    let reader = crate::compression::create_decoder(file, format)?;

    let mut tar = tar::Archive::new(reader);
    let mut count = 0usize;
    for entry in tar.entries()? {
        let entry = entry?;
        let path = entry.path()?;
        let trimmed = path.to_string_lossy().trim_matches('/').trim_start_matches("./").to_string();
        if !trimmed.is_empty() && trimmed != "." {
            count += 1;
        }
    }

    if count != expected {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!(
                "{}: archive holds {} entries, manifest lists {}",
                archive_path.display(),
                count,
                expected
            ),
        )));
    }
    Ok(())
}

/// Check the 4-byte ELF magic
fn is_elf(path: &Path) -> bool {
    use std::io::Read;
    let mut magic = [0u8; 4];
    match fs::File::open(path).and_then(|mut f| f.read_exact(&mut magic)) {
        Ok(()) => magic == [0x7f, b'E', b'L', b'F'],
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename_round_trip() {
        let evr = Evr::new(0, "1.3", "1");
        let f = PackageFilename::new("zlib", &evr, Compression::Zstd);
        assert_eq!(f.to_filename(), "zlib-1.3-1.tar.zst");
        assert_eq!(PackageFilename::parse("zlib-1.3-1.tar.zst").unwrap(), f);
    }

    #[test]
    fn test_filename_with_dashes_in_name() {
        let parsed = PackageFilename::parse("util-linux-2.39.2-3.tar.xz").unwrap();
        assert_eq!(parsed.name, "util-linux");
        assert_eq!(parsed.version, "2.39.2");
        assert_eq!(parsed.release, "3");
        assert_eq!(parsed.compression, Compression::Xz);
    }

    #[test]
    fn test_filename_unknown_extension() {
        let err = PackageFilename::parse("zlib-1.3-1.cpio").unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
    }

    #[test]
    fn test_filename_too_few_fields() {
        assert!(PackageFilename::parse("zlib-1.3.tar.zst").is_err());
    }

    #[test]
    fn test_is_elf_detection() {
        let dir = tempfile::tempdir().unwrap();
        let elfish = dir.path().join("elfish");
        fs::write(&elfish, [0x7f, b'E', b'L', b'F', 0, 0]).unwrap();
        assert!(is_elf(&elfish));

        let script = dir.path().join("script");
        fs::write(&script, b"#!/bin/sh\n").unwrap();
        assert!(!is_elf(&script));

        let tiny = dir.path().join("tiny");
        fs::write(&tiny, b"ab").unwrap();
        assert!(!is_elf(&tiny));
    }

    #[test]
    fn test_compression_table() {
        assert_eq!(Compression::Zstd.extension(), "tar.zst");
        assert_eq!(Compression::from_filename("a-1-1.tar.gz"), Some(Compression::Gzip));
        assert_eq!(Compression::from_filename("a-1-1.tar"), None);
    }
}
