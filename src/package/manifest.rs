// src/package/manifest.rs

//! Package manifest: the ordered file listing of a staged tree
//!
//! One line per staged path:
//!
//! ```text
//! <mode-octal> <uid> <gid> <type> <size> <sha256|-> <absolute-path>
//! ```
//!
//! Types are `f` (regular file), `d` (directory), `l` (symlink).
//! Directories and symlinks carry `size=0` and hash `-`. Entries are
//! sorted by path, which puts parents before children so removal in
//! reverse order can `rmdir` safely.

use crate::error::{Error, Result};
use crate::hash;
use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Kind of a manifest entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
}

impl EntryKind {
    fn as_char(&self) -> char {
        match self {
            EntryKind::File => 'f',
            EntryKind::Dir => 'd',
            EntryKind::Symlink => 'l',
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        match s {
            "f" => Some(EntryKind::File),
            "d" => Some(EntryKind::Dir),
            "l" => Some(EntryKind::Symlink),
            _ => None,
        }
    }
}

/// One manifest record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Permission bits, e.g. 0o755
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub kind: EntryKind,
    pub size: u64,
    /// Lowercase hex SHA-256 for regular files, `None` for dirs/symlinks
    pub hash: Option<String>,
    /// Absolute path within the package's root
    pub path: String,
}

impl ManifestEntry {
    fn format_line(&self) -> String {
        format!(
            "{:o} {} {} {} {} {} {}",
            self.mode,
            self.uid,
            self.gid,
            self.kind.as_char(),
            self.size,
            self.hash.as_deref().unwrap_or("-"),
            self.path
        )
    }

    fn parse_line(line: &str, lineno: usize) -> Result<Self> {
        let err = |reason: &str| Error::Parse {
            file: format!("manifest line {}", lineno),
            reason: reason.to_string(),
        };

        let mut fields = line.splitn(7, ' ');
        let mode_s = fields.next().ok_or_else(|| err("missing mode"))?;
        let uid_s = fields.next().ok_or_else(|| err("missing uid"))?;
        let gid_s = fields.next().ok_or_else(|| err("missing gid"))?;
        let kind_s = fields.next().ok_or_else(|| err("missing type"))?;
        let size_s = fields.next().ok_or_else(|| err("missing size"))?;
        let hash_s = fields.next().ok_or_else(|| err("missing hash"))?;
        let path = fields.next().ok_or_else(|| err("missing path"))?;

        let mode = u32::from_str_radix(mode_s, 8).map_err(|_| err("bad octal mode"))?;
        let uid = uid_s.parse().map_err(|_| err("bad uid"))?;
        let gid = gid_s.parse().map_err(|_| err("bad gid"))?;
        let kind = EntryKind::from_str(kind_s).ok_or_else(|| err("bad type"))?;
        let size = size_s.parse().map_err(|_| err("bad size"))?;

        if !path.starts_with('/') {
            return Err(err("path must be absolute"));
        }

        let hash = if hash_s == "-" {
            None
        } else {
            if hash_s.len() != 64 || !hash_s.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(err("bad sha256"));
            }
            Some(hash_s.to_ascii_lowercase())
        };

        if kind != EntryKind::File && hash.is_some() {
            return Err(err("only regular files carry a hash"));
        }
        if kind == EntryKind::File && hash.is_none() {
            return Err(err("regular files must carry a hash"));
        }

        Ok(Self {
            mode,
            uid,
            gid,
            kind,
            size,
            hash,
            path: path.to_string(),
        })
    }
}

/// An ordered package manifest
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Walk a staging root and produce its manifest.
    ///
    /// Traversal is lexically sorted by full path so two walks of the same
    /// tree produce byte-identical manifests.
    pub fn from_tree(staging_root: &Path) -> Result<Self> {
        let mut entries = Vec::new();

        for item in WalkDir::new(staging_root).min_depth(1).sort_by_file_name() {
            let item = item.map_err(|e| {
                Error::Io(e.into_io_error().unwrap_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::Other, "walk error")
                }))
            })?;
            let rel = item
                .path()
                .strip_prefix(staging_root)
                .expect("walked path is under its root");
            let abs_path = format!("/{}", rel.display());

            let meta = fs::symlink_metadata(item.path())?;
            let mode = meta.mode() & 0o7777;
            let uid = meta.uid();
            let gid = meta.gid();

            let entry = if meta.file_type().is_symlink() {
                ManifestEntry {
                    mode,
                    uid,
                    gid,
                    kind: EntryKind::Symlink,
                    size: 0,
                    hash: None,
                    path: abs_path,
                }
            } else if meta.is_dir() {
                ManifestEntry {
                    mode,
                    uid,
                    gid,
                    kind: EntryKind::Dir,
                    size: 0,
                    hash: None,
                    path: abs_path,
                }
            } else {
                ManifestEntry {
                    mode,
                    uid,
                    gid,
                    kind: EntryKind::File,
                    size: meta.len(),
                    hash: Some(hash::hash_file(item.path())?),
                    path: abs_path,
                }
            };
            entries.push(entry);
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(Self { entries })
    }

    /// Parse a manifest from its textual form
    pub fn parse(text: &str) -> Result<Self> {
        let mut entries = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            if line.is_empty() {
                continue;
            }
            entries.push(ManifestEntry::parse_line(line, lineno + 1)?);
        }
        Ok(Self { entries })
    }

    /// Read and parse a manifest file
    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(format!("manifest {}", path.display()))
            } else {
                Error::Io(e)
            }
        })?;
        Self::parse(&text)
    }

    /// Render the manifest to its textual form
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&entry.format_line());
            out.push('\n');
        }
        out
    }

    /// Entries in manifest order (parents before children)
    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up an entry by absolute path
    pub fn get(&self, path: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.path == path)
    }

    /// Map of path → entry, for join-style comparisons
    pub fn by_path(&self) -> BTreeMap<&str, &ManifestEntry> {
        self.entries.iter().map(|e| (e.path.as_str(), e)).collect()
    }

    /// Paths of file and symlink entries (the set a rollback bundle captures)
    pub fn payload_paths(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.kind != EntryKind::Dir)
            .map(|e| e.path.as_str())
            .collect()
    }

    /// Resolve an absolute manifest path against a target root
    pub fn path_under(root: &Path, manifest_path: &str) -> PathBuf {
        root.join(manifest_path.trim_start_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;

    fn sample_tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("usr/bin")).unwrap();
        fs::create_dir_all(dir.path().join("usr/lib")).unwrap();
        fs::write(dir.path().join("usr/bin/tool"), b"#!/bin/sh\n").unwrap();
        fs::write(dir.path().join("usr/lib/libx.so.1.0"), b"elf-bytes").unwrap();
        symlink("libx.so.1.0", dir.path().join("usr/lib/libx.so")).unwrap();
        dir
    }

    #[test]
    fn test_from_tree_is_sorted_and_typed() {
        let dir = sample_tree();
        let m = Manifest::from_tree(dir.path()).unwrap();

        let paths: Vec<_> = m.entries().iter().map(|e| e.path.as_str()).collect();
        let mut sorted = paths.clone();
        sorted.sort();
        assert_eq!(paths, sorted);

        assert_eq!(m.get("/usr").unwrap().kind, EntryKind::Dir);
        assert_eq!(m.get("/usr/lib/libx.so").unwrap().kind, EntryKind::Symlink);
        let file = m.get("/usr/lib/libx.so.1.0").unwrap();
        assert_eq!(file.kind, EntryKind::File);
        assert_eq!(file.size, 9);
        assert!(file.hash.is_some());
    }

    #[test]
    fn test_dirs_and_symlinks_have_no_hash() {
        let dir = sample_tree();
        let m = Manifest::from_tree(dir.path()).unwrap();
        for e in m.entries() {
            match e.kind {
                EntryKind::File => assert!(e.hash.is_some()),
                _ => {
                    assert!(e.hash.is_none());
                    assert_eq!(e.size, 0);
                }
            }
        }
    }

    #[test]
    fn test_render_parse_round_trip() {
        let dir = sample_tree();
        let m = Manifest::from_tree(dir.path()).unwrap();
        let text = m.render();
        let parsed = Manifest::parse(&text).unwrap();
        assert_eq!(parsed, m);
    }

    #[test]
    fn test_two_walks_are_byte_identical() {
        let dir = sample_tree();
        let a = Manifest::from_tree(dir.path()).unwrap().render();
        let b = Manifest::from_tree(dir.path()).unwrap().render();
        assert_eq!(a, b);
    }

    #[test]
    fn test_parse_rejects_relative_path() {
        let line = "755 0 0 d 0 - usr/lib\n";
        assert!(Manifest::parse(line).is_err());
    }

    #[test]
    fn test_parse_rejects_file_without_hash() {
        let line = "644 0 0 f 10 - /etc/motd\n";
        assert!(Manifest::parse(line).is_err());
    }

    #[test]
    fn test_parse_rejects_dir_with_hash() {
        let line = format!("755 0 0 d 0 {} /usr\n", "a".repeat(64));
        assert!(Manifest::parse(&line).is_err());
    }

    #[test]
    fn test_parse_mode_is_octal() {
        let line = format!("755 0 0 f 3 {} /x\n", "a".repeat(64));
        let m = Manifest::parse(&line).unwrap();
        assert_eq!(m.entries()[0].mode, 0o755);
    }

    #[test]
    fn test_path_with_spaces_survives() {
        let hash = "b".repeat(64);
        let line = format!("644 0 0 f 1 {} /usr/share/a name with spaces\n", hash);
        let m = Manifest::parse(&line).unwrap();
        assert_eq!(m.entries()[0].path, "/usr/share/a name with spaces");
        assert_eq!(m.render(), line);
    }

    #[test]
    fn test_payload_paths_skip_dirs() {
        let dir = sample_tree();
        let m = Manifest::from_tree(dir.path()).unwrap();
        let payload = m.payload_paths();
        assert!(payload.contains(&"/usr/bin/tool"));
        assert!(!payload.contains(&"/usr"));
    }

    #[test]
    fn test_path_under() {
        assert_eq!(
            Manifest::path_under(Path::new("/t"), "/usr/bin/tool"),
            PathBuf::from("/t/usr/bin/tool")
        );
    }

    #[test]
    fn test_read_missing_is_not_found() {
        let err = Manifest::read(Path::new("/no/such/manifest")).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
