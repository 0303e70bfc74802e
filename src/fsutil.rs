// src/fsutil.rs

//! Small filesystem helpers shared across the data plane
//!
//! Every durable write in mortar goes through `write_atomic`: content
//! lands in a `.tmp` sibling first and renames into place, so readers
//! observe either the old file or the new one, never a torn write.

use crate::error::Result;
use std::fs;
use std::path::Path;

/// Atomically replace `path` with `content` via a temp sibling + rename
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension(tmp_extension(path));
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Rename `src` into `path`, creating parent directories
pub fn rename_atomic(src: &Path, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::rename(src, path)?;
    Ok(())
}

fn tmp_extension(path: &Path) -> String {
    match path.extension() {
        Some(ext) => format!("{}.tmp", ext.to_string_lossy()),
        None => "tmp".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_atomic_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/c.meta");
        write_atomic(&path, b"body").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"body");
    }

    #[test]
    fn test_write_atomic_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");
        // no stray temp file left behind
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
