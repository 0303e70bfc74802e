// src/hash.rs

//! SHA-256 hashing helpers for file integrity and fingerprints
//!
//! Everything in the data model that carries a hash carries a lowercase
//! hex SHA-256. Files are hashed streaming so large source tarballs do not
//! get buffered in memory.

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io;
use std::path::Path;

/// Hash a byte slice, returning lowercase hex
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Hash a string, returning lowercase hex
pub fn hash_str(data: &str) -> String {
    hash_bytes(data.as_bytes())
}

/// Hash a file's contents, streaming
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Verify a file against an expected lowercase hex SHA-256.
///
/// Returns `Ok(Err(actual))` on mismatch so callers can report both sides.
pub fn verify_file(path: &Path, expected: &str) -> Result<std::result::Result<(), String>> {
    let actual = hash_file(path)?;
    if actual == expected.to_ascii_lowercase() {
        Ok(Ok(()))
    } else {
        Ok(Err(actual))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    // sha256 of the empty string
    const EMPTY: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn test_hash_bytes_empty() {
        assert_eq!(hash_bytes(b""), EMPTY);
    }

    #[test]
    fn test_hash_bytes_known_vector() {
        assert_eq!(
            hash_bytes(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_hash_file_matches_hash_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        let mut f = File::create(&path).unwrap();
        f.write_all(b"hello world").unwrap();
        drop(f);

        assert_eq!(hash_file(&path).unwrap(), hash_bytes(b"hello world"));
    }

    #[test]
    fn test_verify_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"abc").unwrap();

        let good = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";
        assert!(verify_file(&path, good).unwrap().is_ok());
        assert!(verify_file(&path, EMPTY).unwrap().is_err());
    }
}
