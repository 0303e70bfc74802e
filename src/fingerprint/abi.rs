// src/fingerprint/abi.rs

//! ABI fingerprinting from ELF dynamic sections
//!
//! For every ELF object in scope we extract the SONAME and the NEEDED
//! entries, render them in a stable order and hash the concatenation.
//! The scope is either a directory tree (staging root after a build,
//! target root after an install) or an explicit path set (one package's
//! installed files, used by the rebuild planner).

use crate::error::Result;
use crate::hash;
use goblin::elf::Elf;
use std::fs;
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

/// Dynamic-linkage summary of one ELF object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElfLinkage {
    pub soname: Option<String>,
    pub needed: Vec<String>,
}

/// Parse an ELF file's SONAME and NEEDED entries.
///
/// Returns `None` for non-ELF files and objects goblin cannot parse;
/// fingerprinting skips them rather than failing the scan.
pub fn linkage_of(path: &Path) -> Option<ElfLinkage> {
    let bytes = fs::read(path).ok()?;
    if bytes.len() < 4 || bytes[..4] != [0x7f, b'E', b'L', b'F'] {
        return None;
    }
    let elf = match Elf::parse(&bytes) {
        Ok(elf) => elf,
        Err(e) => {
            debug!("skipping unparseable ELF {}: {}", path.display(), e);
            return None;
        }
    };
    let mut needed: Vec<String> = elf.libraries.iter().map(|s| s.to_string()).collect();
    needed.sort();
    Some(ElfLinkage {
        soname: elf.soname.map(|s| s.to_string()),
        needed,
    })
}

/// ABI fingerprint of every ELF object under `root`
pub fn abi_of_dir(root: &Path) -> Result<String> {
    let mut files: Vec<_> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();
    files.sort();

    let mut dump = String::new();
    for file in &files {
        if let Some(linkage) = linkage_of(file) {
            let rel = file.strip_prefix(root).unwrap_or(file);
            push_line(&mut dump, &rel.display().to_string(), &linkage);
        }
    }
    Ok(hash::hash_str(&dump))
}

/// ABI fingerprint of explicit absolute manifest paths under `root`.
///
/// Missing paths are skipped; the fingerprint covers what is actually on
/// disk.
pub fn abi_of_paths(root: &Path, paths: &[&str]) -> Result<String> {
    let mut sorted: Vec<&str> = paths.to_vec();
    sorted.sort_unstable();

    let mut dump = String::new();
    for path in sorted {
        let on_disk = root.join(path.trim_start_matches('/'));
        if let Some(linkage) = linkage_of(&on_disk) {
            push_line(&mut dump, path, &linkage);
        }
    }
    Ok(hash::hash_str(&dump))
}

fn push_line(dump: &mut String, path: &str, linkage: &ElfLinkage) {
    dump.push_str(path);
    dump.push(' ');
    dump.push_str(linkage.soname.as_deref().unwrap_or("-"));
    dump.push(' ');
    dump.push_str(&linkage.needed.join(","));
    dump.push('\n');
}
