// tests/common/mod.rs

//! Shared test fixtures: a relocated mortar layout, a gzip packager (so
//! only tar + gzip are needed from the host) and staged-tree builders.

#![allow(dead_code)]

use mortar::{Compression, Database, Packager, Paths};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub struct TestEnv {
    /// Keep alive; owns every path below
    pub dir: TempDir,
    pub paths: Paths,
    pub db: Database,
    pub target_root: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let paths = Paths::under(&dir.path().join("mortar"));
        let db = Database::new(&paths);
        let target_root = dir.path().join("target");
        fs::create_dir_all(&target_root).unwrap();
        Self {
            dir,
            paths,
            db,
            target_root,
        }
    }

    pub fn packager(&self) -> Packager {
        Packager::new(self.paths.packages_dir(), self.paths.manifests_dir())
            .with_compression(Compression::Gzip)
            .with_strip(false)
    }

    /// Build a staging tree from `(relative path, content)` pairs.
    /// Parent directories are created implicitly.
    pub fn stage_tree(&self, files: &[(&str, &str)]) -> TempDir {
        let staging = TempDir::new_in(self.dir.path()).unwrap();
        for (rel, content) in files {
            let path = staging.path().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, content).unwrap();
        }
        staging
    }

    /// Write a recipe file into the user recipe store
    pub fn write_recipe(&self, name: &str, body: &str) {
        let dir = self.paths.user_recipes_dir();
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(format!("{}.recipe", name)), body).unwrap();
    }
}

/// Hash of a file on disk, for asserting install fidelity
pub fn sha256_of(path: &Path) -> String {
    mortar::hash::hash_file(path).unwrap()
}
