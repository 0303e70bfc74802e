// src/db/mod.rs

//! On-disk database of installed packages
//!
//! Plain files, one concern per directory: `installed/<name>.meta` records,
//! manifests, built archives, history logs, rollback bundles and deltas.
//! Writes go through temp-then-rename so a reader sees either the old
//! record or the new one. Reads tolerate missing files and return `None`;
//! callers turn absence into domain errors where it matters.

mod history;
mod record;

pub use history::{Action, Event, History};
pub use record::{BuiltRecord, InstalledRecord};

use crate::config::Paths;
use crate::error::{Error, Result};
use crate::fsutil;
use crate::graph::DepGraph;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

/// Facade over the state directories
#[derive(Debug, Clone)]
pub struct Database {
    paths: Paths,
    history: History,
}

impl Database {
    pub fn new(paths: &Paths) -> Self {
        Self {
            paths: paths.clone(),
            history: History::new(paths.history_dir()),
        }
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    // --- installed records ---

    fn meta_path(&self, name: &str) -> PathBuf {
        self.paths.installed_dir().join(format!("{}.meta", name))
    }

    fn built_path(&self, name: &str) -> PathBuf {
        self.paths.installed_dir().join(format!("{}.built", name))
    }

    /// Write (or overwrite) the installed record for a name
    pub fn write_installed(&self, record: &InstalledRecord) -> Result<()> {
        let text = toml::to_string_pretty(record)
            .map_err(|e| Error::Db(format!("encoding record for {}: {}", record.name, e)))?;
        fsutil::write_atomic(&self.meta_path(&record.name), text.as_bytes())?;
        debug!("recorded install of {}-{}", record.name, record.evr);
        Ok(())
    }

    /// Read the installed record for a name, `None` when not installed
    pub fn read_installed(&self, name: &str) -> Result<Option<InstalledRecord>> {
        let path = self.meta_path(name);
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path)?;
        let record = toml::from_str(&text)
            .map_err(|e| Error::Db(format!("corrupt record {}: {}", path.display(), e)))?;
        Ok(Some(record))
    }

    /// Installed record or a NotFound domain error
    pub fn require_installed(&self, name: &str) -> Result<InstalledRecord> {
        self.read_installed(name)?
            .ok_or_else(|| Error::NotFound(format!("package '{}' is not installed", name)))
    }

    pub fn remove_installed(&self, name: &str) -> Result<()> {
        let path = self.meta_path(name);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    /// All installed records, sorted by name
    pub fn list_installed(&self) -> Result<Vec<InstalledRecord>> {
        let dir = self.paths.installed_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut records = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "meta") {
                let text = fs::read_to_string(&path)?;
                let record: InstalledRecord = toml::from_str(&text)
                    .map_err(|e| Error::Db(format!("corrupt record {}: {}", path.display(), e)))?;
                records.push(record);
            }
        }
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    // --- built-but-not-installed markers ---

    pub fn write_built(&self, record: &BuiltRecord) -> Result<()> {
        let text = toml::to_string_pretty(record)
            .map_err(|e| Error::Db(format!("encoding built record: {}", e)))?;
        fsutil::write_atomic(&self.built_path(&record.name), text.as_bytes())
    }

    pub fn read_built(&self, name: &str) -> Result<Option<BuiltRecord>> {
        let path = self.built_path(name);
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path)?;
        let record = toml::from_str(&text)
            .map_err(|e| Error::Db(format!("corrupt built record {}: {}", path.display(), e)))?;
        Ok(Some(record))
    }

    pub fn clear_built(&self, name: &str) -> Result<()> {
        let path = self.built_path(name);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    // --- graph views ---

    /// Dependency graph over every installed package.
    ///
    /// Edges to packages that are not installed are kept as nodes so the
    /// planner sees them; they simply have no record.
    pub fn installed_graph(&self) -> Result<DepGraph> {
        let records = self.list_installed()?;
        let mut graph = DepGraph::new();
        for record in &records {
            graph.add_node(&record.name);
            for dep in &record.deps {
                graph.add_edge(&record.name, dep);
            }
        }
        Ok(graph)
    }

    /// Installed packages that declare `name` as a runtime dependency
    pub fn reverse_deps(&self, name: &str) -> Result<Vec<String>> {
        let mut dependents: Vec<String> = self
            .list_installed()?
            .into_iter()
            .filter(|r| r.deps.iter().any(|d| d == name))
            .map(|r| r.name)
            .collect();
        dependents.sort();
        Ok(dependents)
    }

    // --- global toolchain fingerprint ---

    /// Previously observed toolchain fingerprint, if any
    pub fn read_toolchain_fingerprint(&self) -> Result<Option<String>> {
        let path = self.paths.toolchain_fingerprint_file();
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(&path)?.trim().to_string()))
    }

    pub fn write_toolchain_fingerprint(&self, fingerprint: &str) -> Result<()> {
        fsutil::write_atomic(
            &self.paths.toolchain_fingerprint_file(),
            format!("{}\n", fingerprint).as_bytes(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::Evr;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn record(name: &str, evr: &str, deps: &[&str]) -> InstalledRecord {
        InstalledRecord {
            name: name.into(),
            evr: Evr::parse(evr).unwrap(),
            target_root: "/t".into(),
            archive_path: format!("/p/{}.tar.zst", name).into(),
            manifest_path: format!("/m/{}.manifest", name).into(),
            install_time: Utc::now(),
            build_time: Utc::now(),
            deps: deps.iter().map(|s| s.to_string()).collect(),
            dep_versions: BTreeMap::new(),
            env_fingerprint: String::new(),
            abi_fingerprint: String::new(),
            toolchain_fingerprint: String::new(),
        }
    }

    fn test_db() -> (TempDir, Database) {
        let dir = TempDir::new().unwrap();
        let paths = Paths::under(dir.path());
        (dir, Database::new(&paths))
    }

    #[test]
    fn test_write_read_remove() {
        let (_dir, db) = test_db();
        let r = record("zlib", "1.3", &[]);
        db.write_installed(&r).unwrap();

        let read = db.read_installed("zlib").unwrap().unwrap();
        assert_eq!(read, r);

        db.remove_installed("zlib").unwrap();
        assert!(db.read_installed("zlib").unwrap().is_none());
    }

    #[test]
    fn test_one_record_per_name() {
        let (_dir, db) = test_db();
        db.write_installed(&record("zlib", "1.3", &[])).unwrap();
        db.write_installed(&record("zlib", "1.3.1", &[])).unwrap();

        let all = db.list_installed().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].evr, Evr::parse("1.3.1").unwrap());
    }

    #[test]
    fn test_require_installed_maps_absence() {
        let (_dir, db) = test_db();
        let err = db.require_installed("ghost").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_reverse_deps() {
        let (_dir, db) = test_db();
        db.write_installed(&record("zlib", "1.3", &[])).unwrap();
        db.write_installed(&record("libpng", "1.6", &["zlib"])).unwrap();
        db.write_installed(&record("curl", "8.0", &["zlib", "openssl"])).unwrap();

        assert_eq!(db.reverse_deps("zlib").unwrap(), vec!["curl", "libpng"]);
        assert!(db.reverse_deps("libpng").unwrap().is_empty());
    }

    #[test]
    fn test_installed_graph_orders_deps_first() {
        let (_dir, db) = test_db();
        db.write_installed(&record("app", "1.0", &["libpng"])).unwrap();
        db.write_installed(&record("libpng", "1.6", &["zlib"])).unwrap();
        db.write_installed(&record("zlib", "1.3", &[])).unwrap();

        let order = db.installed_graph().unwrap().topo_order().unwrap();
        let pos = |n: &str| order.iter().position(|x| x == n).unwrap();
        assert!(pos("zlib") < pos("libpng"));
        assert!(pos("libpng") < pos("app"));
    }

    #[test]
    fn test_built_marker_lifecycle() {
        let (_dir, db) = test_db();
        let built = BuiltRecord {
            name: "zlib".into(),
            evr: Evr::parse("1.3").unwrap(),
            archive_path: "/p/zlib-1.3-1.tar.zst".into(),
            manifest_path: "/m/zlib-0:1.3-1.manifest".into(),
            build_time: Utc::now(),
            deps: Vec::new(),
            dep_versions: BTreeMap::new(),
            env_fingerprint: String::new(),
            abi_fingerprint: String::new(),
            toolchain_fingerprint: String::new(),
        };
        db.write_built(&built).unwrap();
        assert_eq!(db.read_built("zlib").unwrap().unwrap(), built);
        db.clear_built("zlib").unwrap();
        assert!(db.read_built("zlib").unwrap().is_none());
    }

    #[test]
    fn test_toolchain_fingerprint_first_observation() {
        let (_dir, db) = test_db();
        assert!(db.read_toolchain_fingerprint().unwrap().is_none());
        db.write_toolchain_fingerprint("abc123").unwrap();
        assert_eq!(db.read_toolchain_fingerprint().unwrap().unwrap(), "abc123");
    }
}
