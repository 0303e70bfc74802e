// src/config/paths.rs

//! Centralized path derivation for mortar directories
//!
//! Every on-disk location is derived from four roots (config, cache, state,
//! system share), each overridable through an environment variable so tests
//! and bootstrap roots can relocate the whole tree.

use std::env;
use std::path::{Path, PathBuf};

/// Default configuration root
pub const DEFAULT_CONFIG_ROOT: &str = "/etc/mortar";
/// Default cache root (sources, git tarballs)
pub const DEFAULT_CACHE_ROOT: &str = "/var/cache/mortar";
/// Default state root (database, packages, history)
pub const DEFAULT_STATE_ROOT: &str = "/var/lib/mortar";
/// Default read-only system recipe store
pub const DEFAULT_SYSTEM_SHARE: &str = "/usr/local/share/mortar";

/// Resolved directory layout
#[derive(Debug, Clone)]
pub struct Paths {
    pub config_root: PathBuf,
    pub cache_root: PathBuf,
    pub state_root: PathBuf,
    pub system_share: PathBuf,
}

impl Paths {
    /// Resolve the layout from the environment, falling back to defaults.
    ///
    /// Overrides: `MORTAR_CONFIG`, `MORTAR_CACHE`, `MORTAR_STATE`,
    /// `MORTAR_SHARE`.
    pub fn from_env() -> Self {
        Self {
            config_root: env_path("MORTAR_CONFIG", DEFAULT_CONFIG_ROOT),
            cache_root: env_path("MORTAR_CACHE", DEFAULT_CACHE_ROOT),
            state_root: env_path("MORTAR_STATE", DEFAULT_STATE_ROOT),
            system_share: env_path("MORTAR_SHARE", DEFAULT_SYSTEM_SHARE),
        }
    }

    /// Layout rooted under a single directory (used by tests and chroots)
    pub fn under(root: &Path) -> Self {
        Self {
            config_root: root.join("etc"),
            cache_root: root.join("cache"),
            state_root: root.join("lib"),
            system_share: root.join("share"),
        }
    }

    // --- configuration ---

    /// Main key=value configuration file
    pub fn config_file(&self) -> PathBuf {
        self.config_root.join("config")
    }

    /// Drop-in configuration directory (`*.conf`, lexical order)
    pub fn config_dir(&self) -> PathBuf {
        self.config_root.join("config.d")
    }

    /// Hook scripts for a pipeline point, e.g. `pre-build.d`
    pub fn hook_dir(&self, point: &str) -> PathBuf {
        self.config_root.join("hooks").join(format!("{}.d", point))
    }

    /// Trust material for optional signature checks
    pub fn keys_dir(&self) -> PathBuf {
        self.config_root.join("keys")
    }

    // --- cache ---

    /// Fetched source tarballs
    pub fn sources_dir(&self) -> PathBuf {
        self.cache_root.join("sources")
    }

    /// Git-derived deterministic archives
    pub fn tarballs_dir(&self) -> PathBuf {
        self.cache_root.join("tarballs")
    }

    // --- state ---

    /// Named exclusive locks
    pub fn locks_dir(&self) -> PathBuf {
        self.state_root.join("locks")
    }

    /// Installed records (`<name>.meta`)
    pub fn installed_dir(&self) -> PathBuf {
        self.state_root.join("db").join("installed")
    }

    /// Per-package manifests (`<name>-<evr>.manifest`)
    pub fn manifests_dir(&self) -> PathBuf {
        self.state_root.join("manifests")
    }

    /// Built package archives
    pub fn packages_dir(&self) -> PathBuf {
        self.state_root.join("packages")
    }

    /// User-writable recipe store
    pub fn user_recipes_dir(&self) -> PathBuf {
        self.state_root.join("recipes")
    }

    /// Read-only system recipe store
    pub fn system_recipes_dir(&self) -> PathBuf {
        self.system_share.join("recipes")
    }

    /// Append-only per-package event logs
    pub fn history_dir(&self) -> PathBuf {
        self.state_root.join("history")
    }

    /// Rollback bundles, keyed `<name>/<evr>/`
    pub fn rollback_dir(&self) -> PathBuf {
        self.state_root.join("rollback")
    }

    /// Manifest deltas, keyed `<name>/<old>__to__<new>.delta`
    pub fn delta_dir(&self) -> PathBuf {
        self.state_root.join("delta")
    }

    /// Stored global toolchain fingerprint
    pub fn toolchain_fingerprint_file(&self) -> PathBuf {
        self.state_root.join("db").join("toolchain.fp")
    }

    /// Scratch area for builds and staged installs
    pub fn work_dir(&self) -> PathBuf {
        self.state_root.join("work")
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::from_env()
    }
}

fn env_path(var: &str, default: &str) -> PathBuf {
    env::var_os(var)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(default))
}
