// src/db/record.rs

//! Installed and built package records
//!
//! One `.meta` file per installed name, TOML-encoded, overwritten on
//! upgrade. The record carries everything the rebuild planner and
//! rollback machinery need without consulting the package archive:
//! manifest location, declared deps, the dep EVRs resolved at build time
//! and the three fingerprints.

use crate::version::Evr;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Metadata for one installed package
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstalledRecord {
    pub name: String,
    pub evr: Evr,
    /// Root the package was overlaid onto
    pub target_root: PathBuf,
    /// Archive the installation came from (may be garbage-collected later)
    pub archive_path: PathBuf,
    pub manifest_path: PathBuf,
    pub install_time: DateTime<Utc>,
    pub build_time: DateTime<Utc>,
    /// Declared runtime dependency names
    #[serde(default)]
    pub deps: Vec<String>,
    /// `dep -> EVR` as resolved when this package was built
    #[serde(default)]
    pub dep_versions: BTreeMap<String, String>,
    #[serde(default)]
    pub env_fingerprint: String,
    #[serde(default)]
    pub abi_fingerprint: String,
    #[serde(default)]
    pub toolchain_fingerprint: String,
}

/// Marker for a package that was built but not yet installed.
///
/// Carries the same build-time facts as the installed record so an
/// install can adopt them wholesale.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BuiltRecord {
    pub name: String,
    pub evr: Evr,
    pub archive_path: PathBuf,
    pub manifest_path: PathBuf,
    pub build_time: DateTime<Utc>,
    #[serde(default)]
    pub deps: Vec<String>,
    #[serde(default)]
    pub dep_versions: BTreeMap<String, String>,
    #[serde(default)]
    pub env_fingerprint: String,
    #[serde(default)]
    pub abi_fingerprint: String,
    #[serde(default)]
    pub toolchain_fingerprint: String,
}
