// src/recipe/format.rs

//! Recipe file format definitions
//!
//! Recipes are TOML files describing how one package is fetched, built and
//! installed. Sources and patches are positional pairs: the Nth entry of
//! `sha256` belongs to the Nth entry of `urls`. Stage procedures are plain
//! command arrays run by the build engine's subprocess runner; nothing in a
//! recipe is evaluated in-process.

use crate::version::Evr;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A complete package recipe
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Recipe {
    /// Identity and metadata
    pub package: PackageSection,

    /// Where the bits come from
    #[serde(default)]
    pub source: SourceSection,

    /// Stage command overrides (defaults used when absent)
    #[serde(default)]
    pub stages: StageSection,

    /// Capability flags
    #[serde(default)]
    pub options: OptionsSection,

    /// Variables exported into every stage environment
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Package identity section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageSection {
    pub name: String,

    #[serde(default)]
    pub epoch: u64,

    pub version: String,

    #[serde(default = "default_release")]
    pub release: String,

    #[serde(default)]
    pub summary: Option<String>,

    #[serde(default)]
    pub homepage: Option<String>,

    #[serde(default)]
    pub license: Option<String>,

    /// Runtime dependencies (package names)
    #[serde(default)]
    pub deps: Vec<String>,

    /// Build-time dependencies (package names)
    #[serde(default)]
    pub build_deps: Vec<String>,
}

fn default_release() -> String {
    "1".to_string()
}

/// Source acquisition section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceSection {
    /// Source archive URLs, in fetch order
    #[serde(default)]
    pub urls: Vec<String>,

    /// SHA-256 for each entry of `urls`, positionally
    #[serde(default)]
    pub sha256: Vec<String>,

    /// Patch URLs (or local store paths), in application order
    #[serde(default)]
    pub patches: Vec<String>,

    /// SHA-256 for each entry of `patches`, positionally
    #[serde(default)]
    pub patch_sha256: Vec<String>,

    /// Optional detached signature URL for the first source
    #[serde(default)]
    pub signature: Option<String>,

    /// Optional git origin instead of (or alongside) tarballs
    #[serde(default)]
    pub git: Option<GitSource>,
}

/// A git source pinned to a ref
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitSource {
    pub url: String,
    /// Tag, branch or commit; required for reproducibility, linted
    #[serde(default, rename = "ref")]
    pub reference: Option<String>,
}

/// Stage procedure overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageSection {
    /// Commands run before configure/build; default is a no-op
    #[serde(default)]
    pub prepare: Option<Vec<String>>,

    /// Build commands; default is `./configure --prefix=/usr` (when a
    /// configure script exists) followed by `make -jN`
    #[serde(default)]
    pub build: Option<Vec<String>>,

    /// Install commands; default is `make install` under the simulated-root
    /// helper with DESTDIR redirection
    #[serde(default)]
    pub install: Option<Vec<String>>,
}

/// Capability flags
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionsSection {
    /// Prefer running stages inside the chroot build area
    #[serde(default)]
    pub chroot: bool,

    /// Strip ELF binaries at package time
    #[serde(default = "default_true")]
    pub strip: bool,

    /// Pin SOURCE_DATE_EPOCH for reproducible output
    #[serde(default = "default_true")]
    pub reproducible: bool,

    /// Record resolved dep EVRs at build time for the rebuild planner
    #[serde(default = "default_true")]
    pub lock_deps: bool,
}

fn default_true() -> bool {
    true
}

impl Default for OptionsSection {
    fn default() -> Self {
        Self {
            chroot: false,
            strip: true,
            reproducible: true,
            lock_deps: true,
        }
    }
}

impl Recipe {
    /// The recipe's full EVR
    pub fn evr(&self) -> Evr {
        Evr::new(
            self.package.epoch,
            self.package.version.clone(),
            self.package.release.clone(),
        )
    }

    /// `true` when the recipe carries no sources and no git origin.
    ///
    /// Such recipes are only valid when they provide their own install
    /// commands (a pure-inline package).
    pub fn is_inline(&self) -> bool {
        self.source.urls.is_empty() && self.source.git.is_none()
    }

    /// Substitute recipe variables into a command string.
    ///
    /// Replaces `@name@`, `@version@`, `@release@` and `@destdir@`.
    pub fn substitute(&self, template: &str, destdir: &str) -> String {
        template
            .replace("@name@", &self.package.name)
            .replace("@version@", &self.package.version)
            .replace("@release@", &self.package.release)
            .replace("@destdir@", destdir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[package]
name = "zlib"
version = "1.3"
summary = "Compression library"
license = "Zlib"
deps = ["glibc"]
build_deps = ["make"]

[source]
urls = ["https://zlib.net/zlib-@version@.tar.xz"]
sha256 = ["8a9db542a6b6a55e7c84bbbeafdbd9016d8a542a9d9a1698e68fa9cf1e0d7365"]

[stages]
build = ["./configure --prefix=/usr", "make"]
install = ["make install DESTDIR=@destdir@"]

[options]
strip = true

[env]
CFLAGS = "-O2 -pipe"
"#;

    #[test]
    fn test_parse_sample() {
        let r: Recipe = toml::from_str(SAMPLE).unwrap();
        assert_eq!(r.package.name, "zlib");
        assert_eq!(r.package.epoch, 0);
        assert_eq!(r.package.release, "1");
        assert_eq!(r.package.deps, vec!["glibc"]);
        assert_eq!(r.source.urls.len(), 1);
        assert_eq!(r.source.sha256.len(), 1);
        assert!(r.options.strip);
        assert_eq!(r.env.get("CFLAGS").unwrap(), "-O2 -pipe");
    }

    #[test]
    fn test_evr() {
        let r: Recipe = toml::from_str(SAMPLE).unwrap();
        assert_eq!(r.evr().to_string(), "0:1.3-1");
    }

    #[test]
    fn test_substitute() {
        let r: Recipe = toml::from_str(SAMPLE).unwrap();
        let cmd = r.substitute("make install DESTDIR=@destdir@", "/stage");
        assert_eq!(cmd, "make install DESTDIR=/stage");
        assert_eq!(r.substitute("@name@-@version@", ""), "zlib-1.3");
    }

    #[test]
    fn test_minimal_inline_recipe() {
        let r: Recipe = toml::from_str(
            r#"
[package]
name = "filesystem"
version = "1.0"

[stages]
install = ["mkdir -p @destdir@/etc"]
"#,
        )
        .unwrap();
        assert!(r.is_inline());
        assert!(r.stages.install.is_some());
    }

    #[test]
    fn test_git_source_parses() {
        let r: Recipe = toml::from_str(
            r#"
[package]
name = "tool"
version = "0.5"

[source.git]
url = "https://example.com/tool.git"
ref = "v0.5"
"#,
        )
        .unwrap();
        let git = r.source.git.unwrap();
        assert_eq!(git.reference.as_deref(), Some("v0.5"));
    }

    #[test]
    fn test_options_defaults() {
        let opts = OptionsSection::default();
        assert!(!opts.chroot);
        assert!(opts.strip);
        assert!(opts.reproducible);
        assert!(opts.lock_deps);
    }
}
