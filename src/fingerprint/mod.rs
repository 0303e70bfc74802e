// src/fingerprint/mod.rs

//! Fingerprints: hashed summaries of build-relevant state
//!
//! Three fingerprints drive rebuild decisions, each the SHA-256 of a
//! canonical textual dump:
//!
//! - **toolchain** — version lines of the compiler, linker, assembler,
//!   archiver, ranlib and libc loader; a failed probe records the
//!   `<tool>?` sentinel so a broken tool still fingerprints stably.
//! - **environment** — a pinned subset of variables that influence
//!   builds (flags, search paths, PATH).
//! - **ABI** — SONAME/NEEDED of every ELF object in scope (see `abi`).

mod abi;
mod planner;

pub use abi::{abi_of_dir, abi_of_paths, linkage_of, ElfLinkage};
pub use planner::{CurrentState, Planner};

use crate::hash;
use crate::host;
use std::collections::BTreeMap;

/// Toolchain probes, in canonical dump order: `(label, program, probe arg)`
const TOOLCHAIN_PROBES: &[(&str, &str, &str)] = &[
    ("cc", "cc", "--version"),
    ("ld", "ld", "--version"),
    ("as", "as", "--version"),
    ("ar", "ar", "--version"),
    ("ranlib", "ranlib", "--version"),
    ("ldd", "ldd", "--version"),
];

/// Environment variables pinned into the environment fingerprint,
/// in canonical dump order
pub const PINNED_ENV: &[&str] = &[
    "CFLAGS",
    "CXXFLAGS",
    "CPPFLAGS",
    "LDFLAGS",
    "PKG_CONFIG_PATH",
    "LD_LIBRARY_PATH",
    "LIBRARY_PATH",
    "C_INCLUDE_PATH",
    "PATH",
];

/// Fingerprint of the host toolchain, probed live
pub fn toolchain_fingerprint() -> String {
    let mut dump = String::new();
    for (label, program, arg) in TOOLCHAIN_PROBES {
        let line = host::version_probe(program, arg)
            .unwrap_or_else(|| format!("{}?", label));
        dump.push_str(label);
        dump.push('=');
        dump.push_str(&line);
        dump.push('\n');
    }
    hash::hash_str(&dump)
}

/// Fingerprint of the pinned build environment, from the process env
pub fn environment_fingerprint() -> String {
    let vars: BTreeMap<String, String> = PINNED_ENV
        .iter()
        .filter_map(|name| std::env::var(name).ok().map(|v| (name.to_string(), v)))
        .collect();
    environment_fingerprint_of(&vars)
}

/// Fingerprint of an explicit variable map (testable core of the above)
pub fn environment_fingerprint_of(vars: &BTreeMap<String, String>) -> String {
    let mut dump = String::new();
    for name in PINNED_ENV {
        dump.push_str(name);
        dump.push('=');
        if let Some(value) = vars.get(*name) {
            dump.push_str(value);
        }
        dump.push('\n');
    }
    hash::hash_str(&dump)
}
