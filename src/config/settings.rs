// src/config/settings.rs

//! Key=value configuration loading
//!
//! Settings come from `/etc/mortar/config` plus drop-ins in
//! `/etc/mortar/config.d/*.conf`, applied in lexical order so later files
//! win. Lines are `key = value`; `#` starts a comment. Unrecognized keys
//! are warned about and ignored, never repurposed.

use crate::config::Paths;
use crate::error::{Error, Result};
use std::fs;
use std::path::Path;
use tracing::warn;

/// Recognized tunables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Log verbosity, 0..3
    pub verbosity: u8,
    /// Color mode for the terminal front-end
    pub color: ColorMode,
    /// Max parallel package builds; 0 means detect CPU count
    pub jobs: usize,
    /// Max parallel source fetches
    pub fetch_jobs: usize,
    /// Mirror roots tried after the primary URL, in order
    pub mirrors: Vec<String>,
    /// Timezone name used when rendering log timestamps
    pub log_timezone: String,
    /// Download retry attempts per URL
    pub retries: u32,
    /// Exponential backoff base, in seconds
    pub backoff_base: u64,
}

/// Terminal color behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorMode {
    #[default]
    Auto,
    Always,
    Never,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            verbosity: 1,
            color: ColorMode::Auto,
            jobs: 0,
            fetch_jobs: 4,
            mirrors: Vec::new(),
            log_timezone: "UTC".to_string(),
            retries: 3,
            backoff_base: 2,
        }
    }
}

impl Settings {
    /// Load settings from the configured layout.
    ///
    /// Missing files are fine; the defaults stand.
    pub fn load(paths: &Paths) -> Result<Self> {
        let mut settings = Settings::default();

        let main = paths.config_file();
        if main.is_file() {
            settings.apply_file(&main)?;
        }

        let dropin_dir = paths.config_dir();
        if dropin_dir.is_dir() {
            let mut dropins: Vec<_> = fs::read_dir(&dropin_dir)?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.extension().is_some_and(|e| e == "conf"))
                .collect();
            dropins.sort();
            for dropin in dropins {
                settings.apply_file(&dropin)?;
            }
        }

        Ok(settings)
    }

    /// Effective build-job count, detecting CPUs when configured as 0
    pub fn effective_jobs(&self) -> usize {
        if self.jobs > 0 {
            self.jobs
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }

    fn apply_file(&mut self, path: &Path) -> Result<()> {
        let text = fs::read_to_string(path)?;
        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                Error::Config(format!(
                    "{}:{}: expected key = value",
                    path.display(),
                    lineno + 1
                ))
            })?;
            self.apply(key.trim(), value.trim(), path, lineno + 1)?;
        }
        Ok(())
    }

    fn apply(&mut self, key: &str, value: &str, file: &Path, lineno: usize) -> Result<()> {
        let bad = |what: &str| {
            Error::Config(format!(
                "{}:{}: invalid {} value '{}'",
                file.display(),
                lineno,
                what,
                value
            ))
        };

        match key {
            "verbosity" => {
                let v: u8 = value.parse().map_err(|_| bad("verbosity"))?;
                if v > 3 {
                    return Err(bad("verbosity"));
                }
                self.verbosity = v;
            }
            "color" => {
                self.color = match value {
                    "auto" => ColorMode::Auto,
                    "always" => ColorMode::Always,
                    "never" => ColorMode::Never,
                    _ => return Err(bad("color")),
                };
            }
            "jobs" => self.jobs = value.parse().map_err(|_| bad("jobs"))?,
            "fetch_jobs" => {
                let n: usize = value.parse().map_err(|_| bad("fetch_jobs"))?;
                if n == 0 {
                    return Err(bad("fetch_jobs"));
                }
                self.fetch_jobs = n;
            }
            "mirrors" => {
                self.mirrors = value.split_whitespace().map(str::to_string).collect();
            }
            "log_timezone" => self.log_timezone = value.to_string(),
            "retries" => self.retries = value.parse().map_err(|_| bad("retries"))?,
            "backoff_base" => self.backoff_base = value.parse().map_err(|_| bad("backoff_base"))?,
            other => {
                warn!("{}:{}: unrecognized config key '{}'", file.display(), lineno, other);
            }
        }
        Ok(())
    }
}
