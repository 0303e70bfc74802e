// src/fetch/mod.rs

//! Source acquisition into the content-addressed cache
//!
//! Cached files are keyed by URL basename under the sources directory and
//! verified by SHA-256 before every use. A cached file that fails
//! verification is quarantined (renamed `<name>.bad.<timestamp>`) and
//! re-fetched; a second mismatch aborts. Downloads go to `<path>.part`
//! and rename into place only after the hash checks out, so readers never
//! observe a partial file. The downloader is invoked with resume enabled,
//! making leftover `.part` files useful rather than garbage.

mod git;

pub use git::{fetch_git, GitArchive};

use crate::error::{Error, Result};
use crate::hash;
use chrono::Utc;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default downloader argv prefix; destination and URL are appended.
///
/// `-C -` asks curl to resume a partial transfer when the server supports
/// ranges; `-f` turns HTTP errors into nonzero exits.
const DEFAULT_DOWNLOADER: &[&str] = &[
    "curl", "-f", "-L", "-sS", "--connect-timeout", "30", "-C", "-", "-o",
];

/// Source fetcher with mirror fallback and retry budget
#[derive(Debug, Clone)]
pub struct Fetcher {
    out_dir: PathBuf,
    mirrors: Vec<String>,
    retries: u32,
    backoff_base: u64,
    downloader: Vec<String>,
    parallel: usize,
}

impl Fetcher {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            mirrors: Vec::new(),
            retries: 3,
            backoff_base: 2,
            downloader: DEFAULT_DOWNLOADER.iter().map(|s| s.to_string()).collect(),
            parallel: 4,
        }
    }

    /// Mirror roots tried, in order, after the primary URL fails
    pub fn with_mirrors(mut self, mirrors: Vec<String>) -> Self {
        self.mirrors = mirrors;
        self
    }

    /// Download retry budget and exponential backoff base (seconds)
    pub fn with_retries(mut self, retries: u32, backoff_base: u64) -> Self {
        self.retries = retries;
        self.backoff_base = backoff_base;
        self
    }

    /// Replace the downloader argv prefix (tests use a shell shim)
    pub fn with_downloader(mut self, argv: Vec<String>) -> Self {
        self.downloader = argv;
        self
    }

    /// Parallel fetch cap for [`Fetcher::fetch_list`]
    pub fn with_parallel(mut self, n: usize) -> Self {
        self.parallel = n.max(1);
        self
    }

    /// Fetch one URL into the cache, returning the verified file path.
    ///
    /// A correctly-hashed cached copy short-circuits without touching the
    /// network at all.
    pub fn fetch_one(&self, url: &str, expected_sha256: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.out_dir)?;
        let filename = basename(url);
        let dest = self.out_dir.join(filename);
        let mut mismatches = 0u32;

        if dest.exists() {
            match hash::verify_file(&dest, expected_sha256)? {
                Ok(()) => {
                    debug!("cache hit: {}", dest.display());
                    return Ok(dest);
                }
                Err(actual) => {
                    warn!(
                        "cached {} hash mismatch (got {}), quarantining",
                        dest.display(),
                        &actual[..12]
                    );
                    quarantine(&dest)?;
                    mismatches += 1;
                }
            }
        }

        let mut candidates = vec![url.to_string()];
        for mirror in &self.mirrors {
            candidates.push(format!("{}/{}", mirror.trim_end_matches('/'), filename));
        }

        let part = dest.with_extension(part_extension(&dest));
        for attempt in 0..=self.retries {
            if attempt > 0 {
                let delay = self.backoff_base.saturating_mul(1 << (attempt - 1));
                debug!("retry {} for {} after {}s", attempt, url, delay);
                std::thread::sleep(Duration::from_secs(delay));
            }

            for candidate in &candidates {
                match self.download(candidate, &part) {
                    Err(e) => {
                        warn!("download failed: {}", e);
                        continue;
                    }
                    Ok(()) => {}
                }

                match hash::verify_file(&part, expected_sha256)? {
                    Ok(()) => {
                        fs::rename(&part, &dest)?;
                        info!("fetched {} -> {}", candidate, dest.display());
                        return Ok(dest);
                    }
                    Err(actual) => {
                        warn!("{} hash mismatch from {}", filename, candidate);
                        quarantine(&part)?;
                        mismatches += 1;
                        if mismatches >= 2 {
                            return Err(Error::HashMismatch {
                                path: dest,
                                expected: expected_sha256.to_string(),
                                actual,
                            });
                        }
                    }
                }
            }
        }

        Err(Error::FetchExhausted(url.to_string()))
    }

    /// Fetch every `<url> <sha256>` line of a list file, up to the
    /// configured number of fetches in flight at once.
    ///
    /// Returns the fetched paths in list order. The first failure is
    /// reported after in-flight fetches finish; later entries are skipped.
    pub fn fetch_list(&self, list: &Path) -> Result<Vec<PathBuf>> {
        let text = fs::read_to_string(list)?;
        let mut jobs = Vec::new();
        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (url, sha) = line.split_once(char::is_whitespace).ok_or_else(|| Error::Parse {
                file: list.display().to_string(),
                reason: format!("line {}: expected '<url> <sha256>'", lineno + 1),
            })?;
            jobs.push((url.to_string(), sha.trim().to_string()));
        }
        self.fetch_all(&jobs)
    }

    /// Parallel fetch of `(url, sha256)` pairs; results in input order
    pub fn fetch_all(&self, jobs: &[(String, String)]) -> Result<Vec<PathBuf>> {
        if jobs.is_empty() {
            return Ok(Vec::new());
        }

        let queue: Mutex<VecDeque<usize>> = Mutex::new((0..jobs.len()).collect());
        let results: Mutex<Vec<Option<Result<PathBuf>>>> =
            Mutex::new((0..jobs.len()).map(|_| None).collect());

        let workers = self.parallel.min(jobs.len());
        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let next = queue.lock().expect("fetch queue poisoned").pop_front();
                    let Some(idx) = next else { break };
                    let (url, sha) = &jobs[idx];
                    let outcome = self.fetch_one(url, sha);
                    results.lock().expect("fetch results poisoned")[idx] = Some(outcome);
                });
            }
        });

        let mut paths = Vec::with_capacity(jobs.len());
        for slot in results.into_inner().expect("fetch results poisoned") {
            match slot {
                Some(Ok(path)) => paths.push(path),
                Some(Err(e)) => return Err(e),
                None => unreachable!("worker exited without recording a result"),
            }
        }
        Ok(paths)
    }

    /// Fetch a file that carries no recorded hash (detached signatures).
    ///
    /// No verification, no quarantine: the signature check itself is the
    /// integrity gate for these.
    pub fn fetch_unverified(&self, url: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.out_dir)?;
        let dest = self.out_dir.join(basename(url));
        if dest.exists() {
            return Ok(dest);
        }
        let part = dest.with_extension(part_extension(&dest));
        for candidate in std::iter::once(url.to_string()).chain(
            self.mirrors
                .iter()
                .map(|m| format!("{}/{}", m.trim_end_matches('/'), basename(url))),
        ) {
            if self.download(&candidate, &part).is_ok() {
                fs::rename(&part, &dest)?;
                return Ok(dest);
            }
        }
        Err(Error::FetchExhausted(url.to_string()))
    }

    /// Verify a detached signature with the host gpg against the trust
    /// directory. Only called when a recipe declares a signature URL.
    pub fn verify_signature(&self, file: &Path, sig: &Path, keys_dir: &Path) -> Result<()> {
        crate::host::require("gpg")?;
        let status = Command::new("gpg")
            .env("GNUPGHOME", keys_dir)
            .arg("--verify")
            .arg(sig)
            .arg(file)
            .output()?;
        if !status.status.success() {
            warn!(
                "signature check failed for {}: {}",
                file.display(),
                String::from_utf8_lossy(&status.stderr).trim()
            );
            return Err(Error::SignatureInvalid(file.to_path_buf()));
        }
        Ok(())
    }

    fn download(&self, url: &str, dest: &Path) -> Result<()> {
        let (program, prefix) = self
            .downloader
            .split_first()
            .ok_or_else(|| Error::Config("empty downloader command".into()))?;

        let output = Command::new(program)
            .args(prefix)
            .arg(dest)
            .arg(url)
            .output()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::MissingHostCommand(program.clone())
                } else {
                    Error::Io(e)
                }
            })?;

        if !output.status.success() {
            return Err(Error::Network {
                url: url.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        if !dest.exists() {
            return Err(Error::Network {
                url: url.to_string(),
                reason: "downloader produced no output file".to_string(),
            });
        }
        Ok(())
    }
}

/// URL basename, used as the cache key
pub fn basename(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

/// Move a bad file aside as `<name>.bad.<timestamp>`
fn quarantine(path: &Path) -> Result<PathBuf> {
    let stamp = Utc::now().format("%Y%m%d%H%M%S%f");
    let target = PathBuf::from(format!("{}.bad.{}", path.display(), stamp));
    fs::rename(path, &target)?;
    Ok(target)
}

fn part_extension(dest: &Path) -> String {
    match dest.extension() {
        Some(ext) => format!("{}.part", ext.to_string_lossy()),
        None => "part".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// A downloader shim: copies the "URL" (a plain path) to the
    /// destination, so tests exercise the full pipeline without a network.
    fn shim(dir: &Path) -> Vec<String> {
        let script = dir.join("fake-dl");
        fs::write(&script, "#!/bin/sh\ncp \"$2\" \"$1\"\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        vec![script.display().to_string()]
    }

    /// A downloader that always fails
    fn broken_shim(dir: &Path) -> Vec<String> {
        let script = dir.join("broken-dl");
        fs::write(&script, "#!/bin/sh\nexit 7\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        vec![script.display().to_string()]
    }

    #[test]
    fn test_cache_hit_no_network() {
        let dir = TempDir::new().unwrap();
        let cache = dir.path().join("cache");
        fs::create_dir_all(&cache).unwrap();
        fs::write(cache.join("zlib-1.3.tar.xz"), b"bits").unwrap();
        let sha = hash::hash_bytes(b"bits");

        // A broken downloader proves the cache path never touches it
        let fetcher = Fetcher::new(&cache)
            .with_downloader(broken_shim(dir.path()))
            .with_retries(0, 0);
        let path = fetcher
            .fetch_one("https://example.com/zlib-1.3.tar.xz", &sha)
            .unwrap();
        assert_eq!(path, cache.join("zlib-1.3.tar.xz"));
    }

    #[test]
    fn test_download_and_verify() {
        let dir = TempDir::new().unwrap();
        let upstream = dir.path().join("upstream");
        fs::create_dir_all(&upstream).unwrap();
        fs::write(upstream.join("src.tar.gz"), b"tarball").unwrap();
        let sha = hash::hash_bytes(b"tarball");

        let fetcher = Fetcher::new(dir.path().join("cache"))
            .with_downloader(shim(dir.path()))
            .with_retries(0, 0);
        let path = fetcher
            .fetch_one(&format!("{}/src.tar.gz", upstream.display()), &sha)
            .unwrap();
        assert_eq!(fs::read(path).unwrap(), b"tarball");
    }

    #[test]
    fn test_bad_cache_quarantined_then_refetched() {
        let dir = TempDir::new().unwrap();
        let upstream = dir.path().join("upstream");
        fs::create_dir_all(&upstream).unwrap();
        fs::write(upstream.join("src.tar.gz"), b"good").unwrap();
        let sha = hash::hash_bytes(b"good");

        let cache = dir.path().join("cache");
        fs::create_dir_all(&cache).unwrap();
        fs::write(cache.join("src.tar.gz"), b"corrupt").unwrap();

        let fetcher = Fetcher::new(&cache)
            .with_downloader(shim(dir.path()))
            .with_retries(0, 0);
        let path = fetcher
            .fetch_one(&format!("{}/src.tar.gz", upstream.display()), &sha)
            .unwrap();
        assert_eq!(fs::read(path).unwrap(), b"good");

        // quarantined copy kept for diagnosis
        let bad: Vec<_> = fs::read_dir(&cache)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".bad."))
            .collect();
        assert_eq!(bad.len(), 1);
    }

    #[test]
    fn test_second_mismatch_aborts() {
        let dir = TempDir::new().unwrap();
        let upstream = dir.path().join("upstream");
        fs::create_dir_all(&upstream).unwrap();
        // upstream serves wrong bytes forever
        fs::write(upstream.join("src.tar.gz"), b"wrong").unwrap();

        let cache = dir.path().join("cache");
        fs::create_dir_all(&cache).unwrap();
        fs::write(cache.join("src.tar.gz"), b"also wrong").unwrap();

        let fetcher = Fetcher::new(&cache)
            .with_downloader(shim(dir.path()))
            .with_retries(2, 0);
        let err = fetcher
            .fetch_one(
                &format!("{}/src.tar.gz", upstream.display()),
                &hash::hash_bytes(b"expected"),
            )
            .unwrap_err();
        assert!(matches!(err, Error::HashMismatch { .. }));
    }

    #[test]
    fn test_mirror_fallback() {
        let dir = TempDir::new().unwrap();
        let mirror = dir.path().join("mirror");
        fs::create_dir_all(&mirror).unwrap();
        fs::write(mirror.join("src.tar.gz"), b"mirrored").unwrap();
        let sha = hash::hash_bytes(b"mirrored");

        // primary URL points at a path that does not exist
        let fetcher = Fetcher::new(dir.path().join("cache"))
            .with_downloader(shim(dir.path()))
            .with_mirrors(vec![mirror.display().to_string()])
            .with_retries(0, 0);
        let path = fetcher
            .fetch_one(&format!("{}/missing/src.tar.gz", dir.path().display()), &sha)
            .unwrap();
        assert_eq!(fs::read(path).unwrap(), b"mirrored");
    }

    #[test]
    fn test_exhaustion() {
        let dir = TempDir::new().unwrap();
        let fetcher = Fetcher::new(dir.path().join("cache"))
            .with_downloader(broken_shim(dir.path()))
            .with_retries(1, 0);
        let err = fetcher
            .fetch_one("https://example.com/gone.tar.gz", &hash::hash_bytes(b"x"))
            .unwrap_err();
        assert!(matches!(err, Error::FetchExhausted(_)));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_fetch_list_parallel() {
        let dir = TempDir::new().unwrap();
        let upstream = dir.path().join("upstream");
        fs::create_dir_all(&upstream).unwrap();

        let mut lines = String::new();
        for i in 0..6 {
            let name = format!("pkg{}.tar.gz", i);
            let body = format!("bits-{}", i);
            fs::write(upstream.join(&name), body.as_bytes()).unwrap();
            lines.push_str(&format!(
                "{}/{} {}\n",
                upstream.display(),
                name,
                hash::hash_bytes(body.as_bytes())
            ));
        }
        let list = dir.path().join("sources.list");
        fs::write(&list, lines).unwrap();

        let fetcher = Fetcher::new(dir.path().join("cache"))
            .with_downloader(shim(dir.path()))
            .with_parallel(3)
            .with_retries(0, 0);
        let paths = fetcher.fetch_list(&list).unwrap();
        assert_eq!(paths.len(), 6);
        // input order preserved
        assert!(paths[0].to_string_lossy().ends_with("pkg0.tar.gz"));
        assert!(paths[5].to_string_lossy().ends_with("pkg5.tar.gz"));
    }

    #[test]
    fn test_basename() {
        assert_eq!(basename("https://zlib.net/zlib-1.3.tar.xz"), "zlib-1.3.tar.xz");
        assert_eq!(basename("plain-name"), "plain-name");
    }
}
