// src/lock.rs

//! Named exclusive locks with timeout
//!
//! Each lock is an `flock(2)`-held file under the locks directory, so at
//! most one holder per name exists across all processes on the host. Locks
//! are advisory between cooperating mortar processes; a dead process's
//! locks vanish with its file descriptors, which is all the dead-holder
//! handling we do.
//!
//! Acquisition polls `try_lock_exclusive` with a short capped backoff
//! until the deadline, then fails with `LockTimeout`. The guard releases
//! on drop, which covers every exit path including unwinding panics.

use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{self, File};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Default timeout for install/uninstall operations
pub const INSTALL_TIMEOUT: Duration = Duration::from_secs(3600);
/// Default timeout for build operations
pub const BUILD_TIMEOUT: Duration = Duration::from_secs(7200);

/// Poll interval starts here and doubles up to [`MAX_POLL`]
const INITIAL_POLL: Duration = Duration::from_millis(50);
const MAX_POLL: Duration = Duration::from_millis(1000);

/// A held named lock; released on drop
pub struct LockGuard {
    // Kept open to maintain the flock
    _file: File,
    name: String,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        trace!("released lock '{}'", self.name);
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard").field("name", &self.name).finish()
    }
}

/// Factory for named locks rooted at a locks directory
#[derive(Debug, Clone)]
pub struct LockSet {
    dir: PathBuf,
}

impl LockSet {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Acquire the named lock, waiting up to `timeout`.
    ///
    /// Fails with [`Error::LockTimeout`] when the deadline passes without
    /// the lock becoming free.
    pub fn acquire(&self, name: &str, timeout: Duration) -> Result<LockGuard> {
        fs::create_dir_all(&self.dir)?;
        let path = self.lock_path(name);
        let file = File::create(&path)?;

        let deadline = Instant::now() + timeout;
        let mut poll = INITIAL_POLL;

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    debug!("acquired lock '{}'", name);
                    return Ok(LockGuard {
                        _file: file,
                        name: name.to_string(),
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(Error::LockTimeout(name.to_string()));
                    }
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    std::thread::sleep(poll.min(remaining));
                    poll = (poll * 2).min(MAX_POLL);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Non-blocking probe: is the named lock currently held by anyone?
    pub fn is_held(&self, name: &str) -> bool {
        let path = self.lock_path(name);
        if !path.exists() {
            return false;
        }
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(_) => return false,
        };
        match file.try_lock_exclusive() {
            Ok(()) => {
                let _ = fs2::FileExt::unlock(&file);
                false
            }
            Err(_) => true,
        }
    }

    fn lock_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", name))
    }
}

/// Lock name for building a package
pub fn build_lock(pkg: &str) -> String {
    format!("build-{}", pkg)
}

/// Lock name for installing a package
pub fn install_lock(pkg: &str) -> String {
    format!("install-{}", pkg)
}

/// Lock name for uninstalling a package
pub fn uninstall_lock(pkg: &str) -> String {
    format!("uninstall-{}", pkg)
}

/// Lock name for whole-world update runs
pub fn update_all_lock() -> String {
    "update-all".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_and_release() {
        let dir = TempDir::new().unwrap();
        let locks = LockSet::new(dir.path());

        let guard = locks.acquire("build-zlib", Duration::from_secs(1)).unwrap();
        assert!(locks.is_held("build-zlib"));
        drop(guard);
        assert!(!locks.is_held("build-zlib"));
    }

    #[test]
    fn test_timeout_when_held() {
        let dir = TempDir::new().unwrap();
        let locks = LockSet::new(dir.path());

        let _guard = locks.acquire("install-zlib", Duration::from_secs(1)).unwrap();
        let err = locks
            .acquire("install-zlib", Duration::from_millis(120))
            .unwrap_err();
        match err {
            Error::LockTimeout(name) => assert_eq!(name, "install-zlib"),
            other => panic!("expected LockTimeout, got {:?}", other),
        }
    }

    #[test]
    fn test_distinct_names_do_not_conflict() {
        let dir = TempDir::new().unwrap();
        let locks = LockSet::new(dir.path());

        let _a = locks.acquire("build-a", Duration::from_secs(1)).unwrap();
        let _b = locks.acquire("build-b", Duration::from_secs(1)).unwrap();
        assert!(locks.is_held("build-a"));
        assert!(locks.is_held("build-b"));
    }

    #[test]
    fn test_reacquire_after_drop() {
        let dir = TempDir::new().unwrap();
        let locks = LockSet::new(dir.path());

        drop(locks.acquire("update-all", Duration::from_secs(1)).unwrap());
        let again = locks.acquire("update-all", Duration::from_millis(200));
        assert!(again.is_ok());
    }

    #[test]
    fn test_lock_names() {
        assert_eq!(build_lock("gcc"), "build-gcc");
        assert_eq!(install_lock("gcc"), "install-gcc");
        assert_eq!(uninstall_lock("gcc"), "uninstall-gcc");
        assert_eq!(update_all_lock(), "update-all");
    }
}
