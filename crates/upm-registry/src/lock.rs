//! Advisory per-package publish lock.
//!
//! Two publishes of the same package race on the manifest's
//! read-modify-write. A lock file next to the package directory,
//! created with create-new semantics, serializes them. The lock is
//! released by deleting the file on drop.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::{RegistryError, Result};
use crate::storage::Storage;

/// Default time to wait for a contended lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A held publish lock for one package.
#[derive(Debug)]
pub struct PackageLock {
    path: PathBuf,
}

impl PackageLock {
    /// Acquire the lock for `name`, waiting up to `timeout`.
    pub fn acquire(storage: &Storage, name: &str, timeout: Duration) -> Result<Self> {
        let path = lock_path(storage, name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let start = Instant::now();
        let mut warned = false;
        loop {
            match try_create(&path) {
                Ok(()) => {
                    if warned {
                        tracing::info!(
                            lock = %path.display(),
                            waited_ms = start.elapsed().as_millis() as u64,
                            "lock acquired after contention"
                        );
                    }
                    return Ok(PackageLock { path });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if !warned {
                        tracing::warn!(lock = %path.display(), "package is locked, waiting");
                        warned = true;
                    }
                }
                Err(e) => return Err(e.into()),
            }

            if start.elapsed() >= timeout {
                return Err(RegistryError::Locked {
                    name: name.to_string(),
                    path,
                });
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Get the lock file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PackageLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(lock = %self.path.display(), error = %e, "could not release lock");
        }
    }
}

fn lock_path(storage: &Storage, name: &str) -> PathBuf {
    let dir = storage.package_dir(name);
    let mut file = dir.into_os_string();
    file.push(".lock");
    PathBuf::from(file)
}

fn try_create(path: &Path) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    writeln!(file, "{}", std::process::id())
}
