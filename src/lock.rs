//! Writer locks per symbol and day
//!
//! Advisory file locks through fd-lock. A lock is held for as long as its
//! file handle stays open; releasing removes the lock file and closes the
//! handle. Acquisition blocks without a timeout.
//!
//! A held lock belongs to the thread that acquired it. Other threads sharing
//! the same manager wait on their own file handle like any other process.

use crate::layout::lock_key;
use crate::Result;
use chrono::NaiveDate;
use fd_lock::RwLock;
use std::collections::HashMap;
use std::fs::{File, Metadata, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use tracing::{debug, info, warn};

struct HeldLock {
    owner: ThreadId,
    lock: RwLock<File>,
}

/// Exclusive writer locks keyed by `symbol_YYYYMMDD`
pub struct FileLockManager {
    locks_dir: PathBuf,
    held: Mutex<HashMap<String, HeldLock>>,
}

impl FileLockManager {
    /// Manager storing lock files in `locks_dir`
    pub fn new<P: Into<PathBuf>>(locks_dir: P) -> Self {
        Self {
            locks_dir: locks_dir.into(),
            held: Mutex::new(HashMap::new()),
        }
    }

    /// Lock key of `symbol` on `date`
    pub fn lock_key(symbol: &str, date: NaiveDate) -> String {
        lock_key(symbol, date)
    }

    /// Lock file path of `symbol` on `date`
    pub fn lock_path(&self, symbol: &str, date: NaiveDate) -> PathBuf {
        self.locks_dir
            .join(format!("{}.lck", Self::lock_key(symbol, date)))
    }

    fn held(&self) -> MutexGuard<'_, HashMap<String, HeldLock>> {
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether any thread of this manager holds the lock
    pub fn is_held(&self, symbol: &str, date: NaiveDate) -> bool {
        self.held().contains_key(&Self::lock_key(symbol, date))
    }

    /// Block until the lock is acquired.
    ///
    /// Returns `false` without blocking if the calling thread already holds
    /// it. Other threads of the same manager block until it is released.
    pub fn acquire_lock(&self, symbol: &str, date: NaiveDate) -> Result<bool> {
        self.acquire(symbol, date, true)
    }

    /// Acquire the lock only if nobody holds it; returns `false` otherwise
    pub fn try_acquire_lock(&self, symbol: &str, date: NaiveDate) -> Result<bool> {
        self.acquire(symbol, date, false)
    }

    fn acquire(&self, symbol: &str, date: NaiveDate, blocking: bool) -> Result<bool> {
        let key = Self::lock_key(symbol, date);
        let owner = self.held().get(&key).map(|h| h.owner);
        match owner {
            Some(owner) if owner == thread::current().id() => {
                debug!(key = %key, "Lock already held by this thread");
                return Ok(false);
            }
            Some(_) if !blocking => return Ok(false),
            _ => {}
        }

        std::fs::create_dir_all(&self.locks_dir)?;
        let path = self.lock_path(symbol, date);

        loop {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)?;
            let opened = file.metadata()?;
            let mut lock = RwLock::new(file);

            let acquired = if blocking {
                debug!(key = %key, "Waiting for writer lock");
                let guard = lock.write()?;
                // the OS lock lives as long as the handle, not the guard
                std::mem::forget(guard);
                true
            } else {
                match lock.try_write() {
                    Ok(guard) => {
                        std::mem::forget(guard);
                        true
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => false,
                    Err(e) => return Err(e.into()),
                }
            };
            if !acquired {
                return Ok(false);
            }

            // a previous holder may have unlinked the file while we waited
            if !same_file(&opened, &path) {
                debug!(key = %key, "Lock file replaced while waiting, retrying");
                continue;
            }

            info!(key = %key, path = %path.display(), "Acquired writer lock");
            let owner = thread::current().id();
            self.held().insert(key, HeldLock { owner, lock });
            return Ok(true);
        }
    }

    /// Release the lock and remove its file.
    ///
    /// Returns `false` if the calling thread does not hold it.
    pub fn release_lock(&self, symbol: &str, date: NaiveDate) -> Result<bool> {
        let key = Self::lock_key(symbol, date);
        let owned = self
            .held()
            .get(&key)
            .map(|h| h.owner == thread::current().id());
        let lock = match owned {
            Some(true) => self.held().remove(&key),
            Some(false) => {
                warn!(key = %key, "Refusing to release a lock held by another thread");
                None
            }
            None => None,
        };
        let Some(lock) = lock else {
            return Ok(false);
        };
        let path = self.lock_path(symbol, date);
        if let Err(e) = std::fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(key = %key, error = %e, "Failed to remove lock file");
            }
        }
        drop(lock);
        info!(key = %key, "Released writer lock");
        Ok(true)
    }

    /// Run `f` while holding the lock
    pub fn with_lock<T>(
        &self,
        symbol: &str,
        date: NaiveDate,
        f: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let acquired = self.acquire_lock(symbol, date)?;
        let result = f();
        if acquired {
            self.release_lock(symbol, date)?;
        }
        result
    }
}

impl Drop for FileLockManager {
    fn drop(&mut self) {
        let held: Vec<String> = self.held().keys().cloned().collect();
        for key in held {
            if let Some(lock) = self.held().remove(&key) {
                let _ = std::fs::remove_file(self.locks_dir.join(format!("{key}.lck")));
                drop(lock);
            }
        }
    }
}

#[cfg(unix)]
fn same_file(opened: &Metadata, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match std::fs::metadata(path) {
        Ok(current) => opened.dev() == current.dev() && opened.ino() == current.ino(),
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn same_file(_opened: &Metadata, path: &Path) -> bool {
    path.exists()
}
