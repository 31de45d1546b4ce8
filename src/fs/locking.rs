//! File locking utilities for safe concurrent access
//!
//! Provides locked read/write operations using `fs2` advisory locks so that
//! request handlers and background workers in separate processes never see a
//! half-written document. Unlike a blocking lock call, every acquisition here
//! is bounded: it retries a fixed number of times with a fixed sleep and then
//! surfaces [`StoreError::LockTimeout`] so the caller can reschedule.
//!
//! Advisory locks are cooperative - all participants must use these functions
//! for the locking to be effective.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::{Result, StoreError};

/// Default number of lock attempts before giving up.
pub const DEFAULT_LOCK_ATTEMPTS: u32 = 10;

/// Default sleep between two lock attempts.
pub const DEFAULT_LOCK_INTERVAL: Duration = Duration::from_millis(100);

/// Bounded retry schedule for lock acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            interval,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_ATTEMPTS, DEFAULT_LOCK_INTERVAL)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Many readers at once, excluded while a writer holds the file.
    Shared,
    /// Single holder; required for any write.
    Exclusive,
}

/// An open file holding an advisory lock.
///
/// The lock is released by [`LockedResource::release`] or, failing that,
/// when the value is dropped.
#[derive(Debug)]
pub struct LockedResource {
    path: PathBuf,
    file: File,
    mode: LockMode,
}

impl LockedResource {
    /// Open `path` and acquire a lock on it under `policy`.
    ///
    /// Shared acquisition requires the file to exist; the returned
    /// [`StoreError::Io`] carries `ErrorKind::NotFound` otherwise. Exclusive
    /// acquisition creates the file without truncating it, so a concurrent
    /// reader never observes the truncation of a previous document.
    ///
    /// A lock that lands on a file removed or replaced while waiting is
    /// dropped and the path reopened, within the same attempt budget.
    pub fn acquire(path: &Path, mode: LockMode, policy: RetryPolicy) -> Result<Self> {
        let mut file = open_for(path, mode)?;

        for attempt in 1..=policy.attempts {
            let outcome = match mode {
                LockMode::Shared => FileExt::try_lock_shared(&file),
                LockMode::Exclusive => FileExt::try_lock_exclusive(&file),
            };
            match outcome {
                Ok(()) => {
                    if is_current(&file, path).map_err(|e| StoreError::io(path, e))? {
                        trace!(path = %path.display(), ?mode, attempt, "lock acquired");
                        return Ok(Self {
                            path: path.to_path_buf(),
                            file,
                            mode,
                        });
                    }
                    // Removed or replaced while we waited: the lock guards
                    // an orphaned inode.
                    debug!(
                        path = %path.display(),
                        ?mode,
                        attempt,
                        "locked file went away, reopening"
                    );
                    let _ = FileExt::unlock(&file);
                    file = open_for(path, mode)?;
                }
                Err(e) if is_contended(&e) => {
                    debug!(
                        path = %path.display(),
                        ?mode,
                        attempt,
                        max_attempts = policy.attempts,
                        "lock contended"
                    );
                    if attempt < policy.attempts {
                        thread::sleep(policy.interval);
                    }
                }
                Err(e) => return Err(StoreError::io(path, e)),
            }
        }

        Err(StoreError::LockTimeout {
            path: path.to_path_buf(),
            attempts: policy.attempts,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Read the whole file from the start.
    pub fn read_all(&mut self) -> Result<Vec<u8>> {
        self.file
            .seek(SeekFrom::Start(0))
            .map_err(|e| StoreError::io(&self.path, e))?;
        let mut content = Vec::new();
        self.file
            .read_to_end(&mut content)
            .map_err(|e| StoreError::io(&self.path, e))?;
        Ok(content)
    }

    /// Replace the whole file content. Requires an exclusive lock.
    ///
    /// The sequence is: truncate → write → flush → sync, all while the
    /// exclusive lock is held.
    pub fn replace(&mut self, content: &[u8]) -> Result<()> {
        debug_assert_eq!(self.mode, LockMode::Exclusive);
        // Truncate AFTER acquiring the lock to prevent TOCTOU race
        self.file
            .set_len(0)
            .map_err(|e| StoreError::io(&self.path, e))?;
        self.file
            .seek(SeekFrom::Start(0))
            .map_err(|e| StoreError::io(&self.path, e))?;
        self.file
            .write_all(content)
            .map_err(|e| StoreError::io(&self.path, e))?;
        self.file.flush().map_err(|e| StoreError::io(&self.path, e))?;
        self.file
            .sync_data()
            .map_err(|e| StoreError::io(&self.path, e))?;
        Ok(())
    }

    /// Release the lock explicitly, surfacing unlock failures.
    pub fn release(self) -> Result<()> {
        FileExt::unlock(&self.file).map_err(|e| StoreError::io(&self.path, e))
        // Drop runs next and unlocks again; unlocking an unlocked file is a no-op.
    }
}

impl Drop for LockedResource {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn open_for(path: &Path, mode: LockMode) -> Result<File> {
    match mode {
        LockMode::Shared => File::open(path),
        #[allow(clippy::suspicious_open_options)]
        LockMode::Exclusive => OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path),
    }
    .map_err(|e| StoreError::io(path, e))
}

/// Whether `path` still names the inode `file` has open.
#[cfg(unix)]
fn is_current(file: &File, path: &Path) -> std::io::Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let held = file.metadata()?;
    match std::fs::metadata(path) {
        Ok(linked) => Ok(held.dev() == linked.dev() && held.ino() == linked.ino()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Open files cannot be unlinked here, so the handle always matches.
#[cfg(not(unix))]
fn is_current(_file: &File, _path: &Path) -> std::io::Result<bool> {
    Ok(true)
}

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == fs2::lock_contended_error().kind()
        || err.kind() == std::io::ErrorKind::WouldBlock
}

/// Read file contents under a shared lock.
///
/// Returns `Ok(None)` when the file does not exist.
pub fn locked_read(path: &Path, policy: RetryPolicy) -> Result<Option<Vec<u8>>> {
    let mut resource = match LockedResource::acquire(path, LockMode::Shared, policy) {
        Ok(resource) => resource,
        Err(StoreError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
            return Ok(None)
        }
        Err(e) => return Err(e),
    };
    let content = resource.read_all()?;
    resource.release()?;
    Ok(Some(content))
}

/// Write file contents under an exclusive lock.
///
/// The sequence is: open → lock → truncate → write → flush → unlock.
pub fn locked_write(path: &Path, content: &[u8], policy: RetryPolicy) -> Result<()> {
    let mut resource = LockedResource::acquire(path, LockMode::Exclusive, policy)?;
    resource.replace(content)?;
    resource.release()
}

/// Read-modify-write in one exclusive critical section.
///
/// `mutate` receives the current bytes (empty when the file was just
/// created) and returns the value to hand back plus the replacement bytes,
/// or `None` to leave the file untouched.
pub fn locked_update<T, F>(path: &Path, policy: RetryPolicy, mutate: F) -> Result<T>
where
    F: FnOnce(&[u8]) -> Result<(T, Option<Vec<u8>>)>,
{
    let mut resource = LockedResource::acquire(path, LockMode::Exclusive, policy)?;
    let current = resource.read_all()?;
    let (value, replacement) = mutate(&current)?;
    if let Some(bytes) = replacement {
        resource.replace(&bytes)?;
    }
    resource.release()?;
    Ok(value)
}
