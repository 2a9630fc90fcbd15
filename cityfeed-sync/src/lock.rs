//! Root-scoped, non-blocking exclusive lock.
//!
//! Advisory `flock`-style lock (via fs2) on `<root>/.lock`. The lock file is
//! created once and never removed; the lock itself is released on drop or
//! when the process dies, so a killed run never leaves a stale lock behind.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::{io_err, SyncError};
use crate::layout::RootLayout;

/// Held for the duration of a run.
#[derive(Debug)]
pub struct RootLock {
    file: File,
    path: PathBuf,
}

impl RootLock {
    /// Try to take the lock without waiting.
    ///
    /// Returns `Ok(None)` when another process holds it.
    pub fn try_acquire(layout: &RootLayout) -> Result<Option<Self>, SyncError> {
        let path = layout.lock_path();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| io_err(&path, e))?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { file, path })),
            Err(err) if is_contended(&err) => Ok(None),
            Err(err) => Err(io_err(&path, err)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RootLock {
    fn drop(&mut self) {
        // Unlock errors on drop are ignored; the OS releases the lock with the fd.
        let _ = self.file.unlock();
    }
}

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
