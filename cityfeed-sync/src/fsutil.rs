//! Small filesystem helpers shared by the store, builder and activator.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{io_err, SyncError};

/// Flush directory entries (creations, renames) to disk.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), SyncError> {
    let file = File::open(dir).map_err(|e| io_err(dir, e))?;
    file.sync_all().map_err(|e| io_err(dir, e))
}

/// Readable by everyone, writable only by the owner.
#[cfg(unix)]
pub(crate) fn set_world_readable(path: &Path) -> Result<(), SyncError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o644)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
pub(crate) fn set_world_readable(_path: &Path) -> Result<(), SyncError> {
    Ok(())
}

/// Lowercase hex SHA-256 of a file's contents.
pub(crate) fn sha256_file(path: &Path) -> Result<String, SyncError> {
    let mut file = File::open(path).map_err(|e| io_err(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(io_err(path, e)),
        };
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Remove a file, treating "already gone" as success.
pub(crate) fn remove_file_if_exists(path: &Path) -> Result<bool, SyncError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(io_err(path, e)),
    }
}
