//! Content-addressed object store.
//!
//! ## `ensure` protocol
//!
//! 1. `objects/<hash>` exists → cache hit, no network.
//! 2. Stream the body from an origin into `objects/.tmp-XXXX`, hashing as it goes.
//! 3. Digest (and declared size, if any) mismatch → drop the temp file and
//!    reject, so the client fails over to the next origin.
//! 4. fsync, chmod 0644, then rename into place without clobbering.
//! 5. fsync `objects/`.
//!
//! The rename is the only way `objects/<hash>` comes into existence, so a
//! reader never observes a truncated object, and a second writer of the same
//! hash simply finds it already present.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use cityfeed_core::manifest::object_resource;
use cityfeed_core::ContentHash;
use cityfeed_origin::{BodyError, FetchError, OriginClient};

use crate::error::{io_err, SyncError};
use crate::fsutil::{fsync_dir, remove_file_if_exists, set_world_readable};
use crate::layout::OBJECT_TMP_PREFIX;

/// Result of [`ObjectStore::ensure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ensured {
    /// Already on disk; nothing was fetched.
    Cached { path: PathBuf },
    /// Fetched, verified and stored.
    Fetched {
        path: PathBuf,
        origin: String,
        bytes: u64,
    },
}

impl Ensured {
    pub fn path(&self) -> &Path {
        match self {
            Ensured::Cached { path } | Ensured::Fetched { path, .. } => path,
        }
    }
}

/// The `objects/` directory of a root.
#[derive(Debug, Clone)]
pub struct ObjectStore {
    dir: PathBuf,
}

impl ObjectStore {
    /// Open a store at `dir`. Does not touch the filesystem.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, hash: &ContentHash) -> PathBuf {
        self.dir.join(hash.as_str())
    }

    pub fn contains(&self, hash: &ContentHash) -> bool {
        self.path_for(hash).is_file()
    }

    /// Make sure `objects/<hash>` exists, fetching it if needed.
    pub fn ensure(
        &self,
        client: &OriginClient,
        hash: &ContentHash,
        expected_size: Option<u64>,
    ) -> Result<Ensured, SyncError> {
        let path = self.path_for(hash);
        if path.is_file() {
            tracing::trace!(%hash, "object cache hit");
            return Ok(Ensured::Cached { path });
        }

        let resource = object_resource(hash);
        let fetched = client
            .fetch(&resource, |_, body| self.spool(hash, expected_size, body))
            .map_err(|err| match err {
                FetchError::Exhausted(source) => SyncError::ObjectUnavailable {
                    hash: hash.clone(),
                    source,
                },
                FetchError::Local(err) => err,
            })?;

        tracing::info!(%hash, origin = %fetched.origin, bytes = fetched.value, "object stored");
        Ok(Ensured::Fetched {
            path,
            origin: fetched.origin.to_string(),
            bytes: fetched.value,
        })
    }

    /// Stream one body into a verified object. Returns the byte count.
    fn spool(
        &self,
        hash: &ContentHash,
        expected_size: Option<u64>,
        body: &mut dyn Read,
    ) -> Result<u64, BodyError<SyncError>> {
        let local = |e: SyncError| BodyError::Local(e);

        let mut tmp = tempfile::Builder::new()
            .prefix(OBJECT_TMP_PREFIX)
            .tempfile_in(&self.dir)
            .map_err(|e| local(io_err(&self.dir, e)))?;

        let mut hasher = Sha256::new();
        let mut written = 0u64;
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = match body.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(BodyError::Read(e)),
            };
            hasher.update(&buf[..n]);
            tmp.write_all(&buf[..n])
                .map_err(|e| local(io_err(tmp.path(), e)))?;
            written += n as u64;
            if let Some(limit) = expected_size {
                if written > limit {
                    return Err(BodyError::Rejected(format!(
                        "size mismatch: expected {limit} bytes, got more"
                    )));
                }
            }
        }

        let actual = hex::encode(hasher.finalize());
        if actual != hash.as_str() {
            return Err(BodyError::Rejected(format!(
                "sha256 mismatch: expected {hash}, got {actual}"
            )));
        }
        if let Some(expected) = expected_size {
            if expected != written {
                return Err(BodyError::Rejected(format!(
                    "size mismatch: expected {expected} bytes, got {written}"
                )));
            }
        }

        tmp.as_file_mut()
            .sync_all()
            .map_err(|e| local(io_err(tmp.path(), e)))?;
        set_world_readable(tmp.path()).map_err(local)?;

        let final_path = self.path_for(hash);
        match tmp.persist_noclobber(&final_path) {
            Ok(_) => {}
            Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => {
                tracing::debug!(%hash, "object appeared concurrently; keeping existing copy");
                return Ok(written);
            }
            Err(err) => return Err(local(io_err(&final_path, err.error))),
        }
        fsync_dir(&self.dir).map_err(local)?;
        Ok(written)
    }

    /// Every well-named object currently stored.
    pub fn list(&self) -> Result<Vec<ContentHash>, SyncError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(io_err(&self.dir, e)),
        };
        let mut hashes = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&self.dir, e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Ok(hash) = ContentHash::parse(name) {
                hashes.push(hash);
            }
        }
        hashes.sort();
        Ok(hashes)
    }

    /// Delete an object. Returns the number of bytes freed.
    pub fn remove(&self, hash: &ContentHash) -> Result<u64, SyncError> {
        let path = self.path_for(hash);
        let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        if remove_file_if_exists(&path)? {
            Ok(size)
        } else {
            Ok(0)
        }
    }

    /// Place a verified object directly, bypassing the network. Used to seed
    /// stores in tests and tools.
    pub fn insert_bytes(&self, bytes: &[u8]) -> Result<ContentHash, SyncError> {
        let digest = hex::encode(Sha256::digest(bytes));
        let hash = ContentHash::parse(&digest)
            .map_err(|e| io_err(&self.dir, io::Error::new(io::ErrorKind::InvalidData, e)))?;
        self.spool(&hash, Some(bytes.len() as u64), &mut &bytes[..])
            .map_err(|err| match err {
                BodyError::Local(err) => err,
                BodyError::Read(e) => io_err(&self.dir, e),
                BodyError::Rejected(reason) => {
                    io_err(&self.dir, io::Error::new(io::ErrorKind::InvalidData, reason))
                }
            })?;
        Ok(hash)
    }
}
