//! Shared test utilities: in-memory origins and manifest builders.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use sha2::{Digest, Sha256};

use cityfeed_core::{ContentHash, Manifest, Origin, ReconcileConfig, RetentionPolicy};
use cityfeed_origin::{OriginClient, Response, RetryPolicy, Transport, TransportError};

use crate::reconcile::Reconciler;

pub const DEAD_ORIGIN: &str = "http://dead.test";

pub fn hash_of(bytes: &[u8]) -> ContentHash {
    ContentHash::parse(&hex::encode(Sha256::digest(bytes))).unwrap()
}

/// Manifest JSON for `(path, contents)` pairs, sizes included.
pub fn manifest_json(version: &str, files: &[(&str, &str)]) -> String {
    let files: Vec<serde_json::Value> = files
        .iter()
        .map(|(path, body)| {
            serde_json::json!({
                "path": path,
                "hash": hash_of(body.as_bytes()).as_str(),
                "size": body.len(),
            })
        })
        .collect();
    serde_json::json!({ "version": version, "files": files }).to_string()
}

pub fn manifest_of(version: &str, files: &[(&str, &str)]) -> Manifest {
    Manifest::parse(manifest_json(version, files).as_bytes()).unwrap()
}

// ---------------------------------------------------------------------------
// In-memory origin
// ---------------------------------------------------------------------------

#[derive(Default)]
struct OriginState {
    routes: Mutex<HashMap<String, (u16, Vec<u8>)>>,
    failures_left: AtomicUsize,
    requests: Mutex<Vec<String>>,
}

/// One fake origin. Clones share state, so a test can keep a handle while
/// the transport owns another and republish between runs.
#[derive(Clone)]
pub struct MemoryOrigin {
    origin: Origin,
    state: Arc<OriginState>,
}

impl MemoryOrigin {
    pub fn new(url: &str) -> Self {
        Self {
            origin: Origin::parse(url).unwrap(),
            state: Arc::default(),
        }
    }

    pub fn with_object(self, bytes: &[u8]) -> Self {
        let path = format!("/objects/{}", hash_of(bytes));
        self.with_raw(&path, 200, bytes.to_vec())
    }

    pub fn with_raw(self, path: &str, status: u16, body: Vec<u8>) -> Self {
        self.set(path, status, body);
        self
    }

    /// The next `n` requests fail at the transport level.
    pub fn failing_first(self, n: usize) -> Self {
        self.state.failures_left.store(n, Ordering::SeqCst);
        self
    }

    pub fn set(&self, path: &str, status: u16, body: Vec<u8>) {
        self.state
            .routes
            .lock()
            .unwrap()
            .insert(path.to_owned(), (status, body));
    }

    /// Serve a manifest for `files` along with every object it names.
    pub fn publish(&self, version: &str, files: &[(&str, &str)]) {
        for (_, body) in files {
            let path = format!("/objects/{}", hash_of(body.as_bytes()));
            self.set(&path, 200, body.as_bytes().to_vec());
        }
        self.set(
            "/manifests/latest.json",
            200,
            manifest_json(version, files).into_bytes(),
        );
    }

    pub fn requests(&self) -> usize {
        self.state.requests.lock().unwrap().len()
    }

    /// Object hashes requested so far, in order.
    pub fn object_requests(&self) -> Vec<String> {
        self.state
            .requests
            .lock()
            .unwrap()
            .iter()
            .filter_map(|p| p.strip_prefix("/objects/"))
            .map(str::to_owned)
            .collect()
    }

    pub fn reset_requests(&self) {
        self.state.requests.lock().unwrap().clear();
    }

    pub fn transport_for(origins: &[&MemoryOrigin]) -> Box<dyn Transport> {
        Box::new(MemoryTransport {
            origins: origins.iter().map(|o| (*o).clone()).collect(),
        })
    }

    pub fn client_for(origins: &[&MemoryOrigin], retry: RetryPolicy) -> OriginClient {
        let list = origins.iter().map(|o| o.origin.clone()).collect();
        OriginClient::new(list, Self::transport_for(origins), retry)
    }

    pub fn client(&self) -> OriginClient {
        Self::client_for(&[self], RetryPolicy::no_retry())
    }

    /// Client whose first origin refuses every connection.
    pub fn client_with_dead_first(&self) -> OriginClient {
        let origins = vec![Origin::parse(DEAD_ORIGIN).unwrap(), self.origin.clone()];
        OriginClient::new(origins, Self::transport_for(&[self]), RetryPolicy::no_retry())
    }
}

struct MemoryTransport {
    origins: Vec<MemoryOrigin>,
}

impl Transport for MemoryTransport {
    fn get(&self, origin: &Origin, url: &str) -> Result<Response, TransportError> {
        let Some(served) = self.origins.iter().find(|o| &o.origin == origin) else {
            return Err(TransportError::from_message(origin, "connection refused"));
        };
        let path = url.strip_prefix(origin.as_str()).unwrap_or(url).to_owned();
        served.state.requests.lock().unwrap().push(path.clone());

        let failing = served
            .state
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(TransportError::from_message(origin, "connection reset by peer"));
        }

        let (status, body) = served
            .state
            .routes
            .lock()
            .unwrap()
            .get(&path)
            .cloned()
            .unwrap_or((404, b"NoSuchKey".to_vec()));
        Ok(Response {
            status,
            body: Box::new(Cursor::new(body)),
        })
    }
}

// ---------------------------------------------------------------------------
// Reconciler setup
// ---------------------------------------------------------------------------

/// Config for `root` listing `origins` in order, with fast retries.
pub fn config_for(root: &Path, origins: &[&str]) -> ReconcileConfig {
    let origins = origins.iter().map(|o| Origin::parse(o).unwrap()).collect();
    let mut config = ReconcileConfig::new(origins, root);
    config.max_retry_wait = std::time::Duration::ZERO;
    config.retry_delay = std::time::Duration::ZERO;
    config.retention = RetentionPolicy::default();
    config
}

/// Reconciler over in-memory origins; `DEAD_ORIGIN` in the list never answers.
pub fn reconciler(config: ReconcileConfig, served: &[&MemoryOrigin]) -> Reconciler {
    Reconciler::with_transport(config, MemoryOrigin::transport_for(served))
}

/// Every file under `dir` with its mtime, sorted by path.
pub fn tree_state(dir: &Path) -> Vec<(String, std::time::SystemTime)> {
    let mut out = Vec::new();
    walk(dir, dir, &mut out);
    out.sort();
    out
}

fn walk(base: &Path, dir: &Path, out: &mut Vec<(String, std::time::SystemTime)>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.filter_map(Result::ok) {
        let path = entry.path();
        let meta = std::fs::symlink_metadata(&path).unwrap();
        let rel = path.strip_prefix(base).unwrap().to_string_lossy().into_owned();
        out.push((rel, meta.modified().unwrap()));
        if meta.is_dir() {
            walk(base, &path, out);
        }
    }
}
