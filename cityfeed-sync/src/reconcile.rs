//! Reconciler: one run of the pull, build and activate state machine.
//!
//! ```text
//! lock ─▶ sweep ─▶ CHECK_MANIFEST ─┬─▶ DONE (unchanged / stale)
//!                                  ├─▶ ACTIVATE (snapshot already built)
//!                                  └─▶ FETCH_OBJECTS ─▶ BUILD_SNAPSHOT ─▶ ACTIVATE ─▶ GC ─▶ DONE
//! ```
//!
//! Any error before `ACTIVATE` aborts the run with `current` and every
//! committed snapshot untouched. GC failures are reported, never fatal.

use std::convert::Infallible;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::SystemTime;

use serde::Serialize;

use cityfeed_core::{ContentHash, Manifest, ReconcileConfig, Version, MANIFEST_RESOURCE};
use cityfeed_origin::{
    read_body, BodyError, FetchError, OriginClient, RetryPolicy, Transport, UreqTransport,
};

use crate::activate::{active_version, switch_current};
use crate::error::SyncError;
use crate::gc::{self, GcReport};
use crate::layout::RootLayout;
use crate::lock::RootLock;
use crate::snapshot::{list_snapshots, SnapshotBuilder, SnapshotInfo};
use crate::store::{Ensured, ObjectStore};

/// States of a run, logged as they are entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    CheckManifest,
    FetchObjects,
    BuildSnapshot,
    Activate,
    Gc,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::CheckManifest => "check_manifest",
            Phase::FetchObjects => "fetch_objects",
            Phase::BuildSnapshot => "build_snapshot",
            Phase::Activate => "activate",
            Phase::Gc => "gc",
        };
        f.write_str(name)
    }
}

fn enter(phase: Phase) {
    tracing::debug!(%phase, "entering phase");
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// How a run ended without error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// Another run holds the root lock.
    AlreadyRunning,
    /// `current` already resolves to the published version.
    Unchanged { version: Version },
    /// The published version is older than the active one; nothing moved.
    Stale { published: Version, active: Version },
    /// `current` now points at a new version.
    Activated(ActivationReport),
    /// Nothing was written; this is what a real run would do.
    DryRun(DryRunPlan),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchStats {
    pub objects_fetched: usize,
    pub objects_cached: usize,
    pub bytes_fetched: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivationReport {
    pub version: Version,
    pub previous: Option<Version>,
    /// Origin that served the manifest.
    pub manifest_origin: String,
    /// The snapshot was already committed by an earlier, interrupted run.
    pub reused_snapshot: bool,
    #[serde(flatten)]
    pub fetch: FetchStats,
    /// Files copied because hard-linking them failed.
    pub link_fallbacks: usize,
    pub leftovers_removed: usize,
    pub gc: GcReport,
}

/// What a dry run found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannedAction {
    Unchanged,
    Stale,
    ActivateExisting,
    BuildAndActivate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DryRunPlan {
    pub version: Version,
    pub active: Option<Version>,
    pub manifest_origin: String,
    pub action: PlannedAction,
    pub objects_total: usize,
    pub objects_missing: Vec<ContentHash>,
    pub would_prune: Vec<Version>,
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

/// Drives one root towards the version published by its origins.
#[derive(Debug)]
pub struct Reconciler {
    config: ReconcileConfig,
    layout: RootLayout,
    store: ObjectStore,
    client: OriginClient,
}

impl Reconciler {
    /// Reconciler speaking HTTP(S) through `ureq`.
    pub fn new(config: ReconcileConfig) -> Self {
        let transport = UreqTransport::new(config.timeout);
        Self::with_transport(config, Box::new(transport))
    }

    pub fn with_transport(config: ReconcileConfig, transport: Box<dyn Transport>) -> Self {
        let layout = RootLayout::new(&config.root);
        let store = ObjectStore::new(layout.objects_dir());
        let retry = RetryPolicy {
            max_wait: config.max_retry_wait,
            delay: config.retry_delay,
        };
        let client = OriginClient::new(config.origins.clone(), transport, retry);
        Self {
            config,
            layout,
            store,
            client,
        }
    }

    pub fn layout(&self) -> &RootLayout {
        &self.layout
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Run once: converge the root on the published version.
    pub fn run(&self) -> Result<Outcome, SyncError> {
        let span = tracing::info_span!("reconcile", root = %self.layout.root().display());
        let _guard = span.enter();

        self.layout.ensure()?;
        let Some(_lock) = RootLock::try_acquire(&self.layout)? else {
            tracing::info!("another run holds the lock; nothing to do");
            return Ok(Outcome::AlreadyRunning);
        };
        let leftovers_removed = gc::sweep_leftovers(&self.layout);

        enter(Phase::CheckManifest);
        let (manifest, manifest_origin) = self.fetch_manifest()?;
        let previous = active_version(&self.layout)?;
        if let Some(active) = &previous {
            if *active == manifest.version {
                tracing::info!(version = %active, "already active");
                return Ok(Outcome::Unchanged {
                    version: active.clone(),
                });
            }
            if manifest.version < *active {
                tracing::warn!(
                    published = %manifest.version,
                    active = %active,
                    "published version is older than the active one; not moving backwards",
                );
                return Ok(Outcome::Stale {
                    published: manifest.version,
                    active: active.clone(),
                });
            }
        }

        let reused_snapshot = self.layout.snapshot_dir(&manifest.version).is_dir();
        let (fetch, link_fallbacks) = if reused_snapshot {
            tracing::info!(
                version = %manifest.version,
                "snapshot already committed; activating it",
            );
            (FetchStats::default(), 0)
        } else {
            enter(Phase::FetchObjects);
            let fetch = self.fetch_objects(&manifest)?;

            enter(Phase::BuildSnapshot);
            let built = SnapshotBuilder::new(&self.layout, &self.store, self.config.materialize)
                .build(&manifest)?;
            (fetch, built.link_fallbacks)
        };

        enter(Phase::Activate);
        switch_current(&self.layout, &manifest.version)?;

        enter(Phase::Gc);
        let gc = gc::collect(
            &self.layout,
            &self.store,
            Some(&manifest.version),
            &self.config.retention,
        );

        Ok(Outcome::Activated(ActivationReport {
            version: manifest.version,
            previous,
            manifest_origin,
            reused_snapshot,
            fetch,
            link_fallbacks,
            leftovers_removed,
            gc,
        }))
    }

    /// Fetch and validate the manifest and report what [`run`](Self::run)
    /// would do. Creates no directories and takes no lock.
    pub fn plan(&self) -> Result<Outcome, SyncError> {
        let (manifest, manifest_origin) = self.fetch_manifest()?;
        let active = active_version(&self.layout)?;

        let action = match &active {
            Some(a) if *a == manifest.version => PlannedAction::Unchanged,
            Some(a) if manifest.version < *a => PlannedAction::Stale,
            _ if self.layout.snapshot_dir(&manifest.version).is_dir() => {
                PlannedAction::ActivateExisting
            }
            _ => PlannedAction::BuildAndActivate,
        };

        // Counted before `manifest.version` is moved into the plan.
        let (objects_total, objects_missing) = {
            let hashes = manifest.unique_hashes();
            let missing: Vec<ContentHash> = if action == PlannedAction::BuildAndActivate {
                hashes
                    .iter()
                    .filter(|h| !self.store.contains(h))
                    .map(|h| (*h).clone())
                    .collect()
            } else {
                vec![]
            };
            (hashes.len(), missing)
        };

        let would_prune = match action {
            PlannedAction::ActivateExisting | PlannedAction::BuildAndActivate => {
                self.prune_preview(&manifest.version)?
            }
            PlannedAction::Unchanged | PlannedAction::Stale => vec![],
        };

        Ok(Outcome::DryRun(DryRunPlan {
            version: manifest.version,
            active,
            manifest_origin,
            action,
            objects_total,
            objects_missing,
            would_prune,
        }))
    }

    fn prune_preview(&self, next: &Version) -> Result<Vec<Version>, SyncError> {
        let mut snapshots = list_snapshots(&self.layout)?;
        let now = SystemTime::now();
        if !snapshots.iter().any(|s| &s.version == next) {
            snapshots.push(SnapshotInfo {
                version: next.clone(),
                path: self.layout.snapshot_dir(next),
                modified: now,
            });
        }
        Ok(
            gc::plan_retention(&snapshots, Some(next), &self.config.retention, now)
                .into_iter()
                .map(|s| s.version.clone())
                .collect(),
        )
    }

    fn fetch_manifest(&self) -> Result<(Manifest, String), SyncError> {
        let fetched = self
            .client
            .fetch::<_, Infallible, _>(MANIFEST_RESOURCE, |_, body| {
                let bytes = read_body::<Infallible>(body)?;
                Manifest::parse(&bytes)
                    .map_err(|e| BodyError::Rejected(format!("invalid manifest: {e}")))
            })
            .map_err(|err| match err {
                FetchError::Exhausted(source) => SyncError::ManifestUnavailable(source),
                FetchError::Local(never) => match never {},
            })?;
        tracing::info!(
            version = %fetched.value.version,
            files = fetched.value.files.len(),
            origin = %fetched.origin,
            "manifest fetched",
        );
        Ok((fetched.value, fetched.origin.to_string()))
    }

    /// Ensure every object of `manifest` is stored, on up to `jobs` workers.
    ///
    /// The first failure stops workers from claiming new hashes; objects that
    /// completed stay in the store for the next run.
    fn fetch_objects(&self, manifest: &Manifest) -> Result<FetchStats, SyncError> {
        let hashes = manifest.unique_hashes();
        let missing: Vec<&ContentHash> = hashes
            .iter()
            .copied()
            .filter(|h| !self.store.contains(h))
            .collect();
        let mut stats = FetchStats {
            objects_cached: hashes.len() - missing.len(),
            ..FetchStats::default()
        };
        if missing.is_empty() {
            return Ok(stats);
        }

        let workers = self.config.jobs.clamp(1, missing.len());
        tracing::info!(
            missing = missing.len(),
            cached = stats.objects_cached,
            workers,
            "fetching objects",
        );

        let next = AtomicUsize::new(0);
        let abort = AtomicBool::new(false);
        let fetched = AtomicUsize::new(0);
        let raced = AtomicUsize::new(0);
        let bytes = AtomicU64::new(0);

        let worker = || -> Result<(), SyncError> {
            while !abort.load(Ordering::Relaxed) {
                let Some(hash) = missing.get(next.fetch_add(1, Ordering::Relaxed)) else {
                    break;
                };
                match self.store.ensure(&self.client, hash, manifest.declared_size(hash)) {
                    Ok(Ensured::Fetched { bytes: n, .. }) => {
                        fetched.fetch_add(1, Ordering::Relaxed);
                        bytes.fetch_add(n, Ordering::Relaxed);
                    }
                    Ok(Ensured::Cached { .. }) => {
                        raced.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(err) => {
                        abort.store(true, Ordering::Relaxed);
                        return Err(err);
                    }
                }
            }
            Ok(())
        };

        let results: Vec<Result<(), SyncError>> = thread::scope(|scope| {
            let handles: Vec<_> = (0..workers).map(|_| scope.spawn(&worker)).collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|panic| Err(SyncError::Worker(panic_message(&*panic))))
                })
                .collect()
        });
        if let Some(err) = results.into_iter().find_map(Result::err) {
            return Err(err);
        }

        stats.objects_fetched = fetched.into_inner();
        stats.objects_cached += raced.into_inner();
        stats.bytes_fetched = bytes.into_inner();
        Ok(stats)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_owned()
    }
}
