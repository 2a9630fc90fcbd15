//! Run configuration.
//!
//! Two layers feed a run: an optional YAML file (`--config`) and command-line
//! flags. Both deserialize into [`ConfigLayer`]; flags are merged over the file
//! and the result is validated into a [`ReconcileConfig`].
//!
//! ```yaml
//! origins:
//!   - https://origin-a.example
//!   - https://origin-b.example
//! root: /var/www/cityfeed
//! timeout: 30s
//! max_retry_wait: 10s
//! retry_delay: 1s
//! keep: 3
//! retain_age: 7d
//! jobs: 4
//! materialize: copy
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{normalize_origins, Origin};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_RETRY_WAIT: Duration = Duration::from_secs(10);
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_KEEP: usize = 3;
pub const DEFAULT_JOBS: usize = 4;

// ---------------------------------------------------------------------------
// Materialize
// ---------------------------------------------------------------------------

/// How an object is placed into a snapshot tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Materialize {
    /// Copy object bytes into a new file.
    #[default]
    Copy,
    /// Hard-link the object; falls back to copying when linking fails.
    Hardlink,
}

impl FromStr for Materialize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "copy" => Ok(Self::Copy),
            "hardlink" => Ok(Self::Hardlink),
            other => Err(format!(
                "unknown materialize mode '{other}'; expected: copy, hardlink"
            )),
        }
    }
}

impl fmt::Display for Materialize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Materialize::Copy => write!(f, "copy"),
            Materialize::Hardlink => write!(f, "hardlink"),
        }
    }
}

// ---------------------------------------------------------------------------
// RetentionPolicy
// ---------------------------------------------------------------------------

/// Which superseded snapshots survive garbage collection.
///
/// The active snapshot always survives. Any other snapshot is pruned only when
/// it falls outside the newest `keep` versions (if set) *and* is older than
/// `max_age` (if set). With neither set nothing is pruned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub keep: Option<usize>,
    pub max_age: Option<Duration>,
}

impl RetentionPolicy {
    pub fn keep_all() -> Self {
        Self {
            keep: None,
            max_age: None,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.keep.is_none() && self.max_age.is_none()
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            keep: Some(DEFAULT_KEEP),
            max_age: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Durations
// ---------------------------------------------------------------------------

/// Parse `500ms`, `30s`, `5m`, `2h`, `7d`, or a bare number of seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidDuration {
        value: raw.to_owned(),
    };
    let s = raw.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    if digits.is_empty() {
        return Err(invalid());
    }
    let n: u64 = digits.parse().map_err(|_| invalid())?;
    let secs = |mult: u64| n.checked_mul(mult).map(Duration::from_secs).ok_or_else(invalid);
    match unit.trim() {
        "ms" => Ok(Duration::from_millis(n)),
        "" | "s" => secs(1),
        "m" => secs(60),
        "h" => secs(60 * 60),
        "d" => secs(24 * 60 * 60),
        _ => Err(invalid()),
    }
}

/// A duration as written in YAML: either a bare number of seconds or a string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum DurationValue {
    Secs(u64),
    Text(String),
}

impl DurationValue {
    fn resolve(&self) -> Result<Duration, ConfigError> {
        match self {
            DurationValue::Secs(n) => Ok(Duration::from_secs(*n)),
            DurationValue::Text(s) => parse_duration(s),
        }
    }
}

// ---------------------------------------------------------------------------
// ConfigLayer
// ---------------------------------------------------------------------------

/// One source of configuration; every field optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigLayer {
    #[serde(default)]
    pub origins: Vec<String>,
    pub root: Option<PathBuf>,
    pub timeout: Option<DurationValue>,
    pub max_retry_wait: Option<DurationValue>,
    pub retry_delay: Option<DurationValue>,
    pub keep: Option<usize>,
    pub retain_age: Option<DurationValue>,
    pub jobs: Option<usize>,
    pub materialize: Option<Materialize>,
}

impl ConfigLayer {
    /// Load a layer from a YAML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay `over` on top of `self`. A non-empty origin list replaces the
    /// whole list rather than appending, since order is priority.
    pub fn merge(self, over: ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            origins: if over.origins.is_empty() {
                self.origins
            } else {
                over.origins
            },
            root: over.root.or(self.root),
            timeout: over.timeout.or(self.timeout),
            max_retry_wait: over.max_retry_wait.or(self.max_retry_wait),
            retry_delay: over.retry_delay.or(self.retry_delay),
            keep: over.keep.or(self.keep),
            retain_age: over.retain_age.or(self.retain_age),
            jobs: over.jobs.or(self.jobs),
            materialize: over.materialize.or(self.materialize),
        }
    }
}

// ---------------------------------------------------------------------------
// ReconcileConfig
// ---------------------------------------------------------------------------

/// Validated settings for one reconciliation run.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileConfig {
    /// Origins in failover priority order; never empty.
    pub origins: Vec<Origin>,
    /// Local root holding `objects/`, `snapshots/` and `current`.
    pub root: PathBuf,
    /// Bound on a single HTTP request.
    pub timeout: Duration,
    /// Total time spent retrying one origin before failing over.
    pub max_retry_wait: Duration,
    /// Fixed pause between attempts against the same origin.
    pub retry_delay: Duration,
    pub retention: RetentionPolicy,
    /// Object fetch workers; `1` fetches sequentially.
    pub jobs: usize,
    pub materialize: Materialize,
}

impl ReconcileConfig {
    /// Defaults for everything but origins and root.
    pub fn new(origins: Vec<Origin>, root: impl Into<PathBuf>) -> Self {
        Self {
            origins,
            root: root.into(),
            timeout: DEFAULT_TIMEOUT,
            max_retry_wait: DEFAULT_MAX_RETRY_WAIT,
            retry_delay: DEFAULT_RETRY_DELAY,
            retention: RetentionPolicy::default(),
            jobs: DEFAULT_JOBS,
            materialize: Materialize::default(),
        }
    }
}

impl TryFrom<ConfigLayer> for ReconcileConfig {
    type Error = ConfigError;

    fn try_from(layer: ConfigLayer) -> Result<Self, Self::Error> {
        let origins = normalize_origins(&layer.origins)?;
        let root = layer.root.ok_or(ConfigError::MissingRoot)?;
        if root.as_os_str().is_empty() {
            return Err(ConfigError::MissingRoot);
        }

        let mut config = ReconcileConfig::new(origins, root);
        if let Some(v) = layer.timeout {
            config.timeout = v.resolve()?;
        }
        if config.timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "timeout",
                reason: "must be greater than zero".into(),
            });
        }
        if let Some(v) = layer.max_retry_wait {
            config.max_retry_wait = v.resolve()?;
        }
        if let Some(v) = layer.retry_delay {
            config.retry_delay = v.resolve()?;
        }
        if let Some(keep) = layer.keep {
            if keep == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "keep",
                    reason: "must keep at least the active snapshot (>= 1)".into(),
                });
            }
            config.retention.keep = Some(keep);
        }
        if let Some(age) = layer.retain_age {
            config.retention.max_age = Some(age.resolve()?);
        }
        if let Some(jobs) = layer.jobs {
            if jobs == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "jobs",
                    reason: "must be at least 1".into(),
                });
            }
            config.jobs = jobs;
        }
        if let Some(materialize) = layer.materialize {
            config.materialize = materialize;
        }
        Ok(config)
    }
}
