//! Domain types for manifests and origins.
//!
//! Every newtype validates on construction, so a value that exists is safe to
//! use as a filename (`ContentHash`, `Version`) or as a path under a snapshot
//! root (`RelPath`).

use std::ffi::OsStr;
use std::fmt;
use std::path::{Component, Path};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, InvalidHash, ManifestError};

// ---------------------------------------------------------------------------
// ContentHash
// ---------------------------------------------------------------------------

/// A 64-character lowercase hex SHA-256 digest naming an object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    /// Length of a hex-encoded SHA-256 digest.
    pub const HEX_LEN: usize = 64;

    pub fn parse(s: &str) -> Result<Self, InvalidHash> {
        let valid = s.len() == Self::HEX_LEN
            && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if valid {
            Ok(Self(s.to_owned()))
        } else {
            Err(InvalidHash(s.to_owned()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl TryFrom<String> for ContentHash {
    type Error = InvalidHash;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<ContentHash> for String {
    fn from(h: ContentHash) -> Self {
        h.0
    }
}

// ---------------------------------------------------------------------------
// Version
// ---------------------------------------------------------------------------

/// An opaque, lexically ordered manifest version token.
///
/// Doubles as the snapshot directory name, so it must be a single, visible
/// path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version(String);

impl Version {
    pub fn parse(s: &str) -> Result<Self, ManifestError> {
        let reject = |reason| ManifestError::InvalidVersion {
            version: s.to_owned(),
            reason,
        };
        if s.trim().is_empty() {
            return Err(reject("version is empty"));
        }
        if s != s.trim() {
            return Err(reject("version has surrounding whitespace"));
        }
        if s.contains(['/', '\\', '\0']) {
            return Err(reject("version must not contain path separators or NUL"));
        }
        if s.starts_with('.') {
            return Err(reject("version must not start with '.'"));
        }
        Ok(Self(s.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl TryFrom<String> for Version {
    type Error = ManifestError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.0
    }
}

// ---------------------------------------------------------------------------
// RelPath
// ---------------------------------------------------------------------------

/// A normalised relative path inside a snapshot, always `/`-separated.
///
/// `a/./b` normalises to `a/b`; absolute paths, `..`, leading `./`, empty
/// components and backslashes are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelPath(String);

impl RelPath {
    pub fn parse(raw: &str) -> Result<Self, ManifestError> {
        let reject = |reason| ManifestError::InvalidPath {
            path: raw.to_owned(),
            reason,
        };
        if raw.is_empty() {
            return Err(reject("path is empty"));
        }
        if raw.contains('\\') {
            return Err(reject("path must use '/' separators"));
        }
        if raw.contains('\0') {
            return Err(reject("path contains NUL"));
        }
        if raw.ends_with('/') {
            return Err(reject("path must name a file, not a directory"));
        }

        let mut parts: Vec<&str> = Vec::new();
        for comp in Path::new(raw).components() {
            match comp {
                Component::Normal(part) => {
                    if part == OsStr::new("") || part == OsStr::new(".") {
                        return Err(reject("invalid path component"));
                    }
                    let Some(part) = part.to_str() else {
                        return Err(reject("path is not valid UTF-8"));
                    };
                    parts.push(part);
                }
                Component::ParentDir => return Err(reject("path must not contain '..'")),
                Component::RootDir | Component::Prefix(_) => {
                    return Err(reject("path must be relative"))
                }
                Component::CurDir => return Err(reject("path must not start with './'")),
            }
        }
        if parts.is_empty() {
            return Err(reject("path resolves to empty"));
        }
        Ok(Self(parts.join("/")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_path(&self) -> &Path {
        Path::new(&self.0)
    }

    /// Every proper ancestor of this path, shortest first (`a`, `a/b` for `a/b/c`).
    pub fn ancestors(&self) -> impl Iterator<Item = &str> + '_ {
        self.0
            .match_indices('/')
            .map(move |(idx, _)| &self.0[..idx])
    }
}

impl fmt::Display for RelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl TryFrom<String> for RelPath {
    type Error = ManifestError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<RelPath> for String {
    fn from(p: RelPath) -> Self {
        p.0
    }
}

// ---------------------------------------------------------------------------
// Origin
// ---------------------------------------------------------------------------

/// A normalised origin base URL (`http`/`https`, no trailing slash).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin(String);

impl Origin {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidOrigin {
            origin: raw.to_owned(),
            reason,
        };
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(invalid("origin must not be empty".into()));
        }
        let normalized = trimmed.trim_end_matches('/');
        let url = url::Url::parse(normalized)
            .map_err(|e| invalid(format!("{e} (include http:// or https://)")))?;
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(invalid(format!("unsupported scheme {other:?}"))),
        }
        if url.host_str().is_none() {
            return Err(invalid("origin has no host".into()));
        }
        Ok(Self(normalized.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Absolute URL for a resource path relative to this origin.
    pub fn join(&self, resource: &str) -> String {
        format!("{}/{}", self.0, resource.trim_start_matches('/'))
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Normalise a list of raw origins, dropping duplicates but keeping priority order.
pub fn normalize_origins<S: AsRef<str>>(raw: &[S]) -> Result<Vec<Origin>, ConfigError> {
    if raw.is_empty() {
        return Err(ConfigError::NoOrigins);
    }
    let mut out: Vec<Origin> = Vec::with_capacity(raw.len());
    for origin in raw {
        let origin = Origin::parse(origin.as_ref())?;
        if !out.contains(&origin) {
            out.push(origin);
        }
    }
    Ok(out)
}
