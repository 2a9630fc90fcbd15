//! HTTP transport seam.
//!
//! [`Transport`] is the only place bytes come off the network. The production
//! implementation wraps a `ureq` agent; tests substitute in-memory fakes.

use std::io::Read;
use std::time::Duration;

use cityfeed_core::Origin;

use crate::error::TransportError;

/// User agent sent on every request.
pub const USER_AGENT: &str = concat!("cityfeed-puller/", env!("CARGO_PKG_VERSION"));

/// A response whose status line arrived; the body is streamed.
pub struct Response {
    pub status: u16,
    pub body: Box<dyn Read + Send>,
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Blocking GET with a bounded per-request timeout.
pub trait Transport: Send + Sync {
    /// Issue a GET. Any status that arrives is returned as `Ok`; only failures
    /// to obtain a status line (DNS, connect, timeout, TLS) are errors.
    fn get(&self, origin: &Origin, url: &str) -> Result<Response, TransportError>;
}

/// `ureq`-backed transport.
#[derive(Debug, Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    /// `timeout` bounds the whole request, body included.
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build();
        Self { agent }
    }
}

impl Transport for UreqTransport {
    fn get(&self, origin: &Origin, url: &str) -> Result<Response, TransportError> {
        let response = match self.agent.get(url).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(_, response)) => response,
            Err(ureq::Error::Transport(err)) => {
                return Err(TransportError::from_message(origin, err.to_string()));
            }
        };
        Ok(Response {
            status: response.status(),
            body: Box::new(response.into_reader()),
        })
    }
}

/// Hint for TLS name mismatches against virtual-hosted S3 buckets whose name
/// contains dots (`foo.bar.s3.region.host`): the wildcard certificate only
/// covers one label, so the path-style form must be used instead.
pub fn tls_name_mismatch_hint(origin: &Origin) -> Option<String> {
    let url = url::Url::parse(origin.as_str()).ok()?;
    if url.scheme() != "https" {
        return None;
    }
    let host = url.host_str()?;
    let parts: Vec<&str> = host.split('.').collect();
    let idx = parts
        .iter()
        .position(|p| *p == "s3" || *p == "s3-website")?;
    if idx <= 1 {
        return None;
    }
    let bucket = parts[..idx].join(".");
    let endpoint = std::iter::once("s3")
        .chain(parts.iter().skip(idx + 1).copied())
        .collect::<Vec<_>>()
        .join(".");
    Some(format!(
        "try a path-style origin for dotted bucket names, e.g. `https://{endpoint}/{bucket}`"
    ))
}
