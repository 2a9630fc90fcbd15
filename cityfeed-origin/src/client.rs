//! Ordered origin list with retry and failover.
//!
//! One fetch walks the origins in priority order. Against each origin:
//!
//! 1. GET `<origin>/<resource>` (bounded by the transport's timeout).
//! 2. Transport failure, HTTP 5xx/429, or an interrupted body: sleep
//!    `retry.delay` and retry, as long as the next attempt would start within
//!    `retry.max_wait` of the first one.
//! 3. Any other non-200 status, or a body the caller rejects: fail over to the
//!    next origin without retrying.
//! 4. A local error raised by the caller stops the fetch immediately.
//!
//! The client holds no state between fetches and is shared by reference
//! across worker threads.

use std::io::Read;
use std::thread;
use std::time::{Duration, Instant};

use cityfeed_core::Origin;

use crate::error::{Exhausted, FailureCause, FetchError, OriginFailure, TransportError};
use crate::transport::Transport;

/// Longest body excerpt kept for a non-200 diagnostic.
const STATUS_EXCERPT_LEN: usize = 512;

/// Pacing of attempts against a single origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts stop once this much time has passed since the first one.
    pub max_wait: Duration,
    /// Fixed pause between attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    /// One attempt per origin.
    pub fn no_retry() -> Self {
        Self {
            max_wait: Duration::ZERO,
            delay: Duration::ZERO,
        }
    }
}

/// How a caller's body handler failed.
#[derive(Debug)]
pub enum BodyError<E> {
    /// Reading the body failed mid-transfer; retried like a transport failure.
    Read(std::io::Error),
    /// The origin served unusable data; fail over without retrying it.
    Rejected(String),
    /// A local failure unrelated to the origin; ends the fetch.
    Local(E),
}

/// A successfully accepted resource and the origin that served it.
#[derive(Debug)]
pub struct Fetched<T> {
    pub value: T,
    pub origin: Origin,
}

enum AttemptError<E> {
    Retry(FailureCause),
    Failover(FailureCause),
    Local(E),
}

/// Fetches resources from an ordered origin list.
pub struct OriginClient {
    origins: Vec<Origin>,
    transport: Box<dyn Transport>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for OriginClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OriginClient")
            .field("origins", &self.origins)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl OriginClient {
    pub fn new(origins: Vec<Origin>, transport: Box<dyn Transport>, retry: RetryPolicy) -> Self {
        Self {
            origins,
            transport,
            retry,
        }
    }

    pub fn origins(&self) -> &[Origin] {
        &self.origins
    }

    /// Fetch `resource`, handing each 200 body to `accept` until one is accepted.
    ///
    /// `accept` may be called several times (once per attempt that reaches a
    /// 200), so it must discard any partial state it built on failure.
    pub fn fetch<T, E, F>(&self, resource: &str, mut accept: F) -> Result<Fetched<T>, FetchError<E>>
    where
        E: std::error::Error + 'static,
        F: FnMut(&Origin, &mut dyn Read) -> Result<T, BodyError<E>>,
    {
        let mut failures = Vec::with_capacity(self.origins.len());

        for origin in &self.origins {
            let url = origin.join(resource);
            let started = Instant::now();
            let mut attempts = 0u32;

            let cause = loop {
                attempts += 1;
                match self.attempt(origin, &url, &mut accept) {
                    Ok(value) => {
                        tracing::debug!(origin = %origin, resource, attempts, "fetched");
                        return Ok(Fetched {
                            value,
                            origin: origin.clone(),
                        });
                    }
                    Err(AttemptError::Local(err)) => return Err(FetchError::Local(err)),
                    Err(AttemptError::Failover(cause)) => break cause,
                    Err(AttemptError::Retry(cause)) => {
                        let next_start = started.elapsed() + self.retry.delay;
                        if next_start >= self.retry.max_wait {
                            break cause;
                        }
                        tracing::debug!(
                            origin = %origin,
                            resource,
                            attempt = attempts,
                            error = %cause,
                            "retrying origin",
                        );
                        thread::sleep(self.retry.delay);
                    }
                }
            };

            tracing::warn!(
                origin = %origin,
                resource,
                attempts,
                error = %cause,
                "origin failed; trying next",
            );
            failures.push(OriginFailure {
                origin: origin.clone(),
                attempts,
                cause,
            });
        }

        Err(FetchError::Exhausted(Exhausted {
            resource: resource.to_owned(),
            failures,
        }))
    }

    fn attempt<T, E, F>(
        &self,
        origin: &Origin,
        url: &str,
        accept: &mut F,
    ) -> Result<T, AttemptError<E>>
    where
        F: FnMut(&Origin, &mut dyn Read) -> Result<T, BodyError<E>>,
    {
        let mut response = self
            .transport
            .get(origin, url)
            .map_err(|err| AttemptError::Retry(FailureCause::Transport(err)))?;

        if response.status != 200 {
            let cause = FailureCause::Status {
                code: response.status,
                excerpt: body_excerpt(&mut response.body),
            };
            return Err(if is_retryable_status(response.status) {
                AttemptError::Retry(cause)
            } else {
                AttemptError::Failover(cause)
            });
        }

        accept(origin, &mut response.body).map_err(|err| match err {
            BodyError::Read(io) => AttemptError::Retry(FailureCause::Transport(
                TransportError::from_message(origin, format!("reading body: {io}")),
            )),
            BodyError::Rejected(reason) => AttemptError::Failover(FailureCause::Rejected(reason)),
            BodyError::Local(err) => AttemptError::Local(err),
        })
    }
}

fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..=599).contains(&status)
}

/// Single-line, length-capped prefix of an error body.
fn body_excerpt(body: &mut dyn Read) -> String {
    let mut buf = Vec::with_capacity(STATUS_EXCERPT_LEN);
    let _ = body.take(STATUS_EXCERPT_LEN as u64 + 1).read_to_end(&mut buf);
    let truncated = buf.len() > STATUS_EXCERPT_LEN;
    buf.truncate(STATUS_EXCERPT_LEN);
    let mut text: String = String::from_utf8_lossy(&buf)
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    text = text.trim().to_owned();
    if truncated {
        text.push('…');
    }
    text
}

/// Read a whole body into memory, mapping read failures for retry.
pub fn read_body<E>(body: &mut dyn Read) -> Result<Vec<u8>, BodyError<E>> {
    let mut buf = Vec::new();
    body.read_to_end(&mut buf).map_err(BodyError::Read)?;
    Ok(buf)
}
