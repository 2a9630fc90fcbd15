//! # cityfeed-origin
//!
//! Read-only HTTP access to an ordered list of origins.
//!
//! [`OriginClient::fetch`] is the single failover capability used for both
//! the manifest and every object: callers supply a body handler that accepts
//! or rejects what an origin served, and the client takes care of timeouts,
//! retry pacing and moving on to the next origin.

pub mod client;
pub mod error;
pub mod transport;

pub use client::{read_body, BodyError, Fetched, OriginClient, RetryPolicy};
pub use error::{Exhausted, FailureCause, FetchError, OriginFailure, TransportError};
pub use transport::{Response, Transport, UreqTransport, USER_AGENT};
