//! Tests for the cityfeed-sync crate.

pub(crate) mod helpers;

mod crash_safety;
