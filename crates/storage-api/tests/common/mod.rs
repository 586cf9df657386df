//! Test infrastructure for storage backends.
//!
//! This module provides the conformance harness every backend runs, plus
//! small helpers shared by the integration tests.

#![allow(dead_code)]

pub mod harness;

pub use harness::*;

/// Installs a test-friendly tracing subscriber.
///
/// Honors `RUST_LOG`; safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "storage_api=debug".into()),
        )
        .with_test_writer()
        .try_init();
}
