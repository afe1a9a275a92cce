//! Integration tests for mentorbox
//!
//! These run whole submissions through [`Sandbox`] on real worker threads.
//! Tests that depend on wall-clock budgets keep them short but assert with
//! generous upper bounds.

use std::fs;
use std::time::Duration;

use mentorbox::{Config, ExecutionRequest, ExecutionResult, ResourceLimits, Sandbox};

mod capability_boundary;
mod config_loading;
mod progress_tracking;
mod properties;
mod resource_limits;
mod scenarios;
mod timeouts;

const FIXTURES_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures");

/// Helper to get fixture file content
pub(crate) fn fixture_source(name: &str) -> String {
    let path = format!("{FIXTURES_PATH}/sources/{name}");
    fs::read_to_string(&path).unwrap_or_else(|e| panic!("Failed to read fixture {path}: {e}"))
}

pub(crate) fn fixture_config(name: &str) -> String {
    format!("{FIXTURES_PATH}/configs/{name}")
}

/// A sandbox with every safe module enabled and a short default timeout.
pub(crate) fn test_sandbox() -> Sandbox {
    let mut config = Config::empty();
    config.limits = ResourceLimits::default().with_timeout_seconds(5.0);
    config.allowed_modules = mentorbox::capability::SAFE_MODULES
        .iter()
        .map(|name| (*name).to_string())
        .collect();
    Sandbox::new(config).expect("test config should be valid")
}

pub(crate) async fn run(source: &str) -> ExecutionResult {
    test_sandbox()
        .execute(&ExecutionRequest::python(source))
        .await
        .expect("execution should be attempted")
}

/// Upper bound for a run with the given timeout, including cancellation
/// grace and scheduling slack.
pub(crate) fn deadline(timeout_seconds: f64) -> Duration {
    Duration::from_secs_f64(timeout_seconds) + Duration::from_millis(1500)
}
