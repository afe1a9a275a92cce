//! A library for running learner-submitted code safely.
//!
//! Mentorbox provides an async Rust API for executing untrusted submissions
//! written in a Python-like language. Submissions run in an embedded
//! interpreter whose entire global namespace is an explicit allow-list, on a
//! worker thread bounded by a wall-clock budget.
//!
//! # Features
//!
//! - **Capability surface** — Only whitelisted builtins and modules exist; reaching for anything else is reported as a capability violation.
//! - **Deterministic results** — Every request yields exactly one [`ExecutionResult`] with captured output, a failure category and a Python-style traceback.
//! - **Timeouts** — Cooperative cancellation plus an abandonable worker keep the caller's latency bounded.
//! - **TOML configuration** — Limits and enabled modules with per-request overrides.
//! - **Progress tracking** — Fold results into per-topic practice metrics.

pub use config::{Config, ConfigError, EXAMPLE_CONFIG, Language};
pub use lang::SyntaxError;
pub use progress::{ProgressTracker, TopicMetric};
pub use runner::{ExecuteError, Sandbox, SyntaxCheck, execute_code, validate_syntax};
pub use types::{ExecutionRequest, ExecutionResult, ExecutionStatus, ResourceLimits};

pub mod capability;
pub mod config;
pub mod interp;
pub mod lang;
pub mod progress;
pub mod runner;
pub mod types;
