use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Wall-clock budget when neither the configuration nor the request sets one.
pub const DEFAULT_TIMEOUT_SECONDS: f64 = 30.0;
pub const DEFAULT_MAX_OUTPUT_BYTES: u64 = 1024 * 1024;
pub const DEFAULT_MAX_RECURSION_DEPTH: u32 = 200;
/// Highest accepted `max_recursion_depth`; larger requests are clamped.
pub const MAX_RECURSION_DEPTH: u32 = 10_000;
pub const DEFAULT_MAX_COLLECTION_LEN: u64 = 1_000_000;
pub const DEFAULT_CANCEL_GRACE_MS: u64 = 250;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Wall clock budget in seconds
    #[serde(default)]
    pub timeout_seconds: Option<f64>,

    /// Maximum size of captured stdout in bytes
    #[serde(default)]
    pub max_output_bytes: Option<u64>,

    /// Maximum depth of nested function calls
    #[serde(default)]
    pub max_recursion_depth: Option<u32>,

    /// Maximum number of items in a single list, string, dict or set
    #[serde(default)]
    pub max_collection_len: Option<u64>,

    /// How long a timed-out worker gets to acknowledge cancellation, in
    /// milliseconds
    #[serde(default)]
    pub cancel_grace_ms: Option<u64>,
}

impl ResourceLimits {
    /// 1 kilobyte in bytes
    pub const KB: u64 = 1024;
    /// 1 megabyte in bytes
    pub const MB: u64 = 1024 * 1024;

    /// Create new resource limits with the built-in defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Limits with every field unset, for use as an override layer
    pub fn unset() -> Self {
        Self {
            timeout_seconds: None,
            max_output_bytes: None,
            max_recursion_depth: None,
            max_collection_len: None,
            cancel_grace_ms: None,
        }
    }

    /// Set the wall clock budget in seconds
    pub fn with_timeout_seconds(mut self, seconds: f64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    /// Set the stdout cap in bytes
    pub fn with_max_output_bytes(mut self, bytes: u64) -> Self {
        self.max_output_bytes = Some(bytes);
        self
    }

    /// Set the maximum call depth
    pub fn with_max_recursion_depth(mut self, depth: u32) -> Self {
        self.max_recursion_depth = Some(depth);
        self
    }

    /// Set the maximum collection length
    pub fn with_max_collection_len(mut self, len: u64) -> Self {
        self.max_collection_len = Some(len);
        self
    }

    /// Set the cancellation grace period in milliseconds
    pub fn with_cancel_grace_ms(mut self, ms: u64) -> Self {
        self.cancel_grace_ms = Some(ms);
        self
    }

    /// Apply overrides from another ResourceLimits, preferring values from `overrides`
    ///
    /// Returns a new ResourceLimits with values from `overrides` taking precedence
    /// over values from `self` when both are present.
    pub fn with_overrides(&self, overrides: &ResourceLimits) -> ResourceLimits {
        ResourceLimits {
            timeout_seconds: overrides.timeout_seconds.or(self.timeout_seconds),
            max_output_bytes: overrides.max_output_bytes.or(self.max_output_bytes),
            max_recursion_depth: overrides.max_recursion_depth.or(self.max_recursion_depth),
            max_collection_len: overrides.max_collection_len.or(self.max_collection_len),
            cancel_grace_ms: overrides.cancel_grace_ms.or(self.cancel_grace_ms),
        }
    }

    pub fn timeout(&self) -> Duration {
        let seconds = self.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS);
        Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms.unwrap_or(DEFAULT_CANCEL_GRACE_MS))
    }

    pub fn output_limit(&self) -> usize {
        let bytes = self.max_output_bytes.unwrap_or(DEFAULT_MAX_OUTPUT_BYTES);
        usize::try_from(bytes).unwrap_or(usize::MAX)
    }

    pub fn recursion_limit(&self) -> usize {
        self.max_recursion_depth
            .unwrap_or(DEFAULT_MAX_RECURSION_DEPTH)
            .min(MAX_RECURSION_DEPTH) as usize
    }

    pub fn collection_limit(&self) -> usize {
        let len = self.max_collection_len.unwrap_or(DEFAULT_MAX_COLLECTION_LEN);
        usize::try_from(len).unwrap_or(usize::MAX)
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            timeout_seconds: Some(DEFAULT_TIMEOUT_SECONDS),
            max_output_bytes: Some(DEFAULT_MAX_OUTPUT_BYTES),
            max_recursion_depth: Some(DEFAULT_MAX_RECURSION_DEPTH),
            max_collection_len: Some(DEFAULT_MAX_COLLECTION_LEN),
            cancel_grace_ms: Some(DEFAULT_CANCEL_GRACE_MS),
        }
    }
}

/// One submission to run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Source code of the submission
    pub source: String,

    /// Declared language, e.g. "python"
    #[serde(default = "default_language")]
    pub language: String,

    /// Wall clock budget override in seconds
    #[serde(default)]
    pub timeout_seconds: Option<f64>,

    /// Modules the submission may import, intersected with the safe list.
    /// `None` uses the configured set.
    #[serde(default)]
    pub allowed_modules: Option<Vec<String>>,
}

impl ExecutionRequest {
    /// A Python request with no overrides
    pub fn python(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            language: default_language(),
            timeout_seconds: None,
            allowed_modules: None,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    pub fn with_allowed_modules<I, S>(mut self, modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_modules = Some(modules.into_iter().map(Into::into).collect());
        self
    }
}

fn default_language() -> String {
    "python".to_owned()
}

/// Result of an execution
///
/// Produced exactly once per request. `succeeded`, `error_detail` and
/// `status` always agree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    succeeded: bool,
    status: ExecutionStatus,
    stdout: String,
    stderr: String,
    error_detail: Option<String>,
    elapsed_seconds: f64,
    return_value: Option<String>,
}

impl ExecutionResult {
    pub(crate) fn success(
        stdout: String,
        stderr: String,
        elapsed: Duration,
        return_value: Option<String>,
    ) -> Self {
        Self {
            succeeded: true,
            status: ExecutionStatus::Ok,
            stdout,
            stderr,
            error_detail: None,
            elapsed_seconds: elapsed.as_secs_f64(),
            return_value,
        }
    }

    /// A failed result. `status` must not be [`ExecutionStatus::Ok`]; an
    /// `Ok` status is downgraded to a runtime failure.
    pub(crate) fn failure(
        status: ExecutionStatus,
        error_detail: String,
        stdout: String,
        stderr: String,
        elapsed: Duration,
    ) -> Self {
        let status = match status {
            ExecutionStatus::Ok => ExecutionStatus::RuntimeFailure,
            other => other,
        };
        Self {
            succeeded: false,
            status,
            stdout,
            stderr,
            error_detail: Some(error_detail),
            elapsed_seconds: elapsed.as_secs_f64(),
            return_value: None,
        }
    }

    /// Check if the submission ran to completion without an escaping error
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.succeeded
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    /// Everything the submission printed, in order, up to the point it stopped
    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    /// Human-readable failure description, present iff the run failed
    pub fn error_detail(&self) -> Option<&str> {
        self.error_detail.as_deref()
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed_seconds
    }

    /// `repr` of the final expression statement, unless it was `None`
    pub fn return_value(&self) -> Option<&str> {
        self.return_value.as_deref()
    }
}

/// Category of an execution outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Ran to completion
    Ok,

    /// The declared language is not supported
    UnsupportedLanguage,

    /// The source failed to parse; nothing ran
    SyntaxError,

    /// The submission reached for something outside its capability surface
    CapabilityViolation,

    /// An exception escaped the submission
    RuntimeFailure,

    /// The wall clock budget ran out
    Timeout,
}

impl ExecutionStatus {
    /// Prefix used in `error_detail` for this category
    pub fn label(self) -> &'static str {
        match self {
            ExecutionStatus::Ok => "Ok",
            ExecutionStatus::UnsupportedLanguage => "UnsupportedLanguage",
            ExecutionStatus::SyntaxError => "SyntaxError",
            ExecutionStatus::CapabilityViolation => "CapabilityViolation",
            ExecutionStatus::RuntimeFailure => "RuntimeFailure",
            ExecutionStatus::Timeout => "Timeout",
        }
    }
}
