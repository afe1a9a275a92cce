//! Code runner for mentorbox
//!
//! Provides the high-level API: validate a submission, then run it on a
//! worker under a wall-clock budget and fold whatever happened into an
//! [`ExecutionResult`].

use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, instrument};

use crate::config::{Config, ConfigError, Language};
use crate::interp::{Limits, Outcome};
use crate::lang::{self, SyntaxError};
use crate::runner::worker::{Completion, Worker, WorkerSpec};
use crate::types::{ExecutionRequest, ExecutionResult, ExecutionStatus, ResourceLimits};

mod worker;

/// Errors that stop an execution from being attempted at all
///
/// Failures caused by the submission itself never show up here; they are
/// reported through the returned [`ExecutionResult`].
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("invalid timeout override: {0} (must be a positive, finite number of seconds)")]
    InvalidTimeout(f64),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Outcome of a syntax-only check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxCheck {
    pub valid: bool,
    /// `SyntaxError: ...` when `valid` is false
    pub error: Option<String>,
}

impl From<Result<(), SyntaxError>> for SyntaxCheck {
    fn from(result: Result<(), SyntaxError>) -> Self {
        match result {
            Ok(()) => Self {
                valid: true,
                error: None,
            },
            Err(err) => Self {
                valid: false,
                error: Some(syntax_detail(&err)),
            },
        }
    }
}

/// High-level runner for submissions
#[derive(Debug, Clone)]
pub struct Sandbox {
    config: Config,
}

impl Sandbox {
    /// Create a new sandbox with the given configuration
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Create a new sandbox with default configuration
    pub fn with_defaults() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run one submission
    ///
    /// Every failure of the submission (unsupported language, syntax error,
    /// capability violation, escaping exception, timeout) is reported in the
    /// result. `Err` is reserved for an invalid timeout override and for
    /// failing to start the worker.
    #[instrument(skip(self, request), fields(language = %request.language, len = request.source.len()))]
    pub async fn execute(
        &self,
        request: &ExecutionRequest,
    ) -> Result<ExecutionResult, ExecuteError> {
        if let Err(err) = Language::from_declared(&request.language) {
            debug!(%err, "rejecting request");
            return Ok(ExecutionResult::failure(
                ExecutionStatus::UnsupportedLanguage,
                format!(
                    "UnsupportedLanguage: language '{}' is not supported; only Python is available",
                    request.language
                ),
                String::new(),
                String::new(),
                Duration::ZERO,
            ));
        }

        let overrides = match request.timeout_seconds {
            Some(seconds) if !(seconds.is_finite() && seconds > 0.0) => {
                return Err(ExecuteError::InvalidTimeout(seconds));
            }
            Some(seconds) => Some(ResourceLimits::unset().with_timeout_seconds(seconds)),
            None => None,
        };
        let limits = self.config.effective_limits(overrides.as_ref());

        let program = match lang::parse(&request.source) {
            Ok(program) => program,
            Err(err) => {
                debug!(line = err.line, column = err.column, "submission failed to parse");
                return Ok(ExecutionResult::failure(
                    ExecutionStatus::SyntaxError,
                    syntax_detail(&err),
                    String::new(),
                    String::new(),
                    Duration::ZERO,
                ));
            }
        };

        let modules = self
            .config
            .effective_modules(request.allowed_modules.as_deref());
        let spec = WorkerSpec {
            program,
            source: request.source.clone(),
            limits: Limits {
                max_recursion_depth: limits.recursion_limit(),
                max_collection_len: limits.collection_limit(),
            },
            output_limit: limits.output_limit(),
            modules,
        };

        let started = Instant::now();
        let mut worker = Worker::spawn(spec)?;
        let completion = worker.wait(limits.timeout(), limits.cancel_grace()).await;
        let elapsed = started.elapsed();

        let result = assemble(completion, &worker, elapsed, limits.timeout());
        debug!(
            status = ?result.status(),
            elapsed = result.elapsed_seconds(),
            stdout_len = result.stdout().len(),
            "execution complete"
        );
        Ok(result)
    }

    /// Parse `source` without running it
    pub fn validate_syntax(&self, source: &str) -> SyntaxCheck {
        validate_syntax(source)
    }
}

/// Run `request` with the default configuration
pub async fn execute_code(request: &ExecutionRequest) -> Result<ExecutionResult, ExecuteError> {
    Sandbox::with_defaults().execute(request).await
}

/// Parse `source` without running it
#[instrument(skip(source), fields(len = source.len()))]
pub fn validate_syntax(source: &str) -> SyntaxCheck {
    SyntaxCheck::from(lang::parse(source).map(|_| ()))
}

fn syntax_detail(err: &SyntaxError) -> String {
    format!("SyntaxError: {err}")
}

fn assemble(
    completion: Completion,
    worker: &Worker,
    elapsed: Duration,
    budget: Duration,
) -> ExecutionResult {
    let stdout = worker.stdout();
    let stderr = worker.stderr();
    let timed_out = || {
        ExecutionResult::failure(
            ExecutionStatus::Timeout,
            format!("Timeout: execution exceeded {}s", format_seconds(budget)),
            stdout.clone(),
            stderr.clone(),
            elapsed,
        )
    };

    match completion {
        Completion::Finished(Outcome::Completed { return_value }) => {
            ExecutionResult::success(stdout, stderr, elapsed, return_value)
        }
        Completion::Finished(Outcome::Raised { traceback, .. }) => ExecutionResult::failure(
            ExecutionStatus::RuntimeFailure,
            traceback,
            stdout,
            stderr,
            elapsed,
        ),
        Completion::Finished(Outcome::Violation { message, line }) => {
            let detail = match line {
                Some(line) => format!("CapabilityViolation: {message} (line {line})"),
                None => format!("CapabilityViolation: {message}"),
            };
            ExecutionResult::failure(
                ExecutionStatus::CapabilityViolation,
                detail,
                stdout,
                stderr,
                elapsed,
            )
        }
        Completion::Finished(Outcome::Cancelled) | Completion::TimedOut => timed_out(),
        Completion::Lost => ExecutionResult::failure(
            ExecutionStatus::RuntimeFailure,
            "RuntimeFailure: the worker stopped without reporting a result".to_string(),
            stdout,
            stderr,
            elapsed,
        ),
    }
}

/// `30` rather than `30.0`, `1.5` as is.
fn format_seconds(duration: Duration) -> String {
    let seconds = duration.as_secs_f64();
    if seconds.fract() == 0.0 {
        format!("{}", seconds as u64)
    } else {
        format!("{seconds}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandbox_creation() {
        let sandbox = Sandbox::with_defaults();
        // Default config comes from the embedded mentorbox.example.toml
        assert_eq!(sandbox.config().allowed_modules.len(), 4);
    }

    #[test]
    fn test_sandbox_rejects_invalid_config() {
        let mut config = Config::empty();
        config.allowed_modules.push("subprocess".into());
        assert!(Sandbox::new(config).is_err());
    }

    #[test]
    fn test_validate_syntax_reports_position() {
        let check = validate_syntax("def f(:\n    pass\n");
        assert!(!check.valid);
        let error = check.error.unwrap();
        assert!(error.starts_with("SyntaxError: "), "{error}");
        assert!(error.contains("(line 1, column"), "{error}");

        let check = Sandbox::with_defaults().validate_syntax("x = 1\n");
        assert!(check.valid);
        assert!(check.error.is_none());
    }

    #[test]
    fn test_format_seconds() {
        assert_eq!(format_seconds(Duration::from_secs(30)), "30");
        assert_eq!(format_seconds(Duration::from_millis(1500)), "1.5");
    }

    #[tokio::test]
    async fn test_invalid_timeout_is_an_error() {
        let sandbox = Sandbox::with_defaults();
        for timeout in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let request = ExecutionRequest::python("pass").with_timeout(timeout);
            assert!(matches!(
                sandbox.execute(&request).await,
                Err(ExecuteError::InvalidTimeout(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_unsupported_language_does_not_parse() {
        let request = ExecutionRequest::python("this is not python (").with_language("ruby");
        let result = execute_code(&request).await.unwrap();
        assert_eq!(result.status(), ExecutionStatus::UnsupportedLanguage);
        assert!(result.error_detail().unwrap().contains("'ruby'"));
        assert_eq!(result.elapsed_seconds(), 0.0);
    }

    #[tokio::test]
    async fn test_violation_detail_has_prefix_and_line() {
        let request = ExecutionRequest::python("x = 1\nopen('f')\n");
        let result = execute_code(&request).await.unwrap();
        assert_eq!(result.status(), ExecutionStatus::CapabilityViolation);
        assert_eq!(
            result.error_detail(),
            Some("CapabilityViolation: use of 'open' is not permitted (line 2)")
        );
    }
}
