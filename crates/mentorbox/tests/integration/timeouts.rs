use std::time::{Duration, Instant};

use mentorbox::{Config, ExecutionRequest, ExecutionStatus, ResourceLimits, Sandbox};

use super::{deadline, test_sandbox};

#[tokio::test]
async fn test_infinite_loop_times_out() {
    let request = ExecutionRequest::python("while True:\n    pass\n").with_timeout(1.0);

    let started = Instant::now();
    let result = test_sandbox().execute(&request).await.unwrap();
    let elapsed = started.elapsed();

    assert!(!result.succeeded());
    assert_eq!(result.status(), ExecutionStatus::Timeout);
    assert_eq!(
        result.error_detail(),
        Some("Timeout: execution exceeded 1s")
    );
    assert!(elapsed >= Duration::from_millis(950), "{elapsed:?}");
    assert!(elapsed < deadline(1.0), "{elapsed:?}");
    assert!(result.elapsed_seconds() >= 0.95);
}

#[tokio::test]
async fn test_timeout_keeps_partial_output() {
    let source = "print('started')\nn = 0\nwhile True:\n    n += 1\n";
    let request = ExecutionRequest::python(source).with_timeout(0.5);

    let result = test_sandbox().execute(&request).await.unwrap();
    assert_eq!(result.status(), ExecutionStatus::Timeout);
    assert_eq!(result.stdout(), "started\n");
    assert_eq!(
        result.error_detail(),
        Some("Timeout: execution exceeded 0.5s")
    );
}

#[tokio::test]
async fn test_sleep_is_interrupted() {
    let request = ExecutionRequest::python("import time\ntime.sleep(60)\nprint('woke')")
        .with_timeout(0.5);

    let started = Instant::now();
    let result = test_sandbox().execute(&request).await.unwrap();

    assert_eq!(result.status(), ExecutionStatus::Timeout);
    assert!(result.stdout().is_empty());
    assert!(started.elapsed() < deadline(0.5));
}

#[tokio::test]
async fn test_configured_timeout_applies_without_override() {
    let mut config = Config::empty();
    config.limits = ResourceLimits::unset().with_timeout_seconds(0.5);
    let sandbox = Sandbox::new(config).unwrap();

    let result = sandbox
        .execute(&ExecutionRequest::python("while True:\n    pass\n"))
        .await
        .unwrap();
    assert_eq!(result.status(), ExecutionStatus::Timeout);
}

#[tokio::test]
async fn test_timeout_inside_try_is_not_swallowed() {
    let source = "try:\n    while True:\n        pass\nexcept Exception:\n    print('caught')\nfinally:\n    print('cleanup')\n";
    let request = ExecutionRequest::python(source).with_timeout(0.5);

    let result = test_sandbox().execute(&request).await.unwrap();
    assert_eq!(result.status(), ExecutionStatus::Timeout);
    assert!(!result.stdout().contains("caught"));
}

#[tokio::test]
async fn test_sandbox_is_reusable_after_timeout() {
    let sandbox = test_sandbox();
    let looping = ExecutionRequest::python("while True:\n    pass\n").with_timeout(0.3);
    assert_eq!(
        sandbox.execute(&looping).await.unwrap().status(),
        ExecutionStatus::Timeout
    );

    let result = sandbox
        .execute(&ExecutionRequest::python("print('fresh')"))
        .await
        .unwrap();
    assert!(result.succeeded());
    assert_eq!(result.stdout(), "fresh\n");
}
