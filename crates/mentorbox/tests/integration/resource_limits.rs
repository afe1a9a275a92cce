use mentorbox::{Config, ExecutionStatus, ResourceLimits, Sandbox};

use super::{fixture_source, run};

fn limited_sandbox(limits: ResourceLimits) -> Sandbox {
    let mut config = Config::empty();
    config.limits = limits;
    Sandbox::new(config).unwrap()
}

#[tokio::test]
async fn test_partial_output_survives_a_failure() {
    let result = run("print('checkpoint reached')\n[][0]\n").await;

    assert!(!result.succeeded());
    assert_eq!(result.status(), ExecutionStatus::RuntimeFailure);
    assert!(result.stdout().contains("checkpoint reached"));
    assert!(result.error_detail().unwrap().ends_with("IndexError: list index out of range"));
    assert_eq!(result.stderr(), format!("{}\n", result.error_detail().unwrap()));
}

#[tokio::test]
async fn test_runaway_recursion() {
    let result = run(&fixture_source("deep_recursion.py")).await;

    assert_eq!(result.status(), ExecutionStatus::RuntimeFailure);
    assert_eq!(result.stdout(), "before\n");
    let detail = result.error_detail().unwrap();
    assert!(detail.contains("RecursionError"), "{detail}");
    assert!(detail.contains("[Previous line repeated"), "{detail}");
}

#[tokio::test]
async fn test_recursion_limit_is_configurable() {
    let source = "def down(n):\n    return 0 if n == 0 else down(n - 1)\nprint(down(40))";
    let sandbox = limited_sandbox(ResourceLimits::unset().with_max_recursion_depth(20));
    let request = mentorbox::ExecutionRequest::python(source);

    let result = sandbox.execute(&request).await.unwrap();
    assert!(result.error_detail().unwrap().contains("RecursionError"));

    let result = super::test_sandbox().execute(&request).await.unwrap();
    assert!(result.succeeded());
    assert_eq!(result.stdout(), "0\n");
}

#[tokio::test]
async fn test_recursion_at_the_ceiling_is_an_exception() {
    let config = Config::parse_toml("[limits]\nmax_recursion_depth = 10000\n").unwrap();
    let sandbox = Sandbox::new(config).unwrap();
    let request = mentorbox::ExecutionRequest::python(fixture_source("deep_recursion.py"));

    let result = sandbox.execute(&request).await.unwrap();
    assert_eq!(result.status(), ExecutionStatus::RuntimeFailure);
    assert!(result.error_detail().unwrap().contains("RecursionError"));

    let mut config = Config::empty();
    config.limits = ResourceLimits::unset().with_max_recursion_depth(1_000_000);
    assert!(Sandbox::new(config).is_err());
}

#[tokio::test]
async fn test_output_limit() {
    let sandbox = limited_sandbox(ResourceLimits::unset().with_max_output_bytes(64));
    let request = mentorbox::ExecutionRequest::python("while True:\n    print('0123456789')\n");

    let result = sandbox.execute(&request).await.unwrap();
    assert_eq!(result.status(), ExecutionStatus::RuntimeFailure);
    assert_eq!(result.stdout().len(), 64);
    assert!(result.stdout().starts_with("0123456789\n"));
    assert!(
        result
            .error_detail()
            .unwrap()
            .ends_with("MemoryError: output limit exceeded")
    );
}

#[tokio::test]
async fn test_collection_limit() {
    let sandbox = limited_sandbox(ResourceLimits::unset().with_max_collection_len(1000));

    for source in ["x = [0] * 5000", "x = 'a' * 5000", "x = list(range(5000))"] {
        let result = sandbox
            .execute(&mentorbox::ExecutionRequest::python(source))
            .await
            .unwrap();
        assert_eq!(result.status(), ExecutionStatus::RuntimeFailure, "{source}");
        assert!(result.error_detail().unwrap().contains("MemoryError"), "{source}");
    }

    let result = sandbox
        .execute(&mentorbox::ExecutionRequest::python("x = [0] * 999\nprint(len(x))"))
        .await
        .unwrap();
    assert!(result.succeeded());
}

#[tokio::test]
async fn test_integer_overflow() {
    let result = run("print(2 ** 70)").await;

    assert_eq!(result.status(), ExecutionStatus::RuntimeFailure);
    assert!(result.error_detail().unwrap().contains("OverflowError"));
}
