use mentorbox::{ExecutionRequest, ExecutionStatus, execute_code, validate_syntax};

use super::{fixture_source, run};

#[tokio::test]
async fn test_hello_world() {
    let result = execute_code(&ExecutionRequest::python("print('Hello, World!')"))
        .await
        .unwrap();

    assert!(result.succeeded());
    assert_eq!(result.status(), ExecutionStatus::Ok);
    assert!(result.stdout().contains("Hello, World!"));
    assert!(result.error_detail().is_none());
    assert!(result.elapsed_seconds() > 0.0);
}

#[tokio::test]
async fn test_math_is_enabled_by_default() {
    let result = execute_code(&ExecutionRequest::python(
        "import math\nprint(math.sqrt(16))",
    ))
    .await
    .unwrap();

    assert!(result.succeeded(), "{:?}", result.error_detail());
    assert!(result.stdout().contains("4.0"));
}

#[tokio::test]
async fn test_generator_short_circuits() {
    let result = run("print(any(print(x) or x >= 2 for x in range(5)))").await;

    assert!(result.succeeded(), "{:?}", result.error_detail());
    assert_eq!(result.stdout(), "0\n1\n2\nTrue\n");
}

#[tokio::test]
async fn test_division_by_zero() {
    let result = execute_code(&ExecutionRequest::python("x = 1 / 0"))
        .await
        .unwrap();

    assert!(!result.succeeded());
    assert_eq!(result.status(), ExecutionStatus::RuntimeFailure);
    let detail = result.error_detail().unwrap();
    assert!(detail.contains("ZeroDivisionError"), "{detail}");
    assert!(detail.starts_with("Traceback (most recent call last):"), "{detail}");
    assert!(detail.contains("line 1"), "{detail}");
}

#[tokio::test]
async fn test_unclosed_string_is_a_syntax_error() {
    let result = execute_code(&ExecutionRequest::python("print('unclosed string"))
        .await
        .unwrap();

    assert!(!result.succeeded());
    assert_eq!(result.status(), ExecutionStatus::SyntaxError);
    assert_eq!(result.elapsed_seconds(), 0.0);
    assert!(result.error_detail().unwrap().starts_with("SyntaxError: "));
    assert!(result.stdout().is_empty());
}

#[test]
fn test_validate_syntax() {
    let check = validate_syntax("x = 10\nprint(x)");
    assert!(check.valid);
    assert_eq!(check.error, None);

    let check = validate_syntax("if True print('x')");
    assert!(!check.valid);
    assert!(check.error.unwrap().starts_with("SyntaxError: "));
}

#[test]
fn test_validate_syntax_does_not_run_code() {
    // Would violate the capability surface if it ran.
    let check = validate_syntax("import os\nos.system('true')\n");
    assert!(check.valid);
}

#[tokio::test]
async fn test_fizzbuzz_fixture() {
    let result = run(&fixture_source("fizzbuzz.py")).await;

    assert!(result.succeeded(), "{:?}", result.error_detail());
    let lines: Vec<_> = result.stdout().lines().collect();
    assert_eq!(lines.len(), 15);
    assert_eq!(lines[2], "Fizz");
    assert_eq!(lines[4], "Buzz");
    assert_eq!(lines[14], "FizzBuzz");
}

#[tokio::test]
async fn test_handled_exception_fixture() {
    let result = run(&fixture_source("grades.py")).await;

    assert!(result.succeeded(), "{:?}", result.error_detail());
    assert_eq!(
        result.stdout(),
        "skipped: no marks for grace\n{\"ada\": 84, \"alan\": 66}\n"
    );
}

#[tokio::test]
async fn test_final_expression_is_the_return_value() {
    let result = run("values = [3, 1, 2]\nsorted(values)").await;
    assert!(result.succeeded());
    assert_eq!(result.return_value(), Some("[1, 2, 3]"));

    let result = run("print('no value')").await;
    assert_eq!(result.return_value(), None);
}

#[tokio::test]
async fn test_language_aliases_are_accepted() {
    for language in ["python", "Python3", " py "] {
        let request = ExecutionRequest::python("print(1)").with_language(language);
        let result = execute_code(&request).await.unwrap();
        assert!(result.succeeded(), "{language}: {:?}", result.error_detail());
    }
}

#[tokio::test]
async fn test_unsupported_language() {
    let request = ExecutionRequest::python("console.log(1)").with_language("javascript");
    let result = execute_code(&request).await.unwrap();

    assert!(!result.succeeded());
    assert_eq!(result.status(), ExecutionStatus::UnsupportedLanguage);
    assert!(
        result
            .error_detail()
            .unwrap()
            .starts_with("UnsupportedLanguage: ")
    );
}

#[tokio::test]
async fn test_result_serializes_with_snake_case_status() {
    let result = run("x = 1 / 0").await;
    let json = serde_json::to_value(&result).unwrap();

    assert_eq!(json["succeeded"], false);
    assert_eq!(json["status"], "runtime_failure");
    assert!(json["error_detail"].as_str().unwrap().contains("ZeroDivisionError"));
    assert_eq!(json["return_value"], serde_json::Value::Null);
}

#[tokio::test]
async fn test_concurrent_submissions_are_independent() {
    let sandbox = super::test_sandbox();
    let mut handles = Vec::new();
    for i in 0..8 {
        let sandbox = sandbox.clone();
        handles.push(tokio::spawn(async move {
            let source = format!("counter = {i}\nfor _ in range(1000):\n    counter += 1\nprint(counter)");
            sandbox.execute(&ExecutionRequest::python(source)).await
        }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        let result = handle.await.unwrap().unwrap();
        assert!(result.succeeded());
        assert_eq!(result.stdout(), format!("{}\n", i + 1000));
    }
}
