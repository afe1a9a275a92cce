//! Properties that hold for every submission.

use std::time::Instant;

use mentorbox::{ExecutionRequest, ExecutionResult, ExecutionStatus};
use proptest::prelude::*;

use super::{deadline, test_sandbox};

const TIMEOUT_SECONDS: f64 = 2.0;

fn execute(source: String) -> (ExecutionResult, std::time::Duration) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let request = ExecutionRequest::python(source).with_timeout(TIMEOUT_SECONDS);
    let started = Instant::now();
    let result = runtime
        .block_on(test_sandbox().execute(&request))
        .expect("a valid request is always attempted");
    (result, started.elapsed())
}

fn fragment() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec![
        "x = 1",
        "x = x + 1",
        "print(x)",
        "y = [i * i for i in range(10)]",
        "print(sorted(y, reverse=True))",
        "d = {'a': 1}",
        "d['b'] = d.get('a', 0) / 0",
        "import math",
        "import os",
        "import json",
        "print(json.dumps(d))",
        "raise ValueError('boom')",
        "def f(n):",
        "    return f(n + 1)",
        "f(0)",
        "if x:",
        "    pass",
        "s = 'abc' * 3",
        "print(s[::-1])",
        "().__class__",
        "open('x')",
        "del x",
        "assert x > 5, 'too small'",
        "for c in s:",
        "    print(c, end='')",
        "print(",
        "'unterminated",
        "lambda: (yield)",
        "",
    ])
}

fn program() -> impl Strategy<Value = String> {
    prop::collection::vec(fragment(), 0..12).prop_map(|lines| lines.join("\n"))
}

fn forbidden_module() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec![
        "os",
        "sys",
        "subprocess",
        "socket",
        "shutil",
        "ctypes",
        "importlib",
        "builtins",
        "pathlib",
        "pickle",
    ])
}

fn assert_consistent(result: &ExecutionResult) {
    assert_eq!(!result.succeeded(), result.error_detail().is_some());
    assert_eq!(result.succeeded(), result.status() == ExecutionStatus::Ok);
    if !result.succeeded() {
        assert_eq!(result.return_value(), None);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn arbitrary_text_yields_a_consistent_result(source in ".*") {
        let (result, elapsed) = execute(source);
        assert_consistent(&result);
        prop_assert!(elapsed < deadline(TIMEOUT_SECONDS));
    }

    #[test]
    fn assembled_programs_yield_a_consistent_result(source in program()) {
        let (result, elapsed) = execute(source);
        assert_consistent(&result);
        prop_assert!(elapsed < deadline(TIMEOUT_SECONDS));
    }

    #[test]
    fn forbidden_modules_never_succeed(
        module in forbidden_module(),
        style in 0usize..3,
        prefix in prop::collection::vec(fragment(), 0..3),
    ) {
        let import = match style {
            0 => format!("import {module}"),
            1 => format!("import {module} as alias"),
            _ => format!("from {module} import anything"),
        };
        // Indented fragments in the prefix may turn it into a syntax error,
        // which never succeeds either.
        let prefix: Vec<_> = prefix.into_iter().filter(|line| !line.starts_with(' ')).collect();
        let source = format!("{}\n{import}\n", prefix.join("\n"));
        let (result, _) = execute(source);
        prop_assert!(!result.succeeded());
        prop_assert!(matches!(
            result.status(),
            ExecutionStatus::CapabilityViolation
                | ExecutionStatus::RuntimeFailure
                | ExecutionStatus::SyntaxError
        ));
    }

    #[test]
    fn clean_prefix_then_forbidden_import_is_a_violation(
        module in forbidden_module(),
        count in 0u32..20,
    ) {
        let source = format!("total = 0\nfor i in range({count}):\n    total += i\nprint(total)\nimport {module}\n");
        let (result, _) = execute(source);
        prop_assert_eq!(result.status(), ExecutionStatus::CapabilityViolation);
        prop_assert_eq!(result.stdout(), format!("{}\n", (0..count).sum::<u32>()));
    }
}
