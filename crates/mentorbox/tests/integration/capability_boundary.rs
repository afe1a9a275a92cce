use mentorbox::{ExecutionRequest, ExecutionStatus};
use yare::parameterized;

use super::{fixture_source, run, test_sandbox};

#[parameterized(
    import_os = { "import os" },
    import_subprocess = { "import subprocess\nsubprocess.run(['ls'])" },
    from_import = { "from os import system" },
    aliased_import = { "import sys as s" },
    open_file = { "open('/etc/passwd').read()" },
    eval_call = { "eval('1 + 1')" },
    exec_call = { "exec('x = 1')" },
    dunder_import = { "__import__('os')" },
    getattr_call = { "getattr(print, 'x')" },
    globals_call = { "globals()" },
    class_chain = { "().__class__.__bases__[0].__subclasses__()" },
    function_globals = { "def f():\n    pass\nf.__globals__" },
    builtins_name = { "__builtins__" },
    module_internals = { "import math\nmath.__dict__" },
    module_escape = { "import json\njson.codecs" },
    private_attribute = { "x = [1]\nx._items" },
    exception_traceback = { "try:\n    1 / 0\nexcept Exception as e:\n    e.__traceback__" },
    object_builtin = { "object()" },
)]
fn test_escape_is_a_violation(source: &str) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let result = runtime.block_on(run(source));

    assert!(!result.succeeded(), "{source} succeeded");
    assert_eq!(
        result.status(),
        ExecutionStatus::CapabilityViolation,
        "{source}: {:?}",
        result.error_detail()
    );
    assert!(
        result
            .error_detail()
            .unwrap()
            .starts_with("CapabilityViolation: ")
    );
}

#[tokio::test]
async fn test_violation_keeps_earlier_output() {
    let result = run(&fixture_source("escape_attempts.py")).await;

    assert_eq!(result.status(), ExecutionStatus::CapabilityViolation);
    assert_eq!(result.stdout(), "6\n");
    let detail = result.error_detail().unwrap();
    assert!(detail.contains("__class__"), "{detail}");
    assert!(detail.ends_with("(line 3)"), "{detail}");
}

#[tokio::test]
async fn test_violation_cannot_be_caught() {
    let source = "try:\n    import os\nexcept Exception:\n    print('caught')\n";
    let result = run(source).await;

    assert_eq!(result.status(), ExecutionStatus::CapabilityViolation);
    assert!(result.stdout().is_empty());
}

#[tokio::test]
async fn test_request_modules_replace_configured_set() {
    let sandbox = test_sandbox();

    let request = ExecutionRequest::python("import math\nimport json\nprint(math.pi > 3)")
        .with_allowed_modules(["math"]);
    let result = sandbox.execute(&request).await.unwrap();
    assert_eq!(result.status(), ExecutionStatus::CapabilityViolation);
    assert!(result.error_detail().unwrap().contains("'json'"));

    let request = ExecutionRequest::python("import math\nprint(math.pi > 3)")
        .with_allowed_modules(["math"]);
    let result = sandbox.execute(&request).await.unwrap();
    assert!(result.succeeded());
    assert_eq!(result.stdout(), "True\n");
}

#[tokio::test]
async fn test_unsafe_request_modules_are_dropped() {
    let request = ExecutionRequest::python("import os").with_allowed_modules(["os", "math"]);
    let result = test_sandbox().execute(&request).await.unwrap();

    assert_eq!(result.status(), ExecutionStatus::CapabilityViolation);
}

#[tokio::test]
async fn test_time_is_opt_in() {
    let result = mentorbox::execute_code(&ExecutionRequest::python("import time"))
        .await
        .unwrap();
    assert_eq!(result.status(), ExecutionStatus::CapabilityViolation);
    assert!(result.error_detail().unwrap().contains("not enabled"));

    let result = run("import time\nprint(time.time() > 0)").await;
    assert!(result.succeeded(), "{:?}", result.error_detail());
}

#[tokio::test]
async fn test_shadowing_a_builtin_is_allowed() {
    let result = run("len = 3\nprint(len)").await;

    assert!(result.succeeded(), "{:?}", result.error_detail());
    assert_eq!(result.stdout(), "3\n");
}
