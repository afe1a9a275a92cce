//! The capability surface: which builtins and modules a submission can see.
//!
//! These tables are the whole of what a submission's global namespace is
//! built from. Nothing falls back to a host namespace.

use tracing::warn;

/// Modules that may ever be imported, whatever the configuration says.
pub const SAFE_MODULES: &[&str] = &["math", "random", "datetime", "time", "json"];

/// Modules enabled when neither the configuration nor the request names any.
pub const DEFAULT_MODULES: &[&str] = &["math", "random", "datetime", "json"];

/// Builtin functions and types bound in every global namespace. Exception
/// classes are bound in addition to these.
pub const SAFE_BUILTINS: &[&str] = &[
    "abs", "all", "any", "bin", "bool", "callable", "chr", "dict", "divmod", "enumerate",
    "filter", "float", "format", "hash", "hex", "int", "isinstance", "iter", "len", "list", "map",
    "max", "min", "next", "oct", "ord", "pow", "print", "range", "repr", "reversed", "round",
    "set", "sorted", "str", "sum", "tuple", "type", "zip",
];

/// Names whose use is reported as a capability violation rather than a
/// `NameError`.
pub const FORBIDDEN_NAMES: &[&str] = &[
    "open",
    "exec",
    "eval",
    "compile",
    "__import__",
    "getattr",
    "setattr",
    "delattr",
    "globals",
    "locals",
    "vars",
    "input",
    "exit",
    "quit",
    "breakpoint",
    "help",
    "dir",
    "memoryview",
    "object",
    "super",
    "classmethod",
    "staticmethod",
    "property",
];

/// Whether referencing `name` is a capability violation. Every dunder name
/// counts, so `__builtins__` and friends are unreachable.
pub fn is_forbidden_name(name: &str) -> bool {
    FORBIDDEN_NAMES.contains(&name) || (name.starts_with("__") && name.ends_with("__"))
}

pub fn is_safe_module(name: &str) -> bool {
    SAFE_MODULES.contains(&name)
}

/// Intersect `requested` with [`SAFE_MODULES`]. Unknown names are dropped
/// with a warning; the result is in [`SAFE_MODULES`] order.
pub fn effective_modules<S: AsRef<str>>(requested: &[S]) -> Vec<&'static str> {
    for name in requested {
        let name = name.as_ref();
        if !is_safe_module(name) {
            warn!(module = name, "dropping module outside the safe list");
        }
    }
    SAFE_MODULES
        .iter()
        .copied()
        .filter(|safe| requested.iter().any(|name| name.as_ref() == *safe))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intersection_keeps_safe_order() {
        let modules = effective_modules(&["json", "os", "math", "json"]);
        assert_eq!(modules, vec!["math", "json"]);
    }

    #[test]
    fn empty_request_enables_nothing() {
        let none: [&str; 0] = [];
        assert!(effective_modules(&none).is_empty());
    }

    #[test]
    fn dunder_names_are_forbidden() {
        assert!(is_forbidden_name("__builtins__"));
        assert!(is_forbidden_name("__class__"));
        assert!(is_forbidden_name("eval"));
        assert!(!is_forbidden_name("_private"));
        assert!(!is_forbidden_name("print"));
    }

    #[test]
    fn builtins_and_forbidden_names_are_disjoint() {
        for name in SAFE_BUILTINS {
            assert!(!is_forbidden_name(name), "{name} is both safe and forbidden");
        }
    }
}
