//! Exception classes, raised-exception state and traceback rendering.

use std::fmt::Write as _;
use std::rc::Rc;

use crate::interp::value::Value;

/// Built-in exception classes available to submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExcKind {
    BaseException,
    Exception,
    ArithmeticError,
    ZeroDivisionError,
    OverflowError,
    LookupError,
    IndexError,
    KeyError,
    ValueError,
    JSONDecodeError,
    TypeError,
    NameError,
    UnboundLocalError,
    AttributeError,
    RuntimeError,
    RecursionError,
    NotImplementedError,
    AssertionError,
    StopIteration,
    MemoryError,
    ImportError,
}

impl ExcKind {
    /// Every class exposed in the global namespace (`JSONDecodeError` is only
    /// reachable through the `json` module).
    pub const BUILTIN: &'static [ExcKind] = &[
        ExcKind::BaseException,
        ExcKind::Exception,
        ExcKind::ArithmeticError,
        ExcKind::ZeroDivisionError,
        ExcKind::OverflowError,
        ExcKind::LookupError,
        ExcKind::IndexError,
        ExcKind::KeyError,
        ExcKind::ValueError,
        ExcKind::TypeError,
        ExcKind::NameError,
        ExcKind::UnboundLocalError,
        ExcKind::AttributeError,
        ExcKind::RuntimeError,
        ExcKind::RecursionError,
        ExcKind::NotImplementedError,
        ExcKind::AssertionError,
        ExcKind::StopIteration,
        ExcKind::MemoryError,
        ExcKind::ImportError,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ExcKind::BaseException => "BaseException",
            ExcKind::Exception => "Exception",
            ExcKind::ArithmeticError => "ArithmeticError",
            ExcKind::ZeroDivisionError => "ZeroDivisionError",
            ExcKind::OverflowError => "OverflowError",
            ExcKind::LookupError => "LookupError",
            ExcKind::IndexError => "IndexError",
            ExcKind::KeyError => "KeyError",
            ExcKind::ValueError => "ValueError",
            ExcKind::JSONDecodeError => "JSONDecodeError",
            ExcKind::TypeError => "TypeError",
            ExcKind::NameError => "NameError",
            ExcKind::UnboundLocalError => "UnboundLocalError",
            ExcKind::AttributeError => "AttributeError",
            ExcKind::RuntimeError => "RuntimeError",
            ExcKind::RecursionError => "RecursionError",
            ExcKind::NotImplementedError => "NotImplementedError",
            ExcKind::AssertionError => "AssertionError",
            ExcKind::StopIteration => "StopIteration",
            ExcKind::MemoryError => "MemoryError",
            ExcKind::ImportError => "ImportError",
        }
    }

    pub fn parent(self) -> Option<ExcKind> {
        let parent = match self {
            ExcKind::BaseException => return None,
            ExcKind::Exception => ExcKind::BaseException,
            ExcKind::ZeroDivisionError | ExcKind::OverflowError => ExcKind::ArithmeticError,
            ExcKind::IndexError | ExcKind::KeyError => ExcKind::LookupError,
            ExcKind::JSONDecodeError => ExcKind::ValueError,
            ExcKind::UnboundLocalError => ExcKind::NameError,
            ExcKind::RecursionError | ExcKind::NotImplementedError => ExcKind::RuntimeError,
            _ => ExcKind::Exception,
        };
        Some(parent)
    }

    /// Whether `self` is `other` or derives from it.
    pub fn is_subclass_of(self, other: ExcKind) -> bool {
        let mut current = Some(self);
        while let Some(kind) = current {
            if kind == other {
                return true;
            }
            current = kind.parent();
        }
        false
    }

    pub fn from_name(name: &str) -> Option<ExcKind> {
        Self::BUILTIN
            .iter()
            .chain(&[ExcKind::JSONDecodeError])
            .copied()
            .find(|kind| kind.name() == name)
    }
}

/// An exception instance.
#[derive(Debug)]
pub struct ExceptionValue {
    pub kind: ExcKind,
    pub args: Vec<Value>,
}

impl ExceptionValue {
    pub fn new(kind: ExcKind, args: Vec<Value>) -> Self {
        Self { kind, args }
    }

    pub fn with_message(kind: ExcKind, message: impl Into<String>) -> Self {
        Self::new(kind, vec![Value::str(message.into())])
    }
}

/// One line of a traceback: the function name and the line being executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    pub name: Rc<str>,
    pub line: u32,
}

/// An exception propagating through the interpreter.
#[derive(Debug, Clone)]
pub struct Raised {
    pub exc: Rc<ExceptionValue>,
    /// Innermost frame first; each frame records the statement it was
    /// executing when the exception passed through.
    pub traceback: Vec<TraceEntry>,
    /// Call depth of the frame the exception was raised in.
    pub origin_depth: usize,
}

/// An attempt to reach outside the capability surface.
#[derive(Debug)]
pub struct Violation {
    pub message: String,
    pub line: Option<u32>,
}

/// Non-local exits that unwind the interpreter.
///
/// Only `Exception` can be caught by submission code; a violation or a
/// cancellation unwinds straight to the top without running `finally`
/// blocks.
#[derive(Debug)]
pub enum Flow {
    Exception(Box<Raised>),
    Violation(Box<Violation>),
    Cancelled,
}

pub type Exec<T> = Result<T, Flow>;

impl Flow {
    pub fn raise(kind: ExcKind, message: impl Into<String>) -> Flow {
        Flow::from_exception(Rc::new(ExceptionValue::with_message(kind, message)))
    }

    pub fn from_exception(exc: Rc<ExceptionValue>) -> Flow {
        Flow::Exception(Box::new(Raised {
            exc,
            traceback: Vec::new(),
            origin_depth: 0,
        }))
    }

    pub fn violation(message: impl Into<String>) -> Flow {
        Flow::Violation(Box::new(Violation {
            message: message.into(),
            line: None,
        }))
    }
}

/// Raise `kind(message)` as an `Err`.
pub fn raise<T>(kind: ExcKind, message: impl Into<String>) -> Exec<T> {
    Err(Flow::raise(kind, message))
}

pub fn type_error<T>(message: impl Into<String>) -> Exec<T> {
    raise(ExcKind::TypeError, message)
}

pub fn value_error<T>(message: impl Into<String>) -> Exec<T> {
    raise(ExcKind::ValueError, message)
}

/// Number of identical consecutive frames shown before collapsing.
const REPEAT_THRESHOLD: usize = 3;

/// Render a Python-style traceback for `entries` ending in `summary`
/// (for example `ZeroDivisionError: division by zero`).
pub fn render_traceback(entries: &[TraceEntry], summary: &str, source: &str) -> String {
    let lines: Vec<&str> = source.lines().collect();
    let mut out = String::from("Traceback (most recent call last):\n");

    let mut index = 0;
    while index < entries.len() {
        let entry = &entries[index];
        let mut run = 1;
        while index + run < entries.len() && entries[index + run] == *entry {
            run += 1;
        }

        let shown = run.min(REPEAT_THRESHOLD);
        for _ in 0..shown {
            write_frame(&mut out, entry, &lines);
        }
        if run > shown {
            let _ = writeln!(
                out,
                "  [Previous line repeated {} more times]",
                run - shown
            );
        }
        index += run;
    }

    out.push_str(summary);
    out
}

fn write_frame(out: &mut String, entry: &TraceEntry, lines: &[&str]) {
    let _ = writeln!(
        out,
        "  File \"<submission>\", line {}, in {}",
        entry.line, entry.name
    );
    if let Some(text) = lines.get(entry.line.saturating_sub(1) as usize) {
        let text = text.trim();
        if !text.is_empty() {
            let _ = writeln!(out, "    {text}");
        }
    }
}
