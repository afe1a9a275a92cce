//! Front end for the sandbox language: tokens, lexer, syntax tree and parser.

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod token;

use thiserror::Error;

pub use ast::Program;
pub use parser::Parser;

/// A lexing or parsing failure with a 1-based source position.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (line {line}, column {column})")]
pub struct SyntaxError {
    pub message: String,
    pub line: u32,
    pub column: u32,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            message: message.into(),
            line,
            column,
        }
    }
}

/// Parse a complete submission into a [`Program`].
pub fn parse(source: &str) -> Result<Program, SyntaxError> {
    Parser::parse(source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syntax_error_display_includes_position() {
        let err = SyntaxError::new("expected ':'", 1, 9);
        assert_eq!(err.to_string(), "expected ':' (line 1, column 9)");
    }

    #[test]
    fn parse_reports_lexer_errors() {
        let err = parse("x = 'unterminated").unwrap_err();
        assert!(err.message.starts_with("unterminated string literal"));
    }
}

#[cfg(test)]
mod proptests {
    use proptest::prelude::*;

    use super::*;

    proptest! {
        #[test]
        fn parse_never_panics(source in ".*") {
            if let Err(err) = parse(&source) {
                prop_assert!(err.line >= 1);
                prop_assert!(err.column >= 1);
            }
        }

        #[test]
        fn integer_assignments_parse(name in "[a-z][a-z0-9_]{0,8}", value in any::<u32>()) {
            prop_assume!(!matches!(
                name.as_str(),
                "if" | "in" | "is" | "or" | "and" | "not" | "def" | "del" | "for" | "try"
                    | "as" | "elif" | "else" | "from" | "pass" | "with" | "class" | "while"
                    | "yield" | "break" | "raise" | "async" | "await" | "assert" | "global"
                    | "import" | "lambda" | "return" | "except" | "finally" | "continue"
                    | "nonlocal"
            ));
            let source = format!("{name} = {value}\n");
            prop_assert!(parse(&source).is_ok());
        }
    }
}
