//! Tokenizer for the sandbox language.
//!
//! Produces a flat token stream with explicit `Newline`, `Indent` and
//! `Dedent` tokens so the parser never has to look at whitespace.

use crate::lang::SyntaxError;
use crate::lang::token::{Position, Token, TokenKind};

const TAB_WIDTH: usize = 8;
const MAX_INDENT_LEVELS: usize = 100;

pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    column: u32,
    tokens: Vec<Token>,
    indents: Vec<usize>,
    /// Open brackets with the position they were opened at.
    brackets: Vec<(char, Position)>,
    at_line_start: bool,
    /// Lexing an f-string field: newlines are insignificant and no
    /// indentation tokens are produced.
    expression_mode: bool,
}

impl Lexer {
    fn with_source(source: &str, line: u32, expression_mode: bool) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line,
            column: 1,
            tokens: Vec::new(),
            indents: vec![0],
            brackets: Vec::new(),
            at_line_start: !expression_mode,
            expression_mode,
        }
    }

    /// Tokenize a complete submission.
    pub fn tokenize(source: &str) -> Result<Vec<Token>, SyntaxError> {
        let mut lexer = Self::with_source(source, 1, false);
        lexer.run()?;
        Ok(lexer.tokens)
    }

    /// Tokenize a single expression embedded in an f-string.
    pub fn tokenize_expression(source: &str, line: u32) -> Result<Vec<Token>, SyntaxError> {
        let mut lexer = Self::with_source(source, line, true);
        lexer.run()?;
        Ok(lexer.tokens)
    }

    fn position(&self) -> Position {
        Position::new(self.line, self.column)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn error(&self, message: impl Into<String>, pos: Position) -> SyntaxError {
        SyntaxError::new(message, pos.line, pos.column)
    }

    fn push(&mut self, kind: TokenKind, pos: Position) {
        self.tokens.push(Token::new(kind, pos));
    }

    fn last_is_newline(&self) -> bool {
        matches!(
            self.tokens.last().map(|t| &t.kind),
            None | Some(TokenKind::Newline) | Some(TokenKind::Indent) | Some(TokenKind::Dedent)
        )
    }

    fn newlines_significant(&self) -> bool {
        !self.expression_mode && self.brackets.is_empty()
    }

    fn run(&mut self) -> Result<(), SyntaxError> {
        loop {
            if self.at_line_start && self.newlines_significant() && !self.handle_indentation()? {
                break;
            }

            let Some(ch) = self.peek() else { break };
            let start = self.position();

            match ch {
                ' ' | '\t' | '\x0c' => {
                    self.bump();
                }
                '#' => self.skip_comment(),
                '\\' => {
                    self.bump();
                    match self.peek() {
                        Some('\n') => {
                            self.bump();
                        }
                        Some('\r') if self.peek_at(1) == Some('\n') => {
                            self.bump();
                            self.bump();
                        }
                        _ => {
                            return Err(self.error(
                                "unexpected character after line continuation character",
                                start,
                            ));
                        }
                    }
                }
                '\r' | '\n' => {
                    self.bump();
                    if ch == '\r' && self.peek() == Some('\n') {
                        self.bump();
                    }
                    if self.newlines_significant() {
                        if !self.last_is_newline() {
                            self.push(TokenKind::Newline, start);
                        }
                        self.at_line_start = true;
                    }
                }
                '0'..='9' => self.lex_number()?,
                '.' if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => self.lex_number()?,
                '"' | '\'' => self.lex_string(StringPrefix::default(), start)?,
                c if is_identifier_start(c) => self.lex_name_or_prefixed_string()?,
                _ => self.lex_operator()?,
            }
        }

        if let Some((open, pos)) = self.brackets.first().copied() {
            return Err(self.error(format!("'{open}' was never closed"), pos));
        }

        let end = self.position();
        if !self.expression_mode && !self.last_is_newline() {
            self.push(TokenKind::Newline, end);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(TokenKind::Dedent, end);
        }
        self.push(TokenKind::EndOfFile, end);
        Ok(())
    }

    /// Measure indentation at the start of a logical line and emit
    /// `Indent`/`Dedent` tokens. Returns false at end of input.
    fn handle_indentation(&mut self) -> Result<bool, SyntaxError> {
        loop {
            let mut width = 0usize;
            while let Some(ch) = self.peek() {
                match ch {
                    ' ' => width += 1,
                    '\t' => width = (width / TAB_WIDTH + 1) * TAB_WIDTH,
                    '\x0c' => width = 0,
                    _ => break,
                }
                self.bump();
            }

            match self.peek() {
                None => return Ok(false),
                // Blank and comment-only lines do not affect indentation.
                Some('#') => {
                    self.skip_comment();
                    continue;
                }
                Some('\n') | Some('\r') => {
                    let ch = self.bump();
                    if ch == Some('\r') && self.peek() == Some('\n') {
                        self.bump();
                    }
                    continue;
                }
                Some(_) => {}
            }

            let pos = self.position();
            let current = self.indents.last().copied().unwrap_or(0);
            if width > current {
                if self.tokens.is_empty() {
                    return Err(self.error("unexpected indent", pos));
                }
                if self.indents.len() >= MAX_INDENT_LEVELS {
                    return Err(self.error("too many levels of indentation", pos));
                }
                self.indents.push(width);
                self.push(TokenKind::Indent, pos);
            } else if width < current {
                while self.indents.last().is_some_and(|&level| level > width) {
                    self.indents.pop();
                    self.push(TokenKind::Dedent, pos);
                }
                if self.indents.last().copied().unwrap_or(0) != width {
                    return Err(self.error(
                        "unindent does not match any outer indentation level",
                        pos,
                    ));
                }
            }
            self.at_line_start = false;
            return Ok(true);
        }
    }

    fn skip_comment(&mut self) {
        while let Some(ch) = self.peek() {
            if ch == '\n' || ch == '\r' {
                break;
            }
            self.bump();
        }
    }

    fn lex_name_or_prefixed_string(&mut self) -> Result<(), SyntaxError> {
        let start = self.position();
        let begin = self.pos;
        while self.peek().is_some_and(is_identifier_continue) {
            self.bump();
        }
        let word: String = self.chars[begin..self.pos].iter().collect();

        if matches!(self.peek(), Some('"') | Some('\''))
            && let Some(prefix) = StringPrefix::parse(&word)
        {
            if prefix.bytes {
                return Err(self.error("bytes literals are not supported in the sandbox", start));
            }
            return self.lex_string(prefix, start);
        }

        let kind = TokenKind::keyword(&word).unwrap_or(TokenKind::Name(word));
        self.push(kind, start);
        Ok(())
    }

    fn lex_number(&mut self) -> Result<(), SyntaxError> {
        let start = self.position();

        if self.peek() == Some('0')
            && let Some(radix_char) = self.peek_at(1)
        {
            let radix = match radix_char {
                'x' | 'X' => Some(16),
                'o' | 'O' => Some(8),
                'b' | 'B' => Some(2),
                _ => None,
            };
            if let Some(radix) = radix {
                self.bump();
                self.bump();
                let digits = self.take_digits(|c| c.is_digit(radix));
                if digits.is_empty() {
                    return Err(self.error("invalid number literal", start));
                }
                let value = i64::from_str_radix(&digits, radix)
                    .map_err(|_| self.error("integer literal is too large", start))?;
                self.push(TokenKind::Int(value), start);
                return self.reject_trailing_identifier(start);
            }
        }

        let mut text = self.take_digits(|c| c.is_ascii_digit());
        let mut is_float = false;

        if self.peek() == Some('.') && self.peek_at(1).is_none_or(|c| c != '.') {
            is_float = true;
            self.bump();
            text.push('.');
            text.push_str(&self.take_digits(|c| c.is_ascii_digit()));
        }

        if matches!(self.peek(), Some('e') | Some('E')) {
            let sign_offset = usize::from(matches!(self.peek_at(1), Some('+') | Some('-')));
            if self.peek_at(1 + sign_offset).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                text.push('e');
                self.bump();
                if sign_offset == 1
                    && let Some(sign) = self.bump()
                {
                    text.push(sign);
                }
                text.push_str(&self.take_digits(|c| c.is_ascii_digit()));
            }
        }

        if matches!(self.peek(), Some('j') | Some('J')) {
            return Err(self.error("complex numbers are not supported in the sandbox", start));
        }

        if is_float {
            let value: f64 = text
                .parse()
                .map_err(|_| self.error("invalid number literal", start))?;
            self.push(TokenKind::Float(value), start);
        } else {
            if text.len() > 1 && text.starts_with('0') && text.chars().any(|c| c != '0') {
                return Err(self.error(
                    "leading zeros in decimal integer literals are not permitted",
                    start,
                ));
            }
            let value: i64 = text
                .parse()
                .map_err(|_| self.error("integer literal is too large", start))?;
            self.push(TokenKind::Int(value), start);
        }
        self.reject_trailing_identifier(start)
    }

    /// Collect digits accepted by `accept`, allowing single `_` separators.
    fn take_digits(&mut self, accept: impl Fn(char) -> bool) -> String {
        let mut digits = String::new();
        while let Some(ch) = self.peek() {
            if accept(ch) {
                digits.push(ch);
                self.bump();
            } else if ch == '_' && !digits.is_empty() && self.peek_at(1).is_some_and(&accept) {
                self.bump();
            } else {
                break;
            }
        }
        digits
    }

    fn reject_trailing_identifier(&self, start: Position) -> Result<(), SyntaxError> {
        if self.peek().is_some_and(is_identifier_start) {
            return Err(self.error("invalid decimal literal", start));
        }
        Ok(())
    }

    fn lex_string(&mut self, prefix: StringPrefix, start: Position) -> Result<(), SyntaxError> {
        let Some(quote) = self.bump() else {
            return Err(self.error("unexpected end of input", start));
        };
        let triple = self.peek() == Some(quote) && self.peek_at(1) == Some(quote);
        if triple {
            self.bump();
            self.bump();
        }

        let mut value = String::new();
        loop {
            let Some(ch) = self.peek() else {
                let message = if triple {
                    format!(
                        "unterminated triple-quoted string literal (detected at line {})",
                        self.line
                    )
                } else {
                    format!("unterminated string literal (detected at line {})", self.line)
                };
                return Err(self.error(message, start));
            };

            if ch == quote {
                if !triple {
                    self.bump();
                    break;
                }
                if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
                    self.bump();
                    self.bump();
                    self.bump();
                    break;
                }
                value.push(ch);
                self.bump();
                continue;
            }

            if (ch == '\n' || ch == '\r') && !triple {
                return Err(self.error(
                    format!("unterminated string literal (detected at line {})", self.line),
                    start,
                ));
            }

            if ch == '\\' {
                self.bump();
                if prefix.raw {
                    value.push('\\');
                    if let Some(next) = self.bump() {
                        value.push(next);
                    }
                } else {
                    self.lex_escape(&mut value, start)?;
                }
                continue;
            }

            value.push(ch);
            self.bump();
        }

        let kind = if prefix.format {
            TokenKind::FString(value)
        } else {
            TokenKind::Str(value)
        };

        // Adjacent literals are concatenated by the parser.
        self.push(kind, start);
        Ok(())
    }

    fn lex_escape(&mut self, value: &mut String, start: Position) -> Result<(), SyntaxError> {
        let Some(ch) = self.bump() else {
            return Err(self.error(
                format!("unterminated string literal (detected at line {})", self.line),
                start,
            ));
        };
        match ch {
            '\n' => {}
            '\r' => {
                if self.peek() == Some('\n') {
                    self.bump();
                }
            }
            '\\' => value.push('\\'),
            '\'' => value.push('\''),
            '"' => value.push('"'),
            'n' => value.push('\n'),
            't' => value.push('\t'),
            'r' => value.push('\r'),
            'a' => value.push('\x07'),
            'b' => value.push('\x08'),
            'f' => value.push('\x0c'),
            'v' => value.push('\x0b'),
            '0'..='7' => {
                let mut code = ch.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match self.peek().and_then(|c| c.to_digit(8)) {
                        Some(digit) => {
                            code = code * 8 + digit;
                            self.bump();
                        }
                        None => break,
                    }
                }
                value.push(char::from_u32(code).unwrap_or('\u{fffd}'));
            }
            'x' => value.push(self.lex_hex_escape(2, start)?),
            'u' => value.push(self.lex_hex_escape(4, start)?),
            'U' => value.push(self.lex_hex_escape(8, start)?),
            other => {
                value.push('\\');
                value.push(other);
            }
        }
        Ok(())
    }

    fn lex_hex_escape(&mut self, count: usize, start: Position) -> Result<char, SyntaxError> {
        let mut code = 0u32;
        for _ in 0..count {
            let digit = self
                .peek()
                .and_then(|c| c.to_digit(16))
                .ok_or_else(|| self.error("truncated \\x, \\u or \\U escape in string", start))?;
            code = code * 16 + digit;
            self.bump();
        }
        char::from_u32(code).ok_or_else(|| self.error("illegal Unicode character in string", start))
    }

    fn lex_operator(&mut self) -> Result<(), SyntaxError> {
        let start = self.position();
        let Some(ch) = self.bump() else {
            return Ok(());
        };
        let next = self.peek();
        let after = self.peek_at(1);

        let (kind, extra) = match (ch, next, after) {
            ('*', Some('*'), Some('=')) => (TokenKind::DoubleStarEqual, 2),
            ('*', Some('*'), _) => (TokenKind::DoubleStar, 1),
            ('*', Some('='), _) => (TokenKind::StarEqual, 1),
            ('*', _, _) => (TokenKind::Star, 0),
            ('/', Some('/'), Some('=')) => (TokenKind::DoubleSlashEqual, 2),
            ('/', Some('/'), _) => (TokenKind::DoubleSlash, 1),
            ('/', Some('='), _) => (TokenKind::SlashEqual, 1),
            ('/', _, _) => (TokenKind::Slash, 0),
            ('<', Some('<'), Some('=')) => (TokenKind::LeftShiftEqual, 2),
            ('<', Some('<'), _) => (TokenKind::LeftShift, 1),
            ('<', Some('='), _) => (TokenKind::LessEqual, 1),
            ('<', Some('>'), _) => {
                return Err(self.error("invalid syntax", start));
            }
            ('<', _, _) => (TokenKind::Less, 0),
            ('>', Some('>'), Some('=')) => (TokenKind::RightShiftEqual, 2),
            ('>', Some('>'), _) => (TokenKind::RightShift, 1),
            ('>', Some('='), _) => (TokenKind::GreaterEqual, 1),
            ('>', _, _) => (TokenKind::Greater, 0),
            ('+', Some('='), _) => (TokenKind::PlusEqual, 1),
            ('+', _, _) => (TokenKind::Plus, 0),
            ('-', Some('='), _) => (TokenKind::MinusEqual, 1),
            ('-', Some('>'), _) => (TokenKind::Arrow, 1),
            ('-', _, _) => (TokenKind::Minus, 0),
            ('%', Some('='), _) => (TokenKind::PercentEqual, 1),
            ('%', _, _) => (TokenKind::Percent, 0),
            ('@', Some('='), _) => (TokenKind::AtEqual, 1),
            ('@', _, _) => (TokenKind::At, 0),
            ('&', Some('='), _) => (TokenKind::AmperEqual, 1),
            ('&', _, _) => (TokenKind::Amper, 0),
            ('|', Some('='), _) => (TokenKind::PipeEqual, 1),
            ('|', _, _) => (TokenKind::Pipe, 0),
            ('^', Some('='), _) => (TokenKind::CaretEqual, 1),
            ('^', _, _) => (TokenKind::Caret, 0),
            ('=', Some('='), _) => (TokenKind::EqEqual, 1),
            ('=', _, _) => (TokenKind::Equal, 0),
            ('!', Some('='), _) => (TokenKind::NotEqual, 1),
            (':', Some('='), _) => (TokenKind::Walrus, 1),
            (':', _, _) => (TokenKind::Colon, 0),
            ('.', Some('.'), Some('.')) => (TokenKind::Ellipsis, 2),
            ('.', _, _) => (TokenKind::Dot, 0),
            ('~', _, _) => (TokenKind::Tilde, 0),
            (',', _, _) => (TokenKind::Comma, 0),
            (';', _, _) => (TokenKind::Semicolon, 0),
            ('(' | '[' | '{', _, _) => {
                self.brackets.push((ch, start));
                let kind = match ch {
                    '(' => TokenKind::LParen,
                    '[' => TokenKind::LBracket,
                    _ => TokenKind::LBrace,
                };
                (kind, 0)
            }
            (')' | ']' | '}', _, _) => {
                let expected = match ch {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match self.brackets.pop() {
                    Some((open, _)) if open == expected => {}
                    Some((open, _)) => {
                        return Err(self.error(
                            format!(
                                "closing parenthesis '{ch}' does not match opening parenthesis '{open}'"
                            ),
                            start,
                        ));
                    }
                    None => {
                        return Err(self.error(format!("unmatched '{ch}'"), start));
                    }
                }
                let kind = match ch {
                    ')' => TokenKind::RParen,
                    ']' => TokenKind::RBracket,
                    _ => TokenKind::RBrace,
                };
                (kind, 0)
            }
            ('$' | '?' | '`' | '!', _, _) => {
                return Err(self.error("invalid syntax", start));
            }
            (other, _, _) => {
                return Err(self.error(
                    format!(
                        "invalid character '{other}' (U+{:04X})",
                        u32::from(other)
                    ),
                    start,
                ));
            }
        };

        for _ in 0..extra {
            self.bump();
        }
        self.push(kind, start);
        Ok(())
    }
}

/// Prefix flags on a string literal.
#[derive(Debug, Default, Clone, Copy)]
struct StringPrefix {
    raw: bool,
    format: bool,
    bytes: bool,
}

impl StringPrefix {
    fn parse(word: &str) -> Option<Self> {
        if word.len() > 2 {
            return None;
        }
        let mut prefix = StringPrefix::default();
        for ch in word.chars() {
            match ch.to_ascii_lowercase() {
                'r' if !prefix.raw => prefix.raw = true,
                'f' if !prefix.format && !prefix.bytes => prefix.format = true,
                'b' if !prefix.bytes && !prefix.format => prefix.bytes = true,
                'u' if word.len() == 1 => {}
                _ => return None,
            }
        }
        Some(prefix)
    }
}

fn is_identifier_start(c: char) -> bool {
    c == '_' || c.is_alphabetic()
}

fn is_identifier_continue(c: char) -> bool {
    c == '_' || c.is_alphanumeric()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::tokenize(source)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn simple_assignment() {
        assert_eq!(
            kinds("x = 10\n"),
            vec![
                TokenKind::Name("x".into()),
                TokenKind::Equal,
                TokenKind::Int(10),
                TokenKind::Newline,
                TokenKind::EndOfFile,
            ]
        );
    }

    #[test]
    fn indentation_produces_indent_and_dedent() {
        let tokens = kinds("if x:\n    y\nz\n");
        assert_eq!(
            tokens,
            vec![
                TokenKind::If,
                TokenKind::Name("x".into()),
                TokenKind::Colon,
                TokenKind::Newline,
                TokenKind::Indent,
                TokenKind::Name("y".into()),
                TokenKind::Newline,
                TokenKind::Dedent,
                TokenKind::Name("z".into()),
                TokenKind::Newline,
                TokenKind::EndOfFile,
            ]
        );
    }

    #[test]
    fn blank_and_comment_lines_are_ignored() {
        let tokens = kinds("x = 1\n\n    # indented comment\ny = 2");
        assert!(!tokens.contains(&TokenKind::Indent));
        assert_eq!(tokens.iter().filter(|k| **k == TokenKind::Newline).count(), 2);
    }

    #[test]
    fn newlines_inside_brackets_are_joined() {
        let tokens = kinds("x = [1,\n     2]\n");
        assert_eq!(tokens.iter().filter(|k| **k == TokenKind::Newline).count(), 1);
    }

    #[test]
    fn numbers() {
        assert_eq!(kinds("1_000")[0], TokenKind::Int(1000));
        assert_eq!(kinds("0xff")[0], TokenKind::Int(255));
        assert_eq!(kinds("0b101")[0], TokenKind::Int(5));
        assert_eq!(kinds("3.5")[0], TokenKind::Float(3.5));
        assert_eq!(kinds("1e3")[0], TokenKind::Float(1000.0));
        assert_eq!(kinds(".5")[0], TokenKind::Float(0.5));
    }

    #[test]
    fn strings_and_escapes() {
        assert_eq!(kinds("'a\\nb'")[0], TokenKind::Str("a\nb".into()));
        assert_eq!(kinds("r'a\\nb'")[0], TokenKind::Str("a\\nb".into()));
        assert_eq!(kinds("\"\"\"a\nb\"\"\"")[0], TokenKind::Str("a\nb".into()));
        assert_eq!(kinds("f'{x}'")[0], TokenKind::FString("{x}".into()));
        assert_eq!(kinds("'\\x41\\u00e9'")[0], TokenKind::Str("Aé".into()));
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let err = Lexer::tokenize("print('unclosed string").unwrap_err();
        assert!(err.message.contains("unterminated string literal"));
        assert_eq!(err.line, 1);
    }

    #[test]
    fn unclosed_bracket_is_an_error() {
        let err = Lexer::tokenize("print((1, 2)").unwrap_err();
        assert_eq!(err.message, "'(' was never closed");
    }

    #[test]
    fn mismatched_bracket_is_an_error() {
        let err = Lexer::tokenize("x = [1, 2)").unwrap_err();
        assert!(err.message.contains("does not match"));
    }

    #[test]
    fn bad_dedent_is_an_error() {
        let err = Lexer::tokenize("if x:\n        y\n    z\n").unwrap_err();
        assert!(err.message.contains("unindent"));
    }

    #[test]
    fn leading_indent_is_an_error() {
        let err = Lexer::tokenize("  x = 1\n").unwrap_err();
        assert_eq!(err.message, "unexpected indent");
    }

    #[test]
    fn operators() {
        assert_eq!(
            kinds("a //= b ** c != d"),
            vec![
                TokenKind::Name("a".into()),
                TokenKind::DoubleSlashEqual,
                TokenKind::Name("b".into()),
                TokenKind::DoubleStar,
                TokenKind::Name("c".into()),
                TokenKind::NotEqual,
                TokenKind::Name("d".into()),
                TokenKind::Newline,
                TokenKind::EndOfFile,
            ]
        );
    }

    #[test]
    fn expression_mode_ignores_newlines() {
        let tokens = Lexer::tokenize_expression("x +\n 1", 4).unwrap();
        assert_eq!(tokens.len(), 4);
        assert_eq!(tokens[0].pos.line, 4);
        assert_eq!(tokens[3].kind, TokenKind::EndOfFile);
    }

    #[test]
    fn invalid_character_is_reported() {
        let err = Lexer::tokenize("x = 1 $ 2").unwrap_err();
        assert_eq!(err.message, "invalid syntax");
        let err = Lexer::tokenize("x = ¤").unwrap_err();
        assert!(err.message.starts_with("invalid character"));
    }
}
