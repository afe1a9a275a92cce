//! Recursive-descent parser producing the [`Program`] tree.
//!
//! Recursion is bounded twice: `nesting` caps how deep the parser itself
//! recurses, and every expression node carries its subtree height so that
//! long left-associative chains cannot produce trees the evaluator would
//! overflow on.

use std::sync::Arc;

use crate::lang::SyntaxError;
use crate::lang::ast::*;
use crate::lang::lexer::Lexer;
use crate::lang::token::{Position, Token, TokenKind};

/// Maximum parser recursion (roughly two levels per bracket pair).
const MAX_NESTING: u32 = 100;
/// Maximum height of a single expression tree.
const MAX_EXPR_DEPTH: u32 = 200;
/// Maximum nesting of indented blocks.
const MAX_BLOCK_DEPTH: u32 = 50;

/// Number of binary-operator precedence levels handled by `parse_binary`.
const BINARY_LEVELS: usize = 6;

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    nesting: u32,
    block_depth: u32,
    function_depth: u32,
    loop_depth: u32,
}

impl Parser {
    /// Parse a complete submission.
    pub fn parse(source: &str) -> Result<Program, SyntaxError> {
        let tokens = Lexer::tokenize(source)?;
        let mut parser = Parser::new(tokens, 0);
        parser.parse_program()
    }

    fn new(tokens: Vec<Token>, nesting: u32) -> Self {
        Self {
            tokens,
            pos: 0,
            nesting,
            block_depth: 0,
            function_depth: 0,
            loop_depth: 0,
        }
    }

    // ---- token helpers ----

    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].kind
    }

    fn peek_at(&self, offset: usize) -> &TokenKind {
        let index = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[index].kind
    }

    fn current_pos(&self) -> Position {
        self.tokens[self.pos.min(self.tokens.len() - 1)].pos
    }

    fn line(&self) -> u32 {
        self.current_pos().line
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek() == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<Token, SyntaxError> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.error_here(format!("expected {kind}")))
        }
    }

    fn expect_name(&mut self) -> Result<String, SyntaxError> {
        match self.peek().clone() {
            TokenKind::Name(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.error_here("invalid syntax")),
        }
    }

    fn error_here(&self, message: impl Into<String>) -> SyntaxError {
        let pos = self.current_pos();
        if matches!(self.peek(), TokenKind::Indent) {
            return SyntaxError::new("unexpected indent", pos.line, pos.column);
        }
        SyntaxError::new(message, pos.line, pos.column)
    }

    fn error_at(&self, message: impl Into<String>, line: u32) -> SyntaxError {
        SyntaxError::new(message, line, 1)
    }

    fn enter(&mut self) -> Result<(), SyntaxError> {
        self.nesting += 1;
        if self.nesting > MAX_NESTING {
            return Err(self.error_here("expression is too deeply nested"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.nesting -= 1;
    }

    fn check_depth(&self, expr: &Expr) -> Result<(), SyntaxError> {
        if expr.depth > MAX_EXPR_DEPTH {
            return Err(self.error_at("expression is too deeply nested", expr.line));
        }
        Ok(())
    }

    fn at_statement_end(&self) -> bool {
        matches!(
            self.peek(),
            TokenKind::Newline | TokenKind::Semicolon | TokenKind::EndOfFile
        )
    }

    // ---- statements ----

    fn parse_program(&mut self) -> Result<Program, SyntaxError> {
        let mut body = Vec::new();
        while !self.check(&TokenKind::EndOfFile) {
            if self.eat(&TokenKind::Newline) {
                continue;
            }
            body.extend(self.parse_statement()?);
        }
        Ok(Program { body })
    }

    fn parse_statement(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        let stmt = match self.peek() {
            TokenKind::If => self.parse_if()?,
            TokenKind::While => self.parse_while()?,
            TokenKind::For => self.parse_for()?,
            TokenKind::Try => self.parse_try()?,
            TokenKind::Def => self.parse_def()?,
            TokenKind::Class => {
                return Err(self.error_here("class definitions are not supported in the sandbox"));
            }
            TokenKind::With => {
                return Err(self.error_here("'with' statements are not supported in the sandbox"));
            }
            TokenKind::Async | TokenKind::Await => {
                return Err(self.error_here("async code is not supported in the sandbox"));
            }
            TokenKind::At => {
                return Err(self.error_here("decorators are not supported in the sandbox"));
            }
            TokenKind::Indent => return Err(self.error_here("unexpected indent")),
            TokenKind::Dedent => return Err(self.error_here("invalid syntax")),
            TokenKind::Else | TokenKind::Elif | TokenKind::Except | TokenKind::Finally => {
                return Err(self.error_here("invalid syntax"));
            }
            _ => return self.parse_simple_line(),
        };
        Ok(vec![stmt])
    }

    fn parse_simple_line(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        let mut stmts = Vec::new();
        loop {
            stmts.push(self.parse_small_statement()?);
            if self.eat(&TokenKind::Semicolon) {
                if matches!(self.peek(), TokenKind::Newline | TokenKind::EndOfFile) {
                    break;
                }
                continue;
            }
            break;
        }
        match self.peek() {
            TokenKind::Newline => {
                self.advance();
            }
            TokenKind::EndOfFile => {}
            TokenKind::Walrus => {
                return Err(
                    self.error_here("assignment expressions are not supported in the sandbox")
                );
            }
            _ => return Err(self.error_here("invalid syntax")),
        }
        Ok(stmts)
    }

    fn parse_block(&mut self, header: &str, header_line: u32) -> Result<Vec<Stmt>, SyntaxError> {
        if !self.check(&TokenKind::Colon) {
            return Err(self.error_here("expected ':'"));
        }
        self.advance();

        if !self.eat(&TokenKind::Newline) {
            return self.parse_simple_line();
        }

        if !self.eat(&TokenKind::Indent) {
            return Err(self.error_here(format!(
                "expected an indented block after {header} on line {header_line}"
            )));
        }

        self.block_depth += 1;
        if self.block_depth > MAX_BLOCK_DEPTH {
            return Err(self.error_here("too many statically nested blocks"));
        }

        let mut body = Vec::new();
        while !self.check(&TokenKind::Dedent) && !self.check(&TokenKind::EndOfFile) {
            if self.eat(&TokenKind::Newline) {
                continue;
            }
            body.extend(self.parse_statement()?);
        }
        self.eat(&TokenKind::Dedent);
        self.block_depth -= 1;
        Ok(body)
    }

    fn parse_if(&mut self) -> Result<Stmt, SyntaxError> {
        let line = self.advance().pos.line;
        let test = self.parse_named_test()?;
        let body = self.parse_block("'if' statement", line)?;
        let orelse = self.parse_else_chain()?;
        Ok(Stmt {
            kind: StmtKind::If { test, body, orelse },
            line,
        })
    }

    fn parse_else_chain(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        match self.peek() {
            TokenKind::Elif => {
                let line = self.advance().pos.line;
                let test = self.parse_named_test()?;
                let body = self.parse_block("'elif' statement", line)?;
                let orelse = self.parse_else_chain()?;
                Ok(vec![Stmt {
                    kind: StmtKind::If { test, body, orelse },
                    line,
                }])
            }
            TokenKind::Else => {
                let line = self.advance().pos.line;
                self.parse_block("'else' statement", line)
            }
            _ => Ok(Vec::new()),
        }
    }

    fn parse_optional_else(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        if self.check(&TokenKind::Else) {
            let line = self.advance().pos.line;
            self.parse_block("'else' statement", line)
        } else {
            Ok(Vec::new())
        }
    }

    fn parse_while(&mut self) -> Result<Stmt, SyntaxError> {
        let line = self.advance().pos.line;
        let test = self.parse_named_test()?;
        let body = self.parse_loop_body("'while' statement", line)?;
        let orelse = self.parse_optional_else()?;
        Ok(Stmt {
            kind: StmtKind::While { test, body, orelse },
            line,
        })
    }

    fn parse_for(&mut self) -> Result<Stmt, SyntaxError> {
        let line = self.advance().pos.line;
        let target = self.parse_target_list()?;
        if !self.eat(&TokenKind::In) {
            return Err(self.error_here("expected 'in'"));
        }
        let iter = self.parse_testlist()?;
        let body = self.parse_loop_body("'for' statement", line)?;
        let orelse = self.parse_optional_else()?;
        Ok(Stmt {
            kind: StmtKind::For {
                target,
                iter,
                body,
                orelse,
            },
            line,
        })
    }

    fn parse_loop_body(&mut self, header: &str, line: u32) -> Result<Vec<Stmt>, SyntaxError> {
        self.loop_depth += 1;
        let body = self.parse_block(header, line);
        self.loop_depth -= 1;
        body
    }

    fn parse_try(&mut self) -> Result<Stmt, SyntaxError> {
        let line = self.advance().pos.line;
        let body = self.parse_block("'try' statement", line)?;

        let mut handlers = Vec::new();
        while self.check(&TokenKind::Except) {
            let handler_line = self.advance().pos.line;
            if self.check(&TokenKind::Star) {
                return Err(self.error_here("exception groups are not supported in the sandbox"));
            }
            let (kind, name) = if self.check(&TokenKind::Colon) {
                (None, None)
            } else {
                let kind = self.parse_test()?;
                if self.check(&TokenKind::Comma) {
                    return Err(self.error_here(
                        "multiple exception types must be parenthesized",
                    ));
                }
                let name = if self.eat(&TokenKind::As) {
                    Some(self.expect_name()?)
                } else {
                    None
                };
                (Some(kind), name)
            };
            let handler_body = self.parse_block("'except' statement", handler_line)?;
            handlers.push(ExceptHandler {
                kind,
                name,
                body: handler_body,
                line: handler_line,
            });
        }

        let orelse = if !handlers.is_empty() {
            self.parse_optional_else()?
        } else {
            Vec::new()
        };

        let finalbody = if self.check(&TokenKind::Finally) {
            let finally_line = self.advance().pos.line;
            self.parse_block("'finally' statement", finally_line)?
        } else {
            Vec::new()
        };

        if handlers.is_empty() && finalbody.is_empty() {
            return Err(self.error_here("expected 'except' or 'finally' block"));
        }

        Ok(Stmt {
            kind: StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            },
            line,
        })
    }

    fn parse_def(&mut self) -> Result<Stmt, SyntaxError> {
        let line = self.advance().pos.line;
        let name = self.expect_name()?;
        self.expect(&TokenKind::LParen)?;
        let params = self.parse_params(&TokenKind::RParen, true)?;
        self.expect(&TokenKind::RParen)?;
        if self.eat(&TokenKind::Arrow) {
            self.parse_test()?;
        }
        let outer_loops = std::mem::take(&mut self.loop_depth);
        self.function_depth += 1;
        let body = self.parse_block("function definition", line);
        self.function_depth -= 1;
        self.loop_depth = outer_loops;
        let body = body?;
        Ok(Stmt {
            kind: StmtKind::FunctionDef(Arc::new(FunctionDef::new(name, params, body, line))),
            line,
        })
    }

    /// Parse a parameter list up to (not including) `closing`.
    fn parse_params(
        &mut self,
        closing: &TokenKind,
        annotations: bool,
    ) -> Result<Params, SyntaxError> {
        let mut params = Params::default();
        let mut seen_default = false;
        let mut keyword_only = false;
        let mut names: Vec<String> = Vec::new();

        while !self.check(closing) {
            if self.eat(&TokenKind::Slash) {
                // Positional-only marker; all parameters accept positions here.
            } else if self.eat(&TokenKind::DoubleStar) {
                let name = self.expect_name()?;
                if annotations && self.eat(&TokenKind::Colon) {
                    self.parse_test()?;
                }
                names.push(name.clone());
                params.kwarg = Some(name);
            } else if self.eat(&TokenKind::Star) {
                if params.vararg.is_some() || keyword_only {
                    return Err(self.error_here("* argument may appear only once"));
                }
                keyword_only = true;
                if let TokenKind::Name(_) = self.peek() {
                    let name = self.expect_name()?;
                    if annotations && self.eat(&TokenKind::Colon) {
                        self.parse_test()?;
                    }
                    names.push(name.clone());
                    params.vararg = Some(name);
                }
            } else {
                if params.kwarg.is_some() {
                    return Err(self.error_here("arguments cannot follow var-keyword argument"));
                }
                let name = self.expect_name()?;
                if annotations && self.eat(&TokenKind::Colon) {
                    self.parse_test()?;
                }
                let default = if self.eat(&TokenKind::Equal) {
                    Some(self.parse_test()?)
                } else {
                    None
                };
                if keyword_only {
                    params.kwonly.push(Param {
                        name: name.clone(),
                        default,
                    });
                } else {
                    if default.is_some() {
                        seen_default = true;
                    } else if seen_default {
                        return Err(self.error_here(
                            "parameter without a default follows parameter with a default",
                        ));
                    }
                    params.positional.push(Param {
                        name: name.clone(),
                        default,
                    });
                }
                names.push(name);
            }

            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }

        for (index, name) in names.iter().enumerate() {
            if names[..index].contains(name) {
                return Err(self.error_here(format!(
                    "duplicate argument '{name}' in function definition"
                )));
            }
        }

        Ok(params)
    }

    fn parse_small_statement(&mut self) -> Result<Stmt, SyntaxError> {
        let line = self.line();
        let kind = match self.peek() {
            TokenKind::Pass => {
                self.advance();
                StmtKind::Pass
            }
            TokenKind::Break => {
                if self.loop_depth == 0 {
                    return Err(self.error_here("'break' outside loop"));
                }
                self.advance();
                StmtKind::Break
            }
            TokenKind::Continue => {
                if self.loop_depth == 0 {
                    return Err(self.error_here("'continue' not properly in loop"));
                }
                self.advance();
                StmtKind::Continue
            }
            TokenKind::Return => {
                if self.function_depth == 0 {
                    return Err(self.error_here("'return' outside function"));
                }
                self.advance();
                if self.at_statement_end() {
                    StmtKind::Return(None)
                } else {
                    StmtKind::Return(Some(self.parse_testlist_star_expr()?))
                }
            }
            TokenKind::Raise => {
                self.advance();
                if self.at_statement_end() {
                    StmtKind::Raise(None)
                } else {
                    let exc = self.parse_test()?;
                    if self.eat(&TokenKind::From) {
                        // The cause is evaluated for errors but otherwise unused.
                        self.parse_test()?;
                    }
                    StmtKind::Raise(Some(exc))
                }
            }
            TokenKind::Global => {
                self.advance();
                StmtKind::Global(self.parse_name_list()?)
            }
            TokenKind::Nonlocal => {
                self.advance();
                StmtKind::Nonlocal(self.parse_name_list()?)
            }
            TokenKind::Del => {
                self.advance();
                let expr = self.parse_exprlist()?;
                let targets = match expr.kind {
                    ExprKind::Tuple(items) => items
                        .into_iter()
                        .map(|item| self.to_target(item))
                        .collect::<Result<Vec<_>, _>>()?,
                    _ => vec![self.to_target(expr)?],
                };
                StmtKind::Delete(targets)
            }
            TokenKind::Assert => {
                self.advance();
                let test = self.parse_test()?;
                let msg = if self.eat(&TokenKind::Comma) {
                    Some(self.parse_test()?)
                } else {
                    None
                };
                StmtKind::Assert { test, msg }
            }
            TokenKind::Import => {
                self.advance();
                let mut aliases = Vec::new();
                loop {
                    let name = self.parse_dotted_name()?;
                    let alias = if self.eat(&TokenKind::As) {
                        Some(self.expect_name()?)
                    } else {
                        None
                    };
                    aliases.push(ImportAlias { name, alias });
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                StmtKind::Import(aliases)
            }
            TokenKind::From => self.parse_from_import()?,
            TokenKind::Yield => {
                return Err(self.error_here("'yield' is not supported in the sandbox"));
            }
            _ => self.parse_expression_statement()?,
        };
        Ok(Stmt { kind, line })
    }

    fn parse_name_list(&mut self) -> Result<Vec<String>, SyntaxError> {
        let mut names = vec![self.expect_name()?];
        while self.eat(&TokenKind::Comma) {
            names.push(self.expect_name()?);
        }
        Ok(names)
    }

    fn parse_dotted_name(&mut self) -> Result<String, SyntaxError> {
        let mut name = self.expect_name()?;
        while self.eat(&TokenKind::Dot) {
            name.push('.');
            name.push_str(&self.expect_name()?);
        }
        Ok(name)
    }

    fn parse_from_import(&mut self) -> Result<StmtKind, SyntaxError> {
        self.advance();
        if matches!(self.peek(), TokenKind::Dot | TokenKind::Ellipsis) {
            return Err(self.error_here("relative imports are not supported in the sandbox"));
        }
        let module = self.parse_dotted_name()?;
        if !self.eat(&TokenKind::Import) {
            return Err(self.error_here("expected 'import'"));
        }

        if self.eat(&TokenKind::Star) {
            return Ok(StmtKind::ImportFrom {
                module,
                names: None,
            });
        }

        let parenthesized = self.eat(&TokenKind::LParen);
        let mut names = Vec::new();
        loop {
            if parenthesized && self.check(&TokenKind::RParen) {
                break;
            }
            let name = self.expect_name()?;
            let alias = if self.eat(&TokenKind::As) {
                Some(self.expect_name()?)
            } else {
                None
            };
            names.push(ImportAlias { name, alias });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        if parenthesized {
            self.expect(&TokenKind::RParen)?;
        }
        if names.is_empty() {
            return Err(self.error_here("invalid syntax"));
        }
        Ok(StmtKind::ImportFrom {
            module,
            names: Some(names),
        })
    }

    fn parse_expression_statement(&mut self) -> Result<StmtKind, SyntaxError> {
        let first = self.parse_testlist_star_expr()?;

        if self.check(&TokenKind::Colon) {
            let target = match &first.kind {
                ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. } => {
                    self.to_target(first)?
                }
                _ => return Err(self.error_here("illegal target for annotation")),
            };
            self.advance();
            self.parse_test()?;
            if self.eat(&TokenKind::Equal) {
                let value = self.parse_testlist_star_expr()?;
                return Ok(StmtKind::Assign {
                    targets: vec![target],
                    value,
                });
            }
            return Ok(StmtKind::Declare);
        }

        if self.peek().is_augmented_assign() {
            let op = match self.advance().kind {
                TokenKind::PlusEqual => BinOp::Add,
                TokenKind::MinusEqual => BinOp::Sub,
                TokenKind::StarEqual => BinOp::Mul,
                TokenKind::DoubleStarEqual => BinOp::Pow,
                TokenKind::SlashEqual => BinOp::Div,
                TokenKind::DoubleSlashEqual => BinOp::FloorDiv,
                TokenKind::PercentEqual => BinOp::Mod,
                TokenKind::AtEqual => BinOp::MatMul,
                TokenKind::AmperEqual => BinOp::BitAnd,
                TokenKind::PipeEqual => BinOp::BitOr,
                TokenKind::CaretEqual => BinOp::BitXor,
                TokenKind::LeftShiftEqual => BinOp::LShift,
                _ => BinOp::RShift,
            };
            let target = match &first.kind {
                ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. } => {
                    self.to_target(first)?
                }
                _ => {
                    return Err(self.error_at(
                        format!(
                            "'{}' is an illegal expression for augmented assignment",
                            describe(&first)
                        ),
                        first.line,
                    ));
                }
            };
            let value = self.parse_testlist()?;
            return Ok(StmtKind::AugAssign { target, op, value });
        }

        if self.check(&TokenKind::Equal) {
            let mut exprs = vec![first];
            while self.eat(&TokenKind::Equal) {
                if self.check(&TokenKind::Yield) {
                    return Err(self.error_here("'yield' is not supported in the sandbox"));
                }
                exprs.push(self.parse_testlist_star_expr()?);
            }
            let value = exprs.pop().ok_or_else(|| self.error_here("invalid syntax"))?;
            let targets = exprs
                .into_iter()
                .map(|expr| self.to_target(expr))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(StmtKind::Assign { targets, value });
        }

        Ok(StmtKind::Expr(first))
    }

    /// Convert a parsed expression into an assignment target.
    fn to_target(&self, expr: Expr) -> Result<Target, SyntaxError> {
        let line = expr.line;
        match expr.kind {
            ExprKind::Name(name) => Ok(Target::Name(name)),
            ExprKind::Attribute { value, attr } => Ok(Target::Attribute { value, attr }),
            ExprKind::Subscript { value, index } => Ok(Target::Subscript { value, index }),
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                let starred = items
                    .iter()
                    .filter(|item| matches!(item.kind, ExprKind::Starred(_)))
                    .count();
                if starred > 1 {
                    return Err(self.error_at("multiple starred expressions in assignment", line));
                }
                let targets = items
                    .into_iter()
                    .map(|item| self.to_target(item))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Target::Sequence(targets))
            }
            ExprKind::Starred(inner) => Ok(Target::Starred(Box::new(self.to_target(*inner)?))),
            ref other => {
                let what = match other {
                    ExprKind::Call { .. } => "function call",
                    ExprKind::Constant(Constant::None) => "None",
                    ExprKind::Constant(Constant::Bool(true)) => "True",
                    ExprKind::Constant(Constant::Bool(false)) => "False",
                    ExprKind::Constant(_) | ExprKind::FString(_) => "literal",
                    ExprKind::Lambda(_) => "lambda",
                    ExprKind::Compare { .. } => "comparison",
                    ExprKind::Comprehension { .. } => "comprehension",
                    _ => "expression",
                };
                Err(self.error_at(format!("cannot assign to {what}"), line))
            }
        }
    }

    // ---- expressions ----

    fn can_start_expression(&self) -> bool {
        matches!(
            self.peek(),
            TokenKind::Name(_)
                | TokenKind::Int(_)
                | TokenKind::Float(_)
                | TokenKind::Str(_)
                | TokenKind::FString(_)
                | TokenKind::None
                | TokenKind::True
                | TokenKind::False
                | TokenKind::Ellipsis
                | TokenKind::LParen
                | TokenKind::LBracket
                | TokenKind::LBrace
                | TokenKind::Minus
                | TokenKind::Plus
                | TokenKind::Tilde
                | TokenKind::Not
                | TokenKind::Lambda
                | TokenKind::Star
                | TokenKind::Await
        )
    }

    /// `test (',' test)* [',']` with starred items, producing a tuple when
    /// there is more than one item or a trailing comma.
    fn parse_testlist_star_expr(&mut self) -> Result<Expr, SyntaxError> {
        self.parse_sequence(|p| p.parse_test_or_star())
    }

    fn parse_testlist(&mut self) -> Result<Expr, SyntaxError> {
        self.parse_sequence(|p| p.parse_test_or_star())
    }

    /// Expression list used for `del` and `for` targets: stops before `in`.
    fn parse_exprlist(&mut self) -> Result<Expr, SyntaxError> {
        self.parse_sequence(|p| {
            if p.check(&TokenKind::Star) {
                let line = p.advance().pos.line;
                let inner = p.parse_binary(0)?;
                Ok(Expr::new(ExprKind::Starred(Box::new(inner)), line))
            } else {
                p.parse_binary(0)
            }
        })
    }

    fn parse_sequence(
        &mut self,
        mut item: impl FnMut(&mut Self) -> Result<Expr, SyntaxError>,
    ) -> Result<Expr, SyntaxError> {
        let line = self.line();
        let first = item(self)?;
        if !self.check(&TokenKind::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&TokenKind::Comma) {
            if !self.can_start_expression() {
                break;
            }
            items.push(item(self)?);
        }
        let expr = Expr::new(ExprKind::Tuple(items), line);
        self.check_depth(&expr)?;
        Ok(expr)
    }

    fn parse_target_list(&mut self) -> Result<Target, SyntaxError> {
        let expr = self.parse_exprlist()?;
        self.to_target(expr)
    }

    fn parse_test_or_star(&mut self) -> Result<Expr, SyntaxError> {
        if self.check(&TokenKind::Star) {
            let line = self.advance().pos.line;
            let inner = self.parse_binary(0)?;
            return Ok(Expr::new(ExprKind::Starred(Box::new(inner)), line));
        }
        self.parse_test()
    }

    /// A test that may not be followed by `:=`.
    fn parse_named_test(&mut self) -> Result<Expr, SyntaxError> {
        let expr = self.parse_test()?;
        if self.check(&TokenKind::Walrus) {
            return Err(self.error_here("assignment expressions are not supported in the sandbox"));
        }
        Ok(expr)
    }

    fn parse_test(&mut self) -> Result<Expr, SyntaxError> {
        self.enter()?;
        let result = self.parse_test_inner();
        self.leave();
        let expr = result?;
        self.check_depth(&expr)?;
        Ok(expr)
    }

    fn parse_test_inner(&mut self) -> Result<Expr, SyntaxError> {
        if self.check(&TokenKind::Lambda) {
            return self.parse_lambda();
        }
        let body = self.parse_or()?;
        if self.check(&TokenKind::If) {
            let line = self.advance().pos.line;
            let test = self.parse_or()?;
            if !self.eat(&TokenKind::Else) {
                return Err(self.error_here("expected 'else' after 'if' expression"));
            }
            let orelse = self.parse_test()?;
            return Ok(Expr::new(
                ExprKind::IfExp {
                    test: Box::new(test),
                    body: Box::new(body),
                    orelse: Box::new(orelse),
                },
                line,
            ));
        }
        Ok(body)
    }

    fn parse_lambda(&mut self) -> Result<Expr, SyntaxError> {
        let line = self.advance().pos.line;
        let params = self.parse_params(&TokenKind::Colon, false)?;
        self.expect(&TokenKind::Colon)?;
        let body = self.parse_test()?;
        let body_line = body.line;
        Ok(Expr::new(
            ExprKind::Lambda(Arc::new(FunctionDef::new(
                "<lambda>".to_string(),
                params,
                vec![Stmt {
                    kind: StmtKind::Return(Some(body)),
                    line: body_line,
                }],
                line,
            ))),
            line,
        ))
    }

    fn parse_or(&mut self) -> Result<Expr, SyntaxError> {
        let line = self.line();
        let first = self.parse_and()?;
        if !self.check(&TokenKind::Or) {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat(&TokenKind::Or) {
            values.push(self.parse_and()?);
        }
        Ok(Expr::new(
            ExprKind::BoolOp {
                op: BoolOp::Or,
                values,
            },
            line,
        ))
    }

    fn parse_and(&mut self) -> Result<Expr, SyntaxError> {
        let line = self.line();
        let first = self.parse_not()?;
        if !self.check(&TokenKind::And) {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat(&TokenKind::And) {
            values.push(self.parse_not()?);
        }
        Ok(Expr::new(
            ExprKind::BoolOp {
                op: BoolOp::And,
                values,
            },
            line,
        ))
    }

    fn parse_not(&mut self) -> Result<Expr, SyntaxError> {
        if self.check(&TokenKind::Not) {
            let line = self.advance().pos.line;
            self.enter()?;
            let operand = self.parse_not();
            self.leave();
            let expr = Expr::new(
                ExprKind::UnaryOp {
                    op: UnaryOp::Not,
                    operand: Box::new(operand?),
                },
                line,
            );
            self.check_depth(&expr)?;
            return Ok(expr);
        }
        self.parse_comparison()
    }

    fn comparison_operator(&self) -> Option<(CmpOp, usize)> {
        let op = match self.peek() {
            TokenKind::EqEqual => CmpOp::Eq,
            TokenKind::NotEqual => CmpOp::NotEq,
            TokenKind::Less => CmpOp::Lt,
            TokenKind::LessEqual => CmpOp::LtE,
            TokenKind::Greater => CmpOp::Gt,
            TokenKind::GreaterEqual => CmpOp::GtE,
            TokenKind::In => CmpOp::In,
            TokenKind::Not if self.peek_at(1) == &TokenKind::In => return Some((CmpOp::NotIn, 2)),
            TokenKind::Is if self.peek_at(1) == &TokenKind::Not => return Some((CmpOp::IsNot, 2)),
            TokenKind::Is => CmpOp::Is,
            _ => return None,
        };
        Some((op, 1))
    }

    fn parse_comparison(&mut self) -> Result<Expr, SyntaxError> {
        let line = self.line();
        let left = self.parse_binary(0)?;
        let mut comparisons = Vec::new();
        while let Some((op, width)) = self.comparison_operator() {
            for _ in 0..width {
                self.advance();
            }
            comparisons.push((op, self.parse_binary(0)?));
        }
        if comparisons.is_empty() {
            return Ok(left);
        }
        let expr = Expr::new(
            ExprKind::Compare {
                left: Box::new(left),
                comparisons,
            },
            line,
        );
        self.check_depth(&expr)?;
        Ok(expr)
    }

    fn binary_operator(&self, level: usize) -> Option<BinOp> {
        let op = match (level, self.peek()) {
            (0, TokenKind::Pipe) => BinOp::BitOr,
            (1, TokenKind::Caret) => BinOp::BitXor,
            (2, TokenKind::Amper) => BinOp::BitAnd,
            (3, TokenKind::LeftShift) => BinOp::LShift,
            (3, TokenKind::RightShift) => BinOp::RShift,
            (4, TokenKind::Plus) => BinOp::Add,
            (4, TokenKind::Minus) => BinOp::Sub,
            (5, TokenKind::Star) => BinOp::Mul,
            (5, TokenKind::Slash) => BinOp::Div,
            (5, TokenKind::DoubleSlash) => BinOp::FloorDiv,
            (5, TokenKind::Percent) => BinOp::Mod,
            (5, TokenKind::At) => BinOp::MatMul,
            _ => return None,
        };
        Some(op)
    }

    fn parse_binary(&mut self, level: usize) -> Result<Expr, SyntaxError> {
        if level == BINARY_LEVELS {
            return self.parse_unary();
        }
        let mut left = self.parse_binary(level + 1)?;
        while let Some(op) = self.binary_operator(level) {
            let line = self.advance().pos.line;
            let right = self.parse_binary(level + 1)?;
            left = Expr::new(
                ExprKind::BinOp {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                },
                line,
            );
            self.check_depth(&left)?;
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, SyntaxError> {
        let op = match self.peek() {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Plus => UnaryOp::Pos,
            TokenKind::Tilde => UnaryOp::Invert,
            _ => return self.parse_power(),
        };
        let line = self.advance().pos.line;
        self.enter()?;
        let operand = self.parse_unary();
        self.leave();
        let operand = operand?;

        // Fold negative literals so the full i64 range is expressible.
        if op == UnaryOp::Neg {
            match operand.kind {
                ExprKind::Constant(Constant::Int(value)) => {
                    if let Some(negated) = value.checked_neg() {
                        return Ok(Expr::new(ExprKind::Constant(Constant::Int(negated)), line));
                    }
                }
                ExprKind::Constant(Constant::Float(value)) => {
                    return Ok(Expr::new(ExprKind::Constant(Constant::Float(-value)), line));
                }
                _ => {}
            }
        }

        let expr = Expr::new(
            ExprKind::UnaryOp {
                op,
                operand: Box::new(operand),
            },
            line,
        );
        self.check_depth(&expr)?;
        Ok(expr)
    }

    fn parse_power(&mut self) -> Result<Expr, SyntaxError> {
        if self.check(&TokenKind::Await) {
            return Err(self.error_here("async code is not supported in the sandbox"));
        }
        let base = self.parse_primary()?;
        if !self.check(&TokenKind::DoubleStar) {
            return Ok(base);
        }
        let line = self.advance().pos.line;
        self.enter()?;
        let exponent = self.parse_unary();
        self.leave();
        let expr = Expr::new(
            ExprKind::BinOp {
                left: Box::new(base),
                op: BinOp::Pow,
                right: Box::new(exponent?),
            },
            line,
        );
        self.check_depth(&expr)?;
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.parse_atom()?;
        loop {
            match self.peek() {
                TokenKind::LParen => {
                    let line = self.advance().pos.line;
                    self.enter()?;
                    let args = self.parse_call_args();
                    self.leave();
                    let args = args?;
                    self.expect(&TokenKind::RParen)?;
                    expr = Expr::new(
                        ExprKind::Call {
                            func: Box::new(expr),
                            args,
                        },
                        line,
                    );
                }
                TokenKind::LBracket => {
                    let line = self.advance().pos.line;
                    self.enter()?;
                    let index = self.parse_subscript();
                    self.leave();
                    let index = index?;
                    self.expect(&TokenKind::RBracket)?;
                    expr = Expr::new(
                        ExprKind::Subscript {
                            value: Box::new(expr),
                            index: Box::new(index),
                        },
                        line,
                    );
                }
                TokenKind::Dot => {
                    let line = self.advance().pos.line;
                    let attr = self.expect_name()?;
                    expr = Expr::new(
                        ExprKind::Attribute {
                            value: Box::new(expr),
                            attr,
                        },
                        line,
                    );
                }
                _ => break,
            }
            self.check_depth(&expr)?;
        }
        Ok(expr)
    }

    fn parse_call_args(&mut self) -> Result<Vec<Argument>, SyntaxError> {
        let mut args = Vec::new();
        let mut seen_keyword = false;
        while !self.check(&TokenKind::RParen) {
            let arg = match (self.peek(), self.peek_at(1)) {
                (TokenKind::Star, _) => {
                    self.advance();
                    Argument::Starred(self.parse_test()?)
                }
                (TokenKind::DoubleStar, _) => {
                    self.advance();
                    seen_keyword = true;
                    Argument::DoubleStarred(self.parse_test()?)
                }
                (TokenKind::Name(_), TokenKind::Equal) => {
                    let name = self.expect_name()?;
                    self.advance();
                    seen_keyword = true;
                    Argument::Keyword(name, self.parse_test()?)
                }
                _ => {
                    let line = self.line();
                    let value = self.parse_named_test()?;
                    if self.check(&TokenKind::For) {
                        let generator =
                            self.parse_comprehension(ComprehensionKind::Generator, value, None, line)?;
                        Argument::Positional(generator)
                    } else {
                        if seen_keyword {
                            return Err(
                                self.error_here("positional argument follows keyword argument")
                            );
                        }
                        Argument::Positional(value)
                    }
                }
            };
            args.push(arg);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        Ok(args)
    }

    fn parse_subscript(&mut self) -> Result<Expr, SyntaxError> {
        let line = self.line();
        let first = self.parse_slice_item()?;
        if !self.check(&TokenKind::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&TokenKind::Comma) {
            if self.check(&TokenKind::RBracket) {
                break;
            }
            items.push(self.parse_slice_item()?);
        }
        Ok(Expr::new(ExprKind::Tuple(items), line))
    }

    fn parse_slice_item(&mut self) -> Result<Expr, SyntaxError> {
        let line = self.line();
        let lower = if self.check(&TokenKind::Colon) {
            None
        } else {
            let expr = self.parse_test()?;
            if !self.check(&TokenKind::Colon) {
                return Ok(expr);
            }
            Some(Box::new(expr))
        };
        self.expect(&TokenKind::Colon)?;
        let upper = if matches!(
            self.peek(),
            TokenKind::Colon | TokenKind::RBracket | TokenKind::Comma
        ) {
            None
        } else {
            Some(Box::new(self.parse_test()?))
        };
        let step = if self.eat(&TokenKind::Colon) {
            if matches!(self.peek(), TokenKind::RBracket | TokenKind::Comma) {
                None
            } else {
                Some(Box::new(self.parse_test()?))
            }
        } else {
            None
        };
        Ok(Expr::new(ExprKind::Slice { lower, upper, step }, line))
    }

    fn parse_atom(&mut self) -> Result<Expr, SyntaxError> {
        let token = self.peek().clone();
        let line = self.line();
        let kind = match token {
            TokenKind::Name(name) => {
                self.advance();
                ExprKind::Name(name)
            }
            TokenKind::Int(value) => {
                self.advance();
                ExprKind::Constant(Constant::Int(value))
            }
            TokenKind::Float(value) => {
                self.advance();
                ExprKind::Constant(Constant::Float(value))
            }
            TokenKind::None => {
                self.advance();
                ExprKind::Constant(Constant::None)
            }
            TokenKind::True => {
                self.advance();
                ExprKind::Constant(Constant::Bool(true))
            }
            TokenKind::False => {
                self.advance();
                ExprKind::Constant(Constant::Bool(false))
            }
            TokenKind::Ellipsis => {
                self.advance();
                ExprKind::Constant(Constant::Ellipsis)
            }
            TokenKind::Str(_) | TokenKind::FString(_) => return self.parse_strings(),
            TokenKind::LParen => {
                self.advance();
                self.enter()?;
                let result = self.parse_paren_body(line);
                self.leave();
                return result;
            }
            TokenKind::LBracket => {
                self.advance();
                self.enter()?;
                let result = self.parse_list_body(line);
                self.leave();
                return result;
            }
            TokenKind::LBrace => {
                self.advance();
                self.enter()?;
                let result = self.parse_brace_body(line);
                self.leave();
                return result;
            }
            TokenKind::Yield => {
                return Err(self.error_here("'yield' is not supported in the sandbox"));
            }
            TokenKind::Await => {
                return Err(self.error_here("async code is not supported in the sandbox"));
            }
            TokenKind::Walrus => {
                return Err(
                    self.error_here("assignment expressions are not supported in the sandbox")
                );
            }
            TokenKind::Newline | TokenKind::EndOfFile => {
                return Err(self.error_here("invalid syntax"));
            }
            _ => return Err(self.error_here("invalid syntax")),
        };
        Ok(Expr::new(kind, line))
    }

    fn parse_paren_body(&mut self, line: u32) -> Result<Expr, SyntaxError> {
        if self.eat(&TokenKind::RParen) {
            return Ok(Expr::new(ExprKind::Tuple(Vec::new()), line));
        }
        if self.check(&TokenKind::Yield) {
            return Err(self.error_here("'yield' is not supported in the sandbox"));
        }
        let first = self.parse_test_or_star()?;
        if self.check(&TokenKind::Walrus) {
            return Err(self.error_here("assignment expressions are not supported in the sandbox"));
        }
        if self.check(&TokenKind::For) {
            let expr = self.parse_comprehension(ComprehensionKind::Generator, first, None, line)?;
            self.expect(&TokenKind::RParen)?;
            return Ok(expr);
        }
        if self.eat(&TokenKind::RParen) {
            if matches!(first.kind, ExprKind::Starred(_)) {
                return Err(self.error_at("cannot use starred expression here", line));
            }
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&TokenKind::Comma) {
            if self.check(&TokenKind::RParen) {
                break;
            }
            items.push(self.parse_test_or_star()?);
        }
        self.expect(&TokenKind::RParen)?;
        Ok(Expr::new(ExprKind::Tuple(items), line))
    }

    fn parse_list_body(&mut self, line: u32) -> Result<Expr, SyntaxError> {
        if self.eat(&TokenKind::RBracket) {
            return Ok(Expr::new(ExprKind::List(Vec::new()), line));
        }
        let first = self.parse_test_or_star()?;
        if self.check(&TokenKind::For) {
            let expr = self.parse_comprehension(ComprehensionKind::List, first, None, line)?;
            self.expect(&TokenKind::RBracket)?;
            return Ok(expr);
        }
        let mut items = vec![first];
        while self.eat(&TokenKind::Comma) {
            if self.check(&TokenKind::RBracket) {
                break;
            }
            items.push(self.parse_test_or_star()?);
        }
        self.expect(&TokenKind::RBracket)?;
        Ok(Expr::new(ExprKind::List(items), line))
    }

    fn parse_brace_body(&mut self, line: u32) -> Result<Expr, SyntaxError> {
        if self.eat(&TokenKind::RBrace) {
            return Ok(Expr::new(ExprKind::Dict(Vec::new()), line));
        }

        // Dict display or comprehension
        if self.check(&TokenKind::DoubleStar) {
            return self.parse_dict_items(line, None);
        }
        let first = self.parse_test_or_star()?;
        if self.eat(&TokenKind::Colon) {
            let value = self.parse_test()?;
            if self.check(&TokenKind::For) {
                let expr = self.parse_comprehension(
                    ComprehensionKind::Dict,
                    first,
                    Some(value),
                    line,
                )?;
                self.expect(&TokenKind::RBrace)?;
                return Ok(expr);
            }
            return self.parse_dict_items(line, Some((first, value)));
        }

        // Set display or comprehension
        if self.check(&TokenKind::For) {
            let expr = self.parse_comprehension(ComprehensionKind::Set, first, None, line)?;
            self.expect(&TokenKind::RBrace)?;
            return Ok(expr);
        }
        let mut items = vec![first];
        while self.eat(&TokenKind::Comma) {
            if self.check(&TokenKind::RBrace) {
                break;
            }
            items.push(self.parse_test_or_star()?);
        }
        self.expect(&TokenKind::RBrace)?;
        Ok(Expr::new(ExprKind::Set(items), line))
    }

    fn parse_dict_items(
        &mut self,
        line: u32,
        first: Option<(Expr, Expr)>,
    ) -> Result<Expr, SyntaxError> {
        let mut items = Vec::new();
        let mut need_item = first.is_none();
        if let Some((key, value)) = first {
            items.push(DictItem::Pair(key, value));
        }
        loop {
            if !need_item {
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
                if self.check(&TokenKind::RBrace) {
                    break;
                }
            }
            need_item = false;
            if self.eat(&TokenKind::DoubleStar) {
                items.push(DictItem::Unpack(self.parse_binary(0)?));
            } else {
                let key = self.parse_test()?;
                if !self.eat(&TokenKind::Colon) {
                    return Err(self.error_here("':' expected after dictionary key"));
                }
                let value = self.parse_test()?;
                items.push(DictItem::Pair(key, value));
            }
        }
        self.expect(&TokenKind::RBrace)?;
        Ok(Expr::new(ExprKind::Dict(items), line))
    }

    fn parse_comprehension(
        &mut self,
        kind: ComprehensionKind,
        element: Expr,
        value: Option<Expr>,
        line: u32,
    ) -> Result<Expr, SyntaxError> {
        if matches!(element.kind, ExprKind::Starred(_)) {
            return Err(self.error_at("iterable unpacking cannot be used in comprehension", line));
        }
        let mut clauses = Vec::new();
        while self.eat(&TokenKind::For) {
            let target = self.parse_target_list()?;
            if !self.eat(&TokenKind::In) {
                return Err(self.error_here("expected 'in'"));
            }
            let iter = self.parse_or()?;
            let mut conditions = Vec::new();
            while self.eat(&TokenKind::If) {
                conditions.push(self.parse_or()?);
            }
            clauses.push(ComprehensionClause {
                target,
                iter,
                conditions,
            });
        }
        let expr = Expr::new(
            ExprKind::Comprehension {
                kind,
                element: Arc::new(element),
                value: value.map(Arc::new),
                clauses: clauses.into(),
            },
            line,
        );
        self.check_depth(&expr)?;
        Ok(expr)
    }

    /// Adjacent string literals concatenate; any f-string makes the whole
    /// literal an f-string.
    fn parse_strings(&mut self) -> Result<Expr, SyntaxError> {
        let line = self.line();
        let mut parts: Vec<FStringPart> = Vec::new();
        let mut is_format = false;
        loop {
            match self.peek().clone() {
                TokenKind::Str(text) => {
                    self.advance();
                    push_literal(&mut parts, &text);
                }
                TokenKind::FString(body) => {
                    let token_line = self.advance().pos.line;
                    is_format = true;
                    for part in self.parse_fstring(&body, token_line)? {
                        match part {
                            FStringPart::Literal(text) => push_literal(&mut parts, &text),
                            field => parts.push(field),
                        }
                    }
                }
                _ => break,
            }
        }

        if !is_format {
            let text = match parts.pop() {
                Some(FStringPart::Literal(text)) => text,
                _ => String::new(),
            };
            return Ok(Expr::new(ExprKind::Constant(Constant::Str(text)), line));
        }
        let expr = Expr::new(ExprKind::FString(parts), line);
        self.check_depth(&expr)?;
        Ok(expr)
    }

    fn parse_fstring(&mut self, body: &str, line: u32) -> Result<Vec<FStringPart>, SyntaxError> {
        let chars: Vec<char> = body.chars().collect();
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut i = 0;

        while i < chars.len() {
            let ch = chars[i];
            if ch == '{' {
                if chars.get(i + 1) == Some(&'{') {
                    literal.push('{');
                    i += 2;
                    continue;
                }
                if !literal.is_empty() {
                    parts.push(FStringPart::Literal(std::mem::take(&mut literal)));
                }
                let (field, next) = self.parse_fstring_field(&chars, i + 1, line)?;
                parts.extend(field);
                i = next;
            } else if ch == '}' {
                if chars.get(i + 1) == Some(&'}') {
                    literal.push('}');
                    i += 2;
                    continue;
                }
                return Err(self.error_at("f-string: single '}' is not allowed", line));
            } else {
                literal.push(ch);
                i += 1;
            }
        }
        if !literal.is_empty() {
            parts.push(FStringPart::Literal(literal));
        }
        Ok(parts)
    }

    /// Parse one `{expr[=][!c][:spec]}` field starting after the `{`.
    /// Returns the produced parts and the index just past the closing `}`.
    fn parse_fstring_field(
        &mut self,
        chars: &[char],
        start: usize,
        line: u32,
    ) -> Result<(Vec<FStringPart>, usize), SyntaxError> {
        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        let mut i = start;

        // Find the end of the expression text.
        while i < chars.len() {
            let ch = chars[i];
            if let Some(q) = quote {
                if ch == q {
                    quote = None;
                }
                i += 1;
                continue;
            }
            match ch {
                '\'' | '"' => quote = Some(ch),
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' if depth > 0 => depth -= 1,
                '}' => break,
                '!' if depth == 0 && chars.get(i + 1) != Some(&'=') => break,
                ':' if depth == 0 => break,
                _ => {}
            }
            i += 1;
        }
        if i >= chars.len() {
            return Err(self.error_at("f-string: expecting '}'", line));
        }

        let mut expr_text: String = chars[start..i].iter().collect();
        let mut parts = Vec::new();

        // Self-documenting `{name=}`
        let trimmed = expr_text.trim_end();
        let mut debug_repr = false;
        if trimmed.ends_with('=')
            && !["==", "!=", "<=", ">="]
                .iter()
                .any(|op| trimmed.ends_with(op))
        {
            parts.push(FStringPart::Literal(expr_text.clone()));
            expr_text = trimmed[..trimmed.len() - 1].to_string();
            debug_repr = true;
        }

        if expr_text.trim().is_empty() {
            return Err(self.error_at("f-string: empty expression not allowed", line));
        }

        let mut conversion = None;
        if chars[i] == '!' {
            let Some(&conv) = chars.get(i + 1) else {
                return Err(self.error_at("f-string: expecting '}'", line));
            };
            if !matches!(conv, 'r' | 's' | 'a') {
                return Err(self.error_at(
                    "f-string: invalid conversion character: expected 's', 'r', or 'a'",
                    line,
                ));
            }
            conversion = Some(conv);
            i += 2;
        } else if debug_repr {
            conversion = Some('r');
        }

        let mut spec = String::new();
        if chars.get(i) == Some(&':') {
            i += 1;
            while i < chars.len() && chars[i] != '}' {
                if chars[i] == '{' {
                    return Err(self.error_at(
                        "f-string: nested replacement fields are not supported in the sandbox",
                        line,
                    ));
                }
                spec.push(chars[i]);
                i += 1;
            }
            if debug_repr && conversion == Some('r') && !spec.is_empty() {
                conversion = None;
            }
        }
        if chars.get(i) != Some(&'}') {
            return Err(self.error_at("f-string: expecting '}'", line));
        }

        let expr = self.parse_embedded_expression(&expr_text, line)?;
        parts.push(FStringPart::Field {
            expr: Box::new(expr),
            conversion,
            spec,
        });
        Ok((parts, i + 1))
    }

    fn parse_embedded_expression(&mut self, text: &str, line: u32) -> Result<Expr, SyntaxError> {
        let tokens = Lexer::tokenize_expression(text, line)?;
        let mut parser = Parser::new(tokens, self.nesting + 1);
        if parser.nesting > MAX_NESTING {
            return Err(self.error_at("expression is too deeply nested", line));
        }
        let expr = parser.parse_testlist_star_expr()?;
        if !parser.check(&TokenKind::EndOfFile) {
            return Err(parser.error_here("f-string: invalid syntax"));
        }
        Ok(expr)
    }
}

fn push_literal(parts: &mut Vec<FStringPart>, text: &str) {
    if let Some(FStringPart::Literal(existing)) = parts.last_mut() {
        existing.push_str(text);
    } else {
        parts.push(FStringPart::Literal(text.to_string()));
    }
}

fn describe(expr: &Expr) -> &'static str {
    match expr.kind {
        ExprKind::Tuple(_) => "tuple",
        ExprKind::List(_) => "list",
        ExprKind::Call { .. } => "function call",
        ExprKind::Constant(_) => "literal",
        _ => "expression",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Program {
        Parser::parse(source).unwrap()
    }

    fn parse_err(source: &str) -> SyntaxError {
        Parser::parse(source).unwrap_err()
    }

    fn first_expr(source: &str) -> Expr {
        match parse(source).body.into_iter().next().map(|s| s.kind) {
            Some(StmtKind::Expr(expr)) => expr,
            other => panic!("expected expression statement, got {other:?}"),
        }
    }

    #[test]
    fn empty_program() {
        assert!(parse("").body.is_empty());
        assert!(parse("\n\n# only a comment\n").body.is_empty());
    }

    #[test]
    fn assignment_and_print() {
        let program = parse("x = 10\nprint(x)");
        assert_eq!(program.body.len(), 2);
        assert!(matches!(program.body[0].kind, StmtKind::Assign { .. }));
        assert!(matches!(program.body[1].kind, StmtKind::Expr(_)));
        assert_eq!(program.body[1].line, 2);
    }

    #[test]
    fn missing_colon_is_reported() {
        let err = parse_err("if True print('x')");
        assert_eq!(err.message, "expected ':'");
        assert_eq!(err.line, 1);
    }

    #[test]
    fn missing_indented_block() {
        let err = parse_err("def f():\nreturn 1\n");
        assert!(err.message.starts_with("expected an indented block"));
    }

    #[test]
    fn precedence_of_arithmetic() {
        let expr = first_expr("1 + 2 * 3");
        match expr.kind {
            ExprKind::BinOp { op, right, .. } => {
                assert_eq!(op, BinOp::Add);
                assert!(matches!(right.kind, ExprKind::BinOp { op: BinOp::Mul, .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn power_is_right_associative() {
        let expr = first_expr("2 ** 3 ** 2");
        match expr.kind {
            ExprKind::BinOp { op, right, .. } => {
                assert_eq!(op, BinOp::Pow);
                assert!(matches!(right.kind, ExprKind::BinOp { op: BinOp::Pow, .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn chained_comparison() {
        let expr = first_expr("1 < x <= 3");
        match expr.kind {
            ExprKind::Compare { comparisons, .. } => {
                assert_eq!(comparisons.len(), 2);
                assert_eq!(comparisons[0].0, CmpOp::Lt);
                assert_eq!(comparisons[1].0, CmpOp::LtE);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn not_in_and_is_not() {
        let expr = first_expr("a not in b");
        assert!(matches!(
            expr.kind,
            ExprKind::Compare { ref comparisons, .. } if comparisons[0].0 == CmpOp::NotIn
        ));
        let expr = first_expr("a is not None");
        assert!(matches!(
            expr.kind,
            ExprKind::Compare { ref comparisons, .. } if comparisons[0].0 == CmpOp::IsNot
        ));
    }

    #[test]
    fn tuple_unpacking_assignment() {
        let program = parse("a, b = b, a");
        match &program.body[0].kind {
            StmtKind::Assign { targets, value } => {
                assert!(matches!(&targets[0], Target::Sequence(items) if items.len() == 2));
                assert!(matches!(value.kind, ExprKind::Tuple(_)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn chained_assignment() {
        let program = parse("a = b = 0");
        assert!(matches!(
            &program.body[0].kind,
            StmtKind::Assign { targets, .. } if targets.len() == 2
        ));
    }

    #[test]
    fn augmented_assignment() {
        let program = parse("total += 1");
        assert!(matches!(
            &program.body[0].kind,
            StmtKind::AugAssign { op: BinOp::Add, .. }
        ));
    }

    #[test]
    fn cannot_assign_to_call() {
        let err = parse_err("f() = 1");
        assert_eq!(err.message, "cannot assign to function call");
    }

    #[test]
    fn function_definition_with_defaults() {
        let program = parse("def greet(name, greeting='Hello', *rest, **extra):\n    return name\n");
        match &program.body[0].kind {
            StmtKind::FunctionDef(def) => {
                assert_eq!(def.name, "greet");
                assert_eq!(def.params.positional.len(), 2);
                assert!(def.params.positional[1].default.is_some());
                assert_eq!(def.params.vararg.as_deref(), Some("rest"));
                assert_eq!(def.params.kwarg.as_deref(), Some("extra"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn non_default_after_default_is_rejected() {
        let err = parse_err("def f(a=1, b):\n    pass\n");
        assert!(err.message.contains("without a default"));
    }

    #[test]
    fn duplicate_parameter_is_rejected() {
        let err = parse_err("def f(a, a):\n    pass\n");
        assert!(err.message.contains("duplicate argument"));
    }

    #[test]
    fn if_elif_else() {
        let program = parse("if a:\n    x = 1\nelif b:\n    x = 2\nelse:\n    x = 3\n");
        match &program.body[0].kind {
            StmtKind::If { orelse, .. } => {
                assert_eq!(orelse.len(), 1);
                assert!(matches!(&orelse[0].kind, StmtKind::If { orelse, .. } if orelse.len() == 1));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn try_except_finally() {
        let program = parse(
            "try:\n    x = 1 / 0\nexcept ZeroDivisionError as e:\n    pass\nfinally:\n    done = True\n",
        );
        match &program.body[0].kind {
            StmtKind::Try {
                handlers,
                finalbody,
                ..
            } => {
                assert_eq!(handlers.len(), 1);
                assert_eq!(handlers[0].name.as_deref(), Some("e"));
                assert_eq!(finalbody.len(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn try_without_handlers_is_rejected() {
        let err = parse_err("try:\n    pass\nx = 1\n");
        assert!(err.message.contains("'except' or 'finally'"));
    }

    #[test]
    fn comprehensions() {
        assert!(matches!(
            first_expr("[x * 2 for x in range(3) if x]").kind,
            ExprKind::Comprehension {
                kind: ComprehensionKind::List,
                ..
            }
        ));
        assert!(matches!(
            first_expr("{k: v for k, v in pairs}").kind,
            ExprKind::Comprehension {
                kind: ComprehensionKind::Dict,
                ..
            }
        ));
        assert!(matches!(
            first_expr("sum(x for x in data)").kind,
            ExprKind::Call { .. }
        ));
    }

    #[test]
    fn dict_and_set_displays() {
        assert!(matches!(first_expr("{}").kind, ExprKind::Dict(ref items) if items.is_empty()));
        assert!(matches!(first_expr("{1, 2}").kind, ExprKind::Set(ref items) if items.len() == 2));
        assert!(matches!(first_expr("{'a': 1, **other}").kind, ExprKind::Dict(ref items) if items.len() == 2));
    }

    #[test]
    fn slices() {
        match first_expr("items[1:10:2]").kind {
            ExprKind::Subscript { index, .. } => {
                assert!(matches!(
                    index.kind,
                    ExprKind::Slice {
                        lower: Some(_),
                        upper: Some(_),
                        step: Some(_)
                    }
                ));
            }
            other => panic!("unexpected {other:?}"),
        }
        match first_expr("items[::-1]").kind {
            ExprKind::Subscript { index, .. } => {
                assert!(matches!(
                    index.kind,
                    ExprKind::Slice {
                        lower: None,
                        upper: None,
                        step: Some(_)
                    }
                ));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn keyword_arguments() {
        match first_expr("print(a, b, sep=', ', end='')").kind {
            ExprKind::Call { args, .. } => {
                assert_eq!(args.len(), 4);
                assert!(matches!(&args[2], Argument::Keyword(name, _) if name == "sep"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn positional_after_keyword_is_rejected() {
        let err = parse_err("f(a=1, 2)");
        assert_eq!(err.message, "positional argument follows keyword argument");
    }

    #[test]
    fn fstring_fields() {
        match first_expr("f'x = {x!r:>5} and {{braces}}'").kind {
            ExprKind::FString(parts) => {
                assert!(matches!(&parts[0], FStringPart::Literal(text) if text == "x = "));
                assert!(matches!(
                    &parts[1],
                    FStringPart::Field { conversion: Some('r'), spec, .. } if spec == ">5"
                ));
                assert!(matches!(&parts[2], FStringPart::Literal(text) if text == " and {braces}"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn fstring_self_documenting() {
        match first_expr("f'{total=}'").kind {
            ExprKind::FString(parts) => {
                assert!(matches!(&parts[0], FStringPart::Literal(text) if text == "total="));
                assert!(matches!(&parts[1], FStringPart::Field { conversion: Some('r'), .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn fstring_errors() {
        assert!(parse_err("f'{}'").message.contains("empty expression"));
        assert!(parse_err("f'a } b'").message.contains("single '}'"));
        assert!(parse_err("f'{x'").message.contains("expecting '}'"));
    }

    #[test]
    fn adjacent_strings_concatenate() {
        assert!(matches!(
            first_expr("'ab' 'cd'").kind,
            ExprKind::Constant(Constant::Str(ref s)) if s == "abcd"
        ));
    }

    #[test]
    fn negative_literal_is_folded() {
        assert!(matches!(
            first_expr("-9223372036854775807").kind,
            ExprKind::Constant(Constant::Int(-9223372036854775807))
        ));
    }

    #[test]
    fn unsupported_constructs_name_themselves() {
        assert!(parse_err("class A:\n    pass\n").message.contains("class definitions"));
        assert!(parse_err("with x:\n    pass\n").message.contains("'with'"));
        assert!(parse_err("def g():\n    yield 1\n").message.contains("'yield'"));
        assert!(parse_err("@dec\ndef f():\n    pass\n").message.contains("decorators"));
        assert!(parse_err("if (n := 10) > 5:\n    pass\n").message.contains("assignment expressions"));
    }

    #[test]
    fn imports() {
        let program = parse("import math as m, json\nfrom datetime import date, datetime as dt\nfrom math import *");
        assert!(matches!(&program.body[0].kind, StmtKind::Import(aliases) if aliases.len() == 2));
        assert!(matches!(
            &program.body[1].kind,
            StmtKind::ImportFrom { module, names: Some(names) } if module == "datetime" && names.len() == 2
        ));
        assert!(matches!(
            &program.body[2].kind,
            StmtKind::ImportFrom { names: None, .. }
        ));
    }

    #[test]
    fn deep_nesting_is_rejected_not_overflowed() {
        let source = format!("x = {}1{}", "(".repeat(500), ")".repeat(500));
        let err = parse_err(&source);
        assert_eq!(err.message, "expression is too deeply nested");

        let source = format!("x = {}1", "-".repeat(5000));
        assert!(Parser::parse(&source).is_err());

        let source = format!("x = {}True", "not ".repeat(500));
        let err = parse_err(&source);
        assert_eq!(err.message, "expression is too deeply nested");
    }

    #[test]
    fn long_operator_chains_are_bounded() {
        let source = format!("x = 1{}", " + 1".repeat(1000));
        let err = parse_err(&source);
        assert_eq!(err.message, "expression is too deeply nested");

        let source = format!("x = 1{}", " + 1".repeat(100));
        assert!(Parser::parse(&source).is_ok());
    }

    #[test]
    fn control_flow_outside_its_construct() {
        assert_eq!(parse_err("break").message, "'break' outside loop");
        assert_eq!(parse_err("return 1").message, "'return' outside function");
        assert_eq!(
            parse_err("for i in x:\n    def f():\n        continue\n").message,
            "'continue' not properly in loop"
        );
        assert!(Parser::parse("while True:\n    if x:\n        break\n").is_ok());
    }

    #[test]
    fn semicolon_separated_statements() {
        assert_eq!(parse("a = 1; b = 2; print(a + b)").body.len(), 3);
    }

    #[test]
    fn trailing_garbage_is_invalid() {
        assert_eq!(parse_err("x = 1 2").message, "invalid syntax");
    }

    #[test]
    fn lambda_expression() {
        match first_expr("lambda a, b=2: a + b").kind {
            ExprKind::Lambda(def) => {
                assert_eq!(def.name, "<lambda>");
                assert_eq!(def.params.positional.len(), 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn annotated_assignment() {
        let program = parse("count: int = 0\nname: str");
        assert!(matches!(&program.body[0].kind, StmtKind::Assign { .. }));
        assert!(matches!(&program.body[1].kind, StmtKind::Declare));
    }
}
