//! Syntax tree for the sandbox language.
//!
//! The tree is `Send + Sync` so a parsed program can be handed to the
//! worker thread; function bodies are shared through `Arc`.

use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Program {
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub line: u32,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Expr(Expr),
    /// `a = b = value`
    Assign {
        targets: Vec<Target>,
        value: Expr,
    },
    AugAssign {
        target: Target,
        op: BinOp,
        value: Expr,
    },
    /// Annotated declaration without a value (`x: int`); a no-op.
    Declare,
    If {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    While {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    For {
        target: Target,
        iter: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    Break,
    Continue,
    Pass,
    FunctionDef(Arc<FunctionDef>),
    Return(Option<Expr>),
    Import(Vec<ImportAlias>),
    ImportFrom {
        module: String,
        /// `None` for `from m import *`
        names: Option<Vec<ImportAlias>>,
    },
    Try {
        body: Vec<Stmt>,
        handlers: Vec<ExceptHandler>,
        orelse: Vec<Stmt>,
        finalbody: Vec<Stmt>,
    },
    Raise(Option<Expr>),
    Assert {
        test: Expr,
        msg: Option<Expr>,
    },
    Global(Vec<String>),
    Nonlocal(Vec<String>),
    Delete(Vec<Target>),
}

#[derive(Debug, Clone)]
pub struct ImportAlias {
    pub name: String,
    pub alias: Option<String>,
}

impl ImportAlias {
    /// Name the import binds in the current scope.
    pub fn bound_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone)]
pub struct ExceptHandler {
    pub kind: Option<Expr>,
    pub name: Option<String>,
    pub body: Vec<Stmt>,
    pub line: u32,
}

#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: String,
    pub params: Params,
    pub body: Vec<Stmt>,
    pub line: u32,
    pub scope: Scope,
}

impl FunctionDef {
    pub fn new(name: String, params: Params, body: Vec<Stmt>, line: u32) -> Self {
        let scope = Scope::analyze(&params, &body);
        Self {
            name,
            params,
            body,
            line,
            scope,
        }
    }
}

/// Names a function binds locally, and the ones it declares `global` or
/// `nonlocal`.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    pub locals: HashSet<String>,
    pub globals: HashSet<String>,
    pub nonlocals: HashSet<String>,
}

impl Scope {
    pub fn analyze(params: &Params, body: &[Stmt]) -> Self {
        let mut scope = Scope::default();
        scope.locals.extend(params.names().map(str::to_string));
        scope.collect_block(body);
        for name in scope.globals.iter().chain(&scope.nonlocals) {
            scope.locals.remove(name);
        }
        scope
    }

    fn collect_block(&mut self, body: &[Stmt]) {
        for stmt in body {
            self.collect_stmt(stmt);
        }
    }

    fn collect_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Assign { targets, .. } => {
                for target in targets {
                    self.collect_target(target);
                }
            }
            StmtKind::AugAssign { target, .. } => self.collect_target(target),
            StmtKind::If { body, orelse, .. } | StmtKind::While { body, orelse, .. } => {
                self.collect_block(body);
                self.collect_block(orelse);
            }
            StmtKind::For {
                target,
                body,
                orelse,
                ..
            } => {
                self.collect_target(target);
                self.collect_block(body);
                self.collect_block(orelse);
            }
            StmtKind::FunctionDef(def) => {
                self.locals.insert(def.name.clone());
            }
            StmtKind::Import(aliases) => {
                for alias in aliases {
                    let bound = alias.bound_name();
                    let root = bound.split('.').next().unwrap_or(bound);
                    self.locals.insert(root.to_string());
                }
            }
            StmtKind::ImportFrom {
                names: Some(names), ..
            } => {
                for alias in names {
                    self.locals.insert(alias.bound_name().to_string());
                }
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                self.collect_block(body);
                for handler in handlers {
                    if let Some(name) = &handler.name {
                        self.locals.insert(name.clone());
                    }
                    self.collect_block(&handler.body);
                }
                self.collect_block(orelse);
                self.collect_block(finalbody);
            }
            StmtKind::Global(names) => self.globals.extend(names.iter().cloned()),
            StmtKind::Nonlocal(names) => self.nonlocals.extend(names.iter().cloned()),
            StmtKind::Delete(targets) => {
                for target in targets {
                    self.collect_target(target);
                }
            }
            _ => {}
        }
    }

    fn collect_target(&mut self, target: &Target) {
        match target {
            Target::Name(name) => {
                self.locals.insert(name.clone());
            }
            Target::Sequence(items) => {
                for item in items {
                    self.collect_target(item);
                }
            }
            Target::Starred(inner) => self.collect_target(inner),
            Target::Attribute { .. } | Target::Subscript { .. } => {}
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Params {
    pub positional: Vec<Param>,
    pub vararg: Option<String>,
    pub kwonly: Vec<Param>,
    pub kwarg: Option<String>,
}

impl Params {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.positional
            .iter()
            .map(|p| p.name.as_str())
            .chain(self.vararg.as_deref())
            .chain(self.kwonly.iter().map(|p| p.name.as_str()))
            .chain(self.kwarg.as_deref())
    }
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub default: Option<Expr>,
}

/// Assignment target.
#[derive(Debug, Clone)]
pub enum Target {
    Name(String),
    Attribute { value: Box<Expr>, attr: String },
    Subscript { value: Box<Expr>, index: Box<Expr> },
    Sequence(Vec<Target>),
    Starred(Box<Target>),
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub line: u32,
    /// Height of this subtree, used to bound evaluation depth.
    pub depth: u32,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Constant(Constant),
    FString(Vec<FStringPart>),
    Name(String),
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Set(Vec<Expr>),
    Dict(Vec<DictItem>),
    Starred(Box<Expr>),
    BinOp {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    BoolOp {
        op: BoolOp,
        values: Vec<Expr>,
    },
    Compare {
        left: Box<Expr>,
        comparisons: Vec<(CmpOp, Expr)>,
    },
    IfExp {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },
    Lambda(Arc<FunctionDef>),
    Call {
        func: Box<Expr>,
        args: Vec<Argument>,
    },
    Attribute {
        value: Box<Expr>,
        attr: String,
    },
    Subscript {
        value: Box<Expr>,
        index: Box<Expr>,
    },
    Slice {
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
    /// Shared through `Arc` so a generator expression can hold on to its
    /// clauses after evaluation returns.
    Comprehension {
        kind: ComprehensionKind,
        element: Arc<Expr>,
        /// Value expression for dict comprehensions.
        value: Option<Arc<Expr>>,
        clauses: Arc<[ComprehensionClause]>,
    },
}

impl Expr {
    pub fn new(kind: ExprKind, line: u32) -> Self {
        let depth = 1 + child_depth(&kind);
        Self { kind, line, depth }
    }
}

fn max_depth<'a>(exprs: impl IntoIterator<Item = &'a Expr>) -> u32 {
    exprs.into_iter().map(|e| e.depth).max().unwrap_or(0)
}

fn child_depth(kind: &ExprKind) -> u32 {
    match kind {
        ExprKind::Constant(_) | ExprKind::Name(_) => 0,
        ExprKind::FString(parts) => parts
            .iter()
            .map(|part| match part {
                FStringPart::Literal(_) => 0,
                FStringPart::Field { expr, .. } => expr.depth,
            })
            .max()
            .unwrap_or(0),
        ExprKind::List(items) | ExprKind::Tuple(items) | ExprKind::Set(items) => max_depth(items),
        ExprKind::Dict(items) => items
            .iter()
            .map(|item| match item {
                DictItem::Pair(k, v) => k.depth.max(v.depth),
                DictItem::Unpack(e) => e.depth,
            })
            .max()
            .unwrap_or(0),
        ExprKind::Starred(inner) => inner.depth,
        ExprKind::BinOp { left, right, .. } => left.depth.max(right.depth),
        ExprKind::UnaryOp { operand, .. } => operand.depth,
        ExprKind::BoolOp { values, .. } => max_depth(values),
        ExprKind::Compare { left, comparisons } => {
            left.depth.max(max_depth(comparisons.iter().map(|(_, e)| e)))
        }
        ExprKind::IfExp { test, body, orelse } => test.depth.max(body.depth).max(orelse.depth),
        // Lambda bodies are checked when they are parsed.
        ExprKind::Lambda(_) => 0,
        ExprKind::Call { func, args } => func.depth.max(
            args.iter()
                .map(|arg| arg.value().depth)
                .max()
                .unwrap_or(0),
        ),
        ExprKind::Attribute { value, .. } => value.depth,
        ExprKind::Subscript { value, index } => value.depth.max(index.depth),
        ExprKind::Slice { lower, upper, step } => [lower, upper, step]
            .into_iter()
            .flatten()
            .map(|e| e.depth)
            .max()
            .unwrap_or(0),
        ExprKind::Comprehension {
            element,
            value,
            clauses,
            ..
        } => {
            let clause_depth = clauses
                .iter()
                .map(|c| c.iter.depth.max(max_depth(&c.conditions)))
                .max()
                .unwrap_or(0);
            element
                .depth
                .max(value.as_ref().map_or(0, |v| v.depth))
                .max(clause_depth)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Ellipsis,
}

#[derive(Debug, Clone)]
pub enum FStringPart {
    Literal(String),
    Field {
        expr: Box<Expr>,
        /// `!r`, `!s` or `!a`
        conversion: Option<char>,
        spec: String,
    },
}

#[derive(Debug, Clone)]
pub enum DictItem {
    Pair(Expr, Expr),
    Unpack(Expr),
}

#[derive(Debug, Clone)]
pub enum Argument {
    Positional(Expr),
    Starred(Expr),
    Keyword(String, Expr),
    DoubleStarred(Expr),
}

impl Argument {
    pub fn value(&self) -> &Expr {
        match self {
            Argument::Positional(e)
            | Argument::Starred(e)
            | Argument::Keyword(_, e)
            | Argument::DoubleStarred(e) => e,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComprehensionKind {
    List,
    Set,
    Dict,
    Generator,
}

#[derive(Debug, Clone)]
pub struct ComprehensionClause {
    pub target: Target,
    pub iter: Expr,
    pub conditions: Vec<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    MatMul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    LShift,
    RShift,
    BitOr,
    BitXor,
    BitAnd,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::MatMul => "@",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
            BinOp::LShift => "<<",
            BinOp::RShift => ">>",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::BitAnd => "&",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
    Invert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    Is,
    IsNot,
    In,
    NotIn,
}

impl CmpOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::NotEq => "!=",
            CmpOp::Lt => "<",
            CmpOp::LtE => "<=",
            CmpOp::Gt => ">",
            CmpOp::GtE => ">=",
            CmpOp::Is => "is",
            CmpOp::IsNot => "is not",
            CmpOp::In => "in",
            CmpOp::NotIn => "not in",
        }
    }
}
