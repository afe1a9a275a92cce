//! Tree-walking interpreter for submissions.
//!
//! An [`Interpreter`] owns one global namespace, one pair of output buffers
//! and one random generator; it lives and dies on a single worker thread.
//! The global namespace starts out holding only the builtins listed in
//! [`crate::capability::SAFE_BUILTINS`].

pub mod builtins;
pub mod exception;
pub mod format;
pub mod iter;
pub mod methods;
pub mod modules;
pub mod ops;
pub mod output;
pub mod value;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use indexmap::IndexMap;

use crate::capability;
use crate::interp::exception::{
    ExcKind, ExceptionValue, Exec, Flow, Raised, TraceEntry, raise, render_traceback, type_error,
    value_error,
};
use crate::interp::format::{format_value, repr, str_of};
use crate::interp::modules::ModuleDef;
use crate::interp::value::{
    Args, Class, Env, Function, Generator, HashKey, IterRef, IterState, Value,
};
use crate::lang::ast::{
    Argument, BinOp, BoolOp, CmpOp, ComprehensionClause, ComprehensionKind, Constant, DictItem,
    ExceptHandler, Expr, ExprKind, FStringPart, FunctionDef, Program, Stmt, StmtKind, Target,
};

pub use output::OutputBuffer;

/// Shared flag the caller trips to stop a running interpreter.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Bounds enforced while a submission runs.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_recursion_depth: usize,
    pub max_collection_len: usize,
}

/// How a run ended. Everything in here is plain data so it can cross back
/// to the calling thread.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed {
        return_value: Option<String>,
    },
    Raised {
        category: String,
        line: Option<u32>,
        /// Rendered traceback ending in `Category: message`.
        traceback: String,
    },
    Violation {
        message: String,
        line: Option<u32>,
    },
    Cancelled,
}

/// Result of executing a statement.
enum Signal {
    Normal,
    Break,
    Continue,
    Return(Value),
}

enum Index {
    Item(Value),
    Slice(Option<i64>, Option<i64>, Option<i64>),
}

pub struct Interpreter {
    globals: Rc<Env>,
    env: Rc<Env>,
    builtins: HashMap<&'static str, Value>,
    frames: Vec<Rc<str>>,
    allowed_modules: Vec<&'static str>,
    stdout: OutputBuffer,
    stderr: OutputBuffer,
    cancel: CancelToken,
    limits: Limits,
    rng: fastrand::Rng,
    started: Instant,
    /// Exceptions currently being handled, innermost last.
    handling: Vec<Raised>,
    /// Scopes captured by closures; cleared at teardown to break cycles.
    closures: Tracked<Env>,
    /// Generator expressions; exhausted at teardown to break cycles.
    generators: Tracked<RefCell<IterState>>,
    /// Stack address at the start of `run`.
    stack_base: usize,
    /// Bytes of native stack calls may use before raising RecursionError.
    stack_budget: Option<usize>,
}

impl Interpreter {
    pub fn new(
        stdout: OutputBuffer,
        stderr: OutputBuffer,
        cancel: CancelToken,
        limits: Limits,
        allowed_modules: Vec<&'static str>,
    ) -> Self {
        let globals = Env::new(None, None);
        globals.set("__name__", Value::str("__main__"));
        Self {
            env: globals.clone(),
            globals,
            builtins: builtins::namespace(),
            frames: vec![Rc::from("<module>")],
            allowed_modules,
            stdout,
            stderr,
            cancel,
            limits,
            rng: fastrand::Rng::new(),
            started: Instant::now(),
            handling: Vec::new(),
            closures: Tracked::new(),
            generators: Tracked::new(),
            stack_base: 0,
            stack_budget: None,
        }
    }

    /// Raise RecursionError once calls have used `bytes` of the running
    /// thread's stack, whatever the configured depth allows.
    pub fn with_stack_budget(mut self, bytes: usize) -> Self {
        self.stack_budget = Some(bytes);
        self
    }

    /// Run `program` to completion and release everything it allocated.
    /// `source` is only used to render traceback lines.
    pub fn run(&mut self, program: &Program, source: &str) -> Outcome {
        self.started = Instant::now();
        self.stack_base = stack_address();
        let result = self.run_body(&program.body);
        let outcome = match result {
            Ok(value) => {
                let return_value = match value {
                    Some(value) if !value.is_none() => Some(format::repr_lossy(&value)),
                    _ => None,
                };
                Outcome::Completed { return_value }
            }
            Err(Flow::Exception(raised)) => self.raised_outcome(&raised, source),
            Err(Flow::Violation(violation)) => Outcome::Violation {
                message: violation.message,
                line: violation.line,
            },
            Err(Flow::Cancelled) => Outcome::Cancelled,
        };
        self.teardown();
        outcome
    }

    fn run_body(&mut self, body: &[Stmt]) -> Exec<Option<Value>> {
        let Some((last, rest)) = body.split_last() else {
            return Ok(None);
        };
        for stmt in rest {
            self.exec_stmt(stmt)?;
        }
        match &last.kind {
            StmtKind::Expr(expr) => {
                self.tick()?;
                self.eval(expr)
                    .map(Some)
                    .map_err(|flow| self.record_trace(flow, last.line))
            }
            _ => self.exec_stmt(last).map(|_| None),
        }
    }

    fn raised_outcome(&self, raised: &Raised, source: &str) -> Outcome {
        let category = raised.exc.kind.name().to_string();
        let message = format::exception_message(&raised.exc.kind, &raised.exc.args)
            .unwrap_or_default();
        let summary = if message.is_empty() {
            category.clone()
        } else {
            format!("{category}: {message}")
        };
        let mut entries = raised.traceback.clone();
        let line = entries.first().map(|entry| entry.line);
        entries.reverse();
        let traceback = render_traceback(&entries, &summary, source);
        self.stderr.write_unbounded(&traceback);
        self.stderr.write_unbounded("\n");
        Outcome::Raised {
            category,
            line,
            traceback,
        }
    }

    /// Drop every binding so reference cycles through closures and
    /// generators are freed.
    fn teardown(&mut self) {
        self.handling.clear();
        for generator in self.generators.drain() {
            if let Ok(mut state) = generator.try_borrow_mut() {
                *state = IterState::Exhausted;
            }
        }
        for env in self.closures.drain() {
            env.clear();
        }
        self.env = self.globals.clone();
        self.globals.clear();
    }

    // ---- accessors used by builtins and modules ----

    pub(crate) fn rng(&mut self) -> &mut fastrand::Rng {
        &mut self.rng
    }

    pub(crate) fn started(&self) -> Instant {
        self.started
    }

    pub(crate) fn max_len(&self) -> usize {
        self.limits.max_collection_len
    }

    /// Cancellation checkpoint.
    pub(crate) fn tick(&mut self) -> Exec<()> {
        if self.cancel.is_cancelled() {
            return Err(Flow::Cancelled);
        }
        Ok(())
    }

    fn record_trace(&self, mut flow: Flow, line: u32) -> Flow {
        match &mut flow {
            Flow::Exception(raised) => {
                let depth = self.frames.len();
                if raised.traceback.is_empty() {
                    raised.origin_depth = depth;
                }
                let expected = raised.origin_depth.saturating_sub(depth) + 1;
                if raised.traceback.len() < expected {
                    let name = self.frames.last().cloned().unwrap_or_else(|| Rc::from("<module>"));
                    raised.traceback.push(TraceEntry { name, line });
                }
            }
            Flow::Violation(violation) => {
                violation.line.get_or_insert(line);
            }
            Flow::Cancelled => {}
        }
        flow
    }

    // ---- statements ----

    fn exec_block(&mut self, body: &[Stmt]) -> Exec<Signal> {
        for stmt in body {
            match self.exec_stmt(stmt)? {
                Signal::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Signal::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Exec<Signal> {
        self.tick()?;
        self.exec_stmt_inner(stmt)
            .map_err(|flow| self.record_trace(flow, stmt.line))
    }

    fn exec_stmt_inner(&mut self, stmt: &Stmt) -> Exec<Signal> {
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval(expr)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value)?;
                for target in targets {
                    self.assign(target, value.clone())?;
                }
            }
            StmtKind::AugAssign { target, op, value } => self.aug_assign(target, *op, value)?,
            StmtKind::Declare | StmtKind::Pass | StmtKind::Global(_) | StmtKind::Nonlocal(_) => {}
            StmtKind::If { test, body, orelse } => {
                return if self.eval(test)?.truthy() {
                    self.exec_block(body)
                } else {
                    self.exec_block(orelse)
                };
            }
            StmtKind::While { test, body, orelse } => {
                loop {
                    self.tick()?;
                    if !self.eval(test)?.truthy() {
                        return self.exec_block(orelse);
                    }
                    match self.exec_block(body)? {
                        Signal::Break => break,
                        Signal::Return(value) => return Ok(Signal::Return(value)),
                        Signal::Normal | Signal::Continue => {}
                    }
                }
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                let iterable = self.eval(iter)?;
                let iterator = self.iterate(&iterable)?;
                loop {
                    self.tick()?;
                    let Some(item) = self.next_item(&iterator)? else {
                        return self.exec_block(orelse);
                    };
                    self.assign(target, item)?;
                    match self.exec_block(body)? {
                        Signal::Break => break,
                        Signal::Return(value) => return Ok(Signal::Return(value)),
                        Signal::Normal | Signal::Continue => {}
                    }
                }
            }
            StmtKind::Break => return Ok(Signal::Break),
            StmtKind::Continue => return Ok(Signal::Continue),
            StmtKind::FunctionDef(def) => {
                let function = self.make_function(def)?;
                self.store_name(&def.name, function)?;
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::None,
                };
                return Ok(Signal::Return(value));
            }
            StmtKind::Import(aliases) => {
                for alias in aliases {
                    let module = self.import_module(&alias.name)?;
                    self.store_name(alias.bound_name(), Value::Module(module))?;
                }
            }
            StmtKind::ImportFrom { module, names } => {
                let module = self.import_module(module)?;
                match names {
                    None => {
                        for (name, _) in module.members {
                            if let Some(value) = module.attribute(name) {
                                self.store_name(name, value)?;
                            }
                        }
                    }
                    Some(names) => {
                        for alias in names {
                            if alias.name.starts_with('_') {
                                return Err(Flow::violation(format!(
                                    "access to attribute '{}' is not permitted",
                                    alias.name
                                )));
                            }
                            let Some(value) = module.attribute(&alias.name) else {
                                return raise(
                                    ExcKind::ImportError,
                                    format!(
                                        "cannot import name '{}' from '{}'",
                                        alias.name, module.name
                                    ),
                                );
                            };
                            self.store_name(alias.bound_name(), value)?;
                        }
                    }
                }
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => return self.exec_try(body, handlers, orelse, finalbody),
            StmtKind::Raise(value) => return Err(self.raise_flow(value.as_ref())?),
            StmtKind::Assert { test, msg } => {
                if !self.eval(test)?.truthy() {
                    let args = match msg {
                        Some(msg) => vec![self.eval(msg)?],
                        None => Vec::new(),
                    };
                    return Err(Flow::from_exception(Rc::new(ExceptionValue::new(
                        ExcKind::AssertionError,
                        args,
                    ))));
                }
            }
            StmtKind::Delete(targets) => {
                for target in targets {
                    self.delete(target)?;
                }
            }
        }
        Ok(Signal::Normal)
    }

    fn exec_try(
        &mut self,
        body: &[Stmt],
        handlers: &[ExceptHandler],
        orelse: &[Stmt],
        finalbody: &[Stmt],
    ) -> Exec<Signal> {
        let outcome = match self.exec_block(body) {
            Ok(Signal::Normal) => self.exec_block(orelse),
            Ok(signal) => Ok(signal),
            Err(Flow::Exception(raised)) => self.handle_exception(*raised, handlers),
            Err(other) => return Err(other),
        };
        if finalbody.is_empty() || matches!(outcome, Err(Flow::Violation(_) | Flow::Cancelled)) {
            return outcome;
        }
        match self.exec_block(finalbody)? {
            Signal::Normal => outcome,
            overriding => Ok(overriding),
        }
    }

    fn handle_exception(&mut self, raised: Raised, handlers: &[ExceptHandler]) -> Exec<Signal> {
        for handler in handlers {
            if !self.handler_matches(handler, &raised.exc)? {
                continue;
            }
            if let Some(name) = &handler.name {
                self.store_name(name, Value::Exception(raised.exc.clone()))?;
            }
            self.handling.push(raised);
            let result = self.exec_block(&handler.body);
            self.handling.pop();
            if let Some(name) = &handler.name {
                self.env.remove(name);
            }
            return result;
        }
        Err(Flow::Exception(Box::new(raised)))
    }

    fn handler_matches(&mut self, handler: &ExceptHandler, exc: &ExceptionValue) -> Exec<bool> {
        let Some(kind) = &handler.kind else {
            return Ok(true);
        };
        let class = self.eval(kind)?;
        let classes = match &class {
            Value::Tuple(tuple) => tuple.items().to_vec(),
            other => vec![other.clone()],
        };
        for class in classes {
            match class {
                Value::Class(Class::Exception(kind)) => {
                    if exc.kind.is_subclass_of(kind) {
                        return Ok(true);
                    }
                }
                _ => {
                    return type_error(
                        "catching classes that do not inherit from BaseException is not allowed",
                    );
                }
            }
        }
        Ok(false)
    }

    fn raise_flow(&mut self, value: Option<&Expr>) -> Exec<Flow> {
        let Some(expr) = value else {
            return match self.handling.last() {
                Some(raised) => Ok(Flow::Exception(Box::new(raised.clone()))),
                None => raise(ExcKind::RuntimeError, "No active exception to reraise"),
            };
        };
        match self.eval(expr)? {
            Value::Exception(exc) => Ok(Flow::from_exception(exc)),
            Value::Class(Class::Exception(kind)) => Ok(Flow::from_exception(Rc::new(
                ExceptionValue::new(kind, Vec::new()),
            ))),
            _ => type_error("exceptions must derive from BaseException"),
        }
    }

    fn import_module(&self, name: &str) -> Exec<&'static ModuleDef> {
        if self.allowed_modules.contains(&name)
            && let Some(module) = modules::lookup(name)
        {
            return Ok(module);
        }
        if capability::SAFE_MODULES.contains(&name) {
            return Err(Flow::violation(format!(
                "module '{name}' is not enabled for this execution"
            )));
        }
        Err(Flow::violation(format!(
            "import of module '{name}' is not permitted"
        )))
    }

    // ---- names ----

    fn load_name(&self, name: &str) -> Exec<Value> {
        let global = self
            .env
            .function
            .as_ref()
            .is_some_and(|def| def.scope.globals.contains(name));
        if global {
            if let Some(value) = self.globals.get(name) {
                return Ok(value);
            }
        } else {
            let mut env = Some(&self.env);
            while let Some(scope) = env {
                if let Some(value) = scope.get(name) {
                    return Ok(value);
                }
                if scope.declares_local(name) {
                    return raise(
                        ExcKind::UnboundLocalError,
                        format!(
                            "cannot access local variable '{name}' where it is not associated with a value"
                        ),
                    );
                }
                env = scope.parent.as_ref();
            }
        }
        if let Some(value) = self.builtins.get(name) {
            return Ok(value.clone());
        }
        if capability::is_forbidden_name(name) {
            return Err(Flow::violation(format!(
                "use of '{name}' is not permitted"
            )));
        }
        raise(ExcKind::NameError, format!("name '{name}' is not defined"))
    }

    /// Scope a name binds in from the current frame.
    fn binding_scope(&self, name: &str) -> Exec<Rc<Env>> {
        if let Some(def) = &self.env.function {
            if def.scope.globals.contains(name) {
                return Ok(self.globals.clone());
            }
            if def.scope.nonlocals.contains(name) {
                let mut env = self.env.parent.as_ref();
                while let Some(scope) = env {
                    if scope.function.is_some()
                        && (scope.contains(name) || scope.declares_local(name))
                    {
                        return Ok(scope.clone());
                    }
                    env = scope.parent.as_ref();
                }
                return raise(
                    ExcKind::NameError,
                    format!("no binding for nonlocal '{name}' found"),
                );
            }
        }
        Ok(self.env.clone())
    }

    fn store_name(&mut self, name: &str, value: Value) -> Exec<()> {
        if name.starts_with("__") && name.ends_with("__") {
            return Err(Flow::violation(format!(
                "assignment to '{name}' is not permitted"
            )));
        }
        self.binding_scope(name)?.set(name, value);
        Ok(())
    }

    fn delete_name(&mut self, name: &str) -> Exec<()> {
        match self.binding_scope(name)?.remove(name) {
            Some(value) => {
                drop(value);
                Ok(())
            }
            None => raise(ExcKind::NameError, format!("name '{name}' is not defined")),
        }
    }

    // ---- assignment ----

    fn assign(&mut self, target: &Target, value: Value) -> Exec<()> {
        match target {
            Target::Name(name) => self.store_name(name, value),
            Target::Attribute { value: object, attr } => {
                let object = self.eval(object)?;
                self.set_attribute(&object, attr)
            }
            Target::Subscript { value: object, index } => {
                let object = self.eval(object)?;
                let index = self.eval_index(index)?;
                self.set_item(&object, index, value)
            }
            Target::Sequence(targets) => self.unpack(targets, value),
            Target::Starred(inner) => {
                let items = self.collect(&value)?;
                self.assign(inner, Value::list(items))
            }
        }
    }

    fn unpack(&mut self, targets: &[Target], value: Value) -> Exec<()> {
        let items = self.collect(&value)?;
        let star = targets
            .iter()
            .position(|target| matches!(target, Target::Starred(_)));
        match star {
            None => {
                if items.len() > targets.len() {
                    return value_error(format!(
                        "too many values to unpack (expected {})",
                        targets.len()
                    ));
                }
                if items.len() < targets.len() {
                    return value_error(format!(
                        "not enough values to unpack (expected {}, got {})",
                        targets.len(),
                        items.len()
                    ));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item)?;
                }
            }
            Some(star) => {
                let after = targets.len() - star - 1;
                if items.len() < targets.len() - 1 {
                    return value_error(format!(
                        "not enough values to unpack (expected at least {}, got {})",
                        targets.len() - 1,
                        items.len()
                    ));
                }
                let mut items = items;
                let tail = items.split_off(items.len() - after);
                let middle = items.split_off(star);
                for (target, item) in targets[..star].iter().zip(items) {
                    self.assign(target, item)?;
                }
                if let Target::Starred(inner) = &targets[star] {
                    self.assign(inner, Value::list(middle))?;
                }
                for (target, item) in targets[star + 1..].iter().zip(tail) {
                    self.assign(target, item)?;
                }
            }
        }
        Ok(())
    }

    fn aug_assign(&mut self, target: &Target, op: BinOp, value: &Expr) -> Exec<()> {
        match target {
            Target::Name(name) => {
                let current = self.load_name(name)?;
                let rhs = self.eval(value)?;
                let result = self.inplace(op, current, &rhs)?;
                self.store_name(name, result)
            }
            Target::Subscript { value: object, index } => {
                let object = self.eval(object)?;
                let index = self.eval_index(index)?;
                let current = match &index {
                    Index::Item(key) => self.get_item(&object, key)?,
                    Index::Slice(lower, upper, step) => {
                        self.get_slice(&object, *lower, *upper, *step)?
                    }
                };
                let rhs = self.eval(value)?;
                let result = self.inplace(op, current, &rhs)?;
                self.set_item(&object, index, result)
            }
            Target::Attribute { value: object, attr } => {
                let object = self.eval(object)?;
                self.set_attribute(&object, attr)
            }
            Target::Sequence(_) | Target::Starred(_) => {
                type_error("illegal expression for augmented assignment")
            }
        }
    }

    /// `current op= rhs`; lists, sets and dicts update in place.
    fn inplace(&mut self, op: BinOp, current: Value, rhs: &Value) -> Exec<Value> {
        match (op, &current, rhs) {
            (BinOp::Add, Value::List(list), _) => {
                let items = self.collect(rhs)?;
                ops::check_len(list.borrow().len() + items.len(), self.max_len())?;
                list.borrow_mut().extend(items);
                Ok(current)
            }
            (BinOp::BitOr, Value::Set(set), Value::Set(other)) => {
                let added: Vec<(HashKey, Value)> = other
                    .borrow()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                let mut map = set.borrow_mut();
                for (key, value) in added {
                    map.entry(key).or_insert(value);
                }
                drop(map);
                Ok(current)
            }
            (BinOp::BitOr, Value::Dict(dict), Value::Dict(other)) => {
                for (key, value) in other.items() {
                    let hash = key.hash_key()?;
                    dict.insert(hash, key, value);
                }
                Ok(current)
            }
            _ => ops::binary(op, &current, rhs, self.max_len()),
        }
    }

    fn delete(&mut self, target: &Target) -> Exec<()> {
        match target {
            Target::Name(name) => self.delete_name(name),
            Target::Subscript { value, index } => {
                let object = self.eval(value)?;
                let index = self.eval_index(index)?;
                self.del_item(&object, index)
            }
            Target::Attribute { value, attr } => {
                let object = self.eval(value)?;
                self.set_attribute(&object, attr)
            }
            Target::Sequence(targets) => {
                for target in targets {
                    self.delete(target)?;
                }
                Ok(())
            }
            Target::Starred(_) => type_error("cannot delete starred"),
        }
    }

    // ---- expressions ----

    pub(crate) fn eval(&mut self, expr: &Expr) -> Exec<Value> {
        match &expr.kind {
            ExprKind::Constant(constant) => Ok(match constant {
                Constant::None => Value::None,
                Constant::Bool(b) => Value::Bool(*b),
                Constant::Int(i) => Value::Int(*i),
                Constant::Float(x) => Value::Float(*x),
                Constant::Str(s) => Value::str(s.as_str()),
                Constant::Ellipsis => Value::Ellipsis,
            }),
            ExprKind::FString(parts) => self.eval_fstring(parts),
            ExprKind::Name(name) => self.load_name(name),
            ExprKind::List(items) => Ok(Value::list(self.eval_items(items)?)),
            ExprKind::Tuple(items) => Ok(Value::tuple(self.eval_items(items)?)),
            ExprKind::Set(items) => {
                let items = self.eval_items(items)?;
                let mut map = IndexMap::with_capacity(items.len());
                for item in items {
                    map.entry(item.hash_key()?).or_insert(item);
                }
                Ok(Value::set(map))
            }
            ExprKind::Dict(items) => self.eval_dict(items),
            ExprKind::Starred(_) => type_error("can't use starred expression here"),
            ExprKind::BinOp { left, op, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                ops::binary(*op, &left, &right, self.max_len())
            }
            ExprKind::UnaryOp { op, operand } => {
                let operand = self.eval(operand)?;
                ops::unary(*op, &operand)
            }
            ExprKind::BoolOp { op, values } => {
                let mut result = Value::None;
                for value in values {
                    result = self.eval(value)?;
                    let truthy = result.truthy();
                    if (*op == BoolOp::And && !truthy) || (*op == BoolOp::Or && truthy) {
                        break;
                    }
                }
                Ok(result)
            }
            ExprKind::Compare { left, comparisons } => {
                let mut left = self.eval(left)?;
                for (op, right) in comparisons {
                    let right = self.eval(right)?;
                    if !self.compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            ExprKind::IfExp { test, body, orelse } => {
                if self.eval(test)?.truthy() {
                    self.eval(body)
                } else {
                    self.eval(orelse)
                }
            }
            ExprKind::Lambda(def) => self.make_function(def),
            ExprKind::Call { func, args } => {
                let callee = self.eval(func)?;
                let args = self.eval_args(args)?;
                self.call(&callee, args)
            }
            ExprKind::Attribute { value, attr } => {
                let object = self.eval(value)?;
                self.get_attribute(&object, attr)
            }
            ExprKind::Subscript { value, index } => {
                let object = self.eval(value)?;
                match self.eval_index(index)? {
                    Index::Item(key) => self.get_item(&object, &key),
                    Index::Slice(lower, upper, step) => self.get_slice(&object, lower, upper, step),
                }
            }
            ExprKind::Slice { .. } => type_error("slice expression outside of a subscript"),
            ExprKind::Comprehension {
                kind,
                element,
                value,
                clauses,
            } => self.eval_comprehension(*kind, element, value.as_deref(), clauses),
        }
    }

    fn eval_fstring(&mut self, parts: &[FStringPart]) -> Exec<Value> {
        let mut out = String::new();
        for part in parts {
            match part {
                FStringPart::Literal(text) => out.push_str(text),
                FStringPart::Field {
                    expr,
                    conversion,
                    spec,
                } => {
                    let value = self.eval(expr)?;
                    let text = match conversion {
                        Some('s') => format_value(&Value::str(str_of(&value)?), spec)?,
                        Some(_) => format_value(&Value::str(repr(&value)?), spec)?,
                        None => format_value(&value, spec)?,
                    };
                    out.push_str(&text);
                    ops::check_len(out.len(), self.max_len())?;
                }
            }
        }
        Ok(Value::str(out))
    }

    fn eval_items(&mut self, items: &[Expr]) -> Exec<Vec<Value>> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            match &item.kind {
                ExprKind::Starred(inner) => {
                    let value = self.eval(inner)?;
                    out.extend(self.collect(&value)?);
                    ops::check_len(out.len(), self.max_len())?;
                }
                _ => out.push(self.eval(item)?),
            }
        }
        Ok(out)
    }

    fn eval_dict(&mut self, items: &[DictItem]) -> Exec<Value> {
        let mut map = IndexMap::with_capacity(items.len());
        for item in items {
            match item {
                DictItem::Pair(key, value) => {
                    let key = self.eval(key)?;
                    let value = self.eval(value)?;
                    insert_entry(&mut map, key, value)?;
                }
                DictItem::Unpack(expr) => match self.eval(expr)? {
                    Value::Dict(other) => {
                        for (key, value) in other.items() {
                            insert_entry(&mut map, key, value)?;
                        }
                    }
                    other => {
                        return type_error(format!(
                            "'{}' object is not a mapping",
                            other.type_name()
                        ));
                    }
                },
            }
        }
        Ok(Value::dict(map))
    }

    fn eval_args(&mut self, args: &[Argument]) -> Exec<Args> {
        let mut out = Args::default();
        for arg in args {
            match arg {
                Argument::Positional(expr) => out.positional.push(self.eval(expr)?),
                Argument::Starred(expr) => {
                    let value = self.eval(expr)?;
                    out.positional.extend(self.collect(&value)?);
                }
                Argument::Keyword(name, expr) => {
                    let value = self.eval(expr)?;
                    push_keyword(&mut out, Rc::from(name.as_str()), value)?;
                }
                Argument::DoubleStarred(expr) => match self.eval(expr)? {
                    Value::Dict(dict) => {
                        for (key, value) in dict.items() {
                            let Value::Str(key) = key else {
                                return type_error("keywords must be strings");
                            };
                            push_keyword(&mut out, key, value)?;
                        }
                    }
                    other => {
                        return type_error(format!(
                            "argument after ** must be a mapping, not {}",
                            other.type_name()
                        ));
                    }
                },
            }
        }
        Ok(out)
    }

    fn eval_index(&mut self, index: &Expr) -> Exec<Index> {
        let ExprKind::Slice { lower, upper, step } = &index.kind else {
            return Ok(Index::Item(self.eval(index)?));
        };
        let bound = |interp: &mut Self, part: &Option<Box<Expr>>| -> Exec<Option<i64>> {
            let Some(expr) = part else {
                return Ok(None);
            };
            match interp.eval(expr)? {
                Value::None => Ok(None),
                value => match value.as_int() {
                    Some(i) => Ok(Some(i)),
                    None => type_error(
                        "slice indices must be integers or None or have an __index__ method",
                    ),
                },
            }
        };
        let lower = bound(self, lower)?;
        let upper = bound(self, upper)?;
        let step = bound(self, step)?;
        Ok(Index::Slice(lower, upper, step))
    }

    fn compare(&mut self, op: CmpOp, left: &Value, right: &Value) -> Exec<bool> {
        match op {
            CmpOp::In => self.contains(right, left),
            CmpOp::NotIn => Ok(!self.contains(right, left)?),
            _ => ops::compare(op, left, right),
        }
    }

    /// `item in container`.
    pub(crate) fn contains(&mut self, container: &Value, item: &Value) -> Exec<bool> {
        match container {
            Value::Str(text) => match item {
                Value::Str(needle) => Ok(text.contains(needle.as_ref())),
                other => type_error(format!(
                    "'in <string>' requires string as left operand, not {}",
                    other.type_name()
                )),
            },
            Value::List(list) => {
                let items = list.snapshot();
                self.sequence_contains(&items, item)
            }
            Value::Tuple(tuple) => self.sequence_contains(tuple.items(), item),
            Value::Dict(dict) => Ok(dict.borrow().contains_key(&item.hash_key()?)),
            Value::Set(set) => Ok(set.contains(&item.hash_key()?)),
            Value::Range(range) => Ok(match item {
                Value::Float(x) if x.fract() == 0.0 => range.contains(*x as i64),
                other => other.as_int().is_some_and(|i| range.contains(i)),
            }),
            Value::Iterator(iterator) => {
                while let Some(candidate) = self.next_item(iterator)? {
                    self.tick()?;
                    if candidate.is(item) || ops::equals(&candidate, item)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            other => type_error(format!(
                "argument of type '{}' is not iterable",
                other.type_name()
            )),
        }
    }

    fn sequence_contains(&mut self, items: &[Value], item: &Value) -> Exec<bool> {
        for candidate in items {
            self.tick()?;
            if candidate.is(item) || ops::equals(candidate, item)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn eval_comprehension(
        &mut self,
        kind: ComprehensionKind,
        element: &Arc<Expr>,
        value: Option<&Expr>,
        clauses: &Arc<[ComprehensionClause]>,
    ) -> Exec<Value> {
        let Some(first) = clauses.first() else {
            return type_error("comprehension without a for clause");
        };
        let first = self.eval(&first.iter)?;
        if kind == ComprehensionKind::Generator {
            return self.make_generator(element, clauses, &first);
        }
        let scope = Env::new(Some(self.env.clone()), None);
        let saved = std::mem::replace(&mut self.env, scope);
        let mut collected = Collected::new(kind);
        let result = self.comprehension_level(clauses, 0, Some(first), element, value, &mut collected);
        self.env = saved;
        result?;
        Ok(collected.into_value())
    }

    /// Only the outermost iterable is evaluated up front; everything else
    /// runs as items are requested.
    fn make_generator(
        &mut self,
        element: &Arc<Expr>,
        clauses: &Arc<[ComprehensionClause]>,
        first: &Value,
    ) -> Exec<Value> {
        let outer = self.iterate(first)?;
        let generator = Generator {
            element: element.clone(),
            clauses: clauses.clone(),
            scope: Env::new(Some(self.env.clone()), None),
            levels: vec![outer],
        };
        let state: IterRef = Rc::new(RefCell::new(IterState::Generator(Some(Box::new(
            generator,
        )))));
        self.generators.push(Rc::downgrade(&state));
        Ok(Value::Iterator(state))
    }

    /// Whether every `if` condition of a comprehension clause is truthy.
    fn all_hold(&mut self, conditions: &[Expr]) -> Exec<bool> {
        for condition in conditions {
            if !self.eval(condition)?.truthy() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn comprehension_level(
        &mut self,
        clauses: &[ComprehensionClause],
        index: usize,
        iterable: Option<Value>,
        element: &Expr,
        value: Option<&Expr>,
        collected: &mut Collected,
    ) -> Exec<()> {
        let clause = &clauses[index];
        let iterable = match iterable {
            Some(iterable) => iterable,
            None => self.eval(&clause.iter)?,
        };
        let iterator = self.iterate(&iterable)?;
        while let Some(item) = self.next_item(&iterator)? {
            self.tick()?;
            self.assign(&clause.target, item)?;
            if !self.all_hold(&clause.conditions)? {
                continue;
            }
            if index + 1 < clauses.len() {
                self.comprehension_level(clauses, index + 1, None, element, value, collected)?;
                continue;
            }
            let key = self.eval(element)?;
            match value {
                Some(value) => {
                    let value = self.eval(value)?;
                    collected.push_pair(key, value)?;
                }
                None => collected.push(key)?,
            }
            ops::check_len(collected.len(), self.max_len())?;
        }
        Ok(())
    }

    // ---- attributes and items ----

    fn get_attribute(&mut self, object: &Value, attr: &str) -> Exec<Value> {
        if attr.starts_with('_') {
            return Err(Flow::violation(format!(
                "access to attribute '{attr}' is not permitted"
            )));
        }
        if let Value::Module(module) = object {
            return module.attribute(attr).ok_or_else(|| {
                Flow::violation(format!(
                    "module '{}' has no attribute '{attr}' available in the sandbox",
                    module.name
                ))
            });
        }
        match methods::lookup(object, attr) {
            Some(value) => Ok(value),
            None => {
                let owner = match object {
                    Value::Class(class) => format!("type object '{}'", class.name()),
                    other => format!("'{}' object", other.type_name()),
                };
                raise(
                    ExcKind::AttributeError,
                    format!("{owner} has no attribute '{attr}'"),
                )
            }
        }
    }

    fn set_attribute(&mut self, object: &Value, attr: &str) -> Exec<()> {
        if attr.starts_with('_') {
            return Err(Flow::violation(format!(
                "access to attribute '{attr}' is not permitted"
            )));
        }
        if let Value::Module(module) = object {
            return Err(Flow::violation(format!(
                "modifying module '{}' is not permitted",
                module.name
            )));
        }
        raise(
            ExcKind::AttributeError,
            format!(
                "'{}' object attribute '{attr}' is read-only",
                object.type_name()
            ),
        )
    }

    pub(crate) fn get_item(&mut self, object: &Value, key: &Value) -> Exec<Value> {
        match object {
            Value::List(list) => {
                let items = list.borrow();
                let index = sequence_index(key, items.len(), "list")?;
                Ok(items[index].clone())
            }
            Value::Tuple(tuple) => {
                let index = sequence_index(key, tuple.items().len(), "tuple")?;
                Ok(tuple.items()[index].clone())
            }
            Value::Str(text) => {
                let Some(i) = key.as_int() else {
                    return type_error(format!(
                        "string indices must be integers, not '{}'",
                        key.type_name()
                    ));
                };
                let count = text.chars().count();
                let index = normalize_index(i, count)
                    .ok_or_else(|| Flow::raise(ExcKind::IndexError, "string index out of range"))?;
                Ok(Value::str(
                    text.chars().nth(index).map(String::from).unwrap_or_default(),
                ))
            }
            Value::Dict(dict) => match dict.get(&key.hash_key()?) {
                Some(value) => Ok(value),
                None => Err(Flow::from_exception(Rc::new(ExceptionValue::new(
                    ExcKind::KeyError,
                    vec![key.clone()],
                )))),
            },
            Value::Range(range) => {
                let Some(i) = key.as_int() else {
                    return type_error(format!(
                        "range indices must be integers or slices, not {}",
                        key.type_name()
                    ));
                };
                let len = range.len();
                let i = i128::from(i);
                let i = if i < 0 { i + len } else { i };
                if i < 0 || i >= len {
                    return raise(ExcKind::IndexError, "range object index out of range");
                }
                Ok(Value::Int(range.get(i)))
            }
            Value::Class(_) => type_error(format!(
                "type '{}' is not subscriptable",
                object_name(object)
            )),
            other => type_error(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            )),
        }
    }

    fn get_slice(
        &mut self,
        object: &Value,
        lower: Option<i64>,
        upper: Option<i64>,
        step: Option<i64>,
    ) -> Exec<Value> {
        let step = step.unwrap_or(1);
        if step == 0 {
            return value_error("slice step cannot be zero");
        }
        match object {
            Value::List(list) => {
                let items = list.snapshot();
                Ok(Value::list(select(&items, lower, upper, step)))
            }
            Value::Tuple(tuple) => Ok(Value::tuple(select(tuple.items(), lower, upper, step))),
            Value::Str(text) => {
                let chars: Vec<char> = text.chars().collect();
                let (start, _, count) = slice_bounds(chars.len() as i64, lower, upper, step);
                let picked: String = (0..count)
                    .map(|i| chars[(start + i * step) as usize])
                    .collect();
                Ok(Value::str(picked))
            }
            Value::Range(range) => {
                let len = i64::try_from(range.len()).unwrap_or(i64::MAX);
                let (start, stop, _) = slice_bounds(len, lower, upper, step);
                let at = |i: i64| {
                    i128::from(range.start) + i128::from(i) * i128::from(range.step)
                };
                let clamp = |v: i128| v.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64;
                Ok(Value::Range(value::Range {
                    start: clamp(at(start)),
                    stop: clamp(at(stop)),
                    step: clamp(i128::from(range.step) * i128::from(step)),
                }))
            }
            other => type_error(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            )),
        }
    }

    fn set_item(&mut self, object: &Value, index: Index, value: Value) -> Exec<()> {
        match (object, index) {
            (Value::List(list), Index::Item(key)) => {
                let old = {
                    let mut items = list.borrow_mut();
                    let len = items.len();
                    let index = match key.as_int() {
                        Some(i) => normalize_index(i, len).ok_or_else(|| {
                            Flow::raise(ExcKind::IndexError, "list assignment index out of range")
                        })?,
                        None => {
                            return type_error(format!(
                                "list indices must be integers or slices, not {}",
                                key.type_name()
                            ));
                        }
                    };
                    std::mem::replace(&mut items[index], value)
                };
                drop(old);
                Ok(())
            }
            (Value::List(list), Index::Slice(lower, upper, step)) => {
                let replacement = self.collect(&value)?;
                let step = step.unwrap_or(1);
                if step == 0 {
                    return value_error("slice step cannot be zero");
                }
                let removed = {
                    let mut items = list.borrow_mut();
                    let (start, stop, count) = slice_bounds(items.len() as i64, lower, upper, step);
                    if step == 1 {
                        let stop = stop.max(start) as usize;
                        ops::check_len(
                            items.len() - (stop - start as usize) + replacement.len(),
                            self.limits.max_collection_len,
                        )?;
                        items
                            .splice(start as usize..stop, replacement)
                            .collect::<Vec<_>>()
                    } else {
                        if replacement.len() as i64 != count {
                            return value_error(format!(
                                "attempt to assign sequence of size {} to extended slice of size {count}",
                                replacement.len()
                            ));
                        }
                        let mut removed = Vec::with_capacity(replacement.len());
                        for (i, item) in replacement.into_iter().enumerate() {
                            let at = (start + i as i64 * step) as usize;
                            removed.push(std::mem::replace(&mut items[at], item));
                        }
                        removed
                    }
                };
                drop(removed);
                Ok(())
            }
            (Value::Dict(dict), Index::Item(key)) => {
                let hash = key.hash_key()?;
                if !dict.borrow().contains_key(&hash) {
                    ops::check_len(dict.len() + 1, self.max_len())?;
                }
                dict.insert(hash, key, value);
                Ok(())
            }
            (Value::Dict(_), Index::Slice(..)) => type_error("unhashable type: 'slice'"),
            (other, _) => type_error(format!(
                "'{}' object does not support item assignment",
                other.type_name()
            )),
        }
    }

    fn del_item(&mut self, object: &Value, index: Index) -> Exec<()> {
        match (object, index) {
            (Value::List(list), Index::Item(key)) => {
                let Some(i) = key.as_int() else {
                    return type_error(format!(
                        "list indices must be integers or slices, not {}",
                        key.type_name()
                    ));
                };
                let removed = {
                    let mut items = list.borrow_mut();
                    let index = normalize_index(i, items.len()).ok_or_else(|| {
                        Flow::raise(ExcKind::IndexError, "list assignment index out of range")
                    })?;
                    items.remove(index)
                };
                drop(removed);
                Ok(())
            }
            (Value::List(list), Index::Slice(lower, upper, step)) => {
                let step = step.unwrap_or(1);
                if step == 0 {
                    return value_error("slice step cannot be zero");
                }
                let removed = {
                    let mut items = list.borrow_mut();
                    let (start, _, count) = slice_bounds(items.len() as i64, lower, upper, step);
                    let mut doomed: Vec<usize> =
                        (0..count).map(|i| (start + i * step) as usize).collect();
                    doomed.sort_unstable();
                    let mut removed = Vec::with_capacity(doomed.len());
                    for index in doomed.into_iter().rev() {
                        removed.push(items.remove(index));
                    }
                    removed
                };
                drop(removed);
                Ok(())
            }
            (Value::Dict(dict), Index::Item(key)) => match dict.remove(&key.hash_key()?) {
                Some(_) => Ok(()),
                None => Err(Flow::from_exception(Rc::new(ExceptionValue::new(
                    ExcKind::KeyError,
                    vec![key],
                )))),
            },
            (other, _) => type_error(format!(
                "'{}' object doesn't support item deletion",
                other.type_name()
            )),
        }
    }

    // ---- calls ----

    fn make_function(&mut self, def: &Arc<FunctionDef>) -> Exec<Value> {
        let mut defaults = Vec::new();
        for param in &def.params.positional {
            if let Some(default) = &param.default {
                defaults.push(self.eval(default)?);
            }
        }
        let mut kw_defaults = Vec::with_capacity(def.params.kwonly.len());
        for param in &def.params.kwonly {
            kw_defaults.push(match &param.default {
                Some(default) => Some(self.eval(default)?),
                None => None,
            });
        }
        if !Rc::ptr_eq(&self.env, &self.globals) {
            self.closures.push(Rc::downgrade(&self.env));
        }
        Ok(Value::Function(Rc::new(Function {
            def: def.clone(),
            defaults,
            kw_defaults,
            env: self.env.clone(),
        })))
    }

    /// Call any callable value.
    pub(crate) fn call(&mut self, callee: &Value, args: Args) -> Exec<Value> {
        self.tick()?;
        match callee {
            Value::Function(function) => self.call_function(function, args),
            Value::Native(native) => (native.func)(self, args),
            Value::Method(method) => methods::call_method(self, &method.receiver, method.name, args),
            Value::Class(Class::Type(kind)) => builtins::construct(self, *kind, args),
            Value::Class(Class::Exception(kind)) => {
                args.finish(kind.name())?;
                Ok(Value::Exception(Rc::new(ExceptionValue::new(
                    *kind,
                    args.positional,
                ))))
            }
            other => type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            )),
        }
    }

    fn call_function(&mut self, function: &Rc<Function>, args: Args) -> Exec<Value> {
        if self.frames.len() >= self.limits.max_recursion_depth || self.stack_exhausted() {
            return raise(ExcKind::RecursionError, "maximum recursion depth exceeded");
        }
        let scope = Env::new(Some(function.env.clone()), Some(function.def.clone()));
        bind_arguments(function, &scope, args)?;

        self.frames.push(Rc::from(function.def.name.as_str()));
        let saved = std::mem::replace(&mut self.env, scope);
        let result = self.exec_block(&function.def.body);
        self.env = saved;
        self.frames.pop();

        match result? {
            Signal::Return(value) => Ok(value),
            _ => Ok(Value::None),
        }
    }

    fn stack_exhausted(&self) -> bool {
        self.stack_budget
            .is_some_and(|budget| stack_address().abs_diff(self.stack_base) > budget)
    }

    /// `print` implementation shared with the builtin.
    pub(crate) fn write_stdout(&mut self, text: &str) -> Exec<()> {
        self.stdout.write(text)
    }
}

#[inline(never)]
fn stack_address() -> usize {
    let marker = 0u8;
    std::hint::black_box(&marker) as *const u8 as usize
}

fn insert_entry(map: &mut IndexMap<HashKey, (Value, Value)>, key: Value, value: Value) -> Exec<()> {
    let hash = key.hash_key()?;
    match map.get_mut(&hash) {
        Some(slot) => slot.1 = value,
        None => {
            map.insert(hash, (key, value));
        }
    }
    Ok(())
}

fn push_keyword(args: &mut Args, name: Rc<str>, value: Value) -> Exec<()> {
    if args.keywords.iter().any(|(key, _)| *key == name) {
        return type_error(format!("got multiple values for keyword argument '{name}'"));
    }
    args.keywords.push((name, value));
    Ok(())
}

fn object_name(value: &Value) -> &'static str {
    match value {
        Value::Class(class) => class.name(),
        other => other.type_name(),
    }
}

fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let index = if index < 0 { index + len } else { index };
    (0..len).contains(&index).then_some(index as usize)
}

fn sequence_index(key: &Value, len: usize, kind: &str) -> Exec<usize> {
    let Some(i) = key.as_int() else {
        return type_error(format!(
            "{kind} indices must be integers or slices, not {}",
            key.type_name()
        ));
    };
    normalize_index(i, len)
        .ok_or_else(|| Flow::raise(ExcKind::IndexError, format!("{kind} index out of range")))
}

/// Clamp slice bounds to a sequence of `len` items, returning the start,
/// stop and number of selected items.
fn slice_bounds(len: i64, lower: Option<i64>, upper: Option<i64>, step: i64) -> (i64, i64, i64) {
    let adjust = |bound: Option<i64>, default: i64| match bound {
        None => default,
        Some(mut value) => {
            if value < 0 {
                value = value.saturating_add(len);
                if value < 0 {
                    value = if step < 0 { -1 } else { 0 };
                }
            } else if value >= len {
                value = if step < 0 { len - 1 } else { len };
            }
            value
        }
    };
    let (start, stop) = if step > 0 {
        (adjust(lower, 0), adjust(upper, len))
    } else {
        (adjust(lower, len - 1), adjust(upper, -1))
    };
    let count = if step > 0 {
        if start < stop {
            (stop - start - 1) / step + 1
        } else {
            0
        }
    } else if stop < start {
        (start - stop - 1) / (-step) + 1
    } else {
        0
    };
    (start, stop, count)
}

fn select(items: &[Value], lower: Option<i64>, upper: Option<i64>, step: i64) -> Vec<Value> {
    let (start, _, count) = slice_bounds(items.len() as i64, lower, upper, step);
    (0..count)
        .map(|i| items[(start + i * step) as usize].clone())
        .collect()
}

fn bind_arguments(function: &Function, scope: &Env, args: Args) -> Exec<()> {
    let def = &function.def;
    let params = &def.params;
    let name = def.name.as_str();
    let declared = params.positional.len();
    let given = args.positional.len();

    let mut slots: Vec<Option<Value>> = vec![None; declared];
    let mut extra = Vec::new();
    for (index, value) in args.positional.into_iter().enumerate() {
        if index < declared {
            slots[index] = Some(value);
        } else {
            extra.push(value);
        }
    }
    if !extra.is_empty() && params.vararg.is_none() {
        let required = declared - function.defaults.len();
        let takes = if required == declared {
            format!("{declared}")
        } else {
            format!("from {required} to {declared}")
        };
        let plural = if declared == 1 && required == declared { "" } else { "s" };
        let verb = if given == 1 { "was" } else { "were" };
        return type_error(format!(
            "{name}() takes {takes} positional argument{plural} but {given} {verb} given"
        ));
    }

    let mut kw_slots: Vec<Option<Value>> = vec![None; params.kwonly.len()];
    let mut kwargs = IndexMap::new();
    for (key, value) in args.keywords {
        if let Some(index) = params.positional.iter().position(|p| *p.name == *key) {
            if slots[index].is_some() {
                return type_error(format!(
                    "{name}() got multiple values for argument '{key}'"
                ));
            }
            slots[index] = Some(value);
        } else if let Some(index) = params.kwonly.iter().position(|p| *p.name == *key) {
            kw_slots[index] = Some(value);
        } else if params.kwarg.is_some() {
            kwargs.insert(HashKey::Str(key.clone()), (Value::Str(key), value));
        } else {
            return type_error(format!(
                "{name}() got an unexpected keyword argument '{key}'"
            ));
        }
    }

    let first_default = declared - function.defaults.len();
    let mut missing = Vec::new();
    for (index, slot) in slots.iter_mut().enumerate() {
        if slot.is_none() {
            if index >= first_default {
                *slot = Some(function.defaults[index - first_default].clone());
            } else {
                missing.push(params.positional[index].name.as_str());
            }
        }
    }
    if !missing.is_empty() {
        return type_error(missing_message(name, "positional", &missing));
    }

    let mut missing = Vec::new();
    for (index, slot) in kw_slots.iter_mut().enumerate() {
        if slot.is_none() {
            match &function.kw_defaults[index] {
                Some(default) => *slot = Some(default.clone()),
                None => missing.push(params.kwonly[index].name.as_str()),
            }
        }
    }
    if !missing.is_empty() {
        return type_error(missing_message(name, "keyword-only", &missing));
    }

    for (param, value) in params.positional.iter().zip(slots) {
        scope.set(&param.name, value.unwrap_or(Value::None));
    }
    if let Some(vararg) = &params.vararg {
        scope.set(vararg, Value::tuple(extra));
    }
    for (param, value) in params.kwonly.iter().zip(kw_slots) {
        scope.set(&param.name, value.unwrap_or(Value::None));
    }
    if let Some(kwarg) = &params.kwarg {
        scope.set(kwarg, Value::dict(kwargs));
    }
    Ok(())
}

fn missing_message(name: &str, kind: &str, missing: &[&str]) -> String {
    let quoted: Vec<String> = missing.iter().map(|m| format!("'{m}'")).collect();
    let list = match quoted.as_slice() {
        [one] => one.clone(),
        [first, second] => format!("{first} and {second}"),
        [init @ .., last] => format!("{}, and {last}", init.join(", ")),
        [] => String::new(),
    };
    let plural = if missing.len() == 1 { "" } else { "s" };
    format!(
        "{name}() missing {} required {kind} argument{plural}: {list}",
        missing.len()
    )
}

/// Accumulator for comprehension results.
enum Collected {
    List(Vec<Value>),
    Set(IndexMap<HashKey, Value>),
    Dict(IndexMap<HashKey, (Value, Value)>),
}

impl Collected {
    fn new(kind: ComprehensionKind) -> Self {
        match kind {
            ComprehensionKind::List | ComprehensionKind::Generator => Collected::List(Vec::new()),
            ComprehensionKind::Set => Collected::Set(IndexMap::new()),
            ComprehensionKind::Dict => Collected::Dict(IndexMap::new()),
        }
    }

    fn push(&mut self, item: Value) -> Exec<()> {
        match self {
            Collected::List(items) => items.push(item),
            Collected::Set(map) => {
                map.entry(item.hash_key()?).or_insert(item);
            }
            Collected::Dict(_) => return type_error("dict comprehension needs a value"),
        }
        Ok(())
    }

    fn push_pair(&mut self, key: Value, value: Value) -> Exec<()> {
        match self {
            Collected::Dict(map) => insert_entry(map, key, value),
            _ => self.push(key),
        }
    }

    fn len(&self) -> usize {
        match self {
            Collected::List(items) => items.len(),
            Collected::Set(map) => map.len(),
            Collected::Dict(map) => map.len(),
        }
    }

    fn into_value(self) -> Value {
        match self {
            Collected::List(items) => Value::list(items),
            Collected::Set(map) => Value::set(map),
            Collected::Dict(map) => Value::dict(map),
        }
    }
}

/// Weak handles to objects that may sit in reference cycles; teardown
/// visits the ones still alive.
struct Tracked<T> {
    live: Vec<Weak<T>>,
    prune_at: usize,
}

impl<T> Tracked<T> {
    fn new() -> Self {
        Self {
            live: Vec::new(),
            prune_at: 1024,
        }
    }

    fn push(&mut self, item: Weak<T>) {
        self.live.push(item);
        if self.live.len() >= self.prune_at {
            self.live.retain(|weak| weak.strong_count() > 0);
            self.prune_at = (self.live.len() * 2).max(1024);
        }
    }

    fn drain(&mut self) -> impl Iterator<Item = Rc<T>> + '_ {
        self.live.drain(..).filter_map(|weak| weak.upgrade())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STDOUT_LIMIT: usize = 1024 * 1024;

    fn run_with(source: &str, modules: &[&'static str]) -> (Outcome, String) {
        let source = source.to_string();
        let modules = modules.to_vec();
        std::thread::Builder::new()
            .stack_size(64 * 1024 * 1024)
            .spawn(move || {
                let program = crate::lang::parse(&source).expect("test source should parse");
                let stdout = OutputBuffer::new(STDOUT_LIMIT);
                let stderr = OutputBuffer::new(STDOUT_LIMIT);
                let mut interp = Interpreter::new(
                    stdout.clone(),
                    stderr,
                    CancelToken::new(),
                    Limits {
                        max_recursion_depth: 200,
                        max_collection_len: 1_000_000,
                    },
                    modules,
                );
                let outcome = interp.run(&program, &source);
                (outcome, stdout.contents())
            })
            .unwrap()
            .join()
            .unwrap()
    }

    fn run(source: &str) -> (Outcome, String) {
        run_with(source, &["math", "random", "datetime", "json"])
    }

    fn output(source: &str) -> String {
        let (outcome, stdout) = run(source);
        assert!(
            matches!(outcome, Outcome::Completed { .. }),
            "unexpected outcome {outcome:?} for {source:?}"
        );
        stdout
    }

    fn raised(source: &str) -> (String, String) {
        match run(source).0 {
            Outcome::Raised {
                category,
                traceback,
                ..
            } => (category, traceback),
            other => panic!("expected exception, got {other:?}"),
        }
    }

    fn violation(source: &str) -> String {
        match run(source).0 {
            Outcome::Violation { message, .. } => message,
            other => panic!("expected violation, got {other:?}"),
        }
    }

    #[test]
    fn hello_world() {
        assert_eq!(output("print('Hello, World!')"), "Hello, World!\n");
    }

    #[test]
    fn return_value_is_repr_of_last_expression() {
        let (outcome, _) = run("x = [1, 2]\nx + [3]");
        assert_eq!(
            outcome,
            Outcome::Completed {
                return_value: Some("[1, 2, 3]".to_string())
            }
        );
        let (outcome, _) = run("print('hi')");
        assert_eq!(outcome, Outcome::Completed { return_value: None });
        let (outcome, _) = run("'text'\nx = 1");
        assert_eq!(outcome, Outcome::Completed { return_value: None });
    }

    #[test]
    fn functions_and_closures() {
        let source = "\
def make_counter():
    count = 0
    def step():
        nonlocal count
        count += 1
        return count
    return step

c = make_counter()
c()
c()
print(c())
";
        assert_eq!(output(source), "3\n");
    }

    #[test]
    fn default_and_keyword_arguments() {
        let source = "\
def greet(name, greeting='Hello', *rest, punct='!', **extra):
    return f'{greeting}, {name}{punct} {rest} {extra}'
print(greet('Ada'))
print(greet('Bob', 'Hi', 1, 2, punct='?', mood='ok'))
";
        assert_eq!(
            output(source),
            "Hello, Ada! () {}\nHi, Bob? (1, 2) {'mood': 'ok'}\n"
        );
    }

    #[test]
    fn argument_errors_match_python() {
        let (category, traceback) = raised("def f(a, b):\n    pass\nf(1)");
        assert_eq!(category, "TypeError");
        assert!(traceback.ends_with("f() missing 1 required positional argument: 'b'"));
        let (_, traceback) = raised("def f(a):\n    pass\nf(1, 2)");
        assert!(traceback.ends_with("f() takes 1 positional argument but 2 were given"));
    }

    #[test]
    fn global_declaration() {
        let source = "\
total = 0
def add(n):
    global total
    total += n
add(2)
add(3)
print(total)
";
        assert_eq!(output(source), "5\n");
    }

    #[test]
    fn unbound_local() {
        let (category, traceback) = raised("x = 1\ndef f():\n    print(x)\n    x = 2\nf()");
        assert_eq!(category, "UnboundLocalError");
        assert!(traceback.contains("cannot access local variable 'x'"));
    }

    #[test]
    fn loops_with_else_and_break() {
        let source = "\
for i in range(3):
    if i == 5:
        break
else:
    print('no break')
n = 0
while True:
    n += 1
    if n > 3:
        break
print(n)
";
        assert_eq!(output(source), "no break\n4\n");
    }

    #[test]
    fn unpacking_forms() {
        let source = "\
a, b = 1, 2
a, b = b, a
first, *middle, last = [1, 2, 3, 4, 5]
print(a, b, first, middle, last)
for i, (x, y) in enumerate([(1, 2), (3, 4)]):
    print(i, x + y)
";
        assert_eq!(output(source), "2 1 1 [2, 3, 4] 5\n0 3\n1 7\n");
    }

    #[test]
    fn unpacking_errors() {
        let (category, traceback) = raised("a, b = [1, 2, 3]");
        assert_eq!(category, "ValueError");
        assert!(traceback.ends_with("too many values to unpack (expected 2)"));
    }

    #[test]
    fn comprehensions() {
        let source = "\
squares = [x * x for x in range(6) if x % 2 == 0]
pairs = {k: v for k, v in zip('ab', [1, 2])}
unique = {c for c in 'hello'}
total = sum(x for x in range(5))
nested = [(i, j) for i in range(2) for j in range(i)]
print(squares, pairs, len(unique), total, nested)
";
        assert_eq!(
            output(source),
            "[0, 4, 16] {'a': 1, 'b': 2} 4 10 [(1, 0)]\n"
        );
    }

    #[test]
    fn comprehension_variables_do_not_leak() {
        let (category, _) = raised("[i for i in range(3)]\nprint(i)");
        assert_eq!(category, "NameError");
    }

    #[test]
    fn generator_expressions_are_lazy() {
        let source = "print(any(print(x) or x >= 2 for x in range(5)))";
        assert_eq!(output(source), "0\n1\n2\nTrue\n");

        let source = "\
g = (i * j for i in range(3) if i for j in range(i))
print(next(g), list(g), list(g))
";
        assert_eq!(output(source), "0 [0, 2] []\n");
    }

    #[test]
    fn generator_outlives_its_function() {
        let source = "\
def evens(limit):
    return (n for n in range(limit) if n % 2 == 0)
print(list(evens(7)))
";
        assert_eq!(output(source), "[0, 2, 4, 6]\n");
    }

    #[test]
    fn reductions_stream_past_the_collection_limit() {
        let source = "\
print(sum(x for x in range(1_200_000)))
print(max(range(1_000_001)), min(x for x in range(1_100_000)))
";
        assert_eq!(output(source), "719999400000\n1000000 0\n");
    }

    #[test]
    fn generator_cannot_reenter_itself() {
        let (category, traceback) = raised("g = (next(g) for _ in range(2))\nnext(g)");
        assert_eq!(category, "ValueError");
        assert!(traceback.ends_with("ValueError: generator already executing"));
    }

    #[test]
    fn try_except_else_finally() {
        let source = "\
def f(x):
    try:
        result = 10 / x
    except ZeroDivisionError as e:
        print('caught', e)
        return -1
    else:
        print('fine')
        return result
    finally:
        print('cleanup')
print(f(0))
print(f(5))
";
        assert_eq!(
            output(source),
            "caught division by zero\ncleanup\n-1\nfine\ncleanup\n2.0\n"
        );
    }

    #[test]
    fn exception_hierarchy_and_reraise() {
        let source = "\
try:
    try:
        [][1]
    except LookupError:
        print('lookup')
        raise
except IndexError as e:
    print('outer', e.args)
";
        assert_eq!(output(source), "lookup\nouter ('list index out of range',)\n");
    }

    #[test]
    fn raise_custom_message() {
        let (category, traceback) = raised("raise ValueError('bad input')");
        assert_eq!(category, "ValueError");
        assert!(traceback.ends_with("ValueError: bad input"));
    }

    #[test]
    fn traceback_names_frames_and_lines() {
        let source = "def inner():\n    return 1 / 0\n\ndef outer():\n    inner()\n\nouter()\n";
        let (_, traceback) = raised(source);
        assert_eq!(
            traceback,
            "Traceback (most recent call last):\n  \
             File \"<submission>\", line 7, in <module>\n    outer()\n  \
             File \"<submission>\", line 5, in outer\n    inner()\n  \
             File \"<submission>\", line 2, in inner\n    return 1 / 0\n\
             ZeroDivisionError: division by zero"
        );
    }

    #[test]
    fn deep_recursion_is_recursion_error() {
        let (category, traceback) = raised("def f(n):\n    return f(n + 1)\nf(0)");
        assert_eq!(category, "RecursionError");
        assert!(traceback.contains("more times]"));
    }

    #[test]
    fn key_error_shows_repr() {
        let (_, traceback) = raised("d = {'a': 1}\nd['b']");
        assert!(traceback.ends_with("KeyError: 'b'"));
    }

    #[test]
    fn assert_statement() {
        let (category, traceback) = raised("assert 1 + 1 == 3, 'math is broken'");
        assert_eq!(category, "AssertionError");
        assert!(traceback.ends_with("AssertionError: math is broken"));
    }

    #[test]
    fn slicing() {
        let source = "\
s = 'abcdef'
l = list(range(10))
print(s[::-1], s[1:4], s[-2:], l[::3], l[8:2:-2])
l[1:3] = ['x']
del l[-1]
print(l, range(10)[::-1])
";
        assert_eq!(
            output(source),
            "fedcba bcd ef [0, 3, 6, 9] [8, 6, 4]\n[0, 'x', 3, 4, 5, 6, 7, 8] range(9, -1, -1)\n"
        );
    }

    #[test]
    fn augmented_assignment_on_list_is_in_place() {
        let source = "a = [1]\nb = a\na += [2]\nprint(b)\nd = {}\nd['k'] = 1\nd['k'] += 5\nprint(d)";
        assert_eq!(output(source), "[1, 2]\n{'k': 6}\n");
    }

    #[test]
    fn imports_respect_allow_list() {
        assert_eq!(output("import math\nprint(math.sqrt(16))"), "4.0\n");
        assert_eq!(output("from math import pi as p\nprint(round(p, 2))"), "3.14\n");
        assert!(violation("import os").contains("'os' is not permitted"));
        assert!(violation("import time").contains("not enabled"));
        let (outcome, _) = run_with("import time", &["time"]);
        assert!(matches!(outcome, Outcome::Completed { .. }));
    }

    #[test]
    fn capability_violations() {
        assert!(violation("open('x')").contains("'open'"));
        assert!(violation("eval('1')").contains("'eval'"));
        assert!(violation("().__class__").contains("__class__"));
        assert!(violation("import math\nmath.__dict__").contains("__dict__"));
        assert!(violation("import math\nmath.system").contains("'system'"));
        assert!(violation("__builtins__ = 1").contains("__builtins__"));
    }

    #[test]
    fn violations_cannot_be_caught() {
        let source = "try:\n    import os\nexcept Exception:\n    print('caught')\nfinally:\n    print('finally')";
        let (outcome, stdout) = run(source);
        assert!(matches!(outcome, Outcome::Violation { line: Some(2), .. }));
        assert_eq!(stdout, "");
    }

    #[test]
    fn partial_output_is_kept() {
        let (outcome, stdout) = run("print('before')\nx = 1 / 0\nprint('after')");
        assert!(matches!(outcome, Outcome::Raised { line: Some(2), .. }));
        assert_eq!(stdout, "before\n");
    }

    #[test]
    fn cancelled_token_stops_execution() {
        let program = crate::lang::parse("while True:\n    pass").unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut interp = Interpreter::new(
            OutputBuffer::new(100),
            OutputBuffer::new(100),
            cancel,
            Limits {
                max_recursion_depth: 50,
                max_collection_len: 100,
            },
            Vec::new(),
        );
        assert_eq!(interp.run(&program, ""), Outcome::Cancelled);
    }

    #[test]
    fn stack_budget_bounds_recursion_below_depth_limit() {
        let source = "def f(n):\n    return f(n + 1)\nf(0)";
        let program = crate::lang::parse(source).unwrap();
        let mut interp = Interpreter::new(
            OutputBuffer::new(100),
            OutputBuffer::new(STDOUT_LIMIT),
            CancelToken::new(),
            Limits {
                max_recursion_depth: 1_000_000,
                max_collection_len: 100,
            },
            Vec::new(),
        )
        .with_stack_budget(256 * 1024);
        match interp.run(&program, source) {
            Outcome::Raised { category, .. } => assert_eq!(category, "RecursionError"),
            other => panic!("expected RecursionError, got {other:?}"),
        }
    }

    #[test]
    fn collection_limit_is_memory_error() {
        let (category, _) = raised("x = [0] * 10_000_000");
        assert_eq!(category, "MemoryError");
        let (category, _) = raised("x = list(range(10_000_000))");
        assert_eq!(category, "MemoryError");
    }

    #[test]
    fn chained_comparisons_and_membership() {
        let source = "x = 5\nprint(1 < x <= 5, 3 in [1, 2, 3], 'a' not in 'xyz', x is not None)";
        assert_eq!(output(source), "True True True True\n");
    }

    #[test]
    fn lambda_and_sorting() {
        let source = "\
people = [('bob', 25), ('ada', 36), ('cy', 25)]
print(sorted(people, key=lambda p: p[1]))
print(max(people, key=lambda p: p[1])[0])
";
        assert_eq!(
            output(source),
            "[('bob', 25), ('cy', 25), ('ada', 36)]\nada\n"
        );
    }

    #[test]
    fn delete_names_and_items() {
        let (category, _) = raised("x = 1\ndel x\nprint(x)");
        assert_eq!(category, "NameError");
        assert_eq!(output("d = {'a': 1, 'b': 2}\ndel d['a']\nprint(d)"), "{'b': 2}\n");
    }
}
