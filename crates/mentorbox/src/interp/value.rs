//! Runtime values.
//!
//! Containers are reference counted (`Rc`) and mutated through `RefCell`;
//! a value graph never leaves the worker thread that created it.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use indexmap::IndexMap;

use crate::interp::Interpreter;
use crate::interp::exception::{ExcKind, ExceptionValue, Exec, raise, type_error};
use crate::interp::modules::ModuleDef;
use crate::lang::ast::{ComprehensionClause, Expr, FunctionDef};

/// Nesting depth at which hashing and comparison give up.
pub const MAX_VALUE_DEPTH: usize = 1000;

#[derive(Clone)]
pub enum Value {
    None,
    Ellipsis,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<ListObj>),
    Tuple(Rc<TupleObj>),
    Dict(Rc<DictObj>),
    Set(Rc<SetObj>),
    Range(Range),
    Function(Rc<Function>),
    Native(&'static Native),
    Method(Rc<BoundMethod>),
    Module(&'static ModuleDef),
    Class(Class),
    Exception(Rc<ExceptionValue>),
    Iterator(IterRef),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    TimeDelta(TimeDelta),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => f.write_str("None"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int(i) => write!(f, "Int({i})"),
            Value::Float(x) => write!(f, "Float({x})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            other => write!(f, "<{}>", other.type_name()),
        }
    }
}

impl Value {
    pub fn str(text: impl Into<Rc<str>>) -> Value {
        Value::Str(text.into())
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(ListObj::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Rc::new(TupleObj::new(items)))
    }

    pub fn dict(map: IndexMap<HashKey, (Value, Value)>) -> Value {
        Value::Dict(Rc::new(DictObj::new(map)))
    }

    pub fn set(map: IndexMap<HashKey, Value>) -> Value {
        Value::Set(Rc::new(SetObj::new(map)))
    }

    pub fn iterator(state: IterState) -> Value {
        Value::Iterator(Rc::new(RefCell::new(state)))
    }

    pub fn class(&self) -> Class {
        match self {
            Value::Exception(exc) => Class::Exception(exc.kind),
            other => Class::Type(other.type_kind()),
        }
    }

    pub fn type_kind(&self) -> TypeKind {
        match self {
            Value::None => TypeKind::NoneType,
            Value::Ellipsis => TypeKind::Ellipsis,
            Value::Bool(_) => TypeKind::Bool,
            Value::Int(_) => TypeKind::Int,
            Value::Float(_) => TypeKind::Float,
            Value::Str(_) => TypeKind::Str,
            Value::List(_) => TypeKind::List,
            Value::Tuple(_) => TypeKind::Tuple,
            Value::Dict(_) => TypeKind::Dict,
            Value::Set(_) => TypeKind::Set,
            Value::Range(_) => TypeKind::Range,
            Value::Function(_) => TypeKind::Function,
            Value::Native(_) => TypeKind::BuiltinFunction,
            Value::Method(_) => TypeKind::Method,
            Value::Module(_) => TypeKind::Module,
            Value::Class(_) => TypeKind::Type,
            Value::Exception(_) => TypeKind::Exception,
            Value::Iterator(_) => TypeKind::Iterator,
            Value::Date(_) => TypeKind::Date,
            Value::DateTime(_) => TypeKind::DateTime,
            Value::TimeDelta(_) => TypeKind::TimeDelta,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Exception(exc) => exc.kind.name(),
            other => other.type_kind().name(),
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(x) => *x != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(list) => !list.borrow().is_empty(),
            Value::Tuple(tuple) => !tuple.items().is_empty(),
            Value::Dict(dict) => !dict.borrow().is_empty(),
            Value::Set(set) => !set.borrow().is_empty(),
            Value::Range(range) => range.len() > 0,
            Value::TimeDelta(delta) => !delta.is_zero(),
            _ => true,
        }
    }

    /// Integer view of `int` and `bool` values.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Float view of any real number.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x),
            Value::Int(i) => Some(*i as f64),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Identity comparison (`is`).
    pub fn is(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) | (Value::Ellipsis, Value::Ellipsis) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => Rc::ptr_eq(a, b) || a == b,
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Tuple(a), Value::Tuple(b)) => Rc::ptr_eq(a, b),
            (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b),
            (Value::Set(a), Value::Set(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => std::ptr::eq(*a, *b),
            (Value::Method(a), Value::Method(b)) => Rc::ptr_eq(a, b),
            (Value::Module(a), Value::Module(b)) => std::ptr::eq(*a, *b),
            (Value::Class(a), Value::Class(b)) => a == b,
            (Value::Exception(a), Value::Exception(b)) => Rc::ptr_eq(a, b),
            (Value::Iterator(a), Value::Iterator(b)) => Rc::ptr_eq(a, b),
            (Value::Range(a), Value::Range(b)) => a == b,
            _ => false,
        }
    }

    /// Address used for cycle detection of containers.
    pub fn container_id(&self) -> Option<usize> {
        match self {
            Value::List(rc) => Some(Rc::as_ptr(rc) as usize),
            Value::Tuple(rc) => Some(Rc::as_ptr(rc) as usize),
            Value::Dict(rc) => Some(Rc::as_ptr(rc) as usize),
            Value::Set(rc) => Some(Rc::as_ptr(rc) as usize),
            _ => None,
        }
    }

    pub fn hash_key(&self) -> Exec<HashKey> {
        self.hash_key_at(0)
    }

    fn hash_key_at(&self, depth: usize) -> Exec<HashKey> {
        if depth > MAX_VALUE_DEPTH {
            return raise(
                ExcKind::RecursionError,
                "maximum recursion depth exceeded while hashing",
            );
        }
        let key = match self {
            Value::None => HashKey::None,
            Value::Ellipsis => HashKey::Ellipsis,
            Value::Bool(b) => HashKey::Int(i64::from(*b)),
            Value::Int(i) => HashKey::Int(*i),
            Value::Float(x) => float_key(*x),
            Value::Str(s) => HashKey::Str(s.clone()),
            Value::Tuple(tuple) => HashKey::Tuple(
                tuple
                    .items()
                    .iter()
                    .map(|item| item.hash_key_at(depth + 1))
                    .collect::<Exec<Vec<_>>>()?
                    .into_boxed_slice(),
            ),
            Value::Range(r) => HashKey::Range(r.start, r.stop, r.step),
            Value::Date(d) => HashKey::Date(*d),
            Value::DateTime(dt) => HashKey::DateTime(*dt),
            Value::TimeDelta(delta) => HashKey::TimeDelta(*delta),
            Value::Class(class) => HashKey::Class(*class),
            Value::Function(f) => HashKey::Identity(Rc::as_ptr(f) as usize),
            Value::Native(n) => HashKey::Identity(*n as *const Native as usize),
            Value::Method(m) => HashKey::Identity(Rc::as_ptr(m) as usize),
            Value::Module(m) => HashKey::Identity(*m as *const ModuleDef as usize),
            Value::Exception(e) => HashKey::Identity(Rc::as_ptr(e) as usize),
            Value::Iterator(i) => HashKey::Identity(Rc::as_ptr(i) as usize),
            Value::List(_) | Value::Dict(_) | Value::Set(_) => {
                return type_error(format!("unhashable type: '{}'", self.type_name()));
            }
        };
        Ok(key)
    }
}

fn float_key(x: f64) -> HashKey {
    if x.fract() == 0.0 && x >= i64::MIN as f64 && x < i64::MAX as f64 {
        HashKey::Int(x as i64)
    } else {
        HashKey::Float(x.to_bits())
    }
}

/// Hashable projection of a value, used as the key of dicts and sets.
///
/// Numbers that compare equal map to the same key (`1`, `1.0`, `True`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    None,
    Ellipsis,
    Int(i64),
    Float(u64),
    Str(Rc<str>),
    Tuple(Box<[HashKey]>),
    Range(i64, i64, i64),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    TimeDelta(TimeDelta),
    Class(Class),
    Identity(usize),
}

// ---- containers ----

#[derive(Default)]
pub struct ListObj {
    items: RefCell<Vec<Value>>,
}

impl ListObj {
    pub fn new(items: Vec<Value>) -> Self {
        Self {
            items: RefCell::new(items),
        }
    }

    pub fn borrow(&self) -> Ref<'_, Vec<Value>> {
        self.items.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, Vec<Value>> {
        self.items.borrow_mut()
    }

    pub fn snapshot(&self) -> Vec<Value> {
        self.items.borrow().clone()
    }
}

impl Drop for ListObj {
    fn drop(&mut self) {
        release(std::mem::take(self.items.get_mut()));
    }
}

pub struct TupleObj {
    items: Vec<Value>,
}

impl TupleObj {
    pub fn new(items: Vec<Value>) -> Self {
        Self { items }
    }

    pub fn items(&self) -> &[Value] {
        &self.items
    }
}

impl Drop for TupleObj {
    fn drop(&mut self) {
        release(std::mem::take(&mut self.items));
    }
}

/// Insertion-ordered dict; each entry keeps the original key value.
pub struct DictObj {
    map: RefCell<IndexMap<HashKey, (Value, Value)>>,
}

impl DictObj {
    pub fn new(map: IndexMap<HashKey, (Value, Value)>) -> Self {
        Self {
            map: RefCell::new(map),
        }
    }

    pub fn borrow(&self) -> Ref<'_, IndexMap<HashKey, (Value, Value)>> {
        self.map.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, IndexMap<HashKey, (Value, Value)>> {
        self.map.borrow_mut()
    }

    pub fn keys(&self) -> Vec<Value> {
        self.map.borrow().values().map(|(k, _)| k.clone()).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.map.borrow().values().map(|(_, v)| v.clone()).collect()
    }

    pub fn items(&self) -> Vec<(Value, Value)> {
        self.map.borrow().values().cloned().collect()
    }

    pub fn get(&self, key: &HashKey) -> Option<Value> {
        self.map.borrow().get(key).map(|(_, v)| v.clone())
    }

    pub fn insert(&self, key: HashKey, key_value: Value, value: Value) {
        let old = {
            let mut map = self.map.borrow_mut();
            match map.get_mut(&key) {
                Some(slot) => Some(std::mem::replace(&mut slot.1, value)),
                None => {
                    map.insert(key, (key_value, value));
                    None
                }
            }
        };
        drop(old);
    }

    pub fn remove(&self, key: &HashKey) -> Option<Value> {
        let removed = self.map.borrow_mut().shift_remove(key);
        removed.map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.map.borrow().len()
    }
}

impl Drop for DictObj {
    fn drop(&mut self) {
        let map = std::mem::take(self.map.get_mut());
        release(map.into_values().flat_map(|(k, v)| [k, v]).collect());
    }
}

pub struct SetObj {
    map: RefCell<IndexMap<HashKey, Value>>,
}

impl SetObj {
    pub fn new(map: IndexMap<HashKey, Value>) -> Self {
        Self {
            map: RefCell::new(map),
        }
    }

    pub fn borrow(&self) -> Ref<'_, IndexMap<HashKey, Value>> {
        self.map.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, IndexMap<HashKey, Value>> {
        self.map.borrow_mut()
    }

    pub fn snapshot(&self) -> Vec<Value> {
        self.map.borrow().values().cloned().collect()
    }

    pub fn contains(&self, key: &HashKey) -> bool {
        self.map.borrow().contains_key(key)
    }
}

impl Drop for SetObj {
    fn drop(&mut self) {
        let map = std::mem::take(self.map.get_mut());
        release(map.into_values().collect());
    }
}

/// Drop a batch of values without recursing through nested containers.
fn release(mut pending: Vec<Value>) {
    while let Some(value) = pending.pop() {
        match value {
            Value::List(rc) => {
                if let Some(list) = Rc::into_inner(rc) {
                    let mut list = list;
                    pending.append(list.items.get_mut());
                }
            }
            Value::Tuple(rc) => {
                if let Some(tuple) = Rc::into_inner(rc) {
                    let mut tuple = tuple;
                    pending.append(&mut tuple.items);
                }
            }
            Value::Dict(rc) => {
                if let Some(dict) = Rc::into_inner(rc) {
                    let mut dict = dict;
                    let map = std::mem::take(dict.map.get_mut());
                    pending.extend(map.into_values().flat_map(|(k, v)| [k, v]));
                }
            }
            Value::Set(rc) => {
                if let Some(set) = Rc::into_inner(rc) {
                    let mut set = set;
                    let map = std::mem::take(set.map.get_mut());
                    pending.extend(map.into_values());
                }
            }
            _ => {}
        }
    }
}

// ---- ranges ----

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl Range {
    pub fn len(&self) -> i128 {
        let (start, stop, step) = (
            i128::from(self.start),
            i128::from(self.stop),
            i128::from(self.step),
        );
        if step > 0 && start < stop {
            (stop - start - 1) / step + 1
        } else if step < 0 && start > stop {
            (start - stop - 1) / (-step) + 1
        } else {
            0
        }
    }

    /// Element at `index`, which must be in `0..len()`.
    pub fn get(&self, index: i128) -> i64 {
        (i128::from(self.start) + index * i128::from(self.step)) as i64
    }

    pub fn contains(&self, value: i64) -> bool {
        let (value, start, step) = (
            i128::from(value),
            i128::from(self.start),
            i128::from(self.step),
        );
        let in_bounds = if step > 0 {
            value >= start && value < i128::from(self.stop)
        } else {
            value <= start && value > i128::from(self.stop)
        };
        in_bounds && (value - start) % step == 0
    }
}

// ---- callables ----

/// A user-defined function or lambda.
pub struct Function {
    pub def: Arc<FunctionDef>,
    /// Defaults of the trailing positional parameters.
    pub defaults: Vec<Value>,
    /// Defaults of keyword-only parameters, aligned with `def.params.kwonly`.
    pub kw_defaults: Vec<Option<Value>>,
    /// The environment the function was defined in.
    pub env: Rc<Env>,
}

pub type NativeFn = fn(&mut Interpreter, Args) -> Exec<Value>;

/// A built-in function implemented in Rust.
pub struct Native {
    pub name: &'static str,
    pub func: NativeFn,
}

/// A method looked up on a value, e.g. `items.append`.
pub struct BoundMethod {
    pub receiver: Value,
    pub name: &'static str,
}

/// Arguments of a call after unpacking.
#[derive(Default)]
pub struct Args {
    pub positional: Vec<Value>,
    pub keywords: Vec<(Rc<str>, Value)>,
}

impl Args {
    pub fn new(positional: Vec<Value>) -> Self {
        Self {
            positional,
            keywords: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.positional.len()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.positional.get(index)
    }

    /// Check the positional argument count of `name()`.
    pub fn expect(&self, name: &str, min: usize, max: usize) -> Exec<()> {
        let given = self.positional.len();
        if given >= min && given <= max {
            return Ok(());
        }
        let plural = |n: usize| if n == 1 { "" } else { "s" };
        let message = if min == max {
            format!(
                "{name}() takes exactly {min} argument{} ({given} given)",
                plural(min)
            )
        } else if given < min {
            format!(
                "{name}() takes at least {min} argument{} ({given} given)",
                plural(min)
            )
        } else {
            format!(
                "{name}() takes at most {max} argument{} ({given} given)",
                plural(max)
            )
        };
        type_error(message)
    }

    pub fn take_keyword(&mut self, key: &str) -> Option<Value> {
        let index = self.keywords.iter().position(|(k, _)| k.as_ref() == key)?;
        Some(self.keywords.remove(index).1)
    }

    /// Take the argument at `index`, or the keyword `key` if not given
    /// positionally.
    pub fn take(&mut self, index: usize, key: &str) -> Option<Value> {
        let keyword = self.take_keyword(key);
        self.positional.get(index).cloned().or(keyword)
    }

    /// Fail if keyword arguments remain unconsumed.
    pub fn finish(&self, name: &str) -> Exec<()> {
        match self.keywords.first() {
            Some((key, _)) => type_error(format!(
                "{name}() got an unexpected keyword argument '{key}'"
            )),
            None => Ok(()),
        }
    }
}

// ---- classes ----

/// Built-in type of a value; the callable ones double as constructors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    NoneType,
    Ellipsis,
    Bool,
    Int,
    Float,
    Str,
    List,
    Tuple,
    Dict,
    Set,
    Range,
    Function,
    BuiltinFunction,
    Method,
    Module,
    Type,
    Exception,
    Iterator,
    Date,
    DateTime,
    TimeDelta,
}

impl TypeKind {
    pub fn name(self) -> &'static str {
        match self {
            TypeKind::NoneType => "NoneType",
            TypeKind::Ellipsis => "ellipsis",
            TypeKind::Bool => "bool",
            TypeKind::Int => "int",
            TypeKind::Float => "float",
            TypeKind::Str => "str",
            TypeKind::List => "list",
            TypeKind::Tuple => "tuple",
            TypeKind::Dict => "dict",
            TypeKind::Set => "set",
            TypeKind::Range => "range",
            TypeKind::Function => "function",
            TypeKind::BuiltinFunction => "builtin_function_or_method",
            TypeKind::Method => "method",
            TypeKind::Module => "module",
            TypeKind::Type => "type",
            TypeKind::Exception => "BaseException",
            TypeKind::Iterator => "iterator",
            TypeKind::Date => "date",
            TypeKind::DateTime => "datetime",
            TypeKind::TimeDelta => "timedelta",
        }
    }

    /// Name including the defining module, as shown by `repr(type)`.
    pub fn qualified_name(self) -> String {
        match self {
            TypeKind::Date | TypeKind::DateTime | TypeKind::TimeDelta => {
                format!("datetime.{}", self.name())
            }
            other => other.name().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Class {
    Type(TypeKind),
    Exception(ExcKind),
}

impl Class {
    pub fn name(self) -> &'static str {
        match self {
            Class::Type(kind) => kind.name(),
            Class::Exception(kind) => kind.name(),
        }
    }

    /// `isinstance` check of a value against this class.
    pub fn matches(self, value: &Value) -> bool {
        match (self, value) {
            (Class::Exception(kind), Value::Exception(exc)) => exc.kind.is_subclass_of(kind),
            (Class::Type(TypeKind::Int), Value::Bool(_)) => true,
            (Class::Type(TypeKind::Date), Value::DateTime(_)) => true,
            (Class::Type(TypeKind::Exception), Value::Exception(_)) => true,
            (Class::Type(kind), other) => other.type_kind() == kind,
            _ => false,
        }
    }
}

// ---- iterators ----

pub type IterRef = Rc<RefCell<IterState>>;

pub enum IterState {
    /// Live view over a list; sees appends made during iteration.
    List {
        list: Rc<ListObj>,
        index: usize,
    },
    Tuple {
        tuple: Rc<TupleObj>,
        index: usize,
    },
    Str {
        text: Rc<str>,
        offset: usize,
    },
    /// Pre-computed items (dict keys, set members).
    Values(std::vec::IntoIter<Value>),
    Range {
        next: i128,
        stop: i128,
        step: i128,
    },
    Enumerate {
        inner: IterRef,
        count: i64,
    },
    Zip {
        inners: Vec<IterRef>,
    },
    Map {
        func: Value,
        inners: Vec<IterRef>,
    },
    Filter {
        func: Value,
        inner: IterRef,
    },
    /// A generator expression; `None` while it is computing its next item.
    Generator(Option<Box<Generator>>),
    Exhausted,
}

/// Suspended generator expression.
pub struct Generator {
    pub element: Arc<Expr>,
    pub clauses: Arc<[ComprehensionClause]>,
    /// Holds the loop variables; its parent is the scope the expression
    /// was evaluated in.
    pub scope: Rc<Env>,
    /// Live iterator of each entered `for` clause, outermost first.
    pub levels: Vec<IterRef>,
}

// ---- environments ----

/// A variable scope. Function frames link to the scope they were defined in.
pub struct Env {
    vars: RefCell<HashMap<Rc<str>, Value>>,
    pub parent: Option<Rc<Env>>,
    /// The function this environment is a frame of; `None` for module and
    /// comprehension scopes.
    pub function: Option<Arc<FunctionDef>>,
}

impl Env {
    pub fn new(parent: Option<Rc<Env>>, function: Option<Arc<FunctionDef>>) -> Rc<Env> {
        Rc::new(Env {
            vars: RefCell::new(HashMap::new()),
            parent,
            function,
        })
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.vars.borrow().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.borrow().contains_key(name)
    }

    pub fn set(&self, name: &str, value: Value) {
        let old = {
            let mut vars = self.vars.borrow_mut();
            match vars.get_mut(name) {
                Some(slot) => Some(std::mem::replace(slot, value)),
                None => {
                    vars.insert(Rc::from(name), value);
                    None
                }
            }
        };
        drop(old);
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        self.vars.borrow_mut().remove(name)
    }

    /// Drop every binding, breaking reference cycles through closures.
    pub fn clear(&self) {
        let vars = std::mem::take(&mut *self.vars.borrow_mut());
        release(vars.into_values().collect());
    }

    /// Whether `name` is a local variable of this function frame.
    pub fn declares_local(&self, name: &str) -> bool {
        self.function
            .as_ref()
            .is_some_and(|def| def.scope.locals.contains(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_keys_unify() {
        assert_eq!(Value::Int(1).hash_key().unwrap(), HashKey::Int(1));
        assert_eq!(Value::Bool(true).hash_key().unwrap(), HashKey::Int(1));
        assert_eq!(Value::Float(1.0).hash_key().unwrap(), HashKey::Int(1));
        assert_ne!(Value::Float(1.5).hash_key().unwrap(), HashKey::Int(1));
    }

    #[test]
    fn lists_are_unhashable() {
        assert!(Value::list(vec![]).hash_key().is_err());
        let key = Value::tuple(vec![Value::Int(1), Value::str("a")]).hash_key();
        assert!(key.is_ok());
    }

    #[test]
    fn range_arithmetic() {
        let r = Range {
            start: 0,
            stop: 10,
            step: 3,
        };
        assert_eq!(r.len(), 4);
        assert_eq!(r.get(3), 9);
        assert!(r.contains(6));
        assert!(!r.contains(7));

        let down = Range {
            start: 5,
            stop: 0,
            step: -2,
        };
        assert_eq!(down.len(), 3);
        assert!(down.contains(1));
        assert!(!down.contains(0));
    }

    #[test]
    fn truthiness() {
        assert!(!Value::None.truthy());
        assert!(!Value::Int(0).truthy());
        assert!(Value::str("x").truthy());
        assert!(!Value::list(vec![]).truthy());
        assert!(Value::tuple(vec![Value::None]).truthy());
    }

    #[test]
    fn deeply_nested_lists_drop_without_overflow() {
        let mut value = Value::list(vec![]);
        for _ in 0..200_000 {
            value = Value::list(vec![value]);
        }
        drop(value);
    }

    #[test]
    fn isinstance_rules() {
        assert!(Class::Type(TypeKind::Int).matches(&Value::Bool(true)));
        assert!(!Class::Type(TypeKind::Bool).matches(&Value::Int(1)));
        let exc = Value::Exception(Rc::new(ExceptionValue::new(
            ExcKind::ZeroDivisionError,
            vec![],
        )));
        assert!(Class::Exception(ExcKind::ArithmeticError).matches(&exc));
        assert!(!Class::Exception(ExcKind::LookupError).matches(&exc));
    }

    #[test]
    fn env_set_and_replace() {
        let env = Env::new(None, None);
        env.set("x", Value::Int(1));
        env.set("x", Value::Int(2));
        assert!(matches!(env.get("x"), Some(Value::Int(2))));
        env.clear();
        assert!(env.get("x").is_none());
    }
}
