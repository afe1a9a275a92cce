//! Iteration protocol shared by `for`, unpacking and the builtins.

use std::cell::RefCell;
use std::rc::Rc;

use crate::interp::Interpreter;
use crate::interp::exception::{Exec, type_error, value_error};
use crate::interp::ops;
use crate::interp::value::{Args, Generator, IterRef, IterState, Value};

/// Work left over after the iterator state has been released; composite
/// iterators call back into the interpreter and must not hold the borrow.
enum Pending {
    Ready(Option<Value>),
    Enumerate(IterRef, i64),
    Zip(Vec<IterRef>),
    Map(Value, Vec<IterRef>),
    Filter(Value, IterRef),
    Resume(Box<Generator>),
    Running,
}

impl Interpreter {
    /// Start iterating over `value`.
    pub(crate) fn iterate(&mut self, value: &Value) -> Exec<IterRef> {
        let state = match value {
            Value::List(list) => IterState::List {
                list: list.clone(),
                index: 0,
            },
            Value::Tuple(tuple) => IterState::Tuple {
                tuple: tuple.clone(),
                index: 0,
            },
            Value::Str(text) => IterState::Str {
                text: text.clone(),
                offset: 0,
            },
            Value::Dict(dict) => IterState::Values(dict.keys().into_iter()),
            Value::Set(set) => IterState::Values(set.snapshot().into_iter()),
            Value::Range(range) => IterState::Range {
                next: i128::from(range.start),
                stop: i128::from(range.stop),
                step: i128::from(range.step),
            },
            Value::Iterator(iterator) => return Ok(iterator.clone()),
            other => {
                return type_error(format!(
                    "'{}' object is not iterable",
                    other.type_name()
                ));
            }
        };
        Ok(Rc::new(RefCell::new(state)))
    }

    /// Advance `iterator`, returning `None` once it is exhausted.
    pub(crate) fn next_item(&mut self, iterator: &IterRef) -> Exec<Option<Value>> {
        let pending = {
            let mut state = iterator.borrow_mut();
            match &mut *state {
                IterState::List { list, index } => {
                    let item = list.borrow().get(*index).cloned();
                    *index += 1;
                    Pending::Ready(item)
                }
                IterState::Tuple { tuple, index } => {
                    let item = tuple.items().get(*index).cloned();
                    *index += 1;
                    Pending::Ready(item)
                }
                IterState::Str { text, offset } => {
                    let ch = text[*offset..].chars().next();
                    if let Some(ch) = ch {
                        *offset += ch.len_utf8();
                    }
                    Pending::Ready(ch.map(|ch| Value::str(ch.to_string())))
                }
                IterState::Values(items) => Pending::Ready(items.next()),
                IterState::Range { next, stop, step } => {
                    let live = if *step > 0 { *next < *stop } else { *next > *stop };
                    if live {
                        let value = *next as i64;
                        *next += *step;
                        Pending::Ready(Some(Value::Int(value)))
                    } else {
                        Pending::Ready(None)
                    }
                }
                IterState::Enumerate { inner, count } => {
                    let current = *count;
                    *count = count.saturating_add(1);
                    Pending::Enumerate(inner.clone(), current)
                }
                IterState::Zip { inners } => Pending::Zip(inners.clone()),
                IterState::Map { func, inners } => Pending::Map(func.clone(), inners.clone()),
                IterState::Filter { func, inner } => Pending::Filter(func.clone(), inner.clone()),
                IterState::Generator(slot) => match slot.take() {
                    Some(generator) => Pending::Resume(generator),
                    None => Pending::Running,
                },
                IterState::Exhausted => Pending::Ready(None),
            }
        };

        let item = match pending {
            Pending::Ready(item) => item,
            Pending::Enumerate(inner, count) => self
                .next_item(&inner)?
                .map(|item| Value::tuple(vec![Value::Int(count), item])),
            Pending::Zip(inners) => self.next_row(&inners)?.map(Value::tuple),
            Pending::Map(func, inners) => match self.next_row(&inners)? {
                Some(row) => Some(self.call(&func, Args::new(row))?),
                None => None,
            },
            Pending::Filter(func, inner) => loop {
                self.tick()?;
                let Some(item) = self.next_item(&inner)? else {
                    break None;
                };
                let keep = match &func {
                    Value::None => item.truthy(),
                    func => self.call(func, Args::new(vec![item.clone()]))?.truthy(),
                };
                if keep {
                    break Some(item);
                }
            },
            Pending::Running => return value_error("generator already executing"),
            Pending::Resume(mut generator) => {
                let item = self.resume(&mut generator);
                if let Ok(Some(_)) = item {
                    *iterator.borrow_mut() = IterState::Generator(Some(generator));
                } else {
                    *iterator.borrow_mut() = IterState::Exhausted;
                }
                item?
            }
        };
        if item.is_none() {
            *iterator.borrow_mut() = IterState::Exhausted;
        }
        Ok(item)
    }

    /// Run a generator expression in its own scope until it yields.
    fn resume(&mut self, generator: &mut Generator) -> Exec<Option<Value>> {
        let saved = std::mem::replace(&mut self.env, generator.scope.clone());
        let result = self.advance(generator);
        self.env = saved;
        result
    }

    fn advance(&mut self, generator: &mut Generator) -> Exec<Option<Value>> {
        let clauses = generator.clauses.clone();
        while let Some(iterator) = generator.levels.last().cloned() {
            self.tick()?;
            let depth = generator.levels.len() - 1;
            let Some(item) = self.next_item(&iterator)? else {
                generator.levels.pop();
                continue;
            };
            let clause = &clauses[depth];
            self.assign(&clause.target, item)?;
            if !self.all_hold(&clause.conditions)? {
                continue;
            }
            match clauses.get(depth + 1) {
                Some(inner) => {
                    let iterable = self.eval(&inner.iter)?;
                    let inner = self.iterate(&iterable)?;
                    generator.levels.push(inner);
                }
                None => return self.eval(&generator.element).map(Some),
            }
        }
        Ok(None)
    }

    /// One item from each iterator, or `None` when any is exhausted.
    fn next_row(&mut self, inners: &[IterRef]) -> Exec<Option<Vec<Value>>> {
        let mut row = Vec::with_capacity(inners.len());
        for inner in inners {
            match self.next_item(inner)? {
                Some(item) => row.push(item),
                None => return Ok(None),
            }
        }
        Ok(Some(row))
    }

    /// Drain `value` into a vector, enforcing the collection limit.
    pub(crate) fn collect(&mut self, value: &Value) -> Exec<Vec<Value>> {
        let max = self.max_len();
        match value {
            Value::List(list) => Ok(list.snapshot()),
            Value::Tuple(tuple) => Ok(tuple.items().to_vec()),
            Value::Dict(dict) => Ok(dict.keys()),
            Value::Set(set) => Ok(set.snapshot()),
            Value::Str(text) => Ok(text
                .chars()
                .map(|ch| Value::str(ch.to_string()))
                .collect()),
            Value::Range(range) => {
                let len = usize::try_from(range.len()).unwrap_or(usize::MAX);
                ops::check_len(len, max)?;
                Ok((0..range.len()).map(|i| Value::Int(range.get(i))).collect())
            }
            other => {
                let iterator = self.iterate(other)?;
                let mut items = Vec::new();
                while let Some(item) = self.next_item(&iterator)? {
                    items.push(item);
                    ops::check_len(items.len(), max)?;
                    if items.len() % 1024 == 0 {
                        self.tick()?;
                    }
                }
                Ok(items)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::{CancelToken, Limits, OutputBuffer};

    fn interpreter() -> Interpreter {
        Interpreter::new(
            OutputBuffer::new(1024),
            OutputBuffer::new(1024),
            CancelToken::new(),
            Limits {
                max_recursion_depth: 50,
                max_collection_len: 100,
            },
            Vec::new(),
        )
    }

    fn ints(values: &[Value]) -> Vec<i64> {
        values.iter().filter_map(Value::as_int).collect()
    }

    #[test]
    fn ranges_iterate_both_directions() {
        let mut interp = interpreter();
        let up = Value::Range(crate::interp::value::Range {
            start: 0,
            stop: 5,
            step: 2,
        });
        assert_eq!(ints(&interp.collect(&up).unwrap()), vec![0, 2, 4]);
        let down = Value::Range(crate::interp::value::Range {
            start: 3,
            stop: 0,
            step: -1,
        });
        assert_eq!(ints(&interp.collect(&down).unwrap()), vec![3, 2, 1]);
    }

    #[test]
    fn range_beyond_limit_is_rejected_before_allocation() {
        let mut interp = interpreter();
        let huge = Value::Range(crate::interp::value::Range {
            start: 0,
            stop: i64::MAX,
            step: 1,
        });
        assert!(interp.collect(&huge).is_err());
    }

    #[test]
    fn exhausted_iterator_stays_exhausted() {
        let mut interp = interpreter();
        let list = Value::list(vec![Value::Int(1)]);
        let iterator = interp.iterate(&list).unwrap();
        assert!(interp.next_item(&iterator).unwrap().is_some());
        assert!(interp.next_item(&iterator).unwrap().is_none());
        if let Value::List(list) = &list {
            list.borrow_mut().push(Value::Int(2));
        }
        assert!(interp.next_item(&iterator).unwrap().is_none());
    }

    #[test]
    fn strings_iterate_by_character() {
        let mut interp = interpreter();
        let items = interp.collect(&Value::str("hé")).unwrap();
        let chars: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
        assert_eq!(chars, vec!["h", "é"]);
    }

    #[test]
    fn ints_are_not_iterable() {
        let mut interp = interpreter();
        assert!(interp.iterate(&Value::Int(3)).is_err());
    }
}
