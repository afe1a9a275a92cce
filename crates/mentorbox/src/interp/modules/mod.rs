//! Importable modules.
//!
//! Each module is a static table of members shared read-only by every
//! execution; only names listed here exist on a module.

pub mod datetime;
pub mod json;
pub mod math;
pub mod random;
pub mod time;

use crate::interp::value::{Class, Native, Value};

pub enum Member {
    Func(Native),
    Float(f64),
    Int(i64),
    Str(&'static str),
    Class(Class),
}

pub struct ModuleDef {
    pub name: &'static str,
    pub members: &'static [(&'static str, Member)],
}

impl ModuleDef {
    pub fn attribute(&'static self, name: &str) -> Option<Value> {
        let (_, member) = self.members.iter().find(|(member, _)| *member == name)?;
        Some(match member {
            Member::Func(native) => Value::Native(native),
            Member::Float(x) => Value::Float(*x),
            Member::Int(i) => Value::Int(*i),
            Member::Str(s) => Value::str(*s),
            Member::Class(class) => Value::Class(*class),
        })
    }
}

/// Look up a module by import name.
pub fn lookup(name: &str) -> Option<&'static ModuleDef> {
    match name {
        "math" => Some(&math::MODULE),
        "random" => Some(&random::MODULE),
        "datetime" => Some(&datetime::MODULE),
        "time" => Some(&time::MODULE),
        "json" => Some(&json::MODULE),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::SAFE_MODULES;

    #[test]
    fn every_safe_module_is_defined() {
        for name in SAFE_MODULES {
            let module = lookup(name).unwrap_or_else(|| panic!("{name} has no definition"));
            assert_eq!(module.name, *name);
        }
        assert!(lookup("os").is_none());
    }

    #[test]
    fn members_are_public_and_unique() {
        for name in SAFE_MODULES {
            let module = lookup(name).unwrap();
            let mut seen = std::collections::HashSet::new();
            for (member, _) in module.members {
                assert!(!member.starts_with('_'), "{name}.{member} is private");
                assert!(seen.insert(*member), "{name}.{member} is duplicated");
            }
        }
    }
}
