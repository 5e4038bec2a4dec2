//! Lexical scope chain.
//!
//! A child scope is created per block, loop iteration and call; it holds a
//! strong reference to its parent only, so the chain is always a tree rooted
//! at the global scope of one execution.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use crate::domain::value::Value;

pub type ScopeRef = Rc<RefCell<Scope>>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssignError {
    #[error("Undefined variable: {0}")]
    Undefined(String),

    #[error("Cannot assign to constant '{0}'")]
    Constant(String),
}

#[derive(Debug, Clone)]
struct Binding {
    value: Value,
    constant: bool,
}

#[derive(Debug, Default)]
pub struct Scope {
    bindings: HashMap<String, Binding>,
    parent: Option<ScopeRef>,
}

impl Scope {
    /// A fresh root scope.
    pub fn root() -> ScopeRef {
        Rc::new(RefCell::new(Scope::default()))
    }

    pub fn child(parent: &ScopeRef) -> ScopeRef {
        Rc::new(RefCell::new(Scope {
            bindings: HashMap::new(),
            parent: Some(Rc::clone(parent)),
        }))
    }

    /// Bind `name` in this scope, shadowing any outer binding.
    pub fn define(&mut self, name: &str, value: Value, constant: bool) {
        self.bindings
            .insert(name.to_string(), Binding { value, constant });
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        match self.bindings.get(name) {
            Some(binding) => Some(binding.value.clone()),
            None => self.parent.as_ref()?.borrow().lookup(name),
        }
    }

    /// Update the nearest binding of `name`.
    pub fn assign(&mut self, name: &str, value: Value) -> Result<(), AssignError> {
        if let Some(binding) = self.bindings.get_mut(name) {
            if binding.constant {
                return Err(AssignError::Constant(name.to_string()));
            }
            binding.value = value;
            return Ok(());
        }
        match &self.parent {
            Some(parent) => parent.borrow_mut().assign(name, value),
            None => Err(AssignError::Undefined(name.to_string())),
        }
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
            || self
                .parent
                .as_ref()
                .is_some_and(|p| p.borrow().is_defined(name))
    }

    /// True if `name` is a constant declared directly in this scope.
    pub fn is_local_constant(&self, name: &str) -> bool {
        self.bindings.get(name).is_some_and(|b| b.constant)
    }

    /// The bindings of this scope alone, sorted by name.
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.bindings
            .iter()
            .map(|(name, binding)| (name.clone(), binding.value.clone()))
            .collect()
    }
}
