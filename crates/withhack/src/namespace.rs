use std::{fmt, sync::Arc};

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::value::Value;

/// A shared, ordered mapping from names to values.
///
/// Scopes back module globals, builtins and the name-indexed locals of a frame.
/// Cloning a `Scope` clones the handle, not the bindings: every clone observes
/// the same live storage. Insertion order is preserved so that iteration
/// reflects the order in which names were first bound.
#[derive(Clone, Default)]
pub struct Scope(Arc<RwLock<IndexMap<String, Value>>>);

impl Scope {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value bound to `name`, if any.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        self.0.read().get(name).cloned()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.read().contains_key(name)
    }

    /// Binds `name`, keeping its original position if it was already bound.
    pub fn set(&self, name: impl Into<String>, value: Value) {
        self.0.write().insert(name.into(), value);
    }

    /// Removes a binding, returning the previous value.
    pub fn remove(&self, name: &str) -> Option<Value> {
        self.0.write().shift_remove(name)
    }

    /// Returns a copy of every binding in insertion order.
    #[must_use]
    pub fn snapshot(&self) -> IndexMap<String, Value> {
        self.0.read().clone()
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.0.read().keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }

    /// Merges `bindings` into this scope.
    pub fn extend(&self, bindings: impl IntoIterator<Item = (String, Value)>) {
        self.0.write().extend(bindings);
    }

    /// Checks whether both handles refer to the same storage.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl FromIterator<(String, Value)> for Scope {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(Arc::new(RwLock::new(iter.into_iter().collect())))
    }
}

/// Scopes are routinely self-referential (a module's functions hold the module
/// globals), so Debug prints the bound names only.
impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_read() {
            Some(map) => f.debug_set().entries(map.keys()).finish(),
            None => f.write_str("Scope(<locked>)"),
        }
    }
}
