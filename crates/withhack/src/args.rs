use indexmap::IndexMap;

use crate::{
    exception::{ExcType, RunResult},
    value::Value,
};

/// Arguments of a call: positional values followed by keyword values.
///
/// Keyword order is the order the caller wrote them in.
#[derive(Debug, Clone, Default)]
pub struct CallArgs {
    pub positional: Vec<Value>,
    pub keywords: IndexMap<String, Value>,
}

impl CallArgs {
    #[must_use]
    pub fn new(positional: Vec<Value>) -> Self {
        Self {
            positional,
            keywords: IndexMap::new(),
        }
    }

    #[must_use]
    pub fn with_keywords(positional: Vec<Value>, keywords: IndexMap<String, Value>) -> Self {
        Self { positional, keywords }
    }

    /// Checks the positional count is within `min..=max` and that no keywords were given.
    pub fn check_positional(&self, name: &str, min: usize, max: usize) -> RunResult<()> {
        if let Some(kw) = self.keywords.keys().next() {
            return Err(ExcType::TypeError.err(format!(
                "{name}() got an unexpected keyword argument '{kw}'"
            )));
        }
        let given = self.positional.len();
        if given < min || given > max {
            let expected = if min == max {
                format!("{min}")
            } else if max == usize::MAX {
                format!("at least {min}")
            } else {
                format!("from {min} to {max}")
            };
            return Err(ExcType::TypeError.err(format!(
                "{name}() takes {expected} positional argument(s) but {given} were given"
            )));
        }
        Ok(())
    }

    /// Returns positional argument `index`, or `None` if absent.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.positional.get(index)
    }

    /// Removes and returns a keyword argument.
    pub fn take_keyword(&mut self, name: &str) -> Option<Value> {
        self.keywords.shift_remove(name)
    }
}
