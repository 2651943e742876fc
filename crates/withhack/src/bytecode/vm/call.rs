//! Argument binding for script function calls.

use indexmap::IndexMap;

use crate::{
    args::CallArgs,
    bytecode::CodeFlags,
    exception::{ExcType, RunResult},
    function::Function,
    value::{DictKey, Value},
};

/// Binds call arguments to the parameter slots of `function`.
///
/// Returns one entry per local slot; slots past the parameters stay unbound.
pub(super) fn bind_arguments(function: &Function, args: CallArgs) -> RunResult<Vec<Option<Value>>> {
    let code = &function.code;
    let name = function.name.as_str();
    let argcount = code.argcount();
    let flags = code.flags();
    let mut slots: Vec<Option<Value>> = vec![None; code.varnames().len().max(code.total_params())];

    let CallArgs { positional, keywords } = args;
    let given = positional.len();
    let mut positional = positional.into_iter();
    for slot in slots.iter_mut().take(argcount) {
        match positional.next() {
            Some(value) => *slot = Some(value),
            None => break,
        }
    }
    let extra: Vec<Value> = positional.collect();
    if flags.contains(CodeFlags::VARARGS) {
        slots[argcount] = Some(Value::tuple(extra));
    } else if !extra.is_empty() {
        return Err(ExcType::TypeError.err(format!(
            "{name}() takes {argcount} positional argument(s) but {given} were given"
        )));
    }

    let mut extra_keywords = IndexMap::new();
    for (keyword, value) in keywords {
        match code.varnames()[..argcount].iter().position(|p| *p == keyword) {
            Some(idx) if slots[idx].is_some() => {
                return Err(ExcType::TypeError.err(format!(
                    "{name}() got multiple values for argument '{keyword}'"
                )));
            }
            Some(idx) => slots[idx] = Some(value),
            None if flags.contains(CodeFlags::VARKEYWORDS) => {
                extra_keywords.insert(DictKey::Str(keyword.into()), value);
            }
            None => {
                return Err(ExcType::TypeError.err(format!(
                    "{name}() got an unexpected keyword argument '{keyword}'"
                )));
            }
        }
    }
    if flags.contains(CodeFlags::VARKEYWORDS) {
        let idx = argcount + usize::from(flags.contains(CodeFlags::VARARGS));
        slots[idx] = Some(Value::Dict(crate::value::Dict::new(extra_keywords)));
    }

    let first_default = argcount.saturating_sub(function.defaults.len());
    for (idx, slot) in slots.iter_mut().enumerate().take(argcount) {
        if slot.is_some() {
            continue;
        }
        match idx.checked_sub(first_default).and_then(|d| function.defaults.get(d)) {
            Some(default) => *slot = Some(default.clone()),
            None => {
                return Err(ExcType::TypeError.err(format!(
                    "{name}() missing required positional argument: '{}'",
                    code.varnames()[idx]
                )));
            }
        }
    }
    slots.truncate(code.varnames().len());
    Ok(slots)
}
