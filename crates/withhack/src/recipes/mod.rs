//! Ready-made with-hacks built on the public core operations.
//!
//! Every constructor binds its hack to the frame that calls it.

mod call;
mod function;
mod locals;
mod namespace;

pub use call::{ForwardStyle, ForwardingCall};
pub use function::CaptureFunction;
pub use locals::{CaptureLocals, CaptureModifiedLocals};
pub use namespace::Redirect;

use crate::{
    args::CallArgs,
    exception::{ExcType, Exception, RunResult},
    function::NativeFunction,
    hack::{CaptureBytecode, hack_value},
    host::Host,
    namespace::Scope,
    value::Value,
};

type Constructor = fn(&mut dyn Host, CallArgs) -> RunResult<Value>;

const CONSTRUCTORS: &[(&str, Constructor)] = &[
    ("CaptureBytecode", capture_bytecode),
    ("CaptureFunction", function::construct),
    ("CaptureLocals", locals::construct_unordered),
    ("CaptureOrderedLocals", locals::construct_ordered),
    ("CaptureModifiedLocals", locals::construct_modified),
    ("xargs", call::construct_xargs),
    ("xkwargs", call::construct_xkwargs),
    ("namespace", namespace::construct_namespace),
    ("keyspace", namespace::construct_keyspace),
];

/// Registers the recipe constructors in `scope`.
pub fn install(scope: &Scope) {
    for &(name, constructor) in CONSTRUCTORS {
        scope.set(name, NativeFunction::value(name, constructor));
    }
}

/// Names of the recipe constructors.
pub fn names() -> impl Iterator<Item = &'static str> {
    CONSTRUCTORS.iter().map(|&(name, _)| name)
}

fn capture_bytecode(host: &mut dyn Host, args: CallArgs) -> RunResult<Value> {
    args.check_positional("CaptureBytecode", 0, 0)?;
    Ok(hack_value(CaptureBytecode::for_current_frame(host)))
}

/// Whether a hack exit lets `exc` propagate, skipping any post-block work.
fn propagates(exc: Option<&Exception>, swallowed: bool) -> bool {
    exc.is_some() && !swallowed
}

/// Binds positional then keyword arguments to the parameter `names`.
fn bind_params<const N: usize>(func: &str, names: [&str; N], args: CallArgs) -> RunResult<[Option<Value>; N]> {
    let CallArgs { positional, keywords } = args;
    if positional.len() > N {
        return Err(ExcType::TypeError.err(format!(
            "{func}() takes at most {N} positional argument(s) but {} were given",
            positional.len()
        )));
    }
    let mut bound: [Option<Value>; N] = std::array::from_fn(|_| None);
    for (slot, value) in bound.iter_mut().zip(positional) {
        *slot = Some(value);
    }
    for (keyword, value) in keywords {
        match names.iter().position(|name| *name == keyword) {
            Some(idx) if bound[idx].is_some() => {
                return Err(ExcType::TypeError.err(format!(
                    "{func}() got multiple values for argument '{keyword}'"
                )));
            }
            Some(idx) => bound[idx] = Some(value),
            None => {
                return Err(ExcType::TypeError.err(format!(
                    "{func}() got an unexpected keyword argument '{keyword}'"
                )));
            }
        }
    }
    Ok(bound)
}

/// The items of a tuple or list argument.
fn sequence_arg(func: &str, param: &str, value: &Value) -> RunResult<Vec<Value>> {
    match value {
        Value::Tuple(items) => Ok(items.to_vec()),
        Value::List(list) => Ok(list.read().clone()),
        other => Err(ExcType::TypeError.err(format!(
            "{func}() argument '{param}' must be a tuple or list, not {}",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_registers_every_recipe() {
        let scope = Scope::new();
        install(&scope);
        let names: Vec<&str> = names().collect();
        assert_eq!(scope.len(), names.len());
        for name in names {
            assert!(
                matches!(scope.get(name), Some(Value::Native(_))),
                "{name} is not installed"
            );
        }
        assert!(scope.contains("keyspace"));
    }
}
