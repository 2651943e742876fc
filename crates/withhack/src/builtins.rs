//! Builtin functions, builtin exception names and the methods of builtin types.

use std::{borrow::Cow, cmp::Ordering};

use indexmap::IndexMap;

use crate::{
    args::CallArgs,
    bytecode::attr,
    exception::{ExcType, RunError, RunResult},
    function::NativeFunction,
    host::Host,
    namespace::Scope,
    value::{Dict, DictKey, Iter, Object, Range, Value},
};

type Builtin = fn(&mut dyn Host, CallArgs) -> RunResult<Value>;

const FUNCTIONS: &[(&str, Builtin)] = &[
    ("print", builtin_print),
    ("range", builtin_range),
    ("len", builtin_len),
    ("filter", builtin_filter),
    ("map", builtin_map),
    ("list", builtin_list),
    ("tuple", builtin_tuple),
    ("dict", builtin_dict),
    ("str", builtin_str),
    ("int", builtin_int),
    ("sum", builtin_sum),
    ("sorted", builtin_sorted),
    ("isinstance", builtin_isinstance),
    ("getattr", builtin_getattr),
    ("setattr", builtin_setattr),
    ("hasattr", builtin_hasattr),
    ("SimpleNamespace", builtin_simple_namespace),
];

/// Creates a fresh builtins scope.
#[must_use]
pub fn scope() -> Scope {
    let scope = Scope::new();
    for &(name, func) in FUNCTIONS {
        scope.set(name, NativeFunction::value(name, func));
    }
    for &exc_type in ExcType::BUILTIN {
        scope.set(<&'static str>::from(exc_type), Value::ExcType(exc_type));
    }
    scope
}

fn builtin_print(host: &mut dyn Host, mut args: CallArgs) -> RunResult<Value> {
    let sep = text_keyword(&mut args, "sep")?.unwrap_or(Cow::Borrowed(" "));
    let end = text_keyword(&mut args, "end")?.unwrap_or(Cow::Borrowed("\n"));
    args.check_positional("print", 0, usize::MAX)?;
    let out = host.print();
    for (i, value) in args.positional.iter().enumerate() {
        if i > 0 {
            out.stdout_write(sep.clone())?;
        }
        out.stdout_write(Cow::Owned(value.to_string()))?;
    }
    for c in end.chars() {
        out.stdout_push(c)?;
    }
    Ok(Value::None)
}

fn text_keyword(args: &mut CallArgs, name: &str) -> RunResult<Option<Cow<'static, str>>> {
    match args.take_keyword(name) {
        None | Some(Value::None) => Ok(None),
        Some(Value::Str(s)) => Ok(Some(Cow::Owned(s.to_string()))),
        Some(other) => Err(ExcType::TypeError.err(format!(
            "{name} must be None or a string, not {}",
            other.type_name()
        ))),
    }
}

fn int_arg(value: &Value, func: &str) -> RunResult<i64> {
    value.as_int().ok_or_else(|| {
        ExcType::TypeError.err(format!(
            "{func}() argument must be an integer, not '{}'",
            value.type_name()
        ))
    })
}

fn builtin_range(_: &mut dyn Host, args: CallArgs) -> RunResult<Value> {
    args.check_positional("range", 1, 3)?;
    let ints = args
        .positional
        .iter()
        .map(|v| int_arg(v, "range"))
        .collect::<RunResult<Vec<_>>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => unreachable!("positional count checked above"),
    };
    if step == 0 {
        return Err(ExcType::ValueError.err("range() arg 3 must not be zero"));
    }
    Ok(Value::Range(Range { start, stop, step }))
}

fn builtin_len(_: &mut dyn Host, args: CallArgs) -> RunResult<Value> {
    args.check_positional("len", 1, 1)?;
    let len = match &args.positional[0] {
        Value::Str(s) => s.chars().count(),
        Value::List(list) => list.read().len(),
        Value::Tuple(items) => items.len(),
        Value::Dict(dict) => dict.read().len(),
        Value::Range(range) => range.len(),
        other => {
            return Err(ExcType::TypeError.err(format!(
                "object of type '{}' has no len()",
                other.type_name()
            )));
        }
    };
    Ok(Value::Int(i64::try_from(len).unwrap_or(i64::MAX)))
}

/// `filter(func, iterable)`; evaluated eagerly into an iterator over the kept items.
fn builtin_filter(host: &mut dyn Host, args: CallArgs) -> RunResult<Value> {
    args.check_positional("filter", 2, 2)?;
    let func = &args.positional[0];
    let mut kept = Vec::new();
    for item in args.positional[1].to_vec()? {
        let keep = match func {
            Value::None => item.is_truthy(),
            func => host.call_value(func, CallArgs::new(vec![item.clone()]))?.is_truthy(),
        };
        if keep {
            kept.push(item);
        }
    }
    Ok(Value::Iter(Iter::from_vec(kept)))
}

/// `map(func, *iterables)`; evaluated eagerly, stopping at the shortest iterable.
fn builtin_map(host: &mut dyn Host, args: CallArgs) -> RunResult<Value> {
    args.check_positional("map", 2, usize::MAX)?;
    let func = &args.positional[0];
    let columns = args.positional[1..]
        .iter()
        .map(Value::to_vec)
        .collect::<RunResult<Vec<_>>>()?;
    let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
    let mut mapped = Vec::with_capacity(rows);
    for row in 0..rows {
        let call_args = columns.iter().map(|column| column[row].clone()).collect();
        mapped.push(host.call_value(func, CallArgs::new(call_args))?);
    }
    Ok(Value::Iter(Iter::from_vec(mapped)))
}

fn builtin_list(_: &mut dyn Host, args: CallArgs) -> RunResult<Value> {
    args.check_positional("list", 0, 1)?;
    match args.get(0) {
        Some(iterable) => Ok(Value::list(iterable.to_vec()?)),
        None => Ok(Value::list(Vec::new())),
    }
}

fn builtin_tuple(_: &mut dyn Host, args: CallArgs) -> RunResult<Value> {
    args.check_positional("tuple", 0, 1)?;
    match args.get(0) {
        Some(iterable) => Ok(Value::tuple(iterable.to_vec()?)),
        None => Ok(Value::tuple(Vec::new())),
    }
}

/// `dict(mapping_or_pairs=(), **kwargs)`.
fn builtin_dict(_: &mut dyn Host, args: CallArgs) -> RunResult<Value> {
    let CallArgs { positional, keywords } = args;
    if positional.len() > 1 {
        return Err(ExcType::TypeError.err(format!(
            "dict expected at most 1 argument, got {}",
            positional.len()
        )));
    }
    let mut items = IndexMap::new();
    match positional.first() {
        None => {}
        Some(Value::Dict(source)) => items.extend(source.read().iter().map(|(k, v)| (k.clone(), v.clone()))),
        Some(pairs) => {
            for pair in pairs.to_vec()? {
                let [key, value]: [Value; 2] = pair.to_vec()?.try_into().map_err(|_| {
                    ExcType::ValueError.err("dictionary update sequence element has wrong length; 2 is required")
                })?;
                items.insert(DictKey::try_from(&key)?, value);
            }
        }
    }
    for (name, value) in keywords {
        items.insert(DictKey::Str(name.into()), value);
    }
    Ok(Value::Dict(Dict::new(items)))
}

fn builtin_str(_: &mut dyn Host, args: CallArgs) -> RunResult<Value> {
    args.check_positional("str", 0, 1)?;
    Ok(Value::str(args.get(0).map(Value::to_string).unwrap_or_default()))
}

fn builtin_int(_: &mut dyn Host, args: CallArgs) -> RunResult<Value> {
    args.check_positional("int", 0, 1)?;
    let Some(value) = args.get(0) else {
        return Ok(Value::Int(0));
    };
    match value {
        Value::Str(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| ExcType::ValueError.err(format!("invalid literal for int() with base 10: {}", value.repr()))),
        #[expect(clippy::cast_possible_truncation, reason = "int() truncates toward zero")]
        Value::Float(f) if f.is_finite() => Ok(Value::Int(f.trunc() as i64)),
        Value::Float(_) => Err(ExcType::ValueError.err("cannot convert float infinity or NaN to integer")),
        other => other.as_int().map(Value::Int).ok_or_else(|| {
            ExcType::TypeError.err(format!(
                "int() argument must be a string or a number, not '{}'",
                other.type_name()
            ))
        }),
    }
}

fn builtin_sum(_: &mut dyn Host, args: CallArgs) -> RunResult<Value> {
    args.check_positional("sum", 1, 2)?;
    let mut total = args.get(1).cloned().unwrap_or(Value::Int(0));
    for item in args.positional[0].to_vec()? {
        total = total.binary(crate::value::BinaryOp::Add, &item)?;
    }
    Ok(total)
}

/// `sorted(iterable, reverse=False)`; stable.
fn builtin_sorted(_: &mut dyn Host, mut args: CallArgs) -> RunResult<Value> {
    let reverse = args.take_keyword("reverse").is_some_and(|v| v.is_truthy());
    args.check_positional("sorted", 1, 1)?;
    let mut items = args.positional[0].to_vec()?;
    let mut failure: Option<RunError> = None;
    items.sort_by(|a, b| match a.py_cmp(b) {
        Ok(ord) => ord,
        Err(err) => {
            failure.get_or_insert(err);
            Ordering::Equal
        }
    });
    if let Some(err) = failure {
        return Err(err);
    }
    if reverse {
        items.reverse();
    }
    Ok(Value::list(items))
}

fn builtin_isinstance(_: &mut dyn Host, args: CallArgs) -> RunResult<Value> {
    args.check_positional("isinstance", 2, 2)?;
    is_instance(&args.positional[0], &args.positional[1]).map(Value::Bool)
}

fn is_instance(value: &Value, class: &Value) -> RunResult<bool> {
    match class {
        Value::ExcType(exc_type) => {
            Ok(matches!(value, Value::Exception(exc) if exc.exc_type().is_subclass_of(*exc_type)))
        }
        // builtin constructors double as the type objects of their values
        Value::Native(native) => Ok(match native.name() {
            "int" => matches!(value, Value::Int(_) | Value::Bool(_)),
            "SimpleNamespace" => matches!(value, Value::Object(_)),
            name => value.type_name() == name,
        }),
        Value::Tuple(classes) => {
            for class in classes.iter() {
                if is_instance(value, class)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        _ => Err(ExcType::TypeError.err("isinstance() arg 2 must be a type or tuple of types")),
    }
}

fn attr_name<'a>(value: &'a Value, func: &str) -> RunResult<&'a str> {
    value
        .as_str()
        .ok_or_else(|| ExcType::TypeError.err(format!("{func}(): attribute name must be string")))
}

fn builtin_getattr(_: &mut dyn Host, args: CallArgs) -> RunResult<Value> {
    args.check_positional("getattr", 2, 3)?;
    let name = attr_name(&args.positional[1], "getattr")?;
    match (attr::load_attr(&args.positional[0], name), args.get(2)) {
        (Err(err), Some(default)) if err.is(ExcType::AttributeError) => Ok(default.clone()),
        (result, _) => result,
    }
}

fn builtin_setattr(_: &mut dyn Host, args: CallArgs) -> RunResult<Value> {
    args.check_positional("setattr", 3, 3)?;
    let name = attr_name(&args.positional[1], "setattr")?;
    attr::store_attr(&args.positional[0], name, args.positional[2].clone())?;
    Ok(Value::None)
}

fn builtin_hasattr(_: &mut dyn Host, args: CallArgs) -> RunResult<Value> {
    args.check_positional("hasattr", 2, 2)?;
    let name = attr_name(&args.positional[1], "hasattr")?;
    match attr::load_attr(&args.positional[0], name) {
        Ok(_) => Ok(Value::Bool(true)),
        Err(err) if err.is(ExcType::AttributeError) => Ok(Value::Bool(false)),
        Err(err) => Err(err),
    }
}

fn builtin_simple_namespace(_: &mut dyn Host, args: CallArgs) -> RunResult<Value> {
    if !args.positional.is_empty() {
        return Err(ExcType::TypeError.err("SimpleNamespace() takes no positional arguments"));
    }
    let obj = Object::new();
    for (name, value) in args.keywords {
        obj.set(name, value);
    }
    Ok(Value::Object(obj))
}

// ============================================================================
// Methods
// ============================================================================

fn bound<F>(name: &'static str, func: F) -> Option<Value>
where
    F: Fn(&mut dyn Host, CallArgs) -> RunResult<Value> + Send + Sync + 'static,
{
    Some(NativeFunction::value(name, func))
}

/// Looks up a method of a builtin type, bound to `receiver`.
pub(crate) fn method(receiver: &Value, name: &str) -> Option<Value> {
    match (receiver, name) {
        (Value::List(list), "append") => {
            let list = list.clone();
            bound("append", move |_, args| {
                args.check_positional("append", 1, 1)?;
                list.write().push(args.positional[0].clone());
                Ok(Value::None)
            })
        }
        (Value::List(list), "extend") => {
            let list = list.clone();
            bound("extend", move |_, args| {
                args.check_positional("extend", 1, 1)?;
                let items = args.positional[0].to_vec()?;
                list.write().extend(items);
                Ok(Value::None)
            })
        }
        (Value::List(list), "pop") => {
            let list = list.clone();
            bound("pop", move |_, args| {
                args.check_positional("pop", 0, 1)?;
                let mut items = list.write();
                if items.is_empty() {
                    return Err(ExcType::IndexError.err("pop from empty list"));
                }
                let len = i64::try_from(items.len()).unwrap_or(i64::MAX);
                let index = match args.get(0) {
                    Some(index) => int_arg(index, "pop")?,
                    None => len - 1,
                };
                let index = if index < 0 { index + len } else { index };
                let index = usize::try_from(index)
                    .ok()
                    .filter(|&i| i < items.len())
                    .ok_or_else(|| ExcType::IndexError.err("pop index out of range"))?;
                Ok(items.remove(index))
            })
        }
        (Value::Dict(dict), "get") => {
            let dict = dict.clone();
            bound("get", move |_, args| {
                args.check_positional("get", 1, 2)?;
                let key = DictKey::try_from(&args.positional[0])?;
                let found = dict.read().get(&key).cloned();
                Ok(found.or_else(|| args.get(1).cloned()).unwrap_or(Value::None))
            })
        }
        (Value::Dict(dict), "keys") => {
            let dict = dict.clone();
            bound("keys", move |_, args| {
                args.check_positional("keys", 0, 0)?;
                Ok(Value::list(dict.read().keys().map(DictKey::to_value).collect()))
            })
        }
        (Value::Dict(dict), "values") => {
            let dict = dict.clone();
            bound("values", move |_, args| {
                args.check_positional("values", 0, 0)?;
                Ok(Value::list(dict.read().values().cloned().collect()))
            })
        }
        (Value::Dict(dict), "items") => {
            let dict = dict.clone();
            bound("items", move |_, args| {
                args.check_positional("items", 0, 0)?;
                let items = dict
                    .read()
                    .iter()
                    .map(|(k, v)| Value::tuple(vec![k.to_value(), v.clone()]))
                    .collect();
                Ok(Value::list(items))
            })
        }
        (Value::Dict(dict), "update") => {
            let dict = dict.clone();
            bound("update", move |host, args| {
                let merged = builtin_dict(host, args)?;
                if let Value::Dict(merged) = merged {
                    let entries: Vec<_> = merged.read().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                    dict.write().extend(entries);
                }
                Ok(Value::None)
            })
        }
        (Value::Str(s), "upper") => {
            let s = s.clone();
            bound("upper", move |_, args| {
                args.check_positional("upper", 0, 0)?;
                Ok(Value::str(s.to_uppercase()))
            })
        }
        (Value::Str(s), "lower") => {
            let s = s.clone();
            bound("lower", move |_, args| {
                args.check_positional("lower", 0, 0)?;
                Ok(Value::str(s.to_lowercase()))
            })
        }
        (Value::Str(sep), "join") => {
            let sep = sep.clone();
            bound("join", move |_, args| {
                args.check_positional("join", 1, 1)?;
                let parts = args.positional[0]
                    .to_vec()?
                    .into_iter()
                    .map(|part| match part {
                        Value::Str(s) => Ok(s),
                        other => Err(ExcType::TypeError.err(format!(
                            "sequence item: expected str instance, {} found",
                            other.type_name()
                        ))),
                    })
                    .collect::<RunResult<Vec<_>>>()?;
                Ok(Value::str(parts.join(&*sep)))
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_registers_functions_and_exception_types() {
        let scope = scope();
        assert!(matches!(scope.get("print"), Some(Value::Native(_))));
        assert!(matches!(scope.get("KeyError"), Some(Value::ExcType(ExcType::KeyError))));
        assert!(scope.get("BlockSkip").is_none());
    }

    #[test]
    fn methods_bind_their_receiver() {
        let list = Value::list(Vec::new());
        assert!(method(&list, "append").is_some());
        assert!(method(&list, "nope").is_none());
        assert!(method(&Value::Int(1), "append").is_none());
    }
}
