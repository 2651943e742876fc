//! Attribute and subscript access.

use crate::{
    builtins,
    exception::{ExcType, RunResult},
    value::{DictKey, Value},
};

pub(crate) fn load_attr(obj: &Value, name: &str) -> RunResult<Value> {
    let found = match obj {
        Value::Object(attrs) => attrs.get(name),
        Value::Hack(hack) => {
            let hack = hack
                .try_lock()
                .ok_or_else(|| ExcType::RuntimeError.err("with-hack is busy"))?;
            hack.attribute(name)
        }
        Value::Exception(exc) if name == "args" => Some(Value::tuple(
            exc.message().map(Value::from).into_iter().collect(),
        )),
        Value::Function(function) if name == "__name__" => Some(Value::str(function.name.as_str())),
        Value::Native(native) if name == "__name__" => Some(Value::str(native.name())),
        other => builtins::method(other, name),
    };
    found.ok_or_else(|| no_attribute(obj, name))
}

pub(crate) fn store_attr(obj: &Value, name: &str, value: Value) -> RunResult<()> {
    match obj {
        Value::Object(attrs) => {
            attrs.set(name, value);
            Ok(())
        }
        other => Err(ExcType::AttributeError.err(format!(
            "'{}' object attribute '{name}' is read-only",
            other.type_name()
        ))),
    }
}

pub(crate) fn delete_attr(obj: &Value, name: &str) -> RunResult<()> {
    match obj {
        Value::Object(attrs) => attrs.remove(name).map(drop).ok_or_else(|| no_attribute(obj, name)),
        other => Err(no_attribute(other, name)),
    }
}

fn no_attribute(obj: &Value, name: &str) -> crate::exception::RunError {
    ExcType::AttributeError.err(format!("'{}' object has no attribute '{name}'", obj.type_name()))
}

/// Resolves a possibly negative index against a sequence of `len` items.
fn normalize_index(obj: &Value, key: &Value, len: usize) -> RunResult<usize> {
    let Some(index) = key.as_int() else {
        return Err(ExcType::TypeError.err(format!(
            "{} indices must be integers, not {}",
            obj.type_name(),
            key.type_name()
        )));
    };
    let len_i = i64::try_from(len).unwrap_or(i64::MAX);
    let resolved = if index < 0 { index + len_i } else { index };
    usize::try_from(resolved)
        .ok()
        .filter(|&i| i < len)
        .ok_or_else(|| ExcType::IndexError.err(format!("{} index out of range", obj.type_name())))
}

fn key_error(key: &Value) -> crate::exception::RunError {
    ExcType::KeyError.err(key.repr())
}

pub(crate) fn load_subscr(obj: &Value, key: &Value) -> RunResult<Value> {
    match obj {
        Value::List(list) => {
            let items = list.read();
            let idx = normalize_index(obj, key, items.len())?;
            Ok(items[idx].clone())
        }
        Value::Tuple(items) => {
            let idx = normalize_index(obj, key, items.len())?;
            Ok(items[idx].clone())
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let idx = normalize_index(obj, key, chars.len())?;
            Ok(Value::str(chars[idx].to_string()))
        }
        Value::Range(range) => {
            let idx = normalize_index(obj, key, range.len())?;
            let offset = i64::try_from(idx).unwrap_or(i64::MAX);
            Ok(Value::Int(range.start + offset * range.step))
        }
        Value::Dict(dict) => dict
            .read()
            .get(&DictKey::try_from(key)?)
            .cloned()
            .ok_or_else(|| key_error(key)),
        other => Err(ExcType::TypeError.err(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

pub(crate) fn store_subscr(obj: &Value, key: &Value, value: Value) -> RunResult<()> {
    match obj {
        Value::List(list) => {
            let mut items = list.write();
            let idx = normalize_index(obj, key, items.len())?;
            items[idx] = value;
            Ok(())
        }
        Value::Dict(dict) => {
            dict.write().insert(DictKey::try_from(key)?, value);
            Ok(())
        }
        other => Err(ExcType::TypeError.err(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

pub(crate) fn delete_subscr(obj: &Value, key: &Value) -> RunResult<()> {
    match obj {
        Value::List(list) => {
            let mut items = list.write();
            let idx = normalize_index(obj, key, items.len())?;
            items.remove(idx);
            Ok(())
        }
        Value::Dict(dict) => dict
            .write()
            .shift_remove(&DictKey::try_from(key)?)
            .map(drop)
            .ok_or_else(|| key_error(key)),
        other => Err(ExcType::TypeError.err(format!(
            "'{}' object does not support item deletion",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Object;

    #[test]
    fn negative_indices_count_from_the_end() {
        let list = Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert!(load_subscr(&list, &Value::Int(-1)).unwrap().py_eq(&Value::Int(3)));
        assert!(load_subscr(&list, &Value::Int(3)).unwrap_err().is(ExcType::IndexError));
    }

    #[test]
    fn missing_lookups_raise_the_guarded_exception_types() {
        let dict = Value::Dict(crate::value::Dict::default());
        assert!(load_subscr(&dict, &Value::str("x")).unwrap_err().is(ExcType::KeyError));
        let obj = Value::Object(Object::new());
        assert!(load_attr(&obj, "x").unwrap_err().is(ExcType::AttributeError));
        store_attr(&obj, "x", Value::Int(1)).unwrap();
        assert!(load_attr(&obj, "x").unwrap().py_eq(&Value::Int(1)));
    }
}
