use crate::{
    bytecode::{Frame, FrameId},
    host::Host,
    value::Value,
};

use super::HackError;

/// Looks `name` up the way an unqualified read in `context` would.
///
/// Local bindings win over module globals, which win over builtins.
pub fn resolve(host: &dyn Host, context: FrameId, name: &str) -> Result<Value, HackError> {
    let frame = host.frame(context).ok_or(HackError::FrameGone(context))?;
    resolve_in(frame, name)
}

/// [`resolve`] against a frame already in hand.
pub fn resolve_in(frame: &Frame, name: &str) -> Result<Value, HackError> {
    frame
        .lookup_local(name)
        .or_else(|| frame.globals().get(name))
        .or_else(|| frame.builtins().get(name))
        .ok_or_else(|| HackError::NameNotFound(name.to_owned()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{bytecode::compile, namespace::Scope};

    #[test]
    fn locals_shadow_globals_shadow_builtins() {
        let code = Arc::new(compile("pass\n", "<test>").unwrap());
        let globals = Scope::new();
        let builtins = Scope::new();
        let locals = Scope::new();
        builtins.set("a", Value::Int(1));
        builtins.set("b", Value::Int(1));
        builtins.set("c", Value::Int(1));
        globals.set("b", Value::Int(2));
        globals.set("c", Value::Int(2));
        locals.set("c", Value::Int(3));
        let frame = Frame::new(code, globals, builtins, Some(locals));

        assert!(resolve_in(&frame, "a").unwrap().py_eq(&Value::Int(1)));
        assert!(resolve_in(&frame, "b").unwrap().py_eq(&Value::Int(2)));
        assert!(resolve_in(&frame, "c").unwrap().py_eq(&Value::Int(3)));
        assert_eq!(
            resolve_in(&frame, "missing").unwrap_err(),
            HackError::NameNotFound("missing".to_owned())
        );
    }
}
