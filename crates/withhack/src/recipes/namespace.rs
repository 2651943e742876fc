use std::sync::Arc;

use crate::{
    args::CallArgs,
    bytecode::{CodeFlags, Instr, Opcode},
    exception::{Exception, RunResult},
    function::Function,
    hack::{
        AccessStyle, BlockCx, CaptureBytecode, HackError, TARGET_SLOT, WithHack, hack_value, listing_value,
        rewrite_for_target,
    },
    host::Host,
    value::{Dict, Object, Value},
};

use super::{bind_params, propagates};

/// Runs the guarded block with its variables redirected into a target object.
///
/// ```python
/// with namespace() as ns:
///     x = 1
///     y = x + 4
/// assert ns.x == 1 and ns.y == 5
/// ```
///
/// Assignments and deletions land on the target; reads try the target first
/// and fall back to the enclosing scopes. `namespace` uses attributes and
/// defaults to a fresh `SimpleNamespace`, `keyspace` uses items and defaults
/// to a fresh dict. The target is bound through the as-clause.
#[derive(Debug)]
pub struct Redirect {
    capture: CaptureBytecode,
    style: AccessStyle,
    target: Value,
}

impl Redirect {
    #[must_use]
    pub fn new(capture: CaptureBytecode, style: AccessStyle, target: Value) -> Self {
        Self { capture, style, target }
    }

    #[must_use]
    pub fn target(&self) -> &Value {
        &self.target
    }

    fn build(&self, cx: &mut BlockCx<'_>) -> Result<Value, HackError> {
        let context = self.capture.base().require_context()?;
        let body = self
            .capture
            .bytecode()
            .ok_or_else(|| HackError::MalformedBlock("no block was captured".to_owned()))?;
        let globals = cx
            .host
            .frame(context)
            .ok_or(HackError::FrameGone(context))?
            .globals()
            .clone();

        let mut code = body.clone();
        code.push(Instr::constant(Value::None));
        code.push(Instr::new(Opcode::ReturnValue));
        rewrite_for_target(&mut code, self.style, context);
        code.name = "<withhack>".to_owned();
        code.argnames = vec![TARGET_SLOT.to_owned()];
        code.argcount = 1;
        code.flags = CodeFlags::NEWLOCALS;
        let code = code.materialize(&[])?;
        log::debug!("redirected block of {context} through {} access", self.style);
        Ok(Value::Function(Arc::new(Function::new("<withhack>", Arc::new(code), globals))))
    }
}

impl WithHack for Redirect {
    fn kind(&self) -> &'static str {
        match self.style {
            AccessStyle::Attribute => "namespace",
            AccessStyle::Key => "keyspace",
        }
    }

    fn enter(&mut self, cx: &mut BlockCx<'_>) -> RunResult<Value> {
        self.capture.begin(cx)?;
        Ok(cx.this_value())
    }

    fn exit(&mut self, cx: &mut BlockCx<'_>, exc: Option<&Exception>) -> RunResult<bool> {
        let swallowed = self.capture.finish(cx, exc)?;
        if propagates(exc, swallowed) {
            return Ok(false);
        }
        let function = self.build(cx)?;
        cx.host.call_value(&function, CallArgs::new(vec![self.target.clone()]))?;
        self.capture.run_as_clause(cx, self.target.clone())?;
        Ok(swallowed)
    }

    fn attribute(&self, name: &str) -> Option<Value> {
        match name {
            "namespace" => Some(self.target.clone()),
            "bytecode" => self.capture.bytecode().map(listing_value),
            _ => None,
        }
    }
}

fn construct(host: &mut dyn Host, func: &str, style: AccessStyle, args: CallArgs) -> RunResult<Value> {
    let [target] = bind_params(func, ["target"], args)?;
    let target = match target {
        Some(Value::None) | None => match style {
            AccessStyle::Attribute => Value::Object(Object::new()),
            AccessStyle::Key => Value::Dict(Dict::default()),
        },
        Some(target) => target,
    };
    Ok(hack_value(Redirect::new(CaptureBytecode::for_current_frame(host), style, target)))
}

/// `namespace(target=None)`
pub(super) fn construct_namespace(host: &mut dyn Host, args: CallArgs) -> RunResult<Value> {
    construct(host, "namespace", AccessStyle::Attribute, args)
}

/// `keyspace(target=None)`
pub(super) fn construct_keyspace(host: &mut dyn Host, args: CallArgs) -> RunResult<Value> {
    construct(host, "keyspace", AccessStyle::Key, args)
}
