use std::sync::Arc;

use ahash::AHashSet;

use crate::{
    args::CallArgs,
    bytecode::{CodeFlags, Instr, Opcode},
    exception::{ExcType, Exception, RunResult},
    function::Function,
    hack::{BlockCx, CaptureBytecode, HackError, WithHack, hack_value, listing_value, rewrite_for_function},
    host::Host,
    value::Value,
};

use super::{bind_params, propagates, sequence_arg};

/// Default display name of captured functions.
pub const DEFAULT_NAME: &str = "<withhack>";

/// Turns the guarded block into a function instead of running it.
///
/// ```python
/// with CaptureFunction(("message", "times")) as f:
///     for i in range(times):
///         print(message)
/// f.function("hello", 2)
/// ```
///
/// With `varargs` the last parameter (or the one before it, with
/// `varkwargs` too) collects extra positional arguments; with `varkwargs`
/// the last one collects extra keyword arguments.
#[derive(Debug)]
pub struct CaptureFunction {
    capture: CaptureBytecode,
    params: Vec<String>,
    varargs: bool,
    varkwargs: bool,
    name: String,
    defaults: Vec<Value>,
    function: Option<Value>,
}

impl CaptureFunction {
    #[must_use]
    pub fn new(capture: CaptureBytecode, params: Vec<String>) -> Self {
        Self {
            capture,
            params,
            varargs: false,
            varkwargs: false,
            name: DEFAULT_NAME.to_owned(),
            defaults: Vec::new(),
            function: None,
        }
    }

    #[must_use]
    pub fn varargs(mut self, yes: bool) -> Self {
        self.varargs = yes;
        self
    }

    #[must_use]
    pub fn varkwargs(mut self, yes: bool) -> Self {
        self.varkwargs = yes;
        self
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Default values for the trailing positional parameters.
    #[must_use]
    pub fn defaults(mut self, defaults: Vec<Value>) -> Self {
        self.defaults = defaults;
        self
    }

    /// The captured function, once the block has exited.
    #[must_use]
    pub fn function(&self) -> Option<&Value> {
        self.function.as_ref()
    }

    fn argcount(&self) -> Option<usize> {
        self.params
            .len()
            .checked_sub(usize::from(self.varargs) + usize::from(self.varkwargs))
    }

    fn check_signature(&self) -> RunResult<()> {
        let Some(argcount) = self.argcount() else {
            return Err(ExcType::ValueError.err("CaptureFunction() needs a parameter name for each of *args and **kwargs"));
        };
        if self.defaults.len() > argcount {
            return Err(ExcType::ValueError.err(format!(
                "CaptureFunction() got {} default(s) for {argcount} positional parameter(s)",
                self.defaults.len()
            )));
        }
        Ok(())
    }

    fn build(&self, cx: &mut BlockCx<'_>) -> Result<Value, HackError> {
        let context = self.capture.base().require_context()?;
        let body = self
            .capture
            .bytecode()
            .ok_or_else(|| HackError::MalformedBlock("no block was captured".to_owned()))?;
        let frame = cx.host.frame_mut(context).ok_or(HackError::FrameGone(context))?;
        let locals = frame.locals_scope();
        let globals = frame.globals().clone();
        let existing: AHashSet<String> = locals.names().into_iter().collect();

        let mut code = body.clone();
        code.push(Instr::constant(Value::None));
        code.push(Instr::new(Opcode::ReturnValue));
        rewrite_for_function(&mut code, &self.params, &existing);
        code.name.clone_from(&self.name);
        code.argnames.clone_from(&self.params);
        code.argcount = self.argcount().unwrap_or_default();
        code.flags = CodeFlags::NEWLOCALS;
        if self.varargs {
            code.flags.insert(CodeFlags::VARARGS);
        }
        if self.varkwargs {
            code.flags.insert(CodeFlags::VARKEYWORDS);
        }
        let code = code.materialize(&[])?;
        log::debug!("captured function <{}>({})", self.name, self.params.join(", "));

        let function = Function::new(self.name.clone(), Arc::new(code), globals)
            .with_defaults(self.defaults.clone())
            .with_locals(locals);
        Ok(Value::Function(Arc::new(function)))
    }
}

impl WithHack for CaptureFunction {
    fn kind(&self) -> &'static str {
        "CaptureFunction"
    }

    fn enter(&mut self, cx: &mut BlockCx<'_>) -> RunResult<Value> {
        self.capture.begin(cx)?;
        self.function = None;
        Ok(cx.this_value())
    }

    fn exit(&mut self, cx: &mut BlockCx<'_>, exc: Option<&Exception>) -> RunResult<bool> {
        let swallowed = self.capture.finish(cx, exc)?;
        if propagates(exc, swallowed) {
            return Ok(false);
        }
        self.function = Some(self.build(cx)?);
        Ok(swallowed)
    }

    fn attribute(&self, name: &str) -> Option<Value> {
        match name {
            "function" => self.function.clone(),
            "bytecode" => self.capture.bytecode().map(listing_value),
            _ => None,
        }
    }
}

/// `CaptureFunction(args=(), varargs=False, varkwargs=False, name="<withhack>", argdefs=())`
pub(super) fn construct(host: &mut dyn Host, args: CallArgs) -> RunResult<Value> {
    const FUNC: &str = "CaptureFunction";
    let [params, varargs, varkwargs, name, argdefs] =
        bind_params(FUNC, ["args", "varargs", "varkwargs", "name", "argdefs"], args)?;

    let params = match params {
        Some(value) => sequence_arg(FUNC, "args", &value)?
            .iter()
            .map(|param| {
                param.as_str().map(str::to_owned).ok_or_else(|| {
                    ExcType::TypeError.err(format!("{FUNC}() parameter names must be strings, not {}", param.type_name()))
                })
            })
            .collect::<RunResult<Vec<_>>>()?,
        None => Vec::new(),
    };
    let name = match name {
        None | Some(Value::None) => DEFAULT_NAME.to_owned(),
        Some(Value::Str(name)) => name.to_string(),
        Some(other) => {
            return Err(ExcType::TypeError.err(format!("{FUNC}() name must be a string, not {}", other.type_name())));
        }
    };
    let defaults = match argdefs {
        Some(value) => sequence_arg(FUNC, "argdefs", &value)?,
        None => Vec::new(),
    };

    let hack = CaptureFunction::new(CaptureBytecode::for_current_frame(host), params)
        .varargs(varargs.as_ref().is_some_and(Value::is_truthy))
        .varkwargs(varkwargs.as_ref().is_some_and(Value::is_truthy))
        .name(name)
        .defaults(defaults);
    hack.check_signature()?;
    Ok(hack_value(hack))
}
