use std::{borrow::Cow, fmt, sync::Arc};

use crate::{
    args::CallArgs,
    bytecode::Code,
    exception::RunResult,
    host::Host,
    namespace::Scope,
    value::{Cell, Value},
};

/// A function defined by script code (or synthesized from captured bytecode).
///
/// Functions keep a handle to the globals they were defined in, so a function
/// built from a with-block resolves module names against the module that
/// contained the block.
#[derive(Debug)]
pub struct Function {
    /// The function name (used for error messages and repr).
    pub name: String,
    /// Compiled body.
    pub code: Arc<Code>,
    /// Module globals the body resolves global names against.
    pub globals: Scope,
    /// Default values aligned to the trailing positional parameters.
    pub defaults: Vec<Value>,
    /// Cells for the code's free variables, in `freevars` order.
    pub closure: Vec<Cell>,
    /// Name-indexed locals shared with another frame.
    ///
    /// Only used for code compiled without `NEWLOCALS`: its name-indexed
    /// accesses then read and write this scope instead of a fresh one.
    pub locals: Option<Scope>,
}

impl Function {
    #[must_use]
    pub fn new(name: impl Into<String>, code: Arc<Code>, globals: Scope) -> Self {
        Self {
            name: name.into(),
            code,
            globals,
            defaults: Vec::new(),
            closure: Vec::new(),
            locals: None,
        }
    }

    #[must_use]
    pub fn with_defaults(mut self, defaults: Vec<Value>) -> Self {
        self.defaults = defaults;
        self
    }

    #[must_use]
    pub fn with_locals(mut self, locals: Scope) -> Self {
        self.locals = Some(locals);
        self
    }
}

/// Signature of a native function body.
pub type NativeFn = dyn Fn(&mut dyn Host, CallArgs) -> RunResult<Value> + Send + Sync;

/// A function implemented in Rust: builtins, bound methods and hack constructors.
pub struct NativeFunction {
    name: Cow<'static, str>,
    func: Box<NativeFn>,
}

impl NativeFunction {
    /// Wraps a closure into a callable value.
    pub fn value<F>(name: impl Into<Cow<'static, str>>, func: F) -> Value
    where
        F: Fn(&mut dyn Host, CallArgs) -> RunResult<Value> + Send + Sync + 'static,
    {
        Value::Native(Arc::new(Self {
            name: name.into(),
            func: Box::new(func),
        }))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, host: &mut dyn Host, args: CallArgs) -> RunResult<Value> {
        (self.func)(host, args)
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction").field("name", &self.name).finish_non_exhaustive()
    }
}
