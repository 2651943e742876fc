//! Public interface for running scripts.

use std::sync::Arc;

use crate::{
    builtins,
    bytecode::{Code, VM, compile},
    config::VmConfig,
    exception::RunResult,
    io::PrintWriter,
    namespace::Scope,
    parse::ParseError,
    recipes,
    tracer::{NoopTracer, VmTracer},
    value::Value,
};

/// A compiled script, ready to run any number of times.
///
/// # Example
/// ```
/// use withhack::{CollectStringPrint, Runner};
///
/// let source = "with CaptureFunction(('name',)) as f:\n    print('hello', name)\nf.function('world')\n";
/// let runner = Runner::new(source.to_owned(), "demo.py").unwrap();
/// let mut print = CollectStringPrint::new();
/// runner.run(&mut print).unwrap();
/// assert_eq!(print.output(), "hello world\n");
/// ```
#[derive(Debug, Clone)]
pub struct Runner {
    source: String,
    code: Arc<Code>,
    recipes: bool,
}

impl Runner {
    /// Compiles `source` as a module named after `script_name`.
    pub fn new(source: String, script_name: &str) -> Result<Self, ParseError> {
        let code = compile(&source, script_name)?;
        log::debug!("compiled {script_name}: {} bytes of bytecode", code.bytecode().len());
        Ok(Self {
            source,
            code: Arc::new(code),
            recipes: true,
        })
    }

    /// Whether the recipe constructors are available as builtins (the default).
    #[must_use]
    pub fn with_recipes(mut self, enabled: bool) -> Self {
        self.recipes = enabled;
        self
    }

    /// The source the runner was compiled from.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn code(&self) -> &Arc<Code> {
        &self.code
    }

    /// Runs the script in fresh globals with the default configuration.
    pub fn run(&self, print: &mut impl PrintWriter) -> RunResult<Value> {
        self.run_with(&Scope::new(), VmConfig::default(), NoopTracer, print).0
    }

    /// Runs the script in `globals`, returning the tracer alongside the result.
    pub fn run_with<P: PrintWriter, Tr: VmTracer>(
        &self,
        globals: &Scope,
        config: VmConfig,
        tracer: Tr,
        print: &mut P,
    ) -> (RunResult<Value>, Tr) {
        let builtins = builtins::scope();
        if self.recipes {
            recipes::install(&builtins);
        }
        let mut vm = VM::new(print, tracer, config, builtins);
        let result = vm.run_module(Arc::clone(&self.code), globals.clone());
        (result, vm.into_tracer())
    }
}
