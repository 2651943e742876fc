#![doc = include_str!("../../../README.md")]

mod args;
mod builtins;
pub mod bytecode;
mod config;
mod exception;
mod function;
pub mod hack;
pub mod host;
mod io;
mod namespace;
mod parse;
pub mod recipes;
mod run;
pub mod tracer;
mod value;

pub use crate::{
    args::CallArgs,
    builtins::scope as builtins_scope,
    config::{DEFAULT_MAX_RECURSION_DEPTH, VmConfig},
    exception::{ExcType, Exception, RunError, RunResult},
    function::{Function, NativeFn, NativeFunction},
    hack::{HackError, Injector},
    io::{CollectStringPrint, NoPrint, PrintWriter, StdPrint},
    namespace::Scope,
    parse::ParseError,
    run::Runner,
    tracer::{NoopTracer, RecordingTracer, StderrTracer, VmEvent, VmTracer},
    value::{Cell, Dict, DictKey, List, Object, Range, Value},
};
