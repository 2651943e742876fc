//! The execution-engine contract the with-hack core is written against.
//!
//! [`Host`] gives access to live frames, calling and executing code, and
//! program output. Monitoring is modelled on per-frame trace hooks plus one
//! process-wide global hook: while a global hook is installed the engine
//! delivers [`MonitorEvent::Line`] events to frame hooks.

use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;

use crate::{
    args::CallArgs,
    bytecode::{Code, Frame, FrameId},
    exception::RunResult,
    hack::Injector,
    io::PrintWriter,
    namespace::Scope,
    value::Value,
};

/// Event delivered to monitoring hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorEvent {
    /// A frame started executing.
    Call,
    /// The instruction at `offset` starts source line `line` and is about to run.
    Line { offset: usize, line: u32 },
    /// A frame is about to be popped, normally or by an exception.
    Return,
}

/// A monitoring hook.
///
/// An error returned for a `Line` event is raised in the frame at the
/// instruction that was about to run.
pub type TraceHook = Arc<dyn Fn(&mut Frame, &MonitorEvent) -> RunResult<()> + Send + Sync>;

/// Process- or engine-wide monitoring switch.
///
/// Monitoring is enabled exactly while a global hook is installed.
pub trait MonitorSwitch: Send + Sync {
    fn global_hook(&self) -> Option<TraceHook>;

    /// Installs or removes the global hook, returning the previous one.
    fn set_global_hook(&self, hook: Option<TraceHook>) -> Option<TraceHook>;

    fn is_enabled(&self) -> bool {
        self.global_hook().is_some()
    }
}

static PROCESS_HOOK: LazyLock<RwLock<Option<TraceHook>>> = LazyLock::new(|| RwLock::new(None));

/// The process-wide monitoring switch shared by every VM by default.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessMonitor;

impl MonitorSwitch for ProcessMonitor {
    fn global_hook(&self) -> Option<TraceHook> {
        PROCESS_HOOK.read().clone()
    }

    fn set_global_hook(&self, hook: Option<TraceHook>) -> Option<TraceHook> {
        std::mem::replace(&mut *PROCESS_HOOK.write(), hook)
    }
}

/// Operations the with-hack core needs from the execution engine.
pub trait Host {
    fn frame(&self, id: FrameId) -> Option<&Frame>;

    fn frame_mut(&mut self, id: FrameId) -> Option<&mut Frame>;

    /// The innermost frame executing script code.
    fn current_frame(&self) -> Option<FrameId>;

    /// Calls any callable value.
    fn call_value(&mut self, callable: &Value, args: CallArgs) -> RunResult<Value>;

    /// Runs `code` as a new frame whose name-indexed accesses use `locals`
    /// and whose global accesses use `globals`.
    fn execute(&mut self, code: Arc<Code>, globals: Scope, locals: Scope) -> RunResult<Value>;

    /// Program output.
    fn print(&mut self) -> &mut dyn PrintWriter;

    /// The trace injector hooks are installed through.
    fn injector(&self) -> Arc<Injector>;

    /// Whether the engine delivers monitoring events at all.
    fn monitoring_available(&self) -> bool;
}
