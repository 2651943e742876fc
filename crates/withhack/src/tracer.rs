//! VM execution tracing infrastructure.
//!
//! Provides a trait-based tracing system for the bytecode VM. When using
//! [`NoopTracer`], all trace methods compile away via monomorphization.
//!
//! | Tracer | Purpose |
//! |--------|---------|
//! | [`NoopTracer`] | Zero-cost no-op (production default) |
//! | [`StderrTracer`] | Human-readable execution log to stderr |
//! | [`RecordingTracer`] | Full event recording for post-mortem analysis |
//!
//! These tracers observe the VM from the outside and are unrelated to the
//! per-frame monitoring hooks scripts and with-hacks install
//! (see [`crate::host::TraceHook`]).

use crate::bytecode::Opcode;

/// Trace event recorded by [`RecordingTracer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmEvent {
    /// An opcode was dispatched at the given offset.
    Instruction {
        ip: usize,
        opcode: Opcode,
        stack_depth: usize,
    },
    /// A line event was delivered to a frame's monitoring hook.
    Line { ip: usize, line: u32 },
    /// A new frame was pushed.
    Call { name: String, depth: usize },
    /// A frame was popped.
    Return { depth: usize },
    /// A with or except block was pushed onto the block stack.
    BlockPush { depth: usize },
    /// A block was popped from the block stack.
    BlockPop { depth: usize },
}

/// Trait for VM execution tracing.
///
/// All methods have default no-op implementations, so [`NoopTracer`] requires
/// zero lines of code. Implementations only override the hooks they care about.
pub trait VmTracer: std::fmt::Debug {
    /// Called before each opcode dispatch in the main execution loop.
    ///
    /// This is the hottest hook, called for every single bytecode instruction.
    ///
    /// # Arguments
    /// * `ip` - Byte offset of the opcode in the code object's bytecode
    /// * `opcode` - The opcode about to be executed
    /// * `stack_depth` - Number of values on the frame's operand stack
    /// * `frame_depth` - Number of frames on the call stack
    #[inline(always)]
    fn on_instruction(&mut self, _ip: usize, _opcode: Opcode, _stack_depth: usize, _frame_depth: usize) {}

    /// Called when a line event is delivered to a frame's monitoring hook.
    #[inline(always)]
    fn on_line(&mut self, _ip: usize, _line: u32) {}

    /// Called when a new frame is pushed.
    #[inline(always)]
    fn on_call(&mut self, _name: &str, _depth: usize) {}

    /// Called when a frame is popped.
    #[inline(always)]
    fn on_return(&mut self, _depth: usize) {}

    /// Called when a with/except block is pushed.
    ///
    /// # Arguments
    /// * `depth` - Block stack depth after the push
    #[inline(always)]
    fn on_block_push(&mut self, _depth: usize) {}

    /// Called when a block is popped, normally or while routing an exception.
    #[inline(always)]
    fn on_block_pop(&mut self, _depth: usize) {}
}

// ============================================================================
// NoopTracer
// ============================================================================

/// A tracer that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl VmTracer for NoopTracer {}

// ============================================================================
// StderrTracer
// ============================================================================

/// Tracer that prints a human-readable execution log to stderr.
///
/// Output format:
/// ```text
///   >>> CALL <module>            depth=1
/// [    0] LoadName  stack=0  frames=1
///   ~~~ LINE 3 @ 12
///   <<< RETURN              depth=0
/// ```
#[derive(Debug, Default)]
pub struct StderrTracer {
    /// Maximum number of instructions to trace before going quiet. None = unlimited.
    limit: Option<usize>,
    count: usize,
    stopped: bool,
}

impl StderrTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a tracer that stops after `limit` instructions.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }
}

impl VmTracer for StderrTracer {
    #[inline]
    fn on_instruction(&mut self, ip: usize, opcode: Opcode, stack_depth: usize, frame_depth: usize) {
        if self.stopped {
            return;
        }
        eprintln!("[{ip:>5}] {opcode:?}  stack={stack_depth}  frames={frame_depth}");
        self.count += 1;
        if let Some(limit) = self.limit
            && self.count >= limit
        {
            eprintln!("--- trace limit reached ({limit} instructions) ---");
            self.stopped = true;
        }
    }

    fn on_line(&mut self, ip: usize, line: u32) {
        if !self.stopped {
            eprintln!("  ~~~ LINE {line} @ {ip}");
        }
    }

    fn on_call(&mut self, name: &str, depth: usize) {
        if !self.stopped {
            eprintln!("  >>> CALL {name:<20} depth={depth}");
        }
    }

    fn on_return(&mut self, depth: usize) {
        if !self.stopped {
            eprintln!("  <<< RETURN              depth={depth}");
        }
    }
}

// ============================================================================
// RecordingTracer
// ============================================================================

/// Tracer that records all events for post-mortem analysis.
///
/// Allocates per event, so use it only for short executions.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    events: Vec<VmEvent>,
    limit: Option<usize>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a recording tracer that stops recording after `limit` events.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            events: Vec::with_capacity(limit.min(1024)),
            limit: Some(limit),
        }
    }

    #[must_use]
    pub fn events(&self) -> &[VmEvent] {
        &self.events
    }

    #[must_use]
    pub fn into_events(self) -> Vec<VmEvent> {
        self.events
    }

    fn record(&mut self, event: VmEvent) {
        if self.limit.is_some_and(|l| self.events.len() >= l) {
            return;
        }
        self.events.push(event);
    }
}

impl VmTracer for RecordingTracer {
    fn on_instruction(&mut self, ip: usize, opcode: Opcode, stack_depth: usize, _frame_depth: usize) {
        self.record(VmEvent::Instruction {
            ip,
            opcode,
            stack_depth,
        });
    }

    fn on_line(&mut self, ip: usize, line: u32) {
        self.record(VmEvent::Line { ip, line });
    }

    fn on_call(&mut self, name: &str, depth: usize) {
        self.record(VmEvent::Call {
            name: name.to_owned(),
            depth,
        });
    }

    fn on_return(&mut self, depth: usize) {
        self.record(VmEvent::Return { depth });
    }

    fn on_block_push(&mut self, depth: usize) {
        self.record(VmEvent::BlockPush { depth });
    }

    fn on_block_pop(&mut self, depth: usize) {
        self.record(VmEvent::BlockPop { depth });
    }
}
