//! Bytecode execution.
//!
//! The VM runs frames recursively: calling a script function pushes a frame
//! and runs it to completion before the caller continues. Every live frame
//! stays on `frames`, so with-hacks can walk from a frame to its callers.
//!
//! Errors are routed through the block stack of the frame that raised them.
//! `Internal` errors are never routed; they unwind every frame.

pub(crate) mod attr;
mod call;
mod frame;

use std::sync::Arc;

pub use frame::{Block, BlockKind, Frame, FrameId};

use super::{Code, Opcode};
use crate::{
    args::CallArgs,
    config::VmConfig,
    exception::{ExcType, Exception, RunError, RunResult},
    function::Function,
    hack::{BlockCx, Injector},
    host::{Host, MonitorEvent},
    io::PrintWriter,
    namespace::Scope,
    tracer::{NoopTracer, VmTracer},
    value::{BinaryOp, Cell, DictKey, Value},
};

/// Fetches a u8 operand, advancing ip.
macro_rules! fetch_u8 {
    ($frame:expr, $bytes:expr) => {{
        let byte = $bytes[$frame.ip];
        $frame.ip += 1;
        byte
    }};
}

/// Fetches a u16 operand (little-endian), advancing ip.
macro_rules! fetch_u16 {
    ($frame:expr, $bytes:expr) => {{
        let lo = $bytes[$frame.ip];
        let hi = $bytes[$frame.ip + 1];
        $frame.ip += 2;
        u16::from_le_bytes([lo, hi])
    }};
}

/// Applies a relative jump operand to ip.
macro_rules! jump_relative {
    ($frame:expr, $arg:expr) => {{
        $frame.ip = jump_target($frame.ip, $arg)?;
    }};
}

/// The bytecode VM.
///
/// Generic over the output writer and the execution tracer; with
/// [`NoopTracer`] every tracing call compiles away.
pub struct VM<'p, P: PrintWriter, Tr: VmTracer = NoopTracer> {
    frames: Vec<Frame>,
    print: &'p mut P,
    tracer: Tr,
    config: VmConfig,
    builtins: Scope,
}

impl<'p, P: PrintWriter, Tr: VmTracer> VM<'p, P, Tr> {
    pub fn new(print: &'p mut P, tracer: Tr, config: VmConfig, builtins: Scope) -> Self {
        Self {
            frames: Vec::new(),
            print,
            tracer,
            config,
            builtins,
        }
    }

    #[must_use]
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    #[must_use]
    pub fn tracer(&self) -> &Tr {
        &self.tracer
    }

    pub fn into_tracer(self) -> Tr {
        self.tracer
    }

    #[must_use]
    pub fn builtins(&self) -> &Scope {
        &self.builtins
    }

    /// Runs module code with `globals` as both its globals and its locals.
    ///
    /// Returns the value of a trailing expression statement, `None` otherwise.
    pub fn run_module(&mut self, code: Arc<Code>, globals: Scope) -> RunResult<Value> {
        let frame = Frame::new(code, globals, self.builtins.clone(), None);
        self.run_frame(frame)
    }

    fn monitoring_enabled(&self) -> bool {
        self.config.monitoring && self.config.injector.switch().is_enabled()
    }

    // ========================================================================
    // Frames
    // ========================================================================

    fn run_frame(&mut self, frame: Frame) -> RunResult<Value> {
        if self.frames.len() >= self.config.max_recursion_depth {
            return Err(ExcType::RecursionError.err("maximum recursion depth exceeded"));
        }
        log::trace!("push {} running <{}>", frame.id(), frame.code().name());
        self.tracer.on_call(frame.code().name(), self.frames.len() + 1);
        self.frames.push(frame);
        let idx = self.frames.len() - 1;

        let result = self.call_event(idx).and_then(|()| self.run_loop(idx));
        let result = self.return_event(idx, result);

        if let Some(frame) = self.frames.pop() {
            log::trace!("pop {}", frame.id());
        }
        self.tracer.on_return(self.frames.len());
        result
    }

    fn call_event(&mut self, idx: usize) -> RunResult<()> {
        if !self.config.monitoring {
            return Ok(());
        }
        match self.config.injector.switch().global_hook() {
            Some(hook) => hook(&mut self.frames[idx], &MonitorEvent::Call),
            None => Ok(()),
        }
    }

    /// Delivers the return event to the frame's hook, so callbacks still
    /// pending when a frame ends are drained.
    ///
    /// Hook errors replace a normal result but never mask an exception.
    fn return_event(&mut self, idx: usize, result: RunResult<Value>) -> RunResult<Value> {
        let frame = &mut self.frames[idx];
        let Some(hook) = frame.trace().cloned() else {
            return result;
        };
        let outcome = hook(frame, &MonitorEvent::Return);
        match (result, outcome) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(err)) | (Err(err), _) => Err(err),
        }
    }

    fn line_event(&mut self, idx: usize, offset: usize, line: u32) -> RunResult<()> {
        if !self.monitoring_enabled() {
            return Ok(());
        }
        let frame = &mut self.frames[idx];
        let Some(hook) = frame.trace().cloned() else {
            return Ok(());
        };
        self.tracer.on_line(offset, line);
        hook(frame, &MonitorEvent::Line { offset, line })
    }

    fn run_loop(&mut self, idx: usize) -> RunResult<Value> {
        loop {
            match self.step(idx) {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => {}
                Err(err) => self.route_error(idx, err)?,
            }
        }
    }

    /// Moves a catchable exception to the innermost handler of the frame.
    fn route_error(&mut self, idx: usize, err: RunError) -> RunResult<()> {
        let RunError::Exc(exc) = err else {
            return Err(err);
        };
        let frame = &mut self.frames[idx];
        let Some(block) = frame.blocks.pop() else {
            return Err(RunError::Exc(exc));
        };
        self.tracer.on_block_pop(frame.blocks.len());
        frame.stack.truncate(block.depth);
        frame.push(Value::Exception(Arc::new(exc)));
        frame.ip = block.handler;
        Ok(())
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Executes one instruction, returning the frame's result once it returns.
    fn step(&mut self, idx: usize) -> RunResult<Option<Value>> {
        let code = Arc::clone(self.frames[idx].code());
        let offset = self.frames[idx].ip;
        self.frames[idx].lasti = offset;
        if let Some(line) = code.line_start(offset) {
            self.line_event(idx, offset, line)?;
        }

        let bytes = code.bytecode();
        let depth = self.frames.len();
        let frame = &mut self.frames[idx];
        let Some(&byte) = bytes.get(frame.ip) else {
            return Err(RunError::internal("instruction pointer ran past the end of the code"));
        };
        let opcode = Opcode::from_repr(byte).ok_or_else(|| RunError::internal(format!("invalid opcode byte {byte}")))?;
        frame.ip += 1;
        if frame.ip + opcode.operand().width() > bytes.len() {
            return Err(RunError::internal("truncated instruction operand"));
        }
        let arg = match opcode.operand().width() {
            0 => 0,
            1 => u16::from(fetch_u8!(frame, bytes)),
            _ => fetch_u16!(frame, bytes),
        };
        self.tracer.on_instruction(offset, opcode, frame.stack.len(), depth);

        match opcode {
            Opcode::Nop => {}
            Opcode::Pop => {
                frame.pop()?;
            }
            Opcode::Dup => {
                let top = frame.peek()?.clone();
                frame.push(top);
            }
            Opcode::Rot2 => {
                let len = frame.stack.len();
                if len < 2 {
                    return Err(RunError::internal("operand stack underflow"));
                }
                frame.stack.swap(len - 1, len - 2);
            }
            Opcode::Rot3 => {
                let top = frame.pop()?;
                let len = frame.stack.len();
                if len < 2 {
                    return Err(RunError::internal("operand stack underflow"));
                }
                frame.stack.insert(len - 2, top);
            }

            // === Constants and variables ===
            Opcode::LoadConst => {
                let value = const_at(&code, arg)?;
                frame.push(value);
            }
            Opcode::LoadFast => {
                let value = frame.fast.get(usize::from(arg)).cloned().flatten();
                let value = value.ok_or_else(|| unbound_local(&code, arg))?;
                frame.push(value);
            }
            Opcode::StoreFast => {
                let value = frame.pop()?;
                let slot = frame
                    .fast
                    .get_mut(usize::from(arg))
                    .ok_or_else(|| RunError::internal("local slot out of range"))?;
                *slot = Some(value);
            }
            Opcode::DeleteFast => {
                let slot = frame
                    .fast
                    .get_mut(usize::from(arg))
                    .ok_or_else(|| RunError::internal("local slot out of range"))?;
                if slot.take().is_none() {
                    return Err(unbound_local(&code, arg));
                }
            }
            Opcode::LoadDeref => {
                let value = cell_at(frame, arg)?.get().ok_or_else(|| unbound_free(&code, arg))?;
                frame.push(value);
            }
            Opcode::StoreDeref => {
                let value = frame.pop()?;
                cell_at(frame, arg)?.set(Some(value));
            }
            Opcode::DeleteDeref => {
                let cell = cell_at(frame, arg)?;
                if cell.get().is_none() {
                    return Err(unbound_free(&code, arg));
                }
                cell.set(None);
            }
            Opcode::LoadClosure => {
                let cell = cell_at(frame, arg)?;
                frame.push(Value::Cell(cell));
            }
            Opcode::LoadName => {
                let name = name_at(&code, arg)?;
                let value = frame
                    .names()
                    .get(name)
                    .or_else(|| frame.globals().get(name))
                    .or_else(|| frame.builtins().get(name))
                    .ok_or_else(|| name_error(name))?;
                frame.push(value);
            }
            Opcode::StoreName => {
                let value = frame.pop()?;
                frame.names().set(name_at(&code, arg)?, value);
            }
            Opcode::DeleteName => {
                let name = name_at(&code, arg)?;
                frame.names().remove(name).ok_or_else(|| name_error(name))?;
            }
            Opcode::LoadGlobal => {
                let name = name_at(&code, arg)?;
                let value = frame
                    .globals()
                    .get(name)
                    .or_else(|| frame.builtins().get(name))
                    .ok_or_else(|| name_error(name))?;
                frame.push(value);
            }
            Opcode::StoreGlobal => {
                let value = frame.pop()?;
                frame.globals().set(name_at(&code, arg)?, value);
            }
            Opcode::DeleteGlobal => {
                let name = name_at(&code, arg)?;
                frame.globals().remove(name).ok_or_else(|| name_error(name))?;
            }

            // === Attributes and subscripts ===
            Opcode::LoadAttr => {
                let obj = frame.pop()?;
                frame.push(attr::load_attr(&obj, name_at(&code, arg)?)?);
            }
            Opcode::StoreAttr => {
                let obj = frame.pop()?;
                let value = frame.pop()?;
                attr::store_attr(&obj, name_at(&code, arg)?, value)?;
            }
            Opcode::DeleteAttr => {
                let obj = frame.pop()?;
                attr::delete_attr(&obj, name_at(&code, arg)?)?;
            }
            Opcode::LoadSubscr => {
                let key = frame.pop()?;
                let obj = frame.pop()?;
                frame.push(attr::load_subscr(&obj, &key)?);
            }
            Opcode::StoreSubscr => {
                let key = frame.pop()?;
                let obj = frame.pop()?;
                let value = frame.pop()?;
                attr::store_subscr(&obj, &key, value)?;
            }
            Opcode::DeleteSubscr => {
                let key = frame.pop()?;
                let obj = frame.pop()?;
                attr::delete_subscr(&obj, &key)?;
            }

            // === Operators ===
            Opcode::BinaryAdd
            | Opcode::BinarySub
            | Opcode::BinaryMul
            | Opcode::BinaryTrueDiv
            | Opcode::BinaryFloorDiv
            | Opcode::BinaryMod => {
                let rhs = frame.pop()?;
                let lhs = frame.pop()?;
                frame.push(lhs.binary(binary_op(opcode), &rhs)?);
            }
            Opcode::UnaryNot => {
                let value = frame.pop()?;
                frame.push(Value::Bool(!value.is_truthy()));
            }
            Opcode::UnaryNeg => {
                let value = frame.pop()?;
                frame.push(negate(&value)?);
            }
            Opcode::CompareEq
            | Opcode::CompareNe
            | Opcode::CompareLt
            | Opcode::CompareLe
            | Opcode::CompareGt
            | Opcode::CompareGe
            | Opcode::CompareIn
            | Opcode::CompareNotIn
            | Opcode::CompareIs
            | Opcode::CompareIsNot => {
                let rhs = frame.pop()?;
                let lhs = frame.pop()?;
                frame.push(Value::Bool(compare(opcode, &lhs, &rhs)?));
            }
            Opcode::CompareExcMatch => {
                let pattern = frame.pop()?;
                let exc = frame.pop()?;
                frame.push(Value::Bool(exception_matches(&exc, &pattern)?));
            }

            // === Control flow ===
            Opcode::Jump => jump_relative!(frame, arg),
            Opcode::PopJumpIfFalse => {
                if !frame.pop()?.is_truthy() {
                    jump_relative!(frame, arg);
                }
            }
            Opcode::PopJumpIfTrue => {
                if frame.pop()?.is_truthy() {
                    jump_relative!(frame, arg);
                }
            }
            Opcode::JumpIfFalseOrPop => {
                if frame.peek()?.is_truthy() {
                    frame.pop()?;
                } else {
                    jump_relative!(frame, arg);
                }
            }
            Opcode::JumpIfTrueOrPop => {
                if frame.peek()?.is_truthy() {
                    jump_relative!(frame, arg);
                } else {
                    frame.pop()?;
                }
            }
            Opcode::GetIter => {
                let iterable = frame.pop()?;
                frame.push(Value::Iter(iterable.to_iter()?));
            }
            Opcode::ForIter => {
                let Value::Iter(iter) = frame.peek()? else {
                    return Err(RunError::internal("ForIter without an iterator"));
                };
                let iter = iter.clone();
                match iter.next_item() {
                    Some(item) => frame.push(item),
                    None => {
                        frame.pop()?;
                        jump_relative!(frame, arg);
                    }
                }
            }
            Opcode::ReturnValue => return frame.pop().map(Some),
            Opcode::Raise => {
                let value = frame.pop()?;
                return Err(match value {
                    Value::ExcType(exc_type) => RunError::Exc(Exception::bare(exc_type)),
                    Value::Exception(exc) => RunError::Exc((*exc).clone()),
                    _ => ExcType::TypeError.err("exceptions must derive from BaseException"),
                });
            }
            Opcode::Reraise => {
                let Value::Exception(exc) = frame.pop()? else {
                    return Err(RunError::internal("Reraise without an exception"));
                };
                return Err(RunError::Exc((*exc).clone()));
            }

            // === Blocks ===
            Opcode::SetupExcept => {
                let handler = jump_target(frame.ip, arg)?;
                let depth = frame.stack.len();
                frame.blocks.push(Block {
                    kind: BlockKind::Except,
                    handler,
                    depth,
                });
                self.tracer.on_block_push(frame.blocks.len());
            }
            Opcode::SetupWith => {
                let handler = jump_target(frame.ip, arg)?;
                let manager = frame.pop()?;
                let entered = self.enter_with(idx, &manager)?;
                let frame = &mut self.frames[idx];
                frame.push(manager);
                let depth = frame.stack.len();
                frame.blocks.push(Block {
                    kind: BlockKind::With,
                    handler,
                    depth,
                });
                self.tracer.on_block_push(frame.blocks.len());
                frame.push(entered);
            }
            Opcode::PopBlock => {
                frame
                    .blocks
                    .pop()
                    .ok_or_else(|| RunError::internal("PopBlock with an empty block stack"))?;
                self.tracer.on_block_pop(frame.blocks.len());
            }
            Opcode::ExitWith => {
                let manager = frame.pop()?;
                self.exit_with(idx, &manager, None)?;
            }
            Opcode::WithExcept => {
                let Value::Exception(exc) = frame.pop()? else {
                    return Err(RunError::internal("WithExcept without an exception"));
                };
                let manager = frame.pop()?;
                if !self.exit_with(idx, &manager, Some(&exc))? {
                    return Err(RunError::Exc((*exc).clone()));
                }
            }

            // === Construction and calls ===
            Opcode::BuildList => {
                let items = frame.pop_n(usize::from(arg))?;
                frame.push(Value::list(items));
            }
            Opcode::BuildTuple => {
                let items = frame.pop_n(usize::from(arg))?;
                frame.push(Value::tuple(items));
            }
            Opcode::BuildDict => {
                let items = frame.pop_n(2 * usize::from(arg))?;
                let mut map = indexmap::IndexMap::with_capacity(items.len() / 2);
                let mut items = items.into_iter();
                while let (Some(key), Some(value)) = (items.next(), items.next()) {
                    map.insert(DictKey::try_from(&key)?, value);
                }
                frame.push(Value::Dict(crate::value::Dict::new(map)));
            }
            Opcode::UnpackSequence => {
                let expected = usize::from(arg);
                let items = frame.pop()?.to_vec()?;
                if items.len() < expected {
                    return Err(ExcType::ValueError.err(format!(
                        "not enough values to unpack (expected {expected}, got {})",
                        items.len()
                    )));
                }
                if items.len() > expected {
                    return Err(ExcType::ValueError.err(format!("too many values to unpack (expected {expected})")));
                }
                frame.stack.extend(items.into_iter().rev());
            }
            Opcode::CallFunction => {
                let args = frame.pop_n(usize::from(arg))?;
                let callable = frame.pop()?;
                let result = self.call_value(&callable, CallArgs::new(args))?;
                self.frames[idx].push(result);
            }
            Opcode::CallFunctionKw => {
                let Value::Tuple(kwnames) = frame.pop()? else {
                    return Err(RunError::internal("CallFunctionKw without keyword names"));
                };
                let mut values = frame.pop_n(usize::from(arg))?;
                let callable = frame.pop()?;
                let split = values
                    .len()
                    .checked_sub(kwnames.len())
                    .ok_or_else(|| RunError::internal("more keyword names than arguments"))?;
                let kwvalues = values.split_off(split);
                let keywords = kwnames
                    .iter()
                    .zip(kwvalues)
                    .map(|(name, value)| (name.to_string(), value))
                    .collect();
                let result = self.call_value(&callable, CallArgs::with_keywords(values, keywords))?;
                self.frames[idx].push(result);
            }
            Opcode::MakeFunction => {
                let Value::Code(body) = frame.pop()? else {
                    return Err(RunError::internal("MakeFunction without a code object"));
                };
                let closure = if arg & 2 != 0 { closure_cells(frame.pop()?)? } else { Vec::new() };
                let defaults = if arg & 1 != 0 {
                    match frame.pop()? {
                        Value::Tuple(items) => items.to_vec(),
                        _ => return Err(RunError::internal("MakeFunction defaults must be a tuple")),
                    }
                } else {
                    Vec::new()
                };
                let mut function =
                    Function::new(body.name(), Arc::clone(&body), frame.globals().clone()).with_defaults(defaults);
                function.closure = closure;
                frame.push(Value::Function(Arc::new(function)));
            }
        }
        Ok(None)
    }

    // ========================================================================
    // With-blocks
    // ========================================================================

    fn enter_with(&mut self, idx: usize, manager: &Value) -> RunResult<Value> {
        let Value::Hack(hack) = manager else {
            return Err(not_a_context_manager(manager));
        };
        let hack = Arc::clone(hack);
        let frame = self.frames[idx].id();
        let mut guard = hack
            .try_lock()
            .ok_or_else(|| ExcType::RuntimeError.err("with-hack is already in use"))?;
        let mut cx = BlockCx {
            host: self,
            frame,
            this: Arc::clone(&hack),
        };
        guard.enter(&mut cx)
    }

    fn exit_with(&mut self, idx: usize, manager: &Value, exc: Option<&Exception>) -> RunResult<bool> {
        let Value::Hack(hack) = manager else {
            return Err(not_a_context_manager(manager));
        };
        let hack = Arc::clone(hack);
        let frame = self.frames[idx].id();
        let mut guard = hack
            .try_lock()
            .ok_or_else(|| ExcType::RuntimeError.err("with-hack is already in use"))?;
        let mut cx = BlockCx {
            host: self,
            frame,
            this: Arc::clone(&hack),
        };
        guard.exit(&mut cx, exc)
    }

    fn call_function(&mut self, function: &Function, args: CallArgs) -> RunResult<Value> {
        let slots = call::bind_arguments(function, args)?;
        let mut frame = Frame::new(
            Arc::clone(&function.code),
            function.globals.clone(),
            self.builtins.clone(),
            function.locals.clone(),
        );
        frame.bind(slots, &function.closure);
        self.run_frame(frame)
    }
}

impl<P: PrintWriter, Tr: VmTracer> Host for VM<'_, P, Tr> {
    fn frame(&self, id: FrameId) -> Option<&Frame> {
        self.frames.iter().rev().find(|f| f.id() == id)
    }

    fn frame_mut(&mut self, id: FrameId) -> Option<&mut Frame> {
        self.frames.iter_mut().rev().find(|f| f.id() == id)
    }

    fn current_frame(&self) -> Option<FrameId> {
        self.frames.last().map(Frame::id)
    }

    fn call_value(&mut self, callable: &Value, args: CallArgs) -> RunResult<Value> {
        match callable {
            Value::Function(function) => {
                let function = Arc::clone(function);
                self.call_function(&function, args)
            }
            Value::Native(native) => {
                let native = Arc::clone(native);
                native.call(self, args)
            }
            Value::ExcType(exc_type) => {
                args.check_positional(&exc_type.to_string(), 0, 1)?;
                let exc = match args.get(0) {
                    Some(message) => Exception::new(*exc_type, message.to_string()),
                    None => Exception::bare(*exc_type),
                };
                Ok(Value::Exception(Arc::new(exc)))
            }
            other => Err(ExcType::TypeError.err(format!("'{}' object is not callable", other.type_name()))),
        }
    }

    fn execute(&mut self, code: Arc<Code>, globals: Scope, locals: Scope) -> RunResult<Value> {
        let frame = Frame::new(code, globals, self.builtins.clone(), Some(locals));
        self.run_frame(frame)
    }

    fn print(&mut self) -> &mut dyn PrintWriter {
        &mut *self.print
    }

    fn injector(&self) -> Arc<Injector> {
        Arc::clone(&self.config.injector)
    }

    fn monitoring_available(&self) -> bool {
        self.config.monitoring
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Target of a jump whose operand is relative to `ip`, the end of the instruction.
fn jump_target(ip: usize, arg: u16) -> RunResult<usize> {
    let offset = i16::from_le_bytes(arg.to_le_bytes());
    ip.checked_add_signed(isize::from(offset))
        .ok_or_else(|| RunError::internal("jump target out of range"))
}

fn const_at(code: &Code, arg: u16) -> RunResult<Value> {
    code.consts()
        .get(usize::from(arg))
        .cloned()
        .ok_or_else(|| RunError::internal("constant index out of range"))
}

fn name_at(code: &Code, arg: u16) -> RunResult<&str> {
    code.names()
        .get(usize::from(arg))
        .map(String::as_str)
        .ok_or_else(|| RunError::internal("name index out of range"))
}

fn cell_at(frame: &Frame, arg: u16) -> RunResult<Cell> {
    frame
        .cells
        .get(usize::from(arg))
        .cloned()
        .ok_or_else(|| RunError::internal("cell index out of range"))
}

fn name_error(name: &str) -> RunError {
    ExcType::NameError.err(format!("name '{name}' is not defined"))
}

fn unbound_local(code: &Code, arg: u16) -> RunError {
    let name = code.varnames().get(usize::from(arg)).map_or("?", String::as_str);
    ExcType::UnboundLocalError.err(format!("local variable '{name}' referenced before assignment"))
}

fn unbound_free(code: &Code, arg: u16) -> RunError {
    let name = code.cell_name(usize::from(arg)).unwrap_or("?");
    ExcType::NameError.err(format!(
        "free variable '{name}' referenced before assignment in enclosing scope"
    ))
}

fn not_a_context_manager(value: &Value) -> RunError {
    ExcType::TypeError.err(format!(
        "'{}' object does not support the context manager protocol",
        value.type_name()
    ))
}

fn closure_cells(value: Value) -> RunResult<Vec<Cell>> {
    let Value::Tuple(items) = value else {
        return Err(RunError::internal("MakeFunction closure must be a tuple"));
    };
    items
        .iter()
        .map(|item| match item {
            Value::Cell(cell) => Ok(cell.clone()),
            _ => Err(RunError::internal("closure tuple must hold cells")),
        })
        .collect()
}

fn binary_op(opcode: Opcode) -> BinaryOp {
    match opcode {
        Opcode::BinarySub => BinaryOp::Sub,
        Opcode::BinaryMul => BinaryOp::Mul,
        Opcode::BinaryTrueDiv => BinaryOp::TrueDiv,
        Opcode::BinaryFloorDiv => BinaryOp::FloorDiv,
        Opcode::BinaryMod => BinaryOp::Mod,
        _ => BinaryOp::Add,
    }
}

fn negate(value: &Value) -> RunResult<Value> {
    match value {
        Value::Float(f) => Ok(Value::Float(-f)),
        other => match other.as_int() {
            Some(i) => i
                .checked_neg()
                .map(Value::Int)
                .ok_or_else(|| ExcType::ArithmeticError.err("integer overflow")),
            None => Err(ExcType::TypeError.err(format!(
                "bad operand type for unary -: '{}'",
                other.type_name()
            ))),
        },
    }
}

fn compare(opcode: Opcode, lhs: &Value, rhs: &Value) -> RunResult<bool> {
    Ok(match opcode {
        Opcode::CompareEq => lhs.py_eq(rhs),
        Opcode::CompareNe => !lhs.py_eq(rhs),
        Opcode::CompareLt => lhs.py_cmp(rhs)?.is_lt(),
        Opcode::CompareLe => lhs.py_cmp(rhs)?.is_le(),
        Opcode::CompareGt => lhs.py_cmp(rhs)?.is_gt(),
        Opcode::CompareGe => lhs.py_cmp(rhs)?.is_ge(),
        Opcode::CompareIn => rhs.contains(lhs)?,
        Opcode::CompareNotIn => !rhs.contains(lhs)?,
        Opcode::CompareIs => lhs.is_identical(rhs),
        Opcode::CompareIsNot => !lhs.is_identical(rhs),
        _ => return Err(RunError::internal("not a comparison opcode")),
    })
}

fn exception_matches(exc: &Value, pattern: &Value) -> RunResult<bool> {
    let Value::Exception(exc) = exc else {
        return Ok(false);
    };
    match pattern {
        Value::ExcType(exc_type) => Ok(exc.exc_type().is_subclass_of(*exc_type)),
        Value::Tuple(items) => {
            for item in items.iter() {
                if exception_matches(&Value::Exception(Arc::clone(exc)), item)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        _ => Err(ExcType::TypeError.err(
            "catching classes that do not inherit from BaseException is not allowed",
        )),
    }
}
