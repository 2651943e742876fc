//! Execution frames.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use indexmap::IndexMap;

use crate::{
    bytecode::{Code, CodeFlags},
    exception::{RunError, RunResult},
    host::TraceHook,
    namespace::Scope,
    value::{Cell, Value},
};

static NEXT_FRAME_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a frame.
///
/// Ids are never reused, so a stale id can only fail to resolve, never alias
/// a newer frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(u64);

impl FrameId {
    pub(crate) fn next() -> Self {
        Self(NEXT_FRAME_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Except,
    With,
}

/// An entry of a frame's block stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub kind: BlockKind,
    /// Offset of the handler the block routes exceptions to.
    pub handler: usize,
    /// Operand stack depth to restore before entering the handler.
    pub depth: usize,
}

/// One activation of a code object.
///
/// Variables live in three places: local slots (`varnames`), closure cells
/// (`cellvars ++ freevars`) and the name-indexed `names` scope. Module frames
/// share `names` with their globals.
pub struct Frame {
    id: FrameId,
    code: Arc<Code>,
    /// Offset of the next instruction to fetch.
    pub(crate) ip: usize,
    /// Offset of the instruction currently executing.
    pub(crate) lasti: usize,
    pub(crate) stack: Vec<Value>,
    pub(crate) fast: Vec<Option<Value>>,
    pub(crate) cells: Vec<Cell>,
    names: Scope,
    globals: Scope,
    builtins: Scope,
    pub(crate) blocks: Vec<Block>,
    trace: Option<TraceHook>,
}

impl Frame {
    /// Creates a frame for `code`.
    ///
    /// Name-indexed accesses use `names` if given; otherwise a fresh scope for
    /// `NEWLOCALS` code and the globals for everything else.
    pub(crate) fn new(code: Arc<Code>, globals: Scope, builtins: Scope, names: Option<Scope>) -> Self {
        let names = names.unwrap_or_else(|| {
            if code.flags().contains(CodeFlags::NEWLOCALS) {
                Scope::new()
            } else {
                globals.clone()
            }
        });
        let fast = vec![None; code.varnames().len()];
        let cells = code.cellvars().iter().map(|_| Cell::default()).collect();
        Self {
            id: FrameId::next(),
            code,
            ip: 0,
            lasti: 0,
            stack: Vec::new(),
            fast,
            cells,
            names,
            globals,
            builtins,
            blocks: Vec::new(),
            trace: None,
        }
    }

    /// Initializes parameter slots and closure cells for a function call.
    pub(crate) fn bind(&mut self, slots: Vec<Option<Value>>, closure: &[Cell]) {
        for (slot, value) in self.fast.iter_mut().zip(slots) {
            *slot = value;
        }
        // parameters captured by nested functions live in their cell
        for (i, name) in self.code.cellvars().iter().enumerate() {
            if let Some(pos) = self.slot_of(name) {
                self.cells[i].set(self.fast[pos].clone());
            }
        }
        let frees = self.code.freevars().len();
        self.cells
            .extend((0..frees).map(|i| closure.get(i).cloned().unwrap_or_default()));
    }

    #[must_use]
    pub fn id(&self) -> FrameId {
        self.id
    }

    #[must_use]
    pub fn code(&self) -> &Arc<Code> {
        &self.code
    }

    /// Offset of the instruction currently executing.
    #[must_use]
    pub fn lasti(&self) -> usize {
        self.lasti
    }

    /// Source line of the instruction currently executing.
    #[must_use]
    pub fn line(&self) -> Option<u32> {
        self.code.line_for(self.lasti)
    }

    #[must_use]
    pub fn globals(&self) -> &Scope {
        &self.globals
    }

    #[must_use]
    pub fn builtins(&self) -> &Scope {
        &self.builtins
    }

    /// Whether this frame runs module-level code (its locals are its globals).
    #[must_use]
    pub fn is_module(&self) -> bool {
        self.names.ptr_eq(&self.globals)
    }

    #[must_use]
    pub fn trace(&self) -> Option<&TraceHook> {
        self.trace.as_ref()
    }

    /// Replaces the frame's trace hook, returning the previous one.
    pub fn set_trace(&mut self, hook: Option<TraceHook>) -> Option<TraceHook> {
        std::mem::replace(&mut self.trace, hook)
    }

    fn slot_of(&self, name: &str) -> Option<usize> {
        self.code.varnames().iter().position(|n| n == name)
    }

    fn cell_of(&self, name: &str) -> Option<usize> {
        self.code
            .cellvars()
            .iter()
            .chain(self.code.freevars())
            .position(|n| n == name)
    }

    /// Looks `name` up in the frame's local bindings only.
    #[must_use]
    pub fn lookup_local(&self, name: &str) -> Option<Value> {
        if let Some(idx) = self.cell_of(name) {
            if let Some(value) = self.cells.get(idx).and_then(Cell::get) {
                return Some(value);
            }
        }
        if let Some(idx) = self.slot_of(name) {
            if let Some(value) = self.fast.get(idx).cloned().flatten() {
                return Some(value);
            }
        }
        self.names.get(name)
    }

    /// Snapshot of the merged local bindings.
    ///
    /// Name-indexed bindings come first, then bound slots, then bound cells.
    #[must_use]
    pub fn locals(&self) -> IndexMap<String, Value> {
        let mut locals = self.names.snapshot();
        for (name, value) in self.code.varnames().iter().zip(&self.fast) {
            if let Some(value) = value {
                locals.insert(name.clone(), value.clone());
            }
        }
        for (name, cell) in self.code.cellvars().iter().chain(self.code.freevars()).zip(&self.cells) {
            if let Some(value) = cell.get() {
                locals.insert(name.clone(), value);
            }
        }
        locals
    }

    /// The name-indexed locals scope, with slots and cells synced into it.
    ///
    /// Code executed against the returned scope sees the frame's current
    /// bindings; its stores land in the name-indexed storage only.
    pub fn locals_scope(&mut self) -> Scope {
        if !self.is_module() {
            let names = self.code.varnames().iter().chain(self.code.cellvars()).chain(self.code.freevars());
            for name in names {
                match self.lookup_slot_or_cell(name) {
                    Some(value) => self.names.set(name.clone(), value),
                    None => {
                        self.names.remove(name);
                    }
                }
            }
        }
        self.names.clone()
    }

    fn lookup_slot_or_cell(&self, name: &str) -> Option<Value> {
        if let Some(idx) = self.cell_of(name) {
            return self.cells.get(idx).and_then(Cell::get);
        }
        self.slot_of(name).and_then(|idx| self.fast.get(idx).cloned().flatten())
    }

    /// Merges `bindings` into the frame's locals.
    ///
    /// Each name goes to its closure cell if it has one, then its local slot,
    /// otherwise to the name-indexed storage.
    pub fn update_locals(&mut self, bindings: impl IntoIterator<Item = (String, Value)>) {
        for (name, value) in bindings {
            if let Some(idx) = self.cell_of(&name) {
                self.cells[idx].set(Some(value));
            } else if let Some(idx) = self.slot_of(&name) {
                self.fast[idx] = Some(value);
            } else {
                self.names.set(name, value);
            }
        }
    }

    // === Operand stack ===

    pub(crate) fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    pub(crate) fn pop(&mut self) -> RunResult<Value> {
        self.stack.pop().ok_or_else(|| RunError::internal("operand stack underflow"))
    }

    pub(crate) fn pop_n(&mut self, n: usize) -> RunResult<Vec<Value>> {
        let at = self
            .stack
            .len()
            .checked_sub(n)
            .ok_or_else(|| RunError::internal("operand stack underflow"))?;
        Ok(self.stack.split_off(at))
    }

    pub(crate) fn peek(&self) -> RunResult<&Value> {
        self.stack.last().ok_or_else(|| RunError::internal("operand stack underflow"))
    }

    pub(crate) fn names(&self) -> &Scope {
        &self.names
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("id", &self.id)
            .field("code", &self.code.name())
            .field("lasti", &self.lasti)
            .field("stack_depth", &self.stack.len())
            .field("blocks", &self.blocks)
            .field("traced", &self.trace.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::compile;

    fn function_frame(source: &str) -> Frame {
        let module = compile(source, "<module>").unwrap();
        let code = module
            .consts()
            .iter()
            .find_map(|c| match c {
                Value::Code(code) => Some(Arc::clone(code)),
                _ => None,
            })
            .unwrap();
        Frame::new(code, Scope::new(), Scope::new(), None)
    }

    #[test]
    fn update_locals_prefers_cells_then_slots() {
        let mut frame = function_frame("def f(a):\n    b = 1\n    def g():\n        return b\n");
        frame.update_locals([
            ("a".to_owned(), Value::Int(1)),
            ("b".to_owned(), Value::Int(2)),
            ("z".to_owned(), Value::Int(3)),
        ]);
        assert!(frame.fast[0].as_ref().is_some_and(|v| v.py_eq(&Value::Int(1))));
        assert!(frame.cells[0].get().is_some_and(|v| v.py_eq(&Value::Int(2))));
        assert!(frame.names().get("z").is_some());
        let locals = frame.locals();
        assert_eq!(locals.keys().collect::<Vec<_>>(), vec!["z", "a", "b"]);
    }

    #[test]
    fn locals_scope_drops_unbound_slots() {
        let mut frame = function_frame("def f(a):\n    b = 1\n");
        frame.names().set("a", Value::Int(9));
        let scope = frame.locals_scope();
        assert!(!scope.contains("a"));
        frame.fast[0] = Some(Value::Int(4));
        let scope = frame.locals_scope();
        assert!(scope.get("a").is_some_and(|v| v.py_eq(&Value::Int(4))));
    }

    #[test]
    fn frame_ids_are_unique() {
        assert_ne!(FrameId::next(), FrameId::next());
    }
}
