//! Compiled code objects.

use std::{
    collections::BTreeMap,
    fmt::{self, Write as _},
    ops::BitOr,
};

use super::{
    concrete::{self, ConcreteInstr},
    op::OperandKind,
};
use crate::value::Value;

/// Flag bits describing how a code object is called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct CodeFlags(u8);

impl CodeFlags {
    /// The last positional parameter slot collects extra positional arguments.
    pub const VARARGS: Self = Self(1);
    /// The last parameter slot collects extra keyword arguments.
    pub const VARKEYWORDS: Self = Self(1 << 1);
    /// Name-indexed accesses use a fresh scope per call.
    ///
    /// Cleared for code that must run against another frame's locals.
    pub const NEWLOCALS: Self = Self(1 << 2);
    /// The code belongs to a function nested inside another function.
    pub const NESTED: Self = Self(1 << 3);

    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for CodeFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// A compiled unit of bytecode together with the tables its operands index.
///
/// # Variable tables
///
/// - `names`: operands of name-indexed, global and attribute instructions
/// - `varnames`: local slots; parameters first (positional, then `*args`, then `**kwargs`)
/// - `cellvars`: locals captured by nested functions
/// - `freevars`: variables captured from enclosing functions
///
/// Cell operands index `cellvars ++ freevars`.
#[derive(Debug, Clone)]
pub struct Code {
    pub(crate) name: String,
    pub(crate) bytecode: Vec<u8>,
    pub(crate) consts: Vec<Value>,
    pub(crate) names: Vec<String>,
    pub(crate) varnames: Vec<String>,
    pub(crate) cellvars: Vec<String>,
    pub(crate) freevars: Vec<String>,
    /// Number of positional parameters, excluding `*args` and `**kwargs`.
    pub(crate) argcount: usize,
    pub(crate) flags: CodeFlags,
    /// Offsets of instructions that start a source line, mapped to the line number.
    pub(crate) line_starts: BTreeMap<usize, u32>,
}

impl Code {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }

    #[must_use]
    pub fn consts(&self) -> &[Value] {
        &self.consts
    }

    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    #[must_use]
    pub fn varnames(&self) -> &[String] {
        &self.varnames
    }

    #[must_use]
    pub fn cellvars(&self) -> &[String] {
        &self.cellvars
    }

    #[must_use]
    pub fn freevars(&self) -> &[String] {
        &self.freevars
    }

    #[must_use]
    pub fn argcount(&self) -> usize {
        self.argcount
    }

    #[must_use]
    pub fn flags(&self) -> CodeFlags {
        self.flags
    }

    /// Number of parameter slots, including `*args` and `**kwargs`.
    #[must_use]
    pub fn total_params(&self) -> usize {
        self.argcount
            + usize::from(self.flags.contains(CodeFlags::VARARGS))
            + usize::from(self.flags.contains(CodeFlags::VARKEYWORDS))
    }

    /// Name of cell operand `index` (cellvars first, then freevars).
    #[must_use]
    pub fn cell_name(&self, index: usize) -> Option<&str> {
        let name = match index.checked_sub(self.cellvars.len()) {
            None => self.cellvars.get(index),
            Some(free) => self.freevars.get(free),
        };
        name.map(String::as_str)
    }

    /// Source line started by the instruction at `offset`, if it starts one.
    #[must_use]
    pub fn line_start(&self, offset: usize) -> Option<u32> {
        self.line_starts.get(&offset).copied()
    }

    /// Source line of the instruction at `offset` (the last line start at or before it).
    #[must_use]
    pub fn line_for(&self, offset: usize) -> Option<u32> {
        self.line_starts.range(..=offset).next_back().map(|(_, line)| *line)
    }

    /// Returns a human-readable listing of the code, one instruction per line.
    ///
    /// Nested code objects in the constant pool are listed after their parent.
    #[must_use]
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        self.write_disassembly(&mut out);
        out
    }

    fn write_disassembly(&self, out: &mut String) {
        let _ = writeln!(out, "Disassembly of <{}>:", self.name);
        let instrs = match concrete::decode(self) {
            Ok(instrs) => instrs,
            Err(e) => {
                let _ = writeln!(out, "  <undecodable: {e}>");
                return;
            }
        };
        for instr in &instrs {
            let line = self
                .line_start(instr.offset)
                .map_or_else(|| "    ".to_owned(), |l| format!("{l:>4}"));
            let _ = writeln!(out, "{line} {:>5} {}", instr.offset, self.describe(instr));
        }
        for constant in &self.consts {
            if let Value::Code(nested) = constant {
                out.push('\n');
                nested.write_disassembly(out);
            }
        }
    }

    fn describe(&self, instr: &ConcreteInstr) -> String {
        let mut text = format!("{:<16}", instr.opcode.to_string());
        let arg = usize::from(instr.arg);
        let detail = match instr.opcode.operand() {
            OperandKind::None => None,
            OperandKind::Const => self.consts.get(arg).map(Value::repr),
            OperandKind::Name => self.names.get(arg).cloned(),
            OperandKind::Local => self.varnames.get(arg).cloned(),
            OperandKind::Cell => self.cell_name(arg).map(str::to_owned),
            OperandKind::Jump => Some(format!("to {}", instr.jump_target().unwrap_or_default())),
            OperandKind::Count | OperandKind::Byte => Some(arg.to_string()),
        };
        if let Some(detail) = detail {
            let _ = write!(text, " {arg:>3} ({detail})");
        }
        text.trim_end().to_owned()
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.disassemble())
    }
}
