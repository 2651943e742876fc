//! Builder for emitting bytecode during compilation.
//!
//! `CodeBuilder` provides methods for emitting opcodes and operands, handling
//! forward jumps with patching, and recording which offsets start a source line.

use std::collections::BTreeMap;

use ahash::AHashMap;

use super::{
    code::{Code, CodeFlags},
    op::Opcode,
};
use crate::value::Value;

/// Builder for emitting bytecode during compilation.
///
/// # Usage
///
/// ```ignore
/// let mut builder = CodeBuilder::new();
/// builder.mark_line(1);
/// let none = builder.add_const(Value::None).ok_or(TooManyConstants)?;
/// builder.emit_u16(Opcode::LoadConst, none);
/// let jump = builder.emit_jump(Opcode::PopJumpIfFalse);
/// // ... emit more code ...
/// builder.patch_jump(jump);
/// let code = builder.build(layout);
/// ```
#[derive(Debug, Default)]
pub(crate) struct CodeBuilder {
    /// The bytecode being built.
    bytecode: Vec<u8>,
    /// Constants collected during compilation.
    consts: Vec<Value>,
    /// Name table, deduplicated through `name_index`.
    names: Vec<String>,
    name_index: AHashMap<String, u16>,
    /// Offsets that start a statement, mapped to the source line.
    line_starts: BTreeMap<usize, u32>,
}

/// Variable layout and signature of the code being built.
#[derive(Debug, Default)]
pub(crate) struct CodeLayout {
    pub name: String,
    pub varnames: Vec<String>,
    pub cellvars: Vec<String>,
    pub freevars: Vec<String>,
    pub argcount: usize,
    pub flags: CodeFlags,
}

/// A forward jump waiting for its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub(crate) struct JumpLabel(usize);

impl CodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the current offset as the start of a statement on `line`.
    pub fn mark_line(&mut self, line: u32) {
        self.line_starts.insert(self.bytecode.len(), line);
    }

    /// Emits a no-operand instruction.
    pub fn emit(&mut self, op: Opcode) {
        debug_assert_eq!(op.size(), 1, "{op} takes an operand");
        self.bytecode.push(op as u8);
    }

    /// Emits an instruction with a u8 operand.
    pub fn emit_u8(&mut self, op: Opcode, operand: u8) {
        debug_assert_eq!(op.size(), 2, "{op} does not take a u8 operand");
        self.bytecode.push(op as u8);
        self.bytecode.push(operand);
    }

    /// Emits an instruction with a u16 operand (little-endian).
    pub fn emit_u16(&mut self, op: Opcode, operand: u16) {
        debug_assert_eq!(op.size(), 3, "{op} does not take a u16 operand");
        self.bytecode.push(op as u8);
        self.bytecode.extend_from_slice(&operand.to_le_bytes());
    }

    /// Emits a forward jump instruction, returning a label to patch later.
    ///
    /// The jump offset is initially set to 0 and must be patched with
    /// `patch_jump()` once the target location is known.
    pub fn emit_jump(&mut self, op: Opcode) -> JumpLabel {
        let label = JumpLabel(self.bytecode.len());
        self.bytecode.push(op as u8);
        self.bytecode.extend_from_slice(&0i16.to_le_bytes());
        label
    }

    /// Patches a forward jump to point to the current bytecode location.
    ///
    /// The offset is relative to the position after the jump instruction's
    /// operand, i.e. where execution would continue if the jump is not taken.
    ///
    /// # Panics
    ///
    /// Panics if the jump offset exceeds i16 range, which indicates the
    /// function is too large.
    pub fn patch_jump(&mut self, label: JumpLabel) {
        let offset = relative_offset(label.0, self.bytecode.len());
        let bytes = offset.to_le_bytes();
        self.bytecode[label.0 + 1] = bytes[0];
        self.bytecode[label.0 + 2] = bytes[1];
    }

    /// Emits a backward jump to a known target offset.
    ///
    /// # Panics
    ///
    /// Panics if the jump offset exceeds i16 range.
    pub fn emit_jump_to(&mut self, op: Opcode, target: usize) {
        let offset = relative_offset(self.bytecode.len(), target);
        self.bytecode.push(op as u8);
        self.bytecode.extend_from_slice(&offset.to_le_bytes());
    }

    /// Returns the current bytecode offset.
    ///
    /// Use this to record loop start positions for backward jumps.
    pub fn current_offset(&self) -> usize {
        self.bytecode.len()
    }

    /// Adds a constant to the pool, returning its index.
    ///
    /// Returns `None` once the pool holds 65536 entries.
    pub fn add_const(&mut self, value: Value) -> Option<u16> {
        let idx = u16::try_from(self.consts.len()).ok()?;
        self.consts.push(value);
        Some(idx)
    }

    /// Interns a name into the name table, returning its index.
    ///
    /// Returns `None` for a new name once the table holds 65536 entries.
    pub fn add_name(&mut self, name: &str) -> Option<u16> {
        if let Some(&idx) = self.name_index.get(name) {
            return Some(idx);
        }
        let idx = u16::try_from(self.names.len()).ok()?;
        self.names.push(name.to_owned());
        self.name_index.insert(name.to_owned(), idx);
        Some(idx)
    }

    /// Finishes the code object.
    pub fn build(self, layout: CodeLayout) -> Code {
        Code {
            name: layout.name,
            bytecode: self.bytecode,
            consts: self.consts,
            names: self.names,
            varnames: layout.varnames,
            cellvars: layout.cellvars,
            freevars: layout.freevars,
            argcount: layout.argcount,
            flags: layout.flags,
            line_starts: self.line_starts,
        }
    }
}

/// Offset from the end of the 3-byte jump at `jump_at` to `target`.
fn relative_offset(jump_at: usize, target: usize) -> i16 {
    let target = i64::try_from(target).expect("bytecode target exceeds i64");
    let end = i64::try_from(jump_at + Opcode::Jump.size()).expect("bytecode offset exceeds i64");
    i16::try_from(target - end).expect("jump offset exceeds i16 range (-32768..32767); function too large")
}
