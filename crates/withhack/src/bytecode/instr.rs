//! Abstract, editable instruction sequences.
//!
//! A [`Bytecode`] holds [`Instr`]s whose operands are symbolic: names instead
//! of table indices, constant values instead of pool indices and [`Label`]s
//! instead of relative offsets. Sequences are produced from live code by
//! [`Bytecode::from_code`], edited freely, and turned back into an executable
//! [`Code`] by [`Bytecode::materialize`], which never mutates the sequence.

use std::fmt::{self, Write as _};

use ahash::AHashMap;
use indexmap::IndexSet;
use smallvec::SmallVec;

use super::{
    code::{Code, CodeFlags},
    concrete::{self, DecodeError},
    op::{Access, Addressing, OperandKind, Opcode},
};
use crate::value::Value;

/// Symbolic jump target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Symbolic operand of an instruction.
#[derive(Debug, Clone)]
pub enum Arg {
    None,
    /// Element count, argument count or flag byte.
    Int(u16),
    Const(Value),
    /// Variable or attribute name.
    Name(String),
    Jump(Label),
    /// Constant supplied at materialization time, by index into the substitutions.
    Placeholder(usize),
}

/// One abstract instruction.
#[derive(Debug, Clone)]
pub struct Instr {
    pub op: Opcode,
    pub arg: Arg,
    /// Labels bound to this instruction.
    pub labels: SmallVec<[Label; 1]>,
    /// Source line this instruction starts, if any.
    pub line: Option<u32>,
}

impl Instr {
    #[must_use]
    pub fn new(op: Opcode) -> Self {
        Self::with_arg(op, Arg::None)
    }

    #[must_use]
    pub fn with_arg(op: Opcode, arg: Arg) -> Self {
        Self {
            op,
            arg,
            labels: SmallVec::new(),
            line: None,
        }
    }

    #[must_use]
    pub fn name(op: Opcode, name: impl Into<String>) -> Self {
        Self::with_arg(op, Arg::Name(name.into()))
    }

    #[must_use]
    pub fn constant(value: Value) -> Self {
        Self::with_arg(Opcode::LoadConst, Arg::Const(value))
    }

    #[must_use]
    pub fn jump(op: Opcode, target: Label) -> Self {
        Self::with_arg(op, Arg::Jump(target))
    }

    #[must_use]
    pub fn count(op: Opcode, count: u16) -> Self {
        Self::with_arg(op, Arg::Int(count))
    }

    /// Binds `label` to this instruction.
    #[must_use]
    pub fn labeled(mut self, label: Label) -> Self {
        self.labels.push(label);
        self
    }

    /// The variable or attribute name operand, if any.
    #[must_use]
    pub fn name_arg(&self) -> Option<&str> {
        match &self.arg {
            Arg::Name(name) => Some(name),
            _ => None,
        }
    }

    /// Moves this instruction's labels and line marker onto `first`.
    ///
    /// Used when one instruction is replaced by an expansion.
    pub fn transfer_position(&mut self, first: &mut Self) {
        first.labels.extend(self.labels.drain(..));
        if first.line.is_none() {
            first.line = self.line.take();
        }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.op)?;
        match &self.arg {
            Arg::None => Ok(()),
            Arg::Int(n) => write!(f, " {n}"),
            Arg::Const(value) => write!(f, " {}", value.repr()),
            Arg::Name(name) => write!(f, " {name}"),
            Arg::Jump(label) => write!(f, " {label}"),
            Arg::Placeholder(i) => write!(f, " <placeholder {i}>"),
        }
    }
}

/// Error turning an abstract sequence into executable code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssembleError {
    #[error("jump to label {0} that is not bound in the sequence")]
    DanglingLabel(Label),
    #[error("placeholder {0} has no substitution")]
    MissingSubstitution(usize),
    #[error("{op} has an operand of the wrong kind")]
    OperandMismatch { op: Opcode },
    #[error("{0} does not fit its operand")]
    Overflow(&'static str),
}

/// An editable instruction sequence plus the signature it will be materialized with.
#[derive(Debug, Clone, Default)]
pub struct Bytecode {
    pub instrs: Vec<Instr>,
    /// Parameter names in slot order.
    pub argnames: Vec<String>,
    /// Number of positional parameters, excluding `*args` and `**kwargs`.
    pub argcount: usize,
    pub flags: CodeFlags,
    pub name: String,
    /// Labels bound to the end of the sequence.
    trailing: SmallVec<[Label; 1]>,
    next_label: u32,
}

impl Bytecode {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Converts the full code of `code` into abstract form, one instruction per concrete instruction.
    pub fn from_code(code: &Code) -> Result<Self, DecodeError> {
        let concrete = concrete::decode(code)?;
        let mut bytecode = Self::new(code.name());
        bytecode.argnames = code.varnames().iter().take(code.total_params()).cloned().collect();
        bytecode.argcount = code.argcount();
        bytecode.flags = code.flags();

        let mut labels: AHashMap<usize, Label> = AHashMap::new();
        for instr in &concrete {
            if let Some(target) = instr.jump_target() {
                if !labels.contains_key(&target) {
                    let label = bytecode.new_label();
                    labels.insert(target, label);
                }
            }
        }

        let targets = labels.clone();
        let operand_error = |offset| DecodeError::BadOperand { offset };
        for instr in &concrete {
            let index = usize::from(instr.arg);
            let arg = match instr.opcode.operand() {
                OperandKind::None => Arg::None,
                OperandKind::Const => Arg::Const(code.consts().get(index).cloned().ok_or(operand_error(instr.offset))?),
                OperandKind::Name => Arg::Name(code.names().get(index).cloned().ok_or(operand_error(instr.offset))?),
                OperandKind::Local => {
                    Arg::Name(code.varnames().get(index).cloned().ok_or(operand_error(instr.offset))?)
                }
                OperandKind::Cell => Arg::Name(
                    code.cell_name(index)
                        .map(str::to_owned)
                        .ok_or(operand_error(instr.offset))?,
                ),
                OperandKind::Jump => {
                    let label = instr
                        .jump_target()
                        .and_then(|target| targets.get(&target).copied())
                        .ok_or(operand_error(instr.offset))?;
                    Arg::Jump(label)
                }
                OperandKind::Count | OperandKind::Byte => Arg::Int(instr.arg),
            };
            let mut abstract_instr = Instr::with_arg(instr.opcode, arg);
            abstract_instr.line = code.line_start(instr.offset);
            if let Some(label) = labels.remove(&instr.offset) {
                abstract_instr.labels.push(label);
            }
            bytecode.instrs.push(abstract_instr);
        }
        // targets past the last instruction bind to the end; anything else was not an instruction boundary
        if let Some(end) = labels.remove(&code.bytecode().len()) {
            bytecode.trailing.push(end);
        }
        if let Some(&offset) = labels.keys().next() {
            return Err(DecodeError::BadOperand { offset });
        }
        Ok(bytecode)
    }

    /// Allocates a fresh label, unique within this sequence and its slices.
    pub fn new_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    /// Appends an instruction, binding any labels left at the end to it.
    pub fn push(&mut self, mut instr: Instr) {
        instr.labels.extend(self.trailing.drain(..));
        self.instrs.push(instr);
    }

    /// Copies instructions `start..end` into a new sequence with the same signature.
    ///
    /// Labels bound to the instruction at `end` become trailing labels of the slice.
    #[must_use]
    pub fn slice(&self, start: usize, end: usize) -> Self {
        let end = end.min(self.instrs.len());
        let start = start.min(end);
        let trailing = match self.instrs.get(end) {
            Some(instr) => instr.labels.clone(),
            None => self.trailing.clone(),
        };
        Self {
            instrs: self.instrs[start..end].to_vec(),
            argnames: self.argnames.clone(),
            argcount: self.argcount,
            flags: self.flags,
            name: self.name.clone(),
            trailing,
            next_label: self.next_label,
        }
    }

    /// Removes the first `count` instructions, returning them.
    ///
    /// Labels bound to the removed instructions leave with them.
    pub fn drain_front(&mut self, count: usize) -> Vec<Instr> {
        let count = count.min(self.instrs.len());
        self.instrs.drain(..count).collect()
    }

    /// Shortens the sequence to `len` instructions.
    ///
    /// Labels bound to removed instructions are rebound to the end of the sequence.
    pub fn truncate(&mut self, len: usize) {
        if len >= self.instrs.len() {
            return;
        }
        for instr in self.instrs.drain(len..) {
            self.trailing.extend(instr.labels);
        }
    }

    /// Drops labels bound to the end of the sequence that no jump in it targets.
    pub fn prune_trailing(&mut self) {
        let instrs = &self.instrs;
        self.trailing
            .retain(|label| instrs.iter().any(|i| matches!(i.arg, Arg::Jump(target) if target == *label)));
    }

    /// Returns an empty sequence sharing this one's signature and label space.
    #[must_use]
    pub fn empty_like(&self) -> Self {
        Self {
            instrs: Vec::new(),
            argnames: self.argnames.clone(),
            argcount: self.argcount,
            flags: self.flags,
            name: self.name.clone(),
            trailing: SmallVec::new(),
            next_label: self.next_label,
        }
    }

    /// One line of text per instruction, with labels as prefixes.
    #[must_use]
    pub fn listing(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .instrs
            .iter()
            .map(|instr| {
                let mut line = String::new();
                for label in &instr.labels {
                    let _ = write!(line, "{label}: ");
                }
                let _ = write!(line, "{instr}");
                line
            })
            .collect();
        if !self.trailing.is_empty() {
            let mut line = String::new();
            for label in &self.trailing {
                let _ = write!(line, "{label}: ");
            }
            lines.push(line.trim_end().to_owned());
        }
        lines
    }

    /// Converts the sequence into executable code.
    ///
    /// `Arg::Placeholder(i)` operands become `substitutions[i]`. Local slots
    /// are the parameters followed by every other slot name in order of first
    /// use; cell names become free variables.
    pub fn materialize(&self, substitutions: &[Value]) -> Result<Code, AssembleError> {
        let mut varnames: IndexSet<String> = self.argnames.iter().cloned().collect();
        let mut freevars: IndexSet<String> = IndexSet::new();
        let mut names: IndexSet<String> = IndexSet::new();
        let mut consts: Vec<Value> = Vec::new();

        let mut offsets = Vec::with_capacity(self.instrs.len());
        let mut targets: AHashMap<Label, usize> = AHashMap::new();
        let mut offset = 0;
        for instr in &self.instrs {
            for label in &instr.labels {
                targets.insert(*label, offset);
            }
            offsets.push(offset);
            offset += instr.op.size();
        }
        for label in &self.trailing {
            targets.insert(*label, offset);
        }

        let mut encoded = Vec::with_capacity(self.instrs.len());
        let mut line_starts = std::collections::BTreeMap::new();
        for (instr, &at) in self.instrs.iter().zip(&offsets) {
            if let Some(line) = instr.line {
                line_starts.insert(at, line);
            }
            let mismatch = || AssembleError::OperandMismatch { op: instr.op };
            let operand: Option<u16> = match (instr.op.operand(), &instr.arg) {
                (OperandKind::None, Arg::None) => None,
                (OperandKind::Const, Arg::Const(value)) => {
                    consts.push(value.clone());
                    Some(table_index(consts.len() - 1, "constant pool")?)
                }
                (OperandKind::Const, Arg::Placeholder(i)) => {
                    let value = substitutions.get(*i).ok_or(AssembleError::MissingSubstitution(*i))?;
                    consts.push(value.clone());
                    Some(table_index(consts.len() - 1, "constant pool")?)
                }
                (OperandKind::Name, Arg::Name(name)) => Some(table_index(names.insert_full(name.clone()).0, "name table")?),
                (OperandKind::Local, Arg::Name(name)) => {
                    Some(table_index(varnames.insert_full(name.clone()).0, "local slots")?)
                }
                (OperandKind::Cell, Arg::Name(name)) => {
                    Some(table_index(freevars.insert_full(name.clone()).0, "cell table")?)
                }
                (OperandKind::Jump, Arg::Jump(label)) => {
                    let target = *targets.get(label).ok_or(AssembleError::DanglingLabel(*label))?;
                    Some(relative_jump(at, instr.op, target)?)
                }
                (OperandKind::Count, Arg::Int(n)) => Some(*n),
                (OperandKind::Byte, Arg::Int(n)) => {
                    u8::try_from(*n).map_err(|_| AssembleError::Overflow("byte operand"))?;
                    Some(*n)
                }
                _ => return Err(mismatch()),
            };
            encoded.push(concrete::ConcreteInstr {
                offset: at,
                opcode: instr.op,
                arg: operand.unwrap_or(0),
            });
        }
        let bytes = concrete::encode(&encoded);

        let mut flags = self.flags;
        if freevars.is_empty() {
            flags.remove(CodeFlags::NESTED);
        } else {
            flags.insert(CodeFlags::NESTED);
        }
        log::debug!(
            "materialized <{}>: {} instructions, {} bytes",
            self.name,
            self.instrs.len(),
            bytes.len()
        );
        Ok(Code {
            name: self.name.clone(),
            bytecode: bytes,
            consts,
            names: names.into_iter().collect(),
            varnames: varnames.into_iter().collect(),
            cellvars: Vec::new(),
            freevars: freevars.into_iter().collect(),
            argcount: self.argcount,
            flags,
            line_starts,
        })
    }

    /// Names stored by local or name-indexed stores, in instruction order.
    ///
    /// Cell stores are not included, so a name a nested function closes over
    /// is never reported.
    pub fn stored_names(&self) -> impl Iterator<Item = &str> {
        self.instrs.iter().filter_map(|instr| match instr.op.variable_access() {
            Some((Access::Store, Addressing::Fast | Addressing::Name)) => instr.name_arg(),
            _ => None,
        })
    }
}

impl fmt::Display for Bytecode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "<{}>({}):", self.name, self.argnames.join(", "))?;
        for line in self.listing() {
            writeln!(f, "  {line}")?;
        }
        Ok(())
    }
}

fn table_index(index: usize, table: &'static str) -> Result<u16, AssembleError> {
    u16::try_from(index).map_err(|_| AssembleError::Overflow(table))
}

fn relative_jump(at: usize, op: Opcode, target: usize) -> Result<u16, AssembleError> {
    let end = i64::try_from(at + op.size()).map_err(|_| AssembleError::Overflow("jump offset"))?;
    let target = i64::try_from(target).map_err(|_| AssembleError::Overflow("jump offset"))?;
    let relative = i16::try_from(target - end).map_err(|_| AssembleError::Overflow("jump offset"))?;
    Ok(u16::from_le_bytes(relative.to_le_bytes()))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::bytecode::compile;

    #[test]
    fn from_code_keeps_one_instruction_per_concrete_instruction() {
        let code = compile("x = 0\nwhile x < 3:\n    x = x + 1\n", "<module>").unwrap();
        let bytecode = Bytecode::from_code(&code).unwrap();
        assert_eq!(bytecode.len(), concrete::decode(&code).unwrap().len());
        let rebuilt = bytecode.materialize(&[]).unwrap();
        assert_eq!(rebuilt.bytecode(), code.bytecode());
    }

    #[test]
    fn placeholders_are_bound_at_materialization() {
        let mut bytecode = Bytecode::new("<as clause>");
        bytecode.push(Instr::with_arg(Opcode::LoadConst, Arg::Placeholder(0)));
        bytecode.push(Instr::new(Opcode::ReturnValue));
        let code = bytecode.materialize(&[Value::Int(42)]).unwrap();
        assert!(matches!(code.consts(), [Value::Int(42)]));
        assert_eq!(bytecode.materialize(&[]).unwrap_err(), AssembleError::MissingSubstitution(0));
    }

    #[test]
    fn truncated_labels_bind_to_the_end() {
        let mut bytecode = Bytecode::new("<withhack>");
        let end = bytecode.new_label();
        bytecode.push(Instr::jump(Opcode::Jump, end));
        bytecode.push(Instr::new(Opcode::PopBlock).labeled(end));
        bytecode.truncate(1);
        assert_eq!(bytecode.listing(), vec!["Jump L0".to_owned(), "L0:".to_owned()]);
        bytecode.push(Instr::constant(Value::None));
        bytecode.push(Instr::new(Opcode::ReturnValue));
        let code = bytecode.materialize(&[]).unwrap();
        let jump = concrete::decode(&code).unwrap()[0];
        assert_eq!(jump.jump_target(), Some(3));
    }

    #[test]
    fn dangling_labels_are_rejected() {
        let mut source = Bytecode::new("<withhack>");
        let label = source.new_label();
        let mut bytecode = source.empty_like();
        bytecode.push(Instr::jump(Opcode::Jump, label));
        assert_eq!(bytecode.materialize(&[]).unwrap_err(), AssembleError::DanglingLabel(label));
    }

    #[test]
    fn slot_names_follow_parameters() {
        let mut bytecode = Bytecode::new("f");
        bytecode.argnames = vec!["a".to_owned()];
        bytecode.argcount = 1;
        bytecode.push(Instr::name(Opcode::LoadFast, "b"));
        bytecode.push(Instr::name(Opcode::LoadFast, "a"));
        bytecode.push(Instr::new(Opcode::ReturnValue));
        let code = bytecode.materialize(&[]).unwrap();
        assert_eq!(code.varnames(), &["a".to_owned(), "b".to_owned()]);
    }
}
