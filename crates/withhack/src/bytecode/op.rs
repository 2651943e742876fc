//! Opcode definitions for the bytecode VM.
//!
//! Every instruction is one opcode byte followed by zero, one or two operand
//! bytes. The operand width is a property of the opcode alone (see
//! [`Opcode::operand`]), which keeps decoding a simple linear scan.

use strum::{Display, FromRepr, IntoStaticStr};

/// Kind of operand an opcode carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// No operand.
    None,
    /// u16 index into the constant pool.
    Const,
    /// u16 index into the name table (name-indexed, global and attribute operands).
    Name,
    /// u16 index into `varnames` (local slots).
    Local,
    /// u16 index into `cellvars ++ freevars`.
    Cell,
    /// i16 offset relative to the end of the instruction.
    Jump,
    /// u16 element count.
    Count,
    /// u8 argument count or flag byte.
    Byte,
}

impl OperandKind {
    /// Number of operand bytes following the opcode.
    #[must_use]
    pub const fn width(self) -> usize {
        match self {
            Self::None => 0,
            Self::Byte => 1,
            Self::Const | Self::Name | Self::Local | Self::Cell | Self::Jump | Self::Count => 2,
        }
    }
}

/// How a variable access addresses its storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Addressing {
    /// Local slot (`*Fast`).
    Fast,
    /// Closure cell (`*Deref`).
    Deref,
    /// Name-indexed locals, falling back to globals and builtins on load (`*Name`).
    Name,
    /// Module globals, falling back to builtins on load (`*Global`).
    Global,
}

/// What a variable access does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    Load,
    Store,
    Delete,
}

/// Bytecode opcodes.
///
/// Uses `#[repr(u8)]` so the discriminant is the encoded byte; `FromRepr`
/// provides the checked decoding direction.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, FromRepr, IntoStaticStr)]
pub enum Opcode {
    // === Stack manipulation ===
    Nop,
    /// Discards TOS.
    Pop,
    /// Duplicates TOS.
    Dup,
    /// Swaps the two top items.
    Rot2,
    /// Lifts the second and third items up one position, moving TOS down to third.
    Rot3,

    // === Constants and variables ===
    LoadConst,
    LoadFast,
    StoreFast,
    DeleteFast,
    LoadDeref,
    StoreDeref,
    DeleteDeref,
    /// Pushes the cell object itself, for building closures.
    LoadClosure,
    LoadName,
    StoreName,
    DeleteName,
    LoadGlobal,
    StoreGlobal,
    DeleteGlobal,

    // === Attributes and subscripts ===
    /// `TOS = TOS.name`
    LoadAttr,
    /// `TOS.name = TOS1`
    StoreAttr,
    /// `del TOS.name`
    DeleteAttr,
    /// `TOS = TOS1[TOS]`
    LoadSubscr,
    /// `TOS1[TOS] = TOS2`
    StoreSubscr,
    /// `del TOS1[TOS]`
    DeleteSubscr,

    // === Operators ===
    BinaryAdd,
    BinarySub,
    BinaryMul,
    BinaryTrueDiv,
    BinaryFloorDiv,
    BinaryMod,
    UnaryNot,
    UnaryNeg,
    CompareEq,
    CompareNe,
    CompareLt,
    CompareLe,
    CompareGt,
    CompareGe,
    CompareIn,
    CompareNotIn,
    CompareIs,
    CompareIsNot,
    /// Pops an exception type and an exception, pushes whether the exception matches.
    CompareExcMatch,

    // === Control flow ===
    Jump,
    PopJumpIfFalse,
    PopJumpIfTrue,
    /// Jumps keeping TOS if it is falsy, otherwise pops it.
    JumpIfFalseOrPop,
    /// Jumps keeping TOS if it is truthy, otherwise pops it.
    JumpIfTrueOrPop,
    /// Replaces an iterable with its iterator.
    GetIter,
    /// Pushes the next item, or pops the iterator and jumps once exhausted.
    ForIter,
    ReturnValue,
    /// Raises TOS (an exception instance or type).
    Raise,
    /// Re-raises the exception on TOS inside a handler.
    Reraise,

    // === Blocks ===
    /// Pushes an except block whose handler is the jump target.
    SetupExcept,
    /// Setup marker of a with-block.
    ///
    /// Pops the manager, calls its `enter`, pushes the manager back, pushes a
    /// with block whose handler is the jump target, then pushes the result.
    SetupWith,
    /// Teardown marker: pops the innermost block.
    PopBlock,
    /// Normal exit of a with-block: pops the manager and calls its `exit` without exception.
    ExitWith,
    /// Exceptional exit of a with-block: pops the exception and the manager,
    /// calls `exit` with the exception, and re-raises it unless `exit` returned true.
    WithExcept,

    // === Construction and calls ===
    BuildList,
    BuildTuple,
    /// Builds a dict from `count` key/value pairs.
    BuildDict,
    /// Unpacks TOS into `count` items, first item on top.
    UnpackSequence,
    /// Calls with `n` positional arguments: `[func, args...]`.
    CallFunction,
    /// Calls with `n` arguments whose trailing ones are keywords:
    /// `[func, args..., kwvalues..., kwnames-tuple]`.
    CallFunctionKw,
    /// Builds a function from `[defaults-tuple?, closure-tuple?, code]`.
    ///
    /// Flag bit 0 marks a defaults tuple, bit 1 a closure tuple.
    MakeFunction,
}

impl Opcode {
    /// Returns the kind of operand this opcode carries.
    #[must_use]
    pub const fn operand(self) -> OperandKind {
        match self {
            Self::LoadConst => OperandKind::Const,
            Self::LoadFast | Self::StoreFast | Self::DeleteFast => OperandKind::Local,
            Self::LoadDeref | Self::StoreDeref | Self::DeleteDeref | Self::LoadClosure => OperandKind::Cell,
            Self::LoadName
            | Self::StoreName
            | Self::DeleteName
            | Self::LoadGlobal
            | Self::StoreGlobal
            | Self::DeleteGlobal
            | Self::LoadAttr
            | Self::StoreAttr
            | Self::DeleteAttr => OperandKind::Name,
            Self::Jump
            | Self::PopJumpIfFalse
            | Self::PopJumpIfTrue
            | Self::JumpIfFalseOrPop
            | Self::JumpIfTrueOrPop
            | Self::ForIter
            | Self::SetupExcept
            | Self::SetupWith => OperandKind::Jump,
            Self::BuildList | Self::BuildTuple | Self::BuildDict | Self::UnpackSequence => OperandKind::Count,
            Self::CallFunction | Self::CallFunctionKw | Self::MakeFunction => OperandKind::Byte,
            _ => OperandKind::None,
        }
    }

    /// Encoded size of the instruction in bytes.
    #[must_use]
    pub const fn size(self) -> usize {
        1 + self.operand().width()
    }

    /// Checks whether this opcode stores into a variable, attribute or subscript.
    #[must_use]
    pub const fn is_store(self) -> bool {
        matches!(
            self,
            Self::StoreFast | Self::StoreDeref | Self::StoreName | Self::StoreGlobal | Self::StoreAttr | Self::StoreSubscr
        )
    }

    /// Decomposes a plain variable access into what it does and how it addresses storage.
    #[must_use]
    pub const fn variable_access(self) -> Option<(Access, Addressing)> {
        Some(match self {
            Self::LoadFast => (Access::Load, Addressing::Fast),
            Self::StoreFast => (Access::Store, Addressing::Fast),
            Self::DeleteFast => (Access::Delete, Addressing::Fast),
            Self::LoadDeref => (Access::Load, Addressing::Deref),
            Self::StoreDeref => (Access::Store, Addressing::Deref),
            Self::DeleteDeref => (Access::Delete, Addressing::Deref),
            Self::LoadName => (Access::Load, Addressing::Name),
            Self::StoreName => (Access::Store, Addressing::Name),
            Self::DeleteName => (Access::Delete, Addressing::Name),
            Self::LoadGlobal => (Access::Load, Addressing::Global),
            Self::StoreGlobal => (Access::Store, Addressing::Global),
            Self::DeleteGlobal => (Access::Delete, Addressing::Global),
            _ => return None,
        })
    }

    /// Inverse of [`Opcode::variable_access`].
    #[must_use]
    pub const fn for_variable(access: Access, addressing: Addressing) -> Self {
        match (access, addressing) {
            (Access::Load, Addressing::Fast) => Self::LoadFast,
            (Access::Store, Addressing::Fast) => Self::StoreFast,
            (Access::Delete, Addressing::Fast) => Self::DeleteFast,
            (Access::Load, Addressing::Deref) => Self::LoadDeref,
            (Access::Store, Addressing::Deref) => Self::StoreDeref,
            (Access::Delete, Addressing::Deref) => Self::DeleteDeref,
            (Access::Load, Addressing::Name) => Self::LoadName,
            (Access::Store, Addressing::Name) => Self::StoreName,
            (Access::Delete, Addressing::Name) => Self::DeleteName,
            (Access::Load, Addressing::Global) => Self::LoadGlobal,
            (Access::Store, Addressing::Global) => Self::StoreGlobal,
            (Access::Delete, Addressing::Global) => Self::DeleteGlobal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repr_round_trips_through_from_repr() {
        for byte in 0..=u8::MAX {
            if let Some(op) = Opcode::from_repr(byte) {
                assert_eq!(op as u8, byte);
            }
        }
        assert_eq!(Opcode::from_repr(Opcode::MakeFunction as u8), Some(Opcode::MakeFunction));
    }

    #[test]
    fn variable_access_is_invertible() {
        for op in [Opcode::LoadFast, Opcode::StoreDeref, Opcode::DeleteName, Opcode::LoadGlobal] {
            let (access, addressing) = op.variable_access().unwrap();
            assert_eq!(Opcode::for_variable(access, addressing), op);
        }
        assert_eq!(Opcode::LoadClosure.variable_access(), None);
        assert_eq!(Opcode::SetupWith.size(), 3);
        assert_eq!(Opcode::CallFunction.size(), 2);
        assert_eq!(Opcode::PopBlock.size(), 1);
    }
}
