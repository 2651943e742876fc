//! Fixed-layout instruction view of raw bytecode.
//!
//! A [`ConcreteInstr`] is one decoded instruction with its raw operand still
//! an index into the code's tables. Decoding and encoding are exact inverses.

use super::{
    Code,
    op::{OperandKind, Opcode},
};

/// One decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcreteInstr {
    /// Byte offset of the opcode.
    pub offset: usize,
    pub opcode: Opcode,
    /// Raw operand; jump offsets are stored as their two's-complement bits.
    pub arg: u16,
}

impl ConcreteInstr {
    /// Encoded size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.opcode.size()
    }

    /// Absolute target offset of a jump instruction.
    #[must_use]
    pub fn jump_target(&self) -> Option<usize> {
        if self.opcode.operand() != OperandKind::Jump {
            return None;
        }
        let relative = i64::from(i16::from_le_bytes(self.arg.to_le_bytes()));
        let end = i64::try_from(self.offset + self.size()).ok()?;
        usize::try_from(end + relative).ok()
    }
}

/// Error decoding raw bytecode.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown opcode byte {byte:#04x} at offset {offset}")]
    UnknownOpcode { offset: usize, byte: u8 },
    #[error("instruction at offset {offset} is truncated")]
    Truncated { offset: usize },
    #[error("operand of the instruction at offset {offset} is out of range")]
    BadOperand { offset: usize },
}

/// Decodes the full bytecode of `code` into concrete instructions.
pub fn decode(code: &Code) -> Result<Vec<ConcreteInstr>, DecodeError> {
    decode_bytes(code.bytecode())
}

pub(crate) fn decode_bytes(bytes: &[u8]) -> Result<Vec<ConcreteInstr>, DecodeError> {
    let mut instrs = Vec::new();
    let mut offset = 0;
    while offset < bytes.len() {
        let byte = bytes[offset];
        let opcode = Opcode::from_repr(byte).ok_or(DecodeError::UnknownOpcode { offset, byte })?;
        let operand = bytes
            .get(offset + 1..offset + opcode.size())
            .ok_or(DecodeError::Truncated { offset })?;
        let arg = match *operand {
            [] => 0,
            [b] => u16::from(b),
            [lo, hi] => u16::from_le_bytes([lo, hi]),
            _ => return Err(DecodeError::Truncated { offset }),
        };
        instrs.push(ConcreteInstr { offset, opcode, arg });
        offset += opcode.size();
    }
    Ok(instrs)
}

/// Encodes instructions back into raw bytes, ignoring their recorded offsets.
#[must_use]
pub fn encode(instrs: &[ConcreteInstr]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(instrs.iter().map(ConcreteInstr::size).sum());
    for instr in instrs {
        bytes.push(instr.opcode as u8);
        match instr.opcode.operand().width() {
            0 => {}
            1 => bytes.push(instr.arg.to_le_bytes()[0]),
            _ => bytes.extend_from_slice(&instr.arg.to_le_bytes()),
        }
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_reports_offsets_and_jump_targets() {
        // LoadConst 0; PopJumpIfFalse +1; Pop; ReturnValue
        let bytes = [Opcode::LoadConst as u8, 0, 0, Opcode::PopJumpIfFalse as u8, 1, 0, Opcode::Pop as u8, Opcode::ReturnValue as u8];
        let instrs = decode_bytes(&bytes).unwrap();
        let offsets: Vec<_> = instrs.iter().map(|i| i.offset).collect();
        assert_eq!(offsets, vec![0, 3, 6, 7]);
        assert_eq!(instrs[1].jump_target(), Some(7));
        assert_eq!(encode(&instrs), bytes.to_vec());
    }

    #[test]
    fn backward_jump_offsets_are_signed() {
        let back = (-3i16).to_le_bytes();
        let bytes = [Opcode::Jump as u8, back[0], back[1]];
        let instrs = decode_bytes(&bytes).unwrap();
        assert_eq!(instrs[0].jump_target(), Some(0));
    }

    #[test]
    fn truncated_and_unknown_bytes_are_errors() {
        assert_eq!(
            decode_bytes(&[Opcode::LoadConst as u8, 0]),
            Err(DecodeError::Truncated { offset: 0 })
        );
        assert!(matches!(decode_bytes(&[0xff]), Err(DecodeError::UnknownOpcode { offset: 0, .. })));
    }
}
