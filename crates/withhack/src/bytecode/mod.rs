//! Bytecode representation, compiler and virtual machine.
//!
//! # Module Structure
//!
//! - `op` - Opcode enum definitions
//! - `code` - Code object containing bytecode and metadata
//! - `concrete` - fixed-layout decoding and encoding of raw bytecode
//! - `instr` - abstract, editable instruction sequences
//! - `builder` - CodeBuilder for emitting bytecode during compilation
//! - `symbols` - scope analysis feeding the compiler
//! - `compiler` - AST to bytecode compiler
//! - `vm` - Virtual machine for bytecode execution

pub use code::{Code, CodeFlags};
pub use compiler::compile;
pub use concrete::{ConcreteInstr, DecodeError, decode, encode};
pub use instr::{Arg, AssembleError, Bytecode, Instr, Label};
pub use op::{Access, Addressing, OperandKind, Opcode};
pub use vm::{Block, BlockKind, Frame, FrameId, VM};
pub(crate) use vm::attr;

mod builder;
mod code;
mod compiler;
mod concrete;
mod instr;
mod op;
mod symbols;
mod vm;
