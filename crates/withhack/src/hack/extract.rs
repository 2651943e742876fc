//! Abstract instruction sequences from live frames.

use crate::{
    bytecode::{Bytecode, Code, ConcreteInstr, FrameId, decode},
    host::Host,
};

use super::HackError;

/// Extracts the instructions of `context`'s code between two raw offsets.
///
/// `start` and `end` are byte offsets as reported by [`Frame::lasti`]; the
/// result covers the instructions from the one containing `start` up to,
/// but not including, the one containing `end`.
///
/// [`Frame::lasti`]: crate::bytecode::Frame::lasti
pub fn extract(host: &dyn Host, context: FrameId, start: usize, end: usize) -> Result<Bytecode, HackError> {
    let frame = host.frame(context).ok_or(HackError::FrameGone(context))?;
    extract_code(frame.code(), start, end)
}

/// Extracts the instructions of `code` between two raw offsets.
pub fn extract_code(code: &Code, start: usize, end: usize) -> Result<Bytecode, HackError> {
    let concrete = decode(code)?;
    let first = instruction_index(&concrete, start);
    let last = instruction_index(&concrete, end).max(first);
    let bytecode = Bytecode::from_code(code)?;
    log::debug!(
        "extracted <{}> offsets {start}..{end} as instructions {first}..{last}",
        code.name()
    );
    Ok(bytecode.slice(first, last))
}

/// Extracts every instruction of `context`'s code.
pub fn extract_all(host: &dyn Host, context: FrameId) -> Result<Bytecode, HackError> {
    let frame = host.frame(context).ok_or(HackError::FrameGone(context))?;
    Ok(Bytecode::from_code(frame.code())?)
}

/// Index of the instruction containing byte `offset`, or the instruction count past the end.
fn instruction_index(concrete: &[ConcreteInstr], offset: usize) -> usize {
    concrete.partition_point(|instr| instr.offset + instr.size() <= offset)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use std::sync::Arc;

    use super::*;
    use crate::{
        bytecode::{Opcode, VM, compile},
        config::VmConfig,
        exception::ExcType,
        function::NativeFunction,
        io::NoPrint,
        namespace::Scope,
        tracer::NoopTracer,
        value::Value,
    };

    fn sample() -> Code {
        compile("x = 1\ny = x + 2\n", "<module>").unwrap()
    }

    #[test]
    fn slices_whole_instructions() {
        let code = sample();
        let concrete = decode(&code).unwrap();
        let third = concrete[2].offset;
        let bytecode = extract_code(&code, 0, third).unwrap();
        assert_eq!(bytecode.len(), 2);
        assert_eq!(bytecode.instrs[0].op, concrete[0].opcode);
        assert_eq!(bytecode.instrs[1].op, concrete[1].opcode);
    }

    #[test]
    fn offsets_inside_an_instruction_round_down() {
        let code = sample();
        let concrete = decode(&code).unwrap();
        let wide = concrete.iter().position(|i| i.size() > 1).unwrap();
        let inside = concrete[wide].offset + 1;
        let bytecode = extract_code(&code, inside, code.bytecode().len()).unwrap();
        assert_eq!(bytecode.len(), concrete.len() - wide);
        assert_eq!(bytecode.instrs[0].op, concrete[wide].opcode);
    }

    #[test]
    fn full_range_matches_decoded_length() {
        let code = sample();
        let bytecode = extract_code(&code, 0, code.bytecode().len()).unwrap();
        assert_eq!(bytecode.len(), decode(&code).unwrap().len());
        assert_eq!(bytecode.instrs.last().map(|i| i.op), Some(Opcode::ReturnValue));
    }

    #[test]
    fn reversed_range_is_empty() {
        let code = sample();
        assert!(extract_code(&code, 6, 0).unwrap().is_empty());
    }

    #[test]
    fn whole_code_of_a_live_frame() {
        let code = Arc::new(compile("x = 1\nn = instructions()\n", "<module>").unwrap());
        let expected = i64::try_from(decode(&code).unwrap().len()).unwrap();
        let builtins = Scope::new();
        builtins.set(
            "instructions",
            NativeFunction::value("instructions", |host, args| {
                args.check_positional("instructions", 0, 0)?;
                let frame = host
                    .current_frame()
                    .ok_or_else(|| ExcType::SystemError.err("no running frame"))?;
                let whole = extract_all(&*host, frame)?;
                Ok(Value::Int(i64::try_from(whole.len()).unwrap_or(i64::MAX)))
            }),
        );
        let globals = Scope::new();
        let mut print = NoPrint;
        let mut vm = VM::new(&mut print, NoopTracer, VmConfig::default(), builtins);
        vm.run_module(code, globals.clone()).unwrap();
        assert_eq!(globals.get("n").and_then(|n| n.as_int()), Some(expected));
        assert!(matches!(extract_all(&vm, FrameId::next()), Err(HackError::FrameGone(_))));
    }
}
