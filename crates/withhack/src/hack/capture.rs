//! Capturing a with-block's instructions and replaying its as-clause.

use std::sync::Arc;

use ahash::AHashSet;
use indexmap::IndexMap;

use crate::{
    bytecode::{Arg, Bytecode, CodeFlags, Instr, Opcode},
    exception::{Exception, RunResult},
    host::Host,
    value::Value,
};

use super::{BlockCx, HackBase, HackError, WithHack, extract, rewrite_for_function};

/// Display name of the code synthesized to replay an as-clause.
pub const AS_CLAUSE_NAME: &str = "<as clause>";

/// A hack that captures the instructions of the block it guards.
///
/// The body is skipped unless the base forces execution. After exit,
/// [`bytecode`](Self::bytecode) holds the body without the setup and teardown
/// instructions and [`as_clause`](Self::as_clause) the instructions binding
/// the `as` target.
#[derive(Debug, Clone)]
pub struct CaptureBytecode {
    base: HackBase,
    start: Option<usize>,
    body: Option<Bytecode>,
    as_clause: Option<Bytecode>,
}

impl CaptureBytecode {
    #[must_use]
    pub fn new(base: HackBase) -> Self {
        Self {
            base,
            start: None,
            body: None,
            as_clause: None,
        }
    }

    /// A body-skipping capture bound to the current frame of `host`.
    #[must_use]
    pub fn for_current_frame(host: &dyn Host) -> Self {
        Self::new(HackBase::for_current_frame(host).dont_execute(true))
    }

    #[must_use]
    pub fn base(&self) -> &HackBase {
        &self.base
    }

    /// The captured body, once the block has exited.
    #[must_use]
    pub fn bytecode(&self) -> Option<&Bytecode> {
        self.body.as_ref()
    }

    /// The captured as-clause, once the block has exited.
    #[must_use]
    pub fn as_clause(&self) -> Option<&Bytecode> {
        self.as_clause.as_ref()
    }

    /// Enters the base and records where the block starts.
    pub fn begin(&mut self, cx: &mut BlockCx<'_>) -> Result<(), HackError> {
        self.base.enter(cx)?;
        let context = self.base.require_context()?;
        let frame = cx.host.frame(context).ok_or(HackError::FrameGone(context))?;
        self.start = Some(frame.lasti());
        self.body = None;
        self.as_clause = None;
        Ok(())
    }

    /// Captures the block unless a script exception is leaving it, then exits the base.
    ///
    /// Returns whether `exc` must be swallowed.
    pub fn finish(&mut self, cx: &mut BlockCx<'_>, exc: Option<&Exception>) -> Result<bool, HackError> {
        if exc.is_none_or(Exception::is_block_skip) {
            self.capture(cx)?;
        }
        Ok(self.base.exit(exc))
    }

    fn capture(&mut self, cx: &mut BlockCx<'_>) -> Result<(), HackError> {
        let context = self.base.require_context()?;
        let start = self
            .start
            .ok_or_else(|| HackError::MalformedBlock("capture was never started".to_owned()))?;
        let end = cx.host.frame(context).ok_or(HackError::FrameGone(context))?.lasti();
        let (as_clause, body) = split_block(extract(&*cx.host, context, start, end)?)?;
        log::debug!(
            "captured block of {context}: {} as-clause and {} body instruction(s)",
            as_clause.len(),
            body.len()
        );
        self.as_clause = Some(as_clause);
        self.body = Some(body);
        Ok(())
    }

    /// Binds `value` the way the block's as-clause would have.
    pub fn run_as_clause(&self, cx: &mut BlockCx<'_>, value: Value) -> RunResult<()> {
        let clause = self
            .as_clause
            .as_ref()
            .ok_or_else(|| HackError::MalformedBlock("no block was captured".to_owned()))?;
        if let [only] = clause.instrs.as_slice() {
            match (only.op, only.name_arg()) {
                (Opcode::StoreFast | Opcode::StoreDeref, Some(name)) => {
                    let bindings = IndexMap::from([(name.to_owned(), value)]);
                    return Ok(self.base.set_context_locals(cx, bindings)?);
                }
                // anonymous block; the value is dropped
                (Opcode::Pop, _) => return Ok(()),
                _ => {}
            }
        }
        if let Some(store) = clause
            .instrs
            .iter()
            .find(|i| matches!(i.op, Opcode::StoreFast | Opcode::StoreDeref))
        {
            return Err(HackError::UnsupportedTarget(format!("{store} inside a compound target")).into());
        }

        let context = self.base.require_context()?;
        let frame = cx.host.frame_mut(context).ok_or(HackError::FrameGone(context))?;
        let locals = frame.locals_scope();
        let globals = frame.globals().clone();
        let existing: AHashSet<String> = locals.names().into_iter().collect();

        let mut code = clause.empty_like();
        code.name = AS_CLAUSE_NAME.to_owned();
        code.argnames.clear();
        code.argcount = 0;
        code.flags = CodeFlags::empty();
        code.push(Instr::with_arg(Opcode::LoadConst, Arg::Placeholder(0)));
        for instr in &clause.instrs {
            code.push(instr.clone());
        }
        code.push(Instr::constant(Value::None));
        code.push(Instr::new(Opcode::ReturnValue));
        rewrite_for_function(&mut code, &[], &existing);

        let code = code.materialize(&[value]).map_err(HackError::from)?;
        log::debug!("replaying as-clause in {context}");
        cx.host.execute(Arc::new(code), globals, locals)?;
        Ok(())
    }
}

impl WithHack for CaptureBytecode {
    fn kind(&self) -> &'static str {
        "CaptureBytecode"
    }

    fn enter(&mut self, cx: &mut BlockCx<'_>) -> RunResult<Value> {
        self.begin(cx)?;
        Ok(cx.this_value())
    }

    fn exit(&mut self, cx: &mut BlockCx<'_>, exc: Option<&Exception>) -> RunResult<bool> {
        Ok(self.finish(cx, exc)?)
    }

    fn attribute(&self, name: &str) -> Option<Value> {
        match name {
            "bytecode" => self.bytecode().map(listing_value),
            _ => None,
        }
    }
}

/// The instruction listing of `bytecode` as a list of strings.
#[must_use]
pub fn listing_value(bytecode: &Bytecode) -> Value {
    Value::list(bytecode.listing().into_iter().map(Value::from).collect())
}

/// Splits the instructions of a with-statement into its as-clause and body.
///
/// `seq` starts at or before the block's `SetupWith`. Everything through
/// `SetupWith` is dropped, the as-clause runs until the value is fully bound
/// and the body ends before the last `PopBlock`.
pub fn split_block(mut seq: Bytecode) -> Result<(Bytecode, Bytecode), HackError> {
    let setup = seq
        .instrs
        .iter()
        .position(|i| i.op == Opcode::SetupWith)
        .ok_or_else(|| HackError::MalformedBlock("no SetupWith at the start of the block".to_owned()))?;
    seq.drain_front(setup + 1);

    let clause_len = as_clause_len(&seq.instrs)
        .ok_or_else(|| HackError::MalformedBlock("the entered value is never bound".to_owned()))?;
    let mut clause = seq.empty_like();
    for instr in seq.drain_front(clause_len) {
        clause.push(instr);
    }

    let teardown = seq
        .instrs
        .iter()
        .rposition(|i| i.op == Opcode::PopBlock)
        .ok_or_else(|| HackError::MalformedBlock("no PopBlock at the end of the block".to_owned()))?;
    seq.truncate(teardown);
    seq.prune_trailing();
    Ok((clause, seq))
}

/// Length of the as-clause: through the first store or discard, or through
/// the store binding the last element when the target unpacks.
fn as_clause_len(instrs: &[Instr]) -> Option<usize> {
    let mut unbound = 1usize;
    for (i, instr) in instrs.iter().enumerate() {
        match (instr.op, &instr.arg) {
            (Opcode::UnpackSequence, Arg::Int(n)) => unbound = unbound + usize::from(*n) - 1,
            (op, _) if op.is_store() || op == Opcode::Pop => unbound -= 1,
            _ => continue,
        }
        if unbound == 0 {
            return Some(i + 1);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use parking_lot::Mutex;

    use super::*;
    use crate::{
        bytecode::{Code, FrameId, VM, compile, decode},
        config::VmConfig,
        exception::ExcType,
        hack::HackRef,
        io::NoPrint,
        namespace::Scope,
        tracer::NoopTracer,
    };

    fn block_of(source: &str) -> Bytecode {
        let code: Code = compile(source, "<module>").unwrap();
        let concrete = decode(&code).unwrap();
        let start = concrete.iter().find(|i| i.opcode == Opcode::SetupWith).unwrap().offset;
        let end = concrete.iter().find(|i| i.opcode == Opcode::ExitWith).unwrap().offset;
        super::super::extract_code(&code, start, end).unwrap()
    }

    #[test]
    fn splits_simple_target() {
        let (clause, body) = split_block(block_of("with h as x:\n    y = 1\n")).unwrap();
        assert_eq!(clause.listing(), vec!["StoreName x".to_owned()]);
        assert_eq!(body.listing(), vec!["LoadConst 1".to_owned(), "StoreName y".to_owned()]);
    }

    #[test]
    fn anonymous_block_discards_the_value() {
        let (clause, body) = split_block(block_of("with h:\n    pass\n")).unwrap();
        assert_eq!(clause.listing(), vec!["Pop".to_owned()]);
        assert_eq!(body.listing(), vec!["Nop".to_owned()]);
    }

    #[test]
    fn compound_targets_stay_whole() {
        let (clause, _) = split_block(block_of("with h as items[0]:\n    pass\n")).unwrap();
        assert_eq!(
            clause.listing(),
            vec!["LoadName items".to_owned(), "LoadConst 0".to_owned(), "StoreSubscr".to_owned()]
        );
        let (clause, body) = split_block(block_of("with h as (a, b):\n    pass\n")).unwrap();
        assert_eq!(
            clause.listing(),
            vec!["UnpackSequence 2".to_owned(), "StoreName a".to_owned(), "StoreName b".to_owned()]
        );
        assert_eq!(body.len(), 1);
    }

    #[test]
    fn missing_markers_fail_fast() {
        let mut seq = Bytecode::new("<module>");
        seq.push(Instr::new(Opcode::Nop));
        assert!(matches!(split_block(seq), Err(HackError::MalformedBlock(_))));
    }

    /// Unpacking into local slots cannot be replayed from outside the frame.
    #[test]
    fn compound_local_slot_targets_are_refused() {
        let mut capture = CaptureBytecode::new(HackBase::new(None));
        let mut clause = Bytecode::new("<test>");
        clause.push(Instr::with_arg(Opcode::UnpackSequence, Arg::Int(2)));
        clause.push(Instr::name(Opcode::StoreFast, "a"));
        clause.push(Instr::name(Opcode::StoreFast, "b"));
        capture.as_clause = Some(clause);

        let mut print = NoPrint;
        let mut vm = VM::new(&mut print, NoopTracer, VmConfig::default(), Scope::new());
        let this: HackRef = Arc::new(Mutex::new(CaptureBytecode::new(HackBase::new(None))));
        let mut cx = BlockCx {
            host: &mut vm,
            frame: FrameId::next(),
            this,
        };
        let pair = Value::tuple(vec![Value::Int(1), Value::Int(2)]);
        let err = capture.run_as_clause(&mut cx, pair).unwrap_err();
        assert!(err.is(ExcType::NotImplementedError), "unexpected error: {err}");
    }
}
