//! Variable access rewriting.
//!
//! Function mode re-addresses each variable access so a block can run as the
//! body of a new function. Target mode turns variable accesses into attribute
//! or item accesses on a target object held in the [`TARGET_SLOT`] local.

use ahash::AHashSet;

use crate::{
    bytecode::{Access, Addressing, Bytecode, FrameId, Instr, Opcode},
    exception::ExcType,
    function::NativeFunction,
    value::Value,
};

use super::resolve;

/// Local slot holding the target object in target mode.
pub const TARGET_SLOT: &str = "_[namespace]";

/// Scratch slot the guarded load leaves its result in.
const VALUE_SLOT: &str = "_[ns_value]";

/// How target mode reaches the target's storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum AccessStyle {
    /// `target.name`; a missing attribute falls back to the context's scopes.
    Attribute,
    /// `target["name"]`; a missing key falls back to the context's scopes.
    Key,
}

impl AccessStyle {
    fn missing(self) -> ExcType {
        match self {
            Self::Attribute => ExcType::AttributeError,
            Self::Key => ExcType::KeyError,
        }
    }

    /// Instructions accessing `name` on the target object already on the stack.
    fn access(self, access: Access, name: &str) -> Vec<Instr> {
        match (self, access) {
            (Self::Attribute, Access::Load) => vec![Instr::name(Opcode::LoadAttr, name)],
            (Self::Attribute, Access::Store) => vec![Instr::name(Opcode::StoreAttr, name)],
            (Self::Attribute, Access::Delete) => vec![Instr::name(Opcode::DeleteAttr, name)],
            (Self::Key, access) => {
                let op = match access {
                    Access::Load => Opcode::LoadSubscr,
                    Access::Store => Opcode::StoreSubscr,
                    Access::Delete => Opcode::DeleteSubscr,
                };
                vec![Instr::constant(Value::str(name)), Instr::new(op)]
            }
        }
    }
}

/// Re-addresses variable accesses for a function with parameters `params`.
///
/// Parameters become local slots. Any other name in `existing` becomes
/// name-indexed, so it reads and writes the scope the function shares with
/// its context. A name the sequence stores or deletes becomes a local slot
/// everywhere it is accessed. Loads of names the sequence never binds keep
/// their addressing, as do global accesses.
pub fn rewrite_for_function(seq: &mut Bytecode, params: &[String], existing: &AHashSet<String>) {
    let bound: AHashSet<String> = seq
        .instrs
        .iter()
        .filter_map(|instr| match instr.op.variable_access()? {
            (Access::Store | Access::Delete, Addressing::Fast | Addressing::Deref | Addressing::Name) => {
                instr.name_arg().map(str::to_owned)
            }
            _ => None,
        })
        .collect();
    for instr in &mut seq.instrs {
        let Some((access, addressing)) = instr.op.variable_access() else {
            continue;
        };
        let Some(name) = instr.name_arg() else {
            continue;
        };
        let target = if params.iter().any(|p| p == name) {
            Addressing::Fast
        } else {
            match addressing {
                Addressing::Global => Addressing::Global,
                _ if existing.contains(name) => Addressing::Name,
                _ if bound.contains(name) => Addressing::Fast,
                Addressing::Fast | Addressing::Deref => Addressing::Fast,
                Addressing::Name => Addressing::Name,
            }
        };
        instr.op = Opcode::for_variable(access, target);
    }
}

/// Redirects variable accesses to the object in [`TARGET_SLOT`].
///
/// Stores and deletes of local, cell and name-indexed variables hit the
/// target; global stores and deletes are left alone.
/// Loads try the target first and fall back to [`resolve`] in `context` when
/// the target lacks the name; other errors from the target propagate.
pub fn rewrite_for_target(seq: &mut Bytecode, style: AccessStyle, context: FrameId) {
    let instrs = std::mem::take(&mut seq.instrs);
    let mut out = Vec::with_capacity(instrs.len());
    for mut instr in instrs {
        let redirect = match (instr.op.variable_access(), instr.name_arg()) {
            (Some((Access::Load, _)), Some(name)) => Some((Access::Load, name.to_owned())),
            (Some((access, Addressing::Fast | Addressing::Name | Addressing::Deref)), Some(name)) => {
                Some((access, name.to_owned()))
            }
            _ => None,
        };
        let Some((access, name)) = redirect else {
            out.push(instr);
            continue;
        };
        let mut expansion = match access {
            Access::Load => guarded_load(seq, style, &name, context),
            Access::Store | Access::Delete => {
                let mut expansion = vec![Instr::name(Opcode::LoadFast, TARGET_SLOT)];
                expansion.extend(style.access(access, &name));
                expansion
            }
        };
        instr.transfer_position(&mut expansion[0]);
        out.extend(expansion);
    }
    seq.instrs = out;
}

/// ```text
///     SetupExcept handler
///     LoadFast _[namespace]
///     <load name>
///     StoreFast _[ns_value]
///     PopBlock
///     Jump done
/// handler:
///     Dup
///     LoadConst <missing exception type>
///     CompareExcMatch
///     PopJumpIfFalse reraise
///     Pop
///     LoadConst <resolve name in context>
///     CallFunction 0
///     StoreFast _[ns_value]
///     Jump done
/// reraise:
///     Reraise
/// done:
///     LoadFast _[ns_value]
/// ```
fn guarded_load(seq: &mut Bytecode, style: AccessStyle, name: &str, context: FrameId) -> Vec<Instr> {
    let handler = seq.new_label();
    let reraise = seq.new_label();
    let done = seq.new_label();

    let owned = name.to_owned();
    let fallback = NativeFunction::value("resolve", move |host, args| {
        args.check_positional("resolve", 0, 0)?;
        Ok(resolve(&*host, context, &owned)?)
    });

    let mut instrs = vec![
        Instr::jump(Opcode::SetupExcept, handler),
        Instr::name(Opcode::LoadFast, TARGET_SLOT),
    ];
    instrs.extend(style.access(Access::Load, name));
    instrs.extend([
        Instr::name(Opcode::StoreFast, VALUE_SLOT),
        Instr::new(Opcode::PopBlock),
        Instr::jump(Opcode::Jump, done),
        Instr::new(Opcode::Dup).labeled(handler),
        Instr::constant(Value::ExcType(style.missing())),
        Instr::new(Opcode::CompareExcMatch),
        Instr::jump(Opcode::PopJumpIfFalse, reraise),
        Instr::new(Opcode::Pop),
        Instr::constant(fallback),
        Instr::count(Opcode::CallFunction, 0),
        Instr::name(Opcode::StoreFast, VALUE_SLOT),
        Instr::jump(Opcode::Jump, done),
        Instr::new(Opcode::Reraise).labeled(reraise),
        Instr::name(Opcode::LoadFast, VALUE_SLOT).labeled(done),
    ]);
    instrs
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn sequence(instrs: Vec<Instr>) -> Bytecode {
        let mut seq = Bytecode::new("<withhack>");
        for instr in instrs {
            seq.push(instr);
        }
        seq
    }

    fn ops(seq: &Bytecode) -> Vec<Opcode> {
        seq.instrs.iter().map(|i| i.op).collect()
    }

    #[test]
    fn function_mode_keeps_instruction_count() {
        let mut seq = sequence(vec![
            Instr::name(Opcode::LoadFast, "a"),
            Instr::name(Opcode::LoadDeref, "seen"),
            Instr::name(Opcode::StoreFast, "fresh"),
            Instr::name(Opcode::LoadName, "print"),
            Instr::name(Opcode::LoadGlobal, "a"),
            Instr::name(Opcode::DeleteFast, "seen"),
        ]);
        let existing: AHashSet<String> = ["seen".to_owned()].into_iter().collect();
        rewrite_for_function(&mut seq, &["a".to_owned()], &existing);
        assert_eq!(
            ops(&seq),
            vec![
                Opcode::LoadFast,
                Opcode::LoadName,
                Opcode::StoreFast,
                Opcode::LoadName,
                Opcode::LoadFast,
                Opcode::DeleteName,
            ]
        );
    }

    #[test]
    fn names_bound_by_the_body_become_local_slots() {
        let mut seq = sequence(vec![
            Instr::constant(Value::Int(1)),
            Instr::name(Opcode::StoreName, "tmp"),
            Instr::name(Opcode::LoadName, "tmp"),
            Instr::name(Opcode::LoadName, "print"),
            Instr::name(Opcode::StoreName, "shared"),
            Instr::name(Opcode::DeleteName, "gone"),
            Instr::name(Opcode::LoadGlobal, "tmp"),
        ]);
        let existing: AHashSet<String> = ["shared".to_owned()].into_iter().collect();
        rewrite_for_function(&mut seq, &[], &existing);
        assert_eq!(
            ops(&seq),
            vec![
                Opcode::LoadConst,
                Opcode::StoreFast,
                Opcode::LoadFast,
                Opcode::LoadName,
                Opcode::StoreName,
                Opcode::DeleteFast,
                Opcode::LoadGlobal,
            ]
        );
    }

    #[test]
    fn target_mode_redirects_stores_and_deletes() {
        let mut seq = sequence(vec![
            Instr::constant(Value::Int(1)),
            Instr::name(Opcode::StoreName, "x"),
            Instr::name(Opcode::DeleteFast, "x"),
            Instr::name(Opcode::StoreGlobal, "g"),
        ]);
        rewrite_for_target(&mut seq, AccessStyle::Key, FrameId::next());
        assert_eq!(
            seq.listing(),
            vec![
                "LoadConst 1".to_owned(),
                "LoadFast _[namespace]".to_owned(),
                "LoadConst 'x'".to_owned(),
                "StoreSubscr".to_owned(),
                "LoadFast _[namespace]".to_owned(),
                "LoadConst 'x'".to_owned(),
                "DeleteSubscr".to_owned(),
                "StoreGlobal g".to_owned(),
            ]
        );
    }

    #[test]
    fn guarded_loads_keep_labels_and_lines_on_the_first_instruction() {
        let mut seq = Bytecode::new("<withhack>");
        let top = seq.new_label();
        let mut load = Instr::name(Opcode::LoadName, "x").labeled(top);
        load.line = Some(3);
        seq.push(load);
        seq.push(Instr::jump(Opcode::Jump, top));
        rewrite_for_target(&mut seq, AccessStyle::Attribute, FrameId::next());

        assert_eq!(seq.len(), 18);
        assert_eq!(seq.instrs[0].op, Opcode::SetupExcept);
        assert_eq!(seq.instrs[0].labels.as_slice(), &[top]);
        assert_eq!(seq.instrs[0].line, Some(3));
        assert_eq!(seq.instrs[2].name_arg(), Some("x"));
        assert_eq!(seq.instrs.last().map(|i| i.op), Some(Opcode::Jump));
        assert!(seq.materialize(&[]).is_ok());
    }
}
