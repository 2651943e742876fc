//! Entering, skipping and leaving hacked with-blocks.
use std::thread;

use pretty_assertions::assert_eq;
use withhack::{
    CollectStringPrint, ExcType, NoPrint, NoopTracer, RecordingTracer, RunError, Runner, Scope, VmConfig, VmEvent,
    bytecode::Opcode,
};

fn run_code(code: &str) -> String {
    let runner = Runner::new(code.to_owned(), "test.py").unwrap();
    let mut print = CollectStringPrint::new();
    runner.run(&mut print).expect("should succeed");
    print.output().to_owned()
}

fn run_err(code: &str) -> RunError {
    let runner = Runner::new(code.to_owned(), "test.py").unwrap();
    runner.run(&mut CollectStringPrint::new()).expect_err("should fail")
}

/// A skipped body has no side effects, even on its first statement.
#[test]
fn skipped_body_has_no_side_effects() {
    let code = r"
counter = [0]
with CaptureBytecode() as c:
    counter[0] = counter[0] + 1
    counter.append('never')
print(counter)
print('StoreSubscr' in c.bytecode)
";
    assert_eq!(run_code(code), "[0]\nTrue\n");
}

/// The skip fires on the body's first line and nothing in the body executes.
#[test]
fn skip_fires_at_the_first_body_line() {
    let code = "with CaptureBytecode():\n    x = 1\n    y = 2\n";
    let runner = Runner::new(code.to_owned(), "test.py").unwrap();
    let (result, tracer) = runner.run_with(&Scope::new(), VmConfig::new(), RecordingTracer::new(), &mut NoPrint);
    result.unwrap();
    let events = tracer.into_events();
    let lines: Vec<u32> = events
        .iter()
        .filter_map(|event| match event {
            VmEvent::Line { line, .. } => Some(*line),
            _ => None,
        })
        .collect();
    assert_eq!(lines, vec![2]);
    assert!(events.contains(&VmEvent::BlockPush { depth: 1 }));
    assert!(
        !events
            .iter()
            .any(|event| matches!(event, VmEvent::Instruction { opcode: Opcode::StoreName, .. })),
        "body instructions ran: {events:?}"
    );
}

#[test]
fn execution_continues_after_a_skipped_block() {
    let code = r"
def body():
    with CaptureBytecode():
        print('inside')
    print('after')
    return 'done'
print(body())
";
    assert_eq!(run_code(code), "after\ndone\n");
}

#[test]
fn user_exceptions_propagate_unchanged() {
    let code = r#"
with CaptureLocals() as c:
    x = 1
    raise ValueError("boom")
"#;
    let err = run_err(code);
    assert!(err.is(ExcType::ValueError), "unexpected error: {err}");
    assert_eq!(err.exception().and_then(|e| e.message()), Some("boom"));
}

/// A block left by an exception captures nothing.
#[test]
fn failed_block_captures_nothing() {
    let code = r#"
try:
    with CaptureLocals() as c:
        x = 1
        raise KeyError("k")
except KeyError:
    print("caught")
print(hasattr(c, "locals"))
"#;
    assert_eq!(run_code(code), "caught\nFalse\n");
}

#[test]
fn hack_entered_from_another_frame_is_rejected() {
    let code = r"
h = CaptureLocals()
def use(hack):
    with hack:
        pass
use(h)
";
    let err = run_err(code);
    assert!(err.is(ExcType::RuntimeError), "unexpected error: {err}");
}

#[test]
fn hack_cannot_be_entered_twice_at_once() {
    let code = r"
h = CaptureLocals()
with h:
    with h:
        pass
";
    let err = run_err(code);
    assert!(err.is(ExcType::RuntimeError), "unexpected error: {err}");
}

#[test]
fn hack_can_be_reused_after_exit() {
    let code = r"
h = CaptureLocals()
with h:
    a = 1
with h:
    b = 2
print(h.locals)
";
    assert_eq!(run_code(code), "{'b': 2}\n");
}

/// Skipping needs line events; without them the hack refuses to start.
#[test]
fn skipping_without_monitoring_is_a_runtime_error() {
    let code = r"
with namespace() as ns:
    x = 1
";
    let runner = Runner::new(code.to_owned(), "test.py").unwrap();
    let config = VmConfig::new().monitoring(false);
    let (result, _) = runner.run_with(&Scope::new(), config, NoopTracer, &mut CollectStringPrint::new());
    let err = result.unwrap_err();
    assert!(err.is(ExcType::RuntimeError), "unexpected error: {err}");
}

/// A refused entry leaves the hack ready to be entered again.
#[test]
fn refused_entry_does_not_leave_the_hack_entered() {
    let code = r"
h = namespace()
try:
    with h as ns:
        x = 1
except RuntimeError:
    print('refused')
with h as ns:
    x = 1
";
    let runner = Runner::new(code.to_owned(), "test.py").unwrap();
    let config = VmConfig::new().monitoring(false);
    let mut print = CollectStringPrint::new();
    let (result, _) = runner.run_with(&Scope::new(), config, NoopTracer, &mut print);
    let err = result.unwrap_err();
    assert_eq!(print.output(), "refused\n");
    assert!(err.is(ExcType::RuntimeError), "unexpected error: {err}");
    let message = err.exception().and_then(|e| e.message()).unwrap_or_default();
    assert!(message.contains("monitoring"), "unexpected message: {message}");
}

/// Hacks that let the body run work without monitoring.
#[test]
fn running_bodies_work_without_monitoring() {
    let code = r"
with CaptureLocals() as c:
    x = 1
print(c.locals)
";
    let runner = Runner::new(code.to_owned(), "test.py").unwrap();
    let config = VmConfig::new().monitoring(false);
    let mut print = CollectStringPrint::new();
    let (result, _) = runner.run_with(&Scope::new(), config, NoopTracer, &mut print);
    result.unwrap();
    assert_eq!(print.output(), "{'x': 1}\n");
}

#[test]
fn nested_hacks_see_only_their_own_block() {
    let code = r"
with CaptureLocals() as outer:
    a = 1
    with namespace() as inner:
        b = 2
    c = 3
print(outer.locals)
";
    assert_eq!(run_code(code), "{'a': 1, 'inner': namespace(b=2), 'c': 3}\n");
}

/// A hack inside a captured function is set up again on every call.
#[test]
fn hacks_inside_captured_functions() {
    let code = r"
with CaptureFunction(('n',)) as make:
    with namespace() as inner:
        value = n * 2
    print(inner.value)
make.function(1)
make.function(5)
";
    assert_eq!(run_code(code), "2\n10\n");
}

#[test]
fn globals_are_shared_with_the_caller() {
    let code = r"
with namespace() as ns:
    x = 1
";
    let runner = Runner::new(code.to_owned(), "test.py").unwrap();
    let globals = Scope::new();
    let (result, _) = runner.run_with(&globals, VmConfig::new(), NoopTracer, &mut CollectStringPrint::new());
    result.unwrap();
    let ns = globals.get("ns").expect("ns should be bound");
    assert_eq!(ns.repr(), "namespace(x=1)");
}

/// Pending skips of concurrently running scripts never cross over.
#[test]
fn concurrent_scripts_skip_independently() {
    let handles: Vec<_> = (0..4)
        .map(|n| {
            thread::spawn(move || {
                let code = format!(
                    "for round in range(20):\n    with keyspace() as ks:\n        value = {n}\n    print(ks['value'])\n"
                );
                run_code(&code)
            })
        })
        .collect();
    for (n, handle) in handles.into_iter().enumerate() {
        let output = handle.join().unwrap();
        assert_eq!(output, format!("{n}\n").repeat(20));
    }
}

#[test]
fn module_disassembly_shows_with_layout() {
    let runner = Runner::new("with CaptureLocals():\n    x = 1\n".to_owned(), "test.py").unwrap();
    let listing = runner.code().disassemble();
    assert!(listing.contains("SetupWith"), "listing was:\n{listing}");
    assert!(listing.contains("ExitWith"), "listing was:\n{listing}");
    assert!(listing.contains("WithExcept"), "listing was:\n{listing}");
}
