//! `namespace` and `keyspace`: running a block against a target object.
use pretty_assertions::assert_eq;
use withhack::{CollectStringPrint, ExcType, RunError, Runner};

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

#[test]
fn namespace_collects_assignments_as_attributes() {
    let code = r"
with namespace() as ns:
    x = 1
    y = x + 4
print(ns.x, ns.y)
print(ns)
";
    assert_eq!(run_code(code), "1 5\nnamespace(x=1, y=5)\n");
}

#[test]
fn keyspace_collects_assignments_as_items() {
    let code = r"
with keyspace() as ks:
    x = 1
    y = x + 4
print(ks)
";
    assert_eq!(run_code(code), "{'x': 1, 'y': 5}\n");
}

/// Assignments inside the block never touch the surrounding scope.
#[test]
fn surrounding_scope_is_untouched() {
    let code = r"
x = 'outer'
with namespace() as ns:
    x = 'inner'
print(x, ns.x)
";
    assert_eq!(run_code(code), "outer inner\n");
}

#[test]
fn reads_fall_back_to_globals_and_builtins() {
    let code = r"
base = 10
with namespace() as ns:
    total = base + 1
    size = len([1, 2])
print(ns.total, ns.size)
print(hasattr(ns, 'base'))
";
    assert_eq!(run_code(code), "11 2\nFalse\n");
}

#[test]
fn reads_fall_back_to_function_locals() {
    let code = r"
def build():
    scale = 3
    with namespace() as ns:
        value = scale * 2
    return ns
print(build().value)
";
    assert_eq!(run_code(code), "6\n");
}

/// A missing key falls back the same way a missing attribute does.
#[test]
fn key_reads_fall_back_to_globals_and_builtins() {
    let code = r"
base = 10
with keyspace() as ks:
    total = base + 1
    size = len([1, 2])
print(ks)
";
    assert_eq!(run_code(code), "{'total': 11, 'size': 2}\n");
}

#[test]
fn key_reads_fall_back_to_function_locals() {
    let code = r"
def build():
    scale = 3
    with keyspace() as ks:
        value = scale * 2
    return ks
print(build())
";
    assert_eq!(run_code(code), "{'value': 6}\n");
}

#[test]
fn unknown_keys_raise_name_error() {
    let code = r"
with keyspace() as ks:
    y = missing + 1
";
    let err = run_err(code);
    assert!(err.is(ExcType::NameError), "unexpected error: {err}");
}

#[test]
fn explicit_target_is_updated_in_place() {
    let code = r"
target = SimpleNamespace(a=1)
with namespace(target) as ns:
    b = a + 1
print(target.b, ns is target)
";
    assert_eq!(run_code(code), "2 True\n");
}

#[test]
fn explicit_dict_target() {
    let code = r"
settings = {'debug': False}
with keyspace(settings):
    debug = True
    level = 3
print(settings)
";
    assert_eq!(run_code(code), "{'debug': True, 'level': 3}\n");
}

#[test]
fn deletions_remove_from_the_target() {
    let code = r"
t = SimpleNamespace(a=1, b=2)
with namespace(t):
    del a
print(t)
";
    assert_eq!(run_code(code), "namespace(b=2)\n");
}

#[test]
fn loops_inside_the_block_are_redirected() {
    let code = r"
with keyspace() as ks:
    total = 0
    for i in range(4):
        total = total + i
print(ks)
";
    assert_eq!(run_code(code), "{'total': 6, 'i': 3}\n");
}

#[test]
fn unknown_names_raise_name_error() {
    let code = r"
with namespace() as ns:
    y = missing + 1
";
    let err = run_err(code);
    assert!(err.is(ExcType::NameError), "unexpected error: {err}");
}

/// Only the "missing" error of the access style falls back; others surface.
#[test]
fn other_lookup_errors_propagate() {
    let code = r"
with keyspace([1, 2]) as ks:
    y = x
";
    let err = run_err(code);
    assert!(err.is(ExcType::TypeError), "unexpected error: {err}");
}

#[test]
fn redirected_function_is_exposed_as_bytecode() {
    let code = r"
hack = namespace()
with hack as ns:
    x = 1
print(hack.bytecode)
print(hack.namespace is ns)
";
    let output = run_code(code);
    assert_eq!(output, "['LoadConst 1', 'StoreName x']\nTrue\n");
}
