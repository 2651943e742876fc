//! `xargs` and `xkwargs`: calling a function with a block's assignments.
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
fn xargs_appends_locals_after_fixed_arguments() {
    let code = r"
with xargs(filter, lambda i: i % 2 == 0) as evens:
    items = range(10)
print(list(evens))
";
    assert_eq!(run_code(code), "[0, 2, 4, 6, 8]\n");
}

#[test]
fn xargs_passes_locals_in_assignment_order() {
    let code = r"
def describe(a, b, c):
    return a * 100 + b * 10 + c
with xargs(describe, 1) as value:
    second = 2
    third = 3
print(value)
";
    assert_eq!(run_code(code), "123\n");
}

#[test]
fn xkwargs_passes_locals_by_name() {
    let code = r"
def add(a, b, c=0):
    return a + b + c
with xkwargs(add, c=5) as total:
    b = 3
    a = 2
print(total)
";
    assert_eq!(run_code(code), "10\n");
}

#[test]
fn xkwargs_locals_override_fixed_keywords() {
    let code = r"
def pair(a, b):
    return (a, b)
with xkwargs(pair, a=100) as result:
    a = 1
    b = 2
print(result)
";
    assert_eq!(run_code(code), "(1, 2)\n");
}

/// An anonymous block still performs the call.
#[test]
fn call_happens_without_as_clause() {
    let code = r#"
with xargs(print):
    message = "side effect"
"#;
    assert_eq!(run_code(code), "side effect\n");
}

#[test]
fn result_can_be_stored_into_a_subscript() {
    let code = r"
def pair(a, b):
    return a * 10 + b
slots = [0, 0]
with xargs(pair) as slots[1]:
    a = 1
    b = 2
print(slots)
";
    assert_eq!(run_code(code), "[0, 12]\n");
}

#[test]
fn result_can_be_stored_into_an_attribute() {
    let code = r"
box = SimpleNamespace()
with xargs(sum) as box.total:
    values = [1, 2, 3]
print(box.total)
";
    assert_eq!(run_code(code), "6\n");
}

/// Tuple targets are bound to the hack itself on entry, which is not iterable.
#[test]
fn tuple_targets_are_rejected_on_entry() {
    let code = r"
def swap(a, b):
    return (b, a)
with xargs(swap) as (first, second):
    p = 1
    q = 2
";
    let err = run_err(code);
    assert!(err.is(ExcType::TypeError), "unexpected error: {err}");
}

/// A plain name target inside a function is written back into the frame.
#[test]
fn simple_target_inside_function() {
    let code = r"
def compute():
    with xargs(sum) as total:
        values = [1, 2, 3]
    return total
print(compute())
";
    assert_eq!(run_code(code), "6\n");
}

#[test]
fn errors_from_the_callable_propagate() {
    let code = r#"
def boom(a):
    raise RuntimeError("func failed")
with xargs(boom) as result:
    a = 1
"#;
    let err = run_err(code);
    assert!(err.is(ExcType::RuntimeError), "unexpected error: {err}");
    assert_eq!(err.exception().and_then(|e| e.message()), Some("func failed"));
}

#[test]
fn missing_callable_is_a_type_error() {
    let err = run_err("with xargs() as r:\n    a = 1\n");
    assert!(err.is(ExcType::TypeError), "unexpected error: {err}");
}
