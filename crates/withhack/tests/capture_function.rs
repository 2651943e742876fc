//! Turning a guarded block into a callable with `CaptureFunction`.
use pretty_assertions::assert_eq;
use withhack::{CollectStringPrint, ExcType, RunError, Runner};

/// Runs a script and returns everything it printed.
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

/// The body is skipped at definition time and runs on every call.
#[test]
fn captured_block_runs_once_per_call() {
    let code = r#"
with CaptureFunction(("message", "times")) as f:
    for i in range(times):
        print(message)
print("defined")
f.function("hello", 2)
f.function("bye", 1)
"#;
    assert_eq!(run_code(code), "defined\nhello\nhello\nbye\n");
}

#[test]
fn positional_arguments_follow_declared_order() {
    let code = r#"
with CaptureFunction(("a", "b")) as f:
    print(a - b)
f.function(10, 3)
f.function(3, 10)
"#;
    assert_eq!(run_code(code), "7\n-7\n");
}

/// Inside a function the captured body still sees the enclosing locals.
#[test]
fn captured_in_function_sees_context_locals() {
    let code = r#"
def make():
    greeting = "hi"
    with CaptureFunction(("name", "punct"), argdefs=("!",)) as f:
        print(greeting, name + punct)
    return f.function
g = make()
g("bob")
g("amy", "?")
"#;
    assert_eq!(run_code(code), "hi bob!\nhi amy?\n");
}

#[test]
fn varargs_collects_extra_positionals() {
    let code = r#"
with CaptureFunction(("first", "rest"), varargs=True) as f:
    print(first, len(rest), rest)
f.function(1, 2, 3)
f.function(4)
"#;
    assert_eq!(run_code(code), "1 2 (2, 3)\n4 0 ()\n");
}

#[test]
fn varkwargs_collects_extra_keywords() {
    let code = r#"
with CaptureFunction(("opts",), varkwargs=True) as f:
    print(sorted(opts.keys()))
f.function(b=2, a=1)
"#;
    assert_eq!(run_code(code), "['a', 'b']\n");
}

#[test]
fn function_name_defaults_and_overrides() {
    let code = r#"
with CaptureFunction() as plain:
    pass
with CaptureFunction(name="show") as named:
    pass
print(plain.function)
print(named.function)
"#;
    assert_eq!(run_code(code), "<function <withhack>>\n<function show>\n");
}

/// Assignments in the body do not leak into the defining scope.
#[test]
fn body_does_not_run_at_definition() {
    let code = r#"
hits = [0]
with CaptureFunction() as f:
    hits[0] = hits[0] + 1
print(hits)
f.function()
f.function()
print(hits)
"#;
    assert_eq!(run_code(code), "[0]\n[2]\n");
}

#[test]
fn captured_function_can_return_values_through_globals() {
    let code = r#"
results = []
with CaptureFunction(("x",)) as square:
    results.append(x * x)
for n in range(4):
    square.function(n)
print(results)
"#;
    assert_eq!(run_code(code), "[0, 1, 4, 9]\n");
}

#[test]
fn bytecode_attribute_lists_the_body() {
    let code = r#"
with CaptureFunction(("x",)) as f:
    print(x)
print(f.bytecode)
"#;
    assert_eq!(run_code(code), "['LoadName print', 'LoadName x', 'CallFunction 1', 'Pop']\n");
}

#[test]
fn too_many_defaults_is_a_value_error() {
    let code = r#"
with CaptureFunction(("a",), argdefs=(1, 2)) as f:
    pass
"#;
    let err = run_err(code);
    assert!(err.is(ExcType::ValueError), "unexpected error: {err}");
}

#[test]
fn calling_with_missing_argument_is_a_type_error() {
    let code = r#"
with CaptureFunction(("a", "b")) as f:
    pass
f.function(1)
"#;
    let err = run_err(code);
    assert!(err.is(ExcType::TypeError), "unexpected error: {err}");
}

/// Without the recipes installed the constructors are plain unknown names.
#[test]
fn recipes_can_be_disabled() {
    let code = "with CaptureFunction() as f:\n    pass\n";
    let runner = Runner::new(code.to_owned(), "test.py").unwrap().with_recipes(false);
    let err = runner.run(&mut CollectStringPrint::new()).unwrap_err();
    assert!(err.is(ExcType::NameError), "unexpected error: {err}");
}

/// Names the body binds are locals of the call, even at module level.
#[test]
fn body_temporaries_stay_local_to_the_call() {
    let code = r#"
with CaptureFunction(("n",)) as f:
    tmp = n * 2
    for i in range(n):
        pass
    print(tmp)
tmp = "global"
f.function(3)
print(tmp)
try:
    print(i)
except NameError:
    print("unbound")
"#;
    assert_eq!(run_code(code), "6\nglobal\nunbound\n");
}

#[test]
fn body_temporaries_are_unbound_before_assignment() {
    let code = r#"
with CaptureFunction() as f:
    print(tmp)
    tmp = 1
tmp = "global"
f.function()
"#;
    let err = run_err(code);
    assert!(err.is(ExcType::NameError), "unexpected error: {err}");
}
