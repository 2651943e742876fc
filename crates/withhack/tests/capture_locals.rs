//! Collecting the variables a block assigns.
use pretty_assertions::assert_eq;
use withhack::{CollectStringPrint, Runner};

fn run_code(code: &str) -> String {
    let runner = Runner::new(code.to_owned(), "test.py").unwrap();
    let mut print = CollectStringPrint::new();
    runner.run(&mut print).expect("should succeed");
    print.output().to_owned()
}

#[test]
fn locals_are_collected_after_the_block_runs() {
    let code = r"
with CaptureLocals() as c:
    x = 7
    y = 8
print(c.locals)
print(x + y)
";
    assert_eq!(run_code(code), "{'x': 7, 'y': 8}\n15\n");
}

/// Reassigned names keep the position of their first assignment.
#[test]
fn ordered_locals_follow_first_assignment() {
    let code = r"
with CaptureOrderedLocals() as c:
    b = 1
    a = 2
    b = 3
print(c.locals)
";
    assert_eq!(run_code(code), "[('b', 3), ('a', 2)]\n");
}

#[test]
fn deleted_names_are_left_out() {
    let code = r"
with CaptureLocals() as c:
    kept = 1
    dropped = 2
    del dropped
print(c.locals)
";
    assert_eq!(run_code(code), "{'kept': 1}\n");
}

#[test]
fn loop_variables_are_captured_inside_functions() {
    let code = r"
def tally():
    with CaptureLocals() as c:
        total = 0
        for i in range(3):
            total = total + i
    return c.locals
print(tally())
";
    assert_eq!(run_code(code), "{'total': 3, 'i': 2}\n");
}

#[test]
fn reads_alone_are_not_captured() {
    let code = r"
seen = 5
with CaptureLocals() as c:
    print(seen)
print(c.locals)
";
    assert_eq!(run_code(code), "5\n{}\n");
}

/// Only names that are new or whose value changed are reported.
#[test]
fn modified_locals_compare_against_the_entry_snapshot() {
    let code = r"
x = 7
y = 1
with CaptureModifiedLocals() as m:
    x = 7
    y = 8
    z = 9
print(m.locals)
";
    assert_eq!(run_code(code), "{'y': 8, 'z': 9}\n");
}

/// Changes made through calls count too, not just direct assignments.
#[test]
fn modified_locals_see_indirect_changes() {
    let code = r#"
def define():
    with CaptureModifiedLocals() as m:
        setattr(box, "unused", 1)
        fresh = [1]
    return m.locals
box = SimpleNamespace()
print(define())
"#;
    assert_eq!(run_code(code), "{'fresh': [1]}\n");
}

#[test]
fn hack_attributes_are_reported_on_the_object() {
    let code = r"
with CaptureLocals() as c:
    x = 1
print(hasattr(c, 'locals'), hasattr(c, 'missing'))
print(c)
";
    assert_eq!(run_code(code), "True False\n<CaptureLocals object>\n");
}

/// Variables held in cells for a nested function are not collected.
#[test]
fn closed_over_variables_are_not_collected() {
    let code = r"
def outer():
    with CaptureLocals() as c:
        x = 1
        def get():
            return x
    return c.locals, get()
print(outer())
";
    assert_eq!(run_code(code), "({'get': <function get>}, 1)\n");
}
