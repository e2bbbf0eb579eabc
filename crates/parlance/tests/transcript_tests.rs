//! End-to-end transcripts: source in, stdout (or a runtime error) out.

mod common;

use common::{run, run_with_input};
use pretty_assertions::assert_eq;

#[test]
fn prints_arithmetic() {
    let transcript = run("print 10 + 5\n");
    assert!(transcript.result.is_ok(), "error: {:?}", transcript.result.err());
    assert_eq!(transcript.output, "15\n");
}

#[test]
fn prints_an_interpolated_string() {
    let transcript = run("set name to \"Ada\"\nprint \"Hi, {name}!\"\n");
    assert!(transcript.result.is_ok(), "error: {:?}", transcript.result.err());
    assert_eq!(transcript.output, "Hi, Ada!\n");
}

#[test]
fn interpolation_with_multiple_splices() {
    let transcript = run("set a to 1\nset b to 2\nprint \"{a} and {b} make {a + b}\"\n");
    assert!(transcript.result.is_ok(), "error: {:?}", transcript.result.err());
    assert_eq!(transcript.output, "1 and 2 make 3\n");
}

#[test]
fn repeat_for_over_a_closed_range() {
    let transcript = run("repeat for i in 1...3\n  print i\nend repeat\n");
    assert!(transcript.result.is_ok(), "error: {:?}", transcript.result.err());
    assert_eq!(transcript.output, "1\n2\n3\n");
}

#[test]
fn divide_by_zero_reports_a_runtime_error() {
    let transcript = run("print 1/0\n");
    let error = transcript.result.expect_err("dividing by zero must fail");
    assert_eq!(error.what(), "divide by zero");
    assert_eq!(transcript.output, "");
}

#[test]
fn unpack_mismatch_reports_counts() {
    let transcript = run("set (a,b) to [1,2,3]\n");
    let error = transcript.result.expect_err("destructuring size mismatch must fail");
    assert_eq!(error.what(), "expected 2 values but got 3");
}

#[test]
fn user_functions_are_callable() {
    let transcript = run(
        "function greet {who}\n  return \"hi \" & who\nend function\nprint greet \"bob\"\n",
    );
    assert!(transcript.result.is_ok(), "error: {:?}", transcript.result.err());
    assert_eq!(transcript.output, "hi bob\n");
}

#[test]
fn functions_can_call_forward_siblings() {
    let transcript = run(
        "function outer {x}\n  return double x\nend function\n\
         function double {x}\n  return x * 2\nend function\n\
         print outer 21\n",
    );
    assert!(transcript.result.is_ok(), "error: {:?}", transcript.result.err());
    assert_eq!(transcript.output, "42\n");
}

#[test]
fn multi_word_signatures_with_options() {
    let transcript = run(
        "function (the) doubled value (of) {x}\n  return x * 2\nend function\n\
         print the doubled value of 4\nprint doubled value 5\n",
    );
    assert!(transcript.result.is_ok(), "error: {:?}", transcript.result.err());
    assert_eq!(transcript.output, "8\n10\n");
}

#[test]
fn destructuring_function_arguments() {
    let transcript = run(
        "function sum of pair {a, b}\n  return a + b\nend function\n\
         print sum of pair [40, 2]\n",
    );
    assert!(transcript.result.is_ok(), "error: {:?}", transcript.result.err());
    assert_eq!(transcript.output, "42\n");
}

#[test]
fn repeat_while_and_exit() {
    let transcript = run(
        "set n to 0\nrepeat while n < 10\n  set n to n + 1\n  if n = 3 then exit repeat\nend repeat\nprint n\n",
    );
    assert!(transcript.result.is_ok(), "error: {:?}", transcript.result.err());
    assert_eq!(transcript.output, "3\n");
}

#[test]
fn repeat_until_counts_up() {
    let transcript = run(
        "set n to 0\nrepeat until n = 3\n  set n to n + 1\nend repeat\nprint n\n",
    );
    assert!(transcript.result.is_ok(), "error: {:?}", transcript.result.err());
    assert_eq!(transcript.output, "3\n");
}

#[test]
fn next_repeat_skips_an_iteration() {
    let transcript = run(
        "repeat for i in 1...4\n  if i = 2 then next repeat\n  print i\nend repeat\n",
    );
    assert!(transcript.result.is_ok(), "error: {:?}", transcript.result.err());
    assert_eq!(transcript.output, "1\n3\n4\n");
}

#[test]
fn it_tracks_the_last_expression() {
    let transcript = run("6 * 7\nprint it\n");
    assert!(transcript.result.is_ok(), "error: {:?}", transcript.result.err());
    assert_eq!(transcript.output, "42\n");
}

#[test]
fn try_swallows_the_error_and_continues() {
    let transcript = run("try\n  print 1/0\nend try\nprint \"after\"\n");
    assert!(transcript.result.is_ok(), "error: {:?}", transcript.result.err());
    assert_eq!(transcript.output, "after\n");
}

#[test]
fn try_in_a_function_unwinds_to_the_handler_frame() {
    let transcript = run(
        "function explode\n  return 1 / 0\nend function\n\
         try\n  print explode\nend try\nprint the error\n",
    );
    assert!(transcript.result.is_ok(), "error: {:?}", transcript.result.err());
    assert_eq!(transcript.output, "divide by zero\n");
}

#[test]
fn subscripts_read_and_write() {
    let transcript = run(
        "set items to [1, 2, 3]\nset items[1] to 20\nprint items[1]\nprint items\n",
    );
    assert!(transcript.result.is_ok(), "error: {:?}", transcript.result.err());
    assert_eq!(transcript.output, "20\n[1, 20, 3]\n");
}

#[test]
fn dictionaries_subscript_by_key() {
    let transcript = run(
        "set ages to [\"ada\": 36, \"alan\": 41]\nprint ages[\"ada\"]\nprint ages[\"none\"]\n",
    );
    assert!(transcript.result.is_ok(), "error: {:?}", transcript.result.err());
    assert_eq!(transcript.output, "36\n\n");
}

#[test]
fn string_enumeration_yields_characters() {
    let transcript = run("repeat for c in \"abc\"\n  write c\nend repeat\n");
    assert!(transcript.result.is_ok(), "error: {:?}", transcript.result.err());
    assert_eq!(transcript.output, "abc");
}

#[test]
fn core_size_and_insert() {
    let transcript = run(
        "set items to [1, 2]\ninsert 3 into items\nprint the size of items\nprint size of items\n",
    );
    assert!(transcript.result.is_ok(), "error: {:?}", transcript.result.err());
    assert_eq!(transcript.output, "3\n3\n");
}

#[test]
fn closures_read_enclosing_locals() {
    let transcript = run(
        "function counter demo\n  set base to 40\n  function add to base {x}\n    return base + x\n  end function\n  return add to base 2\nend function\nprint counter demo\n",
    );
    assert!(transcript.result.is_ok(), "error: {:?}", transcript.result.err());
    assert_eq!(transcript.output, "42\n");
}

#[test]
fn read_line_consumes_input() {
    let transcript = run_with_input("set name to read line\nprint \"hello {name}\"\n", "world\n");
    assert!(transcript.result.is_ok(), "error: {:?}", transcript.result.err());
    assert_eq!(transcript.output, "hello world\n");
}

#[test]
fn empty_compares_equal_to_the_empty_string() {
    let transcript = run("if \"\" = empty then print \"same\"\n");
    assert!(transcript.result.is_ok(), "error: {:?}", transcript.result.err());
    assert_eq!(transcript.output, "same\n");
}

#[test]
fn boolean_operators_short_circuit() {
    let transcript = run(
        "function loud {x}\n  print x\n  return true\nend function\n\
         if false and loud 1 then print \"no\"\nif true or loud 2 then print \"yes\"\n",
    );
    assert!(transcript.result.is_ok(), "error: {:?}", transcript.result.err());
    assert_eq!(transcript.output, "yes\n");
}

#[test]
fn is_not_compares_for_inequality() {
    let transcript = run("if 1 is not 2 then print \"different\"\n");
    assert!(transcript.result.is_ok(), "error: {:?}", transcript.result.err());
    assert_eq!(transcript.output, "different\n");
}
