//! Virtual machine semantics on hand-assembled bytecode and small
//! programs: arithmetic promotion, divide-by-zero, halting, subscripts.

mod common;

use std::rc::Rc;

use parlance::{Bytecode, Object, Opcode, SourceLocation, Value, VirtualMachine};

fn assemble(build: impl FnOnce(&mut Bytecode)) -> Rc<Bytecode> {
    let mut bytecode = Bytecode::new("test");
    build(&mut bytecode);
    Rc::new(bytecode)
}

fn location() -> SourceLocation {
    SourceLocation::default()
}

#[test]
fn adds_two_float_constants() {
    let bytecode = assemble(|bytecode| {
        let ten = bytecode.add_constant(Value::Float(10.0)).unwrap();
        bytecode.add_with_argument(location(), Opcode::Constant, ten);
        let five = bytecode.add_constant(Value::Float(5.0)).unwrap();
        bytecode.add_with_argument(location(), Opcode::Constant, five);
        bytecode.add(location(), Opcode::Add);
        bytecode.add(location(), Opcode::Return);
    });
    let mut vm = VirtualMachine::default();
    assert_eq!(vm.execute(&bytecode).unwrap(), Value::Float(15.0));
}

#[test]
fn integer_addition_stays_integral() {
    let bytecode = assemble(|bytecode| {
        bytecode.add_with_argument(location(), Opcode::Short, 40);
        bytecode.add_with_argument(location(), Opcode::Short, 2);
        bytecode.add(location(), Opcode::Add);
        bytecode.add(location(), Opcode::Return);
    });
    let mut vm = VirtualMachine::default();
    let result = vm.execute(&bytecode).unwrap();
    assert!(result.is_integer(), "integer + integer must stay an integer, got {result:?}");
    assert_eq!(result, Value::Integer(42));
}

#[test]
fn mixed_addition_promotes_to_float() {
    let bytecode = assemble(|bytecode| {
        bytecode.add_with_argument(location(), Opcode::Short, 40);
        let half = bytecode.add_constant(Value::Float(2.5)).unwrap();
        bytecode.add_with_argument(location(), Opcode::Constant, half);
        bytecode.add(location(), Opcode::Add);
        bytecode.add(location(), Opcode::Return);
    });
    let mut vm = VirtualMachine::default();
    assert_eq!(vm.execute(&bytecode).unwrap(), Value::Float(42.5));
}

#[test]
fn integer_addition_wraps_like_signed_64_bit() {
    let bytecode = assemble(|bytecode| {
        let max = bytecode.add_constant(Value::Integer(i64::MAX)).unwrap();
        bytecode.add_with_argument(location(), Opcode::Constant, max);
        bytecode.add_with_argument(location(), Opcode::Short, 1);
        bytecode.add(location(), Opcode::Add);
        bytecode.add(location(), Opcode::Return);
    });
    let mut vm = VirtualMachine::default();
    assert_eq!(vm.execute(&bytecode).unwrap(), Value::Integer(i64::MIN));
}

#[test]
fn divide_by_zero_is_a_runtime_error() {
    let bytecode = assemble(|bytecode| {
        bytecode.add_with_argument(location(), Opcode::Short, 1);
        bytecode.add_with_argument(location(), Opcode::Short, 0);
        bytecode.add(location(), Opcode::Divide);
        bytecode.add(location(), Opcode::Return);
    });
    let mut vm = VirtualMachine::default();
    let error = vm.execute(&bytecode).expect_err("dividing by zero must fail");
    assert_eq!(error.what(), "divide by zero");

    // The machine unwinds cleanly and stays usable.
    let ok = assemble(|bytecode| {
        bytecode.add_with_argument(location(), Opcode::Short, 6);
        bytecode.add_with_argument(location(), Opcode::Short, 3);
        bytecode.add(location(), Opcode::Divide);
        bytecode.add(location(), Opcode::Return);
    });
    assert_eq!(vm.execute(&ok).unwrap(), Value::Integer(2));
}

/// Divide pops exactly its two operands before failing: a value beneath
/// them is still intact for the enclosing `try` handler's frame.
#[test]
fn divide_by_zero_preserves_the_rest_of_the_stack() {
    let transcript = common::run(
        "set probe to 41\ntry\n  set probe to 1 / 0\nend try\nset probe to probe + 1\nprobe\n",
    );
    assert!(transcript.result.is_ok(), "error: {:?}", transcript.result.err());
    assert_eq!(transcript.vm.it(), Value::Integer(42));
}

#[test]
fn exponent_on_integers_computes_in_floating_point() {
    let bytecode = assemble(|bytecode| {
        bytecode.add_with_argument(location(), Opcode::Short, 2);
        bytecode.add_with_argument(location(), Opcode::Short, 10);
        bytecode.add(location(), Opcode::Exponent);
        bytecode.add(location(), Opcode::Return);
    });
    let mut vm = VirtualMachine::default();
    assert_eq!(vm.execute(&bytecode).unwrap(), Value::Float(1024.0));
}

#[test]
fn halt_requested_before_execute_stops_within_one_opcode() {
    let bytecode = assemble(|bytecode| {
        // An endless loop: the halt check must break it on the first step.
        bytecode.add(location(), Opcode::Empty);
        bytecode.add(location(), Opcode::Pop);
        bytecode.add_repeat(location(), 0);
    });
    let mut vm = VirtualMachine::default();
    vm.request_halt();
    let error = vm.execute(&bytecode).expect_err("halt must abort execution");
    assert_eq!(error.what(), "program halted");
}

#[test]
fn halt_handle_works_from_the_flag() {
    let bytecode = assemble(|bytecode| {
        bytecode.add(location(), Opcode::Empty);
        bytecode.add(location(), Opcode::Return);
    });
    let mut vm = VirtualMachine::default();
    let handle = vm.halt_handle();
    handle.store(true, std::sync::atomic::Ordering::Relaxed);
    assert!(vm.execute(&bytecode).is_err());
    // The flag resets once observed.
    assert!(vm.execute(&bytecode).is_ok());
}

#[test]
fn list_subscripts_read_back_elements() {
    let mut vm = VirtualMachine::default();
    let values = vec![Value::Integer(1), Value::from("two"), Value::Bool(true)];
    let list = vm.make_list(values.clone());
    for (index, expected) in values.iter().enumerate() {
        let actual = list
            .subscript(parlance::SourceRange::default(), &Value::Integer(index as i64))
            .unwrap();
        assert_eq!(&actual, expected);
    }
    assert!(
        list.subscript(parlance::SourceRange::default(), &Value::Integer(3)).is_err(),
        "out-of-range subscripts must fail"
    );
}

#[test]
fn dictionary_preserves_insertion_order() {
    let transcript = common::run(
        "set d to [\"b\": 1, \"a\": 2, \"c\": 3]\nrepeat for pair in d\n  print pair[0]\nend repeat\n",
    );
    assert!(transcript.result.is_ok(), "error: {:?}", transcript.result.err());
    assert_eq!(transcript.output, "b\na\nc\n");
}

#[test]
fn ranges_check_their_bounds() {
    let transcript = common::run("set r to 5...1\n");
    let error = transcript.result.expect_err("descending range must fail");
    assert_eq!(error.what(), "lower bound must be less than or equal to the upper bound");
}

#[test]
fn try_stores_the_error_for_inspection() {
    let transcript = common::run("try\n  1 / 0\nend try\nprint the error\n");
    assert!(transcript.result.is_ok(), "error: {:?}", transcript.result.err());
    assert_eq!(transcript.output, "divide by zero\n");
}

#[test]
fn strings_compare_by_content_not_identity() {
    let mut vm = VirtualMachine::default();
    let a = vm.make_string("same");
    let b = vm.make_string("same");
    assert_eq!(Value::from(a.clone()), Value::from(b));
    assert!(matches!(a.as_ref(), Object::String(text) if text == "same"));
}
