// Exception unwinding through catch tables.
//
// Offset bookkeeping: handler targets are relative to the
// instruction after `RegisterCatchTable`, and the cursor has already
// advanced when the offset applies.

use quill::{Constant, Instruction, RuntimeError, Value};

use crate::common::{single_block, test_vm};

#[test]
fn test_throw_lands_in_handler() {
    let mut vm = test_vm();
    let unit = single_block(
        vec![Constant::Str("boom".to_string()), Constant::Int(1)],
        vec![
            // 0: handler at 1 + 4 = 5
            Instruction::RegisterCatchTable { offset: 4 },
            // 1-2: throw
            Instruction::PutValue(0),
            Instruction::Throw,
            // 3-4: skipped normal path
            Instruction::PutValue(1),
            Instruction::Return,
            // 5: handler — payload is on the stack
            Instruction::Return,
        ],
    );
    let result = vm.execute(unit).unwrap();
    assert_eq!(vm.heap.display_value(result), "boom");
}

#[test]
fn test_no_throw_takes_normal_path() {
    let mut vm = test_vm();
    let unit = single_block(
        vec![Constant::Int(7)],
        vec![
            Instruction::RegisterCatchTable { offset: 3 },
            Instruction::PopCatchTable,
            Instruction::PutValue(0),
            Instruction::Return,
            // Handler, never reached
            Instruction::Return,
        ],
    );
    let result = vm.execute(unit).unwrap();
    assert_eq!(result, Value::int(7));
}

#[test]
fn test_uncaught_exception_fails_execute() {
    let mut vm = test_vm();
    let unit = single_block(
        vec![Constant::Str("unhandled".to_string())],
        vec![
            Instruction::PutValue(0),
            Instruction::Throw,
            Instruction::Return,
        ],
    );
    let err = vm.execute(unit).unwrap_err();
    assert_eq!(err, RuntimeError::uncaught_exception("unhandled"));
}

#[test]
fn test_nested_handlers_rethrow_to_outer() {
    let mut vm = test_vm();
    let unit = single_block(
        vec![Constant::Str("inner".to_string())],
        vec![
            // 0: outer handler at 1 + 7 = 8
            Instruction::RegisterCatchTable { offset: 7 },
            // 1: inner handler at 2 + 4 = 6
            Instruction::RegisterCatchTable { offset: 4 },
            // 2-3: throw "inner"
            Instruction::PutValue(0),
            Instruction::Throw,
            // 4-5: skipped
            Instruction::PopCatchTable,
            Instruction::Return,
            // 6-7: inner handler rethrows the payload
            Instruction::Throw,
            Instruction::Return,
            // 8: outer handler returns the payload
            Instruction::Return,
        ],
    );
    let result = vm.execute(unit).unwrap();
    assert_eq!(vm.heap.display_value(result), "inner");
}

#[test]
fn test_unwind_restores_operand_stack_depth() {
    let mut vm = test_vm();
    let unit = single_block(
        vec![Constant::Int(10), Constant::Str("x".to_string())],
        vec![
            // 0: a value below the handler's stack mark
            Instruction::PutValue(0),
            // 1: handler at 2 + 4 = 6, stacksize = 1
            Instruction::RegisterCatchTable { offset: 4 },
            // 2-4: push garbage above the mark, then throw
            Instruction::PutValue(0),
            Instruction::PutValue(1),
            Instruction::Throw,
            // 5: skipped
            Instruction::Return,
            // 6: handler — stack is [10, payload]; drop the payload
            // and return the preserved 10
            Instruction::Pop,
            Instruction::Return,
        ],
    );
    let result = vm.execute(unit).unwrap();
    assert_eq!(result, Value::int(10));
}

#[test]
fn test_type_error_is_catchable() {
    let mut vm = test_vm();
    // Calling an integer throws a catchable exception
    let unit = single_block(
        vec![Constant::Int(3)],
        vec![
            Instruction::RegisterCatchTable { offset: 4 },
            Instruction::PutValue(0),
            Instruction::Call { argc: 0 },
            Instruction::PopCatchTable,
            Instruction::Return,
            // Handler
            Instruction::Return,
        ],
    );
    let result = vm.execute(unit).unwrap();
    let message = vm.heap.display_value(result);
    assert!(
        message.contains("non-callable"),
        "unexpected payload: {}",
        message
    );
}

#[test]
fn test_undefined_global_is_catchable() {
    let mut vm = test_vm();
    let unit = single_block(
        vec![Constant::Sym("nowhere".to_string())],
        vec![
            Instruction::RegisterCatchTable { offset: 3 },
            Instruction::ReadGlobal(0),
            Instruction::PopCatchTable,
            Instruction::Return,
            // Handler
            Instruction::Return,
        ],
    );
    let result = vm.execute(unit).unwrap();
    let message = vm.heap.display_value(result);
    assert!(
        message.contains("Undefined global"),
        "unexpected payload: {}",
        message
    );
}

#[test]
fn test_exception_across_call_frames() {
    let mut vm = test_vm();
    // The callee throws; the caller's handler catches it
    let unit = quill::CompiledUnit {
        blocks: vec![
            quill::CodeBlock {
                name: "main".to_string(),
                argc: 0,
                lvarcount: 0,
                code: vec![
                    // 0: handler at 1 + 5 = 6
                    Instruction::RegisterCatchTable { offset: 5 },
                    Instruction::PutFunction {
                        name: 0,
                        block: 1,
                        anonymous: false,
                    },
                    Instruction::Call { argc: 0 },
                    Instruction::Pop,
                    Instruction::PopCatchTable,
                    Instruction::Return,
                    // 6: handler
                    Instruction::Return,
                ],
            },
            quill::CodeBlock {
                name: "angry".to_string(),
                argc: 0,
                lvarcount: 0,
                code: vec![
                    Instruction::PutValue(1),
                    Instruction::Throw,
                    Instruction::Return,
                ],
            },
        ],
        constants: vec![
            Constant::Sym("angry".to_string()),
            Constant::Str("deep boom".to_string()),
        ],
        entry: 0,
    };
    let result = vm.execute(unit).unwrap();
    assert_eq!(vm.heap.display_value(result), "deep boom");
}
