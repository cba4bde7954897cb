// Compiled-unit validation at the compiler boundary.

use quill::{CodeBlock, CompiledUnit, Constant, Instruction, RuntimeError, Value, VM};

fn block(code: Vec<Instruction>) -> CodeBlock {
    CodeBlock {
        name: "main".to_string(),
        argc: 0,
        lvarcount: 0,
        code,
    }
}

#[test]
fn test_empty_unit_rejected() {
    let mut vm = VM::new();
    let unit = CompiledUnit {
        blocks: vec![],
        constants: vec![],
        entry: 0,
    };
    assert!(matches!(
        vm.execute(unit),
        Err(RuntimeError::InvalidUnit { .. })
    ));
}

#[test]
fn test_entry_out_of_range_rejected() {
    let mut vm = VM::new();
    let unit = CompiledUnit {
        blocks: vec![block(vec![Instruction::Return])],
        constants: vec![],
        entry: 3,
    };
    assert!(matches!(
        vm.execute(unit),
        Err(RuntimeError::InvalidUnit { .. })
    ));
}

#[test]
fn test_constant_index_out_of_range_rejected() {
    let mut vm = VM::new();
    let unit = CompiledUnit {
        blocks: vec![block(vec![Instruction::PutValue(5), Instruction::Return])],
        constants: vec![Constant::Int(1)],
        entry: 0,
    };
    assert!(matches!(
        vm.execute(unit),
        Err(RuntimeError::InvalidUnit { .. })
    ));
}

#[test]
fn test_function_block_out_of_range_rejected() {
    let mut vm = VM::new();
    let unit = CompiledUnit {
        blocks: vec![block(vec![
            Instruction::PutFunction {
                name: 0,
                block: 9,
                anonymous: false,
            },
            Instruction::Return,
        ])],
        constants: vec![Constant::Sym("f".to_string())],
        entry: 0,
    };
    assert!(matches!(
        vm.execute(unit),
        Err(RuntimeError::InvalidUnit { .. })
    ));
}

#[test]
fn test_running_off_block_end_is_invalid() {
    let mut vm = VM::new();
    let unit = CompiledUnit {
        blocks: vec![block(vec![Instruction::PutValue(0), Instruction::Pop])],
        constants: vec![Constant::Int(1)],
        entry: 0,
    };
    assert!(matches!(
        vm.execute(unit),
        Err(RuntimeError::InvalidUnit { .. })
    ));
}

#[test]
fn test_symbol_constants_become_resolvable() {
    let mut vm = VM::new();
    let unit = CompiledUnit {
        blocks: vec![block(vec![Instruction::PutValue(0), Instruction::Return])],
        constants: vec![Constant::Sym("resolvable-name".to_string())],
        entry: 0,
    };
    let result = vm.execute(unit).unwrap();
    let sym = result.as_symbol().unwrap();
    assert_eq!(vm.symbols.decode_symbol(sym), Some("resolvable-name"));
}

#[test]
fn test_constants_materialize_by_type() {
    let mut vm = VM::new();
    let unit = CompiledUnit {
        blocks: vec![block(vec![
            Instruction::PutValue(0),
            Instruction::PutValue(1),
            Instruction::PutValue(2),
            Instruction::PutValue(3),
            Instruction::PutArray(4),
            Instruction::Return,
        ])],
        constants: vec![
            Constant::Null,
            Constant::Bool(true),
            Constant::Int(-7),
            Constant::Float(2.5),
        ],
        entry: 0,
    };
    let array = vm.execute(unit).unwrap();
    match vm.heap.get(array.as_heap_ref().unwrap()) {
        quill::HeapObject::Array(a) => {
            assert_eq!(
                a.elements,
                vec![
                    Value::NULL,
                    Value::TRUE,
                    Value::int(-7),
                    Value::float(2.5)
                ]
            );
        }
        other => panic!("expected array, got {}", other.type_name()),
    }
}

#[test]
fn test_oversized_int_constant_becomes_float() {
    let mut vm = VM::new();
    let big = 1_i64 << 50;
    let unit = CompiledUnit {
        blocks: vec![block(vec![Instruction::PutValue(0), Instruction::Return])],
        constants: vec![Constant::Int(big)],
        entry: 0,
    };
    let result = vm.execute(unit).unwrap();
    assert!(result.is_float());
    assert_eq!(result.as_float(), Some(big as f64));
}
