// The native-call boundary: loading, the call protocol, the error
// channel, allocation through the context.

use quill::{
    BuiltinModule, Constant, Instruction, NativeCtx, NativeModule, RuntimeError, Value, VM,
};

use crate::common::{cfunction_with_flags, clear_recorded, record, recorded, single_block, test_vm};

unsafe extern "C" fn make_greeting(
    ctx: *mut NativeCtx,
    _argv: *const Value,
    _argc: usize,
) -> Value {
    let ctx = &mut *ctx;
    ctx.alloc_string("hello from native")
}

unsafe extern "C" fn thrower(ctx: *mut NativeCtx, _argv: *const Value, _argc: usize) -> Value {
    let ctx = &mut *ctx;
    ctx.throw("native boom");
    Value::NULL
}

unsafe extern "C" fn summing_section(
    ctx: *mut NativeCtx,
    argv: *const Value,
    argc: usize,
) -> Value {
    let ctx = &mut *ctx;
    let args = std::slice::from_raw_parts(argv, argc);
    let a = args[0].as_int().unwrap_or(0);
    let b = args[1].as_int().unwrap_or(0);
    // Pointer-free work with GC obligations relaxed
    let sum = ctx.native_section(|| a + b);
    Value::int(sum)
}

#[test]
fn test_call_native_through_bytecode() {
    let mut vm = test_vm();
    let unit = single_block(
        vec![Constant::Sym("add_one".to_string()), Constant::Int(41)],
        vec![
            Instruction::ReadGlobal(0),
            Instruction::PutValue(1),
            Instruction::Call { argc: 1 },
            Instruction::Return,
        ],
    );
    let result = vm.execute(unit).unwrap();
    assert_eq!(result, Value::int(42));
}

#[test]
fn test_load_registers_declared_arity() {
    let mut vm = VM::new();
    let mut module = BuiltinModule::new("m");
    module.register("rec", 1, record);
    let bound = vm.load_native_module(&module).unwrap();
    assert_eq!(bound.len(), 1);
    assert_eq!(vm.symbols.decode(bound[0]), "rec");
    assert!(vm.get_global(bound[0]).is_some());
}

#[test]
fn test_failed_load_registers_nothing() {
    let mut vm = VM::new();
    let mut module = BuiltinModule::new("broken");
    module.register("works", 0, record);
    module.declare_unresolved("missing", 2);

    let err = vm.load_native_module(&module).unwrap_err();
    assert_eq!(err, RuntimeError::symbol_not_found("broken", "missing"));

    // All-or-nothing: the resolvable export was not bound either
    let works = vm.symbols.encode_string("works");
    assert_eq!(vm.get_global(works), None);
}

#[test]
fn test_arity_mismatch_is_catchable() {
    let mut vm = test_vm();
    // add_one declares argc 1; calling with 0 args throws
    let unit = single_block(
        vec![Constant::Sym("add_one".to_string())],
        vec![
            Instruction::ReadGlobal(0),
            Instruction::Call { argc: 0 },
            Instruction::Return,
        ],
    );
    let err = vm.execute(unit).unwrap_err();
    assert!(matches!(err, RuntimeError::UncaughtException { .. }));
}

#[test]
fn test_native_throw_is_catchable() {
    let mut vm = VM::new();
    let mut module = BuiltinModule::new("m");
    module.register("thrower", 0, thrower);
    vm.load_native_module(&module).unwrap();

    let unit = single_block(
        vec![Constant::Sym("thrower".to_string())],
        vec![
            // Handler at +4: the payload lands on the stack
            Instruction::RegisterCatchTable { offset: 4 },
            Instruction::ReadGlobal(0),
            Instruction::Call { argc: 0 },
            Instruction::PopCatchTable,
            Instruction::Return,
            // Handler: return the payload
            Instruction::Return,
        ],
    );
    let result = vm.execute(unit).unwrap();
    assert_eq!(vm.heap.display_value(result), "native boom");
}

#[test]
fn test_push_return_value_false_pushes_nothing() {
    clear_recorded();
    let mut vm = test_vm();
    let silent = cfunction_with_flags(&mut vm, "silent", 1, record, false, false);
    vm.bind_global("silent", silent);

    let unit = single_block(
        vec![
            Constant::Sym("silent".to_string()),
            Constant::Int(5),
            Constant::Int(7),
        ],
        vec![
            Instruction::ReadGlobal(0),
            Instruction::PutValue(1),
            Instruction::Call { argc: 1 },
            // Nothing was pushed: the next constant is the result
            Instruction::PutValue(2),
            Instruction::Return,
        ],
    );
    let result = vm.execute(unit).unwrap();
    assert_eq!(result, Value::int(7));
    assert_eq!(recorded(), vec![5]);
}

#[test]
fn test_halt_after_return_stops_dispatch() {
    let mut vm = test_vm();
    let halter = cfunction_with_flags(&mut vm, "halter", 0, make_greeting, true, true);
    vm.bind_global("halter", halter);

    let unit = single_block(
        vec![Constant::Sym("halter".to_string()), Constant::Int(1)],
        vec![
            Instruction::ReadGlobal(0),
            Instruction::Call { argc: 0 },
            // Never reached: the call halts dispatch
            Instruction::PutValue(1),
            Instruction::Return,
        ],
    );
    let result = vm.execute(unit).unwrap();
    assert_eq!(vm.heap.display_value(result), "hello from native");
}

#[test]
fn test_context_allocation_survives_into_script() {
    let mut vm = VM::new();
    let mut module = BuiltinModule::new("m");
    module.register("make_greeting", 0, make_greeting);
    vm.load_native_module(&module).unwrap();

    let unit = single_block(
        vec![
            Constant::Sym("make_greeting".to_string()),
            Constant::Sym("kept".to_string()),
        ],
        vec![
            Instruction::ReadGlobal(0),
            Instruction::Call { argc: 0 },
            Instruction::SetGlobal(1),
            Instruction::Return,
        ],
    );
    vm.execute(unit).unwrap();

    // The context pins are released after the call; the global keeps
    // the string alive across a full collection
    vm.collect_garbage();
    let kept = vm.symbols.encode_string("kept");
    let value = vm.get_global(kept).unwrap();
    assert_eq!(vm.heap.display_value(value), "hello from native");
}

#[test]
fn test_native_section_runs_pointer_free_work() {
    let mut vm = VM::new();
    let mut module = BuiltinModule::new("m");
    module.register("sum", 2, summing_section);
    vm.load_native_module(&module).unwrap();

    let unit = single_block(
        vec![
            Constant::Sym("sum".to_string()),
            Constant::Int(20),
            Constant::Int(22),
        ],
        vec![
            Instruction::ReadGlobal(0),
            Instruction::PutValue(1),
            Instruction::PutValue(2),
            Instruction::Call { argc: 2 },
            Instruction::Return,
        ],
    );
    let result = vm.execute(unit).unwrap();
    assert_eq!(result, Value::int(42));
}

#[test]
fn test_manifest_order_preserved() {
    let mut module = BuiltinModule::new("ordered");
    module.register("c", 0, record);
    module.register("a", 1, record);
    module.register("b", 2, record);
    let names: Vec<&str> = module.manifest().iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["c", "a", "b"]);
}
