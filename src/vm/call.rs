//! Call dispatch: bytecode functions, native functions, classes.
//!
//! The native call protocol lives here. For a CFunction the
//! interpreter pops exactly `argc` operands (done by the caller),
//! switches the mutator into the native state, invokes the entry with
//! an execution context, pushes the result iff `push_return_value`,
//! and stops dispatch iff `halt_after_return`. No collection can
//! trigger while the native state is active: context allocations are
//! pinned and bypass the collection trigger entirely.

use rustc_hash::FxHashMap;

use crate::error::VmResult;
use crate::native::{resolve_module, NativeCtx, NativeModule};
use crate::value::heap::{CFunction, Class, Frame, Function, HeapObject, MutatorState, Object};
use crate::value::repr::Symbol;
use crate::value::Value;

use super::core::VM;

impl VM {
    /// Invoke a callable value with the given arguments.
    ///
    /// Calling a non-callable is a catchable type error, never fatal.
    /// `halt_after_return` marks the resulting frame (or the inline
    /// native call) as the end of this dispatch run — the scheduler
    /// uses it to run one task to completion.
    pub(crate) fn invoke_callable(
        &mut self,
        callee: Value,
        args: &[Value],
        halt_after_return: bool,
    ) -> VmResult<()> {
        let r = match callee.as_heap_ref() {
            Some(r) => r,
            None => {
                let type_name = self.heap.type_name_of(callee);
                self.throw_message(&format!(
                    "Attempted to call a non-callable type: {}",
                    type_name
                ));
                return Ok(());
            }
        };
        match self.heap.get(r) {
            HeapObject::Function(f) => {
                let func = f.clone();
                let self_value = func.bound_self.unwrap_or(Value::NULL);
                self.call_function(callee, func, args, self_value, halt_after_return)
            }
            HeapObject::CFunction(cf) => {
                let cf = cf.clone();
                self.call_cfunction(cf, args, halt_after_return);
                Ok(())
            }
            HeapObject::Class(c) => {
                let class = c.clone();
                self.construct_class(callee, class, args, halt_after_return)
            }
            other => {
                let type_name = other.type_name();
                self.throw_message(&format!(
                    "Attempted to call a non-callable type: {}",
                    type_name
                ));
                Ok(())
            }
        }
    }

    /// Push a frame for a bytecode function and jump to its block.
    pub(crate) fn call_function(
        &mut self,
        callee: Value,
        func: Function,
        args: &[Value],
        self_value: Value,
        halt_after_return: bool,
    ) -> VmResult<()> {
        if (args.len() as u32) < func.argc {
            let name = self.symbols.decode(func.name).to_string();
            self.throw_message(&format!(
                "Not enough arguments for function call: {} expects {}, got {}",
                name,
                func.argc,
                args.len()
            ));
            return Ok(());
        }

        let block = self.code_block(func.block);
        let lvarcount = (block.lvarcount as usize).max(args.len());
        let mut locals = vec![Value::NULL; lvarcount];
        locals[..args.len()].copy_from_slice(args);

        // Root everything in flight: the frame allocation below may
        // collect, and these values live nowhere else yet.
        let rooted = self.temp_roots.len();
        self.temp_roots.extend_from_slice(&locals);
        self.temp_roots.push(callee);
        self.temp_roots.push(self_value);

        let frame_value = self.alloc_value(HeapObject::Frame(Frame {
            parent: self.frame,
            environment: func.context,
            locals,
            self_value,
            return_block: self.block,
            return_ip: self.ip,
            catchtable: self.catchstack,
            halt_after_return,
            stacksize_at_entry: self.stack.len(),
        }));
        self.temp_roots.truncate(rooted);

        self.frame = frame_value.as_heap_ref();
        self.block = func.block;
        self.ip = 0;
        Ok(())
    }

    /// Invoke a native function through the call boundary.
    pub(crate) fn call_cfunction(&mut self, cf: CFunction, args: &[Value], force_halt: bool) {
        if (args.len() as u32) < cf.argc {
            let name = self.symbols.decode(cf.name).to_string();
            self.throw_message(&format!(
                "Not enough arguments for CFunction call: {} expects {}, got {}",
                name,
                cf.argc,
                args.len()
            ));
            return;
        }

        debug_assert!(
            self.heap.state() == MutatorState::Script,
            "native call entered from non-script mutator state"
        );
        self.heap.set_state(MutatorState::Native);

        let mut ctx = NativeCtx::new(self);
        // SAFETY: the entry carries the boundary signature per the
        // module contract; argv points at `args.len()` live values;
        // the context outlives the call.
        let result = unsafe { (cf.pointer)(&mut ctx as *mut NativeCtx, args.as_ptr(), args.len()) };
        let exception = ctx.take_exception();
        drop(ctx);

        self.heap.set_state(MutatorState::Script);

        match exception {
            Some(payload) => self.throw_exception(payload),
            None => {
                if cf.push_return_value {
                    self.push_stack(result);
                }
            }
        }

        if cf.halt_after_return || force_halt {
            self.halted = true;
        }
    }

    /// Construct an instance of a class.
    ///
    /// Member properties start as null; the constructor (when present)
    /// runs as an ordinary call with the fresh object bound as self.
    /// Constructors return self by compiler convention, so the
    /// object ends up on the stack either way.
    pub(crate) fn construct_class(
        &mut self,
        class_value: Value,
        class: Class,
        args: &[Value],
        halt_after_return: bool,
    ) -> VmResult<()> {
        let mut container = FxHashMap::default();
        for property in &class.member_properties {
            container.insert(*property, Value::NULL);
        }

        let rooted = self.temp_roots.len();
        self.temp_roots.extend_from_slice(args);
        self.temp_roots.push(class_value);

        let object_value = self.alloc_value(HeapObject::Object(Object {
            klass: class_value,
            container,
        }));
        self.temp_roots.truncate(rooted);

        match class.constructor {
            None => {
                self.push_stack(object_value);
                if halt_after_return {
                    self.halted = true;
                }
                Ok(())
            }
            Some(ctor) => {
                let func = match ctor.as_heap_ref().map(|r| self.heap.get(r)) {
                    Some(HeapObject::Function(f)) => f.clone(),
                    _ => {
                        let name = self.symbols.decode(class.name).to_string();
                        self.throw_message(&format!(
                            "Constructor of class {} is not a function",
                            name
                        ));
                        return Ok(());
                    }
                };
                self.call_function(ctor, func, args, object_value, halt_after_return)
            }
        }
    }

    // =========================================================================
    // Native module loading
    // =========================================================================

    /// Load a native extension module.
    ///
    /// Resolution is all-or-nothing: every name in the manifest must
    /// resolve or the load fails before anything is registered. Each
    /// resolved entry becomes a CFunction heap value carrying its
    /// declared arity, bound as a global under its name.
    pub fn load_native_module(&mut self, module: &dyn NativeModule) -> VmResult<Vec<Symbol>> {
        let resolved = resolve_module(module)?;

        let mut bound = Vec::with_capacity(resolved.len());
        for export in resolved {
            let name = self.symbols.encode_string(&export.name);
            let value = self.alloc_value(HeapObject::CFunction(CFunction {
                name,
                pointer: export.entry,
                argc: export.argc,
                push_return_value: true,
                halt_after_return: false,
            }));
            self.globals.insert(name, value);
            bound.push(name);
        }
        Ok(bound)
    }
}
