//! The native execution context.
//!
//! Native code touches the VM only through this type: it is the single
//! channel for allocating GC-managed values, raising errors, reaching
//! the scheduler surface, and opening a native section. Every
//! allocation made through the context is pinned as a GC root until
//! the context drops — the collector assumes every live reference is
//! reachable the instant an allocation may trigger a collection, and
//! native temporaries live outside the interpreter's root set.

use std::time::Instant;

use crate::value::heap::{Array, HeapObject, HeapRef, MutatorState, Object, Pointer};
use crate::value::repr::Symbol;
use crate::value::Value;
use crate::vm::scheduler::VMTask;
use crate::vm::VM;

/// Execution context handed to every native entry.
///
/// Holds a raw VM pointer rather than a borrow so the type can cross
/// the `extern "C"` boundary. The call protocol guarantees the VM
/// outlives the context: a context exists only for the duration of one
/// native call, on the stack of `call_cfunction`.
pub struct NativeCtx {
    vm: *mut VM,
    temporaries: Vec<HeapRef>,
    pending_exception: Option<Value>,
}

impl NativeCtx {
    pub(crate) fn new(vm: &mut VM) -> NativeCtx {
        NativeCtx {
            vm,
            temporaries: Vec::new(),
            pending_exception: None,
        }
    }

    #[inline]
    fn vm(&self) -> &VM {
        // SAFETY: the VM outlives the context (see type docs).
        unsafe { &*self.vm }
    }

    #[inline]
    fn vm_mut(&mut self) -> &mut VM {
        // SAFETY: as above; the context holds the only live path to
        // the VM for the duration of the native call.
        unsafe { &mut *self.vm }
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    fn alloc(&mut self, object: HeapObject) -> Value {
        let (value, r) = self.vm_mut().heap.alloc_pinned(object);
        self.temporaries.push(r);
        value
    }

    pub fn alloc_string(&mut self, s: &str) -> Value {
        self.alloc(HeapObject::String(s.into()))
    }

    pub fn alloc_array(&mut self, elements: Vec<Value>) -> Value {
        self.alloc(HeapObject::Array(Array { elements }))
    }

    pub fn alloc_object(&mut self, klass: Value) -> Value {
        self.alloc(HeapObject::Object(Object {
            klass,
            container: Default::default(),
        }))
    }

    pub fn alloc_pointer(&mut self, address: usize) -> Value {
        self.alloc(HeapObject::Pointer(Pointer { address }))
    }

    // =========================================================================
    // Errors
    // =========================================================================

    /// Raise a catchable language exception with a string payload. The
    /// interpreter unwinds after the native call returns.
    pub fn throw(&mut self, message: &str) {
        let payload = self.alloc_string(message);
        self.pending_exception = Some(payload);
    }

    /// Raise a catchable language exception with an arbitrary payload.
    pub fn throw_value(&mut self, payload: Value) {
        self.pending_exception = Some(payload);
    }

    pub(crate) fn take_exception(&mut self) -> Option<Value> {
        self.pending_exception.take()
    }

    // =========================================================================
    // Symbols and inspection
    // =========================================================================

    pub fn encode_string(&mut self, name: &str) -> Symbol {
        self.vm_mut().symbols.encode_string(name)
    }

    pub fn decode_symbol(&self, sym: Symbol) -> Option<String> {
        self.vm().symbols.decode_symbol(sym).map(|s| s.to_string())
    }

    /// String content of a heap string value.
    pub fn string_value(&self, value: Value) -> Option<String> {
        let r = value.as_heap_ref()?;
        match self.vm().heap.get(r) {
            HeapObject::String(s) => Some(s.to_string()),
            _ => None,
        }
    }

    pub fn type_name_of(&self, value: Value) -> &'static str {
        self.vm().heap.type_name_of(value)
    }

    // =========================================================================
    // Scheduler surface
    // =========================================================================

    pub fn now(&self) -> Instant {
        self.vm().now()
    }

    pub fn register_task(&mut self, task: VMTask) {
        self.vm_mut().register_task(task);
    }

    pub fn register_timer(&mut self, fire_at: Instant, task: VMTask) -> u64 {
        self.vm_mut().register_timer(fire_at, task)
    }

    pub fn register_ticker(&mut self, period: std::time::Duration, task: VMTask) -> u64 {
        self.vm_mut().register_ticker(period, task)
    }

    pub fn clear_timer(&mut self, id: u64) {
        self.vm_mut().clear_timer(id);
    }

    pub fn clear_ticker(&mut self, id: u64) {
        self.vm_mut().clear_ticker(id);
    }

    pub fn resume_thread(&mut self, uid: u64, value: Value) -> bool {
        self.vm_mut().resume_thread(uid, value)
    }

    pub fn get_thread_uid(&self) -> u64 {
        self.vm().get_thread_uid()
    }

    // =========================================================================
    // Native sections
    // =========================================================================

    /// Run pointer-free work with GC-safety obligations relaxed.
    ///
    /// Inside the closure no allocation may occur — the heap enforces
    /// this with an assertion, because an allocation could trigger a
    /// collection while references sit outside any tracked root set.
    /// Sections do not nest.
    pub fn native_section<R>(&mut self, work: impl FnOnce() -> R) -> R {
        let heap = &mut self.vm_mut().heap;
        assert!(
            heap.state() == MutatorState::Native,
            "native section opened outside a native call (state {:?})",
            heap.state()
        );
        heap.set_state(MutatorState::NativeSection);
        let result = work();
        self.vm_mut().heap.set_state(MutatorState::Native);
        result
    }
}

impl Drop for NativeCtx {
    fn drop(&mut self) {
        let vm = unsafe { &mut *self.vm };
        for r in self.temporaries.drain(..) {
            vm.heap.unpin(r);
        }
    }
}
