//! Heap-allocated value types and the collector that owns them.
//!
//! Everything that does not fit in a NaN-boxed word lives here: the
//! nine tagged container types, stored in a slot arena owned by one VM
//! instance. A pointer `Value` carries a slot index; dereferencing
//! goes through the arena, never through a raw address.
//!
//! The collector is a plain mark-and-sweep. Collection only happens at
//! allocation points while the mutator is in the scripting state; the
//! native-call boundary switches the state and routes its allocations
//! through pinned slots so a collection can never observe an untracked
//! reference.

use rustc_hash::FxHashMap;

use crate::native::NativeFn;
use crate::value::repr::{Symbol, Value};
use crate::vm::instruction::BlockId;

/// Reference to a live arena slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapRef(u32);

impl HeapRef {
    #[inline]
    pub(crate) fn from_index(index: u32) -> HeapRef {
        HeapRef(index)
    }

    #[inline]
    pub(crate) fn index(self) -> u32 {
        self.0
    }
}

/// Mutator state the heap is currently in.
///
/// Allocation is legal in `Script`. In `Native`, allocation must go
/// through a native execution context, which pins every temporary so
/// the collector can see it. In a `NativeSection` allocation is
/// forbidden outright: the section contract is pointer-free work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutatorState {
    Script,
    Native,
    NativeSection,
}

/// Discriminant for heap object types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HeapTag {
    Object = 0,
    Array = 1,
    String = 2,
    Function = 3,
    CFunction = 4,
    Class = 5,
    Frame = 6,
    CatchTable = 7,
    Pointer = 8,
}

/// A generic object: class reference plus symbol-keyed fields.
#[derive(Debug, Clone)]
pub struct Object {
    pub klass: Value,
    pub container: FxHashMap<Symbol, Value>,
}

#[derive(Debug, Clone)]
pub struct Array {
    pub elements: Vec<Value>,
}

/// A bytecode function defined inside the virtual machine.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: Symbol,
    pub argc: u32,
    pub lvarcount: u32,
    /// Lexical context: the frame this function closes over.
    pub context: Option<HeapRef>,
    pub block: BlockId,
    pub anonymous: bool,
    pub bound_self: Option<Value>,
}

/// An externally compiled function: a native entry pointer plus the
/// metadata the call protocol needs.
///
/// Invariant: `argc` equals the number of operands the interpreter
/// pops before invocation.
#[derive(Clone)]
pub struct CFunction {
    pub name: Symbol,
    pub pointer: NativeFn,
    pub argc: u32,
    pub push_return_value: bool,
    pub halt_after_return: bool,
}

impl std::fmt::Debug for CFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CFunction")
            .field("name", &self.name)
            .field("argc", &self.argc)
            .field("push_return_value", &self.push_return_value)
            .field("halt_after_return", &self.halt_after_return)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Class {
    pub name: Symbol,
    pub constructor: Option<Value>,
    pub member_properties: Vec<Symbol>,
    /// Prototype object holding the class methods.
    pub prototype: Option<HeapRef>,
    pub parent_class: Option<Value>,
}

/// An activation frame. Frames live on the heap so that a fiber
/// snapshot is a handful of references, not a copied call stack.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Caller frame.
    pub parent: Option<HeapRef>,
    /// Lexical parent (the defining function's context frame).
    pub environment: Option<HeapRef>,
    pub locals: Vec<Value>,
    pub self_value: Value,
    pub return_block: BlockId,
    pub return_ip: usize,
    /// Catch table active when this frame was entered.
    pub catchtable: Option<HeapRef>,
    /// Stop the dispatch loop when this frame returns.
    pub halt_after_return: bool,
    pub stacksize_at_entry: usize,
}

/// Exception handler registration.
#[derive(Debug, Clone)]
pub struct CatchTable {
    pub block: BlockId,
    pub ip: usize,
    /// Operand stack depth to restore when unwinding to this handler.
    pub stacksize: usize,
    pub frame: Option<HeapRef>,
    pub parent: Option<HeapRef>,
}

/// An opaque external address handed across the native boundary.
#[derive(Debug, Clone)]
pub struct Pointer {
    pub address: usize,
}

/// All heap-allocated value types.
#[derive(Debug)]
pub enum HeapObject {
    Object(Object),
    Array(Array),
    String(Box<str>),
    Function(Function),
    CFunction(CFunction),
    Class(Class),
    Frame(Frame),
    CatchTable(CatchTable),
    Pointer(Pointer),
}

impl HeapObject {
    #[inline]
    pub fn tag(&self) -> HeapTag {
        match self {
            HeapObject::Object(_) => HeapTag::Object,
            HeapObject::Array(_) => HeapTag::Array,
            HeapObject::String(_) => HeapTag::String,
            HeapObject::Function(_) => HeapTag::Function,
            HeapObject::CFunction(_) => HeapTag::CFunction,
            HeapObject::Class(_) => HeapTag::Class,
            HeapObject::Frame(_) => HeapTag::Frame,
            HeapObject::CatchTable(_) => HeapTag::CatchTable,
            HeapObject::Pointer(_) => HeapTag::Pointer,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            HeapObject::Object(_) => "object",
            HeapObject::Array(_) => "array",
            HeapObject::String(_) => "string",
            HeapObject::Function(_) => "function",
            HeapObject::CFunction(_) => "cfunction",
            HeapObject::Class(_) => "class",
            HeapObject::Frame(_) => "frame",
            HeapObject::CatchTable(_) => "catchtable",
            HeapObject::Pointer(_) => "pointer",
        }
    }

    /// Whether `copy_value` accepts this type. Class, Frame,
    /// CatchTable and Pointer are execution or identity state; copying
    /// them has no coherent meaning.
    pub fn is_copyable(&self) -> bool {
        matches!(
            self,
            HeapObject::Object(_)
                | HeapObject::Array(_)
                | HeapObject::String(_)
                | HeapObject::Function(_)
                | HeapObject::CFunction(_)
        )
    }
}

struct Slot {
    mark: bool,
    /// Pin count from native execution contexts. Pinned slots are
    /// unconditional GC roots.
    pins: u32,
    object: HeapObject,
}

/// Initial allocation budget between collections.
const GC_BASE_THRESHOLD: usize = 1024;

/// The slot arena plus collector bookkeeping.
pub struct Heap {
    slots: Vec<Option<Slot>>,
    free: Vec<u32>,
    state: MutatorState,
    allocated_since_gc: usize,
    gc_threshold: usize,
}

impl Heap {
    pub fn new() -> Self {
        Heap {
            slots: Vec::new(),
            free: Vec::new(),
            state: MutatorState::Script,
            allocated_since_gc: 0,
            gc_threshold: GC_BASE_THRESHOLD,
        }
    }

    #[inline]
    pub fn state(&self) -> MutatorState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: MutatorState) {
        self.state = state;
    }

    /// Allocate a heap object and return the pointer value.
    ///
    /// Only legal while the mutator is in the scripting state. Native
    /// code allocates through its execution context instead, which
    /// pins the result; an allocation from the wrong state is a defect
    /// in runtime or native code, not a user-triggerable condition.
    pub fn alloc(&mut self, object: HeapObject) -> Value {
        assert!(
            self.state == MutatorState::Script,
            "heap allocation outside the scripting mutator state ({:?})",
            self.state
        );
        Value::heap_ref(self.alloc_slot(object))
    }

    /// Allocation path for native execution contexts: legal in the
    /// native state, pins the slot until the context releases it.
    pub(crate) fn alloc_pinned(&mut self, object: HeapObject) -> (Value, HeapRef) {
        assert!(
            self.state != MutatorState::NativeSection,
            "heap allocation inside a native section"
        );
        let r = self.alloc_slot(object);
        self.pin(r);
        (Value::heap_ref(r), r)
    }

    fn alloc_slot(&mut self, object: HeapObject) -> HeapRef {
        self.allocated_since_gc += 1;
        let slot = Slot {
            mark: false,
            pins: 0,
            object,
        };
        match self.free.pop() {
            Some(index) => {
                debug_assert!(self.slots[index as usize].is_none());
                self.slots[index as usize] = Some(slot);
                HeapRef(index)
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Some(slot));
                HeapRef(index)
            }
        }
    }

    /// Dereference a heap value. A dead slot is an internal
    /// consistency violation: the collector only frees unreachable
    /// objects, so a live reference to a dead slot means a missing
    /// root.
    #[inline]
    pub fn get(&self, r: HeapRef) -> &HeapObject {
        match self.slots.get(r.0 as usize) {
            Some(Some(slot)) => &slot.object,
            _ => panic!("dereference of dead heap slot #{}", r.0),
        }
    }

    #[inline]
    pub fn get_mut(&mut self, r: HeapRef) -> &mut HeapObject {
        match self.slots.get_mut(r.0 as usize) {
            Some(Some(slot)) => &mut slot.object,
            _ => panic!("dereference of dead heap slot #{}", r.0),
        }
    }

    #[inline]
    pub fn try_get(&self, r: HeapRef) -> Option<&HeapObject> {
        self.slots.get(r.0 as usize)?.as_ref().map(|s| &s.object)
    }

    /// Type name for diagnostics; answers for immediates too.
    pub fn type_name_of(&self, value: Value) -> &'static str {
        match value.as_heap_ref() {
            Some(r) => self.get(r).type_name(),
            None => value.immediate_type_name(),
        }
    }

    pub(crate) fn pin(&mut self, r: HeapRef) {
        match self.slots.get_mut(r.0 as usize) {
            Some(Some(slot)) => slot.pins += 1,
            _ => panic!("pin of dead heap slot #{}", r.0),
        }
    }

    pub(crate) fn unpin(&mut self, r: HeapRef) {
        match self.slots.get_mut(r.0 as usize) {
            Some(Some(slot)) => {
                debug_assert!(slot.pins > 0, "unpin of unpinned slot #{}", r.0);
                slot.pins = slot.pins.saturating_sub(1);
            }
            _ => panic!("unpin of dead heap slot #{}", r.0),
        }
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    // =========================================================================
    // Copy semantics
    // =========================================================================

    /// Copy a value according to its type's copy semantics:
    /// Object/Array/Function/CFunction deep-clone into fresh
    /// allocations, String duplicates its backing bytes, immediates
    /// copy trivially.
    ///
    /// # Panics
    /// Copying Class, Frame, CatchTable or Pointer is an internal
    /// consistency violation.
    pub fn copy_value(&mut self, value: Value) -> Value {
        let mut memo: FxHashMap<HeapRef, HeapRef> = FxHashMap::default();
        self.copy_with_memo(value, &mut memo)
    }

    fn copy_with_memo(&mut self, value: Value, memo: &mut FxHashMap<HeapRef, HeapRef>) -> Value {
        let r = match value.as_heap_ref() {
            Some(r) => r,
            None => return value,
        };
        if let Some(&copied) = memo.get(&r) {
            return Value::heap_ref(copied);
        }

        match self.get(r) {
            HeapObject::String(s) => {
                let duplicated = s.clone();
                let copy = self.alloc_slot(HeapObject::String(duplicated));
                memo.insert(r, copy);
                Value::heap_ref(copy)
            }
            HeapObject::CFunction(cf) => {
                let cloned = cf.clone();
                let copy = self.alloc_slot(HeapObject::CFunction(cloned));
                memo.insert(r, copy);
                Value::heap_ref(copy)
            }
            HeapObject::Function(f) => {
                // The function's metadata is cloned; its captured
                // context is execution state and stays shared (frames
                // are non-copyable by definition).
                let cloned = f.clone();
                let copy = self.alloc_slot(HeapObject::Function(cloned));
                memo.insert(r, copy);
                Value::heap_ref(copy)
            }
            HeapObject::Array(a) => {
                let elements = a.elements.clone();
                let copy = self.alloc_slot(HeapObject::Array(Array {
                    elements: Vec::new(),
                }));
                memo.insert(r, copy);
                let copied: Vec<Value> = elements
                    .into_iter()
                    .map(|e| self.copy_with_memo(e, memo))
                    .collect();
                match self.get_mut(copy) {
                    HeapObject::Array(a) => a.elements = copied,
                    _ => unreachable!(),
                }
                Value::heap_ref(copy)
            }
            HeapObject::Object(o) => {
                let klass = o.klass;
                let entries: Vec<(Symbol, Value)> =
                    o.container.iter().map(|(k, v)| (*k, *v)).collect();
                let copy = self.alloc_slot(HeapObject::Object(Object {
                    klass,
                    container: FxHashMap::default(),
                }));
                memo.insert(r, copy);
                for (key, member) in entries {
                    let copied = self.copy_with_memo(member, memo);
                    match self.get_mut(copy) {
                        HeapObject::Object(o) => {
                            o.container.insert(key, copied);
                        }
                        _ => unreachable!(),
                    }
                }
                Value::heap_ref(copy)
            }
            other => panic!(
                "attempted to copy non-copyable heap type: {}",
                other.type_name()
            ),
        }
    }

    // =========================================================================
    // Collection
    // =========================================================================

    #[inline]
    pub fn should_collect(&self) -> bool {
        self.allocated_since_gc >= self.gc_threshold
    }

    /// Mark from the given roots and sweep everything unreachable.
    /// Pinned slots are roots regardless of the argument lists.
    /// Returns the number of freed slots.
    pub fn collect(&mut self, value_roots: &[Value], ref_roots: &[HeapRef]) -> usize {
        debug_assert!(
            self.state == MutatorState::Script,
            "collection outside the scripting mutator state"
        );

        for slot in self.slots.iter_mut().flatten() {
            slot.mark = false;
        }

        let mut worklist: Vec<HeapRef> = Vec::new();
        for root in value_roots {
            if let Some(r) = root.as_heap_ref() {
                worklist.push(r);
            }
        }
        worklist.extend_from_slice(ref_roots);
        for (index, slot) in self.slots.iter().enumerate() {
            if let Some(slot) = slot {
                if slot.pins > 0 {
                    worklist.push(HeapRef(index as u32));
                }
            }
        }

        while let Some(r) = worklist.pop() {
            let slot = match self.slots.get_mut(r.0 as usize) {
                Some(Some(slot)) => slot,
                _ => panic!("marked reference to dead heap slot #{}", r.0),
            };
            if slot.mark {
                continue;
            }
            slot.mark = true;
            trace_children(&slot.object, &mut worklist);
        }

        let mut freed = 0;
        for (index, entry) in self.slots.iter_mut().enumerate() {
            let dead = matches!(entry, Some(slot) if !slot.mark);
            if dead {
                *entry = None;
                self.free.push(index as u32);
                freed += 1;
            }
        }

        self.allocated_since_gc = 0;
        let live = self.slots.len() - self.free.len();
        self.gc_threshold = GC_BASE_THRESHOLD.max(live * 2);
        freed
    }

    // =========================================================================
    // Display
    // =========================================================================

    /// Render a value for the string cast. Shallow for containers.
    pub fn display_value(&self, value: Value) -> String {
        match value.as_heap_ref() {
            None => format!("{:?}", value),
            Some(r) => match self.get(r) {
                HeapObject::String(s) => s.to_string(),
                HeapObject::Array(a) => format!("<array[{}]>", a.elements.len()),
                HeapObject::Object(_) => "<object>".to_string(),
                HeapObject::Function(_) => "<function>".to_string(),
                HeapObject::CFunction(_) => "<cfunction>".to_string(),
                HeapObject::Class(_) => "<class>".to_string(),
                HeapObject::Frame(_) => "<frame>".to_string(),
                HeapObject::CatchTable(_) => "<catchtable>".to_string(),
                HeapObject::Pointer(p) => format!("<pointer {:#x}>", p.address),
            },
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

/// Push every reference a heap object holds onto the mark worklist.
fn trace_children(object: &HeapObject, worklist: &mut Vec<HeapRef>) {
    let push_value = |v: Value, worklist: &mut Vec<HeapRef>| {
        if let Some(r) = v.as_heap_ref() {
            worklist.push(r);
        }
    };

    match object {
        HeapObject::String(_) | HeapObject::CFunction(_) | HeapObject::Pointer(_) => {}
        HeapObject::Object(o) => {
            push_value(o.klass, worklist);
            for v in o.container.values() {
                push_value(*v, worklist);
            }
        }
        HeapObject::Array(a) => {
            for v in &a.elements {
                push_value(*v, worklist);
            }
        }
        HeapObject::Function(f) => {
            if let Some(ctx) = f.context {
                worklist.push(ctx);
            }
            if let Some(bound) = f.bound_self {
                push_value(bound, worklist);
            }
        }
        HeapObject::Class(c) => {
            if let Some(ctor) = c.constructor {
                push_value(ctor, worklist);
            }
            if let Some(proto) = c.prototype {
                worklist.push(proto);
            }
            if let Some(parent) = c.parent_class {
                push_value(parent, worklist);
            }
        }
        HeapObject::Frame(fr) => {
            if let Some(parent) = fr.parent {
                worklist.push(parent);
            }
            if let Some(env) = fr.environment {
                worklist.push(env);
            }
            for v in &fr.locals {
                push_value(*v, worklist);
            }
            push_value(fr.self_value, worklist);
            if let Some(ct) = fr.catchtable {
                worklist.push(ct);
            }
        }
        HeapObject::CatchTable(ct) => {
            if let Some(frame) = ct.frame {
                worklist.push(frame);
            }
            if let Some(parent) = ct.parent {
                worklist.push(parent);
            }
        }
    }
}
