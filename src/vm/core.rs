//! The virtual machine: owned state and shared machinery.
//!
//! One `VM` instance exclusively owns its heap, symbol table and
//! schedule. The interpreter keeps *all* execution state in VM fields
//! (operand stack, heap frames, block/ip cursor) rather than on the
//! Rust call stack, so suspending a fiber is a plain field snapshot.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::error::{RuntimeError, VmResult};
use crate::symbol::SymbolTable;
use crate::value::heap::{CatchTable, Frame, Heap, HeapObject, HeapRef};
use crate::value::repr::Symbol;
use crate::value::Value;

use super::fiber::FiberStatus;
use super::instruction::{BlockId, CodeBlock, CompiledUnit, Constant, Instruction};
use super::scheduler::{Clock, Scheduler};

pub(crate) type StackVec = SmallVec<[Value; 256]>;

/// A compiled unit with constants materialized into values.
pub(crate) struct LoadedUnit {
    pub blocks: Vec<CodeBlock>,
    pub constants: Vec<Value>,
}

pub struct VM {
    pub heap: Heap,
    pub symbols: SymbolTable,

    // Execution state of the currently running fiber
    pub(crate) stack: StackVec,
    pub(crate) frame: Option<HeapRef>,
    pub(crate) catchstack: Option<HeapRef>,
    pub(crate) block: BlockId,
    pub(crate) ip: usize,
    pub(crate) uid: u64,

    pub(crate) globals: FxHashMap<Symbol, Value>,
    pub(crate) unit: Option<LoadedUnit>,
    pub(crate) scheduler: Scheduler,

    /// Stops the dispatch loop (frame return, suspension, exit).
    pub(crate) halted: bool,
    /// Cleared by `Exit`; stops the scheduler loop as well.
    pub(crate) running: bool,
    pub(crate) exit_status: i32,
    /// Exception that escaped every catch table of the current fiber.
    pub(crate) uncaught: Option<RuntimeError>,
    /// Errors that terminated scheduled fibers.
    pub(crate) fiber_errors: Vec<RuntimeError>,

    /// Values in flight between a stack pop and the allocation that
    /// will own them. Rooted during collection.
    pub(crate) temp_roots: Vec<Value>,
}

impl VM {
    pub fn new() -> Self {
        Self::with_clock(Clock::monotonic())
    }

    /// A VM whose scheduler runs on the given clock. Tests use the
    /// virtual clock for deterministic timer runs.
    pub fn with_clock(clock: Clock) -> Self {
        VM {
            heap: Heap::new(),
            symbols: SymbolTable::new(),
            stack: SmallVec::new(),
            frame: None,
            catchstack: None,
            block: 0,
            ip: 0,
            uid: 0,
            globals: FxHashMap::default(),
            unit: None,
            scheduler: Scheduler::new(clock),
            halted: false,
            running: true,
            exit_status: 0,
            uncaught: None,
            fiber_errors: Vec::new(),
            temp_roots: Vec::new(),
        }
    }

    /// Status code set by the `Exit` syscall.
    pub fn exit_status(&self) -> i32 {
        self.exit_status
    }

    /// Errors that terminated scheduled fibers, drained.
    pub fn take_fiber_errors(&mut self) -> Vec<RuntimeError> {
        std::mem::take(&mut self.fiber_errors)
    }

    // =========================================================================
    // Globals
    // =========================================================================

    pub fn set_global(&mut self, sym: Symbol, value: Value) {
        self.globals.insert(sym, value);
    }

    pub fn get_global(&self, sym: Symbol) -> Option<Value> {
        self.globals.get(&sym).copied()
    }

    /// Intern a name and bind a global in one step.
    pub fn bind_global(&mut self, name: &str, value: Value) -> Symbol {
        let sym = self.symbols.encode_string(name);
        self.globals.insert(sym, value);
        sym
    }

    // =========================================================================
    // Unit loading
    // =========================================================================

    /// Validate a compiled unit and materialize its constant pool.
    ///
    /// Every constant and block index embedded in the instructions is
    /// checked here, before the first instruction runs; the dispatch
    /// loop may then index without re-validation. Symbol constants are
    /// interned, so every embedded symbol reference is resolvable via
    /// `decode_symbol` afterwards.
    pub fn load_unit(&mut self, unit: CompiledUnit) -> VmResult<()> {
        if unit.blocks.is_empty() {
            return Err(RuntimeError::invalid_unit("unit has no code blocks"));
        }
        if (unit.entry as usize) >= unit.blocks.len() {
            return Err(RuntimeError::invalid_unit(format!(
                "entry block {} out of range ({} blocks)",
                unit.entry,
                unit.blocks.len()
            )));
        }

        let nconsts = unit.constants.len();
        let nblocks = unit.blocks.len();
        let check_const = |index: u16| -> VmResult<()> {
            if (index as usize) < nconsts {
                Ok(())
            } else {
                Err(RuntimeError::invalid_unit(format!(
                    "constant index {} out of range ({} constants)",
                    index, nconsts
                )))
            }
        };

        for block in &unit.blocks {
            for instruction in &block.code {
                match *instruction {
                    Instruction::PutValue(index)
                    | Instruction::ReadGlobal(index)
                    | Instruction::SetGlobal(index)
                    | Instruction::ReadMember(index)
                    | Instruction::SetMember(index) => check_const(index)?,
                    Instruction::PutFunction { name, block, .. } => {
                        check_const(name)?;
                        if (block as usize) >= nblocks {
                            return Err(RuntimeError::invalid_unit(format!(
                                "function block {} out of range ({} blocks)",
                                block, nblocks
                            )));
                        }
                    }
                    Instruction::PutClass { name, .. } => check_const(name)?,
                    _ => {}
                }
            }
        }

        let mut constants = Vec::with_capacity(nconsts);
        for constant in &unit.constants {
            let value = match constant {
                Constant::Null => Value::NULL,
                Constant::Bool(b) => Value::bool(*b),
                Constant::Int(n) => Value::number(*n),
                Constant::Float(f) => Value::float(*f),
                Constant::Str(s) => self.heap.alloc(HeapObject::String(s.as_str().into())),
                Constant::Sym(s) => Value::symbol(self.symbols.encode_string(s)),
            };
            constants.push(value);
        }

        self.unit = Some(LoadedUnit {
            blocks: unit.blocks,
            constants,
        });
        self.block = unit.entry;
        self.ip = 0;
        Ok(())
    }

    pub(crate) fn loaded_unit(&self) -> &LoadedUnit {
        self.unit
            .as_ref()
            .expect("no compiled unit loaded into the VM")
    }

    pub(crate) fn code_block(&self, id: BlockId) -> &CodeBlock {
        &self.loaded_unit().blocks[id as usize]
    }

    pub(crate) fn constant(&self, index: u16) -> Value {
        self.loaded_unit().constants[index as usize]
    }

    /// Symbol stored at a constant index. The compiler emits symbol
    /// constants for every name operand; anything else is a defect in
    /// the unit.
    pub(crate) fn constant_symbol(&self, index: u16) -> VmResult<Symbol> {
        self.constant(index).as_symbol().ok_or_else(|| {
            RuntimeError::invalid_unit(format!("constant {} is not a symbol", index))
        })
    }

    // =========================================================================
    // Stack helpers
    // =========================================================================

    #[inline]
    pub(crate) fn push_stack(&mut self, value: Value) {
        self.stack.push(value);
    }

    #[inline]
    pub(crate) fn pop_stack(&mut self) -> VmResult<Value> {
        self.stack
            .pop()
            .ok_or_else(|| RuntimeError::invalid_unit("pop from empty operand stack"))
    }

    /// Pop `count` values, preserving push order in the result.
    pub(crate) fn pop_n(&mut self, count: usize) -> VmResult<Vec<Value>> {
        if self.stack.len() < count {
            return Err(RuntimeError::invalid_unit(format!(
                "pop of {} operands from a stack of {}",
                count,
                self.stack.len()
            )));
        }
        let split = self.stack.len() - count;
        Ok(self.stack.drain(split..).collect())
    }

    // =========================================================================
    // Frame / catch table access
    // =========================================================================

    pub(crate) fn frame_at(&self, r: HeapRef) -> &Frame {
        match self.heap.get(r) {
            HeapObject::Frame(f) => f,
            other => panic!("expected frame in slot, found {}", other.type_name()),
        }
    }

    pub(crate) fn frame_at_mut(&mut self, r: HeapRef) -> &mut Frame {
        match self.heap.get_mut(r) {
            HeapObject::Frame(f) => f,
            other => panic!("expected frame in slot, found {}", other.type_name()),
        }
    }

    pub(crate) fn catchtable_at(&self, r: HeapRef) -> &CatchTable {
        match self.heap.get(r) {
            HeapObject::CatchTable(ct) => ct,
            other => panic!("expected catch table in slot, found {}", other.type_name()),
        }
    }

    pub(crate) fn current_frame(&self) -> VmResult<HeapRef> {
        self.frame
            .ok_or_else(|| RuntimeError::invalid_unit("instruction requires an active frame"))
    }

    // =========================================================================
    // Exceptions
    // =========================================================================

    /// Throw a catchable language exception: unwind to the innermost
    /// catch table, restoring its frame and operand-stack depth and
    /// delivering the payload. With no handler the fiber terminates
    /// and the payload becomes an uncaught-exception error.
    pub(crate) fn throw_exception(&mut self, payload: Value) {
        match self.catchstack {
            Some(r) => {
                let ct = self.catchtable_at(r).clone();
                self.catchstack = ct.parent;
                self.frame = ct.frame;
                self.stack.truncate(ct.stacksize);
                self.block = ct.block;
                self.ip = ct.ip;
                self.push_stack(payload);
            }
            None => {
                let message = self.heap.display_value(payload);
                self.uncaught = Some(RuntimeError::uncaught_exception(message));
                self.halted = true;
            }
        }
    }

    /// Throw with a freshly allocated string payload.
    pub(crate) fn throw_message(&mut self, message: &str) {
        let payload = self.alloc_value(HeapObject::String(message.into()));
        self.throw_exception(payload);
    }

    // =========================================================================
    // Allocation and collection
    // =========================================================================

    /// Allocate through the collector trigger: when the allocation
    /// budget is exhausted, collect with the full root set first.
    pub(crate) fn alloc_value(&mut self, object: HeapObject) -> Value {
        if self.heap.should_collect() {
            self.collect_garbage();
        }
        self.heap.alloc(object)
    }

    /// Run a full mark-and-sweep over everything this VM can reach.
    pub fn collect_garbage(&mut self) -> usize {
        let mut values: Vec<Value> = Vec::new();
        let mut refs: Vec<HeapRef> = Vec::new();

        values.extend_from_slice(&self.stack);
        values.extend(self.globals.values().copied());
        values.extend_from_slice(&self.temp_roots);
        if let Some(unit) = &self.unit {
            values.extend_from_slice(&unit.constants);
        }
        if let Some(frame) = self.frame {
            refs.push(frame);
        }
        if let Some(ct) = self.catchstack {
            refs.push(ct);
        }
        self.scheduler.gather_roots(&mut values, &mut refs);

        self.heap.collect(&values, &refs)
    }

    // =========================================================================
    // Misc
    // =========================================================================

    /// Whether a value is callable (function, cfunction, or class).
    pub(crate) fn is_callable(&self, value: Value) -> bool {
        match value.as_heap_ref() {
            Some(r) => matches!(
                self.heap.get(r),
                HeapObject::Function(_) | HeapObject::CFunction(_) | HeapObject::Class(_)
            ),
            None => false,
        }
    }

    /// Symbolize any value, the way the language's symbol cast does:
    /// strings by content, numbers by decimal rendering, booleans and
    /// null by keyword, everything else by type name.
    pub fn encode_value(&mut self, value: Value) -> Symbol {
        if let Some(r) = value.as_heap_ref() {
            let text = match self.heap.get(r) {
                HeapObject::String(s) => s.to_string(),
                other => format!("<{}>", other.type_name()),
            };
            return self.symbols.encode_string(&text);
        }
        if let Some(sym) = value.as_symbol() {
            return sym;
        }
        let text = if let Some(i) = value.as_int() {
            i.to_string()
        } else if let Some(f) = value.as_float() {
            f.to_string()
        } else if let Some(b) = value.as_bool() {
            b.to_string()
        } else {
            "null".to_string()
        };
        self.symbols.encode_string(&text)
    }

    /// Current fiber uid — the id `suspend_thread` would park under.
    pub fn get_thread_uid(&self) -> u64 {
        self.uid
    }

    /// Observable fiber state, mostly for embedders and tests.
    pub fn fiber_status(&self, uid: u64) -> FiberStatus {
        if uid == self.uid && !self.halted {
            return FiberStatus::Running;
        }
        if self.scheduler.is_parked(uid) {
            if self.scheduler.has_queued_resume(uid) {
                FiberStatus::Runnable
            } else {
                FiberStatus::Suspended
            }
        } else {
            FiberStatus::Terminated
        }
    }
}

impl Default for VM {
    fn default() -> Self {
        Self::new()
    }
}
