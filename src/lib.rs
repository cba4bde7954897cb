//! # Quill — a managed runtime for a dynamic scripting language
//!
//! The engineering core of the Quill virtual machine:
//!
//! 1. **Values** — every runtime datum is one NaN-boxed machine word;
//!    heap data lives in a slot arena owned by the VM's collector
//! 2. **Symbols** — strings intern to 64-bit hash-derived ids with a
//!    bidirectional table per VM
//! 3. **Native boundary** — externally compiled extensions load
//!    through a manifest contract and call through a fixed-signature,
//!    GC-aware protocol
//! 4. **Scheduler** — a single-threaded cooperative engine: task
//!    queue, time-ordered timers and tickers, suspendable fibers
//!
//! The parser and compiler are external collaborators: the VM consumes
//! a finished [`CompiledUnit`] and never sees source text.
//!
//! ## Quick start
//!
//! ```
//! use quill::{Clock, CompiledUnit, Constant, Instruction, VM};
//!
//! let mut vm = VM::with_clock(Clock::virtual_clock());
//! let unit = CompiledUnit::single(
//!     vec![Constant::Int(42)],
//!     0,
//!     vec![Instruction::PutValue(0), Instruction::Return],
//! );
//! let result = vm.execute(unit).unwrap();
//! assert_eq!(result.as_int(), Some(42));
//! ```

pub mod error;
pub mod native;
pub mod symbol;
pub mod value;
pub mod vm;

pub use error::{RuntimeError, VmResult};
pub use native::{BuiltinModule, DynamicModule, ExportDecl, NativeCtx, NativeFn, NativeModule};
pub use symbol::SymbolTable;
pub use value::{Heap, HeapObject, HeapRef, HeapTag, Symbol, Value};
pub use vm::{
    Clock, CodeBlock, CompiledUnit, Constant, FiberStatus, Instruction, Syscall, VMTask, VM,
};
