//! The value system: NaN-boxed words, float helpers, and the heap.

pub mod fp;
pub mod heap;
pub mod repr;

pub use heap::{Heap, HeapObject, HeapRef, HeapTag, MutatorState};
pub use repr::{Symbol, Value};
