//! Unified error system for the Quill runtime.

mod builders;
mod types;

pub use types::RuntimeError;

/// Result alias used throughout the runtime.
pub type VmResult<T> = Result<T, RuntimeError>;
