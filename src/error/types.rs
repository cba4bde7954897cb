//! Error type definitions for the Quill runtime.

use std::error::Error as StdError;
use std::fmt;

/// Typed error enum covering every failure the runtime reports.
///
/// Catchable language-level exceptions travel through the VM's
/// catch-table chain as `Value` payloads; a `RuntimeError` is what the
/// embedder sees when an error escapes that chain, or when a failure is
/// diagnosed before any bytecode runs (module loading, malformed units).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    // Type-related errors
    TypeMismatch {
        expected: String,
        got: String,
    },
    NotCallable {
        type_name: String,
    },

    // Argument-related errors
    NotEnoughArguments {
        name: String,
        expected: u32,
        got: u32,
    },

    // Native module load errors
    LibraryNotFound {
        path: String,
    },
    SymbolNotFound {
        module: String,
        symbol: String,
    },
    ManifestError {
        module: String,
        message: String,
    },

    // Compiled unit errors
    InvalidUnit {
        message: String,
    },

    // Exception handling
    UncaughtException {
        message: String,
    },

    // Generic fallback
    Generic {
        message: String,
    },
}

impl RuntimeError {
    /// Human-readable description of the error.
    pub fn description(&self) -> String {
        match self {
            RuntimeError::TypeMismatch { expected, got } => {
                format!("Type error: expected {}, got {}", expected, got)
            }
            RuntimeError::NotCallable { type_name } => {
                format!("Type error: attempted to call a value of type {}", type_name)
            }
            RuntimeError::NotEnoughArguments {
                name,
                expected,
                got,
            } => {
                let plural = if *expected == 1 { "argument" } else { "arguments" };
                format!(
                    "Argument error: {} expected {} {}, got {}",
                    name, expected, plural, got
                )
            }
            RuntimeError::LibraryNotFound { path } => {
                format!("Library not found: {}", path)
            }
            RuntimeError::SymbolNotFound { module, symbol } => {
                format!("Symbol '{}' not found in module '{}'", symbol, module)
            }
            RuntimeError::ManifestError { module, message } => {
                format!("Invalid manifest in module '{}': {}", module, message)
            }
            RuntimeError::InvalidUnit { message } => {
                format!("Invalid compiled unit: {}", message)
            }
            RuntimeError::UncaughtException { message } => {
                format!("Uncaught exception: {}", message)
            }
            RuntimeError::Generic { message } => {
                format!("Error: {}", message)
            }
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl StdError for RuntimeError {}

impl From<RuntimeError> for String {
    fn from(err: RuntimeError) -> String {
        err.description()
    }
}

impl From<String> for RuntimeError {
    fn from(message: String) -> RuntimeError {
        RuntimeError::Generic { message }
    }
}

impl From<&str> for RuntimeError {
    fn from(message: &str) -> RuntimeError {
        RuntimeError::Generic {
            message: message.to_string(),
        }
    }
}
