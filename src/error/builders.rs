//! Builder constructors for `RuntimeError`.

use super::types::RuntimeError;

impl RuntimeError {
    pub fn type_mismatch(expected: impl Into<String>, got: impl Into<String>) -> Self {
        RuntimeError::TypeMismatch {
            expected: expected.into(),
            got: got.into(),
        }
    }

    pub fn not_callable(type_name: impl Into<String>) -> Self {
        RuntimeError::NotCallable {
            type_name: type_name.into(),
        }
    }

    pub fn not_enough_arguments(name: impl Into<String>, expected: u32, got: u32) -> Self {
        RuntimeError::NotEnoughArguments {
            name: name.into(),
            expected,
            got,
        }
    }

    pub fn library_not_found(path: impl Into<String>) -> Self {
        RuntimeError::LibraryNotFound { path: path.into() }
    }

    pub fn symbol_not_found(module: impl Into<String>, symbol: impl Into<String>) -> Self {
        RuntimeError::SymbolNotFound {
            module: module.into(),
            symbol: symbol.into(),
        }
    }

    pub fn manifest_error(module: impl Into<String>, message: impl Into<String>) -> Self {
        RuntimeError::ManifestError {
            module: module.into(),
            message: message.into(),
        }
    }

    pub fn invalid_unit(message: impl Into<String>) -> Self {
        RuntimeError::InvalidUnit {
            message: message.into(),
        }
    }

    pub fn uncaught_exception(message: impl Into<String>) -> Self {
        RuntimeError::UncaughtException {
            message: message.into(),
        }
    }

    pub fn generic(message: impl Into<String>) -> Self {
        RuntimeError::Generic {
            message: message.into(),
        }
    }
}
