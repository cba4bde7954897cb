//! Dynamic library loading for native extensions.
//!
//! A loadable module is a shared library exporting a manifest symbol
//! (`quill_module_manifest`) that returns its export table, plus one
//! symbol per declared name with the boundary signature. The manifest
//! is read once at open time; entry resolution goes through the same
//! library handle.

use std::ffi::CStr;
use std::os::raw::c_char;
use std::path::Path;

use crate::error::{RuntimeError, VmResult};

use super::{ExportDecl, NativeFn, NativeModule};

/// Name of the manifest symbol every loadable module must export.
pub const MANIFEST_SYMBOL: &[u8] = b"quill_module_manifest\0";

/// C-layout export row, as the module compiles it.
#[repr(C)]
pub struct RawExport {
    pub name: *const c_char,
    pub argc: u32,
}

/// C-layout manifest returned by the manifest symbol.
#[repr(C)]
pub struct RawManifest {
    pub exports: *const RawExport,
    pub len: usize,
}

/// Signature of the manifest symbol.
pub type ManifestFn = unsafe extern "C" fn() -> RawManifest;

/// A native extension backed by a shared library.
#[derive(Debug)]
pub struct DynamicModule {
    name: String,
    path: String,
    manifest: Vec<ExportDecl>,
    lib: libloading::Library,
}

impl DynamicModule {
    /// Open a shared library and read its manifest.
    ///
    /// Fails if the file is missing, is not a loadable library, lacks
    /// the manifest symbol, or declares a name that is not valid
    /// UTF-8. Opening performs no entry resolution; that happens in
    /// `resolve_module`, which rejects the module wholesale on the
    /// first miss.
    pub fn open(path: &str) -> VmResult<DynamicModule> {
        if !Path::new(path).exists() {
            return Err(RuntimeError::library_not_found(path));
        }

        let name = Path::new(path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(path)
            .to_string();

        // SAFETY: loading a library runs its initializers; the module
        // contract requires them to be side-effect free.
        let lib = unsafe { libloading::Library::new(path) }.map_err(|e| {
            RuntimeError::generic(format!("failed to load library '{}': {}", path, e))
        })?;

        let manifest = {
            let manifest_fn = unsafe { lib.get::<ManifestFn>(MANIFEST_SYMBOL) }.map_err(|_| {
                RuntimeError::manifest_error(&name, "missing quill_module_manifest symbol")
            })?;
            // SAFETY: the manifest symbol has the declared signature
            // per the module contract; rows are 'static in the module.
            let raw = unsafe { manifest_fn() };
            if raw.len > 0 && raw.exports.is_null() {
                return Err(RuntimeError::manifest_error(
                    &name,
                    "null export table with nonzero length",
                ));
            }
            let mut entries = Vec::with_capacity(raw.len);
            for i in 0..raw.len {
                let row = unsafe { &*raw.exports.add(i) };
                if row.name.is_null() {
                    return Err(RuntimeError::manifest_error(&name, "null export name"));
                }
                let export_name = unsafe { CStr::from_ptr(row.name) }
                    .to_str()
                    .map_err(|_| {
                        RuntimeError::manifest_error(&name, "export name is not valid UTF-8")
                    })?;
                entries.push(ExportDecl::new(export_name, row.argc));
            }
            entries
        };

        Ok(DynamicModule {
            name,
            path: path.to_string(),
            manifest,
            lib,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl NativeModule for DynamicModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn manifest(&self) -> &[ExportDecl] {
        &self.manifest
    }

    fn resolve(&self, name: &str) -> Option<NativeFn> {
        let mut symbol = Vec::with_capacity(name.len() + 1);
        symbol.extend_from_slice(name.as_bytes());
        symbol.push(0);
        // SAFETY: entries listed in the manifest carry the boundary
        // signature per the module contract.
        unsafe { self.lib.get::<NativeFn>(&symbol) }.ok().map(|s| *s)
    }
}
