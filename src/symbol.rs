//! The symbol table: a bidirectional interner for hash-derived ids.
//!
//! Ids are pure functions of the string (see [`Symbol::from_str`]), so
//! encoding never needs the table — the table exists to answer the
//! reverse question. Each VM owns one table; nothing is global, and
//! two tables exchange contents only through the explicit bulk-merge
//! operations.

use rustc_hash::FxHashMap;

use crate::value::repr::Symbol;

/// Fallback rendering for ids that were never interned.
pub const UNDEFINED_SYMBOL: &str = "<undefined symbol>";

#[derive(Debug, Default)]
pub struct SymbolTable {
    map: FxHashMap<Symbol, Box<str>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable {
            map: FxHashMap::default(),
        }
    }

    /// Intern a string, returning its id.
    ///
    /// Idempotent: repeated calls with equal text return the same id
    /// and insert at most once. Distinct strings whose masked hashes
    /// collide alias the same id; the first registration wins the
    /// table entry.
    pub fn encode_string(&mut self, name: &str) -> Symbol {
        let sym = Symbol::from_str(name);
        self.map.entry(sym).or_insert_with(|| name.into());
        sym
    }

    /// Look up the string for an id. `None` for unknown ids — a miss
    /// is an answer, not an error.
    pub fn decode_symbol(&self, sym: Symbol) -> Option<&str> {
        self.map.get(&sym).map(|s| s.as_ref())
    }

    /// Like [`decode_symbol`](Self::decode_symbol), with the
    /// undefined-symbol fallback for display paths.
    pub fn decode(&self, sym: Symbol) -> &str {
        self.decode_symbol(sym).unwrap_or(UNDEFINED_SYMBOL)
    }

    /// Whether an id has a registered string.
    pub fn contains(&self, sym: Symbol) -> bool {
        self.map.contains_key(&sym)
    }

    /// Merge this table's entries into `dst`. Destination entries take
    /// priority: only keys absent from `dst` are inserted, so repeated
    /// or bidirectional merges are idempotent and order-independent
    /// for already-present keys.
    pub fn copy_symbols_to_table(&self, dst: &mut SymbolTable) {
        for (sym, name) in &self.map {
            dst.map.entry(*sym).or_insert_with(|| name.clone());
        }
    }

    /// Merge `src`'s entries into this table; this table's entries
    /// take priority.
    pub fn copy_symbols_from_table(&mut self, src: &SymbolTable) {
        src.copy_symbols_to_table(self);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
