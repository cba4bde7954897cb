//! Trait implementations for `Value`.
//!
//! Equality and hashing compare the raw word. For immediates this is
//! value equality (the canonical-NaN invariant makes NaN self-equal);
//! for heap values it is identity. Deep equality is a library-level
//! concern, not a representation concern.

use super::{Value, MASK_PAYLOAD};
use std::fmt;
use std::hash::{Hash, Hasher};

impl PartialEq for Value {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Value {}

impl Hash for Value {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl Default for Value {
    #[inline]
    fn default() -> Self {
        Value::NULL
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "null")
        } else if let Some(b) = self.as_bool() {
            write!(f, "{}", b)
        } else if let Some(i) = self.as_int() {
            write!(f, "{}", i)
        } else if let Some(fl) = self.as_float() {
            write!(f, "{}", fl)
        } else if let Some(sym) = self.as_symbol() {
            write!(f, "{}", sym)
        } else {
            write!(f, "<heap #{}>", self.0 & MASK_PAYLOAD)
        }
    }
}
