//! Value constructors for the immediate types.
//!
//! Heap values are constructed through `Heap::alloc`, which returns an
//! already-encoded pointer value; this module only covers the types
//! that fit in the word itself.

use super::{
    Symbol, Value, INT_MAX, INT_MIN, MASK_NAN_CLASS, MASK_PAYLOAD, NAN_BITS, SIG_INT, SIG_POINTER,
};
use crate::value::heap::HeapRef;

impl Value {
    /// Create a null value.
    #[inline]
    pub fn null() -> Self {
        Self::NULL
    }

    /// Create a boolean value.
    #[inline]
    pub fn bool(b: bool) -> Self {
        if b {
            Self::TRUE
        } else {
            Self::FALSE
        }
    }

    /// Create an integer value.
    ///
    /// # Panics
    /// Debug-panics if the integer is outside the 48-bit signed range.
    /// Callers converting from wider types go through [`Value::number`].
    #[inline]
    pub fn int(n: i64) -> Self {
        debug_assert!(
            (INT_MIN..=INT_MAX).contains(&n),
            "integer {} out of 48-bit range [{}, {}]",
            n,
            INT_MIN,
            INT_MAX
        );
        // Store as sign-extended 48 bits
        Value(SIG_INT | ((n as u64) & MASK_PAYLOAD))
    }

    /// Create a float value.
    ///
    /// Quiet NaNs of either sign canonicalize to the single runtime
    /// NaN pattern so that no float can alias a tag signature.
    /// Infinities and signaling NaNs are outside the reserved class
    /// and encode unchanged.
    #[inline]
    pub fn float(f: f64) -> Self {
        let bits = f.to_bits();
        if bits & MASK_NAN_CLASS == NAN_BITS {
            return Self::NAN;
        }
        Value(bits)
    }

    /// Create a number from an `i64` of arbitrary magnitude: an
    /// integer when it fits the 48-bit payload, otherwise a float.
    #[inline]
    pub fn number(n: i64) -> Self {
        if (INT_MIN..=INT_MAX).contains(&n) {
            Self::int(n)
        } else {
            Self::float(n as f64)
        }
    }

    /// Create a number from a double: an integer when the value is
    /// integral and fits the payload, otherwise a float.
    #[inline]
    pub fn number_from_float(f: f64) -> Self {
        if f.fract() == 0.0 && f >= INT_MIN as f64 && f <= INT_MAX as f64 {
            Self::int(f as i64)
        } else {
            Self::float(f)
        }
    }

    /// Create a symbol value.
    #[inline]
    pub fn symbol(sym: Symbol) -> Self {
        Value(sym.0)
    }

    /// Create a heap pointer value from an arena slot reference.
    #[inline]
    pub fn heap_ref(r: HeapRef) -> Self {
        Value(SIG_POINTER | r.index() as u64)
    }
}
