//! Value accessors: tag predicates and typed extraction.

use super::{
    Symbol, Value, MASK_INT_SIGN, MASK_NAN_CLASS, MASK_PAYLOAD, MASK_SIGNATURE, NAN_BITS,
    SIG_FALSE, SIG_INT, SIG_NULL, SIG_POINTER, SIG_SYMBOL, SIG_TRUE,
};
use crate::value::fp::to_safe_double;
use crate::value::heap::HeapRef;

impl Value {
    // =========================================================================
    // Tag Predicates
    // =========================================================================

    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == SIG_NULL
    }

    #[inline]
    pub fn is_bool(self) -> bool {
        self.0 == SIG_TRUE || self.0 == SIG_FALSE
    }

    /// The canonical runtime NaN.
    #[inline]
    pub fn is_nan(self) -> bool {
        self.0 == NAN_BITS
    }

    /// Any ordinary double, including the canonical NaN.
    ///
    /// Tag class test first: a word is a float iff it is the canonical
    /// NaN or its quiet-NaN header bits are not all set.
    #[inline]
    pub fn is_float(self) -> bool {
        self.0 == NAN_BITS || (self.0 & MASK_NAN_CLASS) != NAN_BITS
    }

    #[inline]
    pub fn is_int(self) -> bool {
        (self.0 & MASK_SIGNATURE) == SIG_INT
    }

    #[inline]
    pub fn is_number(self) -> bool {
        self.is_int() || self.is_float()
    }

    #[inline]
    pub fn is_symbol(self) -> bool {
        (self.0 & MASK_SIGNATURE) == SIG_SYMBOL
    }

    #[inline]
    pub fn is_heap(self) -> bool {
        (self.0 & MASK_SIGNATURE) == SIG_POINTER
    }

    // =========================================================================
    // Typed Extraction
    // =========================================================================

    #[inline]
    pub fn as_bool(self) -> Option<bool> {
        match self.0 {
            SIG_TRUE => Some(true),
            SIG_FALSE => Some(false),
            _ => None,
        }
    }

    /// Extract as integer, sign-extending from 48 bits.
    #[inline]
    pub fn as_int(self) -> Option<i64> {
        if self.is_int() {
            let raw = self.0 & MASK_PAYLOAD;
            if raw & MASK_INT_SIGN != 0 {
                Some((raw | MASK_SIGNATURE) as i64)
            } else {
                Some(raw as i64)
            }
        } else {
            None
        }
    }

    #[inline]
    pub fn as_float(self) -> Option<f64> {
        if self.is_float() {
            Some(f64::from_bits(self.0))
        } else {
            None
        }
    }

    /// Extract as a double, coercing integers. `None` for non-numbers.
    #[inline]
    pub fn as_number(self) -> Option<f64> {
        if let Some(i) = self.as_int() {
            Some(i as f64)
        } else {
            self.as_float()
        }
    }

    /// Convert a number to `i64`, stripping non-finite doubles to zero
    /// first. Casting NaN or infinity directly is meaningless; the
    /// runtime defines both as zero.
    #[inline]
    pub fn to_int(self) -> Option<i64> {
        if let Some(i) = self.as_int() {
            Some(i)
        } else {
            self.as_float().map(|f| to_safe_double(f) as i64)
        }
    }

    #[inline]
    pub fn as_symbol(self) -> Option<Symbol> {
        if self.is_symbol() {
            Some(Symbol(self.0))
        } else {
            None
        }
    }

    #[inline]
    pub fn as_heap_ref(self) -> Option<HeapRef> {
        if self.is_heap() {
            Some(HeapRef::from_index((self.0 & MASK_PAYLOAD) as u32))
        } else {
            None
        }
    }

    // =========================================================================
    // Coercions
    // =========================================================================

    /// Language truthiness: null, false, NaN and numeric zero are
    /// falsy; everything else is truthy.
    #[inline]
    pub fn truthy(self) -> bool {
        if self.0 == SIG_NULL || self.0 == SIG_FALSE || self.0 == NAN_BITS {
            return false;
        }
        if let Some(i) = self.as_int() {
            return i != 0;
        }
        if let Some(f) = self.as_float() {
            return f != 0.0;
        }
        true
    }

    /// Coerce to a double the way the language's number cast does:
    /// booleans become 0/1, null and symbols become 0.
    #[inline]
    pub fn to_number(self) -> f64 {
        if let Some(n) = self.as_number() {
            return n;
        }
        match self.as_bool() {
            Some(true) => 1.0,
            _ => 0.0,
        }
    }

    /// Immediate type name for diagnostics. Heap values answer through
    /// `HeapObject::type_name`; this covers everything else.
    pub fn immediate_type_name(self) -> &'static str {
        if self.is_null() {
            "null"
        } else if self.is_bool() {
            "boolean"
        } else if self.is_number() {
            "number"
        } else if self.is_symbol() {
            "symbol"
        } else {
            "pointer"
        }
    }
}
