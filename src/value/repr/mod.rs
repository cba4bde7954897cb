//! NaN-boxing representation.
//!
//! An IEEE 754 double is 64 bits: 1 sign + 11 exponent + 52 mantissa.
//! A quiet NaN sets all exponent bits plus the highest mantissa bit,
//! which leaves 51 bits of payload that arithmetic never produces with
//! meaningful content. The encoding claims that class for tagged
//! values; every other bit pattern is an ordinary double.
//!
//! Layout (upper 16 bits = signature, lower 48 bits = payload):
//!
//! ```text
//! Float:    any pattern whose quiet-NaN header bits are not all set
//! NaN:      0x7ff8_0000_0000_0000  (the canonical quiet NaN itself)
//! False:    0x7ff9_0000_0000_0000
//! True:     0x7ffa_0000_0000_0000
//! Null:     0x7ffb_0000_0000_0000
//! Integer:  0x7ffc_XXXX_XXXX_XXXX  payload = 48-bit signed integer
//! Symbol:   0x7ffd_XXXX_XXXX_XXXX  payload = 48 bits of masked hash
//! Pointer:  0xfff8_0000_XXXX_XXXX  payload = 32-bit heap slot index
//! ```
//!
//! Quiet NaNs (of either sign) canonicalize to the single `NaN`
//! pattern on encode, so no user float can alias a tag. Infinities and
//! signaling NaNs are outside the reserved class and pass through as
//! ordinary doubles.
//!
//! Pointers carry heap-arena slot indices, not machine addresses. The
//! bit layout is applied only here, at the encode/decode boundary;
//! everything else in the runtime handles `Value` and `HeapRef` as
//! opaque types.

mod accessors;
mod constructors;
mod traits;


use std::hash::{Hash, Hasher};

// =============================================================================
// Tag Constants
// =============================================================================

pub(crate) const MASK_SIGN: u64 = 0x8000_0000_0000_0000;
pub(crate) const MASK_EXPONENT: u64 = 0x7ff0_0000_0000_0000;
pub(crate) const MASK_QUIET: u64 = 0x0008_0000_0000_0000;

/// Signature bits: sign + exponent + quiet + three type bits.
pub(crate) const MASK_SIGNATURE: u64 = 0xffff_0000_0000_0000;

/// Payload bits available below the signature.
pub(crate) const MASK_PAYLOAD: u64 = 0x0000_ffff_ffff_ffff;

/// The canonical quiet NaN. Every tagged value carries these header
/// bits; every runtime NaN *is* exactly this pattern.
pub const NAN_BITS: u64 = MASK_EXPONENT | MASK_QUIET;

/// Header class shared by the canonical NaN and all tags (sign bit
/// excluded). A double is ordinary iff its bits fail this mask test.
pub(crate) const MASK_NAN_CLASS: u64 = MASK_EXPONENT | MASK_QUIET;

// Signatures of the immediate encoded types
pub(crate) const SIG_FALSE: u64 = NAN_BITS | 0x0001_0000_0000_0000;
pub(crate) const SIG_TRUE: u64 = NAN_BITS | 0x0002_0000_0000_0000;
pub(crate) const SIG_NULL: u64 = NAN_BITS | 0x0003_0000_0000_0000;
pub(crate) const SIG_INT: u64 = NAN_BITS | 0x0004_0000_0000_0000;
pub(crate) const SIG_SYMBOL: u64 = NAN_BITS | 0x0005_0000_0000_0000;
pub(crate) const SIG_POINTER: u64 = MASK_SIGN | NAN_BITS;

/// Sign bit of the 48-bit integer payload.
pub(crate) const MASK_INT_SIGN: u64 = 0x0000_8000_0000_0000;

/// Maximum 48-bit signed integer (2^47 - 1).
pub const INT_MAX: i64 = 0x7fff_ffff_ffff;

/// Minimum 48-bit signed integer (-2^47).
pub const INT_MIN: i64 = -0x8000_0000_0000;

// =============================================================================
// Value
// =============================================================================

/// A single NaN-boxed runtime value: one machine word, one of Null,
/// Bool, Integer, Float, Symbol, or Pointer.
///
/// `repr(transparent)`: a `Value` crosses the native-call boundary as
/// a plain 64-bit word.
#[derive(Clone, Copy)]
#[repr(transparent)]
pub struct Value(pub(crate) u64);

impl Value {
    pub const NULL: Value = Value(SIG_NULL);
    pub const TRUE: Value = Value(SIG_TRUE);
    pub const FALSE: Value = Value(SIG_FALSE);
    pub const NAN: Value = Value(NAN_BITS);

    /// The raw 64-bit word. For serialization boundaries only.
    #[inline]
    pub fn bits(self) -> u64 {
        self.0
    }

    /// Rebuild a value from a raw word produced by [`Value::bits`].
    #[inline]
    pub fn from_bits(bits: u64) -> Value {
        Value(bits)
    }
}

// =============================================================================
// Symbol
// =============================================================================

/// An interned symbol id.
///
/// The id is the full 64-bit tagged word: the string's hash masked to
/// the payload bits, OR'd with the symbol signature. Distinct strings
/// whose masked hashes collide alias the same id — an accepted
/// limitation of hash-derived symbols, documented rather than hidden.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Symbol(pub(crate) u64);

impl Symbol {
    /// Derive the symbol id for a string.
    ///
    /// Pure function of the input: no table access, so two tables (or
    /// two VM instances) agree on every id.
    pub fn from_str(name: &str) -> Symbol {
        let mut hasher = rustc_hash::FxHasher::default();
        name.hash(&mut hasher);
        Symbol(SIG_SYMBOL | (hasher.finish() & MASK_PAYLOAD))
    }

    /// The raw tagged word of this symbol.
    #[inline]
    pub fn bits(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Symbol({:#x})", self.0 & MASK_PAYLOAD)
    }
}
