// Property tests for the NaN-boxed value encoding.
//
// Verifies the representation invariants: floats round-trip unless
// they fall in the reserved quiet-NaN class, integers round-trip with
// exact sign extension across the 48-bit range, and no encoding can
// alias another type's tag.

use proptest::prelude::*;
use quill::value::fp;
use quill::value::repr::{INT_MAX, INT_MIN, NAN_BITS};
use quill::{Symbol, Value};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn float_round_trips_or_canonicalizes(bits in any::<u64>()) {
        let f = f64::from_bits(bits);
        let v = Value::float(f);
        prop_assert!(v.is_float());
        let back = v.as_float().unwrap();
        if bits & NAN_BITS == NAN_BITS {
            // Reserved class: canonicalized
            prop_assert_eq!(back.to_bits(), NAN_BITS);
        } else {
            prop_assert_eq!(back.to_bits(), bits);
        }
    }

    #[test]
    fn int_round_trips(n in INT_MIN..=INT_MAX) {
        let v = Value::int(n);
        prop_assert!(v.is_int());
        prop_assert_eq!(v.as_int(), Some(n));
        // An int is never mistaken for anything else
        prop_assert!(!v.is_float());
        prop_assert!(!v.is_symbol());
        prop_assert!(!v.is_heap());
    }

    #[test]
    fn number_always_representable(n in any::<i64>()) {
        let v = Value::number(n);
        prop_assert!(v.is_number());
        if (INT_MIN..=INT_MAX).contains(&n) {
            prop_assert_eq!(v.as_int(), Some(n));
        } else {
            prop_assert_eq!(v.as_float(), Some(n as f64));
        }
    }

    #[test]
    fn fp_are_equal_is_reflexive_for_runtime_floats(bits in any::<u64>()) {
        // Every float that comes out of the encoder compares equal to
        // itself, NaN included
        let f = Value::float(f64::from_bits(bits)).as_float().unwrap();
        prop_assert!(fp::fp_are_equal(f, f));
    }

    #[test]
    fn fp_are_equal_matches_host_for_finite(a in any::<f64>(), b in any::<f64>()) {
        prop_assume!(!a.is_nan() && !b.is_nan());
        prop_assert_eq!(fp::fp_are_equal(a, b), a == b);
    }

    #[test]
    fn strip_helpers_always_finite(bits in any::<u64>()) {
        let f = f64::from_bits(bits);
        prop_assert!(fp::to_safe_double(f).is_finite());
    }

    #[test]
    fn serial_bytes_round_trip(word in any::<u64>()) {
        prop_assert_eq!(fp::from_serial_bytes(fp::serial_bytes(word)), word);
    }

    #[test]
    fn symbol_ids_are_tagged_and_stable(name in ".*") {
        let a = Symbol::from_str(&name);
        let b = Symbol::from_str(&name);
        prop_assert_eq!(a, b);
        let v = Value::symbol(a);
        prop_assert!(v.is_symbol());
        prop_assert_eq!(v.as_symbol(), Some(a));
        prop_assert!(!v.is_number());
    }

    #[test]
    fn truthiness_of_numbers(n in any::<i64>()) {
        prop_assert_eq!(Value::number(n).truthy(), n != 0);
    }
}
