//! Property-based tests for the stick remap.
//!
//! Uses proptest to verify monotonicity, endpoint identities, and range
//! containment for every calibrated axis.

use probridge::mapping::{AxisRange, LEFT_X, LEFT_Y, RIGHT_X, RIGHT_Y, remap_axis};
use proptest::prelude::*;

/// Strategy: one of the four calibrated axes.
fn arb_axis() -> impl Strategy<Value = AxisRange> {
    prop_oneof![Just(LEFT_X), Just(LEFT_Y), Just(RIGHT_X), Just(RIGHT_Y)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Remap must be monotone non-decreasing over the raw 12-bit domain.
    #[test]
    fn prop_remap_is_monotone(range in arb_axis(), a in 0u16..0x1000, b in 0u16..0x1000) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(remap_axis(range, lo) <= remap_axis(range, hi),
            "remap({lo:#X}) > remap({hi:#X})");
    }

    /// The three calibration points map exactly to 0 / max / min.
    #[test]
    fn prop_remap_endpoint_identities(range in arb_axis()) {
        prop_assert_eq!(remap_axis(range, range.neutral), 0);
        prop_assert_eq!(remap_axis(range, range.max), 0x7FFF);
        prop_assert_eq!(remap_axis(range, range.min), -0x8000);
    }

    /// Output always stays inside the signed 16-bit range.
    #[test]
    fn prop_remap_output_contained(range in arb_axis(), raw in 0u16..0x1000) {
        let v = i32::from(remap_axis(range, raw));
        prop_assert!((-0x8000..=0x7FFF).contains(&v), "remap({raw:#X}) = {v:#X}");
    }

    /// The output sign matches which side of neutral the clamped sample is on.
    #[test]
    fn prop_remap_sign_matches_deflection(range in arb_axis(), raw in 0u16..0x1000) {
        let v = remap_axis(range, raw);
        let clamped = raw.clamp(range.min, range.max);
        if clamped > range.neutral {
            prop_assert!(v > 0);
        } else if clamped < range.neutral {
            prop_assert!(v < 0);
        } else {
            prop_assert_eq!(v, 0);
        }
    }
}
