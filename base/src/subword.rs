//! Convenience utilities for splitting 36-bit PDP-10 words into
//! halfwords and for joining them together.
use std::ops::Shl;

use crate::word::{Unsigned18Bit, Unsigned36Bit};

/// Split a 36-bit word into its left and right 18-bit halves.
pub fn split_halves(w: Unsigned36Bit) -> (Unsigned18Bit, Unsigned18Bit) {
    (left_half(w), right_half(w))
}

/// Join two 18-bit halfwords into a 36-bit word.
pub fn join_halves(left: Unsigned18Bit, right: Unsigned18Bit) -> Unsigned36Bit {
    Unsigned36Bit::from(left).shl(18) | Unsigned36Bit::from(right)
}

/// Extract the right (less-significant) halfword from a full word.
pub fn right_half(word: Unsigned36Bit) -> Unsigned18Bit {
    let bits: u64 = u64::from(word);
    Unsigned18Bit::truncating_from(bits as u32 & 0o777_777)
}

/// Extract the left (more-significant) halfword from a full word.
pub fn left_half(word: Unsigned36Bit) -> Unsigned18Bit {
    let bits: u64 = u64::from(word) >> 18;
    Unsigned18Bit::truncating_from(bits as u32 & 0o777_777)
}

#[cfg(test)]
mod tests {
    use super::*;

    macro_rules! assert_octal_eq {
        ($left:expr, $right:expr $(,)?) => {{
            match (&$left, &$right) {
                (left_val, right_val) => {
                    if !(*left_val == *right_val) {
                        panic!(
                            "Assertion failed: {:>#012o} != {:>#012o}",
                            left_val, right_val
                        );
                    }
                }
            }
        }};
    }

    #[test]
    fn test_join_halves() {
        assert_octal_eq!(
            join_halves(
                Unsigned18Bit::try_from(0o123_456_u32).unwrap(),
                Unsigned18Bit::try_from(0o525_252_u32).unwrap()
            ),
            Unsigned36Bit::try_from(0o123_456_525_252_u64).unwrap()
        );
    }

    #[test]
    fn test_split_halves() {
        let w = Unsigned36Bit::try_from(0o123_456_525_252_u64).expect("valid test data");
        assert_eq!(
            split_halves(w),
            (
                Unsigned18Bit::try_from(0o123_456_u32).unwrap(),
                Unsigned18Bit::try_from(0o525_252_u32).unwrap()
            )
        );
    }

    #[test]
    fn test_halves_roundtrip() {
        let w = Unsigned36Bit::try_from(0o777_000_000_001_u64).expect("valid test data");
        let (l, r) = split_halves(w);
        assert_octal_eq!(join_halves(l, r), w);
    }
}
