//! Fixed-width unsigned integer types for the PDP-10: the 36-bit
//! machine word and the 18-bit halfword.  Arithmetic is plain binary
//! (the PDP-10 is a two's-complement machine) and always stays inside
//! the declared bit width.

use std::fmt::{self, Binary, Display, Formatter, Octal};
use std::ops::{BitAnd, BitOr, BitXor, Shl, Shr};

use serde::Serialize;

/// One more than the largest value a 36-bit word can hold.
pub const WORD_LIMIT: u64 = 1 << 36;

/// The boundary between the non-negative and negative halves of the
/// 36-bit space when a word is read as a signed quantity.
pub const INT_LIMIT: i64 = 1 << 35;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionFailed {
    TooLarge,
    TooSmall,
}

impl Display for ConversionFailed {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            ConversionFailed::TooLarge => f.write_str("value is too large"),
            ConversionFailed::TooSmall => f.write_str("value is negative"),
        }
    }
}

impl std::error::Error for ConversionFailed {}

/// This macro implements conversions from native types to the word
/// types which are always possible (e.g. From<u8> for Unsigned36Bit).
macro_rules! from_native_type_to_self {
    ($SelfT:ty, $($from:ty)*) => {
        $(
            impl From<$from> for $SelfT {
                fn from(n: $from) -> Self {
                    Self {
                        bits: n.into(),
                    }
                }
            }
        )*
    }
}

/// This macro implements conversions from the word types to native
/// types which are always possible (e.g. From<Unsigned36Bit> for u64).
macro_rules! from_self_to_native_type {
    ($SelfT:ty, $($to:ty)*) => {
        $(
            impl From<$SelfT> for $to {
                fn from(n: $SelfT) -> $to {
                    // The word's value range is wholly inside the
                    // target's range, but the inner type may not be
                    // (e.g. u32 holding 18 bits, target i32), so a
                    // plain `as` conversion is used.
                    n.bits as $to
                }
            }
        )*
    }
}

/// This macro implements conversions from the word types to native
/// types where the value may not fit (e.g. TryFrom<Unsigned36Bit> for
/// u32).
macro_rules! try_from_self_to_native_type {
    ($SelfT:ty, $($to:ty)*) => {
        $(
            impl TryFrom<$SelfT> for $to {
                type Error = ConversionFailed;
                fn try_from(n: $SelfT) -> Result<$to, ConversionFailed> {
                    <$to>::try_from(n.bits).map_err(|_| ConversionFailed::TooLarge)
                }
            }
        )*
    }
}

/// This macro implements conversions from native types to the word
/// types where the value may not fit (e.g. TryFrom<u64> for
/// Unsigned36Bit).
macro_rules! try_from_native_type_to_self {
    ($SelfT:ty, $InnerT:ty, $($from:ty)*) => {
        $(
            impl TryFrom<$from> for $SelfT {
                type Error = ConversionFailed;
                fn try_from(n: $from) -> Result<Self, ConversionFailed> {
                    let bits: $InnerT = match n.try_into() {
                        Err(_) => {
                            // When the source type is unsigned this
                            // comparison is vacuous and the compiler
                            // is expected to drop it.
                            #[allow(unused_comparisons)]
                            if n < 0 {
                                return Err(ConversionFailed::TooSmall);
                            } else {
                                return Err(ConversionFailed::TooLarge);
                            }
                        }
                        Ok(value) if value > <$SelfT>::VALUE_BITS => {
                            return Err(ConversionFailed::TooLarge);
                        }
                        Ok(value) => value,
                    };
                    Ok(Self { bits })
                }
            }
        )*
    }
}

/// The base functionality shared by the word types.  `SelfT` is the
/// type being defined, `BITS` its width, `InnerT` the native type
/// holding the bits.
macro_rules! unsigned_word_impl {
    ($SelfT:ident, $BITS:expr, $InnerT:ty) => {
        impl $SelfT {
            const MODULUS: $InnerT = (1 << $BITS);
            const VALUE_BITS: $InnerT = Self::MODULUS - 1;

            pub const BITS: u32 = $BITS;

            pub const MAX: Self = Self {
                bits: Self::MODULUS - 1,
            };

            pub const ZERO: Self = Self { bits: 0 };
            pub const ONE: Self = Self { bits: 1 };
            pub const MIN: Self = Self::ZERO;

            // Out-of-range inputs fail at compile time.  This is pub
            // so that it can be used in u36!() and u18!().
            pub const fn new<const N: $InnerT>() -> $SelfT {
                type Word = $SelfT;
                struct Helper<const M: $InnerT>;
                impl<const M: $InnerT> Helper<M> {
                    const U: Word = {
                        if M > Word::MAX.bits {
                            panic!("input value is out of range")
                        } else {
                            Word { bits: M }
                        }
                    };
                }
                Helper::<N>::U
            }

            /// Keep only as many low-order bits of `n` as this type
            /// holds.
            pub const fn truncating_from(n: $InnerT) -> $SelfT {
                Self {
                    bits: n & Self::VALUE_BITS,
                }
            }

            pub const fn is_zero(&self) -> bool {
                self.bits == 0
            }

            pub fn wrapping_add(self, rhs: $SelfT) -> $SelfT {
                Self {
                    bits: self.bits.wrapping_add(rhs.bits) & Self::VALUE_BITS,
                }
            }

            pub fn wrapping_sub(self, rhs: $SelfT) -> $SelfT {
                Self {
                    bits: (self.bits | Self::MODULUS).wrapping_sub(rhs.bits) & Self::VALUE_BITS,
                }
            }

            pub fn checked_add(self, rhs: $SelfT) -> Option<$SelfT> {
                match self.bits.checked_add(rhs.bits) {
                    Some(bits) if bits <= Self::VALUE_BITS => Some(Self { bits }),
                    _ => None,
                }
            }

            pub fn checked_sub(self, rhs: $SelfT) -> Option<$SelfT> {
                self.bits.checked_sub(rhs.bits).map(|bits| Self { bits })
            }

            pub fn checked_mul(self, rhs: $SelfT) -> Option<$SelfT> {
                match self.bits.checked_mul(rhs.bits) {
                    Some(bits) if bits <= Self::VALUE_BITS => Some(Self { bits }),
                    _ => None,
                }
            }
        }

        impl Default for $SelfT {
            fn default() -> $SelfT {
                Self::ZERO
            }
        }

        impl BitAnd for $SelfT {
            type Output = Self;
            fn bitand(self, rhs: Self) -> Self {
                Self {
                    bits: self.bits & rhs.bits,
                }
            }
        }

        impl BitOr for $SelfT {
            type Output = Self;
            fn bitor(self, rhs: Self) -> Self {
                Self {
                    bits: self.bits | rhs.bits,
                }
            }
        }

        impl BitXor for $SelfT {
            type Output = Self;
            fn bitxor(self, rhs: Self) -> Self {
                Self {
                    bits: self.bits ^ rhs.bits,
                }
            }
        }

        impl Shl<u32> for $SelfT {
            type Output = Self;
            fn shl(self, rhs: u32) -> Self {
                Self {
                    bits: (self.bits << rhs) & Self::VALUE_BITS,
                }
            }
        }

        impl Shr<u32> for $SelfT {
            type Output = Self;
            fn shr(self, rhs: u32) -> Self {
                Self {
                    bits: self.bits >> rhs,
                }
            }
        }

        impl Display for $SelfT {
            fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
                Display::fmt(&self.bits, f)
            }
        }

        impl Octal for $SelfT {
            fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
                Octal::fmt(&self.bits, f)
            }
        }

        impl Binary for $SelfT {
            fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
                Binary::fmt(&self.bits, f)
            }
        }
    };
}

/// A 36-bit PDP-10 machine word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Unsigned36Bit {
    bits: u64,
}

/// An 18-bit PDP-10 halfword, which is also the width of an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Unsigned18Bit {
    bits: u32,
}

unsigned_word_impl!(Unsigned36Bit, 36, u64);
unsigned_word_impl!(Unsigned18Bit, 18, u32);

from_native_type_to_self!(Unsigned36Bit, u8 u16 u32);
from_native_type_to_self!(Unsigned18Bit, u8 u16);
try_from_native_type_to_self!(Unsigned36Bit, u64, u64 usize i64 i32);
try_from_native_type_to_self!(Unsigned18Bit, u32, u32 u64 usize i64 i32);
from_self_to_native_type!(Unsigned36Bit, u64 i64 u128 i128);
from_self_to_native_type!(Unsigned18Bit, u32 u64 i64 usize);
try_from_self_to_native_type!(Unsigned36Bit, u8 u16 u32 usize i32);
try_from_self_to_native_type!(Unsigned18Bit, u8 u16);

impl From<Unsigned18Bit> for Unsigned36Bit {
    fn from(n: Unsigned18Bit) -> Unsigned36Bit {
        Unsigned36Bit {
            bits: u64::from(n.bits),
        }
    }
}

impl TryFrom<Unsigned36Bit> for Unsigned18Bit {
    type Error = ConversionFailed;
    fn try_from(n: Unsigned36Bit) -> Result<Unsigned18Bit, ConversionFailed> {
        u32::try_from(n.bits)
            .map_err(|_| ConversionFailed::TooLarge)
            .and_then(Unsigned18Bit::try_from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapping_add() {
        assert_eq!(
            Unsigned36Bit::MAX.wrapping_add(Unsigned36Bit::ONE),
            Unsigned36Bit::ZERO
        );
        assert_eq!(
            Unsigned18Bit::MAX.wrapping_add(Unsigned18Bit::ONE),
            Unsigned18Bit::ZERO
        );
    }

    #[test]
    fn test_wrapping_sub() {
        assert_eq!(
            Unsigned36Bit::ZERO.wrapping_sub(Unsigned36Bit::ONE),
            Unsigned36Bit::MAX
        );
    }

    #[test]
    fn test_truncating_from() {
        assert_eq!(
            Unsigned36Bit::truncating_from(u64::MAX),
            Unsigned36Bit::MAX
        );
        assert_eq!(
            Unsigned36Bit::truncating_from(1 << 36),
            Unsigned36Bit::ZERO
        );
    }

    #[test]
    fn test_range_checks() {
        assert!(Unsigned36Bit::try_from(WORD_LIMIT).is_err());
        assert!(Unsigned36Bit::try_from(WORD_LIMIT - 1).is_ok());
        assert!(Unsigned36Bit::try_from(-1_i64).is_err());
        assert!(Unsigned18Bit::try_from(0o1_000_000_u32).is_err());
    }

    #[test]
    fn test_octal_rendering() {
        let w = Unsigned36Bit::try_from(0o123_456_525_252_u64).expect("valid test data");
        assert_eq!(format!("{w:>012o}"), "123456525252");
    }
}
