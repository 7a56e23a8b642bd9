//! Names that nearly every user of the base crate wants.

pub use crate::subword::{join_halves, left_half, right_half, split_halves};
pub use crate::word::{ConversionFailed, Unsigned18Bit, Unsigned36Bit, INT_LIMIT, WORD_LIMIT};
