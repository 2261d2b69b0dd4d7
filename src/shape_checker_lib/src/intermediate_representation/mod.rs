//! This module defines the intermediate representation of the programs analyzed by the shape analysis.
//!
//! A front end (which is not part of this crate) translates C-like source code
//! into the control flow graph representation defined here.
//! The main data structure is the [`Program`] struct.
//! To learn how individual statements are encoded,
//! you should first take a look at the [`Expression`] type and then at the [`Def`] and [`Jmp`] data types,
//! which form the basis of the basic block [`Blk`] struct.
//!
//! All types are (de)serializable, so that a front end may hand over programs as JSON.

use crate::prelude::*;
use derive_more::*;

mod variable;
pub use variable::*;
mod expression;
pub use expression::*;
mod term;
pub use term::*;
mod def;
pub use def::*;
mod jmp;
pub use jmp::*;
mod blk;
pub use blk::*;
mod sub;
pub use sub::*;
mod program;
pub use program::*;
pub mod builder;

/// The size of pointers in the analyzed programs.
pub const POINTER_SIZE: ByteSize = ByteSize(8);

/// An unsigned number of bytes.
///
/// Used to represent sizes of values in variables or in memory.
/// Can also be used for other byte-valued numbers, like offsets,
/// as long as the number is guaranteed to be non-negative.
#[derive(
    Serialize,
    Deserialize,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Clone,
    Copy,
    Display,
    From,
    Into,
    Add,
    Sub,
    Mul,
    AddAssign,
    SubAssign,
    MulAssign,
    Sum,
)]
#[serde(transparent)]
pub struct ByteSize(u64);

impl ByteSize {
    /// Create a new `ByteSize` object
    pub const fn new(value: u64) -> ByteSize {
        ByteSize(value)
    }

    /// Convert to a signed byte offset.
    pub fn as_offset(self) -> i64 {
        self.0 as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_size_arithmetic() {
        let size = ByteSize::new(4) * 3 + POINTER_SIZE;
        assert_eq!(u64::from(size), 20);
        assert_eq!(size.as_offset(), 20);
        let total: ByteSize = vec![ByteSize::new(1), ByteSize::new(2)].into_iter().sum();
        assert_eq!(total, ByteSize::new(3));
    }
}
