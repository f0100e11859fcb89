//! Value contract
//!
//! Keys and values stored in the tree only need two things: a total order
//! and a byte size used for leaf capacity accounting.

use std::fmt::Debug;
use std::mem::size_of;
use std::sync::Arc;

/// Byte size of a key or value, as counted against a data node's budget
pub trait ByteSize {
    fn byte_size(&self) -> usize;
}

/// Any type usable as a key or value in the tree
pub trait Scalar: Ord + Clone + ByteSize + Debug + Send + Sync + 'static {}

impl<T> Scalar for T where T: Ord + Clone + ByteSize + Debug + Send + Sync + 'static {}

// =============================================================================
// Fixed-width Scalars
// =============================================================================

macro_rules! fixed_byte_size {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ByteSize for $ty {
                #[inline]
                fn byte_size(&self) -> usize {
                    size_of::<$ty>()
                }
            }
        )*
    };
}

fixed_byte_size!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, bool, char);

// =============================================================================
// Variable-width Scalars
// =============================================================================

impl ByteSize for String {
    fn byte_size(&self) -> usize {
        self.len()
    }
}

impl ByteSize for Box<str> {
    fn byte_size(&self) -> usize {
        self.len()
    }
}

impl ByteSize for Arc<str> {
    fn byte_size(&self) -> usize {
        self.len()
    }
}

impl ByteSize for Vec<u8> {
    fn byte_size(&self) -> usize {
        self.len()
    }
}
