//! Reduction operators
//!
//! An operator must be associative and commutative: under dynamic tile
//! mapping the order in which tiles are folded depends on which worker group
//! claims them first.

use std::fmt;

use bytemuck::Pod;
use num_traits::{Bounded, WrappingAdd, Zero};

/// Element types that can live in device memory and cross worker groups.
pub trait Element: Pod + Send + Sync + fmt::Debug + 'static {}

impl<T: Pod + Send + Sync + fmt::Debug + 'static> Element for T {}

/// An associative, commutative binary operator with an identity.
pub trait ReductionOp<T>: Copy + Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Result of reducing zero items.
    fn identity(&self) -> T;

    fn combine(&self, a: T, b: T) -> T;
}

/// Fold `b` into an optional running aggregate.
#[inline]
pub(crate) fn fold_opt<T, Op: ReductionOp<T>>(op: &Op, acc: Option<T>, b: Option<T>) -> Option<T> {
    match (acc, b) {
        (Some(a), Some(b)) => Some(op.combine(a, b)),
        (a, None) => a,
        (None, b) => b,
    }
}

/// Addition as [`Sum`] performs it: integers wrap on overflow in every build
/// profile, floats use IEEE addition.
pub trait Summable: Zero + Copy {
    fn sum_with(self, other: Self) -> Self;
}

macro_rules! wrapping_summable {
    ($($t:ty),* $(,)?) => {
        $(impl Summable for $t {
            #[inline]
            fn sum_with(self, other: Self) -> Self {
                WrappingAdd::wrapping_add(&self, &other)
            }
        })*
    };
}

wrapping_summable!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize);

impl Summable for f32 {
    #[inline]
    fn sum_with(self, other: Self) -> Self {
        self + other
    }
}

impl Summable for f64 {
    #[inline]
    fn sum_with(self, other: Self) -> Self {
        self + other
    }
}

/// Addition; see [`Summable`] for overflow behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sum;

impl<T: Element + Summable> ReductionOp<T> for Sum {
    fn name(&self) -> &'static str {
        "sum"
    }

    fn identity(&self) -> T {
        T::zero()
    }

    #[inline]
    fn combine(&self, a: T, b: T) -> T {
        a.sum_with(b)
    }
}

/// Minimum; the identity is the type's largest value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Min;

impl<T: Element + Bounded + PartialOrd> ReductionOp<T> for Min {
    fn name(&self) -> &'static str {
        "min"
    }

    fn identity(&self) -> T {
        T::max_value()
    }

    #[inline]
    fn combine(&self, a: T, b: T) -> T {
        if b < a {
            b
        } else {
            a
        }
    }
}

/// Maximum; the identity is the type's smallest value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Max;

impl<T: Element + Bounded + PartialOrd> ReductionOp<T> for Max {
    fn name(&self) -> &'static str {
        "max"
    }

    fn identity(&self) -> T {
        T::min_value()
    }

    #[inline]
    fn combine(&self, a: T, b: T) -> T {
        if b > a {
            b
        } else {
            a
        }
    }
}

/// A caller-supplied operator.
///
/// ```rust
/// use gridfold_core::ops::{FnOp, ReductionOp};
///
/// let bit_or = FnOp::new("bit_or", 0u32, |a, b| a | b);
/// assert_eq!(bit_or.combine(0b01, 0b10), 0b11);
/// ```
#[derive(Clone, Copy)]
pub struct FnOp<T, F> {
    name: &'static str,
    identity: T,
    f: F,
}

impl<T, F> FnOp<T, F>
where
    T: Element,
    F: Fn(T, T) -> T + Copy + Send + Sync + 'static,
{
    pub fn new(name: &'static str, identity: T, f: F) -> Self {
        Self { name, identity, f }
    }
}

impl<T, F> ReductionOp<T> for FnOp<T, F>
where
    T: Element,
    F: Fn(T, T) -> T + Copy + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn identity(&self) -> T {
        self.identity
    }

    #[inline]
    fn combine(&self, a: T, b: T) -> T {
        (self.f)(a, b)
    }
}

impl<T: fmt::Debug, F> fmt::Debug for FnOp<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnOp")
            .field("name", &self.name)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identities() {
        assert_eq!(ReductionOp::<i64>::identity(&Sum), 0);
        assert_eq!(ReductionOp::<u8>::identity(&Min), u8::MAX);
        assert_eq!(ReductionOp::<i16>::identity(&Max), i16::MIN);
        assert_eq!(ReductionOp::<f32>::identity(&Max), f32::MIN);
    }

    #[test]
    fn integer_sums_wrap_in_every_profile() {
        assert_eq!(Sum.combine(200u8, 100u8), 44);
        assert_eq!(Sum.combine(i32::MAX, 1), i32::MIN);
        assert_eq!(Sum.combine(1.5f32, 2.25), 3.75);
    }

    #[test]
    fn min_max_pick_extremes() {
        assert_eq!(Min.combine(3i32, -7), -7);
        assert_eq!(Max.combine(3i32, -7), 3);
        assert_eq!(Max.combine(1.5f64, 2.5), 2.5);
    }

    #[test]
    fn fold_opt_skips_missing_sides() {
        assert_eq!(fold_opt(&Sum, None::<u32>, None), None);
        assert_eq!(fold_opt(&Sum, Some(2u32), None), Some(2));
        assert_eq!(fold_opt(&Sum, None, Some(5u32)), Some(5));
        assert_eq!(fold_opt(&Sum, Some(2u32), Some(5)), Some(7));
    }

    #[test]
    fn fn_op_uses_closure_and_identity() {
        let xor = FnOp::new("xor", 0u64, |a, b| a ^ b);
        assert_eq!(xor.name(), "xor");
        assert_eq!(xor.identity(), 0);
        assert_eq!(xor.combine(0b1100, 0b1010), 0b0110);
    }
}
