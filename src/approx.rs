//! Tolerance-graded comparison of kernel output against host references.
//!
//! Device kernels and host references round differently, so results are
//! graded instead of compared bit for bit. Tolerances are absolute below 1
//! and relative above it.

use crate::precision::{Dtype, Precision};

/// Grade of agreement between two values, best first.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ApproxEquality {
    /// Within the tightest tolerance of the precision.
    Precise = 0,
    /// Within the usual accumulated rounding error.
    Partial = 1,
    /// Same value to a few digits, as after long reductions or `exp`.
    Relative = 2,
    /// Not equal.
    Scarce = 3,
}

/// `[precise, partial, relative]` tolerances of a precision.
pub const fn tolerances(precision: Precision) -> [f64; 3] {
    match precision {
        Precision::Double => [1e-13, 1e-9, 1e-6],
        _ => [1e-6, 1e-5, 1e-3],
    }
}

/// Grades one pair of values. NaN agrees only with NaN.
pub fn grade<T: Dtype>(a: T, b: T) -> ApproxEquality {
    let (a, b) = (a.into_f64(), b.into_f64());
    if a.is_nan() || b.is_nan() {
        return if a.is_nan() && b.is_nan() {
            ApproxEquality::Precise
        } else {
            ApproxEquality::Scarce
        };
    }
    if a == b {
        return ApproxEquality::Precise;
    }
    let diff = (a - b).abs() / a.abs().max(b.abs()).max(1.0);
    let [precise, partial, relative] = tolerances(T::PRECISION);
    if diff < precise {
        ApproxEquality::Precise
    } else if diff < partial {
        ApproxEquality::Partial
    } else if diff < relative {
        ApproxEquality::Relative
    } else {
        ApproxEquality::Scarce
    }
}

/// Worst grade over two slices; slices of different length are `Scarce`.
pub fn grade_slice<T: Dtype>(a: &[T], b: &[T]) -> ApproxEquality {
    if a.len() != b.len() {
        return ApproxEquality::Scarce;
    }
    a.iter()
        .zip(b)
        .map(|(&x, &y)| grade(x, y))
        .max()
        .unwrap_or(ApproxEquality::Precise)
}

/// Whether every pair agrees to at least `Relative`.
pub fn approx_eq<T: Dtype>(a: &[T], b: &[T]) -> bool {
    grade_slice(a, b) <= ApproxEquality::Relative
}

/// Index and values of the first pair worse than `Relative`, for messages.
pub fn first_mismatch<T: Dtype>(a: &[T], b: &[T]) -> Option<(usize, T, T)> {
    a.iter()
        .zip(b)
        .position(|(&x, &y)| grade(x, y) == ApproxEquality::Scarce)
        .map(|i| (i, a[i], b[i]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grades_follow_precision() {
        assert_eq!(grade(1.0f32, 1.0 + 1e-7), ApproxEquality::Precise);
        assert_eq!(grade(1.0f32, 1.0005), ApproxEquality::Relative);
        assert_eq!(grade(1.0f64, 1.0 + 1e-7), ApproxEquality::Relative);
        assert_eq!(grade(1.0f64, 1.1), ApproxEquality::Scarce);
    }

    #[test]
    fn large_values_compare_relatively() {
        assert!(approx_eq(&[1.0e6f32], &[1.0e6 + 50.0]));
        assert!(!approx_eq(&[1.0f32, 2.0], &[1.0]));
        assert_eq!(first_mismatch(&[1.0f32, 2.0], &[1.0, 3.0]), Some((1, 2.0, 3.0)));
    }
}
