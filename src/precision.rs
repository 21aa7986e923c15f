//! Numeric precision tags and the element types kernels are instantiated for.
//!
//! Every catalog operation is generic over a [`Dtype`]. The dtype carries its
//! [`Precision`] as an associated constant, so the kernel-name suffix is fixed
//! at compile time and never inferred from data.

use crate::device::KernelArg;
use core::fmt::{Debug, Display};
use num_traits::Float;

/// Precision tag appended to an operation name to form a kernel name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Precision {
    /// Precision-insensitive kernel, no suffix.
    #[default]
    Untagged = 0,
    /// 32-bit float kernels, suffix `_float`.
    Single,
    /// 64-bit float kernels, suffix `_double`.
    Double,
}

impl Precision {
    /// The suffix appended to the operation name.
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Untagged => "",
            Self::Single => "_float",
            Self::Double => "_double",
        }
    }

    /// Splits a full kernel name into its operation name and precision tag.
    ///
    /// Names without a recognised suffix are untagged.
    pub fn split(name: &str) -> (&str, Self) {
        if let Some(op) = name.strip_suffix(Self::Single.suffix()) {
            (op, Self::Single)
        } else if let Some(op) = name.strip_suffix(Self::Double.suffix()) {
            (op, Self::Double)
        } else {
            (name, Self::Untagged)
        }
    }

    /// Width in bytes of a precision-matched scalar, if the tag has one.
    pub const fn scalar_width(self) -> Option<usize> {
        match self {
            Self::Untagged => None,
            Self::Single => Some(4),
            Self::Double => Some(8),
        }
    }
}

impl Display for Precision {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Untagged => write!(f, "untagged"),
            Self::Single => write!(f, "single"),
            Self::Double => write!(f, "double"),
        }
    }
}

/// Floating point element type a kernel can be instantiated for.
///
/// Implemented for `f32` and `f64` only.
pub trait Dtype:
    Float + bytemuck::Pod + Default + Debug + Display + Send + Sync + 'static
{
    /// Precision tag selecting the kernel-name suffix.
    const PRECISION: Precision;

    /// Converts from `f64`, rounding when narrowing.
    fn from_f64(value: f64) -> Self;

    /// Widens to `f64`.
    fn into_f64(self) -> f64;

    /// Wraps the value as a precision-matched scalar argument.
    fn into_arg(self) -> KernelArg;

    /// Extracts a scalar of this precision from a bound argument.
    fn from_arg(arg: &KernelArg) -> Option<Self>;

    /// Smallest positive normal single-precision value, used as the log floor
    /// by the loss kernels regardless of precision.
    fn log_floor() -> Self {
        Self::from_f64(f64::from(f32::MIN_POSITIVE))
    }
}

impl Dtype for f32 {
    const PRECISION: Precision = Precision::Single;

    #[inline]
    fn from_f64(value: f64) -> Self {
        value as f32
    }

    #[inline]
    fn into_f64(self) -> f64 {
        f64::from(self)
    }

    fn into_arg(self) -> KernelArg {
        KernelArg::Float(self)
    }

    fn from_arg(arg: &KernelArg) -> Option<Self> {
        match arg {
            KernelArg::Float(v) => Some(*v),
            _ => None,
        }
    }
}

impl Dtype for f64 {
    const PRECISION: Precision = Precision::Double;

    #[inline]
    fn from_f64(value: f64) -> Self {
        value
    }

    #[inline]
    fn into_f64(self) -> f64 {
        self
    }

    fn into_arg(self) -> KernelArg {
        KernelArg::Double(self)
    }

    fn from_arg(arg: &KernelArg) -> Option<Self> {
        match arg {
            KernelArg::Double(v) => Some(*v),
            _ => None,
        }
    }
}
