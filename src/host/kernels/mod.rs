//! Host kernel table.
//!
//! Each family module exports a `KERNELS` table of [`KernelDef`]s. A kernel
//! is registered once per operation name and instantiated for `f32` and
//! `f64`; precision-insensitive kernels are also reachable untagged.

pub(crate) mod activation;
pub(crate) mod conv;
pub(crate) mod dropout;
pub(crate) mod elementwise;
pub(crate) mod lrn;
pub(crate) mod pooling;
pub(crate) mod random;
pub(crate) mod softmax;
pub(crate) mod transform;

use super::launch::Launch;
use crate::device::KernelArg;
use crate::error::StatusCode;
use crate::precision::Precision;

pub(crate) type KernelFn = fn(&mut Launch) -> Result<(), StatusCode>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Access {
    Read,
    Write,
    ReadWrite,
}

/// Declared type of one kernel parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Param {
    Int,
    Uint,
    /// Scalar matching the kernel precision.
    Real,
    /// `float` regardless of precision.
    Single,
    Flag,
    Counter,
    Scratch,
    Buffer { access: Access, nullable: bool },
}

pub(crate) const IN: Param = Param::Buffer {
    access: Access::Read,
    nullable: false,
};
pub(crate) const OUT: Param = Param::Buffer {
    access: Access::Write,
    nullable: false,
};
pub(crate) const INOUT: Param = Param::Buffer {
    access: Access::ReadWrite,
    nullable: false,
};
pub(crate) const OPT_IN: Param = Param::Buffer {
    access: Access::Read,
    nullable: true,
};
pub(crate) const OPT_OUT: Param = Param::Buffer {
    access: Access::Write,
    nullable: true,
};

impl Param {
    /// Checks a scalar or scratch argument against this parameter.
    ///
    /// Buffer arguments are only checked for kind here; the device checks
    /// that the buffer exists.
    pub(crate) fn accepts(self, arg: &KernelArg, precision: Precision) -> StatusCode {
        use KernelArg as A;
        let ok = match (self, arg) {
            (Self::Int, A::Int(_))
            | (Self::Uint, A::Uint(_))
            | (Self::Single, A::Float(_))
            | (Self::Flag, A::Bool(_))
            | (Self::Counter, A::Counter(_))
            | (Self::Buffer { .. }, A::Buffer(_)) => true,
            (Self::Real, A::Float(_)) => precision == Precision::Single,
            (Self::Real, A::Double(_)) => precision == Precision::Double,
            (Self::Buffer { nullable, .. }, A::NullBuffer) => {
                return if nullable {
                    StatusCode::SUCCESS
                } else {
                    StatusCode::INVALID_MEM_OBJECT
                };
            }
            (Self::Scratch, A::LocalScratch(bytes)) => {
                return if *bytes == 0 {
                    StatusCode::INVALID_ARG_SIZE
                } else {
                    StatusCode::SUCCESS
                };
            }
            (Self::Scratch, _) => return StatusCode::INVALID_ARG_VALUE,
            (_, A::LocalScratch(_)) => return StatusCode::INVALID_ARG_VALUE,
            _ => false,
        };
        if ok {
            StatusCode::SUCCESS
        } else {
            StatusCode::INVALID_ARG_SIZE
        }
    }
}

/// One registered kernel.
#[derive(Debug, Clone, Copy)]
pub(crate) struct KernelDef {
    pub(crate) op: &'static str,
    pub(crate) params: &'static [Param],
    pub(crate) single: KernelFn,
    pub(crate) double: KernelFn,
    pub(crate) untagged: bool,
}

impl KernelDef {
    /// Entry point for the given precision. Untagged kernels run the
    /// single-precision instantiation.
    pub(crate) fn entry(&self, precision: Precision) -> KernelFn {
        match precision {
            Precision::Double => self.double,
            Precision::Single | Precision::Untagged => self.single,
        }
    }
}

/// Registers a kernel generic over the element type.
macro_rules! kernel {
    ($op:literal, $body:ident, [$($param:expr),* $(,)?]) => {
        $crate::host::kernels::KernelDef {
            op: $op,
            params: &[$($param),*],
            single: $body::<f32>,
            double: $body::<f64>,
            untagged: false,
        }
    };
}
pub(crate) use kernel;

fn families() -> impl Iterator<Item = &'static KernelDef> {
    [
        elementwise::KERNELS,
        random::KERNELS,
        transform::KERNELS,
        softmax::KERNELS,
        pooling::KERNELS,
        lrn::KERNELS,
        activation::KERNELS,
        dropout::KERNELS,
        conv::KERNELS,
    ]
    .into_iter()
    .flatten()
}

/// Looks a full kernel name up in the table.
pub(crate) fn find(name: &str) -> Option<(&'static KernelDef, Precision)> {
    let (op, precision) = Precision::split(name);
    families()
        .find(|def| def.op == op)
        .filter(|def| precision != Precision::Untagged || def.untagged)
        .map(|def| (def, precision))
}

/// Every full kernel name the host device answers to.
pub(crate) fn names() -> Vec<String> {
    let mut names = Vec::new();
    for def in families() {
        if def.untagged {
            names.push(def.op.to_owned());
        }
        for precision in [Precision::Single, Precision::Double] {
            names.push(format!("{}{}", def.op, precision.suffix()));
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_honours_suffix_rules() {
        let (def, precision) = find("ReLUForward_double").unwrap();
        assert_eq!(def.op, "ReLUForward");
        assert_eq!(precision, Precision::Double);
        assert!(find("ReLUForward").is_none());
        assert!(find("RNGBernoulli").is_some());
        assert!(find("ReLUForward_half").is_none());
    }

    #[test]
    fn operation_names_are_unique() {
        let names = names();
        let mut sorted = names.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), names.len());
    }

    #[test]
    fn real_params_follow_precision() {
        let float = KernelArg::Float(1.0);
        assert!(Param::Real.accepts(&float, Precision::Single).is_success());
        assert_eq!(Param::Real.accepts(&float, Precision::Double), StatusCode::INVALID_ARG_SIZE);
        assert_eq!(OUT.accepts(&KernelArg::NullBuffer, Precision::Single), StatusCode::INVALID_MEM_OBJECT);
        assert!(OPT_OUT.accepts(&KernelArg::NullBuffer, Precision::Single).is_success());
        assert_eq!(Param::Int.accepts(&KernelArg::LocalScratch(16), Precision::Single), StatusCode::INVALID_ARG_VALUE);
    }
}
