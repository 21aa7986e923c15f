//! Device status codes and dispatch errors.

use core::fmt;
use thiserror::Error;

/// Return code reported by a device runtime call.
///
/// Values follow the OpenCL numbering so codes read the same in logs
/// regardless of which device produced them.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusCode(pub i32);

impl StatusCode {
    pub const SUCCESS: Self = Self(0);
    pub const OUT_OF_RESOURCES: Self = Self(-5);
    pub const MAP_FAILURE: Self = Self(-12);
    pub const INVALID_VALUE: Self = Self(-30);
    pub const INVALID_MEM_OBJECT: Self = Self(-38);
    pub const INVALID_KERNEL_NAME: Self = Self(-46);
    pub const INVALID_KERNEL: Self = Self(-48);
    pub const INVALID_ARG_INDEX: Self = Self(-49);
    pub const INVALID_ARG_VALUE: Self = Self(-50);
    pub const INVALID_ARG_SIZE: Self = Self(-51);
    pub const INVALID_KERNEL_ARGS: Self = Self(-52);
    pub const INVALID_WORK_DIMENSION: Self = Self(-53);
    pub const INVALID_WORK_GROUP_SIZE: Self = Self(-54);
    pub const INVALID_BUFFER_SIZE: Self = Self(-61);
    pub const INVALID_GLOBAL_WORK_SIZE: Self = Self(-63);

    /// Returns `true` for [`StatusCode::SUCCESS`].
    #[inline]
    pub const fn is_success(self) -> bool {
        self.0 == 0
    }

    /// Converts the code into a `Result`, keeping the failing code.
    #[inline]
    pub const fn check(self) -> core::result::Result<(), StatusCode> {
        if self.is_success() { Ok(()) } else { Err(self) }
    }

    /// Symbolic name of the code, if it is one the crate knows.
    pub const fn name(self) -> Option<&'static str> {
        Some(match self.0 {
            0 => "CL_SUCCESS",
            -5 => "CL_OUT_OF_RESOURCES",
            -12 => "CL_MAP_FAILURE",
            -30 => "CL_INVALID_VALUE",
            -38 => "CL_INVALID_MEM_OBJECT",
            -46 => "CL_INVALID_KERNEL_NAME",
            -48 => "CL_INVALID_KERNEL",
            -49 => "CL_INVALID_ARG_INDEX",
            -50 => "CL_INVALID_ARG_VALUE",
            -51 => "CL_INVALID_ARG_SIZE",
            -52 => "CL_INVALID_KERNEL_ARGS",
            -53 => "CL_INVALID_WORK_DIMENSION",
            -54 => "CL_INVALID_WORK_GROUP_SIZE",
            -61 => "CL_INVALID_BUFFER_SIZE",
            -63 => "CL_INVALID_GLOBAL_WORK_SIZE",
            _ => return None,
        })
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name} ({})", self.0),
            None => write!(f, "device error {}", self.0),
        }
    }
}

impl fmt::Debug for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// One rejected argument slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindFailure {
    /// Zero-based argument index.
    pub index: u32,
    /// Code returned by the device for that slot.
    pub code: StatusCode,
}

impl fmt::Display for BindFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "arg {}: {}", self.index, self.code)
    }
}

fn join_failures(failures: &[BindFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors surfaced by a dispatch.
///
/// Every variant is fatal for the dispatch that raised it. Nothing is retried
/// and no partial output is reported as valid.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No compiled kernel matches the composed name.
    #[error("kernel `{name}` not found: {code}")]
    KernelNotFound { name: String, code: StatusCode },

    /// One or more argument slots were rejected.
    #[error("binding arguments of `{kernel}` failed: {}", join_failures(.failures))]
    ArgumentBindingFailed {
        kernel: String,
        failures: Vec<BindFailure>,
    },

    /// The device refused or failed to schedule the kernel.
    #[error("enqueue of `{kernel}` failed: {code}")]
    EnqueueFailed { kernel: String, code: StatusCode },

    /// The caller broke a size or shape requirement of the operation.
    #[error("{op}: precondition violated: {reason}")]
    PreconditionViolation { op: &'static str, reason: String },

    /// A host/device transfer (create, write, map-read) failed.
    #[error("{stage} failed: {code}")]
    TransferFailed { stage: &'static str, code: StatusCode },

    /// A device backend could not be opened.
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Configuration values were rejected.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl DispatchError {
    /// Device status code behind the error, where there is one.
    ///
    /// For binding failures this is the code of the first rejected slot.
    pub fn code(&self) -> Option<StatusCode> {
        match self {
            Self::KernelNotFound { code, .. }
            | Self::EnqueueFailed { code, .. }
            | Self::TransferFailed { code, .. } => Some(*code),
            Self::ArgumentBindingFailed { failures, .. } => failures.first().map(|f| f.code),
            _ => None,
        }
    }

    /// Short name of the stage that failed.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::KernelNotFound { .. } => "resolve",
            Self::ArgumentBindingFailed { .. } => "bind",
            Self::EnqueueFailed { .. } => "enqueue",
            Self::PreconditionViolation { .. } => "precondition",
            Self::TransferFailed { stage, .. } => stage,
            Self::DeviceUnavailable(_) => "open",
            Self::InvalidConfig(_) => "config",
        }
    }

    pub(crate) fn precondition(op: &'static str, reason: impl Into<String>) -> Self {
        Self::PreconditionViolation {
            op,
            reason: reason.into(),
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, DispatchError>;
