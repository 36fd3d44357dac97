//! Error taxonomy and status codes
//!
//! Three classes of failure surface from the engine:
//!
//! 1. **Argument errors**, detected before any device work starts
//!    ([`SnmgError::InvalidArgument`], [`SnmgError::ColumnSizeMismatch`],
//!    [`SnmgError::UnsupportedDataType`], [`SnmgError::NullValuesUnsupported`]).
//! 2. **State errors**, contract violations of the solver state machine
//!    ([`SnmgError::InvalidState`]).
//! 3. **Device/collective errors**, detected on one worker and observed by all
//!    ([`SnmgError::AllocationFailure`], [`SnmgError::DeviceBinding`],
//!    [`SnmgError::CollectiveFailure`]).
//!
//! Every error maps onto a negative [`StatusCode`] for callers that speak the
//! dataframe-style status protocol.

use crate::device::DeviceId;
use thiserror::Error;

/// Crate-wide result type
pub type Result<T> = std::result::Result<T, SnmgError>;

/// Solver state machine violations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvalidState {
    /// `setup()` was called on a solver that is already set up
    #[error("solver is already set up")]
    AlreadySetUp,
    /// `solve()` was called before `setup()`
    #[error("solver is not set up")]
    NotSetUp,
}

/// Engine errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnmgError {
    /// A precondition on the arguments was violated
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Source and destination columns of one device differ in length
    #[error("Column size mismatch on device {device}: {sources} sources vs {destinations} destinations")]
    ColumnSizeMismatch {
        /// Device whose columns disagree
        device: usize,
        /// Length of the source column
        sources: usize,
        /// Length of the destination column
        destinations: usize,
    },

    /// Column element type is not a 32-bit vertex id
    #[error("Unsupported data type: {0}")]
    UnsupportedDataType(String),

    /// A column carries null markers
    #[error("Null values are not supported (device {device})")]
    NullValuesUnsupported {
        /// Device whose column contains nulls
        device: usize,
    },

    /// Solver used out of order
    #[error("Invalid state: {0}")]
    InvalidState(#[from] InvalidState),

    /// Device allocation exceeded the device capacity
    #[error("Allocation of {requested} bytes failed on {device} ({available} bytes available)")]
    AllocationFailure {
        /// Device the allocation targeted
        device: DeviceId,
        /// Bytes requested
        requested: usize,
        /// Bytes still free on the device
        available: usize,
    },

    /// A worker could not bind to its accelerator
    #[error("Failed to bind worker to {device}: {reason}")]
    DeviceBinding {
        /// Device the worker tried to bind
        device: DeviceId,
        /// Backend diagnostic
        reason: String,
    },

    /// A device kernel or transfer failed on one worker
    #[error("Kernel failure on {device}: {reason}")]
    KernelFailure {
        /// Device that ran the kernel
        device: DeviceId,
        /// Backend diagnostic
        reason: String,
    },

    /// Another worker failed during a collective step
    #[error("Collective failure reported by {device}: {reason}")]
    CollectiveFailure {
        /// First device that reported a failure
        device: DeviceId,
        /// Diagnostic of the original failure
        reason: String,
    },
}

/// Coarse classification of [`SnmgError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Argument validation failed before any device work
    Argument,
    /// Solver state machine violation
    InvalidState,
    /// Device memory exhausted
    AllocationFailure,
    /// Failure observed through a collective step (includes binding errors)
    CollectiveFailure,
}

/// Status codes returned to dataframe-style callers
///
/// `Success` is zero; every failure is negative.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// Computation finished and the result column is valid
    Success = 0,
    /// Internal collective/device failure
    Failure = -1,
    /// Precondition violated
    InvalidArgument = -2,
    /// Source/destination length mismatch
    ColumnSizeMismatch = -3,
    /// Element type is not a 32-bit integer
    UnsupportedDataType = -4,
    /// Column carries nulls
    NullValuesUnsupported = -5,
}

impl StatusCode {
    /// Raw integer code
    #[must_use]
    pub const fn code(self) -> i32 {
        self as i32
    }
}

impl SnmgError {
    /// Classify this error
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_)
            | Self::ColumnSizeMismatch { .. }
            | Self::UnsupportedDataType(_)
            | Self::NullValuesUnsupported { .. } => ErrorKind::Argument,
            Self::InvalidState(_) => ErrorKind::InvalidState,
            Self::AllocationFailure { .. } => ErrorKind::AllocationFailure,
            Self::DeviceBinding { .. }
            | Self::KernelFailure { .. }
            | Self::CollectiveFailure { .. } => ErrorKind::CollectiveFailure,
        }
    }

    /// Status code reported to the caller of the top-level entry point
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::InvalidArgument(_) => StatusCode::InvalidArgument,
            Self::ColumnSizeMismatch { .. } => StatusCode::ColumnSizeMismatch,
            Self::UnsupportedDataType(_) => StatusCode::UnsupportedDataType,
            Self::NullValuesUnsupported { .. } => StatusCode::NullValuesUnsupported,
            Self::InvalidState(_)
            | Self::AllocationFailure { .. }
            | Self::DeviceBinding { .. }
            | Self::KernelFailure { .. }
            | Self::CollectiveFailure { .. } => StatusCode::Failure,
        }
    }

    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}

/// Status code of a finished computation
#[must_use]
pub fn status_of<T>(result: &Result<T>) -> StatusCode {
    match result {
        Ok(_) => StatusCode::Success,
        Err(e) => e.status(),
    }
}
