//! Error types for per-call device work.

use thiserror::Error;

use ts_common::ClStatus;

/// A kernel argument failed to bind.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Failed to set kernel argument {index}: {status}")]
pub struct ArgBindError {
    /// Zero-based position of the first argument that failed.
    pub index: usize,
    pub status: ClStatus,
}

/// Errors raised while running one compositing call on the device.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// The context has no device context or queue to work with.
    #[error("Compute context is not initialized")]
    ContextUnavailable,

    /// A host slice is shorter than the footprint of its region.
    #[error("{region} region needs {required} bytes, host slice has {available}")]
    RegionOutOfBounds {
        region: &'static str,
        required: usize,
        available: usize,
    },

    /// The byte footprint of a region does not fit in `usize`.
    #[error("{region} region footprint overflows the address space")]
    SizeOverflow { region: &'static str },

    /// A zero destination stride on a tile of more than one pixel would
    /// make every work item write outside the one-pixel device buffer.
    #[error("Destination of a {rows}x{cols} tile cannot be broadcast")]
    BroadcastDestination { rows: usize, cols: usize },

    /// A row stride does not fit the kernel's `int` parameter.
    #[error("Row stride {stride} exceeds the kernel integer range")]
    StrideOverflow { stride: usize },

    #[error("Device buffer allocation failed ({size} bytes): {status}")]
    AllocFailed { size: usize, status: ClStatus },

    #[error(transparent)]
    ArgBind(#[from] ArgBindError),

    #[error("Kernel enqueue failed: {0}")]
    Enqueue(ClStatus),

    #[error("Read-back of {size} bytes failed: {status}")]
    ReadBack { size: usize, status: ClStatus },
}

impl TransferError {
    /// The driver status behind this error, if the driver reported one.
    pub fn status(&self) -> Option<ClStatus> {
        match self {
            Self::AllocFailed { status, .. } | Self::ReadBack { status, .. } => Some(*status),
            Self::ArgBind(e) => Some(e.status),
            Self::Enqueue(status) => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arg_bind_error_names_index() {
        let err = ArgBindError {
            index: 6,
            status: ClStatus::INVALID_ARG_SIZE,
        };
        assert_eq!(
            err.to_string(),
            "Failed to set kernel argument 6: CL_INVALID_ARG_SIZE (-51)"
        );
    }

    #[test]
    fn status_extraction() {
        let err: TransferError = ArgBindError {
            index: 0,
            status: ClStatus::INVALID_MEM_OBJECT,
        }
        .into();
        assert_eq!(err.status(), Some(ClStatus::INVALID_MEM_OBJECT));
        assert_eq!(TransferError::ContextUnavailable.status(), None);
    }

    #[test]
    fn region_error_message() {
        let err = TransferError::RegionOutOfBounds {
            region: "dst",
            required: 48,
            available: 32,
        };
        let msg = err.to_string();
        assert!(msg.contains("dst"));
        assert!(msg.contains("48"));
    }
}
