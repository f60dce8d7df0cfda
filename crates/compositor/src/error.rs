//! Compositor error types.

use thiserror::Error;
use ts_gpu_hal::TransferError;

/// Errors that can occur during compositing.
#[derive(Debug, Error)]
pub enum CompositorError {
    /// A scalar parameter is not a finite value in `[0, 1]`.
    #[error("{name} must be within [0, 1], got {value}")]
    OutOfRange { name: &'static str, value: f32 },

    /// Destination rows overlap or the destination is broadcast.
    #[error("Destination row stride {stride} is shorter than one row of {row_bytes} bytes")]
    DestinationStride { stride: usize, row_bytes: usize },

    /// A row stride does not fit the kernel's 32-bit stride argument.
    #[error("{region} row stride {stride} exceeds the kernel argument range")]
    StrideTooLarge { region: &'static str, stride: usize },

    /// The compute context is unavailable.
    #[error("Compute context unavailable")]
    Unavailable,

    /// The program does not provide the operation's kernel.
    #[error("Kernel not found: {0}")]
    KernelMissing(&'static str),

    /// The tiled transfer failed.
    #[error(transparent)]
    Transfer(#[from] TransferError),
}
