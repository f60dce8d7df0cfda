//! `ts-common` — Shared types, traits, and errors for the Tessera compute layer.
//!
//! This crate is the foundation the other compute crates depend on.
//! It defines the core abstractions:
//!
//! - **Driver**: `ClDriver` and its opaque handles (`PlatformHandle`, `MemHandle`, ...)
//! - **Status**: `ClStatus`, the raw driver status code with symbolic names
//! - **Kernels**: `CompositeOp`, `KernelArg`, `KernelArgs`
//! - **Tiles**: `RegionDesc`, `CompositeParams` (strided host regions)
//! - **Errors**: `ComputeError` (thiserror-based)
//! - **Config**: `ComputeConfig`, `DeviceClass`

pub mod config;
pub mod error;
pub mod gpu_traits;
pub mod kernel;
pub mod status;
pub mod tile;

// Re-export commonly used items at crate root
pub use config::{ComputeConfig, DeviceClass};
pub use error::{ComputeError, ComputeResult};
pub use gpu_traits::{
    ClDriver, ClResult, ContextHandle, DeviceHandle, KernelHandle, MemAccess, MemHandle,
    PlatformHandle, ProgramHandle, QueueHandle,
};
pub use kernel::{CompositeOp, KernelArg, KernelArgs};
pub use status::ClStatus;
pub use tile::{CompositeParams, RegionDesc};
