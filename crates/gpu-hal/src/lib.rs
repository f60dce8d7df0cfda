//! `ts-gpu-hal` — compute hardware abstraction.
//!
//! Selects an OpenCL platform and device, owns the process-wide compute
//! context with its command queue and compiled program, binds kernel
//! arguments, and runs the tiled strided transfer that feeds composite
//! kernels. Drivers implement [`ts_common::ClDriver`]; the real one lives
//! behind the `opencl` feature, the in-memory [`fake::FakeDriver`] is always
//! available.

#[cfg(feature = "opencl")]
pub mod opencl;

pub mod args;
pub mod context;
pub mod device;
pub mod diagnostics;
pub mod error;
pub mod fake;
pub mod kernels;
pub mod memory;
pub mod platform;
pub mod service;
pub mod transfer;

pub use args::{bind_report, set_kernel_args, Kernel};
pub use context::{ComputeContext, ProgramSource};
pub use device::default_device;
pub use diagnostics::{error_str, print_kernel_names};
pub use error::{ArgBindError, TransferError};
pub use memory::DeviceBuffer;
pub use platform::{default_platform, describe_platforms, select_platform, PlatformInfo};
pub use service::ComputeService;
pub use transfer::{
    composite_with_kernel, dispatch_composite, CompositeBuffers, DispatchOutcome, SkipReason,
    TransferSizes,
};
