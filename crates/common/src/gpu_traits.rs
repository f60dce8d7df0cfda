//! Compute driver abstraction.
//!
//! The compute layer programs against [`ClDriver`], not against a concrete
//! OpenCL binding. Every driver object is referred to by an opaque `u64`
//! handle; the driver owns the underlying object until the matching
//! `release_*` call.

use crate::config::DeviceClass;
use crate::kernel::KernelArg;
use crate::status::ClStatus;

macro_rules! opaque_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl $name {
            pub fn raw(self) -> u64 {
                self.0
            }
        }
    };
}

opaque_handle!(
    /// A vendor compute backend. Never released by the compute layer.
    PlatformHandle
);
opaque_handle!(
    /// A device belonging to a platform.
    DeviceHandle
);
opaque_handle!(
    /// A context bound to one device.
    ContextHandle
);
opaque_handle!(
    /// An in-order command queue.
    QueueHandle
);
opaque_handle!(
    /// A program created from source text.
    ProgramHandle
);
opaque_handle!(
    /// A kernel created from a built program.
    KernelHandle
);
opaque_handle!(
    /// A device memory object.
    MemHandle
);

/// Device access mode of a buffer. Buffers are always seeded from host memory.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MemAccess {
    ReadOnly,
    ReadWrite,
}

/// Result of a driver call.
pub type ClResult<T> = Result<T, ClStatus>;

/// Minimal compute driver surface used by the compute layer.
///
/// Implementations must be callable from any thread.
pub trait ClDriver: Send + Sync {
    // -- Discovery --

    /// All platforms, in enumeration order.
    fn platforms(&self) -> ClResult<Vec<PlatformHandle>>;

    fn platform_vendor(&self, platform: PlatformHandle) -> ClResult<String>;

    fn platform_name(&self, platform: PlatformHandle) -> ClResult<String>;

    /// Devices of `class` on `platform`, in enumeration order.
    fn device_ids(&self, platform: PlatformHandle, class: DeviceClass)
        -> ClResult<Vec<DeviceHandle>>;

    /// Human-readable device name.
    fn device_name(&self, device: DeviceHandle) -> ClResult<String>;

    // -- Context and queue --

    fn create_context(&self, device: DeviceHandle) -> ClResult<ContextHandle>;

    fn create_queue(
        &self,
        context: ContextHandle,
        device: DeviceHandle,
        profiling: bool,
    ) -> ClResult<QueueHandle>;

    // -- Programs and kernels --

    fn create_program(&self, context: ContextHandle, source: &str) -> ClResult<ProgramHandle>;

    fn build_program(
        &self,
        program: ProgramHandle,
        device: DeviceHandle,
        options: &str,
    ) -> ClResult<()>;

    /// Build log of the last build of `program` for `device`.
    fn build_log(&self, program: ProgramHandle, device: DeviceHandle) -> ClResult<String>;

    /// Names of every kernel entry point in a built program.
    fn kernel_names(&self, program: ProgramHandle) -> ClResult<Vec<String>>;

    fn create_kernel(&self, program: ProgramHandle, name: &str) -> ClResult<KernelHandle>;

    /// Bind one argument. Rebinding an index overwrites the previous value.
    fn set_kernel_arg(&self, kernel: KernelHandle, index: u32, arg: &KernelArg) -> ClResult<()>;

    // -- Memory and execution --

    /// Create a buffer of `host.len()` bytes initialized from `host`.
    fn create_buffer(
        &self,
        context: ContextHandle,
        access: MemAccess,
        host: &[u8],
    ) -> ClResult<MemHandle>;

    /// Enqueue `kernel` over a 2-D global index space.
    fn enqueue_kernel(
        &self,
        queue: QueueHandle,
        kernel: KernelHandle,
        global: [usize; 2],
    ) -> ClResult<()>;

    /// Blocking read of `dst.len()` bytes from the start of `mem`.
    fn read_buffer(&self, queue: QueueHandle, mem: MemHandle, dst: &mut [u8]) -> ClResult<()>;

    // -- Release --

    fn release_mem(&self, mem: MemHandle) -> ClResult<()>;

    fn release_kernel(&self, kernel: KernelHandle) -> ClResult<()>;

    fn release_program(&self, program: ProgramHandle) -> ClResult<()>;

    fn release_queue(&self, queue: QueueHandle) -> ClResult<()>;

    fn release_context(&self, context: ContextHandle) -> ClResult<()>;

    fn release_device(&self, device: DeviceHandle) -> ClResult<()>;
}
