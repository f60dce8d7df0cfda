//! OpenCL driver built on `opencl3`.
//!
//! Platform and device handles carry the raw OpenCL ids, so repeated
//! enumeration yields identical handles. Every other object lives in a
//! registry that maps an opaque `u64` handle to the owning `opencl3` RAII
//! type; removing the entry releases the object.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use ts_common::ComputeConfig;
//! use ts_gpu_hal::opencl::OpenClDriver;
//! use ts_gpu_hal::ComputeService;
//!
//! let service = ComputeService::new(Arc::new(OpenClDriver::new()), ComputeConfig::from_env());
//! let ctx = service.initialize();
//! println!("compute available: {}", ctx.available());
//! ```

use std::collections::HashMap;
use std::ffi::c_void;
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};

use opencl3::command_queue::{CommandQueue, CL_QUEUE_PROFILING_ENABLE};
use opencl3::context::Context;
use opencl3::device::{
    Device, CL_DEVICE_TYPE_ACCELERATOR, CL_DEVICE_TYPE_ALL, CL_DEVICE_TYPE_CPU,
    CL_DEVICE_TYPE_GPU,
};
use opencl3::error_codes::ClError;
use opencl3::kernel::Kernel;
use opencl3::memory::{Buffer, ClMem, CL_MEM_COPY_HOST_PTR, CL_MEM_READ_ONLY, CL_MEM_READ_WRITE};
use opencl3::platform::{get_platforms, Platform};
use opencl3::program::Program;
use opencl3::types::{cl_device_id, cl_device_type, cl_mem, cl_platform_id, CL_BLOCKING};
use parking_lot::RwLock;
use tracing::{debug, info};

use ts_common::{
    ClDriver, ClResult, ClStatus, ContextHandle, DeviceClass, DeviceHandle, KernelArg,
    KernelHandle, MemAccess, MemHandle, PlatformHandle, ProgramHandle, QueueHandle,
};

/// Global monotonic counter for generating unique resource handles.
static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Generate a unique handle ID for resource registration.
fn next_handle() -> u64 {
    NEXT_HANDLE.fetch_add(1, Ordering::Relaxed)
}

fn status(err: ClError) -> ClStatus {
    ClStatus(err.0)
}

fn device_type(class: DeviceClass) -> cl_device_type {
    match class {
        DeviceClass::Cpu => CL_DEVICE_TYPE_CPU,
        DeviceClass::Gpu => CL_DEVICE_TYPE_GPU,
        DeviceClass::Accelerator => CL_DEVICE_TYPE_ACCELERATOR,
        DeviceClass::Any => CL_DEVICE_TYPE_ALL,
    }
}

fn platform_of(handle: PlatformHandle) -> Platform {
    Platform::new(handle.0 as usize as cl_platform_id)
}

fn device_of(handle: DeviceHandle) -> Device {
    Device::new(handle.0 as usize as cl_device_id)
}

fn device_id(handle: DeviceHandle) -> cl_device_id {
    handle.0 as usize as cl_device_id
}

/// Handle-keyed storage of owned OpenCL objects.
struct Registry<T> {
    entries: RwLock<HashMap<u64, T>>,
}

impl<T> Registry<T> {
    fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn insert(&self, value: T) -> u64 {
        let handle = next_handle();
        self.entries.write().insert(handle, value);
        handle
    }

    fn with<R>(&self, handle: u64, invalid: ClStatus, f: impl FnOnce(&T) -> ClResult<R>) -> ClResult<R> {
        let entries = self.entries.read();
        let value = entries.get(&handle).ok_or(invalid)?;
        f(value)
    }

    fn with_mut<R>(
        &self,
        handle: u64,
        invalid: ClStatus,
        f: impl FnOnce(&mut T) -> ClResult<R>,
    ) -> ClResult<R> {
        let mut entries = self.entries.write();
        let value = entries.get_mut(&handle).ok_or(invalid)?;
        f(value)
    }

    fn remove(&self, handle: u64, invalid: ClStatus) -> ClResult<()> {
        self.entries
            .write()
            .remove(&handle)
            .map(drop)
            .ok_or(invalid)
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }
}

/// [`ClDriver`] over the system OpenCL ICD loader.
pub struct OpenClDriver {
    contexts: Registry<Context>,
    queues: Registry<CommandQueue>,
    programs: Registry<Program>,
    kernels: Registry<Kernel>,
    buffers: Registry<Buffer<u8>>,
}

// SAFETY: every OpenCL object is owned by a registry entry and only reached
// through the registry locks. OpenCL API calls are thread-safe except
// clSetKernelArg on the same kernel, which callers serialize by never
// sharing a kernel while binding.
unsafe impl Send for OpenClDriver {}
unsafe impl Sync for OpenClDriver {}

impl Default for OpenClDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenClDriver {
    pub fn new() -> Self {
        Self {
            contexts: Registry::new(),
            queues: Registry::new(),
            programs: Registry::new(),
            kernels: Registry::new(),
            buffers: Registry::new(),
        }
    }

    /// Number of live device buffers.
    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }
}

impl std::fmt::Debug for OpenClDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenClDriver")
            .field("contexts", &self.contexts.len())
            .field("queues", &self.queues.len())
            .field("programs", &self.programs.len())
            .field("kernels", &self.kernels.len())
            .field("buffers", &self.buffers.len())
            .finish()
    }
}

impl ClDriver for OpenClDriver {
    fn platforms(&self) -> ClResult<Vec<PlatformHandle>> {
        let platforms = get_platforms().map_err(status)?;
        debug!(count = platforms.len(), "Enumerated OpenCL platforms");
        Ok(platforms
            .iter()
            .map(|p| PlatformHandle(p.id() as usize as u64))
            .collect())
    }

    fn platform_vendor(&self, platform: PlatformHandle) -> ClResult<String> {
        platform_of(platform).vendor().map_err(status)
    }

    fn platform_name(&self, platform: PlatformHandle) -> ClResult<String> {
        platform_of(platform).name().map_err(status)
    }

    fn device_ids(
        &self,
        platform: PlatformHandle,
        class: DeviceClass,
    ) -> ClResult<Vec<DeviceHandle>> {
        let ids = platform_of(platform)
            .get_devices(device_type(class))
            .map_err(status)?;
        Ok(ids
            .into_iter()
            .map(|id| DeviceHandle(id as usize as u64))
            .collect())
    }

    fn device_name(&self, device: DeviceHandle) -> ClResult<String> {
        device_of(device).name().map_err(status)
    }

    fn create_context(&self, device: DeviceHandle) -> ClResult<ContextHandle> {
        let context = Context::from_device(&device_of(device)).map_err(status)?;
        let handle = self.contexts.insert(context);
        info!(
            device = %device_of(device).name().unwrap_or_default(),
            "Created OpenCL context"
        );
        Ok(ContextHandle(handle))
    }

    fn create_queue(
        &self,
        context: ContextHandle,
        _device: DeviceHandle,
        profiling: bool,
    ) -> ClResult<QueueHandle> {
        let properties = if profiling { CL_QUEUE_PROFILING_ENABLE } else { 0 };
        let queue = self
            .contexts
            .with(context.0, ClStatus::INVALID_CONTEXT, |ctx| {
                #[allow(deprecated)]
                CommandQueue::create_default(ctx, properties).map_err(status)
            })?;
        Ok(QueueHandle(self.queues.insert(queue)))
    }

    fn create_program(&self, context: ContextHandle, source: &str) -> ClResult<ProgramHandle> {
        let program = self
            .contexts
            .with(context.0, ClStatus::INVALID_CONTEXT, |ctx| {
                Program::create_from_source(ctx, source).map_err(status)
            })?;
        Ok(ProgramHandle(self.programs.insert(program)))
    }

    fn build_program(
        &self,
        program: ProgramHandle,
        device: DeviceHandle,
        options: &str,
    ) -> ClResult<()> {
        self.programs
            .with_mut(program.0, ClStatus::INVALID_PROGRAM, |p| {
                p.build(&[device_id(device)], options).map_err(status)
            })
    }

    fn build_log(&self, program: ProgramHandle, device: DeviceHandle) -> ClResult<String> {
        self.programs.with(program.0, ClStatus::INVALID_PROGRAM, |p| {
            p.get_build_log(device_id(device)).map_err(status)
        })
    }

    fn kernel_names(&self, program: ProgramHandle) -> ClResult<Vec<String>> {
        let names = self.programs.with(program.0, ClStatus::INVALID_PROGRAM, |p| {
            p.get_kernel_names().map_err(status)
        })?;
        Ok(names
            .split(';')
            .map(|n| n.trim_end_matches('\0').trim())
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn create_kernel(&self, program: ProgramHandle, name: &str) -> ClResult<KernelHandle> {
        let kernel = self.programs.with(program.0, ClStatus::INVALID_PROGRAM, |p| {
            Kernel::create(p, name).map_err(status)
        })?;
        Ok(KernelHandle(self.kernels.insert(kernel)))
    }

    fn set_kernel_arg(&self, kernel: KernelHandle, index: u32, arg: &KernelArg) -> ClResult<()> {
        self.kernels.with(kernel.0, ClStatus::INVALID_KERNEL, |k| {
            // SAFETY: each value has the exact size the kernel parameter
            // expects; buffer handles are looked up and stay alive in the
            // registry for the duration of the call.
            unsafe {
                match *arg {
                    KernelArg::Mem(Some(mem)) => {
                        let raw: cl_mem =
                            self.buffers
                                .with(mem.0, ClStatus::INVALID_MEM_OBJECT, |b| Ok(b.get()))?;
                        k.set_arg(index, &raw)
                    }
                    KernelArg::Mem(None) => {
                        let raw: cl_mem = ptr::null_mut();
                        k.set_arg(index, &raw)
                    }
                    KernelArg::I32(v) => k.set_arg(index, &v),
                    KernelArg::U32(v) => k.set_arg(index, &v),
                    KernelArg::F32(v) => k.set_arg(index, &v),
                }
                .map_err(status)
            }
        })
    }

    fn create_buffer(
        &self,
        context: ContextHandle,
        access: MemAccess,
        host: &[u8],
    ) -> ClResult<MemHandle> {
        let flags = match access {
            MemAccess::ReadOnly => CL_MEM_READ_ONLY,
            MemAccess::ReadWrite => CL_MEM_READ_WRITE,
        } | CL_MEM_COPY_HOST_PTR;
        let buffer = self.contexts.with(context.0, ClStatus::INVALID_CONTEXT, |ctx| {
            // SAFETY: with CL_MEM_COPY_HOST_PTR the host memory is only read,
            // and only during this call; `host` outlives it.
            unsafe {
                Buffer::<u8>::create(ctx, flags, host.len(), host.as_ptr() as *mut c_void)
                    .map_err(status)
            }
        })?;
        Ok(MemHandle(self.buffers.insert(buffer)))
    }

    fn enqueue_kernel(
        &self,
        queue: QueueHandle,
        kernel: KernelHandle,
        global: [usize; 2],
    ) -> ClResult<()> {
        self.queues.with(queue.0, ClStatus::INVALID_COMMAND_QUEUE, |q| {
            self.kernels.with(kernel.0, ClStatus::INVALID_KERNEL, |k| {
                // SAFETY: `global` holds two sizes for the two dimensions;
                // offsets and local sizes are left to the runtime.
                unsafe {
                    q.enqueue_nd_range_kernel(
                        k.get(),
                        2,
                        ptr::null(),
                        global.as_ptr(),
                        ptr::null(),
                        &[],
                    )
                }
                .map(drop)
                .map_err(status)
            })
        })
    }

    fn read_buffer(&self, queue: QueueHandle, mem: MemHandle, dst: &mut [u8]) -> ClResult<()> {
        self.queues.with(queue.0, ClStatus::INVALID_COMMAND_QUEUE, |q| {
            self.buffers.with(mem.0, ClStatus::INVALID_MEM_OBJECT, |b| {
                // SAFETY: the read is blocking, so `dst` is fully written
                // before this returns.
                unsafe { q.enqueue_read_buffer(b, CL_BLOCKING, 0, dst, &[]) }
                    .map(drop)
                    .map_err(status)
            })
        })
    }

    fn release_mem(&self, mem: MemHandle) -> ClResult<()> {
        self.buffers.remove(mem.0, ClStatus::INVALID_MEM_OBJECT)
    }

    fn release_kernel(&self, kernel: KernelHandle) -> ClResult<()> {
        self.kernels.remove(kernel.0, ClStatus::INVALID_KERNEL)
    }

    fn release_program(&self, program: ProgramHandle) -> ClResult<()> {
        self.programs.remove(program.0, ClStatus::INVALID_PROGRAM)
    }

    fn release_queue(&self, queue: QueueHandle) -> ClResult<()> {
        self.queues.remove(queue.0, ClStatus::INVALID_COMMAND_QUEUE)
    }

    fn release_context(&self, context: ContextHandle) -> ClResult<()> {
        self.contexts.remove(context.0, ClStatus::INVALID_CONTEXT)
    }

    fn release_device(&self, _device: DeviceHandle) -> ClResult<()> {
        // Root devices are owned by the platform; releasing them is a no-op.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::context::{ComputeContext, ProgramSource};
    use crate::transfer::dispatch_composite;
    use ts_common::{CompositeOp, CompositeParams, ComputeConfig};

    #[test]
    fn device_class_mapping() {
        assert_eq!(device_type(DeviceClass::Gpu), CL_DEVICE_TYPE_GPU);
        assert_eq!(device_type(DeviceClass::Any), CL_DEVICE_TYPE_ALL);
    }

    #[test]
    #[ignore = "requires an OpenCL runtime"]
    fn enumerate_platforms() {
        let driver = OpenClDriver::new();
        for platform in driver.platforms().unwrap() {
            println!(
                "{} / {}",
                driver.platform_vendor(platform).unwrap(),
                driver.platform_name(platform).unwrap()
            );
        }
    }

    #[test]
    #[ignore = "requires an OpenCL device"]
    fn composite_on_hardware() {
        let driver = Arc::new(OpenClDriver::new());
        let ctx = ComputeContext::with_source(
            driver.clone(),
            &ComputeConfig::enabled(),
            ProgramSource::Embedded,
        );
        assert!(ctx.available(), "build log: {:?}", ctx.build_log());

        // Opaque white over opaque black.
        let src = [255u8; 4 * 3 * 4];
        let mut dst = [0u8, 0, 0, 255].repeat(3 * 4);
        let op = CompositeOp::Over32;
        let mut params = CompositeParams::contiguous(&src, &mut dst, 4, 3, op.pixel_size());
        let outcome = dispatch_composite(&ctx, op.entry_point(), op.pixel_size(), &mut params);
        assert!(outcome.is_completed(), "{outcome:?}");
        assert!(dst.iter().all(|&b| b == 255));
        assert_eq!(driver.live_buffers(), 0);
    }
}
