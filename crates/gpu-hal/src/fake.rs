//! In-process recording driver.
//!
//! `FakeDriver` implements [`ClDriver`] without any hardware. It exposes a
//! scripted platform/device topology, keeps device buffers as host byte
//! vectors, can run host closures in place of kernels, and records every
//! call so tests can assert on allocation, release and ordering.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use ts_common::{
    ClDriver, ClResult, ClStatus, ContextHandle, DeviceClass, DeviceHandle, KernelArg,
    KernelHandle, MemAccess, MemHandle, PlatformHandle, ProgramHandle, QueueHandle,
};

/// Host-side stand-in for a kernel body.
///
/// Receives the bound arguments, the global size and mutable access to every
/// live buffer.
pub type HostKernel = Arc<dyn Fn(&KernelInvocation<'_>, &mut FakeMemory) + Send + Sync>;

/// Arguments visible to a [`HostKernel`].
#[derive(Debug)]
pub struct KernelInvocation<'a> {
    pub name: &'a str,
    pub args: &'a [Option<KernelArg>],
    pub global: [usize; 2],
}

impl KernelInvocation<'_> {
    pub fn mem(&self, index: usize) -> Option<MemHandle> {
        match self.args.get(index).copied().flatten() {
            Some(KernelArg::Mem(mem)) => mem,
            _ => None,
        }
    }

    pub fn i32(&self, index: usize) -> i32 {
        match self.args.get(index).copied().flatten() {
            Some(KernelArg::I32(v)) => v,
            _ => 0,
        }
    }

    pub fn f32(&self, index: usize) -> f32 {
        match self.args.get(index).copied().flatten() {
            Some(KernelArg::F32(v)) => v,
            _ => 0.0,
        }
    }
}

/// Buffer storage of the fake device.
#[derive(Debug, Default)]
pub struct FakeMemory {
    buffers: HashMap<MemHandle, Vec<u8>>,
}

impl FakeMemory {
    pub fn get(&self, mem: MemHandle) -> Option<&[u8]> {
        self.buffers.get(&mem).map(Vec::as_slice)
    }

    pub fn get_mut(&mut self, mem: MemHandle) -> Option<&mut Vec<u8>> {
        self.buffers.get_mut(&mem)
    }
}

/// A scripted platform and the devices it exposes.
#[derive(Clone, Debug)]
pub struct FakePlatform {
    pub vendor: String,
    pub name: String,
    pub devices: Vec<(DeviceClass, String)>,
}

impl FakePlatform {
    pub fn new(vendor: &str, name: &str) -> Self {
        Self {
            vendor: vendor.to_string(),
            name: name.to_string(),
            devices: Vec::new(),
        }
    }

    pub fn with_device(mut self, class: DeviceClass, name: &str) -> Self {
        self.devices.push((class, name.to_string()));
        self
    }
}

/// Driver step that can be forced to fail.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FailPoint {
    Platforms,
    DeviceIds,
    CreateContext,
    CreateQueue,
    CreateProgram,
    BuildProgram,
    CreateKernel,
    /// Argument binding at the given index.
    SetArg(u32),
    CreateBuffer,
    Enqueue,
    ReadBuffer,
}

/// One recorded driver call.
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    Platforms,
    DeviceIds(PlatformHandle, DeviceClass),
    CreateContext(DeviceHandle),
    CreateQueue { profiling: bool },
    CreateProgram,
    BuildProgram { options: String },
    BuildLog,
    KernelNames,
    CreateKernel(String),
    SetArg(u32, KernelArg),
    CreateBuffer { access: MemAccess, size: usize },
    Enqueue { global: [usize; 2] },
    ReadBuffer { mem: MemHandle, size: usize },
    ReleaseMem(MemHandle),
    ReleaseKernel(KernelHandle),
    ReleaseProgram(ProgramHandle),
    ReleaseQueue(QueueHandle),
    ReleaseContext(ContextHandle),
    ReleaseDevice(DeviceHandle),
}

#[derive(Default)]
struct State {
    platforms: Vec<FakePlatform>,
    /// device handle -> (platform index, device index)
    devices: HashMap<DeviceHandle, (usize, usize)>,
    kernel_names: Vec<String>,
    host_kernels: HashMap<String, HostKernel>,
    failures: HashMap<FailPoint, ClStatus>,
    build_log: String,
    contexts: Vec<ContextHandle>,
    queues: Vec<QueueHandle>,
    programs: HashMap<ProgramHandle, String>,
    kernels: HashMap<KernelHandle, (String, Vec<Option<KernelArg>>)>,
    memory: FakeMemory,
    calls: Vec<Call>,
}

/// Recording in-process driver.
pub struct FakeDriver {
    state: Mutex<State>,
    next: AtomicU64,
}

impl std::fmt::Debug for FakeDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("FakeDriver")
            .field("platforms", &state.platforms)
            .field("kernel_names", &state.kernel_names)
            .field("live_buffers", &state.memory.buffers.len())
            .finish()
    }
}

impl Default for FakeDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDriver {
    /// A driver with no platforms.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            next: AtomicU64::new(1),
        }
    }

    /// One GPU platform with one device whose program exposes `kernel_names`.
    pub fn with_gpu(kernel_names: &[&str]) -> Self {
        Self::new()
            .platform(
                FakePlatform::new("Fake Vendor", "Fake Compute")
                    .with_device(DeviceClass::Gpu, "Fake GPU"),
            )
            .kernels(kernel_names)
    }

    pub fn platform(self, platform: FakePlatform) -> Self {
        self.state.lock().platforms.push(platform);
        self
    }

    /// Kernel entry points present in every program built by this driver.
    pub fn kernels(self, names: &[&str]) -> Self {
        self.state.lock().kernel_names = names.iter().map(|n| n.to_string()).collect();
        self
    }

    /// Run `body` whenever the kernel `name` is enqueued.
    pub fn host_kernel<F>(self, name: &str, body: F) -> Self
    where
        F: Fn(&KernelInvocation<'_>, &mut FakeMemory) + Send + Sync + 'static,
    {
        {
            let mut state = self.state.lock();
            state.host_kernels.insert(name.to_string(), Arc::new(body));
            if !state.kernel_names.iter().any(|n| n == name) {
                state.kernel_names.push(name.to_string());
            }
        }
        self
    }

    /// Build log returned after a build, successful or not.
    pub fn build_log_text(self, log: &str) -> Self {
        self.state.lock().build_log = log.to_string();
        self
    }

    /// Make `point` fail with `status` from now on.
    pub fn fail_at(self, point: FailPoint, status: ClStatus) -> Self {
        self.inject(point, status);
        self
    }

    /// Like [`fail_at`](Self::fail_at), for a driver already shared.
    pub fn inject(&self, point: FailPoint, status: ClStatus) {
        self.state.lock().failures.insert(point, status);
    }

    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    // -- Inspection --

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| pred(c)).count()
    }

    /// Number of buffers currently allocated.
    pub fn live_buffers(&self) -> usize {
        self.state.lock().memory.buffers.len()
    }

    /// Number of kernels currently alive.
    pub fn live_kernels(&self) -> usize {
        self.state.lock().kernels.len()
    }

    /// Number of create/release calls of any driver object, as a pair.
    pub fn alloc_release_counts(&self) -> (usize, usize) {
        let state = self.state.lock();
        let allocs = state
            .calls
            .iter()
            .filter(|c| matches!(c, Call::CreateBuffer { .. }))
            .count();
        let frees = state
            .calls
            .iter()
            .filter(|c| matches!(c, Call::ReleaseMem(_)))
            .count();
        (allocs, frees)
    }

    fn handle(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    fn check(state: &State, point: FailPoint) -> ClResult<()> {
        match state.failures.get(&point) {
            Some(status) => Err(*status),
            None => Ok(()),
        }
    }
}

fn class_matches(requested: DeviceClass, actual: DeviceClass) -> bool {
    requested == DeviceClass::Any || requested == actual
}

impl ClDriver for FakeDriver {
    fn platforms(&self) -> ClResult<Vec<PlatformHandle>> {
        let mut state = self.state.lock();
        state.calls.push(Call::Platforms);
        Self::check(&state, FailPoint::Platforms)?;
        // Platform handles are 1-based indices into the scripted list.
        Ok((1..=state.platforms.len() as u64).map(PlatformHandle).collect())
    }

    fn platform_vendor(&self, platform: PlatformHandle) -> ClResult<String> {
        let state = self.state.lock();
        state
            .platforms
            .get((platform.0 as usize).wrapping_sub(1))
            .map(|p| p.vendor.clone())
            .ok_or(ClStatus::INVALID_PLATFORM)
    }

    fn platform_name(&self, platform: PlatformHandle) -> ClResult<String> {
        let state = self.state.lock();
        state
            .platforms
            .get((platform.0 as usize).wrapping_sub(1))
            .map(|p| p.name.clone())
            .ok_or(ClStatus::INVALID_PLATFORM)
    }

    fn device_ids(
        &self,
        platform: PlatformHandle,
        class: DeviceClass,
    ) -> ClResult<Vec<DeviceHandle>> {
        let mut state = self.state.lock();
        state.calls.push(Call::DeviceIds(platform, class));
        Self::check(&state, FailPoint::DeviceIds)?;
        let index = (platform.0 as usize).wrapping_sub(1);
        let matching: Vec<usize> = state
            .platforms
            .get(index)
            .ok_or(ClStatus::INVALID_PLATFORM)?
            .devices
            .iter()
            .enumerate()
            .filter(|(_, (c, _))| class_matches(class, *c))
            .map(|(i, _)| i)
            .collect();
        if matching.is_empty() {
            return Err(ClStatus::DEVICE_NOT_FOUND);
        }
        // Device ids are stable per (platform, device) slot.
        Ok(matching
            .into_iter()
            .map(|d| {
                let handle = DeviceHandle(((index as u64 + 1) << 32) | (d as u64 + 1));
                state.devices.insert(handle, (index, d));
                handle
            })
            .collect())
    }

    fn device_name(&self, device: DeviceHandle) -> ClResult<String> {
        let state = self.state.lock();
        let (p, d) = state
            .devices
            .get(&device)
            .copied()
            .ok_or(ClStatus::INVALID_DEVICE)?;
        Ok(state.platforms[p].devices[d].1.clone())
    }

    fn create_context(&self, device: DeviceHandle) -> ClResult<ContextHandle> {
        let mut state = self.state.lock();
        state.calls.push(Call::CreateContext(device));
        Self::check(&state, FailPoint::CreateContext)?;
        if !state.devices.contains_key(&device) {
            return Err(ClStatus::INVALID_DEVICE);
        }
        let handle = ContextHandle(self.handle());
        state.contexts.push(handle);
        Ok(handle)
    }

    fn create_queue(
        &self,
        context: ContextHandle,
        _device: DeviceHandle,
        profiling: bool,
    ) -> ClResult<QueueHandle> {
        let mut state = self.state.lock();
        state.calls.push(Call::CreateQueue { profiling });
        Self::check(&state, FailPoint::CreateQueue)?;
        if !state.contexts.contains(&context) {
            return Err(ClStatus::INVALID_CONTEXT);
        }
        let handle = QueueHandle(self.handle());
        state.queues.push(handle);
        Ok(handle)
    }

    fn create_program(&self, context: ContextHandle, source: &str) -> ClResult<ProgramHandle> {
        let mut state = self.state.lock();
        state.calls.push(Call::CreateProgram);
        Self::check(&state, FailPoint::CreateProgram)?;
        if !state.contexts.contains(&context) {
            return Err(ClStatus::INVALID_CONTEXT);
        }
        let handle = ProgramHandle(self.handle());
        state.programs.insert(handle, source.to_string());
        Ok(handle)
    }

    fn build_program(
        &self,
        program: ProgramHandle,
        _device: DeviceHandle,
        options: &str,
    ) -> ClResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::BuildProgram {
            options: options.to_string(),
        });
        Self::check(&state, FailPoint::BuildProgram)?;
        if !state.programs.contains_key(&program) {
            return Err(ClStatus::INVALID_PROGRAM);
        }
        Ok(())
    }

    fn build_log(&self, program: ProgramHandle, _device: DeviceHandle) -> ClResult<String> {
        let mut state = self.state.lock();
        state.calls.push(Call::BuildLog);
        if !state.programs.contains_key(&program) {
            return Err(ClStatus::INVALID_PROGRAM);
        }
        Ok(state.build_log.clone())
    }

    fn kernel_names(&self, program: ProgramHandle) -> ClResult<Vec<String>> {
        let mut state = self.state.lock();
        state.calls.push(Call::KernelNames);
        if !state.programs.contains_key(&program) {
            return Err(ClStatus::INVALID_PROGRAM);
        }
        Ok(state.kernel_names.clone())
    }

    fn create_kernel(&self, program: ProgramHandle, name: &str) -> ClResult<KernelHandle> {
        let mut state = self.state.lock();
        state.calls.push(Call::CreateKernel(name.to_string()));
        Self::check(&state, FailPoint::CreateKernel)?;
        if !state.programs.contains_key(&program) {
            return Err(ClStatus::INVALID_PROGRAM);
        }
        if !state.kernel_names.iter().any(|n| n == name) {
            return Err(ClStatus::INVALID_KERNEL_NAME);
        }
        let handle = KernelHandle(self.handle());
        state.kernels.insert(handle, (name.to_string(), Vec::new()));
        Ok(handle)
    }

    fn set_kernel_arg(&self, kernel: KernelHandle, index: u32, arg: &KernelArg) -> ClResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::SetArg(index, *arg));
        Self::check(&state, FailPoint::SetArg(index))?;
        if let KernelArg::Mem(Some(mem)) = arg {
            if !state.memory.buffers.contains_key(mem) {
                return Err(ClStatus::INVALID_MEM_OBJECT);
            }
        }
        let (_, args) = state
            .kernels
            .get_mut(&kernel)
            .ok_or(ClStatus::INVALID_KERNEL)?;
        let slot = index as usize;
        if args.len() <= slot {
            args.resize(slot + 1, None);
        }
        args[slot] = Some(*arg);
        Ok(())
    }

    fn create_buffer(
        &self,
        context: ContextHandle,
        access: MemAccess,
        host: &[u8],
    ) -> ClResult<MemHandle> {
        let mut state = self.state.lock();
        state.calls.push(Call::CreateBuffer {
            access,
            size: host.len(),
        });
        Self::check(&state, FailPoint::CreateBuffer)?;
        if !state.contexts.contains(&context) {
            return Err(ClStatus::INVALID_CONTEXT);
        }
        if host.is_empty() {
            return Err(ClStatus::INVALID_BUFFER_SIZE);
        }
        let handle = MemHandle(self.handle());
        state.memory.buffers.insert(handle, host.to_vec());
        Ok(handle)
    }

    fn enqueue_kernel(
        &self,
        queue: QueueHandle,
        kernel: KernelHandle,
        global: [usize; 2],
    ) -> ClResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::Enqueue { global });
        Self::check(&state, FailPoint::Enqueue)?;
        if !state.queues.contains(&queue) {
            return Err(ClStatus::INVALID_COMMAND_QUEUE);
        }
        let (name, args) = state
            .kernels
            .get(&kernel)
            .cloned()
            .ok_or(ClStatus::INVALID_KERNEL)?;
        if let Some(body) = state.host_kernels.get(&name).cloned() {
            let invocation = KernelInvocation {
                name: &name,
                args: &args,
                global,
            };
            body(&invocation, &mut state.memory);
        }
        Ok(())
    }

    fn read_buffer(&self, queue: QueueHandle, mem: MemHandle, dst: &mut [u8]) -> ClResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::ReadBuffer {
            mem,
            size: dst.len(),
        });
        Self::check(&state, FailPoint::ReadBuffer)?;
        if !state.queues.contains(&queue) {
            return Err(ClStatus::INVALID_COMMAND_QUEUE);
        }
        let data = state
            .memory
            .get(mem)
            .ok_or(ClStatus::INVALID_MEM_OBJECT)?;
        if data.len() < dst.len() {
            return Err(ClStatus::INVALID_VALUE);
        }
        dst.copy_from_slice(&data[..dst.len()]);
        Ok(())
    }

    fn release_mem(&self, mem: MemHandle) -> ClResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::ReleaseMem(mem));
        state
            .memory
            .buffers
            .remove(&mem)
            .map(|_| ())
            .ok_or(ClStatus::INVALID_MEM_OBJECT)
    }

    fn release_kernel(&self, kernel: KernelHandle) -> ClResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::ReleaseKernel(kernel));
        state
            .kernels
            .remove(&kernel)
            .map(|_| ())
            .ok_or(ClStatus::INVALID_KERNEL)
    }

    fn release_program(&self, program: ProgramHandle) -> ClResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::ReleaseProgram(program));
        state
            .programs
            .remove(&program)
            .map(|_| ())
            .ok_or(ClStatus::INVALID_PROGRAM)
    }

    fn release_queue(&self, queue: QueueHandle) -> ClResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::ReleaseQueue(queue));
        let before = state.queues.len();
        state.queues.retain(|q| *q != queue);
        if state.queues.len() == before {
            return Err(ClStatus::INVALID_COMMAND_QUEUE);
        }
        Ok(())
    }

    fn release_context(&self, context: ContextHandle) -> ClResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::ReleaseContext(context));
        let before = state.contexts.len();
        state.contexts.retain(|c| *c != context);
        if state.contexts.len() == before {
            return Err(ClStatus::INVALID_CONTEXT);
        }
        Ok(())
    }

    fn release_device(&self, device: DeviceHandle) -> ClResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::ReleaseDevice(device));
        if !state.devices.contains_key(&device) {
            return Err(ClStatus::INVALID_DEVICE);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_topology() {
        let driver = FakeDriver::new()
            .platform(FakePlatform::new("A", "One").with_device(DeviceClass::Cpu, "cpu0"))
            .platform(
                FakePlatform::new("B", "Two")
                    .with_device(DeviceClass::Gpu, "gpu0")
                    .with_device(DeviceClass::Gpu, "gpu1"),
            );
        let platforms = driver.platforms().unwrap();
        assert_eq!(platforms.len(), 2);
        assert_eq!(driver.platform_vendor(platforms[1]).unwrap(), "B");

        let gpus = driver.device_ids(platforms[1], DeviceClass::Gpu).unwrap();
        assert_eq!(gpus.len(), 2);
        assert_eq!(driver.device_name(gpus[1]).unwrap(), "gpu1");
        assert_eq!(
            driver.device_ids(platforms[0], DeviceClass::Gpu),
            Err(ClStatus::DEVICE_NOT_FOUND)
        );
    }

    #[test]
    fn buffers_round_trip_through_host_kernel() {
        let driver = FakeDriver::with_gpu(&[]).host_kernel("invert", |inv, mem| {
            let buf = inv.mem(0).unwrap();
            for b in mem.get_mut(buf).unwrap().iter_mut() {
                *b = !*b;
            }
        });
        let platform = driver.platforms().unwrap()[0];
        let device = driver.device_ids(platform, DeviceClass::Any).unwrap()[0];
        let ctx = driver.create_context(device).unwrap();
        let queue = driver.create_queue(ctx, device, false).unwrap();
        let program = driver.create_program(ctx, "src").unwrap();
        driver.build_program(program, device, "").unwrap();
        let kernel = driver.create_kernel(program, "invert").unwrap();
        let mem = driver
            .create_buffer(ctx, MemAccess::ReadWrite, &[0x0f, 0xf0])
            .unwrap();
        driver
            .set_kernel_arg(kernel, 0, &KernelArg::Mem(Some(mem)))
            .unwrap();
        driver.enqueue_kernel(queue, kernel, [1, 2]).unwrap();
        let mut out = [0u8; 2];
        driver.read_buffer(queue, mem, &mut out).unwrap();
        assert_eq!(out, [0xf0, 0x0f]);
        driver.release_mem(mem).unwrap();
        assert_eq!(driver.live_buffers(), 0);
        assert_eq!(driver.alloc_release_counts(), (1, 1));
    }

    #[test]
    fn injected_failure() {
        let driver = FakeDriver::with_gpu(&[]).fail_at(FailPoint::Platforms, ClStatus(-1001));
        assert_eq!(driver.platforms(), Err(ClStatus::PLATFORM_NOT_FOUND_KHR));
        driver.clear_failures();
        assert!(driver.platforms().is_ok());
    }
}
