//! Compute context management: owns the device, context, queue and the
//! compiled compositing program, and resolves kernels by name.

use std::borrow::Cow;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use ts_common::{
    ClDriver, ClStatus, ComputeConfig, ComputeError, ComputeResult, ContextHandle, DeviceHandle,
    PlatformHandle, ProgramHandle, QueueHandle,
};

use crate::args::Kernel;
use crate::{device, diagnostics, kernels, platform};

/// Where the program source text comes from.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ProgramSource {
    /// Read `program_name` from disk, under `program_src_root` when set.
    #[default]
    Resource,
    /// The copy of `program_name` compiled into this crate.
    Embedded,
    /// Caller-provided source text.
    Text(String),
}

/// The process-wide compute context.
///
/// Construction never fails: any missing piece leaves the context
/// unavailable, and [`kernel_by_name`](Self::kernel_by_name) refuses to hand
/// out kernels. Every handle acquired before a failure is still released
/// exactly once on drop.
pub struct ComputeContext {
    driver: Arc<dyn ClDriver>,
    available: bool,
    /// Backend-managed, never released.
    platform: Option<PlatformHandle>,
    device: Option<DeviceHandle>,
    context: Option<ContextHandle>,
    queue: Option<QueueHandle>,
    program: Option<ProgramHandle>,
    build_log: Option<String>,
}

impl ComputeContext {
    /// Bring up the compute context, loading the program from its resource.
    pub fn new(driver: Arc<dyn ClDriver>, config: &ComputeConfig) -> Self {
        Self::with_source(driver, config, ProgramSource::Resource)
    }

    /// Bring up the compute context with an explicit program source.
    pub fn with_source(
        driver: Arc<dyn ClDriver>,
        config: &ComputeConfig,
        source: ProgramSource,
    ) -> Self {
        let mut ctx = Self::unavailable(driver);
        match ctx.init(config, &source) {
            Ok(()) => {
                ctx.available = true;
                info!(
                    device = %ctx.device_name().unwrap_or_default(),
                    profiling = config.profiling,
                    program = %config.program_name,
                    "Compute context initialized"
                );
            }
            Err(ComputeError::Build { status, log }) => {
                error!(
                    error = %status,
                    "{} build failed:\n{}",
                    config.program_name,
                    log
                );
            }
            Err(err) if err.is_unavailability() => {
                debug!(reason = %err, "Compute context unavailable");
            }
            Err(err) => {
                error!(error = %err, "Compute context initialization failed");
            }
        }
        ctx
    }

    /// A context that holds no resources and never becomes available.
    pub fn unavailable(driver: Arc<dyn ClDriver>) -> Self {
        Self {
            driver,
            available: false,
            platform: None,
            device: None,
            context: None,
            queue: None,
            program: None,
            build_log: None,
        }
    }

    /// Run the acquisition chain, storing each handle as soon as it exists.
    fn init(&mut self, config: &ComputeConfig, source: &ProgramSource) -> ComputeResult<()> {
        if !config.enabled {
            return Err(ComputeError::Disabled);
        }
        let driver = Arc::clone(&self.driver);

        let platform = platform::default_platform(driver.as_ref(), config).ok_or_else(|| {
            ComputeError::NoPlatform {
                vendor: config.platform_vendor.clone(),
                name: config.platform_name.clone(),
            }
        })?;
        self.platform = Some(platform);

        let device = device::default_device(driver.as_ref(), platform, config.device_class)
            .ok_or(ComputeError::NoDevice {
                class: config.device_class.as_str(),
            })?;
        self.device = Some(device);

        let context = driver
            .create_context(device)
            .map_err(|s| ComputeError::driver("clCreateContext", s))?;
        self.context = Some(context);

        let queue = driver
            .create_queue(context, device, config.profiling)
            .map_err(|s| ComputeError::driver("clCreateCommandQueue", s))?;
        self.queue = Some(queue);

        let text = load_program_source(config, source)?;
        let program = driver
            .create_program(context, &text)
            .map_err(|s| ComputeError::driver("clCreateProgramWithSource", s))?;

        let options = config.assembled_build_options();
        debug!(program = %config.program_name, %options, "Building compute program");
        let built = driver.build_program(program, device, &options);
        let log = match driver.build_log(program, device) {
            Ok(log) => log,
            Err(status) => {
                release_or_warn("clReleaseProgram", driver.release_program(program));
                return Err(ComputeError::driver("clGetProgramBuildInfo", status));
            }
        };
        if let Err(status) = built {
            release_or_warn("clReleaseProgram", driver.release_program(program));
            self.build_log = Some(log.clone());
            return Err(ComputeError::Build { status, log });
        }
        self.build_log = Some(log);
        self.program = Some(program);
        Ok(())
    }

    /// True once the full chain succeeded, including the program build.
    pub fn available(&self) -> bool {
        self.available
    }

    pub fn driver(&self) -> &Arc<dyn ClDriver> {
        &self.driver
    }

    pub fn platform(&self) -> Option<PlatformHandle> {
        self.platform
    }

    pub fn device(&self) -> Option<DeviceHandle> {
        self.device
    }

    /// The device context. Gate use behind [`available`](Self::available).
    pub fn context(&self) -> Option<ContextHandle> {
        self.context
    }

    /// The command queue. Gate use behind [`available`](Self::available).
    pub fn default_queue(&self) -> Option<QueueHandle> {
        self.queue
    }

    pub fn program(&self) -> Option<ProgramHandle> {
        self.program
    }

    /// Log of the last program build, successful or not.
    pub fn build_log(&self) -> Option<&str> {
        self.build_log.as_deref()
    }

    pub fn device_name(&self) -> Option<String> {
        self.device.and_then(|d| self.driver.device_name(d).ok())
    }

    /// Entry points of the compiled program; empty when unavailable.
    pub fn kernel_names(&self) -> Vec<String> {
        self.program
            .and_then(|p| self.driver.kernel_names(p).ok())
            .unwrap_or_default()
    }

    /// Create a fresh kernel for `name` from the compiled program.
    ///
    /// Returns `None` when the context is unavailable or the kernel cannot be
    /// created. An unknown name also logs every kernel the program contains.
    pub fn kernel_by_name(&self, name: &str) -> Option<Kernel> {
        if !self.available {
            debug!(kernel = name, "Kernel requested from unavailable compute context");
            return None;
        }
        let program = self.program?;

        match self.driver.create_kernel(program, name) {
            Ok(handle) => Some(Kernel::new(Arc::clone(&self.driver), handle, name)),
            Err(status) => {
                error!(kernel = name, error = %status, "clCreateKernel failed");
                if status == ClStatus::INVALID_KERNEL_NAME {
                    error!(kernel = name, "Cannot find kernel, candidates are:");
                    diagnostics::print_kernel_names(self.driver.as_ref(), program);
                }
                None
            }
        }
    }
}

impl std::fmt::Debug for ComputeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeContext")
            .field("available", &self.available)
            .field("platform", &self.platform)
            .field("device", &self.device)
            .field("context", &self.context)
            .field("queue", &self.queue)
            .field("program", &self.program)
            .finish()
    }
}

impl Drop for ComputeContext {
    fn drop(&mut self) {
        // Release order: program, queue, context, device.
        if let Some(program) = self.program.take() {
            release_or_warn("clReleaseProgram", self.driver.release_program(program));
        }
        if let Some(queue) = self.queue.take() {
            release_or_warn("clReleaseCommandQueue", self.driver.release_queue(queue));
        }
        if let Some(context) = self.context.take() {
            release_or_warn("clReleaseContext", self.driver.release_context(context));
        }
        if let Some(device) = self.device.take() {
            release_or_warn("clReleaseDevice", self.driver.release_device(device));
        }
        if self.available {
            debug!("Compute context released");
        }
    }
}

fn release_or_warn(op: &'static str, result: Result<(), ClStatus>) {
    if let Err(status) = result {
        warn!(op, error = %status, "Release failed");
    }
}

/// Load the program text; a missing or empty source is an error.
fn load_program_source<'a>(
    config: &ComputeConfig,
    source: &'a ProgramSource,
) -> ComputeResult<Cow<'a, str>> {
    let text: Option<Cow<'a, str>> = match source {
        ProgramSource::Resource => read_source_file(&config.program_path()).map(Cow::Owned),
        ProgramSource::Embedded => kernels::embedded_source(&config.program_name).map(Cow::Borrowed),
        ProgramSource::Text(text) => Some(Cow::Borrowed(text.as_str())),
    };
    text.filter(|t| !t.is_empty())
        .ok_or_else(|| ComputeError::ProgramSource {
            path: match source {
                ProgramSource::Resource => config.program_path().display().to_string(),
                ProgramSource::Embedded => format!("<embedded>/{}", config.program_name),
                ProgramSource::Text(_) => "<inline>".to_string(),
            },
        })
}

fn read_source_file(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(text) => Some(text),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Cannot read program source");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{Call, FailPoint, FakeDriver};

    fn text_source() -> ProgramSource {
        ProgramSource::Text("kernel void k() {}".into())
    }

    #[test]
    fn disabled_makes_no_driver_calls() {
        let fake = Arc::new(FakeDriver::with_gpu(&["k"]));
        let ctx = ComputeContext::with_source(fake.clone(), &ComputeConfig::default(), text_source());
        assert!(!ctx.available());
        assert_eq!(ctx.context(), None);
        assert_eq!(ctx.default_queue(), None);
        assert_eq!(ctx.program(), None);
        assert!(ctx.kernel_by_name("k").is_none());
        drop(ctx);
        assert!(fake.calls().is_empty());
    }

    #[test]
    fn successful_chain() {
        let fake = Arc::new(FakeDriver::with_gpu(&["k"]).build_log_text("ok"));
        let ctx = ComputeContext::with_source(fake.clone(), &ComputeConfig::enabled(), text_source());
        assert!(ctx.available());
        assert!(ctx.context().is_some());
        assert!(ctx.default_queue().is_some());
        assert_eq!(ctx.build_log(), Some("ok"));
        assert_eq!(ctx.kernel_names(), vec!["k"]);
        assert_eq!(ctx.device_name().as_deref(), Some("Fake GPU"));
    }

    #[test]
    fn profiling_flag_reaches_queue() {
        let fake = Arc::new(FakeDriver::with_gpu(&["k"]));
        let config = ComputeConfig {
            profiling: true,
            ..ComputeConfig::enabled()
        };
        let _ctx = ComputeContext::with_source(fake.clone(), &config, text_source());
        assert_eq!(fake.count(|c| *c == Call::CreateQueue { profiling: true }), 1);
    }

    #[test]
    fn queue_failure_keeps_context_for_teardown() {
        let fake = Arc::new(
            FakeDriver::with_gpu(&["k"]).fail_at(FailPoint::CreateQueue, ClStatus::OUT_OF_RESOURCES),
        );
        let ctx = ComputeContext::with_source(fake.clone(), &ComputeConfig::enabled(), text_source());
        assert!(!ctx.available());
        assert!(ctx.context().is_some());
        assert_eq!(ctx.default_queue(), None);
        drop(ctx);
        assert_eq!(fake.count(|c| matches!(c, Call::ReleaseContext(_))), 1);
        assert_eq!(fake.count(|c| matches!(c, Call::ReleaseQueue(_))), 0);
        assert_eq!(fake.count(|c| matches!(c, Call::ReleaseDevice(_))), 1);
    }

    #[test]
    fn empty_source_is_unavailable() {
        let fake = Arc::new(FakeDriver::with_gpu(&["k"]));
        let ctx = ComputeContext::with_source(
            fake.clone(),
            &ComputeConfig::enabled(),
            ProgramSource::Text(String::new()),
        );
        assert!(!ctx.available());
        assert_eq!(fake.count(|c| *c == Call::CreateProgram), 0);
    }

    #[test]
    fn embedded_source_builds() {
        let fake = Arc::new(FakeDriver::with_gpu(&["compositeAlphaDarken32"]));
        let ctx =
            ComputeContext::with_source(fake, &ComputeConfig::enabled(), ProgramSource::Embedded);
        assert!(ctx.available());
    }

    #[test]
    fn build_failure_releases_program_and_keeps_log() {
        let fake = Arc::new(
            FakeDriver::with_gpu(&["k"])
                .build_log_text("error: expected ';'")
                .fail_at(FailPoint::BuildProgram, ClStatus::BUILD_PROGRAM_FAILURE),
        );
        let ctx = ComputeContext::with_source(fake.clone(), &ComputeConfig::enabled(), text_source());
        assert!(!ctx.available());
        assert_eq!(ctx.program(), None);
        assert_eq!(ctx.build_log(), Some("error: expected ';'"));
        assert_eq!(fake.count(|c| matches!(c, Call::ReleaseProgram(_))), 1);
        drop(ctx);
        // Not released a second time at teardown.
        assert_eq!(fake.count(|c| matches!(c, Call::ReleaseProgram(_))), 1);
    }

    #[test]
    fn unknown_kernel_lists_candidates() {
        let fake = Arc::new(FakeDriver::with_gpu(&["a", "b"]));
        let ctx = ComputeContext::with_source(fake.clone(), &ComputeConfig::enabled(), text_source());
        assert!(ctx.kernel_by_name("missing").is_none());
        assert_eq!(fake.count(|c| *c == Call::KernelNames), 1);
    }

    #[test]
    fn other_kernel_errors_skip_listing() {
        let fake = Arc::new(FakeDriver::with_gpu(&["a"]));
        let ctx = ComputeContext::with_source(fake.clone(), &ComputeConfig::enabled(), text_source());
        fake.inject(FailPoint::CreateKernel, ClStatus::OUT_OF_HOST_MEMORY);
        assert!(ctx.kernel_by_name("a").is_none());
        assert_eq!(fake.count(|c| *c == Call::KernelNames), 0);
    }

    #[test]
    fn kernels_are_fresh_and_released() {
        let fake = Arc::new(FakeDriver::with_gpu(&["a"]));
        let ctx = ComputeContext::with_source(fake.clone(), &ComputeConfig::enabled(), text_source());
        let k1 = ctx.kernel_by_name("a").unwrap();
        let k2 = ctx.kernel_by_name("a").unwrap();
        assert_ne!(k1.handle(), k2.handle());
        assert_eq!(fake.live_kernels(), 2);
        drop(k1);
        drop(k2);
        assert_eq!(fake.live_kernels(), 0);
    }
}
