//! Kernel objects and positional argument binding.

use std::sync::Arc;

use tracing::{debug, warn};

use ts_common::{ClDriver, ClStatus, KernelArgs, KernelHandle};

use crate::error::ArgBindError;

/// Bind `args` to `kernel` by position, stopping at the first failure.
///
/// Binding is not transactional: arguments before the failing index stay
/// bound, and the kernel must be fully rebound before its next use.
pub fn set_kernel_args(
    driver: &dyn ClDriver,
    kernel: KernelHandle,
    args: &KernelArgs,
) -> Result<(), ArgBindError> {
    for (index, arg) in args.entries().iter().enumerate() {
        driver
            .set_kernel_arg(kernel, index as u32, arg)
            .map_err(|status| ArgBindError { index, status })?;
    }
    Ok(())
}

/// Flatten a bind result into `(failed_index, status)`, with `-1` and
/// `CL_SUCCESS` when every argument was bound.
pub fn bind_report(result: &Result<(), ArgBindError>) -> (i64, ClStatus) {
    match result {
        Ok(()) => (-1, ClStatus::SUCCESS),
        Err(e) => (e.index as i64, e.status),
    }
}

/// A kernel created from a built program, released on drop.
///
/// Kernels carry argument state, so each logical operation creates its own
/// and never shares it across threads while binding.
pub struct Kernel {
    driver: Arc<dyn ClDriver>,
    handle: KernelHandle,
    name: String,
}

impl Kernel {
    pub(crate) fn new(driver: Arc<dyn ClDriver>, handle: KernelHandle, name: &str) -> Self {
        debug!(kernel = name, handle = handle.raw(), "Created kernel");
        Self {
            driver,
            handle,
            name: name.to_string(),
        }
    }

    pub fn handle(&self) -> KernelHandle {
        self.handle
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bind every argument of the next invocation.
    pub fn set_args(&self, args: &KernelArgs) -> Result<(), ArgBindError> {
        set_kernel_args(self.driver.as_ref(), self.handle, args)
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("name", &self.name)
            .field("handle", &self.handle)
            .finish()
    }
}

impl Drop for Kernel {
    fn drop(&mut self) {
        if let Err(status) = self.driver.release_kernel(self.handle) {
            warn!(kernel = %self.name, error = %status, "clReleaseKernel failed");
        }
    }
}
