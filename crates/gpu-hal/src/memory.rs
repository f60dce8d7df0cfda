//! Device memory management: RAII wrapper around driver memory objects.

use std::sync::Arc;

use tracing::{debug, warn};

use ts_common::{ClDriver, ContextHandle, MemAccess, MemHandle, QueueHandle};

use crate::error::TransferError;

/// A device buffer seeded from host memory.
///
/// Released through the driver when dropped, on every exit path.
pub struct DeviceBuffer {
    driver: Arc<dyn ClDriver>,
    mem: MemHandle,
    /// Size in bytes.
    size: usize,
    access: MemAccess,
}

impl DeviceBuffer {
    /// Allocate a buffer of `host.len()` bytes initialized with `host`.
    pub fn from_host(
        driver: &Arc<dyn ClDriver>,
        context: ContextHandle,
        access: MemAccess,
        host: &[u8],
    ) -> Result<Self, TransferError> {
        let size = host.len();
        let mem = driver
            .create_buffer(context, access, host)
            .map_err(|status| TransferError::AllocFailed { size, status })?;

        debug!(size, ?access, "Allocated device buffer");
        Ok(Self {
            driver: Arc::clone(driver),
            mem,
            size,
            access,
        })
    }

    pub fn handle(&self) -> MemHandle {
        self.mem
    }

    /// Get the size of this buffer in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn access(&self) -> MemAccess {
        self.access
    }

    /// Blocking read of the first `dst.len()` bytes of this buffer.
    pub fn read_into(&self, queue: QueueHandle, dst: &mut [u8]) -> Result<(), TransferError> {
        let size = dst.len();
        if size > self.size {
            return Err(TransferError::RegionOutOfBounds {
                region: "read-back",
                required: size,
                available: self.size,
            });
        }
        self.driver
            .read_buffer(queue, self.mem, dst)
            .map_err(|status| TransferError::ReadBack { size, status })
    }
}

impl std::fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("mem", &self.mem)
            .field("size", &self.size)
            .field("access", &self.access)
            .finish()
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        if let Err(status) = self.driver.release_mem(self.mem) {
            warn!(size = self.size, error = %status, "clReleaseMemObject failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FailPoint, FakeDriver};
    use ts_common::{ClStatus, DeviceClass};

    fn setup() -> (Arc<FakeDriver>, ContextHandle, QueueHandle) {
        let driver = Arc::new(FakeDriver::with_gpu(&[]));
        let platform = driver.platforms().unwrap()[0];
        let device = driver.device_ids(platform, DeviceClass::Any).unwrap()[0];
        let ctx = driver.create_context(device).unwrap();
        let queue = driver.create_queue(ctx, device, false).unwrap();
        (driver, ctx, queue)
    }

    #[test]
    fn released_on_drop() {
        let (fake, ctx, queue) = setup();
        let driver: Arc<dyn ClDriver> = fake.clone();
        {
            let buf = DeviceBuffer::from_host(&driver, ctx, MemAccess::ReadWrite, &[1, 2, 3, 4])
                .unwrap();
            assert_eq!(buf.size(), 4);
            let mut out = [0u8; 2];
            buf.read_into(queue, &mut out).unwrap();
            assert_eq!(out, [1, 2]);
            assert_eq!(fake.live_buffers(), 1);
        }
        assert_eq!(fake.live_buffers(), 0);
        assert_eq!(fake.alloc_release_counts(), (1, 1));
    }

    #[test]
    fn oversized_read_rejected() {
        let (fake, ctx, queue) = setup();
        let driver: Arc<dyn ClDriver> = fake;
        let buf = DeviceBuffer::from_host(&driver, ctx, MemAccess::ReadOnly, &[0; 4]).unwrap();
        let mut out = [0u8; 8];
        assert!(matches!(
            buf.read_into(queue, &mut out),
            Err(TransferError::RegionOutOfBounds { required: 8, .. })
        ));
    }

    #[test]
    fn allocation_failure_reports_size() {
        let (fake, ctx, _) = setup();
        fake.inject(FailPoint::CreateBuffer, ClStatus::MEM_OBJECT_ALLOCATION_FAILURE);
        let driver: Arc<dyn ClDriver> = fake.clone();
        let err = DeviceBuffer::from_host(&driver, ctx, MemAccess::ReadOnly, &[0; 16]).unwrap_err();
        assert_eq!(
            err,
            TransferError::AllocFailed {
                size: 16,
                status: ClStatus::MEM_OBJECT_ALLOCATION_FAILURE
            }
        );
        assert_eq!(fake.live_buffers(), 0);
    }
}
