//! Tiled buffer transfer engine.
//!
//! Runs one compositing call end to end: sizes the three strided operands,
//! copies them to scoped device buffers, binds the kernel, enqueues it over a
//! `(rows, cols)` index space and reads the destination back synchronously.
//!
//! ```text
//!        row_stride
//!   |<--------------------->|
//!   +-----+-------+---------+
//!   |     |xxxxxxx|yyyyyyyyy|   x: tile elements (cols per row)
//!   |yyyyy|xxxxxxx|yyyyyyyyy|   y: bytes between tile rows
//!   |yyyyy|xxxxxxx|         |
//!   +-----+-------+---------+
//! ```
//!
//! Only the span from the first `x` to the last `x` is transferred:
//! `element_size * cols + row_stride * (rows - 1)` bytes.

use std::sync::Arc;

use tracing::{debug, error, warn};

use ts_common::{ClDriver, CompositeParams, ContextHandle, KernelArgs, MemAccess, RegionDesc};

use crate::args::Kernel;
use crate::context::ComputeContext;
use crate::error::TransferError;
use crate::memory::DeviceBuffer;

/// Why a compositing call did no device work.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// The compute context never became available.
    Unavailable,
    /// The kernel could not be created from the program.
    KernelMissing,
    /// The tile has no rows or no columns.
    EmptyTile,
}

/// Result of one compositing call.
///
/// Anything but [`Completed`](Self::Completed) means the destination is
/// untouched and the caller must run its fallback path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    Completed,
    Skipped(SkipReason),
    Failed(TransferError),
}

impl DispatchOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Byte footprints of the three operands of one call.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TransferSizes {
    pub src: usize,
    pub dst: usize,
    pub mask: Option<usize>,
}

impl TransferSizes {
    /// Footprints of every operand, or the first region whose footprint
    /// overflows.
    pub fn of(params: &CompositeParams<'_>, pixel_size: usize) -> Result<Self, TransferError> {
        let mask = match params.mask_region() {
            Some(region) => Some(footprint("mask", &region)?),
            None => None,
        };
        Ok(Self {
            src: footprint("src", &params.src_region(pixel_size))?,
            dst: footprint("dst", &params.dst_region(pixel_size))?,
            mask,
        })
    }

    /// Check every host slice covers its footprint and the destination is
    /// not broadcast over more than one pixel.
    pub fn check(&self, params: &CompositeParams<'_>) -> Result<(), TransferError> {
        if params.dst_row_stride == 0 && (params.rows > 1 || params.cols > 1) {
            return Err(TransferError::BroadcastDestination {
                rows: params.rows,
                cols: params.cols,
            });
        }
        check_len("src", self.src, params.src.len())?;
        check_len("dst", self.dst, params.dst.len())?;
        if let (Some(required), Some(mask)) = (self.mask, params.mask) {
            check_len("mask", required, mask.len())?;
        }
        Ok(())
    }
}

fn footprint(region: &'static str, desc: &RegionDesc) -> Result<usize, TransferError> {
    desc.transfer_size().ok_or(TransferError::SizeOverflow { region })
}

fn check_len(region: &'static str, required: usize, available: usize) -> Result<(), TransferError> {
    if required > available {
        return Err(TransferError::RegionOutOfBounds {
            region,
            required,
            available,
        });
    }
    Ok(())
}

fn stride_arg(stride: usize) -> Result<i32, TransferError> {
    i32::try_from(stride).map_err(|_| TransferError::StrideOverflow { stride })
}

/// Device copies of the operands of one call, released on drop.
#[derive(Debug)]
pub struct CompositeBuffers {
    pub src: DeviceBuffer,
    pub dst: DeviceBuffer,
    /// Absent when the call has no mask; bound as a null buffer.
    pub mask: Option<DeviceBuffer>,
    pub sizes: TransferSizes,
}

impl CompositeBuffers {
    /// Validate footprints and copy every operand to the device.
    ///
    /// Source and mask are read-only; the destination is read-write and
    /// seeded with its current content.
    pub fn allocate(
        driver: &Arc<dyn ClDriver>,
        context: ContextHandle,
        params: &CompositeParams<'_>,
        pixel_size: usize,
    ) -> Result<Self, TransferError> {
        let sizes = TransferSizes::of(params, pixel_size)?;
        sizes.check(params)?;

        let src = DeviceBuffer::from_host(driver, context, MemAccess::ReadOnly, &params.src[..sizes.src])?;
        let dst =
            DeviceBuffer::from_host(driver, context, MemAccess::ReadWrite, &params.dst[..sizes.dst])?;
        let mask = match (params.mask, sizes.mask) {
            (Some(mask), Some(size)) => Some(DeviceBuffer::from_host(
                driver,
                context,
                MemAccess::ReadOnly,
                &mask[..size],
            )?),
            _ => None,
        };

        Ok(Self {
            src,
            dst,
            mask,
            sizes,
        })
    }

    /// Kernel arguments in binding order: the three buffers, the three row
    /// strides, opacity, last opacity and flow.
    pub fn kernel_args(&self, params: &CompositeParams<'_>) -> Result<KernelArgs, TransferError> {
        Ok(KernelArgs::new()
            .push_mem(self.src.handle())
            .push_mem(self.dst.handle())
            .push_opt_mem(self.mask.as_ref().map(DeviceBuffer::handle))
            .push_i32(stride_arg(params.src_row_stride)?)
            .push_i32(stride_arg(params.dst_row_stride)?)
            .push_i32(stride_arg(params.mask_row_stride)?)
            .push_f32(params.opacity)
            .push_f32(params.last_opacity)
            .push_f32(params.flow))
    }
}

/// Run one compositing call with a freshly created kernel.
///
/// Never returns an error: an unavailable context, an unknown kernel or an
/// empty tile skip the call, and device failures are logged and reported as
/// [`DispatchOutcome::Failed`]. Blocks until the destination is updated.
pub fn dispatch_composite(
    ctx: &ComputeContext,
    kernel_name: &str,
    pixel_size: usize,
    params: &mut CompositeParams<'_>,
) -> DispatchOutcome {
    if !ctx.available() {
        return DispatchOutcome::Skipped(SkipReason::Unavailable);
    }
    if params.is_empty() {
        debug!(kernel = kernel_name, "Empty tile, nothing to composite");
        return DispatchOutcome::Skipped(SkipReason::EmptyTile);
    }
    let Some(kernel) = ctx.kernel_by_name(kernel_name) else {
        return DispatchOutcome::Skipped(SkipReason::KernelMissing);
    };

    match composite_with_kernel(ctx, &kernel, pixel_size, params) {
        Ok(()) => DispatchOutcome::Completed,
        Err(err) => {
            match &err {
                TransferError::ArgBind(bind) => error!(
                    kernel = kernel_name,
                    index = bind.index,
                    error = %bind.status,
                    "Failed to set kernel argument"
                ),
                TransferError::AllocFailed { size, status } => warn!(
                    kernel = kernel_name,
                    size,
                    error = %status,
                    "Failed to allocate device memory"
                ),
                other => error!(kernel = kernel_name, error = %other, "Compositing dispatch failed"),
            }
            DispatchOutcome::Failed(err)
        }
    }
}

/// Run one compositing call with a caller-owned kernel.
///
/// The kernel's arguments are rebound from scratch; callers sharing a
/// kernel across threads must serialize calls themselves.
pub fn composite_with_kernel(
    ctx: &ComputeContext,
    kernel: &Kernel,
    pixel_size: usize,
    params: &mut CompositeParams<'_>,
) -> Result<(), TransferError> {
    let (Some(context), Some(queue)) = (ctx.context(), ctx.default_queue()) else {
        return Err(TransferError::ContextUnavailable);
    };
    let driver = ctx.driver();

    let buffers = CompositeBuffers::allocate(driver, context, params, pixel_size)?;
    kernel.set_args(&buffers.kernel_args(params)?)?;

    let global = [params.rows, params.cols];
    driver
        .enqueue_kernel(queue, kernel.handle(), global)
        .map_err(TransferError::Enqueue)?;

    let dst_size = buffers.sizes.dst;
    buffers.dst.read_into(queue, &mut params.dst[..dst_size])?;

    debug!(
        kernel = kernel.name(),
        rows = params.rows,
        cols = params.cols,
        src_bytes = buffers.sizes.src,
        dst_bytes = dst_size,
        mask_bytes = buffers.sizes.mask.unwrap_or(0),
        "Composite dispatched"
    );
    Ok(())
}
