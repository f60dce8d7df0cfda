//! Operation-level entry point over the tiled transfer engine.
//!
//! Every [`CompositeOp`] maps to one kernel entry point and one pixel size.
//! [`Compositor::composite`] resolves a fresh kernel for the op and hands the
//! call to [`dispatch_composite`]; there is no per-op code path.

use std::sync::Arc;

use tracing::{debug, warn};
use ts_common::{CompositeOp, CompositeParams};
use ts_gpu_hal::{dispatch_composite, ComputeContext, DispatchOutcome, SkipReason};

use crate::CompositorError;

/// Dispatches compositing operations through a shared compute context.
///
/// The compositor owns no device resources; kernels and buffers live for the
/// duration of one call.
#[derive(Debug, Clone)]
pub struct Compositor {
    ctx: Arc<ComputeContext>,
}

impl Compositor {
    pub fn new(ctx: Arc<ComputeContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<ComputeContext> {
        &self.ctx
    }

    /// True when the compute path can be used at all.
    pub fn is_available(&self) -> bool {
        self.ctx.available()
    }

    /// Operations whose kernel the compiled program declares.
    pub fn supported_ops(&self) -> Vec<CompositeOp> {
        if !self.ctx.available() {
            return Vec::new();
        }
        let names = self.ctx.kernel_names();
        CompositeOp::ALL
            .iter()
            .copied()
            .filter(|op| names.iter().any(|n| n == op.entry_point()))
            .collect()
    }

    /// Composite one tile with `op`.
    ///
    /// On anything but [`DispatchOutcome::Completed`] the destination is
    /// untouched and the caller runs its own fallback.
    pub fn composite(&self, op: CompositeOp, params: &mut CompositeParams<'_>) -> DispatchOutcome {
        debug!(
            op = op.entry_point(),
            rows = params.rows,
            cols = params.cols,
            masked = params.mask.is_some(),
            "Compositing tile"
        );
        dispatch_composite(&self.ctx, op.entry_point(), op.pixel_size(), params)
    }

    /// Validate `params`, then composite, reporting failures as errors.
    ///
    /// An empty tile succeeds without device work.
    pub fn try_composite(
        &self,
        op: CompositeOp,
        params: &mut CompositeParams<'_>,
    ) -> Result<(), CompositorError> {
        validate_params(op, params)?;
        match self.composite(op, params) {
            DispatchOutcome::Completed | DispatchOutcome::Skipped(SkipReason::EmptyTile) => Ok(()),
            DispatchOutcome::Skipped(SkipReason::Unavailable) => Err(CompositorError::Unavailable),
            DispatchOutcome::Skipped(SkipReason::KernelMissing) => {
                Err(CompositorError::KernelMissing(op.entry_point()))
            }
            DispatchOutcome::Failed(err) => Err(err.into()),
        }
    }
}

/// Check scalar ranges and stride layout before any device work.
pub fn validate_params(op: CompositeOp, params: &CompositeParams<'_>) -> Result<(), CompositorError> {
    for (name, value) in [
        ("opacity", params.opacity),
        ("last_opacity", params.last_opacity),
        ("flow", params.flow),
    ] {
        if !(0.0..=1.0).contains(&value) {
            warn!(op = op.entry_point(), param = name, value, "Rejected compositing parameter");
            return Err(CompositorError::OutOfRange { name, value });
        }
    }

    if params.is_empty() {
        return Ok(());
    }

    let row_bytes = params.cols.saturating_mul(op.pixel_size());
    let broadcast = params.dst_row_stride == 0 && (params.rows > 1 || params.cols > 1);
    if broadcast || (params.rows > 1 && params.dst_row_stride < row_bytes) {
        return Err(CompositorError::DestinationStride {
            stride: params.dst_row_stride,
            row_bytes,
        });
    }

    for (region, stride) in [
        ("src", params.src_row_stride),
        ("dst", params.dst_row_stride),
        ("mask", params.mask_row_stride),
    ] {
        if i32::try_from(stride).is_err() {
            return Err(CompositorError::StrideTooLarge { region, stride });
        }
    }
    Ok(())
}
