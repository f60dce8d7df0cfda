//! `ts-compositor` — pixel compositing over the Tessera compute layer.
//!
//! Each [`CompositeOp`] names a kernel entry point and a pixel size; the
//! [`Compositor`] dispatches any of them through the same tiled transfer
//! routine. A call that does not complete leaves the destination untouched so
//! the caller can composite on the host instead.
//!
//! [`CompositeOp`]: ts_common::CompositeOp

pub mod compositor;

mod error;

// Re-export primary API
pub use compositor::{validate_params, Compositor};
pub use error::CompositorError;
