//! Kernel identification and argument passing.

use crate::gpu_traits::MemHandle;

/// Compositing operations backed by a device kernel.
///
/// Each variant names its entry point in the compiled program and the byte
/// size of one pixel it operates on.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CompositeOp {
    /// Alpha-darken blend of 8-bit RGBA pixels, with flow/opacity accumulation.
    AlphaDarken32,
    /// Porter-Duff source-over of 8-bit RGBA pixels.
    Over32,
}

impl CompositeOp {
    /// Every operation, in declaration order.
    pub const ALL: [CompositeOp; 2] = [CompositeOp::AlphaDarken32, CompositeOp::Over32];

    /// Returns the kernel function name in the compiled program.
    pub fn entry_point(&self) -> &'static str {
        match self {
            Self::AlphaDarken32 => "compositeAlphaDarken32",
            Self::Over32 => "compositeOver32",
        }
    }

    /// Bytes per pixel of the source and destination regions.
    pub fn pixel_size(&self) -> usize {
        match self {
            Self::AlphaDarken32 | Self::Over32 => 4,
        }
    }
}

/// Arguments passed to a kernel, bound by position.
#[derive(Clone, Debug, Default)]
pub struct KernelArgs {
    entries: Vec<KernelArg>,
}

/// A single kernel argument.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum KernelArg {
    /// Device memory object; `None` binds a null buffer.
    Mem(Option<MemHandle>),
    /// 32-bit signed integer.
    I32(i32),
    /// 32-bit unsigned integer.
    U32(u32),
    /// 32-bit float.
    F32(f32),
}

impl KernelArg {
    /// Byte size of the value as seen by the kernel.
    pub fn size_bytes(&self) -> usize {
        match self {
            // cl_mem is a pointer-sized handle
            Self::Mem(_) => std::mem::size_of::<usize>(),
            Self::I32(_) | Self::U32(_) | Self::F32(_) => 4,
        }
    }
}

impl KernelArgs {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn push_mem(mut self, mem: MemHandle) -> Self {
        self.entries.push(KernelArg::Mem(Some(mem)));
        self
    }

    /// Push an optional buffer; `None` binds a null memory object.
    pub fn push_opt_mem(mut self, mem: Option<MemHandle>) -> Self {
        self.entries.push(KernelArg::Mem(mem));
        self
    }

    pub fn push_i32(mut self, val: i32) -> Self {
        self.entries.push(KernelArg::I32(val));
        self
    }

    pub fn push_u32(mut self, val: u32) -> Self {
        self.entries.push(KernelArg::U32(val));
        self
    }

    pub fn push_f32(mut self, val: f32) -> Self {
        self.entries.push(KernelArg::F32(val));
        self
    }

    pub fn entries(&self) -> &[KernelArg] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
