//! Strided 2-D tile regions and the per-call compositing parameter block.

/// One strided 2-D view into a host image buffer.
///
/// `row_stride` is the byte distance between the starts of consecutive rows
/// and may exceed `cols * element_size` when the tile is a sub-rectangle of a
/// wider image. A zero stride marks a broadcast region: a single element
/// logically replicated over the whole tile.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RegionDesc {
    /// Bytes per element (pixel size, or 1 for a mask).
    pub element_size: usize,
    pub cols: usize,
    pub rows: usize,
    pub row_stride: usize,
}

impl RegionDesc {
    pub fn new(element_size: usize, cols: usize, rows: usize, row_stride: usize) -> Self {
        Self {
            element_size,
            cols,
            rows,
            row_stride,
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.row_stride == 0
    }

    /// Minimal number of bytes, starting at the tile origin, that covers
    /// every element of the region.
    ///
    /// `element_size * cols + row_stride * (rows - 1)`; a broadcast region
    /// collapses to one element and an empty tile covers nothing. `None` when
    /// the footprint does not fit in `usize`.
    pub fn transfer_size(&self) -> Option<usize> {
        if self.is_broadcast() {
            return Some(self.element_size);
        }
        if self.rows == 0 || self.cols == 0 {
            return Some(0);
        }
        let last_row = self.element_size.checked_mul(self.cols)?;
        self.row_stride
            .checked_mul(self.rows - 1)?
            .checked_add(last_row)
    }
}

/// Operands and scalars for one compositing call.
///
/// All slices start at the tile origin. `dst` is read-modify-write.
#[derive(Debug)]
pub struct CompositeParams<'a> {
    pub src: &'a [u8],
    pub src_row_stride: usize,
    pub dst: &'a mut [u8],
    pub dst_row_stride: usize,
    /// Optional 8-bit coverage mask.
    pub mask: Option<&'a [u8]>,
    pub mask_row_stride: usize,
    pub rows: usize,
    pub cols: usize,
    /// Stroke opacity in `[0, 1]`.
    pub opacity: f32,
    /// Opacity applied by the previous dab of the same stroke.
    pub last_opacity: f32,
    /// Per-dab flow in `[0, 1]`.
    pub flow: f32,
}

impl<'a> CompositeParams<'a> {
    /// Contiguous source and destination tiles of `pixel_size`-byte pixels,
    /// no mask, full opacity and flow.
    pub fn contiguous(
        src: &'a [u8],
        dst: &'a mut [u8],
        rows: usize,
        cols: usize,
        pixel_size: usize,
    ) -> Self {
        let stride = cols * pixel_size;
        Self {
            src,
            src_row_stride: stride,
            dst,
            dst_row_stride: stride,
            mask: None,
            mask_row_stride: 0,
            rows,
            cols,
            opacity: 1.0,
            last_opacity: 1.0,
            flow: 1.0,
        }
    }

    pub fn with_mask(mut self, mask: &'a [u8], row_stride: usize) -> Self {
        self.mask = Some(mask);
        self.mask_row_stride = row_stride;
        self
    }

    pub fn with_opacity(mut self, opacity: f32, last_opacity: f32, flow: f32) -> Self {
        self.opacity = opacity;
        self.last_opacity = last_opacity;
        self.flow = flow;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0 || self.cols == 0
    }

    pub fn src_region(&self, pixel_size: usize) -> RegionDesc {
        RegionDesc::new(pixel_size, self.cols, self.rows, self.src_row_stride)
    }

    pub fn dst_region(&self, pixel_size: usize) -> RegionDesc {
        RegionDesc::new(pixel_size, self.cols, self.rows, self.dst_row_stride)
    }

    /// The mask region, one byte per element, when a mask is supplied.
    pub fn mask_region(&self) -> Option<RegionDesc> {
        self.mask
            .map(|_| RegionDesc::new(1, self.cols, self.rows, self.mask_row_stride))
    }
}
