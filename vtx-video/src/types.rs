//! Video stream types and device sizing constants

/// Byte-offset distance within which a decoder output frame is considered to
/// match a submitted packet when looking up timestamps.
pub const FRAME_OFFSET_DIFF_THRESHOLD: u64 = 100;

/// Upper bound on entries in a single timestamp queue.
pub const MAX_QUEUE_ENTRIES: usize = 6000;

/// Initial timestamp-node arena size allocated per session.
pub const NODE_POOL_SIZE_PER_SESSION: usize = 300;

/// Increment by which the node arena grows when it runs dry.
pub const NODE_POOL_EXPAND_STEP: usize = 200;

/// Increment by which the decoded-frame pool grows when it runs dry.
pub const FRAME_POOL_EXPAND_STEP: usize = 20;

/// Number of decoded-frame buffers allocated once the resolution is known.
pub const FRAME_POOL_INITIAL_COUNT: usize = 20;

/// One slot per possible device-resident frame index.
pub const MAX_HW_FRAME_SLOTS: usize = 5363;

/// Device DMA requires page-multiple transfer sizes.
pub const MEM_PAGE_ALIGNMENT: usize = 4096;

/// Fixed metadata header the firmware appends to every decoded frame.
pub const FW_META_DATA_SIZE: usize = 64;

/// Worst-case SEI payload carried alongside a decoded frame.
pub const MAX_SEI_DATA_SIZE: usize = 7680;

/// Pixel format of frames crossing the host/device boundary
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Yuv420Planar = 0,   // Planar YUV 4:2:0, 8-bit
    Nv12 = 1,           // Semi-planar YUV 4:2:0, 8-bit
    Yuv420Planar10 = 2, // Planar YUV 4:2:0, 10-bit
    P010 = 3,           // Semi-planar YUV 4:2:0, 10-bit
    Rgba = 4,           // Packed RGBA
    Bgra = 5,           // Packed BGRA
    Bgr0 = 6,           // Packed BGR, alpha ignored
}

impl PixelFormat {
    /// Returns number of planes for this format
    pub fn plane_count(self) -> usize {
        match self {
            PixelFormat::Yuv420Planar | PixelFormat::Yuv420Planar10 => 3,
            PixelFormat::Nv12 | PixelFormat::P010 => 2,
            PixelFormat::Rgba | PixelFormat::Bgra | PixelFormat::Bgr0 => 1,
        }
    }

    pub fn bit_depth(self) -> u32 {
        match self {
            PixelFormat::Yuv420Planar10 | PixelFormat::P010 => 10,
            _ => 8,
        }
    }

    /// Bytes per sample component: 1 for 8-bit, 2 for 10-bit formats.
    pub fn bit_depth_factor(self) -> usize {
        if self.bit_depth() > 8 {
            2
        } else {
            1
        }
    }

    pub fn is_semi_planar(self) -> bool {
        matches!(self, PixelFormat::Nv12 | PixelFormat::P010)
    }

    pub fn is_rgb(self) -> bool {
        matches!(
            self,
            PixelFormat::Rgba | PixelFormat::Bgra | PixelFormat::Bgr0
        )
    }
}

/// Compressed stream format handled by the device
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFormat {
    H264 = 0,
    H265 = 1,
    Av1 = 2,
    Jpeg = 3,
}

impl StreamFormat {
    /// Still-image codecs have no inter-frame state and must be fully
    /// reopened on any configuration change.
    pub fn is_still_image(self) -> bool {
        matches!(self, StreamFormat::Jpeg)
    }
}

/// Per-stream video configuration; a change in any field mid-stream is a
/// sequence change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoParams {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
}

impl VideoParams {
    pub fn new(width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        Self {
            width,
            height,
            pixel_format,
        }
    }

    pub fn pixel_area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn bit_depth(&self) -> u32 {
        self.pixel_format.bit_depth()
    }
}

fn align_up(value: usize, align: usize) -> usize {
    value.div_ceil(align) * align
}

/// Size of one decoded-frame buffer for the given configuration.
///
/// The device writes the luma plane with a 128-byte stride (scaled down by
/// the bit-depth factor so 10-bit frames keep byte alignment), chroma at
/// half resolution under the same rule, then a firmware metadata header and
/// worst-case SEI trailer. The total is rounded to a page multiple with
/// three extra pages of slack for late metadata retrieval.
pub fn aligned_frame_size(params: &VideoParams) -> usize {
    let factor = params.pixel_format.bit_depth_factor();
    let width = params.width as usize;
    let height = params.height as usize;

    let luma_stride = align_up(width * factor, 128) / factor;
    let luma_size = luma_stride * height * factor;

    let chroma_stride = align_up(width / 2 * factor, 128) / factor;
    let chroma_size = chroma_stride * (height / 2) * factor;

    let raw = luma_size + chroma_size * 2 + FW_META_DATA_SIZE + MAX_SEI_DATA_SIZE;
    align_up(raw, MEM_PAGE_ALIGNMENT) + MEM_PAGE_ALIGNMENT * 3
}
