//! Session run states and the sequence-change decision
//!
//! A mid-stream change of resolution, pixel format or bit depth cannot be
//! applied while frames are in flight: the session drains first, then
//! either reopens from scratch or reconfigures in place, depending on what
//! the firmware can absorb without reallocating its frame stores.

use vtx_video::{StreamFormat, VideoParams};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Steady state; frames are accepted.
    Normal,
    /// Sequence change seen; flushing, no new frames accepted.
    SeqChangeDraining,
    /// Device reinitialized for the new parameters; waiting for the first
    /// frame of the new sequence.
    SeqChangeOpening,
    /// Hardware recovery in progress.
    Resetting,
}

/// How the device is brought to the new parameters after draining.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReinitPath {
    /// Full close and reopen. Required whenever the device would need
    /// larger frame stores or a different surface layout.
    CloseReopen,
    /// In-place reconfigure, keeping the session. Fast path.
    Reconfigure,
}

/// Decide the reinit path for a drained sequence change.
///
/// Growing either dimension, changing the pixel format (which includes any
/// bit-depth change), or a still-image codec all force a close+reopen;
/// only shrinking with an unchanged pixel format can be absorbed in place.
pub fn reinit_path(
    current: &VideoParams,
    incoming: &VideoParams,
    format: StreamFormat,
) -> ReinitPath {
    if format.is_still_image() {
        return ReinitPath::CloseReopen;
    }
    if incoming.pixel_format != current.pixel_format {
        return ReinitPath::CloseReopen;
    }
    if incoming.width > current.width || incoming.height > current.height {
        return ReinitPath::CloseReopen;
    }
    ReinitPath::Reconfigure
}

#[cfg(test)]
mod tests {
    use super::*;
    use vtx_video::PixelFormat;

    fn params(w: u32, h: u32, fmt: PixelFormat) -> VideoParams {
        VideoParams::new(w, h, fmt)
    }

    #[test]
    fn test_growing_resolution_reopens() {
        let path = reinit_path(
            &params(1280, 720, PixelFormat::Nv12),
            &params(1920, 1080, PixelFormat::Nv12),
            StreamFormat::H265,
        );
        assert_eq!(path, ReinitPath::CloseReopen);
    }

    #[test]
    fn test_shrinking_same_format_reconfigures() {
        let path = reinit_path(
            &params(1920, 1080, PixelFormat::Nv12),
            &params(1280, 720, PixelFormat::Nv12),
            StreamFormat::H265,
        );
        assert_eq!(path, ReinitPath::Reconfigure);
    }

    #[test]
    fn test_pixel_format_change_reopens() {
        // Shrinking, but the bit depth changes with the format.
        let path = reinit_path(
            &params(1920, 1080, PixelFormat::Nv12),
            &params(1280, 720, PixelFormat::P010),
            StreamFormat::H265,
        );
        assert_eq!(path, ReinitPath::CloseReopen);
    }

    #[test]
    fn test_still_image_always_reopens() {
        let path = reinit_path(
            &params(1920, 1080, PixelFormat::Nv12),
            &params(640, 480, PixelFormat::Nv12),
            StreamFormat::Jpeg,
        );
        assert_eq!(path, ReinitPath::CloseReopen);
    }

    #[test]
    fn test_one_dimension_growing_reopens() {
        let path = reinit_path(
            &params(1920, 1080, PixelFormat::Nv12),
            &params(1280, 1440, PixelFormat::Nv12),
            StreamFormat::H264,
        );
        assert_eq!(path, ReinitPath::CloseReopen);
    }
}
