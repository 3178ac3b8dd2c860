//! Device-resident frame tracking
//!
//! Frames that stay in device memory are only ever handles on the host
//! side: a slot index plus enough metadata to issue the recycle command.
//! Whenever such a handle is passed to a stage whose cleanup runs on a
//! different thread, it is recorded here so *any* thread can recycle it,
//! including the forced sweep at shutdown. Taking a handle out of the table
//! transfers ownership; an empty slot means the frame was already recycled.

use bytemuck::{Pod, Zeroable};
use parking_lot::Mutex;

/// Handle to a frame resident in device memory.
///
/// The host never owns the pixel data, only this descriptor. Layout is
/// fixed because the same bytes travel in the frame metadata the firmware
/// returns.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct HwFrameSurface {
    /// Device frame-slot index; 0 means "no frame".
    pub frame_index: u16,
    pub session_id: u16,
    pub bit_depth: u16,
    pub _reserved: u16,
    pub width: u32,
    pub height: u32,
    pub device_handle: i32,
    pub dma_buf_fd: i32,
}

impl HwFrameSurface {
    pub fn new(frame_index: u16, session_id: u16, width: u32, height: u32, bit_depth: u16) -> Self {
        HwFrameSurface {
            frame_index,
            session_id,
            bit_depth,
            _reserved: 0,
            width,
            height,
            device_handle: -1,
            dma_buf_fd: -1,
        }
    }
}

/// Side table of in-flight device frames pending recycle, indexed by frame
/// slot.
///
/// The device does not reuse a slot index until the host recycles it;
/// taking the handle out of the table under the lock gives each slot a
/// single owner on the host side as well.
pub struct HwFrameTracker {
    slots: Mutex<Vec<Option<HwFrameSurface>>>,
}

impl HwFrameTracker {
    /// Table with one slot per possible device frame index.
    pub fn new(slot_count: usize) -> Self {
        HwFrameTracker {
            slots: Mutex::new((0..slot_count).map(|_| None).collect()),
        }
    }

    /// Record `surface` as pending recycle at its own slot index.
    ///
    /// Index 0 is the firmware's "no frame" marker and is ignored. An
    /// occupied slot is overwritten: the device has already reused the
    /// index, so the previous handle is dead.
    pub fn track(&self, surface: HwFrameSurface) {
        let index = surface.frame_index as usize;
        if index == 0 {
            log::debug!("hw tracker: ignoring empty surface handle");
            return;
        }
        let mut slots = self.slots.lock();
        if index >= slots.len() {
            log::error!(
                "hw tracker: frame index {} out of range ({} slots)",
                index,
                slots.len()
            );
            return;
        }
        if slots[index].is_some() {
            log::warn!("hw tracker: slot {} re-tracked before recycle", index);
        }
        slots[index] = Some(surface);
    }

    /// Take ownership of the handle at `index` so the caller can issue the
    /// device recycle call. `None` when the slot is empty, which makes a
    /// second recycle of the same slot a no-op.
    pub fn take(&self, index: u16) -> Option<HwFrameSurface> {
        let mut slots = self.slots.lock();
        slots.get_mut(index as usize).and_then(Option::take)
    }

    /// Take every still-tracked handle: the shutdown sweep that keeps an
    /// aborted session from leaking device memory.
    pub fn drain(&self) -> Vec<HwFrameSurface> {
        let mut slots = self.slots.lock();
        slots.iter_mut().filter_map(Option::take).collect()
    }

    /// Number of slots currently holding a live handle.
    pub fn occupied(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface(index: u16) -> HwFrameSurface {
        HwFrameSurface::new(index, 1, 1920, 1080, 8)
    }

    #[test]
    fn test_track_take_idempotent() {
        let tracker = HwFrameTracker::new(16);
        tracker.track(surface(5));
        assert_eq!(tracker.occupied(), 1);

        let taken = tracker.take(5).unwrap();
        assert_eq!(taken.frame_index, 5);
        // Second recycle of the same slot is a no-op.
        assert!(tracker.take(5).is_none());
        assert_eq!(tracker.occupied(), 0);
    }

    #[test]
    fn test_zero_index_ignored() {
        let tracker = HwFrameTracker::new(16);
        tracker.track(surface(0));
        assert_eq!(tracker.occupied(), 0);
    }

    #[test]
    fn test_out_of_range_ignored() {
        let tracker = HwFrameTracker::new(4);
        tracker.track(surface(9));
        assert_eq!(tracker.occupied(), 0);
        assert!(tracker.take(9).is_none());
    }

    #[test]
    fn test_retrack_replaces_handle() {
        let tracker = HwFrameTracker::new(8);
        let mut first = surface(3);
        first.session_id = 1;
        let mut second = surface(3);
        second.session_id = 2;

        tracker.track(first);
        tracker.track(second);
        assert_eq!(tracker.take(3).unwrap().session_id, 2);
    }

    #[test]
    fn test_drain_sweeps_everything() {
        let tracker = HwFrameTracker::new(32);
        for i in [1u16, 7, 20] {
            tracker.track(surface(i));
        }
        let mut swept = tracker.drain();
        swept.sort_by_key(|s| s.frame_index);
        assert_eq!(
            swept.iter().map(|s| s.frame_index).collect::<Vec<_>>(),
            vec![1, 7, 20]
        );
        assert_eq!(tracker.occupied(), 0);
        assert!(tracker.drain().is_empty());
    }

    #[test]
    fn test_surface_is_pod() {
        let s = surface(2);
        let bytes: &[u8] = bytemuck::bytes_of(&s);
        assert_eq!(bytes.len(), std::mem::size_of::<HwFrameSurface>());
        let back: HwFrameSurface = bytemuck::pod_read_unaligned(bytes);
        assert_eq!(back, s);
    }
}
