//! Per-session context
//!
//! All state that was once global in firmware-facing C libraries lives here
//! explicitly, so any number of sessions can run side by side. One context
//! belongs to one session and is shared by at most its send and receive
//! threads; each concern carries its own lock and the critical sections are
//! short.

use crate::error::SessionError;
use crate::run_state::{reinit_path, ReinitPath, RunState};
use crate::transport::DeviceControl;
use parking_lot::Mutex;
use vtx_runtime::{poll_until, MAX_POLL_ATTEMPTS, POLL_INTERVAL};
use vtx_video::{
    scan_cleanup, FrameBufferPool, FrameLease, HwFrameSurface, HwFrameTracker, NodePool,
    StreamFormat, TimestampQueue, VideoParams, FRAME_OFFSET_DIFF_THRESHOLD,
    FRAME_POOL_INITIAL_COUNT, MAX_HW_FRAME_SLOTS, MAX_QUEUE_ENTRIES, NODE_POOL_SIZE_PER_SESSION,
};

/// Construction-time session limits; none are renegotiated at runtime.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub stream_format: StreamFormat,
    pub node_pool_size: usize,
    pub queue_capacity: usize,
    pub frame_pool_initial: usize,
    pub offset_match_threshold: u64,
    pub hw_frame_slots: usize,
}

impl SessionConfig {
    pub fn new(stream_format: StreamFormat) -> Self {
        SessionConfig {
            stream_format,
            node_pool_size: NODE_POOL_SIZE_PER_SESSION,
            queue_capacity: MAX_QUEUE_ENTRIES,
            frame_pool_initial: FRAME_POOL_INITIAL_COUNT,
            offset_match_threshold: FRAME_OFFSET_DIFF_THRESHOLD,
            hw_frame_slots: MAX_HW_FRAME_SLOTS,
        }
    }
}

struct SendState {
    state: RunState,
    trace: Vec<RunState>,
    params: VideoParams,
    pending_params: Option<VideoParams>,
    sent_offset: u64,
}

impl SendState {
    fn set_state(&mut self, next: RunState) {
        if next != self.state {
            log::info!("session state {:?} -> {:?}", self.state, next);
            self.state = next;
            self.trace.push(next);
        }
    }
}

struct TimestampState {
    pool: NodePool,
    pts: TimestampQueue,
    dts: TimestampQueue,
    last_dts: Option<i64>,
    last_dts_interval: i64,
    pic_reorder_delay: u32,
}

/// State for one encode or decode session.
pub struct SessionContext {
    session_id: u32,
    config: SessionConfig,
    send: Mutex<SendState>,
    ts: Mutex<TimestampState>,
    frame_pool: FrameBufferPool,
    hw_tracker: HwFrameTracker,
}

impl SessionContext {
    pub fn new(config: SessionConfig, params: VideoParams) -> Self {
        SessionContext {
            session_id: rand::random(),
            config,
            send: Mutex::new(SendState {
                state: RunState::Normal,
                trace: vec![RunState::Normal],
                params,
                pending_params: None,
                sent_offset: 0,
            }),
            ts: Mutex::new(TimestampState {
                pool: NodePool::new(config.node_pool_size),
                pts: TimestampQueue::with_capacity("pts", config.queue_capacity),
                dts: TimestampQueue::with_capacity("dts", config.queue_capacity),
                last_dts: None,
                last_dts_interval: 0,
                pic_reorder_delay: 0,
            }),
            frame_pool: FrameBufferPool::new(),
            hw_tracker: HwFrameTracker::new(config.hw_frame_slots),
        }
    }

    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    pub fn run_state(&self) -> RunState {
        self.send.lock().state
    }

    /// Every state entered so far, oldest first.
    pub fn state_trace(&self) -> Vec<RunState> {
        self.send.lock().trace.clone()
    }

    pub fn current_params(&self) -> VideoParams {
        self.send.lock().params
    }

    pub fn sent_offset(&self) -> u64 {
        self.send.lock().sent_offset
    }

    /// Accept a frame for sending: gate on the run state, detect sequence
    /// changes, register its timestamps, and assign its byte offset.
    ///
    /// Returns the offset the caller must submit the payload at. A
    /// [`SessionError::SequenceChange`] result means the frame was *not*
    /// accepted and the caller must send end-of-stream and drain; the same
    /// frame is resubmitted after [`complete_sequence_change`].
    ///
    /// [`complete_sequence_change`]: Self::complete_sequence_change
    pub fn submit(
        &self,
        params: &VideoParams,
        payload_len: u64,
        pts: i64,
        dts: i64,
    ) -> Result<u64, SessionError> {
        let mut send = self.send.lock();
        match send.state {
            RunState::Normal | RunState::SeqChangeOpening => {}
            state => return Err(SessionError::NotAccepting(state)),
        }

        if *params != send.params {
            log::info!(
                "sequence change: {}x{} {:?} -> {}x{} {:?}",
                send.params.width,
                send.params.height,
                send.params.pixel_format,
                params.width,
                params.height,
                params.pixel_format
            );
            send.pending_params = Some(*params);
            send.set_state(RunState::SeqChangeDraining);
            return Err(SessionError::SequenceChange);
        }

        if send.state == RunState::SeqChangeOpening {
            // First frame of the new sequence.
            send.set_state(RunState::Normal);
        }

        let offset = send.sent_offset;
        self.register_timestamps(offset, pts, dts)?;
        send.sent_offset += payload_len;
        Ok(offset)
    }

    /// Register (offset, pts) and (offset, dts) together. A full queue
    /// triggers one stale-entry cleanup pass over both queues before the
    /// push is retried; the queues never end up half-registered.
    fn register_timestamps(&self, offset: u64, pts: i64, dts: i64) -> Result<(), SessionError> {
        let mut guard = self.ts.lock();
        let ts = &mut *guard;

        if ts.pts.push(&mut ts.pool, offset, pts).is_err() {
            scan_cleanup(&mut ts.pts, &mut ts.dts, &mut ts.pool);
            ts.pts
                .push(&mut ts.pool, offset, pts)
                .map_err(|_| SessionError::QueueFull)?;
        }
        if ts.dts.push(&mut ts.pool, offset, dts).is_err() {
            scan_cleanup(&mut ts.pts, &mut ts.dts, &mut ts.pool);
            if ts.dts.push(&mut ts.pool, offset, dts).is_err() {
                // Keep the queues aligned: take back the PTS entry.
                let _ = ts.pts.pop(&mut ts.pool, offset, 0);
                return Err(SessionError::QueueFull);
            }
        }
        Ok(())
    }

    /// Look up the DTS for a frame the device reported at `frame_offset`.
    ///
    /// Entries skipped on the way to the match belong to packets that never
    /// produced output and are evicted. On a miss the DTS is extrapolated
    /// from the previous one and the reorder-padding counter bumped;
    /// `None` only before any DTS has been seen.
    pub fn match_dts(&self, frame_offset: u64) -> Option<i64> {
        let mut guard = self.ts.lock();
        let ts = &mut *guard;

        match ts
            .dts
            .pop_evicting(&mut ts.pool, frame_offset, self.config.offset_match_threshold)
        {
            Ok(dts) => {
                if let Some(last) = ts.last_dts {
                    if dts > last {
                        ts.last_dts_interval = dts - last;
                    }
                }
                ts.last_dts = Some(dts);
                Some(dts)
            }
            Err(_) => {
                let last = ts.last_dts?;
                ts.pic_reorder_delay += 1;
                let padded = last + ts.last_dts_interval;
                ts.last_dts = Some(padded);
                log::warn!(
                    "no DTS within {} of offset {}, padding with {}",
                    self.config.offset_match_threshold,
                    frame_offset,
                    padded
                );
                Some(padded)
            }
        }
    }

    /// Look up the PTS for a frame the device reported at `frame_offset`.
    ///
    /// Unlike the DTS path this does not evict skipped entries - a frame
    /// delivered out of display order still needs them later. `None` on a
    /// miss; the caller estimates from the frame rate.
    pub fn match_pts(&self, frame_offset: u64) -> Option<i64> {
        let mut guard = self.ts.lock();
        let ts = &mut *guard;
        ts.pts
            .pop(&mut ts.pool, frame_offset, self.config.offset_match_threshold)
            .ok()
    }

    /// Frames the receive path padded a DTS for, in lieu of a real match.
    pub fn reorder_padding_count(&self) -> u32 {
        self.ts.lock().pic_reorder_delay
    }

    /// Block (bounded) until the device reports the post-EOS flush done.
    pub fn await_drained(&self, ctrl: &mut dyn DeviceControl) -> Result<(), SessionError> {
        let outcome = poll_until(MAX_POLL_ATTEMPTS, POLL_INTERVAL, || {
            match ctrl.flush_status() {
                Ok(true) => Some(Ok(())),
                Ok(false) => None,
                Err(e) => Some(Err(e)),
            }
        });
        match outcome {
            Some(Ok(())) => Ok(()),
            Some(Err(e)) => Err(e.into()),
            None => Err(SessionError::DrainPending),
        }
    }

    /// Finish a sequence change once the drain has round-tripped: flush the
    /// timestamp queues, bring the device to the pending parameters, and
    /// enter the opening state.
    ///
    /// A reinit failure is fatal for the session and is not retried.
    pub fn complete_sequence_change(
        &self,
        ctrl: &mut dyn DeviceControl,
    ) -> Result<ReinitPath, SessionError> {
        let mut send = self.send.lock();
        if send.state != RunState::SeqChangeDraining {
            return Err(SessionError::NotAccepting(send.state));
        }
        if !ctrl.flush_status()? {
            return Err(SessionError::DrainPending);
        }
        let incoming = send
            .pending_params
            .take()
            .ok_or_else(|| SessionError::Fatal("draining without pending parameters".into()))?;

        // Old-stream offsets must never match against the new stream.
        {
            let mut guard = self.ts.lock();
            let ts = &mut *guard;
            ts.pts.clear(&mut ts.pool);
            ts.dts.clear(&mut ts.pool);
            ts.last_dts = None;
            ts.last_dts_interval = 0;
        }

        let path = reinit_path(&send.params, &incoming, self.config.stream_format);
        let result = match path {
            ReinitPath::CloseReopen => ctrl.close().and_then(|_| ctrl.open(&incoming)),
            ReinitPath::Reconfigure => ctrl.reconfigure(&incoming),
        };
        if let Err(e) = result {
            return Err(SessionError::Fatal(format!(
                "sequence change reinit failed: {e}"
            )));
        }

        send.params = incoming;
        send.set_state(RunState::SeqChangeOpening);
        Ok(path)
    }

    /// Enter hardware recovery; frames are rejected until
    /// [`end_reset`](Self::end_reset).
    pub fn begin_reset(&self) {
        self.send.lock().set_state(RunState::Resetting);
    }

    pub fn end_reset(&self) {
        self.send.lock().set_state(RunState::Normal);
    }

    /// Size the decoded-frame pool once the output resolution is known.
    pub fn configure_frame_pool(&self, params: VideoParams) -> Result<(), SessionError> {
        self.frame_pool
            .configure(params, self.config.frame_pool_initial)?;
        Ok(())
    }

    pub fn acquire_frame(&self) -> Result<FrameLease, SessionError> {
        Ok(self.frame_pool.acquire()?)
    }

    pub fn release_frame(&self, lease: FrameLease) {
        self.frame_pool.release(lease);
    }

    /// Record a device-resident frame handed to another thread.
    pub fn track_hw_frame(&self, surface: HwFrameSurface) {
        self.hw_tracker.track(surface);
    }

    /// Recycle the device frame at `index` if it is still tracked.
    /// Returns whether a recycle command was actually issued.
    pub fn recycle_hw_frame(
        &self,
        ctrl: &mut dyn DeviceControl,
        index: u16,
    ) -> Result<bool, SessionError> {
        match self.hw_tracker.take(index) {
            Some(surface) => {
                ctrl.recycle_frame(&surface)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn tracked_hw_frames(&self) -> usize {
        self.hw_tracker.occupied()
    }

    /// Tear the session down: sweep every still-tracked device frame,
    /// flush the timestamp queues, drop the frame pool, close the device.
    ///
    /// Sweep failures are logged and do not stop the teardown.
    pub fn close(&self, ctrl: &mut dyn DeviceControl) -> Result<(), SessionError> {
        let swept = self.hw_tracker.drain();
        let count = swept.len();
        for surface in swept {
            if let Err(e) = ctrl.recycle_frame(&surface) {
                log::warn!(
                    "shutdown sweep: recycle of hw frame {} failed: {}",
                    surface.frame_index,
                    e
                );
            }
        }
        if count > 0 {
            log::info!("shutdown sweep: recycled {} hw frames", count);
        }

        {
            let mut guard = self.ts.lock();
            let ts = &mut *guard;
            ts.pts.clear(&mut ts.pool);
            ts.dts.clear(&mut ts.pool);
        }
        self.frame_pool.reset();

        ctrl.close()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vtx_video::PixelFormat;

    #[derive(Default)]
    struct MockControl {
        calls: Vec<&'static str>,
        flushed: bool,
        fail_open: bool,
        recycled: Vec<u16>,
    }

    impl DeviceControl for MockControl {
        fn open(&mut self, _params: &VideoParams) -> Result<(), crate::TransportError> {
            self.calls.push("open");
            if self.fail_open {
                Err(crate::TransportError::DeviceStatus(-12))
            } else {
                Ok(())
            }
        }

        fn close(&mut self) -> Result<(), crate::TransportError> {
            self.calls.push("close");
            Ok(())
        }

        fn reconfigure(&mut self, _params: &VideoParams) -> Result<(), crate::TransportError> {
            self.calls.push("reconfigure");
            Ok(())
        }

        fn recycle_frame(&mut self, surface: &HwFrameSurface) -> Result<(), crate::TransportError> {
            self.calls.push("recycle");
            self.recycled.push(surface.frame_index);
            Ok(())
        }

        fn flush_status(&mut self) -> Result<bool, crate::TransportError> {
            Ok(self.flushed)
        }
    }

    fn hd() -> VideoParams {
        VideoParams::new(1280, 720, PixelFormat::Nv12)
    }

    fn session() -> SessionContext {
        SessionContext::new(SessionConfig::new(StreamFormat::H265), hd())
    }

    #[test]
    fn test_submit_assigns_monotonic_offsets() {
        let ctx = session();
        let a = ctx.submit(&hd(), 1500, 100, 90).unwrap();
        let b = ctx.submit(&hd(), 800, 133, 123).unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 1500);
        assert_eq!(ctx.sent_offset(), 2300);
    }

    #[test]
    fn test_timestamps_round_trip_through_device_offsets() {
        let ctx = session();
        let offset = ctx.submit(&hd(), 1500, 100, 90).unwrap();
        assert_eq!(ctx.match_dts(offset), Some(90));
        assert_eq!(ctx.match_pts(offset), Some(100));
    }

    #[test]
    fn test_dts_miss_pads_from_interval() {
        let ctx = session();
        let a = ctx.submit(&hd(), 1000, 0, 0).unwrap();
        let b = ctx.submit(&hd(), 1000, 33, 33).unwrap();
        assert_eq!(ctx.match_dts(a), Some(0));
        assert_eq!(ctx.match_dts(b), Some(33));

        // Far beyond any registered offset: padded, not None.
        assert_eq!(ctx.match_dts(50_000), Some(66));
        assert_eq!(ctx.reorder_padding_count(), 1);
    }

    #[test]
    fn test_pts_miss_is_reported_not_padded() {
        let ctx = session();
        ctx.submit(&hd(), 1000, 100, 90).unwrap();
        assert_eq!(ctx.match_pts(50_000), None);
        // The entry is still there for the real frame.
        assert_eq!(ctx.match_pts(0), Some(100));
    }

    #[test]
    fn test_sequence_change_grow_takes_reopen_path() {
        let ctx = session();
        ctx.submit(&hd(), 1000, 0, 0).unwrap();

        let bigger = VideoParams::new(1920, 1080, PixelFormat::Nv12);
        assert!(matches!(
            ctx.submit(&bigger, 1000, 33, 33),
            Err(SessionError::SequenceChange)
        ));
        assert_eq!(ctx.run_state(), RunState::SeqChangeDraining);

        // Frames are rejected while draining.
        assert!(matches!(
            ctx.submit(&bigger, 1000, 66, 66),
            Err(SessionError::NotAccepting(_))
        ));

        let mut ctrl = MockControl::default();
        assert!(matches!(
            ctx.complete_sequence_change(&mut ctrl),
            Err(SessionError::DrainPending)
        ));

        ctrl.flushed = true;
        let path = ctx.complete_sequence_change(&mut ctrl).unwrap();
        assert_eq!(path, ReinitPath::CloseReopen);
        assert_eq!(ctrl.calls, vec!["close", "open"]);
        assert_eq!(ctx.run_state(), RunState::SeqChangeOpening);

        // The first frame of the new sequence returns the state to normal.
        ctx.submit(&bigger, 1000, 66, 66).unwrap();
        assert_eq!(ctx.run_state(), RunState::Normal);
        assert_eq!(
            ctx.state_trace(),
            vec![
                RunState::Normal,
                RunState::SeqChangeDraining,
                RunState::SeqChangeOpening,
                RunState::Normal,
            ]
        );
    }

    #[test]
    fn test_sequence_change_shrink_takes_reconfigure_path() {
        let ctx = session();
        let smaller = VideoParams::new(640, 360, PixelFormat::Nv12);
        assert!(ctx.submit(&smaller, 1000, 0, 0).is_err());

        let mut ctrl = MockControl {
            flushed: true,
            ..Default::default()
        };
        let path = ctx.complete_sequence_change(&mut ctrl).unwrap();
        assert_eq!(path, ReinitPath::Reconfigure);
        assert_eq!(ctrl.calls, vec!["reconfigure"]);
    }

    #[test]
    fn test_sequence_change_flushes_old_offsets() {
        let ctx = session();
        let offset = ctx.submit(&hd(), 1000, 100, 90).unwrap();

        let smaller = VideoParams::new(640, 360, PixelFormat::Nv12);
        let _ = ctx.submit(&smaller, 1000, 133, 123);
        let mut ctrl = MockControl {
            flushed: true,
            ..Default::default()
        };
        ctx.complete_sequence_change(&mut ctrl).unwrap();

        // Old-stream entries are gone.
        assert_eq!(ctx.match_pts(offset), None);
    }

    #[test]
    fn test_failed_reinit_is_fatal() {
        let ctx = session();
        let bigger = VideoParams::new(1920, 1080, PixelFormat::Nv12);
        let _ = ctx.submit(&bigger, 1000, 0, 0);

        let mut ctrl = MockControl {
            flushed: true,
            fail_open: true,
            ..Default::default()
        };
        assert!(matches!(
            ctx.complete_sequence_change(&mut ctrl),
            Err(SessionError::Fatal(_))
        ));
    }

    #[test]
    fn test_reset_gates_submission() {
        let ctx = session();
        ctx.begin_reset();
        assert!(matches!(
            ctx.submit(&hd(), 100, 0, 0),
            Err(SessionError::NotAccepting(RunState::Resetting))
        ));
        ctx.end_reset();
        ctx.submit(&hd(), 100, 0, 0).unwrap();
    }

    #[test]
    fn test_hw_recycle_idempotent_through_device() {
        let ctx = session();
        let mut ctrl = MockControl::default();

        ctx.track_hw_frame(HwFrameSurface::new(7, 1, 1280, 720, 8));
        assert!(ctx.recycle_hw_frame(&mut ctrl, 7).unwrap());
        assert!(!ctx.recycle_hw_frame(&mut ctrl, 7).unwrap());
        assert_eq!(ctrl.recycled, vec![7]);
    }

    #[test]
    fn test_close_sweeps_tracked_frames() {
        let ctx = session();
        let mut ctrl = MockControl::default();

        for i in [2u16, 5, 9] {
            ctx.track_hw_frame(HwFrameSurface::new(i, 1, 1280, 720, 8));
        }
        ctx.close(&mut ctrl).unwrap();

        let mut recycled = ctrl.recycled.clone();
        recycled.sort_unstable();
        assert_eq!(recycled, vec![2, 5, 9]);
        assert_eq!(*ctrl.calls.last().unwrap(), "close");
        assert_eq!(ctx.tracked_hw_frames(), 0);
    }

    #[test]
    fn test_await_drained_polls_flush() {
        let ctx = session();
        let mut ctrl = MockControl {
            flushed: true,
            ..Default::default()
        };
        ctx.await_drained(&mut ctrl).unwrap();
    }

    #[test]
    fn test_frame_pool_plumbing() {
        let ctx = session();
        assert!(ctx.acquire_frame().is_err());

        ctx.configure_frame_pool(hd()).unwrap();
        let mut frame = ctx.acquire_frame().unwrap();
        frame.timestamp = 42;
        ctx.release_frame(frame);
    }
}
