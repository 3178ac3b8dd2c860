//! Decoded-frame buffer pool
//!
//! The decoder only reports the output resolution with its first result, so
//! this pool starts unconfigured and is sized lazily. Once configured it
//! behaves like [`BufferPool`] but grows by a fixed step instead of failing
//! when the receive path outruns the consumer.

use crate::buf_pool::{PoolCore, PoolError, PoolStats, PooledBuffer};
use crate::types::{aligned_frame_size, VideoParams, FRAME_POOL_EXPAND_STEP};
use parking_lot::Mutex;

/// A decoded frame checked out of the pool.
#[derive(Debug)]
pub struct FrameLease {
    pub buf: PooledBuffer,
    pub params: VideoParams,
    /// Stamped by the receive path after timestamp matching.
    pub timestamp: i64,
}

struct FrameCore {
    core: PoolCore,
    params: VideoParams,
}

/// Lazily sized pool of decoded-frame buffers.
pub struct FrameBufferPool {
    inner: Mutex<Option<FrameCore>>,
}

impl Default for FrameBufferPool {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBufferPool {
    /// Unconfigured pool; [`acquire`](Self::acquire) fails until
    /// [`configure`](Self::configure) is called with the first observed
    /// resolution.
    pub fn new() -> Self {
        FrameBufferPool {
            inner: Mutex::new(None),
        }
    }

    /// Size the pool for `params`, allocating `initial_count` buffers.
    ///
    /// Reconfiguring with a frame size that still fits the existing buffers
    /// keeps them; a larger size tears the pool down and reallocates. Any
    /// outstanding leases stay valid either way, they just cannot be
    /// recycled into a rebuilt pool.
    pub fn configure(&self, params: VideoParams, initial_count: usize) -> Result<(), PoolError> {
        let buf_size = aligned_frame_size(&params);
        let mut inner = self.inner.lock();

        if let Some(existing) = inner.as_mut() {
            if buf_size <= existing.core.buf_size() {
                log::info!(
                    "frame pool: {}x{} fits existing {} byte buffers, keeping pool",
                    params.width,
                    params.height,
                    existing.core.buf_size()
                );
                existing.params = params;
                return Ok(());
            }
            log::info!(
                "frame pool: {}x{} needs {} > {} bytes, reallocating",
                params.width,
                params.height,
                buf_size,
                existing.core.buf_size()
            );
        }

        let core = PoolCore::new("dec-frame", initial_count, buf_size)?;
        *inner = Some(FrameCore { core, params });
        Ok(())
    }

    /// Check out a frame buffer, growing the pool by
    /// [`FRAME_POOL_EXPAND_STEP`] when none are free.
    pub fn acquire(&self) -> Result<FrameLease, PoolError> {
        let mut inner = self.inner.lock();
        let frame = inner.as_mut().ok_or(PoolError::Unconfigured)?;

        let buf = match frame.core.get() {
            Ok(buf) => buf,
            Err(PoolError::Exhausted) => {
                let stats = frame.core.stats();
                log::info!(
                    "frame pool: expanding from {} to {} buffers",
                    stats.capacity,
                    stats.capacity + FRAME_POOL_EXPAND_STEP
                );
                frame.core.expand(FRAME_POOL_EXPAND_STEP)?;
                frame.core.get()?
            }
            Err(e) => return Err(e),
        };

        Ok(FrameLease {
            buf,
            params: frame.params,
            timestamp: 0,
        })
    }

    /// Return a frame buffer to the pool.
    pub fn release(&self, lease: FrameLease) {
        let mut inner = self.inner.lock();
        match inner.as_mut() {
            Some(frame) => frame.core.put_back(lease.buf),
            // Pool was torn down while the frame was out; the lease owns its
            // storage and frees it here.
            None => log::debug!("frame pool: released into torn-down pool, buffer freed"),
        }
    }

    /// Drop all buffers and return to the unconfigured state. Session close
    /// and teardown path.
    pub fn reset(&self) {
        *self.inner.lock() = None;
    }

    pub fn params(&self) -> Option<VideoParams> {
        self.inner.lock().as_ref().map(|f| f.params)
    }

    pub fn stats(&self) -> Option<PoolStats> {
        self.inner.lock().as_ref().map(|f| f.core.stats())
    }
}
