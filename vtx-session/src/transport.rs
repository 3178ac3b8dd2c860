//! Device transport traits
//!
//! The block-device transport and its command encoding live outside this
//! crate; sessions see blocking read/write calls returning byte counts, and
//! a small control surface for session lifecycle and frame recycling.

use thiserror::Error;
use vtx_video::{HwFrameSurface, VideoParams};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("device I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The device completed the command with a failure status.
    #[error("device rejected command, status {0}")]
    DeviceStatus(i32),

    /// Transient backpressure; retry with a bounded sleep.
    #[error("device busy, retry later")]
    Busy,
}

/// Selects the data lane of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    /// Compressed bitstream packets.
    Bitstream,
    /// Raw frame data.
    Frame,
    /// Session configuration blocks.
    Config,
}

/// Blocking data path to the device.
pub trait DeviceTransport: Send {
    /// Write `buf` downstream; returns the byte count accepted.
    fn write(&mut self, kind: TransferKind, buf: &[u8]) -> Result<usize, TransportError>;

    /// Read the next result into `buf`; returns the byte count produced.
    fn read(&mut self, kind: TransferKind, buf: &mut [u8]) -> Result<usize, TransportError>;
}

/// Session lifecycle and recycle commands.
pub trait DeviceControl: Send {
    fn open(&mut self, params: &VideoParams) -> Result<(), TransportError>;

    fn close(&mut self) -> Result<(), TransportError>;

    /// In-place parameter update without tearing the session down. Only
    /// valid for changes the firmware can absorb; see
    /// [`reinit_path`](crate::run_state::reinit_path).
    fn reconfigure(&mut self, params: &VideoParams) -> Result<(), TransportError>;

    /// Return a device-resident frame slot to the firmware.
    fn recycle_frame(&mut self, surface: &HwFrameSurface) -> Result<(), TransportError>;

    /// Whether the device has finished flushing after end-of-stream.
    fn flush_status(&mut self) -> Result<bool, TransportError>;
}
