//! Video resource management for hardware transcoder sessions
//!
//! Host-side bookkeeping for a device that does the actual codec work:
//! - Recyclable buffer pools for decoded frame data (no per-frame allocation)
//! - Timestamp/offset matching queues for B-frame reordered decoder output
//! - Slot tracking for frames resident in device memory

pub mod buf_pool;
pub mod frame_pool;
pub mod hw_frame;
pub mod ts_queue;
pub mod types;

pub use buf_pool::*;
pub use frame_pool::*;
pub use hw_frame::*;
pub use ts_queue::*;
pub use types::*;
