//! Worker threads for blocking device I/O
//!
//! Device reads and writes are plain blocking calls; sessions either issue
//! them inline or push them onto the shared [`ThreadPool`] so the send and
//! receive loops stay responsive. Pool operations never block on the
//! device - callers poll with bounded sleeps instead.

pub mod poll;
pub mod thread_pool;

pub use poll::*;
pub use thread_pool::*;
