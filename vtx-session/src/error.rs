//! Session error taxonomy

use crate::run_state::RunState;
use crate::transport::TransportError;
use thiserror::Error;
use vtx_video::PoolError;

#[derive(Debug, Error)]
pub enum SessionError {
    /// The run state does not accept frames right now; retry once the
    /// sequence change or reset completes.
    #[error("session is not accepting frames in state {0:?}")]
    NotAccepting(RunState),

    /// The submitted frame differs from the session configuration; the
    /// session has entered the draining state and the caller must flush.
    #[error("sequence change started, drain the stream")]
    SequenceChange,

    /// The device has not finished flushing yet; poll again.
    #[error("drain still in progress")]
    DrainPending,

    /// Timestamp queues at capacity even after stale-entry cleanup.
    #[error("timestamp queues at capacity")]
    QueueFull,

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Unrecoverable; the session must be torn down, not retried.
    #[error("fatal session error: {0}")]
    Fatal(String),
}
