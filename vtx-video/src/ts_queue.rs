//! Timestamp/offset matching queues
//!
//! Hardware decode output arrives in display order while packets are
//! submitted in bitstream order, so output frames cannot be matched to their
//! input timestamps by position. Each submitted packet registers
//! (frame_offset, timestamp) here; the receive path looks its timestamp up
//! by the byte offset the firmware reports, within a small threshold to
//! tolerate padding drift.
//!
//! Nodes live in a dense arena shared by a session's PTS and DTS queues,
//! with free slots on an index stack and queue order kept as prev/next
//! indices: push, unlink and recycle are all O(1) index splices.

use crate::types::{MAX_QUEUE_ENTRIES, NODE_POOL_EXPAND_STEP};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Entries older than this are assumed to belong to packets that will never
/// produce output (dropped or corrupt) and are reclaimed by
/// [`scan_cleanup`].
pub const STALE_NODE_AGE: Duration = Duration::from_secs(30);

const NIL: u32 = u32::MAX;

#[derive(Debug, Error)]
pub enum QueueError {
    /// Queue or node arena at its bound; caller must evict before retrying.
    #[error("timestamp queue at capacity")]
    Exhausted,

    /// No entry within threshold of the requested offset. The queue is left
    /// unchanged; caller falls back to an estimated timestamp.
    #[error("no entry within threshold of requested offset")]
    NotFound,
}

struct Node {
    frame_offset: u64,
    timestamp: i64,
    checked_out: Instant,
    prev: u32,
    next: u32,
    in_use: bool,
}

/// Arena backing one session's timestamp queues.
pub struct NodePool {
    nodes: Vec<Node>,
    free: Vec<u32>,
    max_nodes: usize,
}

impl NodePool {
    /// Arena with `initial` nodes, growable up to twice
    /// [`MAX_QUEUE_ENTRIES`] (one full PTS plus one full DTS queue).
    pub fn new(initial: usize) -> Self {
        Self::with_limit(initial, 2 * MAX_QUEUE_ENTRIES)
    }

    pub fn with_limit(initial: usize, max_nodes: usize) -> Self {
        let mut pool = NodePool {
            nodes: Vec::new(),
            free: Vec::new(),
            max_nodes,
        };
        pool.grow(initial.min(max_nodes));
        pool
    }

    fn grow(&mut self, n: usize) {
        for _ in 0..n {
            let index = self.nodes.len() as u32;
            self.nodes.push(Node {
                frame_offset: 0,
                timestamp: 0,
                checked_out: Instant::now(),
                prev: NIL,
                next: NIL,
                in_use: false,
            });
            self.free.push(index);
        }
    }

    fn checkout(&mut self, frame_offset: u64, timestamp: i64) -> Option<u32> {
        if self.free.is_empty() {
            let room = self.max_nodes.saturating_sub(self.nodes.len());
            if room == 0 {
                return None;
            }
            let step = NODE_POOL_EXPAND_STEP.min(room);
            log::info!(
                "node pool: expanding from {} to {}",
                self.nodes.len(),
                self.nodes.len() + step
            );
            self.grow(step);
        }
        let index = self.free.pop()?;
        let node = &mut self.nodes[index as usize];
        node.frame_offset = frame_offset;
        node.timestamp = timestamp;
        node.checked_out = Instant::now();
        node.prev = NIL;
        node.next = NIL;
        node.in_use = true;
        Some(index)
    }

    fn release(&mut self, index: u32) {
        let node = &mut self.nodes[index as usize];
        debug_assert!(node.in_use);
        node.in_use = false;
        node.prev = NIL;
        node.next = NIL;
        self.free.push(index);
    }

    pub fn available(&self) -> usize {
        self.free.len() + self.max_nodes.saturating_sub(self.nodes.len())
    }
}

/// Named FIFO of (frame_offset, timestamp) entries in arrival order.
pub struct TimestampQueue {
    name: String,
    head: u32,
    tail: u32,
    len: usize,
    capacity: usize,
}

impl TimestampQueue {
    pub fn new(name: &str) -> Self {
        Self::with_capacity(name, MAX_QUEUE_ENTRIES)
    }

    pub fn with_capacity(name: &str, capacity: usize) -> Self {
        TimestampQueue {
            name: name.to_string(),
            head: NIL,
            tail: NIL,
            len: 0,
            capacity,
        }
    }

    /// Append an entry at the tail, preserving arrival order.
    pub fn push(
        &mut self,
        pool: &mut NodePool,
        frame_offset: u64,
        timestamp: i64,
    ) -> Result<(), QueueError> {
        if self.len >= self.capacity {
            log::warn!(
                "queue \"{}\": at capacity ({}), entry for offset {} rejected",
                self.name,
                self.capacity,
                frame_offset
            );
            return Err(QueueError::Exhausted);
        }
        let index = pool
            .checkout(frame_offset, timestamp)
            .ok_or(QueueError::Exhausted)?;

        if self.tail == NIL {
            self.head = index;
        } else {
            pool.nodes[self.tail as usize].next = index;
            pool.nodes[index as usize].prev = self.tail;
        }
        self.tail = index;
        self.len += 1;
        Ok(())
    }

    /// Take the timestamp of the first entry within `threshold` bytes of
    /// `frame_offset`, scanning from the head.
    ///
    /// Exactly the matched entry is consumed. A miss leaves the queue
    /// unchanged and reports [`QueueError::NotFound`].
    pub fn pop(
        &mut self,
        pool: &mut NodePool,
        frame_offset: u64,
        threshold: u64,
    ) -> Result<i64, QueueError> {
        let mut scanned = 0u32;
        let mut index = self.head;
        while index != NIL {
            let node = &pool.nodes[index as usize];
            if node.frame_offset.abs_diff(frame_offset) <= threshold {
                let timestamp = node.timestamp;
                self.unlink(pool, index);
                pool.release(index);
                log::trace!(
                    "queue \"{}\": matched offset {} after {} iterations",
                    self.name,
                    frame_offset,
                    scanned
                );
                return Ok(timestamp);
            }
            index = node.next;
            scanned += 1;
        }
        log::debug!(
            "queue \"{}\": no entry within {} of offset {}",
            self.name,
            threshold,
            frame_offset
        );
        Err(QueueError::NotFound)
    }

    /// As [`pop`](Self::pop), but every entry scanned *before* the match is
    /// recycled too. Entries skipped by a nearest-match pop belong to
    /// offsets that will never be requested again (dropped packets); without
    /// eviction they pin arena nodes for the life of the stream.
    pub fn pop_evicting(
        &mut self,
        pool: &mut NodePool,
        frame_offset: u64,
        threshold: u64,
    ) -> Result<i64, QueueError> {
        let mut index = self.head;
        while index != NIL {
            let node = &pool.nodes[index as usize];
            if node.frame_offset.abs_diff(frame_offset) <= threshold {
                let timestamp = node.timestamp;
                // Everything before the match is stale: pop heads until the
                // match is the head, then consume it.
                while self.head != index {
                    let stale = self.head;
                    self.unlink(pool, stale);
                    pool.release(stale);
                }
                self.unlink(pool, index);
                pool.release(index);
                return Ok(timestamp);
            }
            index = node.next;
        }
        Err(QueueError::NotFound)
    }

    /// Return every entry to the arena. Session close and sequence change
    /// both flush, so stale offsets never match against a new stream.
    pub fn clear(&mut self, pool: &mut NodePool) {
        let mut index = self.head;
        while index != NIL {
            let next = pool.nodes[index as usize].next;
            pool.release(index);
            index = next;
        }
        self.head = NIL;
        self.tail = NIL;
        self.len = 0;
    }

    fn unlink(&mut self, pool: &mut NodePool, index: u32) {
        let (prev, next) = {
            let node = &pool.nodes[index as usize];
            (node.prev, node.next)
        };
        if prev == NIL {
            self.head = next;
        } else {
            pool.nodes[prev as usize].next = next;
        }
        if next == NIL {
            self.tail = prev;
        } else {
            pool.nodes[next as usize].prev = prev;
        }
        self.len -= 1;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn evict_older_than(&mut self, pool: &mut NodePool, age: Duration) -> usize {
        let now = Instant::now();
        let mut evicted = 0;
        while self.head != NIL {
            let head = self.head;
            if now.duration_since(pool.nodes[head as usize].checked_out) <= age {
                break;
            }
            self.unlink(pool, head);
            pool.release(head);
            evicted += 1;
        }
        evicted
    }
}

/// Reclaim entries older than [`STALE_NODE_AGE`] from both queues.
///
/// PTS and DTS are registered together at submit time, so they must be
/// cleaned together or a later lookup would match one queue and miss the
/// other for the same frame.
pub fn scan_cleanup(pts: &mut TimestampQueue, dts: &mut TimestampQueue, pool: &mut NodePool) {
    scan_cleanup_older_than(pts, dts, pool, STALE_NODE_AGE);
}

pub fn scan_cleanup_older_than(
    pts: &mut TimestampQueue,
    dts: &mut TimestampQueue,
    pool: &mut NodePool,
    age: Duration,
) {
    let evicted = pts.evict_older_than(pool, age) + dts.evict_older_than(pool, age);
    if evicted > 0 {
        log::info!(
            "timestamp cleanup: evicted {} stale entries (pts {}, dts {})",
            evicted,
            pts.len(),
            dts.len()
        );
    }
}
