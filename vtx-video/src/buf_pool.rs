//! Recyclable pool of fixed-size host memory buffers
//!
//! Device reads and writes land in page-multiple buffers that are expensive
//! to allocate per frame. The pool pre-allocates a bounded set and recycles
//! them: an arena of slots plus an index stack of free slots, so checkout
//! and return are O(1) with no list pointers to corrupt.
//!
//! A checked-out buffer moves its backing storage out of the slot, so two
//! callers can never hold the same buffer. Buffers still outstanding when
//! the pool is dropped simply free themselves on their own drop.

use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Distinguishes pools so a buffer returned to the wrong pool is caught.
static NEXT_POOL_TAG: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Error)]
pub enum PoolError {
    /// No free buffers; caller decides whether to retry, expand, or drop.
    #[error("no free buffers in pool")]
    Exhausted,

    /// Backing memory could not be allocated. Everything allocated by the
    /// failing call is released before this is reported.
    #[error("allocation of {size} byte buffer failed for pool \"{name}\"")]
    Alloc { name: String, size: usize },

    /// Frame pool used before the stream resolution is known.
    #[error("frame pool not configured yet")]
    Unconfigured,
}

/// A buffer checked out of a [`BufferPool`].
///
/// Owns its storage while out of the pool; return it with
/// [`BufferPool::put_back`] to recycle.
#[derive(Debug)]
pub struct PooledBuffer {
    data: Vec<u8>,
    slot: u32,
    pool_tag: u64,
}

impl PooledBuffer {
    /// Arena slot this buffer came from. Diagnostic only.
    pub fn slot_index(&self) -> u32 {
        self.slot
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

struct Slot {
    /// `None` while the buffer is checked out.
    storage: Option<Vec<u8>>,
}

pub(crate) struct PoolCore {
    name: String,
    tag: u64,
    buf_size: usize,
    slots: Vec<Slot>,
    free: Vec<u32>,
    in_use: usize,
}

fn alloc_zeroed(size: usize) -> Option<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(size).ok()?;
    buf.resize(size, 0);
    Some(buf)
}

impl PoolCore {
    pub(crate) fn new(name: &str, capacity: usize, buf_size: usize) -> Result<Self, PoolError> {
        let mut core = PoolCore {
            name: name.to_string(),
            tag: NEXT_POOL_TAG.fetch_add(1, Ordering::Relaxed),
            buf_size,
            slots: Vec::new(),
            free: Vec::new(),
            in_use: 0,
        };
        core.expand(capacity)?;
        Ok(core)
    }

    pub(crate) fn get(&mut self) -> Result<PooledBuffer, PoolError> {
        let slot = self.free.pop().ok_or(PoolError::Exhausted)?;
        let storage = self.slots[slot as usize]
            .storage
            .take()
            .expect("free slot without storage");
        self.in_use += 1;
        Ok(PooledBuffer {
            data: storage,
            slot,
            pool_tag: self.tag,
        })
    }

    pub(crate) fn put_back(&mut self, buf: PooledBuffer) {
        if buf.pool_tag != self.tag || buf.slot as usize >= self.slots.len() {
            log::error!(
                "pool \"{}\": returned buffer (slot {}) belongs to another pool, dropping",
                self.name,
                buf.slot
            );
            return;
        }
        let slot = &mut self.slots[buf.slot as usize];
        if slot.storage.is_some() {
            log::error!(
                "pool \"{}\": slot {} returned twice, dropping duplicate",
                self.name,
                buf.slot
            );
            return;
        }
        slot.storage = Some(buf.data);
        self.free.push(buf.slot);
        self.in_use -= 1;
    }

    /// All-or-nothing growth of the arena by `n` buffers.
    pub(crate) fn expand(&mut self, n: usize) -> Result<(), PoolError> {
        let mut fresh = Vec::with_capacity(n);
        for _ in 0..n {
            match alloc_zeroed(self.buf_size) {
                Some(buf) => fresh.push(buf),
                None => {
                    return Err(PoolError::Alloc {
                        name: self.name.clone(),
                        size: self.buf_size,
                    })
                }
            }
        }
        for buf in fresh {
            let index = self.slots.len() as u32;
            self.slots.push(Slot { storage: Some(buf) });
            self.free.push(index);
        }
        Ok(())
    }

    pub(crate) fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.slots.len(),
            in_use: self.in_use,
            available: self.free.len(),
        }
    }

    pub(crate) fn buf_size(&self) -> usize {
        self.buf_size
    }
}

/// Bounded recyclable allocator of fixed-size buffers.
pub struct BufferPool {
    core: Mutex<PoolCore>,
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool").finish_non_exhaustive()
    }
}

impl BufferPool {
    /// Pre-allocate `capacity` buffers of `buf_size` bytes each.
    ///
    /// Partial allocation failure releases everything already allocated and
    /// reports [`PoolError::Alloc`].
    pub fn new(name: &str, capacity: usize, buf_size: usize) -> Result<Self, PoolError> {
        Ok(BufferPool {
            core: Mutex::new(PoolCore::new(name, capacity, buf_size)?),
        })
    }

    /// Check a free buffer out of the pool, O(1).
    pub fn get(&self) -> Result<PooledBuffer, PoolError> {
        self.core.lock().get()
    }

    /// Return a buffer to the free list, O(1).
    ///
    /// Returning a buffer that is not currently checked out of this pool is
    /// a caller bug; it is logged and the buffer is dropped.
    pub fn put_back(&self, buf: PooledBuffer) {
        self.core.lock().put_back(buf);
    }

    /// Grow the pool by `n` buffers, appended to the free list.
    pub fn expand(&self, n: usize) -> Result<(), PoolError> {
        self.core.lock().expand(n)
    }

    pub fn stats(&self) -> PoolStats {
        self.core.lock().stats()
    }

    pub fn buf_size(&self) -> usize {
        self.core.lock().buf_size()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    pub capacity: usize,
    pub in_use: usize,
    pub available: usize,
}
