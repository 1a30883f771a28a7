//! One reusable cache entry in the fixed pool.
//!
//! # Locking Discipline
//!
//! Bookkeeping fields (key, validity, reference count, claim tick) are
//! atomics, but they are not free-running state: every write happens under
//! the lock of the bucket the slot currently belongs to, with the eviction
//! lock additionally held while a slot changes keys or buckets. The only
//! unlocked accesses are the eviction scan's reads of `refcount` and
//! `last_used`, which are advisory and revalidated under the owning bucket
//! lock before a candidate commits. Relaxed ordering is sufficient: the
//! bucket and eviction mutexes provide the happens-before edges.
//!
//! Content bytes live behind the slot's content lock. The lock is held for
//! the whole lifetime of a [`BlockHandle`](crate::BlockHandle), which is
//! what serializes all access to one block.

use crate::sync::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use crate::DeviceId;

use parking_lot::{Mutex, MutexGuard};

/// Tick value of a slot that has never been claimed for any block.
/// Such a slot is in no bucket and always loses the recency comparison.
pub(crate) const NEVER_CLAIMED: u64 = 0;

pub(crate) struct Slot {
    dev: AtomicU32,
    blockno: AtomicU64,

    /// Content bytes reflect the block on the backend.
    valid: AtomicBool,

    /// Outstanding handles plus manual pins. A slot with a nonzero count
    /// is never recycled.
    refcount: AtomicU32,

    /// Tick at which the slot was last claimed; `NEVER_CLAIMED` until then.
    last_used: AtomicU64,

    /// Exclusive content lock around the block bytes.
    content: Mutex<Box<[u8]>>,
}

impl Slot {
    pub(crate) fn new(block_size: usize) -> Self {
        Self {
            dev: AtomicU32::new(0),
            blockno: AtomicU64::new(0),
            valid: AtomicBool::new(false),
            refcount: AtomicU32::new(0),
            last_used: AtomicU64::new(NEVER_CLAIMED),
            content: Mutex::new(vec![0u8; block_size].into_boxed_slice()),
        }
    }

    /// Re-key the slot for (dev, blockno) with one reference outstanding.
    ///
    /// Caller holds the eviction lock and the destination bucket's lock,
    /// and has established that no handle or pin references the slot.
    pub(crate) fn claim(&self, dev: DeviceId, blockno: u64, tick: u64) {
        self.dev.store(dev, Ordering::Relaxed);
        self.blockno.store(blockno, Ordering::Relaxed);
        self.valid.store(false, Ordering::Relaxed);
        self.refcount.store(1, Ordering::Relaxed);
        self.last_used.store(tick, Ordering::Relaxed);
    }

    /// Whether the slot currently holds (dev, blockno). Called under the
    /// bucket lock during lookup.
    #[inline]
    pub(crate) fn matches(&self, dev: DeviceId, blockno: u64) -> bool {
        self.dev.load(Ordering::Relaxed) == dev && self.blockno.load(Ordering::Relaxed) == blockno
    }

    #[inline]
    pub(crate) fn blockno(&self) -> u64 {
        self.blockno.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Relaxed)
    }

    /// Mark the content bytes as loaded. Called by the content-lock holder.
    #[inline]
    pub(crate) fn set_valid(&self) {
        self.valid.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn refcount(&self) -> u32 {
        self.refcount.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn last_used(&self) -> u64 {
        self.last_used.load(Ordering::Relaxed)
    }

    /// Take a reference. Caller holds the slot's bucket lock.
    #[inline]
    pub(crate) fn incr_ref(&self) {
        self.refcount.fetch_add(1, Ordering::Relaxed);
    }

    /// Drop a reference, returning the previous count. Caller holds the
    /// slot's bucket lock and asserts the count was nonzero.
    #[inline]
    pub(crate) fn decr_ref(&self) -> u32 {
        self.refcount.fetch_sub(1, Ordering::Relaxed)
    }

    /// Block-acquire the content lock.
    #[inline]
    pub(crate) fn lock_content(&self) -> MutexGuard<'_, Box<[u8]>> {
        self.content.lock()
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;

    #[test]
    fn test_new_slot_is_unclaimed() {
        let slot = Slot::new(64);
        assert_eq!(slot.refcount(), 0);
        assert_eq!(slot.last_used(), NEVER_CLAIMED);
        assert!(!slot.is_valid());
        assert_eq!(slot.lock_content().len(), 64);
    }

    #[test]
    fn test_claim_rekeys_and_references() {
        let slot = Slot::new(64);
        slot.set_valid();
        slot.claim(2, 99, 7);

        assert!(slot.matches(2, 99));
        assert!(!slot.matches(1, 99));
        assert!(!slot.matches(2, 98));
        assert_eq!(slot.refcount(), 1);
        assert_eq!(slot.last_used(), 7);
        assert!(!slot.is_valid(), "claim must invalidate stale content");
    }

    #[test]
    fn test_reference_counting() {
        let slot = Slot::new(16);
        slot.incr_ref();
        slot.incr_ref();
        assert_eq!(slot.refcount(), 2);
        assert_eq!(slot.decr_ref(), 2);
        assert_eq!(slot.decr_ref(), 1);
        assert_eq!(slot.refcount(), 0);
    }

    #[test]
    fn test_content_lock_is_exclusive() {
        let slot = Slot::new(16);
        let guard = slot.lock_content();
        assert!(slot.content.try_lock().is_none());
        drop(guard);
        assert!(slot.content.try_lock().is_some());
    }
}
