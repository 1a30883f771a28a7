//! RAII access types: [`BlockHandle`] for exclusive block access and
//! [`BlockPin`] for keeping a block cache-resident.
//!
//! The precondition "only the content-lock holder may write or release a
//! block" is enforced structurally: the handle owns the lock guard, so
//! those operations exist only where the precondition holds.

use crate::backend::DiskBackend;
use crate::cache::BlockCache;
use crate::error::CacheResult;
use crate::DeviceId;

use parking_lot::MutexGuard;
use std::fmt;
use std::ops::{Deref, DerefMut};

/// Exclusive handle to one cached block.
///
/// Returned by [`BlockCache::get`] and [`BlockCache::read`]. The handle
/// owns the slot's content lock and one reference count: while it lives,
/// no other caller can touch the block's bytes and the slot cannot be
/// recycled. Dropping the handle releases the content lock first, then
/// gives the reference back under the bucket lock.
///
/// Handles are intended to be short-lived. To keep a block resident across
/// handle lifetimes, take a [`BlockPin`] instead of holding the handle.
pub struct BlockHandle<'a, D: DiskBackend> {
    cache: &'a BlockCache<D>,
    slot: u32,
    dev: DeviceId,
    blockno: u64,
    /// `Some` until drop; taken there so the content lock is released
    /// before the reference count.
    content: Option<MutexGuard<'a, Box<[u8]>>>,
}

impl<'a, D: DiskBackend> BlockHandle<'a, D> {
    pub(crate) fn new(
        cache: &'a BlockCache<D>,
        slot: u32,
        dev: DeviceId,
        blockno: u64,
        content: MutexGuard<'a, Box<[u8]>>,
    ) -> Self {
        Self {
            cache,
            slot,
            dev,
            blockno,
            content: Some(content),
        }
    }

    /// Device id this handle is bound to.
    #[inline]
    pub fn dev(&self) -> DeviceId {
        self.dev
    }

    /// Block number this handle is bound to.
    #[inline]
    pub fn blockno(&self) -> u64 {
        self.blockno
    }

    /// Index of the pool slot backing this handle. Diagnostic; the mapping
    /// changes once the block is evicted.
    #[inline]
    pub fn slot_index(&self) -> u32 {
        self.slot
    }

    /// Whether the content bytes have been loaded from the backend.
    ///
    /// Always true for handles returned by [`BlockCache::read`]. Handles
    /// from [`BlockCache::get`] may hold unloaded bytes, which suits
    /// callers that overwrite the whole block.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.cache.slot(self.slot).is_valid()
    }

    /// The block's content bytes.
    #[inline]
    pub fn data(&self) -> &[u8] {
        self.content.as_deref().expect("content lock held until drop")
    }

    /// Mutable access to the block's content bytes.
    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.content
            .as_deref_mut()
            .expect("content lock held until drop")
    }

    /// Push the content bytes to the disk backend.
    pub fn write(&self) -> CacheResult<()> {
        self.cache.write_back(self.dev, self.blockno, self.data())
    }

    /// Keep the block cache-resident after this handle is released.
    ///
    /// The pin holds one reference count without content-lock ownership,
    /// so the slot stays out of eviction across a sequence of otherwise
    /// unrelated get/release cycles.
    pub fn pin(&self) -> BlockPin<'a, D> {
        self.cache.pin_slot(self.slot, self.blockno);
        BlockPin {
            cache: self.cache,
            slot: self.slot,
            blockno: self.blockno,
        }
    }

    /// Release the handle. Equivalent to dropping it.
    pub fn release(self) {}
}

impl<D: DiskBackend> Deref for BlockHandle<'_, D> {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        self.data()
    }
}

impl<D: DiskBackend> DerefMut for BlockHandle<'_, D> {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u8] {
        self.data_mut()
    }
}

impl<D: DiskBackend> Drop for BlockHandle<'_, D> {
    fn drop(&mut self) {
        // Content lock first, so no bucket lock is ever held while a
        // content lock is still owned.
        drop(self.content.take());
        self.cache.release_slot(self.slot, self.blockno);
    }
}

impl<D: DiskBackend> fmt::Debug for BlockHandle<'_, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockHandle")
            .field("dev", &self.dev)
            .field("blockno", &self.blockno)
            .field("slot", &self.slot)
            .field("valid", &self.is_valid())
            .finish()
    }
}

/// Manual residency hold on one cached block.
///
/// Created by [`BlockHandle::pin`]. Holds one reference count, keeping the
/// block's slot out of eviction until the pin is dropped or
/// [`BlockPin::unpin`] is called. Each pin releases exactly once.
pub struct BlockPin<'a, D: DiskBackend> {
    cache: &'a BlockCache<D>,
    slot: u32,
    blockno: u64,
}

impl<D: DiskBackend> BlockPin<'_, D> {
    /// Block number this pin keeps resident.
    #[inline]
    pub fn blockno(&self) -> u64 {
        self.blockno
    }

    /// Release the pin. Equivalent to dropping it.
    pub fn unpin(self) {}
}

impl<D: DiskBackend> Drop for BlockPin<'_, D> {
    fn drop(&mut self) {
        self.cache.unpin_slot(self.slot, self.blockno);
    }
}

impl<D: DiskBackend> fmt::Debug for BlockPin<'_, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockPin")
            .field("blockno", &self.blockno)
            .field("slot", &self.slot)
            .finish()
    }
}
