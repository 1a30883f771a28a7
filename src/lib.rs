//! Concurrent fixed-capacity block cache.
//!
//! Fixed-size storage blocks, identified by (device id, block number), are
//! cached in a fixed pool of slots shared by many threads. Access to
//! different blocks proceeds independently; access to the same block is
//! serialized through a per-slot content lock. When the pool is full, the
//! least recently claimed unreferenced slot is recycled.
//!
//! # Architecture
//!
//! ```text
//! +--------------------------------------------------------+
//! |                       BlockCache                       |
//! |                                                        |
//! |  +-------------------+      +----------------------+   |
//! |  | Buckets           |      | Slot arena           |   |
//! |  | blockno % K       |----->| key, refcount, tick, |   |
//! |  | Mutex + index list|      | content Mutex        |   |
//! |  +-------------------+      +----------+-----------+   |
//! |            ^                           |               |
//! |            |                           v               |
//! |     eviction Mutex               DiskBackend           |
//! |     (miss path only)        (I/O under content lock)   |
//! +--------------------------------------------------------+
//! ```
//!
//! # Locking
//!
//! - **Bucket locks** shard lookup by `blockno % bucket_count` and guard
//!   bucket membership plus slot bookkeeping. Hits take exactly one.
//! - **The eviction lock** serializes misses. It is acquired before any
//!   bucket lock and held across the pool scan and any cross-bucket slot
//!   move, so at most one eviction runs at a time.
//! - **Content locks** serialize the bytes of one block. They are acquired
//!   only after every other lock is released, and all device I/O happens
//!   under them.
//!
//! # Example
//!
//! ```ignore
//! use bufcache::{BlockCache, MemBackend};
//!
//! let cache = BlockCache::builder()
//!     .slot_count(128)
//!     .build(MemBackend::new())?;
//!
//! let mut block = cache.read(1, 42)?;
//! block.data_mut()[0] = 0xFF;
//! block.write()?;
//! block.release();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod backend;
mod bucket;
mod cache;
mod error;
mod handle;
mod metrics;
mod slot;
mod sync;

pub use backend::{DiskBackend, FailingBackend, MemBackend};
pub use cache::{
    BlockCache, BlockCacheBuilder, DEFAULT_BLOCK_SIZE, DEFAULT_BUCKET_COUNT, DEFAULT_SLOT_COUNT,
};
pub use error::{CacheError, CacheResult};
pub use handle::{BlockHandle, BlockPin};
pub use metrics::MetricsSnapshot;

/// Identifier of a block device.
pub type DeviceId = u32;
