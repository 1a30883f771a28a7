//! Hash partitions of the key space.
//!
//! Lookup shards by `blockno % bucket_count`, so lookups for blocks in
//! different partitions contend on different locks. Each bucket owns an
//! ordered list of slot indices, appended at the tail; the order carries no
//! recency meaning. The lists index into the shared slot arena, so moving a
//! slot between buckets is membership surgery on two locked lists rather
//! than pointer surgery on an intrusive linked list.

use parking_lot::Mutex;
use smallvec::SmallVec;

/// Slot indices resident in one bucket.
///
/// Buckets stay short when the bucket count is sized to the pool (about
/// pool size / bucket count entries each), so a small inline capacity
/// avoids heap churn for the common case.
pub(crate) type BucketList = SmallVec<[u32; 8]>;

/// One hash partition: a lock and the slots currently mapped to it.
pub(crate) struct Bucket {
    pub(crate) list: Mutex<BucketList>,
}

impl Bucket {
    pub(crate) fn new() -> Self {
        Self {
            list: Mutex::new(SmallVec::new()),
        }
    }
}

/// Remove `slot` from `list`, preserving the order of the remainder.
/// No-op if the slot is not present.
pub(crate) fn unlink(list: &mut BucketList, slot: u32) {
    if let Some(pos) = list.iter().position(|&s| s == slot) {
        list.remove(pos);
    }
}
