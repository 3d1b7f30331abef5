//! Short lived memoization of remote values.
//!
//! A direct mapped table of seqlock protected slots. Every entry is stamped with the
//! epoch that was current when the value was fetched; `invalidate_all` just advances
//! the epoch, so entries from before the last invalidation can never be returned even
//! though they are reclaimed lazily when their slot is reused.
//!
//! Stamp layout: `epoch:32 | version:31 | busy:1`.

use crossbeam::utils::CachePadded;
use std::sync::atomic::{fence, AtomicU64, Ordering};

const BUSY: u64 = 1;
const VERSION_MASK: u64 = (1 << 31) - 1;

struct CacheSlot {
    stamp: AtomicU64,
    key: AtomicU64,
    value: AtomicU64,
}

impl CacheSlot {
    fn new() -> CacheSlot {
        CacheSlot {
            stamp: AtomicU64::new(0),
            key: AtomicU64::new(0),
            value: AtomicU64::new(0),
        }
    }
}

fn stamp_epoch(stamp: u64) -> u64 {
    stamp >> 32
}

fn stamp_version(stamp: u64) -> u64 {
    (stamp >> 1) & VERSION_MASK
}

fn make_key(pe: usize, offset: usize) -> u64 {
    ((pe as u64) << 48) | (offset as u64 & ((1 << 48) - 1))
}

pub(crate) struct RemoteCache {
    slots: Box<[CacheSlot]>,
    // starts at 1 so zeroed slots are stale from the beginning
    epoch: CachePadded<AtomicU64>,
}

impl RemoteCache {
    pub(crate) fn new(num_slots: usize) -> RemoteCache {
        RemoteCache {
            slots: (0..num_slots.max(1)).map(|_| CacheSlot::new()).collect(),
            epoch: CachePadded::new(AtomicU64::new(1)),
        }
    }

    /// The current freshness epoch, capture it before issuing a fetch and pass it to
    /// [insert_with_epoch][RemoteCache::insert_with_epoch] once the value arrives.
    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst) & 0xFFFF_FFFF
    }

    fn slot(&self, key: u64) -> &CacheSlot {
        let hash = key.wrapping_mul(0x9E37_79B9_7F4A_7C15);
        &self.slots[((hash >> 17) % self.slots.len() as u64) as usize]
    }

    pub(crate) fn lookup(&self, pe: usize, offset: usize) -> Option<u64> {
        let key = make_key(pe, offset);
        let slot = self.slot(key);
        let epoch = self.epoch();
        let s1 = slot.stamp.load(Ordering::Acquire);
        if s1 & BUSY == BUSY || stamp_epoch(s1) != epoch {
            return None;
        }
        let k = slot.key.load(Ordering::Relaxed);
        let v = slot.value.load(Ordering::Relaxed);
        fence(Ordering::Acquire);
        let s2 = slot.stamp.load(Ordering::Relaxed);
        if s1 == s2 && k == key {
            Some(v)
        } else {
            None
        }
    }

    pub(crate) fn insert(&self, pe: usize, offset: usize, value: u64) {
        self.insert_with_epoch(self.epoch(), pe, offset, value)
    }

    /// Insert a value that was fetched while `epoch` was current.
    ///
    /// If an invalidation happened in between the entry is written already stale.
    /// A slot that is concurrently being written is skipped rather than waited for.
    pub(crate) fn insert_with_epoch(&self, epoch: u64, pe: usize, offset: usize, value: u64) {
        let key = make_key(pe, offset);
        let slot = self.slot(key);
        let cur = slot.stamp.load(Ordering::Relaxed);
        if cur & BUSY == BUSY {
            return;
        }
        if slot
            .stamp
            .compare_exchange(cur, cur | BUSY, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return;
        }
        fence(Ordering::Release);
        slot.key.store(key, Ordering::Relaxed);
        slot.value.store(value, Ordering::Relaxed);
        let version = (stamp_version(cur) + 1) & VERSION_MASK;
        slot.stamp
            .store((epoch << 32) | (version << 1), Ordering::Release);
    }

    /// Mark every entry stale.
    pub(crate) fn invalidate_all(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for RemoteCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "RemoteCache {{ slots: {}, epoch: {} }}",
            self.slots.len(),
            self.epoch()
        )
    }
}
