//! Word formats for ring slots and the block command queues.
//!
//! Element request word (u64):
//! ```text
//!  63        48 47                                   0
//! |   tag:16   |              offset:48               |
//! ```
//! Block command word (u64):
//! ```text
//!  63      48  47   46     32 31      16 15       0
//! |  tag:16  |kind| peer:15  | window:16 | count:16 |
//! ```
//! `window` is the ring slot of the first element of the block; a block never crosses
//! a wraparound so the `count` elements occupy `window..window + count`.

use crate::sequence::{Seq, TAG_BITS, TAG_MASK};
use crate::utils::SpinWait;

use crossbeam::utils::CachePadded;
use std::sync::atomic::{AtomicU64, Ordering};

pub(crate) const MAX_QUEUE_SIZE: usize = (1 << 16) - 1;
pub(crate) const MAX_PES: usize = 1 << 15;
pub(crate) const MAX_SEGMENT_LEN: usize = 1 << 48;

const OFFSET_MASK: u64 = (1 << 48) - 1;
const TAG_SHIFT: u32 = 64 - TAG_BITS;
const KIND_SHIFT: u32 = 47;
const PEER_SHIFT: u32 = 32;
const PEER_MASK: u64 = (1 << 15) - 1;
const WINDOW_SHIFT: u32 = 16;
const FIELD_MASK: u64 = (1 << 16) - 1;

/// A tagged element offset as stored in a request ring slot.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) struct ElementWord(pub(crate) u64);

impl ElementWord {
    pub(crate) fn new(offset: usize, seq: Seq, capacity: usize) -> ElementWord {
        debug_assert!((offset as u64) <= OFFSET_MASK);
        ElementWord((seq.tag(capacity) << TAG_SHIFT) | (offset as u64 & OFFSET_MASK))
    }
    pub(crate) fn tag(self) -> u64 {
        (self.0 >> TAG_SHIFT) & TAG_MASK
    }
    pub(crate) fn offset(self) -> usize {
        (self.0 & OFFSET_MASK) as usize
    }
    /// true if this word was written for `seq` (and not for an earlier trip of the same slot)
    pub(crate) fn is_ready_for(self, seq: Seq, capacity: usize) -> bool {
        self.tag() == seq.tag(capacity)
    }
}

impl std::fmt::Debug for ElementWord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ElementWord(tag {} offset {})", self.tag(), self.offset())
    }
}

/// Which access path a block belongs to.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum BlockKind {
    /// gather: the reply carries values
    Get = 0,
    /// scatter: the reply is a pure acknowledgement
    Put = 1,
}

/// An aggregated descriptor for `count` element requests (or replies) exchanged with `peer`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct BlockCmd {
    pub(crate) kind: BlockKind,
    pub(crate) count: usize,
    pub(crate) peer: usize,
    pub(crate) window: usize,
}

impl BlockCmd {
    pub(crate) fn encode(&self, seq: Seq, capacity: usize) -> u64 {
        debug_assert!(self.count > 0 && self.count as u64 <= FIELD_MASK);
        debug_assert!(self.window as u64 <= FIELD_MASK);
        debug_assert!(self.peer as u64 <= PEER_MASK);
        (seq.tag(capacity) << TAG_SHIFT)
            | ((self.kind as u64) << KIND_SHIFT)
            | ((self.peer as u64 & PEER_MASK) << PEER_SHIFT)
            | ((self.window as u64 & FIELD_MASK) << WINDOW_SHIFT)
            | (self.count as u64 & FIELD_MASK)
    }

    pub(crate) fn tag_of(word: u64) -> u64 {
        (word >> TAG_SHIFT) & TAG_MASK
    }

    pub(crate) fn decode(word: u64) -> BlockCmd {
        BlockCmd {
            kind: if (word >> KIND_SHIFT) & 1 == 0 {
                BlockKind::Get
            } else {
                BlockKind::Put
            },
            peer: ((word >> PEER_SHIFT) & PEER_MASK) as usize,
            window: ((word >> WINDOW_SHIFT) & FIELD_MASK) as usize,
            count: (word & FIELD_MASK) as usize,
        }
    }
}

/// A fixed depth ring of tagged block command words.
///
/// Producers claim a sequence number from `head`, wait until the consumers are less
/// than one full ring behind, and publish the tagged word. Consumers poll the slot of
/// `tail` until the tag matches the trip of `tail`, then claim it by advancing `tail`.
pub(crate) struct CmdQueue {
    slots: Box<[AtomicU64]>,
    head: CachePadded<AtomicU64>,
    tail: CachePadded<AtomicU64>,
}

impl CmdQueue {
    pub(crate) fn new(capacity: usize) -> CmdQueue {
        CmdQueue {
            slots: (0..capacity).map(|_| AtomicU64::new(0)).collect(),
            head: CachePadded::new(AtomicU64::new(0)),
            tail: CachePadded::new(AtomicU64::new(0)),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// total number of commands ever published (or claimed for publishing)
    pub(crate) fn issued(&self) -> u64 {
        self.head.load(Ordering::SeqCst)
    }

    /// total number of commands ever consumed
    pub(crate) fn consumed(&self) -> u64 {
        self.tail.load(Ordering::SeqCst)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.consumed() >= self.issued()
    }

    fn publish(&self, seq: Seq, cmd: &BlockCmd) {
        let cap = self.capacity();
        self.slots[seq.slot(cap)].store(cmd.encode(seq, cap), Ordering::SeqCst);
    }

    /// Publish `cmd` at the next sequence slot, spinning while the ring is full.
    pub(crate) fn push(&self, cmd: BlockCmd) -> Seq {
        let seq = Seq(self.head.fetch_add(1, Ordering::SeqCst));
        let cap = self.capacity() as u64;
        if seq.0 >= self.tail.load(Ordering::SeqCst) + cap {
            let mut wait = SpinWait::new("a free block command slot");
            while seq.0 >= self.tail.load(Ordering::SeqCst) + cap {
                wait.spin();
            }
        }
        self.publish(seq, &cmd);
        seq
    }

    /// Publish `cmd` only if a slot is free right now.
    pub(crate) fn try_push(&self, cmd: BlockCmd) -> Option<Seq> {
        let cap = self.capacity() as u64;
        let mut head = self.head.load(Ordering::SeqCst);
        loop {
            if head >= self.tail.load(Ordering::SeqCst) + cap {
                return None;
            }
            match self.head.compare_exchange_weak(
                head,
                head + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    self.publish(Seq(head), &cmd);
                    return Some(Seq(head));
                }
                Err(cur) => head = cur,
            }
        }
    }

    /// Claim the command at `tail` if its tag shows it has been published for the current trip.
    pub(crate) fn try_pop(&self) -> Option<BlockCmd> {
        let cap = self.capacity();
        loop {
            let tail = Seq(self.tail.load(Ordering::SeqCst));
            let word = self.slots[tail.slot(cap)].load(Ordering::SeqCst);
            if BlockCmd::tag_of(word) != tail.tag(cap) {
                return None;
            }
            if self
                .tail
                .compare_exchange(tail.0, tail.0 + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Some(BlockCmd::decode(word));
            }
        }
    }
}

impl std::fmt::Debug for CmdQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "CmdQueue {{ capacity: {}, head: {}, tail: {} }}",
            self.capacity(),
            self.issued(),
            self.consumed()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_cmd_fields() {
        let cmd = BlockCmd {
            kind: BlockKind::Put,
            count: 4,
            peer: 3,
            window: 12,
        };
        let word = cmd.encode(Seq(17), 16);
        assert_eq!(BlockCmd::decode(word), cmd);
        assert_eq!(BlockCmd::tag_of(word), Seq(17).tag(16));
    }

    #[test]
    fn element_word_rejects_previous_trip() {
        let cap = 4;
        let old = ElementWord::new(9, Seq(2), cap);
        assert!(old.is_ready_for(Seq(2), cap));
        assert!(!old.is_ready_for(Seq(6), cap));
        assert!(!ElementWord(0).is_ready_for(Seq(2), cap));
        assert_eq!(ElementWord::new(9, Seq(6), cap).offset(), 9);
    }

    #[test]
    fn queue_slot_rereads_are_stable() {
        let q = CmdQueue::new(4);
        let cmd = BlockCmd {
            kind: BlockKind::Get,
            count: 3,
            peer: 1,
            window: 2,
        };
        let seq = q.push(cmd);
        let slot = seq.slot(q.capacity());
        let first = q.slots[slot].load(Ordering::SeqCst);
        let again = q.slots[slot].load(Ordering::SeqCst);
        assert_eq!(first, again);
        assert_eq!(BlockCmd::tag_of(again), seq.tag(q.capacity()));
        assert_eq!(BlockCmd::decode(again), cmd);
        assert_eq!(q.try_pop(), Some(cmd));
        // the consumed word stays in place but no longer matches the tail
        assert_eq!(q.slots[slot].load(Ordering::SeqCst), first);
        assert!(q.try_pop().is_none());
    }

    #[test]
    fn queue_wraps_in_order() {
        let q = CmdQueue::new(2);
        assert!(q.try_pop().is_none());
        for round in 0..5usize {
            let a = BlockCmd {
                kind: BlockKind::Get,
                count: round + 1,
                peer: 0,
                window: 0,
            };
            let b = BlockCmd { peer: 1, ..a };
            q.push(a);
            q.push(b);
            assert!(q.try_push(a).is_none());
            assert_eq!(q.try_pop(), Some(a));
            assert_eq!(q.try_pop(), Some(b));
            assert!(q.try_pop().is_none());
        }
        assert_eq!(q.issued(), 10);
        assert!(q.is_empty());
    }

    #[test]
    fn stale_slot_is_not_consumed_again() {
        let q = CmdQueue::new(2);
        let cmd = BlockCmd {
            kind: BlockKind::Get,
            count: 1,
            peer: 0,
            window: 0,
        };
        q.push(cmd);
        q.push(cmd);
        assert!(q.try_pop().is_some());
        assert!(q.try_pop().is_some());
        // tail now points at seq 2 whose slot still holds the trip 0 word
        assert!(q.try_pop().is_none());
    }

    #[test]
    fn concurrent_producers() {
        let q = std::sync::Arc::new(CmdQueue::new(8));
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let q = q.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        q.push(BlockCmd {
                            kind: BlockKind::Get,
                            count: i + 1,
                            peer: p,
                            window: 0,
                        });
                    }
                })
            })
            .collect();
        let mut seen = vec![0usize; 4];
        let mut total = 0;
        while total < 400 {
            if let Some(cmd) = q.try_pop() {
                // each producer's commands arrive in the order it pushed them
                assert_eq!(cmd.count, seen[cmd.peer] + 1);
                seen[cmd.peer] += 1;
                total += 1;
            }
        }
        for p in producers {
            p.join().unwrap();
        }
        assert_eq!(seen, vec![100; 4]);
    }
}
