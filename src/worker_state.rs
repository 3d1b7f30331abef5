use crate::cache::RemoteCache;
use crate::command::{BlockKind, CmdQueue, ElementWord};
use crate::segment::RemoteSegment;
use crate::sequence::Seq;
use crate::utils::{spin_until, SpinWait};

use crossbeam::utils::CachePadded;
use std::sync::atomic::{fence, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

/// Lifecycle of a device resident engine.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    Idle = 0,
    Running = 1,
    /// the host asked the engine to stop, it finishes the work already visible
    Draining = 2,
    Done = 3,
}

#[derive(Debug)]
pub(crate) struct EngineStatus(AtomicU8);

impl EngineStatus {
    fn new() -> EngineStatus {
        EngineStatus(AtomicU8::new(EngineState::Idle as u8))
    }
    pub(crate) fn get(&self) -> EngineState {
        match self.0.load(Ordering::SeqCst) {
            0 => EngineState::Idle,
            1 => EngineState::Running,
            2 => EngineState::Draining,
            _ => EngineState::Done,
        }
    }
    pub(crate) fn set(&self, state: EngineState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }
}

/// Snapshot of the per peer counters of one access path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelCounters {
    /// element requests enqueued by local threads
    pub posted: u64,
    /// element requests folded into an emitted block command
    pub aggregated: u64,
    /// element requests completed, as seen by the host
    pub ack_host: u64,
    /// element requests completed, as seen by the requesting threads
    pub ack_device: u64,
    /// elements this pe packed and returned to the peer
    pub replied: u64,
}

fn counters(n: usize) -> Box<[CachePadded<AtomicU64>]> {
    (0..n)
        .map(|_| CachePadded::new(AtomicU64::new(0)))
        .collect()
}

fn words(n: usize) -> Box<[AtomicU64]> {
    (0..n).map(|_| AtomicU64::new(0)).collect()
}

/// All counters, rings and buffers of one access path (gather or scatter).
///
/// Every array is indexed by `pe * capacity + slot`: each peer owns a region of
/// `capacity` slots in the outbound request ring, the inbound request window and both
/// reply regions. Counters are single writer, multi reader and never reset.
pub(crate) struct ChannelState {
    pub(crate) kind: BlockKind,
    capacity: usize,
    num_pes: usize,
    pub(crate) posted: Box<[CachePadded<AtomicU64>]>,
    pub(crate) aggregated: Box<[CachePadded<AtomicU64>]>,
    pub(crate) ack_host: Box<[CachePadded<AtomicU64>]>,
    pub(crate) ack_device: Box<[CachePadded<AtomicU64>]>,
    pub(crate) replied: Box<[CachePadded<AtomicU64>]>,
    // per slot: number of trips whose element has been consumed by its requester
    retired: Box<[AtomicU64]>,
    pub(crate) requests: Box<[AtomicU64]>,
    pub(crate) payloads: Box<[AtomicU64]>,
    pub(crate) rx_requests: Box<[AtomicU64]>,
    pub(crate) rx_payloads: Box<[AtomicU64]>,
    pub(crate) tx_replies: Box<[AtomicU64]>,
    pub(crate) rx_replies: Box<[AtomicU64]>,
}

impl ChannelState {
    fn new(kind: BlockKind, num_pes: usize, capacity: usize) -> ChannelState {
        let n = num_pes * capacity;
        let (payload_len, reply_len) = match kind {
            BlockKind::Get => (0, n),
            BlockKind::Put => (n, 0),
        };
        ChannelState {
            kind,
            capacity,
            num_pes,
            posted: counters(num_pes),
            aggregated: counters(num_pes),
            ack_host: counters(num_pes),
            ack_device: counters(num_pes),
            replied: counters(num_pes),
            retired: words(n),
            requests: words(n),
            payloads: words(payload_len),
            rx_requests: words(n),
            rx_payloads: words(payload_len),
            tx_replies: words(reply_len),
            rx_replies: words(reply_len),
        }
    }

    #[inline(always)]
    pub(crate) fn index(&self, pe: usize, slot: usize) -> usize {
        pe * self.capacity + slot
    }

    /// Enqueue one element request for `pe`.
    ///
    /// Claims the next sequence number, waits until the element that used the same slot
    /// one trip earlier has been retired, then writes the payload before the tagged
    /// offset so the aggregator never observes a half written request.
    pub(crate) fn post(&self, pe: usize, offset: usize, payload: u64) -> Seq {
        let seq = Seq(self.posted[pe].fetch_add(1, Ordering::SeqCst));
        let slot = seq.slot(self.capacity);
        let trip = seq.trip(self.capacity);
        let idx = self.index(pe, slot);
        spin_until("a free request ring slot", || {
            self.retired[idx].load(Ordering::SeqCst) == trip
        });
        if self.kind == BlockKind::Put {
            self.payloads[idx].store(payload, Ordering::SeqCst);
        }
        self.requests[idx].store(
            ElementWord::new(offset, seq, self.capacity).0,
            Ordering::SeqCst,
        );
        seq
    }

    /// Spin until the device visible acknowledgement counter covers `seq`.
    pub(crate) fn wait_ack(&self, pe: usize, seq: Seq) {
        if self.ack_device[pe].load(Ordering::SeqCst) > seq.0 {
            return;
        }
        let mut wait = SpinWait::new("a remote access acknowledgement");
        while self.ack_device[pe].load(Ordering::SeqCst) <= seq.0 {
            wait.spin();
        }
    }

    /// Read the reply value that landed for `seq` (only meaningful after [wait_ack][Self::wait_ack]).
    pub(crate) fn reply(&self, pe: usize, seq: Seq) -> u64 {
        fence(Ordering::SeqCst);
        self.rx_replies[self.index(pe, seq.slot(self.capacity))].load(Ordering::SeqCst)
    }

    /// Hand the slot of `seq` back to the poster one trip ahead.
    pub(crate) fn retire(&self, pe: usize, seq: Seq) {
        let idx = self.index(pe, seq.slot(self.capacity));
        self.retired[idx].store(seq.trip(self.capacity) + 1, Ordering::SeqCst);
    }

    pub(crate) fn pending(&self, pe: usize) -> u64 {
        self.posted[pe].load(Ordering::SeqCst) - self.aggregated[pe].load(Ordering::SeqCst)
    }

    pub(crate) fn counters(&self, pe: usize) -> ChannelCounters {
        ChannelCounters {
            posted: self.posted[pe].load(Ordering::SeqCst),
            aggregated: self.aggregated[pe].load(Ordering::SeqCst),
            ack_host: self.ack_host[pe].load(Ordering::SeqCst),
            ack_device: self.ack_device[pe].load(Ordering::SeqCst),
            replied: self.replied[pe].load(Ordering::SeqCst),
        }
    }

    /// true once every posted request to every peer has been acknowledged
    pub(crate) fn is_quiet(&self) -> bool {
        (0..self.num_pes).all(|pe| {
            self.ack_device[pe].load(Ordering::SeqCst) >= self.posted[pe].load(Ordering::SeqCst)
        })
    }
}

/// The shared, per pe structure holding every ring buffer, counter and flag used by
/// the compute threads, the device resident engines and the host progress agent.
pub(crate) struct WorkerState {
    pub(crate) my_pe: usize,
    pub(crate) num_pes: usize,
    pub(crate) queue_size: usize,
    pub(crate) get: ChannelState,
    pub(crate) put: ChannelState,
    /// outbound block fetch/put commands, device -> host
    pub(crate) tx_block_cmds: CmdQueue,
    /// inbound block commands from remote aggregators, host -> device
    pub(crate) rx_block_cmds: CmdQueue,
    /// outbound block replies, device -> host
    pub(crate) tx_reply_cmds: CmdQueue,
    pub(crate) request_done: AtomicU32,
    pub(crate) response_done: AtomicU32,
    pub(crate) fence_done: AtomicU32,
    pub(crate) packer_teams: usize,
    pub(crate) packers_done: AtomicUsize,
    pub(crate) aggregator: EngineStatus,
    pub(crate) packer: EngineStatus,
    pub(crate) segment: Arc<RemoteSegment>,
    pub(crate) direct_ptrs: Box<[Option<Arc<RemoteSegment>>]>,
    pub(crate) cache: RemoteCache,
}

impl WorkerState {
    pub(crate) fn new(
        my_pe: usize,
        num_pes: usize,
        queue_size: usize,
        cache_size: usize,
        packer_teams: usize,
        segment: Arc<RemoteSegment>,
        direct_ptrs: Vec<Option<Arc<RemoteSegment>>>,
    ) -> WorkerState {
        debug_assert_eq!(direct_ptrs.len(), num_pes);
        WorkerState {
            my_pe,
            num_pes,
            queue_size,
            get: ChannelState::new(BlockKind::Get, num_pes, queue_size),
            put: ChannelState::new(BlockKind::Put, num_pes, queue_size),
            tx_block_cmds: CmdQueue::new(queue_size),
            rx_block_cmds: CmdQueue::new(queue_size),
            tx_reply_cmds: CmdQueue::new(queue_size),
            request_done: AtomicU32::new(0),
            response_done: AtomicU32::new(0),
            fence_done: AtomicU32::new(0),
            packer_teams,
            packers_done: AtomicUsize::new(0),
            aggregator: EngineStatus::new(),
            packer: EngineStatus::new(),
            segment,
            direct_ptrs: direct_ptrs.into_boxed_slice(),
            cache: RemoteCache::new(cache_size),
        }
    }

    pub(crate) fn my_pe(&self) -> usize {
        self.my_pe
    }

    pub(crate) fn num_pes(&self) -> usize {
        self.num_pes
    }

    pub(crate) fn channel(&self, kind: BlockKind) -> &ChannelState {
        match kind {
            BlockKind::Get => &self.get,
            BlockKind::Put => &self.put,
        }
    }

    pub(crate) fn direct_ptr(&self, pe: usize) -> Option<&Arc<RemoteSegment>> {
        self.direct_ptrs[pe].as_ref()
    }

    pub(crate) fn get_counters(&self, pe: usize) -> ChannelCounters {
        self.get.counters(pe)
    }

    pub(crate) fn put_counters(&self, pe: usize) -> ChannelCounters {
        self.put.counters(pe)
    }

    /// number of block commands the aggregator has emitted so far
    pub(crate) fn block_commands_issued(&self) -> u64 {
        self.tx_block_cmds.issued()
    }

    pub(crate) fn aggregator_state(&self) -> EngineState {
        self.aggregator.get()
    }

    pub(crate) fn packer_state(&self) -> EngineState {
        self.packer.get()
    }

    pub(crate) fn is_quiet(&self) -> bool {
        self.get.is_quiet() && self.put.is_quiet()
    }

    /// Spin until every request this pe posted has been acknowledged.
    pub(crate) fn quiesce(&self) {
        spin_until("outstanding remote accesses to complete", || self.is_quiet());
        fence(Ordering::SeqCst);
    }

    pub(crate) fn raise_request_done(&self) {
        self.request_done.store(1, Ordering::SeqCst);
    }

    pub(crate) fn raise_response_done(&self) {
        self.response_done.store(1, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerState")
            .field("my_pe", &self.my_pe)
            .field("num_pes", &self.num_pes)
            .field("queue_size", &self.queue_size)
            .field("tx_block_cmds", &self.tx_block_cmds)
            .field("rx_block_cmds", &self.rx_block_cmds)
            .field("tx_reply_cmds", &self.tx_reply_cmds)
            .field("aggregator", &self.aggregator.get())
            .field("packer", &self.packer.get())
            .finish()
    }
}
