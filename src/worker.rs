use crate::command::BlockKind;
use crate::lamellae::{Lamellae, LamellaeComm};
use crate::remote_ops::RemoteElement;
use crate::rma_world::WorldInner;
use crate::scalar::RemoteScalar;
use crate::worker_state::{ChannelCounters, EngineState, WorkerState};

use std::marker::PhantomData;
use std::sync::Arc;

/// The per pe entry point for element granular remote access.
///
/// A worker is cheap to clone and may be shared by any number of threads; every call
/// blocks (busy-polls) until its access has completed. Keeps the world alive: the
/// engines and agents of the job are shut down once the last world or worker handle drops.
///
/// # Examples
///```
/// use lamellar_rma::RmaWorldBuilder;
///
/// let world = RmaWorldBuilder::new().with_num_pes(3).build::<f32>().unwrap();
/// let worker = world.worker(0);
/// worker.put(2, 5, 4.25);
/// assert_eq!(worker.get(2, 5), 4.25);
/// worker.fence();
///```
pub struct RmaWorker<T: RemoteScalar> {
    world: Arc<WorldInner>,
    state: Arc<WorkerState>,
    _ty: PhantomData<T>,
}

impl<T: RemoteScalar> RmaWorker<T> {
    pub(crate) fn new(world: Arc<WorldInner>, pe: usize) -> RmaWorker<T> {
        let state = world.state(pe).clone();
        RmaWorker {
            world,
            state,
            _ty: PhantomData,
        }
    }

    fn lamellae(&self) -> &Arc<Lamellae> {
        self.world.lamellae()
    }

    pub fn my_pe(&self) -> usize {
        self.state.my_pe()
    }

    pub fn num_pes(&self) -> usize {
        self.state.num_pes()
    }

    /// number of elements in every pe's segment
    pub fn segment_len(&self) -> usize {
        self.lamellae().segment_len()
    }

    fn check(&self, pe: usize, offset: usize) {
        assert!(
            pe < self.num_pes(),
            "pe {} out of range, the job has {} pes",
            pe,
            self.num_pes()
        );
        assert!(
            offset < self.segment_len(),
            "offset {} out of range, segments hold {} elements",
            offset,
            self.segment_len()
        );
    }

    /// Post one gather request and wait for its value.
    fn gather(&self, pe: usize, offset: usize) -> u64 {
        let channel = self.state.channel(BlockKind::Get);
        let seq = channel.post(pe, offset, 0);
        channel.wait_ack(pe, seq);
        let bits = channel.reply(pe, seq);
        channel.retire(pe, seq);
        bits
    }

    /// Read element `offset` of `pe`.
    ///
    /// Served from the mapped segment when `pe` is directly accessible, otherwise from
    /// the remote access cache, otherwise by a round trip through the aggregation path
    /// whose result is cached until the next [fence][RmaWorker::fence].
    pub fn get(&self, pe: usize, offset: usize) -> T {
        self.check(pe, offset);
        if let Some(segment) = self.state.direct_ptr(pe) {
            return T::from_bits(segment.load(offset));
        }
        if let Some(bits) = self.state.cache.lookup(pe, offset) {
            return T::from_bits(bits);
        }
        let epoch = self.state.cache.epoch();
        let bits = self.gather(pe, offset);
        self.state.cache.insert_with_epoch(epoch, pe, offset, bits);
        T::from_bits(bits)
    }

    /// Read element `offset` of `pe` through the aggregation path, bypassing both the
    /// cache and any direct mapping.
    pub fn request(&self, pe: usize, offset: usize) -> T {
        self.check(pe, offset);
        T::from_bits(self.gather(pe, offset))
    }

    /// Write `val` into element `offset` of `pe`, returns once the owner has applied it.
    ///
    /// The value is also written into the remote access cache of this pe.
    pub fn put(&self, pe: usize, offset: usize, val: T) {
        self.check(pe, offset);
        let bits = val.to_bits();
        if let Some(segment) = self.state.direct_ptr(pe) {
            segment.store(offset, bits);
        } else {
            let channel = self.state.channel(BlockKind::Put);
            let seq = channel.post(pe, offset, bits);
            channel.wait_ack(pe, seq);
            channel.retire(pe, seq);
        }
        self.state.cache.insert(pe, offset, bits);
    }

    /// Wait until every access posted by this pe has been acknowledged, then drop every
    /// cached value.
    #[tracing::instrument(skip_all)]
    pub fn fence(&self) {
        self.state.quiesce();
        self.state.cache.invalidate_all();
    }

    /// A handle for one-sided atomic operations on element `offset` of `pe`.
    pub fn element(&self, pe: usize, offset: usize) -> RemoteElement<T> {
        self.check(pe, offset);
        RemoteElement::new(self.lamellae().clone(), self.state.clone(), pe, offset)
    }

    /// Counters of the gather path between this pe and `pe`.
    pub fn get_counters(&self, pe: usize) -> ChannelCounters {
        self.state.get_counters(pe)
    }

    /// Counters of the scatter path between this pe and `pe`.
    pub fn put_counters(&self, pe: usize) -> ChannelCounters {
        self.state.put_counters(pe)
    }

    pub fn block_commands_issued(&self) -> u64 {
        self.state.block_commands_issued()
    }

    pub fn aggregator_state(&self) -> EngineState {
        self.state.aggregator_state()
    }

    pub fn packer_state(&self) -> EngineState {
        self.state.packer_state()
    }
}

impl<T: RemoteScalar> Clone for RmaWorker<T> {
    fn clone(&self) -> Self {
        RmaWorker {
            world: self.world.clone(),
            state: self.state.clone(),
            _ty: PhantomData,
        }
    }
}

impl<T: RemoteScalar> std::fmt::Debug for RmaWorker<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "RmaWorker<{:?}> {{ pe: {}, num_pes: {} }}",
            T::KIND,
            self.my_pe(),
            self.num_pes()
        )
    }
}
