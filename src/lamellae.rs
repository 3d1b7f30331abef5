use crate::command::{BlockCmd, BlockKind};
use crate::config;
use crate::error::{RmaError, RmaResult};
use crate::segment::RemoteSegment;
use crate::worker_state::WorkerState;

use enum_dispatch::enum_dispatch;
use std::sync::Arc;

pub(crate) mod local_lamellae;
use local_lamellae::{Local, LocalBuilder};

/// The list of available lamellae backends, used to specify how remote accesses are transfered between PEs
#[derive(
    serde::Serialize, serde::Deserialize, Debug, PartialEq, Eq, Ord, PartialOrd, Hash, Clone, Copy,
)]
pub enum Backend {
    /// The Local backend -- every pe of the job lives in this process, transfers are memory copies
    Local,
}

impl Backend {
    pub fn from_name(name: &str) -> RmaResult<Backend> {
        match name {
            "local" => Ok(Backend::Local),
            other => Err(RmaError::UnknownBackend(other.to_owned())),
        }
    }
}

impl Default for Backend {
    fn default() -> Self {
        match Backend::from_name(config().backend.as_str()) {
            Ok(backend) => backend,
            Err(_) => Backend::Local,
        }
    }
}

/// The network registered regions of a peer that one-sided transfers may target.
///
/// Every region is `num_pes * queue_size` words, the part written on behalf of pe `r`
/// starts at `r * queue_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Region {
    /// inbound request window (tagged offsets)
    RxRequest(BlockKind),
    /// inbound scatter values, beside the request window
    RxPayload(BlockKind),
    /// inbound reply values
    RxReply(BlockKind),
}

#[enum_dispatch(LamellaeInit)]
pub(crate) enum LamellaeBuilder {
    LocalBuilder,
}

#[enum_dispatch]
pub(crate) trait LamellaeInit {
    /// bring up the fabric, returns the number of pes in the job
    fn init_fabric(&mut self) -> usize;
    /// the segment of `pe` if it is mapped into this address space
    fn mapped_segment(&self, pe: usize) -> Option<Arc<RemoteSegment>>;
    fn init_lamellae(&mut self, states: Vec<Arc<WorkerState>>) -> Arc<Lamellae>;
}

#[enum_dispatch(LamellaeComm, LamellaeRDMA, LamellaeAtomic)]
#[derive(Debug)]
pub(crate) enum Lamellae {
    Local,
}

#[enum_dispatch]
pub(crate) trait LamellaeComm: LamellaeRDMA + LamellaeAtomic {
    fn num_pes(&self) -> usize;
    fn backend(&self) -> Backend;
    /// words in every segment of the job
    fn segment_len(&self) -> usize;
    /// the worker state of a pe hosted by this process
    fn local_state(&self, pe: usize) -> Option<&Arc<WorkerState>>;
}

#[enum_dispatch]
pub(crate) trait LamellaeRDMA: Send + Sync {
    /// one-sided write of `src` into `region` of `pe` starting at word `dst`
    fn put_words(&self, pe: usize, region: Region, src: &[u64], dst: usize);
    /// hand an inbound block command to `pe`, gives it back if the peer's queue is full
    fn post_block_cmd(&self, pe: usize, cmd: BlockCmd) -> Result<(), BlockCmd>;
    /// remote add on `ack_host[from]` of `pe`
    fn add_ack(&self, pe: usize, kind: BlockKind, from: usize, count: usize);
}

#[enum_dispatch]
pub(crate) trait LamellaeAtomic: Send + Sync {
    fn atomic_load(&self, pe: usize, offset: usize) -> u64;
    fn atomic_store(&self, pe: usize, offset: usize, val: u64);
    fn atomic_swap(&self, pe: usize, offset: usize, val: u64) -> u64;
    fn atomic_compare_exchange(
        &self,
        pe: usize,
        offset: usize,
        current: u64,
        new: u64,
    ) -> Result<u64, u64>;
}

pub(crate) fn create_lamellae(
    backend: Backend,
    num_pes: usize,
    segment_len: usize,
) -> LamellaeBuilder {
    match backend {
        Backend::Local => LamellaeBuilder::LocalBuilder(LocalBuilder::new(num_pes, segment_len)),
    }
}
