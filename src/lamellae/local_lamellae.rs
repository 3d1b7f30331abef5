pub(crate) mod atomic;
pub(crate) mod rdma;

use super::{Backend, Lamellae, LamellaeComm, LamellaeInit};
use crate::segment::RemoteSegment;
use crate::worker_state::WorkerState;

use std::sync::Arc;

pub(crate) struct LocalBuilder {
    num_pes: usize,
    segments: Vec<Arc<RemoteSegment>>,
}

impl LocalBuilder {
    pub(crate) fn new(num_pes: usize, segment_len: usize) -> LocalBuilder {
        LocalBuilder {
            num_pes,
            segments: (0..num_pes)
                .map(|_| Arc::new(RemoteSegment::new(segment_len)))
                .collect(),
        }
    }
}

impl LamellaeInit for LocalBuilder {
    fn init_fabric(&mut self) -> usize {
        self.num_pes
    }
    // every segment of the job lives in this process
    fn mapped_segment(&self, pe: usize) -> Option<Arc<RemoteSegment>> {
        self.segments.get(pe).cloned()
    }
    fn init_lamellae(&mut self, states: Vec<Arc<WorkerState>>) -> Arc<Lamellae> {
        debug_assert_eq!(states.len(), self.num_pes);
        Arc::new(Lamellae::Local(Local {
            segments: self.segments.clone(),
            states,
        }))
    }
}

/// All pes of the job hosted in a single process; one-sided operations are atomic
/// word copies between the worker states of the pes.
pub(crate) struct Local {
    segments: Vec<Arc<RemoteSegment>>,
    states: Vec<Arc<WorkerState>>,
}

impl std::fmt::Debug for Local {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Local {{ num_pes: {} }}", self.states.len())
    }
}

impl Local {
    fn state(&self, pe: usize) -> &WorkerState {
        &self.states[pe]
    }

    fn segment(&self, pe: usize) -> &RemoteSegment {
        &self.segments[pe]
    }
}

impl LamellaeComm for Local {
    fn num_pes(&self) -> usize {
        self.states.len()
    }
    fn backend(&self) -> Backend {
        Backend::Local
    }
    fn segment_len(&self) -> usize {
        self.segments.first().map_or(0, |s| s.len())
    }
    fn local_state(&self, pe: usize) -> Option<&Arc<WorkerState>> {
        self.states.get(pe)
    }
}
