use crate::agent::{run_agent, AgentControl, AgentStatus, LocalAgent};
use crate::aggregate::{self, aggregate_requests};
use crate::command::{MAX_PES, MAX_QUEUE_SIZE, MAX_SEGMENT_LEN};
use crate::config;
use crate::error::{RmaError, RmaResult};
use crate::lamellae::{create_lamellae, Backend, Lamellae, LamellaeComm, LamellaeInit};
use crate::pack::{self, pack_responses};
use crate::scalar::RemoteScalar;
use crate::team::Team;
use crate::worker::RmaWorker;
use crate::worker_state::WorkerState;

use anyhow::Context;
use parking_lot::Mutex;
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Everything a running job owns; finalized when the last world or worker handle drops.
pub(crate) struct WorldInner {
    lamellae: Arc<Lamellae>,
    states: Vec<Arc<WorkerState>>,
    agents: Vec<Arc<AgentControl>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl WorldInner {
    pub(crate) fn state(&self, pe: usize) -> &Arc<WorkerState> {
        &self.states[pe]
    }

    pub(crate) fn lamellae(&self) -> &Arc<Lamellae> {
        &self.lamellae
    }

    fn spawn(&self, name: String, f: impl FnOnce() + Send + 'static) -> anyhow::Result<()> {
        let handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(f)
            .with_context(|| format!("failed to spawn {}", name))?;
        self.threads.lock().push(handle);
        Ok(())
    }

    fn finalize(&self) {
        for state in &self.states {
            state.quiesce();
        }
        for agent in &self.agents {
            agent.set(AgentStatus::ShuttingDown);
        }
        let threads = std::mem::take(&mut *self.threads.lock());
        for handle in threads {
            let name = handle.thread().name().unwrap_or("unnamed").to_owned();
            if handle.join().is_err() {
                tracing::error!("{} panicked during shutdown", name);
            }
        }
        tracing::debug!("world of {} pes finalized", self.states.len());
    }
}

impl Drop for WorldInner {
    #[tracing::instrument(skip_all)]
    fn drop(&mut self) {
        self.finalize();
    }
}

/// All the pes of a job together with the engines and progress agents serving them.
///
/// # Examples
///```
/// use lamellar_rma::RmaWorldBuilder;
///
/// let world = RmaWorldBuilder::new().with_num_pes(4).build::<i64>().unwrap();
/// for worker in world.workers() {
///     let next = (worker.my_pe() + 1) % worker.num_pes();
///     worker.put(next, 0, worker.my_pe() as i64);
/// }
/// world.fence_all();
/// assert_eq!(world.worker(0).get(1, 0), 0);
///```
pub struct RmaWorld<T: RemoteScalar> {
    inner: Arc<WorldInner>,
    _ty: PhantomData<T>,
}

impl<T: RemoteScalar> RmaWorld<T> {
    pub fn num_pes(&self) -> usize {
        self.inner.states.len()
    }

    pub fn backend(&self) -> Backend {
        self.inner.lamellae.backend()
    }

    /// number of elements in every pe's segment
    pub fn segment_len(&self) -> usize {
        self.inner.lamellae.segment_len()
    }

    /// The worker of `pe`.
    pub fn worker(&self, pe: usize) -> RmaWorker<T> {
        assert!(
            pe < self.num_pes(),
            "pe {} out of range, the job has {} pes",
            pe,
            self.num_pes()
        );
        RmaWorker::new(self.inner.clone(), pe)
    }

    pub fn workers(&self) -> Vec<RmaWorker<T>> {
        (0..self.num_pes()).map(|pe| self.worker(pe)).collect()
    }

    /// [fence][RmaWorker::fence] every pe of the job.
    #[tracing::instrument(skip_all)]
    pub fn fence_all(&self) {
        for state in &self.inner.states {
            state.quiesce();
        }
        for state in &self.inner.states {
            state.cache.invalidate_all();
        }
    }
}

impl<T: RemoteScalar> Clone for RmaWorld<T> {
    fn clone(&self) -> Self {
        RmaWorld {
            inner: self.inner.clone(),
            _ty: PhantomData,
        }
    }
}

impl<T: RemoteScalar> std::fmt::Debug for RmaWorld<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "RmaWorld<{:?}> {{ num_pes: {}, backend: {:?} }}",
            T::KIND,
            self.num_pes(),
            self.backend()
        )
    }
}

/// An implementation of the Builder design pattern, used to construct an instance of an RmaWorld.
///
/// Every setting starts from the `LAMELLAR_RMA_*` environment configuration and can be
/// overridden programmatically.
///
/// # Examples
///
///```
/// use lamellar_rma::{Backend, RmaWorldBuilder};
///
/// let world = RmaWorldBuilder::new()
///                 .with_lamellae(Backend::Local)
///                 .with_num_pes(2)
///                 .with_queue_size(64)
///                 .build::<u32>()
///                 .unwrap();
///```
#[derive(Debug, Clone)]
pub struct RmaWorldBuilder {
    backend: RmaResult<Backend>,
    num_pes: usize,
    queue_size: usize,
    cache_size: usize,
    segment_len: usize,
    aggregator_threads: usize,
    packer_threads: usize,
    packer_teams: usize,
    direct_access: bool,
}

impl Default for RmaWorldBuilder {
    fn default() -> Self {
        RmaWorldBuilder::new()
    }
}

impl RmaWorldBuilder {
    /// Construct a new builder from the environment configuration
    #[tracing::instrument(skip_all)]
    pub fn new() -> RmaWorldBuilder {
        let config = config();
        RmaWorldBuilder {
            backend: Backend::from_name(&config.backend),
            num_pes: config.num_pes,
            queue_size: config.queue_size,
            cache_size: config.cache_size,
            segment_len: config.segment_len,
            aggregator_threads: config.aggregator_threads,
            packer_threads: config.packer_threads,
            packer_teams: config.packer_teams,
            direct_access: config.direct_access,
        }
    }

    /// Specify the lamellae backend to use for this execution
    pub fn with_lamellae(mut self, backend: Backend) -> RmaWorldBuilder {
        self.backend = Ok(backend);
        self
    }

    pub fn with_num_pes(mut self, num_pes: usize) -> RmaWorldBuilder {
        self.num_pes = num_pes;
        self
    }

    /// Depth of every request ring and block command queue
    pub fn with_queue_size(mut self, queue_size: usize) -> RmaWorldBuilder {
        self.queue_size = queue_size;
        self
    }

    pub fn with_cache_size(mut self, cache_size: usize) -> RmaWorldBuilder {
        self.cache_size = cache_size;
        self
    }

    pub fn with_segment_len(mut self, segment_len: usize) -> RmaWorldBuilder {
        self.segment_len = segment_len;
        self
    }

    pub fn with_aggregator_threads(mut self, threads: usize) -> RmaWorldBuilder {
        self.aggregator_threads = threads;
        self
    }

    pub fn with_packer_threads(mut self, threads: usize) -> RmaWorldBuilder {
        self.packer_threads = threads;
        self
    }

    pub fn with_packer_teams(mut self, teams: usize) -> RmaWorldBuilder {
        self.packer_teams = teams;
        self
    }

    /// Access mapped peer segments directly instead of through the aggregation path
    pub fn with_direct_access(mut self, direct_access: bool) -> RmaWorldBuilder {
        self.direct_access = direct_access;
        self
    }

    fn validate(&self) -> RmaResult<Backend> {
        if self.queue_size == 0 || self.queue_size > MAX_QUEUE_SIZE {
            return Err(RmaError::InvalidQueueSize(self.queue_size));
        }
        if self.num_pes == 0 || self.num_pes > MAX_PES {
            return Err(RmaError::InvalidNumPes(self.num_pes));
        }
        if self.segment_len == 0 || self.segment_len > MAX_SEGMENT_LEN {
            return Err(RmaError::InvalidSegmentLen(self.segment_len));
        }
        if self.cache_size == 0 {
            return Err(RmaError::InvalidCacheSize(self.cache_size));
        }
        if self.aggregator_threads == 0 {
            return Err(RmaError::EmptyTeam("aggregator"));
        }
        if self.packer_threads == 0 || self.packer_teams == 0 {
            return Err(RmaError::EmptyTeam("packer"));
        }
        self.backend.clone()
    }

    /// Instantiate an RmaWorld, spawning the engines and progress agent of every pe
    #[tracing::instrument(skip_all)]
    pub fn build<T: RemoteScalar>(self) -> anyhow::Result<RmaWorld<T>> {
        let backend = self.validate().context("invalid remote access configuration")?;
        let mut lamellae_builder = create_lamellae(backend, self.num_pes, self.segment_len);
        let num_pes = lamellae_builder.init_fabric();

        let mut states = Vec::with_capacity(num_pes);
        for pe in 0..num_pes {
            let segment = lamellae_builder
                .mapped_segment(pe)
                .with_context(|| format!("the segment of pe {} is not mapped", pe))?;
            let direct_ptrs = (0..num_pes)
                .map(|peer| {
                    if peer == pe || self.direct_access {
                        lamellae_builder.mapped_segment(peer)
                    } else {
                        None
                    }
                })
                .collect();
            states.push(Arc::new(WorkerState::new(
                pe,
                num_pes,
                self.queue_size,
                self.cache_size,
                self.packer_teams,
                segment,
                direct_ptrs,
            )));
        }
        let lamellae = lamellae_builder.init_lamellae(states.clone());

        let inner = Arc::new(WorldInner {
            lamellae: lamellae.clone(),
            agents: (0..num_pes).map(|_| AgentControl::new()).collect(),
            states,
            threads: Mutex::new(Vec::new()),
        });
        for (pe, state) in inner.states.iter().enumerate() {
            let agent = LocalAgent::new(state.clone(), lamellae.clone(), inner.agents[pe].clone());
            inner.spawn(format!("rma-agent-{}", pe), move || run_agent(agent))?;

            let team = Team::new(
                "aggregator",
                self.aggregator_threads,
                aggregate::shared_words(num_pes),
            );
            for member in team.members() {
                let state = state.clone();
                inner.spawn(
                    format!("rma-aggregator-{}-{}", pe, member.rank()),
                    move || aggregate_requests(&state, member),
                )?;
            }
            for t in 0..self.packer_teams {
                let team = Team::new("packer", self.packer_threads, pack::SHARED_WORDS);
                for member in team.members() {
                    let state = state.clone();
                    inner.spawn(
                        format!("rma-packer-{}-{}-{}", pe, t, member.rank()),
                        move || pack_responses(&state, member),
                    )?;
                }
            }
        }
        tracing::debug!(
            "world of {} pes up: queue size {}, {} aggregator threads, {}x{} packer threads",
            num_pes,
            self.queue_size,
            self.aggregator_threads,
            self.packer_teams,
            self.packer_threads
        );
        Ok(RmaWorld {
            inner,
            _ty: PhantomData,
        })
    }
}
