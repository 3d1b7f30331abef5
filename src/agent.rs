//! Host network-progress agent.
//!
//! One agent per pe moves everything that crosses pe boundaries: it forwards the block
//! commands the aggregator emits (request words, scatter payloads and the inbound
//! command itself) to the target pe, delivers packed replies plus their
//! acknowledgements back to the requester, and mirrors host side acknowledgement
//! counters into the device visible ones. It also drives the shutdown handshake
//! with the engines of its pe.

use crate::command::{BlockCmd, BlockKind};
use crate::lamellae::{Lamellae, LamellaeRDMA, Region};
use crate::worker_state::{EngineState, WorkerState};

use crossbeam::utils::Backoff;
use std::collections::VecDeque;
use std::sync::atomic::{fence, AtomicU8, Ordering};
use std::sync::Arc;

#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum AgentStatus {
    Active = 1,
    ShuttingDown = 2,
    Finished = 3,
}

/// Status cell shared between an agent and the world that owns it.
#[derive(Debug)]
pub(crate) struct AgentControl(AtomicU8);

impl AgentControl {
    pub(crate) fn new() -> Arc<AgentControl> {
        Arc::new(AgentControl(AtomicU8::new(AgentStatus::Active as u8)))
    }
    pub(crate) fn get(&self) -> AgentStatus {
        match self.0.load(Ordering::SeqCst) {
            1 => AgentStatus::Active,
            2 => AgentStatus::ShuttingDown,
            _ => AgentStatus::Finished,
        }
    }
    pub(crate) fn set(&self, status: AgentStatus) {
        self.0.store(status as u8, Ordering::SeqCst);
    }
}

pub(crate) trait ProgressAgent: Send {
    /// Service every queue once, returns the amount of work that was done.
    fn progress(&mut self) -> usize;
    fn status(&self) -> AgentStatus;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shutdown {
    Running,
    RequestDoneRaised,
    ResponseDoneRaised,
}

pub(crate) struct LocalAgent {
    state: Arc<WorkerState>,
    lamellae: Arc<Lamellae>,
    control: Arc<AgentControl>,
    // inbound commands a full peer queue refused, resent in order
    backlog: VecDeque<(usize, BlockCmd)>,
    shutdown: Shutdown,
    scratch: Vec<u64>,
}

impl LocalAgent {
    pub(crate) fn new(
        state: Arc<WorkerState>,
        lamellae: Arc<Lamellae>,
        control: Arc<AgentControl>,
    ) -> LocalAgent {
        LocalAgent {
            scratch: Vec::with_capacity(state.queue_size),
            state,
            lamellae,
            control,
            backlog: VecDeque::new(),
            shutdown: Shutdown::Running,
        }
    }

    fn copy_out(&mut self, words: &[std::sync::atomic::AtomicU64]) {
        self.scratch.clear();
        self.scratch
            .extend(words.iter().map(|w| w.load(Ordering::SeqCst)));
    }

    fn forward_block(&mut self, cmd: BlockCmd) {
        let state = self.state.clone();
        let channel = state.channel(cmd.kind);
        let src = channel.index(cmd.peer, cmd.window);
        let dst = state.my_pe * state.queue_size + cmd.window;
        self.copy_out(&channel.requests[src..src + cmd.count]);
        self.lamellae
            .put_words(cmd.peer, Region::RxRequest(cmd.kind), &self.scratch, dst);
        if cmd.kind == BlockKind::Put {
            self.copy_out(&channel.payloads[src..src + cmd.count]);
            self.lamellae
                .put_words(cmd.peer, Region::RxPayload(cmd.kind), &self.scratch, dst);
        }
        fence(Ordering::SeqCst);
        let inbound = BlockCmd {
            peer: state.my_pe,
            ..cmd
        };
        if !self.backlog.is_empty() {
            self.backlog.push_back((cmd.peer, inbound));
        } else if let Err(inbound) = self.lamellae.post_block_cmd(cmd.peer, inbound) {
            tracing::trace!("pe {} inbound queue full, deferring {:?}", cmd.peer, inbound);
            self.backlog.push_back((cmd.peer, inbound));
        }
    }

    fn flush_backlog(&mut self) -> usize {
        let mut sent = 0;
        while let Some(&(pe, cmd)) = self.backlog.front() {
            if self.lamellae.post_block_cmd(pe, cmd).is_err() {
                break;
            }
            self.backlog.pop_front();
            sent += 1;
        }
        sent
    }

    fn deliver_reply(&mut self, cmd: BlockCmd) {
        let state = self.state.clone();
        let requester = cmd.peer;
        if cmd.kind == BlockKind::Get {
            let src = state.get.index(requester, cmd.window);
            let dst = state.my_pe * state.queue_size + cmd.window;
            self.copy_out(&state.get.tx_replies[src..src + cmd.count]);
            self.lamellae
                .put_words(requester, Region::RxReply(cmd.kind), &self.scratch, dst);
            fence(Ordering::SeqCst);
        }
        self.lamellae
            .add_ack(requester, cmd.kind, state.my_pe, cmd.count);
    }

    fn mirror_acks(&self) -> usize {
        let mut moved = 0;
        for channel in [&self.state.get, &self.state.put] {
            for pe in 0..self.state.num_pes {
                let host = channel.ack_host[pe].load(Ordering::SeqCst);
                if channel.ack_device[pe].load(Ordering::SeqCst) < host {
                    channel.ack_device[pe].store(host, Ordering::SeqCst);
                    moved += 1;
                }
            }
        }
        moved
    }

    fn drive_shutdown(&mut self) {
        let state = &self.state;
        match self.shutdown {
            Shutdown::Running => {
                state.raise_request_done();
                self.shutdown = Shutdown::RequestDoneRaised;
                tracing::debug!("pe {} agent raised request_done", state.my_pe);
            }
            Shutdown::RequestDoneRaised => {
                if state.aggregator_state() == EngineState::Done {
                    state.raise_response_done();
                    self.shutdown = Shutdown::ResponseDoneRaised;
                    tracing::debug!("pe {} agent raised response_done", state.my_pe);
                }
            }
            Shutdown::ResponseDoneRaised => {
                if state.fence_done.load(Ordering::SeqCst) != 0
                    && state.tx_block_cmds.is_empty()
                    && state.tx_reply_cmds.is_empty()
                    && self.backlog.is_empty()
                {
                    self.control.set(AgentStatus::Finished);
                    tracing::debug!("pe {} agent finished", state.my_pe);
                }
            }
        }
    }
}

impl ProgressAgent for LocalAgent {
    fn progress(&mut self) -> usize {
        let mut work = self.flush_backlog();
        while let Some(cmd) = self.state.tx_block_cmds.try_pop() {
            self.forward_block(cmd);
            work += 1;
        }
        while let Some(cmd) = self.state.tx_reply_cmds.try_pop() {
            self.deliver_reply(cmd);
            work += 1;
        }
        work += self.mirror_acks();
        if self.control.get() == AgentStatus::ShuttingDown {
            self.drive_shutdown();
        }
        work
    }

    fn status(&self) -> AgentStatus {
        self.control.get()
    }
}

/// Drive `agent` until it reports [AgentStatus::Finished].
pub(crate) fn run_agent(mut agent: impl ProgressAgent) {
    let backoff = Backoff::new();
    while agent.status() != AgentStatus::Finished {
        if agent.progress() == 0 {
            backoff.snooze();
        } else {
            backoff.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{aggregate_pass, aggregate_requests, shared_words};
    use crate::lamellae::local_lamellae::tests::test_lamellae;
    use crate::lamellae::LamellaeComm;
    use crate::pack::{pack_pass, pack_responses, SHARED_WORDS};
    use crate::team::{Team, TeamMember};

    fn agents(lamellae: &Arc<Lamellae>) -> Vec<LocalAgent> {
        (0..lamellae.num_pes())
            .map(|pe| {
                LocalAgent::new(
                    lamellae.local_state(pe).unwrap().clone(),
                    lamellae.clone(),
                    AgentControl::new(),
                )
            })
            .collect()
    }

    fn solo(name: &'static str, words: usize) -> TeamMember {
        Team::new(name, 1, words).members().remove(0)
    }

    #[test]
    fn gather_round_trip_by_hand() {
        let lamellae = test_lamellae(2, 4);
        let mut agents = agents(&lamellae);
        let requester = lamellae.local_state(0).unwrap().clone();
        let owner = lamellae.local_state(1).unwrap().clone();
        owner.segment.store(5, 42);

        let seq = requester.get.post(1, 5, 0);
        aggregate_pass(&requester, &solo("aggregator", shared_words(2)));
        assert_eq!(agents[0].progress(), 1);
        assert_eq!(pack_pass(&owner, &solo("packer", SHARED_WORDS)).packed.map(|c| c.count), Some(1));
        assert!(agents[1].progress() >= 1);
        assert_eq!(requester.get.ack_host[1].load(Ordering::SeqCst), 1);
        assert_eq!(requester.get.ack_device[1].load(Ordering::SeqCst), 0);
        agents[0].progress();
        requester.get.wait_ack(1, seq);
        assert_eq!(requester.get.reply(1, seq), 42);
    }

    #[test]
    fn scatter_round_trip_by_hand() {
        let lamellae = test_lamellae(2, 4);
        let mut agents = agents(&lamellae);
        let requester = lamellae.local_state(1).unwrap().clone();
        let owner = lamellae.local_state(0).unwrap().clone();

        requester.put.post(0, 3, 7);
        requester.put.post(0, 4, 8);
        aggregate_pass(&requester, &solo("aggregator", shared_words(2)));
        agents[1].progress();
        pack_pass(&owner, &solo("packer", SHARED_WORDS));
        agents[0].progress();
        agents[1].progress();
        assert_eq!(owner.segment.load(3), 7);
        assert_eq!(owner.segment.load(4), 8);
        assert_eq!(requester.put.ack_device[0].load(Ordering::SeqCst), 2);
        assert!(requester.is_quiet());
    }

    #[test]
    fn backlog_keeps_order_when_peer_queue_is_full() {
        let lamellae = test_lamellae(2, 1);
        let mut agents = agents(&lamellae);
        let requester = lamellae.local_state(0).unwrap().clone();
        let owner = lamellae.local_state(1).unwrap().clone();
        let member = solo("aggregator", shared_words(2));

        // fill the owner's single slot inbound queue with a scatter block
        requester.put.post(1, 0, 1);
        aggregate_pass(&requester, &member);
        agents[0].progress();
        // the gather block has to wait in the backlog
        requester.get.post(1, 0, 0);
        aggregate_pass(&requester, &member);
        agents[0].progress();
        assert_eq!(agents[0].backlog.len(), 1);

        let packer = solo("packer", SHARED_WORDS);
        assert_eq!(pack_pass(&owner, &packer).packed.map(|c| c.kind), Some(BlockKind::Put));
        agents[1].progress();
        agents[0].progress();
        assert!(agents[0].backlog.is_empty());
        assert_eq!(pack_pass(&owner, &packer).packed.map(|c| c.kind), Some(BlockKind::Get));
    }

    #[test]
    fn shutdown_handshake() {
        let lamellae = test_lamellae(1, 4);
        let state = lamellae.local_state(0).unwrap().clone();
        let engines = [
            {
                let state = state.clone();
                std::thread::spawn(move || {
                    aggregate_requests(&state, solo("aggregator", shared_words(1)))
                })
            },
            {
                let state = state.clone();
                std::thread::spawn(move || pack_responses(&state, solo("packer", SHARED_WORDS)))
            },
        ];
        let control = AgentControl::new();
        let agent = LocalAgent::new(state.clone(), lamellae.clone(), control.clone());
        control.set(AgentStatus::ShuttingDown);
        run_agent(agent);
        for engine in engines {
            engine.join().unwrap();
        }
        assert_eq!(control.get(), AgentStatus::Finished);
        assert_eq!(state.aggregator_state(), EngineState::Done);
        assert_eq!(state.packer_state(), EngineState::Done);
        assert_eq!(state.fence_done.load(Ordering::SeqCst), 1);
    }
}
