//! Request Aggregation Engine.
//!
//! Turns runs of individually posted element requests into block commands for the
//! host agent. One pass visits every peer of both access paths round robin:
//!
//! 1. the leader snapshots `posted - aggregated` per (path, peer), capped at the next
//!    wraparound so a block always covers a contiguous window of ring slots
//! 2. the whole team tag-waits the pending slots (strided by rank) and re-stores each word
//! 3. fence + barrier, then the leader publishes one block command per non-empty window
//!    and advances `aggregated` by exactly the count it published
//!
//! Requests posted after the snapshot are left for the next pass.

use crate::command::{BlockCmd, BlockKind, ElementWord};
use crate::sequence::Seq;
use crate::team::TeamMember;
use crate::utils::SpinWait;
use crate::worker_state::{EngineState, WorkerState};

use crossbeam::utils::Backoff;
use std::sync::atomic::{fence, Ordering};

const STOP: usize = 0;
const KINDS: [BlockKind; 2] = [BlockKind::Get, BlockKind::Put];

fn pending_idx(state: &WorkerState, kind: BlockKind, pe: usize) -> usize {
    1 + kind as usize * state.num_pes + pe
}

/// Number of shared team words an aggregation team needs.
pub(crate) fn shared_words(num_pes: usize) -> usize {
    1 + KINDS.len() * num_pes
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PassOutcome {
    pub(crate) blocks: usize,
    /// the host had raised `request_done` before this pass took its snapshot
    pub(crate) stop: bool,
}

/// One cooperative aggregation pass, executed by every member of `member`'s team.
pub(crate) fn aggregate_pass(state: &WorkerState, member: &TeamMember) -> PassOutcome {
    let cap = state.queue_size;
    if member.is_leader() {
        member.share(STOP, state.request_done.load(Ordering::SeqCst) as u64);
        for kind in KINDS {
            let channel = state.channel(kind);
            for pe in 0..state.num_pes {
                let pending = channel.pending(pe);
                let head = Seq(channel.aggregated[pe].load(Ordering::SeqCst));
                member.share(
                    pending_idx(state, kind, pe),
                    pending.min(head.until_wrap(cap)),
                );
            }
        }
    }
    member.barrier();

    let stop = member.shared(STOP) != 0;
    let mut blocks = 0;
    for kind in KINDS {
        let channel = state.channel(kind);
        for pe in 0..state.num_pes {
            let count = member.shared(pending_idx(state, kind, pe)) as usize;
            if count == 0 {
                continue;
            }
            blocks += 1;
            let head = channel.aggregated[pe].load(Ordering::SeqCst);
            for i in member.stride(count) {
                let seq = Seq(head + i as u64);
                let idx = channel.index(pe, seq.slot(cap));
                let mut word = ElementWord(channel.requests[idx].load(Ordering::SeqCst));
                if !word.is_ready_for(seq, cap) {
                    let mut wait = SpinWait::new("a posted request to be written");
                    while !word.is_ready_for(seq, cap) {
                        wait.spin();
                        word = ElementWord(channel.requests[idx].load(Ordering::SeqCst));
                    }
                }
                // peer visibility barrier for mapped views of the ring
                channel.requests[idx].store(word.0, Ordering::SeqCst);
            }
        }
    }
    fence(Ordering::SeqCst);
    member.barrier();

    if member.is_leader() {
        for kind in KINDS {
            let channel = state.channel(kind);
            for pe in 0..state.num_pes {
                let count = member.shared(pending_idx(state, kind, pe)) as usize;
                if count == 0 {
                    continue;
                }
                let head = Seq(channel.aggregated[pe].load(Ordering::SeqCst));
                let cmd = BlockCmd {
                    kind,
                    count,
                    peer: pe,
                    window: head.slot(cap),
                };
                let seq = state.tx_block_cmds.push(cmd);
                channel.aggregated[pe].fetch_add(count as u64, Ordering::SeqCst);
                tracing::trace!("pe {} emitted {:?} as block {}", state.my_pe, cmd, seq);
            }
        }
    }
    PassOutcome { blocks, stop }
}

/// The long lived aggregation loop; returns once the host has raised `request_done`
/// and everything posted before that has been aggregated.
pub(crate) fn aggregate_requests(state: &WorkerState, member: TeamMember) {
    if member.is_leader() {
        state.aggregator.set(EngineState::Running);
        tracing::debug!(
            "pe {} {} team of {} started",
            state.my_pe,
            member.name(),
            member.size()
        );
    }
    let idle = Backoff::new();
    loop {
        let outcome = aggregate_pass(state, &member);
        if outcome.stop {
            if member.is_leader() && state.aggregator_state() == EngineState::Running {
                state.aggregator.set(EngineState::Draining);
            }
            // a stopping pass may still have been cut short at a wraparound
            if outcome.blocks == 0 {
                break;
            }
        } else if outcome.blocks == 0 {
            idle.snooze();
        } else {
            idle.reset();
        }
    }
    member.barrier();
    if member.is_leader() {
        state.request_done.store(0, Ordering::SeqCst);
        state.aggregator.set(EngineState::Done);
        tracing::debug!("pe {} {} team done", state.my_pe, member.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::team::Team;
    use crate::worker_state::tests::test_state;
    use std::sync::Arc;

    fn solo(state: &WorkerState) -> TeamMember {
        Team::new("aggregator", 1, shared_words(state.num_pes))
            .members()
            .remove(0)
    }

    fn retire_block(state: &WorkerState, cmd: &BlockCmd, base: u64) {
        for i in 0..cmd.count as u64 {
            state.channel(cmd.kind).retire(cmd.peer, Seq(base + i));
        }
    }

    #[test]
    fn ten_requests_capacity_four() {
        let state = test_state(0, 2, 4);
        let member = solo(&state);
        let mut counts = vec![];
        let mut offset = 0;
        for batch in [4, 4, 2] {
            let base = state.get.aggregated[1].load(Ordering::SeqCst);
            for _ in 0..batch {
                state.get.post(1, offset, 0);
                offset += 1;
            }
            let outcome = aggregate_pass(&state, &member);
            assert_eq!(outcome, PassOutcome { blocks: 1, stop: false });
            let cmd = state.tx_block_cmds.try_pop().unwrap();
            assert_eq!(cmd.kind, BlockKind::Get);
            assert_eq!(cmd.peer, 1);
            assert_eq!(cmd.window, 0);
            counts.push(cmd.count);
            retire_block(&state, &cmd, base);
        }
        assert_eq!(counts, vec![4, 4, 2]);
        assert_eq!(state.get.aggregated[1].load(Ordering::SeqCst), 10);
        assert_eq!(state.get.posted[1].load(Ordering::SeqCst), 10);
        assert_eq!(state.block_commands_issued(), 3);
    }

    #[test]
    fn block_split_at_wraparound() {
        let state = test_state(0, 2, 4);
        let member = solo(&state);
        for offset in 0..3 {
            state.put.post(0, offset, offset as u64);
        }
        aggregate_pass(&state, &member);
        let first = state.tx_block_cmds.try_pop().unwrap();
        assert_eq!((first.count, first.window), (3, 0));
        retire_block(&state, &first, 0);

        for offset in 3..6 {
            state.put.post(0, offset, offset as u64);
        }
        aggregate_pass(&state, &member);
        let second = state.tx_block_cmds.try_pop().unwrap();
        assert_eq!((second.kind, second.count, second.window), (BlockKind::Put, 1, 3));
        aggregate_pass(&state, &member);
        let third = state.tx_block_cmds.try_pop().unwrap();
        assert_eq!((third.count, third.window), (2, 0));
        assert_eq!(state.put.aggregated[0].load(Ordering::SeqCst), 6);
    }

    #[test]
    fn stop_drains_requests_past_the_wraparound() {
        let state = test_state(0, 2, 4);
        for offset in 0..2 {
            state.get.post(1, offset, 0);
        }
        aggregate_pass(&state, &solo(&state));
        let first = state.tx_block_cmds.try_pop().unwrap();
        retire_block(&state, &first, 0);
        // seq 2..5 straddle the end of the ring
        for offset in 2..6 {
            state.get.post(1, offset, 0);
        }
        state.raise_request_done();
        aggregate_requests(&state, solo(&state));

        assert_eq!(state.get.aggregated[1].load(Ordering::SeqCst), 6);
        assert_eq!(state.get.posted[1].load(Ordering::SeqCst), 6);
        let rest: Vec<(usize, usize)> = std::iter::from_fn(|| state.tx_block_cmds.try_pop())
            .map(|cmd| (cmd.window, cmd.count))
            .collect();
        assert_eq!(rest, vec![(2, 2), (0, 2)]);
        assert_eq!(state.aggregator_state(), EngineState::Done);
        assert_eq!(state.request_done.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn replayed_slot_reads_the_same_word() {
        let state = test_state(0, 2, 8);
        let seq = state.get.post(1, 37, 0);
        let idx = state.get.index(1, seq.slot(8));
        let first = ElementWord(state.get.requests[idx].load(Ordering::SeqCst));
        let again = ElementWord(state.get.requests[idx].load(Ordering::SeqCst));
        assert_eq!(first, again);
        assert!(first.is_ready_for(seq, 8));

        // the aggregation pass re-stores every word it waited on
        aggregate_pass(&state, &solo(&state));
        let replayed = ElementWord(state.get.requests[idx].load(Ordering::SeqCst));
        assert_eq!(replayed, first);
        assert!(replayed.is_ready_for(seq, 8));
        assert_eq!(replayed.offset(), 37);
    }

    #[test]
    fn idle_pass_emits_nothing() {
        let state = test_state(1, 3, 8);
        let member = solo(&state);
        assert_eq!(aggregate_pass(&state, &member).blocks, 0);
        assert!(state.tx_block_cmds.is_empty());
    }

    #[test]
    fn team_aggregates_everything_before_stopping() {
        let state = Arc::new(test_state(0, 2, 8));
        let team = Team::new("aggregator", 3, shared_words(2));
        let engines: Vec<_> = team
            .members()
            .into_iter()
            .map(|member| {
                let state = state.clone();
                std::thread::spawn(move || aggregate_requests(&state, member))
            })
            .collect();
        let poster = {
            let state = state.clone();
            std::thread::spawn(move || {
                for offset in 0..100 {
                    state.get.post(offset % 2, offset, 0);
                }
            })
        };
        // stand in for the host: consume block commands and free their slots
        let mut bases = [0u64; 2];
        let mut blocks = 0;
        while bases.iter().sum::<u64>() < 100 {
            if let Some(cmd) = state.tx_block_cmds.try_pop() {
                assert!(cmd.count <= 8);
                assert_eq!(cmd.window as u64, bases[cmd.peer] % 8);
                retire_block(&state, &cmd, bases[cmd.peer]);
                bases[cmd.peer] += cmd.count as u64;
                blocks += 1;
            }
        }
        poster.join().unwrap();
        state.raise_request_done();
        for engine in engines {
            engine.join().unwrap();
        }
        assert!(blocks >= 2 * 50 / 8);
        for pe in 0..2 {
            assert_eq!(state.get.aggregated[pe].load(Ordering::SeqCst), 50);
        }
        assert_eq!(state.aggregator_state(), EngineState::Done);
        assert_eq!(state.request_done.load(Ordering::SeqCst), 0);
    }
}
