//! Reply Packing Engine.
//!
//! Serves block commands that remote aggregators addressed to this pe. A gather block
//! reads the requested local elements into the reply region reserved for the
//! requester; a scatter block applies the `(offset, value)` pairs to the local segment.
//! Either way a block-reply command is published once the work is globally visible.
//!
//! Several packing teams may run at once. Replies to one requester are still
//! published in window order: a leader waits until `replied[requester]` has reached
//! the window of its block before publishing.

use crate::command::{BlockCmd, BlockKind, ElementWord};
use crate::sequence::Seq;
use crate::team::TeamMember;
use crate::utils::spin_until;
use crate::worker_state::{EngineState, WorkerState};

use crossbeam::utils::Backoff;
use std::sync::atomic::{fence, Ordering};

const HAS_CMD: usize = 0;
const STOP: usize = 1;
const KIND: usize = 2;
const COUNT: usize = 3;
const PEER: usize = 4;
const WINDOW: usize = 5;

pub(crate) const SHARED_WORDS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PackOutcome {
    pub(crate) packed: Option<BlockCmd>,
    /// `response_done` was raised before this pass polled the inbound queue
    pub(crate) stop: bool,
}

fn share_cmd(member: &TeamMember, cmd: Option<BlockCmd>) {
    member.share(HAS_CMD, cmd.is_some() as u64);
    if let Some(cmd) = cmd {
        member.share(KIND, cmd.kind as u64);
        member.share(COUNT, cmd.count as u64);
        member.share(PEER, cmd.peer as u64);
        member.share(WINDOW, cmd.window as u64);
    }
}

fn shared_cmd(member: &TeamMember) -> Option<BlockCmd> {
    if member.shared(HAS_CMD) == 0 {
        return None;
    }
    Some(BlockCmd {
        kind: if member.shared(KIND) == BlockKind::Get as u64 {
            BlockKind::Get
        } else {
            BlockKind::Put
        },
        count: member.shared(COUNT) as usize,
        peer: member.shared(PEER) as usize,
        window: member.shared(WINDOW) as usize,
    })
}

/// Sequence number of the element in ring slot `slot` of a block not yet replied to.
///
/// Everything from `replied` up to `replied + capacity` is still outstanding, so the
/// first sequence at or after `replied` landing on `slot` is the one written there.
fn outstanding_seq(replied: u64, slot: usize, capacity: usize) -> Seq {
    let cap = capacity as u64;
    let n = replied - replied % cap + slot as u64;
    Seq(if n < replied { n + cap } else { n })
}

/// Claim at most one inbound block command and serve it cooperatively.
pub(crate) fn pack_pass(state: &WorkerState, member: &TeamMember) -> PackOutcome {
    if member.is_leader() {
        member.share(STOP, state.response_done.load(Ordering::SeqCst) as u64);
        share_cmd(member, state.rx_block_cmds.try_pop());
    }
    member.barrier();

    let stop = member.shared(STOP) != 0;
    let cmd = shared_cmd(member);
    if let Some(cmd) = cmd {
        let channel = state.channel(cmd.kind);
        for i in member.stride(cmd.count) {
            let idx = channel.index(cmd.peer, cmd.window + i);
            let word = ElementWord(channel.rx_requests[idx].load(Ordering::SeqCst));
            debug_assert!(
                word.is_ready_for(
                    outstanding_seq(
                        channel.replied[cmd.peer].load(Ordering::SeqCst),
                        cmd.window + i,
                        state.queue_size
                    ),
                    state.queue_size
                ),
                "stale request {:?} in window slot {} of pe {}",
                word,
                cmd.window + i,
                cmd.peer
            );
            let offset = word.offset();
            match cmd.kind {
                BlockKind::Get => {
                    channel.tx_replies[idx].store(state.segment.load(offset), Ordering::SeqCst)
                }
                BlockKind::Put => state
                    .segment
                    .store(offset, channel.rx_payloads[idx].load(Ordering::SeqCst)),
            }
        }
        fence(Ordering::SeqCst);
    }
    member.barrier();

    if let Some(cmd) = cmd {
        if member.is_leader() {
            let channel = state.channel(cmd.kind);
            let cap = state.queue_size as u64;
            spin_until("earlier replies to the same pe", || {
                channel.replied[cmd.peer].load(Ordering::SeqCst) % cap == cmd.window as u64
            });
            let seq = state.tx_reply_cmds.push(cmd);
            channel.replied[cmd.peer].fetch_add(cmd.count as u64, Ordering::SeqCst);
            fence(Ordering::SeqCst);
            tracing::trace!("pe {} packed {:?} as reply {}", state.my_pe, cmd, seq);
        }
    }
    PackOutcome { packed: cmd, stop }
}

/// The long lived packing loop of one team.
///
/// Exits once `response_done` is up and the inbound queue is empty. The last team to
/// exit clears `response_done` and raises `fence_done` for the host.
pub(crate) fn pack_responses(state: &WorkerState, member: TeamMember) {
    if member.is_leader() {
        state.packer.set(EngineState::Running);
        tracing::debug!(
            "pe {} {} team of {} started",
            state.my_pe,
            member.name(),
            member.size()
        );
    }
    let idle = Backoff::new();
    loop {
        let outcome = pack_pass(state, &member);
        match outcome.packed {
            Some(_) => idle.reset(),
            None if outcome.stop => break,
            None => idle.snooze(),
        }
    }
    member.barrier();
    if member.is_leader() {
        state.packer.set(EngineState::Draining);
        let done = state.packers_done.fetch_add(1, Ordering::SeqCst) + 1;
        if done == state.packer_teams {
            state.response_done.store(0, Ordering::SeqCst);
            state.packer.set(EngineState::Done);
            state.fence_done.store(1, Ordering::SeqCst);
            tracing::debug!("pe {} all packing teams done", state.my_pe);
        }
    }
}
