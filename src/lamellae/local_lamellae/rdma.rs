use super::Local;
use crate::command::{BlockCmd, BlockKind};
use crate::lamellae::{LamellaeRDMA, Region};
use crate::worker_state::WorkerState;

use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

fn region(state: &WorkerState, region: Region) -> &[AtomicU64] {
    match region {
        Region::RxRequest(kind) => &state.channel(kind).rx_requests[..],
        Region::RxPayload(kind) => &state.channel(kind).rx_payloads[..],
        Region::RxReply(kind) => &state.channel(kind).rx_replies[..],
    }
}

impl LamellaeRDMA for Local {
    #[tracing::instrument(skip_all, level = "trace")]
    fn put_words(&self, pe: usize, dst_region: Region, src: &[u64], dst: usize) {
        trace!("putting {} words into {:?} of pe {} at {}", src.len(), dst_region, pe, dst);
        let words = &region(self.state(pe), dst_region)[dst..dst + src.len()];
        for (word, val) in words.iter().zip(src) {
            word.store(*val, Ordering::SeqCst);
        }
    }

    fn post_block_cmd(&self, pe: usize, cmd: BlockCmd) -> Result<(), BlockCmd> {
        match self.state(pe).rx_block_cmds.try_push(cmd) {
            Some(_) => Ok(()),
            None => Err(cmd),
        }
    }

    fn add_ack(&self, pe: usize, kind: BlockKind, from: usize, count: usize) {
        self.state(pe).channel(kind).ack_host[from].fetch_add(count as u64, Ordering::SeqCst);
    }
}
