use crate::utils::SpinWait;

use crossbeam::utils::CachePadded;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// A group of threads that cooperatively execute one engine.
///
/// Members synchronize with a generation counting spin barrier and exchange decisions
/// through a small array of shared words that only the leader (rank 0) writes.
pub(crate) struct Team {
    name: &'static str,
    size: usize,
    arrived: CachePadded<AtomicUsize>,
    generation: CachePadded<AtomicUsize>,
    shared: Box<[AtomicU64]>,
}

impl Team {
    pub(crate) fn new(name: &'static str, size: usize, shared_words: usize) -> Arc<Team> {
        Arc::new(Team {
            name,
            size,
            arrived: CachePadded::new(AtomicUsize::new(0)),
            generation: CachePadded::new(AtomicUsize::new(0)),
            shared: (0..shared_words).map(|_| AtomicU64::new(0)).collect(),
        })
    }

    /// One handle per participating thread.
    pub(crate) fn members(self: &Arc<Self>) -> Vec<TeamMember> {
        (0..self.size)
            .map(|rank| TeamMember {
                rank,
                team: self.clone(),
            })
            .collect()
    }
}

impl std::fmt::Debug for Team {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Team {{ name: {}, size: {} }}", self.name, self.size)
    }
}

#[derive(Debug)]
pub(crate) struct TeamMember {
    rank: usize,
    team: Arc<Team>,
}

impl TeamMember {
    pub(crate) fn rank(&self) -> usize {
        self.rank
    }

    pub(crate) fn size(&self) -> usize {
        self.team.size
    }

    pub(crate) fn is_leader(&self) -> bool {
        self.rank == 0
    }

    pub(crate) fn name(&self) -> &'static str {
        self.team.name
    }

    /// Indices `rank, rank + size, rank + 2*size, ...` below `len`.
    pub(crate) fn stride(&self, len: usize) -> impl Iterator<Item = usize> {
        (self.rank..len).step_by(self.team.size)
    }

    pub(crate) fn barrier(&self) {
        let team = &self.team;
        if team.size == 1 {
            return;
        }
        let gen = team.generation.load(Ordering::SeqCst);
        if team.arrived.fetch_add(1, Ordering::SeqCst) + 1 == team.size {
            team.arrived.store(0, Ordering::SeqCst);
            team.generation.fetch_add(1, Ordering::SeqCst);
        } else {
            let mut wait = SpinWait::new("the other members of an engine team");
            while team.generation.load(Ordering::SeqCst) == gen {
                wait.spin();
            }
        }
    }

    /// Leader only: publish a word for the rest of the team (visible after the next barrier).
    pub(crate) fn share(&self, idx: usize, val: u64) {
        debug_assert!(self.is_leader());
        self.team.shared[idx].store(val, Ordering::SeqCst);
    }

    pub(crate) fn shared(&self, idx: usize) -> u64 {
        self.team.shared[idx].load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stride_partitions_range() {
        let team = Team::new("test", 3, 0);
        let mut all: Vec<usize> = team.members().iter().flat_map(|m| m.stride(10)).collect();
        all.sort();
        assert_eq!(all, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn barrier_orders_phases() {
        let team = Team::new("test", 4, 1);
        let counter = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = team
            .members()
            .into_iter()
            .map(|member| {
                let counter = counter.clone();
                std::thread::spawn(move || {
                    for round in 0..50 {
                        if member.is_leader() {
                            member.share(0, round as u64);
                        }
                        counter.fetch_add(1, Ordering::SeqCst);
                        member.barrier();
                        // every member arrived for this round before anyone leaves it
                        assert!(counter.load(Ordering::SeqCst) >= (round + 1) * 4);
                        assert_eq!(member.shared(0), round as u64);
                        member.barrier();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 200);
    }
}
