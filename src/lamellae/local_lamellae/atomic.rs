use super::Local;
use crate::lamellae::LamellaeAtomic;

impl LamellaeAtomic for Local {
    fn atomic_load(&self, pe: usize, offset: usize) -> u64 {
        self.segment(pe).load(offset)
    }
    fn atomic_store(&self, pe: usize, offset: usize, val: u64) {
        self.segment(pe).store(offset, val)
    }
    fn atomic_swap(&self, pe: usize, offset: usize, val: u64) -> u64 {
        self.segment(pe).swap(offset, val)
    }
    fn atomic_compare_exchange(
        &self,
        pe: usize,
        offset: usize,
        current: u64,
        new: u64,
    ) -> Result<u64, u64> {
        self.segment(pe).compare_exchange(offset, current, new)
    }
}
