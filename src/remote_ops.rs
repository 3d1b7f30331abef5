use crate::config;
use crate::lamellae::{Lamellae, LamellaeAtomic};
use crate::scalar::{RemoteInteger, RemoteScalar};
use crate::warnings::RuntimeWarning;
use crate::worker_state::WorkerState;

use crossbeam::utils::Backoff;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;

/// A handle to a single element of a remote segment, offering one-sided atomic operations.
///
/// These operations bypass the aggregation path: every call is an individual network
/// atomic against the owning pe. Compound operations (`fetch_add`, `fetch_xor`, ...) are
/// implemented as a compare-exchange retry loop; under contention the loop backs off
/// exponentially and retries without bound, printing a runtime warning each time the
/// deadlock timeout elapses.
///
/// Values this pe writes are also written into its remote access cache.
///
/// # Examples
///```
/// use lamellar_rma::RmaWorldBuilder;
///
/// let world = RmaWorldBuilder::new().with_num_pes(2).build::<u64>().unwrap();
/// let worker = world.worker(0);
/// let counter = worker.element(1, 0);
/// counter.add(5);
/// assert_eq!(counter.fetch_xor(0b11), 5);
/// assert_eq!(counter.load(), 6);
///```
pub struct RemoteElement<T: RemoteScalar> {
    lamellae: Arc<Lamellae>,
    state: Arc<WorkerState>,
    pe: usize,
    offset: usize,
    _ty: PhantomData<T>,
}

impl<T: RemoteScalar> RemoteElement<T> {
    pub(crate) fn new(
        lamellae: Arc<Lamellae>,
        state: Arc<WorkerState>,
        pe: usize,
        offset: usize,
    ) -> RemoteElement<T> {
        RemoteElement {
            lamellae,
            state,
            pe,
            offset,
            _ty: PhantomData,
        }
    }

    pub fn pe(&self) -> usize {
        self.pe
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    fn remember(&self, bits: u64) {
        self.state.cache.insert(self.pe, self.offset, bits);
    }

    pub fn load(&self) -> T {
        T::from_bits(self.lamellae.atomic_load(self.pe, self.offset))
    }

    pub fn store(&self, val: T) {
        let bits = val.to_bits();
        self.lamellae.atomic_store(self.pe, self.offset, bits);
        self.remember(bits);
    }

    pub fn swap(&self, val: T) -> T {
        let bits = val.to_bits();
        let old = self.lamellae.atomic_swap(self.pe, self.offset, bits);
        self.remember(bits);
        T::from_bits(old)
    }

    /// Store `new` if the element currently holds `current` (compared bitwise).
    ///
    /// Returns the previous value, `Ok` if the exchange happened.
    pub fn compare_exchange(&self, current: T, new: T) -> Result<T, T> {
        match self.lamellae.atomic_compare_exchange(
            self.pe,
            self.offset,
            current.to_bits(),
            new.to_bits(),
        ) {
            Ok(old) => {
                self.remember(new.to_bits());
                Ok(T::from_bits(old))
            }
            Err(actual) => Err(T::from_bits(actual)),
        }
    }

    /// Atomically replace the element by `op(old)`, returning `old`.
    pub fn fetch_update(&self, op: impl Fn(T) -> T) -> T {
        let backoff = Backoff::new();
        let mut timer = Instant::now();
        let mut retries = 0usize;
        let mut current = self.lamellae.atomic_load(self.pe, self.offset);
        loop {
            let new = op(T::from_bits(current)).to_bits();
            match self
                .lamellae
                .atomic_compare_exchange(self.pe, self.offset, current, new)
            {
                Ok(_) => {
                    if retries > 0 {
                        tracing::trace!(
                            "cas on pe {} offset {} succeeded after {} retries",
                            self.pe,
                            self.offset,
                            retries
                        );
                    }
                    self.remember(new);
                    return T::from_bits(current);
                }
                Err(actual) => {
                    current = actual;
                    retries += 1;
                    backoff.spin();
                    let elapsed = timer.elapsed().as_secs_f64();
                    if elapsed > config().deadlock_timeout {
                        RuntimeWarning::CasRetry(self.pe, self.offset, elapsed).print();
                        timer = Instant::now();
                    }
                }
            }
        }
    }

    pub fn fetch_add(&self, val: T) -> T {
        self.fetch_update(|old| old.op_add(val))
    }

    pub fn add(&self, val: T) {
        self.fetch_add(val);
    }

    pub fn fetch_sub(&self, val: T) -> T {
        self.fetch_update(|old| old.op_sub(val))
    }

    pub fn sub(&self, val: T) {
        self.fetch_sub(val);
    }

    pub fn inc(&self) -> T {
        self.fetch_add(T::one())
    }

    pub fn dec(&self) -> T {
        self.fetch_sub(T::one())
    }

    pub fn fetch_mul(&self, val: T) -> T {
        self.fetch_update(|old| old.op_mul(val))
    }

    /// panics on integer division by zero
    pub fn fetch_div(&self, val: T) -> T {
        assert!(
            val != T::zero() || !T::KIND.is_integer(),
            "remote integer division by zero"
        );
        self.fetch_update(|old| old.op_div(val))
    }

    /// panics on integer division by zero
    pub fn fetch_rem(&self, val: T) -> T {
        assert!(
            val != T::zero() || !T::KIND.is_integer(),
            "remote integer division by zero"
        );
        self.fetch_update(|old| old.op_rem(val))
    }
}

impl<T: RemoteInteger> RemoteElement<T> {
    pub fn fetch_and(&self, val: T) -> T {
        self.fetch_update(|old| old.op_and(val))
    }

    pub fn fetch_or(&self, val: T) -> T {
        self.fetch_update(|old| old.op_or(val))
    }

    pub fn fetch_xor(&self, val: T) -> T {
        self.fetch_update(|old| old.op_xor(val))
    }

    pub fn fetch_shl(&self, bits: u32) -> T {
        self.fetch_update(|old| old.op_shl(bits))
    }

    pub fn fetch_shr(&self, bits: u32) -> T {
        self.fetch_update(|old| old.op_shr(bits))
    }
}

impl<T: RemoteScalar> std::fmt::Debug for RemoteElement<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "RemoteElement<{:?}> {{ pe: {}, offset: {} }}",
            T::KIND,
            self.pe,
            self.offset
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lamellae::local_lamellae::tests::test_lamellae;
    use crate::lamellae::LamellaeComm;

    fn element<T: RemoteScalar>(lamellae: &Arc<Lamellae>, pe: usize, offset: usize) -> RemoteElement<T> {
        RemoteElement::new(
            lamellae.clone(),
            lamellae.local_state(0).unwrap().clone(),
            pe,
            offset,
        )
    }

    #[test]
    fn integer_ops() {
        let lamellae = test_lamellae(2, 4);
        let e = element::<i32>(&lamellae, 1, 2);
        e.store(-4);
        assert_eq!(e.fetch_add(10), -4);
        assert_eq!(e.fetch_mul(3), 6);
        assert_eq!(e.fetch_div(4), 18);
        assert_eq!(e.fetch_rem(3), 4);
        assert_eq!(e.inc(), 1);
        assert_eq!(e.dec(), 2);
        assert_eq!(e.fetch_shl(4), 1);
        assert_eq!(e.fetch_or(0b1), 16);
        assert_eq!(e.fetch_and(0b11), 17);
        assert_eq!(e.fetch_xor(0b10), 1);
        assert_eq!(e.fetch_shr(1), 3);
        assert_eq!(e.load(), 1);
        assert_eq!(e.swap(-9), 1);
        assert_eq!(e.compare_exchange(0, 5), Err(-9));
        assert_eq!(e.compare_exchange(-9, 5), Ok(-9));
        assert_eq!(e.load(), 5);
        // this pe's writes are visible through its cache
        let state = lamellae.local_state(0).unwrap();
        assert_eq!(state.cache.lookup(1, 2), Some(5i32.to_bits()));
    }

    #[test]
    fn float_ops() {
        let lamellae = test_lamellae(2, 4);
        let e = element::<f64>(&lamellae, 0, 0);
        e.store(1.5);
        e.add(2.0);
        assert_eq!(e.fetch_mul(2.0), 3.5);
        e.sub(1.0);
        assert_eq!(e.fetch_div(2.0), 6.0);
        assert_eq!(e.load(), 3.0);
    }

    #[test]
    #[should_panic(expected = "division by zero")]
    fn integer_div_by_zero_panics() {
        let lamellae = test_lamellae(1, 4);
        element::<u8>(&lamellae, 0, 0).fetch_div(0);
    }

    #[test]
    fn contended_fetch_add() {
        let lamellae = test_lamellae(2, 4);
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let e = element::<u64>(&lamellae, 1, 7);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        e.inc();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(element::<u64>(&lamellae, 1, 7).load(), 4000);
    }
}
