use crate::warnings::RuntimeWarning;

use crossbeam::utils::Backoff;
use std::time::Instant;

/// Busy-poll helper used by every wait in the crate.
///
/// Spins with exponential backoff (eventually yielding the time slice) and prints a
/// [RuntimeWarning::SpinTimeout] each time the configured deadlock timeout elapses.
/// It never gives up: the caller decides what it is waiting for.
pub(crate) struct SpinWait<'a> {
    what: &'a str,
    backoff: Backoff,
    timer: Instant,
}

impl<'a> SpinWait<'a> {
    pub(crate) fn new(what: &'a str) -> SpinWait<'a> {
        SpinWait {
            what,
            backoff: Backoff::new(),
            timer: Instant::now(),
        }
    }

    pub(crate) fn spin(&mut self) {
        self.backoff.snooze();
        if self.backoff.is_completed() {
            let elapsed = self.timer.elapsed().as_secs_f64();
            if elapsed > crate::config().deadlock_timeout && crate::config().deadlock_timeout > 0.0
            {
                RuntimeWarning::SpinTimeout(self.what, elapsed).print();
                self.timer = Instant::now();
            }
        }
    }
}

/// Spin until `cond` returns true.
pub(crate) fn spin_until(what: &str, mut cond: impl FnMut() -> bool) {
    if cond() {
        return;
    }
    let mut wait = SpinWait::new(what);
    while !cond() {
        wait.spin();
    }
}
