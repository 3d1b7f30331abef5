use crate::config;

pub(crate) enum RuntimeWarning<'a> {
    /// a busy-poll has been waiting on `what` for the given number of seconds
    SpinTimeout(&'a str, f64),
    /// a remote compare-exchange loop on (pe, offset) has been retrying for the given number of seconds
    CasRetry(usize, usize, f64),
}

impl<'a> RuntimeWarning<'a> {
    fn print_warning(&self) -> bool {
        let timeout = config().deadlock_timeout;
        if timeout <= 0.0 {
            return false;
        }
        match config().spin_warning {
            Some(false) => false,
            _ => match self {
                RuntimeWarning::SpinTimeout(_, elapsed) => *elapsed > timeout,
                RuntimeWarning::CasRetry(_, _, elapsed) => *elapsed > timeout,
            },
        }
    }

    #[cfg(feature = "runtime-warnings-panic")]
    fn panic(&self, msg: &str) {
        panic!("{msg}
            Note this warning causes a panic because you have compiled lamellar-rma with the `runtime-warnings-panic` feature.
            Recompile without this feature to only print warnings, rather than panic.
            To view backtrace set RUST_LIB_BACKTRACE=1.
            {}",
            std::backtrace::Backtrace::capture());
    }

    pub(crate) fn print(self) {
        #[cfg(not(feature = "disable-runtime-warnings"))]
        if self.print_warning() {
            let msg = match self {
                RuntimeWarning::SpinTimeout(what, elapsed) => {
                    format!("[LAMELLAR RMA WARNING][{:?}] Waited {elapsed:.1} seconds on {what}. Potential deadlock detected.
                    Remote accesses only complete while the progress agent of every involved pe keeps servicing its queues.
                    A pe that stopped progressing (or never entered the job) will leave this poll spinning forever.
                    The deadlock timeout can be set via the LAMELLAR_RMA_DEADLOCK_TIMEOUT environment variable, the current timeout is {} seconds, setting this to 0 will disable this warning.",
                        std::thread::current().id(), config().deadlock_timeout)
                }
                RuntimeWarning::CasRetry(pe, offset, elapsed) => {
                    format!("[LAMELLAR RMA WARNING][{:?}] A compound atomic on pe {pe} offset {offset} has been retrying its compare-exchange for {elapsed:.1} seconds.
                    This usually means the element is under heavy contention from other pes.
                    The retry loop is unbounded, set LAMELLAR_RMA_SPIN_WARNING=false (or 0) to disable this warning.",
                        std::thread::current().id())
                }
            };

            #[cfg(feature = "runtime-warnings-panic")]
            self.panic(&msg);
            tracing::warn!(
                "{msg}
                Note that this warning is informative only, and will not terminate your application.
                To disable runtime warnings completely, recompile lamellar-rma with the `disable-runtime-warnings` feature."
            );
        }
    }
}
