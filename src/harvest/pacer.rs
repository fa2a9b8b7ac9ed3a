use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Time source for the harvest loop: elapsed time since playback started
/// and the pause between polls.
pub trait Pacer {
    /// Resets the elapsed clock; called when playback starts.
    fn start(&mut self);

    fn elapsed(&self) -> Duration;

    fn sleep(&mut self, interval: Duration);
}

#[derive(Debug)]
pub struct WallClockPacer {
    started: Instant,
}

impl WallClockPacer {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for WallClockPacer {
    fn default() -> Self {
        Self::new()
    }
}

impl Pacer for WallClockPacer {
    fn start(&mut self) {
        self.started = Instant::now();
    }

    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn sleep(&mut self, interval: Duration) {
        thread::sleep(interval);
    }
}

/// Cooperative stop request, checked by the loop between iterations.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sets the flag on Ctrl-C. Only one handler can exist per process.
    pub fn install_ctrlc_handler(&self) -> Result<(), ctrlc::Error> {
        let flag = self.clone();
        ctrlc::set_handler(move || flag.cancel())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Advances only when the loop sleeps, plus a fixed cost per sleep to
    /// model time spent in adapter calls.
    #[derive(Debug, Default)]
    pub struct VirtualPacer {
        now: Duration,
        pub per_iteration_cost: Duration,
        pub sleeps: usize,
    }

    impl VirtualPacer {
        pub fn with_cost(per_iteration_cost: Duration) -> Self {
            Self {
                per_iteration_cost,
                ..Self::default()
            }
        }
    }

    impl Pacer for VirtualPacer {
        fn start(&mut self) {
            self.now = Duration::ZERO;
        }

        fn elapsed(&self) -> Duration {
            self.now
        }

        fn sleep(&mut self, interval: Duration) {
            self.sleeps += 1;
            self.now += interval + self.per_iteration_cost;
        }
    }
}
