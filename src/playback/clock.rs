//! Time source for the transport

use std::time::{Duration, Instant};

/// Monotonic time plus the ability to wait on it
pub trait Clock {
    /// Time since an arbitrary fixed origin
    fn now(&self) -> Duration;

    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by `Instant`
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[cfg(test)]
pub(crate) mod manual {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use super::*;

    /// Test clock; `sleep` advances time instantly and records the request
    #[derive(Clone, Default)]
    pub struct ManualClock {
        now: Rc<Cell<Duration>>,
        sleeps: Rc<RefCell<Vec<Duration>>>,
    }

    impl ManualClock {
        pub fn advance(&self, by: Duration) {
            self.now.set(self.now.get() + by);
        }

        pub fn advance_secs(&self, secs: f64) {
            self.advance(Duration::from_secs_f64(secs));
        }

        pub fn sleeps(&self) -> Vec<Duration> {
            self.sleeps.borrow().clone()
        }

        pub fn clear_sleeps(&self) {
            self.sleeps.borrow_mut().clear();
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Duration {
            self.now.get()
        }

        fn sleep(&self, duration: Duration) {
            self.sleeps.borrow_mut().push(duration);
            self.advance(duration);
        }
    }
}
