// This file is part of the NVR core recording pipeline.
// Adapted from Moonfire NVR's `base::clock`: an abstract clock interface so
// the recorder state machine and segment watcher can be driven by a
// simulated clock in tests instead of real sleeps.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::warn;

/// Abstract interface to the system clocks, for testability.
pub trait Clocks: Send + Sync + Clone + 'static {
    /// Returns the current wall-clock time.
    fn realtime(&self) -> jiff::Timestamp;

    /// Returns a monotonically increasing instant, used for measuring elapsed
    /// durations (never for display).
    fn monotonic(&self) -> Instant;

    /// Sleeps the current thread for the given duration.
    fn sleep(&self, how_long: Duration);

    /// Calls `rcv.recv_timeout` or substitutes a simulated-clock equivalent.
    fn recv_timeout<T>(
        &self,
        rcv: &mpsc::Receiver<T>,
        timeout: Duration,
    ) -> Result<T, mpsc::RecvTimeoutError>;
}

#[derive(Copy, Clone, Default)]
pub struct RealClocks;

impl Clocks for RealClocks {
    fn realtime(&self) -> jiff::Timestamp {
        jiff::Timestamp::now()
    }

    fn monotonic(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, how_long: Duration) {
        std::thread::sleep(how_long);
    }

    fn recv_timeout<T>(
        &self,
        rcv: &mpsc::Receiver<T>,
        timeout: Duration,
    ) -> Result<T, mpsc::RecvTimeoutError> {
        rcv.recv_timeout(timeout)
    }
}

/// Logs a warning if a unit of work took longer than a second, labeled lazily
/// so the common case (fast work) pays no string-formatting cost.
pub struct TimerGuard<'a, C: Clocks, S: AsRef<str>, F: FnOnce() -> S> {
    clocks: &'a C,
    label_f: Option<F>,
    start: Instant,
}

impl<'a, C: Clocks, S: AsRef<str>, F: FnOnce() -> S> TimerGuard<'a, C, S, F> {
    pub fn new(clocks: &'a C, label_f: F) -> Self {
        TimerGuard {
            clocks,
            label_f: Some(label_f),
            start: clocks.monotonic(),
        }
    }
}

impl<'a, C: Clocks, S: AsRef<str>, F: FnOnce() -> S> Drop for TimerGuard<'a, C, S, F> {
    fn drop(&mut self) {
        let elapsed = self.clocks.monotonic().duration_since(self.start);
        if elapsed >= Duration::from_secs(1) {
            let label_f = self.label_f.take().unwrap();
            warn!("{} took {:?}", label_f().as_ref(), elapsed);
        }
    }
}

/// Simulated clock for deterministic tests of time-driven state transitions.
#[derive(Clone)]
pub struct SimulatedClocks(Arc<SimulatedClocksInner>);

struct SimulatedClocksInner {
    epoch: jiff::Timestamp,
    elapsed: Mutex<Duration>,
}

impl SimulatedClocks {
    pub fn new(epoch: jiff::Timestamp) -> Self {
        SimulatedClocks(Arc::new(SimulatedClocksInner {
            epoch,
            elapsed: Mutex::new(Duration::ZERO),
        }))
    }

    /// Advances the clock without blocking the calling thread.
    pub fn advance(&self, how_long: Duration) {
        let mut l = self.0.elapsed.lock().unwrap();
        *l += how_long;
    }
}

impl Clocks for SimulatedClocks {
    fn realtime(&self) -> jiff::Timestamp {
        let elapsed = *self.0.elapsed.lock().unwrap();
        self.0.epoch + jiff::SignedDuration::try_from(elapsed).unwrap()
    }

    fn monotonic(&self) -> Instant {
        // `Instant` has no epoch we can rebase onto simulated time; tests
        // only assert on durations derived from `realtime()`, so the
        // TimerGuard's elapsed-time warnings are simply inert in tests.
        Instant::now()
    }

    fn sleep(&self, how_long: Duration) {
        self.advance(how_long);
    }

    fn recv_timeout<T>(
        &self,
        rcv: &mpsc::Receiver<T>,
        timeout: Duration,
    ) -> Result<T, mpsc::RecvTimeoutError> {
        let r = rcv.recv_timeout(Duration::ZERO);
        if r.is_err() {
            self.advance(timeout);
        }
        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulated_clock_advances_on_sleep() {
        let c = SimulatedClocks::new(jiff::Timestamp::from_second(1_700_000_000).unwrap());
        let t0 = c.realtime();
        c.sleep(Duration::from_secs(30));
        let t1 = c.realtime();
        assert_eq!((t1 - t0).get_seconds(), 30);
    }

    #[test]
    fn recv_timeout_advances_clock_only_on_timeout() {
        let c = SimulatedClocks::new(jiff::Timestamp::from_second(0).unwrap());
        let (tx, rx) = mpsc::channel::<()>();
        tx.send(()).unwrap();
        c.recv_timeout(&rx, Duration::from_secs(5)).unwrap();
        assert_eq!(c.realtime().as_second(), 0);
        assert!(c.recv_timeout(&rx, Duration::from_secs(5)).is_err());
        assert_eq!(c.realtime().as_second(), 5);
    }
}
