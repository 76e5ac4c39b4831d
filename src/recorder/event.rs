// A settable, auto-clearing wakeup signal between the segment watcher and
// finalizer threads, mirroring `threading.Event` in
// `examples/original_source/pruletynvr/nvr.py`'s `_finalize_event`. Built on
// the same `parking_lot` primitives as `base::shutdown`.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

pub struct Event {
    flag: Mutex<bool>,
    condvar: Condvar,
}

impl Event {
    pub fn new() -> Self {
        Event {
            flag: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    pub fn set(&self) {
        let mut flag = self.flag.lock();
        *flag = true;
        self.condvar.notify_all();
    }

    /// Blocks up to `timeout` for the event to be set, then clears it.
    /// Returns whether it was set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut flag = self.flag.lock();
        if !*flag {
            self.condvar.wait_for(&mut flag, timeout);
        }
        let was_set = *flag;
        *flag = false;
        was_set
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_event_times_out() {
        let e = Event::new();
        assert!(!e.wait_timeout(Duration::from_millis(20)));
    }

    #[test]
    fn set_event_is_observed_and_cleared() {
        let e = Event::new();
        e.set();
        assert!(e.wait_timeout(Duration::from_millis(20)));
        assert!(!e.wait_timeout(Duration::from_millis(20)));
    }

    #[test]
    fn set_from_another_thread_wakes_waiter() {
        use std::sync::Arc;
        let e = Arc::new(Event::new());
        let e2 = e.clone();
        let h = std::thread::spawn(move || e2.wait_timeout(Duration::from_secs(5)));
        std::thread::sleep(Duration::from_millis(20));
        e.set();
        assert!(h.join().unwrap());
    }
}
