// This file is part of the NVR core recording pipeline.
// Adapted from Moonfire NVR's `base::shutdown`.
//
//! Tools for propagating a graceful shutdown signal through the program.
//!
//! The receiver can be cloned and checked or blocked on (with a timeout)
//! from synchronous code — the segmenter supervisor, watcher, finalizer, and
//! MQTT bus threads all sleep via `wait_for` instead of `std::thread::sleep`
//! so a shutdown wakes them immediately. A single `Sender`, held by `main`,
//! is dropped on SIGINT/SIGTERM to broadcast shutdown to all of them.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

#[derive(Debug)]
pub struct ShutdownError;

impl std::fmt::Display for ShutdownError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("shutdown requested")
    }
}

impl std::error::Error for ShutdownError {}

struct Inner {
    /// `false` iff shutdown has already happened.
    alive: Mutex<bool>,

    condvar: Condvar,
}

pub struct Sender(Arc<Inner>);

impl Drop for Sender {
    fn drop(&mut self) {
        // Note sequencing: modify the lock state, then notify waiters. The
        // opposite order would create a race in which a waiter might never wake.
        *self.0.alive.lock() = false;
        self.0.condvar.notify_all();
    }
}

#[derive(Clone)]
pub struct Receiver(Arc<Inner>);

impl Receiver {
    pub fn check(&self) -> Result<(), ShutdownError> {
        if *self.0.alive.lock() {
            Ok(())
        } else {
            Err(ShutdownError)
        }
    }

    pub fn wait_for(&self, timeout: std::time::Duration) -> Result<(), ShutdownError> {
        let mut l = self.0.alive.lock();
        let result = self.0.condvar.wait_while_for(&mut l, |alive| *alive, timeout);
        if result.timed_out() {
            Ok(())
        } else {
            Err(ShutdownError)
        }
    }
}

/// Returns a sender and receiver for graceful shutdown.
///
/// Dropping the sender will request shutdown.
pub fn channel() -> (Sender, Receiver) {
    let inner = Arc::new(Inner {
        alive: Mutex::new(true),
        condvar: Condvar::new(),
    });
    (Sender(inner.clone()), Receiver(inner))
}

#[cfg(test)]
mod tests {
    #[test]
    fn simple_check() {
        let (tx, rx) = super::channel();
        rx.check().unwrap();
        drop(tx);
        rx.check().unwrap_err();
    }

    #[test]
    fn blocking() {
        let (tx, rx) = super::channel();
        rx.wait_for(std::time::Duration::from_secs(0)).unwrap();
        let h = std::thread::spawn(move || {
            rx.wait_for(std::time::Duration::from_secs(1000))
                .unwrap_err()
        });

        // Make it likely that rx has done its initial check and is waiting on the Condvar.
        std::thread::sleep(std::time::Duration::from_millis(10));

        drop(tx);
        h.join().unwrap();
    }
}
