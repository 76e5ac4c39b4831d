// The three-state detection state machine (spec.md §4.1): IDLE, RECORDING,
// FINALIZING. Grounded on `CameraRecorder`'s `_state`/`_last_det_time` pair
// and `trigger_detection`/`_try_end_recording`/`_end_finalizing` in
// `examples/original_source/pruletynvr/nvr.py`.

use std::time::Duration;

use jiff::Timestamp;
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Recording,
    Finalizing,
}

/// What `trigger_detection` did, so the caller can log it the way the
/// original program distinguishes "started", "extended", and "resumed".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    StartedRecording,
    ExtendedPostWindow,
    ResumedDuringFinalize,
}

struct Inner {
    state: State,
    last_detection: Option<Timestamp>,
}

/// Mutex-guarded state shared between a recorder's watcher and finalizer
/// threads.
pub struct SharedState {
    inner: Mutex<Inner>,
}

impl SharedState {
    pub fn new() -> Self {
        SharedState {
            inner: Mutex::new(Inner {
                state: State::Idle,
                last_detection: None,
            }),
        }
    }

    /// Records a detection event, transitioning IDLE to RECORDING and
    /// FINALIZING back to RECORDING (the in-flight finalize will notice and
    /// abandon on its next state check).
    pub fn trigger_detection(&self, now: Timestamp) -> Transition {
        let mut inner = self.inner.lock();
        inner.last_detection = Some(now);
        match inner.state {
            State::Idle => {
                inner.state = State::Recording;
                Transition::StartedRecording
            }
            State::Recording => Transition::ExtendedPostWindow,
            State::Finalizing => {
                inner.state = State::Recording;
                Transition::ResumedDuringFinalize
            }
        }
    }

    pub fn snapshot(&self) -> (State, Option<Timestamp>) {
        let inner = self.inner.lock();
        (inner.state, inner.last_detection)
    }

    pub fn is_idle(&self) -> bool {
        self.inner.lock().state == State::Idle
    }

    /// Transitions RECORDING to FINALIZING if `post_roll` has elapsed since
    /// the last detection, as measured against `now`. Returns `true` on
    /// transition.
    pub fn try_begin_finalizing(&self, now: Timestamp, post_roll: Duration) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != State::Recording {
            return false;
        }
        let Some(last) = inner.last_detection else {
            return false;
        };
        let elapsed = now.duration_since(last);
        let post_roll = jiff::SignedDuration::try_from(post_roll).unwrap_or(jiff::SignedDuration::MAX);
        if elapsed >= post_roll {
            inner.state = State::Finalizing;
            true
        } else {
            false
        }
    }

    /// Returns to IDLE unconditionally; called once a finalize pass (real or
    /// abandoned) completes.
    pub fn end_finalizing(&self) {
        self.inner.lock().state = State::Idle;
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}
