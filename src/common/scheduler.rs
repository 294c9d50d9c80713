use super::{
    time::Timestamp,
    timer_queue::{Expire, TimerQueue},
};

use parking_lot::Mutex;
use std::{
    fmt,
    sync::{Arc, Weak},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    /// Created, but `start` has not been called yet.
    Unstarted,
    /// Registered with the timer queue.
    Armed,
    /// The action has been claimed. Terminal.
    Fired,
}

struct State {
    phase: Phase,
    deadline: Timestamp,
}

/// Fires an entry's expiration action once, at or after its deadline.
///
/// The deadline can only move forward. Moving it does not touch the timer
/// queue: when the queued wake-up arrives the scheduler checks the stored
/// deadline again and re-queues itself if the deadline has moved.
///
/// The scheduler itself never runs the action. The methods that "fire" return
/// `true` exactly once, to the caller that must run it.
pub(crate) enum DeadlineScheduler {
    /// For entries without a deadline.
    Never,
    Timed(TimedScheduler),
}

pub(crate) struct TimedScheduler {
    queue: Arc<TimerQueue>,
    state: Mutex<State>,
}

impl fmt::Debug for DeadlineScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Never => f.write_str("Never"),
            Self::Timed(timed) => {
                let state = timed.state.lock();
                f.debug_struct("Timed")
                    .field("phase", &state.phase)
                    .field("deadline", &state.deadline)
                    .finish()
            }
        }
    }
}

impl DeadlineScheduler {
    pub(crate) fn new(queue: &Arc<TimerQueue>, deadline: Option<Timestamp>) -> Self {
        match deadline {
            None => Self::Never,
            Some(deadline) => Self::Timed(TimedScheduler {
                queue: Arc::clone(queue),
                state: Mutex::new(State {
                    phase: Phase::Unstarted,
                    deadline,
                }),
            }),
        }
    }

    /// Arms the scheduler. Returns `true` if the deadline has already been
    /// reached, in which case the caller must run the action now.
    ///
    /// Only the first call has any effect.
    pub(crate) fn start(&self, target: Weak<dyn Expire>, now: Timestamp) -> bool {
        let Self::Timed(timed) = self else {
            return false;
        };

        let mut state = timed.state.lock();
        if state.phase != Phase::Unstarted {
            return false;
        }
        if state.deadline <= now {
            state.phase = Phase::Fired;
            return true;
        }
        state.phase = Phase::Armed;
        timed.queue.schedule(state.deadline, target);
        false
    }

    /// Moves the deadline to `deadline` if that is later than the current
    /// one. Has no effect once the action has fired.
    pub(crate) fn reschedule_to(&self, deadline: Timestamp) {
        if let Self::Timed(timed) = self {
            let mut state = timed.state.lock();
            if state.phase != Phase::Fired && deadline > state.deadline {
                state.deadline = deadline;
            }
        }
    }

    /// Handles a wake-up from the timer queue. Returns `true` if the caller
    /// must run the action now.
    pub(crate) fn on_wake(&self, target: Weak<dyn Expire>, now: Timestamp) -> bool {
        let Self::Timed(timed) = self else {
            return false;
        };

        let mut state = timed.state.lock();
        if state.phase != Phase::Armed {
            return false;
        }
        if state.deadline <= now {
            state.phase = Phase::Fired;
            true
        } else {
            // The deadline was moved while we were queued.
            timed.queue.schedule(state.deadline, target);
            false
        }
    }

    /// Claims the action ahead of the timer, for a reader that has observed
    /// the deadline passing. Returns `true` if the caller must run it.
    pub(crate) fn fire_if_due(&self, now: Timestamp) -> bool {
        let Self::Timed(timed) = self else {
            return false;
        };

        let mut state = timed.state.lock();
        if state.phase == Phase::Armed && state.deadline <= now {
            state.phase = Phase::Fired;
            true
        } else {
            false
        }
    }

    /// Makes sure the action never fires. Used when the entry has been removed
    /// for another reason.
    pub(crate) fn cancel(&self) {
        if let Self::Timed(timed) = self {
            timed.state.lock().phase = Phase::Fired;
        }
    }

    #[cfg(test)]
    pub(crate) fn deadline(&self) -> Option<Timestamp> {
        match self {
            Self::Never => None,
            Self::Timed(timed) => Some(timed.state.lock().deadline),
        }
    }
}
