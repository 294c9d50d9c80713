use super::time::{TimeSource, Timestamp};

use parking_lot::{Condvar, Mutex, ReentrantMutex};
use std::{
    cmp::{Ordering as CmpOrdering, Reverse},
    collections::BinaryHeap,
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Weak,
    },
    thread::{self, JoinHandle},
};

/// Something that wants to be woken up once a deadline has been reached.
pub(crate) trait Expire: Send + Sync {
    /// Called by the timer queue when a deadline registered for this target
    /// has been reached. `now` is the time the queue observed.
    fn on_deadline(self: Arc<Self>, now: Timestamp);
}

struct TimerItem {
    deadline: Timestamp,
    seq: u64,
    target: Weak<dyn Expire>,
}

impl PartialEq for TimerItem {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerItem {}

impl PartialOrd for TimerItem {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerItem {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.seq.cmp(&other.seq))
    }
}

/// A min-heap of deadlines shared by every entry of a map.
///
/// The queue only holds weak references to its targets, so a pending deadline
/// never keeps an entry alive.
pub(crate) struct TimerQueue {
    clock: Arc<dyn TimeSource>,
    heap: Mutex<BinaryHeap<Reverse<TimerItem>>>,
    // Held while due targets are being woken. Reentrant, as a target's removal
    // listener may call `run_pending` again.
    firing: ReentrantMutex<()>,
    next_seq: AtomicU64,
    wakeup: Condvar,
    is_shutdown: AtomicBool,
}

impl fmt::Debug for TimerQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerQueue")
            .field("pending", &self.heap.lock().len())
            .finish()
    }
}

impl TimerQueue {
    pub(crate) fn new(clock: Arc<dyn TimeSource>) -> Self {
        Self {
            clock,
            heap: Mutex::new(BinaryHeap::new()),
            firing: ReentrantMutex::new(()),
            next_seq: AtomicU64::new(0),
            wakeup: Condvar::new(),
            is_shutdown: AtomicBool::new(false),
        }
    }

    #[inline]
    pub(crate) fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub(crate) fn schedule(&self, deadline: Timestamp, target: Weak<dyn Expire>) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let is_earliest = {
            let mut heap = self.heap.lock();
            let is_earliest = heap
                .peek()
                .map_or(true, |Reverse(top)| deadline < top.deadline);
            heap.push(Reverse(TimerItem {
                deadline,
                seq,
                target,
            }));
            is_earliest
        };

        // The driver only needs to wake up early if the new deadline comes
        // before the one it is currently sleeping on.
        if is_earliest {
            self.wakeup.notify_one();
        }
    }

    /// Pops every item whose deadline has been reached and wakes its target.
    /// Returns the number of targets that were still alive.
    ///
    /// When this returns, every target that was due when it was called has
    /// been woken, by this call or by a concurrent one.
    pub(crate) fn run_pending(&self) -> usize {
        let _firing = self.firing.lock();
        let now = self.now();
        let mut due = Vec::new();
        {
            let mut heap = self.heap.lock();
            while let Some(Reverse(top)) = heap.peek() {
                if top.deadline > now {
                    break;
                }
                if let Some(Reverse(item)) = heap.pop() {
                    due.push(item);
                }
            }
        }

        // Targets are woken without holding the heap lock as they may schedule
        // themselves again.
        let mut woken = 0;
        for item in due {
            if let Some(target) = item.target.upgrade() {
                target.on_deadline(now);
                woken += 1;
            }
        }
        woken
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.heap.lock().len()
    }

    fn shutdown(&self) {
        {
            let _heap = self.heap.lock();
            self.is_shutdown.store(true, Ordering::Release);
        }
        self.wakeup.notify_all();
    }

    fn is_shutdown(&self) -> bool {
        self.is_shutdown.load(Ordering::Acquire)
    }

    /// The body of the driver thread.
    fn drive(&self) {
        loop {
            self.run_pending();

            let mut heap = self.heap.lock();
            if self.is_shutdown() {
                break;
            }
            let earliest = heap.peek().map(|Reverse(top)| top.deadline);
            match earliest {
                None => {
                    self.wakeup.wait(&mut heap);
                }
                Some(deadline) => {
                    let wait = deadline.saturating_duration_since(self.now());
                    if !wait.is_zero() {
                        self.wakeup.wait_for(&mut heap, wait);
                    }
                }
            }
            if self.is_shutdown() {
                break;
            }
        }
    }
}

/// Owns the background thread that sleeps until the earliest deadline of a
/// [`TimerQueue`] and then wakes the due targets.
///
/// Dropping the driver stops the thread.
pub(crate) struct TimerDriver {
    queue: Arc<TimerQueue>,
    handle: Option<JoinHandle<()>>,
    #[cfg(feature = "logging")]
    map_name: Option<String>,
}

impl TimerDriver {
    pub(crate) fn spawn(queue: Arc<TimerQueue>, map_name: Option<&str>) -> std::io::Result<Self> {
        let thread_name = match map_name {
            Some(name) => format!("timed-map-timer-{name}"),
            None => "timed-map-timer".to_string(),
        };

        let handle = {
            let queue = Arc::clone(&queue);
            thread::Builder::new()
                .name(thread_name)
                .spawn(move || queue.drive())?
        };

        let driver = Self {
            queue,
            handle: Some(handle),
            #[cfg(feature = "logging")]
            map_name: map_name.map(str::to_string),
        };

        #[cfg(feature = "logging")]
        log::debug!("{}Started the timer driver", driver.log_prefix());

        Ok(driver)
    }
}

impl Drop for TimerDriver {
    fn drop(&mut self) {
        self.queue.shutdown();

        if let Some(handle) = self.handle.take() {
            // A removal listener running on the driver thread may drop the last
            // handle to its own map. Joining from there would never return.
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }

        #[cfg(feature = "logging")]
        log::debug!("{}Stopped the timer driver", self.log_prefix());
    }
}

#[cfg(feature = "logging")]
impl TimerDriver {
    fn log_prefix(&self) -> String {
        super::log_prefix(self.map_name.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::{Expire, TimerDriver, TimerQueue};
    use crate::common::time::{ManualClock, MonotonicClock, Timestamp};

    use parking_lot::Mutex;
    use std::{
        sync::{Arc, Weak},
        thread,
        time::Duration,
    };

    #[derive(Default)]
    struct Recorder {
        woken_at: Mutex<Vec<Timestamp>>,
    }

    impl Expire for Recorder {
        fn on_deadline(self: Arc<Self>, now: Timestamp) {
            self.woken_at.lock().push(now);
        }
    }

    fn target(recorder: &Arc<Recorder>) -> Weak<dyn Expire> {
        let weak: Weak<Recorder> = Arc::downgrade(recorder);
        weak
    }

    #[test]
    fn wakes_due_items_in_deadline_order() {
        let clock = ManualClock::new();
        let queue = TimerQueue::new(clock.clone());

        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        queue.schedule(Timestamp::from_millis(200), target(&b));
        queue.schedule(Timestamp::from_millis(100), target(&a));
        assert_eq!(queue.pending_len(), 2);

        assert_eq!(queue.run_pending(), 0);

        clock.advance(Duration::from_millis(100));
        assert_eq!(queue.run_pending(), 1);
        assert_eq!(*a.woken_at.lock(), vec![Timestamp::from_millis(100)]);
        assert!(b.woken_at.lock().is_empty());

        clock.advance(Duration::from_millis(150));
        assert_eq!(queue.run_pending(), 1);
        assert_eq!(*b.woken_at.lock(), vec![Timestamp::from_millis(250)]);
        assert_eq!(queue.pending_len(), 0);
    }

    #[test]
    fn dropped_targets_are_skipped() {
        let clock = ManualClock::new();
        let queue = TimerQueue::new(clock.clone());

        let recorder = Arc::new(Recorder::default());
        queue.schedule(Timestamp::from_millis(10), target(&recorder));
        drop(recorder);

        clock.advance(Duration::from_millis(10));
        assert_eq!(queue.run_pending(), 0);
        assert_eq!(queue.pending_len(), 0);
    }

    #[test]
    fn driver_wakes_targets_in_real_time() {
        let clock = Arc::new(MonotonicClock::new());
        let queue = Arc::new(TimerQueue::new(clock.clone()));
        let driver = TimerDriver::spawn(Arc::clone(&queue), Some("test")).expect("spawn");

        let recorder = Arc::new(Recorder::default());
        let deadline = crate::common::time::TimeSource::now(&*clock)
            .saturating_add(Duration::from_millis(50));
        queue.schedule(deadline, target(&recorder));

        #[cfg(feature = "logging")]
        assert_eq!(driver.log_prefix(), "[test] ");

        thread::sleep(Duration::from_millis(500));
        let woken_at = recorder.woken_at.lock().clone();
        assert_eq!(woken_at.len(), 1);
        assert!(woken_at[0] >= deadline);

        drop(driver);
    }
}
