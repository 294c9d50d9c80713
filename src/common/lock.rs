use parking_lot::Mutex;
use std::{fmt, sync::Arc};

/// Creates one [`LockStrategy`][lock-strategy] per shard when a map is built.
///
/// [lock-strategy]: ./trait.LockStrategy.html
pub type LockStrategyFactory = Arc<dyn Fn() -> Arc<dyn LockStrategy> + Send + Sync + 'static>;

/// A critical section used by a shard to serialize its mutating operations
/// (insert and remove).
///
/// Implementations must run the given section exactly once, with exclusive
/// access with respect to every other section run through the same instance.
/// Sections are never nested, so implementations do not need to be reentrant.
///
/// The default is [`MutexStrategy`][mutex-strategy]. A custom strategy can be
/// installed with the `lock_strategy` method of the map builder, for example to
/// hold writers back at a gate in a test.
///
/// [mutex-strategy]: ./struct.MutexStrategy.html
pub trait LockStrategy: Send + Sync + 'static {
    /// Runs `section` once, while holding the lock.
    fn with_lock_dyn(&self, section: &mut dyn FnMut());
}

impl dyn LockStrategy {
    /// Runs `f` in the critical section and returns its result.
    ///
    /// # Panics
    ///
    /// Panics if the strategy returned without running the section.
    pub(crate) fn with_lock<R>(&self, f: impl FnOnce() -> R) -> R {
        let mut f = Some(f);
        let mut result = None;
        self.with_lock_dyn(&mut || {
            if let Some(f) = f.take() {
                result = Some(f());
            }
        });
        result.expect("LockStrategy::with_lock_dyn did not run the section")
    }
}

/// The default [`LockStrategy`][lock-strategy]: a plain mutex per shard.
///
/// [lock-strategy]: ./trait.LockStrategy.html
#[derive(Default)]
pub struct MutexStrategy {
    mutex: Mutex<()>,
}

impl MutexStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn factory() -> LockStrategyFactory {
        Arc::new(|| Arc::new(MutexStrategy::new()))
    }
}

impl fmt::Debug for MutexStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutexStrategy")
            .field("locked", &self.mutex.is_locked())
            .finish()
    }
}

impl LockStrategy for MutexStrategy {
    fn with_lock_dyn(&self, section: &mut dyn FnMut()) {
        let _guard = self.mutex.lock();
        section();
    }
}

#[cfg(test)]
mod tests {
    use super::{LockStrategy, MutexStrategy};

    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        thread,
    };

    #[test]
    fn with_lock_returns_section_result() {
        let lock: Arc<dyn LockStrategy> = Arc::new(MutexStrategy::new());
        assert_eq!(lock.with_lock(|| 40 + 2), 42);
    }

    #[test]
    fn sections_do_not_overlap() {
        let lock: Arc<dyn LockStrategy> = Arc::new(MutexStrategy::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let inside = Arc::clone(&inside);
                let max_inside = Arc::clone(&max_inside);
                thread::spawn(move || {
                    for _ in 0..100 {
                        lock.with_lock(|| {
                            let n = inside.fetch_add(1, Ordering::SeqCst) + 1;
                            max_inside.fetch_max(n, Ordering::SeqCst);
                            thread::yield_now();
                            inside.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                })
            })
            .collect();

        for t in threads {
            t.join().expect("Failed to join");
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }
}
