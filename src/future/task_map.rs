use super::{Computation, TimedTaskMapBuilder};
use crate::{
    notification::{RemovalCause, RemovalListener},
    sync::{entry::Entry, TimedMap},
    Policy,
};

use futures_util::{future, FutureExt};
use parking_lot::Mutex;
use std::{
    borrow::Borrow,
    collections::hash_map::RandomState,
    fmt,
    future::Future,
    hash::{BuildHasher, Hash},
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Weak},
};

/// What a [`TimedTaskMap`][task-map] does with an entry once its computation
/// has completed.
///
/// [task-map]: ./struct.TimedTaskMap.html
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AfterCompletion {
    /// Keep the entry until its deadline, so that later callers get the
    /// completed result.
    #[default]
    DoNothing,
    /// Remove the entry as soon as the computation completes, so that the
    /// next caller starts a new one.
    RemoveFromMap,
}

/// A thread-safe map of shared asynchronous computations, with expiring
/// entries.
///
/// `TimedTaskMap` is a [`TimedMap`][timed-map] whose values are
/// [`Computation`][computation]s. Concurrent callers of
/// [`get_or_add_if_new`](#method.get_or_add_if_new) for the same key share a
/// single computation: only one of them calls its producer, and all of them
/// await the same output.
///
/// Computations are lazy. They make progress while at least one caller polls
/// a handle to them.
///
/// # Examples
///
/// ```rust
/// // Cargo.toml
/// //
/// // [dependencies]
/// // timed-map = { version = "0.3", features = ["future"] }
/// // tokio = { version = "1", features = ["rt-multi-thread", "macros" ] }
/// use timed_map::future::{AfterCompletion, TimedTaskMap};
///
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() {
///     let map = TimedTaskMap::builder()
///         .expected_duration(Duration::from_secs(30))
///         .build()
///         .expect("Failed to build the map");
///
///     let first = map.get_or_add_if_new(
///         "config",
///         || async { "loaded".to_string() },
///         AfterCompletion::DoNothing,
///     );
///     // Shares the computation started by the first call.
///     let second = map.get_or_add_if_new(
///         "config",
///         || async { "not called".to_string() },
///         AfterCompletion::DoNothing,
///     );
///
///     assert_eq!(first.await, "loaded");
///     assert_eq!(second.await, "loaded");
/// }
/// ```
///
/// [timed-map]: ../sync/struct.TimedMap.html
/// [computation]: ./type.Computation.html
pub struct TimedTaskMap<K, V, S = RandomState> {
    map: TimedMap<K, Computation<V>, S>,
}

impl<K, V, S> Clone for TimedTaskMap<K, V, S> {
    /// Makes a clone of this shared map.
    ///
    /// This operation is cheap as it only creates thread-safe reference counted
    /// pointers to the shared internal data structures.
    fn clone(&self) -> Self {
        Self {
            map: self.map.clone(),
        }
    }
}

impl<K, V, S> fmt::Debug for TimedTaskMap<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimedTaskMap")
            .field("name", &self.name())
            .field("entry_count", &self.entry_count())
            .finish()
    }
}

impl<K, V> TimedTaskMap<K, V, RandomState>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Returns a [`TimedMapBuilder`][builder-struct], which can build a
    /// `TimedTaskMap` with various configuration knobs.
    ///
    /// [builder-struct]: ./type.TimedTaskMapBuilder.html
    pub fn builder() -> TimedTaskMapBuilder<K, V> {
        TimedTaskMapBuilder::default()
    }
}

impl<K, V, S> TimedTaskMap<K, V, S> {
    pub(crate) fn from_map(map: TimedMap<K, Computation<V>, S>) -> Self {
        Self { map }
    }

    /// Returns the name of this map, if one was given to the builder.
    pub fn name(&self) -> Option<&str> {
        self.map.name()
    }

    /// Returns a read-only view of the configuration of this map.
    pub fn policy(&self) -> Policy {
        self.map.policy()
    }

    /// Returns the number of entries currently stored in this map.
    pub fn entry_count(&self) -> usize {
        self.map.entry_count()
    }

    /// Removes every entry whose deadline has passed, on the calling thread.
    pub fn run_pending_tasks(&self) {
        self.map.run_pending_tasks();
    }
}

impl<K, V, S> TimedTaskMap<K, V, S>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    /// Returns `true` if the map holds a live entry for the key.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.contains_key(key)
    }

    /// Returns a handle to the computation stored under the key.
    pub fn get<Q>(&self, key: &Q) -> Option<Computation<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.get(key)
    }

    /// Returns a handle to the computation stored under the key. If there is
    /// none, calls `produce`, stores the future it returns as a new
    /// computation and returns a handle to it.
    ///
    /// `produce` is called at most once across concurrent callers for the same
    /// key. A failure of the computation is part of its output `V` (for
    /// example `V = Result<T, Arc<E>>`) and every caller gets it.
    ///
    /// With [`AfterCompletion::RemoveFromMap`][remove-from-map], the entry is
    /// removed with [`RemovalCause::Completed`][completed] once the
    /// computation has completed, or has panicked.
    ///
    /// [remove-from-map]: ./enum.AfterCompletion.html#variant.RemoveFromMap
    /// [completed]: ../notification/enum.RemovalCause.html#variant.Completed
    pub fn get_or_add_if_new<F, Fut>(
        &self,
        key: K,
        produce: F,
        after_completion: AfterCompletion,
    ) -> Computation<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        self.get_or_insert_computation(key, produce, after_completion, None)
    }

    /// Like [`get_or_add_if_new`](#method.get_or_add_if_new), but if a new
    /// entry is stored, the given listener is called instead of the map's
    /// listener when it is removed.
    pub fn get_or_add_if_new_with_listener<F, Fut>(
        &self,
        key: K,
        produce: F,
        after_completion: AfterCompletion,
        listener: impl Fn(Arc<K>, Computation<V>, RemovalCause) + Send + Sync + 'static,
    ) -> Computation<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        self.get_or_insert_computation(key, produce, after_completion, Some(Arc::new(listener)))
    }

    /// Like [`get_or_add_if_new`](#method.get_or_add_if_new), but with a
    /// synchronous producer. The stored computation is already complete.
    pub fn get_or_add_if_new_with(&self, key: K, produce: impl FnOnce() -> V) -> Computation<V> {
        self.map
            .get_or_add_if_new(key, || ready(produce()))
    }

    /// Stores an already completed computation for `value` unless a live entry
    /// exists for the key. Returns `true` if it was stored.
    pub fn try_add(&self, key: K, value: V) -> bool {
        self.map.try_add(key, ready(value))
    }

    /// Like [`try_add`](#method.try_add), but the given listener is called
    /// instead of the map's listener when the entry is removed.
    pub fn try_add_with_listener(
        &self,
        key: K,
        value: V,
        listener: impl Fn(Arc<K>, Computation<V>, RemovalCause) + Send + Sync + 'static,
    ) -> bool {
        self.map.try_add_with_listener(key, ready(value), listener)
    }

    /// Stores `fut` as a computation unless a live entry exists for the key.
    /// Returns `true` if it was stored.
    pub fn try_add_computation<Fut>(&self, key: K, fut: Fut) -> bool
    where
        Fut: Future<Output = V> + Send + 'static,
    {
        self.map.try_add(key, fut.boxed().shared())
    }

    /// Like [`try_add_computation`](#method.try_add_computation), but the
    /// given listener is called instead of the map's listener when the entry
    /// is removed.
    pub fn try_add_computation_with_listener<Fut>(
        &self,
        key: K,
        fut: Fut,
        listener: impl Fn(Arc<K>, Computation<V>, RemovalCause) + Send + Sync + 'static,
    ) -> bool
    where
        Fut: Future<Output = V> + Send + 'static,
    {
        self.map
            .try_add_with_listener(key, fut.boxed().shared(), listener)
    }

    /// Removes the entry for the key. Returns `true` if an entry was removed.
    ///
    /// Handles to the computation that were already handed out stay valid.
    pub fn remove<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.remove(key)
    }

    fn get_or_insert_computation<F, Fut>(
        &self,
        key: K,
        produce: F,
        after_completion: AfterCompletion,
        listener: Option<RemovalListener<K, Computation<V>>>,
    ) -> Computation<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        match after_completion {
            AfterCompletion::DoNothing => self.map.get_or_insert_with_hook(
                key,
                || produce().boxed().shared(),
                listener,
                |_| (),
            ),
            AfterCompletion::RemoveFromMap => {
                let tracker = Arc::new(CompletionTracker::default());
                let on_complete = Arc::clone(&tracker);
                self.map.get_or_insert_with_hook(
                    key,
                    move || {
                        let fut = produce();
                        async move {
                            // The inner future is never polled again after a
                            // panic, so catching it here is safe.
                            let result = AssertUnwindSafe(fut).catch_unwind().await;
                            on_complete.complete();
                            match result {
                                Ok(value) => value,
                                Err(payload) => panic::resume_unwind(payload),
                            }
                        }
                        .boxed()
                        .shared()
                    },
                    listener,
                    |entry| tracker.attach(entry),
                )
            }
        }
    }
}

fn ready<V>(value: V) -> Computation<V>
where
    V: Clone + Send + 'static,
{
    future::ready(value).boxed().shared()
}

/// Links a computation to the entry that stores it, so that whichever of
/// "computation completed" and "entry stored" happens last removes the entry.
struct CompletionTracker<K, V> {
    state: Mutex<TrackerState<K, V>>,
}

struct TrackerState<K, V> {
    entry: Option<Weak<Entry<K, Computation<V>>>>,
    is_done: bool,
}

impl<K, V> Default for CompletionTracker<K, V> {
    fn default() -> Self {
        Self {
            state: Mutex::new(TrackerState {
                entry: None,
                is_done: false,
            }),
        }
    }
}

impl<K, V> CompletionTracker<K, V>
where
    K: Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn attach(&self, entry: &Arc<Entry<K, Computation<V>>>) {
        let is_done = {
            let mut state = self.state.lock();
            if !state.is_done {
                state.entry = Some(Arc::downgrade(entry));
            }
            state.is_done
        };

        if is_done {
            entry.remove_self(RemovalCause::Completed);
        }
    }

    fn complete(&self) {
        let entry = {
            let mut state = self.state.lock();
            state.is_done = true;
            state.entry.take()
        };

        if let Some(entry) = entry.and_then(|weak| weak.upgrade()) {
            entry.remove_self(RemovalCause::Completed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AfterCompletion, TimedTaskMap};
    use crate::{notification::RemovalCause, ManualClock};

    use parking_lot::Mutex;
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    #[tokio::test]
    async fn remove_from_map_after_completion() {
        let causes = Arc::new(Mutex::new(Vec::new()));
        let c1 = Arc::clone(&causes);
        let map: TimedTaskMap<u32, u32> = TimedTaskMap::builder()
            .expected_duration(Duration::from_secs(60))
            .removal_listener(move |k, _v, cause| c1.lock().push((*k, cause)))
            .build()
            .expect("Failed to build");

        let computation = map.get_or_add_if_new(
            1,
            || async { 10 },
            AfterCompletion::RemoveFromMap,
        );
        assert!(map.contains_key(&1));
        assert_eq!(computation.await, 10);

        assert!(!map.contains_key(&1));
        assert_eq!(map.entry_count(), 0);
        assert_eq!(*causes.lock(), vec![(1, RemovalCause::Completed)]);
    }

    #[tokio::test]
    async fn per_call_listener_overrides_map_listener() {
        let map_causes = Arc::new(Mutex::new(Vec::new()));
        let m1 = Arc::clone(&map_causes);
        let map: TimedTaskMap<u32, u32> = TimedTaskMap::builder()
            .expected_duration(Duration::from_secs(60))
            .removal_listener(move |k, _v, cause| m1.lock().push((*k, cause)))
            .build()
            .expect("Failed to build");

        let own = Arc::new(Mutex::new(Vec::new()));
        let own1 = Arc::clone(&own);
        let v = map
            .get_or_add_if_new_with_listener(
                1,
                || async { 10 },
                AfterCompletion::RemoveFromMap,
                move |k, _v, cause| own1.lock().push((*k, cause)),
            )
            .await;
        assert_eq!(v, 10);
        assert!(!map.contains_key(&1));

        let own2 = Arc::clone(&own);
        assert!(map.try_add_with_listener(2, 20, move |k, _v, cause| {
            own2.lock().push((*k, cause))
        }));
        let own3 = Arc::clone(&own);
        assert!(
            map.try_add_computation_with_listener(3, async { 30 }, move |k, _v, cause| {
                own3.lock().push((*k, cause))
            })
        );
        assert!(map.remove(&2));
        assert!(map.remove(&3));

        assert_eq!(
            *own.lock(),
            vec![
                (1, RemovalCause::Completed),
                (2, RemovalCause::Explicit),
                (3, RemovalCause::Explicit),
            ]
        );
        assert!(map_causes.lock().is_empty());
    }

    #[tokio::test]
    async fn completion_driven_by_a_reader_removes_entry() {
        let map: TimedTaskMap<u32, u32> = TimedTaskMap::builder()
            .expected_duration(Duration::from_secs(60))
            .build()
            .expect("Failed to build");

        // Polled to completion through a handle obtained by `get`, before the
        // caller that stored it awaits its own handle.
        let computation =
            map.get_or_add_if_new(1, || async { 1 }, AfterCompletion::RemoveFromMap);
        let from_reader = map.get(&1).expect("stored");
        assert_eq!(from_reader.await, 1);
        assert!(!map.contains_key(&1));
        assert_eq!(computation.await, 1);
    }

    #[tokio::test]
    async fn do_nothing_keeps_result_until_deadline() {
        let clock = ManualClock::new();
        let map: TimedTaskMap<u32, u32> = TimedTaskMap::builder()
            .expected_duration(Duration::from_secs(1))
            .time_source(clock.clone())
            .build()
            .expect("Failed to build");

        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            let v = map
                .get_or_add_if_new(
                    1,
                    move || async move { calls.fetch_add(1, Ordering::SeqCst) as u32 },
                    AfterCompletion::DoNothing,
                )
                .await;
            assert_eq!(v, 0);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(1));
        map.run_pending_tasks();
        assert_eq!(map.entry_count(), 0);
    }

    #[tokio::test]
    async fn sync_producer_and_try_add() {
        let map: TimedTaskMap<&'static str, u32> =
            TimedTaskMap::builder().build().expect("Failed to build");

        assert_eq!(map.get_or_add_if_new_with("a", || 1).await, 1);
        assert!(!map.try_add("a", 2));
        assert!(map.try_add("b", 2));
        assert!(map.try_add_computation("c", async { 3 }));
        assert!(!map.try_add_computation("c", async { 4 }));

        assert_eq!(map.get(&"b").expect("b").await, 2);
        assert_eq!(map.get(&"c").expect("c").await, 3);
        assert!(map.remove(&"c"));
        assert!(map.get(&"c").is_none());
    }
}
