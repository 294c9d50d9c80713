use super::{
    entry::Entry,
    shard::{MapSettings, Shard},
    TimedMapBuilder,
};
use crate::{
    common::{
        error::BuildError,
        lifetime::ExtendTimeConfiguration,
        lock::LockStrategyFactory,
        time::TimeSource,
        timer_queue::{TimerDriver, TimerQueue},
    },
    notification::{notifier::RemovalNotifier, RemovalCause, RemovalListener},
    Policy,
};

use std::{
    borrow::Borrow,
    collections::hash_map::RandomState,
    convert::Infallible,
    fmt,
    hash::{BuildHasher, Hash, Hasher},
    sync::Arc,
    time::Duration,
};

/// A thread-safe concurrent map whose entries expire a fixed amount of time
/// after they were stored.
///
/// Every entry gets a deadline of "creation time + expected duration" when it
/// is added. Once the deadline has passed the entry is treated as absent, and
/// a background timer removes it from the map and calls the removal listener.
/// Reads can push the deadline forward, see
/// [`ExtendTimeConfiguration`][extend-time].
///
/// The central operation is [`get_or_add_if_new`](#method.get_or_add_if_new):
/// when several threads ask for the same missing key at the same time, exactly
/// one of them runs its producer and all of them get the stored value.
///
/// The map is split into shards, each with its own table and lock. Reads never
/// wait for a producer to finish.
///
/// # Examples
///
/// ```rust
/// use timed_map::sync::TimedMap;
///
/// use std::time::Duration;
///
/// let map = TimedMap::builder()
///     .expected_duration(Duration::from_secs(60))
///     .build()
///     .expect("Failed to build the map");
///
/// let v = map.get_or_add_if_new("answer", || 42);
/// assert_eq!(v, 42);
///
/// // The producer does not run again while the entry is alive.
/// let v = map.get_or_add_if_new("answer", || unreachable!());
/// assert_eq!(v, 42);
///
/// assert_eq!(map.get(&"answer"), Some(42));
/// assert!(map.remove(&"answer"));
/// assert!(!map.contains_key(&"answer"));
/// ```
///
/// # Removal listener
///
/// A listener can be registered for the whole map with the builder's
/// [`removal_listener`][builder-listener] method, or per entry with the
/// `*_with_listener` methods. It is called once per entry, outside of any map
/// lock, with the reason of the removal.
///
/// ```rust
/// use timed_map::{sync::TimedMap, ManualClock, RemovalCause};
///
/// use std::{
///     sync::{Arc, Mutex},
///     time::Duration,
/// };
///
/// let clock = ManualClock::new();
/// let removed = Arc::new(Mutex::new(Vec::new()));
/// let removed2 = Arc::clone(&removed);
///
/// let map = TimedMap::builder()
///     .expected_duration(Duration::from_secs(10))
///     .time_source(clock.clone())
///     .removal_listener(move |k: Arc<u32>, v: String, cause| {
///         removed2.lock().unwrap().push((*k, v, cause));
///     })
///     .build()
///     .unwrap();
///
/// map.get_or_add_if_new(1, || "one".to_string());
///
/// clock.advance(Duration::from_secs(10));
/// map.run_pending_tasks();
///
/// assert_eq!(
///     *removed.lock().unwrap(),
///     vec![(1, "one".to_string(), RemovalCause::Expired)]
/// );
/// ```
///
/// [extend-time]: ../struct.ExtendTimeConfiguration.html
/// [builder-listener]: ./struct.TimedMapBuilder.html#method.removal_listener
pub struct TimedMap<K, V, S = RandomState> {
    inner: Arc<Inner<K, V, S>>,
}

impl<K, V, S> Clone for TimedMap<K, V, S> {
    /// Makes a clone of this shared map.
    ///
    /// This operation is cheap as it only creates thread-safe reference counted
    /// pointers to the shared internal data structures.
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V, S> fmt::Debug for TimedMap<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimedMap")
            .field("name", &self.name())
            .field("entry_count", &self.entry_count())
            .field("policy", &self.policy())
            .finish()
    }
}

impl<K, V> TimedMap<K, V, RandomState>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Returns a [`TimedMapBuilder`][builder-struct], which can build a
    /// `TimedMap` with various configuration knobs.
    ///
    /// [builder-struct]: ./struct.TimedMapBuilder.html
    pub fn builder() -> TimedMapBuilder<K, V, TimedMap<K, V, RandomState>> {
        TimedMapBuilder::default()
    }
}

impl<K, V, S> TimedMap<K, V, S> {
    /// Returns the name of this map, if one was given to the builder.
    pub fn name(&self) -> Option<&str> {
        self.inner.settings.name.as_deref()
    }

    /// Returns a read-only view of the configuration of this map.
    pub fn policy(&self) -> Policy {
        let settings = &self.inner.settings;
        Policy::new(
            settings.expected_duration,
            self.inner.maximum_size,
            settings.extend_time,
            self.inner.shards.len(),
        )
    }

    /// Returns the number of entries currently stored in this map.
    ///
    /// Entries past their deadline are counted until the timer has removed
    /// them. Call [`run_pending_tasks`](#method.run_pending_tasks) first for an
    /// exact figure in tests.
    pub fn entry_count(&self) -> usize {
        self.inner.shards.iter().map(|shard| shard.len()).sum()
    }

    /// Removes every entry whose deadline has passed, on the calling thread.
    ///
    /// The background timer does this on its own. This method is mostly
    /// useful together with a [`ManualClock`][manual-clock].
    ///
    /// [manual-clock]: ../struct.ManualClock.html
    pub fn run_pending_tasks(&self) {
        self.inner.settings.timers.run_pending();
    }
}

impl<K, V, S> TimedMap<K, V, S>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    // https://rust-lang.github.io/rust-clippy/master/index.html#too_many_arguments
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn with_everything(
        name: Option<String>,
        expected_duration: Option<Duration>,
        maximum_size: Option<usize>,
        extend_time: ExtendTimeConfiguration,
        removal_listener: Option<RemovalListener<K, V>>,
        time_source: Arc<dyn TimeSource>,
        lock_strategy: LockStrategyFactory,
        num_shards: usize,
        build_hasher: S,
    ) -> Result<Self, BuildError> {
        let inner = Inner::new(
            name,
            expected_duration,
            maximum_size,
            extend_time,
            removal_listener,
            time_source,
            lock_strategy,
            num_shards,
            build_hasher,
        )?;
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Returns `true` if the map holds a live entry for the key.
    ///
    /// Unlike [`get`](#method.get), this does not extend the entry's lifetime.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.inner.hash(key);
        self.inner.select(hash).contains_key(key)
    }

    /// Returns a _clone_ of the value corresponding to the key.
    ///
    /// An entry past its deadline is absent, and its removal is started right
    /// away. A successful read extends the entry's lifetime according to the
    /// map's [`ExtendTimeConfiguration`][extend-time].
    ///
    /// [extend-time]: ../struct.ExtendTimeConfiguration.html
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.inner.hash(key);
        self.inner.select(hash).get(key)
    }

    /// Returns how long ago the live entry for the key was stored.
    pub fn entry_age<Q>(&self, key: &Q) -> Option<Duration>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.inner.hash(key);
        self.inner.select(hash).entry_age(key)
    }

    /// Returns how long the live entry for the key has left before its
    /// deadline, without extending it. `None` if there is no live entry or if
    /// entries of this map never expire.
    pub fn time_to_expire<Q>(&self, key: &Q) -> Option<Duration>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.inner.hash(key);
        self.inner.select(hash).time_to_expire(key)
    }

    /// Stores the value under the key unless a live entry already exists.
    /// Returns `true` if the value was stored.
    ///
    /// This method does not check the maximum size.
    pub fn try_add(&self, key: K, value: V) -> bool {
        let hash = self.inner.hash(&key);
        self.inner.select(hash).try_insert(key, value, None)
    }

    /// Like [`try_add`](#method.try_add), but the given listener is called
    /// instead of the map's listener when the entry is removed.
    pub fn try_add_with_listener(
        &self,
        key: K,
        value: V,
        listener: impl Fn(Arc<K>, V, RemovalCause) + Send + Sync + 'static,
    ) -> bool {
        let hash = self.inner.hash(&key);
        self.inner
            .select(hash)
            .try_insert(key, value, Some(Arc::new(listener)))
    }

    /// Returns a _clone_ of the value of the live entry for the key. If there
    /// is none, calls `produce` and stores the returned value under the key.
    ///
    /// When several threads call this method for the same missing key at the
    /// same time, only one of them calls its `produce` closure. The others get
    /// the value it stored. `produce` runs while holding the shard's lock, so
    /// it must not call back into the same map.
    ///
    /// If the map holds `maximum_size` entries or more, `produce` is called and
    /// its value returned without being stored.
    ///
    /// # Panics
    ///
    /// Panics if `produce` panics. The map is left unchanged in that case.
    pub fn get_or_add_if_new(&self, key: K, produce: impl FnOnce() -> V) -> V {
        self.get_or_insert_with_hook(key, produce, None, |_| ())
    }

    /// Like [`get_or_add_if_new`](#method.get_or_add_if_new), but if a new
    /// entry is stored, the given listener is called instead of the map's
    /// listener when it is removed.
    pub fn get_or_add_if_new_with_listener(
        &self,
        key: K,
        produce: impl FnOnce() -> V,
        listener: impl Fn(Arc<K>, V, RemovalCause) + Send + Sync + 'static,
    ) -> V {
        self.get_or_insert_with_hook(key, produce, Some(Arc::new(listener)), |_| ())
    }

    /// Like [`get_or_add_if_new`](#method.get_or_add_if_new), but `produce` may
    /// fail. An error is returned to the caller that ran `produce`, and nothing
    /// is stored.
    ///
    /// ```rust
    /// use timed_map::sync::TimedMap;
    ///
    /// let map: TimedMap<&str, u32> = TimedMap::builder().build().unwrap();
    ///
    /// let r = map.try_get_or_add_if_new("a", || "x".parse::<u32>());
    /// assert!(r.is_err());
    /// assert!(!map.contains_key(&"a"));
    ///
    /// let r = map.try_get_or_add_if_new("a", || "7".parse::<u32>());
    /// assert_eq!(r, Ok(7));
    /// ```
    pub fn try_get_or_add_if_new<E>(
        &self,
        key: K,
        produce: impl FnOnce() -> Result<V, E>,
    ) -> Result<V, E> {
        let hash = self.inner.hash(&key);
        self.inner.select(hash).get_or_insert_with(
            key,
            produce,
            None,
            || self.is_full(),
            |_| (),
        )
    }

    /// Removes the entry for the key. Returns `true` if an entry was removed.
    ///
    /// The removal listener is called with
    /// [`RemovalCause::Explicit`][explicit].
    ///
    /// [explicit]: ../notification/enum.RemovalCause.html#variant.Explicit
    pub fn remove<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.inner.hash(key);
        self.inner.select(hash).remove(key)
    }

    /// `on_new_entry` runs once for a newly stored entry, before its timer is
    /// started.
    pub(crate) fn get_or_insert_with_hook(
        &self,
        key: K,
        produce: impl FnOnce() -> V,
        listener: Option<RemovalListener<K, V>>,
        on_new_entry: impl FnOnce(&Arc<Entry<K, V>>),
    ) -> V {
        let hash = self.inner.hash(&key);
        let result = self.inner.select(hash).get_or_insert_with(
            key,
            || Ok::<_, Infallible>(produce()),
            listener,
            || self.is_full(),
            on_new_entry,
        );
        match result {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    fn is_full(&self) -> bool {
        self.inner
            .maximum_size
            .map_or(false, |max| self.entry_count() >= max)
    }
}

struct Inner<K, V, S> {
    shards: Box<[Arc<Shard<K, V, S>>]>,
    build_hasher: S,
    shard_shift: u32,
    maximum_size: Option<usize>,
    settings: Arc<MapSettings<K, V>>,
    // Stops the timer thread when the last handle to the map goes away.
    _driver: Option<TimerDriver>,
}

impl<K, V, S> Inner<K, V, S>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    #[allow(clippy::too_many_arguments)]
    fn new(
        name: Option<String>,
        expected_duration: Option<Duration>,
        maximum_size: Option<usize>,
        extend_time: ExtendTimeConfiguration,
        removal_listener: Option<RemovalListener<K, V>>,
        time_source: Arc<dyn TimeSource>,
        lock_strategy: LockStrategyFactory,
        num_shards: usize,
        build_hasher: S,
    ) -> Result<Self, BuildError> {
        if num_shards == 0 {
            return Err(BuildError::ZeroShards);
        }

        let actual_num_shards = num_shards.next_power_of_two();
        let shard_shift = 64 - actual_num_shards.trailing_zeros();

        let timers = Arc::new(TimerQueue::new(time_source));
        // Without an expected duration no entry ever has a deadline.
        let driver = match expected_duration {
            Some(_) => Some(TimerDriver::spawn(Arc::clone(&timers), name.as_deref())?),
            None => None,
        };

        let settings = Arc::new(MapSettings {
            notifier: RemovalNotifier::new(name.clone()),
            name,
            expected_duration,
            extend_time,
            listener: removal_listener,
            timers,
        });

        let shards = (0..actual_num_shards)
            .map(|_| Shard::new(Arc::clone(&settings), lock_strategy(), build_hasher.clone()))
            .collect::<Vec<_>>();

        Ok(Self {
            shards: shards.into_boxed_slice(),
            build_hasher,
            shard_shift,
            maximum_size,
            settings,
            _driver: driver,
        })
    }

    #[inline]
    fn hash<Q>(&self, key: &Q) -> u64
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut hasher = self.build_hasher.build_hasher();
        key.hash(&mut hasher);
        hasher.finish()
    }

    #[inline]
    fn select(&self, hash: u64) -> &Shard<K, V, S> {
        let index = self.shard_index_from_hash(hash);
        &self.shards[index]
    }

    #[inline]
    fn shard_index_from_hash(&self, hash: u64) -> usize {
        if self.shard_shift == 64 {
            0
        } else {
            (hash >> self.shard_shift) as usize
        }
    }
}
