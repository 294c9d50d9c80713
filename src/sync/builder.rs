use super::TimedMap;
use crate::{
    common::{
        error::BuildError,
        lifetime::ExtendTimeConfiguration,
        lock::{LockStrategy, LockStrategyFactory, MutexStrategy},
        time::{MonotonicClock, TimeSource},
        DEFAULT_NUM_SHARDS,
    },
    notification::{RemovalCause, RemovalListener},
};

use std::{
    collections::hash_map::RandomState,
    hash::{BuildHasher, Hash},
    marker::PhantomData,
    sync::Arc,
    time::Duration,
};

/// Builds a [`TimedMap`][map-struct] with various configuration knobs.
///
/// [map-struct]: ./struct.TimedMap.html
///
/// # Examples
///
/// ```rust
/// use timed_map::{sync::TimedMap, ExtendTimeConfiguration};
///
/// use std::time::Duration;
///
/// let map = TimedMap::builder()
///     .name("sessions")
///     // New entries live for 5 minutes.
///     .expected_duration(Duration::from_secs(5 * 60))
///     // Every read pushes the deadline to at least 5 minutes from now, but
///     // never more than 1 hour past the original deadline.
///     .extend_time(ExtendTimeConfiguration::with_limit(
///         Duration::from_secs(5 * 60),
///         Duration::from_secs(60 * 60),
///     ))
///     // Stop storing new entries above 10,000.
///     .maximum_size(10_000)
///     .build()
///     .expect("Failed to build the map");
///
/// map.get_or_add_if_new(1, || "session one".to_string());
/// # assert_eq!(map.policy().maximum_size(), Some(10_000));
/// ```
pub struct TimedMapBuilder<K, V, C> {
    name: Option<String>,
    expected_duration: Option<Duration>,
    maximum_size: Option<usize>,
    extend_time: ExtendTimeConfiguration,
    removal_listener: Option<RemovalListener<K, V>>,
    time_source: Option<Arc<dyn TimeSource>>,
    lock_strategy: Option<LockStrategyFactory>,
    num_shards: usize,
    map_type: PhantomData<C>,
}

impl<K, V, C> Default for TimedMapBuilder<K, V, C> {
    fn default() -> Self {
        Self {
            name: None,
            expected_duration: None,
            maximum_size: None,
            extend_time: ExtendTimeConfiguration::NONE,
            removal_listener: None,
            time_source: None,
            lock_strategy: None,
            num_shards: DEFAULT_NUM_SHARDS,
            map_type: PhantomData,
        }
    }
}

impl<K, V> TimedMapBuilder<K, V, TimedMap<K, V, RandomState>>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Builds a `TimedMap<K, V>`.
    ///
    /// # Errors
    ///
    /// Returns an error if zero shards were requested, or if the timer thread
    /// could not be spawned.
    pub fn build(self) -> Result<TimedMap<K, V, RandomState>, BuildError> {
        self.build_map(RandomState::default())
    }

    /// Builds a `TimedMap<K, V, S>` with the given `hasher`.
    ///
    /// # Errors
    ///
    /// See [`build`](#method.build).
    pub fn build_with_hasher<S>(self, hasher: S) -> Result<TimedMap<K, V, S>, BuildError>
    where
        S: BuildHasher + Clone + Send + Sync + 'static,
    {
        self.build_map(hasher)
    }
}

impl<K, V, C> TimedMapBuilder<K, V, C> {
    /// Sets the name of the map. It is used in log messages and in the name of
    /// the timer thread.
    pub fn name(self, name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..self
        }
    }

    /// Sets the initial lifetime of new entries. Without it, entries never
    /// expire and no timer thread is started.
    pub fn expected_duration(self, duration: Duration) -> Self {
        Self {
            expected_duration: Some(duration),
            ..self
        }
    }

    /// Sets the size at which `get_or_add_if_new` starts returning produced
    /// values without storing them. The check is advisory: concurrent
    /// producers may push the size slightly above it.
    pub fn maximum_size(self, size: usize) -> Self {
        Self {
            maximum_size: Some(size),
            ..self
        }
    }

    /// Sets how reads extend the lifetime of entries.
    pub fn extend_time(self, config: ExtendTimeConfiguration) -> Self {
        Self {
            extend_time: config,
            ..self
        }
    }

    /// Sets the removal listener used for entries that were not given their
    /// own listener.
    pub fn removal_listener(
        self,
        listener: impl Fn(Arc<K>, V, RemovalCause) + Send + Sync + 'static,
    ) -> Self {
        Self {
            removal_listener: Some(Arc::new(listener)),
            ..self
        }
    }

    /// Sets the source of the current time. Defaults to a
    /// [`MonotonicClock`][monotonic].
    ///
    /// [monotonic]: ../struct.MonotonicClock.html
    pub fn time_source(self, source: Arc<dyn TimeSource>) -> Self {
        Self {
            time_source: Some(source),
            ..self
        }
    }

    /// Sets the factory of the critical sections guarding each shard. It is
    /// called once per shard. Defaults to a [`MutexStrategy`][mutex] per
    /// shard.
    ///
    /// [mutex]: ../struct.MutexStrategy.html
    pub fn lock_strategy(
        self,
        factory: impl Fn() -> Arc<dyn LockStrategy> + Send + Sync + 'static,
    ) -> Self {
        Self {
            lock_strategy: Some(Arc::new(factory)),
            ..self
        }
    }

    /// Sets the number of shards. It is rounded up to the next power of two.
    /// Defaults to 256.
    pub fn shards(self, num_shards: usize) -> Self {
        Self { num_shards, ..self }
    }

    pub(crate) fn build_map<S>(self, hasher: S) -> Result<TimedMap<K, V, S>, BuildError>
    where
        K: Hash + Eq + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
        S: BuildHasher + Clone + Send + Sync + 'static,
    {
        let time_source = self
            .time_source
            .unwrap_or_else(|| Arc::new(MonotonicClock::new()) as Arc<dyn TimeSource>);
        let lock_strategy = self.lock_strategy.unwrap_or_else(MutexStrategy::factory);

        TimedMap::with_everything(
            self.name,
            self.expected_duration,
            self.maximum_size,
            self.extend_time,
            self.removal_listener,
            time_source,
            lock_strategy,
            self.num_shards,
            hasher,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::TimedMapBuilder;
    use crate::{sync::TimedMap, ExtendTimeConfiguration};

    use std::time::Duration;

    #[test]
    fn build_map() {
        let builder: TimedMapBuilder<char, String, _> = TimedMap::builder();
        let map = builder.build().expect("Failed to build");
        let policy = map.policy();
        assert_eq!(policy.expected_duration(), None);
        assert_eq!(policy.maximum_size(), None);
        assert_eq!(policy.extend_time(), ExtendTimeConfiguration::NONE);
        assert_eq!(policy.num_shards(), 256);

        map.get_or_add_if_new('a', || "Alice".to_string());
        assert_eq!(map.get(&'a'), Some("Alice".to_string()));

        let map = TimedMap::builder()
            .expected_duration(Duration::from_secs(45 * 60))
            .maximum_size(100)
            .extend_time(ExtendTimeConfiguration::new(Duration::from_secs(15 * 60)))
            .shards(16)
            .build()
            .expect("Failed to build");
        let policy = map.policy();
        assert_eq!(policy.expected_duration(), Some(Duration::from_secs(45 * 60)));
        assert_eq!(policy.maximum_size(), Some(100));
        assert_eq!(
            policy.extend_time().duration(),
            Some(Duration::from_secs(15 * 60))
        );
        assert_eq!(policy.num_shards(), 16);

        map.get_or_add_if_new('b', || "Bob".to_string());
        assert_eq!(map.get(&'b'), Some("Bob".to_string()));
    }
}
