use super::{Computation, TimedTaskMap};
use crate::{common::error::BuildError, sync::TimedMapBuilder};

use std::{
    collections::hash_map::RandomState,
    hash::{BuildHasher, Hash},
};

impl<K, V> TimedMapBuilder<K, Computation<V>, TimedTaskMap<K, V, RandomState>>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Builds a `TimedTaskMap<K, V>`.
    ///
    /// # Errors
    ///
    /// Returns an error if zero shards were requested, or if the timer thread
    /// could not be spawned.
    pub fn build(self) -> Result<TimedTaskMap<K, V, RandomState>, BuildError> {
        self.build_with_hasher(RandomState::default())
    }

    /// Builds a `TimedTaskMap<K, V, S>` with the given `hasher`.
    ///
    /// # Errors
    ///
    /// See [`build`](#method.build).
    pub fn build_with_hasher<S>(self, hasher: S) -> Result<TimedTaskMap<K, V, S>, BuildError>
    where
        S: BuildHasher + Clone + Send + Sync + 'static,
    {
        self.build_map(hasher).map(TimedTaskMap::from_map)
    }
}

#[cfg(test)]
mod tests {
    use crate::future::TimedTaskMap;

    use std::time::Duration;

    #[tokio::test]
    async fn build_task_map() {
        let map: TimedTaskMap<u32, String> = TimedTaskMap::builder()
            .name("tasks")
            .expected_duration(Duration::from_secs(60))
            .shards(4)
            .build()
            .expect("Failed to build");

        let policy = map.policy();
        assert_eq!(policy.expected_duration(), Some(Duration::from_secs(60)));
        assert_eq!(policy.num_shards(), 4);
        assert_eq!(map.name(), Some("tasks"));
    }
}
