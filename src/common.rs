pub(crate) mod error;
pub(crate) mod lifetime;
pub(crate) mod lock;
pub(crate) mod scheduler;
pub(crate) mod time;
pub(crate) mod timer_queue;

/// The number of shards used when the builder is not told otherwise.
pub(crate) const DEFAULT_NUM_SHARDS: usize = 256;

#[cfg(feature = "logging")]
pub(crate) fn log_prefix(map_name: Option<&str>) -> String {
    map_name
        .map(|name| format!("[{name}] "))
        .unwrap_or_default()
}

#[cfg(test)]
pub(crate) fn available_parallelism() -> usize {
    use std::{num::NonZeroUsize, thread::available_parallelism};
    available_parallelism().map(NonZeroUsize::get).unwrap_or(1)
}
