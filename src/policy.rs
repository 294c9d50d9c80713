use std::time::Duration;

use crate::common::lifetime::ExtendTimeConfiguration;

#[derive(Clone, Debug)]
/// The configuration a map was built with.
pub struct Policy {
    expected_duration: Option<Duration>,
    maximum_size: Option<usize>,
    extend_time: ExtendTimeConfiguration,
    num_shards: usize,
}

impl Policy {
    pub(crate) fn new(
        expected_duration: Option<Duration>,
        maximum_size: Option<usize>,
        extend_time: ExtendTimeConfiguration,
        num_shards: usize,
    ) -> Self {
        Self {
            expected_duration,
            maximum_size,
            extend_time,
            num_shards,
        }
    }

    /// Returns the initial lifetime given to new entries. `None` means entries
    /// never expire.
    pub fn expected_duration(&self) -> Option<Duration> {
        self.expected_duration
    }

    /// Returns the size above which `get_or_add_if_new` stops storing new
    /// entries.
    pub fn maximum_size(&self) -> Option<usize> {
        self.maximum_size
    }

    /// Returns how reads extend entry lifetimes.
    pub fn extend_time(&self) -> ExtendTimeConfiguration {
        self.extend_time
    }

    /// Returns the number of internal shards of the map.
    pub fn num_shards(&self) -> usize {
        self.num_shards
    }
}
