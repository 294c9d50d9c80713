//! Removal notifications.

pub(crate) mod notifier;

use std::sync::Arc;

/// A callback invoked when an entry leaves a map.
///
/// It receives the key, a clone of the value and the reason of the removal.
/// It is called exactly once per entry, on the thread that removed the entry
/// (for expirations, usually the timer driver thread) and outside of any map
/// lock, so it may call back into the map.
pub type RemovalListener<K, V> = Arc<dyn Fn(Arc<K>, V, RemovalCause) + Send + Sync + 'static>;

/// Indicates the reason why an entry was removed from a map.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemovalCause {
    /// The entry's deadline has passed.
    Expired,
    /// The entry was removed by the user.
    Explicit,
    /// The entry held a computation that has completed, and the map was asked
    /// to drop such entries on completion.
    Completed,
}

impl RemovalCause {
    pub fn was_expired(&self) -> bool {
        matches!(self, Self::Expired)
    }
}
