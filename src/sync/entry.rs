use crate::{
    common::{
        lifetime::EntryLifetime,
        scheduler::DeadlineScheduler,
        time::Timestamp,
        timer_queue::{Expire, TimerQueue},
    },
    notification::{RemovalCause, RemovalListener},
};

use parking_lot::Mutex;
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

/// The side of a shard that entries can call back into, without knowing the
/// shard's hasher type.
pub(crate) trait EntryOwner<K, V>: Send + Sync {
    /// Removes `entry` if it is still the entry stored under its key. Returns
    /// `true` if this call removed it.
    fn remove_entry(&self, entry: &Arc<Entry<K, V>>, cause: RemovalCause) -> bool;
}

/// A key-value pair stored in a map, with its deadline bookkeeping.
pub(crate) struct Entry<K, V> {
    key: Arc<K>,
    value: V,
    lifetime: Mutex<EntryLifetime>,
    scheduler: DeadlineScheduler,
    is_removed: AtomicBool,
    listener: Option<RemovalListener<K, V>>,
    owner: Weak<dyn EntryOwner<K, V>>,
}

impl<K, V> fmt::Debug for Entry<K, V>
where
    K: fmt::Debug,
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("key", &self.key)
            .field("value", &self.value)
            .field("lifetime", &*self.lifetime.lock())
            .field("scheduler", &self.scheduler)
            .field("is_removed", &self.is_removed.load(Ordering::Acquire))
            .finish()
    }
}

impl<K, V> Entry<K, V> {
    pub(crate) fn new(
        key: Arc<K>,
        value: V,
        lifetime: EntryLifetime,
        timers: &Arc<TimerQueue>,
        listener: Option<RemovalListener<K, V>>,
        owner: Weak<dyn EntryOwner<K, V>>,
    ) -> Self {
        let scheduler = DeadlineScheduler::new(timers, lifetime.current_limit());
        Self {
            key,
            value,
            lifetime: Mutex::new(lifetime),
            scheduler,
            is_removed: AtomicBool::new(false),
            listener,
            owner,
        }
    }

    #[inline]
    pub(crate) fn key(&self) -> &Arc<K> {
        &self.key
    }

    #[inline]
    pub(crate) fn value(&self) -> &V {
        &self.value
    }

    pub(crate) fn listener(&self) -> Option<&RemovalListener<K, V>> {
        self.listener.as_ref()
    }

    pub(crate) fn is_expired(&self, now: Timestamp) -> bool {
        self.lifetime.lock().is_expired(now)
    }

    pub(crate) fn age(&self, now: Timestamp) -> Duration {
        self.lifetime.lock().current_lifetime(now)
    }

    pub(crate) fn time_to_expire(&self, now: Timestamp) -> Option<Duration> {
        self.lifetime.lock().until_limit(now)
    }

    /// Extends the lifetime for a read at `now` and pushes the deadline of the
    /// scheduler accordingly.
    pub(crate) fn refresh(&self, now: Timestamp) {
        let mut lifetime = self.lifetime.lock();
        if let Some(deadline) = lifetime.extend_current_limit(now) {
            self.scheduler.reschedule_to(deadline);
        }
    }

    /// Claims the expiration for a reader that found the entry past its
    /// deadline. Returns `true` if the caller must remove the entry.
    pub(crate) fn claim_expiration(&self, now: Timestamp) -> bool {
        self.scheduler.fire_if_due(now)
    }

    /// Flags the entry as removed. Returns `true` only for the first call.
    ///
    /// Must be called while holding the lock of the owning shard.
    #[cfg(test)]
    pub(crate) fn is_removed(&self) -> bool {
        self.is_removed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_removed(&self) -> bool {
        let first = !self.is_removed.swap(true, Ordering::AcqRel);
        if first {
            self.scheduler.cancel();
        }
        first
    }
}

impl<K, V> Entry<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Removes this entry from its shard, if it is still there.
    pub(crate) fn remove_self(self: &Arc<Self>, cause: RemovalCause) -> bool {
        match self.owner.upgrade() {
            Some(owner) => owner.remove_entry(self, cause),
            None => false,
        }
    }

    /// Starts the expiration timer. Returns `true` if the deadline has already
    /// passed, in which case the caller must remove the entry.
    pub(crate) fn start_timer(self: &Arc<Self>, now: Timestamp) -> bool {
        let target: Weak<Self> = Arc::downgrade(self);
        self.scheduler.start(target, now)
    }
}

impl<K, V> Expire for Entry<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn on_deadline(self: Arc<Self>, now: Timestamp) {
        let target: Weak<Self> = Arc::downgrade(&self);
        // Serialized with `refresh`, which moves the deadline under this lock.
        let is_due = {
            let _lifetime = self.lifetime.lock();
            self.scheduler.on_wake(target, now)
        };
        if is_due {
            #[cfg(feature = "logging")]
            log::trace!("Entry deadline reached at {now}");
            self.remove_self(RemovalCause::Expired);
        }
    }
}
