use super::entry::{Entry, EntryOwner};
use crate::{
    common::{
        lifetime::{EntryLifetime, ExtendTimeConfiguration},
        lock::LockStrategy,
        time::Timestamp,
        timer_queue::TimerQueue,
    },
    notification::{notifier::RemovalNotifier, RemovalCause, RemovalListener},
};

use crossbeam_utils::CachePadded;
use parking_lot::RwLock;
use std::{
    borrow::Borrow,
    collections::HashMap,
    hash::{BuildHasher, Hash},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

/// Configuration and services shared by every shard of a map.
pub(crate) struct MapSettings<K, V> {
    pub(crate) name: Option<String>,
    pub(crate) expected_duration: Option<Duration>,
    pub(crate) extend_time: ExtendTimeConfiguration,
    pub(crate) listener: Option<RemovalListener<K, V>>,
    pub(crate) timers: Arc<TimerQueue>,
    pub(crate) notifier: RemovalNotifier,
}

impl<K, V> MapSettings<K, V> {
    #[inline]
    pub(crate) fn now(&self) -> Timestamp {
        self.timers.now()
    }
}

enum Lookup<K, V> {
    Found(Arc<Entry<K, V>>),
    Inserted {
        entry: Arc<Entry<K, V>>,
        replaced: Option<Arc<Entry<K, V>>>,
    },
}

type Table<K, V, S> = HashMap<K, Arc<Entry<K, V>>, S>;

/// One partition of a map.
///
/// Readers only take the read side of the table lock. Every mutation goes
/// through the shard's `LockStrategy` first, so that the "check, produce,
/// insert" sequence of `get_or_insert_with` is atomic with respect to other
/// writers while readers keep going.
pub(crate) struct Shard<K, V, S> {
    me: Weak<Self>,
    table: RwLock<Table<K, V, S>>,
    lock: Arc<dyn LockStrategy>,
    len: CachePadded<AtomicUsize>,
    settings: Arc<MapSettings<K, V>>,
}

impl<K, V, S> Shard<K, V, S> {
    pub(crate) fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }
}

impl<K, V, S> Shard<K, V, S>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        settings: Arc<MapSettings<K, V>>,
        lock: Arc<dyn LockStrategy>,
        build_hasher: S,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            table: RwLock::new(HashMap::with_hasher(build_hasher)),
            lock,
            len: CachePadded::new(AtomicUsize::new(0)),
            settings,
        })
    }

    pub(crate) fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.settings.now();
        let entry = self.live_entry(key, now)?;
        entry.refresh(now);
        Some(entry.value().clone())
    }

    pub(crate) fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.settings.now();
        self.lookup(key)
            .map_or(false, |entry| !entry.is_expired(now))
    }

    pub(crate) fn entry_age<Q>(&self, key: &Q) -> Option<Duration>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.settings.now();
        self.live_entry(key, now).map(|entry| entry.age(now))
    }

    pub(crate) fn time_to_expire<Q>(&self, key: &Q) -> Option<Duration>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.settings.now();
        self.live_entry(key, now)
            .and_then(|entry| entry.time_to_expire(now))
    }

    pub(crate) fn try_insert(
        &self,
        key: K,
        value: V,
        listener: Option<RemovalListener<K, V>>,
    ) -> bool {
        let outcome = self.lock.with_lock(|| {
            let now = self.settings.now();
            if self.live_entry_locked(&key, now).is_some() {
                return None;
            }
            Some(self.insert_locked(key, value, listener, now))
        });

        match outcome {
            Some((entry, replaced)) => {
                self.after_insert(&entry, replaced, |_| ());
                true
            }
            None => false,
        }
    }

    /// Returns the value of the live entry for `key`, or stores the value
    /// returned by `produce` under it.
    ///
    /// `produce` runs at most once, inside the shard's critical section and
    /// only if no other writer stored an entry for `key` first. If `is_full`
    /// returns `true` the produced value is returned without being stored.
    ///
    /// `on_new_entry` runs once for the stored entry, after the critical
    /// section and before the entry's timer is started.
    pub(crate) fn get_or_insert_with<E>(
        &self,
        key: K,
        produce: impl FnOnce() -> Result<V, E>,
        listener: Option<RemovalListener<K, V>>,
        is_full: impl FnOnce() -> bool,
        on_new_entry: impl FnOnce(&Arc<Entry<K, V>>),
    ) -> Result<V, E> {
        let now = self.settings.now();
        if let Some(entry) = self.live_entry(&key, now) {
            entry.refresh(now);
            return Ok(entry.value().clone());
        }

        if is_full() {
            #[cfg(feature = "logging")]
            log::trace!(
                "{}The map is full. Returning a value without storing it",
                self.log_prefix()
            );
            return produce();
        }

        let lookup = self.lock.with_lock(|| -> Result<Lookup<K, V>, E> {
            let now = self.settings.now();
            if let Some(existing) = self.live_entry_locked(&key, now) {
                return Ok(Lookup::Found(existing));
            }
            let value = produce()?;
            let (entry, replaced) = self.insert_locked(key, value, listener, now);
            Ok(Lookup::Inserted { entry, replaced })
        })?;

        match lookup {
            Lookup::Found(entry) => Ok(entry.value().clone()),
            Lookup::Inserted { entry, replaced } => {
                self.after_insert(&entry, replaced, on_new_entry);
                Ok(entry.value().clone())
            }
        }
    }

    pub(crate) fn remove<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let removed = self.lock.with_lock(|| {
            let entry = self.table.write().remove(key)?;
            self.len.fetch_sub(1, Ordering::AcqRel);
            let is_first = entry.mark_removed();
            Some((entry, is_first))
        });

        match removed {
            Some((entry, is_first)) => {
                if is_first {
                    self.notify(&entry, RemovalCause::Explicit);
                }
                true
            }
            None => false,
        }
    }

    fn lookup<Q>(&self, key: &Q) -> Option<Arc<Entry<K, V>>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.table.read().get(key).map(Arc::clone)
    }

    /// Returns the entry for `key` unless it is past its deadline. An expired
    /// entry is removed right away if its timer has not done it yet.
    ///
    /// Must not be called from inside the critical section.
    fn live_entry<Q>(&self, key: &Q, now: Timestamp) -> Option<Arc<Entry<K, V>>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let entry = self.lookup(key)?;
        if entry.is_expired(now) {
            if entry.claim_expiration(now) {
                self.remove_entry(&entry, RemovalCause::Expired);
            }
            return None;
        }
        Some(entry)
    }

    fn live_entry_locked(&self, key: &K, now: Timestamp) -> Option<Arc<Entry<K, V>>> {
        self.lookup(key).filter(|entry| !entry.is_expired(now))
    }

    /// Stores a new entry, replacing an expired one if present. Must be called
    /// from inside the critical section.
    fn insert_locked(
        &self,
        key: K,
        value: V,
        listener: Option<RemovalListener<K, V>>,
        now: Timestamp,
    ) -> (Arc<Entry<K, V>>, Option<Arc<Entry<K, V>>>) {
        let settings = &self.settings;
        let lifetime = EntryLifetime::new(now, settings.expected_duration, settings.extend_time);
        let owner: Weak<Self> = self.me.clone();
        let entry = Arc::new(Entry::new(
            Arc::new(key.clone()),
            value,
            lifetime,
            &settings.timers,
            listener,
            owner,
        ));

        let old = self.table.write().insert(key, Arc::clone(&entry));
        let replaced = match old {
            // The expired entry leaves the map here, so it is this call that
            // reports its removal.
            Some(old) => old.mark_removed().then_some(old),
            None => {
                self.len.fetch_add(1, Ordering::AcqRel);
                None
            }
        };
        (entry, replaced)
    }

    fn after_insert(
        &self,
        entry: &Arc<Entry<K, V>>,
        replaced: Option<Arc<Entry<K, V>>>,
        on_new_entry: impl FnOnce(&Arc<Entry<K, V>>),
    ) {
        if let Some(old) = replaced {
            self.notify(&old, RemovalCause::Expired);
        }

        on_new_entry(entry);

        if entry.start_timer(self.settings.now()) {
            #[cfg(feature = "logging")]
            log::trace!(
                "{}The new entry expired before its timer was started",
                self.log_prefix()
            );
            self.remove_entry(entry, RemovalCause::Expired);
        }
    }

    fn notify(&self, entry: &Arc<Entry<K, V>>, cause: RemovalCause) {
        let listener = entry.listener().or(self.settings.listener.as_ref());
        if let Some(listener) = listener {
            self.settings.notifier.notify(
                listener,
                Arc::clone(entry.key()),
                entry.value().clone(),
                cause,
            );
        }
    }

    #[cfg(feature = "logging")]
    fn log_prefix(&self) -> String {
        crate::common::log_prefix(self.settings.name.as_deref())
    }
}

impl<K, V, S> EntryOwner<K, V> for Shard<K, V, S>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    fn remove_entry(&self, entry: &Arc<Entry<K, V>>, cause: RemovalCause) -> bool {
        let removed = self.lock.with_lock(|| {
            let key: &K = entry.key();
            let mut table = self.table.write();
            match table.get(key) {
                Some(current) if Arc::ptr_eq(current, entry) => (),
                // Already removed, or replaced by a newer entry.
                _ => return false,
            }
            table.remove(key);
            self.len.fetch_sub(1, Ordering::AcqRel);
            entry.mark_removed()
        });

        if removed {
            #[cfg(feature = "logging")]
            log::trace!("{}Removed an entry ({cause:?})", self.log_prefix());
            self.notify(entry, cause);
        }
        removed
    }
}
