use std::{
    fmt,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::Duration,
};

#[cfg_attr(feature = "quanta", path = "time/clock_quanta.rs")]
#[cfg_attr(not(feature = "quanta"), path = "time/clock_compat.rs")]
mod clock;

/// A point in time, measured in whole milliseconds since the origin of the
/// [`TimeSource`][time-source] that produced it.
///
/// Timestamps from different time sources are not comparable in a meaningful
/// way. A map uses exactly one time source for all of its entries.
///
/// [time-source]: ./trait.TimeSource.html
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }

    pub fn saturating_add(&self, duration: Duration) -> Self {
        Self(self.0.saturating_add(duration_to_millis(duration)))
    }

    /// Returns the amount of time elapsed from `earlier` to `self`, or zero if
    /// `earlier` is later than `self`.
    pub fn saturating_duration_since(&self, earlier: Self) -> Duration {
        let diff = self.0.saturating_sub(earlier.0);
        Duration::from_millis(diff.max(0) as u64)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Converts a `Duration` to milliseconds, saturating at `i64::MAX`.
pub(crate) fn duration_to_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// A monotonic source of "now" used by a map to compute entry deadlines.
///
/// The default implementation is [`MonotonicClock`][monotonic]. Tests and
/// simulations can use [`ManualClock`][manual] to control time explicitly.
///
/// [monotonic]: ./struct.MonotonicClock.html
/// [manual]: ./struct.ManualClock.html
pub trait TimeSource: Send + Sync + 'static {
    /// Returns the current time. Must never go backwards.
    fn now(&self) -> Timestamp;
}

/// A [`TimeSource`][time-source] backed by the operating system's monotonic
/// clock. When the `quanta` feature is enabled (default), `quanta::Instant` is
/// used as the time base, otherwise `std::time::Instant`.
///
/// The origin is the time the clock was created.
///
/// [time-source]: ./trait.TimeSource.html
#[derive(Clone)]
pub struct MonotonicClock {
    origin: clock::Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: clock::Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MonotonicClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonotonicClock").finish_non_exhaustive()
    }
}

impl TimeSource for MonotonicClock {
    fn now(&self) -> Timestamp {
        let elapsed = clock::Instant::now().saturating_duration_since(self.origin);
        Timestamp(duration_to_millis(elapsed))
    }
}

/// A [`TimeSource`][time-source] that only moves when told to.
///
/// It starts at [`Timestamp::ZERO`][zero]. Share it with a map through an
/// `Arc` and call [`advance`](#method.advance) to let time pass.
///
/// [time-source]: ./trait.TimeSource.html
/// [zero]: ./struct.Timestamp.html#associatedconstant.ZERO
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn advance(&self, amount: Duration) {
        self.now
            .fetch_add(duration_to_millis(amount), Ordering::AcqRel);
    }

    /// Moves the clock to `to`. Does nothing if `to` is earlier than the
    /// current time, as a time source must never go backwards.
    pub fn set(&self, to: Timestamp) {
        self.now.fetch_max(to.0, Ordering::AcqRel);
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.now.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saturating_add() {
        let ts = Timestamp::from_millis(100);
        assert_eq!(
            ts.saturating_add(Duration::from_millis(50)),
            Timestamp::from_millis(150)
        );

        let ts = Timestamp::from_millis(i64::MAX - 10);
        assert_eq!(
            ts.saturating_add(Duration::from_secs(1)),
            Timestamp::from_millis(i64::MAX)
        );
    }

    #[test]
    fn test_saturating_duration_since() {
        let later = Timestamp::from_millis(100);
        let earlier = Timestamp::from_millis(60);
        assert_eq!(
            later.saturating_duration_since(earlier),
            Duration::from_millis(40)
        );
        assert_eq!(earlier.saturating_duration_since(later), Duration::ZERO);
    }

    #[test]
    fn manual_clock_never_goes_backwards() {
        let clock = ManualClock::new();
        assert_eq!(clock.now(), Timestamp::ZERO);

        clock.advance(Duration::from_millis(1500));
        assert_eq!(clock.now(), Timestamp::from_millis(1500));

        clock.set(Timestamp::from_millis(1000));
        assert_eq!(clock.now(), Timestamp::from_millis(1500));

        clock.set(Timestamp::from_millis(2000));
        assert_eq!(clock.now(), Timestamp::from_millis(2000));
    }

    #[test]
    fn monotonic_clock_moves_forward() {
        let clock = MonotonicClock::new();
        let t1 = clock.now();
        std::thread::sleep(Duration::from_millis(5));
        let t2 = clock.now();
        assert!(t2 > t1);
    }
}
