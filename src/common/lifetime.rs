use super::time::Timestamp;

use std::time::Duration;

/// Configures how an entry extends its lifetime every time it is read.
///
/// - `duration`: each read moves the entry's deadline to at least
///   `now + duration`.
/// - `limit`: the total amount of time the deadline may move past the
///   original deadline. `None` means unlimited.
///
/// With no `duration`, reads never extend the deadline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExtendTimeConfiguration {
    duration: Option<Duration>,
    limit: Option<Duration>,
}

impl ExtendTimeConfiguration {
    /// No extension. Deadlines are fixed at entry creation.
    pub const NONE: ExtendTimeConfiguration = ExtendTimeConfiguration {
        duration: None,
        limit: None,
    };

    /// Extends the deadline by up to `duration` on every read, without limit.
    pub fn new(duration: Duration) -> Self {
        Self {
            duration: Some(duration),
            limit: None,
        }
    }

    /// Extends the deadline by up to `duration` on every read, but never past
    /// the original deadline plus `limit`.
    pub fn with_limit(duration: Duration, limit: Duration) -> Self {
        Self {
            duration: Some(duration),
            limit: Some(limit),
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn limit(&self) -> Option<Duration> {
        self.limit
    }
}

/// Deadline bookkeeping of a single entry.
///
/// All methods take the current time as an argument so that the arithmetic
/// stays independent of any clock.
#[derive(Debug)]
pub(crate) struct EntryLifetime {
    extend: ExtendTimeConfiguration,
    creation: Timestamp,
    current_limit: Option<Timestamp>,
    /// The original limit plus the extension limit.
    maximum_acceptable: Option<Timestamp>,
}

impl EntryLifetime {
    pub(crate) fn new(
        now: Timestamp,
        expected_duration: Option<Duration>,
        extend: ExtendTimeConfiguration,
    ) -> Self {
        let current_limit = expected_duration.map(|d| now.saturating_add(d));
        let maximum_acceptable = current_limit
            .zip(extend.limit)
            .map(|(limit, ext)| limit.saturating_add(ext));

        Self {
            extend,
            creation: now,
            current_limit,
            maximum_acceptable,
        }
    }

    pub(crate) fn current_limit(&self) -> Option<Timestamp> {
        self.current_limit
    }

    /// Returns the time left until the current limit, zero if it has been
    /// reached, or `None` if the entry has no limit.
    pub(crate) fn until_limit(&self, now: Timestamp) -> Option<Duration> {
        self.current_limit
            .map(|limit| limit.saturating_duration_since(now))
    }

    pub(crate) fn is_expired(&self, now: Timestamp) -> bool {
        matches!(self.current_limit, Some(limit) if now >= limit)
    }

    /// Tries to push the current limit forward for an access at `now`.
    ///
    /// Returns the resulting limit, which may be unchanged, or `None` if the
    /// entry has no limit at all. The limit never moves backwards.
    pub(crate) fn extend_current_limit(&mut self, now: Timestamp) -> Option<Timestamp> {
        let current = self.current_limit?;

        let Some(ext) = self.extend.duration else {
            return Some(current);
        };

        if let Some(max) = self.maximum_acceptable {
            if now > max {
                // The extension budget is used up.
                let clamped = current.max(max);
                self.current_limit = Some(clamped);
                return Some(clamped);
            }
        }

        let candidate = now.saturating_add(ext);
        if current >= candidate {
            return Some(current);
        }

        let new_limit = match self.maximum_acceptable {
            Some(max) => candidate.min(max).max(current),
            None => candidate,
        };
        self.current_limit = Some(new_limit);
        Some(new_limit)
    }

    pub(crate) fn current_lifetime(&self, now: Timestamp) -> Duration {
        now.saturating_duration_since(self.creation)
    }
}
