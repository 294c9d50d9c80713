#![warn(clippy::all)]
#![warn(rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Timed-map is a concurrent in-memory map whose entries expire a fixed amount
//! of time after they were stored, with an optional extension of their
//! lifetime on every read.
//!
//! The central operation is "get or add if new": when several threads ask for
//! the same missing key at the same time, exactly one of them produces the
//! value and every one of them gets it. An optional
//! [`future::TimedTaskMap`][task-map] applies the same idea to asynchronous
//! computations, so that concurrent callers share one in-flight computation.
//!
//! # Features
//!
//! - Thread-safe, sharded map: [`sync::TimedMap`][timed-map].
//!     - Reads never wait for a producer.
//!     - Per-shard critical sections are pluggable through
//!       [`LockStrategy`][lock-strategy].
//! - Entry expiration:
//!     - Every entry gets a deadline of "creation + expected duration".
//!     - Reads can push the deadline forward, within an optional limit. See
//!       [`ExtendTimeConfiguration`][extend-time].
//!     - A background thread removes entries at their deadline.
//! - Removal listener, called exactly once per entry with the
//!   [`RemovalCause`][removal-cause].
//! - Advisory maximum size: above it, produced values are returned without
//!   being stored.
//! - Pluggable [`TimeSource`][time-source], with a [`ManualClock`][manual-clock]
//!   for deterministic tests.
//!
//! # Crate Features
//!
//! - `quanta` (enabled by default): uses `quanta::Instant` as the time base of
//!   [`MonotonicClock`][monotonic-clock], which is faster to read than
//!   `std::time::Instant` on most platforms.
//! - `future`: enables [`future::TimedTaskMap`][task-map].
//! - `logging`: emits log records through the `log` crate, for example when a
//!   removal listener panics.
//!
//! # Minimum Supported Rust Versions
//!
//! This crate's minimum supported Rust version (MSRV) is 1.70.
//!
//! [timed-map]: ./sync/struct.TimedMap.html
//! [task-map]: ./future/struct.TimedTaskMap.html
//! [lock-strategy]: ./trait.LockStrategy.html
//! [extend-time]: ./struct.ExtendTimeConfiguration.html
//! [removal-cause]: ./notification/enum.RemovalCause.html
//! [time-source]: ./trait.TimeSource.html
//! [manual-clock]: ./struct.ManualClock.html
//! [monotonic-clock]: ./struct.MonotonicClock.html

#[cfg(feature = "future")]
#[cfg_attr(docsrs, doc(cfg(feature = "future")))]
pub mod future;

pub mod notification;
pub mod sync;

pub(crate) mod common;
pub(crate) mod policy;

pub use common::{
    error::BuildError,
    lifetime::ExtendTimeConfiguration,
    lock::{LockStrategy, LockStrategyFactory, MutexStrategy},
    time::{ManualClock, MonotonicClock, TimeSource, Timestamp},
};
pub use notification::RemovalCause;
pub use policy::Policy;
