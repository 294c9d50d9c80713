//! Provides a map of shared asynchronous computations whose entries expire.
//!
//! To use this module, enable a crate feature called "future".

use crate::sync::TimedMapBuilder;

use futures_util::future::{BoxFuture, Shared};
use std::collections::hash_map::RandomState;

mod builder;
mod task_map;

pub use task_map::{AfterCompletion, TimedTaskMap};

/// The builder of a [`TimedTaskMap`][task-map]. Returned by
/// `TimedTaskMap::builder`.
///
/// [task-map]: ./struct.TimedTaskMap.html
pub type TimedTaskMapBuilder<K, V> =
    TimedMapBuilder<K, Computation<V>, TimedTaskMap<K, V, RandomState>>;

/// A cloneable handle to an asynchronous computation stored in a
/// [`TimedTaskMap`][task-map].
///
/// Every clone resolves to a clone of the same output. The computation runs
/// when at least one of its handles is polled, and it runs only once.
///
/// [task-map]: ./struct.TimedTaskMap.html
pub type Computation<V> = Shared<BoxFuture<'static, V>>;
