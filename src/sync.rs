//! Provides a thread-safe, concurrent map with expiring entries.

mod builder;
pub(crate) mod entry;
mod map;
mod shard;

pub use {builder::TimedMapBuilder, map::TimedMap};
