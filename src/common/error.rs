/// The error type returned by the `build` methods of
/// [`TimedMapBuilder`][builder].
///
/// [builder]: ./sync/struct.TimedMapBuilder.html
#[derive(thiserror::Error, Debug)]
pub enum BuildError {
    /// The map was configured with zero shards.
    #[error("The number of shards must be greater than zero")]
    ZeroShards,

    /// The background thread that expires entries could not be spawned.
    #[error("Failed to spawn the timer driver thread: {0}")]
    SpawnTimer(#[from] std::io::Error),
}
