//! Error types for the tier scheduler

use chunkstage_cache::{CacheError, ChunkId, ContainerId, TierState};

/// Fatal conditions raised by a drain tick.
///
/// Deadline misses are not errors; they surface as a deferred continuation.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// The producer asked for a state no record may carry
    #[error("protocol violation: chunk `{chunk}` in container {container} cannot move to {target}")]
    ProtocolViolation {
        container: ContainerId,
        chunk: ChunkId,
        target: TierState,
    },

    /// A transition record referenced a chunk the container never created
    #[error("protocol violation: chunk `{chunk}` is not present in container {container}")]
    MissingChunk { container: ContainerId, chunk: ChunkId },

    #[error("container {0} is not registered")]
    UnknownContainer(ContainerId),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("scheduler driver thread panicked")]
    DriverPanicked,
}

/// Result alias for the tier scheduler.
pub type Result<T> = std::result::Result<T, SchedulerError>;
