//! Update records sent by the producer

use serde::{Deserialize, Serialize};

use crate::chunk::{ChunkId, TierState};
use crate::ContainerId;

/// Instruction to create, transition or expire one chunk.
///
/// Records are immutable once enqueued. Their position in the update queue
/// is the only ordering guarantee between producer and scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRecord {
    /// Container the chunk belongs to
    pub container: ContainerId,

    /// Chunk within the container
    pub chunk: ChunkId,

    /// State the chunk must end up in
    pub target: TierState,

    /// First reference to this chunk; the container must create it
    pub is_new: bool,

    /// Payload size in bytes
    pub payload_size: usize,
}

impl UpdateRecord {
    /// Record that introduces a new chunk
    pub fn create(
        container: ContainerId,
        chunk: impl Into<ChunkId>,
        target: TierState,
        payload_size: usize,
    ) -> Self {
        Self {
            container,
            chunk: chunk.into(),
            target,
            is_new: true,
            payload_size,
        }
    }

    /// Record that moves an existing chunk
    pub fn transition(container: ContainerId, chunk: impl Into<ChunkId>, target: TierState) -> Self {
        Self {
            container,
            chunk: chunk.into(),
            target,
            is_new: false,
            payload_size: 0,
        }
    }

    /// Record that removes a chunk
    pub fn expire(container: ContainerId, chunk: impl Into<ChunkId>) -> Self {
        Self::transition(container, chunk, TierState::Expired)
    }
}
