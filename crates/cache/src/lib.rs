//! Chunkstage Cache Library
//!
//! Data model for staging chunks across storage tiers: the chunk tier state
//! machine, chunk containers, the content-addressed container registry, and
//! per-tier capacity budgets.

pub mod budget;
pub mod chunk;
pub mod container;
pub mod error;
pub mod record;
pub mod registry;

pub use budget::{BudgetSnapshot, BudgetsSnapshot, MemoryPressure, TierBudget, TierBudgets};
pub use chunk::{Chunk, ChunkId, ChunkPayload, TierState, TransferError, Transition};
pub use container::{ChunkContainer, ChunkFactory, ContainerDescriptor, ContainerId, ContainerTypes};
pub use error::{CacheError, Result};
pub use record::UpdateRecord;
pub use registry::{ContainerHandle, ContainerRegistry, Fingerprint, Released};
