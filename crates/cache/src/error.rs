//! Error types for the chunk data model

use crate::ContainerId;

/// Errors raised by chunks, containers and the container registry.
///
/// Every variant here is fatal for the operation that produced it: they
/// indicate wiring mistakes or broken tier primitives, never transient
/// conditions that a retry would fix.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("container kind `{0}` is not registered")]
    UnregisteredKind(String),

    #[error("container {container} (kind `{kind}`) cannot create chunks")]
    FactoryUnavailable { container: ContainerId, kind: String },

    #[error("failed to canonicalize container parameters: {0}")]
    Canonicalize(#[from] serde_json::Error),

    /// JSON has no encoding for NaN or infinities, so such parameters
    /// cannot be keyed without colliding with `null`
    #[error("parameters for container kind `{0}` contain a non-finite float")]
    NonFiniteParameter(String),

    #[error("tier transfer failed for chunk `{chunk}`: {reason}")]
    Transfer { chunk: String, reason: String },

    #[error("unknown tier state code {0}")]
    InvalidStateCode(u8),
}

/// Result alias for the chunk data model.
pub type Result<T> = std::result::Result<T, CacheError>;
