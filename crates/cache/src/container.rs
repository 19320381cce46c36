//! Chunk containers and the container type table
//!
//! A container owns the chunks created under one registry fingerprint.
//! Whether a container can build chunks itself is declared up front on its
//! [`ContainerDescriptor`]; containers driven purely by the producer leave
//! the factory unset.

use std::collections::HashMap;
use std::sync::Arc;

use crate::chunk::{Chunk, ChunkPayload};
use crate::error::{CacheError, Result};
use crate::record::UpdateRecord;
use crate::registry::Fingerprint;

/// Process-unique container identifier assigned by the registry
pub type ContainerId = u64;

/// Builds the payload for a chunk announced by an update record
pub type ChunkFactory = Arc<dyn Fn(&UpdateRecord) -> Result<Box<dyn ChunkPayload>> + Send + Sync>;

/// Capabilities of one container type
#[derive(Clone)]
pub struct ContainerDescriptor {
    kind: String,
    factory: Option<ChunkFactory>,
}

impl ContainerDescriptor {
    /// Descriptor without chunk construction capability
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            factory: None,
        }
    }

    /// Attach a chunk factory
    pub fn with_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&UpdateRecord) -> Result<Box<dyn ChunkPayload>> + Send + Sync + 'static,
    {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// Stable type identifier
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn has_factory(&self) -> bool {
        self.factory.is_some()
    }
}

impl std::fmt::Debug for ContainerDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerDescriptor")
            .field("kind", &self.kind)
            .field("has_factory", &self.has_factory())
            .finish()
    }
}

/// Registration table of container types, populated at process start.
///
/// # Example
///
/// ```
/// use chunkstage_cache::{ContainerDescriptor, ContainerTypes};
///
/// let mut types = ContainerTypes::new();
/// types.register(ContainerDescriptor::new("terrain"));
///
/// assert!(types.get("terrain").is_some());
/// assert!(!types.get("terrain").unwrap().has_factory());
/// ```
#[derive(Debug, Clone, Default)]
pub struct ContainerTypes {
    descriptors: HashMap<String, ContainerDescriptor>,
}

impl ContainerTypes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor, replacing any previous one of the same kind
    pub fn register(&mut self, descriptor: ContainerDescriptor) -> Option<ContainerDescriptor> {
        self.descriptors
            .insert(descriptor.kind.clone(), descriptor)
    }

    pub fn get(&self, kind: &str) -> Option<&ContainerDescriptor> {
        self.descriptors.get(kind)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// Owned mapping from chunk id to [`Chunk`]
#[derive(Debug)]
pub struct ChunkContainer {
    id: ContainerId,
    /// Key of this container in its owning registry
    fingerprint: Fingerprint,
    descriptor: ContainerDescriptor,
    chunks: HashMap<String, Chunk>,
}

impl ChunkContainer {
    pub(crate) fn new(id: ContainerId, fingerprint: Fingerprint, descriptor: ContainerDescriptor) -> Self {
        Self {
            id,
            fingerprint,
            descriptor,
            chunks: HashMap::new(),
        }
    }

    pub fn id(&self) -> ContainerId {
        self.id
    }

    pub fn kind(&self) -> &str {
        self.descriptor.kind()
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Whether [`ChunkContainer::create`] is supported
    pub fn can_create(&self) -> bool {
        self.descriptor.has_factory()
    }

    pub fn lookup(&self, chunk_id: &str) -> Option<&Chunk> {
        self.chunks.get(chunk_id)
    }

    pub fn lookup_mut(&mut self, chunk_id: &str) -> Option<&mut Chunk> {
        self.chunks.get_mut(chunk_id)
    }

    /// Build a new `Remote` chunk from a creation record.
    ///
    /// The chunk is not inserted; the caller decides when it joins the map.
    pub fn create(&self, record: &UpdateRecord) -> Result<Chunk> {
        let factory = self
            .descriptor
            .factory
            .as_ref()
            .ok_or_else(|| CacheError::FactoryUnavailable {
                container: self.id,
                kind: self.descriptor.kind.clone(),
            })?;

        let payload = factory(record)?;
        Ok(Chunk::new(
            record.chunk.clone(),
            self.id,
            record.payload_size,
            payload,
        ))
    }

    /// Add a chunk under its own id.
    ///
    /// Callers must not insert an id that is already present; the replaced
    /// chunk is returned if they do.
    pub fn insert(&mut self, chunk: Chunk) -> Option<Chunk> {
        self.chunks.insert(chunk.id().to_string(), chunk)
    }

    /// Remove a chunk regardless of its state
    pub fn remove(&mut self, chunk_id: &str) -> Option<Chunk> {
        self.chunks.remove(chunk_id)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.values()
    }

    /// Take every chunk out of the container
    pub(crate) fn drain(&mut self) -> Vec<Chunk> {
        self.chunks.drain().map(|(_, chunk)| chunk).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{TierState, TransferError};

    struct NoopPayload;

    impl ChunkPayload for NoopPayload {
        fn upload(&mut self) -> std::result::Result<(), TransferError> {
            Ok(())
        }

        fn evict(&mut self) -> std::result::Result<(), TransferError> {
            Ok(())
        }
    }

    fn fingerprint() -> Fingerprint {
        Fingerprint::new("tiles", &serde_json::json!({ "level": 0 })).unwrap()
    }

    fn creating_container() -> ChunkContainer {
        let descriptor = ContainerDescriptor::new("tiles")
            .with_factory(|_record| Ok(Box::new(NoopPayload) as Box<dyn ChunkPayload>));
        ChunkContainer::new(1, fingerprint(), descriptor)
    }

    #[test]
    fn test_create_uses_record_fields() {
        let container = creating_container();
        let record = UpdateRecord::create(1, "c1", TierState::FastTier, 256);

        let chunk = container.create(&record).unwrap();
        assert_eq!(chunk.id(), "c1");
        assert_eq!(chunk.size(), 256);
        assert_eq!(chunk.container(), 1);
        assert_eq!(chunk.state(), TierState::Remote);
        assert!(container.lookup("c1").is_none());
    }

    #[test]
    fn test_create_without_factory_fails() {
        let container = ChunkContainer::new(4, fingerprint(), ContainerDescriptor::new("backend-only"));
        assert!(!container.can_create());

        let record = UpdateRecord::create(4, "c1", TierState::Resident, 1);
        let err = container.create(&record).unwrap_err();
        assert!(matches!(
            err,
            CacheError::FactoryUnavailable { container: 4, ref kind } if kind == "backend-only"
        ));
    }

    #[test]
    fn test_factory_errors_propagate() {
        let descriptor = ContainerDescriptor::new("broken").with_factory(|record| {
            Err(CacheError::Transfer {
                chunk: record.chunk.clone(),
                reason: "decode failed".to_string(),
            })
        });
        let container = ChunkContainer::new(2, fingerprint(), descriptor);

        let record = UpdateRecord::create(2, "c3", TierState::Resident, 1);
        assert!(matches!(container.create(&record), Err(CacheError::Transfer { .. })));
    }

    #[test]
    fn test_insert_lookup_remove() {
        let mut container = creating_container();
        let record = UpdateRecord::create(1, "c1", TierState::Resident, 8);
        let chunk = container.create(&record).unwrap();

        assert!(container.insert(chunk).is_none());
        assert_eq!(container.len(), 1);
        assert!(container.lookup("c1").is_some());

        assert!(container.remove("c1").is_some());
        assert!(container.is_empty());
        assert!(container.remove("c1").is_none());
    }

    #[test]
    fn test_drain_empties_container() {
        let mut container = creating_container();
        for id in ["a", "b", "c"] {
            let chunk = container
                .create(&UpdateRecord::create(1, id, TierState::Resident, 1))
                .unwrap();
            container.insert(chunk);
        }

        let drained = container.drain();
        assert_eq!(drained.len(), 3);
        assert!(container.is_empty());
    }

    #[test]
    fn test_type_table_replaces_kind() {
        let mut types = ContainerTypes::new();
        assert!(types.register(ContainerDescriptor::new("a")).is_none());

        let previous = types.register(
            ContainerDescriptor::new("a")
                .with_factory(|_| Ok(Box::new(NoopPayload) as Box<dyn ChunkPayload>)),
        );
        assert!(previous.is_some());
        assert_eq!(types.len(), 1);
        assert!(types.get("a").unwrap().has_factory());
    }
}
