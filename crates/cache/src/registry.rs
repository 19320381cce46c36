//! Content-addressed, reference-counted container registry
//!
//! Containers are keyed by a [`Fingerprint`] derived from the container kind
//! and a canonical serialization of its construction parameters. Two
//! acquisitions with structurally equal parameters share one container.
//! Entries only leave the registry through [`ContainerRegistry::release`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use serde::ser::{self, Serialize};
use serde_json::Value;

use crate::chunk::Chunk;
use crate::container::{ChunkContainer, ContainerId, ContainerTypes};
use crate::error::{CacheError, Result};

/// Canonical key for a container: kind plus canonical parameters
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Derive the fingerprint for `kind` built from `params`.
    ///
    /// Object keys are sorted at every depth, so field order and instance
    /// identity of the parameters never affect the result. The kind is
    /// length-prefixed to keep the encoding injective.
    ///
    /// NaN and infinite floats are rejected with
    /// [`CacheError::NonFiniteParameter`]; JSON would render them as `null`.
    pub fn new<P: Serialize + ?Sized>(kind: &str, params: &P) -> Result<Self> {
        let value = serde_json::to_value(params)?;
        if params.serialize(FiniteFloats).is_err() {
            return Err(CacheError::NonFiniteParameter(kind.to_string()));
        }
        let mut key = format!("{}:{}:", kind.len(), kind);
        write_canonical(&value, &mut key);
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Serializer that produces nothing and fails on the first NaN or infinity
#[derive(Clone, Copy)]
struct FiniteFloats;

impl FiniteFloats {
    fn check(finite: bool) -> std::result::Result<(), serde_json::Error> {
        if finite {
            Ok(())
        } else {
            Err(ser::Error::custom("non-finite float"))
        }
    }
}

type Checked = std::result::Result<(), serde_json::Error>;

impl ser::Serializer for FiniteFloats {
    type Ok = ();
    type Error = serde_json::Error;
    type SerializeSeq = Self;
    type SerializeTuple = Self;
    type SerializeTupleStruct = Self;
    type SerializeTupleVariant = Self;
    type SerializeMap = Self;
    type SerializeStruct = Self;
    type SerializeStructVariant = Self;

    fn serialize_bool(self, _: bool) -> Checked {
        Ok(())
    }
    fn serialize_i8(self, _: i8) -> Checked {
        Ok(())
    }
    fn serialize_i16(self, _: i16) -> Checked {
        Ok(())
    }
    fn serialize_i32(self, _: i32) -> Checked {
        Ok(())
    }
    fn serialize_i64(self, _: i64) -> Checked {
        Ok(())
    }
    fn serialize_i128(self, _: i128) -> Checked {
        Ok(())
    }
    fn serialize_u8(self, _: u8) -> Checked {
        Ok(())
    }
    fn serialize_u16(self, _: u16) -> Checked {
        Ok(())
    }
    fn serialize_u32(self, _: u32) -> Checked {
        Ok(())
    }
    fn serialize_u64(self, _: u64) -> Checked {
        Ok(())
    }
    fn serialize_u128(self, _: u128) -> Checked {
        Ok(())
    }

    fn serialize_f32(self, v: f32) -> Checked {
        Self::check(v.is_finite())
    }

    fn serialize_f64(self, v: f64) -> Checked {
        Self::check(v.is_finite())
    }

    fn serialize_char(self, _: char) -> Checked {
        Ok(())
    }
    fn serialize_str(self, _: &str) -> Checked {
        Ok(())
    }
    fn serialize_bytes(self, _: &[u8]) -> Checked {
        Ok(())
    }
    fn serialize_none(self) -> Checked {
        Ok(())
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Checked {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Checked {
        Ok(())
    }
    fn serialize_unit_struct(self, _: &'static str) -> Checked {
        Ok(())
    }
    fn serialize_unit_variant(self, _: &'static str, _: u32, _: &'static str) -> Checked {
        Ok(())
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(self, _: &'static str, value: &T) -> Checked {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        value: &T,
    ) -> Checked {
        value.serialize(self)
    }

    fn serialize_seq(self, _: Option<usize>) -> std::result::Result<Self, serde_json::Error> {
        Ok(self)
    }
    fn serialize_tuple(self, _: usize) -> std::result::Result<Self, serde_json::Error> {
        Ok(self)
    }
    fn serialize_tuple_struct(
        self,
        _: &'static str,
        _: usize,
    ) -> std::result::Result<Self, serde_json::Error> {
        Ok(self)
    }
    fn serialize_tuple_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> std::result::Result<Self, serde_json::Error> {
        Ok(self)
    }
    fn serialize_map(self, _: Option<usize>) -> std::result::Result<Self, serde_json::Error> {
        Ok(self)
    }
    fn serialize_struct(
        self,
        _: &'static str,
        _: usize,
    ) -> std::result::Result<Self, serde_json::Error> {
        Ok(self)
    }
    fn serialize_struct_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> std::result::Result<Self, serde_json::Error> {
        Ok(self)
    }
}

impl ser::SerializeSeq for FiniteFloats {
    type Ok = ();
    type Error = serde_json::Error;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Checked {
        value.serialize(*self)
    }
    fn end(self) -> Checked {
        Ok(())
    }
}

impl ser::SerializeTuple for FiniteFloats {
    type Ok = ();
    type Error = serde_json::Error;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Checked {
        value.serialize(*self)
    }
    fn end(self) -> Checked {
        Ok(())
    }
}

impl ser::SerializeTupleStruct for FiniteFloats {
    type Ok = ();
    type Error = serde_json::Error;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Checked {
        value.serialize(*self)
    }
    fn end(self) -> Checked {
        Ok(())
    }
}

impl ser::SerializeTupleVariant for FiniteFloats {
    type Ok = ();
    type Error = serde_json::Error;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Checked {
        value.serialize(*self)
    }
    fn end(self) -> Checked {
        Ok(())
    }
}

impl ser::SerializeMap for FiniteFloats {
    type Ok = ();
    type Error = serde_json::Error;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> Checked {
        key.serialize(*self)
    }
    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> Checked {
        value.serialize(*self)
    }
    fn end(self) -> Checked {
        Ok(())
    }
}

impl ser::SerializeStruct for FiniteFloats {
    type Ok = ();
    type Error = serde_json::Error;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, _: &'static str, value: &T) -> Checked {
        value.serialize(*self)
    }
    fn end(self) -> Checked {
        Ok(())
    }
}

impl ser::SerializeStructVariant for FiniteFloats {
    type Ok = ();
    type Error = serde_json::Error;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, _: &'static str, value: &T) -> Checked {
        value.serialize(*self)
    }
    fn end(self) -> Checked {
        Ok(())
    }
}

/// Shared handle to a registered container
#[derive(Debug, Clone)]
pub struct ContainerHandle {
    id: ContainerId,
    container: Arc<Mutex<ChunkContainer>>,
}

impl ContainerHandle {
    pub fn id(&self) -> ContainerId {
        self.id
    }

    /// Lock the container for inspection or mutation
    pub fn lock(&self) -> MutexGuard<'_, ChunkContainer> {
        self.container.lock()
    }

    /// Whether both handles point at the same container instance
    pub fn same_instance(&self, other: &ContainerHandle) -> bool {
        Arc::ptr_eq(&self.container, &other.container)
    }
}

/// Outcome of [`ContainerRegistry::release`]
#[derive(Debug)]
pub enum Released {
    /// Other acquirers still hold the container
    Shared { remaining: usize },
    /// Last reference dropped; the container's chunks are handed back so
    /// their capacity can be returned
    Destroyed { chunks: Vec<Chunk> },
}

struct Entry {
    handle: ContainerHandle,
    refs: usize,
}

struct RegistryState {
    types: ContainerTypes,
    entries: HashMap<Fingerprint, Entry>,
    by_id: HashMap<ContainerId, Fingerprint>,
    next_id: ContainerId,
}

/// Content-addressed cache of chunk containers.
///
/// Cheap to clone; clones share the same entries.
///
/// # Example
///
/// ```
/// use chunkstage_cache::{ContainerDescriptor, ContainerRegistry, ContainerTypes};
/// use serde_json::json;
///
/// let mut types = ContainerTypes::new();
/// types.register(ContainerDescriptor::new("terrain"));
/// let registry = ContainerRegistry::new(types);
///
/// let a = registry.acquire("terrain", &json!({ "a": 1, "b": 2 })).unwrap();
/// let b = registry.acquire("terrain", &json!({ "b": 2, "a": 1 })).unwrap();
/// assert!(a.same_instance(&b));
/// ```
#[derive(Clone)]
pub struct ContainerRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl ContainerRegistry {
    pub fn new(types: ContainerTypes) -> Self {
        Self {
            state: Arc::new(Mutex::new(RegistryState {
                types,
                entries: HashMap::new(),
                by_id: HashMap::new(),
                next_id: 1,
            })),
        }
    }

    /// Return the container for `(kind, params)`, creating it on first use.
    ///
    /// Each call adds one reference that must be paired with a
    /// [`ContainerRegistry::release`].
    pub fn acquire<P: Serialize + ?Sized>(&self, kind: &str, params: &P) -> Result<ContainerHandle> {
        let fingerprint = Fingerprint::new(kind, params)?;
        let mut state = self.state.lock();

        if let Some(entry) = state.entries.get_mut(&fingerprint) {
            entry.refs += 1;
            tracing::trace!(container = entry.handle.id, refs = entry.refs, "container shared");
            return Ok(entry.handle.clone());
        }

        let descriptor = state
            .types
            .get(kind)
            .cloned()
            .ok_or_else(|| CacheError::UnregisteredKind(kind.to_string()))?;

        let id = state.next_id;
        state.next_id += 1;

        let container = ChunkContainer::new(id, fingerprint.clone(), descriptor);
        let handle = ContainerHandle {
            id,
            container: Arc::new(Mutex::new(container)),
        };

        tracing::info!(container = id, kind, "container created");
        state.by_id.insert(id, fingerprint.clone());
        state.entries.insert(
            fingerprint,
            Entry {
                handle: handle.clone(),
                refs: 1,
            },
        );

        Ok(handle)
    }

    /// Resolve a container by id without taking a reference
    pub fn get(&self, id: ContainerId) -> Option<ContainerHandle> {
        let state = self.state.lock();
        let fingerprint = state.by_id.get(&id)?;
        state.entries.get(fingerprint).map(|entry| entry.handle.clone())
    }

    /// Drop one reference; returns `None` for an unknown id
    pub fn release(&self, id: ContainerId) -> Option<Released> {
        let mut state = self.state.lock();
        let fingerprint = state.by_id.get(&id)?.clone();
        let entry = state.entries.get_mut(&fingerprint)?;

        entry.refs -= 1;
        if entry.refs > 0 {
            return Some(Released::Shared {
                remaining: entry.refs,
            });
        }

        let entry = state.entries.remove(&fingerprint)?;
        state.by_id.remove(&id);
        drop(state);

        let chunks = entry.handle.lock().drain();
        tracing::info!(container = id, chunks = chunks.len(), "container destroyed");
        Some(Released::Destroyed { chunks })
    }

    /// Current reference count of a container
    pub fn ref_count(&self, id: ContainerId) -> Option<usize> {
        let state = self.state.lock();
        let fingerprint = state.by_id.get(&id)?;
        state.entries.get(fingerprint).map(|entry| entry.refs)
    }

    /// Number of live containers
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ContainerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerRegistry")
            .field("containers", &self.len())
            .finish()
    }
}
