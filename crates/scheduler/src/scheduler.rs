//! Deadline-bounded tier scheduler
//!
//! Applies update records one per tick, in arrival order. Each tick first
//! checks the frame deadline: once it has passed, the tick does nothing and
//! asks to be called again after the fallback delay. Queued records are
//! never dropped by a deadline miss, only postponed.

use std::time::{Duration, Instant};

use chunkstage_cache::{
    CacheError, ContainerId, ContainerRegistry, Released, TierBudgets, TierState, Transition,
    UpdateRecord,
};

use crate::config::SchedulerConfig;
use crate::error::{Result, SchedulerError};
use crate::frame_budget::FrameBudget;
use crate::notify::VisibilitySignal;
use crate::queue::UpdateQueue;

/// When the host should call [`TierScheduler::tick`] next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    /// Queue is empty; wait for the producer
    Idle,
    /// More records are pending; tick again with zero delay
    Immediate,
    /// Deadline has passed; re-check after this delay
    RetryAfter(Duration),
}

/// Counters describing scheduler activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Records taken off the queue, including ones that failed
    pub records_applied: u64,
    /// Chunks built by a container factory
    pub chunks_created: u64,
    /// `Remote -> Resident` transitions
    pub materializations: u64,
    /// Transitions into the fast tier
    pub promotions: u64,
    /// `FastTier -> Resident` transitions
    pub demotions: u64,
    /// Chunks removed by an `Expired` record
    pub expirations: u64,
    /// Ticks skipped because the deadline had passed
    pub deferrals: u64,
    /// Records addressed to a container that no longer exists
    pub stale_records: u64,
    /// Visibility notifications fired
    pub notifications: u64,
    /// Records still queued
    pub queue_len: usize,
}

/// Owns tier budgets and the update queue for one consumption context.
///
/// # Example
///
/// ```
/// use chunkstage_cache::{
///     ChunkPayload, ContainerDescriptor, ContainerRegistry, ContainerTypes, TierState,
///     TransferError, UpdateRecord,
/// };
/// use chunkstage_scheduler::{Continuation, SchedulerConfig, TierScheduler};
/// use serde_json::json;
///
/// struct Texture;
///
/// impl ChunkPayload for Texture {
///     fn upload(&mut self) -> Result<(), TransferError> { Ok(()) }
///     fn evict(&mut self) -> Result<(), TransferError> { Ok(()) }
/// }
///
/// let mut types = ContainerTypes::new();
/// types.register(
///     ContainerDescriptor::new("tiles")
///         .with_factory(|_record| Ok(Box::new(Texture) as Box<dyn ChunkPayload>)),
/// );
/// let registry = ContainerRegistry::new(types);
/// let tiles = registry.acquire("tiles", &json!({ "level": 0 })).unwrap();
///
/// let mut scheduler = TierScheduler::new(&SchedulerConfig::default(), registry);
/// scheduler.enqueue(UpdateRecord::create(tiles.id(), "c1", TierState::FastTier, 4096));
///
/// assert_eq!(scheduler.tick().unwrap(), Continuation::Idle);
/// assert_eq!(scheduler.budgets().fast_tier().used(), 4096);
/// ```
pub struct TierScheduler {
    budgets: TierBudgets,
    queue: UpdateQueue,
    registry: ContainerRegistry,
    visibility: VisibilitySignal,
    deadline: Option<Instant>,
    fallback_delay: Duration,
    stats: SchedulerStats,
}

impl TierScheduler {
    pub fn new(config: &SchedulerConfig, registry: ContainerRegistry) -> Self {
        Self {
            budgets: TierBudgets::new(
                config.fast_tier_bytes,
                config.resident_bytes,
                config.download_bytes,
            ),
            queue: UpdateQueue::new(),
            registry,
            visibility: VisibilitySignal::new(),
            deadline: None,
            fallback_delay: config.fallback_delay,
            stats: SchedulerStats::default(),
        }
    }

    /// Append a record; equivalent to pushing on [`TierScheduler::producer`]
    pub fn enqueue(&self, record: UpdateRecord) {
        self.queue.push(record);
    }

    /// Queue handle for the producer side
    pub fn producer(&self) -> UpdateQueue {
        self.queue.clone()
    }

    pub fn budgets(&self) -> &TierBudgets {
        &self.budgets
    }

    pub fn registry(&self) -> &ContainerRegistry {
        &self.registry
    }

    pub fn visibility(&self) -> &VisibilitySignal {
        &self.visibility
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Set or clear the deadline after which promotions stop starting
    pub fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    /// Adopt the deadline of a new frame
    pub fn begin_frame(&mut self, frame: &FrameBudget) {
        self.deadline = Some(frame.deadline());
    }

    pub fn fallback_delay(&self) -> Duration {
        self.fallback_delay
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            queue_len: self.queue.len(),
            ..self.stats
        }
    }

    /// Run one scheduling tick against the current time
    pub fn tick(&mut self) -> Result<Continuation> {
        self.tick_at(Instant::now())
    }

    /// Run one scheduling tick as if the current time were `now`.
    ///
    /// Applies at most one record. Errors are fatal protocol or wiring
    /// failures; the offending record has already been consumed.
    ///
    /// Visibility listeners run synchronously before this returns.
    pub fn tick_at(&mut self, now: Instant) -> Result<Continuation> {
        let (continuation, promoted) = self.advance(now)?;
        if promoted {
            self.visibility.fire();
        }
        Ok(continuation)
    }

    /// One tick without firing the visibility signal.
    ///
    /// Returns whether the applied record promoted a chunk; the caller
    /// fires the signal, e.g. after releasing a lock around the scheduler.
    pub(crate) fn advance(&mut self, now: Instant) -> Result<(Continuation, bool)> {
        if self.queue.is_empty() {
            return Ok((Continuation::Idle, false));
        }

        if let Some(deadline) = self.deadline {
            if now > deadline {
                self.stats.deferrals += 1;
                tracing::trace!(
                    pending = self.queue.len(),
                    retry_ms = self.fallback_delay.as_millis() as u64,
                    "deadline passed, deferring"
                );
                return Ok((Continuation::RetryAfter(self.fallback_delay), false));
            }
        }

        let Some(record) = self.queue.pop() else {
            return Ok((Continuation::Idle, false));
        };
        self.stats.records_applied += 1;

        let promoted = match self.apply(&record) {
            Ok(promoted) => promoted,
            Err(e) => {
                tracing::error!(
                    container = record.container,
                    chunk = %record.chunk,
                    target = %record.target,
                    error = %e,
                    "failed to apply update record"
                );
                return Err(e);
            }
        };

        let continuation = if self.queue.is_empty() {
            Continuation::Idle
        } else {
            Continuation::Immediate
        };
        Ok((continuation, promoted))
    }

    /// Tick until the queue empties or the deadline defers.
    ///
    /// Every record still goes through its own tick, so the deadline is
    /// re-checked between records.
    pub fn drain(&mut self) -> Result<Continuation> {
        loop {
            match self.tick()? {
                Continuation::Immediate => continue,
                other => return Ok(other),
            }
        }
    }

    /// Apply one record; returns true if it promoted a chunk
    fn apply(&mut self, record: &UpdateRecord) -> Result<bool> {
        if !record.target.is_valid_target() {
            return Err(SchedulerError::ProtocolViolation {
                container: record.container,
                chunk: record.chunk.clone(),
                target: record.target,
            });
        }

        let Some(handle) = self.registry.get(record.container) else {
            self.stats.stale_records += 1;
            tracing::warn!(
                container = record.container,
                chunk = %record.chunk,
                "dropping record for released container"
            );
            return Ok(false);
        };
        let mut container = handle.lock();

        if record.target == TierState::Expired {
            if let Some(mut chunk) = container.remove(&record.chunk) {
                chunk.expire(&self.budgets);
                self.stats.expirations += 1;
                tracing::debug!(container = record.container, chunk = %record.chunk, "chunk expired");
            }
            return Ok(false);
        }

        if container.lookup(&record.chunk).is_none() {
            if !record.is_new {
                return Err(SchedulerError::MissingChunk {
                    container: record.container,
                    chunk: record.chunk.clone(),
                });
            }
            if !container.can_create() {
                return Err(CacheError::FactoryUnavailable {
                    container: record.container,
                    kind: container.kind().to_string(),
                }
                .into());
            }
            let chunk = container.create(record)?;
            container.insert(chunk);
            self.stats.chunks_created += 1;
        } else if record.is_new {
            tracing::debug!(chunk = %record.chunk, "repeated creation record, reusing chunk");
        }

        let chunk = container
            .lookup_mut(&record.chunk)
            .ok_or_else(|| SchedulerError::MissingChunk {
                container: record.container,
                chunk: record.chunk.clone(),
            })?;
        let transition = chunk.transition_to(record.target, &self.budgets)?;
        drop(container);

        match transition {
            Transition::Unchanged => {}
            Transition::Materialized => self.stats.materializations += 1,
            Transition::Demoted => self.stats.demotions += 1,
            Transition::Promoted => {
                self.stats.promotions += 1;
                self.stats.notifications += 1;
            }
        }

        tracing::debug!(
            container = record.container,
            chunk = %record.chunk,
            target = %record.target,
            ?transition,
            "update record applied"
        );
        Ok(transition.is_promotion())
    }

    /// Drop one reference to a container.
    ///
    /// When the last reference goes, every chunk the container still held
    /// returns its capacity to the budgets.
    pub fn release_container(&mut self, id: ContainerId) -> Result<Released> {
        let released = self
            .registry
            .release(id)
            .ok_or(SchedulerError::UnknownContainer(id))?;

        match released {
            Released::Destroyed { mut chunks } => {
                for chunk in &mut chunks {
                    chunk.expire(&self.budgets);
                }
                Ok(Released::Destroyed { chunks })
            }
            shared => Ok(shared),
        }
    }
}

impl std::fmt::Debug for TierScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TierScheduler")
            .field("budgets", &self.budgets.snapshot())
            .field("pending", &self.queue.len())
            .field("deadline", &self.deadline)
            .field("fallback_delay", &self.fallback_delay)
            .finish()
    }
}
