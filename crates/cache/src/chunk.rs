//! Chunk tier state machine
//!
//! A chunk moves `Remote -> Resident -> FastTier` and back down to
//! `Resident`. `Expired` is terminal: the owning container drops the entry.
//! Capacity is charged to [`TierBudgets`] as part of each transition so that
//! promote-then-demote always leaves the fast tier's `used` where it started.

use serde::{Deserialize, Serialize};

use crate::budget::TierBudgets;
use crate::error::{CacheError, Result};
use crate::ContainerId;

/// Identifier of a chunk within its container
pub type ChunkId = String;

/// Error type returned by tier primitives
pub type TransferError = Box<dyn std::error::Error + Send + Sync>;

/// Storage tier a chunk currently lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TierState {
    /// Not loaded; data only exists at the producer
    Remote,
    /// Held in system memory
    Resident,
    /// Held in the accelerator tier and visible to the consumer
    FastTier,
    /// Scheduled for removal; never stored on a live chunk
    Expired,
}

impl TierState {
    /// Wire code used by transport collaborators
    pub fn code(self) -> u8 {
        match self {
            TierState::Remote => 0,
            TierState::Resident => 1,
            TierState::FastTier => 2,
            TierState::Expired => 3,
        }
    }

    /// Decode a wire code
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(TierState::Remote),
            1 => Ok(TierState::Resident),
            2 => Ok(TierState::FastTier),
            3 => Ok(TierState::Expired),
            other => Err(CacheError::InvalidStateCode(other)),
        }
    }

    /// Whether an update record may ask for this state.
    ///
    /// Chunks are never sent back to `Remote`; they expire instead.
    pub fn is_valid_target(self) -> bool {
        !matches!(self, TierState::Remote)
    }
}

impl std::fmt::Display for TierState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TierState::Remote => "remote",
            TierState::Resident => "resident",
            TierState::FastTier => "fast-tier",
            TierState::Expired => "expired",
        };
        f.write_str(name)
    }
}

/// Tier primitives supplied by each concrete chunk type.
///
/// Implementations do the actual data movement (e.g. a texture upload).
/// Capacity bookkeeping is handled by [`Chunk`], not here.
pub trait ChunkPayload: Send {
    /// Copy the resident data into the fast tier
    fn upload(&mut self) -> std::result::Result<(), TransferError>;

    /// Free the fast-tier copy; resident data is kept
    fn evict(&mut self) -> std::result::Result<(), TransferError>;
}

/// What a call to [`Chunk::transition_to`] actually did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Target equals current state
    Unchanged,
    /// `Remote -> Resident`
    Materialized,
    /// Entered the fast tier (from `Resident` or `Remote`)
    Promoted,
    /// `FastTier -> Resident`
    Demoted,
}

impl Transition {
    /// Whether the transition made new data visible in the fast tier
    pub fn is_promotion(self) -> bool {
        matches!(self, Transition::Promoted)
    }
}

/// A single unit of data tracked through tier transitions
pub struct Chunk {
    id: ChunkId,
    /// Owning container (non-owning back-reference by id)
    container: ContainerId,
    state: TierState,
    size: usize,
    payload: Box<dyn ChunkPayload>,
}

impl Chunk {
    /// Create a chunk in the `Remote` state
    pub fn new(
        id: impl Into<ChunkId>,
        container: ContainerId,
        size: usize,
        payload: Box<dyn ChunkPayload>,
    ) -> Self {
        Self {
            id: id.into(),
            container,
            state: TierState::Remote,
            size,
            payload,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn container(&self) -> ContainerId {
        self.container
    }

    pub fn state(&self) -> TierState {
        self.state
    }

    /// Payload size in bytes, charged to each tier the chunk occupies
    pub fn size(&self) -> usize {
        self.size
    }

    /// Move the chunk to `target`, applying every intermediate step.
    ///
    /// `Remote` and `Expired` are not reachable through this method; expiry
    /// goes through [`Chunk::expire`].
    pub fn transition_to(&mut self, target: TierState, budgets: &TierBudgets) -> Result<Transition> {
        if self.state == target {
            return Ok(Transition::Unchanged);
        }

        match (self.state, target) {
            (TierState::Remote, TierState::Resident) => {
                self.materialize(budgets);
                Ok(Transition::Materialized)
            }
            (TierState::Remote, TierState::FastTier) => {
                self.materialize(budgets);
                self.promote(budgets)?;
                Ok(Transition::Promoted)
            }
            (TierState::Resident, TierState::FastTier) => {
                self.promote(budgets)?;
                Ok(Transition::Promoted)
            }
            (TierState::FastTier, TierState::Resident) => {
                self.demote(budgets)?;
                Ok(Transition::Demoted)
            }
            (from, to) => Err(CacheError::Transfer {
                chunk: self.id.clone(),
                reason: format!("no transition from {from} to {to}"),
            }),
        }
    }

    /// `Remote -> Resident`: charge resident memory
    fn materialize(&mut self, budgets: &TierBudgets) {
        budgets.resident().reserve(self.size);
        self.state = TierState::Resident;
    }

    /// `Resident -> FastTier`: reserve, copy, then mark visible
    fn promote(&mut self, budgets: &TierBudgets) -> Result<()> {
        budgets.fast_tier().reserve(self.size);
        if let Err(e) = self.payload.upload() {
            budgets.fast_tier().release(self.size);
            return Err(self.transfer_error(e));
        }
        self.state = TierState::FastTier;
        Ok(())
    }

    /// `FastTier -> Resident`: release, then free the fast-tier copy.
    ///
    /// A failed evict still leaves the chunk `Resident` with its fast-tier
    /// capacity returned; the error only reports the stranded copy.
    fn demote(&mut self, budgets: &TierBudgets) -> Result<()> {
        budgets.fast_tier().release(self.size);
        self.state = TierState::Resident;
        self.payload.evict().map_err(|e| self.transfer_error(e))
    }

    /// Return every byte this chunk holds to the budgets and mark it expired.
    ///
    /// Unlike demotion this does not call the payload's `evict`; dropping the
    /// payload frees its storage.
    pub fn expire(&mut self, budgets: &TierBudgets) {
        match self.state {
            TierState::FastTier => {
                budgets.fast_tier().release(self.size);
                budgets.resident().release(self.size);
            }
            TierState::Resident => budgets.resident().release(self.size),
            TierState::Remote | TierState::Expired => {}
        }
        self.state = TierState::Expired;
    }

    fn transfer_error(&self, e: TransferError) -> CacheError {
        CacheError::Transfer {
            chunk: self.id.clone(),
            reason: e.to_string(),
        }
    }
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("id", &self.id)
            .field("container", &self.container)
            .field("state", &self.state)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct TestPayload {
        fail_upload: bool,
        fail_evict: bool,
    }

    impl ChunkPayload for TestPayload {
        fn upload(&mut self) -> std::result::Result<(), TransferError> {
            if self.fail_upload {
                Err("device lost".into())
            } else {
                Ok(())
            }
        }

        fn evict(&mut self) -> std::result::Result<(), TransferError> {
            if self.fail_evict {
                Err("evict rejected".into())
            } else {
                Ok(())
            }
        }
    }

    fn chunk(size: usize) -> Chunk {
        Chunk::new("c1", 7, size, Box::new(TestPayload::default()))
    }

    fn budgets() -> TierBudgets {
        TierBudgets::new(1000, 1000, 1000)
    }

    #[test]
    fn test_state_codes() {
        for state in [
            TierState::Remote,
            TierState::Resident,
            TierState::FastTier,
            TierState::Expired,
        ] {
            assert_eq!(TierState::from_code(state.code()).unwrap(), state);
        }

        assert!(matches!(
            TierState::from_code(9),
            Err(CacheError::InvalidStateCode(9))
        ));
    }

    #[test]
    fn test_valid_targets() {
        assert!(!TierState::Remote.is_valid_target());
        assert!(TierState::Resident.is_valid_target());
        assert!(TierState::FastTier.is_valid_target());
        assert!(TierState::Expired.is_valid_target());
    }

    #[test]
    fn test_new_chunk_is_remote() {
        let chunk = chunk(10);
        assert_eq!(chunk.state(), TierState::Remote);
        assert_eq!(chunk.container(), 7);
        assert_eq!(chunk.id(), "c1");
    }

    #[test]
    fn test_materialize_charges_resident() {
        let budgets = budgets();
        let mut chunk = chunk(100);

        let t = chunk.transition_to(TierState::Resident, &budgets).unwrap();
        assert_eq!(t, Transition::Materialized);
        assert_eq!(chunk.state(), TierState::Resident);
        assert_eq!(budgets.resident().used(), 100);
        assert_eq!(budgets.fast_tier().used(), 0);
    }

    #[test]
    fn test_promote_then_demote_restores_fast_tier() {
        let budgets = budgets();
        let mut chunk = chunk(100);
        chunk.transition_to(TierState::Resident, &budgets).unwrap();
        budgets.fast_tier().reserve(50);

        let t = chunk.transition_to(TierState::FastTier, &budgets).unwrap();
        assert!(t.is_promotion());
        assert_eq!(budgets.fast_tier().used(), 150);

        let t = chunk.transition_to(TierState::Resident, &budgets).unwrap();
        assert_eq!(t, Transition::Demoted);
        assert_eq!(budgets.fast_tier().used(), 50);
        assert_eq!(budgets.resident().used(), 100);
    }

    #[test]
    fn test_remote_straight_to_fast_tier() {
        let budgets = budgets();
        let mut chunk = chunk(64);

        let t = chunk.transition_to(TierState::FastTier, &budgets).unwrap();
        assert_eq!(t, Transition::Promoted);
        assert_eq!(budgets.resident().used(), 64);
        assert_eq!(budgets.fast_tier().used(), 64);
    }

    #[test]
    fn test_same_state_is_unchanged() {
        let budgets = budgets();
        let mut chunk = chunk(64);
        chunk.transition_to(TierState::FastTier, &budgets).unwrap();

        let t = chunk.transition_to(TierState::FastTier, &budgets).unwrap();
        assert_eq!(t, Transition::Unchanged);
        assert!(!t.is_promotion());
        assert_eq!(budgets.fast_tier().used(), 64);
    }

    #[test]
    fn test_failed_upload_releases_reservation() {
        let budgets = budgets();
        let payload = TestPayload {
            fail_upload: true,
            ..Default::default()
        };
        let mut chunk = Chunk::new("bad", 1, 40, Box::new(payload));
        chunk.transition_to(TierState::Resident, &budgets).unwrap();

        let err = chunk.transition_to(TierState::FastTier, &budgets).unwrap_err();
        assert!(matches!(err, CacheError::Transfer { ref chunk, .. } if chunk == "bad"));
        assert_eq!(chunk.state(), TierState::Resident);
        assert_eq!(budgets.fast_tier().used(), 0);
    }

    #[test]
    fn test_failed_evict_still_demotes() {
        let budgets = budgets();
        let payload = TestPayload {
            fail_evict: true,
            ..Default::default()
        };
        let mut chunk = Chunk::new("stuck", 1, 40, Box::new(payload));
        chunk.transition_to(TierState::FastTier, &budgets).unwrap();
        assert_eq!(budgets.fast_tier().used(), 40);

        let err = chunk.transition_to(TierState::Resident, &budgets).unwrap_err();
        assert!(matches!(err, CacheError::Transfer { ref reason, .. } if reason == "evict rejected"));
        assert_eq!(chunk.state(), TierState::Resident);
        assert_eq!(budgets.fast_tier().used(), 0);
        assert_eq!(budgets.resident().used(), 40);

        // Nothing is released twice on expiry
        chunk.expire(&budgets);
        assert_eq!(budgets.fast_tier().used(), 0);
        assert_eq!(budgets.resident().used(), 0);
    }

    #[test]
    fn test_back_to_remote_is_rejected() {
        let budgets = budgets();
        let mut chunk = chunk(10);
        chunk.transition_to(TierState::Resident, &budgets).unwrap();

        assert!(chunk.transition_to(TierState::Remote, &budgets).is_err());
        assert!(chunk.transition_to(TierState::Expired, &budgets).is_err());
        assert_eq!(chunk.state(), TierState::Resident);
    }

    #[test]
    fn test_expire_from_fast_tier_releases_everything() {
        let budgets = budgets();
        let mut chunk = chunk(80);
        chunk.transition_to(TierState::FastTier, &budgets).unwrap();

        chunk.expire(&budgets);
        assert_eq!(chunk.state(), TierState::Expired);
        assert_eq!(budgets.fast_tier().used(), 0);
        assert_eq!(budgets.resident().used(), 0);
    }

    #[test]
    fn test_expire_remote_touches_nothing() {
        let budgets = budgets();
        budgets.resident().reserve(5);
        let mut chunk = chunk(80);

        chunk.expire(&budgets);
        assert_eq!(budgets.resident().used(), 5);
    }
}
