//! Capacity accounting for the storage tiers
//!
//! Each tier (fast tier, resident memory, download bandwidth) tracks a
//! `(used, total)` pair. Promotions reserve, demotions release. The budgets
//! never reject a reservation: the producer already decides what fits, and
//! the numbers here exist so that the host and downstream components can
//! observe remaining capacity.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Memory pressure level of a single tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MemoryPressure {
    /// Usage is low (< 50% utilization)
    Low,
    /// Usage is moderate (50-75% utilization)
    Moderate,
    /// Usage is high (75-90% utilization)
    High,
    /// Usage is critical (>= 90% utilization, or over budget)
    Critical,
}

impl MemoryPressure {
    /// Get the pressure level from a utilization ratio (0.0 to 1.0+)
    pub fn from_utilization(utilization: f64) -> Self {
        if utilization < 0.5 {
            MemoryPressure::Low
        } else if utilization < 0.75 {
            MemoryPressure::Moderate
        } else if utilization < 0.90 {
            MemoryPressure::High
        } else {
            MemoryPressure::Critical
        }
    }

    /// Returns true if the producer should start demoting or expiring chunks
    pub fn needs_eviction(&self) -> bool {
        matches!(self, MemoryPressure::High | MemoryPressure::Critical)
    }
}

/// `(used, total)` byte counter for one tier.
///
/// Counters are atomic so the host can read them from another thread while
/// a drain tick is running.
#[derive(Debug)]
pub struct TierBudget {
    total: AtomicUsize,
    used: AtomicUsize,
}

impl TierBudget {
    /// Create a budget with the given total capacity in bytes
    pub fn new(total: usize) -> Self {
        Self {
            total: AtomicUsize::new(total),
            used: AtomicUsize::new(0),
        }
    }

    /// Create a budget with a total capacity in megabytes
    pub fn with_limit_mb(total_mb: usize) -> Self {
        Self::new(total_mb * 1024 * 1024)
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }

    /// Remaining capacity; zero when the tier is over budget
    pub fn available(&self) -> usize {
        self.total().saturating_sub(self.used())
    }

    /// Current utilization ratio; may exceed 1.0 if the producer overcommits
    pub fn utilization(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            self.used() as f64 / total as f64
        }
    }

    pub fn pressure(&self) -> MemoryPressure {
        MemoryPressure::from_utilization(self.utilization())
    }

    /// Returns true if `bytes` more would still fit within the total
    pub fn can_reserve(&self, bytes: usize) -> bool {
        self.used().saturating_add(bytes) <= self.total()
    }

    /// Record `bytes` as in use.
    ///
    /// Overcommit is allowed; a warning is logged when it happens.
    pub fn reserve(&self, bytes: usize) {
        let previous = self.used.fetch_add(bytes, Ordering::Relaxed);
        let total = self.total();
        if previous.saturating_add(bytes) > total && previous <= total {
            tracing::warn!(
                used = previous + bytes,
                total,
                "tier budget overcommitted by producer"
            );
        }
    }

    /// Return `bytes` to the tier. Saturates at zero.
    pub fn release(&self, bytes: usize) {
        self.used
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(current.saturating_sub(bytes))
            })
            .ok();
    }

    /// Change the total capacity; existing usage is kept
    pub fn set_total(&self, total: usize) {
        self.total.store(total, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        BudgetSnapshot {
            used: self.used(),
            total: self.total(),
        }
    }
}

/// Point-in-time copy of a tier budget
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BudgetSnapshot {
    pub used: usize,
    pub total: usize,
}

impl BudgetSnapshot {
    pub fn available(&self) -> usize {
        self.total.saturating_sub(self.used)
    }
}

/// The three capacity budgets owned by one scheduling context.
///
/// Cheap to clone; clones share the same counters.
///
/// # Example
///
/// ```
/// use chunkstage_cache::TierBudgets;
///
/// let budgets = TierBudgets::new(512 * 1024 * 1024, 256 * 1024 * 1024, 64 * 1024 * 1024);
///
/// budgets.fast_tier().reserve(4096);
/// assert_eq!(budgets.fast_tier().used(), 4096);
///
/// budgets.fast_tier().release(4096);
/// assert_eq!(budgets.fast_tier().used(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct TierBudgets {
    fast_tier: Arc<TierBudget>,
    resident: Arc<TierBudget>,
    download: Arc<TierBudget>,
}

impl TierBudgets {
    /// Create budgets from totals in bytes
    pub fn new(fast_tier_total: usize, resident_total: usize, download_total: usize) -> Self {
        Self {
            fast_tier: Arc::new(TierBudget::new(fast_tier_total)),
            resident: Arc::new(TierBudget::new(resident_total)),
            download: Arc::new(TierBudget::new(download_total)),
        }
    }

    /// Accelerator memory (e.g. VRAM)
    pub fn fast_tier(&self) -> &TierBudget {
        &self.fast_tier
    }

    /// System memory
    pub fn resident(&self) -> &TierBudget {
        &self.resident
    }

    /// Download bandwidth.
    ///
    /// The scheduler never touches this budget; it is maintained by the
    /// channel that delivers payloads.
    pub fn download(&self) -> &TierBudget {
        &self.download
    }

    pub fn snapshot(&self) -> BudgetsSnapshot {
        BudgetsSnapshot {
            fast_tier: self.fast_tier.snapshot(),
            resident: self.resident.snapshot(),
            download: self.download.snapshot(),
        }
    }
}

/// Point-in-time copy of all three budgets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BudgetsSnapshot {
    pub fast_tier: BudgetSnapshot,
    pub resident: BudgetSnapshot,
    pub download: BudgetSnapshot,
}

impl BudgetsSnapshot {
    /// Total memory held across fast tier and resident memory
    pub fn total_memory_used(&self) -> usize {
        self.fast_tier.used + self.resident.used
    }
}
