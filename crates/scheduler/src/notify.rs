//! Visibility-changed broadcast
//!
//! Fired with no payload each time a chunk newly enters the fast tier, so
//! the consumer knows there is something new to draw.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Callback invoked on every visibility change
pub type VisibilityListener = Arc<dyn Fn() + Send + Sync>;

/// Handle returned by [`VisibilitySignal::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct SignalState {
    listeners: Vec<(SubscriptionId, VisibilityListener)>,
    next_id: u64,
}

/// Broadcast signal with zero or more subscribers.
///
/// Clones share subscribers and the fire counter.
///
/// # Example
///
/// ```
/// use chunkstage_scheduler::VisibilitySignal;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// let signal = VisibilitySignal::new();
/// let redraws = Arc::new(AtomicUsize::new(0));
///
/// let counter = redraws.clone();
/// signal.subscribe(move || {
///     counter.fetch_add(1, Ordering::SeqCst);
/// });
///
/// signal.fire();
/// assert_eq!(redraws.load(Ordering::SeqCst), 1);
/// ```
#[derive(Clone)]
pub struct VisibilitySignal {
    state: Arc<Mutex<SignalState>>,
    fired: Arc<AtomicU64>,
}

impl VisibilitySignal {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SignalState {
                listeners: Vec::new(),
                next_id: 0,
            })),
            fired: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut state = self.state.lock();
        let id = SubscriptionId(state.next_id);
        state.next_id += 1;
        state.listeners.push((id, Arc::new(listener)));
        id
    }

    /// Remove a subscriber; returns false if it was already gone
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.state.lock();
        let before = state.listeners.len();
        state.listeners.retain(|(sid, _)| *sid != id);
        state.listeners.len() != before
    }

    /// Notify every subscriber.
    ///
    /// Listeners run outside the internal lock, so they may subscribe or
    /// unsubscribe without deadlocking.
    pub fn fire(&self) {
        self.fired.fetch_add(1, Ordering::Relaxed);
        let listeners: Vec<VisibilityListener> = self
            .state
            .lock()
            .listeners
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        for listener in listeners {
            listener();
        }
    }

    /// Number of times the signal has fired
    pub fn fired(&self) -> u64 {
        self.fired.load(Ordering::Relaxed)
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().listeners.len()
    }
}

impl Default for VisibilitySignal {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for VisibilitySignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisibilitySignal")
            .field("subscribers", &self.subscriber_count())
            .field("fired", &self.fired())
            .finish()
    }
}
