//! Per-frame deadlines for tier promotion
//!
//! A render loop opens a frame, hands the resulting deadline to the
//! scheduler, and the scheduler stops starting promotions once the deadline
//! passes. Part of every frame is reserved for the host's own event
//! processing, so the deadline lands before the end of the frame.
//!
//! # Target Frame Times
//! - 120 FPS (ProMotion): 8.33ms per frame
//! - 60 FPS (standard): 16.67ms per frame

use std::time::{Duration, Instant};

/// Default frame budget for 60 FPS displays (16.67ms)
pub const FRAME_BUDGET_60FPS: Duration = Duration::from_micros(16_667);

/// Frame budget for 120 FPS displays (8.33ms)
pub const FRAME_BUDGET_120FPS: Duration = Duration::from_micros(8_333);

/// Time kept free for the host's event processing (5ms)
pub const EVENT_PROCESSING_RESERVE: Duration = Duration::from_millis(5);

/// Time budget of one frame
///
/// # Example
///
/// ```
/// use chunkstage_scheduler::frame_budget::{FrameBudget, FRAME_BUDGET_60FPS};
///
/// let budget = FrameBudget::new(FRAME_BUDGET_60FPS);
///
/// // Promotions may start until this instant
/// let deadline = budget.deadline();
/// assert!(deadline > budget.frame_start());
/// ```
#[derive(Debug, Clone)]
pub struct FrameBudget {
    frame_start: Instant,
    budget: Duration,
    reserved: Duration,
}

impl FrameBudget {
    /// Start a frame now with the given total budget
    pub fn new(budget: Duration) -> Self {
        Self {
            frame_start: Instant::now(),
            budget,
            reserved: EVENT_PROCESSING_RESERVE,
        }
    }

    pub fn for_60fps() -> Self {
        Self::new(FRAME_BUDGET_60FPS)
    }

    pub fn for_120fps() -> Self {
        Self::new(FRAME_BUDGET_120FPS)
    }

    /// Frame budget for an arbitrary refresh rate; zero is treated as 1 FPS
    pub fn for_fps(fps: u32) -> Self {
        Self::new(Duration::from_secs(1) / fps.max(1))
    }

    /// Override the event processing reserve
    pub fn with_reserved(mut self, reserved: Duration) -> Self {
        self.reserved = reserved;
        self
    }

    /// Restart the frame clock
    pub fn reset(&mut self) {
        self.frame_start = Instant::now();
    }

    pub fn frame_start(&self) -> Instant {
        self.frame_start
    }

    pub fn elapsed(&self) -> Duration {
        self.frame_start.elapsed()
    }

    /// Budget minus reserve
    pub fn available_budget(&self) -> Duration {
        self.budget.saturating_sub(self.reserved)
    }

    /// Instant after which no new promotion should start
    pub fn deadline(&self) -> Instant {
        self.frame_start + self.available_budget()
    }

    /// Time left before the deadline; `Duration::ZERO` once it has passed
    pub fn remaining(&self) -> Duration {
        self.available_budget().saturating_sub(self.elapsed())
    }

    pub fn is_exceeded(&self) -> bool {
        self.remaining() == Duration::ZERO
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn reserved(&self) -> Duration {
        self.reserved
    }
}

impl Default for FrameBudget {
    fn default() -> Self {
        Self::for_60fps()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_frame_budget_creation() {
        assert_eq!(FrameBudget::for_60fps().budget(), FRAME_BUDGET_60FPS);
        assert_eq!(FrameBudget::for_120fps().budget(), FRAME_BUDGET_120FPS);
        assert_eq!(
            FrameBudget::new(Duration::from_millis(10)).budget(),
            Duration::from_millis(10)
        );
    }

    #[test]
    fn test_for_fps() {
        assert_eq!(FrameBudget::for_fps(50).budget(), Duration::from_millis(20));
        assert_eq!(FrameBudget::for_fps(0).budget(), Duration::from_secs(1));
    }

    #[test]
    fn test_deadline_excludes_reserve() {
        let budget = FrameBudget::new(Duration::from_millis(20))
            .with_reserved(Duration::from_millis(5));

        assert_eq!(budget.available_budget(), Duration::from_millis(15));
        assert_eq!(
            budget.deadline(),
            budget.frame_start() + Duration::from_millis(15)
        );
    }

    #[test]
    fn test_reserve_larger_than_budget() {
        let budget = FrameBudget::new(Duration::from_millis(2))
            .with_reserved(Duration::from_millis(5));

        assert_eq!(budget.available_budget(), Duration::ZERO);
        assert_eq!(budget.deadline(), budget.frame_start());
        assert!(budget.is_exceeded());
    }

    #[test]
    fn test_frame_budget_exceeded() {
        let budget = FrameBudget::new(Duration::from_millis(5))
            .with_reserved(Duration::from_millis(2));

        assert!(!budget.is_exceeded());
        thread::sleep(Duration::from_millis(4));
        assert!(budget.is_exceeded());
        assert!(Instant::now() > budget.deadline());
    }

    #[test]
    fn test_frame_budget_reset_moves_deadline() {
        let mut budget = FrameBudget::new(Duration::from_millis(10))
            .with_reserved(Duration::from_millis(2));
        let first_deadline = budget.deadline();

        thread::sleep(Duration::from_millis(5));
        budget.reset();

        assert!(budget.deadline() > first_deadline);
        assert!(budget.elapsed() < Duration::from_millis(5));
    }

    #[test]
    fn test_frame_budget_default() {
        assert_eq!(FrameBudget::default().budget(), FRAME_BUDGET_60FPS);
        assert_eq!(FrameBudget::default().reserved(), EVENT_PROCESSING_RESERVE);
    }
}
