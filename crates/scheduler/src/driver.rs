//! Dedicated thread that drives a [`TierScheduler`].
//!
//! The thread follows the continuation each tick returns: tick again right
//! away while records are pending, sleep for the fallback delay after a
//! missed deadline, and block on the update queue while idle. A fatal tick
//! error stops the thread and is handed back from
//! [`SchedulerDriver::shutdown`].
//!
//! Visibility listeners are called after the scheduler lock is released, so
//! a listener may lock [`SchedulerDriver::scheduler`] itself.

use std::io;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{Result, SchedulerError};
use crate::notify::VisibilitySignal;
use crate::queue::UpdateQueue;
use crate::scheduler::{Continuation, TierScheduler};

/// Configuration for the driver thread.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Longest time the idle thread waits before re-checking for shutdown.
    /// Default: 100ms.
    pub poll_interval: Duration,

    /// Thread name. Default: `chunkstage-scheduler`.
    pub thread_name: String,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            thread_name: "chunkstage-scheduler".to_string(),
        }
    }
}

impl DriverConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

/// Runs the tick loop of one scheduler on its own thread.
///
/// # Example
///
/// ```
/// use chunkstage_cache::{ContainerRegistry, ContainerTypes};
/// use chunkstage_scheduler::{DriverConfig, SchedulerConfig, SchedulerDriver, TierScheduler};
///
/// let scheduler = TierScheduler::new(
///     &SchedulerConfig::default(),
///     ContainerRegistry::new(ContainerTypes::new()),
/// );
/// let driver = SchedulerDriver::spawn(scheduler, DriverConfig::default()).unwrap();
///
/// // Producer side
/// let _queue = driver.producer();
///
/// // Render loop side: move the deadline each frame
/// driver.scheduler().lock().set_deadline(None);
///
/// driver.shutdown().unwrap();
/// ```
pub struct SchedulerDriver {
    scheduler: Arc<Mutex<TierScheduler>>,
    queue: UpdateQueue,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<Result<()>>>,
}

impl SchedulerDriver {
    /// Move `scheduler` onto a new thread and start ticking.
    pub fn spawn(scheduler: TierScheduler, config: DriverConfig) -> io::Result<Self> {
        let queue = scheduler.producer();
        let visibility = scheduler.visibility().clone();
        let scheduler = Arc::new(Mutex::new(scheduler));
        let shutdown = Arc::new(AtomicBool::new(false));

        let thread = {
            let scheduler = scheduler.clone();
            let queue = queue.clone();
            let shutdown = shutdown.clone();
            let poll_interval = config.poll_interval;
            thread::Builder::new()
                .name(config.thread_name.clone())
                .spawn(move || Self::run(scheduler, queue, visibility, shutdown, poll_interval))?
        };

        tracing::info!(thread = %config.thread_name, "scheduler driver started");
        Ok(Self {
            scheduler,
            queue,
            shutdown,
            thread: Some(thread),
        })
    }

    /// Shared access to the scheduler, e.g. to move the deadline each frame.
    ///
    /// Hold the lock briefly; the driver needs it for every tick. The lock
    /// is free while visibility listeners run.
    pub fn scheduler(&self) -> Arc<Mutex<TierScheduler>> {
        self.scheduler.clone()
    }

    /// Queue handle for the producer side
    pub fn producer(&self) -> UpdateQueue {
        self.queue.clone()
    }

    /// Whether the driver thread is still ticking
    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .is_some_and(|thread| !thread.is_finished())
    }

    /// Stop the thread and wait for it.
    ///
    /// Returns the fatal error that stopped the thread early, if any.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::Release);
        self.queue.wake();

        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        let outcome = thread.join().map_err(|_| SchedulerError::DriverPanicked)?;
        tracing::info!("scheduler driver stopped");
        outcome
    }

    fn run(
        scheduler: Arc<Mutex<TierScheduler>>,
        queue: UpdateQueue,
        visibility: VisibilitySignal,
        shutdown: Arc<AtomicBool>,
        poll_interval: Duration,
    ) -> Result<()> {
        while !shutdown.load(Ordering::Acquire) {
            let (continuation, promoted) = scheduler.lock().advance(Instant::now())?;
            if promoted {
                visibility.fire();
            }
            match continuation {
                Continuation::Immediate => thread::yield_now(),
                Continuation::RetryAfter(delay) => thread::sleep(delay),
                Continuation::Idle => {
                    queue.wait_for_records(poll_interval);
                }
            }
        }
        Ok(())
    }
}

impl Drop for SchedulerDriver {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::error!(error = %e, "scheduler driver exited with an error");
        }
    }
}
