use crate::subsystems::SystemId;
use core::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Delivered when a session timer runs out. Carries the generation it was
/// armed with so a timer that was cancelled or re-armed can be recognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutExpired {
    pub system: SystemId,
    pub generation: u64,
}

/// Single-session timeout for one system.
///
/// Every arm and cancel bumps the generation, which invalidates any
/// expiry already in flight.
#[derive(Debug)]
pub struct SessionTimer {
    system: SystemId,
    generation: u64,
    deadline: Option<Instant>,
    task: Option<JoinHandle<()>>,
    expired_tx: UnboundedSender<TimeoutExpired>,
}

impl SessionTimer {
    pub fn new(system: SystemId, expired_tx: UnboundedSender<TimeoutExpired>) -> Self {
        Self {
            system,
            generation: 0,
            deadline: None,
            task: None,
            expired_tx,
        }
    }

    /// Start a fresh countdown, discarding any previous one.
    pub fn arm(&mut self, duration: Duration) -> Instant {
        self.invalidate();
        let deadline = Instant::now() + duration;
        let event = TimeoutExpired {
            system: self.system,
            generation: self.generation,
        };
        let tx = self.expired_tx.clone();
        self.task = Some(tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            // The receiver is gone only during shutdown.
            let _ = tx.send(event);
        }));
        self.deadline = Some(deadline);
        debug!(system = %self.system, generation = self.generation, ?duration, "session timer armed");
        deadline
    }

    /// Disarm. Returns whether a countdown was running.
    pub fn cancel(&mut self) -> bool {
        let was_armed = self.deadline.is_some();
        self.invalidate();
        if was_armed {
            debug!(system = %self.system, "session timer cancelled");
        }
        was_armed
    }

    /// Consume an expiry. Returns `false` for stale generations.
    pub fn accept(&mut self, generation: u64) -> bool {
        if self.deadline.is_some() && generation == self.generation {
            self.deadline = None;
            self.task = None;
            true
        } else {
            debug!(
                system = %self.system,
                generation,
                current = self.generation,
                "ignoring stale session timeout"
            );
            false
        }
    }

    fn invalidate(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.deadline = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for SessionTimer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
