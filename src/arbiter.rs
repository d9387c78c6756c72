//! Mutual exclusion between the heated systems.
//!
//! Every heat request passes through [`ExclusivityArbiter::request_heat`].
//! Requests are handled one at a time; the other system is switched off and
//! its relay lines read back as released before the requested system may
//! energize anything.

use crate::error::{EngineError, Result};
use crate::ports::EventSink;
use crate::safety::ControllerSafetyMonitor;
use crate::subsystems::{PerSystem, SystemController, SystemId};
use crate::telemetry::EngineEvent;
use core::time::Duration;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// How often the relay lines are read back during the release handshake.
pub const CONFIRM_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub type SharedController = Arc<Mutex<SystemController>>;

pub struct ExclusivityArbiter {
    controllers: PerSystem<Option<SharedController>>,
    monitor: Arc<ControllerSafetyMonitor>,
    sink: Arc<dyn EventSink>,
    grace: Duration,
    handshake: Mutex<()>,
}

impl ExclusivityArbiter {
    pub fn new(
        controllers: PerSystem<Option<SharedController>>,
        monitor: Arc<ControllerSafetyMonitor>,
        sink: Arc<dyn EventSink>,
        grace: Duration,
    ) -> Self {
        Self {
            controllers,
            monitor,
            sink,
            grace,
            handshake: Mutex::new(()),
        }
    }

    pub fn controller(&self, system: SystemId) -> Result<&SharedController> {
        self.controllers[system]
            .as_ref()
            .ok_or(EngineError::NotConfigured(system))
    }

    /// Switch `system` to heating at `target`, turning the other system off first.
    ///
    /// Rejections are returned, logged and reported to the event sink.
    pub async fn request_heat(&self, system: SystemId, target: f32) -> Result<()> {
        let result = self.handshake_then_heat(system, target).await;
        if let Err(e) = &result {
            match e {
                EngineError::HandshakeTimeout { .. } | EngineError::ControllerLockout => {
                    error!(%system, target, error = %e, "heat request rejected");
                }
                _ => warn!(%system, target, error = %e, "heat request rejected"),
            }
            self.sink.emit(&EngineEvent::HeatRejected {
                system,
                reason: e.to_string(),
            });
        }
        result
    }

    async fn handshake_then_heat(&self, system: SystemId, target: f32) -> Result<()> {
        let _turn = self.handshake.lock().await;
        if self.monitor.is_tripped() {
            return Err(EngineError::ControllerLockout);
        }

        let requested = self.controller(system)?;
        requested.lock().await.check_heat_allowed(target)?;

        if let Some(other) = self.controllers[system.other()].as_ref() {
            let preempted = other.lock().await.request_off();
            if preempted {
                info!(%system, blocking = %system.other(), "switching off the other system first");
            }
            self.confirm_released(system, other).await?;
        }

        let mut controller = requested.lock().await;
        if self.monitor.is_tripped() {
            return Err(EngineError::ControllerLockout);
        }
        controller.enter_heating(target)
    }

    /// Poll the blocking system's lines until they read off or the grace window ends.
    async fn confirm_released(&self, requested: SystemId, other: &SharedController) -> Result<()> {
        let deadline = Instant::now() + self.grace;
        loop {
            {
                let mut blocking = other.lock().await;
                if blocking.relay_confirmed_off() {
                    return Ok(());
                }
                if Instant::now() >= deadline {
                    return Err(EngineError::HandshakeTimeout {
                        requested,
                        blocking: requested.other(),
                        grace_ms: u64::try_from(self.grace.as_millis()).unwrap_or(u64::MAX),
                    });
                }
                blocking.reassert_off();
            }
            tokio::time::sleep(CONFIRM_POLL_INTERVAL).await;
        }
    }

    /// Wait for any in-flight heat request to finish and block new ones
    /// while the guard is held. Used by the global off path.
    pub async fn quiesce(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.handshake.lock().await
    }
}

impl core::fmt::Debug for ExclusivityArbiter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ExclusivityArbiter")
            .field("grace", &self.grace)
            .finish_non_exhaustive()
    }
}
