use super::{DoorState, RelayRole, SystemId, SystemMode, SystemState};
use crate::alarm::AlarmSignaler;
use crate::config::SystemConfig;
use crate::error::{EngineError, FaultReason, Result};
use crate::fault::FaultLog;
use crate::ports::{EventSink, RelayBank};
use crate::safety::{self, Reading, SafetyVerdict, Thresholds};
use crate::scheduler::{SessionTimer, TimeoutExpired};
use crate::telemetry::{EngineEvent, SystemStatus};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// State machine for one heated room.
///
/// Owns the room's relay group, session timer and fault latch. Callers hold
/// the controller's mutex for the whole of each operation, so every event is
/// applied as one read-decide-write step.
///
/// The heater relays are energized only while the system is heating, the
/// door interlock is not suspending it, no fault is latched, and the latest
/// nominal reading is below target.
pub struct SystemController {
    id: SystemId,
    config: SystemConfig,
    limits: Thresholds,
    relays: Arc<RelayBank>,
    alarm: AlarmSignaler,
    sink: Arc<dyn EventSink>,
    state: SystemState,
    /// Last value successfully written to the relays. `None` after a failed write.
    output: Option<bool>,
    latched: Option<FaultReason>,
    last_temperature: Option<f32>,
    door: DoorState,
    timer: SessionTimer,
    faults: FaultLog,
    epoch: Instant,
    timeouts: u32,
}

impl SystemController {
    pub fn new(
        config: SystemConfig,
        relays: Arc<RelayBank>,
        alarm: AlarmSignaler,
        sink: Arc<dyn EventSink>,
        expired_tx: UnboundedSender<TimeoutExpired>,
        epoch: Instant,
    ) -> Self {
        let id = config.system;
        Self {
            id,
            limits: Thresholds {
                max_temperature: config.max_temperature,
                safety_temperature: config.safety_temperature,
            },
            config,
            relays,
            alarm,
            sink,
            state: SystemState::new(),
            output: None,
            latched: None,
            last_temperature: None,
            door: DoorState::Unknown,
            timer: SessionTimer::new(id, expired_tx),
            faults: FaultLog::new(),
            epoch,
            timeouts: 0,
        }
    }

    pub fn id(&self) -> SystemId {
        self.id
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn state(&self) -> &SystemState {
        &self.state
    }

    pub fn mode(&self) -> SystemMode {
        self.state.mode
    }

    pub fn is_heating(&self) -> bool {
        self.state.mode == SystemMode::Heating
    }

    /// Whether the relays were last written on.
    pub fn relay_on(&self) -> bool {
        self.output == Some(true)
    }

    pub fn latched(&self) -> Option<FaultReason> {
        self.latched
    }

    pub fn faults(&self) -> &FaultLog {
        &self.faults
    }

    fn role(&self) -> RelayRole {
        self.id.into()
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Validate a heat request without changing anything.
    pub fn check_heat_allowed(&self, target: f32) -> Result<()> {
        if !target.is_finite() || target < 0.0 || target > self.config.max_temperature {
            return Err(EngineError::InvalidTarget {
                system: self.id,
                target,
                max: self.config.max_temperature,
            });
        }
        if let Some(reason) = self.latched {
            return Err(EngineError::FaultLatched {
                system: self.id,
                reason,
            });
        }
        Ok(())
    }

    /// Enter (or stay in) `Heating`. Only the exclusivity arbiter calls this.
    ///
    /// The session timer is armed on entry and left alone on a repeated request.
    pub(crate) fn enter_heating(&mut self, target: f32) -> Result<()> {
        self.check_heat_allowed(target)?;
        self.state.target_temperature = target;

        if self.state.mode == SystemMode::Off {
            self.state.mode = SystemMode::Heating;
            let deadline = self.timer.arm(self.config.timeout);
            self.state.timeout_deadline = Some(deadline);
            info!(
                system = %self.id,
                target,
                timeout_secs = self.config.timeout.as_secs(),
                "heating started"
            );
        } else {
            info!(system = %self.id, target, "target temperature updated");
        }

        self.apply_output();
        self.publish();
        Ok(())
    }

    /// Leave `Heating` on user request. Returns `false` if already off.
    pub fn request_off(&mut self) -> bool {
        if self.state.mode == SystemMode::Off {
            return false;
        }
        info!(system = %self.id, "heating stopped");
        self.leave_heating();
        self.publish();
        true
    }

    /// Handle a session timer expiry. Stale generations are ignored.
    pub fn timeout_fired(&mut self, generation: u64) -> bool {
        if !self.timer.accept(generation) {
            return false;
        }
        self.state.timeout_deadline = None;
        if self.state.mode != SystemMode::Heating {
            return false;
        }
        info!(
            system = %self.id,
            timeout_secs = self.config.timeout.as_secs(),
            "session timeout reached, heating stopped"
        );
        self.timeouts += 1;
        self.leave_heating();
        self.publish();
        true
    }

    fn leave_heating(&mut self) {
        self.state.mode = SystemMode::Off;
        self.timer.cancel();
        self.state.timeout_deadline = None;
        self.drive_output(false);
    }

    /// Evaluate a control-sensor reading and act on the verdict.
    pub fn apply_reading(&mut self, reading: &Reading) -> SafetyVerdict {
        let verdict = safety::evaluate(reading, self.limits);
        safety::log_verdict(self.id, verdict, reading, self.limits);

        match verdict {
            SafetyVerdict::SafetyExceeded | SafetyVerdict::MaxExceeded => {
                let reason = if verdict == SafetyVerdict::SafetyExceeded {
                    FaultReason::SafetyTemperature
                } else {
                    FaultReason::MaxTemperature
                };
                self.last_temperature = Some(reading.temperature_c);
                self.trip(reason);
                self.alarm.trigger(reason);
                self.publish();
                return verdict;
            }
            SafetyVerdict::InvalidReading => {
                self.last_temperature = None;
                self.trip(FaultReason::SensorFault);
            }
            SafetyVerdict::Nominal => {
                self.last_temperature = Some(reading.temperature_c);
                if let Some(reason) = self.latched.take() {
                    let closed = self.faults.resolve_all(self.now_ms());
                    info!(system = %self.id, %reason, closed, "fault cleared by nominal reading");
                }
                self.apply_output();
            }
        }

        self.publish();
        verdict
    }

    /// Force off and latch until a nominal reading arrives.
    fn trip(&mut self, reason: FaultReason) {
        self.latched = Some(reason);
        self.force_off(reason);
    }

    /// Unconditional off used by fault paths. Always drops the relays.
    pub fn force_off(&mut self, reason: FaultReason) {
        self.faults.raise(reason, self.now_ms());
        if self.state.mode == SystemMode::Heating {
            warn!(system = %self.id, %reason, "heating forced off");
        }
        self.leave_heating();
    }

    /// Door edge. Suspends output only when heating with the door open is not allowed.
    pub fn door_changed(&mut self, door: DoorState) {
        let suspended = !self.config.door_open_allowed() && door != DoorState::Closed;
        let changed = self.door != door || self.state.door_suspended != suspended;
        self.door = door;
        if !changed {
            return;
        }

        if suspended != self.state.door_suspended {
            self.state.door_suspended = suspended;
            if suspended {
                info!(system = %self.id, ?door, "door open, heating suspended");
            } else {
                info!(system = %self.id, "door closed, heating resumed");
            }
        }
        self.apply_output();
        self.publish();
    }

    /// Steam humidity guard. Returns whether heating was stopped.
    pub fn apply_humidity(&mut self, humidity_percent: f32) -> bool {
        let Some(limit) = self.config.max_humidity else {
            return false;
        };
        if self.state.mode != SystemMode::Heating || humidity_percent < limit {
            return false;
        }
        warn!(system = %self.id, humidity_percent, limit, "humidity limit reached, heating off");
        self.force_off(FaultReason::HumidityLimit);
        self.publish();
        true
    }

    /// Read the relay lines back; any read failure counts as not confirmed.
    pub fn relay_confirmed_off(&self) -> bool {
        match self.relays.group_is_off(self.role()) {
            Ok(off) => off,
            Err(e) => {
                warn!(system = %self.id, error = %e, "cannot read back relay lines");
                false
            }
        }
    }

    /// Write the lines off again even though they were last written off.
    pub fn reassert_off(&mut self) {
        if self.state.mode == SystemMode::Off {
            self.output = None;
            self.drive_output(false);
        }
    }

    fn desired_output(&self) -> bool {
        self.state.output_permitted()
            && self.latched.is_none()
            && self
                .last_temperature
                .is_some_and(|t| t < self.state.target_temperature)
    }

    fn apply_output(&mut self) {
        let desired = self.desired_output();
        self.drive_output(desired);
        debug_assert!(!self.relay_on() || self.state.output_permitted());
    }

    /// Write the relays, skipping the write when the last written value matches.
    fn drive_output(&mut self, on: bool) {
        if self.output == Some(on) {
            return;
        }
        match self.relays.set_group(self.role(), on) {
            Ok(()) => self.output = Some(on),
            Err(e) => {
                self.output = None;
                self.faults.raise(FaultReason::RelayFault, self.now_ms());
                error!(system = %self.id, on, error = %e, "heater relay write failed");
                if on {
                    // Never leave a half-energized group behind.
                    if let Err(e) = self.relays.set_group(self.role(), false) {
                        error!(system = %self.id, error = %e, "heater relays may be left energized");
                    }
                    self.state.mode = SystemMode::Off;
                    self.timer.cancel();
                    self.state.timeout_deadline = None;
                }
            }
        }
    }

    pub fn status(&self) -> SystemStatus {
        SystemStatus {
            system: self.id,
            mode: self.state.mode,
            relay_on: self.relay_on(),
            door: self.door,
            door_suspended: self.state.door_suspended,
            target_temperature: self.state.target_temperature,
            current_temperature: self.last_temperature,
            fault: self.latched,
            remaining_secs: self.timer.remaining().map(|d| d.as_secs()),
            timeouts: self.timeouts,
        }
    }

    fn publish(&self) {
        self.sink.emit(&EngineEvent::System(self.status()));
    }

    /// Startup: write the group off regardless of what the lines show.
    pub(crate) fn initialize(&mut self, door: DoorState) {
        self.output = None;
        self.drive_output(false);
        self.door_changed(door);
    }
}

impl core::fmt::Debug for SystemController {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SystemController")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("output", &self.output)
            .field("latched", &self.latched)
            .finish_non_exhaustive()
    }
}
