use crate::alarm::AlarmSignaler;
use crate::arbiter::{ExclusivityArbiter, SharedController};
use crate::config::{EngineConfig, SensorConfig, SensorOwner};
use crate::conversion::ClimateSample;
use crate::error::{ClimateError, EngineError, FaultReason, Result};
use crate::fault::FaultLog;
use crate::poller;
use crate::ports::{Hardware, RelayBank};
use crate::protocol::{Command, CommandResponse, CommandType};
use crate::safety::{ControllerSafetyMonitor, ControllerVerdict, Reading, SafetyVerdict};
use crate::scheduler::TimeoutExpired;
use crate::subsystems::{DoorInterlock, DoorState, PerSystem, RelayRole, SystemController, SystemId};
use crate::telemetry::{EngineEvent, EngineStatus, FaultEntry, FaultSource};
use core::sync::atomic::{AtomicBool, Ordering};
use static_assertions::assert_impl_all;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Where a reading ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingOutcome {
    System(SystemId, SafetyVerdict),
    Controller(ControllerVerdict),
    /// Published for display only.
    DisplayOnly,
}

#[derive(Debug, Default)]
struct Ambient {
    light_on: bool,
    fan_on: bool,
    controller_temperature: Option<f32>,
    humidity_percent: Option<f32>,
}

struct Core {
    config: EngineConfig,
    hardware: Hardware,
    relays: Arc<RelayBank>,
    controllers: PerSystem<Option<SharedController>>,
    arbiter: ExclusivityArbiter,
    monitor: Arc<ControllerSafetyMonitor>,
    alarm: AlarmSignaler,
    doors: DoorInterlock,
    controller_faults: StdMutex<FaultLog>,
    ambient: StdMutex<Ambient>,
    epoch: Instant,
}

/// The thermal control engine.
///
/// Built from a validated configuration and a set of hardware ports. All
/// relay lines are driven off during construction and again on shutdown or
/// drop.
pub struct Engine {
    core: Arc<Core>,
    timeouts_rx: StdMutex<Option<UnboundedReceiver<TimeoutExpired>>>,
    polling: AtomicBool,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

assert_impl_all!(Engine: Send, Sync);

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Engine {
    pub fn new(config: EngineConfig, hardware: Hardware) -> Result<Self> {
        config.validate()?;
        let epoch = Instant::now();
        let sink = hardware.sink.clone();

        let relays = Arc::new(RelayBank::new(hardware.relays.clone(), config.relay_groups()));
        relays.all_off()?;

        let alarm = AlarmSignaler::new(
            relays.clone(),
            sink.clone(),
            config.alarm.flash_count,
            Duration::from_millis(config.alarm.toggle_interval_ms),
        );
        let monitor = Arc::new(ControllerSafetyMonitor::new(config.controller_safety_temperature));
        let doors = DoorInterlock::new(&config);
        let initial_doors = doors.read_all(hardware.doors.as_ref());

        let (timeouts_tx, timeouts_rx) = mpsc::unbounded_channel();
        let controllers = PerSystem::<()>::default().map(|system, _| {
            config.system(system).map(|system_config| {
                let mut controller = SystemController::new(
                    system_config,
                    relays.clone(),
                    alarm.clone(),
                    sink.clone(),
                    timeouts_tx.clone(),
                    epoch,
                );
                let door = initial_doors
                    .iter()
                    .find(|(id, _)| *id == system)
                    .map_or(DoorState::Unknown, |(_, state)| *state);
                controller.initialize(door);
                Arc::new(Mutex::new(controller))
            })
        });

        let arbiter = ExclusivityArbiter::new(
            controllers.clone(),
            monitor.clone(),
            sink,
            config.handshake_grace(),
        );

        info!(
            name = %config.name,
            sauna = controllers.sauna.is_some(),
            steam = controllers.steam.is_some(),
            sensors = config.sensors.len(),
            "engine initialized, all relays off"
        );

        Ok(Self {
            core: Arc::new(Core {
                config,
                hardware,
                relays,
                controllers,
                arbiter,
                monitor,
                alarm,
                doors,
                controller_faults: StdMutex::new(FaultLog::new()),
                ambient: StdMutex::new(Ambient::default()),
                epoch,
            }),
            timeouts_rx: StdMutex::new(Some(timeouts_rx)),
            polling: AtomicBool::new(false),
            tasks: StdMutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.core.config
    }

    /// Start timeout delivery and sensor polling.
    pub fn start(&self) -> Result<()> {
        self.start_timeout_dispatch()?;
        self.start_polling()
    }

    /// Deliver session timer expiries to their controllers.
    pub fn start_timeout_dispatch(&self) -> Result<()> {
        let mut rx = lock(&self.timeouts_rx)
            .take()
            .ok_or(EngineError::AlreadyStarted)?;
        let core = self.core.clone();
        let task = tokio::spawn(async move {
            while let Some(expired) = rx.recv().await {
                if let Some(controller) = &core.controllers[expired.system] {
                    controller.lock().await.timeout_fired(expired.generation);
                }
            }
        });
        lock(&self.tasks).push(task);
        Ok(())
    }

    /// Open every sensor channel and spawn one poll task per sensor.
    ///
    /// Failing to open a channel is fatal.
    pub fn start_polling(&self) -> Result<()> {
        if self.polling.swap(true, Ordering::SeqCst) {
            return Err(EngineError::AlreadyStarted);
        }

        let period = self.core.config.temperature_poll_interval();
        let mut handles = Vec::with_capacity(self.core.config.sensors.len());
        for sensor in &self.core.config.sensors {
            let handle = self.core.hardware.sensors.open_channel(sensor.channel)?;
            handles.push((sensor.clone(), handle));
        }

        let mut tasks = lock(&self.tasks);
        for (sensor, handle) in handles {
            let core = self.core.clone();
            let routed = sensor.clone();
            tasks.push(poller::spawn_temperature_poller(
                self.core.hardware.sensors.clone(),
                handle,
                sensor,
                period,
                move |reading| {
                    let core = core.clone();
                    let sensor = routed.clone();
                    async move {
                        core.route_reading(&sensor, reading).await;
                    }
                },
            ));
        }

        if let (Some(climate), Some(port)) = (
            self.core.config.climate_sensor,
            self.core.hardware.climate.clone(),
        ) {
            let core = self.core.clone();
            tasks.push(poller::spawn_climate_poller(
                port,
                climate.address,
                self.core.config.climate_poll_interval(),
                move |result| {
                    let core = core.clone();
                    async move {
                        core.apply_climate(result).await;
                    }
                },
            ));
        }

        info!(
            sensors = self.core.config.sensors.len(),
            period_ms = self.core.config.poll.temperature_interval_ms,
            "sensor polling started"
        );
        Ok(())
    }

    pub async fn request_heat(&self, system: SystemId, target: f32) -> Result<()> {
        self.core.arbiter.request_heat(system, target).await
    }

    /// Returns whether the system was heating.
    pub async fn request_off(&self, system: SystemId) -> Result<bool> {
        let controller = self.core.arbiter.controller(system)?;
        let was_heating = controller.lock().await.request_off();
        Ok(was_heating)
    }

    /// Route a reading by channel, exactly as the poller would.
    pub async fn apply_reading(&self, reading: Reading) -> Result<ReadingOutcome> {
        let sensor = self
            .core
            .config
            .sensors
            .iter()
            .find(|s| s.channel == reading.channel)
            .ok_or(EngineError::UnknownSensor(reading.channel))?;
        Ok(self.core.route_reading(sensor, reading).await)
    }

    pub async fn apply_climate(&self, result: core::result::Result<ClimateSample, ClimateError>) {
        self.core.apply_climate(result).await;
    }

    /// Door input edge. Returns the interpreted state, or `None` for unknown pins.
    pub async fn door_edge(&self, pin: u8, level: bool) -> Option<(SystemId, DoorState)> {
        let (system, state) = self.core.doors.interpret(pin, level)?;
        if let Some(controller) = &self.core.controllers[system] {
            controller.lock().await.door_changed(state);
        }
        Some((system, state))
    }

    pub fn set_light(&self, on: bool) -> Result<()> {
        self.core.set_auxiliary(RelayRole::Light, on)
    }

    pub fn set_fan(&self, on: bool) -> Result<()> {
        self.core.set_auxiliary(RelayRole::Fan, on)
    }

    /// Operator emergency stop: same shutdown path as a controller
    /// over-temperature, but the lockout holds until
    /// [`Engine::reset_emergency_stop`].
    pub async fn emergency_stop(&self) {
        self.core.monitor.trip_manual();
        warn!("emergency stop engaged");
        self.core.global_off(FaultReason::ControllerOverTemperature).await;
    }

    /// Release the emergency-stop latch. An over-temperature trip still in
    /// force keeps the lockout. Returns whether the latch was set.
    pub fn reset_emergency_stop(&self) -> bool {
        let was_set = self.core.monitor.reset_manual();
        if was_set {
            info!(lockout = self.core.monitor.is_tripped(), "emergency stop released");
        }
        was_set
    }

    pub async fn execute(&self, command: Command) -> CommandResponse {
        let id = command.id;
        let result = match command.command_type {
            CommandType::RequestHeat { system, target } => self.request_heat(system, target).await,
            CommandType::RequestOff { system } => self.request_off(system).await.map(|_| ()),
            CommandType::SetLight { on } => self.set_light(on),
            CommandType::SetFan { on } => self.set_fan(on),
            CommandType::EmergencyStop => {
                self.emergency_stop().await;
                Ok(())
            }
            CommandType::ResetEmergencyStop => {
                self.reset_emergency_stop();
                Ok(())
            }
            CommandType::Status => {
                let mut response = CommandResponse::success(id);
                response.engine_status = Some(self.status().await);
                return response;
            }
        };
        match result {
            Ok(()) => CommandResponse::success(id),
            Err(e) => CommandResponse::rejected(id, e.to_string()),
        }
    }

    pub async fn status(&self) -> EngineStatus {
        let core = &self.core;
        let mut systems = Vec::with_capacity(2);
        let mut faults = Vec::new();
        for (system, controller) in core.controllers.iter() {
            if let Some(controller) = controller {
                let controller = controller.lock().await;
                systems.push(controller.status());
                faults.extend(controller.faults().history().iter().map(|record| FaultEntry {
                    source: FaultSource::from(system),
                    record: *record,
                }));
            }
        }
        faults.extend(lock(&core.controller_faults).history().iter().map(|record| FaultEntry {
            source: FaultSource::Controller,
            record: *record,
        }));
        faults.sort_by_key(|entry| entry.record.raised_at_ms);

        let ambient = lock(&core.ambient);
        EngineStatus {
            name: core.config.name.clone(),
            unit: core.config.temperature_unit,
            systems,
            controller_temperature: ambient.controller_temperature,
            controller_lockout: core.monitor.is_tripped(),
            controller_trips: core.monitor.trip_count(),
            light_on: ambient.light_on,
            fan_on: ambient.fan_on,
            humidity_percent: ambient.humidity_percent,
            alarm_sequences: core.alarm.sequences(),
            faults,
        }
    }

    pub fn alarm(&self) -> &AlarmSignaler {
        &self.core.alarm
    }

    pub fn controller_lockout(&self) -> bool {
        self.core.monitor.is_tripped()
    }

    /// Stop every task, switch both systems off and release every line.
    pub async fn shutdown(&self) {
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        self.core.alarm.halt();

        let _quiet = self.core.arbiter.quiesce().await;
        for (_, controller) in self.core.controllers.iter() {
            if let Some(controller) = controller {
                controller.lock().await.request_off();
            }
        }
        if let Err(e) = self.core.relays.all_off() {
            error!(error = %e, "relay release incomplete during shutdown");
        }
        info!("engine stopped, all relays off");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
    }
}

impl Core {
    fn now_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    async fn route_reading(&self, sensor: &SensorConfig, reading: Reading) -> ReadingOutcome {
        let sink = &self.hardware.sink;
        if reading.valid {
            sink.emit(&EngineEvent::Temperature {
                sensor: reading.sensor.clone(),
                channel: reading.channel,
                celsius: reading.temperature_c,
                display: self.config.temperature_unit.convert(reading.temperature_c),
                unit: self.config.temperature_unit,
            });
        } else {
            sink.emit(&EngineEvent::SensorFault {
                sensor: reading.sensor.clone(),
                channel: reading.channel,
            });
        }

        match (sensor.owner, sensor.controls) {
            (SensorOwner::Controller, _) => {
                ReadingOutcome::Controller(self.apply_controller_reading(&reading).await)
            }
            (owner, true) => match owner.system().and_then(|s| self.controllers[s].as_ref()) {
                Some(controller) => {
                    let mut controller = controller.lock().await;
                    ReadingOutcome::System(controller.id(), controller.apply_reading(&reading))
                }
                None => ReadingOutcome::DisplayOnly,
            },
            _ => ReadingOutcome::DisplayOnly,
        }
    }

    async fn apply_controller_reading(&self, reading: &Reading) -> ControllerVerdict {
        let verdict = self.monitor.check(reading);
        lock(&self.ambient).controller_temperature = reading.valid.then_some(reading.temperature_c);

        match verdict {
            ControllerVerdict::OverTemperature => {
                lock(&self.controller_faults)
                    .raise(FaultReason::ControllerOverTemperature, self.now_ms());
                self.global_off(FaultReason::ControllerOverTemperature).await;
            }
            ControllerVerdict::InvalidReading => {
                lock(&self.controller_faults).raise(FaultReason::SensorFault, self.now_ms());
            }
            ControllerVerdict::Nominal => {
                lock(&self.controller_faults).resolve_all(self.now_ms());
            }
        }
        verdict
    }

    /// Drive every relay group off regardless of controller state, then
    /// bring the controllers in line and flash the alarm.
    async fn global_off(&self, reason: FaultReason) {
        // A running flash sequence must not bring the light back.
        self.alarm.set_light_wanted(false);
        if let Err(e) = self.relays.all_off() {
            error!(error = %e, "global off could not release every line");
        }
        {
            let mut ambient = lock(&self.ambient);
            ambient.light_on = false;
            ambient.fan_on = false;
        }
        self.hardware.sink.emit(&EngineEvent::GlobalShutdown { reason });
        error!(%reason, "all relays disabled");

        let _quiet = self.arbiter.quiesce().await;
        for (_, controller) in self.controllers.iter() {
            if let Some(controller) = controller {
                controller.lock().await.force_off(reason);
            }
        }
        self.alarm.trigger(reason);
    }

    async fn apply_climate(&self, result: core::result::Result<ClimateSample, ClimateError>) {
        let sample = match result {
            Ok(sample) => sample,
            Err(e) => {
                self.hardware.sink.emit(&EngineEvent::ClimateFault {
                    message: e.to_string(),
                });
                return;
            }
        };

        lock(&self.ambient).humidity_percent = Some(sample.humidity_percent);
        self.hardware.sink.emit(&EngineEvent::Climate {
            humidity_percent: sample.humidity_percent,
            temperature_c: sample.temperature_c,
            display: self.config.temperature_unit.convert(sample.temperature_c),
        });

        if let Some(steam) = &self.controllers[SystemId::Steam] {
            steam.lock().await.apply_humidity(sample.humidity_percent);
        }
    }

    fn set_auxiliary(&self, role: RelayRole, on: bool) -> Result<()> {
        if !matches!(role, RelayRole::Light | RelayRole::Fan)
            || !self.relays.groups().is_configured(role)
        {
            return Err(EngineError::AuxiliaryNotConfigured(role));
        }
        self.relays
            .set_group(role, on)
            .map_err(|source| EngineError::Relay { role, source })?;
        {
            let mut ambient = lock(&self.ambient);
            match role {
                RelayRole::Light => {
                    ambient.light_on = on;
                    self.alarm.set_light_wanted(on);
                }
                _ => ambient.fan_on = on,
            }
        }
        info!(%role, on, "auxiliary switched");
        self.hardware.sink.emit(&EngineEvent::Auxiliary { role, on });
        Ok(())
    }
}

impl core::fmt::Debug for Engine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Engine")
            .field("name", &self.core.config.name)
            .field("lockout", &self.core.monitor.is_tripped())
            .finish_non_exhaustive()
    }
}
