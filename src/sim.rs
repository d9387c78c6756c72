//! Simulated installation.
//!
//! Implements every hardware port in memory: a first-order thermal model per
//! room driven by the heater relay lines, a climate sensor in the steam room,
//! door inputs and a log of every output write. Faults can be injected per
//! channel or line.

use crate::config::{EngineConfig, SensorOwner};
use crate::conversion::{celsius_to_sample, encode_climate_frame, Calibration, ClimateSample, RawSample};
use crate::error::PortError;
use crate::ports::{ChannelHandle, ClimatePort, DoorPort, EventSink, Hardware, RelayPort, SensorPort};
use crate::subsystems::{PerSystem, SystemId};
use heapless::HistoryBuffer;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;

const AMBIENT_C: f32 = 22.0;
const CONTROLLER_IDLE_C: f32 = 38.0;
const AMBIENT_HUMIDITY: f32 = 35.0;

/// Most recent output writes kept for inspection.
pub const WRITE_LOG_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy)]
struct RoomModel {
    heater_power_w: f32,
    thermal_mass_j_per_k: f32,
    loss_w_per_k: f32,
}

const SAUNA_MODEL: RoomModel = RoomModel {
    heater_power_w: 9_000.0,
    thermal_mass_j_per_k: 400_000.0,
    loss_w_per_k: 60.0,
};

const STEAM_MODEL: RoomModel = RoomModel {
    heater_power_w: 6_000.0,
    thermal_mass_j_per_k: 300_000.0,
    loss_w_per_k: 80.0,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineWrite {
    pub pin: u8,
    pub on: bool,
    /// Whether the write changed the physical level.
    pub changed: bool,
    pub at: Instant,
}

#[derive(Debug)]
struct SimState {
    rooms: PerSystem<f32>,
    controller_c: f32,
    humidity: f32,
    overrides: HashMap<u8, f32>,
    disconnected: HashSet<u8>,
    bus_faults: HashSet<u8>,
    opened: HashSet<u8>,
    lines: HashMap<u8, bool>,
    failing_lines: HashSet<u8>,
    stuck_lines: HashMap<u8, bool>,
    door_levels: HashMap<u8, bool>,
    climate_failing: bool,
    climate_corrupt: bool,
    writes: HistoryBuffer<LineWrite, WRITE_LOG_CAPACITY>,
    total_writes: usize,
}

#[derive(Debug)]
pub struct SimulatedHardware {
    channels: HashMap<u8, (SensorOwner, Calibration)>,
    heater_pins: PerSystem<Vec<u8>>,
    climate_address: Option<u8>,
    state: Mutex<SimState>,
}

impl SimulatedHardware {
    pub fn new(config: &EngineConfig) -> Arc<Self> {
        let channels = config
            .sensors
            .iter()
            .map(|s| (s.channel, (s.owner, s.calibration)))
            .collect();
        let groups = config.relay_groups();
        let heater_pins = PerSystem::new(
            groups.pins(SystemId::Sauna.into()).to_vec(),
            groups.pins(SystemId::Steam.into()).to_vec(),
        );
        // Every door starts closed.
        let door_levels = SystemId::ALL
            .iter()
            .filter_map(|&system| config.system(system).and_then(|c| c.door))
            .map(|door| (door.pin, door.inverted))
            .collect();

        Arc::new(Self {
            channels,
            heater_pins,
            climate_address: config.climate_sensor.map(|c| c.address),
            state: Mutex::new(SimState {
                rooms: PerSystem::new(AMBIENT_C, AMBIENT_C),
                controller_c: CONTROLLER_IDLE_C,
                humidity: AMBIENT_HUMIDITY,
                overrides: HashMap::new(),
                disconnected: HashSet::new(),
                bus_faults: HashSet::new(),
                opened: HashSet::new(),
                lines: HashMap::new(),
                failing_lines: HashSet::new(),
                stuck_lines: HashMap::new(),
                door_levels,
                climate_failing: false,
                climate_corrupt: false,
                writes: HistoryBuffer::new(),
                total_writes: 0,
            }),
        })
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bundle the simulator as the engine's hardware.
    pub fn hardware(self: &Arc<Self>, sink: Arc<dyn EventSink>) -> Hardware {
        Hardware {
            sensors: self.clone(),
            relays: self.clone(),
            doors: self.clone(),
            climate: self.climate_address.map(|_| self.clone() as Arc<dyn ClimatePort>),
            sink,
        }
    }

    /// Advance the thermal model by `dt_secs`.
    pub fn step(&self, dt_secs: f32) {
        let mut state = self.state();
        for system in SystemId::ALL {
            let model = match system {
                SystemId::Sauna => SAUNA_MODEL,
                SystemId::Steam => STEAM_MODEL,
            };
            let heating = self.heater_pins[system]
                .iter()
                .any(|pin| state.lines.get(pin).copied().unwrap_or(false));
            let temperature = state.rooms[system];
            let input_w = if heating { model.heater_power_w } else { 0.0 };
            let loss_w = (temperature - AMBIENT_C) * model.loss_w_per_k;
            state.rooms[system] =
                temperature + (input_w - loss_w) * dt_secs / model.thermal_mass_j_per_k;

            if system == SystemId::Steam {
                let drift = if heating { 0.4 } else { -0.1 };
                state.humidity = (state.humidity + drift * dt_secs).clamp(AMBIENT_HUMIDITY, 100.0);
            }
        }
    }

    pub fn room_temperature(&self, system: SystemId) -> f32 {
        self.state().rooms[system]
    }

    /// Set what a channel reads. Room probes move the whole room.
    pub fn set_temperature(&self, channel: u8, celsius: f32) {
        let owner = self.channels.get(&channel).map(|(owner, _)| *owner);
        let mut state = self.state();
        match owner {
            Some(SensorOwner::Sauna) => state.rooms.sauna = celsius,
            Some(SensorOwner::Steam) => state.rooms.steam = celsius,
            Some(SensorOwner::Controller) => state.controller_c = celsius,
            Some(SensorOwner::None) | None => {
                state.overrides.insert(channel, celsius);
            }
        }
    }

    pub fn set_humidity(&self, percent: f32) {
        self.state().humidity = percent;
    }

    /// Open-circuit probe: the divider reads at the rail.
    pub fn disconnect_sensor(&self, channel: u8) {
        self.state().disconnected.insert(channel);
    }

    pub fn reconnect_sensor(&self, channel: u8) {
        let mut state = self.state();
        state.disconnected.remove(&channel);
        state.bus_faults.remove(&channel);
    }

    /// ADC transaction errors on a channel.
    pub fn fail_sensor_bus(&self, channel: u8) {
        self.state().bus_faults.insert(channel);
    }

    /// Writes to `pin` fail.
    pub fn fail_line(&self, pin: u8) {
        self.state().failing_lines.insert(pin);
    }

    pub fn repair_line(&self, pin: u8) {
        self.state().failing_lines.remove(&pin);
    }

    /// Writes to `pin` are accepted but the contact stays at `level`.
    pub fn stick_line(&self, pin: u8, level: bool) {
        let mut state = self.state();
        state.stuck_lines.insert(pin, level);
        state.lines.insert(pin, level);
    }

    pub fn release_line(&self, pin: u8) {
        self.state().stuck_lines.remove(&pin);
    }

    /// Force a line level without logging a write.
    pub fn set_line_level(&self, pin: u8, on: bool) {
        self.state().lines.insert(pin, on);
    }

    pub fn line(&self, pin: u8) -> bool {
        self.state().lines.get(&pin).copied().unwrap_or(false)
    }

    pub fn set_door_level(&self, pin: u8, level: bool) {
        self.state().door_levels.insert(pin, level);
    }

    pub fn fail_climate(&self, failing: bool) {
        self.state().climate_failing = failing;
    }

    pub fn corrupt_climate(&self, corrupt: bool) {
        self.state().climate_corrupt = corrupt;
    }

    /// Retained writes, oldest first.
    pub fn writes(&self) -> Vec<LineWrite> {
        self.state().writes.oldest_ordered().copied().collect()
    }

    /// Every write since start, including those no longer retained.
    pub fn write_count(&self) -> usize {
        self.state().total_writes
    }

    /// Off-to-on transitions caused by retained writes to `pin`.
    pub fn rising_edges(&self, pin: u8) -> usize {
        self.state()
            .writes
            .oldest_ordered()
            .filter(|w| w.pin == pin && w.on && w.changed)
            .count()
    }

    pub fn any_heater_on(&self, system: SystemId) -> bool {
        let state = self.state();
        self.heater_pins[system]
            .iter()
            .any(|pin| state.lines.get(pin).copied().unwrap_or(false))
    }
}

impl SensorPort for SimulatedHardware {
    fn open_channel(&self, channel: u8) -> Result<ChannelHandle, PortError> {
        if !self.channels.contains_key(&channel) {
            return Err(PortError::InvalidChannel(channel));
        }
        self.state().opened.insert(channel);
        Ok(ChannelHandle(channel))
    }

    fn read(&self, handle: ChannelHandle) -> Result<RawSample, PortError> {
        let channel = handle.0;
        let (owner, calibration) = self
            .channels
            .get(&channel)
            .copied()
            .ok_or(PortError::InvalidChannel(channel))?;
        let state = self.state();
        if !state.opened.contains(&channel) {
            return Err(PortError::InvalidChannel(channel));
        }
        if state.bus_faults.contains(&channel) {
            return Err(PortError::Bus(format!("ADC channel {channel} not responding")));
        }
        if state.disconnected.contains(&channel) {
            return Ok(RawSample(1.0));
        }

        let celsius = match (state.overrides.get(&channel), owner) {
            (Some(&value), _) => value,
            (None, SensorOwner::Sauna) => state.rooms.sauna,
            (None, SensorOwner::Steam) => state.rooms.steam,
            (None, SensorOwner::Controller) => state.controller_c,
            (None, SensorOwner::None) => AMBIENT_C,
        };
        Ok(celsius_to_sample(celsius, &calibration))
    }
}

impl RelayPort for SimulatedHardware {
    fn set_line(&self, pin: u8, on: bool) -> Result<(), PortError> {
        let mut state = self.state();
        if state.failing_lines.contains(&pin) {
            return Err(PortError::Bus(format!("line {pin} write failed")));
        }
        let level = state.stuck_lines.get(&pin).copied().unwrap_or(on);
        let previous = state.lines.insert(pin, level).unwrap_or(false);
        state.writes.write(LineWrite {
            pin,
            on,
            changed: previous != level,
            at: Instant::now(),
        });
        state.total_writes += 1;
        Ok(())
    }

    fn read_line(&self, pin: u8) -> Result<bool, PortError> {
        Ok(self.line(pin))
    }
}

impl DoorPort for SimulatedHardware {
    fn read_level(&self, pin: u8) -> Result<bool, PortError> {
        Ok(self.state().door_levels.get(&pin).copied().unwrap_or(false))
    }
}

impl ClimatePort for SimulatedHardware {
    fn read_frame(&self, address: u8) -> Result<[u8; 8], PortError> {
        let state = self.state();
        if state.climate_failing || Some(address) != self.climate_address {
            return Err(PortError::Timeout);
        }
        let mut frame = encode_climate_frame(&ClimateSample {
            humidity_percent: state.humidity,
            temperature_c: state.rooms.steam,
        });
        if state.climate_corrupt {
            frame[2] ^= 0x10;
        }
        Ok(frame)
    }
}
