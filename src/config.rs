//! Engine configuration.
//!
//! Loaded once at startup from JSON and validated before any hardware is
//! touched. Unset per-system values fall back to the defaults of the room
//! they belong to, so a minimal file only has to name pins and sensors.

use crate::conversion::{Calibration, TemperatureUnit};
use crate::error::ConfigError;
use crate::subsystems::{RelayRole, SystemId};
use core::time::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const MAX_PINS_PER_GROUP: usize = 8;
pub const MAX_SENSORS: usize = 8;
pub const SENSOR_NAME_LEN: usize = 24;

pub type PinList = heapless::Vec<u8, MAX_PINS_PER_GROUP>;
pub type SensorName = heapless::String<SENSOR_NAME_LEN>;

const DEFAULT_TIMEOUT_SECS: u64 = 60 * 60;
const DEFAULT_CONTROLLER_SAFETY_C: f32 = 90.0;
const DEFAULT_STEAM_MAX_HUMIDITY: f32 = 60.0;
const DEFAULT_TEMPERATURE_POLL_MS: u64 = 5_000;
const DEFAULT_CLIMATE_POLL_MS: u64 = 10_000;
const DEFAULT_FLASH_COUNT: u32 = 10;
const DEFAULT_TOGGLE_INTERVAL_MS: u64 = 250;
const DEFAULT_HANDSHAKE_GRACE_MS: u64 = 1_000;
const DEFAULT_CLIMATE_ADDRESS: u8 = 0x5C;

/// Who consumes a sensor's readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorOwner {
    Sauna,
    Steam,
    /// Controller board / PCB temperature.
    Controller,
    #[default]
    None,
}

impl SensorOwner {
    pub fn system(self) -> Option<SystemId> {
        match self {
            SensorOwner::Sauna => Some(SystemId::Sauna),
            SensorOwner::Steam => Some(SystemId::Steam),
            SensorOwner::Controller | SensorOwner::None => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorConfig {
    pub name: SensorName,
    pub channel: u8,
    #[serde(default)]
    pub owner: SensorOwner,
    #[serde(default)]
    pub calibration: Calibration,
    /// Whether readings gate the owning system's heater.
    #[serde(default)]
    pub controls: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoorConfig {
    pub pin: u8,
    /// Door reads open on a low level instead of a high one.
    #[serde(default)]
    pub inverted: bool,
    /// Keep heating while the door is open.
    #[serde(default = "default_true")]
    pub open_allowed: bool,
}

fn default_true() -> bool {
    true
}

/// One system as written in the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemSection {
    pub max_temperature: Option<f32>,
    pub safety_temperature: Option<f32>,
    pub timeout_secs: Option<u64>,
    pub max_humidity: Option<f32>,
    pub power_pins: PinList,
    pub door: Option<DoorConfig>,
}

impl SystemSection {
    /// Fill unset values with the room defaults.
    pub fn resolve(&self, system: SystemId) -> SystemConfig {
        let (max, safety, humidity) = match system {
            SystemId::Sauna => (100.0, 120.0, None),
            SystemId::Steam => (60.0, 60.0, Some(DEFAULT_STEAM_MAX_HUMIDITY)),
        };
        SystemConfig {
            system,
            max_temperature: self.max_temperature.unwrap_or(max),
            safety_temperature: self.safety_temperature.unwrap_or(safety),
            timeout: Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            max_humidity: self.max_humidity.or(humidity),
            power_pins: self.power_pins.clone(),
            door: self.door,
        }
    }
}

/// Resolved, immutable per-system settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemConfig {
    pub system: SystemId,
    pub max_temperature: f32,
    pub safety_temperature: f32,
    pub timeout: Duration,
    pub max_humidity: Option<f32>,
    pub power_pins: PinList,
    pub door: Option<DoorConfig>,
}

impl SystemConfig {
    pub fn door_open_allowed(&self) -> bool {
        self.door.map_or(true, |door| door.open_allowed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClimateSensorConfig {
    pub address: u8,
}

impl Default for ClimateSensorConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_CLIMATE_ADDRESS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub temperature_interval_ms: u64,
    pub climate_interval_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            temperature_interval_ms: DEFAULT_TEMPERATURE_POLL_MS,
            climate_interval_ms: DEFAULT_CLIMATE_POLL_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlarmConfig {
    pub flash_count: u32,
    pub toggle_interval_ms: u64,
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            flash_count: DEFAULT_FLASH_COUNT,
            toggle_interval_ms: DEFAULT_TOGGLE_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub name: String,
    pub temperature_unit: TemperatureUnit,
    pub controller_safety_temperature: f32,
    pub sauna: Option<SystemSection>,
    pub steam: Option<SystemSection>,
    pub light_pins: PinList,
    pub fan_pins: PinList,
    pub sensors: heapless::Vec<SensorConfig, MAX_SENSORS>,
    pub climate_sensor: Option<ClimateSensorConfig>,
    pub poll: PollConfig,
    pub alarm: AlarmConfig,
    pub handshake_grace_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: "OpenSauna".into(),
            temperature_unit: TemperatureUnit::Celsius,
            controller_safety_temperature: DEFAULT_CONTROLLER_SAFETY_C,
            sauna: None,
            steam: None,
            light_pins: PinList::new(),
            fan_pins: PinList::new(),
            sensors: heapless::Vec::new(),
            climate_sensor: None,
            poll: PollConfig::default(),
            alarm: AlarmConfig::default(),
            handshake_grace_ms: DEFAULT_HANDSHAKE_GRACE_MS,
        }
    }
}

/// Relay lines per role, resolved once from the configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelayGroups {
    groups: [PinList; 4],
}

impl RelayGroups {
    fn slot(role: RelayRole) -> usize {
        match role {
            RelayRole::Sauna => 0,
            RelayRole::Steam => 1,
            RelayRole::Light => 2,
            RelayRole::Fan => 3,
        }
    }

    pub fn pins(&self, role: RelayRole) -> &[u8] {
        &self.groups[Self::slot(role)]
    }

    pub fn is_configured(&self, role: RelayRole) -> bool {
        !self.pins(role).is_empty()
    }

    pub fn all_pins(&self) -> impl Iterator<Item = u8> + '_ {
        self.groups.iter().flat_map(|group| group.iter().copied())
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Read, parse and validate in one step.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config = Self::from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn section(&self, system: SystemId) -> Option<&SystemSection> {
        match system {
            SystemId::Sauna => self.sauna.as_ref(),
            SystemId::Steam => self.steam.as_ref(),
        }
    }

    pub fn system(&self, system: SystemId) -> Option<SystemConfig> {
        self.section(system).map(|section| section.resolve(system))
    }

    pub fn relay_groups(&self) -> RelayGroups {
        let mut groups = RelayGroups::default();
        for system in SystemId::ALL {
            if let Some(section) = self.section(system) {
                groups.groups[RelayGroups::slot(system.into())] = section.power_pins.clone();
            }
        }
        groups.groups[RelayGroups::slot(RelayRole::Light)] = self.light_pins.clone();
        groups.groups[RelayGroups::slot(RelayRole::Fan)] = self.fan_pins.clone();
        groups
    }

    /// The control sensor of `system`, if exactly one is configured.
    pub fn control_sensor(&self, system: SystemId) -> Option<&SensorConfig> {
        let mut matching = self
            .sensors
            .iter()
            .filter(|s| s.controls && s.owner.system() == Some(system));
        match (matching.next(), matching.next()) {
            (Some(sensor), None) => Some(sensor),
            _ => None,
        }
    }

    pub fn temperature_poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll.temperature_interval_ms)
    }

    pub fn climate_poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll.climate_interval_ms)
    }

    pub fn handshake_grace(&self) -> Duration {
        Duration::from_millis(self.handshake_grace_ms)
    }

    /// Reject any configuration that leaves the safety behaviour ambiguous.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let enabled: heapless::Vec<SystemConfig, 2> = SystemId::ALL
            .iter()
            .filter_map(|&system| self.system(system))
            .collect();
        if enabled.is_empty() {
            return Err(ConfigError::NoSystems);
        }

        positive("controller_safety_temperature", self.controller_safety_temperature)?;
        positive("poll.temperature_interval_ms", self.poll.temperature_interval_ms as f32)?;
        positive("poll.climate_interval_ms", self.poll.climate_interval_ms as f32)?;
        positive("alarm.flash_count", self.alarm.flash_count as f32)?;
        positive("alarm.toggle_interval_ms", self.alarm.toggle_interval_ms as f32)?;
        positive("handshake_grace_ms", self.handshake_grace_ms as f32)?;

        for config in &enabled {
            let system = config.system;
            if config.power_pins.is_empty() {
                return Err(ConfigError::MissingPowerPins(system));
            }
            if config.door.is_none() {
                return Err(ConfigError::MissingDoorPin(system));
            }
            positive("max_temperature", config.max_temperature)?;
            positive("safety_temperature", config.safety_temperature)?;
            positive("timeout_secs", config.timeout.as_secs_f32())?;
            if let Some(humidity) = config.max_humidity {
                positive("max_humidity", humidity)?;
            }
            if config.safety_temperature < config.max_temperature {
                return Err(ConfigError::InvalidThresholds {
                    system,
                    max: config.max_temperature,
                    safety: config.safety_temperature,
                });
            }
        }

        self.validate_sensors(&enabled)?;
        self.validate_lines(&enabled)
    }

    fn validate_sensors(&self, enabled: &[SystemConfig]) -> Result<(), ConfigError> {
        let mut channels = [false; 256];
        for sensor in &self.sensors {
            let seen = &mut channels[usize::from(sensor.channel)];
            if *seen {
                return Err(ConfigError::DuplicateChannel(sensor.channel));
            }
            *seen = true;

            if !sensor.calibration.is_valid() {
                return Err(ConfigError::InvalidCalibration(sensor.name.to_string()));
            }
            if let (true, Some(system)) = (sensor.controls, sensor.owner.system()) {
                if !enabled.iter().any(|c| c.system == system) {
                    return Err(ConfigError::ControlSensorForDisabledSystem {
                        sensor: sensor.name.to_string(),
                        system,
                    });
                }
            }
        }

        for config in enabled {
            let count = self
                .sensors
                .iter()
                .filter(|s| s.controls && s.owner.system() == Some(config.system))
                .count();
            match count {
                0 => return Err(ConfigError::MissingControlSensor(config.system)),
                1 => {}
                _ => return Err(ConfigError::DuplicateControlSensor(config.system)),
            }
        }
        Ok(())
    }

    fn validate_lines(&self, enabled: &[SystemConfig]) -> Result<(), ConfigError> {
        let mut lines = [false; 256];
        let door_pins = enabled.iter().filter_map(|c| c.door.map(|d| d.pin));
        for pin in self.relay_groups().all_pins().chain(door_pins) {
            let seen = &mut lines[usize::from(pin)];
            if *seen {
                return Err(ConfigError::DuplicateLine(pin));
            }
            *seen = true;
        }
        Ok(())
    }

    /// Reference installation used by the simulator and the tests.
    pub fn example() -> Self {
        let sensor = |name: &str, channel: u8, owner: SensorOwner, controls: bool| SensorConfig {
            name: name.try_into().unwrap_or_default(),
            channel,
            owner,
            calibration: Calibration::default(),
            controls,
        };
        let pins = |list: &[u8]| PinList::from_slice(list).unwrap_or_default();

        let mut sensors = heapless::Vec::new();
        for s in [
            sensor("sauna_ntc", 0, SensorOwner::Sauna, true),
            sensor("steam_ntc", 1, SensorOwner::Steam, true),
            sensor("pcb_ntc", 2, SensorOwner::Controller, false),
            sensor("bench_ntc", 3, SensorOwner::Sauna, false),
        ] {
            let _ = sensors.push(s);
        }

        Self {
            sauna: Some(SystemSection {
                power_pins: pins(&[5, 6]),
                door: Some(DoorConfig {
                    pin: 17,
                    inverted: false,
                    open_allowed: false,
                }),
                ..SystemSection::default()
            }),
            steam: Some(SystemSection {
                power_pins: pins(&[13, 19]),
                door: Some(DoorConfig {
                    pin: 27,
                    inverted: true,
                    open_allowed: true,
                }),
                ..SystemSection::default()
            }),
            light_pins: pins(&[22]),
            fan_pins: pins(&[23]),
            sensors,
            climate_sensor: Some(ClimateSensorConfig::default()),
            ..Self::default()
        }
    }
}

fn positive(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NonPositive { field })
    }
}
