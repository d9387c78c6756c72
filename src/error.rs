use crate::subsystems::{RelayRole, SystemId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a system was forced off outside of a user request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultReason {
    SensorFault,
    MaxTemperature,
    SafetyTemperature,
    HumidityLimit,
    ControllerOverTemperature,
    RelayFault,
}

impl core::fmt::Display for FaultReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let text = match self {
            FaultReason::SensorFault => "sensor fault",
            FaultReason::MaxTemperature => "max temperature exceeded",
            FaultReason::SafetyTemperature => "safety temperature exceeded",
            FaultReason::HumidityLimit => "humidity limit exceeded",
            FaultReason::ControllerOverTemperature => "controller over-temperature",
            FaultReason::RelayFault => "relay fault",
        };
        f.write_str(text)
    }
}

/// Hardware port failures. The engine never retries these synchronously.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortError {
    #[error("bus error: {0}")]
    Bus(String),
    #[error("device disconnected")]
    Disconnected,
    #[error("no such ADC channel {0}")]
    InvalidChannel(u8),
    #[error("no such output line {0}")]
    InvalidLine(u8),
    #[error("port timed out")]
    Timeout,
}

/// Climate sensor frame decoding failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConversionError {
    #[error("unexpected function code {0:#04x}")]
    FunctionCode(u8),
    #[error("unexpected payload length {0}")]
    Length(u8),
    #[error("CRC mismatch: expected {expected:#06x}, got {actual:#06x}")]
    Crc { expected: u16, actual: u16 },
}

/// A failed climate sensor poll. Reported, never acted on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClimateError {
    #[error(transparent)]
    Port(#[from] PortError),
    #[error(transparent)]
    Frame(#[from] ConversionError),
}

/// Startup configuration errors. All of them are fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("no heating system is enabled")]
    NoSystems,
    #[error("{0} has no power pins")]
    MissingPowerPins(SystemId),
    #[error("{0} has no door pin")]
    MissingDoorPin(SystemId),
    #[error("{0} has no control sensor")]
    MissingControlSensor(SystemId),
    #[error("only one control sensor is allowed for {0}")]
    DuplicateControlSensor(SystemId),
    #[error("sensor {sensor} controls {system}, which is not enabled")]
    ControlSensorForDisabledSystem { sensor: String, system: SystemId },
    #[error("line {0} is assigned more than once")]
    DuplicateLine(u8),
    #[error("ADC channel {0} is assigned more than once")]
    DuplicateChannel(u8),
    #[error("{system}: safety temperature {safety} is below max temperature {max}")]
    InvalidThresholds { system: SystemId, max: f32, safety: f32 },
    #[error("{field} must be positive")]
    NonPositive { field: &'static str },
    #[error("sensor {0} has invalid calibration constants")]
    InvalidCalibration(String),
}

/// Runtime failures surfaced to callers of the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Port(#[from] PortError),
    #[error("{0} is not configured")]
    NotConfigured(SystemId),
    #[error("no sensor is configured on channel {0}")]
    UnknownSensor(u8),
    #[error("{0} relay group is not configured")]
    AuxiliaryNotConfigured(RelayRole),
    #[error("target temperature {target} for {system} is outside 0..={max}")]
    InvalidTarget { system: SystemId, target: f32, max: f32 },
    #[error("{system} is latched off ({reason}) until a nominal reading arrives")]
    FaultLatched { system: SystemId, reason: FaultReason },
    #[error("controller over-temperature lockout is active")]
    ControllerLockout,
    #[error("{blocking} did not release its relays within {grace_ms} ms; {requested} heat request rejected")]
    HandshakeTimeout {
        requested: SystemId,
        blocking: SystemId,
        grace_ms: u64,
    },
    #[error("relay write failed for {role}: {source}")]
    Relay {
        role: RelayRole,
        #[source]
        source: PortError,
    },
    #[error("engine already started")]
    AlreadyStarted,
}

pub type Result<T> = core::result::Result<T, EngineError>;
