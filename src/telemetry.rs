use crate::config::SensorName;
use crate::conversion::TemperatureUnit;
use crate::error::FaultReason;
use crate::fault::FaultRecord;
use crate::ports::EventSink;
use crate::subsystems::{DoorState, RelayRole, SystemId, SystemMode};
use core::sync::atomic::{AtomicU64, Ordering};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, trace};

pub const EVENT_BROADCAST_CAPACITY: usize = 256;

/// Snapshot of one system, published on every transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub system: SystemId,
    pub mode: SystemMode,
    /// Last value written to the heater relays.
    pub relay_on: bool,
    pub door: DoorState,
    pub door_suspended: bool,
    pub target_temperature: f32,
    pub current_temperature: Option<f32>,
    pub fault: Option<FaultReason>,
    pub remaining_secs: Option<u64>,
    pub timeouts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultSource {
    Sauna,
    Steam,
    Controller,
}

impl From<SystemId> for FaultSource {
    fn from(system: SystemId) -> Self {
        match system {
            SystemId::Sauna => FaultSource::Sauna,
            SystemId::Steam => FaultSource::Steam,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultEntry {
    pub source: FaultSource,
    #[serde(flatten)]
    pub record: FaultRecord,
}

/// Full engine snapshot returned by `Engine::status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub name: String,
    pub unit: TemperatureUnit,
    pub systems: Vec<SystemStatus>,
    pub controller_temperature: Option<f32>,
    pub controller_lockout: bool,
    /// Controller over-temperature trips since start.
    pub controller_trips: u32,
    pub light_on: bool,
    pub fan_on: bool,
    pub humidity_percent: Option<f32>,
    pub alarm_sequences: u32,
    pub faults: Vec<FaultEntry>,
}

impl EngineStatus {
    pub fn system(&self, system: SystemId) -> Option<&SystemStatus> {
        self.systems.iter().find(|s| s.system == system)
    }
}

/// Everything the engine reports to the bridge layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    Temperature {
        sensor: SensorName,
        channel: u8,
        celsius: f32,
        /// Value in the configured display unit.
        display: f32,
        unit: TemperatureUnit,
    },
    SensorFault {
        sensor: SensorName,
        channel: u8,
    },
    Climate {
        humidity_percent: f32,
        temperature_c: f32,
        display: f32,
    },
    ClimateFault {
        message: String,
    },
    System(SystemStatus),
    Alarm {
        cause: FaultReason,
        flashes: u32,
    },
    GlobalShutdown {
        reason: FaultReason,
    },
    HeatRejected {
        system: SystemId,
        reason: String,
    },
    Auxiliary {
        role: RelayRole,
        on: bool,
    },
}

/// Fans events out to any number of async subscribers.
#[derive(Debug)]
pub struct BroadcastSink {
    tx: broadcast::Sender<EngineEvent>,
    sent: AtomicU64,
    unobserved: AtomicU64,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            sent: AtomicU64::new(0),
            unobserved: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn metrics(&self) -> SinkMetrics {
        SinkMetrics {
            sent: self.sent.load(Ordering::Relaxed),
            unobserved: self.unobserved.load(Ordering::Relaxed),
        }
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(EVENT_BROADCAST_CAPACITY)
    }
}

impl EventSink for BroadcastSink {
    fn emit(&self, event: &EngineEvent) {
        self.sent.fetch_add(1, Ordering::Relaxed);
        if self.tx.send(event.clone()).is_err() {
            self.unobserved.fetch_add(1, Ordering::Relaxed);
            trace!("event dropped, no subscribers");
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkMetrics {
    pub sent: u64,
    /// Events emitted while nobody was subscribed.
    pub unobserved: u64,
}

/// Writes every event to the debug log as JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &EngineEvent) {
        match serde_json::to_string(event) {
            Ok(json) => debug!(target: "saunabus::events", "{json}"),
            Err(e) => debug!(target: "saunabus::events", error = %e, "unserializable event"),
        }
    }
}
