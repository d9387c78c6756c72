use super::SystemId;
use crate::config::{DoorConfig, EngineConfig};
use crate::ports::DoorPort;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoorState {
    Open,
    Closed,
    #[default]
    Unknown,
}

impl DoorState {
    /// Apply the configured polarity to a raw input level.
    pub fn from_level(level: bool, inverted: bool) -> Self {
        if level != inverted {
            DoorState::Open
        } else {
            DoorState::Closed
        }
    }

    pub fn is_open(self) -> bool {
        self == DoorState::Open
    }
}

/// Maps door input pins to the system they guard.
#[derive(Debug, Clone, Default)]
pub struct DoorInterlock {
    doors: heapless::Vec<(SystemId, DoorConfig), 2>,
}

impl DoorInterlock {
    pub fn new(config: &EngineConfig) -> Self {
        let mut doors = heapless::Vec::new();
        for system in SystemId::ALL {
            if let Some(door) = config.system(system).and_then(|c| c.door) {
                let _ = doors.push((system, door));
            }
        }
        Self { doors }
    }

    /// Interpret an edge. Pins that guard no system are ignored.
    pub fn interpret(&self, pin: u8, level: bool) -> Option<(SystemId, DoorState)> {
        self.doors
            .iter()
            .find(|(_, door)| door.pin == pin)
            .map(|(system, door)| (*system, DoorState::from_level(level, door.inverted)))
    }

    pub fn door(&self, system: SystemId) -> Option<&DoorConfig> {
        self.doors
            .iter()
            .find(|(id, _)| *id == system)
            .map(|(_, door)| door)
    }

    /// Sample every door once. Unreadable doors report `Unknown`.
    pub fn read_all(&self, port: &dyn DoorPort) -> heapless::Vec<(SystemId, DoorState), 2> {
        let mut states = heapless::Vec::new();
        for (system, door) in &self.doors {
            let state = match port.read_level(door.pin) {
                Ok(level) => DoorState::from_level(level, door.inverted),
                Err(e) => {
                    warn!(%system, pin = door.pin, error = %e, "door sensor unreadable");
                    DoorState::Unknown
                }
            };
            let _ = states.push((*system, state));
        }
        states
    }
}
