pub mod controller;
pub mod door;

pub use controller::SystemController;
pub use door::{DoorInterlock, DoorState};

use core::fmt;
use core::ops::{Index, IndexMut};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// The heated rooms that compete for the shared heater capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemId {
    Sauna,
    Steam,
}

impl SystemId {
    pub const ALL: [SystemId; 2] = [SystemId::Sauna, SystemId::Steam];

    /// The system this one must never heat alongside.
    pub fn other(self) -> SystemId {
        match self {
            SystemId::Sauna => SystemId::Steam,
            SystemId::Steam => SystemId::Sauna,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SystemId::Sauna => "sauna",
            SystemId::Steam => "steam",
        }
    }
}

impl fmt::Display for SystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owner of a relay group. Light and fan are auxiliaries with no heating logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayRole {
    Sauna,
    Steam,
    Light,
    Fan,
}

impl RelayRole {
    pub const ALL: [RelayRole; 4] = [
        RelayRole::Sauna,
        RelayRole::Steam,
        RelayRole::Light,
        RelayRole::Fan,
    ];
}

impl From<SystemId> for RelayRole {
    fn from(system: SystemId) -> Self {
        match system {
            SystemId::Sauna => RelayRole::Sauna,
            SystemId::Steam => RelayRole::Steam,
        }
    }
}

impl fmt::Display for RelayRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RelayRole::Sauna => "sauna",
            RelayRole::Steam => "steam",
            RelayRole::Light => "light",
            RelayRole::Fan => "fan",
        };
        f.write_str(name)
    }
}

/// One value per heated system, indexed by [`SystemId`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerSystem<T> {
    pub sauna: T,
    pub steam: T,
}

impl<T> PerSystem<T> {
    pub fn new(sauna: T, steam: T) -> Self {
        Self { sauna, steam }
    }

    pub fn iter(&self) -> impl Iterator<Item = (SystemId, &T)> {
        [(SystemId::Sauna, &self.sauna), (SystemId::Steam, &self.steam)].into_iter()
    }

    pub fn map<U>(&self, mut f: impl FnMut(SystemId, &T) -> U) -> PerSystem<U> {
        PerSystem {
            sauna: f(SystemId::Sauna, &self.sauna),
            steam: f(SystemId::Steam, &self.steam),
        }
    }
}

impl<T> Index<SystemId> for PerSystem<T> {
    type Output = T;

    fn index(&self, system: SystemId) -> &T {
        match system {
            SystemId::Sauna => &self.sauna,
            SystemId::Steam => &self.steam,
        }
    }
}

impl<T> IndexMut<SystemId> for PerSystem<T> {
    fn index_mut(&mut self, system: SystemId) -> &mut T {
        match system {
            SystemId::Sauna => &mut self.sauna,
            SystemId::Steam => &mut self.steam,
        }
    }
}

/// Logical heating mode. The relay may still be off while `Heating`
/// (door suspension, thermostat satisfied).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemMode {
    Off,
    Heating,
}

/// Mutable state of one system. Only its [`SystemController`] writes it.
#[derive(Debug, Clone)]
pub struct SystemState {
    pub mode: SystemMode,
    pub door_suspended: bool,
    pub target_temperature: f32,
    pub timeout_deadline: Option<Instant>,
}

impl SystemState {
    pub fn new() -> Self {
        Self {
            mode: SystemMode::Off,
            door_suspended: false,
            target_temperature: 0.0,
            timeout_deadline: None,
        }
    }

    /// Relay output allowed by mode and door interlock alone.
    pub fn output_permitted(&self) -> bool {
        self.mode == SystemMode::Heating && !self.door_suspended
    }
}

impl Default for SystemState {
    fn default() -> Self {
        Self::new()
    }
}
