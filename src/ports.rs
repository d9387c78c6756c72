//! Hardware seams.
//!
//! The engine talks to the outside world only through these traits. Real
//! GPIO/ADC/I2C bindings and [`crate::sim::SimulatedHardware`] implement them.

use crate::config::RelayGroups;
use crate::conversion::RawSample;
use crate::error::PortError;
use crate::subsystems::RelayRole;
use crate::telemetry::EngineEvent;
use std::sync::Arc;
use tracing::{debug, error};

/// Opaque handle for an opened ADC channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelHandle(pub u8);

pub trait SensorPort: Send + Sync {
    fn open_channel(&self, channel: u8) -> Result<ChannelHandle, PortError>;
    fn read(&self, handle: ChannelHandle) -> Result<RawSample, PortError>;
}

/// Output lines. Writes are idempotent.
pub trait RelayPort: Send + Sync {
    fn set_line(&self, pin: u8, on: bool) -> Result<(), PortError>;
    /// Physical level of an output line, used to confirm a release.
    fn read_line(&self, pin: u8) -> Result<bool, PortError>;
}

pub trait DoorPort: Send + Sync {
    /// Raw input level before polarity inversion.
    fn read_level(&self, pin: u8) -> Result<bool, PortError>;
}

pub trait ClimatePort: Send + Sync {
    /// One read-registers transaction returning the 8-byte response frame.
    fn read_frame(&self, address: u8) -> Result<[u8; 8], PortError>;
}

/// One-way notification channel towards the bridge layer.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &EngineEvent);
}

/// The set of ports an engine is built from.
#[derive(Clone)]
pub struct Hardware {
    pub sensors: Arc<dyn SensorPort>,
    pub relays: Arc<dyn RelayPort>,
    pub doors: Arc<dyn DoorPort>,
    pub climate: Option<Arc<dyn ClimatePort>>,
    pub sink: Arc<dyn EventSink>,
}

/// Relay port plus the resolved relay groups.
///
/// Every line is written off when the bank is dropped, so relays are
/// released on every exit path including panics and early returns.
pub struct RelayBank {
    port: Arc<dyn RelayPort>,
    groups: RelayGroups,
}

impl RelayBank {
    pub fn new(port: Arc<dyn RelayPort>, groups: RelayGroups) -> Self {
        Self { port, groups }
    }

    pub fn groups(&self) -> &RelayGroups {
        &self.groups
    }

    /// Write every line of a group. All lines are attempted; the first error is returned.
    pub fn set_group(&self, role: RelayRole, on: bool) -> Result<(), PortError> {
        let mut first_error = None;
        for &pin in self.groups.pins(role) {
            if let Err(e) = self.port.set_line(pin, on) {
                error!(%role, pin, on, error = %e, "relay write failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Whether every line of a group reads back off.
    pub fn group_is_off(&self, role: RelayRole) -> Result<bool, PortError> {
        for &pin in self.groups.pins(role) {
            if self.port.read_line(pin)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Drive every configured line off, bypassing all controller state.
    pub fn all_off(&self) -> Result<(), PortError> {
        let mut first_error = None;
        for pin in self.groups.all_pins() {
            if let Err(e) = self.port.set_line(pin, false) {
                error!(pin, error = %e, "failed to release relay line");
                first_error.get_or_insert(e);
            }
        }
        debug!("all relay lines written off");
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for RelayBank {
    fn drop(&mut self) {
        let _ = self.all_off();
    }
}

impl core::fmt::Debug for RelayBank {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RelayBank").field("groups", &self.groups).finish()
    }
}

/// Sink that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &EngineEvent) {}
}
