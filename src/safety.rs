use crate::config::SensorName;
use crate::subsystems::SystemId;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// One converted sample from a temperature probe. Consumed immediately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub sensor: SensorName,
    pub channel: u8,
    pub temperature_c: f32,
    pub valid: bool,
}

impl Reading {
    pub fn new(sensor: SensorName, channel: u8, temperature_c: f32) -> Self {
        Self {
            sensor,
            channel,
            valid: crate::conversion::is_plausible(temperature_c),
            temperature_c,
        }
    }

    pub fn invalid(sensor: SensorName, channel: u8) -> Self {
        Self {
            sensor,
            channel,
            temperature_c: f32::NAN,
            valid: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyVerdict {
    Nominal,
    MaxExceeded,
    SafetyExceeded,
    InvalidReading,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub max_temperature: f32,
    pub safety_temperature: f32,
}

/// Classify a reading. The safety limit is checked before the max limit and
/// both comparisons are inclusive.
pub fn evaluate(reading: &Reading, limits: Thresholds) -> SafetyVerdict {
    if !reading.valid || reading.temperature_c.is_nan() {
        SafetyVerdict::InvalidReading
    } else if reading.temperature_c >= limits.safety_temperature {
        SafetyVerdict::SafetyExceeded
    } else if reading.temperature_c >= limits.max_temperature {
        SafetyVerdict::MaxExceeded
    } else {
        SafetyVerdict::Nominal
    }
}

/// Emit the log line matching a verdict's severity.
pub fn log_verdict(system: SystemId, verdict: SafetyVerdict, reading: &Reading, limits: Thresholds) {
    match verdict {
        SafetyVerdict::Nominal => {}
        SafetyVerdict::MaxExceeded => warn!(
            %system,
            sensor = %reading.sensor,
            temperature = reading.temperature_c,
            max = limits.max_temperature,
            "max temperature exceeded, heater off"
        ),
        SafetyVerdict::SafetyExceeded => error!(
            %system,
            sensor = %reading.sensor,
            temperature = reading.temperature_c,
            safety = limits.safety_temperature,
            "safety temperature exceeded, heater off"
        ),
        SafetyVerdict::InvalidReading => error!(
            %system,
            sensor = %reading.sensor,
            channel = reading.channel,
            "invalid sensor reading, heater off"
        ),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerVerdict {
    Nominal,
    OverTemperature,
    InvalidReading,
}

/// Watches the controller board temperature and holds the global lockout.
///
/// The monitor only decides; the engine carries out the global off. A
/// temperature trip clears on the next nominal reading, a manual trip only
/// through [`ControllerSafetyMonitor::reset_manual`].
#[derive(Debug)]
pub struct ControllerSafetyMonitor {
    safety_temperature: f32,
    tripped: AtomicBool,
    manual: AtomicBool,
    trips: AtomicU32,
}

impl ControllerSafetyMonitor {
    pub fn new(safety_temperature: f32) -> Self {
        debug_assert!(safety_temperature > 0.0);
        Self {
            safety_temperature,
            tripped: AtomicBool::new(false),
            manual: AtomicBool::new(false),
            trips: AtomicU32::new(0),
        }
    }

    pub fn safety_temperature(&self) -> f32 {
        self.safety_temperature
    }

    /// Classify a controller reading and update the lockout.
    ///
    /// An invalid reading neither trips nor clears the lockout.
    pub fn check(&self, reading: &Reading) -> ControllerVerdict {
        if !reading.valid || reading.temperature_c.is_nan() {
            warn!(sensor = %reading.sensor, "controller temperature unavailable");
            return ControllerVerdict::InvalidReading;
        }

        if reading.temperature_c >= self.safety_temperature {
            self.trip();
            error!(
                sensor = %reading.sensor,
                temperature = reading.temperature_c,
                limit = self.safety_temperature,
                "controller over-temperature, disabling all relays"
            );
            ControllerVerdict::OverTemperature
        } else {
            if self.tripped.swap(false, Ordering::SeqCst) {
                info!(
                    temperature = reading.temperature_c,
                    "controller temperature nominal, lockout cleared"
                );
            }
            ControllerVerdict::Nominal
        }
    }

    fn trip(&self) {
        self.tripped.store(true, Ordering::SeqCst);
        self.trips.fetch_add(1, Ordering::Relaxed);
    }

    /// Latch the lockout from an operator emergency stop.
    pub fn trip_manual(&self) {
        self.manual.store(true, Ordering::SeqCst);
    }

    /// Returns whether the manual latch was set.
    pub fn reset_manual(&self) -> bool {
        self.manual.swap(false, Ordering::SeqCst)
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst) || self.manual.load(Ordering::SeqCst)
    }

    pub fn trip_count(&self) -> u32 {
        self.trips.load(Ordering::Relaxed)
    }
}
