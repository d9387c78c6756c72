#![allow(dead_code)]

use saunabus::config::EngineConfig;
use saunabus::engine::Engine;
use saunabus::safety::Reading;
use saunabus::sim::SimulatedHardware;
use saunabus::telemetry::{BroadcastSink, EngineEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::TryRecvError};

// Reference installation wiring
pub const SAUNA_CH: u8 = 0;
pub const STEAM_CH: u8 = 1;
pub const PCB_CH: u8 = 2;
pub const BENCH_CH: u8 = 3;
pub const SAUNA_PINS: [u8; 2] = [5, 6];
pub const STEAM_PINS: [u8; 2] = [13, 19];
pub const LIGHT_PIN: u8 = 22;
pub const FAN_PIN: u8 = 23;
pub const SAUNA_DOOR: u8 = 17;
pub const STEAM_DOOR: u8 = 27;

pub struct Rig {
    pub engine: Engine,
    pub sim: Arc<SimulatedHardware>,
    pub sink: Arc<BroadcastSink>,
    pub events: broadcast::Receiver<EngineEvent>,
}

pub fn rig() -> Rig {
    rig_with(EngineConfig::example())
}

pub fn rig_with(config: EngineConfig) -> Rig {
    let sim = SimulatedHardware::new(&config);
    let sink = Arc::new(BroadcastSink::new(1024));
    let events = sink.subscribe();
    let engine = Engine::new(config, sim.hardware(sink.clone())).expect("valid config");
    Rig {
        engine,
        sim,
        sink,
        events,
    }
}

/// A reading for `channel` as the poller would produce it.
pub fn reading(engine: &Engine, channel: u8, celsius: f32) -> Reading {
    let sensor = engine
        .config()
        .sensors
        .iter()
        .find(|s| s.channel == channel)
        .expect("configured channel");
    Reading::new(sensor.name.clone(), channel, celsius)
}

pub fn invalid(engine: &Engine, channel: u8) -> Reading {
    let sensor = engine
        .config()
        .sensors
        .iter()
        .find(|s| s.channel == channel)
        .expect("configured channel");
    Reading::invalid(sensor.name.clone(), channel)
}

pub fn heater_on(sim: &SimulatedHardware, pins: [u8; 2]) -> bool {
    pins.iter().all(|&pin| sim.line(pin))
}

pub fn heater_off(sim: &SimulatedHardware, pins: [u8; 2]) -> bool {
    pins.iter().all(|&pin| !sim.line(pin))
}

/// Let spawned tasks run without moving the clock meaningfully.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Everything published since the last drain.
pub fn drain(events: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut out = Vec::new();
    loop {
        match events.try_recv() {
            Ok(event) => out.push(event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    out
}
