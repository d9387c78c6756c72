mod common;

use common::*;
use saunabus::engine::ReadingOutcome;
use saunabus::error::{EngineError, FaultReason};
use saunabus::protocol::parse_command;
use saunabus::safety::{ControllerVerdict, SafetyVerdict};
use saunabus::telemetry::{EngineEvent, FaultSource};
use saunabus::*;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_safety_temperature_forces_off_and_flashes() {
    let mut rig = rig();
    let engine = &rig.engine;

    engine.request_heat(SystemId::Sauna, 80.0).await.unwrap();
    engine.apply_reading(reading(engine, SAUNA_CH, 60.0)).await.unwrap();
    assert!(heater_on(&rig.sim, SAUNA_PINS));
    drain(&mut rig.events);

    let outcome = engine.apply_reading(reading(engine, SAUNA_CH, 130.0)).await.unwrap();
    assert_eq!(
        outcome,
        ReadingOutcome::System(SystemId::Sauna, SafetyVerdict::SafetyExceeded)
    );
    assert!(heater_off(&rig.sim, SAUNA_PINS));

    let status = engine.status().await;
    let sauna = status.system(SystemId::Sauna).unwrap();
    assert_eq!(sauna.mode, SystemMode::Off);
    assert_eq!(sauna.fault, Some(FaultReason::SafetyTemperature));

    // 10 flashes at 250 ms on / 250 ms off
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(rig.sim.rising_edges(LIGHT_PIN), 10);
    assert_eq!(engine.alarm().flashes(), 10);
    assert_eq!(engine.alarm().sequences(), 1);
    assert!(!rig.sim.line(LIGHT_PIN));

    let events = drain(&mut rig.events);
    assert!(events.iter().any(|e| matches!(
        e,
        EngineEvent::Alarm {
            cause: FaultReason::SafetyTemperature,
            flashes: 10
        }
    )));
}

#[tokio::test(start_paused = true)]
async fn test_alarm_fires_once_per_triggering_reading() {
    let rig = rig();
    let engine = &rig.engine;

    engine.request_heat(SystemId::Sauna, 80.0).await.unwrap();
    engine.apply_reading(reading(engine, SAUNA_CH, 60.0)).await.unwrap();

    // The cutoff is inclusive
    for (i, celsius) in [120.0, 125.0, 140.0].into_iter().enumerate() {
        engine.apply_reading(reading(engine, SAUNA_CH, celsius)).await.unwrap();
        assert!(heater_off(&rig.sim, SAUNA_PINS));
        assert_eq!(engine.alarm().sequences(), i as u32 + 1);
        settle().await;
    }

    // One sequence runs, one waits, the third request joins the waiting one
    tokio::time::sleep(Duration::from_secs(16)).await;
    assert_eq!(engine.alarm().flashes(), 20);
    assert_eq!(rig.sim.rising_edges(LIGHT_PIN), 20);
    assert_eq!(rig.sim.rising_edges(SAUNA_PINS[0]), 1);
}

#[tokio::test(start_paused = true)]
async fn test_sustained_overheat_does_not_build_an_alarm_backlog() {
    let rig = rig();
    let engine = &rig.engine;

    engine.request_heat(SystemId::Sauna, 80.0).await.unwrap();
    for _ in 0..24 {
        engine.apply_reading(reading(engine, SAUNA_CH, 125.0)).await.unwrap();
        engine.apply_reading(reading(engine, PCB_CH, 95.0)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
    assert_eq!(engine.alarm().sequences(), 48);

    engine.apply_reading(reading(engine, PCB_CH, 60.0)).await.unwrap();
    engine.apply_reading(reading(engine, SAUNA_CH, 50.0)).await.unwrap();
    let flashed = engine.alarm().flashes();

    // Only what was running or waiting at recovery still flashes
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(engine.alarm().flashes() - flashed <= 20);
    assert!(!rig.sim.line(LIGHT_PIN));
    assert_eq!(engine.status().await.controller_trips, 24);
}

#[tokio::test(start_paused = true)]
async fn test_steam_equal_limits_report_safety() {
    let rig = rig();
    let engine = &rig.engine;

    engine.request_heat(SystemId::Steam, 45.0).await.unwrap();
    engine.apply_reading(reading(engine, STEAM_CH, 40.0)).await.unwrap();
    assert!(heater_on(&rig.sim, STEAM_PINS));

    let outcome = engine.apply_reading(reading(engine, STEAM_CH, 60.0)).await.unwrap();
    assert_eq!(
        outcome,
        ReadingOutcome::System(SystemId::Steam, SafetyVerdict::SafetyExceeded)
    );
    assert!(heater_off(&rig.sim, STEAM_PINS));
}

#[tokio::test(start_paused = true)]
async fn test_max_temperature_latches_until_nominal() {
    let rig = rig();
    let engine = &rig.engine;

    engine.request_heat(SystemId::Sauna, 98.0).await.unwrap();
    engine.apply_reading(reading(engine, SAUNA_CH, 90.0)).await.unwrap();
    assert!(heater_on(&rig.sim, SAUNA_PINS));

    let outcome = engine.apply_reading(reading(engine, SAUNA_CH, 105.0)).await.unwrap();
    assert_eq!(
        outcome,
        ReadingOutcome::System(SystemId::Sauna, SafetyVerdict::MaxExceeded)
    );
    assert!(heater_off(&rig.sim, SAUNA_PINS));
    assert_eq!(engine.alarm().sequences(), 1);

    let err = engine.request_heat(SystemId::Sauna, 98.0).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::FaultLatched {
            system: SystemId::Sauna,
            reason: FaultReason::MaxTemperature
        }
    ));

    // Cooling below max clears the latch but does not resume heating
    engine.apply_reading(reading(engine, SAUNA_CH, 95.0)).await.unwrap();
    assert!(heater_off(&rig.sim, SAUNA_PINS));
    let status = engine.status().await;
    let sauna = status.system(SystemId::Sauna).unwrap();
    assert_eq!(sauna.fault, None);
    assert_eq!(sauna.mode, SystemMode::Off);

    engine.request_heat(SystemId::Sauna, 98.0).await.unwrap();
    assert!(heater_on(&rig.sim, SAUNA_PINS));

    // The fault history keeps the resolved record
    let status = engine.status().await;
    let record = status
        .faults
        .iter()
        .find(|f| f.record.reason == FaultReason::MaxTemperature)
        .unwrap();
    assert_eq!(record.source, FaultSource::Sauna);
    assert!(record.record.resolved_at_ms.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_light_is_restored_after_alarm() {
    let rig = rig();
    let engine = &rig.engine;

    engine.set_light(true).unwrap();
    engine.request_heat(SystemId::Sauna, 80.0).await.unwrap();
    engine.apply_reading(reading(engine, SAUNA_CH, 125.0)).await.unwrap();

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(engine.alarm().flashes(), 10);
    assert!(rig.sim.line(LIGHT_PIN));
}

#[tokio::test(start_paused = true)]
async fn test_global_off_keeps_light_off_after_running_alarm() {
    let rig = rig();
    let engine = &rig.engine;

    engine.set_light(true).unwrap();
    engine.request_heat(SystemId::Sauna, 80.0).await.unwrap();
    engine.apply_reading(reading(engine, SAUNA_CH, 105.0)).await.unwrap();
    settle().await;

    // Global off lands in the middle of the first sequence
    tokio::time::sleep(Duration::from_millis(600)).await;
    engine.apply_reading(reading(engine, PCB_CH, 95.0)).await.unwrap();
    assert!(!rig.sim.line(LIGHT_PIN));

    tokio::time::sleep(Duration::from_secs(12)).await;
    assert_eq!(engine.alarm().flashes(), 20);
    assert!(!rig.sim.line(LIGHT_PIN));
    assert!(!engine.status().await.light_on);

    // Switching the light back on is honoured by later alarms
    engine.apply_reading(reading(engine, PCB_CH, 60.0)).await.unwrap();
    engine.set_light(true).unwrap();
    engine.apply_reading(reading(engine, SAUNA_CH, 125.0)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(rig.sim.line(LIGHT_PIN));
}

#[tokio::test(start_paused = true)]
async fn test_controller_over_temperature_disables_everything() {
    let mut rig = rig();
    let engine = &rig.engine;

    engine.set_light(true).unwrap();
    engine.set_fan(true).unwrap();
    engine.request_heat(SystemId::Sauna, 80.0).await.unwrap();
    engine.apply_reading(reading(engine, SAUNA_CH, 60.0)).await.unwrap();
    assert!(heater_on(&rig.sim, SAUNA_PINS));
    drain(&mut rig.events);

    let outcome = engine.apply_reading(reading(engine, PCB_CH, 92.0)).await.unwrap();
    assert_eq!(outcome, ReadingOutcome::Controller(ControllerVerdict::OverTemperature));

    for pin in SAUNA_PINS.into_iter().chain(STEAM_PINS).chain([LIGHT_PIN, FAN_PIN]) {
        assert!(!rig.sim.line(pin), "line {pin} still on");
    }
    assert!(engine.controller_lockout());

    let status = engine.status().await;
    assert!(status.controller_lockout);
    assert!(!status.light_on);
    assert!(!status.fan_on);
    assert_eq!(status.controller_temperature, Some(92.0));
    assert!(status.systems.iter().all(|s| s.mode == SystemMode::Off));
    assert_eq!(status.alarm_sequences, 1);
    assert_eq!(status.controller_trips, 1);

    let events = drain(&mut rig.events);
    assert!(events.iter().any(|e| matches!(
        e,
        EngineEvent::GlobalShutdown {
            reason: FaultReason::ControllerOverTemperature
        }
    )));

    // Heat requests are refused while the lockout holds
    for system in SystemId::ALL {
        let err = engine.request_heat(system, 40.0).await.unwrap_err();
        assert!(matches!(err, EngineError::ControllerLockout));
    }

    // The alarm leaves the light off since global off cleared it
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(!rig.sim.line(LIGHT_PIN));

    // A nominal controller reading clears the lockout; heat must be re-requested
    let outcome = engine.apply_reading(reading(engine, PCB_CH, 60.0)).await.unwrap();
    assert_eq!(outcome, ReadingOutcome::Controller(ControllerVerdict::Nominal));
    assert!(!engine.controller_lockout());
    assert!(heater_off(&rig.sim, SAUNA_PINS));

    engine.request_heat(SystemId::Sauna, 80.0).await.unwrap();
    assert!(heater_on(&rig.sim, SAUNA_PINS));
}

#[tokio::test(start_paused = true)]
async fn test_controller_invalid_reading_keeps_systems_running() {
    let rig = rig();
    let engine = &rig.engine;

    engine.request_heat(SystemId::Sauna, 80.0).await.unwrap();
    engine.apply_reading(reading(engine, SAUNA_CH, 60.0)).await.unwrap();

    let outcome = engine.apply_reading(invalid(engine, PCB_CH)).await.unwrap();
    assert_eq!(outcome, ReadingOutcome::Controller(ControllerVerdict::InvalidReading));
    assert!(heater_on(&rig.sim, SAUNA_PINS));
    assert!(!engine.controller_lockout());

    let status = engine.status().await;
    assert_eq!(status.controller_temperature, None);
    assert!(status.faults.iter().any(|f| {
        f.source == FaultSource::Controller && f.record.reason == FaultReason::SensorFault
    }));
}

#[tokio::test(start_paused = true)]
async fn test_emergency_stop_locks_out() {
    let rig = rig();
    let engine = &rig.engine;

    engine.request_heat(SystemId::Steam, 45.0).await.unwrap();
    engine.apply_reading(reading(engine, STEAM_CH, 30.0)).await.unwrap();
    assert!(heater_on(&rig.sim, STEAM_PINS));

    engine.emergency_stop().await;
    assert!(heater_off(&rig.sim, STEAM_PINS));
    assert!(engine.controller_lockout());
    assert!(engine.request_heat(SystemId::Steam, 45.0).await.is_err());

    // A cool controller does not release a manual stop
    engine.apply_reading(reading(engine, PCB_CH, 40.0)).await.unwrap();
    assert!(engine.controller_lockout());
    assert!(matches!(
        engine.request_heat(SystemId::Steam, 45.0).await,
        Err(EngineError::ControllerLockout)
    ));

    assert!(engine.reset_emergency_stop());
    assert!(!engine.controller_lockout());
    assert!(!engine.reset_emergency_stop());
    engine.request_heat(SystemId::Steam, 45.0).await.unwrap();
    assert!(heater_on(&rig.sim, STEAM_PINS));
    assert_eq!(engine.status().await.controller_trips, 0);
}

#[tokio::test(start_paused = true)]
async fn test_emergency_stop_over_the_command_protocol() {
    let rig = rig();
    let engine = &rig.engine;

    let response = engine.execute(parse_command(r#"{"id": 1, "type": "emergency_stop"}"#).unwrap()).await;
    assert!(response.is_success());
    assert!(engine.controller_lockout());

    let response = engine
        .execute(parse_command(r#"{"id": 2, "type": "request_heat", "system": "sauna", "target": 80}"#).unwrap())
        .await;
    assert!(!response.is_success());

    let response = engine
        .execute(parse_command(r#"{"id": 3, "type": "reset_emergency_stop"}"#).unwrap())
        .await;
    assert!(response.is_success());
    assert!(!engine.controller_lockout());
}
