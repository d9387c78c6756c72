mod common;

use common::*;
use saunabus::engine::ReadingOutcome;
use saunabus::error::{EngineError, FaultReason};
use saunabus::safety::SafetyVerdict;
use saunabus::subsystems::DoorState;
use saunabus::telemetry::EngineEvent;
use saunabus::*;

#[tokio::test(start_paused = true)]
async fn test_heating_regulates_on_target_boundary() {
    let rig = rig();
    let engine = &rig.engine;

    engine.request_heat(SystemId::Sauna, 80.0).await.unwrap();
    // No reading yet, so the relay stays off
    assert!(heater_off(&rig.sim, SAUNA_PINS));

    engine.apply_reading(reading(engine, SAUNA_CH, 70.0)).await.unwrap();
    assert!(heater_on(&rig.sim, SAUNA_PINS));

    // Reaching the target switches off
    let outcome = engine.apply_reading(reading(engine, SAUNA_CH, 80.0)).await.unwrap();
    assert_eq!(outcome, ReadingOutcome::System(SystemId::Sauna, SafetyVerdict::Nominal));
    assert!(heater_off(&rig.sim, SAUNA_PINS));

    // Falling below it switches back on without a new request
    engine.apply_reading(reading(engine, SAUNA_CH, 79.5)).await.unwrap();
    assert!(heater_on(&rig.sim, SAUNA_PINS));

    let status = engine.status().await;
    let sauna = status.system(SystemId::Sauna).unwrap();
    assert_eq!(sauna.mode, SystemMode::Heating);
    assert!(sauna.relay_on);
    assert_eq!(sauna.current_temperature, Some(79.5));
}

#[tokio::test(start_paused = true)]
async fn test_invalid_reading_while_off_keeps_relay_off() {
    let mut rig = rig();
    let engine = &rig.engine;
    drain(&mut rig.events);

    let outcome = engine.apply_reading(reading(engine, SAUNA_CH, f32::NAN)).await.unwrap();
    assert_eq!(
        outcome,
        ReadingOutcome::System(SystemId::Sauna, SafetyVerdict::InvalidReading)
    );
    settle().await;

    assert!(heater_off(&rig.sim, SAUNA_PINS));
    assert_eq!(engine.alarm().sequences(), 0);
    assert_eq!(rig.sim.rising_edges(LIGHT_PIN), 0);

    let events = drain(&mut rig.events);
    assert!(events
        .iter()
        .any(|e| matches!(e, EngineEvent::SensorFault { channel: SAUNA_CH, .. })));
    assert!(!events.iter().any(|e| matches!(e, EngineEvent::Alarm { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_invalid_reading_forces_off_from_any_mode() {
    for system in SystemId::ALL {
        let rig = rig();
        let engine = &rig.engine;
        let (channel, pins, target) = match system {
            SystemId::Sauna => (SAUNA_CH, SAUNA_PINS, 80.0),
            SystemId::Steam => (STEAM_CH, STEAM_PINS, 45.0),
        };

        engine.request_heat(system, target).await.unwrap();
        engine.apply_reading(reading(engine, channel, 30.0)).await.unwrap();
        assert!(heater_on(&rig.sim, pins));

        engine.apply_reading(invalid(engine, channel)).await.unwrap();
        assert!(heater_off(&rig.sim, pins));

        let status = engine.status().await;
        let s = status.system(system).unwrap();
        assert_eq!(s.mode, SystemMode::Off);
        assert_eq!(s.fault, Some(FaultReason::SensorFault));
        assert_eq!(s.current_temperature, None);

        // Latched until a nominal reading arrives
        let err = engine.request_heat(system, target).await.unwrap_err();
        assert!(matches!(err, EngineError::FaultLatched { reason: FaultReason::SensorFault, .. }));

        engine.apply_reading(reading(engine, channel, 30.0)).await.unwrap();
        engine.request_heat(system, target).await.unwrap();
        assert!(heater_on(&rig.sim, pins));
    }
}

#[tokio::test(start_paused = true)]
async fn test_implausible_reading_is_invalid() {
    let rig = rig();
    let engine = &rig.engine;

    engine.request_heat(SystemId::Sauna, 80.0).await.unwrap();
    engine.apply_reading(reading(engine, SAUNA_CH, 60.0)).await.unwrap();
    assert!(heater_on(&rig.sim, SAUNA_PINS));

    // A shorted probe reads far beyond anything physical
    let outcome = engine.apply_reading(reading(engine, SAUNA_CH, 400.0)).await.unwrap();
    assert_eq!(
        outcome,
        ReadingOutcome::System(SystemId::Sauna, SafetyVerdict::InvalidReading)
    );
    assert!(heater_off(&rig.sim, SAUNA_PINS));
    assert_eq!(engine.alarm().sequences(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_door_open_suspends_without_leaving_heating() {
    let rig = rig();
    let engine = &rig.engine;

    engine.request_heat(SystemId::Sauna, 80.0).await.unwrap();
    engine.apply_reading(reading(engine, SAUNA_CH, 60.0)).await.unwrap();
    assert!(heater_on(&rig.sim, SAUNA_PINS));

    // Sauna door does not allow heating while open
    let edge = engine.door_edge(SAUNA_DOOR, true).await;
    assert_eq!(edge, Some((SystemId::Sauna, DoorState::Open)));
    assert!(heater_off(&rig.sim, SAUNA_PINS));

    let status = engine.status().await;
    let sauna = status.system(SystemId::Sauna).unwrap();
    assert_eq!(sauna.mode, SystemMode::Heating);
    assert!(sauna.door_suspended);
    assert_eq!(sauna.door, DoorState::Open);

    // Readings while suspended do not energize the heater
    engine.apply_reading(reading(engine, SAUNA_CH, 55.0)).await.unwrap();
    assert!(heater_off(&rig.sim, SAUNA_PINS));

    // Closing resumes without a new request
    engine.door_edge(SAUNA_DOOR, false).await;
    assert!(heater_on(&rig.sim, SAUNA_PINS));
    let status = engine.status().await;
    assert!(!status.system(SystemId::Sauna).unwrap().door_suspended);
}

#[tokio::test(start_paused = true)]
async fn test_door_open_allowed_keeps_heating() {
    let rig = rig();
    let engine = &rig.engine;

    engine.request_heat(SystemId::Steam, 45.0).await.unwrap();
    engine.apply_reading(reading(engine, STEAM_CH, 30.0)).await.unwrap();
    assert!(heater_on(&rig.sim, STEAM_PINS));

    // Steam door is wired inverted: a low level reads open
    let edge = engine.door_edge(STEAM_DOOR, false).await;
    assert_eq!(edge, Some((SystemId::Steam, DoorState::Open)));
    assert!(heater_on(&rig.sim, STEAM_PINS));

    // Unknown pins are ignored
    assert_eq!(engine.door_edge(4, true).await, None);
}

#[tokio::test(start_paused = true)]
async fn test_door_open_while_off_does_not_heat_on_close() {
    let rig = rig();
    let engine = &rig.engine;

    engine.apply_reading(reading(engine, SAUNA_CH, 40.0)).await.unwrap();
    engine.door_edge(SAUNA_DOOR, true).await;
    engine.door_edge(SAUNA_DOOR, false).await;

    assert!(heater_off(&rig.sim, SAUNA_PINS));
    let status = engine.status().await;
    assert_eq!(status.system(SystemId::Sauna).unwrap().mode, SystemMode::Off);
}

#[tokio::test(start_paused = true)]
async fn test_request_off_is_idempotent() {
    let rig = rig();
    let engine = &rig.engine;

    engine.request_heat(SystemId::Sauna, 80.0).await.unwrap();
    engine.apply_reading(reading(engine, SAUNA_CH, 60.0)).await.unwrap();

    assert!(engine.request_off(SystemId::Sauna).await.unwrap());
    assert!(heater_off(&rig.sim, SAUNA_PINS));

    let writes = rig.sim.write_count();
    assert!(!engine.request_off(SystemId::Sauna).await.unwrap());
    assert_eq!(rig.sim.write_count(), writes);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_targets_are_rejected() {
    let mut rig = rig();
    let engine = &rig.engine;
    drain(&mut rig.events);

    for target in [-1.0, 101.0, f32::NAN, f32::INFINITY] {
        let err = engine.request_heat(SystemId::Sauna, target).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidTarget { system: SystemId::Sauna, .. }));
    }
    // Steam max defaults to 60
    assert!(engine.request_heat(SystemId::Steam, 61.0).await.is_err());

    let status = engine.status().await;
    assert!(status.systems.iter().all(|s| s.mode == SystemMode::Off));

    let rejections = drain(&mut rig.events)
        .into_iter()
        .filter(|e| matches!(e, EngineEvent::HeatRejected { .. }))
        .count();
    assert_eq!(rejections, 5);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_request_updates_target() {
    let rig = rig();
    let engine = &rig.engine;

    engine.request_heat(SystemId::Sauna, 80.0).await.unwrap();
    engine.apply_reading(reading(engine, SAUNA_CH, 75.0)).await.unwrap();
    assert!(heater_on(&rig.sim, SAUNA_PINS));

    engine.request_heat(SystemId::Sauna, 70.0).await.unwrap();
    assert!(heater_off(&rig.sim, SAUNA_PINS));

    let status = engine.status().await;
    let sauna = status.system(SystemId::Sauna).unwrap();
    assert_eq!(sauna.mode, SystemMode::Heating);
    assert_eq!(sauna.target_temperature, 70.0);
}

#[tokio::test(start_paused = true)]
async fn test_display_only_sensor_never_actuates() {
    let rig = rig();
    let engine = &rig.engine;

    engine.request_heat(SystemId::Sauna, 80.0).await.unwrap();
    engine.apply_reading(reading(engine, SAUNA_CH, 60.0)).await.unwrap();

    // The bench probe reports but has no control authority
    let outcome = engine.apply_reading(reading(engine, BENCH_CH, 130.0)).await.unwrap();
    assert_eq!(outcome, ReadingOutcome::DisplayOnly);
    assert!(heater_on(&rig.sim, SAUNA_PINS));
    assert_eq!(engine.alarm().sequences(), 0);

    // Channels without a sensor are refused
    let mut stray = reading(engine, BENCH_CH, 20.0);
    stray.channel = 7;
    assert!(matches!(
        engine.apply_reading(stray).await,
        Err(EngineError::UnknownSensor(7))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_relay_write_failure_turns_system_off() {
    let rig = rig();
    let engine = &rig.engine;

    rig.sim.fail_line(6);
    engine.request_heat(SystemId::Sauna, 80.0).await.unwrap();
    engine.apply_reading(reading(engine, SAUNA_CH, 60.0)).await.unwrap();

    assert!(!rig.sim.line(5));
    let status = engine.status().await;
    let sauna = status.system(SystemId::Sauna).unwrap();
    assert_eq!(sauna.mode, SystemMode::Off);
    assert!(!sauna.relay_on);
    assert!(status
        .faults
        .iter()
        .any(|f| f.record.reason == FaultReason::RelayFault));
}
