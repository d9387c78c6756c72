use clap::{App, Arg};
use colored::*;
use saunabus::config::EngineConfig;
use saunabus::engine::Engine;
use saunabus::protocol::{parse_command, CommandResponse};
use saunabus::sim::SimulatedHardware;
use saunabus::subsystems::{SystemId, SystemMode};
use saunabus::telemetry::{BroadcastSink, EngineEvent, EngineStatus};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const PHYSICS_PERIOD: Duration = Duration::from_millis(1000);
const STATUS_EVERY_TICKS: u64 = 5;

/// Simulator-only stdin controls, tagged with `"sim"`.
#[derive(Debug, Deserialize)]
#[serde(tag = "sim", rename_all = "snake_case")]
enum SimControl {
    Door { pin: u8, level: bool },
    Disconnect { channel: u8 },
    Reconnect { channel: u8 },
    SetTemperature { channel: u8, celsius: f32 },
    Humidity { percent: f32 },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("saunabus-simulator")
        .version("0.1.0")
        .author("OpenSauna Controls Team")
        .about("Sauna and steam room control engine running on simulated hardware")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON engine configuration (defaults to the reference installation)")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("speed")
                .short("s")
                .long("speed")
                .value_name("FACTOR")
                .help("Simulated seconds per wall-clock second for the thermal model")
                .takes_value(true)
                .default_value("30"),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Status output format")
                .takes_value(true)
                .possible_values(&["table", "json"])
                .default_value("table"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Enable debug logging"),
        )
        .get_matches();

    let default_level = if matches.is_present("verbose") { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match matches.value_of("config") {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::example(),
    };
    let speed: f32 = matches.value_of("speed").unwrap_or("30").parse()?;
    let json_output = matches.value_of("format") == Some("json");

    println!("{}", "Saunabus Simulator".bright_cyan().bold());
    println!("==================");

    let sim = SimulatedHardware::new(&config);
    let sink = Arc::new(BroadcastSink::default());
    let mut events = sink.subscribe();
    let engine = Arc::new(Engine::new(config, sim.hardware(sink.clone()))?);
    engine.start()?;

    let event_printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            print_event(&event);
        }
    });

    let stdin_engine = Arc::clone(&engine);
    let stdin_sim = Arc::clone(&sim);
    let stdin_task = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            handle_line(&stdin_engine, &stdin_sim, line).await;
        }
    });

    info!(speed, "simulation running; send JSON commands on stdin, Ctrl+C to stop");

    let mut interval = time::interval(PHYSICS_PERIOD);
    let mut ticks: u64 = 0;
    loop {
        tokio::select! {
            _ = interval.tick() => {
                sim.step(PHYSICS_PERIOD.as_secs_f32() * speed);
                ticks += 1;
                if ticks % STATUS_EVERY_TICKS == 0 {
                    let status = engine.status().await;
                    if json_output {
                        println!("{}", serde_json::to_string(&status)?);
                    } else {
                        print_status_row(&status);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received");
                break;
            }
        }
    }

    stdin_task.abort();
    engine.shutdown().await;
    event_printer.abort();
    println!("{}", "Simulator stopped, all relays off".bright_green());
    Ok(())
}

async fn handle_line(engine: &Engine, sim: &SimulatedHardware, line: &str) {
    if let Ok(control) = serde_json::from_str::<SimControl>(line) {
        apply_sim_control(engine, sim, control).await;
        return;
    }

    let response = match parse_command(line) {
        Ok(command) => engine.execute(command).await,
        Err(e) => CommandResponse::invalid(e.to_string()),
    };
    match serde_json::to_string(&response) {
        Ok(json) if response.is_success() => println!("{} {}", "OK".green(), json),
        Ok(json) => println!("{} {}", "ERR".red(), json),
        Err(e) => error!(error = %e, "failed to serialize response"),
    }
}

async fn apply_sim_control(engine: &Engine, sim: &SimulatedHardware, control: SimControl) {
    match control {
        SimControl::Door { pin, level } => {
            sim.set_door_level(pin, level);
            match engine.door_edge(pin, level).await {
                Some((system, state)) => info!(%system, ?state, "door edge"),
                None => warn!(pin, "no door on that pin"),
            }
        }
        SimControl::Disconnect { channel } => sim.disconnect_sensor(channel),
        SimControl::Reconnect { channel } => sim.reconnect_sensor(channel),
        SimControl::SetTemperature { channel, celsius } => sim.set_temperature(channel, celsius),
        SimControl::Humidity { percent } => sim.set_humidity(percent),
    }
}

fn print_event(event: &EngineEvent) {
    match event {
        EngineEvent::Alarm { cause, flashes } => {
            println!("{} {} ({} flashes)", "ALARM".bright_red().bold(), cause, flashes);
        }
        EngineEvent::GlobalShutdown { reason } => {
            println!("{} {}", "GLOBAL OFF".bright_red().bold(), reason);
        }
        EngineEvent::HeatRejected { system, reason } => {
            println!("{} {}: {}", "REJECTED".yellow(), system, reason);
        }
        EngineEvent::SensorFault { sensor, channel } => {
            println!("{} {} (channel {})", "SENSOR FAULT".red(), sensor, channel);
        }
        _ => {}
    }
}

fn print_status_row(status: &EngineStatus) {
    let mut row = String::new();
    for system in SystemId::ALL {
        let Some(s) = status.system(system) else {
            continue;
        };
        let temperature = s
            .current_temperature
            .map_or_else(|| "  --.-".to_string(), |t| format!("{:>6.1}", status.unit.convert(t)));
        let mode = match (s.mode, s.relay_on) {
            (SystemMode::Heating, true) => "HEAT ON ".bright_red(),
            (SystemMode::Heating, false) if s.door_suspended => "DOOR    ".yellow(),
            (SystemMode::Heating, false) => "HEAT    ".red(),
            (SystemMode::Off, _) => "OFF     ".white(),
        };
        let fault = s.fault.map_or_else(|| "".normal(), |f| format!(" [{f}]").bright_red());
        row.push_str(&format!(
            "│ {:<5} {}{} {} target {:>5.1}{} ",
            system,
            temperature,
            status.unit.symbol(),
            mode,
            s.target_temperature,
            fault
        ));
    }
    let lockout = if status.controller_lockout {
        " LOCKOUT".bright_red()
    } else {
        " NORMAL".bright_green()
    };
    let humidity = status
        .humidity_percent
        .map_or_else(|| "--".to_string(), |h| format!("{h:.0}%"));
    println!("{row}│ RH {humidity} │{lockout} │");
}
