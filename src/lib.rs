//! # Saunabus
//!
//! Thermal-safety control engine for an installation with a sauna heater and
//! a steam generator that share one electrical supply.
//!
//! ## Features
//!
//! - **Sensor polling**: NTC probes every 5 s, humidity sensor every 10 s
//! - **Safety evaluation**: inclusive max and safety cutoffs with fault latch
//! - **Per-system state machine**: heating, regulation, door interlock, session timeout
//! - **Mutual exclusion**: only one heater is ever energized
//! - **Global fail-safe**: controller over-temperature drops every relay
//! - **Simulated hardware**: thermal model with fault injection
//!
//! ## Quick Start
//!
//! ```no_run
//! use saunabus::config::EngineConfig;
//! use saunabus::engine::Engine;
//! use saunabus::sim::SimulatedHardware;
//! use saunabus::subsystems::SystemId;
//! use saunabus::telemetry::TracingSink;
//! use std::sync::Arc;
//!
//! # async fn run() -> saunabus::Result<()> {
//! let config = EngineConfig::example();
//! let sim = SimulatedHardware::new(&config);
//! let engine = Engine::new(config, sim.hardware(Arc::new(TracingSink)))?;
//! engine.start()?;
//! engine.request_heat(SystemId::Sauna, 80.0).await?;
//! # engine.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`engine`] - Orchestrator and public API
//! - [`subsystems`] - System controllers and door interlock
//! - [`arbiter`] - Sauna/steam exclusivity handshake
//! - [`safety`] - Verdicts and the controller safety monitor
//! - [`poller`] - Periodic sensor sampling
//! - [`scheduler`] - Session timeouts
//! - [`ports`] - Hardware seams

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

pub mod alarm;
pub mod arbiter;
pub mod config;
pub mod conversion;
pub mod engine;
pub mod error;
pub mod fault;
pub mod poller;
pub mod ports;
pub mod protocol;
pub mod safety;
pub mod scheduler;
pub mod sim;
pub mod subsystems;
pub mod telemetry;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use subsystems::{SystemId, SystemMode};
