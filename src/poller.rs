//! Periodic sensor sampling.
//!
//! One task per probe and one for the climate sensor. A failed read produces
//! an invalid reading and the next tick is the retry.

use crate::config::SensorConfig;
use crate::conversion::{decode_climate_frame, thermistor_celsius, ClimateSample};
use crate::error::ClimateError;
use crate::ports::{ChannelHandle, ClimatePort, SensorPort};
use crate::safety::Reading;
use core::future::Future;
use core::time::Duration;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{trace, warn};

/// Read and convert one probe. Never fails; faults become invalid readings.
pub fn sample(port: &dyn SensorPort, handle: ChannelHandle, sensor: &SensorConfig) -> Reading {
    match port.read(handle) {
        Ok(raw) => {
            let celsius = thermistor_celsius(raw, &sensor.calibration);
            let reading = Reading::new(sensor.name.clone(), sensor.channel, celsius);
            if reading.valid {
                trace!(sensor = %sensor.name, celsius, "sampled");
            } else {
                warn!(sensor = %sensor.name, celsius, "implausible temperature");
            }
            reading
        }
        Err(e) => {
            warn!(sensor = %sensor.name, channel = sensor.channel, error = %e, "sensor read failed");
            Reading::invalid(sensor.name.clone(), sensor.channel)
        }
    }
}

/// One climate transaction: read the frame and decode it.
pub fn read_climate(port: &dyn ClimatePort, address: u8) -> Result<ClimateSample, ClimateError> {
    let frame = port.read_frame(address)?;
    Ok(decode_climate_frame(&frame)?)
}

/// Sample `sensor` every `period`, handing each reading to `on_reading`.
///
/// The first sample is taken immediately. Ticks missed while `on_reading`
/// is still running are skipped rather than bunched up.
pub fn spawn_temperature_poller<F, Fut>(
    port: Arc<dyn SensorPort>,
    handle: ChannelHandle,
    sensor: SensorConfig,
    period: Duration,
    on_reading: F,
) -> JoinHandle<()>
where
    F: Fn(Reading) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let reading = sample(port.as_ref(), handle, &sensor);
            on_reading(reading).await;
        }
    })
}

pub fn spawn_climate_poller<F, Fut>(
    port: Arc<dyn ClimatePort>,
    address: u8,
    period: Duration,
    on_sample: F,
) -> JoinHandle<()>
where
    F: Fn(Result<ClimateSample, ClimateError>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let result = read_climate(port.as_ref(), address);
            if let Err(e) = &result {
                warn!(address, error = %e, "climate sensor read failed");
            }
            on_sample(result).await;
        }
    })
}
