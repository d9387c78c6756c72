//! Sensor value conversion.
//!
//! NTC thermistors sit on the low side of a divider against a series
//! resistor; the ADC reports the divider tap as a normalized sample in
//! `[0, 1]`. The Beta form of Steinhart-Hart turns the recovered resistance
//! into degrees Celsius. Nothing here decides whether a value is usable;
//! [`is_plausible`] does that separately.

use crate::error::ConversionError;
use serde::{Deserialize, Serialize};

const KELVIN_OFFSET: f32 = 273.15;
const T25_K: f32 = 298.15;

/// Lowest temperature a connected probe can report in a heated room.
pub const PLAUSIBLE_MIN_C: f32 = -20.0;
/// Highest temperature a connected probe can report before it is assumed shorted.
pub const PLAUSIBLE_MAX_C: f32 = 150.0;

const CLIMATE_FUNCTION_CODE: u8 = 0x03;
const CLIMATE_PAYLOAD_LEN: u8 = 0x04;

/// Thermistor calibration constants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Calibration {
    /// Thermistor resistance at 25 °C (ohms).
    pub nominal_resistance_ohms: f32,
    /// Beta coefficient (K).
    pub beta: f32,
    /// Fixed divider resistor (ohms).
    pub series_resistance_ohms: f32,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            nominal_resistance_ohms: 10_000.0,
            beta: 3950.0,
            series_resistance_ohms: 10_000.0,
        }
    }
}

impl Calibration {
    pub fn is_valid(&self) -> bool {
        [
            self.nominal_resistance_ohms,
            self.beta,
            self.series_resistance_ohms,
        ]
        .iter()
        .all(|v| v.is_finite() && *v > 0.0)
    }
}

/// Normalized ADC sample in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawSample(pub f32);

impl RawSample {
    /// Build a sample from a raw converter code, e.g. `code / 1023` for a 10-bit ADC.
    pub fn from_code(code: u16, full_scale: u16) -> Self {
        if full_scale == 0 {
            return RawSample(f32::NAN);
        }
        RawSample(f32::from(code) / f32::from(full_scale))
    }
}

/// Convert a divider sample to degrees Celsius.
///
/// Samples at or beyond the rails (open or shorted probe) yield `NaN`.
pub fn thermistor_celsius(sample: RawSample, cal: &Calibration) -> f32 {
    let x = sample.0;
    if !x.is_finite() || x <= 0.0 || x >= 1.0 {
        return f32::NAN;
    }
    let r_ntc = cal.series_resistance_ohms * x / (1.0 - x);
    let inv_t = (1.0 / T25_K) + (r_ntc / cal.nominal_resistance_ohms).ln() / cal.beta;
    if inv_t <= 0.0 {
        return f32::NAN;
    }
    (1.0 / inv_t) - KELVIN_OFFSET
}

/// Inverse of [`thermistor_celsius`]; used by the simulated ADC.
pub fn celsius_to_sample(celsius: f32, cal: &Calibration) -> RawSample {
    let t = celsius + KELVIN_OFFSET;
    let r_ntc = cal.nominal_resistance_ohms * (cal.beta * (1.0 / t - 1.0 / T25_K)).exp();
    RawSample(r_ntc / (r_ntc + cal.series_resistance_ohms))
}

/// Whether a converted temperature can come from a connected, working probe.
pub fn is_plausible(celsius: f32) -> bool {
    !celsius.is_nan() && (PLAUSIBLE_MIN_C..=PLAUSIBLE_MAX_C).contains(&celsius)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemperatureUnit {
    #[default]
    Celsius,
    Fahrenheit,
}

impl TemperatureUnit {
    pub fn convert(self, celsius: f32) -> f32 {
        match self {
            TemperatureUnit::Celsius => celsius,
            TemperatureUnit::Fahrenheit => celsius * 1.8 + 32.0,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            TemperatureUnit::Celsius => "°C",
            TemperatureUnit::Fahrenheit => "°F",
        }
    }
}

/// One humidity/temperature sample from the climate sensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClimateSample {
    pub humidity_percent: f32,
    pub temperature_c: f32,
}

/// CRC-16/MODBUS as used by the climate sensor.
pub fn crc16_modbus(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Decode an 8-byte read-registers response:
/// `[0x03, 0x04, RH_hi, RH_lo, T_hi, T_lo, CRC_lo, CRC_hi]`.
pub fn decode_climate_frame(frame: &[u8; 8]) -> Result<ClimateSample, ConversionError> {
    if frame[0] != CLIMATE_FUNCTION_CODE {
        return Err(ConversionError::FunctionCode(frame[0]));
    }
    if frame[1] != CLIMATE_PAYLOAD_LEN {
        return Err(ConversionError::Length(frame[1]));
    }
    let expected = crc16_modbus(&frame[..6]);
    let actual = u16::from_le_bytes([frame[6], frame[7]]);
    if expected != actual {
        return Err(ConversionError::Crc { expected, actual });
    }

    let humidity = u16::from_be_bytes([frame[2], frame[3]]);
    let raw_temp = u16::from_be_bytes([frame[4], frame[5]]);
    // Sign-magnitude: bit 15 flags a negative temperature.
    let magnitude = f32::from(raw_temp & 0x7FFF) / 10.0;
    let temperature_c = if raw_temp & 0x8000 != 0 { -magnitude } else { magnitude };

    Ok(ClimateSample {
        humidity_percent: f32::from(humidity) / 10.0,
        temperature_c,
    })
}

/// Encode a sample into the sensor's response frame (simulation only).
pub fn encode_climate_frame(sample: &ClimateSample) -> [u8; 8] {
    let humidity = (sample.humidity_percent.clamp(0.0, 100.0) * 10.0).round() as u16;
    let magnitude = (sample.temperature_c.abs() * 10.0).round() as u16 & 0x7FFF;
    let raw_temp = if sample.temperature_c < 0.0 { magnitude | 0x8000 } else { magnitude };

    let mut frame = [0u8; 8];
    frame[0] = CLIMATE_FUNCTION_CODE;
    frame[1] = CLIMATE_PAYLOAD_LEN;
    frame[2..4].copy_from_slice(&humidity.to_be_bytes());
    frame[4..6].copy_from_slice(&raw_temp.to_be_bytes());
    let crc = crc16_modbus(&frame[..6]);
    frame[6..8].copy_from_slice(&crc.to_le_bytes());
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn midpoint_sample_is_25_degrees() {
        let cal = Calibration::default();
        let c = thermistor_celsius(RawSample(0.5), &cal);
        assert!((c - 25.0).abs() < 0.01, "got {c}");
    }

    #[test]
    fn hotter_probe_means_lower_sample() {
        let cal = Calibration::default();
        let warm = thermistor_celsius(RawSample(0.2), &cal);
        let cool = thermistor_celsius(RawSample(0.6), &cal);
        assert!(warm > cool);
    }

    #[test]
    fn rail_samples_are_nan() {
        let cal = Calibration::default();
        assert!(thermistor_celsius(RawSample(0.0), &cal).is_nan());
        assert!(thermistor_celsius(RawSample(1.0), &cal).is_nan());
        assert!(thermistor_celsius(RawSample(f32::NAN), &cal).is_nan());
        assert!(thermistor_celsius(RawSample::from_code(10, 0), &cal).is_nan());
    }

    #[test]
    fn inverse_conversion_matches() {
        let cal = Calibration::default();
        for celsius in [-10.0_f32, 25.0, 60.0, 85.0, 110.0] {
            let back = thermistor_celsius(celsius_to_sample(celsius, &cal), &cal);
            assert!((back - celsius).abs() < 0.05, "{celsius} -> {back}");
        }
    }

    #[test]
    fn plausibility_bounds_are_inclusive() {
        assert!(is_plausible(PLAUSIBLE_MIN_C));
        assert!(is_plausible(PLAUSIBLE_MAX_C));
        assert!(!is_plausible(-20.5));
        assert!(!is_plausible(150.5));
        assert!(!is_plausible(f32::NAN));
        assert!(!is_plausible(f32::INFINITY));
    }

    #[test]
    fn fahrenheit_display() {
        assert!((TemperatureUnit::Fahrenheit.convert(100.0) - 212.0).abs() < 1e-3);
        assert_eq!(TemperatureUnit::Celsius.convert(80.0), 80.0);
    }

    #[test]
    fn crc_reference_value() {
        // CRC-16/MODBUS check value for "123456789".
        assert_eq!(crc16_modbus(b"123456789"), 0x4B37);
    }

    #[test]
    fn decode_known_frame() {
        let sample = ClimateSample {
            humidity_percent: 55.3,
            temperature_c: 41.2,
        };
        let frame = encode_climate_frame(&sample);
        assert_eq!(&frame[..6], &[0x03, 0x04, 0x02, 0x29, 0x01, 0x9C]);

        let decoded = decode_climate_frame(&frame).unwrap();
        assert!((decoded.humidity_percent - 55.3).abs() < 0.01);
        assert!((decoded.temperature_c - 41.2).abs() < 0.01);
    }

    #[test]
    fn negative_temperature_uses_sign_bit() {
        let frame = encode_climate_frame(&ClimateSample {
            humidity_percent: 20.0,
            temperature_c: -5.5,
        });
        assert_eq!(frame[4] & 0x80, 0x80);
        let decoded = decode_climate_frame(&frame).unwrap();
        assert!((decoded.temperature_c + 5.5).abs() < 0.01);
    }

    #[test]
    fn corrupted_frames_are_rejected() {
        let mut frame = encode_climate_frame(&ClimateSample {
            humidity_percent: 30.0,
            temperature_c: 30.0,
        });
        frame[3] ^= 0x01;
        assert!(matches!(
            decode_climate_frame(&frame),
            Err(ConversionError::Crc { .. })
        ));

        let mut bad_code = frame;
        bad_code[0] = 0x10;
        assert_eq!(
            decode_climate_frame(&bad_code),
            Err(ConversionError::FunctionCode(0x10))
        );
    }
}
