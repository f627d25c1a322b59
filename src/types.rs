use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

use crate::error::{GreenhouseError, Result};

/// Minutes in a day, the upper bound for the expected light duration
pub const MINUTES_PER_DAY: i16 = 1440;

/// Device configuration
///
/// Always sent to the device as a whole: there is no partial update on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Expected daily light duration in minutes
    pub expected_light_minutes: i16,
    /// Lower light bound
    pub min_light: f32,
    /// Upper light bound
    pub max_light: f32,
    /// Lower air humidity bound
    pub min_humidity: f32,
    /// Upper air humidity bound
    pub max_humidity: f32,
    /// Lower soil humidity bound
    pub min_soil_humidity: f32,
    /// Upper soil humidity bound
    pub max_soil_humidity: f32,
    /// Lower temperature bound (Celsius)
    pub min_temperature: f32,
    /// Upper temperature bound (Celsius)
    pub max_temperature: f32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            expected_light_minutes: 0,
            min_light: 0.0,
            max_light: 100.0,
            min_humidity: 0.0,
            max_humidity: 100.0,
            min_soil_humidity: 0.0,
            max_soil_humidity: 100.0,
            min_temperature: 0.0,
            max_temperature: 100.0,
        }
    }
}

impl Settings {
    /// Check that the settings make sense before sending them to the device
    ///
    /// # Errors
    ///
    /// Returns [`GreenhouseError::InvalidParameters`] if the light duration is outside
    /// a day, a bound is not finite, or a lower bound exceeds its upper bound.
    pub fn validate(&self) -> Result<()> {
        if !(0..=MINUTES_PER_DAY).contains(&self.expected_light_minutes) {
            return Err(GreenhouseError::InvalidParameters(format!(
                "expected_light_minutes {} is out of range (0 - {MINUTES_PER_DAY})",
                self.expected_light_minutes
            )));
        }

        let ranges = [
            ("light", self.min_light, self.max_light),
            ("humidity", self.min_humidity, self.max_humidity),
            ("soil_humidity", self.min_soil_humidity, self.max_soil_humidity),
            ("temperature", self.min_temperature, self.max_temperature),
        ];

        for (name, min, max) in ranges {
            if !min.is_finite() || !max.is_finite() {
                return Err(GreenhouseError::InvalidParameters(format!(
                    "{name} bounds must be finite"
                )));
            }
            if min > max {
                return Err(GreenhouseError::InvalidParameters(format!(
                    "min_{name} {min:.1} is above max_{name} {max:.1}"
                )));
            }
        }

        Ok(())
    }
}

/// One of the four sensor channels reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorChannel {
    /// Light sensor
    Light,
    /// Air humidity sensor
    Humidity,
    /// Soil humidity sensor
    SoilHumidity,
    /// Temperature sensor
    Temperature,
}

impl SensorChannel {
    /// All channels in wire order
    pub const ALL: [Self; 4] = [
        Self::Light,
        Self::Humidity,
        Self::SoilHumidity,
        Self::Temperature,
    ];
}

impl fmt::Display for SensorChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Light => write!(f, "light"),
            Self::Humidity => write!(f, "humidity"),
            Self::SoilHumidity => write!(f, "soil humidity"),
            Self::Temperature => write!(f, "temperature"),
        }
    }
}

/// Instantaneous sensor sample
///
/// A non-finite channel value is the device's way of saying the sensor had no
/// valid reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Values {
    /// Light level
    pub light: f32,
    /// Air humidity
    pub humidity: f32,
    /// Soil humidity
    pub soil_humidity: f32,
    /// Temperature (Celsius)
    pub temperature: f32,
}

impl Values {
    /// Create a new sample
    #[must_use]
    pub const fn new(light: f32, humidity: f32, soil_humidity: f32, temperature: f32) -> Self {
        Self {
            light,
            humidity,
            soil_humidity,
            temperature,
        }
    }

    /// Read a single channel
    #[must_use]
    pub const fn get(&self, channel: SensorChannel) -> f32 {
        match channel {
            SensorChannel::Light => self.light,
            SensorChannel::Humidity => self.humidity,
            SensorChannel::SoilHumidity => self.soil_humidity,
            SensorChannel::Temperature => self.temperature,
        }
    }

    /// Channels whose value is not a finite number
    #[must_use]
    pub fn faulty_channels(&self) -> Vec<SensorChannel> {
        SensorChannel::ALL
            .into_iter()
            .filter(|channel| !self.get(*channel).is_finite())
            .collect()
    }

    /// Whether every channel carries a finite reading
    #[must_use]
    pub fn is_complete(&self) -> bool {
        SensorChannel::ALL
            .into_iter()
            .all(|channel| self.get(channel).is_finite())
    }
}

/// Per-channel sensor error counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Information {
    /// Light sensor error count
    pub light_errors: i16,
    /// Humidity sensor error count
    pub humidity_errors: i16,
    /// Soil humidity sensor error count
    pub soil_humidity_errors: i16,
    /// Temperature sensor error count
    pub temperature_errors: i16,
}

impl Information {
    /// Error count for a single channel
    #[must_use]
    pub const fn errors(&self, channel: SensorChannel) -> i16 {
        match channel {
            SensorChannel::Light => self.light_errors,
            SensorChannel::Humidity => self.humidity_errors,
            SensorChannel::SoilHumidity => self.soil_humidity_errors,
            SensorChannel::Temperature => self.temperature_errors,
        }
    }

    /// Sum of all channel error counters
    #[must_use]
    pub fn total_errors(&self) -> i32 {
        SensorChannel::ALL
            .into_iter()
            .map(|channel| i32::from(self.errors(channel)))
            .sum()
    }

    /// Whether any channel reported errors
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.total_errors() != 0
    }
}

/// Connection lifecycle of a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No link to a device
    #[default]
    Disconnected,
    /// Platform connect in progress
    Connecting,
    /// Link established, requests may be issued
    Connected,
    /// Platform disconnect in progress
    Disconnecting,
}

impl ConnectionState {
    /// Whether requests can be issued in this state
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}

/// Session timing and lifecycle configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Minimum spacing after each physical write in milliseconds
    pub settle_delay_ms: u64,
    /// Interval between periodic value reads in milliseconds
    pub poll_interval_ms: u64,
    /// Platform connect timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Platform disconnect timeout in milliseconds
    pub disconnect_timeout_ms: u64,
    /// Reconnect automatically after a lost link or failed attempt
    pub auto_reconnect: bool,
    /// Consecutive failed attempts before reconnecting gives up
    pub max_reconnect_attempts: u32,
    /// Delay before the first reconnect attempt in milliseconds
    pub reconnect_base_delay_ms: u64,
    /// Growth factor applied to the reconnect delay per attempt
    pub reconnect_multiplier: f32,
    /// Reset retained settings, values and information on disconnect
    pub clear_on_disconnect: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 200,
            poll_interval_ms: 2_000,
            connect_timeout_ms: 30_000,
            disconnect_timeout_ms: 5_000,
            auto_reconnect: false,
            max_reconnect_attempts: 5,
            reconnect_base_delay_ms: 500,
            reconnect_multiplier: 2.0,
            clear_on_disconnect: false,
        }
    }
}

impl SessionConfig {
    /// Settle delay as a [`Duration`]
    #[must_use]
    pub const fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Poll interval as a [`Duration`]
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Delay before reconnect attempt number `retry` (1-based)
    ///
    /// `base * multiplier ^ (retry - 1)`, so with the defaults 500ms, 1000ms, 2000ms...
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn reconnect_delay(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = f64::from(self.reconnect_multiplier).powi(exponent);
        let millis = self.reconnect_base_delay_ms as f64 * factor;
        Duration::from_millis(millis.clamp(0.0, u64::MAX as f64) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.expected_light_minutes, 0);
        assert!((settings.max_light - 100.0).abs() < f32::EPSILON);
        assert!((settings.max_temperature - 100.0).abs() < f32::EPSILON);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_settings_validation() {
        let inverted = Settings {
            min_temperature: 35.0,
            max_temperature: 15.0,
            ..Settings::default()
        };
        let error = inverted.validate().unwrap_err();
        assert!(format!("{error}").contains("min_temperature"));

        let too_long = Settings {
            expected_light_minutes: 1441,
            ..Settings::default()
        };
        assert!(too_long.validate().is_err());

        let negative = Settings {
            expected_light_minutes: -1,
            ..Settings::default()
        };
        assert!(negative.validate().is_err());

        let not_finite = Settings {
            max_humidity: f32::INFINITY,
            ..Settings::default()
        };
        assert!(not_finite.validate().is_err());

        let full_day = Settings {
            expected_light_minutes: MINUTES_PER_DAY,
            ..Settings::default()
        };
        assert!(full_day.validate().is_ok());
    }

    #[test]
    fn test_values_channels() {
        let values = Values::new(1.0, f32::NAN, 3.0, f32::NEG_INFINITY);
        assert!((values.get(SensorChannel::SoilHumidity) - 3.0).abs() < f32::EPSILON);
        assert_eq!(
            values.faulty_channels(),
            vec![SensorChannel::Humidity, SensorChannel::Temperature]
        );
        assert!(!values.is_complete());
        assert!(Values::default().is_complete());
    }

    #[test]
    fn test_information_totals() {
        let info = Information {
            light_errors: 2,
            humidity_errors: 0,
            soil_humidity_errors: i16::MAX,
            temperature_errors: 1,
        };
        assert_eq!(info.total_errors(), 3 + i32::from(i16::MAX));
        assert!(info.has_errors());
        assert!(!Information::default().has_errors());
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert_eq!(format!("{}", ConnectionState::Disconnecting), "Disconnecting");
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
    }

    #[test]
    fn test_session_config_defaults() {
        let config = SessionConfig::default();

        assert_eq!(config.settle_delay_ms, 200);
        assert_eq!(config.poll_interval_ms, 2_000);
        assert_eq!(config.connect_timeout_ms, 30_000);
        assert_eq!(config.disconnect_timeout_ms, 5_000);
        assert!(!config.auto_reconnect);
        assert_eq!(config.max_reconnect_attempts, 5);
        assert!(!config.clear_on_disconnect);
        assert_eq!(config.settle_delay(), Duration::from_millis(200));
    }

    #[test]
    fn test_reconnect_backoff() {
        let config = SessionConfig::default();

        assert_eq!(config.reconnect_delay(1), Duration::from_millis(500));
        assert_eq!(config.reconnect_delay(2), Duration::from_millis(1_000));
        assert_eq!(config.reconnect_delay(3), Duration::from_millis(2_000));
        assert_eq!(config.reconnect_delay(5), Duration::from_millis(8_000));

        let flat = SessionConfig {
            reconnect_multiplier: 1.0,
            reconnect_base_delay_ms: 250,
            ..SessionConfig::default()
        };
        assert_eq!(flat.reconnect_delay(4), Duration::from_millis(250));
    }
}
