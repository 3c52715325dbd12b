//! Configuration management for the boiler controller
//!
//! Settings live in a single JSON document with camelCase keys, compatible
//! with the files of existing installations. The control loop never holds on
//! to a mutable view: every cycle pulls an immutable snapshot through a
//! [`ConfigProvider`].

pub mod provider;

pub use provider::{ConfigProvider, FileConfigProvider, SharedConfig};

use crate::error::{BoilerError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Longest accepted cycle interval, one day
pub const MAX_READ_INTERVAL_S: u64 = 86_400;

/// Default expected-temperature formula
pub const DEFAULT_FORMULA: &str =
    "-0.5 * outerAvg + 37 + (config.referenceInnerT - innerAvg) * 1.5";

/// Role a sensor plays in the control loop
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum Purpose {
    /// Ambient indoor temperature
    Inner,
    /// Ambient outdoor temperature
    Outer,
    /// Heated medium
    Water,
    /// Not used by the control loop
    None,
}

impl Purpose {
    /// Roles that take part in token generation, in token order
    pub const ACTIVE: [Purpose; 3] = [Purpose::Inner, Purpose::Outer, Purpose::Water];

    /// Prefix used for generated token names (`inner1`, `innerAvg`, ...)
    pub fn token_prefix(&self) -> &'static str {
        match self {
            Purpose::Inner => "inner",
            Purpose::Outer => "outer",
            Purpose::Water => "water",
            Purpose::None => "none",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Purpose::Inner => "INNER",
            Purpose::Outer => "OUTER",
            Purpose::Water => "WATER",
            Purpose::None => "NONE",
        }
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Purpose {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INNER" => Ok(Purpose::Inner),
            "OUTER" => Ok(Purpose::Outer),
            "WATER" => Ok(Purpose::Water),
            "NONE" => Ok(Purpose::None),
            _ => Err(s.to_string()),
        }
    }
}

/// Per-sensor settings
///
/// The purpose is kept as written in the settings file and classified when a
/// cycle starts, so a typo surfaces as a cycle error instead of a rejected
/// reload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SensorSettings {
    /// Raw purpose string (INNER, OUTER, WATER or NONE)
    pub purpose: String,

    /// Calibration offset added to every reading
    #[serde(default)]
    pub offset_t: f64,
}

impl SensorSettings {
    pub fn new(purpose: Purpose, offset_t: f64) -> Self {
        Self {
            purpose: purpose.as_str().to_string(),
            offset_t,
        }
    }

    /// Classify this sensor into a [`Purpose`]
    pub fn classify(&self, uid: &str) -> Result<Purpose> {
        self.purpose
            .parse()
            .map_err(|purpose: String| BoilerError::unknown_purpose(uid, purpose))
    }
}

/// Controller configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ControllerConfig {
    /// Reference indoor temperature, exposed to the formula as `config.referenceInnerT`
    pub reference_inner_t: f64,

    /// Dead-band below the expected temperature before heating starts
    pub tolerance_down_t: f64,

    /// Seconds between control cycles
    pub read_interval_s: u64,

    /// History length for INNER sensors
    pub last_records_to_get_mean_inner: usize,

    /// History length for OUTER sensors
    pub last_records_to_get_mean_outer: usize,

    /// History length for WATER sensors
    pub last_records_to_get_mean_water: usize,

    /// Arithmetic expression producing the expected water temperature
    pub calc_expected_temperature_formula: String,

    /// Safety floor for the water temperature
    pub minimum_allowed_water_t: f64,

    /// Safety ceiling for the water temperature
    pub maximum_allowed_water_t: f64,

    /// Water temperature that raises a critical alarm in the logs
    pub critical_alarm_water_t: f64,

    /// Outdoor temperature above which there is no heating demand
    pub min_outer_to_start_boiling_t: f64,

    /// GPIO pin driving the burner relay
    pub control_burner_on_off_pin: u32,

    /// GPIO pin reading the burner alarm line
    pub alarm_burner_in_pin: u32,

    /// GPIO pin driving the circulation pump
    pub control_pump_on_off_pin: u32,

    /// Decimal digits kept when persisting records
    pub round_digits: u32,

    /// Sensors keyed by 1-Wire identifier, iterated in ascending order
    pub sensors: BTreeMap<String, SensorSettings>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        let mut sensors = BTreeMap::new();
        sensors.insert(
            "28-01144cd685aa".to_string(),
            SensorSettings::new(Purpose::Inner, 0.0),
        );
        sensors.insert(
            "28-0303979405f1".to_string(),
            SensorSettings::new(Purpose::Water, 0.0),
        );
        sensors.insert(
            "28-030c979423c2".to_string(),
            SensorSettings::new(Purpose::Outer, 0.0),
        );

        Self {
            reference_inner_t: 20.0,
            tolerance_down_t: 3.0,
            read_interval_s: 2,
            last_records_to_get_mean_inner: 60,
            last_records_to_get_mean_outer: 60,
            last_records_to_get_mean_water: 1,
            calc_expected_temperature_formula: DEFAULT_FORMULA.to_string(),
            minimum_allowed_water_t: 0.0,
            maximum_allowed_water_t: 70.0,
            critical_alarm_water_t: 80.0,
            min_outer_to_start_boiling_t: 20.0,
            control_burner_on_off_pin: 17,
            alarm_burner_in_pin: 18,
            control_pump_on_off_pin: 19,
            round_digits: 4,
            sensors,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            BoilerError::config(format!(
                "Failed to read settings {}: {e}",
                path.as_ref().display()
            ))
        })?;

        Self::from_json(&content)
    }

    /// Parse and validate configuration from a JSON string
    pub fn from_json(content: &str) -> Result<Self> {
        let config: ControllerConfig = serde_json::from_str(content)
            .map_err(|e| BoilerError::config(format!("Failed to parse settings: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        fs::write(path.as_ref(), content).map_err(|e| {
            BoilerError::config(format!(
                "Failed to write settings {}: {e}",
                path.as_ref().display()
            ))
        })
    }

    /// Reject settings the control loop cannot run with
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_READ_INTERVAL_S).contains(&self.read_interval_s) {
            return Err(BoilerError::config(format!(
                "readIntervalS must be between 1 and {MAX_READ_INTERVAL_S}, got {}",
                self.read_interval_s
            )));
        }

        for (key, limit) in [
            ("lastRecordsToGetMeanInner", self.last_records_to_get_mean_inner),
            ("lastRecordsToGetMeanOuter", self.last_records_to_get_mean_outer),
            ("lastRecordsToGetMeanWater", self.last_records_to_get_mean_water),
        ] {
            if limit == 0 {
                return Err(BoilerError::config(format!("{key} must be at least 1")));
            }
        }

        if self.minimum_allowed_water_t > self.maximum_allowed_water_t {
            return Err(BoilerError::config(format!(
                "minimumAllowedWaterT ({}) is above maximumAllowedWaterT ({})",
                self.minimum_allowed_water_t, self.maximum_allowed_water_t
            )));
        }

        if self.calc_expected_temperature_formula.trim().is_empty() {
            return Err(BoilerError::config(
                "calcExpectedTemperatureFormula must not be empty",
            ));
        }

        Ok(())
    }

    /// Interval between control cycles
    pub fn read_interval(&self) -> Duration {
        Duration::from_secs(self.read_interval_s)
    }

    /// History length configured for a role
    pub fn history_limit(&self, purpose: Purpose) -> usize {
        match purpose {
            Purpose::Inner => self.last_records_to_get_mean_inner,
            Purpose::Outer => self.last_records_to_get_mean_outer,
            Purpose::Water => self.last_records_to_get_mean_water,
            Purpose::None => 0,
        }
    }

    /// Numeric settings the formula may reference as `config.<name>`
    pub fn formula_fields(&self) -> [(&'static str, f64); 6] {
        [
            ("referenceInnerT", self.reference_inner_t),
            ("toleranceDownT", self.tolerance_down_t),
            ("minimumAllowedWaterT", self.minimum_allowed_water_t),
            ("maximumAllowedWaterT", self.maximum_allowed_water_t),
            ("criticalAlarmWaterT", self.critical_alarm_water_t),
            ("minOuterToStartBoilingT", self.min_outer_to_start_boiling_t),
        ]
    }
}
