//! Common test utilities
//!
//! A fake `w1_therm` sysfs tree backed by a temporary directory, plus
//! helpers to build controllers on top of it.

#![allow(dead_code)]

use boiler_control::config::{ControllerConfig, Purpose, SensorSettings};
use boiler_control::{BoilerController, EventBus, OneWireSampler, SharedConfig};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

pub const INNER: &str = "28-0000000000a1";
pub const OUTER: &str = "28-0000000000b1";
pub const WATER: &str = "28-0000000000c1";

/// Temporary 1-Wire devices directory
pub struct FakeBus {
    dir: TempDir,
}

impl FakeBus {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Publish a valid reading for `uid`
    pub fn set(&self, uid: &str, celsius: f64) {
        let millis = (celsius * 1000.0).round() as i64;
        self.write(
            uid,
            &format!(
                "72 01 4b 46 7f ff 0e 10 57 : crc=57 YES\n72 01 4b 46 7f ff 0e 10 57 t={millis}\n"
            ),
        );
    }

    /// Make every read of `uid` fail its CRC check
    pub fn corrupt(&self, uid: &str) {
        self.write(
            uid,
            "72 01 4b 46 7f ff 0e 10 57 : crc=00 NO\n72 01 4b 46 7f ff 0e 10 57 t=0\n",
        );
    }

    /// Unplug `uid`
    pub fn remove(&self, uid: &str) {
        let _ = std::fs::remove_dir_all(self.path().join(uid));
    }

    pub fn sampler(&self) -> OneWireSampler {
        OneWireSampler::new(self.path()).with_crc_retries(0)
    }

    fn write(&self, uid: &str, contents: &str) {
        let sensor_dir = self.path().join(uid);
        std::fs::create_dir_all(&sensor_dir).expect("sensor dir");
        std::fs::write(sensor_dir.join("w1_slave"), contents).expect("w1_slave");
    }
}

/// Configuration with one sensor per role and the default formula
pub fn three_sensor_config() -> ControllerConfig {
    let mut config = ControllerConfig::default();
    config.sensors.clear();
    config
        .sensors
        .insert(INNER.to_string(), SensorSettings::new(Purpose::Inner, 0.0));
    config
        .sensors
        .insert(OUTER.to_string(), SensorSettings::new(Purpose::Outer, 0.0));
    config
        .sensors
        .insert(WATER.to_string(), SensorSettings::new(Purpose::Water, 0.0));
    config
}

/// Controller reading `bus` under `config`, with a handle to edit the config
pub fn controller(
    bus: &FakeBus,
    config: ControllerConfig,
    events: EventBus,
) -> (BoilerController, Arc<SharedConfig>) {
    let shared = Arc::new(SharedConfig::new(config));
    let controller = BoilerController::new(shared.clone(), Arc::new(bus.sampler()), events);
    (controller, shared)
}
