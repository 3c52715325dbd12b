//! Sensor sampling
//!
//! The control loop only needs one calibrated reading per sensor per cycle.
//! How the reading is acquired is up to the [`Sampler`] implementation.

pub mod w1;

pub use w1::OneWireSampler;

use crate::error::Result;
use async_trait::async_trait;

/// Source of temperature readings
#[async_trait]
pub trait Sampler: Send + Sync {
    /// Read the uncalibrated value of one sensor, in degrees Celsius
    async fn read_raw(&self, uid: &str) -> Result<f64>;

    /// Read one sensor, adding its calibration offset when `apply_offset` is set
    async fn sample(&self, uid: &str, offset_t: f64, apply_offset: bool) -> Result<f64> {
        let raw = self.read_raw(uid).await?;
        Ok(if apply_offset { raw + offset_t } else { raw })
    }
}

/// One reading produced by [`OneWireSampler::read_all`]
#[derive(Debug)]
pub struct SensorReading {
    pub uid: String,
    pub value: Result<f64>,
}
