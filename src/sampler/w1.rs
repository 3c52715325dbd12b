//! 1-Wire temperature sensors exposed by the Linux `w1_therm` driver
//!
//! Each DS18B20 shows up as `<base>/<uid>/w1_slave` with two lines:
//!
//! ```text
//! 72 01 4b 46 7f ff 0e 10 57 : crc=57 YES
//! 72 01 4b 46 7f ff 0e 10 57 t=23125
//! ```
//!
//! The first line ends in `YES` when the CRC matched; the second carries the
//! temperature in milli-degrees Celsius.

use super::{Sampler, SensorReading};
use crate::error::{BoilerError, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Default sysfs directory of the 1-Wire bus
pub const DEFAULT_W1_DIR: &str = "/sys/bus/w1/devices";

static TEMPERATURE_LINE: Lazy<Result<Regex>> =
    Lazy::new(|| Regex::new(r" t=(-?\d+)$").map_err(BoilerError::from));

/// Sampler reading DS18B20 sensors from sysfs
#[derive(Debug, Clone)]
pub struct OneWireSampler {
    base_dir: PathBuf,
    crc_retries: u32,
    retry_delay: Duration,
    family_prefix: String,
}

impl OneWireSampler {
    pub fn new<P: Into<PathBuf>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.into(),
            crc_retries: 3,
            retry_delay: Duration::from_millis(50),
            family_prefix: "28-".to_string(),
        }
    }

    /// Set how many times a read with a failed CRC is repeated
    pub fn with_crc_retries(mut self, retries: u32) -> Self {
        self.crc_retries = retries;
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// List sensor identifiers on the bus, sorted ascending
    pub async fn discover(&self) -> Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.base_dir).await.map_err(|e| {
            BoilerError::sensor_read(
                "*",
                format!("cannot list {}: {e}", self.base_dir.display()),
            )
        })?;

        let mut uids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(&self.family_prefix) {
                uids.push(name);
            }
        }
        uids.sort();

        debug!("Discovered {} 1-Wire sensors", uids.len());
        Ok(uids)
    }

    /// Read every discovered sensor; a failing sensor does not affect the others
    pub async fn read_all(&self) -> Result<Vec<SensorReading>> {
        let uids = self.discover().await?;
        let reads = uids.iter().map(|uid| self.read_raw(uid));
        let values = futures::future::join_all(reads).await;

        Ok(uids
            .into_iter()
            .zip(values)
            .map(|(uid, value)| {
                if let Err(e) = &value {
                    warn!("Sensor {} unreadable: {}", uid, e);
                }
                SensorReading { uid, value }
            })
            .collect())
    }

    fn slave_path(&self, uid: &str) -> PathBuf {
        self.base_dir.join(uid).join("w1_slave")
    }
}

impl Default for OneWireSampler {
    fn default() -> Self {
        Self::new(DEFAULT_W1_DIR)
    }
}

/// Outcome of parsing one `w1_slave` dump
#[derive(Debug, PartialEq)]
enum SlaveOutput {
    Celsius(f64),
    CrcMismatch,
}

fn parse_slave_output(contents: &str) -> std::result::Result<SlaveOutput, String> {
    let mut lines = contents.lines();
    let status = lines.next().unwrap_or_default().trim_end();
    if !status.ends_with("YES") {
        return Ok(SlaveOutput::CrcMismatch);
    }

    let data = lines.next().unwrap_or_default().trim_end();
    let pattern = TEMPERATURE_LINE.as_ref().map_err(|e| e.to_string())?;
    let millis = pattern
        .captures(data)
        .and_then(|caps| caps.get(1))
        .ok_or_else(|| format!("malformed w1_slave output: {data:?}"))?
        .as_str()
        .parse::<i64>()
        .map_err(|e| format!("malformed w1_slave output: {e}"))?;

    let celsius = millis as f64 / 1000.0;
    if !celsius.is_finite() {
        return Err(format!("malformed w1_slave output: {celsius} is not finite"));
    }
    Ok(SlaveOutput::Celsius(celsius))
}

#[async_trait]
impl Sampler for OneWireSampler {
    async fn read_raw(&self, uid: &str) -> Result<f64> {
        let path = self.slave_path(uid);

        for attempt in 0..=self.crc_retries {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| BoilerError::sensor_read(uid, e.to_string()))?;

            match parse_slave_output(&contents).map_err(|e| BoilerError::sensor_read(uid, e))? {
                SlaveOutput::Celsius(value) => return Ok(value),
                SlaveOutput::CrcMismatch => {
                    debug!("CRC mismatch on {} (attempt {})", uid, attempt + 1);
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }

        Err(BoilerError::sensor_read(
            uid,
            format!("CRC check failed {} times", self.crc_retries + 1),
        ))
    }
}
