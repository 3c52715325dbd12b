//! Burner relay output
//!
//! The relay follows the decision of every `data` event. Error events leave
//! the output where it is. The output is forced OFF when the driver starts
//! and again when it stops.

use crate::error::{BoilerError, Result};
use crate::events::ControlEvent;
use crate::log_structured_error;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default sysfs GPIO class directory
pub const DEFAULT_GPIO_DIR: &str = "/sys/class/gpio";

/// A binary output
#[async_trait]
pub trait Actuator: Send + Sync {
    /// Drive the output ON (`true`) or OFF (`false`)
    async fn set_output(&self, on: bool) -> Result<()>;

    /// Turn the output OFF and release it
    async fn shutdown(&self) -> Result<()> {
        self.set_output(false).await
    }
}

/// GPIO pin driven through the sysfs interface
#[derive(Debug, Clone)]
pub struct SysfsGpioActuator {
    base_dir: PathBuf,
    pin: u32,
}

impl SysfsGpioActuator {
    /// Export `pin` if needed and configure it as an output
    pub async fn open<P: Into<PathBuf>>(base_dir: P, pin: u32) -> Result<Self> {
        let actuator = Self {
            base_dir: base_dir.into(),
            pin,
        };

        if !tokio::fs::try_exists(actuator.pin_dir()).await? {
            debug!(pin, "Exporting GPIO pin");
            actuator.write(&actuator.base_dir.join("export"), &pin.to_string()).await?;
        }
        actuator
            .write(&actuator.pin_dir().join("direction"), "out")
            .await?;

        info!(pin, base_dir = %actuator.base_dir.display(), "GPIO output ready");
        Ok(actuator)
    }

    pub fn pin(&self) -> u32 {
        self.pin
    }

    fn pin_dir(&self) -> PathBuf {
        self.base_dir.join(format!("gpio{}", self.pin))
    }

    async fn write(&self, path: &Path, value: &str) -> Result<()> {
        tokio::fs::write(path, value).await.map_err(|e| {
            BoilerError::actuator(format!(
                "GPIO {}: failed to write {}: {e}",
                self.pin,
                path.display()
            ))
        })
    }
}

#[async_trait]
impl Actuator for SysfsGpioActuator {
    async fn set_output(&self, on: bool) -> Result<()> {
        self.write(&self.pin_dir().join("value"), if on { "1" } else { "0" })
            .await
    }

    async fn shutdown(&self) -> Result<()> {
        self.set_output(false).await?;
        self.write(&self.base_dir.join("unexport"), &self.pin.to_string())
            .await
    }
}

/// Output that only logs, for hosts without GPIO
#[derive(Debug, Default)]
pub struct DryRunActuator {
    on: AtomicBool,
    writes: Mutex<Vec<bool>>,
}

impl DryRunActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_on(&self) -> bool {
        self.on.load(Ordering::SeqCst)
    }

    /// Every value written so far, oldest first
    pub async fn writes(&self) -> Vec<bool> {
        self.writes.lock().await.clone()
    }
}

#[async_trait]
impl Actuator for DryRunActuator {
    async fn set_output(&self, on: bool) -> Result<()> {
        if self.on.swap(on, Ordering::SeqCst) != on {
            info!(on, "Dry-run burner output changed");
        }
        self.writes.lock().await.push(on);
        Ok(())
    }
}

/// Applies `data` events to an [`Actuator`]
pub struct ActuatorDriver {
    actuator: Arc<dyn Actuator>,
}

impl ActuatorDriver {
    pub fn new(actuator: Arc<dyn Actuator>) -> Self {
        Self { actuator }
    }

    /// Follow events until cancelled or the bus closes
    pub async fn run(
        self,
        mut events: broadcast::Receiver<ControlEvent>,
        cancel: CancellationToken,
    ) -> Result<()> {
        self.actuator.set_output(false).await?;

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };

            match event {
                Ok(ControlEvent::Data(data)) => {
                    if let Err(e) = self.actuator.set_output(data.should_start_boiling).await {
                        log_structured_error!(e, "actuator", "set_output");
                    }
                }
                Ok(ControlEvent::Error(_)) => debug!("Keeping output after failed cycle"),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Actuator driver lagged behind control events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }

        info!("Turning burner output off");
        self.actuator.shutdown().await
    }
}
