//! Boiler control - Main Entry Point
//!
//! `run` drives the burner relay from the control loop, `sensors` lists what
//! is on the 1-Wire bus and `check` dry-runs the configured formula.

use boiler_control::{
    actuator::{Actuator, ActuatorDriver, DryRunActuator, SysfsGpioActuator, DEFAULT_GPIO_DIR},
    config::ControllerConfig,
    control::check_config,
    logging::{init_logging, LogConfig},
    records::RecordLog,
    sampler::w1::DEFAULT_W1_DIR,
    BoilerController, BoilerError, ConfigProvider, EventBus, FileConfigProvider, OneWireSampler,
    Result, Scheduler, SchedulerHandle,
};

use clap::{Parser, Subcommand};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Boiler control configuration
#[derive(Parser, Debug)]
#[command(name = "boiler-control")]
#[command(about = "Temperature control loop for a 1-Wire boiler installation")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Settings file
    #[arg(long, global = true, env = "BOILER_CONFIG", default_value = "config.json")]
    config: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the control loop
    Run {
        /// 1-Wire devices directory
        #[arg(long, env = "BOILER_W1_DIR", default_value = DEFAULT_W1_DIR)]
        w1_dir: PathBuf,

        /// sysfs GPIO class directory
        #[arg(long, env = "BOILER_GPIO_DIR", default_value = DEFAULT_GPIO_DIR)]
        gpio_dir: PathBuf,

        /// Log decisions instead of driving the relay
        #[arg(long)]
        dry_run: bool,

        /// Append cycle records to this JSON-lines file
        #[arg(long)]
        records: Option<PathBuf>,
    },
    /// Discover and read every sensor on the bus
    Sensors {
        /// 1-Wire devices directory
        #[arg(long, env = "BOILER_W1_DIR", default_value = DEFAULT_W1_DIR)]
        w1_dir: PathBuf,
    },
    /// Validate the settings and evaluate the formula at the reference temperature
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(LogConfig::from_env().with_debug(cli.debug))?;

    match cli.command {
        Command::Run {
            w1_dir,
            gpio_dir,
            dry_run,
            records,
        } => run(cli.config, w1_dir, gpio_dir, dry_run, records).await,
        Command::Sensors { w1_dir } => sensors(cli.config, w1_dir).await,
        Command::Check => check(cli.config),
    }
}

async fn run(
    config_path: PathBuf,
    w1_dir: PathBuf,
    gpio_dir: PathBuf,
    dry_run: bool,
    records: Option<PathBuf>,
) -> Result<()> {
    info!(
        "Starting boiler control v{}",
        env!("CARGO_PKG_VERSION")
    );

    let provider = Arc::new(FileConfigProvider::open(&config_path).await?);
    let config = provider.snapshot().await;

    let actuator: Arc<dyn Actuator> = if dry_run {
        info!("Dry run, burner relay is not driven");
        Arc::new(DryRunActuator::new())
    } else {
        Arc::new(SysfsGpioActuator::open(&gpio_dir, config.control_burner_on_off_pin).await?)
    };

    let bus = EventBus::default();
    let consumers = CancellationToken::new();

    let driver = tokio::spawn(ActuatorDriver::new(actuator).run(bus.subscribe(), consumers.clone()));
    let recorder = records.map(|path| {
        info!(path = %path.display(), "Recording cycle results");
        tokio::spawn(RecordLog::new(path, provider.clone()).run(bus.subscribe(), consumers.clone()))
    });

    let sampler = Arc::new(OneWireSampler::new(w1_dir));
    let controller = BoilerController::new(provider.clone(), sampler, bus.clone());
    let scheduler = Scheduler::new(provider).spawn(controller);

    supervise(wait_for_shutdown(), scheduler, driver, recorder, consumers).await
}

/// Run until a shutdown signal arrives or the relay driver exits on its own.
/// Either way the control loop is stopped before the consumers.
async fn supervise<S>(
    shutdown: S,
    scheduler: SchedulerHandle,
    mut driver: JoinHandle<Result<()>>,
    recorder: Option<JoinHandle<()>>,
    consumers: CancellationToken,
) -> Result<()>
where
    S: Future<Output = Result<()>>,
{
    let driver_exit = tokio::select! {
        signal = shutdown => {
            if let Err(e) = signal {
                error!("Failed to wait for shutdown signal: {e}");
            }
            info!("Shutting down...");
            None
        }
        joined = &mut driver => {
            error!("Burner relay driver stopped, shutting down the control loop");
            Some(joined)
        }
    };

    // The in-flight cycle completes before the relay is released.
    scheduler.stop().await?;
    consumers.cancel();

    if let Some(recorder) = recorder {
        if let Err(e) = recorder.await {
            warn!("Record log task failed: {e}");
        }
    }

    let task_failed = |e: tokio::task::JoinError| {
        BoilerError::internal(format!("Actuator task failed: {e}"))
    };
    match driver_exit {
        None => driver.await.map_err(task_failed)?,
        Some(joined) => {
            joined.map_err(task_failed)??;
            Err(BoilerError::actuator(
                "Burner relay driver exited before shutdown",
            ))
        }
    }
}

async fn sensors(config_path: PathBuf, w1_dir: PathBuf) -> Result<()> {
    let sampler = OneWireSampler::new(w1_dir);
    let config = ControllerConfig::load_from_file(&config_path).ok();

    for reading in sampler.read_all().await? {
        let settings = config
            .as_ref()
            .and_then(|config| config.sensors.get(&reading.uid));
        let purpose = settings.map_or("-", |s| s.purpose.as_str());

        match reading.value {
            Ok(raw) => {
                let offset = settings.map_or(0.0, |s| s.offset_t);
                println!(
                    "{}  {:<6} raw {:>8.3}  calibrated {:>8.3}",
                    reading.uid,
                    purpose,
                    raw,
                    raw + offset
                );
            }
            Err(e) => println!("{}  {:<6} error: {e}", reading.uid, purpose),
        }
    }

    Ok(())
}

fn check(config_path: PathBuf) -> Result<()> {
    let config = ControllerConfig::load_from_file(&config_path)?;
    let (tokens, expected_t) = check_config(&config)?;

    println!("formula: {}", config.calc_expected_temperature_formula);
    for (name, value) in tokens.iter() {
        println!("  {name} = {value}");
    }
    println!("expectedT = {expected_t}");

    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    Ok(())
}
