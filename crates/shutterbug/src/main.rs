mod describe;
mod facade;
mod store;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use describe::{Describer, NullDescriber};
use facade::CameraFacade;
use obscura::sim::{SimHost, SimMotion};
use obscura::{CameraHost, MotionSource, OrientationSensor};
use shutterconf::ShutterConfig;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use store::{FsPhotoStore, PhotoStore};
use tracing::{info, warn};

/// Shutterbug - orientation-aware still capture
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file path (takes precedence over ./shutterbug.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use the simulated camera and motion backends
    #[arg(long, global = true)]
    simulate: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Take one photo and save it
    Snap {
        /// Device id to bind (defaults to config, then host default)
        #[arg(short, long)]
        device: Option<String>,

        /// Per-request capture deadline in seconds
        #[arg(long, value_parser = parse_seconds)]
        deadline: Option<Duration>,

        /// Output directory (defaults to the configured photo dir)
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Print a one-line description of the photo
        #[arg(long)]
        describe: bool,
    },

    /// List camera devices
    Devices {
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Watch orientation changes until Ctrl-C
    Monitor {
        /// Polling interval in seconds
        #[arg(long, value_parser = parse_seconds)]
        interval: Option<Duration>,
    },
}

/// Positive, finite seconds for `--deadline` and `--interval`.
fn parse_seconds(s: &str) -> Result<Duration, String> {
    let secs: f64 = s.parse().map_err(|_| "not a number".to_string())?;
    if secs <= 0.0 {
        return Err("seconds must be positive".to_string());
    }
    Duration::try_from_secs_f64(secs).map_err(|_| "seconds out of range".to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let config = ShutterConfig::load_from(cli.config.as_deref())
        .context("Failed to load configuration")?;

    let (host, motion) = build_backends(cli.simulate)?;

    // Default to one capture, same as running `shutterbug snap`
    let command = cli.command.unwrap_or(Commands::Snap {
        device: None,
        deadline: None,
        out: None,
        describe: false,
    });

    match command {
        Commands::Snap {
            device,
            deadline,
            out,
            describe,
        } => cmd_snap(host, motion, config, device, deadline, out, describe).await,
        Commands::Devices { json } => cmd_devices(host, json).await,
        Commands::Monitor { interval } => cmd_monitor(motion, config, interval).await,
    }
}

/// Pick the hardware backends. Only the simulated ones exist so far;
/// platform integrations plug in here.
fn build_backends(simulate: bool) -> Result<(Arc<dyn CameraHost>, Arc<dyn MotionSource>)> {
    if !simulate {
        anyhow::bail!("no platform camera backend is built in yet; run with --simulate");
    }
    let host: Arc<dyn CameraHost> = Arc::new(SimHost::with_default_devices());
    // Held upright, as a phone in the hand
    let motion: Arc<dyn MotionSource> = Arc::new(SimMotion::holding(0.0, -9.81, 0.0));
    Ok((host, motion))
}

async fn cmd_snap(
    host: Arc<dyn CameraHost>,
    motion: Arc<dyn MotionSource>,
    mut config: ShutterConfig,
    device: Option<String>,
    deadline: Option<Duration>,
    out: Option<PathBuf>,
    describe: bool,
) -> Result<()> {
    if let Some(dir) = out {
        config.store.photo_dir = dir;
    }

    let facade = CameraFacade::new(host, motion, config.clone());

    let photo = match facade.snap(device.as_deref(), deadline).await {
        Ok(photo) => photo,
        Err(e) => {
            warn!(error = %e, "capture failed");
            eprintln!("{}", facade::user_message(&e));
            facade.shutdown().await;
            std::process::exit(1);
        }
    };

    let store = FsPhotoStore::new(config.store.photo_dir.clone());
    let path = store.save(&photo).await.context("Failed to save photo")?;
    println!("{}", path.display());

    if describe {
        match NullDescriber.describe(&photo).await {
            Ok(line) => println!("{line}"),
            Err(e) => warn!(error = %e, "describer failed"),
        }
    }

    let stats = facade.stats();
    info!(
        requested = stats.requested,
        ok = stats.resolved_ok,
        "capture stats"
    );
    facade.shutdown().await;
    Ok(())
}

async fn cmd_devices(host: Arc<dyn CameraHost>, json: bool) -> Result<()> {
    let devices = host.list_devices().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    if devices.is_empty() {
        println!("no camera devices");
        return Ok(());
    }
    println!("{:<12} {:<8} LABEL", "ID", "FACING");
    for device in devices {
        println!("{:<12} {:<8} {}", device.id, device.facing, device.label);
    }
    Ok(())
}

async fn cmd_monitor(
    motion: Arc<dyn MotionSource>,
    config: ShutterConfig,
    interval: Option<Duration>,
) -> Result<()> {
    let sensor = OrientationSensor::new(motion);
    let interval = interval.unwrap_or_else(|| config.sensor.interval());

    let mut changes = sensor.subscribe();
    sensor.start(interval);
    println!("watching orientation (Ctrl-C to stop)");

    loop {
        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let orientation = *changes.borrow_and_update();
                println!(
                    "{} {}",
                    chrono::Local::now().format("%H:%M:%S%.3f"),
                    orientation
                );
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        }
    }

    sensor.stop();
    Ok(())
}
