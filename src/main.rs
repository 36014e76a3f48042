use std::{path::PathBuf, sync::Arc};

use structopt::StructOpt;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, info_span, trace, warn, Instrument};
use tracing_subscriber::fmt::time::LocalTime;

#[macro_use]
extern crate quick_error;

mod alert;
mod camera;
mod config;
mod gate;
mod pipeline;
mod vision;

#[cfg(test)]
mod test_support;

use alert::{AlertDispatcher, DispatchError};
use camera::{CameraError, FfmpegCamera, FrameSource};
use config::{Config, ConfigSystem, LogFormat};
use gate::SystemClock;
use pipeline::CaptureLoop;

// Events waiting for the dispatch worker. The cooldown keeps this from filling up in practice.
const EVENT_QUEUE_DEPTH: usize = 16;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "eyeris",
    about = "Camera motion detection with snapshot, caption, speech and email alerts."
)]
struct CliArgs {
    #[structopt(
        parse(from_os_str),
        short = "c",
        long = "config",
        default_value = "config.toml",
        help = "Path to configuration file. Every key can be overridden with EYERIS_<SECTION>__<KEY>.",
        env = "EYERIS_CONFIG"
    )]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    let args = CliArgs::from_args();
    let cfg = match config::load_config(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(2);
        }
    };
    if let Err(e) = init_tracing(&cfg.system) {
        eprintln!("{}", e);
        std::process::exit(2);
    }

    info!(instance = %cfg.general.instance_name, "Eyeris motion alerts running");
    trace!("Config: {:?}", cfg);

    if let Err(e) = run(cfg).await {
        error!("{}", e);
        std::process::exit(1);
    }
    info!("Eyeris stopped");
}

fn init_tracing(system: &ConfigSystem) -> Result<(), AppError> {
    let filter = tracing_subscriber::EnvFilter::try_new(&system.log_level)?;
    let builder = tracing_subscriber::fmt()
        // Filter from user
        .with_env_filter(filter)
        .with_timer(LocalTime::rfc_3339());
    match system.log_format {
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.finish())?,
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
    }
    Ok(())
}

async fn run(cfg: Config) -> Result<(), AppError> {
    let save_directory = cfg.general.save_directory.clone();
    tokio::fs::create_dir_all(&save_directory)
        .await
        .map_err(|e| AppError::SaveDirectory(save_directory, e))?;

    let dispatcher = AlertDispatcher::from_config(&cfg)?;
    let mut camera = FfmpegCamera::open(cfg.camera.clone()).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    let interrupt = shutdown_tx.clone();
    tokio::task::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, shutting down");
                let _ = interrupt.send(true);
            }
            Err(e) => warn!("Unable to listen for interrupts: {}", e),
        }
    });

    let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
    let worker = tokio::task::spawn(
        pipeline::run_dispatcher(event_rx, dispatcher, shutdown_tx).instrument(info_span!("dispatch")),
    );

    let mut capture = CaptureLoop::new(&cfg, SystemClock);
    // The sender is dropped when the loop returns, which lets the worker drain and finish
    let captured = capture.run(&mut camera, event_tx, shutdown_rx).await;
    camera.close().await;
    info!(stats = ?capture.stats(), "Capture stopped");

    let dispatched = worker.await?;
    info!(events = dispatched.as_ref().copied().unwrap_or_default(), "Dispatch stopped");
    dispatched?;
    captured?;
    Ok(())
}

quick_error! {
    #[derive(Debug)]
    pub enum AppError {
        LogFilter(error: tracing_subscriber::filter::ParseError) {
            display("Invalid system.log_level: {}", error)
            from()
            source(error)
        }
        Subscriber(error: tracing::subscriber::SetGlobalDefaultError) {
            display("Unable to install log subscriber: {}", error)
            from()
            source(error)
        }
        SaveDirectory(path: PathBuf, error: std::io::Error) {
            display("Unable to create {}: {}", path.display(), error)
            source(error)
        }
        Camera(error: CameraError) {
            display("{}", error)
            from()
            source(error)
        }
        Dispatch(error: DispatchError) {
            display("{}", error)
            from()
            source(error)
        }
        Worker(error: tokio::task::JoinError) {
            display("Dispatch worker crashed: {}", error)
            from()
            source(error)
        }
    }
}
