//! Entry point for the **i3pm** daemon.
//!
//! Everything runs on one current-thread tokio runtime: the compositor
//! event source and the JSON-RPC server are tasks that feed the daemon loop
//! over channels, and SIGINT / SIGTERM stop all of them.

use i3pm::config::{config_dir, Config};
use i3pm::daemon::{supervise, Backoff, Daemon};
use i3pm::environ::ProcEnvironResolver;
use i3pm::ipc::IpcServer;
use i3pm::launcher::ProcessLauncher;
use i3pm::persist::StoreError;
use i3pm::sway::{SwayCompositor, SwayError, SwayEventSource};
use log::{error, info};
use std::path::PathBuf;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::{mpsc, watch};

/// Compositor events buffered between the event source and the loop.
const EVENT_QUEUE: usize = 256;

/// Requests buffered between connections and the loop.
const REQUEST_QUEUE: usize = 64;

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error("cannot start runtime: {0}")]
    Runtime(std::io::Error),
    #[error("cannot find the compositor: {0}")]
    Compositor(#[from] SwayError),
    #[error("cannot open data directory: {0}")]
    Store(#[from] StoreError),
    #[error("cannot listen on {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot install signal handlers: {0}")]
    Signals(std::io::Error),
}

/// Try to load the config from `$XDG_CONFIG_HOME/i3pm/config.json`,
/// falling back to compiled-in defaults.
fn load_config() -> Config {
    let path = config_dir().join("config.json");
    match Config::load(&path) {
        Ok(cfg) => {
            info!("loaded config from {}", path.display());
            cfg
        }
        Err(e) => {
            info!("no config file ({}), using defaults", e);
            Config::default()
        }
    }
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), StartupError> {
    let config = load_config();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(StartupError::Runtime)?;
    runtime.block_on(serve(config))
}

async fn serve(config: Config) -> Result<(), StartupError> {
    let sway = SwayCompositor::from_env()?;
    let socket_path = config.socket_path();
    let ipc_config = config.ipc.clone();

    let mut daemon = Daemon::open(
        config,
        sway.clone(),
        ProcEnvironResolver::default(),
        ProcessLauncher::new(),
    )?;
    let server = IpcServer::bind(&socket_path, &ipc_config)
        .await
        .map_err(|source| StartupError::Bind {
            path: socket_path.clone(),
            source,
        })?;
    let terminate = signal(SignalKind::terminate()).map_err(StartupError::Signals)?;
    let interrupt = signal(SignalKind::interrupt()).map_err(StartupError::Signals)?;

    let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE);
    let (incoming_tx, incoming_rx) = mpsc::channel(REQUEST_QUEUE);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let source = tokio::spawn(supervise(
        SwayEventSource::new(sway),
        event_tx,
        Backoff::default(),
    ));
    let server = tokio::spawn(server.run(incoming_tx, shutdown_rx.clone()));
    tokio::spawn(stop_on_signal(terminate, interrupt, shutdown_tx));

    info!("i3pm {} running", env!("CARGO_PKG_VERSION"));
    daemon.run(event_rx, incoming_rx, shutdown_rx).await;

    source.abort();
    if let Err(e) = server.await {
        error!("server task failed: {}", e);
    }
    info!("i3pm stopped");
    Ok(())
}

async fn stop_on_signal(mut terminate: Signal, mut interrupt: Signal, shutdown: watch::Sender<bool>) {
    tokio::select! {
        _ = terminate.recv() => info!("received SIGTERM, shutting down"),
        _ = interrupt.recv() => info!("received SIGINT, shutting down"),
    }
    let _ = shutdown.send(true);
}
