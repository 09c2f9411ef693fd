use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use pingguard::{
    actors::{
        connectivity::{ConnectivityHandle, ConnectivitySettings},
        dispatcher::{DispatchSettings, DispatcherHandle},
        supervisor::{ProcessRegistry, Supervisor},
        target_monitor::MonitorContext,
    },
    checks::default_cascade,
    config::read_config_file,
    hooks::StatusLogger,
    notify,
    probe::CommandSpawner,
    queue::AlertQueue,
    shared::SharedState,
    util::get_debug,
};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,

    /// Verbose logging, including why alerts were suppressed
    #[arg(long)]
    debug: bool,
}

fn init(debug: bool) {
    let level = if debug {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    };

    let filter = filter::Targets::new().with_targets(vec![("pingguard", level)]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init(args.debug || get_debug());
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)?;

    let program = config.probe.resolve_program()?;
    debug!("using probe program {}", program.display());

    std::fs::create_dir_all(&config.state_dir).with_context(|| {
        format!(
            "failed to create state directory {}",
            config.state_dir.display()
        )
    })?;

    let shared = Arc::new(SharedState::persistent(&config.state_dir)?);

    let queue = AlertQueue::open(&config.state_dir).context("failed to open alert queue")?;
    let dispatcher = DispatcherHandle::spawn(
        notify::from_config(&config.alerts),
        queue,
        DispatchSettings::from(&config.alerts),
    );

    let connectivity = ConnectivityHandle::spawn(
        default_cascade(&config.connectivity, program.clone()),
        shared.clone(),
        Some(dispatcher.clone()),
        ConnectivitySettings::from(&config.connectivity),
    );

    let ctx = MonitorContext {
        spawner: Arc::new(CommandSpawner::new(program)),
        shared,
        connectivity: connectivity.clone(),
        dispatcher: dispatcher.clone(),
        hooks: Arc::new(StatusLogger),
        registry: ProcessRegistry::new(),
        max_respawn_backoff: Duration::from_secs(config.probe.max_respawn_backoff),
    };

    let mut supervisor = Supervisor::start(&config.targets, ctx, Some(config.state_dir.as_path()))?;

    wait_for_shutdown_signal().await?;

    let report = supervisor.shutdown().await;
    if !report.clean {
        warn!("some probe processes could not be stopped");
    }

    if let Err(e) = connectivity.shutdown().await {
        debug!("connectivity detector already stopped: {e:#}");
    }
    if let Err(e) = dispatcher.shutdown().await {
        debug!("dispatcher already stopped: {e:#}");
    }

    info!("pingguard stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    let mut terminate = signal(SignalKind::terminate()).context("failed to listen for SIGTERM")?;
    let mut hangup = signal(SignalKind::hangup()).context("failed to listen for SIGHUP")?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for ctrl-c")?;
            info!("interrupted, shutting down");
        }
        _ = terminate.recv() => info!("terminated, shutting down"),
        _ = hangup.recv() => info!("hangup, shutting down"),
    }

    Ok(())
}
