//! Bottle sorter - actuation sequencing service
//!
//! Runs the sort worker on a dedicated thread against the Raspberry Pi GPIO
//! backend (feature `rpi`) or the simulated rig.
//!
//! Module structure:
//! - `domain/` - Core types (Slot, SortCycle, SorterState)
//! - `io/` - External interfaces (GPIO, sensors, actuators, camera, ledger)
//! - `services/` - Sequencers and the orchestrator
//! - `infra/` - Infrastructure (Config, Metrics, Clock)

use anyhow::Context;
use clap::Parser;
use sorter::domain::types::UserId;
use sorter::infra::{Config, Metrics, StopSignal};
use sorter::io::camera::{ScriptedClassifier, SimCamera};
use sorter::io::ledger::LedgerClient;
use sorter::io::prometheus::{start_metrics_server, StatusSources};
use sorter::io::{
    actuators, create_event_channel, create_ledger_worker, open_backend, Hardware, MemoryLedger,
    PointsLedger, SorterEvent,
};
use sorter::services::{Collaborators, Orchestrator, SessionHandle};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Bottle sorter - conveyor, pusher and points sequencing
#[derive(Parser, Debug)]
#[command(name = "sorter", version, about)]
struct Args {
    /// Path to TOML configuration file (else CONFIG_FILE, else config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Log in by Thai mobile number through the points backend
    #[arg(long)]
    phone: Option<String>,

    /// Log in directly with a backend user id
    #[arg(long, conflicts_with = "phone")]
    user_id: Option<String>,

    /// Run against the simulated rig even when GPIO is available
    #[arg(long)]
    simulate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default: INFO, use RUST_LOG=debug for per-poll visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), git_hash = env!("GIT_HASH"), "sorter starting");

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(&[]),
    };

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        ledger_enabled = config.ledger().enabled,
        ledger_url = %config.ledger().base_url,
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());
    let session = SessionHandle::new();
    let stop = StopSignal::new();

    let backend = open_backend(&config, args.simulate);
    let gpio = backend.gpio();
    let hw = Hardware::new(gpio.clone(), backend.clock(config.simulation().pace), stop.clone(), &config);
    info!(backend = hw.backend(), simulated = backend.is_simulated(), "hardware_ready");

    // Ledger: async worker behind a bounded queue, or in-memory when disabled
    let mut ledger_task = None;
    let (client, ledger): (Option<LedgerClient>, Box<dyn PointsLedger>) = if config.ledger().enabled {
        let client = LedgerClient::new(config.ledger()).context("building points ledger client")?;
        let (queue, worker) = create_ledger_worker(client.clone(), metrics.clone(), config.ledger().queue_size);
        ledger_task = Some(tokio::spawn(worker.run()));
        (Some(client), Box::new(queue))
    } else {
        info!("ledger_disabled_using_memory");
        (None, Box::new(MemoryLedger::new()))
    };

    login(&args, client.as_ref(), &session).await;

    let (sink, mut event_rx) = create_event_channel();
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                SorterEvent::ItemSorted { slot, points } => info!(slot = %slot, points, "item_sorted"),
                SorterEvent::State { state } => debug!(state = state.as_str(), "state_event"),
                SorterEvent::Status { .. } => {}
            }
        }
    });

    // Camera and classifier are external collaborators; the service ships
    // with the simulated pair
    let collaborators = Collaborators {
        camera: Box::new(SimCamera::connected()),
        classifier: Box::new(ScriptedClassifier::cycling(config.simulation().labels.clone())),
        ledger,
        sink: Box::new(sink),
    };
    let mut orchestrator = Orchestrator::new(&config, hw, collaborators, session.clone(), metrics.clone());
    let state_rx = orchestrator.subscribe();

    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let sources = StatusSources {
            metrics: metrics.clone(),
            site_id: Arc::new(config.site_id().to_string()),
            state: state_rx,
            session: session.clone(),
        };
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = start_metrics_server(prometheus_port, sources, prom_shutdown).await {
                error!(error = %e, "Prometheus metrics server error");
            }
        });
    }

    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval.max(1)));
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    let worker = std::thread::Builder::new()
        .name("sorter".to_string())
        .spawn(move || orchestrator.run())
        .context("spawning sort worker thread")?;
    info!("sort_worker_started");

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutdown_signal_received");
    stop.stop();
    let _ = shutdown_tx.send(true);

    match tokio::task::spawn_blocking(move || worker.join()).await {
        Ok(Ok(())) => {}
        Ok(Err(_)) => error!("sort_worker_panicked"),
        Err(e) => error!(error = %e, "sort_worker_join_failed"),
    }

    // The worker de-energizes on exit; repeat in case it panicked
    if let Err(e) = actuators::all_off(&gpio, config.pins()) {
        error!(error = %e, "final_all_off_failed");
    }

    // Queue sender dropped with the orchestrator; let in-flight points drain
    if let Some(task) = ledger_task {
        if tokio::time::timeout(Duration::from_secs(5), task).await.is_err() {
            warn!("ledger_worker_drain_timeout");
        }
    }

    session.logout();
    info!("sorter shutdown complete");
    Ok(())
}

/// Start a session from the command line, if one was requested
async fn login(args: &Args, client: Option<&LedgerClient>, session: &SessionHandle) {
    if let Some(phone) = &args.phone {
        let Some(client) = client else {
            warn!("phone_login_requires_ledger");
            return;
        };
        match client.login_phone(phone).await {
            Ok(resp) => {
                session.login(UserId(resp.user.id), resp.user.username, resp.points);
            }
            Err(e) => warn!(error = %e, "phone_login_failed"),
        }
    } else if let Some(id) = &args.user_id {
        let user = UserId(id.clone());
        let opening_points = match client {
            Some(client) => client.get_points(&user).await.unwrap_or_else(|e| {
                warn!(user = %user, error = %e, "opening_balance_unavailable");
                0
            }),
            None => 0,
        };
        session.login(user, None, opening_points);
    } else {
        info!("no_login_requested");
    }
}
