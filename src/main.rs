//! # Manifold controller entry point
//!
//! Runs the room → flow → valve cascade against the simulated manifold, with the heating hub
//! client attached when a hub url is configured.
//!
//! ## Threads
//! - **Driver (this thread):** releases a control tick every second.
//! - **Control:** max OS priority, consumes the newest tick, writes the valve.
//! - **Hub poll:** connection checks every 30 s, zone polls every 5 s.
//! - **Hub protocol:** pumps socket events through the conversation queue.
//! - **tokio runtime (2 workers):** websocket I/O only.
//! - **Reporter:** periodic metrics summary and the optional run limit.
//!
//! `RUST_LOG=info` (or `debug`) controls verbosity. Ctrl-C stops cleanly.

use std::{
    path::PathBuf,
    sync::{Arc, atomic::Ordering},
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use manifold_control::{
    app::ControllerContext,
    clock::SystemClock,
    config::{ConfigStore, ConfigValue, keys},
    control::task::CONTROL_PERIOD,
    neohub::{Connector, WsConnector},
    sim::{PlantParams, SimulatedManifold},
    utils::metrics::summary_line,
};

#[derive(Parser, Debug)]
#[command(name = "manifold_control", about = "Underfloor heating mixing-valve controller")]
struct Args {
    /// Flat JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Hub websocket url, e.g. wss://192.168.1.50:4243
    #[arg(long)]
    hub_url: Option<String>,

    /// Hub API token
    #[arg(long)]
    token: Option<String>,

    /// Stop after this many seconds (runs until Ctrl-C otherwise)
    #[arg(long)]
    run_secs: Option<u64>,

    /// Seconds between metrics summaries
    #[arg(long, default_value_t = 30)]
    summary_secs: u64,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    info!("=== MANIFOLD CONTROL START ===");

    let mut config = match &args.config {
        Some(path) => ConfigStore::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ConfigStore::new(),
    };
    if let Some(url) = args.hub_url {
        config.set(keys::HUB_URL, ConfigValue::Text(url));
    }
    if let Some(token) = args.token {
        config.set(keys::HUB_TOKEN, ConfigValue::Text(token));
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("hub-io")
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    let plant = SimulatedManifold::new(PlantParams::default());
    let connector: Arc<dyn Connector> = Arc::new(WsConnector::new(runtime.handle().clone()));
    let ctx = Arc::new(ControllerContext::new(
        config,
        Arc::new(SystemClock::new()),
        Box::new(plant.clone()),
        Box::new(plant),
        Some(connector),
    ));
    ctx.start();

    {
        let running = ctx.running();
        runtime.spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("[Main] Ctrl-C received, stopping");
                running.store(false, Ordering::SeqCst);
            }
        });
    }

    let reporter = {
        let ctx = Arc::clone(&ctx);
        let run_limit = args.run_secs.map(Duration::from_secs);
        let every = Duration::from_secs(args.summary_secs.max(1));
        thread::Builder::new()
            .name("reporter".into())
            .spawn(move || {
                let started = Instant::now();
                let mut last = Instant::now();
                while ctx.is_running() {
                    thread::sleep(Duration::from_millis(200));
                    if run_limit.is_some_and(|limit| started.elapsed() >= limit) {
                        info!("[Main] run limit reached");
                        ctx.stop();
                        break;
                    }
                    if last.elapsed() >= every {
                        last = Instant::now();
                        info!("[Metrics] {}", summary_line(&ctx.metrics_snapshot()));
                    }
                }
            })
            .context("spawning reporter thread")?
    };

    ctx.run_driver(CONTROL_PERIOD);

    let _ = reporter.join();
    ctx.shutdown();
    info!("[Metrics] final: {}", summary_line(&ctx.metrics_snapshot()));
    info!("=== MANIFOLD CONTROL FINISHED ===");
    Ok(())
}
