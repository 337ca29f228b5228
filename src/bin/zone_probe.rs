//! Connects to a heating hub, loads its zone list, polls every zone once and prints the
//! cached records. Useful for checking the url/token pair before running the controller.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::info;

use manifold_control::{
    clock::{Clock, SystemClock},
    neohub::{NeohubManager, NeohubSettings, WsConnector, manager::DEFAULT_BATCH_SIZE},
};

#[derive(Parser, Debug)]
#[command(name = "zone_probe", about = "Poll all zones of a heating hub once")]
struct Args {
    /// Hub websocket url, e.g. wss://192.168.1.50:4243
    #[arg(long)]
    hub_url: String,

    /// Hub API token
    #[arg(long)]
    token: String,

    #[arg(long, default_value_t = 5_000)]
    timeout_ms: u64,

    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    let clock = Arc::new(SystemClock::new());
    let settings = NeohubSettings {
        url: args.hub_url.clone(),
        token: args.token,
        command_timeout: std::time::Duration::from_millis(args.timeout_ms),
        connect_timeout_ms: args.timeout_ms,
        monitored_zones: Vec::new(),
    };
    let manager = NeohubManager::new(settings, Arc::new(WsConnector::new(runtime.handle().clone())), clock.clone());

    if !manager.ensure_connection(args.timeout_ms) {
        bail!("could not connect to {}", args.hub_url);
    }
    let count = manager.load_zone_names().context("GET_ZONES")?;
    info!("[Probe] {} zones", count);

    let names: Vec<String> = manager.zones().into_iter().map(|z| z.name).collect();
    let summary = manager.poll_zones(&names, args.batch_size);
    info!("[Probe] {:?}", summary);

    let now = clock.utc_now();
    println!("{:<24} {:>4} {:>7} {:>7} {:>7} {:>6} {:>6}  state", "zone", "id", "room", "set", "floor", "online", "demand");
    for z in manager.zones() {
        let fmt = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{v:.1}"));
        let state = if z.is_dead(now) {
            "dead"
        } else if z.is_aged(now) {
            "aged"
        } else {
            "fresh"
        };
        println!(
            "{:<24} {:>4} {:>7} {:>7} {:>7} {:>6} {:>6}  {}",
            z.name,
            z.id.map_or_else(|| "-".to_string(), |id| id.to_string()),
            fmt(z.room_temperature),
            fmt(z.room_setpoint),
            fmt(z.floor_temperature),
            z.online,
            z.demand,
            state
        );
    }

    manager.shutdown();
    Ok(())
}
