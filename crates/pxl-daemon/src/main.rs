//! proxlock entry point.
//!
//! Thin on purpose: load and validate config, build collaborators, run the
//! control loop until Ctrl-C / SIGTERM, log the run summary.

use clap::Parser;
use pxl_config::{
    load_layered_yaml, report_unused_keys, resolve_config_paths, ProxlockConfig, UnusedKeyPolicy,
    CONFIG_PATH_ENV,
};
use pxl_daemon::{build_collaborators, ControlLoop, LoopConfig};
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "proxlock",
    version,
    about = "Lock the screen when a BLE beacon leaves, unlock when it returns"
)]
struct Args {
    /// YAML config file; repeat to layer overrides. Falls back to $CONFIG_PATH.
    #[arg(long = "config", value_name = "PATH")]
    config: Vec<String>,

    /// Load and validate config, print its hash and canonical JSON, then exit.
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Silent if the file does not exist.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let args = Args::parse();
    let env_paths = std::env::var(CONFIG_PATH_ENV).ok();
    let paths = resolve_config_paths(&args.config, env_paths.as_deref())?;

    let loaded = load_layered_yaml(&paths)?;
    let unused = report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Warn)?;
    for pointer in &unused.unused_leaf_pointers {
        warn!(pointer = %pointer, "unused config key");
    }
    let cfg = ProxlockConfig::from_loaded(&loaded)?;

    let th = &cfg.service.thresholds;
    info!(
        config_hash = %loaded.config_hash,
        paths = ?paths,
        address = %cfg.service.address,
        period_ms = cfg.service.period.as_millis() as u64,
        min_rssi = th.min_rssi(),
        min_dwell_ms = th.min_dwell().as_millis() as u64,
        max_rssi = th.max_rssi(),
        max_dwell_ms = th.max_dwell().as_millis() as u64,
        "config loaded"
    );

    if args.check_config {
        println!("config_hash={}", loaded.config_hash);
        println!("{}", loaded.canonical_json);
        return Ok(());
    }

    let collab = build_collaborators(&cfg)?;
    let control = ControlLoop::new(
        LoopConfig::from_config(&cfg),
        collab.source,
        collab.observer,
        collab.actuator,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let summary = control.run(shutdown_rx).await?;
    info!(summary = %summary.to_json(), "proxlock stopped");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable; Ctrl-C only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
