//! sentineld - weapon detection alert daemon
//!
//! This daemon:
//! 1. Loads configuration (`SENTINEL_CONFIG` plus environment overrides)
//! 2. Loads the detector once and shares it across streams
//! 3. Serves the loopback control API that starts and stops streams
//! 4. On Ctrl-C, stops every stream and waits for the workers to exit

use anyhow::{anyhow, Result};
use std::sync::{mpsc, Arc};

use weapon_sentinel::{ApiServer, SentinelConfig, StreamStatus, StreamSupervisor};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = SentinelConfig::load()?;
    log::info!(
        "sentineld {} starting: detector={} alerts={}",
        env!("CARGO_PKG_VERSION"),
        config.detector.backend,
        config.alert_dir.display()
    );

    let supervisor = Arc::new(StreamSupervisor::new(config.pipeline()?));
    let api_handle = ApiServer::new(config.api_config(), supervisor.clone()).spawn()?;
    log::info!("control api listening on {}", api_handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!("sentineld waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping streams...");
    let stopped = supervisor.stop_all()?;
    api_handle.stop()?;

    for report in supervisor.join_all()? {
        match &report.status {
            StreamStatus::Failed(reason) => {
                log::warn!("stream {} failed: {}", report.id, reason)
            }
            status => log::info!(
                "stream {} ended {:?}: {} frames, {} alerts",
                report.id,
                status,
                report.frames_processed,
                report.alerts.len()
            ),
        }
    }
    log::info!("sentineld stopped ({} stream(s) cancelled)", stopped);
    Ok(())
}
