//! sentinel_watch - watch a single webcam or camera stream interactively
//!
//! Runs one stream with the interactive preset. When the source stops
//! delivering frames it is released and reopened up to `--retry` times.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;

use weapon_sentinel::engine::EngineOverrides;
use weapon_sentinel::{
    Preset, ReadFailurePolicy, SentinelConfig, SourceSpec, StreamStatus, StreamSupervisor,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Watch one camera and raise stabilized weapon alerts"
)]
struct Args {
    /// Device index (0 = default webcam), device node, file path or URL.
    #[arg(long, env = "SENTINEL_SOURCE", default_value = "0")]
    source: String,

    /// Network camera URL; takes precedence over --source.
    #[arg(long, env = "SENTINEL_RTSP_URL")]
    rtsp: Option<String>,

    /// Detector confidence floor.
    #[arg(long)]
    conf: Option<f32>,

    /// Reconnect attempts after the source stops delivering frames.
    #[arg(long, default_value_t = 5)]
    retry: u32,

    /// Seconds between reconnect attempts.
    #[arg(long = "retry-wait", default_value_t = 2.0)]
    retry_wait: f64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if !args.retry_wait.is_finite() || args.retry_wait < 0.0 {
        return Err(anyhow!("--retry-wait must be a non-negative number of seconds"));
    }
    let config = SentinelConfig::load()?;
    let source = match args.rtsp.as_deref() {
        Some(url) => SourceSpec::Network(url.to_string()),
        None => SourceSpec::parse(&args.source)?,
    };

    let mut engine_config = config.engine_config(Preset::Interactive).clone();
    if let Some(conf) = args.conf {
        engine_config = engine_config.with_overrides(&EngineOverrides {
            conf_soft: Some(conf),
            ..EngineOverrides::default()
        });
    }
    engine_config.validate()?;

    let request = config
        .stream_request(source, Preset::Interactive)
        .with_config(engine_config)
        .with_policy(ReadFailurePolicy::Reconnect {
            attempts: args.retry,
            delay: Duration::from_secs_f64(args.retry_wait),
        });

    let supervisor = Arc::new(StreamSupervisor::new(config.pipeline()?));
    let id = supervisor.start(request)?;

    let stopper = supervisor.clone();
    ctrlc::set_handler(move || {
        let _ = stopper.stop_all();
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!("watching {} (Ctrl-C to stop)", id);
    let report = supervisor.join(&id)?;
    log::info!(
        "stream {} ended {:?}: {} frames, {} alerts",
        report.id,
        report.status,
        report.frames_processed,
        report.alerts.len()
    );
    match report.status {
        StreamStatus::Failed(reason) => Err(anyhow!("stream failed: {}", reason)),
        StreamStatus::Disconnected => Err(anyhow!("camera disconnected")),
        _ => Ok(()),
    }
}
