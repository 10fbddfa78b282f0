//! sentinel_scan - scan a video file and print its alert report as JSON

use anyhow::{anyhow, Result};
use clap::Parser;

use weapon_sentinel::{Preset, SentinelConfig, SourceSpec, StreamStatus, StreamSupervisor};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Run file-playback detection over a video and report alerts"
)]
struct Args {
    /// Video file to scan.
    path: String,

    /// Pretty-print the JSON report.
    #[arg(long)]
    pretty: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = SentinelConfig::load()?;
    let request = config.stream_request(SourceSpec::File(args.path.clone()), Preset::FilePlayback);
    let supervisor = StreamSupervisor::new(config.pipeline()?);
    let id = supervisor.start(request)?;
    let report = supervisor.join(&id)?;

    let json = if args.pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    println!("{}", json);

    if let StreamStatus::Failed(reason) = &report.status {
        return Err(anyhow!("scan of {} failed: {}", args.path, reason));
    }
    Ok(())
}
