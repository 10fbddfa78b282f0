//! Frame ingestion sources.
//!
//! This module provides the sources a stream can watch:
//! - Local video files (real decode behind feature: ingest-ffmpeg)
//! - Network streams such as RTSP cameras (feature: ingest-ffmpeg)
//! - Local webcams through V4L2 (feature: ingest-v4l2)
//! - Synthetic `stub://` sources for tests and demos, accepted by every kind
//!
//! Every source implements [`FrameSource`]. A source reports a missing frame
//! as `Ok(None)`; what that means (end of file, dropped packet, lost camera)
//! is decided by the stream's read-failure policy, not by the source.

#[cfg(feature = "ingest-ffmpeg")]
mod ffmpeg;
pub mod file;
pub mod network;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod synthetic;
pub mod webcam;

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::fmt;

use crate::frame::Frame;

pub use file::FileSource;
pub use network::NetworkSource;
pub use synthetic::SyntheticSource;
pub use webcam::WebcamSource;

/// A capture handle that yields decoded frames in order.
///
/// Capture handles are not required to be `Send`; a stream worker builds its
/// source on its own thread.
pub trait FrameSource {
    /// Acquire the capture handle. Called once before the first frame and
    /// again on every reconnect attempt.
    fn open(&mut self) -> Result<()>;

    /// Next frame, or `None` when no frame could be read.
    ///
    /// Frame indices are 1-based and keep counting across reconnects.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Release the capture handle. Safe to call more than once.
    fn release(&mut self);

    /// Frames delivered over the lifetime of the source.
    fn frames_read(&self) -> u64;
}

/// Kind of video source a stream watches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    File,
    Device,
    Network,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::File => "file",
            SourceKind::Device => "device",
            SourceKind::Network => "network",
        }
    }
}

/// Identifier of a video source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceSpec {
    /// Local video file path.
    File(String),
    /// Capture device node such as `/dev/video0`.
    Device(String),
    /// Network stream URL.
    Network(String),
}

impl SourceSpec {
    /// Classify a source identifier.
    ///
    /// All-digit strings are device indices, anything with a URL scheme is a
    /// network stream, everything else is a file path.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(anyhow!("source identifier is empty"));
        }
        if raw.chars().all(|c| c.is_ascii_digit()) {
            return Self::device(raw);
        }
        if raw.contains("://") {
            return Ok(SourceSpec::Network(raw.to_string()));
        }
        Ok(SourceSpec::File(raw.to_string()))
    }

    /// Device source from an index (`0`), a device node or a `stub://` URL.
    pub fn device(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(anyhow!("device identifier is empty"));
        }
        if raw.chars().all(|c| c.is_ascii_digit()) {
            let index: u32 = raw
                .parse()
                .map_err(|_| anyhow!("device index {} out of range", raw))?;
            return Ok(SourceSpec::Device(format!("/dev/video{}", index)));
        }
        Ok(SourceSpec::Device(raw.to_string()))
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            SourceSpec::File(_) => SourceKind::File,
            SourceSpec::Device(_) => SourceKind::Device,
            SourceSpec::Network(_) => SourceKind::Network,
        }
    }

    pub fn location(&self) -> &str {
        match self {
            SourceSpec::File(s) | SourceSpec::Device(s) | SourceSpec::Network(s) => s,
        }
    }

    pub fn is_synthetic(&self) -> bool {
        self.location().starts_with(synthetic::SCHEME)
    }
}

/// Network locations are shown without credentials.
impl fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceSpec::Network(url) => write!(f, "network:{}", network::redact_url(url)),
            other => write!(f, "{}:{}", other.kind().as_str(), other.location()),
        }
    }
}

/// Build an (unopened) frame source for the identifier.
pub fn open_source(spec: &SourceSpec) -> Result<Box<dyn FrameSource>> {
    Ok(match spec {
        SourceSpec::File(path) => Box::new(FileSource::new(path)?),
        SourceSpec::Device(device) => Box::new(WebcamSource::new(device)?),
        SourceSpec::Network(url) => Box::new(NetworkSource::new(url)?),
    })
}
