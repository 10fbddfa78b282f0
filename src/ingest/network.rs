//! Network stream frame source (RTSP/RTMP/HTTP/UDP cameras).
//!
//! Uses FFmpeg for real decode, with a synthetic fallback for `stub://` URLs.
//! The source keeps no frames; each decoded frame is handed to the stream
//! worker and dropped after detection.

use anyhow::{anyhow, Context, Result};
use url::Url;

#[cfg(feature = "ingest-ffmpeg")]
use super::ffmpeg::FfmpegDecoder;
use super::synthetic::{SyntheticSource, SCHEME};
use super::FrameSource;
use crate::frame::Frame;

const SUPPORTED_SCHEMES: &[&str] = &["rtsp", "rtsps", "rtmp", "http", "https", "udp", "tcp", "srt"];

/// Network stream frame source.
pub struct NetworkSource {
    url: String,
    backend: NetworkBackend,
}

enum NetworkBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "ingest-ffmpeg")]
    Ffmpeg(FfmpegStream),
}

impl NetworkSource {
    pub fn new(url: &str) -> Result<Self> {
        let backend = if url.starts_with(SCHEME) {
            NetworkBackend::Synthetic(SyntheticSource::new(url)?)
        } else {
            validate_stream_url(url)?;
            #[cfg(feature = "ingest-ffmpeg")]
            {
                NetworkBackend::Ffmpeg(FfmpegStream::new(url))
            }
            #[cfg(not(feature = "ingest-ffmpeg"))]
            {
                return Err(anyhow!("network streams require the ingest-ffmpeg feature"));
            }
        };
        Ok(Self {
            url: url.to_string(),
            backend,
        })
    }

    /// Stream URL with any credentials removed, for logs and listings.
    pub fn display_url(&self) -> String {
        redact_url(&self.url)
    }
}

impl FrameSource for NetworkSource {
    fn open(&mut self) -> Result<()> {
        match &mut self.backend {
            NetworkBackend::Synthetic(source) => source.open(),
            #[cfg(feature = "ingest-ffmpeg")]
            NetworkBackend::Ffmpeg(source) => source.open(),
        }
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            NetworkBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "ingest-ffmpeg")]
            NetworkBackend::Ffmpeg(source) => source.next_frame(),
        }
    }

    fn release(&mut self) {
        match &mut self.backend {
            NetworkBackend::Synthetic(source) => source.release(),
            #[cfg(feature = "ingest-ffmpeg")]
            NetworkBackend::Ffmpeg(source) => source.release(),
        }
    }

    fn frames_read(&self) -> u64 {
        match &self.backend {
            NetworkBackend::Synthetic(source) => source.frames_read(),
            #[cfg(feature = "ingest-ffmpeg")]
            NetworkBackend::Ffmpeg(source) => source.frame_count,
        }
    }
}

/// Reject identifiers FFmpeg should not be pointed at.
pub fn validate_stream_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).with_context(|| format!("invalid stream URL '{}'", redact_url(raw)))?;
    if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
        return Err(anyhow!(
            "unsupported stream scheme '{}' (expected one of {})",
            url.scheme(),
            SUPPORTED_SCHEMES.join(", ")
        ));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(anyhow!("stream URL '{}' has no host", redact_url(raw)));
    }
    Ok(url)
}

/// Strip user info from a URL so camera passwords never reach the log.
pub fn redact_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) if !url.username().is_empty() || url.password().is_some() => {
            let _ = url.set_username("");
            let _ = url.set_password(None);
            url.to_string()
        }
        Ok(_) => raw.to_string(),
        Err(_) => "<invalid url>".to_string(),
    }
}

// ----------------------------------------------------------------------------
// Production network source using FFmpeg
// ----------------------------------------------------------------------------

#[cfg(feature = "ingest-ffmpeg")]
struct FfmpegStream {
    url: String,
    decoder: Option<FfmpegDecoder>,
    frame_count: u64,
}

#[cfg(feature = "ingest-ffmpeg")]
impl FfmpegStream {
    fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            decoder: None,
            frame_count: 0,
        }
    }

    fn open(&mut self) -> Result<()> {
        self.decoder = Some(FfmpegDecoder::open(&self.url)?);
        log::info!("NetworkSource: connected to {} (ffmpeg)", redact_url(&self.url));
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(decoder) = self.decoder.as_mut() else {
            return Ok(None);
        };
        match decoder.next_rgb() {
            Ok(Some((pixels, width, height))) => {
                self.frame_count += 1;
                Frame::new(pixels, width, height, self.frame_count).map(Some)
            }
            Ok(None) => Ok(None),
            Err(err) => {
                log::warn!(
                    "NetworkSource: decode error on {}: {:#}",
                    redact_url(&self.url),
                    err
                );
                Ok(None)
            }
        }
    }

    fn release(&mut self) {
        self.decoder = None;
    }
}
