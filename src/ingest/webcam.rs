//! Webcam frame source.
//!
//! `WebcamSource` captures from a local V4L2 device node (e.g. `/dev/video0`)
//! when built with the `ingest-v4l2` feature, with a synthetic fallback for
//! `stub://` paths. Captured buffers are converted to RGB24 in memory.

use anyhow::{anyhow, Result};
#[cfg(feature = "ingest-v4l2")]
use anyhow::Context;
#[cfg(feature = "ingest-v4l2")]
use ouroboros::self_referencing;

#[cfg(feature = "ingest-v4l2")]
use super::normalize::{normalize_to_rgb, PixelFormat};
use super::synthetic::{SyntheticSource, SCHEME};
use super::FrameSource;
use crate::frame::Frame;

/// Preferred capture size requested from the device.
pub const DEFAULT_CAPTURE_WIDTH: u32 = 640;
pub const DEFAULT_CAPTURE_HEIGHT: u32 = 480;

/// Webcam frame source.
pub struct WebcamSource {
    device: String,
    backend: WebcamBackend,
}

enum WebcamBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "ingest-v4l2")]
    Device(V4l2Device),
}

impl WebcamSource {
    pub fn new(device: &str) -> Result<Self> {
        let backend = if device.starts_with(SCHEME) {
            WebcamBackend::Synthetic(SyntheticSource::new(device)?)
        } else {
            if !device.starts_with("/dev/") {
                return Err(anyhow!("'{}' is not a device node", device));
            }
            #[cfg(feature = "ingest-v4l2")]
            {
                WebcamBackend::Device(V4l2Device::new(device))
            }
            #[cfg(not(feature = "ingest-v4l2"))]
            {
                return Err(anyhow!("webcam capture requires the ingest-v4l2 feature"));
            }
        };
        Ok(Self {
            device: device.to_string(),
            backend,
        })
    }

    pub fn device(&self) -> &str {
        &self.device
    }
}

impl FrameSource for WebcamSource {
    fn open(&mut self) -> Result<()> {
        match &mut self.backend {
            WebcamBackend::Synthetic(source) => source.open(),
            #[cfg(feature = "ingest-v4l2")]
            WebcamBackend::Device(source) => source.open(),
        }
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            WebcamBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "ingest-v4l2")]
            WebcamBackend::Device(source) => source.next_frame(),
        }
    }

    fn release(&mut self) {
        match &mut self.backend {
            WebcamBackend::Synthetic(source) => source.release(),
            #[cfg(feature = "ingest-v4l2")]
            WebcamBackend::Device(source) => source.state = None,
        }
    }

    fn frames_read(&self) -> u64 {
        match &self.backend {
            WebcamBackend::Synthetic(source) => source.frames_read(),
            #[cfg(feature = "ingest-v4l2")]
            WebcamBackend::Device(source) => source.frame_count,
        }
    }
}

// ----------------------------------------------------------------------------
// Production webcam source using libv4l
// ----------------------------------------------------------------------------

#[cfg(feature = "ingest-v4l2")]
struct V4l2Device {
    device: String,
    state: Option<V4l2State>,
    frame_count: u64,
    active_width: u32,
    active_height: u32,
    active_format: PixelFormat,
}

#[cfg(feature = "ingest-v4l2")]
#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

#[cfg(feature = "ingest-v4l2")]
impl V4l2Device {
    fn new(device: &str) -> Self {
        Self {
            device: device.to_string(),
            state: None,
            frame_count: 0,
            active_width: DEFAULT_CAPTURE_WIDTH,
            active_height: DEFAULT_CAPTURE_HEIGHT,
            active_format: PixelFormat::Yuyv,
        }
    }

    fn open(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let device = v4l::Device::with_path(&self.device)
            .with_context(|| format!("open v4l2 device {}", self.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = DEFAULT_CAPTURE_WIDTH;
        format.height = DEFAULT_CAPTURE_HEIGHT;
        format.fourcc = v4l::FourCC::new(b"YUYV");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "WebcamSource: failed to set format on {}: {}",
                    self.device,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        self.active_format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            anyhow!(
                "device {} only offers unsupported pixel format {}",
                self.device,
                format.fourcc
            )
        })?;
        self.active_width = format.width;
        self.active_height = format.height;

        let state = V4l2StateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "WebcamSource: connected to {} ({}x{} {:?})",
            self.device,
            self.active_width,
            self.active_height,
            self.active_format
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        use v4l::io::traits::CaptureStream;

        let Some(state) = self.state.as_mut() else {
            return Ok(None);
        };
        let captured = state.with_mut(|fields| {
            fields
                .stream
                .next()
                .map(|(buf, meta)| buf[..(meta.bytesused as usize).min(buf.len())].to_vec())
        });
        let raw = match captured {
            Ok(raw) => raw,
            Err(err) => {
                log::warn!("WebcamSource: capture failed on {}: {}", self.device, err);
                return Ok(None);
            }
        };

        let pixels = normalize_to_rgb(
            &raw,
            self.active_width,
            self.active_height,
            self.active_format,
        )?;
        self.frame_count += 1;
        Frame::new(pixels, self.active_width, self.active_height, self.frame_count).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_webcam_produces_frames() -> Result<()> {
        let mut source = WebcamSource::new("stub://desk?width=8&height=6")?;
        source.open()?;
        let frame = source.next_frame()?.ok_or_else(|| anyhow!("no frame"))?;
        assert_eq!((frame.width, frame.height), (8, 6));
        assert_eq!(source.device(), "stub://desk?width=8&height=6");
        Ok(())
    }

    #[test]
    fn rejects_non_device_paths() {
        assert!(WebcamSource::new("videos/clip.mp4").is_err());
    }
}
