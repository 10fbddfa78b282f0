//! Synthetic `stub://` frame source.
//!
//! `stub://<name>?frames=N&width=W&height=H&opens=M`
//!
//! - `frames`: frames delivered per connection before reads come back empty
//!   (default: unlimited)
//! - `width`/`height`: frame size (default 640x480)
//! - `opens`: number of successful opens, after which `open` fails
//!   (default: unlimited)

use anyhow::{anyhow, Context, Result};
use url::Url;

use super::FrameSource;
use crate::frame::Frame;

pub(crate) const SCHEME: &str = "stub://";

/// Deterministic frame generator used in place of a real capture device.
pub struct SyntheticSource {
    name: String,
    frames_per_open: Option<u64>,
    opens_allowed: Option<u32>,
    width: u32,
    height: u32,
    opens: u32,
    connected: bool,
    frames_this_open: u64,
    frame_count: u64,
    /// Simulated "scene" state so consecutive frames differ.
    scene_state: u8,
}

impl SyntheticSource {
    pub fn new(location: &str) -> Result<Self> {
        let url = Url::parse(location)
            .with_context(|| format!("invalid synthetic source '{}'", location))?;
        if url.scheme() != "stub" {
            return Err(anyhow!("'{}' is not a stub:// source", location));
        }
        let mut source = Self {
            name: url.host_str().unwrap_or("stub").to_string(),
            frames_per_open: None,
            opens_allowed: None,
            width: 640,
            height: 480,
            opens: 0,
            connected: false,
            frames_this_open: 0,
            frame_count: 0,
            scene_state: 0,
        };
        for (key, value) in url.query_pairs() {
            let parse_err = || anyhow!("invalid {}='{}' in '{}'", key, value, location);
            match key.as_ref() {
                "frames" => source.frames_per_open = Some(value.parse().map_err(|_| parse_err())?),
                "opens" => source.opens_allowed = Some(value.parse().map_err(|_| parse_err())?),
                "width" => source.width = value.parse().map_err(|_| parse_err())?,
                "height" => source.height = value.parse().map_err(|_| parse_err())?,
                other => return Err(anyhow!("unknown stub parameter '{}'", other)),
            }
        }
        if source.width == 0 || source.height == 0 {
            return Err(anyhow!("synthetic frame size must be non-zero"));
        }
        Ok(source)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn generate_synthetic_pixels(&mut self) -> Vec<u8> {
        let pixel_count = (self.width as usize) * (self.height as usize) * 3;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn open(&mut self) -> Result<()> {
        if let Some(allowed) = self.opens_allowed {
            if self.opens >= allowed {
                return Err(anyhow!("synthetic source '{}' is unavailable", self.name));
            }
        }
        self.opens += 1;
        self.connected = true;
        self.frames_this_open = 0;
        log::info!(
            "SyntheticSource: connected to {} ({}x{})",
            self.name,
            self.width,
            self.height
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.connected {
            return Ok(None);
        }
        if let Some(limit) = self.frames_per_open {
            if self.frames_this_open >= limit {
                return Ok(None);
            }
        }
        self.frames_this_open += 1;
        self.frame_count += 1;
        let pixels = self.generate_synthetic_pixels();
        Frame::new(pixels, self.width, self.height, self.frame_count).map(Some)
    }

    fn release(&mut self) {
        self.connected = false;
    }

    fn frames_read(&self) -> u64 {
        self.frame_count
    }
}
