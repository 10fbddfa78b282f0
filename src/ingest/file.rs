//! Local file frame source.
//!
//! `FileSource` plays a local video file from start to end. It never fetches
//! remote URLs; network streams go through [`NetworkSource`](super::NetworkSource).

use anyhow::{anyhow, Result};

#[cfg(feature = "ingest-ffmpeg")]
use super::ffmpeg::FfmpegDecoder;
use super::synthetic::{SyntheticSource, SCHEME};
use super::FrameSource;
use crate::frame::Frame;

/// Local file frame source.
pub struct FileSource {
    path: String,
    backend: FileBackend,
}

enum FileBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "ingest-ffmpeg")]
    Ffmpeg(FfmpegFile),
}

impl FileSource {
    pub fn new(path: &str) -> Result<Self> {
        if !is_local_file_path(path) {
            return Err(anyhow!(
                "file ingestion only supports local paths (no URL schemes)"
            ));
        }
        let backend = if path.starts_with(SCHEME) {
            FileBackend::Synthetic(SyntheticSource::new(path)?)
        } else {
            #[cfg(feature = "ingest-ffmpeg")]
            {
                FileBackend::Ffmpeg(FfmpegFile::new(path))
            }
            #[cfg(not(feature = "ingest-ffmpeg"))]
            {
                return Err(anyhow!("file ingestion requires the ingest-ffmpeg feature"));
            }
        };
        Ok(Self {
            path: path.to_string(),
            backend,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl FrameSource for FileSource {
    fn open(&mut self) -> Result<()> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.open(),
            #[cfg(feature = "ingest-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.open(),
        }
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "ingest-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.next_frame(),
        }
    }

    fn release(&mut self) {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.release(),
            #[cfg(feature = "ingest-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.release(),
        }
    }

    fn frames_read(&self) -> u64 {
        match &self.backend {
            FileBackend::Synthetic(source) => source.frames_read(),
            #[cfg(feature = "ingest-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.frame_count,
        }
    }
}

// ----------------------------------------------------------------------------
// Production file source using FFmpeg
// ----------------------------------------------------------------------------

#[cfg(feature = "ingest-ffmpeg")]
struct FfmpegFile {
    path: String,
    decoder: Option<FfmpegDecoder>,
    frame_count: u64,
}

#[cfg(feature = "ingest-ffmpeg")]
impl FfmpegFile {
    fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            decoder: None,
            frame_count: 0,
        }
    }

    fn open(&mut self) -> Result<()> {
        if !std::path::Path::new(&self.path).is_file() {
            return Err(anyhow!("video file '{}' does not exist", self.path));
        }
        self.decoder = Some(FfmpegDecoder::open(&self.path)?);
        log::info!("FileSource: opened {} (ffmpeg)", self.path);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(decoder) = self.decoder.as_mut() else {
            return Ok(None);
        };
        match decoder.next_rgb()? {
            Some((pixels, width, height)) => {
                self.frame_count += 1;
                Frame::new(pixels, width, height, self.frame_count).map(Some)
            }
            None => Ok(None),
        }
    }

    fn release(&mut self) {
        self.decoder = None;
    }
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with(SCHEME) {
        return true;
    }
    !path.contains("://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_urls_and_empty_paths() {
        assert!(FileSource::new("").is_err());
        assert!(FileSource::new("http://example.com/clip.mp4").is_err());
    }

    #[test]
    fn synthetic_file_ends() -> Result<()> {
        let mut source = FileSource::new("stub://clip?frames=3&width=4&height=4")?;
        source.open()?;
        let mut seen = 0;
        while source.next_frame()?.is_some() {
            seen += 1;
        }
        assert_eq!(seen, 3);
        assert_eq!(source.frames_read(), 3);
        assert_eq!(source.path(), "stub://clip?frames=3&width=4&height=4");
        Ok(())
    }
}
