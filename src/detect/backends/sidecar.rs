use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{suppress_overlaps, DetectParams, DetectionBox};
use crate::frame::Frame;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SidecarLine {
    frame: u64,
    #[serde(default)]
    boxes: Vec<DetectionBox>,
}

/// Backend fed by detections an external detector process already wrote.
///
/// The sidecar is JSON lines, one object per frame:
///
/// ```text
/// {"frame": 1, "boxes": [{"class_id": 0, "confidence": 0.71, "x1": 10, "y1": 20, "x2": 140, "y2": 80}]}
/// ```
///
/// Frames missing from the file have no detections. Blank lines and lines
/// starting with `#` are skipped.
pub struct SidecarBackend {
    frames: HashMap<u64, Vec<DetectionBox>>,
}

impl SidecarBackend {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .with_context(|| format!("failed to open detection sidecar {}", path.display()))?;
        Self::from_reader(std::io::BufReader::new(file))
            .with_context(|| format!("invalid detection sidecar {}", path.display()))
    }

    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut frames: HashMap<u64, Vec<DetectionBox>> = HashMap::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let parsed: SidecarLine = serde_json::from_str(trimmed)
                .map_err(|e| anyhow!("line {}: {}", line_no + 1, e))?;
            frames.entry(parsed.frame).or_default().extend(parsed.boxes);
        }
        log::info!("SidecarBackend: loaded detections for {} frames", frames.len());
        Ok(Self { frames })
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

impl DetectorBackend for SidecarBackend {
    fn name(&self) -> &'static str {
        "sidecar"
    }

    fn detect(&mut self, frame: &Frame, params: &DetectParams) -> Result<Vec<DetectionBox>> {
        let boxes = self.frames.get(&frame.index).cloned().unwrap_or_default();
        Ok(suppress_overlaps(boxes, params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIDECAR: &str = r#"
# produced by detector v3
{"frame": 1, "boxes": [{"class_id": 0, "confidence": 0.71, "x1": 10, "y1": 20, "x2": 140, "y2": 80}]}
{"frame": 3, "boxes": []}
{"frame": 1, "boxes": [{"class_id": 2, "confidence": 0.50, "x1": 300, "y1": 20, "x2": 340, "y2": 80}]}
"#;

    #[test]
    fn loads_and_merges_frames() -> Result<()> {
        let mut backend = SidecarBackend::from_reader(SIDECAR.as_bytes())?;
        assert_eq!(backend.frame_count(), 2);

        let frame = Frame::new(vec![0u8; 12], 2, 2, 1)?;
        let boxes = backend.detect(&frame, &DetectParams::default())?;
        assert_eq!(boxes.len(), 2);

        let frame = Frame::new(vec![0u8; 12], 2, 2, 2)?;
        assert!(backend.detect(&frame, &DetectParams::default())?.is_empty());
        Ok(())
    }

    #[test]
    fn reports_line_of_bad_json() {
        let err = SidecarBackend::from_reader("{\"frame\": 1}\n{oops}\n".as_bytes())
            .err()
            .map(|e| e.to_string())
            .unwrap_or_default();
        assert!(err.starts_with("line 2:"), "{}", err);
    }
}
