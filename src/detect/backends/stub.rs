use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{suppress_overlaps, DetectParams, DetectionBox};
use crate::frame::Frame;

/// Backend that replays a fixed script of detections.
///
/// Frame `n` (1-based) receives `script[n - 1]`. Past the end of the script the
/// backend either wraps around or reports nothing. Answers depend only on the
/// frame index, so one instance can serve several streams.
#[derive(Clone, Debug, Default)]
pub struct ScriptedBackend {
    script: Vec<Vec<DetectionBox>>,
    repeat: bool,
}

impl ScriptedBackend {
    pub fn new(script: Vec<Vec<DetectionBox>>) -> Self {
        Self {
            script,
            repeat: false,
        }
    }

    /// Wrap around at the end of the script instead of going quiet.
    pub fn repeating(mut self) -> Self {
        self.repeat = true;
        self
    }

    /// Same detections on every frame.
    pub fn constant(boxes: Vec<DetectionBox>) -> Self {
        Self::new(vec![boxes]).repeating()
    }

    fn boxes_for(&self, index: u64) -> Vec<DetectionBox> {
        if self.script.is_empty() || index == 0 {
            return Vec::new();
        }
        let position = (index - 1) as usize;
        let slot = if self.repeat {
            Some(position % self.script.len())
        } else if position < self.script.len() {
            Some(position)
        } else {
            None
        };
        slot.map(|i| self.script[i].clone()).unwrap_or_default()
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, frame: &Frame, params: &DetectParams) -> Result<Vec<DetectionBox>> {
        Ok(suppress_overlaps(self.boxes_for(frame.index), params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(index: u64) -> Frame {
        Frame::new(vec![0u8; 12], 2, 2, index).unwrap()
    }

    #[test]
    fn replays_by_frame_index() -> Result<()> {
        let mut backend = ScriptedBackend::new(vec![
            vec![DetectionBox::new(0, 0.9, 0, 0, 100, 50)],
            vec![],
        ]);
        let params = DetectParams::default();
        assert_eq!(backend.detect(&frame(1), &params)?.len(), 1);
        assert!(backend.detect(&frame(2), &params)?.is_empty());
        assert!(backend.detect(&frame(3), &params)?.is_empty());
        assert_eq!(backend.detect(&frame(1), &params)?.len(), 1);
        Ok(())
    }

    #[test]
    fn repeating_script_wraps() -> Result<()> {
        let mut backend =
            ScriptedBackend::new(vec![vec![], vec![DetectionBox::new(0, 0.9, 0, 0, 100, 50)]])
                .repeating();
        let params = DetectParams::default();
        assert!(backend.detect(&frame(3), &params)?.is_empty());
        assert_eq!(backend.detect(&frame(4), &params)?.len(), 1);
        Ok(())
    }

    #[test]
    fn applies_soft_confidence() -> Result<()> {
        let mut backend = ScriptedBackend::constant(vec![
            DetectionBox::new(0, 0.30, 0, 0, 100, 50),
            DetectionBox::new(0, 0.45, 300, 0, 400, 50),
        ]);
        let found = backend.detect(&frame(1), &DetectParams::default())?;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].confidence, 0.45);
        Ok(())
    }
}
