//! Geometric admissibility and best-box selection.

use crate::detect::DetectionBox;

use super::config::EngineConfig;

/// What a single frame contributes to the engine's decision.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameEvidence {
    /// Highest-confidence qualifying box, if any box qualified.
    pub best: Option<DetectionBox>,
    /// At least one qualifying box reached `conf_hard`.
    pub hard_hit: bool,
    pub qualifying: usize,
}

impl FrameEvidence {
    pub fn detected(&self) -> bool {
        self.best.is_some()
    }
}

/// A box qualifies when it belongs to the target class and is large and
/// elongated enough. Malformed boxes never qualify.
pub fn is_qualifying(candidate: &DetectionBox, config: &EngineConfig) -> bool {
    if candidate.class_id != config.target_class {
        return false;
    }
    if !candidate.is_well_formed() {
        log::trace!("rejecting malformed detection {:?}", candidate);
        return false;
    }
    candidate.bbox.area() >= i64::from(config.min_area)
        && candidate.bbox.aspect_ratio() >= config.min_aspect_ratio
}

pub fn assess(boxes: &[DetectionBox], config: &EngineConfig) -> FrameEvidence {
    let mut evidence = FrameEvidence::default();
    for candidate in boxes.iter().filter(|b| is_qualifying(b, config)) {
        evidence.qualifying += 1;
        if candidate.confidence >= config.conf_hard {
            evidence.hard_hit = true;
        }
        // Strictly greater: on ties the earlier box wins.
        let better = evidence
            .best
            .map_or(true, |best| candidate.confidence > best.confidence);
        if better {
            evidence.best = Some(*candidate);
        }
    }
    evidence
}
