use anyhow::Result;

use crate::detect::result::{DetectParams, DetectionBox};
use crate::frame::Frame;

/// Object detector backend.
///
/// The detector is an external collaborator: it turns a frame into boxes and
/// knows nothing about streaks, stability or alerts. Implementations must
/// honor `params.conf_soft` and `params.iou_nms`; the engine applies its own,
/// stricter filtering on top.
///
/// A backend may be shared by several streams through
/// [`BackendRegistry`](super::BackendRegistry), so it must not keep
/// per-stream state that changes its answers.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &Frame, params: &DetectParams) -> Result<Vec<DetectionBox>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
