//! Frame-to-frame bounding box stability.
//!
//! There is no tracker here: the best box of each frame is compared with the
//! best box of the previous frame, and the run of small displacements is
//! counted.

use crate::detect::BoundingBox;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StabilityTracker {
    last_box: Option<BoundingBox>,
    stable_hits: u32,
}

impl StabilityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_box(&self) -> Option<BoundingBox> {
        self.last_box
    }

    pub fn stable_hits(&self) -> u32 {
        self.stable_hits
    }

    /// Feed this frame's best box (`None` when nothing qualified).
    pub fn observe(&mut self, best: Option<BoundingBox>, displacement_threshold: u32) {
        let Some(best) = best else {
            self.reset();
            return;
        };
        if let Some(last) = self.last_box {
            if best.displacement(&last) < i64::from(displacement_threshold) {
                self.stable_hits = self.stable_hits.saturating_add(1);
            } else {
                self.stable_hits = 0;
            }
        }
        self.last_box = Some(best);
    }

    pub fn reset(&mut self) {
        self.last_box = None;
        self.stable_hits = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_box_sets_reference_without_hit() {
        let mut tracker = StabilityTracker::new();
        tracker.observe(Some(BoundingBox::new(0, 0, 100, 50)), 200);
        assert_eq!(tracker.stable_hits(), 0);
        assert_eq!(tracker.last_box(), Some(BoundingBox::new(0, 0, 100, 50)));
    }

    #[test]
    fn small_moves_accumulate_hits() {
        let mut tracker = StabilityTracker::new();
        tracker.observe(Some(BoundingBox::new(0, 0, 100, 50)), 90);
        tracker.observe(Some(BoundingBox::new(10, 5, 110, 55)), 90);
        tracker.observe(Some(BoundingBox::new(20, 10, 120, 60)), 90);
        assert_eq!(tracker.stable_hits(), 2);
    }

    #[test]
    fn threshold_is_exclusive() {
        let mut tracker = StabilityTracker::new();
        tracker.observe(Some(BoundingBox::new(0, 0, 100, 50)), 60);
        // 15 + 15 + 15 + 15 = 60
        tracker.observe(Some(BoundingBox::new(15, 15, 115, 65)), 60);
        assert_eq!(tracker.stable_hits(), 0);
    }

    #[test]
    fn jump_resets_hits_but_keeps_new_reference() {
        let mut tracker = StabilityTracker::new();
        tracker.observe(Some(BoundingBox::new(0, 0, 100, 50)), 200);
        tracker.observe(Some(BoundingBox::new(0, 0, 100, 50)), 200);
        assert_eq!(tracker.stable_hits(), 1);
        tracker.observe(Some(BoundingBox::new(500, 0, 600, 50)), 200);
        assert_eq!(tracker.stable_hits(), 0);
        assert_eq!(tracker.last_box(), Some(BoundingBox::new(500, 0, 600, 50)));
    }

    #[test]
    fn empty_frame_clears_everything() {
        let mut tracker = StabilityTracker::new();
        tracker.observe(Some(BoundingBox::new(0, 0, 100, 50)), 200);
        tracker.observe(Some(BoundingBox::new(0, 0, 100, 50)), 200);
        tracker.observe(None, 200);
        assert_eq!(tracker, StabilityTracker::default());
    }
}
