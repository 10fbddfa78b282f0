use serde::{Deserialize, Serialize};

/// Axis-aligned box in integer pixel coordinates.
///
/// A well-formed box has `x2 > x1` and `y2 > y1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> i64 {
        i64::from(self.x2) - i64::from(self.x1)
    }

    pub fn height(&self) -> i64 {
        i64::from(self.y2) - i64::from(self.y1)
    }

    pub fn area(&self) -> i64 {
        self.width() * self.height()
    }

    /// Width divided by height. Only meaningful for well-formed boxes.
    pub fn aspect_ratio(&self) -> f64 {
        self.width() as f64 / self.height() as f64
    }

    pub fn is_well_formed(&self) -> bool {
        self.x2 > self.x1 && self.y2 > self.y1
    }

    /// Combined corner movement: `|Δx1| + |Δx2| + |Δy1| + |Δy2|`.
    pub fn displacement(&self, other: &BoundingBox) -> i64 {
        let dx = (i64::from(self.x1) - i64::from(other.x1)).abs()
            + (i64::from(self.x2) - i64::from(other.x2)).abs();
        let dy = (i64::from(self.y1) - i64::from(other.y1)).abs()
            + (i64::from(self.y2) - i64::from(other.y2)).abs();
        dx + dy
    }

    pub fn intersection(&self, other: &BoundingBox) -> i64 {
        let w = i64::from(self.x2.min(other.x2)) - i64::from(self.x1.max(other.x1));
        let h = i64::from(self.y2.min(other.y2)) - i64::from(self.y1.max(other.y1));
        if w <= 0 || h <= 0 {
            0
        } else {
            w * h
        }
    }

    /// Intersection over union. Zero when either box is empty.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let inter = self.intersection(other);
        let union = self.area().max(0) + other.area().max(0) - inter;
        if union <= 0 {
            return 0.0;
        }
        inter as f32 / union as f32
    }
}

/// One candidate object reported by the detector for a single frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionBox {
    pub class_id: u32,
    pub confidence: f32,
    #[serde(flatten)]
    pub bbox: BoundingBox,
}

impl DetectionBox {
    pub fn new(class_id: u32, confidence: f32, x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self {
            class_id,
            confidence,
            bbox: BoundingBox::new(x1, y1, x2, y2),
        }
    }

    /// Geometry is well-formed and confidence is a finite value in `[0, 1]`.
    pub fn is_well_formed(&self) -> bool {
        self.bbox.is_well_formed()
            && self.confidence.is_finite()
            && (0.0..=1.0).contains(&self.confidence)
    }
}

/// Thresholds the detector is invoked with for a given stream.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectParams {
    /// Minimum confidence for a box to be reported at all.
    pub conf_soft: f32,
    /// Overlap threshold for non-maximum suppression.
    pub iou_nms: f32,
}

impl Default for DetectParams {
    fn default() -> Self {
        Self {
            conf_soft: 0.40,
            iou_nms: 0.40,
        }
    }
}

/// Greedy per-class non-maximum suppression.
///
/// Boxes below `params.conf_soft` are dropped first. The survivors are returned
/// sorted by descending confidence.
pub fn suppress_overlaps(mut boxes: Vec<DetectionBox>, params: &DetectParams) -> Vec<DetectionBox> {
    boxes.retain(|b| b.confidence >= params.conf_soft);
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<DetectionBox> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        let overlaps = kept.iter().any(|k| {
            k.class_id == candidate.class_id && k.bbox.iou(&candidate.bbox) > params.iou_nms
        });
        if !overlaps {
            kept.push(candidate);
        }
    }
    kept
}
