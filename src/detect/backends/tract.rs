#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{suppress_overlaps, DetectParams, DetectionBox};
use crate::frame::Frame;

/// Tract-based backend for YOLOv8-style ONNX detectors.
///
/// The model takes a `1x3xSxS` RGB tensor in `[0, 1]` and returns
/// `1x(4+C)xN`: box center, size and one score per class for each of the `N`
/// candidates. Frames are stretched to `SxS`; boxes are mapped back to frame
/// pixels before overlap suppression.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_size: u32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(0, f32::fact([1, 3, side, side]).into())
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        log::info!(
            "TractBackend: loaded {} ({}x{} input)",
            model_path.display(),
            input_size,
            input_size
        );
        Ok(Self { model, input_size })
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        let side = self.input_size;
        let resized =
            image::imageops::resize(&frame.to_image(), side, side, FilterType::Triangle);
        let side = side as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });
        Ok(input.into_tensor())
    }

    fn decode(
        &self,
        outputs: TVec<TValue>,
        frame: &Frame,
        params: &DetectParams,
    ) -> Result<Vec<DetectionBox>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 || shape[1] < 5 {
            return Err(anyhow!("unexpected detector output shape {:?}", shape));
        }
        let (rows, candidates) = (shape[1], shape[2]);
        let sx = frame.width as f32 / self.input_size as f32;
        let sy = frame.height as f32 / self.input_size as f32;

        let mut boxes = Vec::new();
        for j in 0..candidates {
            let (class_id, score) = (4..rows)
                .map(|r| (r - 4, view[[0, r, j]]))
                .fold((0, f32::NEG_INFINITY), |best, cur| {
                    if cur.1 > best.1 {
                        cur
                    } else {
                        best
                    }
                });
            if !score.is_finite() || score < params.conf_soft {
                continue;
            }
            let (cx, cy, w, h) = (
                view[[0, 0, j]],
                view[[0, 1, j]],
                view[[0, 2, j]],
                view[[0, 3, j]],
            );
            boxes.push(DetectionBox::new(
                class_id as u32,
                score.min(1.0),
                ((cx - w / 2.0) * sx).round() as i32,
                ((cy - h / 2.0) * sy).round() as i32,
                ((cx + w / 2.0) * sx).round() as i32,
                ((cy + h / 2.0) * sy).round() as i32,
            ));
        }
        Ok(suppress_overlaps(boxes, params))
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame, params: &DetectParams) -> Result<Vec<DetectionBox>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, frame, params)
    }
}
