//! Bounding box detector based on SSD-MobileNet trained on COCO.
//!
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use common::Detection;
use image::RgbImage;
use tract_onnx::prelude::*;

use super::{labels::coco_label, load_onnx_model, InferModel, NnModel};
use crate::utils::cache_dir;

#[derive(Clone, Debug)]
pub struct DetectorConfig {
    pub model_path: PathBuf,
    /// Frames are resized to this size before being fed to the network.
    pub input_width: u32,
    pub input_height: u32,
    /// Raw boxes below this score are discarded right away.
    pub min_score: f32,
    /// Maximum number of boxes returned per frame.
    pub max_boxes: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: cache_dir().join("ssd_mobilenet_v1_12.onnx"),
            input_width: 300,
            input_height: 300,
            min_score: 0.5,
            max_boxes: 20,
        }
    }
}

/// Positions of the named outputs in the network output vector.
#[derive(Clone, Copy, Debug, PartialEq)]
struct SsdOutputs {
    boxes: usize,
    classes: usize,
    scores: usize,
    num_detections: usize,
}

impl Default for SsdOutputs {
    fn default() -> Self {
        Self {
            boxes: 0,
            classes: 1,
            scores: 2,
            num_detections: 3,
        }
    }
}

impl SsdOutputs {
    /// Resolve output positions by label, falling back to the model zoo order.
    fn from_labels<'a>(labels: impl IntoIterator<Item = Option<&'a str>>) -> Self {
        let mut outputs = Self::default();
        for (idx, label) in labels.into_iter().enumerate() {
            match label {
                Some(l) if l.starts_with("detection_boxes") => outputs.boxes = idx,
                Some(l) if l.starts_with("detection_classes") => outputs.classes = idx,
                Some(l) if l.starts_with("detection_scores") => outputs.scores = idx,
                Some(l) if l.starts_with("num_detections") => outputs.num_detections = idx,
                _ => (),
            }
        }
        outputs
    }
}

pub struct ObjectDetector {
    config: DetectorConfig,
    model: Option<(NnModel, SsdOutputs)>,
}

impl ObjectDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            model: None,
        }
    }

    fn preproc(&self, frame: &RgbImage) -> Tensor {
        let (width, height) = (self.config.input_width, self.config.input_height);
        let resized: RgbImage = image::imageops::resize(
            frame,
            width,
            height,
            image::imageops::FilterType::Triangle,
        );

        // The network takes raw NHWC bytes and normalizes internally
        tract_ndarray::Array4::from_shape_fn(
            (1, height as usize, width as usize, 3),
            |(_, y, x, c)| resized[(x as _, y as _)][c],
        )
        .into()
    }

    fn postproc(
        &self,
        raw_nn_out: TVec<TValue>,
        outputs: SsdOutputs,
        frame_size: (u32, u32),
    ) -> Result<Vec<Detection>> {
        let output = |idx: usize| -> Result<Vec<f32>> {
            let tensor = raw_nn_out
                .get(idx)
                .ok_or_else(|| anyhow!("model produced no output {idx}"))?;
            Ok(tensor.to_array_view::<f32>()?.iter().copied().collect())
        };

        let boxes = output(outputs.boxes)?;
        let classes = output(outputs.classes)?;
        let scores = output(outputs.scores)?;
        let num_detections = output(outputs.num_detections)?
            .first()
            .map_or(scores.len(), |n| *n as usize);

        Ok(decode_detections(
            &boxes,
            &classes,
            &scores,
            num_detections,
            frame_size,
            self.config.min_score,
            self.config.max_boxes,
        ))
    }
}

impl InferModel for ObjectDetector {
    type Output = Detection;

    fn load_model(&mut self) -> Result<()> {
        if self.model.is_some() {
            return Ok(());
        }

        let input_fact = InferenceFact::dt_shape(
            u8::datum_type(),
            tvec!(
                1,
                self.config.input_height as usize,
                self.config.input_width as usize,
                3
            ),
        );
        let model = load_onnx_model(&self.config.model_path, input_fact)
            .context("failed to load object detection model")?;

        let outlets = model.model().output_outlets()?;
        let outputs =
            SsdOutputs::from_labels(outlets.iter().map(|o| model.model().outlet_label(*o)));
        log::info!(
            "Loaded object detection model {} ({:?})",
            self.config.model_path.display(),
            outputs
        );

        self.model = Some((model, outputs));
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    fn infer(&self, frame: &RgbImage) -> Result<Vec<Detection>> {
        let Some((model, outputs)) = &self.model else {
            bail!("model not loaded, call load_model() first");
        };

        let input = tvec!(self.preproc(frame).into());
        let raw_nn_out = model.run(input).context("detection failed")?;

        self.postproc(raw_nn_out, *outputs, frame.dimensions())
            .context("detection failed")
    }
}

/// Turn the flat SSD outputs into detections in frame pixel coordinates.
///
/// `boxes` holds normalized `[y_min, x_min, y_max, x_max]` quadruples, `classes` COCO category
/// ids. Results are ordered like the network output, which is by sinking score.
fn decode_detections(
    boxes: &[f32],
    classes: &[f32],
    scores: &[f32],
    num_detections: usize,
    (width, height): (u32, u32),
    min_score: f32,
    max_boxes: usize,
) -> Vec<Detection> {
    let (width, height) = (width as f32, height as f32);

    boxes
        .chunks_exact(4)
        .zip(classes.iter().zip(scores.iter()))
        .take(num_detections)
        .filter(|(_, (_, score))| **score >= min_score)
        .filter_map(|(bbox, (class_id, score))| {
            let label = coco_label(*class_id as usize)?;
            let [y_min, x_min, y_max, x_max] = [bbox[0], bbox[1], bbox[2], bbox[3]]
                .map(|v| v.clamp(0.0, 1.0));

            Some(Detection::new(
                label,
                *score,
                [
                    x_min * width,
                    y_min * height,
                    (x_max - x_min) * width,
                    (y_max - y_min) * height,
                ],
            ))
        })
        .take(max_boxes)
        .collect()
}
