//! Whole-frame image classifier based on MobileNet v2 trained on ImageNet.
//!
use std::{cmp::Ordering, path::PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use common::Prediction;
use image::RgbImage;
use tract_onnx::prelude::*;

use super::{labels::load_labels, load_onnx_model, InferModel, NnModel};
use crate::utils::cache_dir;

/// Side length of the square network input.
const INPUT_SIZE: u32 = 224;

#[derive(Clone, Debug)]
pub struct ClassifierConfig {
    pub model_path: PathBuf,
    pub labels_path: PathBuf,
    /// Number of predictions returned per frame.
    pub top_k: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        let dir = cache_dir();
        Self {
            model_path: dir.join("mobilenetv2-7.onnx"),
            labels_path: dir.join("synset.txt"),
            top_k: 3,
        }
    }
}

pub struct ImageClassifier {
    config: ClassifierConfig,
    model: Option<NnModel>,
    labels: Vec<String>,
}

impl ImageClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self {
            config,
            model: None,
            labels: Vec::new(),
        }
    }

    fn preproc(&self, frame: &RgbImage) -> Tensor {
        let resized: RgbImage = image::imageops::resize(
            frame,
            INPUT_SIZE,
            INPUT_SIZE,
            image::imageops::FilterType::Triangle,
        );

        tract_ndarray::Array4::from_shape_fn(
            (1, 3, INPUT_SIZE as usize, INPUT_SIZE as usize),
            |(_, c, y, x)| {
                let mean = [0.485, 0.456, 0.406][c];
                let std = [0.229, 0.224, 0.225][c];
                (resized[(x as _, y as _)][c] as f32 / 255.0 - mean) / std
            },
        )
        .into()
    }
}

impl InferModel for ImageClassifier {
    type Output = Prediction;

    fn load_model(&mut self) -> Result<()> {
        if self.model.is_some() {
            return Ok(());
        }

        let input_fact = InferenceFact::dt_shape(
            f32::datum_type(),
            tvec!(1, 3, INPUT_SIZE as usize, INPUT_SIZE as usize),
        );
        let model = load_onnx_model(&self.config.model_path, input_fact)
            .context("failed to load image classification model")?;
        let labels = load_labels(&self.config.labels_path)
            .context("failed to load image classification model")?;

        log::info!(
            "Loaded image classification model {} with {} labels",
            self.config.model_path.display(),
            labels.len()
        );

        self.labels = labels;
        self.model = Some(model);
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    fn infer(&self, frame: &RgbImage) -> Result<Vec<Prediction>> {
        let Some(model) = &self.model else {
            bail!("model not loaded, call load_model() first");
        };

        let input = tvec!(self.preproc(frame).into());
        let raw_nn_out = model.run(input).context("classification failed")?;

        let logits: Vec<f32> = raw_nn_out
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))
            .and_then(|t| Ok(t.to_array_view::<f32>()?.iter().copied().collect()))
            .context("classification failed")?;

        Ok(top_k_predictions(&logits, &self.labels, self.config.top_k))
    }
}

/// Softmax over the raw logits, ranked by sinking probability.
fn top_k_predictions(logits: &[f32], labels: &[String], k: usize) -> Vec<Prediction> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();

    let mut ranked: Vec<(usize, f32)> = exps.into_iter().map(|e| e / sum).enumerate().collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

    ranked
        .into_iter()
        .take(k)
        .map(|(idx, probability)| {
            let class = labels
                .get(idx)
                .cloned()
                .unwrap_or_else(|| format!("class {idx}"));
            Prediction::new(class, probability)
        })
        .collect()
}
