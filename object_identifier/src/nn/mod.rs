//! Adapters around pretrained ONNX models.
//!
//! Both adapters follow the same contract: [`InferModel::load_model`] once, then
//! [`InferModel::infer`] per frame. Model files are read from disk; [`fetch_detector_files`] and
//! [`fetch_classifier_files`] download the well-known models into the cache directory beforehand.
use std::path::Path;

use anyhow::{Context, Result};
use image::RgbImage;
use reqwest::Client;
use tract_onnx::prelude::*;

use crate::utils::ensure_file;

pub mod classifier;
pub mod detector;
pub mod labels;

pub use classifier::{ClassifierConfig, ImageClassifier};
pub use detector::{DetectorConfig, ObjectDetector};

pub type NnModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// SSD-MobileNet v1 trained on COCO, from the ONNX model zoo.
pub const SSD_MOBILENET_URL: &str = "https://github.com/onnx/models/raw/main/validated/vision/object_detection_segmentation/ssd-mobilenetv1/model/ssd_mobilenet_v1_12.onnx";
/// MobileNet v2 trained on ImageNet, from the ONNX model zoo.
pub const MOBILENET_V2_URL: &str = "https://github.com/onnx/models/raw/main/validated/vision/classification/mobilenet/model/mobilenetv2-7.onnx";
/// ImageNet class names in synset format.
pub const IMAGENET_LABELS_URL: &str =
    "https://github.com/onnx/models/raw/main/validated/vision/classification/synset.txt";

/// Uniform "load, then infer" contract of the recognition models.
pub trait InferModel {
    type Output;

    /// Load the model. Calling this on a loaded model does nothing.
    fn load_model(&mut self) -> Result<()>;

    fn is_loaded(&self) -> bool;

    /// Run the model on a frame.
    ///
    /// Fails if the model has not been loaded yet or if inference fails.
    fn infer(&self, frame: &RgbImage) -> Result<Vec<Self::Output>>;
}

/// Load an ONNX model with a fixed input fact and prepare it for inference.
pub(crate) fn load_onnx_model(path: &Path, input_fact: InferenceFact) -> Result<NnModel> {
    let model = tract_onnx::onnx()
        .model_for_path(path)
        .with_context(|| format!("failed to read ONNX model from {}", path.display()))?
        .with_input_fact(0, input_fact)
        .context("failed to set input fact")?
        .into_optimized()
        .context("failed to optimize model")?
        .into_runnable()
        .context("failed to build runnable model")?;

    Ok(model)
}

/// Download missing model files of the detector.
pub async fn fetch_detector_files(client: &Client, config: &DetectorConfig) -> Result<()> {
    ensure_file(client, SSD_MOBILENET_URL, &config.model_path).await
}

/// Download missing model and label files of the classifier.
pub async fn fetch_classifier_files(client: &Client, config: &ClassifierConfig) -> Result<()> {
    ensure_file(client, MOBILENET_V2_URL, &config.model_path).await?;
    ensure_file(client, IMAGENET_LABELS_URL, &config.labels_path).await
}
