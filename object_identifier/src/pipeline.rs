//! Per-frame flow from capture to presentation.
//!
//! A single [`FrameLoop`] owns the frame source, the models, the detection history and the
//! narration state, and runs capture → inference → post-processing → narration → rendering
//! sequentially for every frame. Results leave the loop only through the [`Publisher`].
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use bytes::Bytes;
use common::{Detection, Prediction};
use image::RgbImage;
use tokio::{
    sync::{broadcast, watch},
    time::{interval, MissedTickBehavior},
};

use crate::{
    meter::{FrameMeter, Stage},
    narrator::PresenceNarrator,
    nn::{ImageClassifier, InferModel, ObjectDetector},
    processor::DetectionProcessor,
    renderer::{as_jpeg_stream_item, encode_jpeg, OverlayRenderer},
    sensors::FrameSource,
};

/// Recognition stage: a detector with temporal post-processing, or a whole-frame classifier.
pub enum Recognizer<D = ObjectDetector, C = ImageClassifier> {
    Detect {
        model: D,
        processor: DetectionProcessor,
    },
    Classify {
        model: C,
        /// Classifications below this score are not reported.
        min_confidence: f32,
    },
}

impl<D, C> Recognizer<D, C>
where
    D: InferModel<Output = Detection>,
    C: InferModel<Output = Prediction>,
{
    pub fn load(&mut self) -> Result<()> {
        match self {
            Recognizer::Detect { model, .. } => model.load_model(),
            Recognizer::Classify { model, .. } => model.load_model(),
        }
    }

    /// Recognize objects on a frame, ranked by sinking score.
    pub fn recognize(&mut self, frame: &RgbImage, now: Instant) -> Result<Vec<Prediction>> {
        match self {
            Recognizer::Detect { model, processor } => {
                let detections = model.infer(frame)?;
                log::debug!("Detector found {} raw detections", detections.len());
                let detections = processor.process(detections, now);
                Ok(detections.into_iter().map(Prediction::from).collect())
            }
            Recognizer::Classify {
                model,
                min_confidence,
            } => {
                let predictions = model.infer(frame)?;
                Ok(predictions
                    .into_iter()
                    .filter(|prediction| prediction.score >= *min_confidence)
                    .collect())
            }
        }
    }
}

/// Read side of the frame loop outputs, shared with the HTTP endpoints.
#[derive(Clone)]
pub struct FrameHub {
    frames_tx: broadcast::Sender<Bytes>,
    predictions_rx: watch::Receiver<Vec<Prediction>>,
}

impl FrameHub {
    /// Subscribe to rendered frames as MJPEG stream items.
    pub fn subscribe_frames(&self) -> broadcast::Receiver<Bytes> {
        self.frames_tx.subscribe()
    }

    /// Predictions of the most recent frame.
    pub fn latest_predictions(&self) -> Vec<Prediction> {
        self.predictions_rx.borrow().clone()
    }
}

/// Write side of the frame loop outputs.
pub struct Publisher {
    frames_tx: broadcast::Sender<Bytes>,
    predictions_tx: watch::Sender<Vec<Prediction>>,
    jpeg_quality: u8,
}

impl Publisher {
    /// Rendered frames are only encoded while someone is watching the stream.
    pub fn publish(&self, frame: &RgbImage, predictions: &[Prediction]) -> Result<()> {
        self.predictions_tx.send_replace(predictions.to_vec());

        if self.frames_tx.receiver_count() > 0 {
            let jpeg = encode_jpeg(frame, self.jpeg_quality)?;
            // Receivers may disappear between the check and the send
            self.frames_tx.send(as_jpeg_stream_item(&jpeg)).ok();
        }

        Ok(())
    }
}

/// Create the connected publisher and hub.
pub fn frame_channels(jpeg_quality: u8) -> (Publisher, FrameHub) {
    let (frames_tx, _) = broadcast::channel(4);
    let (predictions_tx, predictions_rx) = watch::channel(Vec::new());

    let publisher = Publisher {
        frames_tx: frames_tx.clone(),
        predictions_tx,
        jpeg_quality,
    };
    let hub = FrameHub {
        frames_tx,
        predictions_rx,
    };

    (publisher, hub)
}

pub struct FrameLoop<D = ObjectDetector, C = ImageClassifier> {
    source: Box<dyn FrameSource>,
    recognizer: Recognizer<D, C>,
    renderer: OverlayRenderer,
    narrator: Option<PresenceNarrator>,
    publisher: Publisher,
    frame_interval: Duration,
    meter: FrameMeter,
}

impl<D, C> FrameLoop<D, C>
where
    D: InferModel<Output = Detection>,
    C: InferModel<Output = Prediction>,
{
    pub fn new(
        source: Box<dyn FrameSource>,
        recognizer: Recognizer<D, C>,
        renderer: OverlayRenderer,
        publisher: Publisher,
    ) -> Self {
        Self {
            source,
            recognizer,
            renderer,
            narrator: None,
            publisher,
            frame_interval: Duration::from_millis(100),
            meter: FrameMeter::default(),
        }
    }

    pub fn with_narrator(mut self, narrator: PresenceNarrator) -> Self {
        self.narrator = Some(narrator);
        self
    }

    pub fn with_frame_interval(mut self, frame_interval: Duration) -> Self {
        self.frame_interval = frame_interval;
        self
    }

    /// Process one frame.
    pub fn step(&mut self, now: Instant) -> Result<Vec<Prediction>> {
        let stage_start = Instant::now();
        let frame = self.source.capture()?;
        self.meter.record(Stage::Capture, stage_start.elapsed());

        let stage_start = Instant::now();
        let predictions = self.recognizer.recognize(&frame, now)?;
        self.meter.record(Stage::Inference, stage_start.elapsed());

        if let Some(narrator) = self.narrator.as_mut() {
            narrator.update(&predictions);
        }

        let stage_start = Instant::now();
        let frame = self.renderer.render(frame, &predictions);
        self.meter.record(Stage::Render, stage_start.elapsed());
        self.publisher.publish(&frame, &predictions)?;

        if let Some(report) = self.meter.finish_frame(now) {
            log::info!("{report}");
        }

        Ok(predictions)
    }

    /// Process frames until capture or inference fails.
    ///
    /// The frame source must have been set up with [`crate::sensors::setup_source`] before.
    /// Requires a multi-threaded runtime since inference blocks the current worker.
    pub async fn run(&mut self) -> Result<()> {
        if !self.source.is_ready() {
            bail!("frame source is not set up");
        }

        let mut ticker = interval(self.frame_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let result = tokio::task::block_in_place(|| self.step(Instant::now()));
            if let Err(e) = result {
                self.source.stop();
                return Err(e);
            }
        }
    }
}
