//! Object identifier binary.
//!
use std::{net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::{builder::RangedU64ValueParser, Parser, ValueEnum};
use env_logger::TimestampPrecision;
use object_identifier::{
    endpoints::router,
    narrator::{CommandSpeech, LogSpeech, PresenceNarrator, SpeechSink},
    nn::{
        fetch_classifier_files, fetch_detector_files, ClassifierConfig, DetectorConfig,
        ImageClassifier, ObjectDetector,
    },
    pipeline::{frame_channels, FrameLoop, Recognizer},
    processor::{DetectionProcessor, ProcessorConfig},
    renderer::OverlayRenderer,
    sensors::{setup_source, FrameSource, ImageDirSource},
};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    /// Locate objects with bounding boxes
    Detect,
    /// Label the whole frame
    Classify,
}

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Address to serve the overlay on
    #[clap(long, default_value = "127.0.0.1:3000")]
    server_address: String,

    /// Replay the images of this directory instead of using a camera
    #[clap(long)]
    images: Option<PathBuf>,

    /// Video device to capture from
    #[clap(long, default_value = "/dev/video0")]
    device: String,

    /// Capture resolution as WIDTHxHEIGHT, highest supported if unset
    #[clap(long, value_parser = parse_resolution)]
    resolution: Option<(u32, u32)>,

    /// Capture frames per second, highest supported if unset
    #[clap(long)]
    fps: Option<u32>,

    /// Milliseconds to wait for the first valid frame
    #[clap(long, default_value_t = 5000)]
    camera_timeout_ms: u64,

    #[clap(long, value_enum, default_value_t = Mode::Detect)]
    mode: Mode,

    /// Detection model, downloaded to the cache directory if unset
    #[clap(long)]
    detector_model: Option<PathBuf>,

    /// Classification model, downloaded to the cache directory if unset
    #[clap(long)]
    classifier_model: Option<PathBuf>,

    /// Class names of the classification model, one per line
    #[clap(long)]
    labels: Option<PathBuf>,

    /// Never download missing model files
    #[clap(long)]
    offline: bool,

    /// Minimum score of reported objects
    #[clap(long, default_value_t = 0.5)]
    confidence_threshold: f32,

    /// Maximum overlap of two reported detections
    #[clap(long, default_value_t = 0.3)]
    nms_threshold: f32,

    /// Number of frames a detection is averaged over
    #[clap(long, default_value_t = 5, value_parser = RangedU64ValueParser::<usize>::new().range(1..))]
    history_length: usize,

    /// Milliseconds after which unseen objects are forgotten
    #[clap(long, default_value_t = 3000)]
    object_timeout_ms: u64,

    /// Number of classifications per frame
    #[clap(long, default_value_t = 3)]
    top_k: usize,

    /// Speak objects which appear or disappear
    #[clap(long)]
    speak: bool,

    /// Text-to-speech program receiving the text as last argument
    #[clap(long, default_value = "espeak")]
    speech_command: String,

    /// TrueType font for overlay text
    #[clap(long, default_value = "/usr/share/fonts/truetype/dejavu/DejaVuSansMono.ttf")]
    font: PathBuf,

    /// Milliseconds between processed frames
    #[clap(long, default_value_t = 100)]
    frame_interval_ms: u64,

    #[clap(long, default_value_t = 80)]
    jpeg_quality: u8,
}

fn parse_resolution(s: &str) -> Result<(u32, u32), String> {
    let (width, height) = s
        .split_once('x')
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {s}"))?;
    let width = width.parse().map_err(|e| format!("invalid width: {e}"))?;
    let height = height.parse().map_err(|e| format!("invalid height: {e}"))?;
    Ok((width, height))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logger
    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    // Acquire frames before loading models so that camera problems surface early
    let mut source = open_source(&args)?;
    setup_source(source.as_mut(), Duration::from_millis(args.camera_timeout_ms)).await?;

    let mut recognizer = build_recognizer(&args).await?;
    recognizer.load()?;

    let renderer = match OverlayRenderer::with_font_file(&args.font) {
        Ok(renderer) => renderer,
        Err(e) => {
            log::warn!("Overlay text disabled: {e:#}");
            OverlayRenderer::new(None)
        }
    };

    let sink: Box<dyn SpeechSink> = match args.speak {
        true => Box::new(CommandSpeech::new(&args.speech_command, Vec::new())),
        false => Box::new(LogSpeech),
    };

    let (publisher, hub) = frame_channels(args.jpeg_quality);
    let mut frame_loop = FrameLoop::new(source, recognizer, renderer, publisher)
        .with_narrator(PresenceNarrator::new(sink))
        .with_frame_interval(Duration::from_millis(args.frame_interval_ms));

    // Run capture, inference and presentation on a separate task
    let frame_task = tokio::spawn(async move { frame_loop.run().await });

    // Serve HTTP server
    let addr: SocketAddr = args.server_address.parse()?;
    let server = axum::Server::bind(&addr).serve(router(hub).into_make_service());
    log::info!("Serving overlay on http://{}", server.local_addr());

    tokio::select! {
        res = server => res?,
        res = frame_task => res??,
        res = tokio::signal::ctrl_c() => {
            res?;
            log::info!("Shutting down");
        }
    }

    Ok(())
}

fn open_source(args: &Args) -> Result<Box<dyn FrameSource>> {
    if let Some(dir) = &args.images {
        let source = ImageDirSource::new(dir).context("failed to access camera")?;
        return Ok(Box::new(source));
    }

    open_camera(args)
}

#[cfg(feature = "v4l")]
fn open_camera(args: &Args) -> Result<Box<dyn FrameSource>> {
    use object_identifier::sensors::{CameraConfig, V4lCamera};

    let config = CameraConfig {
        device: args.device.clone(),
        resolution: args.resolution,
        frame_rate: args.fps.map(|fps| (1, fps)),
        ..Default::default()
    };
    let camera = V4lCamera::open(&config).context("failed to access camera")?;

    Ok(Box::new(camera))
}

#[cfg(not(feature = "v4l"))]
fn open_camera(args: &Args) -> Result<Box<dyn FrameSource>> {
    anyhow::bail!(
        "cannot open {} ({:?} at {:?} fps): built without the `v4l` feature, pass --images instead",
        args.device,
        args.resolution,
        args.fps
    )
}

async fn build_recognizer(args: &Args) -> Result<Recognizer> {
    let client = reqwest::Client::new();

    match args.mode {
        Mode::Detect => {
            let mut config = DetectorConfig::default();
            if let Some(path) = &args.detector_model {
                config.model_path = path.clone();
            }
            if !args.offline {
                fetch_detector_files(&client, &config).await?;
            }

            let processor = DetectionProcessor::new(ProcessorConfig {
                confidence_threshold: args.confidence_threshold,
                nms_threshold: args.nms_threshold,
                history_length: args.history_length,
                object_timeout: Duration::from_millis(args.object_timeout_ms),
            });

            Ok(Recognizer::Detect {
                model: ObjectDetector::new(config),
                processor,
            })
        }
        Mode::Classify => {
            let mut config = ClassifierConfig {
                top_k: args.top_k,
                ..Default::default()
            };
            if let Some(path) = &args.classifier_model {
                config.model_path = path.clone();
            }
            if let Some(path) = &args.labels {
                config.labels_path = path.clone();
            }
            if !args.offline {
                fetch_classifier_files(&client, &config).await?;
            }

            Ok(Recognizer::Classify {
                model: ImageClassifier::new(config),
                min_confidence: args.confidence_threshold,
            })
        }
    }
}
