//! Sensors module.
//!
//! Frame sources deliver decoded RGB frames to the frame loop. A webcam is available with the `v4l`
//! feature; a directory of images can stand in for a camera.
use std::{
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use anyhow::{anyhow, bail, Context, Result};
use image::RgbImage;

/// Interval at which [`setup_source`] polls for a valid frame.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Source of video frames.
pub trait FrameSource: Send {
    /// Whether frames with valid dimensions are available.
    fn is_ready(&self) -> bool;

    /// Capture and decode the next frame.
    fn capture(&mut self) -> Result<RgbImage>;

    /// Release the underlying device.
    fn stop(&mut self) {}
}

/// Wait until the source delivers a frame with valid dimensions.
///
/// Fails if no such frame is observed within `timeout`.
pub async fn setup_source<S: FrameSource + ?Sized>(source: &mut S, timeout: Duration) -> Result<()> {
    wait_for_valid_dimensions(source, timeout)
        .await
        .map_err(|e| anyhow!("failed to access camera: {e:#}"))
}

async fn wait_for_valid_dimensions<S: FrameSource + ?Sized>(
    source: &mut S,
    timeout: Duration,
) -> Result<()> {
    let start = Instant::now();
    while start.elapsed() < timeout {
        match source.capture() {
            Ok(frame) if frame.width() > 0 && frame.height() > 0 => {
                log::info!("Video ready at {}x{}", frame.width(), frame.height());
                return Ok(());
            }
            Ok(_) => log::debug!("Frame without valid dimensions"),
            Err(e) => log::debug!("Frame not available yet: {e:#}"),
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    bail!("timeout waiting for video to have valid dimensions")
}

/// Frame source replaying the images of a directory in a loop.
pub struct ImageDirSource {
    paths: Vec<PathBuf>,
    next: usize,
    ready: bool,
}

impl ImageDirSource {
    /// Collect all images in `dir`, sorted by file name.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
            .with_context(|| format!("failed to read image directory {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| image::ImageFormat::from_path(path).is_ok())
            .collect();
        paths.sort();

        if paths.is_empty() {
            bail!("no images found in {}", dir.display());
        }
        log::info!("Replaying {} images from {}", paths.len(), dir.display());

        Ok(Self {
            paths,
            next: 0,
            ready: false,
        })
    }
}

impl FrameSource for ImageDirSource {
    fn is_ready(&self) -> bool {
        self.ready
    }

    fn capture(&mut self) -> Result<RgbImage> {
        let path = &self.paths[self.next];
        self.next = (self.next + 1) % self.paths.len();

        let frame = image::open(path)
            .with_context(|| format!("failed to decode {}", path.display()))?
            .to_rgb8();
        self.ready = frame.width() > 0 && frame.height() > 0;

        Ok(frame)
    }
}

#[cfg(feature = "v4l")]
pub use webcam::{CameraConfig, V4lCamera};

#[cfg(feature = "v4l")]
mod webcam {
    use anyhow::{anyhow, Context, Result};
    use image::RgbImage;
    use rscam::{Camera, Config};

    use super::FrameSource;

    #[derive(Clone, Debug)]
    pub struct CameraConfig {
        pub device: String,
        pub format: String,
        /// Highest supported resolution if unset.
        pub resolution: Option<(u32, u32)>,
        /// Highest supported frame rate if unset, as `(numerator, denominator)` interval.
        pub frame_rate: Option<(u32, u32)>,
    }

    impl Default for CameraConfig {
        fn default() -> Self {
            Self {
                device: "/dev/video0".to_owned(),
                format: "MJPG".to_owned(),
                resolution: None,
                frame_rate: None,
            }
        }
    }

    /// V4L2 webcam delivering MJPG frames.
    pub struct V4lCamera {
        cam: Camera,
        ready: bool,
    }

    impl V4lCamera {
        /// Open and start a video device on a Linux machine.
        pub fn open(config: &CameraConfig) -> Result<Self> {
            let mut cam = Camera::new(&config.device)
                .with_context(|| format!("failed to open {}", &config.device))?;
            log_supported_formats(&cam, &config.format);
            let format = config.format.as_bytes();

            log::info!("Using camera {}", &config.device);

            let resolution = match config.resolution {
                Some(resolution) => resolution,
                None => get_max_resolution(&cam, format)?,
            };
            let frame_rate = match config.frame_rate {
                Some(frame_rate) => frame_rate,
                None => get_max_frame_rate(&cam, format, resolution)?,
            };

            cam.start(&Config {
                interval: frame_rate,
                resolution,
                format,
                ..Default::default()
            })
            .context("failed to start capturing")?;

            Ok(Self { cam, ready: false })
        }
    }

    impl FrameSource for V4lCamera {
        fn is_ready(&self) -> bool {
            self.ready
        }

        fn capture(&mut self) -> Result<RgbImage> {
            let frame = self.cam.capture().context("failed to capture frame")?;
            let image = image::load_from_memory_with_format(&frame[..], image::ImageFormat::Jpeg)
                .context("failed to decode frame")?
                .to_rgb8();
            self.ready = image.width() > 0 && image.height() > 0;

            Ok(image)
        }

        fn stop(&mut self) {
            if let Err(e) = self.cam.stop() {
                log::warn!("Failed to stop camera: {e}");
            }
            self.ready = false;
        }
    }

    /// Get the maximum supported resolution for the given format.
    fn get_max_resolution(cam: &Camera, format: &[u8]) -> Result<(u32, u32)> {
        let resolution_info = cam.resolutions(format)?;
        log::debug!("Found resolutions: {:?}", &resolution_info);
        match resolution_info {
            rscam::ResolutionInfo::Discretes(resolutions) => resolutions
                .iter()
                // Highest resolution in terms of number of pixels
                .max_by_key(|res| res.0 * res.1)
                .copied(),
            rscam::ResolutionInfo::Stepwise { max, .. } => Some(max),
        }
        .ok_or_else(|| anyhow!("no resolution found"))
    }

    /// Get the maximum supported frame rate for the given format and resolution.
    fn get_max_frame_rate(cam: &Camera, format: &[u8], resolution: (u32, u32)) -> Result<(u32, u32)> {
        let interval_info = cam.intervals(format, resolution)?;
        log::debug!("Found frame rates: {:?}", &interval_info);
        match interval_info {
            // Intervals are `(numerator, denominator)` seconds per frame
            rscam::IntervalInfo::Discretes(intervals) => intervals
                .iter()
                .max_by(|a, b| {
                    let rate_a = a.1 as f64 / a.0 as f64;
                    let rate_b = b.1 as f64 / b.0 as f64;
                    rate_a.total_cmp(&rate_b)
                })
                .copied(),
            rscam::IntervalInfo::Stepwise { min, .. } => Some(min),
        }
        .ok_or_else(|| anyhow!("no frame rate found"))
    }

    fn log_supported_formats(cam: &Camera, format: &str) {
        let formats: Vec<_> = cam.formats().filter_map(|fmt| fmt.ok()).collect();
        log::debug!(
            "Supported formats: {:?}, using format {:?}",
            formats,
            format
        );
    }

}
