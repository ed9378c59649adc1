//! Overlay rendering and MJPEG encoding of processed frames.
//!
use std::{io::Cursor, path::Path};

use anyhow::{Context, Result};
use bytes::Bytes;
use common::{Bbox, Prediction};
use image::{codecs::jpeg::JpegEncoder, ColorType, Rgb, RgbImage};
use imageproc::{
    drawing::{draw_hollow_rect_mut, draw_text_mut, text_size},
    rect::Rect,
};
use rusttype::{Font, Scale};

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// Height of the darkened banner at the top of the frame.
const BANNER_HEIGHT: u32 = 80;

/// Draws predictions onto frames.
///
/// Text needs a TrueType font. Without one, only boxes and the banner are drawn.
pub struct OverlayRenderer {
    font: Option<Font<'static>>,
}

impl OverlayRenderer {
    pub fn new(font: Option<Font<'static>>) -> Self {
        Self { font }
    }

    /// Create a renderer with a font loaded from a `.ttf` file.
    pub fn with_font_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)
            .with_context(|| format!("failed to read font {}", path.display()))?;
        let font = Font::try_from_vec(data)
            .with_context(|| format!("invalid font file {}", path.display()))?;

        Ok(Self::new(Some(font)))
    }

    /// Draw the ranked predictions onto the frame.
    ///
    /// Every prediction with a bounding box gets a box and caption. The top of the frame is
    /// darkened and shows the best prediction, or a notice if there is none.
    pub fn render(&self, mut frame: RgbImage, predictions: &[Prediction]) -> RgbImage {
        for prediction in predictions {
            if let Some(bbox) = prediction.bbox {
                self.draw_bbox(&mut frame, &bbox, prediction);
            }
        }

        darken_banner(&mut frame);

        let width = frame.width() as i32;
        match predictions.first() {
            Some(top) => {
                self.draw_centered(&mut frame, &top.class, 12, 24.0, width);
                self.draw_centered(&mut frame, &format_score(top.score), 44, 18.0, width);
            }
            None => {
                self.draw_centered(&mut frame, "No high-confidence prediction", 28, 24.0, width);
            }
        }

        frame
    }

    fn draw_bbox(&self, frame: &mut RgbImage, bbox: &Bbox, prediction: &Prediction) {
        let [x, y, w, h] = *bbox;
        // `Rect` panics on empty sizes
        let rect = Rect::at(x as i32, y as i32).of_size((w as u32).max(1), (h as u32).max(1));
        draw_hollow_rect_mut(frame, rect, BOX_COLOR);

        if let Some(font) = &self.font {
            let caption = format!("{} {}", prediction.class, format_score(prediction.score));
            let caption_y = (y as i32 - 18).max(0);
            draw_text_mut(
                frame,
                BOX_COLOR,
                x as i32,
                caption_y,
                Scale::uniform(16.0),
                font,
                &caption,
            );
        }
    }

    fn draw_centered(&self, frame: &mut RgbImage, text: &str, y: i32, size: f32, width: i32) {
        let Some(font) = &self.font else {
            return;
        };

        let scale = Scale::uniform(size);
        let (text_width, _) = text_size(scale, font, text);
        let x = ((width - text_width) / 2).max(0);
        draw_text_mut(frame, TEXT_COLOR, x, y, scale, font, text);
    }
}

/// Format a score in `[0, 1]` as percentage with two decimals.
pub fn format_score(score: f32) -> String {
    format!("{:.2}%", score * 100.0)
}

/// Halve the brightness of the banner region.
fn darken_banner(frame: &mut RgbImage) {
    let height = BANNER_HEIGHT.min(frame.height());
    for y in 0..height {
        for x in 0..frame.width() {
            let pixel = frame.get_pixel_mut(x, y);
            pixel.0 = pixel.0.map(|c| c / 2);
        }
    }
}

/// Encode a frame as JPEG.
pub fn encode_jpeg(frame: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut buf, quality)
        .encode(frame, frame.width(), frame.height(), ColorType::Rgb8)
        .context("failed to encode frame")?;

    Ok(buf.into_inner())
}

/// Wrap a JPEG image as part of a `multipart/x-mixed-replace` stream.
pub fn as_jpeg_stream_item(data: &[u8]) -> Bytes {
    Bytes::copy_from_slice(
        &[
            "--frame\r\nContent-Type: image/jpeg\r\n\r\n".as_bytes(),
            data,
            "\r\n\r\n".as_bytes(),
        ]
        .concat(),
    )
}

#[cfg(test)]
mod test {

    use super::*;

    fn gray_frame() -> RgbImage {
        RgbImage::from_pixel(200, 150, Rgb([200, 200, 200]))
    }

    #[test]
    fn boxes_are_drawn_below_banner() {
        let renderer = OverlayRenderer::new(None);
        let prediction = Prediction {
            class: "cat".into(),
            score: 0.9,
            bbox: Some([20.0, 100.0, 50.0, 30.0]),
        };

        let frame = renderer.render(gray_frame(), &[prediction]);

        assert_eq!(*frame.get_pixel(20, 100), BOX_COLOR);
        assert_eq!(*frame.get_pixel(69, 129), BOX_COLOR);
        assert_eq!(*frame.get_pixel(40, 115), Rgb([200, 200, 200]));
    }

    #[test]
    fn banner_is_darkened() {
        let renderer = OverlayRenderer::new(None);

        let frame = renderer.render(gray_frame(), &[]);

        assert_eq!(*frame.get_pixel(0, 0), Rgb([100, 100, 100]));
        assert_eq!(*frame.get_pixel(199, BANNER_HEIGHT - 1), Rgb([100, 100, 100]));
        assert_eq!(*frame.get_pixel(0, BANNER_HEIGHT), Rgb([200, 200, 200]));
    }

    #[test]
    fn degenerate_boxes_and_tiny_frames_do_not_panic() {
        let renderer = OverlayRenderer::new(None);
        let predictions = [
            Prediction {
                class: "cat".into(),
                score: 0.5,
                bbox: Some([-5.0, -5.0, 0.0, 0.0]),
            },
            Prediction::new("tabby", 0.4),
        ];

        let frame = renderer.render(RgbImage::new(3, 2), &predictions);
        assert_eq!(frame.dimensions(), (3, 2));
    }

    #[test]
    fn scores_are_percentages() {
        assert_eq!(format_score(0.9), "90.00%");
        assert_eq!(format_score(0.1234), "12.34%");
    }

    #[test]
    fn encoded_frame_is_a_stream_item() -> Result<()> {
        let jpeg = encode_jpeg(&gray_frame(), 80)?;
        assert!(jpeg.starts_with(&[0xFF, 0xD8]));

        let decoded = image::load_from_memory(&jpeg)?;
        assert_eq!((decoded.width(), decoded.height()), (200, 150));

        let item = as_jpeg_stream_item(&jpeg);
        assert!(item.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n"));
        assert!(item.ends_with(b"\r\n\r\n"));

        Ok(())
    }
}
