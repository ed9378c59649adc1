//! Data model shared by the capture, inference and presentation stages.
pub mod detection;

pub use detection::{area, iou, Bbox, Detection, Prediction};

/// Error type.
pub type Error = Box<dyn std::error::Error>;
