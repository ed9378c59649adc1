//! Real-time object recognition on a camera feed with a browser overlay.
//!
//! Frames flow through a single [`pipeline::FrameLoop`]: captured by a [`sensors::FrameSource`],
//! recognized by one of the [`nn`] adapters, smoothed and deduplicated by the
//! [`processor::DetectionProcessor`], narrated by the [`narrator::PresenceNarrator`] and rendered by
//! the [`renderer::OverlayRenderer`]. The [`endpoints`] serve the results to the browser.
pub mod endpoints;
pub mod meter;
pub mod narrator;
pub mod nn;
pub mod pipeline;
pub mod processor;
pub mod renderer;
pub mod sensors;
pub mod utils;
