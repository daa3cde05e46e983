//! World Overlay
//!
//! Labels objects detected in a live video stream with an estimated position
//! on the ground plane, derived from the box center and fixed camera
//! parameters.
//!
//! # Architecture
//!
//! Two pieces carry the contract:
//!
//! 1. **Camera configuration**: a validated, immutable record built once at
//!    startup. An invalid configuration stops the process before any media
//!    element exists.
//! 2. **Annotation stage**: a reentrant function run once per buffer on the
//!    runtime's streaming thread. It reads the configuration, overwrites each
//!    object's label with `X:<m> Y:<m>`, and returns.
//!
//! Capture, decode, inference, drawing, encoding and transport belong to the
//! media runtime.
//!
//! # Module Structure
//!
//! - `config`: camera and pipeline settings (TOML or JSON, env overrides)
//! - `error`: configuration failure taxonomy
//! - `projection`: flat-ground pixel to world projection
//! - `meta`: analytics metadata traits and an owned implementation
//! - `annotate`: the per-frame annotation stage
//! - `pipeline`: launch description and the GStreamer graph (feature
//!   `pipeline-gstreamer`, DeepStream metadata with `deepstream`)

pub mod annotate;
pub mod config;
pub mod error;
pub mod meta;
pub mod pipeline;
pub mod projection;

pub use annotate::{format_label, AnnotationSummary, FrameAnnotator};
pub use config::{CameraConfig, MetadataSource, OverlayConfig, PipelineSettings};
pub use error::ConfigError;
pub use meta::{
    AnalyticsFrame, BatchMeta, BoundingBox, DetectedObject, FrameBatch, FrameMeta, ObjectMeta,
};
pub use pipeline::{launch_description, OverlayPipeline};
pub use projection::{image_to_world, GroundProjector, WorldPosition};
