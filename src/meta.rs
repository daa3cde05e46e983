//! Analytics metadata as the annotation stage sees it.
//!
//! The media runtime owns the metadata; the stage walks it through the
//! `FrameBatch` / `AnalyticsFrame` / `DetectedObject` traits, reading box
//! geometry and writing one label per object.
//!
//! `BatchMeta` is an owned implementation of the same traits, used for offline
//! replay and in tests.

use serde::{Deserialize, Serialize};

/// Axis-aligned box in pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn center(&self) -> (f64, f64) {
        (self.left + self.width / 2.0, self.top + self.height / 2.0)
    }
}

/// One detected object. Geometry is read-only; the label is the only write.
pub trait DetectedObject {
    fn bbox(&self) -> BoundingBox;

    /// Replace the object's display label.
    fn set_display_text(&mut self, text: String);
}

/// One frame's detections, visited in detection order.
pub trait AnalyticsFrame {
    fn for_each_object(&mut self, visit: &mut dyn FnMut(&mut dyn DetectedObject));
}

/// A unit of work from the runtime, visited frame by frame in delivery order.
pub trait FrameBatch {
    fn for_each_frame(&mut self, visit: &mut dyn FnMut(&mut dyn AnalyticsFrame));
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    #[serde(default)]
    pub class_id: i32,
    #[serde(default)]
    pub confidence: f32,
    pub rect: BoundingBox,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_text: Option<String>,
}

impl ObjectMeta {
    pub fn new(rect: BoundingBox) -> Self {
        Self {
            rect,
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameMeta {
    #[serde(default)]
    pub source_id: u32,
    #[serde(default)]
    pub frame_num: u64,
    #[serde(default)]
    pub objects: Vec<ObjectMeta>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchMeta {
    #[serde(default)]
    pub frames: Vec<FrameMeta>,
}

impl DetectedObject for ObjectMeta {
    fn bbox(&self) -> BoundingBox {
        self.rect
    }

    fn set_display_text(&mut self, text: String) {
        self.display_text = Some(text);
    }
}

impl AnalyticsFrame for FrameMeta {
    fn for_each_object(&mut self, visit: &mut dyn FnMut(&mut dyn DetectedObject)) {
        for object in &mut self.objects {
            visit(object);
        }
    }
}

impl FrameBatch for BatchMeta {
    fn for_each_frame(&mut self, visit: &mut dyn FnMut(&mut dyn AnalyticsFrame)) {
        for frame in &mut self.frames {
            visit(frame);
        }
    }
}
