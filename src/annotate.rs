//! Per-frame annotation stage.
//!
//! Runs on the media runtime's streaming thread for every buffer that reaches
//! the annotation point. It reads the immutable projector, overwrites each
//! object's label, and returns. No I/O, no locks, no state kept between calls.

use crate::config::CameraConfig;
use crate::meta::{DetectedObject, FrameBatch};
use crate::projection::{GroundProjector, WorldPosition};

/// What one invocation touched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AnnotationSummary {
    pub frames: usize,
    pub objects: usize,
}

/// Writes ground-position labels onto detected objects.
///
/// `Copy`, so probe closures capture it by value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameAnnotator {
    projector: GroundProjector,
}

impl FrameAnnotator {
    pub fn new(camera: &CameraConfig) -> Self {
        Self {
            projector: GroundProjector::new(camera),
        }
    }

    /// Label every object of every frame in `batch`.
    ///
    /// A missing batch is normal (warm-up buffers carry no analytics) and
    /// yields an empty summary.
    pub fn annotate<B: FrameBatch + ?Sized>(&self, batch: Option<&mut B>) -> AnnotationSummary {
        let Some(batch) = batch else {
            return AnnotationSummary::default();
        };

        let mut summary = AnnotationSummary::default();
        batch.for_each_frame(&mut |frame| {
            summary.frames += 1;
            frame.for_each_object(&mut |object| {
                self.annotate_object(object);
                summary.objects += 1;
            });
        });
        log::trace!(
            "annotated {} objects across {} frames",
            summary.objects,
            summary.frames
        );
        summary
    }

    pub fn annotate_object(&self, object: &mut dyn DetectedObject) {
        let (cx, cy) = object.bbox().center();
        let position = self.projector.project(cx, cy);
        object.set_display_text(format_label(position));
    }
}

/// `X:<x> Y:<y>` with two decimals.
pub fn format_label(position: WorldPosition) -> String {
    format!("X:{:.2} Y:{:.2}", position.x, position.y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{BatchMeta, BoundingBox, FrameMeta, ObjectMeta};
    use serde_json::json;

    fn annotator() -> FrameAnnotator {
        let doc = json!({
            "resolution": [1920, 1080],
            "position": [0.0, 0.0, 0.0],
            "rotation": [0.0, 0.0, 0.0],
            "fov": [2.0, 1.5],
        });
        FrameAnnotator::new(&CameraConfig::from_document(doc.as_object().unwrap()).unwrap())
    }

    fn batch_of(frames: Vec<Vec<BoundingBox>>) -> BatchMeta {
        BatchMeta {
            frames: frames
                .into_iter()
                .enumerate()
                .map(|(n, rects)| FrameMeta {
                    frame_num: n as u64,
                    objects: rects.into_iter().map(ObjectMeta::new).collect(),
                    ..FrameMeta::default()
                })
                .collect(),
        }
    }

    fn labels(batch: &BatchMeta) -> Vec<Option<&str>> {
        batch
            .frames
            .iter()
            .flat_map(|f| f.objects.iter().map(|o| o.display_text.as_deref()))
            .collect()
    }

    #[test]
    fn centered_box_is_at_the_camera() {
        let mut batch = batch_of(vec![vec![BoundingBox::new(860.0, 480.0, 200.0, 120.0)]]);
        let summary = annotator().annotate(Some(&mut batch));
        assert_eq!(summary, AnnotationSummary { frames: 1, objects: 1 });
        assert_eq!(labels(&batch), vec![Some("X:0.00 Y:0.00")]);
    }

    #[test]
    fn origin_box_is_at_the_near_corner() {
        let mut batch = batch_of(vec![vec![BoundingBox::default()]]);
        annotator().annotate(Some(&mut batch));
        assert_eq!(labels(&batch), vec![Some("X:-1.00 Y:-0.75")]);
    }

    #[test]
    fn missing_batch_is_a_no_op() {
        let summary = annotator().annotate::<BatchMeta>(None);
        assert_eq!(summary, AnnotationSummary::default());
    }

    #[test]
    fn empty_batches_produce_no_labels() {
        let mut batch = BatchMeta::default();
        assert_eq!(annotator().annotate(Some(&mut batch)).objects, 0);

        let mut batch = batch_of(vec![vec![], vec![]]);
        let summary = annotator().annotate(Some(&mut batch));
        assert_eq!(summary, AnnotationSummary { frames: 2, objects: 0 });
        assert!(labels(&batch).is_empty());
    }

    #[test]
    fn every_object_in_every_frame_is_labelled() {
        let mut batch = batch_of(vec![
            vec![
                BoundingBox::new(1820.0, 1000.0, 200.0, 160.0),
                BoundingBox::new(0.0, 1080.0, 0.0, 0.0),
            ],
            vec![BoundingBox::new(470.0, 260.0, 20.0, 10.0)],
        ]);
        let summary = annotator().annotate(Some(&mut batch));
        assert_eq!(summary, AnnotationSummary { frames: 2, objects: 3 });
        assert_eq!(
            labels(&batch),
            vec![
                Some("X:1.00 Y:0.75"),
                Some("X:-1.00 Y:0.75"),
                Some("X:-0.50 Y:-0.38"),
            ]
        );
    }

    #[test]
    fn existing_label_is_replaced() {
        let mut batch = batch_of(vec![vec![BoundingBox::new(860.0, 480.0, 200.0, 120.0)]]);
        batch.frames[0].objects[0].display_text = Some("person 0.91".to_string());
        annotator().annotate(Some(&mut batch));
        assert_eq!(labels(&batch), vec![Some("X:0.00 Y:0.00")]);
    }

    #[test]
    fn label_rounds_to_two_decimals() {
        assert_eq!(format_label(WorldPosition { x: 0.756, y: -2.0 }), "X:0.76 Y:-2.00");
    }
}
