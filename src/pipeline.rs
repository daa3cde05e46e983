//! Media pipeline around the annotation stage.
//!
//! The graph is capture → convert → mux → infer → osd → encode → RTP/UDP.
//! The stage is attached as a buffer probe on the sink pad of the annotation
//! element, so every buffer is labelled right before it is drawn.
//!
//! Detections are read from DeepStream batch metadata (what `nvinfer` attaches
//! and `nvdsosd` draws) or, for graphs built from stock elements, from
//! `GstVideoRegionOfInterestMeta`. `pipeline.metadata` picks one.
//!
//! Building and running the graph needs the `pipeline-gstreamer` feature, and
//! the DeepStream binding additionally needs `deepstream`. The launch
//! description is plain text and always available, so
//! `world_overlay --check-config` works without GStreamer installed.

#[cfg(feature = "pipeline-gstreamer")]
use anyhow::{anyhow, Context};
use anyhow::Result;
#[cfg(feature = "pipeline-gstreamer")]
use gstreamer::prelude::*;
use std::sync::atomic::AtomicBool;

#[cfg(feature = "pipeline-gstreamer")]
use crate::annotate::FrameAnnotator;
#[cfg(feature = "pipeline-gstreamer")]
use crate::config::MetadataSource;
use crate::config::{CameraConfig, OverlayConfig, PipelineSettings};

/// Name of the ROI param that carries the label.
pub const LABEL_PARAM: &str = "world-position";

/// Render the launch description for a camera and pipeline settings.
///
/// `settings.launch` replaces the generated description verbatim.
pub fn launch_description(camera: &CameraConfig, settings: &PipelineSettings) -> String {
    if let Some(launch) = &settings.launch {
        return launch.clone();
    }
    let (width, height) = (camera.width(), camera.height());
    format!(
        "nvv4l2camerasrc device={device} ! \
         video/x-raw(memory:NVMM), format={format}, width={width}, height={height} ! \
         nvvidconv ! video/x-raw(memory:NVMM), format=I420 ! \
         nvvidconv ! video/x-raw(memory:NVMM), format=NV12 ! \
         nvstreammux name=mux batch-size=1 width={width} height={height} ! \
         nvinfer config-file-path={infer} ! \
         nvdsosd name={annotate} ! \
         nvvidconv ! nvv4l2h264enc ! rtph264pay mtu={mtu} ! \
         udpsink clients={host}:{port} sync=false",
        device = camera.device(),
        format = settings.capture_format,
        infer = settings.infer_config,
        annotate = settings.annotate_element,
        mtu = settings.mtu,
        host = settings.sink_host,
        port = settings.sink_port,
    )
}

/// A built pipeline with the annotation probe attached.
pub struct OverlayPipeline {
    backend: PipelineBackend,
}

enum PipelineBackend {
    #[cfg(feature = "pipeline-gstreamer")]
    Gstreamer(GstreamerPipeline),
}

impl OverlayPipeline {
    pub fn new(config: &OverlayConfig) -> Result<Self> {
        let description = launch_description(&config.camera, &config.pipeline);
        #[cfg(feature = "pipeline-gstreamer")]
        {
            let annotator = FrameAnnotator::new(&config.camera);
            Ok(Self {
                backend: PipelineBackend::Gstreamer(GstreamerPipeline::new(
                    &description,
                    &config.pipeline,
                    annotator,
                )?),
            })
        }
        #[cfg(not(feature = "pipeline-gstreamer"))]
        {
            log::debug!("not building: {}", description);
            anyhow::bail!("pipeline requires the pipeline-gstreamer feature")
        }
    }

    /// Play until end of stream, a pipeline error, or `stop` is set.
    ///
    /// The pipeline is always brought back to `Null` before returning.
    #[cfg_attr(not(feature = "pipeline-gstreamer"), allow(unused_variables))]
    pub fn run(&mut self, stop: &AtomicBool) -> Result<()> {
        match self.backend {
            #[cfg(feature = "pipeline-gstreamer")]
            PipelineBackend::Gstreamer(ref mut pipeline) => pipeline.run(stop),
        }
    }
}

// ----------------------------------------------------------------------------
// GStreamer backend
// ----------------------------------------------------------------------------

#[cfg(feature = "pipeline-gstreamer")]
const BUS_POLL_MS: u64 = 100;

#[cfg(feature = "pipeline-gstreamer")]
struct GstreamerPipeline {
    pipeline: gstreamer::Pipeline,
}

#[cfg(feature = "pipeline-gstreamer")]
impl GstreamerPipeline {
    fn new(
        description: &str,
        settings: &PipelineSettings,
        annotator: FrameAnnotator,
    ) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;

        let pipeline = gstreamer::parse::launch(description)
            .context("build overlay pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow!("overlay pipeline is not a Pipeline"))?;

        let annotate_element = settings.annotate_element.as_str();
        let element = pipeline
            .by_name(annotate_element)
            .with_context(|| format!("element `{annotate_element}` missing from pipeline"))?;
        let pad = element
            .static_pad("sink")
            .with_context(|| format!("element `{annotate_element}` has no sink pad"))?;

        let probe = match settings.metadata {
            MetadataSource::DeepStream => {
                #[cfg(feature = "deepstream")]
                {
                    pad.add_probe(gstreamer::PadProbeType::BUFFER, move |_pad, info| {
                        if let Some(gstreamer::PadProbeData::Buffer(ref buffer)) = info.data {
                            nvds::annotate_buffer(&annotator, buffer);
                        }
                        gstreamer::PadProbeReturn::Ok
                    })
                }
                #[cfg(not(feature = "deepstream"))]
                {
                    anyhow::bail!("DeepStream metadata requires the deepstream feature")
                }
            }
            MetadataSource::Roi => {
                pad.add_probe(gstreamer::PadProbeType::BUFFER, move |_pad, info| {
                    if let Some(gstreamer::PadProbeData::Buffer(ref mut buffer)) = info.data {
                        roi::annotate_buffer(&annotator, buffer.make_mut());
                    }
                    gstreamer::PadProbeReturn::Ok
                })
            }
        };
        probe.context("attach annotation probe")?;
        log::info!(
            "annotation probe attached to {}.sink ({:?} metadata)",
            annotate_element,
            settings.metadata
        );

        Ok(Self { pipeline })
    }

    fn run(&mut self, stop: &AtomicBool) -> Result<()> {
        self.pipeline
            .set_state(gstreamer::State::Playing)
            .context("set overlay pipeline to Playing")?;
        log::info!("overlay pipeline playing");

        let result = self.watch_bus(stop);

        self.pipeline
            .set_state(gstreamer::State::Null)
            .context("set overlay pipeline to Null")?;
        log::info!("overlay pipeline stopped");
        result
    }

    fn watch_bus(&self, stop: &AtomicBool) -> Result<()> {
        use gstreamer::MessageView;
        use std::sync::atomic::Ordering;

        let bus = self.pipeline.bus().context("overlay pipeline has no bus")?;
        while !stop.load(Ordering::SeqCst) {
            let Some(message) = bus.timed_pop(gstreamer::ClockTime::from_mseconds(BUS_POLL_MS))
            else {
                continue;
            };
            match message.view() {
                MessageView::Eos(..) => {
                    log::info!("overlay pipeline reached end of stream");
                    return Ok(());
                }
                MessageView::Error(err) => {
                    return Err(anyhow!(
                        "gstreamer error from {:?}: {} ({:?})",
                        err.src().map(|s| s.path_string()),
                        err.error(),
                        err.debug()
                    ));
                }
                MessageView::Warning(warning) => {
                    log::warn!(
                        "gstreamer warning from {:?}: {}",
                        warning.src().map(|s| s.path_string()),
                        warning.error()
                    );
                }
                _ => {}
            }
        }
        log::info!("stop requested");
        Ok(())
    }
}

#[cfg(feature = "pipeline-gstreamer")]
impl Drop for GstreamerPipeline {
    fn drop(&mut self) {
        if let Err(err) = self.pipeline.set_state(gstreamer::State::Null) {
            log::debug!("overlay pipeline teardown: {}", err);
        }
    }
}

/// Detections carried as `VideoRegionOfInterestMeta` on a single buffer.
///
/// ROI params are append-only, so the label is a `world-position` param and
/// the last one on an ROI is the current label.
#[cfg(feature = "pipeline-gstreamer")]
mod roi {
    use gstreamer_video::VideoRegionOfInterestMeta;

    use super::LABEL_PARAM;
    use crate::annotate::{AnnotationSummary, FrameAnnotator};
    use crate::meta::{AnalyticsFrame, BoundingBox, DetectedObject, FrameBatch};

    /// Probe body: label every ROI on `buffer`.
    pub(super) fn annotate_buffer(
        annotator: &FrameAnnotator,
        buffer: &mut gstreamer::BufferRef,
    ) -> AnnotationSummary {
        let mut frame = RoiFrame::new(buffer);
        let batch = frame.has_detections().then_some(&mut frame);
        annotator.annotate(batch)
    }

    pub(super) struct RoiFrame<'a> {
        buffer: &'a mut gstreamer::BufferRef,
    }

    impl<'a> RoiFrame<'a> {
        pub(super) fn new(buffer: &'a mut gstreamer::BufferRef) -> Self {
            Self { buffer }
        }

        /// Buffers without ROI metas carry no analytics and are skipped.
        pub(super) fn has_detections(&self) -> bool {
            self.buffer.meta::<VideoRegionOfInterestMeta>().is_some()
        }
    }

    impl FrameBatch for RoiFrame<'_> {
        fn for_each_frame(&mut self, visit: &mut dyn FnMut(&mut dyn AnalyticsFrame)) {
            visit(self);
        }
    }

    impl AnalyticsFrame for RoiFrame<'_> {
        fn for_each_object(&mut self, visit: &mut dyn FnMut(&mut dyn DetectedObject)) {
            for mut roi in self.buffer.iter_meta_mut::<VideoRegionOfInterestMeta>() {
                visit(&mut *roi);
            }
        }
    }

    impl DetectedObject for VideoRegionOfInterestMeta {
        fn bbox(&self) -> BoundingBox {
            let (x, y, w, h) = self.rect();
            BoundingBox::new(f64::from(x), f64::from(y), f64::from(w), f64::from(h))
        }

        fn set_display_text(&mut self, text: String) {
            self.add_param(
                gstreamer::Structure::builder(LABEL_PARAM)
                    .field("display-text", text)
                    .build(),
            );
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::config::OverlayConfig;

        fn annotator() -> FrameAnnotator {
            let cfg = OverlayConfig::from_toml_str(
                r#"
                resolution = [1920, 1080]
                position = [0.0, 0.0, 0.0]
                rotation = [0.0, 0.0, 0.0]
                fov = [2.0, 1.5]
                "#,
            )
            .unwrap();
            FrameAnnotator::new(&cfg.camera)
        }

        fn label(roi: &VideoRegionOfInterestMeta) -> Option<String> {
            roi.params()
                .filter(|param| param.has_name(LABEL_PARAM))
                .last()
                .and_then(|param| param.get::<String>("display-text").ok())
        }

        fn labels_by_type(buffer: &gstreamer::BufferRef) -> Vec<(String, Option<String>)> {
            let mut out: Vec<_> = buffer
                .iter_meta::<VideoRegionOfInterestMeta>()
                .map(|roi| (roi.roi_type().to_string(), label(&roi)))
                .collect();
            out.sort();
            out
        }

        #[test]
        fn labels_every_roi_and_the_last_param_wins() {
            gstreamer::init().unwrap();
            let mut buffer = gstreamer::Buffer::new();
            {
                let buffer = buffer.get_mut().unwrap();
                let mut person =
                    VideoRegionOfInterestMeta::add(buffer, "person", (860, 480, 200, 120));
                person.add_param(
                    gstreamer::Structure::builder(LABEL_PARAM)
                        .field("display-text", "X:9.99 Y:9.99")
                        .build(),
                );
                VideoRegionOfInterestMeta::add(buffer, "car", (0, 0, 0, 0));
            }

            let buffer = buffer.get_mut().unwrap();
            let summary = annotate_buffer(&annotator(), buffer);
            assert_eq!(summary, AnnotationSummary { frames: 1, objects: 2 });
            assert_eq!(
                labels_by_type(buffer),
                vec![
                    ("car".to_string(), Some("X:-1.00 Y:-0.75".to_string())),
                    ("person".to_string(), Some("X:0.00 Y:0.00".to_string())),
                ]
            );

            let person = buffer
                .iter_meta::<VideoRegionOfInterestMeta>()
                .find(|roi| roi.roi_type() == "person")
                .unwrap();
            assert_eq!(person.rect(), (860, 480, 200, 120));
            assert_eq!(person.params().filter(|p| p.has_name(LABEL_PARAM)).count(), 2);
        }

        #[test]
        fn buffer_without_rois_is_an_absent_batch() {
            gstreamer::init().unwrap();
            let mut buffer = gstreamer::Buffer::new();
            let buffer = buffer.get_mut().unwrap();
            assert!(!RoiFrame::new(buffer).has_detections());
            assert_eq!(
                annotate_buffer(&annotator(), buffer),
                AnnotationSummary::default()
            );
        }
    }
}

/// DeepStream batch metadata, read and written in place.
///
/// Only the leading fields of each record are declared; their layout follows
/// `nvdsmeta.h` and `nvll_osd_struct.h` from DeepStream 6.x and 7.x. The
/// records are owned by the batch meta on the buffer and are only reached
/// through pointers handed out by `gst_buffer_get_nvds_batch_meta`.
#[cfg(feature = "deepstream")]
#[allow(dead_code)]
mod nvds {
    use std::ffi::{c_char, c_double, c_float, c_int, c_uint, c_void, CString};
    use std::marker::PhantomData;
    use std::ptr::NonNull;

    use gstreamer::glib::ffi::{g_free, g_strdup, GList};

    use crate::annotate::{AnnotationSummary, FrameAnnotator};
    use crate::meta::{AnalyticsFrame, BoundingBox, DetectedObject, FrameBatch};

    #[repr(C)]
    pub(super) struct NvDsBaseMeta {
        batch_meta: *mut NvDsBatchMeta,
        meta_type: c_int,
        user_context: *mut c_void,
        copy_func: *mut c_void,
        release_func: *mut c_void,
    }

    #[repr(C)]
    pub(super) struct NvDsBatchMeta {
        base_meta: NvDsBaseMeta,
        max_frames_in_batch: c_uint,
        num_frames_in_batch: c_uint,
        frame_meta_pool: *mut c_void,
        obj_meta_pool: *mut c_void,
        classifier_meta_pool: *mut c_void,
        display_meta_pool: *mut c_void,
        user_meta_pool: *mut c_void,
        label_info_meta_pool: *mut c_void,
        pub(super) frame_meta_list: *mut GList,
    }

    #[repr(C)]
    pub(super) struct NvDsFrameMeta {
        base_meta: NvDsBaseMeta,
        pad_index: c_uint,
        batch_id: c_uint,
        frame_num: c_int,
        buf_pts: u64,
        ntp_timestamp: u64,
        source_id: c_uint,
        num_surfaces_per_frame: c_int,
        source_frame_width: c_uint,
        source_frame_height: c_uint,
        surface_type: c_uint,
        surface_index: c_uint,
        num_obj_meta: c_uint,
        infer_done: c_int,
        pub(super) obj_meta_list: *mut GList,
    }

    #[repr(C)]
    struct NvBboxCoords {
        left: c_float,
        top: c_float,
        width: c_float,
        height: c_float,
    }

    #[repr(C)]
    struct NvOsdColorParams {
        red: c_double,
        green: c_double,
        blue: c_double,
        alpha: c_double,
    }

    #[repr(C)]
    struct NvOsdRectParams {
        left: c_float,
        top: c_float,
        width: c_float,
        height: c_float,
        border_width: c_uint,
        border_color: NvOsdColorParams,
        has_bg_color: c_uint,
        reserved: c_uint,
        bg_color: NvOsdColorParams,
        has_color_info: c_int,
        color_id: c_int,
    }

    #[repr(C)]
    struct NvOsdMaskParams {
        data: *mut c_float,
        size: c_uint,
        threshold: c_float,
        width: c_uint,
        height: c_uint,
    }

    #[repr(C)]
    struct NvOsdTextParams {
        display_text: *mut c_char,
    }

    #[repr(C)]
    pub(super) struct NvDsObjectMeta {
        base_meta: NvDsBaseMeta,
        parent: *mut NvDsObjectMeta,
        unique_component_id: c_int,
        class_id: c_int,
        object_id: u64,
        detector_bbox_info: NvBboxCoords,
        tracker_bbox_info: NvBboxCoords,
        confidence: c_float,
        tracker_confidence: c_float,
        rect_params: NvOsdRectParams,
        mask_params: NvOsdMaskParams,
        text_params: NvOsdTextParams,
    }

    #[link(name = "nvdsgst_meta")]
    extern "C" {
        fn gst_buffer_get_nvds_batch_meta(
            buffer: *mut gstreamer::ffi::GstBuffer,
        ) -> *mut NvDsBatchMeta;
    }

    /// Probe body: label every object of the buffer's batch meta.
    pub(super) fn annotate_buffer(
        annotator: &FrameAnnotator,
        buffer: &gstreamer::BufferRef,
    ) -> AnnotationSummary {
        let mut batch = NvDsBatch::from_buffer(buffer);
        annotator.annotate(batch.as_mut())
    }

    /// The batch meta of one buffer, borrowed for the duration of a probe call.
    pub(super) struct NvDsBatch<'a> {
        meta: NonNull<NvDsBatchMeta>,
        _buffer: PhantomData<&'a gstreamer::BufferRef>,
    }

    impl<'a> NvDsBatch<'a> {
        /// `None` when no inference element has attached batch meta yet.
        pub(super) fn from_buffer(buffer: &'a gstreamer::BufferRef) -> Option<Self> {
            // SAFETY: the buffer is live for 'a; the lookup only reads its meta list.
            let meta = unsafe { gst_buffer_get_nvds_batch_meta(buffer.as_ptr() as *mut _) };
            NonNull::new(meta).map(|meta| Self {
                meta,
                _buffer: PhantomData,
            })
        }
    }

    /// Walk a `GList` whose `data` pointers are `T` records.
    ///
    /// # Safety
    ///
    /// Every node and every non-null `data` must be valid and unaliased for the
    /// duration of the call.
    unsafe fn for_each_node<T>(mut node: *mut GList, mut visit: impl FnMut(&mut T)) {
        while let Some(current) = node.as_ref() {
            if let Some(record) = current.data.cast::<T>().as_mut() {
                visit(record);
            }
            node = current.next;
        }
    }

    impl FrameBatch for NvDsBatch<'_> {
        fn for_each_frame(&mut self, visit: &mut dyn FnMut(&mut dyn AnalyticsFrame)) {
            // SAFETY: the batch meta and its lists belong to the buffer borrowed
            // for 'a, and the streaming thread is the only one touching them.
            unsafe {
                let list = self.meta.as_ref().frame_meta_list;
                for_each_node::<NvDsFrameMeta>(list, |frame| visit(frame));
            }
        }
    }

    impl AnalyticsFrame for NvDsFrameMeta {
        fn for_each_object(&mut self, visit: &mut dyn FnMut(&mut dyn DetectedObject)) {
            // SAFETY: as for the frame list.
            unsafe {
                for_each_node::<NvDsObjectMeta>(self.obj_meta_list, |object| visit(object));
            }
        }
    }

    impl DetectedObject for NvDsObjectMeta {
        fn bbox(&self) -> BoundingBox {
            let rect = &self.rect_params;
            BoundingBox::new(
                f64::from(rect.left),
                f64::from(rect.top),
                f64::from(rect.width),
                f64::from(rect.height),
            )
        }

        fn set_display_text(&mut self, text: String) {
            let Ok(text) = CString::new(text) else {
                log::warn!("label contains a NUL byte, left unchanged");
                return;
            };
            // SAFETY: DeepStream releases `display_text` with g_free, so the old
            // label is freed and the new one comes from the GLib allocator.
            unsafe {
                g_free(self.text_params.display_text.cast());
                self.text_params.display_text = g_strdup(text.as_ptr());
            }
        }
    }

}
