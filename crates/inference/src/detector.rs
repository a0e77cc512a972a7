use crate::backend::ExecutionBackend;
use crate::config::ModelProfile;
use crate::error::ConfigError;
use crate::normalize::normalize_detection;
use crate::processing::post::PostProcessor;
use image::RgbImage;
use preprocess::{LetterboxPreprocessor, TargetSize};
use schema::DetectionRecord;

/// Whether the one-time warning for a non-default inference size has fired.
///
/// Reverting to the default size resets eligibility, so a later override
/// warns again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SizeOverrideState {
    Default,
    Warned,
}

/// Single-image detector: letterbox, forward pass, suppression, and
/// normalization behind a per-image failure boundary.
///
/// The model and device are loaded once and shared read-only across calls;
/// callers are expected to serialize calls per instance.
pub struct Detector<B: ExecutionBackend> {
    backend: B,
    profile: ModelProfile,
    preprocessor: LetterboxPreprocessor,
    postprocessor: PostProcessor,
    use_native_classes: bool,
    size_override: SizeOverrideState,
    host_suppression: bool,
}

impl<B: ExecutionBackend> Detector<B> {
    pub fn with_backend(backend: B, profile: ModelProfile, use_native_classes: bool) -> Self {
        // Capability is negotiated once; the decision holds for the
        // backend's lifetime.
        let host_suppression = !backend.supports_box_suppression();
        if host_suppression {
            tracing::info!(
                device = %backend.device(),
                "box suppression unsupported on device, running that step on CPU"
            );
        }

        let postprocessor = PostProcessor::new(profile.iou_threshold, profile.max_detections);

        Self {
            backend,
            preprocessor: LetterboxPreprocessor::new(),
            postprocessor,
            use_native_classes,
            size_override: SizeOverrideState::Default,
            profile,
            host_suppression,
        }
    }

    /// Whether the overlap-suppression step runs on the host rather than the
    /// backend's device.
    pub fn suppression_on_host(&self) -> bool {
        self.host_suppression
    }

    /// Run the full pipeline on one image.
    ///
    /// Always returns a well-formed record: any error inside the pipeline is
    /// caught here, logged with the image identifier, and reported through
    /// the record's failure marker. Only caller bugs (invalid size or
    /// threshold) surface as `Err`.
    pub fn generate_detections_one_image(
        &mut self,
        image: &RgbImage,
        image_id: &str,
        detection_threshold: f32,
        image_size: Option<TargetSize>,
    ) -> Result<DetectionRecord, ConfigError> {
        if !(detection_threshold > 0.0 && detection_threshold <= 1.0) {
            return Err(ConfigError::InvalidThreshold(detection_threshold));
        }
        if let Some(size) = image_size {
            let (h, w) = size.dims();
            if h == 0 || w == 0 {
                return Err(ConfigError::InvalidImageSize(size));
            }
        }

        let target = self.resolve_target_size(image_size);

        let record = match self.run_pipeline(image, detection_threshold, target) {
            Ok((detections, max_conf)) => DetectionRecord {
                file: image_id.to_string(),
                max_detection_conf: max_conf,
                detections,
                failure: None,
            },
            Err(e) => {
                tracing::error!(image_id, error = ?e, "image failed during inference");
                DetectionRecord::failed(image_id)
            }
        };

        Ok(record)
    }

    /// Apply the one-time warning policy for non-default sizes and pick the
    /// effective target.
    fn resolve_target_size(&mut self, image_size: Option<TargetSize>) -> TargetSize {
        match image_size {
            Some(size) => {
                if self.size_override == SizeOverrideState::Default {
                    tracing::warn!(size = ?size, "using caller-supplied inference size");
                    self.size_override = SizeOverrideState::Warned;
                }
                size
            }
            None => {
                self.size_override = SizeOverrideState::Default;
                TargetSize::Square(self.profile.input_size)
            }
        }
    }

    fn run_pipeline(
        &mut self,
        image: &RgbImage,
        detection_threshold: f32,
        target: TargetSize,
    ) -> anyhow::Result<(Vec<schema::Detection>, f64)> {
        let output = self
            .preprocessor
            .letterbox(image, target, self.profile.stride)?;

        let prediction = {
            let _infer_span = tracing::info_span!("model_inference").entered();
            self.backend.execute(&output.tensor)?
        };

        let survivors =
            self.postprocessor
                .process(&prediction, detection_threshold, &output.transform)?;

        let (orig_width, orig_height) = image.dimensions();
        let mut detections = Vec::with_capacity(survivors.len());
        let mut max_conf = 0.0f64;

        // Reverse of the model's emission order, for output-order stability
        // with existing consumers.
        for det in survivors.iter().rev() {
            let normalized = normalize_detection(
                det,
                orig_width,
                orig_height,
                &self.profile,
                self.use_native_classes,
            )?;
            max_conf = max_conf.max(normalized.conf);
            detections.push(normalized);
        }

        Ok((detections, max_conf))
    }
}

#[cfg(feature = "ort-backend")]
impl Detector<crate::backend::ort::OrtBackend> {
    /// Construct the detector from an ONNX model file, preferring CUDA
    /// unless forced to CPU.
    pub fn from_model_file(
        model_path: &str,
        force_cpu: bool,
        use_native_classes: bool,
    ) -> anyhow::Result<Self> {
        let backend = crate::backend::ort::OrtBackend::load(model_path, force_cpu)?;
        Ok(Self::with_backend(
            backend,
            ModelProfile::megadetector(),
            use_native_classes,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Device;
    use ndarray::{Array, ArrayD, IxDyn};

    /// Backend that replays a fixed prediction tensor.
    struct StubBackend {
        prediction: ArrayD<f32>,
        device: Device,
        device_suppression: bool,
    }

    impl StubBackend {
        /// Prediction rows of (cx, cy, w, h, objectness, class, class_score)
        /// over `num_classes` classes.
        fn new(rows: &[(f32, f32, f32, f32, f32, usize, f32)], num_classes: usize) -> Self {
            let width = 5 + num_classes;
            let mut data = vec![0.0f32; rows.len() * width];
            for (i, &(cx, cy, w, h, obj, class, score)) in rows.iter().enumerate() {
                data[i * width..i * width + 5].copy_from_slice(&[cx, cy, w, h, obj]);
                data[i * width + 5 + class] = score;
            }
            Self {
                prediction: Array::from_shape_vec(IxDyn(&[1, rows.len(), width]), data).unwrap(),
                device: Device::Cpu,
                device_suppression: true,
            }
        }
    }

    impl ExecutionBackend for StubBackend {
        fn device(&self) -> Device {
            self.device
        }

        fn supports_box_suppression(&self) -> bool {
            self.device_suppression
        }

        fn execute(&mut self, _batch: &ArrayD<f32>) -> anyhow::Result<ArrayD<f32>> {
            Ok(self.prediction.clone())
        }
    }

    fn detector(backend: StubBackend) -> Detector<StubBackend> {
        Detector::with_backend(backend, ModelProfile::megadetector(), false)
    }

    fn gray_image(width: u32, height: u32) -> RgbImage {
        RgbImage::from_pixel(width, height, image::Rgb([128, 128, 128]))
    }

    /// Full-frame single detection on a 200x100 image at the default size:
    /// the 200x100 image letterboxes to 1280x640 with no padding, so a box
    /// covering the padded frame maps back to the whole image
    #[test]
    fn test_single_full_frame_detection() {
        let backend = StubBackend::new(&[(640.0, 320.0, 1280.0, 640.0, 0.9, 0, 1.0)], 3);
        let mut det = detector(backend);
        let img = gray_image(200, 100);

        let record = det
            .generate_detections_one_image(&img, "img.jpg", 0.5, None)
            .unwrap();

        assert_eq!(record.file, "img.jpg");
        assert!(record.failure.is_none());
        assert_eq!(record.detections.len(), 1);

        let d = &record.detections[0];
        assert_eq!(d.category, "1", "native class 0 remaps to category 1");
        // f32 0.9 widens just below 0.9 and truncates to 0.899
        assert_eq!(d.conf, 0.899);
        assert_eq!(record.max_detection_conf, d.conf);
        for (got, want) in d.bbox.iter().zip([0.0, 0.0, 1.0, 1.0]) {
            assert!((got - want).abs() < 1e-3, "bbox {:?}", d.bbox);
        }
    }

    /// Two overlapping same-class boxes: the weaker one is suppressed
    #[test]
    fn test_overlap_suppression_end_to_end() {
        let backend = StubBackend::new(
            &[
                (640.0, 320.0, 400.0, 300.0, 0.9, 0, 1.0),
                (650.0, 322.0, 400.0, 300.0, 0.6, 0, 1.0),
            ],
            3,
        );
        let mut det = detector(backend);
        let img = gray_image(200, 100);

        let record = det
            .generate_detections_one_image(&img, "overlap.jpg", 0.5, None)
            .unwrap();

        assert_eq!(record.detections.len(), 1);
        assert_eq!(record.detections[0].conf, 0.899);
    }

    /// Threshold 1.0 yields zero detections and zero max confidence
    #[test]
    fn test_threshold_one_yields_empty_record() {
        let backend = StubBackend::new(&[(640.0, 320.0, 100.0, 100.0, 1.0, 0, 1.0)], 3);
        let mut det = detector(backend);
        let img = gray_image(200, 100);

        let record = det
            .generate_detections_one_image(&img, "none.jpg", 1.0, None)
            .unwrap();

        assert!(record.detections.is_empty());
        assert_eq!(record.max_detection_conf, 0.0);
        assert!(record.failure.is_none());
    }

    /// An unrecognized remapped class fails the whole image through the
    /// boundary: failure marker set, no detections, zero confidence
    #[test]
    fn test_unrecognized_class_fails_image() {
        // class 5 remaps to 6, outside {1, 2, 3}
        let backend = StubBackend::new(
            &[
                (640.0, 320.0, 100.0, 100.0, 0.9, 5, 1.0),
                (200.0, 200.0, 80.0, 80.0, 0.8, 0, 1.0),
            ],
            6,
        );
        let mut det = detector(backend);
        let img = gray_image(200, 100);

        let record = det
            .generate_detections_one_image(&img, "bad_class.jpg", 0.5, None)
            .unwrap();

        assert_eq!(record.failure.as_deref(), Some(schema::FAILURE_INFER));
        assert!(record.detections.is_empty());
        assert_eq!(record.max_detection_conf, 0.0);
    }

    /// Native-class passthrough skips remapping and validation
    #[test]
    fn test_native_class_passthrough() {
        let backend = StubBackend::new(&[(640.0, 320.0, 100.0, 100.0, 0.9, 5, 1.0)], 6);
        let mut det = Detector::with_backend(backend, ModelProfile::megadetector(), true);
        let img = gray_image(200, 100);

        let record = det
            .generate_detections_one_image(&img, "native.jpg", 0.5, None)
            .unwrap();

        assert!(record.failure.is_none());
        assert_eq!(record.detections[0].category, "5");
    }

    /// A backend error is absorbed by the per-image boundary, never raised
    #[test]
    fn test_backend_error_absorbed() {
        struct FailingBackend;
        impl ExecutionBackend for FailingBackend {
            fn device(&self) -> Device {
                Device::Cpu
            }
            fn supports_box_suppression(&self) -> bool {
                true
            }
            fn execute(&mut self, _batch: &ArrayD<f32>) -> anyhow::Result<ArrayD<f32>> {
                anyhow::bail!("device wedged")
            }
        }

        let mut det =
            Detector::with_backend(FailingBackend, ModelProfile::megadetector(), false);
        let img = gray_image(64, 64);

        let record = det
            .generate_detections_one_image(&img, "wedged.jpg", 0.5, None)
            .unwrap();

        assert_eq!(record.failure.as_deref(), Some(schema::FAILURE_INFER));
        assert_eq!(record.file, "wedged.jpg");
    }

    /// Configuration errors fail fast instead of being absorbed
    #[test]
    fn test_config_errors_fail_fast() {
        let backend = StubBackend::new(&[], 3);
        let mut det = detector(backend);
        let img = gray_image(64, 64);

        let err = det
            .generate_detections_one_image(&img, "a.jpg", 0.0, None)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidThreshold(_)));

        let err = det
            .generate_detections_one_image(&img, "a.jpg", 0.5, Some(TargetSize::Square(0)))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidImageSize(_)));
    }

    /// The non-default-size warning state machine: warned once per override
    /// episode, reset by a default-size call
    #[test]
    fn test_size_override_warning_state() {
        let backend = StubBackend::new(&[], 3);
        let mut det = detector(backend);
        let img = gray_image(64, 64);
        let small = Some(TargetSize::Square(640));

        assert_eq!(det.size_override, SizeOverrideState::Default);

        det.generate_detections_one_image(&img, "a.jpg", 0.5, small)
            .unwrap();
        assert_eq!(det.size_override, SizeOverrideState::Warned);

        // Second override call keeps the warned state (no re-warn)
        det.generate_detections_one_image(&img, "b.jpg", 0.5, small)
            .unwrap();
        assert_eq!(det.size_override, SizeOverrideState::Warned);

        // Default-size call resets eligibility
        det.generate_detections_one_image(&img, "c.jpg", 0.5, None)
            .unwrap();
        assert_eq!(det.size_override, SizeOverrideState::Default);
    }

    /// max_detection_conf always equals the maximum detection conf
    #[test]
    fn test_max_conf_matches_detections() {
        let backend = StubBackend::new(
            &[
                (200.0, 200.0, 80.0, 80.0, 0.8, 0, 1.0),
                (600.0, 400.0, 80.0, 80.0, 0.7, 1, 1.0),
                (1000.0, 500.0, 80.0, 80.0, 0.6, 2, 1.0),
            ],
            3,
        );
        let mut det = detector(backend);
        let img = gray_image(200, 100);

        let record = det
            .generate_detections_one_image(&img, "multi.jpg", 0.5, None)
            .unwrap();

        assert_eq!(record.detections.len(), 3);
        let max = record
            .detections
            .iter()
            .map(|d| d.conf)
            .fold(0.0f64, f64::max);
        assert_eq!(record.max_detection_conf, max);
    }

    /// Detections come back in reverse suppression order (ascending conf)
    #[test]
    fn test_output_order_is_reversed() {
        let backend = StubBackend::new(
            &[
                (200.0, 200.0, 80.0, 80.0, 0.6, 0, 1.0),
                (600.0, 400.0, 80.0, 80.0, 0.9, 1, 1.0),
            ],
            3,
        );
        let mut det = detector(backend);
        let img = gray_image(200, 100);

        let record = det
            .generate_detections_one_image(&img, "order.jpg", 0.5, None)
            .unwrap();

        let confs: Vec<f64> = record.detections.iter().map(|d| d.conf).collect();
        assert!(
            confs[0] < confs[1],
            "legacy convention: ascending confidence, got {:?}",
            confs
        );
    }

    /// The host-suppression fallback is decided once at construction
    #[test]
    fn test_host_suppression_negotiated_at_construction() {
        let mut backend = StubBackend::new(&[], 3);
        backend.device = Device::Cuda;
        backend.device_suppression = false;

        let det = detector(backend);
        assert!(det.suppression_on_host());
    }
}
