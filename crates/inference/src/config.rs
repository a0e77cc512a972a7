use std::env;

pub use common::Environment;

/// Constants pinned to the deployed model family.
///
/// These are configuration data inherited from the model's training setup,
/// not tunables: the truncation precisions and category set are part of the
/// output compatibility contract, and the input size/stride are what the
/// reference model was trained at.
#[derive(Debug, Clone)]
pub struct ModelProfile {
    /// Square inference size the model was trained at.
    pub input_size: u32,
    /// Letterboxed dimensions must be multiples of this.
    pub stride: u32,
    /// Significant digits kept (truncated) for confidence values.
    pub conf_digits: u32,
    /// Significant digits kept (truncated) for bbox coordinates.
    pub coord_digits: u32,
    /// Overlap-ratio cutoff for box suppression.
    pub iou_threshold: f32,
    /// Cap on surviving detections per image.
    pub max_detections: usize,
    /// Recognized 1-based category ids; a remapped class outside this set
    /// fails the image.
    pub categories: Vec<u32>,
}

impl ModelProfile {
    /// Profile for the reference animal/person/vehicle detector.
    pub fn megadetector() -> Self {
        Self {
            input_size: 1280,
            stride: 64,
            conf_digits: 3,
            coord_digits: 4,
            iou_threshold: 0.45,
            max_detections: 300,
            categories: vec![1, 2, 3],
        }
    }
}

impl Default for ModelProfile {
    fn default() -> Self {
        Self::megadetector()
    }
}

/// Detector construction parameters.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub environment: Environment,
    pub model_path: String,
    pub force_cpu: bool,
    pub use_native_classes: bool,
}

impl DetectorConfig {
    /// Load configuration from environment variables with sensible defaults
    pub fn from_env() -> anyhow::Result<Self> {
        let environment = Environment::from_env();

        let model_path = env::var("MODEL_PATH").unwrap_or_else(|_| "models/md_v5a.onnx".to_string());

        let force_cpu = env::var("FORCE_CPU")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(false);

        let use_native_classes = env::var("USE_NATIVE_CLASSES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(false);

        Ok(Self {
            environment,
            model_path,
            force_cpu,
            use_native_classes,
        })
    }
}
