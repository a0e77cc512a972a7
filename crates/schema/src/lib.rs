//! Output record types for single-image detection results.
//!
//! Field names, declaration order, and numeric precision are a compatibility
//! contract with downstream batch-aggregation consumers. Do not reorder or
//! rename fields.

use serde::{Deserialize, Serialize};

/// Failure marker recorded on a result when inference raised an error.
pub const FAILURE_INFER: &str = "Failure inference";

/// One result record per image.
///
/// `detections` keeps discovery order from post-processing; it is not
/// guaranteed sorted by confidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionRecord {
    /// Opaque image identifier, echoed back verbatim from the caller.
    pub file: String,
    /// Maximum `conf` among `detections`, 0.0 when empty or failed.
    pub max_detection_conf: f64,
    pub detections: Vec<Detection>,
    /// Present only when inference failed for this image.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl DetectionRecord {
    /// Record for an image that failed during inference: no detections,
    /// zero confidence, failure marker set.
    pub fn failed(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            max_detection_conf: 0.0,
            detections: Vec::new(),
            failure: Some(FAILURE_INFER.to_string()),
        }
    }
}

/// A single normalized detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    /// String-encoded integer category id (1-based unless the detector was
    /// constructed with native-class passthrough).
    pub category: String,
    /// Confidence, truncated to a fixed number of significant digits.
    pub conf: f64,
    /// (x_min, y_min, width, height), each in [0, 1] relative to the
    /// original image dimensions.
    pub bbox: [f64; 4],
}
