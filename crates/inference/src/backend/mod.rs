use ndarray::ArrayD;
use std::fmt;

#[cfg(feature = "ort-backend")]
pub mod ort;

/// Compute device a backend executes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Cuda,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda => write!(f, "cuda"),
        }
    }
}

/// A loaded detection model plus the device it runs on.
///
/// `execute` takes one preprocessed `[1, 3, H, W]` batch and returns the raw
/// prediction `[1, N, 5 + num_classes]`: rows of (cx, cy, w, h, objectness,
/// per-class scores) in padded-image pixel coordinates.
pub trait ExecutionBackend {
    fn device(&self) -> Device;

    /// Whether overlap suppression can run where the candidates live.
    ///
    /// When false, the detector transfers candidates to the host and runs
    /// suppression on CPU for that step only; the decision is made once at
    /// construction.
    fn supports_box_suppression(&self) -> bool;

    /// Run the model's forward pass on one single-image batch.
    fn execute(&mut self, batch: &ArrayD<f32>) -> anyhow::Result<ArrayD<f32>>;
}
