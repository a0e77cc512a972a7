use super::{Device, ExecutionBackend};
use ndarray::ArrayD;
use ort::{
    session::{Session, builder::GraphOptimizationLevel},
    value::TensorRef,
};

pub struct OrtBackend {
    session: Session,
    device: Device,
}

impl OrtBackend {
    /// Load a model, preferring CUDA when available and not overridden.
    ///
    /// The force-CPU flag is honored unconditionally; otherwise a failed CUDA
    /// session creation falls back to CPU with a warning.
    pub fn load(path: &str, force_cpu: bool) -> anyhow::Result<Self> {
        if force_cpu {
            return Self::load_with_device(path, Device::Cpu);
        }
        match Self::load_with_device(path, Device::Cuda) {
            Ok(backend) => Ok(backend),
            Err(e) => {
                tracing::warn!(error = %e, "CUDA unavailable, falling back to CPU");
                Self::load_with_device(path, Device::Cpu)
            }
        }
    }

    /// Load a model onto a specific device.
    pub fn load_with_device(path: &str, device: Device) -> anyhow::Result<Self> {
        // Initialize ORT environment (idempotent)
        let _ = ort::init().commit();

        let mut builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?;

        match device {
            Device::Cuda => {
                tracing::info!("Initializing ONNX Runtime with CUDA execution provider");
                builder = builder.with_execution_providers([
                    ort::execution_providers::CUDAExecutionProvider::default()
                        .with_device_id(0)
                        .build()
                        .error_on_failure(),
                ])?;
            }
            Device::Cpu => {
                tracing::info!("Initializing ONNX Runtime with CPU execution provider");
            }
        }

        let session = builder.commit_from_file(path)?;

        tracing::info!(model_path = path, device = %device, "Model loaded");
        Ok(Self { session, device })
    }
}

impl ExecutionBackend for OrtBackend {
    fn device(&self) -> Device {
        self.device
    }

    fn supports_box_suppression(&self) -> bool {
        // Session outputs are host tensors; suppression runs in place only
        // when the session itself executes on CPU.
        self.device == Device::Cpu
    }

    fn execute(&mut self, batch: &ArrayD<f32>) -> anyhow::Result<ArrayD<f32>> {
        let outputs = self.session.run(ort::inputs![
            "images" => TensorRef::from_array_view(batch.view())?
        ])?;

        let prediction = outputs["output0"].try_extract_array::<f32>()?;

        Ok(prediction.into_owned())
    }
}
