use super::{InferenceError, Regressor};
use crate::config::ModelConfig;
use ndarray::{Array2, Array4};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::{
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

/// ONNX export of the trained hybrid network, served from a small pool of
/// sessions picked round-robin.
pub struct OrtRegressor {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
    image_input: String,
    tabular_input: String,
    output: String,
}

impl OrtRegressor {
    pub fn new(model_path: &Path, model_config: &ModelConfig) -> Result<Self, ort::Error> {
        let num_instances = model_config.num_instances.max(1);
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(model_path)?;
                Ok(Arc::new(Mutex::new(session)))
            })
            .collect::<Result<Vec<_>, ort::Error>>()?;

        tracing::info!("Created {} ONNX sessions", num_instances);

        Ok(Self {
            sessions: Arc::new(sessions),
            counter: Arc::new(AtomicUsize::new(0)),
            image_input: model_config.image_input.clone(),
            tabular_input: model_config.tabular_input.clone(),
            output: model_config.output.clone(),
        })
    }
}

impl Regressor for OrtRegressor {
    fn forward(&self, image: &Array4<f32>, features: &Array2<f32>) -> Result<f32, InferenceError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let mut session = self.sessions[index]
            .lock()
            .map_err(|e| InferenceError::Runtime(format!("session mutex poisoned: {}", e)))?;

        tracing::debug!("Handling request with session {}", index);
        let image = image.as_standard_layout();
        let features = features.as_standard_layout();

        let image_tensor = TensorRef::from_array_view(image.view())?;
        let tabular_tensor = TensorRef::from_array_view(features.view())?;

        let outputs = session.run(ort::inputs![
            self.image_input.as_str() => image_tensor,
            self.tabular_input.as_str() => tabular_tensor
        ])?;

        let (_shape, data) = outputs[self.output.as_str()].try_extract_tensor::<f32>()?;
        data.first().copied().ok_or_else(|| {
            InferenceError::Shape(format!("model output `{}` is empty", self.output))
        })
    }
}
