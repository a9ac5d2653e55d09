mod native;
mod ort_backend;

pub use native::HybridNet;
pub use ort_backend::OrtRegressor;

use crate::config::ModelConfig;
use ndarray::{Array2, Array4};
use std::{fmt, path::PathBuf, sync::Arc};
use thiserror::Error;

pub const MODEL_TYPE: &str = "HybridModel (ResNet-18 + Tabular)";
pub const MODEL_OUTPUT: &str = "Sp.Refractometer prediction";
pub const IMAGE_EMBEDDING_DIM: usize = 512;
pub const TABULAR_EMBEDDING_DIM: usize = 32;
pub const NUM_TABULAR_FEATURES: usize = 6;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Model not initialized")]
    NotReady,
    #[error("invalid tensor shape: {0}")]
    Shape(String),
    #[error("inference failed: {0}")]
    Runtime(String),
    #[error("inference task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<ndarray::ShapeError> for InferenceError {
    fn from(err: ndarray::ShapeError) -> Self {
        InferenceError::Shape(err.to_string())
    }
}

impl From<ort::Error> for InferenceError {
    fn from(err: ort::Error) -> Self {
        InferenceError::Runtime(err.to_string())
    }
}

/// One forward pass of the hybrid network: `[1, 3, H, W]` image and `[1, 6]`
/// tabular features in, one scaled regression value out.
pub trait Regressor: Send + Sync + 'static {
    fn forward(&self, image: &Array4<f32>, features: &Array2<f32>) -> Result<f32, InferenceError>;
}

pub(crate) fn check_batch_of_one(
    image: &Array4<f32>,
    features: &Array2<f32>,
) -> Result<(), InferenceError> {
    let (batch, channels, height, width) = image.dim();
    if batch != 1 || channels != 3 || height == 0 || width == 0 {
        return Err(InferenceError::Shape(format!(
            "expected image of shape [1, 3, H, W], got {:?}",
            image.shape()
        )));
    }
    if features.dim() != (1, NUM_TABULAR_FEATURES) {
        return Err(InferenceError::Shape(format!(
            "expected features of shape [1, {}], got {:?}",
            NUM_TABULAR_FEATURES,
            features.shape()
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub enum WeightsSource {
    File(PathBuf),
    Untrained { seed: u64 },
}

impl fmt::Display for WeightsSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WeightsSource::File(path) => write!(f, "{}", path.display()),
            WeightsSource::Untrained { seed } => write!(f, "untrained (seed {})", seed),
        }
    }
}

enum PredictorState {
    Uninitialized,
    Ready {
        regressor: Arc<dyn Regressor>,
        source: WeightsSource,
    },
}

pub struct HybridPredictor {
    state: PredictorState,
}

impl HybridPredictor {
    pub fn uninitialized() -> Self {
        Self {
            state: PredictorState::Uninitialized,
        }
    }

    pub fn ready(regressor: Arc<dyn Regressor>, source: WeightsSource) -> Self {
        Self {
            state: PredictorState::Ready { regressor, source },
        }
    }

    /// Uses the first existing weights file; an untrained network otherwise.
    pub fn load(model_config: &ModelConfig) -> Self {
        if let Some(path) = model_config.locate_weights() {
            match OrtRegressor::new(&path, model_config) {
                Ok(regressor) => {
                    tracing::info!("Model loaded from {:?}", path);
                    return Self::ready(Arc::new(regressor), WeightsSource::File(path));
                }
                Err(e) => {
                    tracing::error!("Error loading model from {:?}: {}", path, e);
                }
            }
        } else {
            tracing::warn!(
                "No model file found in {:?}",
                model_config.weights_candidates
            );
        }

        tracing::warn!("Using untrained model (seed {})", model_config.seed);
        Self::ready(
            Arc::new(HybridNet::untrained(model_config.seed)),
            WeightsSource::Untrained {
                seed: model_config.seed,
            },
        )
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, PredictorState::Ready { .. })
    }

    pub fn device(&self) -> &'static str {
        "cpu"
    }

    pub fn weights(&self) -> Option<&WeightsSource> {
        match &self.state {
            PredictorState::Ready { source, .. } => Some(source),
            PredictorState::Uninitialized => None,
        }
    }

    /// Runs on the blocking pool; the forward pass is CPU bound.
    pub async fn predict(
        &self,
        image: Array4<f32>,
        features: Array2<f32>,
    ) -> Result<f32, InferenceError> {
        let regressor = match &self.state {
            PredictorState::Ready { regressor, .. } => regressor.clone(),
            PredictorState::Uninitialized => return Err(InferenceError::NotReady),
        };
        check_batch_of_one(&image, &features)?;

        tokio::task::spawn_blocking(move || regressor.forward(&image, &features)).await?
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Sum of all inputs, enough to tell inputs apart.
    pub(crate) struct MockRegressor;

    impl Regressor for MockRegressor {
        fn forward(
            &self,
            image: &Array4<f32>,
            features: &Array2<f32>,
        ) -> Result<f32, InferenceError> {
            Ok(image.sum() + features.sum())
        }
    }

    #[tokio::test]
    async fn test_uninitialized_predictor_is_not_ready() {
        let predictor = HybridPredictor::uninitialized();
        assert!(!predictor.is_ready());
        assert!(predictor.weights().is_none());

        let result = predictor
            .predict(Array4::zeros((1, 3, 224, 224)), Array2::zeros((1, 6)))
            .await;
        assert!(matches!(result, Err(InferenceError::NotReady)));
    }

    #[tokio::test]
    async fn test_ready_predictor_forwards() {
        let predictor = HybridPredictor::ready(
            Arc::new(MockRegressor),
            WeightsSource::File(PathBuf::from("models/40_epochs.onnx")),
        );
        assert!(predictor.is_ready());

        let value = predictor
            .predict(Array4::ones((1, 3, 2, 2)), Array2::ones((1, 6)))
            .await
            .unwrap();
        assert_eq!(value, 18.0);
    }

    #[tokio::test]
    async fn test_shape_mismatch_is_rejected() {
        let predictor =
            HybridPredictor::ready(Arc::new(MockRegressor), WeightsSource::Untrained { seed: 0 });

        let result = predictor
            .predict(Array4::zeros((1, 4, 224, 224)), Array2::zeros((1, 6)))
            .await;
        assert!(matches!(result, Err(InferenceError::Shape(_))));

        let result = predictor
            .predict(Array4::zeros((1, 3, 224, 224)), Array2::zeros((1, 5)))
            .await;
        assert!(matches!(result, Err(InferenceError::Shape(_))));
    }

    #[test]
    fn test_load_without_weights_falls_back_to_untrained() {
        let model_config = ModelConfig {
            weights_candidates: vec![PathBuf::from("does/not/exist.onnx")],
            num_instances: 1,
            seed: 7,
            image_input: "image".into(),
            tabular_input: "tabular".into(),
            output: "output".into(),
        };
        let predictor = HybridPredictor::load(&model_config);

        assert!(predictor.is_ready());
        assert_eq!(predictor.weights(), Some(&WeightsSource::Untrained { seed: 7 }));
    }

    #[test]
    fn test_weights_source_display() {
        assert_eq!(
            WeightsSource::File(PathBuf::from("models/40_epochs.onnx")).to_string(),
            "models/40_epochs.onnx"
        );
        assert_eq!(
            WeightsSource::Untrained { seed: 3 }.to_string(),
            "untrained (seed 3)"
        );
    }
}
