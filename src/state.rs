use crate::{
    bundle::ServingConstants,
    config::ModelConfig,
    features::FeatureDeriver,
    model::{HybridPredictor, WeightsSource},
    preprocess::ImagePreprocessor,
    scaling::LabelScaler,
};

/// Everything a request needs, built once at startup and shared read-only.
pub struct ServiceContext {
    pub predictor: HybridPredictor,
    pub preprocessor: ImagePreprocessor,
    pub deriver: FeatureDeriver,
    pub scaler: LabelScaler,
}

impl ServiceContext {
    pub fn new(predictor: HybridPredictor, constants: &ServingConstants) -> Self {
        Self {
            predictor,
            preprocessor: ImagePreprocessor::from_constants(constants),
            deriver: FeatureDeriver::from_constants(constants),
            scaler: LabelScaler::from_constants(constants),
        }
    }

    pub fn initialize(model_config: &ModelConfig) -> Result<Self, config::ConfigError> {
        let predictor = HybridPredictor::load(model_config);
        let constants = match predictor.weights() {
            Some(WeightsSource::File(path)) => ServingConstants::for_weights(path)?,
            _ => ServingConstants::default(),
        };
        tracing::info!(
            "Model initialized on {} with weights {}",
            predictor.device(),
            predictor
                .weights()
                .map(ToString::to_string)
                .unwrap_or_else(|| "none".into())
        );

        Ok(Self::new(predictor, &constants))
    }
}
