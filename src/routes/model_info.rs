use crate::{
    features::INPUT_FEATURES,
    model::{MODEL_OUTPUT, MODEL_TYPE},
    server::SharedState,
};
use axum::{extract::State, response::Json};
use serde::Serialize;

#[derive(Serialize)]
pub struct ModelInfo {
    model_type: &'static str,
    device: &'static str,
    input_features: [&'static str; 6],
    output: &'static str,
    /// Where the weights came from; `null` until the model is loaded.
    weights: Option<String>,
}

pub async fn model_info(State(state): State<SharedState>) -> Json<ModelInfo> {
    let predictor = &state.predictor;
    Json(ModelInfo {
        model_type: MODEL_TYPE,
        device: predictor.device(),
        input_features: INPUT_FEATURES,
        output: MODEL_OUTPUT,
        weights: predictor.weights().map(ToString::to_string),
    })
}
