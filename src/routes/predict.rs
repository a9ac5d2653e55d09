use crate::{
    error::ApiError,
    features::{FeatureSet, TabularFeatures},
    routes::form::UploadForm,
    server::SharedState,
    state::ServiceContext,
};
use axum::{
    extract::{multipart::MultipartRejection, rejection::JsonRejection, Multipart, State},
    response::Json,
};
use ndarray::Array4;
use serde::{Deserialize, Serialize};
use tracing::instrument;

#[derive(Debug, Deserialize)]
pub struct PredictionRequest {
    pub features: FeatureSet,
    #[serde(default)]
    pub image_base64: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct PredictionResult {
    #[serde(rename = "predicted_sp_refractometer")]
    pub predicted_value: f64,
    pub success: bool,
    pub message: String,
}

impl PredictionResult {
    fn success(predicted_value: f64) -> Self {
        Self {
            predicted_value,
            success: true,
            message: "Prediction successful".into(),
        }
    }
}

fn ensure_ready(state: &ServiceContext) -> Result<(), ApiError> {
    if state.predictor.is_ready() {
        Ok(())
    } else {
        Err(ApiError::NotReady)
    }
}

async fn run_prediction(
    state: &ServiceContext,
    image: Array4<f32>,
    features: &TabularFeatures,
) -> Result<Json<PredictionResult>, ApiError> {
    let scaled = state.predictor.predict(image, features.to_tensor()).await?;
    let predicted_value = state.scaler.inverse(scaled as f64);

    tracing::debug!(
        "Prediction: scaled={:.4}, specific_gravity={:.4}",
        scaled,
        predicted_value
    );
    Ok(Json(PredictionResult::success(predicted_value)))
}

#[instrument(skip(state, multipart))]
pub async fn predict(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictionResult>, ApiError> {
    let form = UploadForm::read(multipart?).await?;
    let features = form.feature_set()?;
    let image_data = form.image()?;
    ensure_ready(&state)?;

    let image = state.preprocessor.bytes_to_tensor(image_data)?;
    let features = state.deriver.derive(&features);

    run_prediction(&state, image, &features).await
}

/// Without `image_base64` the image branch sees an all-zero tensor.
#[instrument(skip(state, payload))]
pub async fn predict_json(
    State(state): State<SharedState>,
    payload: Result<Json<PredictionRequest>, JsonRejection>,
) -> Result<Json<PredictionResult>, ApiError> {
    let Json(request) = payload?;
    ensure_ready(&state)?;

    let image = match request.image_base64.as_deref() {
        Some(encoded) if !encoded.is_empty() => state.preprocessor.base64_to_tensor(encoded)?,
        _ => {
            tracing::debug!("No image supplied, using a blank image tensor");
            state.preprocessor.zeros()
        }
    };
    let features = state.deriver.derive(&request.features);

    run_prediction(&state, image, &features).await
}
