mod extract_features;
mod form;
mod health;
mod model_info;
mod predict;

use crate::server::SharedState;
use axum::{
    routing::{get, post},
    Router,
};

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/", get(health::healthcheck))
        .route("/health", get(health::healthcheck))
        .route("/model/info", get(model_info::model_info))
        .route("/predict", post(predict::predict))
        .route("/predict_json", post(predict::predict_json))
        .route("/extract_features", post(extract_features::extract_features))
}
