use axum::{response::IntoResponse, response::Json};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
pub struct Status {
    message: String,
    status: String,
}

pub async fn healthcheck() -> impl IntoResponse {
    Json(Status {
        message: "Urine Analysis API is running".into(),
        status: "healthy".into(),
    })
}
