use crate::{
    error::ApiError, features::TabularFeatures, routes::form::UploadForm, server::SharedState,
};
use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    response::Json,
};
use tracing::instrument;

/// Channel averages and brightness statistics of an uploaded photo.
#[instrument(skip(state, multipart))]
pub async fn extract_features(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<TabularFeatures>, ApiError> {
    let form = UploadForm::read(multipart?).await?;
    let image = state.preprocessor.decode_bytes(form.image()?)?;

    Ok(Json(state.deriver.extract(&image)))
}
