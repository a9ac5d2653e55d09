use crate::{error::ApiError, features::FeatureSet};
use axum::{body::Bytes, extract::Multipart};
use std::collections::HashMap;

/// Multipart upload: one image file plus plain text fields.
#[derive(Debug, Default)]
pub struct UploadForm {
    image: Option<Bytes>,
    fields: HashMap<String, String>,
}

const IMAGE_FIELDS: [&str; 2] = ["image", "file"];

impl UploadForm {
    pub async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = UploadForm::default();
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            if IMAGE_FIELDS.contains(&name.as_str()) {
                form.image = Some(field.bytes().await?);
            } else {
                let value = field.text().await?;
                form.fields.insert(name, value);
            }
        }
        Ok(form)
    }

    pub fn image(&self) -> Result<&Bytes, ApiError> {
        self.image
            .as_ref()
            .ok_or_else(|| ApiError::Validation("field required: image".into()))
    }

    fn value<'a>(&'a self, names: &[&'a str]) -> Option<(&'a str, &'a str)> {
        names.iter().find_map(|name| {
            self.fields
                .get(*name)
                .map(|value| (*name, value.trim()))
                .filter(|(_, value)| !value.is_empty())
        })
    }

    fn float(&self, names: &[&str]) -> Result<Option<f64>, ApiError> {
        let Some((name, raw)) = self.value(names) else {
            return Ok(None);
        };
        match raw.parse::<f64>() {
            Ok(value) if value.is_finite() => Ok(Some(value)),
            _ => Err(ApiError::Validation(format!(
                "field {} is not a valid number: {:?}",
                name, raw
            ))),
        }
    }

    fn required_float(&self, names: &[&str]) -> Result<f64, ApiError> {
        self.float(names)?
            .ok_or_else(|| ApiError::Validation(format!("field required: {}", names[0])))
    }

    /// Channel fields are accepted in upper or lower case.
    pub fn feature_set(&self) -> Result<FeatureSet, ApiError> {
        Ok(FeatureSet {
            r: self.required_float(&["R", "r"])?,
            g: self.required_float(&["G", "g"])?,
            b: self.required_float(&["B", "b"])?,
            brightness: self.float(&["brightness"])?,
            rgb_sum: self.float(&["rgb_sum"])?,
            normalized_brightness: self.float(&["normalized_brightness"])?,
        })
    }
}
