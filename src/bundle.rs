use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ServingConstants {
    pub brightness_mean: f64,
    pub brightness_std: f64,
    pub label_scale: f64,
    pub label_offset: f64,
    pub image_size: u32,
    pub channel_mean: [f32; 3],
    pub channel_std: [f32; 3],
}

impl Default for ServingConstants {
    fn default() -> Self {
        Self {
            brightness_mean: 128.0,
            brightness_std: 64.0,
            label_scale: 1000.0,
            label_offset: 1000.0,
            image_size: 224,
            channel_mean: [0.485, 0.456, 0.406],
            channel_std: [0.229, 0.224, 0.225],
        }
    }
}

pub fn sidecar_path(weights: &Path) -> PathBuf {
    weights.with_extension("yaml")
}

impl ServingConstants {
    /// Loads the sidecar next to `weights`, falling back to defaults for
    /// anything it does not set (or entirely, when there is no sidecar).
    pub fn for_weights(weights: &Path) -> Result<Self, config::ConfigError> {
        let sidecar = sidecar_path(weights);
        if !sidecar.is_file() {
            tracing::info!(
                "No serving constants found at {:?}, using defaults",
                sidecar
            );
            return Ok(Self::default());
        }

        let constants = config::Config::builder()
            .add_source(config::File::from(sidecar.clone()))
            .build()?
            .try_deserialize::<Self>()?;
        constants
            .validate()
            .map_err(config::ConfigError::Message)?;

        tracing::info!("Loaded serving constants from {:?}", sidecar);
        Ok(constants)
    }

    fn validate(&self) -> Result<(), String> {
        if self.brightness_std == 0.0 {
            return Err("brightness_std must be non-zero".into());
        }
        if self.label_scale == 0.0 {
            return Err("label_scale must be non-zero".into());
        }
        if self.channel_std.iter().any(|s| *s == 0.0) {
            return Err("channel_std entries must be non-zero".into());
        }
        if self.image_size == 0 {
            return Err("image_size must be positive".into());
        }
        Ok(())
    }
}
