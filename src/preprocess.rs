use crate::bundle::ServingConstants;
use base64::Engine;
use image::{imageops::FilterType, DynamicImage};
use ndarray::{Array, Ix4};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("Invalid base64 image payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Error decoding image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Error reading image: {0}")]
    Io(#[from] std::io::Error),
}

/// Resize and normalization pipeline for the image branch.
#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    size: u32,
    mean: [f32; 3],
    std: [f32; 3],
}

impl ImagePreprocessor {
    pub fn new(size: u32, mean: [f32; 3], std: [f32; 3]) -> Self {
        Self { size, mean, std }
    }

    pub fn from_constants(constants: &ServingConstants) -> Self {
        Self::new(
            constants.image_size,
            constants.channel_mean,
            constants.channel_std,
        )
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn decode_bytes(&self, image_data: &[u8]) -> Result<DynamicImage, PreprocessError> {
        let image_reader =
            image::ImageReader::new(std::io::Cursor::new(image_data)).with_guessed_format()?;
        Ok(image_reader.decode()?)
    }

    /// Accepts plain base64 as well as `data:image/...;base64,` URLs.
    pub fn decode_base64(&self, encoded: &str) -> Result<DynamicImage, PreprocessError> {
        let payload = match encoded.split_once(";base64,") {
            Some((prefix, data)) if prefix.starts_with("data:") => data,
            _ => encoded,
        };
        let image_data = base64::engine::general_purpose::STANDARD.decode(payload.trim())?;
        self.decode_bytes(&image_data)
    }

    /// `[1, 3, size, size]`, channel-first, normalized per channel.
    pub fn to_tensor(&self, image: &DynamicImage) -> Array<f32, Ix4> {
        let size = self.size as usize;
        let img = image::imageops::resize(
            &image.to_rgb8(),
            self.size,
            self.size,
            FilterType::Triangle,
        );

        let mut input = Array::zeros((1, 3, size, size));
        for (x, y, pixel) in img.enumerate_pixels() {
            let x = x as usize;
            let y = y as usize;
            for (c, value) in pixel.0.iter().enumerate() {
                input[[0, c, y, x]] = ((*value as f32) / 255. - self.mean[c]) / self.std[c];
            }
        }

        input
    }

    /// Blank visual signal used when a request carries no image.
    pub fn zeros(&self) -> Array<f32, Ix4> {
        let size = self.size as usize;
        Array::zeros((1, 3, size, size))
    }

    pub fn bytes_to_tensor(&self, image_data: &[u8]) -> Result<Array<f32, Ix4>, PreprocessError> {
        Ok(self.to_tensor(&self.decode_bytes(image_data)?))
    }

    pub fn base64_to_tensor(&self, encoded: &str) -> Result<Array<f32, Ix4>, PreprocessError> {
        Ok(self.to_tensor(&self.decode_base64(encoded)?))
    }
}

impl Default for ImagePreprocessor {
    fn default() -> Self {
        Self::from_constants(&ServingConstants::default())
    }
}
