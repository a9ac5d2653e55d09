use crate::bundle::ServingConstants;
use image::DynamicImage;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

pub const INPUT_FEATURES: [&str; 6] = [
    "R",
    "G",
    "B",
    "brightness",
    "rgb_sum",
    "normalized_brightness",
];

/// Caller supplied channel readings. Derived fields are optional.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct FeatureSet {
    #[serde(rename = "R")]
    pub r: f64,
    #[serde(rename = "G")]
    pub g: f64,
    #[serde(rename = "B")]
    pub b: f64,
    #[serde(default)]
    pub brightness: Option<f64>,
    #[serde(default)]
    pub rgb_sum: Option<f64>,
    #[serde(default)]
    pub normalized_brightness: Option<f64>,
}

impl FeatureSet {
    pub fn from_rgb(r: f64, g: f64, b: f64) -> Self {
        Self {
            r,
            g,
            b,
            brightness: None,
            rgb_sum: None,
            normalized_brightness: None,
        }
    }
}

/// Fully populated feature vector, in the order the model was trained on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TabularFeatures {
    #[serde(rename = "R")]
    pub r: f64,
    #[serde(rename = "G")]
    pub g: f64,
    #[serde(rename = "B")]
    pub b: f64,
    pub brightness: f64,
    pub rgb_sum: f64,
    pub normalized_brightness: f64,
}

impl TabularFeatures {
    pub fn to_array(&self) -> [f32; 6] {
        [
            self.r as f32,
            self.g as f32,
            self.b as f32,
            self.brightness as f32,
            self.rgb_sum as f32,
            self.normalized_brightness as f32,
        ]
    }

    /// Batch of one, `[1, 6]`.
    pub fn to_tensor(&self) -> Array2<f32> {
        Array2::from_shape_fn((1, 6), |(_, i)| self.to_array()[i])
    }
}

impl From<TabularFeatures> for FeatureSet {
    fn from(features: TabularFeatures) -> Self {
        Self {
            r: features.r,
            g: features.g,
            b: features.b,
            brightness: Some(features.brightness),
            rgb_sum: Some(features.rgb_sum),
            normalized_brightness: Some(features.normalized_brightness),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureDeriver {
    brightness_mean: f64,
    brightness_std: f64,
}

impl FeatureDeriver {
    pub fn new(brightness_mean: f64, brightness_std: f64) -> Self {
        Self {
            brightness_mean,
            brightness_std,
        }
    }

    pub fn from_constants(constants: &ServingConstants) -> Self {
        Self::new(constants.brightness_mean, constants.brightness_std)
    }

    pub fn normalize_brightness(&self, brightness: f64) -> f64 {
        (brightness - self.brightness_mean) / self.brightness_std
    }

    /// Fills in only the fields the caller left out.
    pub fn derive(&self, features: &FeatureSet) -> TabularFeatures {
        let total = features.r + features.g + features.b;
        let brightness = features.brightness.unwrap_or(total / 3.0);
        let rgb_sum = features.rgb_sum.unwrap_or(total);
        let normalized_brightness = features
            .normalized_brightness
            .unwrap_or_else(|| self.normalize_brightness(brightness));

        TabularFeatures {
            r: features.r,
            g: features.g,
            b: features.b,
            brightness,
            rgb_sum,
            normalized_brightness,
        }
    }

    /// Channel means of the image, with brightness taken from its BT.601 grayscale.
    pub fn extract(&self, image: &DynamicImage) -> TabularFeatures {
        let rgb = image.to_rgb8();
        let pixel_count = (rgb.width() as u64 * rgb.height() as u64).max(1) as f64;

        let mut sums = [0u64; 3];
        let mut gray_sum = 0u64;
        for pixel in rgb.pixels() {
            let [r, g, b] = pixel.0;
            sums[0] += r as u64;
            sums[1] += g as u64;
            sums[2] += b as u64;
            gray_sum += luma(r, g, b) as u64;
        }

        let r = sums[0] as f64 / pixel_count;
        let g = sums[1] as f64 / pixel_count;
        let b = sums[2] as f64 / pixel_count;
        let brightness = gray_sum as f64 / pixel_count;

        TabularFeatures {
            r,
            g,
            b,
            brightness,
            rgb_sum: r + g + b,
            normalized_brightness: self.normalize_brightness(brightness),
        }
    }
}

impl Default for FeatureDeriver {
    fn default() -> Self {
        Self::from_constants(&ServingConstants::default())
    }
}

/// BT.601 gray level in 14-bit fixed point, as OpenCV's `RGB2GRAY` computes it.
fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((r as u32 * 4899 + g as u32 * 9617 + b as u32 * 1868 + 8192) >> 14) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    #[test]
    fn test_derive_reference_values() {
        let derived = FeatureDeriver::default().derive(&FeatureSet::from_rgb(100.0, 150.0, 120.0));

        assert!((derived.brightness - 123.333_333_333).abs() < 1e-6);
        assert_eq!(derived.rgb_sum, 370.0);
        assert!((derived.normalized_brightness - (-0.072_916_666)).abs() < 1e-6);
    }

    #[test]
    fn test_derive_is_idempotent() {
        let deriver = FeatureDeriver::default();
        let once = deriver.derive(&FeatureSet::from_rgb(12.0, 200.5, 73.25));
        let twice = deriver.derive(&FeatureSet::from(once));
        assert_eq!(once, twice);
    }

    #[test]
    fn test_derive_keeps_supplied_values() {
        let features = FeatureSet {
            brightness: Some(123.33),
            rgb_sum: None,
            normalized_brightness: Some(-0.073),
            ..FeatureSet::from_rgb(100.0, 150.0, 120.0)
        };
        let derived = FeatureDeriver::default().derive(&features);

        assert_eq!(derived.brightness, 123.33);
        assert_eq!(derived.rgb_sum, 370.0);
        assert_eq!(derived.normalized_brightness, -0.073);
    }

    #[test]
    fn test_normalized_brightness_follows_supplied_brightness() {
        let features = FeatureSet {
            brightness: Some(192.0),
            ..FeatureSet::from_rgb(0.0, 0.0, 0.0)
        };
        let derived = FeatureDeriver::default().derive(&features);
        assert_eq!(derived.normalized_brightness, 1.0);
    }

    #[test]
    fn test_tensor_order() {
        let derived = FeatureDeriver::default().derive(&FeatureSet::from_rgb(1.0, 2.0, 3.0));
        let tensor = derived.to_tensor();

        assert_eq!(tensor.shape(), &[1, 6]);
        assert_eq!(tensor[[0, 0]], 1.0);
        assert_eq!(tensor[[0, 1]], 2.0);
        assert_eq!(tensor[[0, 2]], 3.0);
        assert_eq!(tensor[[0, 3]], 2.0);
        assert_eq!(tensor[[0, 4]], 6.0);
        assert_eq!(tensor[[0, 5]], -1.96875);
    }

    #[test]
    fn test_feature_set_json_names() {
        let features: FeatureSet =
            serde_json::from_str(r#"{"R": 100.0, "G": 150.0, "B": 120.0}"#).unwrap();
        assert_eq!(features, FeatureSet::from_rgb(100.0, 150.0, 120.0));

        let value = serde_json::to_value(FeatureDeriver::default().derive(&features)).unwrap();
        assert_eq!(value["R"], 100.0);
        assert_eq!(value["rgb_sum"], 370.0);
    }

    #[test]
    fn test_extract_uniform_image() {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(8, 4, Rgb([100, 150, 120]));
        let extracted = FeatureDeriver::default().extract(&DynamicImage::ImageRgb8(img));

        assert_eq!(extracted.r, 100.0);
        assert_eq!(extracted.g, 150.0);
        assert_eq!(extracted.b, 120.0);
        assert_eq!(extracted.rgb_sum, 370.0);
        // (100 * 4899 + 150 * 9617 + 120 * 1868 + 8192) >> 14
        assert_eq!(extracted.brightness, 132.0);
        assert_eq!(extracted.normalized_brightness, 0.0625);
    }

    #[test]
    fn test_extract_averages_pixels() {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_fn(2, 1, |x, _| {
            if x == 0 {
                Rgb([0, 0, 0])
            } else {
                Rgb([255, 255, 255])
            }
        });
        let extracted = FeatureDeriver::default().extract(&DynamicImage::ImageRgb8(img));

        assert_eq!(extracted.r, 127.5);
        assert_eq!(extracted.brightness, 127.5);
    }

    #[test]
    fn test_brightness_uses_fixed_point_gray_level() {
        // 26.499 in floating point, 27 in 14-bit fixed point.
        assert_eq!(luma(0, 3, 217), 27);
        assert_eq!(luma(255, 255, 255), 255);

        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(2, 2, Rgb([0, 3, 217]));
        let extracted = FeatureDeriver::default().extract(&DynamicImage::ImageRgb8(img));
        assert_eq!(extracted.brightness, 27.0);
    }
}
