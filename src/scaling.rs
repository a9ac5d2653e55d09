use crate::bundle::ServingConstants;

/// Affine label transform applied at training time: `scaled = label * scale - offset`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabelScaler {
    scale: f64,
    offset: f64,
}

impl LabelScaler {
    pub fn new(scale: f64, offset: f64) -> Self {
        Self { scale, offset }
    }

    pub fn from_constants(constants: &ServingConstants) -> Self {
        Self::new(constants.label_scale, constants.label_offset)
    }

    pub fn forward(&self, label: f64) -> f64 {
        label * self.scale - self.offset
    }

    pub fn inverse(&self, scaled: f64) -> f64 {
        (scaled + self.offset) / self.scale
    }
}

impl Default for LabelScaler {
    fn default() -> Self {
        Self::from_constants(&ServingConstants::default())
    }
}
