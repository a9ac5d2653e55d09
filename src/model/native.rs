use super::{
    InferenceError, Regressor, IMAGE_EMBEDDING_DIM, NUM_TABULAR_FEATURES, TABULAR_EMBEDDING_DIM,
};
use ndarray::{Array1, Array2, Array3, Array4, Axis};
use rand::{rngs::StdRng, Rng, SeedableRng};

const BATCH_NORM_EPS: f32 = 1e-5;

fn relu<D: ndarray::Dimension>(x: &mut ndarray::Array<f32, D>) {
    x.mapv_inplace(|v| v.max(0.0));
}

fn output_dim(input: usize, kernel: usize, stride: usize, padding: usize) -> Option<usize> {
    (input + 2 * padding)
        .checked_sub(kernel)
        .map(|span| span / stride + 1)
}

/// Input coordinate for an output position and kernel offset, if inside the image.
fn source_index(
    out: usize,
    offset: usize,
    stride: usize,
    padding: usize,
    len: usize,
) -> Option<usize> {
    (out * stride + offset)
        .checked_sub(padding)
        .filter(|index| *index < len)
}

struct Conv2d {
    /// `[out_channels, in_channels * kernel * kernel]`
    weight: Array2<f32>,
    in_channels: usize,
    kernel: usize,
    stride: usize,
    padding: usize,
}

impl Conv2d {
    fn random(
        rng: &mut StdRng,
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        stride: usize,
        padding: usize,
    ) -> Self {
        let fan_in = in_channels * kernel * kernel;
        let bound = (6.0 / fan_in as f32).sqrt();
        let weight =
            Array2::from_shape_fn((out_channels, fan_in), |_| rng.random_range(-bound..bound));

        Self {
            weight,
            in_channels,
            kernel,
            stride,
            padding,
        }
    }

    /// im2col followed by a single matrix product.
    fn forward(&self, input: &Array3<f32>) -> Result<Array3<f32>, InferenceError> {
        let (channels, height, width) = input.dim();
        if channels != self.in_channels {
            return Err(InferenceError::Shape(format!(
                "conv expects {} input channels, got {}",
                self.in_channels, channels
            )));
        }
        let (out_height, out_width) = match (
            output_dim(height, self.kernel, self.stride, self.padding),
            output_dim(width, self.kernel, self.stride, self.padding),
        ) {
            (Some(h), Some(w)) => (h, w),
            _ => {
                return Err(InferenceError::Shape(format!(
                    "input {}x{} is smaller than a {}x{} kernel",
                    height, width, self.kernel, self.kernel
                )))
            }
        };

        let k = self.kernel;
        let mut cols = Array2::<f32>::zeros((channels * k * k, out_height * out_width));
        for c in 0..channels {
            for kh in 0..k {
                for kw in 0..k {
                    let mut row = cols.row_mut((c * k + kh) * k + kw);
                    for oy in 0..out_height {
                        let Some(iy) =
                            source_index(oy, kh, self.stride, self.padding, height)
                        else {
                            continue;
                        };
                        for ox in 0..out_width {
                            if let Some(ix) =
                                source_index(ox, kw, self.stride, self.padding, width)
                            {
                                row[oy * out_width + ox] = input[[c, iy, ix]];
                            }
                        }
                    }
                }
            }
        }

        let output = self.weight.dot(&cols);
        Ok(output.into_shape_with_order((self.weight.nrows(), out_height, out_width))?)
    }
}

struct BatchNorm2d {
    scale: Array1<f32>,
    shift: Array1<f32>,
}

impl BatchNorm2d {
    /// Running mean 0, variance 1, unit weight, zero bias.
    fn fresh(channels: usize) -> Self {
        Self {
            scale: Array1::from_elem(channels, 1.0 / (1.0 + BATCH_NORM_EPS).sqrt()),
            shift: Array1::zeros(channels),
        }
    }

    fn forward(&self, x: &mut Array3<f32>) {
        for ((mut plane, &scale), &shift) in x
            .outer_iter_mut()
            .zip(self.scale.iter())
            .zip(self.shift.iter())
        {
            plane.mapv_inplace(|v| v * scale + shift);
        }
    }
}

fn max_pool(
    input: &Array3<f32>,
    kernel: usize,
    stride: usize,
    padding: usize,
) -> Result<Array3<f32>, InferenceError> {
    let (channels, height, width) = input.dim();
    let (out_height, out_width) = match (
        output_dim(height, kernel, stride, padding),
        output_dim(width, kernel, stride, padding),
    ) {
        (Some(h), Some(w)) => (h, w),
        _ => {
            return Err(InferenceError::Shape(format!(
                "input {}x{} is too small to pool",
                height, width
            )))
        }
    };

    Ok(Array3::from_shape_fn(
        (channels, out_height, out_width),
        |(c, oy, ox)| {
            let mut best = f32::NEG_INFINITY;
            for kh in 0..kernel {
                let Some(iy) = source_index(oy, kh, stride, padding, height) else {
                    continue;
                };
                for kw in 0..kernel {
                    if let Some(ix) = source_index(ox, kw, stride, padding, width) {
                        best = best.max(input[[c, iy, ix]]);
                    }
                }
            }
            best
        },
    ))
}

struct BasicBlock {
    conv1: Conv2d,
    bn1: BatchNorm2d,
    conv2: Conv2d,
    bn2: BatchNorm2d,
    downsample: Option<(Conv2d, BatchNorm2d)>,
}

impl BasicBlock {
    fn random(rng: &mut StdRng, in_channels: usize, out_channels: usize, stride: usize) -> Self {
        let downsample = (stride != 1 || in_channels != out_channels).then(|| {
            (
                Conv2d::random(rng, in_channels, out_channels, 1, stride, 0),
                BatchNorm2d::fresh(out_channels),
            )
        });

        Self {
            conv1: Conv2d::random(rng, in_channels, out_channels, 3, stride, 1),
            bn1: BatchNorm2d::fresh(out_channels),
            conv2: Conv2d::random(rng, out_channels, out_channels, 3, 1, 1),
            bn2: BatchNorm2d::fresh(out_channels),
            downsample,
        }
    }

    fn forward(&self, input: &Array3<f32>) -> Result<Array3<f32>, InferenceError> {
        let mut out = self.conv1.forward(input)?;
        self.bn1.forward(&mut out);
        relu(&mut out);

        let mut out = self.conv2.forward(&out)?;
        self.bn2.forward(&mut out);

        let identity = match &self.downsample {
            Some((conv, bn)) => {
                let mut identity = conv.forward(input)?;
                bn.forward(&mut identity);
                identity
            }
            None => input.clone(),
        };

        out += &identity;
        relu(&mut out);
        Ok(out)
    }
}

struct ResNet18 {
    stem: Conv2d,
    stem_bn: BatchNorm2d,
    blocks: Vec<BasicBlock>,
}

impl ResNet18 {
    fn random(rng: &mut StdRng) -> Self {
        let stem = Conv2d::random(rng, 3, 64, 7, 2, 3);
        let mut blocks = Vec::with_capacity(8);
        let mut in_channels = 64;
        for (out_channels, stride) in [(64, 1), (128, 2), (256, 2), (IMAGE_EMBEDDING_DIM, 2)] {
            blocks.push(BasicBlock::random(rng, in_channels, out_channels, stride));
            blocks.push(BasicBlock::random(rng, out_channels, out_channels, 1));
            in_channels = out_channels;
        }

        Self {
            stem,
            stem_bn: BatchNorm2d::fresh(64),
            blocks,
        }
    }

    /// `[3, H, W]` to a globally average pooled 512-d embedding.
    fn embed(&self, image: &Array3<f32>) -> Result<Array1<f32>, InferenceError> {
        let mut x = self.stem.forward(image)?;
        self.stem_bn.forward(&mut x);
        relu(&mut x);
        let mut x = max_pool(&x, 3, 2, 1)?;

        for block in &self.blocks {
            x = block.forward(&x)?;
        }

        let (channels, height, width) = x.dim();
        x.into_shape_with_order((channels, height * width))?
            .mean_axis(Axis(1))
            .ok_or_else(|| InferenceError::Shape("empty feature map".into()))
    }
}

struct Linear {
    weight: Array2<f32>,
    bias: Array1<f32>,
}

impl Linear {
    fn random(rng: &mut StdRng, in_features: usize, out_features: usize) -> Self {
        let bound = 1.0 / (in_features as f32).sqrt();
        Self {
            weight: Array2::from_shape_fn((out_features, in_features), |_| {
                rng.random_range(-bound..bound)
            }),
            bias: Array1::from_shape_fn(out_features, |_| rng.random_range(-bound..bound)),
        }
    }

    fn forward(&self, x: &Array1<f32>) -> Array1<f32> {
        self.weight.dot(x) + &self.bias
    }
}

/// ResNet-18 image trunk, `6 -> 64 -> 32` tabular branch and a linear head,
/// randomly initialized from a seed.
pub struct HybridNet {
    image_encoder: ResNet18,
    tabular_hidden: Linear,
    tabular_out: Linear,
    regressor: Linear,
}

impl HybridNet {
    pub fn untrained(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        Self {
            image_encoder: ResNet18::random(&mut rng),
            tabular_hidden: Linear::random(&mut rng, NUM_TABULAR_FEATURES, 64),
            tabular_out: Linear::random(&mut rng, 64, TABULAR_EMBEDDING_DIM),
            regressor: Linear::random(&mut rng, IMAGE_EMBEDDING_DIM + TABULAR_EMBEDDING_DIM, 1),
        }
    }

    fn embed_tabular(&self, features: &Array1<f32>) -> Array1<f32> {
        let mut hidden = self.tabular_hidden.forward(features);
        relu(&mut hidden);
        let mut out = self.tabular_out.forward(&hidden);
        relu(&mut out);
        out
    }
}

impl Regressor for HybridNet {
    fn forward(&self, image: &Array4<f32>, features: &Array2<f32>) -> Result<f32, InferenceError> {
        super::check_batch_of_one(image, features)?;

        let image_embedding = self
            .image_encoder
            .embed(&image.index_axis(Axis(0), 0).to_owned())?;
        let tabular_embedding = self.embed_tabular(&features.row(0).to_owned());

        let combined = ndarray::concatenate(
            Axis(0),
            &[image_embedding.view(), tabular_embedding.view()],
        )?;
        let output = self.regressor.forward(&combined);
        output
            .first()
            .copied()
            .ok_or_else(|| InferenceError::Shape("regressor produced no output".into()))
    }
}
