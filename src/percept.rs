//! Frozen perceptual feature extractors.
//!
//! Three interchangeable backbones selected by name: a VGG-style extractor
//! fine-tuned on the butterfly domain, a generic LPIPS-style VGG, and a
//! ResNet-style classifier fine-tuned on CUB reduced to its feature
//! extractor. All expose one `embed` call over an image batch; none ever
//! enters an optimizer. Weights load strictly from a safetensors file;
//! without a weights file the backbone keeps its random init (still frozen),
//! which is enough for smoke runs and tests.

use candle_core::{Device, Tensor, D};
use candle_nn::{conv2d, linear, Conv2d, Conv2dConfig, Linear, Module, VarBuilder, VarMap};

use crate::config::{PerceptBackbone, PerceptConfig};
use crate::error::{ChrysalisError, Result};

/// A frozen feature extractor over image batches.
pub trait PerceptualModel {
    /// Extract one feature embedding `(B, F)` per image.
    ///
    /// # Errors
    ///
    /// Propagates tensor failures from candle.
    fn embed(&self, images: &Tensor) -> Result<Tensor>;

    /// Canonical backbone name.
    fn name(&self) -> &'static str;
}

/// Build the configured backbone and load its weights if a path is set.
///
/// # Errors
///
/// A missing weights file is a resource error; construction failures
/// propagate as model errors.
pub fn load_backbone(
    config: &PerceptConfig,
    img_channels: usize,
    device: &Device,
) -> Result<Box<dyn PerceptualModel>> {
    let mut varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, candle_core::DType::F32, device);

    let model: Box<dyn PerceptualModel> = match config.model {
        PerceptBackbone::ButterflyVgg => Box::new(ButterflyVgg::new(img_channels, vb)?),
        PerceptBackbone::LpipsVgg => Box::new(LpipsVgg::new(img_channels, vb)?),
        PerceptBackbone::CubResnet => Box::new(CubResnet::new(img_channels, vb)?),
    };

    if let Some(weights) = &config.weights {
        if !std::path::Path::new(weights).is_file() {
            return Err(ChrysalisError::Resource(format!(
                "perceptual weights not found: {weights}"
            )));
        }
        varmap.load(weights)?;
        tracing::info!("loaded {} weights from {weights}", config.model.name());
    } else {
        tracing::warn!(
            "no weights configured for {}; using random (frozen) init",
            config.model.name()
        );
    }
    Ok(model)
}

fn global_avg_pool(x: &Tensor) -> Result<Tensor> {
    Ok(x.mean(D::Minus1)?.mean(D::Minus1)?)
}

/// VGG-style extractor fine-tuned on the butterfly domain.
pub struct ButterflyVgg {
    blocks: Vec<Conv2d>,
    head: Linear,
}

impl ButterflyVgg {
    fn new(img_channels: usize, vb: VarBuilder) -> Result<Self> {
        let cfg = Conv2dConfig {
            padding: 1,
            ..Conv2dConfig::default()
        };
        let widths = [img_channels, 32, 64, 128];
        let mut blocks = Vec::new();
        for (i, pair) in widths.windows(2).enumerate() {
            blocks.push(conv2d(pair[0], pair[1], 3, cfg, vb.pp(format!("conv{i}")))?);
        }
        Ok(Self {
            blocks,
            head: linear(128, 256, vb.pp("head"))?,
        })
    }
}

impl PerceptualModel for ButterflyVgg {
    fn embed(&self, images: &Tensor) -> Result<Tensor> {
        let mut x = images.clone();
        for conv in &self.blocks {
            x = conv.forward(&x)?.relu()?.max_pool2d(2)?;
        }
        Ok(self.head.forward(&global_avg_pool(&x)?)?)
    }

    fn name(&self) -> &'static str {
        "butterfly_vgg"
    }
}

/// Generic LPIPS-style VGG: embeddings concatenated from every stage so
/// distances weigh coarse and fine structure together.
pub struct LpipsVgg {
    blocks: Vec<Conv2d>,
}

impl LpipsVgg {
    fn new(img_channels: usize, vb: VarBuilder) -> Result<Self> {
        let cfg = Conv2dConfig {
            padding: 1,
            ..Conv2dConfig::default()
        };
        let widths = [img_channels, 16, 32, 64];
        let mut blocks = Vec::new();
        for (i, pair) in widths.windows(2).enumerate() {
            blocks.push(conv2d(pair[0], pair[1], 3, cfg, vb.pp(format!("conv{i}")))?);
        }
        Ok(Self { blocks })
    }
}

impl PerceptualModel for LpipsVgg {
    fn embed(&self, images: &Tensor) -> Result<Tensor> {
        let mut x = images.clone();
        let mut stages = Vec::with_capacity(self.blocks.len());
        for conv in &self.blocks {
            x = conv.forward(&x)?.relu()?.max_pool2d(2)?;
            stages.push(global_avg_pool(&x)?);
        }
        let refs: Vec<&Tensor> = stages.iter().collect();
        Ok(Tensor::cat(&refs, 1)?)
    }

    fn name(&self) -> &'static str {
        "lpips_vgg"
    }
}

/// ResNet-style classifier fine-tuned on CUB, reduced to its feature
/// extractor.
pub struct CubResnet {
    stem: Conv2d,
    res0: Conv2d,
    res1: Conv2d,
    head: Linear,
}

impl CubResnet {
    fn new(img_channels: usize, vb: VarBuilder) -> Result<Self> {
        let stem_cfg = Conv2dConfig {
            padding: 3,
            stride: 2,
            ..Conv2dConfig::default()
        };
        let res_cfg = Conv2dConfig {
            padding: 1,
            ..Conv2dConfig::default()
        };
        Ok(Self {
            stem: conv2d(img_channels, 64, 7, stem_cfg, vb.pp("stem"))?,
            res0: conv2d(64, 64, 3, res_cfg, vb.pp("res0"))?,
            res1: conv2d(64, 64, 3, res_cfg, vb.pp("res1"))?,
            head: linear(64, 256, vb.pp("head"))?,
        })
    }
}

impl PerceptualModel for CubResnet {
    fn embed(&self, images: &Tensor) -> Result<Tensor> {
        let x = self.stem.forward(images)?.relu()?.max_pool2d(2)?;
        let residual = self.res1.forward(&self.res0.forward(&x)?.relu()?)?;
        let x = (x + residual)?.relu()?;
        Ok(self.head.forward(&global_avg_pool(&x)?)?)
    }

    fn name(&self) -> &'static str {
        "cub_resnet"
    }
}
