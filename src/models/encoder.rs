//! The two encoder architectures under evaluation.
//!
//! `idinvert` regresses a single intermediate latent (width 512) that the
//! evaluation pipeline replicates across all synthesis layers; `ae_stylegan`
//! regresses one flat vector holding all per-layer latents at once
//! (`L * 512`). Both share a strided convolutional backbone; only the head
//! width differs. `Encoder` wraps them behind one forward call so the
//! orchestrator never branches on the architecture outside latent expansion.

use candle_core::{Device, Tensor};
use candle_nn::{conv2d, linear, Conv2d, Conv2dConfig, Linear, Module, VarBuilder, VarMap};

use crate::config::EncoderArch;
use crate::error::{ChrysalisError, Result};
use crate::models::generator::num_latents;

/// Fixed per-layer latent width shared by both architectures.
pub const LATENT_WIDTH: usize = 512;

/// Shared strided backbone: image to a flat feature vector.
struct ConvStack {
    from_rgb: Conv2d,
    convs: Vec<Conv2d>,
    feature_dim: usize,
}

impl ConvStack {
    fn new(resolution: usize, img_channels: usize, vb: VarBuilder) -> Result<Self> {
        // Modest fixed widths; the encoder is the module under training and
        // stays cheap relative to the frozen generator.
        let width_for = |level: usize| (1024 / level).clamp(8, 64);

        let from_rgb = conv2d(
            img_channels,
            width_for(resolution),
            1,
            Conv2dConfig::default(),
            vb.pp("from_rgb"),
        )?;
        let stride2 = Conv2dConfig {
            padding: 1,
            stride: 2,
            ..Conv2dConfig::default()
        };
        let mut convs = Vec::new();
        let mut level = resolution;
        while level > 4 {
            convs.push(conv2d(
                width_for(level),
                width_for(level / 2),
                3,
                stride2,
                vb.pp(format!("b{level}")),
            )?);
            level /= 2;
        }
        Ok(Self {
            from_rgb,
            convs,
            feature_dim: width_for(4) * 4 * 4,
        })
    }

    fn forward(&self, images: &Tensor) -> Result<Tensor> {
        let mut x = self.from_rgb.forward(images)?.relu()?;
        for conv in &self.convs {
            x = conv.forward(&x)?.relu()?;
        }
        Ok(x.flatten_from(1)?)
    }
}

/// Encoder regressing one shared latent vector `(B, 512)`.
pub struct IdInvertEncoder {
    stack: ConvStack,
    head: Linear,
}

impl IdInvertEncoder {
    fn new(resolution: usize, img_channels: usize, vb: VarBuilder) -> Result<Self> {
        let stack = ConvStack::new(resolution, img_channels, vb.pp("stack"))?;
        let head = linear(stack.feature_dim, LATENT_WIDTH, vb.pp("head"))?;
        Ok(Self { stack, head })
    }

    fn forward(&self, images: &Tensor) -> Result<Tensor> {
        Ok(self.head.forward(&self.stack.forward(images)?)?)
    }
}

/// Encoder regressing all per-layer latents as one flat vector
/// `(B, L * 512)`.
pub struct AeStyleGanEncoder {
    stack: ConvStack,
    head: Linear,
}

impl AeStyleGanEncoder {
    fn new(resolution: usize, img_channels: usize, vb: VarBuilder) -> Result<Self> {
        let stack = ConvStack::new(resolution, img_channels, vb.pp("stack"))?;
        let head = linear(
            stack.feature_dim,
            num_latents(resolution) * LATENT_WIDTH,
            vb.pp("head"),
        )?;
        Ok(Self { stack, head })
    }

    fn forward(&self, images: &Tensor) -> Result<Tensor> {
        Ok(self.head.forward(&self.stack.forward(images)?)?)
    }
}

enum EncoderNet {
    IdInvert(IdInvertEncoder),
    AeStylegan(AeStyleGanEncoder),
}

/// Architecture-selected encoder with its parameter store.
pub struct Encoder {
    arch: EncoderArch,
    net: EncoderNet,
    varmap: VarMap,
}

impl Encoder {
    /// Construct an encoder of the selected architecture.
    ///
    /// # Errors
    ///
    /// Rejects resolutions that are not powers of two of at least 8 and
    /// propagates construction failures.
    pub fn new(
        arch: EncoderArch,
        resolution: usize,
        img_channels: usize,
        device: &Device,
    ) -> Result<Self> {
        if !resolution.is_power_of_two() || resolution < 8 {
            return Err(ChrysalisError::Model(format!(
                "encoder resolution must be a power of two >= 8, got {resolution}"
            )));
        }
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, candle_core::DType::F32, device);
        let net = match arch {
            EncoderArch::Idinvert => {
                EncoderNet::IdInvert(IdInvertEncoder::new(resolution, img_channels, vb)?)
            }
            EncoderArch::AeStylegan => {
                EncoderNet::AeStylegan(AeStyleGanEncoder::new(resolution, img_channels, vb)?)
            }
        };
        Ok(Self { arch, net, varmap })
    }

    /// Raw latent output: `(B, 512)` for `idinvert`, `(B, L * 512)` for
    /// `ae_stylegan`. Layer expansion happens in the evaluation pipeline.
    ///
    /// # Errors
    ///
    /// Propagates tensor failures from candle.
    pub fn forward(&self, images: &Tensor) -> Result<Tensor> {
        match &self.net {
            EncoderNet::IdInvert(net) => net.forward(images),
            EncoderNet::AeStylegan(net) => net.forward(images),
        }
    }

    /// The selected architecture.
    #[must_use]
    pub fn arch(&self) -> EncoderArch {
        self.arch
    }

    /// Parameter store, for checkpointing and optimizer construction.
    #[must_use]
    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    /// Mutable parameter store, for strict checkpoint loads.
    pub fn varmap_mut(&mut self) -> &mut VarMap {
        &mut self.varmap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idinvert_output_width() {
        let device = Device::Cpu;
        let encoder = Encoder::new(EncoderArch::Idinvert, 32, 3, &device).unwrap();
        let images = Tensor::randn(0f32, 1f32, (2, 3, 32, 32), &device).unwrap();
        let latent = encoder.forward(&images).unwrap();
        assert_eq!(latent.dims(), &[2, LATENT_WIDTH]);
    }

    #[test]
    fn test_ae_stylegan_output_width() {
        let device = Device::Cpu;
        let encoder = Encoder::new(EncoderArch::AeStylegan, 32, 3, &device).unwrap();
        let images = Tensor::randn(0f32, 1f32, (2, 3, 32, 32), &device).unwrap();
        let latent = encoder.forward(&images).unwrap();
        assert_eq!(latent.dims(), &[2, num_latents(32) * LATENT_WIDTH]);
    }

    #[test]
    fn test_rejects_bad_resolution() {
        assert!(Encoder::new(EncoderArch::Idinvert, 33, 3, &Device::Cpu).is_err());
    }
}
