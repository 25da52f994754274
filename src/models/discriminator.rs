//! Convolutional discriminator producing one realness logit per image.

use candle_core::{Device, Tensor};
use candle_nn::{conv2d, linear, Conv2d, Conv2dConfig, Linear, Module, VarBuilder, VarMap};

use crate::config::DiscriminatorConfig;
use crate::error::{ChrysalisError, Result};
use crate::models::channels_at;

/// Strided downsampling stack from the image resolution to 4x4, followed by
/// a linear head.
pub struct Discriminator {
    from_rgb: Conv2d,
    convs: Vec<Conv2d>,
    head: Linear,
    varmap: VarMap,
}

impl Discriminator {
    /// Construct a discriminator for a resolution and channel count.
    ///
    /// # Errors
    ///
    /// Rejects resolutions that are not powers of two of at least 8 and
    /// propagates construction failures.
    pub fn new(
        config: &DiscriminatorConfig,
        resolution: usize,
        img_channels: usize,
        device: &Device,
    ) -> Result<Self> {
        if !resolution.is_power_of_two() || resolution < 8 {
            return Err(ChrysalisError::Model(format!(
                "discriminator resolution must be a power of two >= 8, got {resolution}"
            )));
        }
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, candle_core::DType::F32, device);

        let from_rgb = conv2d(
            img_channels,
            channels_at(resolution, config.channel_base, config.channel_max),
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
            let in_channels = channels_at(level, config.channel_base, config.channel_max);
            let out_channels = channels_at(level / 2, config.channel_base, config.channel_max);
            convs.push(conv2d(
                in_channels,
                out_channels,
                3,
                stride2,
                vb.pp(format!("b{level}")),
            )?);
            level /= 2;
        }

        let final_channels = channels_at(4, config.channel_base, config.channel_max);
        let head = linear(final_channels * 4 * 4, 1, vb.pp("head"))?;

        Ok(Self {
            from_rgb,
            convs,
            head,
            varmap,
        })
    }

    /// Score an image batch `(B, C, H, W)` into logits `(B, 1)`.
    ///
    /// # Errors
    ///
    /// Propagates tensor failures from candle.
    pub fn forward(&self, images: &Tensor) -> Result<Tensor> {
        let mut x = self.from_rgb.forward(images)?.relu()?;
        for conv in &self.convs {
            x = conv.forward(&x)?.relu()?;
        }
        Ok(self.head.forward(&x.flatten_from(1)?)?)
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
