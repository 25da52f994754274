//! Generator with a mapping/synthesis sub-module split.
//!
//! The synthesis half consumes one latent vector per layer (`(B, L, w_dim)`)
//! and a noise-mode flag. `Const` noise adds fixed per-layer buffers so
//! repeated renders are bit-identical; `Random` draws fresh noise per call;
//! `None` disables noise injection.

use candle_core::{Device, Tensor};
use candle_nn::{conv2d, linear, Conv2d, Conv2dConfig, Linear, Module, VarBuilder, VarMap};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::config::GeneratorConfig;
use crate::error::{ChrysalisError, Result};
use crate::models::channels_at;

/// Per-layer noise injection mode for the synthesis network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoiseMode {
    /// Fixed per-layer noise buffers; deterministic across calls.
    Const,
    /// Fresh noise per call.
    Random,
    /// No noise injection.
    None,
}

/// Number of per-layer latents consumed by synthesis at a resolution:
/// `2 * log2(resolution) - 2`.
///
/// # Panics
///
/// Debug-asserts that the resolution is a power of two of at least 8; config
/// validation enforces this before any network is built.
#[must_use]
pub fn num_latents(resolution: usize) -> usize {
    debug_assert!(resolution.is_power_of_two() && resolution >= 8);
    2 * (resolution.ilog2() as usize) - 2
}

/// Latent mapping network `z (+ label embedding) -> w`.
pub struct MappingNetwork {
    embed: Option<Linear>,
    fc0: Linear,
    fc1: Linear,
}

impl MappingNetwork {
    fn new(z_dim: usize, w_dim: usize, c_dim: usize, vb: VarBuilder) -> Result<Self> {
        let embed = if c_dim > 0 {
            Some(linear(c_dim, w_dim, vb.pp("embed"))?)
        } else {
            None
        };
        let in_dim = z_dim + if c_dim > 0 { w_dim } else { 0 };
        Ok(Self {
            embed,
            fc0: linear(in_dim, w_dim, vb.pp("fc0"))?,
            fc1: linear(w_dim, w_dim, vb.pp("fc1"))?,
        })
    }

    /// Map a latent batch `(B, z_dim)` with optional conditioning labels
    /// `(B, c_dim)` to intermediate latents `(B, w_dim)`.
    ///
    /// # Errors
    ///
    /// Propagates tensor-shape failures from candle.
    pub fn forward(&self, z: &Tensor, c: Option<&Tensor>) -> Result<Tensor> {
        let mut x = normalize_2nd_moment(z)?;
        if let Some(embed) = &self.embed {
            let c = c.ok_or_else(|| {
                ChrysalisError::Model("conditional mapping network called without labels".into())
            })?;
            let y = normalize_2nd_moment(&embed.forward(c)?)?;
            x = Tensor::cat(&[&x, &y], 1)?;
        }
        let h = self.fc0.forward(&x)?.relu()?;
        Ok(self.fc1.forward(&h)?)
    }
}

fn normalize_2nd_moment(x: &Tensor) -> Result<Tensor> {
    let rms = x.sqr()?.mean_keepdim(1)?.affine(1.0, 1e-8)?.sqrt()?;
    Ok(x.broadcast_div(&rms)?)
}

/// One resolution level: two style-modulated convolutions.
struct SynthesisBlock {
    conv0: Conv2d,
    conv1: Conv2d,
    style0: Linear,
    style1: Linear,
    noise0: Tensor,
    noise1: Tensor,
    upsample: bool,
}

impl SynthesisBlock {
    #[allow(clippy::too_many_arguments)]
    fn new(
        in_channels: usize,
        out_channels: usize,
        resolution: usize,
        w_dim: usize,
        upsample: bool,
        noise_rng: &mut ChaCha8Rng,
        device: &Device,
        vb: VarBuilder,
    ) -> Result<Self> {
        let cfg = Conv2dConfig {
            padding: 1,
            ..Conv2dConfig::default()
        };
        Ok(Self {
            conv0: conv2d(in_channels, out_channels, 3, cfg, vb.pp("conv0"))?,
            conv1: conv2d(out_channels, out_channels, 3, cfg, vb.pp("conv1"))?,
            style0: linear(w_dim, out_channels, vb.pp("style0"))?,
            style1: linear(w_dim, out_channels, vb.pp("style1"))?,
            noise0: const_noise(noise_rng, resolution, device)?,
            noise1: const_noise(noise_rng, resolution, device)?,
            upsample,
        })
    }

    fn forward(
        &self,
        x: &Tensor,
        w0: &Tensor,
        w1: &Tensor,
        noise_mode: NoiseMode,
    ) -> Result<Tensor> {
        let mut x = x.clone();
        if self.upsample {
            let (_, _, h, w) = x.dims4()?;
            x = x.upsample_nearest2d(h * 2, w * 2)?;
        }
        x = self.conv0.forward(&x)?;
        x = modulate(&x, &self.style0, w0)?;
        x = inject_noise(&x, &self.noise0, noise_mode)?;
        x = x.relu()?;

        x = self.conv1.forward(&x)?;
        x = modulate(&x, &self.style1, w1)?;
        x = inject_noise(&x, &self.noise1, noise_mode)?;
        Ok(x.relu()?)
    }
}

/// Scale feature maps per channel by `1 + style(w)`.
fn modulate(x: &Tensor, style: &Linear, w: &Tensor) -> Result<Tensor> {
    let (b, c, _, _) = x.dims4()?;
    let s = style.forward(w)?.affine(1.0, 1.0)?.reshape((b, c, 1, 1))?;
    Ok(x.broadcast_mul(&s)?)
}

fn inject_noise(x: &Tensor, buffer: &Tensor, mode: NoiseMode) -> Result<Tensor> {
    match mode {
        NoiseMode::None => Ok(x.clone()),
        NoiseMode::Const => Ok(x.broadcast_add(buffer)?),
        NoiseMode::Random => {
            let (_, _, h, w) = x.dims4()?;
            let noise = Tensor::randn(0f32, 1f32, (1, 1, h, w), x.device())?;
            Ok(x.broadcast_add(&noise)?)
        }
    }
}

/// Fixed noise buffer `(1, 1, res, res)`, drawn from a dedicated stream so
/// construction order elsewhere cannot shift it.
fn const_noise(rng: &mut ChaCha8Rng, resolution: usize, device: &Device) -> Result<Tensor> {
    let data: Vec<f32> = (0..resolution * resolution)
        .map(|_| rng.gen_range(-1.0f32..1.0f32))
        .collect();
    Ok(Tensor::from_vec(data, (1, 1, resolution, resolution), device)?)
}

/// Image-synthesis sub-network: learned constant input, style-modulated
/// blocks, 1x1 projection to image channels.
pub struct SynthesisNetwork {
    input: Tensor,
    blocks: Vec<SynthesisBlock>,
    to_rgb: Conv2d,
    resolution: usize,
    num_latents: usize,
    w_dim: usize,
}

impl SynthesisNetwork {
    fn new(
        config: &GeneratorConfig,
        resolution: usize,
        img_channels: usize,
        device: &Device,
        vb: VarBuilder,
    ) -> Result<Self> {
        let c0 = channels_at(4, config.channel_base, config.channel_max);
        let input = vb.get_with_hints(
            (1, c0, 4, 4),
            "const",
            candle_nn::Init::Randn {
                mean: 0.0,
                stdev: 1.0,
            },
        )?;

        // Const noise buffers come from a fixed stream, independent of the
        // run seed, so renders are reproducible across processes.
        let mut noise_rng = ChaCha8Rng::seed_from_u64(0x6e6f_6973);
        let mut blocks = Vec::new();
        let mut in_channels = c0;
        let mut level = 4usize;
        while level <= resolution {
            let out_channels = channels_at(level, config.channel_base, config.channel_max);
            blocks.push(SynthesisBlock::new(
                in_channels,
                out_channels,
                level,
                config.w_dim,
                level > 4,
                &mut noise_rng,
                device,
                vb.pp(format!("b{level}")),
            )?);
            in_channels = out_channels;
            level *= 2;
        }

        let to_rgb = conv2d(
            in_channels,
            img_channels,
            1,
            Conv2dConfig::default(),
            vb.pp("to_rgb"),
        )?;

        Ok(Self {
            input,
            blocks,
            to_rgb,
            resolution,
            num_latents: num_latents(resolution),
            w_dim: config.w_dim,
        })
    }

    /// Synthesize images from per-layer latents `(B, L, w_dim)`.
    ///
    /// Output is `(B, img_channels, resolution, resolution)` in the
    /// generator's native −1..1 range.
    ///
    /// # Errors
    ///
    /// A latent tensor that is not `(B, L, w_dim)` for this network's `L` is
    /// a shape invariant violation.
    pub fn forward(&self, ws: &Tensor, noise_mode: NoiseMode) -> Result<Tensor> {
        let (batch, layers, w_dim) = ws.dims3().map_err(|_| {
            ChrysalisError::shape_mismatch(
                format!("latents of shape (B, {}, {})", self.num_latents, self.w_dim),
                format!("{:?}", ws.dims()),
            )
        })?;
        if layers != self.num_latents || w_dim != self.w_dim {
            return Err(ChrysalisError::shape_mismatch(
                format!("(B, {}, {})", self.num_latents, self.w_dim),
                format!("({batch}, {layers}, {w_dim})"),
            ));
        }

        let (_, c0, _, _) = self.input.dims4()?;
        let mut x = self.input.expand((batch, c0, 4, 4))?.contiguous()?;
        for (i, block) in self.blocks.iter().enumerate() {
            let w0 = ws.narrow(1, 2 * i, 1)?.squeeze(1)?;
            let w1 = ws.narrow(1, 2 * i + 1, 1)?.squeeze(1)?;
            x = block.forward(&x, &w0, &w1, noise_mode)?;
        }
        Ok(self.to_rgb.forward(&x)?.tanh()?)
    }

    /// Output resolution.
    #[must_use]
    pub fn resolution(&self) -> usize {
        self.resolution
    }

    /// Per-layer latent count `L` of this network.
    #[must_use]
    pub fn num_latents(&self) -> usize {
        self.num_latents
    }
}

/// Generator: mapping and synthesis sub-modules over one parameter store.
pub struct Generator {
    /// Latent mapping sub-module.
    pub mapping: MappingNetwork,
    /// Image-synthesis sub-module.
    pub synthesis: SynthesisNetwork,
    /// Input latent dimensionality.
    pub z_dim: usize,
    /// Intermediate latent dimensionality.
    pub w_dim: usize,
    /// Conditioning-label dimensionality (0 for unconditional).
    pub c_dim: usize,
    varmap: VarMap,
}

impl Generator {
    /// Construct a generator for a resolution and channel count.
    ///
    /// # Errors
    ///
    /// Rejects resolutions that are not powers of two of at least 8 and
    /// propagates construction failures.
    pub fn new(
        config: &GeneratorConfig,
        resolution: usize,
        img_channels: usize,
        device: &Device,
    ) -> Result<Self> {
        if !resolution.is_power_of_two() || resolution < 8 {
            return Err(ChrysalisError::Model(format!(
                "generator resolution must be a power of two >= 8, got {resolution}"
            )));
        }
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, candle_core::DType::F32, device);
        let mapping =
            MappingNetwork::new(config.z_dim, config.w_dim, config.c_dim, vb.pp("mapping"))?;
        let synthesis =
            SynthesisNetwork::new(config, resolution, img_channels, device, vb.pp("synthesis"))?;
        Ok(Self {
            mapping,
            synthesis,
            z_dim: config.z_dim,
            w_dim: config.w_dim,
            c_dim: config.c_dim,
            varmap,
        })
    }

    /// Full pass: map `z` (and optional labels) to `w`, broadcast across all
    /// synthesis layers, synthesize.
    ///
    /// # Errors
    ///
    /// Propagates mapping and synthesis failures.
    pub fn forward(&self, z: &Tensor, c: Option<&Tensor>, noise_mode: NoiseMode) -> Result<Tensor> {
        let w = self.mapping.forward(z, c)?;
        let ws = w
            .unsqueeze(1)?
            .repeat((1, self.synthesis.num_latents(), 1))?;
        self.synthesis.forward(&ws, noise_mode)
    }

    /// Parameter store, for checkpointing and EMA copies.
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

    fn tiny_config() -> GeneratorConfig {
        GeneratorConfig {
            z_dim: 16,
            w_dim: 16,
            c_dim: 0,
            channel_base: 64,
            channel_max: 16,
            ..GeneratorConfig::default()
        }
    }

    #[test]
    fn test_num_latents() {
        assert_eq!(num_latents(8), 4);
        assert_eq!(num_latents(32), 8);
        assert_eq!(num_latents(128), 12);
        assert_eq!(num_latents(1024), 18);
    }

    #[test]
    fn test_synthesis_output_shape() {
        let device = Device::Cpu;
        let g = Generator::new(&tiny_config(), 16, 3, &device).unwrap();
        let ws = Tensor::zeros((2, num_latents(16), 16), candle_core::DType::F32, &device).unwrap();
        let img = g.synthesis.forward(&ws, NoiseMode::Const).unwrap();
        assert_eq!(img.dims(), &[2, 3, 16, 16]);
    }

    #[test]
    fn test_synthesis_rejects_wrong_layer_count() {
        let device = Device::Cpu;
        let g = Generator::new(&tiny_config(), 16, 3, &device).unwrap();
        let ws = Tensor::zeros((2, 3, 16), candle_core::DType::F32, &device).unwrap();
        assert!(matches!(
            g.synthesis.forward(&ws, NoiseMode::Const),
            Err(ChrysalisError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_const_noise_deterministic_across_builds() {
        let device = Device::Cpu;
        let a = Generator::new(&tiny_config(), 16, 3, &device).unwrap();
        let b = Generator::new(&tiny_config(), 16, 3, &device).unwrap();
        let na = a.synthesis.blocks[0].noise0.flatten_all().unwrap();
        let nb = b.synthesis.blocks[0].noise0.flatten_all().unwrap();
        assert_eq!(
            na.to_vec1::<f32>().unwrap(),
            nb.to_vec1::<f32>().unwrap()
        );
    }

    #[test]
    fn test_const_noise_mode_idempotent() {
        let device = Device::Cpu;
        let g = Generator::new(&tiny_config(), 16, 3, &device).unwrap();
        let ws = Tensor::ones((1, num_latents(16), 16), candle_core::DType::F32, &device).unwrap();
        let a = g.synthesis.forward(&ws, NoiseMode::Const).unwrap();
        let b = g.synthesis.forward(&ws, NoiseMode::Const).unwrap();
        assert_eq!(
            a.flatten_all().unwrap().to_vec1::<f32>().unwrap(),
            b.flatten_all().unwrap().to_vec1::<f32>().unwrap()
        );
    }

    #[test]
    fn test_output_in_native_range() {
        let device = Device::Cpu;
        let g = Generator::new(&tiny_config(), 16, 3, &device).unwrap();
        let z = Tensor::randn(0f32, 1f32, (2, 16), &device).unwrap();
        let img = g.forward(&z, None, NoiseMode::None).unwrap();
        let flat = img.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(flat.iter().all(|v| (-1.0..=1.0).contains(v)));
    }

    #[test]
    fn test_rejects_bad_resolution() {
        assert!(Generator::new(&tiny_config(), 100, 3, &Device::Cpu).is_err());
        assert!(Generator::new(&tiny_config(), 4, 3, &Device::Cpu).is_err());
    }
}
