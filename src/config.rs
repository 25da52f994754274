//! Configuration parsing and validation.
//!
//! A run is described by one YAML file. Every section has serde defaults so a
//! minimal config only needs a dataset path; `validate()` enforces the
//! cross-field rules before any network is built.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ChrysalisError, Result};
use crate::optimizer::OptimizerConfig;

/// Main configuration for an encoder evaluation/training run.
///
/// # Example
///
/// ```rust
/// use chrysalis_rs::ChrysalisConfig;
///
/// # fn main() -> chrysalis_rs::Result<()> {
/// let mut config = ChrysalisConfig::from_preset("butterfly-128")?;
/// config.dataset.path = "./data/butterflies".to_string();
/// config.validate()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChrysalisConfig {
    /// Output root for rendered artifacts and snapshots.
    #[serde(default = "default_run_dir")]
    pub run_dir: String,

    /// Dataset configuration.
    pub dataset: DatasetConfig,

    /// Generator construction and optimizer options.
    #[serde(default)]
    pub generator: GeneratorConfig,

    /// Discriminator construction and optimizer options.
    #[serde(default)]
    pub discriminator: DiscriminatorConfig,

    /// Encoder architecture and optimizer options.
    #[serde(default)]
    pub encoder: EncoderConfig,

    /// Loss weights and pixel-loss selection.
    #[serde(default)]
    pub loss: LossConfig,

    /// Perceptual backbone selection.
    #[serde(default)]
    pub percept: PerceptConfig,

    /// Evaluation options.
    #[serde(default)]
    pub eval: EvalConfig,

    /// Training-pass options.
    #[serde(default)]
    pub training: TrainingConfig,

    /// Device, seed and distributed-worker identity.
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Target image resolution (square, power of two).
    #[serde(default = "default_resolution")]
    pub resolution: usize,

    /// Image channel count (1 or 3).
    #[serde(default = "default_img_channels")]
    pub img_channels: usize,

    /// Snapshot directory to resume generator/discriminator/EMA weights from.
    #[serde(default)]
    pub resume: Option<String>,
}

fn default_run_dir() -> String {
    "./runs/encoder-eval".into()
}

fn default_resolution() -> usize {
    128
}

fn default_img_channels() -> usize {
    3
}

/// Dataset configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Directory of PNG/JPEG images.
    pub path: String,

    /// Expect per-image labels (read from `labels.json` next to the images).
    #[serde(default)]
    pub use_labels: bool,

    /// Override for the label file path.
    #[serde(default)]
    pub labels_file: Option<String>,

    /// Cap on the number of items loaded (in filename order).
    #[serde(default)]
    pub max_items: Option<usize>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            use_labels: false,
            labels_file: None,
            max_items: None,
        }
    }
}

/// Generator construction and optimizer options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Input latent dimensionality.
    #[serde(default = "default_latent_dim")]
    pub z_dim: usize,

    /// Intermediate latent (per-layer) dimensionality.
    #[serde(default = "default_latent_dim")]
    pub w_dim: usize,

    /// Conditioning-label dimensionality (0 for unconditional).
    #[serde(default)]
    pub c_dim: usize,

    /// Channel budget divided by feature-map size to get per-level width.
    #[serde(default = "default_channel_base")]
    pub channel_base: usize,

    /// Per-level channel cap.
    #[serde(default = "default_channel_max")]
    pub channel_max: usize,

    /// Optimizer hyperparameters.
    #[serde(default = "OptimizerConfig::stylegan")]
    pub optimizer: OptimizerConfig,

    /// Lazy regularization interval (`None` disables the split).
    #[serde(default = "default_g_reg_interval")]
    pub reg_interval: Option<u64>,
}

fn default_latent_dim() -> usize {
    512
}

fn default_channel_base() -> usize {
    8192
}

fn default_channel_max() -> usize {
    512
}

fn default_g_reg_interval() -> Option<u64> {
    Some(4)
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            z_dim: default_latent_dim(),
            w_dim: default_latent_dim(),
            c_dim: 0,
            channel_base: default_channel_base(),
            channel_max: default_channel_max(),
            optimizer: OptimizerConfig::stylegan(),
            reg_interval: default_g_reg_interval(),
        }
    }
}

/// Discriminator construction and optimizer options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscriminatorConfig {
    /// Channel budget divided by feature-map size to get per-level width.
    #[serde(default = "default_channel_base")]
    pub channel_base: usize,

    /// Per-level channel cap.
    #[serde(default = "default_channel_max")]
    pub channel_max: usize,

    /// Optimizer hyperparameters.
    #[serde(default = "OptimizerConfig::stylegan")]
    pub optimizer: OptimizerConfig,

    /// Lazy regularization interval (`None` disables the split).
    #[serde(default = "default_d_reg_interval")]
    pub reg_interval: Option<u64>,
}

fn default_d_reg_interval() -> Option<u64> {
    Some(16)
}

impl Default for DiscriminatorConfig {
    fn default() -> Self {
        Self {
            channel_base: default_channel_base(),
            channel_max: default_channel_max(),
            optimizer: OptimizerConfig::stylegan(),
            reg_interval: default_d_reg_interval(),
        }
    }
}

/// Encoder architecture selector.
///
/// `idinvert` emits one latent vector replicated across synthesis layers;
/// `ae_stylegan` emits a flat vector reshaped into per-layer latents. Unknown
/// names are rejected at config parse time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncoderArch {
    /// Single latent vector, broadcast across all synthesis layers.
    #[default]
    Idinvert,
    /// Flat vector holding one latent per synthesis layer.
    AeStylegan,
}

impl EncoderArch {
    /// Parse an architecture name, failing fast on unsupported values.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "idinvert" => Ok(EncoderArch::Idinvert),
            "ae_stylegan" => Ok(EncoderArch::AeStylegan),
            other => Err(ChrysalisError::Config(format!(
                "unsupported encoder architecture: {other}"
            ))),
        }
    }

    /// Canonical config-file name.
    pub fn name(self) -> &'static str {
        match self {
            EncoderArch::Idinvert => "idinvert",
            EncoderArch::AeStylegan => "ae_stylegan",
        }
    }
}

/// Encoder architecture and optimizer options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    /// Architecture selector.
    #[serde(default)]
    pub arch: EncoderArch,

    /// Optimizer hyperparameters.
    #[serde(default)]
    pub optimizer: OptimizerConfig,

    /// Encoder checkpoint to load strictly at startup.
    #[serde(default)]
    pub checkpoint: Option<String>,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            arch: EncoderArch::Idinvert,
            optimizer: OptimizerConfig::default(),
            checkpoint: None,
        }
    }
}

/// Pixel reconstruction loss selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelLoss {
    /// Mean absolute error.
    L1,
    /// Mean squared error.
    #[default]
    L2,
}

/// Loss weights and pixel-loss selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LossConfig {
    /// Adversarial-encoder weight. Strictly positive selects the
    /// adversarial run mode (discriminator trains alongside the encoder).
    #[serde(default)]
    pub adv_enc_lambda: f64,

    /// Pixel loss kind.
    #[serde(default)]
    pub pix_loss: PixelLoss,

    /// Pixel loss weight.
    #[serde(default = "default_unit_lambda")]
    pub pix_lambda: f64,

    /// Perceptual distance weight.
    #[serde(default = "default_unit_lambda")]
    pub percept_lambda: f64,

    /// Scale of the discriminator drift regularizer.
    #[serde(default = "default_drift_epsilon")]
    pub drift_epsilon: f64,
}

fn default_unit_lambda() -> f64 {
    1.0
}

fn default_drift_epsilon() -> f64 {
    0.001
}

impl Default for LossConfig {
    fn default() -> Self {
        Self {
            adv_enc_lambda: 0.0,
            pix_loss: PixelLoss::L2,
            pix_lambda: default_unit_lambda(),
            percept_lambda: default_unit_lambda(),
            drift_epsilon: default_drift_epsilon(),
        }
    }
}

/// Perceptual backbone selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerceptBackbone {
    /// VGG-style extractor fine-tuned on the butterfly domain.
    ButterflyVgg,
    /// Generic LPIPS-style VGG extractor.
    #[default]
    LpipsVgg,
    /// ResNet-style classifier fine-tuned on CUB.
    CubResnet,
}

impl PerceptBackbone {
    /// Parse a backbone name, failing fast on unsupported values.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "butterfly_vgg" => Ok(PerceptBackbone::ButterflyVgg),
            "lpips_vgg" => Ok(PerceptBackbone::LpipsVgg),
            "cub_resnet" => Ok(PerceptBackbone::CubResnet),
            other => Err(ChrysalisError::Config(format!(
                "unsupported perceptual model: {other}"
            ))),
        }
    }

    /// Canonical config-file name.
    pub fn name(self) -> &'static str {
        match self {
            PerceptBackbone::ButterflyVgg => "butterfly_vgg",
            PerceptBackbone::LpipsVgg => "lpips_vgg",
            PerceptBackbone::CubResnet => "cub_resnet",
        }
    }
}

/// Perceptual backbone selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerceptConfig {
    /// Backbone variant.
    #[serde(default)]
    pub model: PerceptBackbone,

    /// Safetensors weights loaded strictly into the backbone.
    /// Without weights the backbone keeps its random init (still frozen).
    #[serde(default)]
    pub weights: Option<String>,
}

/// Evaluation options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalConfig {
    /// Number of source images rendered side by side with reconstructions.
    #[serde(default = "default_n_source_imgs")]
    pub n_source_imgs: usize,

    /// Seed for the snapshot grid sampler, independent of the run seed.
    #[serde(default)]
    pub grid_seed: u64,
}

fn default_n_source_imgs() -> usize {
    5
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            n_source_imgs: default_n_source_imgs(),
            grid_seed: 0,
        }
    }
}

/// Training-pass options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Images per step.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Steps in one training pass.
    #[serde(default = "default_total_steps")]
    pub total_steps: u64,

    /// Log loss terms every N steps.
    #[serde(default = "default_logging_steps")]
    pub logging_steps: u64,

    /// Horizontal-flip augmentation probability for discriminator inputs.
    #[serde(default)]
    pub augment_p: f64,
}

fn default_batch_size() -> usize {
    8
}

fn default_total_steps() -> u64 {
    100
}

fn default_logging_steps() -> u64 {
    10
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            total_steps: default_total_steps(),
            logging_steps: default_logging_steps(),
            augment_p: 0.0,
        }
    }
}

/// Device, seed and distributed-worker identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// `cpu` or `cuda`.
    #[serde(default = "default_device")]
    pub device: String,

    /// Base random seed; each worker derives `seed * world_size + rank`.
    #[serde(default)]
    pub seed: u64,

    /// Total number of distributed workers.
    #[serde(default = "default_world_size")]
    pub world_size: usize,

    /// This worker's rank in `[0, world_size)`.
    #[serde(default)]
    pub rank: usize,
}

fn default_device() -> String {
    "cpu".into()
}

fn default_world_size() -> usize {
    1
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            seed: 0,
            world_size: default_world_size(),
            rank: 0,
        }
    }
}

impl ChrysalisConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: ChrysalisConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Write configuration to a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Create a configuration from a named preset.
    ///
    /// Known presets: `butterfly-128`, `butterfly-128-adv`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for unknown preset names.
    pub fn from_preset(name: &str) -> Result<Self> {
        match name {
            "butterfly-128" => Ok(Self::butterfly_128_preset()),
            "butterfly-128-adv" => Ok(Self::butterfly_128_adv_preset()),
            other => Err(ChrysalisError::Config(format!("unknown preset: {other}"))),
        }
    }

    /// Labeled butterfly dataset at 128x128, encoder-only mode.
    #[must_use]
    pub fn butterfly_128_preset() -> Self {
        Self {
            run_dir: "./runs/butterfly-128".into(),
            dataset: DatasetConfig {
                path: "./data/butterflies".into(),
                use_labels: true,
                ..DatasetConfig::default()
            },
            generator: GeneratorConfig::default(),
            discriminator: DiscriminatorConfig::default(),
            encoder: EncoderConfig::default(),
            loss: LossConfig::default(),
            percept: PerceptConfig {
                model: PerceptBackbone::ButterflyVgg,
                weights: None,
            },
            eval: EvalConfig::default(),
            training: TrainingConfig::default(),
            runtime: RuntimeConfig::default(),
            resolution: 128,
            img_channels: 3,
            resume: None,
        }
    }

    /// Same as `butterfly-128` with the adversarial-encoder term enabled.
    #[must_use]
    pub fn butterfly_128_adv_preset() -> Self {
        let mut config = Self::butterfly_128_preset();
        config.run_dir = "./runs/butterfly-128-adv".into();
        config.loss.adv_enc_lambda = 0.1;
        config
    }

    /// Validate cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns a configuration error describing the first violated rule.
    pub fn validate(&self) -> Result<()> {
        if self.run_dir.is_empty() {
            return Err(ChrysalisError::Config("run_dir cannot be empty".into()));
        }
        if self.dataset.path.is_empty() {
            return Err(ChrysalisError::Config(
                "dataset.path cannot be empty".into(),
            ));
        }
        if !self.resolution.is_power_of_two() || self.resolution < 8 {
            return Err(ChrysalisError::Config(format!(
                "resolution must be a power of two >= 8, got {}",
                self.resolution
            )));
        }
        if self.img_channels != 1 && self.img_channels != 3 {
            return Err(ChrysalisError::Config(format!(
                "img_channels must be 1 or 3, got {}",
                self.img_channels
            )));
        }
        if self.eval.n_source_imgs == 0 {
            return Err(ChrysalisError::Config(
                "eval.n_source_imgs must be at least 1".into(),
            ));
        }
        if self.training.batch_size == 0 {
            return Err(ChrysalisError::Config(
                "training.batch_size must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.training.augment_p) {
            return Err(ChrysalisError::Config(format!(
                "training.augment_p must be in [0, 1], got {}",
                self.training.augment_p
            )));
        }
        if self.runtime.world_size == 0 {
            return Err(ChrysalisError::Config(
                "runtime.world_size must be at least 1".into(),
            ));
        }
        if self.runtime.rank >= self.runtime.world_size {
            return Err(ChrysalisError::Config(format!(
                "runtime.rank {} out of range for world_size {}",
                self.runtime.rank, self.runtime.world_size
            )));
        }
        if self.generator.reg_interval == Some(0) {
            return Err(ChrysalisError::Config(
                "generator.reg_interval must be positive when set".into(),
            ));
        }
        if self.discriminator.reg_interval == Some(0) {
            return Err(ChrysalisError::Config(
                "discriminator.reg_interval must be positive when set".into(),
            ));
        }
        for (name, lambda) in [
            ("loss.adv_enc_lambda", self.loss.adv_enc_lambda),
            ("loss.pix_lambda", self.loss.pix_lambda),
            ("loss.percept_lambda", self.loss.percept_lambda),
            ("loss.drift_epsilon", self.loss.drift_epsilon),
        ] {
            if lambda < 0.0 || !lambda.is_finite() {
                return Err(ChrysalisError::Config(format!(
                    "{name} must be finite and non-negative, got {lambda}"
                )));
            }
        }
        self.generator.optimizer.validate("generator.optimizer")?;
        self.discriminator
            .optimizer
            .validate("discriminator.optimizer")?;
        self.encoder.optimizer.validate("encoder.optimizer")?;
        Ok(())
    }
}
