//! Training orchestrator.
//!
//! Composes the runtime, the gradient gate, the phase plan and the
//! evaluation pipeline against the dataset and model constructors. The gate
//! runs before any optimizer exists and only gate-trainable modules are
//! submitted to the plan; the generator (both copies), the augmentation pipe
//! and the perceptual backbone never receive one. The evaluation sample set
//! is drawn once at construction and reused for every render of the run.

use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};

use crate::checkpoint;
use crate::config::ChrysalisConfig;
use crate::dataset::{FolderDataset, ImageDataset, InfiniteIndexSampler};
use crate::error::{ChrysalisError, Result};
use crate::eval::{choose_eval_samples, eval_encoder, expand_latent};
use crate::gate::{SubModule, TrainablePolicy};
use crate::grid::setup_snapshot_grid;
use crate::loss;
use crate::models::{
    build_networks, num_latents, AugmentPipe, Discriminator, Encoder, Generator, NoiseMode,
};
use crate::percept::{load_backbone, PerceptualModel};
use crate::phase::{Phase, PhaseKind, PhasePlan};
use crate::runtime::Runtime;

/// Orchestrates one evaluation or training pass.
///
/// # Example
///
/// ```no_run
/// use chrysalis_rs::{ChrysalisConfig, Trainer};
///
/// # fn main() -> chrysalis_rs::Result<()> {
/// let config = ChrysalisConfig::from_file("config.yaml")?;
/// let mut trainer = Trainer::new(config)?;
/// trainer.eval()?;
/// # Ok(())
/// # }
/// ```
pub struct Trainer {
    config: ChrysalisConfig,
    runtime: Runtime,
    dataset: FolderDataset,
    generator: Generator,
    generator_ema: Generator,
    discriminator: Discriminator,
    encoder: Encoder,
    augment: AugmentPipe,
    percept: Box<dyn PerceptualModel>,
    policy: TrainablePolicy,
    plan: PhasePlan,
    eval_samples: Vec<usize>,
}

impl Trainer {
    /// Build the full run state: runtime, dataset, networks, gate, phase
    /// plan and evaluation sample set.
    ///
    /// # Errors
    ///
    /// Configuration errors (including a dataset that does not match the
    /// configured resolution) abort before any artifact is written; missing
    /// checkpoints are resource errors.
    pub fn new(config: ChrysalisConfig) -> Result<Self> {
        config.validate()?;
        let mut runtime = Runtime::init(&config.runtime)?;

        tracing::info!("loading dataset from {}", config.dataset.path);
        let dataset = FolderDataset::load(&config.dataset)?;
        let expected = (config.img_channels, config.resolution, config.resolution);
        if dataset.image_shape() != expected {
            return Err(ChrysalisError::Config(format!(
                "dataset images are {:?}, config expects {expected:?}",
                dataset.image_shape()
            )));
        }
        tracing::info!(
            "dataset: {} images, shape {:?}, labels: {}",
            dataset.len(),
            dataset.image_shape(),
            dataset.has_labels()
        );

        tracing::info!("constructing networks");
        let (mut generator, discriminator) = build_networks(
            &config.generator,
            &config.discriminator,
            config.resolution,
            config.img_channels,
            &runtime.device,
        )?;
        let generator_ema = Generator::new(
            &config.generator,
            config.resolution,
            config.img_channels,
            &runtime.device,
        )?;
        checkpoint::copy_params(generator.varmap(), generator_ema.varmap())?;

        let mut encoder = Encoder::new(
            config.encoder.arch,
            config.resolution,
            config.img_channels,
            &runtime.device,
        )?;
        let percept = load_backbone(&config.percept, config.img_channels, &runtime.device)?;
        let augment = AugmentPipe::new(config.training.augment_p);

        if let Some(resume) = &config.resume {
            let dir = Path::new(resume);
            tracing::info!("resuming generator/discriminator weights from {resume}");
            checkpoint::load_partial(generator.varmap(), &dir.join("generator.safetensors"))?;
            checkpoint::load_partial(
                discriminator.varmap(),
                &dir.join("discriminator.safetensors"),
            )?;
            checkpoint::load_partial(
                generator_ema.varmap(),
                &dir.join("generator_ema.safetensors"),
            )?;
            // Reconstructions always render through averaged parameters.
            checkpoint::copy_params(generator_ema.varmap(), generator.varmap())?;
        }
        if let Some(ckpt) = &config.encoder.checkpoint {
            tracing::info!("loading encoder checkpoint {ckpt}");
            checkpoint::load_strict(encoder.varmap_mut(), Path::new(ckpt))?;
        }

        let policy = TrainablePolicy::for_run(config.loss.adv_enc_lambda);
        for module in SubModule::ALL {
            tracing::info!(
                "{module}: {}",
                if policy.is_trainable(module) {
                    "trainable"
                } else {
                    "frozen"
                }
            );
        }

        // The gate decides which modules get an optimizer at all; a frozen
        // module must not accumulate gradient state.
        let mut plan = PhasePlan::new();
        if policy.is_trainable(SubModule::GeneratorMapping)
            || policy.is_trainable(SubModule::GeneratorSynthesis)
        {
            plan.submit(
                "generator",
                generator.varmap().all_vars(),
                &config.generator.optimizer,
                config.generator.reg_interval,
            )?;
        }
        if policy.is_trainable(SubModule::Discriminator) {
            plan.submit(
                "discriminator",
                discriminator.varmap().all_vars(),
                &config.discriminator.optimizer,
                config.discriminator.reg_interval,
            )?;
        }
        plan.submit(
            "encoder",
            encoder.varmap().all_vars(),
            &config.encoder.optimizer,
            None,
        )?;
        for phase in plan.phases() {
            tracing::info!("phase {} (cadence {})", phase.name, phase.cadence);
        }

        let eval_samples = choose_eval_samples(
            &mut runtime.rng,
            dataset.len(),
            config.eval.n_source_imgs,
        )?;
        std::fs::create_dir_all(&config.run_dir)?;

        Ok(Self {
            config,
            runtime,
            dataset,
            generator,
            generator_ema,
            discriminator,
            encoder,
            augment,
            percept,
            policy,
            plan,
            eval_samples,
        })
    }

    /// Run one evaluation pass: export the reals grid and render the
    /// side-by-side comparisons for the run's fixed sample set.
    ///
    /// # Errors
    ///
    /// Propagates grid, pipeline and filesystem failures.
    pub fn eval(&mut self) -> Result<Vec<PathBuf>> {
        self.export_reals_grid()?;
        eval_encoder(
            &self.encoder,
            &self.generator.synthesis,
            &self.dataset,
            &self.eval_samples,
            self.config.resolution,
            Path::new(&self.config.run_dir),
            &self.runtime.device,
        )
    }

    /// Run one bounded training pass over the phase plan, then snapshot.
    ///
    /// # Errors
    ///
    /// Propagates dataset, loss and optimizer failures; a phase with no
    /// defined loss is a training error.
    pub fn train(&mut self) -> Result<()> {
        self.export_reals_grid()?;

        let total_steps = self.config.training.total_steps;
        let mut sampler = InfiniteIndexSampler::new(
            self.dataset.len(),
            self.runtime.derived_seed,
            self.config.runtime.world_size,
            self.config.runtime.rank,
        )?;

        let pb = ProgressBar::new(total_steps);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos:>6}/{len:6} {msg}")?
            .progress_chars("#>-");
        pb.set_style(style);

        for step in 0..total_steps {
            let indices = sampler.next_batch(self.config.training.batch_size);
            let real = self
                .dataset
                .batch(&indices, &self.runtime.device)?
                .affine(1.0 / 127.5, -1.0)?;

            let due: Vec<Phase> = self.plan.due(step).cloned().collect();
            let mut last_loss = 0f32;
            for phase in &due {
                let loss = self.run_phase(phase, &real)?;
                last_loss = loss.to_scalar::<f32>()?;
                self.plan.optimizer_mut(phase.optimizer).step(&loss)?;
            }

            pb.set_message(format!("{last_loss:.4}"));
            pb.inc(1);
            if (step + 1) % self.config.training.logging_steps == 0 {
                tracing::info!(
                    "step {}/{total_steps}, phases {:?}, loss {last_loss:.4}",
                    step + 1,
                    due.iter().map(|p| p.name.as_str()).collect::<Vec<_>>()
                );
            }
        }
        pb.finish_with_message("training pass complete");

        let config_yaml = serde_yaml::to_string(&self.config)?;
        checkpoint::save_snapshot(
            Path::new(&self.config.run_dir),
            total_steps,
            &[
                ("generator", self.generator.varmap()),
                ("generator_ema", self.generator_ema.varmap()),
                ("discriminator", self.discriminator.varmap()),
                ("encoder", self.encoder.varmap()),
            ],
            &config_yaml,
        )?;
        Ok(())
    }

    /// Compute the loss of one due phase. The returned tensor is what the
    /// phase's optimizer steps on.
    fn run_phase(&mut self, phase: &Phase, real: &candle_core::Tensor) -> Result<candle_core::Tensor> {
        match (phase.module.as_str(), phase.kind) {
            ("encoder", PhaseKind::Combined) => self.encoder_loss(real),
            ("discriminator", PhaseKind::Main | PhaseKind::Combined) => {
                self.discriminator_loss(real)
            }
            ("discriminator", PhaseKind::Regularization) => {
                let logits = self.discriminator.forward(real)?;
                loss::drift_penalty(&logits, self.config.loss.drift_epsilon)
            }
            _ => Err(ChrysalisError::Training(format!(
                "no loss defined for phase {}",
                phase.name
            ))),
        }
    }

    /// Pixel + perceptual reconstruction terms, plus the non-saturating
    /// adversarial term in adversarial-encoder mode.
    fn encoder_loss(&mut self, real: &candle_core::Tensor) -> Result<candle_core::Tensor> {
        let recon = self.reconstruct(real)?;
        let mut total = loss::pixel_loss(self.config.loss.pix_loss, &recon, real)?
            .affine(self.config.loss.pix_lambda, 0.0)?;
        let percept = loss::perceptual_loss(self.percept.as_ref(), &recon, real)?;
        total = (total + percept.affine(self.config.loss.percept_lambda, 0.0)?)?;
        if self.config.loss.adv_enc_lambda > 0.0 {
            let fake_logits = self.discriminator.forward(&recon)?;
            let adv = loss::generator_logistic_loss(&fake_logits)?;
            total = (total + adv.affine(self.config.loss.adv_enc_lambda, 0.0)?)?;
        }
        Ok(total)
    }

    /// Logistic loss on augmented real images against detached
    /// reconstructions.
    fn discriminator_loss(&mut self, real: &candle_core::Tensor) -> Result<candle_core::Tensor> {
        let fake = self.reconstruct(real)?.detach();
        let fake_in = self.augment.apply(&fake, &mut self.runtime.rng)?;
        let real_in = self.augment.apply(real, &mut self.runtime.rng)?;
        let fake_logits = self.discriminator.forward(&fake_in)?;
        let real_logits = self.discriminator.forward(&real_in)?;
        loss::discriminator_logistic_loss(&real_logits, &fake_logits)
    }

    /// Encode a normalized batch and render it through the frozen synthesis
    /// network with const noise.
    fn reconstruct(&self, real: &candle_core::Tensor) -> Result<candle_core::Tensor> {
        let raw = self.encoder.forward(real)?;
        let ws = expand_latent(&raw, self.encoder.arch(), num_latents(self.config.resolution))?;
        self.generator.synthesis.forward(&ws, NoiseMode::Const)
    }

    fn export_reals_grid(&self) -> Result<()> {
        let grid = setup_snapshot_grid(&self.dataset, self.config.eval.grid_seed)?;
        let path = Path::new(&self.config.run_dir).join("reals.png");
        grid.save_png(&path)?;
        tracing::info!(
            "exported {}x{} reals grid to {}",
            grid.grid_width,
            grid.grid_height,
            path.display()
        );
        Ok(())
    }

    /// The gate's trainable/frozen assignment for this run.
    #[must_use]
    pub fn policy(&self) -> TrainablePolicy {
        self.policy
    }

    /// The constructed phases, in submission order.
    #[must_use]
    pub fn phases(&self) -> &[Phase] {
        self.plan.phases()
    }

    /// The fixed evaluation sample indices for this run.
    #[must_use]
    pub fn eval_samples(&self) -> &[usize] {
        &self.eval_samples
    }
}
