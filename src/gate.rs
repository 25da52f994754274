//! Selective gradient control.
//!
//! One run trains either the encoder alone or the encoder plus the
//! discriminator, selected by the adversarial-encoder loss weight. The
//! decision is a declarative policy table computed once from that single
//! scalar and applied by the orchestrator before any optimizer exists; a
//! frozen module never accumulates gradient state.

use std::fmt;

/// Named sub-modules of the run, in submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SubModule {
    /// Latent mapping half of the generator.
    GeneratorMapping,
    /// Image-synthesis half of the generator.
    GeneratorSynthesis,
    /// Discriminator.
    Discriminator,
    /// EMA shadow copy of the generator. Updated by parameter averaging,
    /// never by gradient descent.
    GeneratorEma,
    /// Augmentation pipeline (no trainable parameters).
    AugmentPipe,
    /// The encoder under evaluation.
    Encoder,
}

impl SubModule {
    /// All sub-modules, in submission order.
    pub const ALL: [SubModule; 6] = [
        SubModule::GeneratorMapping,
        SubModule::GeneratorSynthesis,
        SubModule::Discriminator,
        SubModule::GeneratorEma,
        SubModule::AugmentPipe,
        SubModule::Encoder,
    ];

    /// Short name used in logs and phase names.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            SubModule::GeneratorMapping => "generator_mapping",
            SubModule::GeneratorSynthesis => "generator_synthesis",
            SubModule::Discriminator => "discriminator",
            SubModule::GeneratorEma => "generator_ema",
            SubModule::AugmentPipe => "augment_pipe",
            SubModule::Encoder => "encoder",
        }
    }
}

impl fmt::Display for SubModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Trainable/frozen assignment for every sub-module, fixed for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrainablePolicy {
    trainable: [bool; 6],
}

impl TrainablePolicy {
    /// Compute the policy for a run from the adversarial-encoder weight.
    ///
    /// `adv_enc_lambda > 0` selects adversarial-encoder mode (encoder and
    /// discriminator train, everything else is frozen); otherwise only the
    /// encoder trains. The EMA copy is frozen under both rules.
    #[must_use]
    pub fn for_run(adv_enc_lambda: f64) -> Self {
        let adversarial = adv_enc_lambda > 0.0;
        let mut trainable = [false; 6];
        for (slot, module) in trainable.iter_mut().zip(SubModule::ALL) {
            *slot = match module {
                SubModule::Encoder => true,
                SubModule::Discriminator => adversarial,
                _ => false,
            };
        }
        Self { trainable }
    }

    /// Whether a sub-module receives gradients this run.
    #[must_use]
    pub fn is_trainable(&self, module: SubModule) -> bool {
        self.trainable[module as usize]
    }

    /// The trainable sub-modules, in submission order.
    pub fn trainable_modules(&self) -> impl Iterator<Item = SubModule> + '_ {
        SubModule::ALL
            .into_iter()
            .filter(move |m| self.is_trainable(*m))
    }
}
