//! AdamW optimizer construction with lazy-regularization adjustment.

use candle_core::{Tensor, Var};
use candle_nn::{Optimizer, ParamsAdamW};
use serde::{Deserialize, Serialize};

use crate::error::{ChrysalisError, Result};

/// Optimizer hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Learning rate.
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    /// First Adam moment coefficient.
    #[serde(default = "default_beta1")]
    pub beta1: f64,
    /// Second Adam moment coefficient.
    #[serde(default = "default_beta2")]
    pub beta2: f64,
    /// Epsilon for numerical stability.
    #[serde(default = "default_eps")]
    pub eps: f64,
    /// Weight decay.
    #[serde(default)]
    pub weight_decay: f64,
}

fn default_learning_rate() -> f64 {
    1e-4
}
fn default_beta1() -> f64 {
    0.9
}
fn default_beta2() -> f64 {
    0.999
}
fn default_eps() -> f64 {
    1e-8
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            learning_rate: default_learning_rate(),
            beta1: default_beta1(),
            beta2: default_beta2(),
            eps: default_eps(),
            weight_decay: 0.0,
        }
    }
}

impl OptimizerConfig {
    /// Hyperparameters used for StyleGAN-family generator/discriminator nets.
    #[must_use]
    pub fn stylegan() -> Self {
        Self {
            learning_rate: 2.5e-3,
            beta1: 0.0,
            beta2: 0.99,
            eps: 1e-8,
            weight_decay: 0.0,
        }
    }

    /// Compensate for a lazy regularization interval `R`.
    ///
    /// The main loss only advances the optimizer on `R` of every `R+1`
    /// conceptual updates, so the learning rate is scaled by `R/(R+1)` and
    /// each momentum coefficient becomes `beta ** (R/(R+1))`.
    #[must_use]
    pub fn lazy_adjusted(&self, interval: u64) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let ratio = interval as f64 / (interval as f64 + 1.0);
        Self {
            learning_rate: self.learning_rate * ratio,
            beta1: self.beta1.powf(ratio),
            beta2: self.beta2.powf(ratio),
            eps: self.eps,
            weight_decay: self.weight_decay,
        }
    }

    /// Check the hyperparameters are usable.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the offending field group.
    pub fn validate(&self, context: &str) -> Result<()> {
        if self.learning_rate <= 0.0 || !self.learning_rate.is_finite() {
            return Err(ChrysalisError::Config(format!(
                "{context}: learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        for (name, beta) in [("beta1", self.beta1), ("beta2", self.beta2)] {
            if !(0.0..1.0).contains(&beta) {
                return Err(ChrysalisError::Config(format!(
                    "{context}: {name} must be in [0, 1), got {beta}"
                )));
            }
        }
        Ok(())
    }

    /// Create an AdamW optimizer over the given variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the optimizer cannot be created.
    pub fn build_adamw(&self, vars: Vec<Var>) -> Result<AdamWOptimizer> {
        let params = ParamsAdamW {
            lr: self.learning_rate,
            beta1: self.beta1,
            beta2: self.beta2,
            eps: self.eps,
            weight_decay: self.weight_decay,
        };

        let opt = candle_nn::AdamW::new(vars, params)
            .map_err(|e| ChrysalisError::Training(format!("failed to create AdamW: {e}")))?;

        Ok(AdamWOptimizer { inner: opt })
    }
}

/// AdamW optimizer wrapper.
pub struct AdamWOptimizer {
    inner: candle_nn::AdamW,
}

impl AdamWOptimizer {
    /// Backward pass and parameter update for one loss value.
    ///
    /// # Errors
    ///
    /// Returns an error if the step fails.
    pub fn step(&mut self, loss: &Tensor) -> Result<()> {
        self.inner
            .backward_step(loss)
            .map_err(|e| ChrysalisError::Training(format!("optimizer step failed: {e}")))
    }

    /// Current learning rate.
    #[must_use]
    pub fn learning_rate(&self) -> f64 {
        self.inner.learning_rate()
    }

    /// Set the learning rate.
    pub fn set_learning_rate(&mut self, lr: f64) {
        self.inner.set_learning_rate(lr);
    }
}
