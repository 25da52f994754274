//! Training-phase construction and scheduling.
//!
//! A phase pairs a module's parameters with an optimizer and a cadence. A
//! module without lazy regularization gets one `<module>both` phase of
//! cadence 1. A module with regularization interval `R` gets two phases,
//! `<module>main` (every step) and `<module>reg` (every `R` steps), sharing
//! one optimizer so the momentum buffers stay coherent. The shared optimizer
//! lives in the plan's arena and both descriptors hold its id.

use candle_core::Var;

use crate::error::{ChrysalisError, Result};
use crate::optimizer::{AdamWOptimizer, OptimizerConfig};

/// Handle into the plan's optimizer arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OptimizerId(usize);

/// What a phase executes when it is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseKind {
    /// Primary and regularization losses together (no lazy split).
    Combined,
    /// Primary loss only.
    Main,
    /// Regularization loss only.
    Regularization,
}

/// One schedulable unit of the training loop. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct Phase {
    /// Phase name, `<module>both`, `<module>main` or `<module>reg`.
    pub name: String,
    /// Name of the module this phase updates.
    pub module: String,
    /// What this phase executes.
    pub kind: PhaseKind,
    /// Handle to the phase's optimizer in the plan arena.
    pub optimizer: OptimizerId,
    /// The phase executes on steps where `step % cadence == 0`.
    pub cadence: u64,
}

impl Phase {
    /// Whether this phase is scheduled at the given running step index.
    #[must_use]
    pub fn is_due(&self, step: u64) -> bool {
        step % self.cadence == 0
    }
}

/// Ordered list of phases plus the owned optimizers they reference.
///
/// Phase order matches submission order. Only gate-trainable modules should
/// be submitted; a frozen module must not get an optimizer at all.
pub struct PhasePlan {
    phases: Vec<Phase>,
    optimizers: Vec<AdamWOptimizer>,
    configs: Vec<OptimizerConfig>,
}

impl PhasePlan {
    /// Create an empty plan.
    #[must_use]
    pub fn new() -> Self {
        Self {
            phases: Vec::new(),
            optimizers: Vec::new(),
            configs: Vec::new(),
        }
    }

    /// Submit one module's parameters for scheduling.
    ///
    /// With `reg_interval = None` this emits a single `<module>both` phase of
    /// cadence 1. With `reg_interval = Some(R)` the optimizer hyperparameters
    /// are adjusted by the minibatch ratio `R/(R+1)` (learning rate scaled,
    /// betas raised to the ratio) and two phases are emitted over one shared
    /// optimizer: `<module>main` with cadence 1 and `<module>reg` with
    /// cadence `R`.
    ///
    /// # Errors
    ///
    /// A regularization interval of 0 is a configuration error.
    pub fn submit(
        &mut self,
        module: &str,
        vars: Vec<Var>,
        optimizer: &OptimizerConfig,
        reg_interval: Option<u64>,
    ) -> Result<()> {
        match reg_interval {
            None => {
                let id = self.push_optimizer(optimizer.clone(), vars)?;
                self.phases.push(Phase {
                    name: format!("{module}both"),
                    module: module.to_string(),
                    kind: PhaseKind::Combined,
                    optimizer: id,
                    cadence: 1,
                });
            }
            Some(0) => {
                return Err(ChrysalisError::Config(format!(
                    "regularization interval for {module} must be positive"
                )));
            }
            Some(interval) => {
                let adjusted = optimizer.lazy_adjusted(interval);
                let id = self.push_optimizer(adjusted, vars)?;
                self.phases.push(Phase {
                    name: format!("{module}main"),
                    module: module.to_string(),
                    kind: PhaseKind::Main,
                    optimizer: id,
                    cadence: 1,
                });
                self.phases.push(Phase {
                    name: format!("{module}reg"),
                    module: module.to_string(),
                    kind: PhaseKind::Regularization,
                    optimizer: id,
                    cadence: interval,
                });
            }
        }
        Ok(())
    }

    fn push_optimizer(&mut self, config: OptimizerConfig, vars: Vec<Var>) -> Result<OptimizerId> {
        let optimizer = config.build_adamw(vars)?;
        let id = OptimizerId(self.optimizers.len());
        self.optimizers.push(optimizer);
        self.configs.push(config);
        Ok(id)
    }

    /// All phases in submission order.
    #[must_use]
    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    /// The phases scheduled for a given running step index.
    pub fn due(&self, step: u64) -> impl Iterator<Item = &Phase> {
        self.phases.iter().filter(move |p| p.is_due(step))
    }

    /// The optimizer behind a phase handle.
    pub fn optimizer_mut(&mut self, id: OptimizerId) -> &mut AdamWOptimizer {
        &mut self.optimizers[id.0]
    }

    /// The (possibly lazy-adjusted) hyperparameters behind a phase handle.
    #[must_use]
    pub fn optimizer_config(&self, id: OptimizerId) -> &OptimizerConfig {
        &self.configs[id.0]
    }
}

impl Default for PhasePlan {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_with(module: &str, reg_interval: Option<u64>) -> PhasePlan {
        let mut plan = PhasePlan::new();
        plan.submit(module, Vec::new(), &OptimizerConfig::stylegan(), reg_interval)
            .unwrap();
        plan
    }

    #[test]
    fn test_no_regularization_single_phase() {
        let plan = plan_with("encoder", None);
        assert_eq!(plan.phases().len(), 1);
        let phase = &plan.phases()[0];
        assert_eq!(phase.name, "encoderboth");
        assert_eq!(phase.kind, PhaseKind::Combined);
        assert_eq!(phase.cadence, 1);
    }

    #[test]
    fn test_lazy_split_two_phases_shared_optimizer() {
        let plan = plan_with("discriminator", Some(16));
        assert_eq!(plan.phases().len(), 2);

        let main = &plan.phases()[0];
        let reg = &plan.phases()[1];
        assert_eq!(main.name, "discriminatormain");
        assert_eq!(main.kind, PhaseKind::Main);
        assert_eq!(main.cadence, 1);
        assert_eq!(reg.name, "discriminatorreg");
        assert_eq!(reg.kind, PhaseKind::Regularization);
        assert_eq!(reg.cadence, 16);
        assert_eq!(main.optimizer, reg.optimizer);
    }

    #[test]
    fn test_lazy_hyperparameter_transform() {
        let base = OptimizerConfig::stylegan();
        for interval in [1u64, 4, 16, 100] {
            let plan = plan_with("discriminator", Some(interval));
            let adjusted = plan.optimizer_config(plan.phases()[0].optimizer);
            #[allow(clippy::cast_precision_loss)]
            let ratio = interval as f64 / (interval as f64 + 1.0);
            assert!((adjusted.learning_rate - base.learning_rate * ratio).abs() < 1e-12);
            assert!((adjusted.beta1 - base.beta1.powf(ratio)).abs() < 1e-12);
            assert!((adjusted.beta2 - base.beta2.powf(ratio)).abs() < 1e-12);
        }
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut plan = PhasePlan::new();
        let err = plan
            .submit("discriminator", Vec::new(), &OptimizerConfig::stylegan(), Some(0))
            .unwrap_err();
        assert!(err.to_string().contains("must be positive"));
    }

    #[test]
    fn test_phase_order_matches_submission_order() {
        let mut plan = PhasePlan::new();
        plan.submit("discriminator", Vec::new(), &OptimizerConfig::stylegan(), Some(16))
            .unwrap();
        plan.submit("encoder", Vec::new(), &OptimizerConfig::default(), None)
            .unwrap();
        let names: Vec<_> = plan.phases().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["discriminatormain", "discriminatorreg", "encoderboth"]
        );
    }

    #[test]
    fn test_due_ness() {
        let mut plan = PhasePlan::new();
        plan.submit("discriminator", Vec::new(), &OptimizerConfig::stylegan(), Some(16))
            .unwrap();

        for step in [0u64, 16, 32] {
            let due: Vec<_> = plan.due(step).map(|p| p.name.as_str()).collect();
            assert_eq!(due, vec!["discriminatormain", "discriminatorreg"]);
        }
        for step in [1u64, 15, 17] {
            let due: Vec<_> = plan.due(step).map(|p| p.name.as_str()).collect();
            assert_eq!(due, vec!["discriminatormain"]);
        }
    }
}
