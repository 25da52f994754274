//! # chrysalis-rs
//!
//! Training-time evaluation loop for GAN-inversion image encoders: an
//! encoder maps real photographs into the latent space of a pretrained
//! generator so the generator can reconstruct the input.
//!
//! The algorithmic core is small and deliberate:
//!
//! - **Phase scheduling with lazy regularization** ([`phase`]) — one or two
//!   phases per trainable module; a main/reg pair shares one optimizer with
//!   hyperparameters adjusted by the minibatch ratio `R/(R+1)`.
//! - **Selective gradient control** ([`gate`]) — a policy table computed
//!   once from the adversarial-encoder weight decides which sub-modules may
//!   train this run.
//! - **Label-stratified snapshot grids** ([`grid`]) — deterministic,
//!   seed-stable visualization grids with one label class per row.
//! - **Encoder evaluation** ([`eval`]) — reconstruct a fixed sample set
//!   through the frozen generator and render side-by-side comparisons.
//!
//! Everything else (dataset, networks, checkpoints, losses) is the concrete
//! plumbing those pieces run against.
//!
//! ## Quick Start (CLI)
//!
//! ```bash
//! # Validate configuration
//! chrysalis validate config.yaml
//!
//! # Render reconstructions for the configured evaluation samples
//! chrysalis eval config.yaml
//!
//! # Run a bounded encoder training pass, then snapshot
//! chrysalis train config.yaml
//! ```
//!
//! ## Quick Start (Library)
//!
//! ```no_run
//! use chrysalis_rs::{ChrysalisConfig, Trainer};
//!
//! # fn main() -> chrysalis_rs::Result<()> {
//! let config = ChrysalisConfig::from_file("config.yaml")?;
//! let mut trainer = Trainer::new(config)?;
//! let artifacts = trainer.eval()?;
//! println!("wrote {} comparisons", artifacts.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Using Presets
//!
//! ```rust
//! use chrysalis_rs::ChrysalisConfig;
//!
//! # fn main() -> chrysalis_rs::Result<()> {
//! let mut config = ChrysalisConfig::from_preset("butterfly-128")?;
//! config.dataset.path = "./data/butterflies".to_string();
//! config.eval.n_source_imgs = 8;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::pedantic)]

pub mod checkpoint;
pub mod config;
pub mod dataset;
pub mod error;
pub mod eval;
pub mod gate;
pub mod grid;
pub mod loss;
pub mod models;
pub mod optimizer;
pub mod percept;
pub mod phase;
pub mod runtime;
pub mod trainer;

pub use config::{ChrysalisConfig, EncoderArch};
pub use error::{ChrysalisError, Result};
pub use gate::{SubModule, TrainablePolicy};
pub use phase::{Phase, PhaseKind, PhasePlan};
pub use trainer::Trainer;
