//! Process-wide device and RNG setup.
//!
//! Built exactly once per run, before any core component. Each distributed
//! worker derives its own seed as `seed * world_size + rank` so workers draw
//! disjoint random streams from the same base seed.

use candle_core::Device;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::config::RuntimeConfig;
use crate::error::{ChrysalisError, Result};

/// Initialized device and RNG state for one worker.
pub struct Runtime {
    /// Compute device for all tensor work this run.
    pub device: Device,
    /// Run-level RNG (evaluation sample choice, augmentation, batching).
    pub rng: ChaCha8Rng,
    /// The worker-derived seed, kept for logging and reporting.
    pub derived_seed: u64,
}

impl Runtime {
    /// Set up the device and seeded RNG for this worker.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for unknown device names and a candle
    /// error if CUDA initialization fails.
    pub fn init(config: &RuntimeConfig) -> Result<Self> {
        let derived_seed = config
            .seed
            .wrapping_mul(config.world_size as u64)
            .wrapping_add(config.rank as u64);

        let device = match config.device.as_str() {
            "cpu" => Device::Cpu,
            "cuda" => match Device::cuda_if_available(config.rank)? {
                device @ Device::Cuda(_) => {
                    tracing::info!("compute device: CUDA (ordinal {})", config.rank);
                    device
                }
                _ => {
                    tracing::warn!(
                        "CUDA requested but unavailable; falling back to CPU. \
                         Build with --features cuda for GPU support."
                    );
                    Device::Cpu
                }
            },
            other => {
                return Err(ChrysalisError::Config(format!(
                    "unknown device: {other} (expected cpu or cuda)"
                )))
            }
        };

        tracing::info!(
            "runtime initialized: seed {} (base {}, world {}, rank {})",
            derived_seed,
            config.seed,
            config.world_size,
            config.rank
        );

        Ok(Self {
            device,
            rng: ChaCha8Rng::seed_from_u64(derived_seed),
            derived_seed,
        })
    }
}
