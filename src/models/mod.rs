//! Minimal candle-based networks: generator (mapping + synthesis split),
//! discriminator, the two encoder architectures and the augmentation pipe.
//! Their internals are plumbing; the contracts they expose (sub-module
//! split, latent dimensionalities, noise modes) are what the orchestrator
//! and the evaluation pipeline depend on.

pub mod augment;
pub mod discriminator;
pub mod encoder;
pub mod generator;

pub use augment::AugmentPipe;
pub use discriminator::Discriminator;
pub use encoder::Encoder;
pub use generator::{num_latents, Generator, MappingNetwork, NoiseMode, SynthesisNetwork};

/// Feature width at one synthesis/analysis level: the channel budget divided
/// by the feature-map resolution, capped per level.
#[must_use]
pub(crate) fn channels_at(resolution: usize, channel_base: usize, channel_max: usize) -> usize {
    (channel_base / resolution.max(1)).clamp(1, channel_max.max(1))
}

/// Construct the generator/discriminator pair from one configuration set.
///
/// # Errors
///
/// Propagates model construction failures.
pub fn build_networks(
    generator: &crate::config::GeneratorConfig,
    discriminator: &crate::config::DiscriminatorConfig,
    resolution: usize,
    img_channels: usize,
    device: &candle_core::Device,
) -> crate::Result<(Generator, Discriminator)> {
    let g = Generator::new(generator, resolution, img_channels, device)?;
    let d = Discriminator::new(discriminator, resolution, img_channels, device)?;
    Ok((g, d))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channels_at() {
        assert_eq!(channels_at(4, 8192, 512), 512);
        assert_eq!(channels_at(128, 8192, 512), 64);
        assert_eq!(channels_at(128, 8192, 32), 32);
        assert_eq!(channels_at(4096, 1024, 512), 1);
    }
}
