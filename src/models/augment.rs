//! Probability-gated horizontal-flip augmentation for discriminator inputs.
//!
//! No trainable parameters; always frozen under the gradient gate. The whole
//! batch flips together so one coin toss covers one discriminator step.

use candle_core::Tensor;
use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::error::Result;

/// Horizontal-flip pipe with a fixed application probability.
pub struct AugmentPipe {
    p: f64,
}

impl AugmentPipe {
    /// Create a pipe that flips with probability `p`.
    #[must_use]
    pub fn new(p: f64) -> Self {
        Self { p }
    }

    /// Current application probability.
    #[must_use]
    pub fn p(&self) -> f64 {
        self.p
    }

    /// Apply the pipe to an image batch `(B, C, H, W)`.
    ///
    /// # Errors
    ///
    /// Propagates tensor failures from candle.
    pub fn apply(&self, images: &Tensor, rng: &mut ChaCha8Rng) -> Result<Tensor> {
        if self.p <= 0.0 || rng.gen::<f64>() >= self.p {
            return Ok(images.clone());
        }
        hflip(images)
    }
}

/// Reverse the width axis of an image batch.
#[allow(clippy::cast_possible_truncation)]
fn hflip(images: &Tensor) -> Result<Tensor> {
    let (_, _, _, w) = images.dims4()?;
    let reversed: Vec<u32> = (0..w).rev().map(|x| x as u32).collect();
    let indexes = Tensor::from_vec(reversed, w, images.device())?;
    Ok(images.index_select(&indexes, 3)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use rand::SeedableRng;

    #[test]
    fn test_zero_probability_is_identity() {
        let device = Device::Cpu;
        let images = Tensor::randn(0f32, 1f32, (2, 3, 4, 4), &device).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let out = AugmentPipe::new(0.0).apply(&images, &mut rng).unwrap();
        assert_eq!(
            out.flatten_all().unwrap().to_vec1::<f32>().unwrap(),
            images.flatten_all().unwrap().to_vec1::<f32>().unwrap()
        );
    }

    #[test]
    fn test_certain_probability_flips_width() {
        let device = Device::Cpu;
        let images = Tensor::from_vec(
            vec![1f32, 2.0, 3.0, 4.0],
            (1, 1, 1, 4),
            &device,
        )
        .unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let out = AugmentPipe::new(1.0).apply(&images, &mut rng).unwrap();
        assert_eq!(
            out.flatten_all().unwrap().to_vec1::<f32>().unwrap(),
            vec![4.0, 3.0, 2.0, 1.0]
        );
    }

    #[test]
    fn test_double_flip_restores() {
        let device = Device::Cpu;
        let images = Tensor::randn(0f32, 1f32, (2, 3, 4, 4), &device).unwrap();
        let once = hflip(&images).unwrap();
        let twice = hflip(&once).unwrap();
        assert_eq!(
            twice.flatten_all().unwrap().to_vec1::<f32>().unwrap(),
            images.flatten_all().unwrap().to_vec1::<f32>().unwrap()
        );
    }
}
