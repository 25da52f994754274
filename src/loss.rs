//! Loss terms for the encoder and the discriminator.
//!
//! Encoder side: pixel reconstruction (L1 or L2), perceptual distance
//! through a frozen backbone, and in adversarial-encoder mode the
//! non-saturating logistic generator term. Discriminator side: the logistic
//! GAN loss and the drift penalty used as its lazy regularizer. All
//! functions return scalar tensors that stay on the loss graph.

use candle_core::Tensor;

use crate::config::PixelLoss;
use crate::error::Result;
use crate::percept::PerceptualModel;

/// Numerically stable `softplus`: `max(x, 0) + ln(1 + exp(-|x|))`.
fn softplus(x: &Tensor) -> Result<Tensor> {
    let linear = x.relu()?;
    let log_term = x.abs()?.neg()?.exp()?.affine(1.0, 1.0)?.log()?;
    Ok((linear + log_term)?)
}

/// Pixel reconstruction loss between tensors in the same range.
///
/// # Errors
///
/// Propagates tensor failures from candle.
pub fn pixel_loss(kind: PixelLoss, recon: &Tensor, target: &Tensor) -> Result<Tensor> {
    let diff = (recon - target)?;
    let loss = match kind {
        PixelLoss::L1 => diff.abs()?.mean_all()?,
        PixelLoss::L2 => diff.sqr()?.mean_all()?,
    };
    Ok(loss)
}

/// Perceptual distance: mean squared distance between frozen-backbone
/// embeddings of reconstruction and target.
///
/// # Errors
///
/// Propagates backbone and tensor failures.
pub fn perceptual_loss(
    backbone: &dyn PerceptualModel,
    recon: &Tensor,
    target: &Tensor,
) -> Result<Tensor> {
    let a = backbone.embed(recon)?;
    let b = backbone.embed(target)?;
    Ok((a - b)?.sqr()?.mean_all()?)
}

/// Non-saturating generator-side logistic term: `mean(softplus(-D(fake)))`.
///
/// # Errors
///
/// Propagates tensor failures from candle.
pub fn generator_logistic_loss(fake_logits: &Tensor) -> Result<Tensor> {
    Ok(softplus(&fake_logits.neg()?)?.mean_all()?)
}

/// Discriminator logistic loss:
/// `mean(softplus(D(fake))) + mean(softplus(-D(real)))`.
///
/// The caller detaches the reconstruction before scoring it so the encoder
/// receives no gradient from this term.
///
/// # Errors
///
/// Propagates tensor failures from candle.
pub fn discriminator_logistic_loss(real_logits: &Tensor, fake_logits: &Tensor) -> Result<Tensor> {
    let fake_term = softplus(fake_logits)?.mean_all()?;
    let real_term = softplus(&real_logits.neg()?)?.mean_all()?;
    Ok((fake_term + real_term)?)
}

/// Drift penalty `epsilon * mean(D(real)^2)`, the discriminator's lazy
/// regularization term. Keeps real logits near zero.
///
/// # Errors
///
/// Propagates tensor failures from candle.
pub fn drift_penalty(real_logits: &Tensor, epsilon: f64) -> Result<Tensor> {
    Ok(real_logits.sqr()?.mean_all()?.affine(epsilon, 0.0)?)
}
