//! Encoder evaluation: reconstruct a fixed sample set and render
//! side-by-side comparisons.
//!
//! The sample indices are drawn once per run (seeded, without replacement)
//! and reused for every render, so comparisons stay stable across snapshots
//! within a run. The generator is already restricted to its synthesis
//! sub-network and stays frozen throughout.

use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use rand_chacha::ChaCha8Rng;

use crate::config::EncoderArch;
use crate::dataset::ImageDataset;
use crate::error::{ChrysalisError, Result};
use crate::models::encoder::LATENT_WIDTH;
use crate::models::{num_latents, Encoder, NoiseMode, SynthesisNetwork};

/// Draw `n` distinct evaluation sample indices from the run RNG.
///
/// # Errors
///
/// Requesting more samples than the dataset holds is a configuration error.
pub fn choose_eval_samples(
    rng: &mut ChaCha8Rng,
    dataset_len: usize,
    n: usize,
) -> Result<Vec<usize>> {
    if n > dataset_len {
        return Err(ChrysalisError::Config(format!(
            "n_source_imgs {n} exceeds dataset length {dataset_len}"
        )));
    }
    Ok(rand::seq::index::sample(rng, dataset_len, n).into_vec())
}

/// Expand a raw encoder output into per-layer latents `(B, L, 512)`.
///
/// `idinvert` replicates its single latent vector across all `L` layers;
/// `ae_stylegan` reshapes its flat vector into `L` rows of width 512 without
/// reordering elements.
///
/// # Errors
///
/// A raw latent whose width does not fit the architecture's contract is a
/// shape invariant violation.
pub fn expand_latent(raw: &Tensor, arch: EncoderArch, num_latents: usize) -> Result<Tensor> {
    let (batch, width) = raw.dims2().map_err(|_| {
        ChrysalisError::shape_mismatch("2D latent batch", format!("{:?}", raw.dims()))
    })?;
    match arch {
        EncoderArch::Idinvert => {
            if width != LATENT_WIDTH {
                return Err(ChrysalisError::shape_mismatch(
                    format!("({batch}, {LATENT_WIDTH})"),
                    format!("({batch}, {width})"),
                ));
            }
            Ok(raw.unsqueeze(1)?.repeat((1, num_latents, 1))?)
        }
        EncoderArch::AeStylegan => {
            if width != num_latents * LATENT_WIDTH {
                return Err(ChrysalisError::shape_mismatch(
                    format!("({batch}, {})", num_latents * LATENT_WIDTH),
                    format!("({batch}, {width})"),
                ));
            }
            Ok(raw.reshape((batch, num_latents, LATENT_WIDTH))?)
        }
    }
}

/// Run the evaluation pipeline: materialize the sample batch, encode,
/// reconstruct through the frozen synthesis network with const noise, and
/// write one side-by-side comparison PNG per sample
/// (`recon_000.png`, `recon_001.png`, …) under `out_dir`.
///
/// Returns the written artifact paths in sample order.
///
/// # Errors
///
/// Shape invariant violations (latent width, channel mismatch) and
/// filesystem failures propagate; nothing is silently skipped.
pub fn eval_encoder(
    encoder: &Encoder,
    synthesis: &SynthesisNetwork,
    dataset: &dyn ImageDataset,
    samples: &[usize],
    resolution: usize,
    out_dir: &Path,
    device: &Device,
) -> Result<Vec<PathBuf>> {
    tracing::info!("evaluating encoder on {} samples", samples.len());
    std::fs::create_dir_all(out_dir)?;

    // One batch in the native 0–255 range, then into the generator's −1..1.
    let originals = dataset.batch(samples, device)?;
    let normalized = originals.affine(1.0 / 127.5, -1.0)?;

    let raw = encoder.forward(&normalized)?.detach();
    let ws = expand_latent(&raw, encoder.arch(), num_latents(resolution))?;
    let recon = synthesis.forward(&ws, NoiseMode::Const)?.detach();
    let recon = recon.affine(127.5, 127.5)?;

    let mut paths = Vec::with_capacity(samples.len());
    for i in 0..samples.len() {
        let original = originals.narrow(0, i, 1)?.squeeze(0)?;
        let reconstructed = recon.narrow(0, i, 1)?.squeeze(0)?;
        let path = out_dir.join(format!("recon_{i:03}.png"));
        save_side_by_side(&original, &reconstructed, &path)?;
        paths.push(path);
    }
    tracing::info!("wrote {} comparison artifacts to {}", paths.len(), out_dir.display());
    Ok(paths)
}

/// Compose a `(C, H, W)` original and reconstruction side by side (same
/// height, doubled width) and save as PNG.
fn save_side_by_side(original: &Tensor, reconstructed: &Tensor, path: &Path) -> Result<()> {
    let (oc, oh, ow) = original.dims3()?;
    let (rc, rh, rw) = reconstructed.dims3()?;
    if oc != rc || oh != rh || ow != rw {
        return Err(ChrysalisError::shape_mismatch(
            format!("({oc}, {oh}, {ow})"),
            format!("({rc}, {rh}, {rw})"),
        ));
    }
    if oc != 1 && oc != 3 {
        return Err(ChrysalisError::shape_mismatch(
            "1 or 3 channels",
            format!("{oc}"),
        ));
    }

    let left = chw_bytes(original)?;
    let right = chw_bytes(reconstructed)?;

    // Interleave rows: original pixels then reconstruction pixels, HWC.
    let out_w = 2 * ow;
    let mut canvas = vec![0u8; oh * out_w * oc];
    for y in 0..oh {
        for x in 0..ow {
            for c in 0..oc {
                let src = c * oh * ow + y * ow + x;
                canvas[(y * out_w + x) * oc + c] = left[src];
                canvas[(y * out_w + ow + x) * oc + c] = right[src];
            }
        }
    }

    let (w32, h32) = (
        u32::try_from(out_w)
            .map_err(|_| ChrysalisError::shape_mismatch("width within u32", format!("{out_w}")))?,
        u32::try_from(oh)
            .map_err(|_| ChrysalisError::shape_mismatch("height within u32", format!("{oh}")))?,
    );
    if oc == 1 {
        image::GrayImage::from_raw(w32, h32, canvas)
            .ok_or_else(|| {
                ChrysalisError::shape_mismatch("gray canvas buffer", "short buffer".to_string())
            })?
            .save(path)?;
    } else {
        image::RgbImage::from_raw(w32, h32, canvas)
            .ok_or_else(|| {
                ChrysalisError::shape_mismatch("rgb canvas buffer", "short buffer".to_string())
            })?
            .save(path)?;
    }
    Ok(())
}

/// Clamp a `(C, H, W)` f32 tensor in 0–255 and read it out as bytes.
fn chw_bytes(t: &Tensor) -> Result<Vec<u8>> {
    Ok(t.clamp(0f32, 255f32)?
        .to_dtype(DType::U8)?
        .flatten_all()?
        .to_vec1::<u8>()?)
}
