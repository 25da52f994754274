//! Label-stratified snapshot grids.
//!
//! Deterministic index selection for visualization grids. Without labels the
//! grid is a seeded shuffle tiled cyclically. With labels each row is
//! dedicated to one label class (sorted label order, row `y` takes label
//! `y mod num_labels`); after a row is emitted that label's cursor advances
//! by the grid width so repeated rows of the same label show a different
//! slice of its images. The sampled grid can be tiled into one PNG.

use std::collections::BTreeMap;
use std::path::Path;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::dataset::ImageDataset;
use crate::error::{ChrysalisError, Result};

/// Pixel-area targets the grid dimensions are derived from (8K wide, 4320
/// tall), clamped to a 7..=32 by 4..=32 cell range.
const TARGET_GRID_PIXELS_W: usize = 7680;
const TARGET_GRID_PIXELS_H: usize = 4320;

/// Sort key for one label: the raw label vector reversed.
///
/// The reversal matches the reproducible ordering of existing runs; its
/// semantic intent is unspecified and deliberately not interpreted. Elements
/// compare by `f32::total_cmp` and group by bit equality, so NaNs and signed
/// zeros order deterministically too.
#[derive(Debug, Clone)]
struct LabelKey(Vec<f32>);

impl LabelKey {
    fn from_label(label: &[f32]) -> Self {
        Self(label.iter().rev().copied().collect())
    }
}

impl PartialEq for LabelKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len()
            && self
                .0
                .iter()
                .zip(&other.0)
                .all(|(a, b)| a.to_bits() == b.to_bits())
    }
}

impl Eq for LabelKey {}

impl Ord for LabelKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        for (a, b) in self.0.iter().zip(&other.0) {
            match a.total_cmp(b) {
                std::cmp::Ordering::Equal => {}
                ordering => return ordering,
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}

impl PartialOrd for LabelKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// One label's shuffled index sequence with its row cursor.
struct LabelGroup {
    indices: Vec<usize>,
    cursor: usize,
}

/// A sampled visualization grid: realized dimensions, chosen dataset
/// indices, and the materialized images/labels in row-major grid order.
pub struct SnapshotGrid {
    /// Grid width in cells, always in 7..=32.
    pub grid_width: usize,
    /// Grid height in cells, always in 4..=32.
    pub grid_height: usize,
    /// Per-item image shape `(channels, height, width)`.
    pub image_shape: (usize, usize, usize),
    /// Chosen dataset indices, row-major, `grid_width * grid_height` long.
    pub indices: Vec<usize>,
    /// Stacked CHW image planes matching `indices`.
    pub images: Vec<u8>,
    /// Labels matching `indices` (empty vectors when unlabeled).
    pub labels: Vec<Vec<f32>>,
}

/// Build a snapshot grid over a dataset with a dedicated seed.
///
/// Purely a read of the dataset; the per-label rotation state lives only in
/// this call. Two calls with the same dataset and seed produce identical
/// grids.
///
/// # Errors
///
/// An empty dataset, or a labeled dataset yielding zero label groups, is a
/// configuration error. A materialization failure propagates as a dataset
/// error.
pub fn setup_snapshot_grid(dataset: &dyn ImageDataset, seed: u64) -> Result<SnapshotGrid> {
    if dataset.is_empty() {
        return Err(ChrysalisError::Config(
            "cannot build a snapshot grid over an empty dataset".into(),
        ));
    }
    let (channels, height, width) = dataset.image_shape();
    let grid_width = (TARGET_GRID_PIXELS_W / width.max(1)).clamp(7, 32);
    let grid_height = (TARGET_GRID_PIXELS_H / height.max(1)).clamp(4, 32);

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let indices = if dataset.has_labels() {
        labeled_indices(dataset, grid_width, grid_height, &mut rng)?
    } else {
        unlabeled_indices(dataset.len(), grid_width, grid_height, &mut rng)
    };

    if indices.len() != grid_width * grid_height {
        return Err(ChrysalisError::shape_mismatch(
            format!("{} grid indices", grid_width * grid_height),
            format!("{}", indices.len()),
        ));
    }

    let mut images = Vec::with_capacity(indices.len() * channels * height * width);
    let mut labels = Vec::with_capacity(indices.len());
    for &index in &indices {
        images.extend_from_slice(dataset.image(index)?);
        labels.push(dataset.label(index).map(<[f32]>::to_vec).unwrap_or_default());
    }

    Ok(SnapshotGrid {
        grid_width,
        grid_height,
        image_shape: (channels, height, width),
        indices,
        images,
        labels,
    })
}

fn unlabeled_indices(
    len: usize,
    grid_width: usize,
    grid_height: usize,
    rng: &mut ChaCha8Rng,
) -> Vec<usize> {
    let mut order: Vec<usize> = (0..len).collect();
    order.shuffle(rng);
    (0..grid_width * grid_height)
        .map(|i| order[i % len])
        .collect()
}

fn labeled_indices(
    dataset: &dyn ImageDataset,
    grid_width: usize,
    grid_height: usize,
    rng: &mut ChaCha8Rng,
) -> Result<Vec<usize>> {
    let mut groups: BTreeMap<LabelKey, LabelGroup> = BTreeMap::new();
    for index in 0..dataset.len() {
        let label = dataset.label(index).ok_or_else(|| {
            ChrysalisError::Dataset(format!("labeled dataset has no label for item {index}"))
        })?;
        groups
            .entry(LabelKey::from_label(label))
            .or_insert_with(|| LabelGroup {
                indices: Vec::new(),
                cursor: 0,
            })
            .indices
            .push(index);
    }
    if groups.is_empty() {
        return Err(ChrysalisError::Config(
            "labeled dataset produced zero label groups".into(),
        ));
    }

    // BTreeMap iteration is already the sorted label order; shuffle each
    // group's indices independently in that deterministic order.
    let mut ordered: Vec<LabelGroup> = groups.into_values().collect();
    for group in &mut ordered {
        group.indices.shuffle(rng);
    }

    let mut indices = Vec::with_capacity(grid_width * grid_height);
    for y in 0..grid_height {
        let group_count = ordered.len();
        let group = &mut ordered[y % group_count];
        let len = group.indices.len();
        for x in 0..grid_width {
            indices.push(group.indices[(group.cursor + x) % len]);
        }
        group.cursor = (group.cursor + grid_width) % len;
    }
    Ok(indices)
}

impl SnapshotGrid {
    /// Tile the sampled images into one PNG (`grid_height * H` rows by
    /// `grid_width * W` columns) and write it.
    ///
    /// # Errors
    ///
    /// A channel count other than 1 or 3 is a shape invariant violation;
    /// encode and IO failures propagate.
    pub fn save_png(&self, path: impl AsRef<Path>) -> Result<()> {
        let (channels, height, width) = self.image_shape;
        if channels != 1 && channels != 3 {
            return Err(ChrysalisError::shape_mismatch(
                "1 or 3 channels",
                format!("{channels}"),
            ));
        }

        let out_w = self.grid_width * width;
        let out_h = self.grid_height * height;
        let mut canvas = vec![0u8; out_w * out_h * channels];
        let cell = channels * height * width;
        for (i, chunk) in self.images.chunks_exact(cell).enumerate() {
            let gy = i / self.grid_width;
            let gx = i % self.grid_width;
            for y in 0..height {
                for x in 0..width {
                    for c in 0..channels {
                        let src = c * height * width + y * width + x;
                        let dst = ((gy * height + y) * out_w + gx * width + x) * channels + c;
                        canvas[dst] = chunk[src];
                    }
                }
            }
        }

        let (out_w32, out_h32) = (
            u32::try_from(out_w).map_err(|_| {
                ChrysalisError::shape_mismatch("grid width within u32", format!("{out_w}"))
            })?,
            u32::try_from(out_h).map_err(|_| {
                ChrysalisError::shape_mismatch("grid height within u32", format!("{out_h}"))
            })?,
        );
        if channels == 1 {
            let img = image::GrayImage::from_raw(out_w32, out_h32, canvas).ok_or_else(|| {
                ChrysalisError::shape_mismatch("gray canvas buffer", "short buffer".to_string())
            })?;
            img.save(path)?;
        } else {
            let img = image::RgbImage::from_raw(out_w32, out_h32, canvas).ok_or_else(|| {
                ChrysalisError::shape_mismatch("rgb canvas buffer", "short buffer".to_string())
            })?;
            img.save(path)?;
        }
        Ok(())
    }
}
