//! Dataset loading and batching.
//!
//! `ImageDataset` is the dataset-provider contract: an ordered collection of
//! (image, label) pairs exposing length, per-item shape and optional labels.
//! Images are stored as raw `u8` CHW planes in the native 0–255 range;
//! normalization into the generator's range happens at batch time in the
//! consumers. `FolderDataset` reads a directory of PNG/JPEG files,
//! `MemoryDataset` backs tests and benches.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::config::DatasetConfig;
use crate::error::{ChrysalisError, Result};

/// Ordered collection of (image, label) pairs.
pub trait ImageDataset {
    /// Number of items.
    fn len(&self) -> usize;

    /// Whether the dataset holds no items.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Per-item image shape as `(channels, height, width)`.
    fn image_shape(&self) -> (usize, usize, usize);

    /// Whether per-item labels are present.
    fn has_labels(&self) -> bool;

    /// Raw label vector for one item, if labels are present.
    fn label(&self, index: usize) -> Option<&[f32]>;

    /// Raw image bytes for one item, CHW order, 0–255.
    fn image(&self, index: usize) -> Result<&[u8]>;

    /// Materialize a set of indices into one `(N, C, H, W)` f32 batch tensor
    /// in the native 0–255 range.
    ///
    /// # Errors
    ///
    /// Returns a dataset error for out-of-range indices.
    fn batch(&self, indices: &[usize], device: &Device) -> Result<Tensor> {
        let (c, h, w) = self.image_shape();
        let mut data = Vec::with_capacity(indices.len() * c * h * w);
        for &index in indices {
            let bytes = self.image(index)?;
            data.extend(bytes.iter().map(|&b| f32::from(b)));
        }
        Ok(Tensor::from_vec(data, (indices.len(), c, h, w), device)?)
    }
}

/// In-memory dataset, used by tests and benches.
#[derive(Debug)]
pub struct MemoryDataset {
    images: Vec<Vec<u8>>,
    labels: Option<Vec<Vec<f32>>>,
    shape: (usize, usize, usize),
}

impl MemoryDataset {
    /// Build from pre-materialized CHW image planes.
    ///
    /// # Errors
    ///
    /// Returns a dataset error when an image or label count does not match
    /// the declared shape.
    pub fn new(
        images: Vec<Vec<u8>>,
        shape: (usize, usize, usize),
        labels: Option<Vec<Vec<f32>>>,
    ) -> Result<Self> {
        let (c, h, w) = shape;
        for (i, img) in images.iter().enumerate() {
            if img.len() != c * h * w {
                return Err(ChrysalisError::Dataset(format!(
                    "image {i} has {} bytes, shape {shape:?} needs {}",
                    img.len(),
                    c * h * w
                )));
            }
        }
        if let Some(labels) = &labels {
            if labels.len() != images.len() {
                return Err(ChrysalisError::Dataset(format!(
                    "{} labels for {} images",
                    labels.len(),
                    images.len()
                )));
            }
        }
        Ok(Self {
            images,
            labels,
            shape,
        })
    }
}

impl ImageDataset for MemoryDataset {
    fn len(&self) -> usize {
        self.images.len()
    }

    fn image_shape(&self) -> (usize, usize, usize) {
        self.shape
    }

    fn has_labels(&self) -> bool {
        self.labels.is_some()
    }

    fn label(&self, index: usize) -> Option<&[f32]> {
        self.labels
            .as_ref()
            .and_then(|labels| labels.get(index))
            .map(Vec::as_slice)
    }

    fn image(&self, index: usize) -> Result<&[u8]> {
        self.images
            .get(index)
            .map(Vec::as_slice)
            .ok_or_else(|| ChrysalisError::Dataset(format!("index {index} out of range")))
    }
}

/// Directory of PNG/JPEG images with an optional `labels.json` side file
/// mapping file names to fixed-size numeric label vectors.
pub struct FolderDataset {
    inner: MemoryDataset,
    paths: Vec<PathBuf>,
}

impl FolderDataset {
    /// Load a dataset directory according to its configuration.
    ///
    /// Files are read in sorted name order so item indices are stable. All
    /// images must share one resolution; the first image fixes the shape.
    ///
    /// # Errors
    ///
    /// Returns a resource error when the directory is missing, and a dataset
    /// error for decode failures, shape disagreements, empty directories or
    /// missing labels.
    pub fn load(config: &DatasetConfig) -> Result<Self> {
        let dir = Path::new(&config.path);
        if !dir.is_dir() {
            return Err(ChrysalisError::Resource(format!(
                "dataset directory not found: {}",
                config.path
            )));
        }

        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("png" | "jpg" | "jpeg")
                )
            })
            .collect();
        paths.sort();
        if let Some(cap) = config.max_items {
            paths.truncate(cap);
        }
        if paths.is_empty() {
            return Err(ChrysalisError::Dataset(format!(
                "no PNG/JPEG images under {}",
                config.path
            )));
        }

        let mut images = Vec::with_capacity(paths.len());
        let mut shape = None;
        for path in &paths {
            let decoded = image::open(path)?.to_rgb8();
            let (w, h) = (decoded.width() as usize, decoded.height() as usize);
            match shape {
                None => shape = Some((3usize, h, w)),
                Some((_, sh, sw)) if sh != h || sw != w => {
                    return Err(ChrysalisError::Dataset(format!(
                        "{} is {w}x{h}, dataset is {sw}x{sh}",
                        path.display()
                    )));
                }
                Some(_) => {}
            }
            images.push(hwc_to_chw(decoded.as_raw(), h, w));
        }
        let shape = shape.ok_or_else(|| ChrysalisError::Dataset("empty dataset".into()))?;

        let labels = if config.use_labels {
            Some(Self::load_labels(config, dir, &paths)?)
        } else {
            None
        };

        Ok(Self {
            inner: MemoryDataset::new(images, shape, labels)?,
            paths,
        })
    }

    fn load_labels(
        config: &DatasetConfig,
        dir: &Path,
        paths: &[PathBuf],
    ) -> Result<Vec<Vec<f32>>> {
        let labels_path = config
            .labels_file
            .as_ref()
            .map_or_else(|| dir.join("labels.json"), PathBuf::from);
        if !labels_path.is_file() {
            return Err(ChrysalisError::Resource(format!(
                "label file not found: {}",
                labels_path.display()
            )));
        }
        let raw = std::fs::read_to_string(&labels_path)?;
        let table: HashMap<String, Vec<f32>> = serde_json::from_str(&raw)?;

        let mut labels = Vec::with_capacity(paths.len());
        for path in paths {
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default();
            let label = table.get(name).ok_or_else(|| {
                ChrysalisError::Dataset(format!("no label for {name} in {}", labels_path.display()))
            })?;
            labels.push(label.clone());
        }
        Ok(labels)
    }

    /// Source file path for one item.
    #[must_use]
    pub fn path(&self, index: usize) -> Option<&Path> {
        self.paths.get(index).map(PathBuf::as_path)
    }
}

impl ImageDataset for FolderDataset {
    fn len(&self) -> usize {
        self.inner.len()
    }

    fn image_shape(&self) -> (usize, usize, usize) {
        self.inner.image_shape()
    }

    fn has_labels(&self) -> bool {
        self.inner.has_labels()
    }

    fn label(&self, index: usize) -> Option<&[f32]> {
        self.inner.label(index)
    }

    fn image(&self, index: usize) -> Result<&[u8]> {
        self.inner.image(index)
    }
}

fn hwc_to_chw(raw: &[u8], h: usize, w: usize) -> Vec<u8> {
    let mut chw = vec![0u8; 3 * h * w];
    for y in 0..h {
        for x in 0..w {
            for c in 0..3 {
                chw[c * h * w + y * w + x] = raw[(y * w + x) * 3 + c];
            }
        }
    }
    chw
}

/// Endless, shard-aware index stream for training batches.
///
/// Indices are reshuffled once per epoch; within one epoch worker `rank`
/// draws positions `rank, rank + world, rank + 2*world, …` of the shuffled
/// order, so the shards of different ranks are disjoint.
pub struct InfiniteIndexSampler {
    order: Vec<usize>,
    rng: ChaCha8Rng,
    world_size: usize,
    rank: usize,
    cursor: usize,
}

impl InfiniteIndexSampler {
    /// Create a sampler over `len` indices for one worker.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an empty dataset, a zero world size
    /// or a rank outside `[0, world_size)`.
    pub fn new(len: usize, seed: u64, world_size: usize, rank: usize) -> Result<Self> {
        if len == 0 {
            return Err(ChrysalisError::Config("cannot sample an empty dataset".into()));
        }
        if world_size == 0 || rank >= world_size {
            return Err(ChrysalisError::Config(format!(
                "rank {rank} out of range for world_size {world_size}"
            )));
        }
        let mut sampler = Self {
            order: (0..len).collect(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            world_size,
            rank,
            cursor: 0,
        };
        sampler.reshuffle();
        Ok(sampler)
    }

    fn reshuffle(&mut self) {
        self.order.shuffle(&mut self.rng);
        self.cursor = self.rank;
    }

    /// Next dataset index for this worker.
    pub fn next_index(&mut self) -> usize {
        if self.cursor >= self.order.len() {
            self.reshuffle();
            // A rank beyond a tiny dataset's length restarts from its
            // in-range position instead of skipping the epoch entirely.
            self.cursor %= self.order.len().max(1);
        }
        let index = self.order[self.cursor];
        self.cursor += self.world_size;
        index
    }

    /// Next batch of indices for this worker.
    pub fn next_batch(&mut self, batch_size: usize) -> Vec<usize> {
        (0..batch_size).map(|_| self.next_index()).collect()
    }
}

impl Iterator for InfiniteIndexSampler {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        Some(self.next_index())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray_dataset(n: usize, shape: (usize, usize, usize)) -> MemoryDataset {
        let (c, h, w) = shape;
        let images = (0..n)
            .map(|i| vec![u8::try_from(i % 256).unwrap(); c * h * w])
            .collect();
        MemoryDataset::new(images, shape, None).unwrap()
    }

    #[test]
    fn test_memory_dataset_shape_checked() {
        let err = MemoryDataset::new(vec![vec![0u8; 5]], (3, 4, 4), None).unwrap_err();
        assert!(err.to_string().contains("bytes"));
    }

    #[test]
    fn test_memory_dataset_label_lookup() {
        let labels = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let dataset =
            MemoryDataset::new(vec![vec![0u8; 12]; 2], (3, 2, 2), Some(labels)).unwrap();
        assert!(dataset.has_labels());
        assert_eq!(dataset.label(1), Some([0.0, 1.0].as_slice()));
        assert_eq!(dataset.label(2), None);
    }

    #[test]
    fn test_batch_materialization() {
        let dataset = gray_dataset(10, (3, 4, 4));
        let batch = dataset.batch(&[0, 3, 7], &Device::Cpu).unwrap();
        assert_eq!(batch.dims(), &[3, 3, 4, 4]);
        let flat = batch.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(flat[0], 0.0);
        assert_eq!(flat[48], 3.0);
        assert_eq!(flat[96], 7.0);
    }

    #[test]
    fn test_batch_rejects_out_of_range() {
        let dataset = gray_dataset(4, (1, 2, 2));
        assert!(dataset.batch(&[0, 4], &Device::Cpu).is_err());
    }

    #[test]
    fn test_hwc_to_chw() {
        // 1x2 RGB image: pixel0=(1,2,3), pixel1=(4,5,6).
        let chw = hwc_to_chw(&[1, 2, 3, 4, 5, 6], 1, 2);
        assert_eq!(chw, vec![1, 4, 2, 5, 3, 6]);
    }

    #[test]
    fn test_sampler_in_range_and_covers_epoch() {
        let mut sampler = InfiniteIndexSampler::new(10, 7, 1, 0).unwrap();
        let mut seen: Vec<usize> = (0..10).map(|_| sampler.next_index()).collect();
        assert!(seen.iter().all(|&i| i < 10));
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_sampler_ranks_disjoint_within_epoch() {
        let mut rank0 = InfiniteIndexSampler::new(10, 7, 2, 0).unwrap();
        let mut rank1 = InfiniteIndexSampler::new(10, 7, 2, 1).unwrap();
        let shard0: Vec<usize> = (0..5).map(|_| rank0.next_index()).collect();
        let shard1: Vec<usize> = (0..5).map(|_| rank1.next_index()).collect();
        assert!(shard0.iter().all(|i| !shard1.contains(i)));
    }

    #[test]
    fn test_sampler_deterministic() {
        let a: Vec<usize> = InfiniteIndexSampler::new(16, 3, 1, 0).unwrap().take(40).collect();
        let b: Vec<usize> = InfiniteIndexSampler::new(16, 3, 1, 0).unwrap().take(40).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_sampler_rejects_bad_config() {
        assert!(InfiniteIndexSampler::new(0, 0, 1, 0).is_err());
        assert!(InfiniteIndexSampler::new(4, 0, 2, 2).is_err());
    }

    #[test]
    fn test_folder_dataset_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..3 {
            let img = image::RgbImage::from_pixel(4, 4, image::Rgb([i * 10, 0, 255]));
            img.save(dir.path().join(format!("img_{i}.png"))).unwrap();
        }
        let config = DatasetConfig {
            path: dir.path().to_string_lossy().into_owned(),
            ..DatasetConfig::default()
        };
        let dataset = FolderDataset::load(&config).unwrap();
        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.image_shape(), (3, 4, 4));
        assert!(!dataset.has_labels());
        // Red plane of img_1 is 10 everywhere.
        assert_eq!(dataset.image(1).unwrap()[0], 10);
    }

    #[test]
    fn test_folder_dataset_labels() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.png", "b.png"] {
            image::RgbImage::new(2, 2).save(dir.path().join(name)).unwrap();
        }
        std::fs::write(
            dir.path().join("labels.json"),
            r#"{"a.png": [1.0, 0.0], "b.png": [0.0, 1.0]}"#,
        )
        .unwrap();
        let config = DatasetConfig {
            path: dir.path().to_string_lossy().into_owned(),
            use_labels: true,
            ..DatasetConfig::default()
        };
        let dataset = FolderDataset::load(&config).unwrap();
        assert!(dataset.has_labels());
        assert_eq!(dataset.label(0), Some([1.0, 0.0].as_slice()));
    }

    #[test]
    fn test_folder_dataset_missing_dir() {
        let config = DatasetConfig {
            path: "/nonexistent/dataset".into(),
            ..DatasetConfig::default()
        };
        assert!(matches!(
            FolderDataset::load(&config),
            Err(ChrysalisError::Resource(_))
        ));
    }
}
