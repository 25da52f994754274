//! Per-module safetensors snapshots.
//!
//! A snapshot directory holds one safetensors file per sub-module plus a
//! `snapshot.json` metadata record and a `config.yaml` echo of the run
//! configuration. The main generator/discriminator files load partially
//! (missing or mismatched keys are tolerated, so an older snapshot resumes
//! into a grown model); the encoder's own checkpoint loads strictly.

use std::path::{Path, PathBuf};

use candle_nn::VarMap;
use serde::{Deserialize, Serialize};

use crate::error::{ChrysalisError, Result};

/// Metadata written next to the tensors of one snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMeta {
    /// Running step index the snapshot was taken at.
    pub step: u64,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
    /// Crate version that wrote the snapshot.
    pub version: String,
}

/// Write one snapshot directory `<run_dir>/snapshot-<step>/`.
///
/// `parts` maps sub-module names (`generator`, `generator_ema`,
/// `discriminator`, `encoder`) to their parameter stores; each becomes
/// `<name>.safetensors`.
///
/// # Errors
///
/// Propagates filesystem and serialization failures.
pub fn save_snapshot(
    run_dir: &Path,
    step: u64,
    parts: &[(&str, &VarMap)],
    config_yaml: &str,
) -> Result<PathBuf> {
    let dir = run_dir.join(format!("snapshot-{step}"));
    std::fs::create_dir_all(&dir)?;

    for (name, varmap) in parts {
        varmap.save(dir.join(format!("{name}.safetensors")))?;
    }

    let meta = SnapshotMeta {
        step,
        created_at: chrono::Utc::now().to_rfc3339(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    std::fs::write(
        dir.join("snapshot.json"),
        serde_json::to_string_pretty(&meta)?,
    )?;
    std::fs::write(dir.join("config.yaml"), config_yaml)?;

    tracing::info!("snapshot written to {}", dir.display());
    Ok(dir)
}

/// Read the metadata record of a snapshot directory.
///
/// # Errors
///
/// A missing directory or metadata file is a resource error.
pub fn read_meta(snapshot_dir: &Path) -> Result<SnapshotMeta> {
    let path = snapshot_dir.join("snapshot.json");
    if !path.is_file() {
        return Err(ChrysalisError::Resource(format!(
            "snapshot metadata not found: {}",
            path.display()
        )));
    }
    Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
}

/// Copy every stored tensor whose name and shape match a variable in the
/// map; report how many matched. Missing and extra keys are tolerated.
///
/// # Errors
///
/// An unreachable file is a resource error; tensor copies propagate candle
/// failures.
pub fn load_partial(varmap: &VarMap, path: &Path) -> Result<usize> {
    if !path.is_file() {
        return Err(ChrysalisError::Resource(format!(
            "checkpoint not found: {}",
            path.display()
        )));
    }
    let stored = candle_core::safetensors::load(path, &candle_core::Device::Cpu)?;

    let mut matched = 0usize;
    let data = varmap.data().lock().unwrap();
    for (name, var) in data.iter() {
        let Some(tensor) = stored.get(name) else {
            tracing::debug!("partial load: no stored tensor for {name}");
            continue;
        };
        if tensor.dims() != var.dims() {
            tracing::warn!(
                "partial load: skipping {name}, stored {:?} vs model {:?}",
                tensor.dims(),
                var.dims()
            );
            continue;
        }
        var.set(&tensor.to_dtype(var.dtype())?.to_device(var.device())?)?;
        matched += 1;
    }
    tracing::info!(
        "partial load from {}: {matched}/{} tensors matched",
        path.display(),
        data.len()
    );
    Ok(matched)
}

/// Load a checkpoint strictly: every variable in the map must be present in
/// the file.
///
/// # Errors
///
/// An unreachable file is a resource error; a missing key fails the load.
pub fn load_strict(varmap: &mut VarMap, path: &Path) -> Result<()> {
    if !path.is_file() {
        return Err(ChrysalisError::Resource(format!(
            "checkpoint not found: {}",
            path.display()
        )));
    }
    varmap.load(path)?;
    tracing::info!("strict load from {}", path.display());
    Ok(())
}

/// Copy parameter values between two identically-shaped maps (EMA swap on
/// resume). Returns the number of tensors copied.
///
/// # Errors
///
/// A destination variable with no source counterpart, or a shape
/// disagreement, is a shape invariant violation.
pub fn copy_params(src: &VarMap, dst: &VarMap) -> Result<usize> {
    let src_data = src.data().lock().unwrap();
    let dst_data = dst.data().lock().unwrap();

    let mut copied = 0usize;
    for (name, dst_var) in dst_data.iter() {
        let src_var = src_data.get(name).ok_or_else(|| {
            ChrysalisError::shape_mismatch(
                format!("source tensor for {name}"),
                "absent".to_string(),
            )
        })?;
        if src_var.dims() != dst_var.dims() {
            return Err(ChrysalisError::shape_mismatch(
                format!("{name} {:?}", dst_var.dims()),
                format!("{:?}", src_var.dims()),
            ));
        }
        dst_var.set(src_var.as_tensor())?;
        copied += 1;
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::Init;

    fn map_with(names: &[(&str, &[usize])]) -> VarMap {
        let varmap = VarMap::new();
        for (name, dims) in names {
            varmap
                .get(
                    *dims,
                    name,
                    Init::Randn {
                        mean: 0.0,
                        stdev: 1.0,
                    },
                    DType::F32,
                    &Device::Cpu,
                )
                .unwrap();
        }
        varmap
    }

    fn tensor_values(varmap: &VarMap, name: &str) -> Vec<f32> {
        let data = varmap.data().lock().unwrap();
        data[name]
            .as_tensor()
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap()
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let varmap = map_with(&[("layer.weight", &[4, 4])]);
        let snapshot = save_snapshot(dir.path(), 100, &[("encoder", &varmap)], "run: test\n")
            .unwrap();

        assert!(snapshot.join("encoder.safetensors").is_file());
        assert!(snapshot.join("config.yaml").is_file());
        let meta = read_meta(&snapshot).unwrap();
        assert_eq!(meta.step, 100);
        assert_eq!(meta.version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_partial_load_matches_and_skips() {
        let dir = tempfile::tempdir().unwrap();
        let src = map_with(&[("a", &[2, 2]), ("b", &[3])]);
        let path = dir.path().join("src.safetensors");
        src.save(&path).unwrap();

        // Destination shares "a", has a differently-shaped "b" and an extra "c".
        let dst = map_with(&[("a", &[2, 2]), ("b", &[4]), ("c", &[2])]);
        let matched = load_partial(&dst, &path).unwrap();
        assert_eq!(matched, 1);
        assert_eq!(tensor_values(&dst, "a"), tensor_values(&src, "a"));
    }

    #[test]
    fn test_strict_load_requires_all_keys() {
        let dir = tempfile::tempdir().unwrap();
        let src = map_with(&[("a", &[2, 2])]);
        let path = dir.path().join("src.safetensors");
        src.save(&path).unwrap();

        let mut complete = map_with(&[("a", &[2, 2])]);
        load_strict(&mut complete, &path).unwrap();
        assert_eq!(tensor_values(&complete, "a"), tensor_values(&src, "a"));

        let mut incomplete = map_with(&[("a", &[2, 2]), ("extra", &[1])]);
        assert!(load_strict(&mut incomplete, &path).is_err());
    }

    #[test]
    fn test_missing_checkpoint_is_resource_error() {
        let varmap = map_with(&[("a", &[2])]);
        let missing = Path::new("/nonexistent/ckpt.safetensors");
        assert!(matches!(
            load_partial(&varmap, missing),
            Err(ChrysalisError::Resource(_))
        ));
        let mut varmap = varmap;
        assert!(matches!(
            load_strict(&mut varmap, missing),
            Err(ChrysalisError::Resource(_))
        ));
    }

    #[test]
    fn test_copy_params() {
        let src = map_with(&[("a", &[2, 2]), ("b", &[3])]);
        let dst = map_with(&[("a", &[2, 2]), ("b", &[3])]);
        let copied = copy_params(&src, &dst).unwrap();
        assert_eq!(copied, 2);
        assert_eq!(tensor_values(&dst, "a"), tensor_values(&src, "a"));
        assert_eq!(tensor_values(&dst, "b"), tensor_values(&src, "b"));
    }

    #[test]
    fn test_copy_params_shape_mismatch() {
        let src = map_with(&[("a", &[2, 2])]);
        let dst = map_with(&[("a", &[2, 3])]);
        assert!(matches!(
            copy_params(&src, &dst),
            Err(ChrysalisError::ShapeMismatch { .. })
        ));
    }
}
