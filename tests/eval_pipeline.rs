//! End-to-end validation of the encoder evaluation pipeline.
//!
//! Exercises the full path the orchestrator drives: sample selection over an
//! unlabeled dataset, encoding, latent expansion, synthesis with const
//! noise, and side-by-side artifact rendering. Networks are built tiny so
//! the suite stays fast on CPU; all properties under test are independent of
//! network size.

use candle_core::Device;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tempfile::TempDir;

use chrysalis_rs::config::GeneratorConfig;
use chrysalis_rs::dataset::{ImageDataset, MemoryDataset};
use chrysalis_rs::eval::{choose_eval_samples, eval_encoder};
use chrysalis_rs::models::{Encoder, Generator};
use chrysalis_rs::{ChrysalisConfig, EncoderArch, Trainer};

const RESOLUTION: usize = 32;

/// 100 unlabeled images with a per-item fill value so artifacts differ.
fn test_dataset(n: usize) -> MemoryDataset {
    let images = (0..n)
        .map(|i| {
            let v = u8::try_from((i * 37) % 256).unwrap();
            vec![v; 3 * RESOLUTION * RESOLUTION]
        })
        .collect();
    MemoryDataset::new(images, (3, RESOLUTION, RESOLUTION), None).unwrap()
}

fn tiny_generator(device: &Device) -> Generator {
    let config = GeneratorConfig {
        z_dim: 32,
        w_dim: 512,
        c_dim: 0,
        channel_base: 128,
        channel_max: 16,
        ..GeneratorConfig::default()
    };
    Generator::new(&config, RESOLUTION, 3, device).unwrap()
}

#[test]
fn test_end_to_end_five_samples() {
    let device = Device::Cpu;
    let dataset = test_dataset(100);
    let generator = tiny_generator(&device);
    let encoder = Encoder::new(EncoderArch::Idinvert, RESOLUTION, 3, &device).unwrap();

    let mut rng = ChaCha8Rng::seed_from_u64(0);
    let samples = choose_eval_samples(&mut rng, dataset.len(), 5).unwrap();
    assert_eq!(samples.len(), 5);
    let mut distinct = samples.clone();
    distinct.sort_unstable();
    distinct.dedup();
    assert_eq!(distinct.len(), 5);

    let out = TempDir::new().unwrap();
    let paths = eval_encoder(
        &encoder,
        &generator.synthesis,
        &dataset,
        &samples,
        RESOLUTION,
        out.path(),
        &device,
    )
    .unwrap();

    assert_eq!(paths.len(), 5);
    for (i, path) in paths.iter().enumerate() {
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            format!("recon_{i:03}.png")
        );
        let written = image::open(path).unwrap();
        assert_eq!(written.width() as usize, 2 * RESOLUTION);
        assert_eq!(written.height() as usize, RESOLUTION);
    }
}

#[test]
fn test_eval_idempotent() {
    let device = Device::Cpu;
    let dataset = test_dataset(40);
    let generator = tiny_generator(&device);
    let encoder = Encoder::new(EncoderArch::AeStylegan, RESOLUTION, 3, &device).unwrap();
    let samples = vec![0usize, 7, 13];

    let out_a = TempDir::new().unwrap();
    let out_b = TempDir::new().unwrap();
    let paths_a = eval_encoder(
        &encoder,
        &generator.synthesis,
        &dataset,
        &samples,
        RESOLUTION,
        out_a.path(),
        &device,
    )
    .unwrap();
    let paths_b = eval_encoder(
        &encoder,
        &generator.synthesis,
        &dataset,
        &samples,
        RESOLUTION,
        out_b.path(),
        &device,
    )
    .unwrap();

    for (a, b) in paths_a.iter().zip(&paths_b) {
        let bytes_a = std::fs::read(a).unwrap();
        let bytes_b = std::fs::read(b).unwrap();
        assert_eq!(bytes_a, bytes_b, "render of {} not reproducible", a.display());
    }
}

#[test]
fn test_oversized_sample_request_rejected() {
    let mut rng = ChaCha8Rng::seed_from_u64(0);
    assert!(choose_eval_samples(&mut rng, 4, 5).is_err());
}

/// Write a tiny PNG folder dataset and a config pointing at it.
fn folder_fixture(dir: &TempDir, n: usize) -> ChrysalisConfig {
    let data_dir = dir.path().join("data");
    std::fs::create_dir_all(&data_dir).unwrap();
    for i in 0..n {
        let v = u8::try_from((i * 23) % 256).unwrap();
        let img = image::RgbImage::from_pixel(
            u32::try_from(RESOLUTION).unwrap(),
            u32::try_from(RESOLUTION).unwrap(),
            image::Rgb([v, 128, 255 - v]),
        );
        img.save(data_dir.join(format!("img_{i:03}.png"))).unwrap();
    }

    let mut config = ChrysalisConfig::from_preset("butterfly-128").unwrap();
    config.run_dir = dir.path().join("run").to_string_lossy().into_owned();
    config.dataset.path = data_dir.to_string_lossy().into_owned();
    config.dataset.use_labels = false;
    config.resolution = RESOLUTION;
    config.generator.z_dim = 32;
    config.generator.channel_base = 128;
    config.generator.channel_max = 16;
    config.discriminator.channel_base = 128;
    config.discriminator.channel_max = 16;
    config.eval.n_source_imgs = 3;
    config.training.batch_size = 2;
    config.training.total_steps = 2;
    config.training.logging_steps = 1;
    config
}

#[test]
fn test_trainer_eval_pass() {
    let dir = TempDir::new().unwrap();
    let config = folder_fixture(&dir, 12);
    let run_dir = config.run_dir.clone();

    let mut trainer = Trainer::new(config).unwrap();
    assert_eq!(trainer.eval_samples().len(), 3);
    // Encoder-only mode: a single combined phase.
    let names: Vec<_> = trainer.phases().iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["encoderboth"]);

    let artifacts = trainer.eval().unwrap();
    assert_eq!(artifacts.len(), 3);
    assert!(std::path::Path::new(&run_dir).join("reals.png").is_file());

    // Same run state renders the same sample set again.
    let again = trainer.eval().unwrap();
    assert_eq!(artifacts, again);
}

#[test]
fn test_trainer_adversarial_phase_set() {
    let dir = TempDir::new().unwrap();
    let mut config = folder_fixture(&dir, 8);
    config.loss.adv_enc_lambda = 0.1;

    let trainer = Trainer::new(config).unwrap();
    let names: Vec<_> = trainer.phases().iter().map(|p| p.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["discriminatormain", "discriminatorreg", "encoderboth"]
    );
}

#[test]
fn test_trainer_train_pass_writes_snapshot() {
    let dir = TempDir::new().unwrap();
    let config = folder_fixture(&dir, 8);
    let run_dir = config.run_dir.clone();
    let total_steps = config.training.total_steps;

    let mut trainer = Trainer::new(config).unwrap();
    trainer.train().unwrap();

    let snapshot = std::path::Path::new(&run_dir).join(format!("snapshot-{total_steps}"));
    for name in [
        "generator.safetensors",
        "generator_ema.safetensors",
        "discriminator.safetensors",
        "encoder.safetensors",
        "snapshot.json",
        "config.yaml",
    ] {
        assert!(snapshot.join(name).is_file(), "missing {name}");
    }
}

#[test]
fn test_trainer_rejects_resolution_mismatch() {
    let dir = TempDir::new().unwrap();
    let mut config = folder_fixture(&dir, 4);
    // Dataset images are 32x32; claim 64.
    config.resolution = 64;
    assert!(Trainer::new(config).is_err());
}
