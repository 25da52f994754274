use chrysalis_rs::dataset::MemoryDataset;
use chrysalis_rs::grid::setup_snapshot_grid;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

const SHAPE: (usize, usize, usize) = (3, 128, 128);

fn unlabeled_dataset(n: usize) -> MemoryDataset {
    let images = (0..n)
        .map(|i| vec![(i % 256) as u8; SHAPE.0 * SHAPE.1 * SHAPE.2])
        .collect();
    MemoryDataset::new(images, SHAPE, None).unwrap()
}

fn labeled_dataset(n: usize, num_labels: usize) -> MemoryDataset {
    let images = (0..n)
        .map(|i| vec![(i % 256) as u8; SHAPE.0 * SHAPE.1 * SHAPE.2])
        .collect();
    // One-hot labels cycling through the classes.
    let labels = (0..n)
        .map(|i| {
            let mut label = vec![0f32; num_labels];
            label[i % num_labels] = 1.0;
            label
        })
        .collect();
    MemoryDataset::new(images, SHAPE, Some(labels)).unwrap()
}

fn bench_grid_unlabeled(c: &mut Criterion) {
    let mut group = c.benchmark_group("grid_unlabeled");

    for size in [64usize, 512, 2048].iter() {
        let dataset = unlabeled_dataset(*size);
        group.bench_with_input(format!("images_{}", size), size, |b, _| {
            b.iter(|| {
                let grid = black_box(setup_snapshot_grid(&dataset, 0).unwrap());
                black_box(grid);
            });
        });
    }

    group.finish();
}

fn bench_grid_labeled(c: &mut Criterion) {
    let mut group = c.benchmark_group("grid_labeled");

    for num_labels in [4usize, 16, 64].iter() {
        let dataset = labeled_dataset(2048, *num_labels);
        group.bench_with_input(format!("classes_{}", num_labels), num_labels, |b, _| {
            b.iter(|| {
                let grid = black_box(setup_snapshot_grid(&dataset, 0).unwrap());
                black_box(grid);
            });
        });
    }

    group.finish();
}

fn bench_grid_seed_stability(c: &mut Criterion) {
    c.bench_function("grid_reseed", |b| {
        let dataset = labeled_dataset(512, 16);
        let mut seed = 0u64;
        b.iter(|| {
            seed = seed.wrapping_add(1);
            let grid = black_box(setup_snapshot_grid(&dataset, seed).unwrap());
            black_box(grid);
        });
    });
}

criterion_group!(
    benches,
    bench_grid_unlabeled,
    bench_grid_labeled,
    bench_grid_seed_stability,
);
criterion_main!(benches);
