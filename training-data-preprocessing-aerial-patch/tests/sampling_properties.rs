use std::fs;
use std::path::Path;

use aerial_patch::{
    enumerate_pairs, sample_partition, NoiseModel, PatchSampler, SamplerConfig, SamplingError,
    SamplingOutcome,
};
use image::{GrayImage, Luma, Rgb, RgbImage, Rgba, RgbaImage};
use ndarray::{Array2, ArrayView2};
use ndarray_npy::read_npy;

fn write_pair<D: AsRef<Path>>(root: D, name: &str, data: &image::DynamicImage, label: &GrayImage) {
    let root = root.as_ref();
    fs::create_dir_all(root.join("data")).unwrap();
    fs::create_dir_all(root.join("labels")).unwrap();
    data.save(root.join("data").join(name)).unwrap();
    label.save(root.join("labels").join(name)).unwrap();
}

fn textured(size: u32) -> RgbImage {
    RgbImage::from_fn(size, size, |x, y| {
        Rgb([(x * 9 % 200) as u8, (y * 7 % 200) as u8, ((x + y) * 3 % 200) as u8])
    })
}

/// Label present (0) on columns `[from, to)`, absent (255) elsewhere.
fn stripe_label(size: u32, from: u32, to: u32) -> GrayImage {
    GrayImage::from_fn(size, size, |x, _| {
        if (from..to).contains(&x) {
            Luma([0])
        } else {
            Luma([255])
        }
    })
}

fn base_config() -> SamplerConfig {
    SamplerConfig {
        dim_data: 8,
        dim_label: 4,
        preprocessing: false,
        seed: Some(2024),
        ..Default::default()
    }
}

fn positive_fraction(labels: ArrayView2<'_, u8>) -> f64 {
    let positive = labels
        .rows()
        .into_iter()
        .filter(|row| row.iter().any(|&v| v == 1))
        .count();
    positive as f64 / labels.nrows() as f64
}

#[test]
fn single_small_pair_fills_exact_shape() {
    let temp = tempfile::tempdir().unwrap();
    write_pair(
        temp.path(),
        "tile.png",
        &textured(6).into(),
        &GrayImage::from_fn(6, 6, |x, y| Luma([if (x + y) % 2 == 0 { 0 } else { 255 }])),
    );
    let cfg = SamplerConfig {
        dim_data: 4,
        dim_label: 2,
        samples_per_image: 3,
        ..base_config()
    };
    let outcome = sample_partition(temp.path(), &cfg, None).unwrap();

    assert_eq!(outcome.corpus.data().dim(), (3, 48));
    assert_eq!(outcome.corpus.labels().dim(), (3, 4));
    assert!(outcome.corpus.labels().iter().all(|&v| v <= 1));
    assert_eq!(outcome.stats.accepted, 3);
}

/// Red and green encode the pixel position so each row's origin can be
/// recovered from its data.
fn positional_image(size: u32) -> image::DynamicImage {
    RgbImage::from_fn(size, size, |x, y| Rgb([(x * 8) as u8, (y * 8) as u8, 100])).into()
}

/// Rows whose label differs from `present` evaluated at the recovered window.
/// Assumes `dim_data 8`, `dim_label 4` and no augmentation.
fn misaligned_rows(outcome: &SamplingOutcome, present: impl Fn(u32, u32) -> bool) -> usize {
    let plane = 64;
    outcome
        .corpus
        .data()
        .rows()
        .into_iter()
        .zip(outcome.corpus.labels().rows())
        .filter(|(row, labels)| {
            let x0 = (row[0] * 255.0 / 8.0).round() as u32;
            let y0 = (row[plane] * 255.0 / 8.0).round() as u32;
            (0..4u32).any(|dy| {
                (0..4u32).any(|dx| {
                    labels[(dy * 4 + dx) as usize] != present(x0 + 2 + dx, y0 + 2 + dy) as u8
                })
            })
        })
        .count()
}

#[test]
fn labels_stay_aligned_with_their_pixels() {
    let present = |x: u32, y: u32| (x / 3 + y / 2) % 2 == 0;
    let label = GrayImage::from_fn(32, 32, |x, y| Luma([if present(x, y) { 0 } else { 255 }]));
    let temp = tempfile::tempdir().unwrap();
    write_pair(temp.path(), "grid.png", &positional_image(32), &label);

    let cfg = SamplerConfig {
        samples_per_image: 50,
        ..base_config()
    };
    let outcome = sample_partition(temp.path(), &cfg, None).unwrap();
    assert_eq!(misaligned_rows(&outcome, present), 0);
}

#[test]
fn label_noise_reaches_the_cut_labels() {
    let present = |x: u32, _: u32| (12..20).contains(&x);
    let temp = tempfile::tempdir().unwrap();
    for name in ["a.png", "b.png", "c.png"] {
        write_pair(temp.path(), name, &positional_image(32), &stripe_label(32, 12, 20));
    }

    let clean = SamplerConfig {
        samples_per_image: 60,
        ..base_config()
    };
    let noisy = SamplerConfig {
        label_noise_enable: true,
        label_noise: 1.0,
        ..clean.clone()
    };

    let baseline = sample_partition(temp.path(), &clean, None).unwrap();
    assert_eq!(baseline.stats.label_noise_applied, 0.0);
    assert_eq!(misaligned_rows(&baseline, present), 0);

    let perturbed = sample_partition(temp.path(), &noisy, None).unwrap();
    assert!(perturbed.stats.label_noise_applied > 0.0);
    assert!(misaligned_rows(&perturbed, present) > 0);
}

#[test]
fn rotated_rgb_border_never_reaches_the_corpus() {
    // Pure white source: after bilinear rotation a pixel is black exactly
    // when its alpha is zero.
    let temp = tempfile::tempdir().unwrap();
    write_pair(
        temp.path(),
        "white.png",
        &RgbImage::from_pixel(32, 32, Rgb([255, 255, 255])).into(),
        &stripe_label(32, 10, 22),
    );
    let cfg = SamplerConfig {
        rotation: true,
        samples_per_image: 200,
        seed: Some(1),
        ..base_config()
    };
    let outcome = sample_partition(temp.path(), &cfg, None).unwrap();
    assert!(outcome.corpus.is_full());
    assert_eq!(outcome.corpus.data().ncols(), 3 * 64);
    assert!(outcome.corpus.data().iter().all(|&v| v > 0.0));
    assert!(outcome.stats.rejected_alpha > 0);
}

#[test]
fn transparent_regions_never_reach_the_corpus() {
    // Left half is transparent and marked with full red.
    let data = RgbaImage::from_fn(16, 16, |x, y| {
        if x < 8 {
            Rgba([255, 0, 0, 0])
        } else {
            Rgba([(x * 10) as u8, (y * 10) as u8, 30, 255])
        }
    });
    let temp = tempfile::tempdir().unwrap();
    write_pair(temp.path(), "edge.png", &data.into(), &stripe_label(16, 10, 12));

    let cfg = SamplerConfig {
        dim_data: 4,
        dim_label: 2,
        samples_per_image: 20,
        ..base_config()
    };
    let outcome = sample_partition(temp.path(), &cfg, None).unwrap();

    assert_eq!(outcome.corpus.data().ncols(), 48);
    for row in outcome.corpus.data().rows() {
        assert!(row.iter().take(16).all(|&r| r < 0.9), "transparent pixel leaked");
    }
    assert!(outcome.stats.rejected_alpha > 0);
}

#[test]
fn mixed_labels_track_the_requested_ratio() {
    let temp = tempfile::tempdir().unwrap();
    write_pair(temp.path(), "sparse.png", &textured(64).into(), &stripe_label(64, 28, 32));

    let cfg = SamplerConfig {
        samples_per_image: 200,
        mixed_labels: true,
        mix_ratio: 0.5,
        ..base_config()
    };
    let outcome = sample_partition(temp.path(), &cfg, None).unwrap();
    let fraction = positive_fraction(outcome.corpus.labels());
    assert!((fraction - 0.5).abs() < 0.05, "positive fraction {}", fraction);
    assert!(outcome.stats.rejected_balance > 0);
    assert_eq!(outcome.stats.image_budget, 200);
}

/// Red at full intensity marks labelled pixels, so a scorer can read the
/// label straight off the data.
fn readable_stripe(root: &Path) {
    let data = RgbImage::from_fn(32, 32, |x, y| {
        let r = if (12..20).contains(&x) { 255 } else { (x * 5) as u8 };
        Rgb([r, (y * 7) as u8, 40])
    });
    write_pair(root, "stripe.png", &data.into(), &stripe_label(32, 12, 20));
}

#[test]
fn exact_scorer_never_defers_a_patch() {
    let temp = tempfile::tempdir().unwrap();
    readable_stripe(temp.path());

    let scorer = |batch: ArrayView2<'_, f32>| {
        let row = batch.row(0);
        let predicted: Vec<f32> = (0..4)
            .flat_map(|dy| (0..4).map(move |dx| (dy, dx)))
            .map(|(dy, dx)| if row[(2 + dy) * 8 + 2 + dx] > 0.999 { 1.0 } else { 0.0 })
            .collect();
        Array2::from_shape_vec((1, 16), predicted).map_err(|e| e.to_string())
    };
    let cfg = SamplerConfig {
        samples_per_image: 40,
        curriculum_threshold: 0.0,
        ..base_config()
    };
    let outcome = sample_partition(temp.path(), &cfg, Some(&scorer)).unwrap();
    assert!(outcome.corpus.is_full());
    assert_eq!(outcome.stats.rejected_curriculum, 0);
}

#[test]
fn blind_scorer_defers_every_labelled_patch() {
    let temp = tempfile::tempdir().unwrap();
    readable_stripe(temp.path());

    let scorer = |_: ArrayView2<'_, f32>| Ok::<_, String>(Array2::<f32>::zeros((1, 16)));
    let cfg = SamplerConfig {
        samples_per_image: 40,
        curriculum_threshold: 0.0,
        ..base_config()
    };
    let outcome = sample_partition(temp.path(), &cfg, Some(&scorer)).unwrap();
    assert!(outcome.corpus.labels().iter().all(|&v| v == 0));
    assert!(outcome.stats.rejected_curriculum > 0);
}

#[test]
fn uniform_images_starve() {
    let temp = tempfile::tempdir().unwrap();
    write_pair(
        temp.path(),
        "flat.png",
        &RgbImage::from_pixel(8, 8, Rgb([50, 50, 50])).into(),
        &GrayImage::from_pixel(8, 8, Luma([0])),
    );
    let cfg = SamplerConfig {
        dim_data: 4,
        dim_label: 2,
        samples_per_image: 4,
        attempts_per_patch: 5,
        ..base_config()
    };
    match sample_partition(temp.path(), &cfg, None) {
        Err(SamplingError::Starvation {
            attempts,
            written,
            target,
        }) => {
            assert_eq!(attempts, 20);
            assert_eq!(written, 0);
            assert_eq!(target, 4);
        }
        other => panic!("expected Starvation, got {:?}", other.map(|o| o.stats)),
    }
}

#[test]
fn augmentation_and_noise_still_fill_the_corpus() {
    let temp = tempfile::tempdir().unwrap();
    for name in ["a.png", "b.png"] {
        let label = GrayImage::from_fn(24, 24, |x, y| {
            Luma([if (6..18).contains(&x) && (8..16).contains(&y) { 0 } else { 255 }])
        });
        write_pair(temp.path(), name, &textured(24).into(), &label);
    }

    for model in [NoiseModel::Boundary, NoiseModel::Omission] {
        let cfg = SamplerConfig {
            rotation: true,
            preprocessing: true,
            label_noise_enable: true,
            label_noise: 0.3,
            label_noise_model: model,
            samples_per_image: 25,
            ..base_config()
        };
        let outcome = sample_partition(temp.path(), &cfg, None).unwrap();
        assert_eq!(outcome.corpus.len(), 50);
        assert!(outcome.corpus.data().iter().all(|v| v.is_finite()));
        assert!(outcome.corpus.labels().iter().all(|&v| v <= 1));
        assert!(outcome.stats.label_noise_applied > 0.0);
    }
}

#[test]
fn fixed_seed_reproduces_the_corpus() {
    let temp = tempfile::tempdir().unwrap();
    write_pair(temp.path(), "a.png", &textured(20).into(), &stripe_label(20, 5, 9));
    write_pair(temp.path(), "b.png", &textured(20).into(), &stripe_label(20, 11, 14));
    let cfg = SamplerConfig {
        rotation: true,
        preprocessing: true,
        samples_per_image: 15,
        ..base_config()
    };
    let pairs = enumerate_pairs(temp.path()).unwrap();
    let first = PatchSampler::new(&pairs, cfg.clone(), None).unwrap().run().unwrap();
    let second = PatchSampler::new(&pairs, cfg, None).unwrap().run().unwrap();
    assert_eq!(first.corpus.data(), second.corpus.data());
    assert_eq!(first.corpus.labels(), second.corpus.labels());
}

#[test]
fn sampled_partition_round_trips_through_npy() {
    let temp = tempfile::tempdir().unwrap();
    let partition = temp.path().join("train");
    write_pair(&partition, "a.png", &textured(16).into(), &stripe_label(16, 4, 8));
    let out = temp.path().join("out");

    let cfg = SamplerConfig {
        samples_per_image: 7,
        ..base_config()
    };
    let outcome = sample_partition(&partition, &cfg, None).unwrap();
    let paths = outcome.corpus.write_npy_chunks(&out, 3).unwrap();
    assert_eq!(paths.len(), 6);

    let data: Array2<f32> = read_npy(out.join("data_F1.npy")).unwrap();
    assert_eq!(data.dim(), (3, 192));
    assert_eq!(data.row(0), outcome.corpus.data().row(0));
    let labels: Array2<u8> = read_npy(out.join("labels_F3.npy")).unwrap();
    assert_eq!(labels.dim(), (1, 16));
    assert_eq!(labels.row(0), outcome.corpus.labels().row(6));
}
