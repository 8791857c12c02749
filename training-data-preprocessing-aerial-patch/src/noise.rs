//! Synthetic annotation noise applied to label images before sampling.

use image::{GrayImage, Luma};
use rand::{Rng, RngCore};

use crate::config::{NoiseModel, SamplerConfig};

const ABSENT: u8 = 255;
const PRESENT: u8 = 0;

fn is_present(v: u8) -> bool {
    v != ABSENT
}

/// A perturbation policy. Implementations must return an image of the same
/// size and leave the input untouched.
pub trait LabelNoise {
    fn perturb(&self, label: &GrayImage, probability: f32, rng: &mut dyn RngCore) -> GrayImage;
}

/// Toggles pixels that sit on a class edge.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoundaryFlip;

impl LabelNoise for BoundaryFlip {
    fn perturb(&self, label: &GrayImage, probability: f32, rng: &mut dyn RngCore) -> GrayImage {
        let (width, height) = label.dimensions();
        let mut out = label.clone();
        for y in 0..height {
            for x in 0..width {
                let here = is_present(label.get_pixel(x, y)[0]);
                let on_edge = [(-1i64, 0i64), (1, 0), (0, -1), (0, 1)]
                    .iter()
                    .filter_map(|&(dx, dy)| {
                        let nx = x as i64 + dx;
                        let ny = y as i64 + dy;
                        if nx < 0 || ny < 0 || nx >= width as i64 || ny >= height as i64 {
                            None
                        } else {
                            Some(is_present(label.get_pixel(nx as u32, ny as u32)[0]))
                        }
                    })
                    .any(|neighbour| neighbour != here);
                if on_edge && rng.gen::<f32>() < probability {
                    let flipped = if here { ABSENT } else { PRESENT };
                    out.put_pixel(x, y, Luma([flipped]));
                }
            }
        }
        out
    }
}

/// Erases square blocks of the class, emulating annotations that were never
/// drawn.
#[derive(Debug, Clone, Copy)]
pub struct Omission {
    pub block: u32,
}

impl LabelNoise for Omission {
    fn perturb(&self, label: &GrayImage, probability: f32, rng: &mut dyn RngCore) -> GrayImage {
        let (width, height) = label.dimensions();
        let block = self.block.max(1);
        let per_pixel = probability / (block * block) as f32;
        let half = block / 2;
        let mut out = label.clone();
        for y in 0..height {
            for x in 0..width {
                if !is_present(label.get_pixel(x, y)[0]) || rng.gen::<f32>() >= per_pixel {
                    continue;
                }
                let x0 = x.saturating_sub(half);
                let y0 = y.saturating_sub(half);
                for by in y0..(y0 + block).min(height) {
                    for bx in x0..(x0 + block).min(width) {
                        out.put_pixel(bx, by, Luma([ABSENT]));
                    }
                }
            }
        }
        out
    }
}

/// Policy selected by the configuration.
pub fn noise_policy(cfg: &SamplerConfig) -> Box<dyn LabelNoise + Send + Sync> {
    match cfg.label_noise_model {
        NoiseModel::Boundary => Box::new(BoundaryFlip),
        NoiseModel::Omission => Box::new(Omission {
            block: cfg.dim_label,
        }),
    }
}

/// Perturb `label` with a probability drawn uniformly from `[0, noise_rate]`.
/// Returns the new image and the probability that was applied.
pub fn inject_noise(
    label: &GrayImage,
    noise_rate: f32,
    policy: &dyn LabelNoise,
    rng: &mut dyn RngCore,
) -> (GrayImage, f32) {
    if noise_rate <= 0.0 {
        return (label.clone(), 0.0);
    }
    let probability = rng.gen_range(0.0..=noise_rate.min(1.0));
    (policy.perturb(label, probability, rng), probability)
}
