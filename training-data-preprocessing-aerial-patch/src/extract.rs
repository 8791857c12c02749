//! Cutting data/label windows out of an opened pair and turning them into
//! flat training vectors.

use image::imageops::{self, flip_horizontal_in_place, flip_vertical_in_place};
use image::{GrayImage, Luma, Rgba, RgbaImage};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use rand::Rng;

use crate::error::{SamplingError, SamplingResult};
use crate::store::OpenedPair;

/// Label value written into corners uncovered by rotation ("class absent").
const LABEL_FILL: u8 = 255;

/// Flip applied identically to both windows of a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flip {
    Vertical,
    Horizontal,
    None,
}

impl Flip {
    pub fn sample<R: Rng + ?Sized>(rng: &mut R) -> Self {
        match rng.gen_range(0..3) {
            0 => Flip::Vertical,
            1 => Flip::Horizontal,
            _ => Flip::None,
        }
    }
}

/// A candidate patch before filtering.
///
/// `data` is channel-major and scaled to `[0, 1]`. It carries a fourth (alpha)
/// plane when `has_alpha` is set. `label` holds `dim_label²` values, 1 where
/// the class is present.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub data: Vec<f32>,
    pub label: Vec<u8>,
    pub has_alpha: bool,
}

impl Candidate {
    pub fn contains_class(&self) -> bool {
        self.label.iter().any(|&v| v == 1)
    }
}

/// Crop `dim × dim` windows at `(x, y)` from both images of a pair.
pub fn crop_window(
    data: &RgbaImage,
    label: &GrayImage,
    x: u32,
    y: u32,
    dim: u32,
) -> SamplingResult<(RgbaImage, GrayImage)> {
    let (width, height) = data.dimensions();
    if x.checked_add(dim).map_or(true, |end| end > width)
        || y.checked_add(dim).map_or(true, |end| end > height)
        || label.dimensions() != (width, height)
    {
        return Err(SamplingError::WindowOutOfBounds {
            x,
            y,
            dim,
            width,
            height,
        });
    }
    let data_window = imageops::crop_imm(data, x, y, dim, dim).to_image();
    let label_window = imageops::crop_imm(label, x, y, dim, dim).to_image();
    Ok((data_window, label_window))
}

/// Rotate both images of a pair about their centre by the same angle.
///
/// Uncovered corners are transparent, so the result always carries alpha and
/// windows reaching past the source border fail the alpha check.
pub fn rotate_pair(pair: &OpenedPair, degrees: f32) -> OpenedPair {
    let theta = degrees.to_radians();
    let data = rotate_about_center(
        &pair.data,
        theta,
        Interpolation::Bilinear,
        Rgba([0, 0, 0, 0]),
    );
    let label = rotate_about_center(
        &pair.label,
        theta,
        Interpolation::Nearest,
        Luma([LABEL_FILL]),
    );
    OpenedPair {
        data,
        label,
        has_alpha: true,
        path: pair.path.clone(),
    }
}

pub fn apply_flip(data: &mut RgbaImage, label: &mut GrayImage, flip: Flip) {
    match flip {
        Flip::Vertical => {
            flip_vertical_in_place(data);
            flip_vertical_in_place(label);
        }
        Flip::Horizontal => {
            flip_horizontal_in_place(data);
            flip_horizontal_in_place(label);
        }
        Flip::None => {}
    }
}

/// Reorder interleaved pixels into channel planes, scaled to `[0, 1]`.
pub fn to_channel_vector(window: &RgbaImage, with_alpha: bool) -> Vec<f32> {
    let channels = if with_alpha { 4 } else { 3 };
    let plane = (window.width() * window.height()) as usize;
    let mut out = vec![0f32; channels * plane];
    for (i, px) in window.pixels().enumerate() {
        for c in 0..channels {
            out[c * plane + i] = px[c] as f32 / 255.0;
        }
    }
    out
}

/// Take the centred `dim_label²` block of a label window and invert it so
/// that 1 marks the class. Only pure white (255) maps to 0.
pub fn to_label_vector(window: &GrayImage, dim_data: u32, dim_label: u32) -> Vec<u8> {
    let offset = (dim_data - dim_label) / 2;
    let mut out = Vec::with_capacity((dim_label * dim_label) as usize);
    for y in offset..offset + dim_label {
        for x in offset..offset + dim_label {
            let v = window.get_pixel(x, y)[0];
            out.push(1 - v / 255);
        }
    }
    out
}

/// Subtract each channel's mean and divide by `std`, in place.
pub fn normalize(sample: &mut [f32], channels: usize, std: f32) {
    if channels == 0 || sample.is_empty() {
        return;
    }
    let plane = sample.len() / channels;
    for chunk in sample.chunks_mut(plane) {
        let mean = chunk.iter().sum::<f32>() / chunk.len() as f32;
        for v in chunk.iter_mut() {
            *v = (*v - mean) / std;
        }
    }
}

/// Turns random origins on an opened pair into [`Candidate`]s.
#[derive(Debug, Clone, Copy)]
pub struct PatchExtractor {
    pub dim_data: u32,
    pub dim_label: u32,
    pub augment: bool,
}

impl PatchExtractor {
    /// Uniform origin with the window fully inside a `width × height` image.
    pub fn draw_origin<R: Rng + ?Sized>(&self, (width, height): (u32, u32), rng: &mut R) -> (u32, u32) {
        let x = rng.gen_range(0..=width - self.dim_data);
        let y = rng.gen_range(0..=height - self.dim_data);
        (x, y)
    }

    pub fn draw_flip<R: Rng + ?Sized>(&self, rng: &mut R) -> Flip {
        if self.augment {
            Flip::sample(rng)
        } else {
            Flip::None
        }
    }

    pub fn candidate(&self, pair: &OpenedPair, x: u32, y: u32, flip: Flip) -> SamplingResult<Candidate> {
        let (mut data, mut label) = crop_window(&pair.data, &pair.label, x, y, self.dim_data)?;
        apply_flip(&mut data, &mut label, flip);
        Ok(Candidate {
            data: to_channel_vector(&data, pair.has_alpha),
            label: to_label_vector(&label, self.dim_data, self.dim_label),
            has_alpha: pair.has_alpha,
        })
    }
}
