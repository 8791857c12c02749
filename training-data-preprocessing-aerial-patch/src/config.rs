//! Sampler configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{SamplingError, SamplingResult};

/// Perturbation applied to label images before windows are cut.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoiseModel {
    /// Toggle pixels on class edges.
    #[default]
    Boundary,
    /// Erase blocks of the positive class, emulating missing annotations.
    Omission,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Side of the square data patch in pixels.
    pub dim_data: u32,
    /// Side of the centred label patch in pixels.
    pub dim_label: u32,
    /// Rotate each opened pair by a random angle and flip each window.
    pub rotation: bool,
    /// Subtract per-channel mean and divide by `std`.
    pub preprocessing: bool,
    pub std: f32,
    /// Enforce `mix_ratio` as the admitted positive fraction.
    pub mixed_labels: bool,
    pub mix_ratio: f32,
    /// Initial per-image candidate budget; also fixes the corpus size.
    pub samples_per_image: usize,
    pub label_noise_enable: bool,
    pub label_noise: f32,
    pub label_noise_model: NoiseModel,
    /// Mean absolute error above which a scored patch is deferred. 1.0 disables.
    pub curriculum_threshold: f32,
    /// Candidate attempts allowed per corpus row before sampling gives up.
    pub attempts_per_patch: u64,
    pub seed: Option<u64>,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            dim_data: 64,
            dim_label: 16,
            rotation: false,
            preprocessing: true,
            std: 0.18,
            mixed_labels: false,
            mix_ratio: 0.5,
            samples_per_image: 100,
            label_noise_enable: false,
            label_noise: 0.0,
            label_noise_model: NoiseModel::Boundary,
            curriculum_threshold: 1.0,
            attempts_per_patch: 1000,
            seed: None,
        }
    }
}

impl SamplerConfig {
    pub fn from_json_file(path: &Path) -> SamplingResult<Self> {
        let raw = std::fs::read(path).map_err(|source| SamplingError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg: Self = serde_json::from_slice(&raw).map_err(|e| {
            SamplingError::InvalidConfig(format!("{}: {}", path.display(), e))
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> SamplingResult<()> {
        let fail = |msg: String| Err(SamplingError::InvalidConfig(msg));
        if self.dim_data == 0 || self.dim_label == 0 {
            return fail("dim_data and dim_label must be positive".into());
        }
        if self.dim_label > self.dim_data {
            return fail(format!(
                "dim_label {} exceeds dim_data {}",
                self.dim_label, self.dim_data
            ));
        }
        if (self.dim_data - self.dim_label) % 2 != 0 {
            return fail(format!(
                "dim_data {} and dim_label {} must differ by an even number",
                self.dim_data, self.dim_label
            ));
        }
        if self.samples_per_image == 0 {
            return fail("samples_per_image must be positive".into());
        }
        if !(0.0..=1.0).contains(&self.mix_ratio) {
            return fail(format!("mix_ratio {} outside [0, 1]", self.mix_ratio));
        }
        if self.std <= 0.0 || !self.std.is_finite() {
            return fail(format!("std {} must be positive", self.std));
        }
        if !(0.0..=1.0).contains(&self.label_noise) {
            return fail(format!("label_noise {} outside [0, 1]", self.label_noise));
        }
        if self.attempts_per_patch == 0 {
            return fail("attempts_per_patch must be positive".into());
        }
        Ok(())
    }

    /// Offset of the label window inside the data window.
    pub fn label_offset(&self) -> u32 {
        (self.dim_data - self.dim_label) / 2
    }

    pub fn data_width(&self) -> usize {
        3 * (self.dim_data as usize).pow(2)
    }

    pub fn label_width(&self) -> usize {
        (self.dim_label as usize).pow(2)
    }

    pub fn curriculum_enabled(&self) -> bool {
        self.curriculum_threshold < 1.0
    }

    pub fn noise_enabled(&self) -> bool {
        self.label_noise_enable && self.label_noise > 0.0
    }
}
