//! Admission policy for candidate patches.
//!
//! Checks run in a fixed order and the first failure rejects:
//! alpha border validity, degenerate content, class balance, curriculum.

use ndarray::{Array2, ArrayView2};

use crate::config::SamplerConfig;
use crate::error::{SamplingError, SamplingResult};
use crate::extract::{normalize, Candidate};

/// Black-box difficulty oracle used by the curriculum policy.
///
/// Receives a `(batch, data_width)` view and returns `(batch, label_width)`
/// predictions. Must not mutate anything observable to the sampler.
pub trait PatchScorer {
    fn score(&self, batch: ArrayView2<'_, f32>) -> Result<Array2<f32>, String>;
}

impl<F> PatchScorer for F
where
    F: Fn(ArrayView2<'_, f32>) -> Result<Array2<f32>, String>,
{
    fn score(&self, batch: ArrayView2<'_, f32>) -> Result<Array2<f32>, String> {
        self(batch)
    }
}

/// Running count of admitted patches and how many contain the class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BalanceTally {
    pub positive: u64,
    pub total: u64,
}

impl BalanceTally {
    /// Admitted positive fraction; 0 while nothing has been admitted.
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.positive as f64 / self.total as f64
        }
    }

    pub fn record(self, contains_class: bool) -> Self {
        Self {
            positive: self.positive + contains_class as u64,
            total: self.total + 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Alpha,
    Degenerate,
    Balance,
    Curriculum,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// RGB-only, possibly normalized, ready to be written.
    Accept(Candidate),
    Reject(Rejection),
}

pub struct PatchFilter<'a> {
    preprocessing: bool,
    std: f32,
    mixed_labels: bool,
    mix_ratio: f64,
    curriculum_threshold: f32,
    scorer: Option<&'a dyn PatchScorer>,
}

impl<'a> PatchFilter<'a> {
    pub fn new(cfg: &SamplerConfig, scorer: Option<&'a dyn PatchScorer>) -> Self {
        Self {
            preprocessing: cfg.preprocessing,
            std: cfg.std,
            mixed_labels: cfg.mixed_labels,
            mix_ratio: cfg.mix_ratio as f64,
            curriculum_threshold: cfg.curriculum_threshold,
            scorer: if cfg.curriculum_enabled() { scorer } else { None },
        }
    }

    pub fn curriculum_active(&self) -> bool {
        self.scorer.is_some()
    }

    /// Judge one candidate against a tally snapshot. The returned tally has
    /// advanced only if the candidate was accepted.
    pub fn admit(
        &self,
        mut candidate: Candidate,
        tally: BalanceTally,
    ) -> SamplingResult<(Verdict, BalanceTally)> {
        let channels = if candidate.has_alpha { 4 } else { 3 };
        let plane = candidate.data.len() / channels;

        if candidate.has_alpha {
            let alpha_min = candidate.data[3 * plane..]
                .iter()
                .copied()
                .fold(f32::INFINITY, f32::min);
            if alpha_min <= 0.0 {
                return Ok((Verdict::Reject(Rejection::Alpha), tally));
            }
            candidate.data.truncate(3 * plane);
            candidate.has_alpha = false;
        } else if is_degenerate(&candidate.data) {
            return Ok((Verdict::Reject(Rejection::Degenerate), tally));
        }

        if self.preprocessing {
            normalize(&mut candidate.data, 3, self.std);
        }

        let contains_class = candidate.contains_class();
        if self.mixed_labels && tally.ratio() < self.mix_ratio && !contains_class {
            return Ok((Verdict::Reject(Rejection::Balance), tally));
        }

        if let Some(scorer) = self.scorer {
            let difference = self.curriculum_difference(scorer, &candidate)?;
            if difference > self.curriculum_threshold {
                return Ok((Verdict::Reject(Rejection::Curriculum), tally));
            }
        }

        Ok((Verdict::Accept(candidate), tally.record(contains_class)))
    }

    fn curriculum_difference(
        &self,
        scorer: &dyn PatchScorer,
        candidate: &Candidate,
    ) -> SamplingResult<f32> {
        let batch = ArrayView2::from_shape((1, candidate.data.len()), candidate.data.as_slice())
            .map_err(|e| SamplingError::Scorer(e.to_string()))?;
        let predicted = scorer.score(batch).map_err(SamplingError::Scorer)?;
        if predicted.len() != candidate.label.len() {
            return Err(SamplingError::Scorer(format!(
                "scorer returned {} values for a {}-pixel label",
                predicted.len(),
                candidate.label.len()
            )));
        }
        let total: f32 = predicted
            .iter()
            .zip(candidate.label.iter())
            .map(|(&p, &y)| (p - y as f32).abs())
            .sum();
        Ok(total / candidate.label.len().max(1) as f32)
    }
}

fn is_degenerate(data: &[f32]) -> bool {
    let (lo, hi) = data
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    lo == hi
}
