//! Epochless sampling driver.
//!
//! Images are visited through a rotating queue that is reshuffled at the
//! start of every pass. Each visit draws up to `budget` candidates from the
//! image, and the loop only stops once the corpus is exactly full. Outside
//! mixed-label mode the per-image budget shrinks by 10% (floor 10) after each
//! full pass.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::config::SamplerConfig;
use crate::corpus::PatchCorpus;
use crate::error::{SamplingError, SamplingResult};
use crate::extract::{rotate_pair, PatchExtractor};
use crate::filter::{BalanceTally, PatchFilter, PatchScorer, Rejection, Verdict};
use crate::noise::{inject_noise, noise_policy, LabelNoise};
use crate::store::{enumerate_pairs, ImagePairSet};

const BUDGET_FLOOR: usize = 10;
const BUDGET_DECAY: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    /// Buffers allocated, nothing drawn yet. Left on the first `step`.
    Initializing,
    Streaming,
    Draining,
    Done,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SamplingStats {
    pub candidates: u64,
    pub positive_candidates: u64,
    pub images_opened: u64,
    /// Completed passes over the whole queue.
    pub passes: u64,
    pub accepted: u64,
    pub rejected_alpha: u64,
    pub rejected_degenerate: u64,
    pub rejected_balance: u64,
    pub rejected_curriculum: u64,
    /// Image visits where every candidate drawn was uniform.
    pub images_degenerate: u64,
    /// Sum of per-image label noise probabilities.
    pub label_noise_applied: f64,
    pub image_budget: usize,
}

impl SamplingStats {
    fn count_rejection(&mut self, reason: Rejection) {
        match reason {
            Rejection::Alpha => self.rejected_alpha += 1,
            Rejection::Degenerate => self.rejected_degenerate += 1,
            Rejection::Balance => self.rejected_balance += 1,
            Rejection::Curriculum => self.rejected_curriculum += 1,
        }
    }

    pub fn accept_rate(&self) -> f64 {
        if self.candidates == 0 {
            0.0
        } else {
            self.accepted as f64 / self.candidates as f64
        }
    }
}

/// A completely filled corpus and the statistics of the call that built it.
#[derive(Debug, Clone)]
pub struct SamplingOutcome {
    pub corpus: PatchCorpus,
    pub stats: SamplingStats,
}

pub struct PatchSampler<'a> {
    cfg: SamplerConfig,
    pairs: &'a ImagePairSet,
    extractor: PatchExtractor,
    filter: PatchFilter<'a>,
    noise: Box<dyn LabelNoise + Send + Sync>,
    rng: StdRng,
    queue: VecDeque<usize>,
    budget: usize,
    tally: BalanceTally,
    corpus: PatchCorpus,
    stats: SamplingStats,
    state: SamplerState,
    max_attempts: u64,
    abort: Option<Arc<AtomicBool>>,
}

impl<'a> PatchSampler<'a> {
    pub fn new(
        pairs: &'a ImagePairSet,
        cfg: SamplerConfig,
        scorer: Option<&'a dyn PatchScorer>,
    ) -> SamplingResult<Self> {
        cfg.validate()?;
        if pairs.is_empty() {
            return Err(SamplingError::EmptyData {
                path: pairs.root().to_path_buf(),
            });
        }
        if cfg.curriculum_enabled() && scorer.is_none() {
            warn!(
                "curriculum_threshold={} but no scorer supplied => curriculum disabled",
                cfg.curriculum_threshold
            );
        }

        let rng = match cfg.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let max_count = pairs.len() * cfg.samples_per_image;
        let max_attempts = (max_count as u64).saturating_mul(cfg.attempts_per_patch);

        let sampler = Self {
            extractor: PatchExtractor {
                dim_data: cfg.dim_data,
                dim_label: cfg.dim_label,
                augment: cfg.rotation,
            },
            filter: PatchFilter::new(&cfg, scorer),
            noise: noise_policy(&cfg),
            rng,
            queue: (0..pairs.len()).collect(),
            budget: cfg.samples_per_image,
            tally: BalanceTally::default(),
            corpus: PatchCorpus::new(max_count, cfg.data_width(), cfg.label_width()),
            stats: SamplingStats {
                image_budget: cfg.samples_per_image,
                ..Default::default()
            },
            state: SamplerState::Initializing,
            max_attempts,
            abort: None,
            pairs,
            cfg,
        };

        info!(
            "partition={:?} => {} images x {} samples => target {} patches (max {} attempts)",
            pairs.root(),
            pairs.len(),
            sampler.cfg.samples_per_image,
            max_count,
            max_attempts
        );
        Ok(sampler)
    }

    /// Stop between images once `flag` is set.
    pub fn with_abort(mut self, flag: Arc<AtomicBool>) -> Self {
        self.abort = Some(flag);
        self
    }

    pub fn state(&self) -> SamplerState {
        self.state
    }

    pub fn stats(&self) -> &SamplingStats {
        &self.stats
    }

    pub fn tally(&self) -> BalanceTally {
        self.tally
    }

    pub fn written(&self) -> usize {
        self.corpus.len()
    }

    pub fn target(&self) -> usize {
        self.corpus.capacity()
    }

    /// Advance by one image (or finish draining). Returns the new state.
    pub fn step(&mut self) -> SamplingResult<SamplerState> {
        match self.state {
            SamplerState::Done => return Ok(SamplerState::Done),
            SamplerState::Draining => {
                self.drain();
                return Ok(self.state);
            }
            SamplerState::Initializing => {
                debug!("sampler => Streaming");
                self.state = SamplerState::Streaming;
            }
            SamplerState::Streaming => {}
        }

        // Abort is only honoured between images.
        if let Some(flag) = &self.abort {
            if flag.load(Ordering::Relaxed) {
                warn!("sampling aborted => {} patches written", self.corpus.len());
                return Err(SamplingError::Aborted {
                    written: self.corpus.len(),
                });
            }
        }

        // 1) Reshuffle at every pass boundary
        self.start_pass_if_due();

        // 2) Rotate the queue head to the tail and sample that image
        let Some(index) = self.queue.pop_front() else {
            return Err(SamplingError::EmptyData {
                path: self.pairs.root().to_path_buf(),
            });
        };
        self.queue.push_back(index);
        self.sample_image(index)?;

        if self.corpus.is_full() {
            self.state = SamplerState::Draining;
        }
        Ok(self.state)
    }

    /// Drive [`step`](Self::step) until the corpus is full.
    pub fn run(mut self) -> SamplingResult<SamplingOutcome> {
        while self.step()? != SamplerState::Done {}
        self.into_outcome().ok_or(SamplingError::Aborted { written: 0 })
    }

    /// The outcome, available only once sampling is done.
    pub fn into_outcome(self) -> Option<SamplingOutcome> {
        if self.state != SamplerState::Done {
            return None;
        }
        Some(SamplingOutcome {
            corpus: self.corpus,
            stats: self.stats,
        })
    }

    fn start_pass_if_due(&mut self) {
        let n = self.pairs.len() as u64;
        if self.stats.images_opened % n != 0 {
            return;
        }
        if self.stats.images_opened > 0 {
            self.stats.passes += 1;
            if !self.cfg.mixed_labels && self.budget > BUDGET_FLOOR {
                self.budget = ((self.budget as f64 * BUDGET_DECAY) as usize).max(BUDGET_FLOOR);
            }
            self.stats.image_budget = self.budget;
            info!(
                "pass #{} done => {}/{} patches, accept rate {:.4}, budget now {}",
                self.stats.passes,
                self.corpus.len(),
                self.corpus.capacity(),
                self.stats.accept_rate(),
                self.budget
            );
        }
        self.queue.make_contiguous().shuffle(&mut self.rng);
    }

    fn sample_image(&mut self, index: usize) -> SamplingResult<()> {
        let mut pair = self.pairs.open(index)?;
        self.stats.images_opened += 1;

        let (width, height) = pair.dimensions();
        if width < self.cfg.dim_data || height < self.cfg.dim_data {
            return Err(SamplingError::ImageTooSmall {
                path: pair.path,
                width,
                height,
                dim: self.cfg.dim_data,
            });
        }

        if self.cfg.noise_enabled() {
            let (label, probability) =
                inject_noise(&pair.label, self.cfg.label_noise, &*self.noise, &mut self.rng);
            pair.label = label;
            self.stats.label_noise_applied += probability as f64;
        }
        if self.cfg.rotation {
            let degrees: f32 = self.rng.gen_range(0.0..360.0);
            pair = rotate_pair(&pair, degrees);
        }

        let before = self.corpus.len();
        let mut drawn = 0u64;
        let mut degenerate = 0u64;
        for _ in 0..self.budget {
            if self.corpus.is_full() {
                break;
            }
            if self.stats.candidates >= self.max_attempts {
                return Err(SamplingError::Starvation {
                    attempts: self.stats.candidates,
                    written: self.corpus.len(),
                    target: self.corpus.capacity(),
                });
            }

            let (x, y) = self.extractor.draw_origin((width, height), &mut self.rng);
            let flip = self.extractor.draw_flip(&mut self.rng);
            let candidate = self.extractor.candidate(&pair, x, y, flip)?;

            self.stats.candidates += 1;
            drawn += 1;
            if candidate.contains_class() {
                self.stats.positive_candidates += 1;
            }

            let (verdict, tally) = self.filter.admit(candidate, self.tally)?;
            self.tally = tally;
            match verdict {
                Verdict::Accept(c) => {
                    self.corpus.push(&c.data, &c.label);
                    self.stats.accepted += 1;
                }
                Verdict::Reject(reason) => {
                    if reason == Rejection::Degenerate {
                        degenerate += 1;
                    }
                    self.stats.count_rejection(reason);
                }
            }
        }
        if drawn > 0 && degenerate == drawn {
            self.stats.images_degenerate += 1;
        }

        debug!(
            "image #{} ({:?}) => +{} patches, {}/{} total",
            index,
            pair.path,
            self.corpus.len() - before,
            self.corpus.len(),
            self.corpus.capacity()
        );
        Ok(())
    }

    fn drain(&mut self) {
        self.stats.image_budget = self.budget;
        info!(
            "sampling done => {} patches from {} candidates over {} image visits ({} fully degenerate) \
             (rejected: alpha={}, degenerate={}, balance={}, curriculum={}; positive ratio {:.4})",
            self.corpus.len(),
            self.stats.candidates,
            self.stats.images_opened,
            self.stats.images_degenerate,
            self.stats.rejected_alpha,
            self.stats.rejected_degenerate,
            self.stats.rejected_balance,
            self.stats.rejected_curriculum,
            self.tally.ratio()
        );
        self.state = SamplerState::Done;
    }
}

/// Enumerate a partition and sample it to completion.
pub fn sample_partition(
    partition_root: &Path,
    cfg: &SamplerConfig,
    scorer: Option<&dyn PatchScorer>,
) -> SamplingResult<SamplingOutcome> {
    let pairs = enumerate_pairs(partition_root)?;
    PatchSampler::new(&pairs, cfg.clone(), scorer)?.run()
}
