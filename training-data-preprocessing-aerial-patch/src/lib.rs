//! Patch sampling engine for aerial image/label datasets.
//!
//! A dataset root holds `train`, `valid` and `test` partitions, each with
//! `data/` and `labels/` image folders. [`sample_partition`] turns one
//! partition into a fixed-size corpus of `dim_data²` RGB patches and their
//! centred `dim_label²` binary labels. Sampling is class-balanced and
//! optionally curriculum-filtered.

pub mod config;
pub mod corpus;
pub mod error;
pub mod extract;
pub mod filter;
pub mod noise;
pub mod sampler;
pub mod store;

pub use config::{NoiseModel, SamplerConfig};
pub use corpus::PatchCorpus;
pub use error::{SamplingError, SamplingResult};
pub use filter::{BalanceTally, PatchScorer};
pub use sampler::{sample_partition, PatchSampler, SamplerState, SamplingOutcome, SamplingStats};
pub use store::{enumerate_pairs, resolve, DatasetPartitions, ImagePairSet, OpenedPair};
