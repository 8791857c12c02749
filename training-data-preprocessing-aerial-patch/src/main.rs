use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;

use aerial_patch::{
    enumerate_pairs, resolve, DatasetPartitions, ImagePairSet, NoiseModel, PatchSampler,
    SamplerConfig, SamplerState, SamplingStats,
};

/// Mixed into the seed so the output shuffle does not replay the sampling draws.
const SHUFFLE_SALT: u64 = 0x5eed_5a17;

#[derive(Parser, Debug)]
#[command(name = "training-data-preprocessing-aerial-patch", version = "0.1.0")]
struct Args {
    /// Dataset root containing train/valid/test partitions
    #[arg(long, default_value = "./dataset")]
    data_root: String,

    /// Output directory; one subfolder per partition
    #[arg(long, default_value = "./aerial_patch_output")]
    output_dir: String,

    /// Partitions to sample
    #[arg(long, value_delimiter = ',', default_value = "train,valid,test")]
    partitions: Vec<String>,

    /// Patches per .npy file, 0 => a single data.npy/labels.npy pair
    #[arg(long, default_value = "0")]
    chunk_size: usize,

    /// Shuffle corpus rows before writing
    #[arg(long)]
    shuffle_output: bool,

    /// JSON sampler config; replaces every sampler flag below
    #[arg(long)]
    config: Option<String>,

    /// Data patch side in pixels
    #[arg(long, default_value = "64")]
    dim_data: u32,

    /// Label patch side in pixels (centred in the data patch)
    #[arg(long, default_value = "16")]
    dim_label: u32,

    /// Random rotation of each image plus random flips of each patch
    #[arg(long)]
    rotation: bool,

    /// Skip per-channel mean subtraction and std scaling
    #[arg(long)]
    no_preprocessing: bool,

    /// Normalization scale
    #[arg(long, default_value = "0.18")]
    std: f32,

    /// Enforce mix_ratio as the positive fraction of admitted patches
    #[arg(long)]
    mixed_labels: bool,

    /// Target positive fraction in mixed-label mode
    #[arg(long, default_value = "0.5")]
    mix_ratio: f32,

    /// Initial candidate budget per image visit
    #[arg(long, default_value = "100")]
    samples_per_image: usize,

    /// Perturb labels before sampling
    #[arg(long)]
    label_noise_enable: bool,

    /// Upper bound of the per-image label noise probability
    #[arg(long, default_value = "0.0")]
    label_noise: f32,

    /// Label noise policy
    #[arg(long, default_value = "boundary", value_parser = ["boundary", "omission"])]
    label_noise_model: String,

    /// Candidate attempts allowed per output patch before giving up
    #[arg(long, default_value = "1000")]
    attempts_per_patch: u64,

    /// Seed for every random draw; random when omitted
    #[arg(long)]
    seed: Option<u64>,
}

impl Args {
    fn sampler_config(&self) -> Result<SamplerConfig> {
        if let Some(path) = &self.config {
            info!("Loading sampler config from {:?}", path);
            return SamplerConfig::from_json_file(Path::new(path))
                .with_context(|| format!("loading sampler config {:?}", path));
        }
        let cfg = SamplerConfig {
            dim_data: self.dim_data,
            dim_label: self.dim_label,
            rotation: self.rotation,
            preprocessing: !self.no_preprocessing,
            std: self.std,
            mixed_labels: self.mixed_labels,
            mix_ratio: self.mix_ratio,
            samples_per_image: self.samples_per_image,
            label_noise_enable: self.label_noise_enable,
            label_noise: self.label_noise,
            label_noise_model: match self.label_noise_model.as_str() {
                "omission" => NoiseModel::Omission,
                _ => NoiseModel::Boundary,
            },
            // No model is available from the command line to score patches.
            curriculum_threshold: 1.0,
            attempts_per_patch: self.attempts_per_patch,
            seed: self.seed,
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .format_timestamp_secs()
        .init();
    info!("=== training-data-preprocessing-aerial-patch start ===");

    let args = Args::parse();
    info!("Parsed command-line args: {:?}", args);

    let cfg = args.sampler_config()?;
    let data_root = Path::new(&args.data_root);
    let out_dir = Path::new(&args.output_dir);

    // 1) Check the dataset layout
    info!("Resolving partitions under data_root={:?}", data_root);
    let partitions = resolve(data_root)
        .with_context(|| format!("resolving dataset root {:?}", data_root))?;

    // 2) Pair images in every requested partition
    let jobs = partition_jobs(&partitions, &args.partitions)?;

    fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create output directory {:?}", out_dir))?;

    // Progress bar, one tick per written patch
    let total: u64 = jobs
        .iter()
        .map(|(_, _, pairs)| (pairs.len() * cfg.samples_per_image) as u64)
        .sum();
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")?
            .progress_chars("##-"),
    );

    // 3) Sample partitions in parallel, each with its own seed and output folder
    let results: Vec<_> = jobs
        .par_iter()
        .map(|(ordinal, name, pairs)| {
            let mut part_cfg = cfg.clone();
            part_cfg.seed = cfg.seed.map(|s| s.wrapping_add(*ordinal));
            let dir = out_dir.join(name);
            sample_and_write(name, pairs, part_cfg, &dir, &args, &pb)
                .map(|stats| (name.clone(), stats))
        })
        .collect();

    // 4) Summarize
    let mut failed = 0;
    for r in results {
        match r {
            Ok((name, stats)) => {
                info!(
                    "partition={} => {} patches, {} candidates, {} image visits, {} passes",
                    name, stats.accepted, stats.candidates, stats.images_opened, stats.passes
                );
            }
            Err(e) => {
                error!("Partition error: {:?}", e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        pb.abandon_with_message("Failed.");
        bail!("{} partition(s) failed", failed);
    }
    pb.finish_with_message("All done.");
    info!("=== Done. Check your output_dir for files. ===");

    Ok(())
}

/// One `(seed offset, name, pairs)` job per requested partition. Names must be
/// distinct since each job owns its output folder.
fn partition_jobs(
    partitions: &DatasetPartitions,
    names: &[String],
) -> Result<Vec<(u64, String, ImagePairSet)>> {
    let mut jobs: Vec<(u64, String, ImagePairSet)> = Vec::new();
    for (ordinal, name) in names.iter().enumerate() {
        if jobs.iter().any(|(_, seen, _)| seen == name) {
            bail!("partition {:?} requested more than once", name);
        }
        let Some(root) = partitions.get(name) else {
            bail!("unknown partition {:?}, expected train, valid or test", name);
        };
        let pairs = enumerate_pairs(root)
            .with_context(|| format!("enumerating image pairs in {:?}", root))?;
        jobs.push((ordinal as u64, name.clone(), pairs));
    }
    Ok(jobs)
}

/// Sample one partition to completion and write its corpus and statistics.
fn sample_and_write(
    name: &str,
    pairs: &ImagePairSet,
    cfg: SamplerConfig,
    dir: &Path,
    args: &Args,
    pb: &ProgressBar,
) -> Result<SamplingStats> {
    let seed = cfg.seed;
    let mut sampler = PatchSampler::new(pairs, cfg, None)
        .with_context(|| format!("starting sampler for partition={}", name))?;

    // Step one image at a time, ticking the progress bar
    let mut reported = 0;
    loop {
        let state = sampler
            .step()
            .with_context(|| format!("sampling partition={}", name))?;
        let written = sampler.written();
        pb.inc((written - reported) as u64);
        reported = written;
        if state == SamplerState::Done {
            break;
        }
    }

    let Some(mut outcome) = sampler.into_outcome() else {
        bail!("partition={} stopped before its corpus was full", name);
    };

    // Optional global shuffle
    if args.shuffle_output {
        let mut rng = match seed {
            Some(s) => StdRng::seed_from_u64(s ^ SHUFFLE_SALT),
            None => StdRng::from_entropy(),
        };
        outcome.corpus.shuffle_rows(&mut rng);
        info!("partition={} => shuffled all patches", name);
    }

    // Save .npy chunks and stats
    outcome
        .corpus
        .write_npy_chunks(dir, args.chunk_size)
        .with_context(|| format!("writing corpus for partition={}", name))?;

    let stats_path = dir.join("stats.json");
    let json = serde_json::to_vec_pretty(&outcome.stats)?;
    if let Err(e) = fs::write(&stats_path, json) {
        warn!("Failed to write file {:?}: {:?}", stats_path, e);
    }

    Ok(outcome.stats)
}
