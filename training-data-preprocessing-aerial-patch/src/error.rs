//! Error taxonomy for dataset loading and patch sampling.

use std::path::PathBuf;
use thiserror::Error;

pub type SamplingResult<T> = Result<T, SamplingError>;

#[derive(Debug, Error)]
pub enum SamplingError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("dataset root {root} must contain exactly train, valid and test, found {found:?}")]
    Structure { root: PathBuf, found: Vec<String> },
    #[error("data or labels folder under {path} does not contain any images")]
    EmptyData { path: PathBuf },
    #[error("{data} data images but {labels} label images under {path}")]
    CountMismatch {
        path: PathBuf,
        data: usize,
        labels: usize,
    },
    #[error("tile {data} does not match label {label} at index {index}")]
    PairMismatch {
        index: usize,
        data: String,
        label: String,
    },
    #[error("image decode error at {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("data image {data:?} and label image {label:?} differ in size for {path}")]
    DimensionMismatch {
        path: PathBuf,
        data: (u32, u32),
        label: (u32, u32),
    },
    #[error("image {path} is {width}x{height}, smaller than patch side {dim}")]
    ImageTooSmall {
        path: PathBuf,
        width: u32,
        height: u32,
        dim: u32,
    },
    #[error("window at ({x}, {y}) with side {dim} exceeds {width}x{height} image")]
    WindowOutOfBounds {
        x: u32,
        y: u32,
        dim: u32,
        width: u32,
        height: u32,
    },
    #[error("invalid sampler config: {0}")]
    InvalidConfig(String),
    #[error("curriculum scorer failed: {0}")]
    Scorer(String),
    #[error("sampling starved after {attempts} candidates: {written}/{target} patches admitted")]
    Starvation {
        attempts: u64,
        written: usize,
        target: usize,
    },
    #[error("sampling aborted with {written} patches written")]
    Aborted { written: usize },
    #[error("npy write error at {path}: {source}")]
    Npy {
        path: PathBuf,
        #[source]
        source: ndarray_npy::WriteNpyError,
    },
}
