//! Dataset layout resolution and lazy loading of data/label image pairs.

use std::fs;
use std::path::{Path, PathBuf};

use image::{GrayImage, RgbaImage};
use log::{debug, info};

use crate::error::{SamplingError, SamplingResult};

const PARTITIONS: [&str; 3] = ["test", "train", "valid"];
const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "png", "tiff", "tif"];

/// The three partition roots of a dataset.
#[derive(Debug, Clone)]
pub struct DatasetPartitions {
    pub train: PathBuf,
    pub valid: PathBuf,
    pub test: PathBuf,
}

impl DatasetPartitions {
    pub fn get(&self, name: &str) -> Option<&Path> {
        match name {
            "train" => Some(&self.train),
            "valid" => Some(&self.valid),
            "test" => Some(&self.test),
            _ => None,
        }
    }
}

/// Matched `(data, label)` file names of one partition, paired by position.
#[derive(Debug, Clone)]
pub struct ImagePairSet {
    root: PathBuf,
    pairs: Vec<(String, String)>,
}

/// A decoded pair. Data is always held as RGBA; `has_alpha` says whether the
/// source carried a real alpha channel.
#[derive(Debug, Clone)]
pub struct OpenedPair {
    pub data: RgbaImage,
    pub label: GrayImage,
    pub has_alpha: bool,
    pub path: PathBuf,
}

impl OpenedPair {
    pub fn dimensions(&self) -> (u32, u32) {
        self.data.dimensions()
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> SamplingError + '_ {
    move |source| SamplingError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Resolve a dataset root into its `train`, `valid` and `test` partitions.
/// Hidden entries are ignored; anything else besides the three names fails.
pub fn resolve(dataset_root: &Path) -> SamplingResult<DatasetPartitions> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dataset_root).map_err(io_err(dataset_root))? {
        let entry = entry.map_err(io_err(dataset_root))?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            debug!("Skipping hidden entry={:?}", entry.path());
            continue;
        }
        found.push(name);
    }
    found.sort();

    if found != PARTITIONS {
        return Err(SamplingError::Structure {
            root: dataset_root.to_path_buf(),
            found,
        });
    }

    Ok(DatasetPartitions {
        train: dataset_root.join("train"),
        valid: dataset_root.join("valid"),
        test: dataset_root.join("test"),
    })
}

fn has_image_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

fn list_image_files(dir: &Path) -> SamplingResult<Vec<String>> {
    info!("Retrieving images under {:?}", dir);
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err(dir))? {
        let entry = entry.map_err(io_err(dir))?;
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.starts_with('.') && has_image_extension(&name) {
            files.push(name);
        } else {
            debug!("Skipping non-image file={:?}", entry.path());
        }
    }
    files.sort();
    Ok(files)
}

fn stem(name: &str) -> &str {
    Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name)
}

/// List and pair the images under `partition_root/data` and
/// `partition_root/labels`.
pub fn enumerate_pairs(partition_root: &Path) -> SamplingResult<ImagePairSet> {
    let tiles = list_image_files(&partition_root.join("data"))?;
    let labels = list_image_files(&partition_root.join("labels"))?;

    if tiles.is_empty() || labels.is_empty() {
        return Err(SamplingError::EmptyData {
            path: partition_root.to_path_buf(),
        });
    }
    if tiles.len() != labels.len() {
        return Err(SamplingError::CountMismatch {
            path: partition_root.to_path_buf(),
            data: tiles.len(),
            labels: labels.len(),
        });
    }
    for (index, (tile, label)) in tiles.iter().zip(labels.iter()).enumerate() {
        if stem(tile) != stem(label) {
            return Err(SamplingError::PairMismatch {
                index,
                data: tile.clone(),
                label: label.clone(),
            });
        }
    }

    info!(
        "partition={:?} => {} matched image pairs",
        partition_root,
        tiles.len()
    );
    Ok(ImagePairSet {
        root: partition_root.to_path_buf(),
        pairs: tiles.into_iter().zip(labels).collect(),
    })
}

impl ImagePairSet {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Always false for a set built by [`enumerate_pairs`].
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn names(&self, index: usize) -> Option<(&str, &str)> {
        self.pairs
            .get(index)
            .map(|(d, l)| (d.as_str(), l.as_str()))
    }

    /// Decode pair `index`.
    ///
    /// # Panics
    /// Panics if `index` is out of range.
    pub fn open(&self, index: usize) -> SamplingResult<OpenedPair> {
        let (data_name, label_name) = &self.pairs[index];
        let data_path = self.root.join("data").join(data_name);
        let label_path = self.root.join("labels").join(label_name);

        let data = image::open(&data_path).map_err(|source| SamplingError::Decode {
            path: data_path.clone(),
            source,
        })?;
        let label = image::open(&label_path).map_err(|source| SamplingError::Decode {
            path: label_path.clone(),
            source,
        })?;

        let has_alpha = data.color().has_alpha();
        let data = data.to_rgba8();
        let label = label.to_luma8();

        if data.dimensions() != label.dimensions() {
            return Err(SamplingError::DimensionMismatch {
                path: data_path,
                data: data.dimensions(),
                label: label.dimensions(),
            });
        }

        Ok(OpenedPair {
            data,
            label,
            has_alpha,
            path: data_path,
        })
    }
}
