//! Preallocated output arrays and their hand-off to disk.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use ndarray::{s, Array2, ArrayView1, ArrayView2, Axis};
use ndarray_npy::write_npy;
use rand::seq::SliceRandom;
use rand::Rng;
use rayon::prelude::*;

use crate::error::{SamplingError, SamplingResult};

/// Fixed-capacity patch storage. Row `i` of `data` and `labels` always
/// describe the same patch.
#[derive(Debug, Clone)]
pub struct PatchCorpus {
    data: Array2<f32>,
    labels: Array2<u8>,
    len: usize,
}

impl PatchCorpus {
    pub fn new(capacity: usize, data_width: usize, label_width: usize) -> Self {
        Self {
            data: Array2::zeros((capacity, data_width)),
            labels: Array2::zeros((capacity, label_width)),
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn remaining(&self) -> usize {
        self.capacity() - self.len
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Write a row at the next free index. Returns the index, or `None` when
    /// the corpus is full.
    ///
    /// # Panics
    /// Panics if the slices do not match the row widths.
    pub fn push(&mut self, data: &[f32], label: &[u8]) -> Option<usize> {
        if self.is_full() {
            return None;
        }
        let row = self.len;
        self.data.row_mut(row).assign(&ArrayView1::from(data));
        self.labels.row_mut(row).assign(&ArrayView1::from(label));
        self.len += 1;
        Some(row)
    }

    pub fn data(&self) -> ArrayView2<'_, f32> {
        self.data.slice(s![..self.len, ..])
    }

    pub fn labels(&self) -> ArrayView2<'_, u8> {
        self.labels.slice(s![..self.len, ..])
    }

    pub fn into_arrays(self) -> (Array2<f32>, Array2<u8>) {
        (self.data, self.labels)
    }

    /// Apply one random permutation to the filled rows of both arrays.
    pub fn shuffle_rows<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let mut perm: Vec<usize> = (0..self.len).collect();
        perm.shuffle(rng);
        let data = permute_rows(&self.data.slice(s![..self.len, ..]), &perm);
        let labels = permute_rows(&self.labels.slice(s![..self.len, ..]), &perm);
        self.data.slice_mut(s![..self.len, ..]).assign(&data);
        self.labels.slice_mut(s![..self.len, ..]).assign(&labels);
        debug!("shuffled {} corpus rows", self.len);
    }

    /// Write the filled rows as `data_F{n}.npy` / `labels_F{n}.npy` chunks of
    /// `chunk_size` rows, or as a single `data.npy` / `labels.npy` pair when
    /// `chunk_size` is 0. The last chunk may be shorter.
    pub fn write_npy_chunks(&self, dir: &Path, chunk_size: usize) -> SamplingResult<Vec<PathBuf>> {
        fs::create_dir_all(dir).map_err(|source| SamplingError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let ranges: Vec<(usize, usize, String)> = if chunk_size == 0 {
            vec![(0, self.len, String::new())]
        } else {
            (0..self.len.div_ceil(chunk_size))
                .map(|chunk_idx| {
                    let offset = chunk_idx * chunk_size;
                    let end = (offset + chunk_size).min(self.len);
                    (offset, end, format!("_F{}", chunk_idx + 1))
                })
                .collect()
        };

        let written: Vec<SamplingResult<Vec<PathBuf>>> = ranges
            .par_iter()
            .map(|(offset, end, suffix)| -> SamplingResult<Vec<PathBuf>> {
                let data_path = dir.join(format!("data{}.npy", suffix));
                let label_path = dir.join(format!("labels{}.npy", suffix));
                write_npy(&data_path, &self.data.slice(s![*offset..*end, ..])).map_err(
                    |source| SamplingError::Npy {
                        path: data_path.clone(),
                        source,
                    },
                )?;
                write_npy(&label_path, &self.labels.slice(s![*offset..*end, ..])).map_err(
                    |source| SamplingError::Npy {
                        path: label_path.clone(),
                        source,
                    },
                )?;
                debug!("wrote rows [{}, {}) => {:?}", offset, end, data_path);
                Ok(vec![data_path, label_path])
            })
            .collect();

        let mut paths = Vec::with_capacity(ranges.len() * 2);
        for chunk in written {
            paths.extend(chunk?);
        }
        info!("wrote {} patches into {} files under {:?}", self.len, paths.len(), dir);
        Ok(paths)
    }
}

/// Copy rows into a new array following `perm`.
fn permute_rows<T>(arr: &ArrayView2<'_, T>, perm: &[usize]) -> Array2<T>
where
    T: Copy + Default + Send + Sync,
{
    let (n, width) = arr.dim();
    let mut out = Array2::<T>::default((n, width));
    if width == 0 {
        return out;
    }
    match (arr.as_slice(), out.as_slice_mut()) {
        (Some(src), Some(dst)) => {
            dst.par_chunks_mut(width)
                .enumerate()
                .for_each(|(i, chunk)| {
                    let start = perm[i] * width;
                    chunk.copy_from_slice(&src[start..start + width]);
                });
        }
        _ => {
            for (i, &p) in perm.iter().enumerate() {
                out.row_mut(i).assign(&arr.row(p));
            }
        }
    }
    out
}
