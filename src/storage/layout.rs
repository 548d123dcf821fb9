//! On-disk names of unit, metadata and decoded files
//!
//! For an input `dir/photo.tar.gz` with k = 10 the units live in
//! `dir/Coding/photo_k00.tar.gz` .. `photo_k09.tar.gz` and
//! `photo_m00.tar.gz` .., next to `photo_meta.json`.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{Error, Result};
use crate::stripe::ErasureSet;

/// Name of the directory that holds the units
pub const CODING_DIR: &str = "Coding";

/// Split a file name at its first '.' into stem and extension
pub fn split_name(file_name: &str) -> (&str, &str) {
    match file_name.find('.') {
        Some(i) => file_name.split_at(i),
        None => (file_name, ""),
    }
}

/// Coding directory and file name for `input`
fn locate(input: &Path) -> Result<(PathBuf, &str)> {
    let parent = input.parent().unwrap_or_else(|| Path::new(""));
    let file_name = input
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| Error::InvalidConfig(format!("{} has no usable file name", input.display())))?;
    Ok((parent.join(CODING_DIR), file_name))
}

fn metadata_name(stem: &str) -> String {
    format!("{}_meta.json", stem)
}

/// Metadata path for `input`, usable before k and m are known
///
/// # Errors
/// Returns `InvalidConfig` if `input` has no usable file name.
pub fn metadata_path_for(input: &Path) -> Result<PathBuf> {
    let (dir, file_name) = locate(input)?;
    Ok(dir.join(metadata_name(split_name(file_name).0)))
}

/// File naming for one coded file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodingLayout {
    dir: PathBuf,
    stem: String,
    extension: String,
    k: usize,
    m: usize,
    digits: usize,
}

impl CodingLayout {
    /// Layout for `input`, with units in the `Coding` directory beside it
    ///
    /// # Errors
    /// Returns `InvalidConfig` if `input` has no usable file name.
    pub fn for_input(input: &Path, k: usize, m: usize) -> Result<Self> {
        let (dir, file_name) = locate(input)?;
        Ok(Self::new(dir, file_name, k, m))
    }

    /// Layout rooted at an explicit coding directory
    pub fn new(dir: impl Into<PathBuf>, file_name: &str, k: usize, m: usize) -> Self {
        let (stem, extension) = split_name(file_name);
        Self {
            dir: dir.into(),
            stem: stem.to_string(),
            extension: extension.to_string(),
            k,
            m,
            digits: k.to_string().len(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn stem(&self) -> &str {
        &self.stem
    }

    pub fn units(&self) -> usize {
        self.k + self.m
    }

    /// Path of unit `unit`: data units first, then coding units
    pub fn unit_path(&self, unit: usize) -> PathBuf {
        assert!(unit < self.units(), "unit {} out of range", unit);
        let (tag, index) = if unit < self.k {
            ('k', unit)
        } else {
            ('m', unit - self.k)
        };
        self.dir.join(format!(
            "{}_{}{:0width$}{}",
            self.stem,
            tag,
            index,
            self.extension,
            width = self.digits
        ))
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join(metadata_name(&self.stem))
    }

    pub fn decoded_path(&self) -> PathBuf {
        self.dir
            .join(format!("{}_decoded{}", self.stem, self.extension))
    }

    /// Create the coding directory if needed
    pub fn create_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    /// Units that are missing or do not have `expected_len` bytes
    ///
    /// # Errors
    /// Returns `Io` for failures other than a missing file.
    pub fn scan_erasures(&self, expected_len: u64) -> Result<ErasureSet> {
        let mut missing = Vec::new();
        for unit in 0..self.units() {
            let path = self.unit_path(unit);
            match fs::metadata(&path) {
                Ok(meta) if meta.len() == expected_len => {}
                Ok(meta) => {
                    warn!(
                        "{} has {} bytes, expected {}; treating it as erased",
                        path.display(),
                        meta.len(),
                        expected_len
                    );
                    missing.push(unit);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!("{} is missing", path.display());
                    missing.push(unit);
                }
                Err(e) => return Err(e.into()),
            }
        }
        ErasureSet::new(missing, self.units())
    }
}
