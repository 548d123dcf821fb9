//! Metadata written next to the units
//!
//! Everything the decoder needs to rebuild the encoding session, plus a
//! blake3 hash of the input so a decode can be verified end to end.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::{CodecConfig, CouplingConfig, Technique};
use crate::error::{Error, Result};
use crate::galois::Strategy;
use crate::stripe::StripeGeometry;

/// Contents of `<stem>_meta.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodingMetadata {
    /// Input file name as given to the encoder
    pub file_name: String,

    /// True input size in bytes
    pub original_size: u64,

    pub k: usize,
    pub m: usize,
    pub w: u32,
    pub technique: Technique,
    pub packet_size: usize,

    /// Bytes per read-in actually used (a whole number of stripe granules)
    pub buffer_size: usize,

    pub readins: usize,
    pub planes: usize,
    pub block_size: usize,
    pub coupling: CouplingConfig,

    #[serde(default)]
    pub strategy: Strategy,

    /// blake3 hex digest of the input; absent for random input
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blake3: Option<String>,
}

impl CodingMetadata {
    /// Describe an encode of `file_name` with the given session parameters
    pub fn new(
        file_name: impl Into<String>,
        config: &CodecConfig,
        geometry: &StripeGeometry,
        blake3: Option<String>,
    ) -> Self {
        CodingMetadata {
            file_name: file_name.into(),
            original_size: geometry.original_size,
            k: config.k,
            m: config.m,
            w: config.w,
            technique: config.technique,
            packet_size: config.packet_size,
            buffer_size: geometry.buffer_size,
            readins: geometry.readins,
            planes: geometry.planes,
            block_size: geometry.block_size,
            coupling: config.coupling,
            strategy: config.strategy,
            blake3,
        }
    }

    /// Configuration that reproduces the encoding geometry
    pub fn config(&self) -> CodecConfig {
        CodecConfig {
            k: self.k,
            m: self.m,
            w: self.w,
            technique: self.technique,
            packet_size: self.packet_size,
            buffer_size: self.buffer_size,
            planes: Some(self.planes),
            coupling: self.coupling,
            strategy: self.strategy,
            threads: None,
        }
    }

    /// Bytes every unit file should hold
    pub fn unit_len(&self) -> u64 {
        (self.readins * self.planes * self.block_size) as u64
    }

    /// Load metadata from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read metadata {}: {}", path.display(), e))
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Write metadata as pretty JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Check a decoded file's digest against the recorded one
    ///
    /// # Errors
    /// Returns `IntegrityMismatch` if a digest was recorded and differs.
    pub fn verify(&self, digest: &blake3::Hash) -> Result<()> {
        let got = digest_hex(digest);
        match &self.blake3 {
            Some(expected) if *expected != got => Err(Error::IntegrityMismatch {
                expected: expected.clone(),
                got,
            }),
            _ => Ok(()),
        }
    }
}

/// Lowercase hex form of a digest, as stored in the metadata
pub fn digest_hex(digest: &blake3::Hash) -> String {
    hex::encode(digest.as_bytes())
}
