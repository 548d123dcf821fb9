//! Stripe arena and geometry
//!
//! A stripe is one read-in worth of data spread over k+m units. Each unit is
//! cut into `planes` blocks of `block_size` bytes, and the arena stores them
//! plane-major so a whole plane (one codeword) is a contiguous slice.

pub mod recovery;

pub use recovery::{recover, Recovery, RecoveryPlan};

use std::slice::ChunksExactMut;

use crate::config::CodecConfig;
use crate::error::{Error, Result};

/// Sizes that turn a file into a sequence of stripes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StripeGeometry {
    /// True size of the input in bytes
    pub original_size: u64,

    /// Number of data units
    pub k: usize,

    /// Number of coding units
    pub m: usize,

    /// Planes per stripe
    pub planes: usize,

    /// Byte granularity of a block
    pub alignment: usize,

    /// Input bytes consumed per read-in
    pub buffer_size: usize,

    /// Bytes of one unit in one plane
    pub block_size: usize,

    /// Number of read-ins
    pub readins: usize,
}

impl StripeGeometry {
    /// Derive buffer and block sizes for a file of `original_size` bytes
    ///
    /// The buffer is a whole number of stripe granules (k · planes ·
    /// alignment). A configured buffer size of 0, or one that covers the
    /// whole padded file, gives a single read-in; any other value is rounded
    /// to the nearest granule multiple, ties upward, never to zero.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the configuration is invalid or the size
    /// does not fit in memory.
    pub fn plan(config: &CodecConfig, original_size: u64) -> Result<Self> {
        config.validate()?;
        let size = usize::try_from(original_size).map_err(|_| {
            Error::InvalidConfig(format!("file of {} bytes is too large", original_size))
        })?;

        let (k, planes) = (config.k, config.planes());
        let alignment = config.block_alignment();
        let granule = k * planes * alignment;

        let mut geometry = StripeGeometry {
            original_size,
            k,
            m: config.m,
            planes,
            alignment,
            buffer_size: 0,
            block_size: 0,
            readins: 0,
        };
        if size == 0 {
            return Ok(geometry);
        }

        let padded = size.div_ceil(granule) * granule;
        let buffer_size = if config.buffer_size == 0 || config.buffer_size >= padded {
            padded
        } else {
            let mut multiples = config.buffer_size / granule;
            if 2 * (config.buffer_size % granule) >= granule {
                multiples += 1;
            }
            (multiples.max(1) * granule).min(padded)
        };

        geometry.buffer_size = buffer_size;
        geometry.block_size = buffer_size / (k * planes);
        geometry.readins = size.div_ceil(buffer_size);
        Ok(geometry)
    }

    /// Stripe granule: the smallest valid buffer size
    pub fn granule(&self) -> usize {
        self.k * self.planes * self.alignment
    }

    pub fn units(&self) -> usize {
        self.k + self.m
    }

    /// Bytes of one unit in one read-in
    pub fn unit_len(&self) -> usize {
        self.planes * self.block_size
    }

    /// Bytes of one unit over the whole file
    pub fn unit_file_len(&self) -> u64 {
        (self.readins * self.unit_len()) as u64
    }

    /// Real input bytes in read-in `n` (0-based); only the last is short
    pub fn readin_len(&self, n: usize) -> usize {
        assert!(n < self.readins, "read-in {} out of {}", n, self.readins);
        let consumed = (n * self.buffer_size) as u64;
        (self.original_size - consumed).min(self.buffer_size as u64) as usize
    }
}

/// Sorted, de-duplicated set of missing unit indices
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErasureSet(Vec<usize>);

impl ErasureSet {
    /// Build a set over `total` units
    ///
    /// # Errors
    /// Returns `InvalidErasure` for an index outside 0..total.
    pub fn new(units: impl IntoIterator<Item = usize>, total: usize) -> Result<Self> {
        let mut units: Vec<usize> = units.into_iter().collect();
        if let Some(&bad) = units.iter().find(|&&u| u >= total) {
            return Err(Error::InvalidErasure(format!(
                "unit {} out of range 0..{}",
                bad, total
            )));
        }
        units.sort_unstable();
        units.dedup();
        Ok(ErasureSet(units))
    }

    /// No erasures
    pub fn none() -> Self {
        Self::default()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, unit: usize) -> bool {
        self.0.binary_search(&unit).is_ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().copied()
    }
}

/// Plane-major arena of one stripe, addressed by (plane, unit)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stripe {
    planes: usize,
    units: usize,
    block_size: usize,
    arena: Vec<u8>,
}

impl Stripe {
    /// Zero-filled stripe
    pub fn new(planes: usize, units: usize, block_size: usize) -> Self {
        Self {
            planes,
            units,
            block_size,
            arena: vec![0; planes * units * block_size],
        }
    }

    /// Load a read-in buffer into the data blocks
    ///
    /// The buffer is plane-major: data block i of plane z starts at
    /// `(z·k + i)·block_size`. A short buffer is padded with zero bytes.
    ///
    /// # Errors
    /// Returns `BufferSize` if the buffer is larger than the stripe's data.
    pub fn from_data_buffer(
        buffer: &[u8],
        k: usize,
        units: usize,
        planes: usize,
        block_size: usize,
    ) -> Result<Self> {
        let data_len = planes * k * block_size;
        if buffer.len() > data_len {
            return Err(Error::BufferSize {
                expected: data_len,
                got: buffer.len(),
            });
        }

        let mut stripe = Self::new(planes, units, block_size);
        let row = k * block_size;
        for (z, chunk) in buffer.chunks(row).enumerate() {
            stripe.plane_mut(z)[..chunk.len()].copy_from_slice(chunk);
        }
        Ok(stripe)
    }

    /// Load block-major unit contents; missing units are zero-filled
    ///
    /// # Errors
    /// Returns `UnitSize` when a present unit is not `planes·block_size` long.
    pub fn from_units(units: &[Option<&[u8]>], planes: usize, block_size: usize) -> Result<Self> {
        let mut stripe = Self::new(planes, units.len(), block_size);
        let expected = planes * block_size;
        for (u, unit) in units.iter().enumerate() {
            let Some(unit) = unit else { continue };
            if unit.len() != expected {
                return Err(Error::UnitSize {
                    unit: u,
                    expected,
                    got: unit.len(),
                });
            }
            for (z, block) in unit.chunks_exact(block_size.max(1)).enumerate() {
                stripe.block_mut(z, u).copy_from_slice(block);
            }
        }
        Ok(stripe)
    }

    pub fn planes(&self) -> usize {
        self.planes
    }

    pub fn units(&self) -> usize {
        self.units
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Bytes in one plane
    pub fn plane_len(&self) -> usize {
        self.units * self.block_size
    }

    fn offset(&self, plane: usize, unit: usize) -> usize {
        assert!(
            plane < self.planes && unit < self.units,
            "block ({}, {}) out of range",
            plane,
            unit
        );
        (plane * self.units + unit) * self.block_size
    }

    pub fn block(&self, plane: usize, unit: usize) -> &[u8] {
        let start = self.offset(plane, unit);
        &self.arena[start..start + self.block_size]
    }

    pub fn block_mut(&mut self, plane: usize, unit: usize) -> &mut [u8] {
        let start = self.offset(plane, unit);
        &mut self.arena[start..start + self.block_size]
    }

    pub fn plane(&self, plane: usize) -> &[u8] {
        let start = self.offset(plane, 0);
        &self.arena[start..start + self.plane_len()]
    }

    pub fn plane_mut(&mut self, plane: usize) -> &mut [u8] {
        let start = self.offset(plane, 0);
        let len = self.plane_len();
        &mut self.arena[start..start + len]
    }

    /// Iterate over every plane mutably
    pub fn planes_mut(&mut self) -> ChunksExactMut<'_, u8> {
        let len = self.plane_len().max(1);
        self.arena.chunks_exact_mut(len)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.arena
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.arena
    }

    /// Block-major contents of one unit
    pub fn unit(&self, unit: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.planes * self.block_size);
        for z in 0..self.planes {
            out.extend_from_slice(self.block(z, unit));
        }
        out
    }

    /// Block-major contents of every unit
    pub fn into_units(self) -> Vec<Vec<u8>> {
        (0..self.units).map(|u| self.unit(u)).collect()
    }

    /// The data blocks in read-in buffer order
    pub fn data_buffer(&self, k: usize) -> Vec<u8> {
        let row = k * self.block_size;
        let mut out = Vec::with_capacity(self.planes * row);
        for z in 0..self.planes {
            out.extend_from_slice(&self.plane(z)[..row]);
        }
        out
    }
}
