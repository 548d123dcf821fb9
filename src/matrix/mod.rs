//! Coding matrices, bit-matrices and encode schedules
//!
//! Every technique is reduced to one of three encoders:
//! - a coding matrix over GF(2^w), applied with region multiplies
//! - the RAID-6 matrix, applied with XOR and multiply-by-two only
//! - a bitmatrix compiled into an XOR [`Schedule`]
//!
//! A [`CodingScheme`] is built once per session and is read-only afterwards.

pub mod bitmatrix;
pub mod cauchy;
pub mod liberation;
pub mod reed_sol;
pub mod schedule;

pub use bitmatrix::{matrix_to_bitmatrix, BitMatrix};
pub use schedule::{Operation, Packet, Schedule};

use std::sync::Arc;
use tracing::debug;

use crate::config::{CodecConfig, Technique};
use crate::error::Result;
use crate::galois::{Field, FieldRegistry, Strategy};

/// Row-major matrix of field elements
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodingMatrix {
    rows: usize,
    cols: usize,
    elements: Vec<u32>,
}

impl CodingMatrix {
    /// All-zero matrix
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            elements: vec![0; rows * cols],
        }
    }

    /// Wrap row-major elements
    pub fn from_vec(rows: usize, cols: usize, elements: Vec<u32>) -> Self {
        assert_eq!(elements.len(), rows * cols, "element count does not match shape");
        Self {
            rows,
            cols,
            elements,
        }
    }

    /// Identity matrix of size `n`
    pub fn identity(n: usize) -> Self {
        let mut matrix = Self::new(n, n);
        for i in 0..n {
            matrix.set(i, i, 1);
        }
        matrix
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, row: usize, col: usize) -> u32 {
        assert!(row < self.rows && col < self.cols, "element ({}, {}) out of range", row, col);
        self.elements[row * self.cols + col]
    }

    pub fn set(&mut self, row: usize, col: usize, value: u32) {
        assert!(row < self.rows && col < self.cols, "element ({}, {}) out of range", row, col);
        self.elements[row * self.cols + col] = value;
    }

    pub fn row(&self, row: usize) -> &[u32] {
        &self.elements[row * self.cols..(row + 1) * self.cols]
    }

    /// Matrix built from selected rows, in the given order
    pub fn select_rows(&self, rows: &[usize]) -> CodingMatrix {
        let mut elements = Vec::with_capacity(rows.len() * self.cols);
        for &r in rows {
            elements.extend_from_slice(self.row(r));
        }
        CodingMatrix::from_vec(rows.len(), self.cols, elements)
    }

    pub(crate) fn swap_rows(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        for c in 0..self.cols {
            self.elements.swap(a * self.cols + c, b * self.cols + c);
        }
    }
}

/// How a scheme computes coding blocks
#[derive(Debug)]
pub enum Encoder {
    /// No coding units
    None,
    /// General matrix over GF(2^w)
    Matrix(CodingMatrix),
    /// RAID-6 matrix with the XOR/Horner fast path
    Raid6(CodingMatrix),
    /// Bitmatrix and its compiled encode schedule
    Bitmatrix {
        bitmatrix: BitMatrix,
        schedule: Schedule,
    },
}

/// The coding side of a session: matrix or bitmatrix plus encode logic
#[derive(Debug)]
pub struct CodingScheme {
    k: usize,
    m: usize,
    w: u32,
    packet_size: usize,
    technique: Technique,
    field: Arc<Field>,
    encoder: Encoder,
}

impl CodingScheme {
    /// Build the scheme for a validated configuration
    ///
    /// # Errors
    /// Returns `InvalidConfig` when the configuration is invalid and
    /// `FieldInit` when the field cannot be built.
    pub fn build(config: &CodecConfig, registry: &FieldRegistry) -> Result<Self> {
        config.validate()?;
        let (k, m, w) = (config.k, config.m, config.w);
        let field = match config.strategy {
            Strategy::Default => registry.field(w)?,
            strategy => registry.field_with(w, strategy)?,
        };
        let wu = w as usize;

        let encoder = match config.technique {
            Technique::NoCoding => Encoder::None,
            Technique::ReedSolVan => {
                Encoder::Matrix(reed_sol::vandermonde_coding_matrix(&field, k, m)?)
            }
            Technique::ReedSolR6Op => Encoder::Raid6(reed_sol::r6_coding_matrix(&field, k)),
            Technique::CauchyOrig => {
                let matrix = cauchy::original_coding_matrix(&field, k, m)?;
                bitmatrix_encoder(matrix_to_bitmatrix(&field, &matrix), k, m, wu)
            }
            Technique::CauchyGood => {
                let matrix = cauchy::good_coding_matrix(&field, k, m)?;
                bitmatrix_encoder(matrix_to_bitmatrix(&field, &matrix), k, m, wu)
            }
            Technique::Liberation => {
                bitmatrix_encoder(liberation::liberation_bitmatrix(k, wu), k, m, wu)
            }
            Technique::BlaumRoth => {
                bitmatrix_encoder(liberation::blaum_roth_bitmatrix(k, wu), k, m, wu)
            }
            Technique::Liber8tion => {
                bitmatrix_encoder(liberation::liber8tion_bitmatrix(k), k, m, wu)
            }
        };

        if let Encoder::Bitmatrix { bitmatrix, schedule } = &encoder {
            debug!(
                "{} bitmatrix has {} ones, schedule uses {} XORs",
                config.technique,
                bitmatrix.ones(),
                schedule.xor_count()
            );
        }

        Ok(Self {
            k,
            m,
            w,
            packet_size: config.packet_size,
            technique: config.technique,
            field,
            encoder,
        })
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn m(&self) -> usize {
        self.m
    }

    pub fn w(&self) -> u32 {
        self.w
    }

    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    pub fn technique(&self) -> Technique {
        self.technique
    }

    pub fn field(&self) -> &Arc<Field> {
        &self.field
    }

    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    /// Coding matrix, for matrix-based techniques
    pub fn matrix(&self) -> Option<&CodingMatrix> {
        match &self.encoder {
            Encoder::Matrix(matrix) | Encoder::Raid6(matrix) => Some(matrix),
            _ => None,
        }
    }

    /// Coding bitmatrix, for bitmatrix-based techniques
    pub fn bitmatrix(&self) -> Option<&BitMatrix> {
        match &self.encoder {
            Encoder::Bitmatrix { bitmatrix, .. } => Some(bitmatrix),
            _ => None,
        }
    }

    /// Compute the m coding blocks of one plane from its k data blocks
    ///
    /// `plane` holds k + m consecutive blocks of `block_size` bytes.
    pub fn encode_plane(&self, plane: &mut [u8], block_size: usize) {
        assert_eq!(
            plane.len(),
            (self.k + self.m) * block_size,
            "plane does not hold k + m blocks"
        );
        if let Encoder::Bitmatrix { schedule, .. } = &self.encoder {
            schedule.apply(plane, block_size, self.packet_size);
            return;
        }

        let (data, coding) = plane.split_at_mut(self.k * block_size);
        match &self.encoder {
            Encoder::Matrix(matrix) => {
                for (i, dst) in coding.chunks_exact_mut(block_size).enumerate() {
                    let sources = data.chunks_exact(block_size);
                    dot_product(&self.field, matrix.row(i), sources, dst);
                }
            }
            Encoder::Raid6(_) => reed_sol::r6_encode(&self.field, data, coding, block_size),
            Encoder::None | Encoder::Bitmatrix { .. } => {}
        }
    }
}

fn bitmatrix_encoder(bitmatrix: BitMatrix, k: usize, m: usize, w: usize) -> Encoder {
    let sources: Vec<usize> = (0..k).collect();
    let targets: Vec<usize> = (k..k + m).collect();
    let schedule = Schedule::compile(&bitmatrix, &sources, &targets, w);
    Encoder::Bitmatrix { bitmatrix, schedule }
}

/// `dst = Σ coefficients[j] · sources[j]`
pub(crate) fn dot_product<'a>(
    field: &Field,
    coefficients: &[u32],
    sources: impl Iterator<Item = &'a [u8]>,
    dst: &mut [u8],
) {
    let mut written = false;
    for (&coefficient, src) in coefficients.iter().zip(sources) {
        if coefficient == 0 {
            continue;
        }
        field.region_multiply(src, dst, coefficient, written);
        written = true;
    }
    if !written {
        dst.fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    fn random_plane(units: usize, block_size: usize, seed: u64) -> Vec<u8> {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        (0..units * block_size).map(|_| rng.gen()).collect()
    }

    #[test]
    fn test_coding_matrix_basics() {
        let mut m = CodingMatrix::identity(3);
        assert_eq!(m.get(1, 1), 1);
        m.set(0, 2, 9);
        m.swap_rows(0, 2);
        assert_eq!(m.row(2), &[1, 0, 9]);
        let picked = m.select_rows(&[2]);
        assert_eq!((picked.rows(), picked.cols()), (1, 3));
    }

    #[test]
    fn test_build_every_technique() {
        let registry = FieldRegistry::new();
        let mut configs = vec![
            CodecConfig::new(4, 2, 8, Technique::ReedSolVan),
            CodecConfig::new(4, 2, 16, Technique::ReedSolR6Op),
            CodecConfig::new(4, 0, 8, Technique::NoCoding),
        ];
        for (technique, w) in [
            (Technique::CauchyOrig, 4),
            (Technique::CauchyGood, 8),
            (Technique::Liberation, 5),
            (Technique::BlaumRoth, 4),
            (Technique::Liber8tion, 8),
        ] {
            let mut config = CodecConfig::new(4, 2, w, technique);
            config.packet_size = 8;
            configs.push(config);
        }

        for config in configs {
            let scheme = CodingScheme::build(&config, &registry).unwrap();
            assert_eq!(scheme.technique(), config.technique);
            assert_eq!(
                scheme.bitmatrix().is_some(),
                config.technique.uses_bitmatrix()
            );
        }
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let registry = FieldRegistry::new();
        let config = CodecConfig::new(9, 2, 8, Technique::Liber8tion);
        assert!(CodingScheme::build(&config, &registry).is_err());
    }

    #[test]
    fn test_matrix_encode_plane() {
        let registry = FieldRegistry::new();
        let config = CodecConfig::new(3, 2, 8, Technique::ReedSolVan);
        let scheme = CodingScheme::build(&config, &registry).unwrap();
        let block_size = 16;
        let mut plane = random_plane(5, block_size, 1);
        scheme.encode_plane(&mut plane, block_size);

        // Row 0 of a Vandermonde coding matrix is all ones: plain parity
        let mut parity = vec![0u8; block_size];
        for j in 0..3 {
            crate::galois::region_xor(&plane[j * block_size..(j + 1) * block_size], &mut parity);
        }
        assert_eq!(&plane[3 * block_size..4 * block_size], &parity[..]);
    }

    #[test]
    fn test_bitmatrix_encode_matches_matrix_semantics() {
        // Cauchy through the bitmatrix equals Cauchy through region multiplies
        let registry = FieldRegistry::new();
        let mut config = CodecConfig::new(3, 2, 8, Technique::CauchyGood);
        config.packet_size = 1;
        let scheme = CodingScheme::build(&config, &registry).unwrap();
        let field = registry.field(8).unwrap();
        let matrix = cauchy::good_coding_matrix(&field, 3, 2).unwrap();

        // One-byte packets: packet x of a chunk holds bit-plane x
        let block_size = 8;
        let mut plane = random_plane(5, block_size, 2);
        scheme.encode_plane(&mut plane, block_size);

        // Gather w-bit words column-wise: word b has bit x = bit b of packet x
        let word = |unit: usize, b: usize| -> u32 {
            (0..8).fold(0u32, |acc, x| {
                acc | ((u32::from(plane[unit * block_size + x]) >> b & 1) << x)
            })
        };
        for b in 0..8 {
            for i in 0..2 {
                let expected = (0..3).fold(0u32, |acc, j| {
                    acc ^ field.multiply(matrix.get(i, j), word(j, b))
                });
                assert_eq!(word(3 + i, b), expected);
            }
        }
    }
}
