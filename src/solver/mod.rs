//! Linear decode solver
//!
//! Reconstructs the erased blocks of one plane from any k survivors. The
//! decoding matrix for an erasure pattern is inverted once and the result
//! is cached as a [`DecodePlan`].

pub mod gauss;

pub use gauss::{invert_bitmatrix, invert_matrix};

use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::matrix::{dot_product, BitMatrix, CodingMatrix, CodingScheme, Encoder, Schedule};

/// Precomputed reconstruction for one erasure pattern
#[derive(Debug)]
pub enum DecodePlan {
    /// Nothing is erased
    Nothing,
    /// Linear combinations over GF(2^w)
    Matrix {
        /// Surviving units the erased data is rebuilt from
        sources: Vec<usize>,
        /// Erased data unit and its row of the inverted decoding matrix
        data_rows: Vec<(usize, Vec<u32>)>,
        /// Erased coding unit and its coding matrix row, over data 0..k
        coding_rows: Vec<(usize, Vec<u32>)>,
    },
    /// XOR schedule: erased data first, then erased coding
    Schedule(Schedule),
}

/// Per-session decode solver with a plan cache
pub struct DecodeSolver {
    scheme: Arc<CodingScheme>,
    plans: DashMap<Vec<usize>, Arc<DecodePlan>>,
}

impl DecodeSolver {
    pub fn new(scheme: Arc<CodingScheme>) -> Self {
        Self {
            scheme,
            plans: DashMap::new(),
        }
    }

    pub fn scheme(&self) -> &Arc<CodingScheme> {
        &self.scheme
    }

    /// Number of cached erasure patterns
    pub fn cached_plans(&self) -> usize {
        self.plans.len()
    }

    /// Get or build the plan for a sorted set of erased units
    ///
    /// # Errors
    /// Returns `SingularMatrix` when more than m units are erased or the
    /// decoding matrix cannot be inverted, and `InvalidErasure` for unit
    /// indices outside 0..k+m.
    pub fn plan(&self, erasures: &[usize]) -> Result<Arc<DecodePlan>> {
        if let Some(plan) = self.plans.get(erasures) {
            return Ok(Arc::clone(plan.value()));
        }

        let plan = Arc::new(self.build_plan(erasures)?);
        debug!("Built decode plan for erasures {:?}", erasures);
        self.plans.insert(erasures.to_vec(), Arc::clone(&plan));
        Ok(plan)
    }

    fn build_plan(&self, erasures: &[usize]) -> Result<DecodePlan> {
        let (k, m) = (self.scheme.k(), self.scheme.m());
        let n = k + m;

        if let Some(&bad) = erasures.iter().find(|&&e| e >= n) {
            return Err(Error::InvalidErasure(format!(
                "unit {} out of range 0..{}",
                bad, n
            )));
        }
        if erasures.is_empty() {
            return Ok(DecodePlan::Nothing);
        }
        if erasures.len() > m {
            return Err(Error::SingularMatrix(format!(
                "{} erasures exceed the {} coding units",
                erasures.len(),
                m
            )));
        }

        let sources: Vec<usize> = (0..n).filter(|u| !erasures.contains(u)).take(k).collect();
        let erased_data: Vec<usize> = erasures.iter().copied().filter(|&e| e < k).collect();
        let erased_coding: Vec<usize> = erasures.iter().copied().filter(|&e| e >= k).collect();

        match self.scheme.encoder() {
            Encoder::Matrix(matrix) | Encoder::Raid6(matrix) => {
                let data_rows = if erased_data.is_empty() {
                    Vec::new()
                } else {
                    let inverse = invert_matrix(self.scheme.field(), &decoding_matrix(matrix, &sources))?;
                    erased_data
                        .iter()
                        .map(|&e| (e, inverse.row(e).to_vec()))
                        .collect()
                };
                let coding_rows = erased_coding
                    .iter()
                    .map(|&c| (c, matrix.row(c - k).to_vec()))
                    .collect();
                Ok(DecodePlan::Matrix {
                    sources,
                    data_rows,
                    coding_rows,
                })
            }
            Encoder::Bitmatrix { bitmatrix, .. } => {
                let w = self.scheme.w() as usize;
                let mut schedule = Schedule::default();

                if !erased_data.is_empty() {
                    let inverse = invert_bitmatrix(&decoding_bitmatrix(bitmatrix, &sources, k, w))?;
                    let rows: Vec<usize> = erased_data
                        .iter()
                        .flat_map(|&e| e * w..(e + 1) * w)
                        .collect();
                    schedule = Schedule::compile(&inverse.select_rows(&rows), &sources, &erased_data, w);
                }
                if !erased_coding.is_empty() {
                    let rows: Vec<usize> = erased_coding
                        .iter()
                        .flat_map(|&c| (c - k) * w..(c - k + 1) * w)
                        .collect();
                    let data: Vec<usize> = (0..k).collect();
                    schedule = schedule.then(Schedule::compile(
                        &bitmatrix.select_rows(&rows),
                        &data,
                        &erased_coding,
                        w,
                    ));
                }
                Ok(DecodePlan::Schedule(schedule))
            }
            // Only reachable with m = 0, which the length check above covers
            Encoder::None => Err(Error::SingularMatrix(
                "no coding units to decode from".to_string(),
            )),
        }
    }

    /// Rebuild the erased blocks of one plane in place
    ///
    /// `plane` holds k + m blocks of `block_size` bytes; the contents of
    /// erased blocks are ignored and overwritten.
    ///
    /// # Errors
    /// Propagates [`DecodeSolver::plan`] failures.
    pub fn solve_plane(&self, plane: &mut [u8], erasures: &[usize], block_size: usize) -> Result<()> {
        let k = self.scheme.k();
        assert_eq!(
            plane.len(),
            (k + self.scheme.m()) * block_size,
            "plane does not hold k + m blocks"
        );
        let plan = self.plan(erasures)?;

        match plan.as_ref() {
            DecodePlan::Nothing => {}
            DecodePlan::Matrix {
                sources,
                data_rows,
                coding_rows,
            } => {
                let field = self.scheme.field();
                let mut out = vec![0u8; block_size];
                let block = |unit: usize| unit * block_size..(unit + 1) * block_size;

                // Data rows read survivors only, so their order does not matter
                for (target, coefficients) in data_rows {
                    let inputs = sources.iter().map(|&s| &plane[block(s)]);
                    dot_product(field, coefficients, inputs, &mut out);
                    plane[block(*target)].copy_from_slice(&out);
                }
                for (target, coefficients) in coding_rows {
                    let inputs = (0..k).map(|d| &plane[block(d)]);
                    dot_product(field, coefficients, inputs, &mut out);
                    plane[block(*target)].copy_from_slice(&out);
                }
            }
            DecodePlan::Schedule(schedule) => {
                schedule.apply(plane, block_size, self.scheme.packet_size());
            }
        }
        Ok(())
    }
}

/// k×k matrix mapping the data to the chosen sources
fn decoding_matrix(matrix: &CodingMatrix, sources: &[usize]) -> CodingMatrix {
    let k = matrix.cols();
    let mut decoding = CodingMatrix::new(k, k);
    for (i, &src) in sources.iter().enumerate() {
        if src < k {
            decoding.set(i, src, 1);
        } else {
            for j in 0..k {
                decoding.set(i, j, matrix.get(src - k, j));
            }
        }
    }
    decoding
}

/// kw×kw bit-level counterpart of [`decoding_matrix`]
fn decoding_bitmatrix(bitmatrix: &BitMatrix, sources: &[usize], k: usize, w: usize) -> BitMatrix {
    let mut decoding = BitMatrix::new(k * w, k * w);
    for (i, &src) in sources.iter().enumerate() {
        for x in 0..w {
            if src < k {
                decoding.set(i * w + x, src * w + x, true);
            } else {
                decoding
                    .row_mut(i * w + x)
                    .copy_from_slice(bitmatrix.row((src - k) * w + x));
            }
        }
    }
    decoding
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CodecConfig, Technique};
    use crate::galois::FieldRegistry;
    use rand::{Rng, SeedableRng};

    fn scheme(k: usize, m: usize, w: u32, technique: Technique, packet_size: usize) -> Arc<CodingScheme> {
        let mut config = CodecConfig::new(k, m, w, technique);
        config.packet_size = packet_size;
        Arc::new(CodingScheme::build(&config, &FieldRegistry::new()).unwrap())
    }

    fn erasure_patterns(n: usize, max: usize) -> Vec<Vec<usize>> {
        (0u32..1 << n)
            .filter(|mask| (mask.count_ones() as usize) <= max)
            .map(|mask| (0..n).filter(|u| mask >> u & 1 == 1).collect())
            .collect()
    }

    fn check_all_patterns(scheme: Arc<CodingScheme>, block_size: usize) {
        let (k, m) = (scheme.k(), scheme.m());
        let mut rng = rand::rngs::StdRng::seed_from_u64(17);
        let mut original: Vec<u8> = (0..(k + m) * block_size).map(|_| rng.gen()).collect();
        scheme.encode_plane(&mut original, block_size);

        let solver = DecodeSolver::new(Arc::clone(&scheme));
        for erasures in erasure_patterns(k + m, m) {
            let mut plane = original.clone();
            for &e in &erasures {
                plane[e * block_size..(e + 1) * block_size].fill(0xAA);
            }
            solver.solve_plane(&mut plane, &erasures, block_size).unwrap();
            assert_eq!(plane, original, "{} erasures {:?}", scheme.technique(), erasures);
        }
    }

    #[test]
    fn test_reed_sol_van_all_patterns() {
        check_all_patterns(scheme(4, 3, 8, Technique::ReedSolVan, 0), 32);
        check_all_patterns(scheme(3, 2, 16, Technique::ReedSolVan, 0), 32);
    }

    #[test]
    fn test_r6_all_patterns() {
        check_all_patterns(scheme(5, 2, 8, Technique::ReedSolR6Op, 0), 16);
    }

    #[test]
    fn test_bitmatrix_all_patterns() {
        check_all_patterns(scheme(4, 2, 4, Technique::CauchyOrig, 4), 32);
        check_all_patterns(scheme(4, 3, 8, Technique::CauchyGood, 2), 32);
        check_all_patterns(scheme(5, 2, 5, Technique::Liberation, 8), 80);
        check_all_patterns(scheme(4, 2, 4, Technique::BlaumRoth, 8), 64);
        check_all_patterns(scheme(8, 2, 8, Technique::Liber8tion, 8), 64);
    }

    #[test]
    fn test_too_many_erasures() {
        let solver = DecodeSolver::new(scheme(4, 2, 8, Technique::ReedSolVan, 0));
        let mut plane = vec![0u8; 6 * 8];
        let err = solver.solve_plane(&mut plane, &[0, 1, 2], 8).unwrap_err();
        assert!(matches!(err, Error::SingularMatrix(_)));
    }

    #[test]
    fn test_out_of_range_erasure() {
        let solver = DecodeSolver::new(scheme(4, 2, 8, Technique::ReedSolVan, 0));
        assert!(matches!(solver.plan(&[6]), Err(Error::InvalidErasure(_))));
    }

    #[test]
    fn test_plans_are_cached() {
        let solver = DecodeSolver::new(scheme(4, 2, 8, Technique::ReedSolVan, 0));
        let first = solver.plan(&[1, 4]).unwrap();
        let second = solver.plan(&[1, 4]).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        solver.plan(&[0]).unwrap();
        assert_eq!(solver.cached_plans(), 2);
    }

    #[test]
    fn test_coding_only_erasure_needs_no_inverse() {
        let solver = DecodeSolver::new(scheme(4, 2, 8, Technique::ReedSolVan, 0));
        match solver.plan(&[4, 5]).unwrap().as_ref() {
            DecodePlan::Matrix {
                data_rows,
                coding_rows,
                ..
            } => {
                assert!(data_rows.is_empty());
                assert_eq!(coding_rows.len(), 2);
            }
            other => panic!("unexpected plan {:?}", other),
        }
    }
}
