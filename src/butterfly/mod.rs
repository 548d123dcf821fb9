//! Butterfly coupling transform
//!
//! Sub-packetization spreads each unit over `2^R` planes. After the per-plane
//! code is computed, round p mixes block A of unit 2p+1 in every plane z with
//! bit p clear and block B of unit 2p in plane z + 2^p:
//!
//! ```text
//! A' = A ⊕ r·B
//! B' = B ⊕ r·A
//! ```
//!
//! Each pair is independent, so rounds only need to run one after the other
//! to bound memory traffic; inside a round all pairs run in parallel.

pub mod topology;

pub use topology::{Topology, Vertex};

use rayon::prelude::*;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::galois::{region_xor, Field};
use crate::stripe::Stripe;

/// Scalars used by the pair operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CouplingConstants {
    /// Coupling scalar r
    pub r: u32,
    /// 1 ⊕ r
    pub one_plus_r: u32,
    /// 1 / (1 ⊕ r)
    pub d: u32,
    /// 1 / r
    pub r_inv: u32,
}

impl CouplingConstants {
    /// Derive the constants for scalar `r` in `field`
    ///
    /// # Errors
    /// Returns `InvalidConfig` when r is 0, 1 or not an element of the field.
    pub fn new(field: &Field, r: u32) -> Result<Self> {
        if r < 2 || r > field.max_element() {
            return Err(Error::InvalidConfig(format!(
                "coupling scalar must be in 2..2^{}, got {}",
                field.w(),
                r
            )));
        }
        let one_plus_r = 1 ^ r;
        Ok(Self {
            r,
            one_plus_r,
            d: field.inverse(one_plus_r)?,
            r_inv: field.inverse(r)?,
        })
    }
}

/// Per-worker scratch blocks
struct Scratch {
    extra: Vec<u8>,
    factor: Vec<u8>,
}

impl Scratch {
    fn new(block_size: usize) -> Self {
        Self {
            extra: vec![0; block_size],
            factor: vec![0; block_size],
        }
    }
}

/// Coupling engine for one session
#[derive(Debug, Clone)]
pub struct Butterfly {
    field: Arc<Field>,
    constants: CouplingConstants,
    topology: Topology,
}

impl Butterfly {
    /// # Errors
    /// See [`CouplingConstants::new`].
    pub fn new(field: Arc<Field>, r: u32, topology: Topology) -> Result<Self> {
        let constants = CouplingConstants::new(&field, r)?;
        Ok(Self {
            field,
            constants,
            topology,
        })
    }

    pub fn constants(&self) -> &CouplingConstants {
        &self.constants
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Couple every pair of the stripe in place
    pub fn couple(&self, stripe: &mut Stripe) {
        self.for_each_pair(stripe, |low, high, scratch| {
            self.couple_pair(low, high, &mut scratch.extra)
        });
    }

    /// Undo [`Butterfly::couple`] in place
    pub fn decouple(&self, stripe: &mut Stripe) {
        self.for_each_pair(stripe, |low, high, scratch| {
            self.decouple_pair(low, high, &mut scratch.extra, &mut scratch.factor)
        });
    }

    fn for_each_pair<F>(&self, stripe: &mut Stripe, op: F)
    where
        F: Fn(&mut [u8], &mut [u8], &mut Scratch) + Sync,
    {
        assert_eq!(stripe.planes(), self.topology.planes(), "stripe has the wrong number of planes");
        assert_eq!(stripe.units(), self.topology.units(), "stripe has the wrong number of units");
        let bs = stripe.block_size();
        let plane_len = stripe.plane_len();
        if bs == 0 {
            return;
        }

        for p in 0..self.topology.rounds() {
            let half = 1usize << p;
            let (low_unit, high_unit) = (2 * p + 1, 2 * p);

            stripe
                .as_bytes_mut()
                .par_chunks_mut(2 * half * plane_len)
                .for_each(|group| {
                    let (lo, hi) = group.split_at_mut(half * plane_len);
                    lo.par_chunks_mut(plane_len)
                        .zip(hi.par_chunks_mut(plane_len))
                        .for_each_init(
                            || Scratch::new(bs),
                            |scratch, (low_plane, high_plane)| {
                                let low = &mut low_plane[low_unit * bs..(low_unit + 1) * bs];
                                let high = &mut high_plane[high_unit * bs..(high_unit + 1) * bs];
                                op(low, high, scratch);
                            },
                        );
                });
        }
    }

    /// `low = low ⊕ r·high`, `high = high ⊕ r·low` using the old values
    pub fn couple_pair(&self, low: &mut [u8], high: &mut [u8], saved: &mut [u8]) {
        let r = self.constants.r;
        saved.copy_from_slice(low);
        self.field.region_multiply(high, low, r, true);
        self.field.region_multiply(saved, high, r, true);
    }

    /// Inverse of [`Butterfly::couple_pair`]
    ///
    /// `extra` and `factor` are scratch blocks of the same size.
    pub fn decouple_pair(&self, low: &mut [u8], high: &mut [u8], extra: &mut [u8], factor: &mut [u8]) {
        let CouplingConstants { r, d, .. } = self.constants;
        extra.copy_from_slice(high);
        region_xor(high, low);
        self.field.region_multiply(low, factor, d, false);
        region_xor(factor, high);
        self.field.region_multiply(high, low, d, false);
        self.field.region_multiply(low, high, r, false);
        region_xor(extra, high);
    }

    /// Uncoupled value of a block whose erased partner is already solved:
    /// `out = coupled ⊕ r·partner_uncoupled`
    pub fn uncouple_from_partner(&self, coupled: &[u8], partner_uncoupled: &[u8], out: &mut [u8]) {
        out.copy_from_slice(coupled);
        self.field
            .region_multiply(partner_uncoupled, out, self.constants.r, true);
    }

    /// Uncoupled value of an erased block from its surviving partner:
    /// `out = (partner_coupled ⊕ partner_uncoupled) / r`
    pub fn recover_from_partner(
        &self,
        partner_coupled: &[u8],
        partner_uncoupled: &[u8],
        out: &mut [u8],
    ) {
        let mut sum = partner_coupled.to_vec();
        region_xor(partner_uncoupled, &mut sum);
        self.field
            .region_multiply(&sum, out, self.constants.r_inv, false);
    }

    /// Coupled value from both uncoupled values: `out = uncoupled ⊕ r·partner_uncoupled`
    pub fn recouple(&self, uncoupled: &[u8], partner_uncoupled: &[u8], out: &mut [u8]) {
        self.uncouple_from_partner(uncoupled, partner_uncoupled, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::galois::Strategy;
    use rand::{Rng, SeedableRng};

    fn butterfly(units: usize, rounds: usize) -> Butterfly {
        let field = Arc::new(Field::new(8, Strategy::Default).unwrap());
        Butterfly::new(field, 2, Topology::new(units, rounds)).unwrap()
    }

    fn random_stripe(planes: usize, units: usize, block_size: usize, seed: u64) -> Stripe {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let mut stripe = Stripe::new(planes, units, block_size);
        rng.fill(stripe.as_bytes_mut());
        stripe
    }

    #[test]
    fn test_constants() {
        let field = Field::new(8, Strategy::Default).unwrap();
        let c = CouplingConstants::new(&field, 2).unwrap();
        assert_eq!(c.one_plus_r, 3);
        assert_eq!(field.multiply(c.d, 3), 1);
        assert_eq!(field.multiply(c.r_inv, 2), 1);

        assert!(CouplingConstants::new(&field, 0).is_err());
        assert!(CouplingConstants::new(&field, 1).is_err());
        assert!(CouplingConstants::new(&field, 256).is_err());
    }

    #[test]
    fn test_decouple_inverts_couple_128_planes() {
        let bf = butterfly(14, 7);
        for block_size in [1, 16, 256] {
            let original = random_stripe(128, 14, block_size, block_size as u64);
            let mut stripe = original.clone();
            bf.couple(&mut stripe);
            assert_ne!(stripe, original);
            bf.decouple(&mut stripe);
            assert_eq!(stripe, original, "block size {}", block_size);
        }
    }

    #[test]
    fn test_couple_is_not_an_involution() {
        let bf = butterfly(4, 2);
        let original = random_stripe(4, 4, 32, 9);
        let mut stripe = original.clone();
        bf.couple(&mut stripe);
        bf.couple(&mut stripe);
        assert_ne!(stripe, original);
    }

    #[test]
    fn test_couple_touches_only_paired_blocks() {
        let bf = butterfly(5, 2);
        let original = random_stripe(4, 5, 8, 4);
        let mut stripe = original.clone();
        bf.couple(&mut stripe);
        for z in 0..4 {
            for u in 0..5 {
                let same = stripe.block(z, u) == original.block(z, u);
                let coupled = matches!(bf.topology().vertex(u, z), Vertex::Coupled { .. });
                assert_eq!(same, !coupled, "unit {} plane {}", u, z);
            }
        }
    }

    #[test]
    fn test_pair_primitives_agree() {
        let bf = butterfly(2, 1);
        let mut rng = rand::rngs::StdRng::seed_from_u64(21);
        let a: Vec<u8> = (0..64).map(|_| rng.gen()).collect();
        let b: Vec<u8> = (0..64).map(|_| rng.gen()).collect();

        let (mut ca, mut cb) = (a.clone(), b.clone());
        let mut saved = vec![0u8; 64];
        bf.couple_pair(&mut ca, &mut cb, &mut saved);

        // Survivor A' with solved B gives A back
        let mut out = vec![0u8; 64];
        bf.uncouple_from_partner(&ca, &b, &mut out);
        assert_eq!(out, a);

        // Lost B from A' and A
        bf.recover_from_partner(&ca, &a, &mut out);
        assert_eq!(out, b);

        // Re-coupling B reproduces B'
        bf.recouple(&b, &a, &mut out);
        assert_eq!(out, cb);

        let (mut extra, mut factor) = (vec![0u8; 64], vec![0u8; 64]);
        bf.decouple_pair(&mut ca, &mut cb, &mut extra, &mut factor);
        assert_eq!((ca, cb), (a, b));
    }

    #[test]
    fn test_wide_coupling_field() {
        let field = Arc::new(Field::new(16, Strategy::Default).unwrap());
        let bf = Butterfly::new(field, 0x1234, Topology::new(4, 2)).unwrap();
        let original = random_stripe(4, 4, 32, 8);
        let mut stripe = original.clone();
        bf.couple(&mut stripe);
        bf.decouple(&mut stripe);
        assert_eq!(stripe, original);
    }
}
