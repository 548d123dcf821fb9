//! Layered recovery of erased units
//!
//! Full decode and single-unit repair share one routine. Selected planes are
//! visited in increasing intersection score; within a plane every surviving
//! block is turned back into its uncoupled value, the remaining unknowns are
//! solved with the per-plane code, and finally the coupled blocks of the
//! erased units are re-formed.

use rayon::prelude::*;
use std::collections::BTreeMap;
use tracing::debug;

use super::{ErasureSet, Stripe};
use crate::butterfly::{Butterfly, Topology, Vertex};
use crate::error::{Error, Result};
use crate::solver::DecodeSolver;

/// Which erasures to recover and which planes to read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryPlan {
    erasures: ErasureSet,
    planes: Vec<usize>,
}

impl RecoveryPlan {
    /// Recover every erased unit from every plane
    pub fn full(erasures: ErasureSet, topology: &Topology) -> Self {
        Self {
            erasures,
            planes: (0..topology.planes()).collect(),
        }
    }

    /// Rebuild a single unit
    ///
    /// A paired unit is rebuilt from the half of the planes in which it is
    /// stored uncoupled; each of those planes then has two unknowns, so this
    /// needs m >= 2. Otherwise every plane is read.
    ///
    /// # Errors
    /// Returns `InvalidErasure` if `unit` is not a unit of the topology.
    pub fn repair(unit: usize, topology: &Topology, m: usize) -> Result<Self> {
        let erasures = ErasureSet::new([unit], topology.units())?;
        let planes = if topology.is_paired(unit) && m >= 2 {
            topology.repair_planes(unit)
        } else {
            (0..topology.planes()).collect()
        };
        Ok(Self { erasures, planes })
    }

    pub fn erasures(&self) -> &ErasureSet {
        &self.erasures
    }

    /// Planes whose helper blocks are read, ascending
    pub fn planes(&self) -> &[usize] {
        &self.planes
    }
}

/// Result of [`recover`]
#[derive(Debug)]
pub struct Recovery {
    /// Uncoupled blocks of every unit; only the selected planes are filled
    pub uncoupled: Stripe,
    /// Surviving blocks read
    pub helper_blocks: usize,
}

/// Rebuild the erased units of `stripe` in place
///
/// Erased blocks of `stripe` may hold anything on entry. On return they hold
/// the coupled (stored) values in every plane.
///
/// # Errors
/// Returns `SingularMatrix` when a plane has more unknowns than coding units.
pub fn recover(
    stripe: &mut Stripe,
    plan: &RecoveryPlan,
    butterfly: &Butterfly,
    solver: &DecodeSolver,
) -> Result<Recovery> {
    let topology = butterfly.topology();
    let (planes, units, bs) = (stripe.planes(), stripe.units(), stripe.block_size());
    assert_eq!(planes, topology.planes(), "stripe has the wrong number of planes");
    let erased = plan.erasures.as_slice();

    let mut selected = vec![false; planes];
    for &z in &plan.planes {
        selected[z] = true;
    }

    let mut levels: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for &z in &plan.planes {
        levels
            .entry(topology.intersection_score(z, erased))
            .or_default()
            .push(z);
    }

    let source: &Stripe = stripe;
    let mut uncoupled = Stripe::new(planes, units, bs);
    for (score, level) in &levels {
        let solved = level
            .par_iter()
            .map(|&z| uncouple_plane(z, source, &uncoupled, &selected, plan, butterfly, solver))
            .collect::<Result<Vec<_>>>()?;
        for (&z, plane) in level.iter().zip(solved) {
            uncoupled.plane_mut(z).copy_from_slice(&plane);
        }
        debug!("Recovered {} planes with intersection score {}", level.len(), score);
    }

    // Re-form the stored blocks of erased units
    let rebuilt = (0..planes)
        .into_par_iter()
        .map(|z| {
            erased
                .iter()
                .map(|&e| couple_erased(e, z, source, &uncoupled, &selected, butterfly))
                .collect::<Result<Vec<_>>>()
        })
        .collect::<Result<Vec<_>>>()?;
    for (z, blocks) in rebuilt.into_iter().enumerate() {
        for (&e, block) in erased.iter().zip(blocks) {
            stripe.block_mut(z, e).copy_from_slice(&block);
        }
    }

    Ok(Recovery {
        uncoupled,
        helper_blocks: plan.planes.len() * (units - erased.len()),
    })
}

/// Uncoupled values of every unit in plane `z`
fn uncouple_plane(
    z: usize,
    stripe: &Stripe,
    uncoupled: &Stripe,
    selected: &[bool],
    plan: &RecoveryPlan,
    butterfly: &Butterfly,
    solver: &DecodeSolver,
) -> Result<Vec<u8>> {
    let (units, bs) = (stripe.units(), stripe.block_size());
    let mut plane = vec![0u8; stripe.plane_len()];
    let mut unknown = Vec::new();
    let (mut extra, mut factor) = (vec![0u8; bs], vec![0u8; bs]);

    for (u, out) in plane.chunks_exact_mut(bs.max(1)).enumerate().take(units) {
        if plan.erasures.contains(u) {
            unknown.push(u);
            continue;
        }
        match butterfly.topology().vertex(u, z) {
            Vertex::Unpaired | Vertex::Uncoupled => out.copy_from_slice(stripe.block(z, u)),
            Vertex::Coupled { unit, plane: pz } if !plan.erasures.contains(unit) => {
                // Bit p clear marks the low side of the pair
                let low_side = z < pz;
                let (mut low, mut high) = if low_side {
                    (stripe.block(z, u).to_vec(), stripe.block(pz, unit).to_vec())
                } else {
                    (stripe.block(pz, unit).to_vec(), stripe.block(z, u).to_vec())
                };
                butterfly.decouple_pair(&mut low, &mut high, &mut extra, &mut factor);
                out.copy_from_slice(if low_side { &low } else { &high });
            }
            Vertex::Coupled { unit, plane: pz } if selected[pz] => {
                butterfly.uncouple_from_partner(stripe.block(z, u), uncoupled.block(pz, unit), out);
            }
            // Partner erased in a plane that is never solved
            Vertex::Coupled { .. } => unknown.push(u),
        }
    }

    solver.solve_plane(&mut plane, &unknown, bs)?;
    Ok(plane)
}

/// Stored value of erased unit `e` in plane `z`
fn couple_erased(
    e: usize,
    z: usize,
    stripe: &Stripe,
    uncoupled: &Stripe,
    selected: &[bool],
    butterfly: &Butterfly,
) -> Result<Vec<u8>> {
    let mut out = vec![0u8; stripe.block_size()];
    match butterfly.topology().vertex(e, z) {
        Vertex::Unpaired | Vertex::Uncoupled if selected[z] => {
            out.copy_from_slice(uncoupled.block(z, e));
        }
        Vertex::Coupled { unit, plane: pz } if selected[z] && selected[pz] => {
            butterfly.recouple(uncoupled.block(z, e), uncoupled.block(pz, unit), &mut out);
        }
        Vertex::Coupled { unit, plane: pz } if selected[pz] => {
            let mut own = vec![0u8; stripe.block_size()];
            butterfly.recover_from_partner(stripe.block(pz, unit), uncoupled.block(pz, unit), &mut own);
            butterfly.recouple(&own, uncoupled.block(pz, unit), &mut out);
        }
        _ => {
            return Err(Error::Internal(format!(
                "block ({}, {}) is not reachable from the selected planes",
                z, e
            )))
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CodecConfig, Technique};
    use crate::galois::FieldRegistry;
    use crate::matrix::CodingScheme;
    use rand::{Rng, SeedableRng};
    use std::sync::Arc;

    struct Fixture {
        butterfly: Butterfly,
        solver: DecodeSolver,
        uncoupled: Stripe,
        coupled: Stripe,
    }

    fn fixture(k: usize, m: usize, rounds: usize, block_size: usize) -> Fixture {
        let registry = FieldRegistry::new();
        let config = CodecConfig::new(k, m, 8, Technique::ReedSolVan);
        let scheme = Arc::new(CodingScheme::build(&config, &registry).unwrap());
        let topology = Topology::new(k + m, rounds);
        let butterfly = Butterfly::new(registry.field(8).unwrap(), 2, topology).unwrap();

        let mut rng = rand::rngs::StdRng::seed_from_u64(k as u64 * 31 + m as u64);
        let mut uncoupled = Stripe::new(1 << rounds, k + m, block_size);
        for z in 0..uncoupled.planes() {
            let plane = uncoupled.plane_mut(z);
            rng.fill(&mut plane[..k * block_size]);
            scheme.encode_plane(plane, block_size);
        }
        let mut coupled = uncoupled.clone();
        butterfly.couple(&mut coupled);

        Fixture {
            butterfly,
            solver: DecodeSolver::new(scheme),
            uncoupled,
            coupled,
        }
    }

    fn damage(stripe: &Stripe, erasures: &ErasureSet) -> Stripe {
        let mut damaged = stripe.clone();
        for z in 0..damaged.planes() {
            for e in erasures.iter() {
                damaged.block_mut(z, e).fill(0xEE);
            }
        }
        damaged
    }

    #[test]
    fn test_full_recovery_every_pattern() {
        let f = fixture(4, 2, 3, 8);
        let n = 6;
        for a in 0..n {
            for b in a..n {
                let erasures = ErasureSet::new([a, b], n).unwrap();
                let plan = RecoveryPlan::full(erasures.clone(), f.butterfly.topology());
                let mut stripe = damage(&f.coupled, &erasures);
                let recovery = recover(&mut stripe, &plan, &f.butterfly, &f.solver).unwrap();
                assert_eq!(stripe, f.coupled, "erasures {:?}", erasures);
                assert_eq!(recovery.uncoupled, f.uncoupled, "erasures {:?}", erasures);
            }
        }
    }

    #[test]
    fn test_full_recovery_with_unpaired_units() {
        // Units 4..7 take part in no round
        let f = fixture(5, 3, 2, 4);
        for erased in [[0, 1, 5], [2, 6, 7], [1, 3, 4]] {
            let erasures = ErasureSet::new(erased, 8).unwrap();
            let plan = RecoveryPlan::full(erasures.clone(), f.butterfly.topology());
            let mut stripe = damage(&f.coupled, &erasures);
            recover(&mut stripe, &plan, &f.butterfly, &f.solver).unwrap();
            assert_eq!(stripe, f.coupled);
        }
    }

    #[test]
    fn test_repair_reads_half_the_planes() {
        let f = fixture(4, 2, 3, 16);
        let topology = *f.butterfly.topology();
        for unit in 0..6 {
            let plan = RecoveryPlan::repair(unit, &topology, 2).unwrap();
            assert_eq!(plan.planes().len(), 4);
            let mut stripe = damage(&f.coupled, plan.erasures());
            let recovery = recover(&mut stripe, &plan, &f.butterfly, &f.solver).unwrap();
            assert_eq!(stripe.unit(unit), f.coupled.unit(unit), "unit {}", unit);
            assert_eq!(recovery.helper_blocks, 4 * 5);
        }
    }

    #[test]
    fn test_repair_with_single_parity_reads_everything() {
        let f = fixture(3, 1, 2, 8);
        let topology = *f.butterfly.topology();
        let plan = RecoveryPlan::repair(1, &topology, 1).unwrap();
        assert_eq!(plan.planes().len(), 4);
        let mut stripe = damage(&f.coupled, plan.erasures());
        recover(&mut stripe, &plan, &f.butterfly, &f.solver).unwrap();
        assert_eq!(stripe, f.coupled);
    }

    #[test]
    fn test_too_many_erasures() {
        let f = fixture(4, 2, 2, 4);
        let erasures = ErasureSet::new([0, 2, 4], 6).unwrap();
        let plan = RecoveryPlan::full(erasures.clone(), f.butterfly.topology());
        let mut stripe = damage(&f.coupled, &erasures);
        assert!(matches!(
            recover(&mut stripe, &plan, &f.butterfly, &f.solver),
            Err(Error::SingularMatrix(_))
        ));
    }

    #[test]
    fn test_repair_rejects_unknown_unit() {
        let topology = Topology::new(4, 2);
        assert!(RecoveryPlan::repair(4, &topology, 2).is_err());
    }
}
