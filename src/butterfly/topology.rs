//! Which blocks the butterfly couples, and with whom
//!
//! With R rounds a stripe has 2^R planes. Round p owns units 2p and 2p+1:
//! unit 2p is coupled in planes whose bit p is set, unit 2p+1 in planes
//! whose bit p is clear. Every coupled block's partner is the other unit of
//! its round in the plane that differs in bit p. Units from 2R upward take
//! part in no round.

/// Role of one (unit, plane) block in the coupling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vertex {
    /// The unit belongs to no round; its block is never mixed
    Unpaired,
    /// Stored as is in this plane
    Uncoupled,
    /// Mixed with the block of `unit` in `plane`
    Coupled { unit: usize, plane: usize },
}

/// Coupling layout for `units` units over `2^rounds` planes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Topology {
    units: usize,
    rounds: usize,
}

impl Topology {
    pub fn new(units: usize, rounds: usize) -> Self {
        assert!(2 * rounds <= units, "{} rounds need {} units", rounds, 2 * rounds);
        Self { units, rounds }
    }

    pub fn units(&self) -> usize {
        self.units
    }

    pub fn rounds(&self) -> usize {
        self.rounds
    }

    pub fn planes(&self) -> usize {
        1 << self.rounds
    }

    /// Round that couples `unit`, if any
    pub fn round_of(&self, unit: usize) -> Option<usize> {
        (unit < 2 * self.rounds).then_some(unit / 2)
    }

    pub fn is_paired(&self, unit: usize) -> bool {
        self.round_of(unit).is_some()
    }

    /// Classify the block of `unit` in `plane`
    pub fn vertex(&self, unit: usize, plane: usize) -> Vertex {
        assert!(unit < self.units && plane < self.planes(), "vertex ({}, {}) out of range", unit, plane);
        match self.round_of(unit) {
            None => Vertex::Unpaired,
            Some(p) if (plane >> p) & 1 == unit & 1 => Vertex::Uncoupled,
            Some(p) => Vertex::Coupled {
                unit: unit ^ 1,
                plane: plane ^ (1 << p),
            },
        }
    }

    /// Number of erased paired units stored uncoupled in `plane`
    ///
    /// Recovering planes in increasing score order guarantees that a
    /// survivor coupled to an erased unit finds that unit's uncoupled value
    /// already solved in the partner plane, whose score is one lower.
    pub fn intersection_score(&self, plane: usize, erasures: &[usize]) -> usize {
        erasures
            .iter()
            .filter(|&&e| self.is_paired(e) && self.vertex(e, plane) == Vertex::Uncoupled)
            .count()
    }

    /// Planes in which `unit` is stored uncoupled
    ///
    /// For a paired unit these are half of all planes; they carry enough
    /// helper data to rebuild the unit everywhere. Unpaired units need all.
    pub fn repair_planes(&self, unit: usize) -> Vec<usize> {
        match self.round_of(unit) {
            None => (0..self.planes()).collect(),
            Some(p) => (0..self.planes())
                .filter(|z| (z >> p) & 1 == unit & 1)
                .collect(),
        }
    }
}
