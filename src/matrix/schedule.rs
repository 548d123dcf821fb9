//! XOR schedules compiled from bit-matrices
//!
//! A schedule replaces a bitmatrix-times-packets product with an ordered
//! list of packet copies and XORs. Rows are emitted greedily: each row is
//! built either from scratch or from an already computed row plus the
//! difference between the two, whichever needs fewer XORs.

use super::BitMatrix;

/// One packet of one block: `bit` selects the packet inside each chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Packet {
    pub unit: usize,
    pub bit: usize,
}

/// A single schedule step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Target row has no terms
    Zero { dst: Packet },
    Copy { src: Packet, dst: Packet },
    Xor { src: Packet, dst: Packet },
}

/// Ordered XOR program over the blocks of one plane
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schedule {
    w: usize,
    ops: Vec<Operation>,
}

impl Schedule {
    /// Compile `bitmatrix` into a schedule
    ///
    /// # Arguments
    /// * `bitmatrix` - (targets·w)×(sources·w) matrix
    /// * `sources` - unit index of each source column block
    /// * `targets` - unit index of each target row block
    /// * `w` - packets per chunk
    pub fn compile(bitmatrix: &BitMatrix, sources: &[usize], targets: &[usize], w: usize) -> Self {
        assert_eq!(bitmatrix.rows(), targets.len() * w, "row blocks do not match targets");
        assert_eq!(bitmatrix.cols(), sources.len() * w, "column blocks do not match sources");

        let rows = bitmatrix.rows();
        let cols = bitmatrix.cols();
        let source = |col: usize| Packet {
            unit: sources[col / w],
            bit: col % w,
        };
        let target = |row: usize| Packet {
            unit: targets[row / w],
            bit: row % w,
        };

        let mut ops = Vec::new();
        let mut cost: Vec<usize> = (0..rows)
            .map(|r| bitmatrix.row(r).iter().filter(|&&b| b != 0).count())
            .collect();
        let mut from: Vec<Option<usize>> = vec![None; rows];
        let mut remaining: Vec<usize> = (0..rows).collect();
        let mut best = cheapest(&remaining, &cost, cols);

        while let Some(row) = best {
            remaining.retain(|&r| r != row);
            let bits = bitmatrix.row(row);
            let dst = target(row);

            match from[row] {
                None => {
                    let mut first = true;
                    for col in (0..cols).filter(|&c| bits[c] != 0) {
                        let src = source(col);
                        ops.push(if first {
                            Operation::Copy { src, dst }
                        } else {
                            Operation::Xor { src, dst }
                        });
                        first = false;
                    }
                    if first {
                        ops.push(Operation::Zero { dst });
                    }
                }
                Some(base) => {
                    ops.push(Operation::Copy {
                        src: target(base),
                        dst,
                    });
                    let base_bits = bitmatrix.row(base);
                    for col in (0..cols).filter(|&c| bits[c] != base_bits[c]) {
                        ops.push(Operation::Xor {
                            src: source(col),
                            dst,
                        });
                    }
                }
            }

            for &other in &remaining {
                let diff = 1 + bits
                    .iter()
                    .zip(bitmatrix.row(other))
                    .filter(|(a, b)| a != b)
                    .count();
                if diff < cost[other] {
                    cost[other] = diff;
                    from[other] = Some(row);
                }
            }
            best = cheapest(&remaining, &cost, cols);
        }

        Schedule { w, ops }
    }

    /// Append another schedule's operations after this one's
    pub fn then(mut self, other: Schedule) -> Self {
        debug_assert!(self.ops.is_empty() || other.ops.is_empty() || self.w == other.w);
        if self.ops.is_empty() {
            self.w = other.w;
        }
        self.ops.extend(other.ops);
        self
    }

    pub fn operations(&self) -> &[Operation] {
        &self.ops
    }

    /// Number of XOR steps
    pub fn xor_count(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, Operation::Xor { .. }))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Run the schedule over one plane
    ///
    /// The plane holds consecutive blocks of `block_size` bytes, one per unit.
    /// Each block is processed in chunks of `w · packet_size` bytes.
    pub fn apply(&self, plane: &mut [u8], block_size: usize, packet_size: usize) {
        if self.ops.is_empty() {
            return;
        }
        let chunk = self.w * packet_size;
        assert!(chunk > 0 && block_size % chunk == 0, "block size {} not a multiple of {}", block_size, chunk);

        let offset = |p: Packet, base: usize| p.unit * block_size + base + p.bit * packet_size;
        for base in (0..block_size).step_by(chunk) {
            for op in &self.ops {
                match *op {
                    Operation::Zero { dst } => {
                        let d = offset(dst, base);
                        plane[d..d + packet_size].fill(0);
                    }
                    Operation::Copy { src, dst } => {
                        let (s, d) = (offset(src, base), offset(dst, base));
                        plane.copy_within(s..s + packet_size, d);
                    }
                    Operation::Xor { src, dst } => {
                        xor_within(plane, offset(src, base), offset(dst, base), packet_size);
                    }
                }
            }
        }
    }
}

fn cheapest(remaining: &[usize], cost: &[usize], cols: usize) -> Option<usize> {
    let mut best = None;
    let mut best_cost = cols + 1;
    for &r in remaining {
        if cost[r] < best_cost {
            best_cost = cost[r];
            best = Some(r);
        }
    }
    best
}

/// `buf[dst..dst+len] ^= buf[src..src+len]` for non-overlapping ranges
pub(crate) fn xor_within(buf: &mut [u8], src: usize, dst: usize, len: usize) {
    assert!(src + len <= dst || dst + len <= src, "overlapping XOR ranges");
    if src < dst {
        let (head, tail) = buf.split_at_mut(dst);
        crate::galois::region_xor(&head[src..src + len], &mut tail[..len]);
    } else {
        let (head, tail) = buf.split_at_mut(src);
        crate::galois::region_xor(&tail[..len], &mut head[dst..dst + len]);
    }
}
