//! Binary matrices over GF(2)

use crate::galois::Field;

use super::CodingMatrix;

/// Row-major matrix of bits, one byte per entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitMatrix {
    rows: usize,
    cols: usize,
    bits: Vec<u8>,
}

impl BitMatrix {
    /// All-zero matrix
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            bits: vec![0; rows * cols],
        }
    }

    /// Identity matrix of size `n`
    pub fn identity(n: usize) -> Self {
        let mut matrix = Self::new(n, n);
        for i in 0..n {
            matrix.set(i, i, true);
        }
        matrix
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, row: usize, col: usize) -> bool {
        assert!(row < self.rows && col < self.cols, "bit ({}, {}) out of range", row, col);
        self.bits[row * self.cols + col] != 0
    }

    pub fn set(&mut self, row: usize, col: usize, value: bool) {
        assert!(row < self.rows && col < self.cols, "bit ({}, {}) out of range", row, col);
        self.bits[row * self.cols + col] = value as u8;
    }

    /// One row as a slice of 0/1 bytes
    pub fn row(&self, row: usize) -> &[u8] {
        &self.bits[row * self.cols..(row + 1) * self.cols]
    }

    pub(crate) fn row_mut(&mut self, row: usize) -> &mut [u8] {
        &mut self.bits[row * self.cols..(row + 1) * self.cols]
    }

    /// Number of set bits
    pub fn ones(&self) -> usize {
        self.bits.iter().filter(|&&b| b != 0).count()
    }

    /// Matrix built from selected rows of `self`, in the given order
    pub fn select_rows(&self, rows: &[usize]) -> BitMatrix {
        let mut out = BitMatrix::new(rows.len(), self.cols);
        for (i, &r) in rows.iter().enumerate() {
            out.row_mut(i).copy_from_slice(self.row(r));
        }
        out
    }

    /// Swap two rows in place
    pub(crate) fn swap_rows(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        let cols = self.cols;
        let (lo, hi) = (a.min(b), a.max(b));
        let (head, tail) = self.bits.split_at_mut(hi * cols);
        head[lo * cols..(lo + 1) * cols].swap_with_slice(&mut tail[..cols]);
    }

    /// XOR row `src` into row `dst`
    pub(crate) fn xor_row_into(&mut self, src: usize, dst: usize) {
        assert_ne!(src, dst);
        let cols = self.cols;
        if src < dst {
            let (head, tail) = self.bits.split_at_mut(dst * cols);
            let from = &head[src * cols..(src + 1) * cols];
            tail[..cols].iter_mut().zip(from).for_each(|(d, s)| *d ^= s);
        } else {
            let (head, tail) = self.bits.split_at_mut(src * cols);
            let to = &mut head[dst * cols..(dst + 1) * cols];
            to.iter_mut().zip(&tail[..cols]).for_each(|(d, s)| *d ^= s);
        }
    }
}

/// Expand an r×c matrix over GF(2^w) into its (r·w)×(c·w) binary form
///
/// Block (i, j) is the w×w matrix of multiplication by element (i, j):
/// column x holds the bits of `element · 2^x`.
pub fn matrix_to_bitmatrix(field: &Field, matrix: &CodingMatrix) -> BitMatrix {
    let w = field.w() as usize;
    let mut bits = BitMatrix::new(matrix.rows() * w, matrix.cols() * w);

    for i in 0..matrix.rows() {
        for j in 0..matrix.cols() {
            let mut element = matrix.get(i, j);
            for x in 0..w {
                for l in 0..w {
                    if (element >> l) & 1 == 1 {
                        bits.set(i * w + l, j * w + x, true);
                    }
                }
                element = field.multiply(element, 2);
            }
        }
    }
    bits
}
