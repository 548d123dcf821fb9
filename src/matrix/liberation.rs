//! Minimum-density RAID-6 bit-matrices
//!
//! All three codes have the shape `[I I ... I; X_0 X_1 ... X_{k-1}]` with w×w
//! blocks. The first coding unit is plain parity; the second mixes each data
//! unit through a sparse permutation-like block.

use super::BitMatrix;

/// Liber8tion second-row blocks for w = 8 (Plank's table)
///
/// Block j maps output row r to data column `LIBER8TION_PERMS[j][r]`;
/// blocks after the first carry one extra `(row, column)` bit.
const LIBER8TION_PERMS: [[u8; 8]; 8] = [
    [0, 1, 2, 3, 4, 5, 6, 7],
    [7, 3, 0, 2, 6, 1, 5, 4],
    [6, 2, 4, 0, 7, 3, 1, 5],
    [2, 5, 7, 6, 0, 3, 4, 1],
    [5, 6, 1, 7, 2, 4, 3, 0],
    [1, 2, 3, 4, 5, 6, 7, 0],
    [3, 0, 6, 5, 1, 7, 4, 2],
    [4, 7, 1, 5, 3, 2, 0, 6],
];

const LIBER8TION_EXTRA: [Option<(u8, u8)>; 8] = [
    None,
    Some((4, 7)),
    Some((1, 3)),
    Some((5, 4)),
    Some((2, 0)),
    Some((7, 2)),
    Some((6, 5)),
    Some((3, 1)),
];

fn with_parity_row(k: usize, w: usize) -> BitMatrix {
    let mut matrix = BitMatrix::new(2 * w, k * w);
    for i in 0..w {
        for j in 0..k {
            matrix.set(i, j * w + i, true);
        }
    }
    matrix
}

/// Liberation code bitmatrix; requires k <= w and w prime
pub fn liberation_bitmatrix(k: usize, w: usize) -> BitMatrix {
    assert!(k <= w, "liberation needs k <= w");
    let mut matrix = with_parity_row(k, w);

    for j in 0..k {
        for i in 0..w {
            matrix.set(w + i, j * w + (j + i) % w, true);
        }
        if j > 0 {
            let i = (j * ((w - 1) / 2)) % w;
            matrix.set(w + i, j * w + (i + j - 1) % w, true);
        }
    }
    matrix
}

/// Blaum-Roth code bitmatrix; requires k <= w and w + 1 prime
pub fn blaum_roth_bitmatrix(k: usize, w: usize) -> BitMatrix {
    assert!(k <= w, "blaum-roth needs k <= w");
    let mut matrix = with_parity_row(k, w);
    let p = w + 1;

    for l in 0..w {
        matrix.set(w + l, l, true);
    }
    for i in 1..k {
        let col = |c: usize| i * w + c;
        for l in 1..=w {
            let row = w + l - 1;
            if l != p - i {
                let mut c = l + i;
                if c >= p {
                    c -= p;
                }
                matrix.set(row, col(c - 1), true);
            } else {
                matrix.set(row, col(i - 1), true);
                let c = if i % 2 == 0 { i / 2 } else { p / 2 + 1 + i / 2 };
                matrix.set(row, col(c - 1), true);
            }
        }
    }
    matrix
}

/// Liber8tion code bitmatrix for k <= 8 data units
pub fn liber8tion_bitmatrix(k: usize) -> BitMatrix {
    const W: usize = 8;
    assert!(k <= W, "liber8tion needs k <= 8");
    let mut matrix = with_parity_row(k, W);

    for (j, perm) in LIBER8TION_PERMS.iter().take(k).enumerate() {
        for (row, &col) in perm.iter().enumerate() {
            matrix.set(W + row, j * W + col as usize, true);
        }
        if let Some((row, col)) = LIBER8TION_EXTRA[j] {
            matrix.set(W + row as usize, j * W + col as usize, true);
        }
    }
    matrix
}
