//! Gauss-Jordan inversion over GF(2^w) and GF(2)
//!
//! The field is unordered, so pivoting only has to skip zero entries.

use crate::error::{Error, Result};
use crate::galois::Field;
use crate::matrix::{BitMatrix, CodingMatrix};

/// Invert a square matrix over GF(2^w)
///
/// # Errors
/// Returns `SingularMatrix` if a column has no nonzero pivot.
pub fn invert_matrix(field: &Field, matrix: &CodingMatrix) -> Result<CodingMatrix> {
    let n = matrix.rows();
    assert_eq!(n, matrix.cols(), "only square matrices can be inverted");
    let mut mat = matrix.clone();
    let mut inv = CodingMatrix::identity(n);

    // Forward elimination to upper triangular with unit diagonal
    for i in 0..n {
        if mat.get(i, i) == 0 {
            let pivot = (i + 1..n)
                .find(|&j| mat.get(j, i) != 0)
                .ok_or_else(|| Error::SingularMatrix(format!("no pivot in column {}", i)))?;
            mat.swap_rows(i, pivot);
            inv.swap_rows(i, pivot);
        }

        let diagonal = mat.get(i, i);
        if diagonal != 1 {
            let scale = field.inverse(diagonal)?;
            for c in 0..n {
                mat.set(i, c, field.multiply(mat.get(i, c), scale));
                inv.set(i, c, field.multiply(inv.get(i, c), scale));
            }
        }

        for j in i + 1..n {
            let factor = mat.get(j, i);
            if factor != 0 {
                eliminate(field, &mut mat, &mut inv, i, j, factor, n);
            }
        }
    }

    // Back substitution
    for i in (0..n).rev() {
        for j in 0..i {
            let factor = mat.get(j, i);
            if factor != 0 {
                eliminate(field, &mut mat, &mut inv, i, j, factor, n);
            }
        }
    }

    Ok(inv)
}

/// row_j ^= factor * row_i in both matrices
fn eliminate(
    field: &Field,
    mat: &mut CodingMatrix,
    inv: &mut CodingMatrix,
    i: usize,
    j: usize,
    factor: u32,
    n: usize,
) {
    for c in 0..n {
        mat.set(j, c, mat.get(j, c) ^ field.multiply(factor, mat.get(i, c)));
        inv.set(j, c, inv.get(j, c) ^ field.multiply(factor, inv.get(i, c)));
    }
}

/// Invert a square bitmatrix over GF(2)
///
/// # Errors
/// Returns `SingularMatrix` if a column has no pivot.
pub fn invert_bitmatrix(matrix: &BitMatrix) -> Result<BitMatrix> {
    let n = matrix.rows();
    assert_eq!(n, matrix.cols(), "only square matrices can be inverted");
    let mut mat = matrix.clone();
    let mut inv = BitMatrix::identity(n);

    for i in 0..n {
        if !mat.get(i, i) {
            let pivot = (i + 1..n)
                .find(|&j| mat.get(j, i))
                .ok_or_else(|| Error::SingularMatrix(format!("no pivot in bit column {}", i)))?;
            mat.swap_rows(i, pivot);
            inv.swap_rows(i, pivot);
        }
        for j in i + 1..n {
            if mat.get(j, i) {
                mat.xor_row_into(i, j);
                inv.xor_row_into(i, j);
            }
        }
    }

    for i in (0..n).rev() {
        for j in 0..i {
            if mat.get(j, i) {
                mat.xor_row_into(i, j);
                inv.xor_row_into(i, j);
            }
        }
    }

    Ok(inv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::galois::Strategy;

    fn multiply(field: &Field, a: &CodingMatrix, b: &CodingMatrix) -> CodingMatrix {
        let n = a.rows();
        let mut out = CodingMatrix::new(n, b.cols());
        for i in 0..n {
            for j in 0..b.cols() {
                let v = (0..a.cols()).fold(0, |acc, x| acc ^ field.multiply(a.get(i, x), b.get(x, j)));
                out.set(i, j, v);
            }
        }
        out
    }

    #[test]
    fn test_invert_matrix() {
        let field = Field::new(8, Strategy::Default).unwrap();
        // Needs a row swap: the (0, 0) entry is zero
        let matrix = CodingMatrix::from_vec(3, 3, vec![0, 3, 7, 1, 1, 1, 5, 0, 9]);
        let inv = invert_matrix(&field, &matrix).unwrap();
        assert_eq!(multiply(&field, &matrix, &inv), CodingMatrix::identity(3));
        assert_eq!(multiply(&field, &inv, &matrix), CodingMatrix::identity(3));
    }

    #[test]
    fn test_singular_matrix() {
        let field = Field::new(8, Strategy::Default).unwrap();
        // Row 2 = 2 * row 0
        let matrix = CodingMatrix::from_vec(
            3,
            3,
            vec![1, 2, 3, 4, 5, 6, 2, field.multiply(2, 2), field.multiply(2, 3)],
        );
        assert!(matches!(
            invert_matrix(&field, &matrix),
            Err(Error::SingularMatrix(_))
        ));
    }

    #[test]
    fn test_invert_bitmatrix() {
        let mut matrix = BitMatrix::new(3, 3);
        for (r, c) in [(0, 1), (1, 0), (1, 2), (2, 2), (2, 1)] {
            matrix.set(r, c, true);
        }
        let inv = invert_bitmatrix(&matrix).unwrap();
        for i in 0..3 {
            for j in 0..3 {
                let bit = (0..3).fold(false, |acc, x| acc ^ (matrix.get(i, x) & inv.get(x, j)));
                assert_eq!(bit, i == j);
            }
        }
    }

    #[test]
    fn test_singular_bitmatrix() {
        let mut matrix = BitMatrix::identity(3);
        matrix.set(2, 2, false);
        assert!(invert_bitmatrix(&matrix).is_err());
    }
}
