//! Cauchy Reed-Solomon coding matrices
//!
//! Cauchy matrices are always MDS. Their cost when encoded through a
//! bitmatrix is the number of ones in the expansion, which the "good"
//! variant reduces by rescaling rows and columns.

use crate::error::Result;
use crate::galois::Field;

use super::CodingMatrix;

/// `1 / (i ⊕ (m + j))` for row i, column j
pub fn original_coding_matrix(field: &Field, k: usize, m: usize) -> Result<CodingMatrix> {
    let mut matrix = CodingMatrix::new(m, k);
    for i in 0..m {
        for j in 0..k {
            matrix.set(i, j, field.inverse((i ^ (m + j)) as u32)?);
        }
    }
    Ok(matrix)
}

/// Number of ones in the w×w bitmatrix of element `e`
pub fn n_ones(field: &Field, e: u32) -> usize {
    let mut total = 0;
    let mut column = e;
    for _ in 0..field.w() {
        total += column.count_ones() as usize;
        column = field.multiply(column, 2);
    }
    total
}

/// Rescale a Cauchy matrix to lower its bitmatrix weight
///
/// Columns are divided so that row 0 becomes all ones; each later row is
/// then divided by whichever of its elements minimizes the row's weight.
pub fn improve_coding_matrix(field: &Field, matrix: &mut CodingMatrix) -> Result<()> {
    let (m, k) = (matrix.rows(), matrix.cols());

    for j in 0..k {
        let top = matrix.get(0, j);
        if top != 1 {
            let scale = field.inverse(top)?;
            for i in 0..m {
                matrix.set(i, j, field.multiply(matrix.get(i, j), scale));
            }
        }
    }

    for i in 1..m {
        let row_weight = |divisor: u32| -> usize {
            (0..k)
                .map(|x| n_ones(field, field.multiply(matrix.get(i, x), divisor)))
                .sum()
        };
        let mut best_weight = row_weight(1);
        let mut best_divisor = None;
        for j in 0..k {
            let e = matrix.get(i, j);
            if e != 1 {
                let divisor = field.inverse(e)?;
                let weight = row_weight(divisor);
                if weight < best_weight {
                    best_weight = weight;
                    best_divisor = Some(divisor);
                }
            }
        }
        if let Some(divisor) = best_divisor {
            for j in 0..k {
                matrix.set(i, j, field.multiply(matrix.get(i, j), divisor));
            }
        }
    }
    Ok(())
}

/// Cauchy matrix after [`improve_coding_matrix`]
pub fn good_coding_matrix(field: &Field, k: usize, m: usize) -> Result<CodingMatrix> {
    let mut matrix = original_coding_matrix(field, k, m)?;
    improve_coding_matrix(field, &mut matrix)?;
    Ok(matrix)
}
