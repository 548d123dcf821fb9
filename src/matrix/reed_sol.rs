//! Reed-Solomon coding matrices
//!
//! The Vandermonde construction starts from an extended Vandermonde matrix
//! and uses column operations (which preserve the MDS property) to turn the
//! top k×k block into the identity. The remaining m rows are the coding
//! matrix; the first of them is all ones, as is its first column.

use crate::error::{Error, Result};
use crate::galois::{region_xor, Field};

use super::CodingMatrix;

/// Extended Vandermonde matrix: rows `[1,0..0]`, `[1, i, i^2, ...]` for
/// 0 < i < rows-1, and `[0..0,1]`
pub fn extended_vandermonde_matrix(field: &Field, rows: usize, cols: usize) -> CodingMatrix {
    let mut vdm = CodingMatrix::new(rows, cols);
    vdm.set(0, 0, 1);
    if rows == 1 {
        return vdm;
    }
    vdm.set(rows - 1, cols - 1, 1);
    for i in 1..rows - 1 {
        let mut power = 1;
        for j in 0..cols {
            vdm.set(i, j, power);
            power = field.multiply(power, i as u32);
        }
    }
    vdm
}

/// Systematic distribution matrix `[I_cols; M]` with `rows` rows
///
/// # Errors
/// Returns `InvalidConfig` if `cols >= rows` and `SingularMatrix` if no
/// pivot can be found, which happens only when rows exceed the field size.
pub fn big_vandermonde_distribution_matrix(
    field: &Field,
    rows: usize,
    cols: usize,
) -> Result<CodingMatrix> {
    if cols >= rows {
        return Err(Error::InvalidConfig(format!(
            "distribution matrix needs more rows ({}) than columns ({})",
            rows, cols
        )));
    }
    let mut dist = extended_vandermonde_matrix(field, rows, cols);

    for i in 1..cols {
        let pivot = (i..rows).find(|&j| dist.get(j, i) != 0).ok_or_else(|| {
            Error::SingularMatrix(format!(
                "no pivot for column {} of the {}x{} Vandermonde matrix",
                i, rows, cols
            ))
        })?;
        dist.swap_rows(i, pivot);

        let diagonal = dist.get(i, i);
        if diagonal != 1 {
            let scale = field.inverse(diagonal)?;
            for r in 0..rows {
                dist.set(r, i, field.multiply(scale, dist.get(r, i)));
            }
        }

        // Clear the rest of row i: col_j -= e * col_i
        for j in 0..cols {
            let e = dist.get(i, j);
            if j != i && e != 0 {
                for r in 0..rows {
                    let v = dist.get(r, j) ^ field.multiply(e, dist.get(r, i));
                    dist.set(r, j, v);
                }
            }
        }
    }

    // Row `cols` all ones: scale each column of the coding part
    for j in 0..cols {
        let e = dist.get(cols, j);
        if e != 1 {
            let scale = field.inverse(e)?;
            for r in cols..rows {
                dist.set(r, j, field.multiply(scale, dist.get(r, j)));
            }
        }
    }

    // First column all ones: scale each later row
    for r in cols + 1..rows {
        let e = dist.get(r, 0);
        if e != 1 {
            let scale = field.inverse(e)?;
            for j in 0..cols {
                dist.set(r, j, field.multiply(dist.get(r, j), scale));
            }
        }
    }

    Ok(dist)
}

/// m×k Vandermonde Reed-Solomon coding matrix
pub fn vandermonde_coding_matrix(field: &Field, k: usize, m: usize) -> Result<CodingMatrix> {
    let dist = big_vandermonde_distribution_matrix(field, k + m, k)?;
    Ok(dist.select_rows(&(k..k + m).collect::<Vec<_>>()))
}

/// RAID-6 coding matrix: P = sum of data, Q = sum of 2^j · D_j
pub fn r6_coding_matrix(field: &Field, k: usize) -> CodingMatrix {
    let mut matrix = CodingMatrix::new(2, k);
    let mut power = 1;
    for j in 0..k {
        matrix.set(0, j, 1);
        matrix.set(1, j, power);
        power = field.multiply(power, 2);
    }
    matrix
}

/// RAID-6 encode of one plane without general multiplies
///
/// `data` holds k blocks and `coding` two blocks, each `block_size` bytes.
/// Q is evaluated by Horner's rule so only multiplications by two occur.
pub fn r6_encode(field: &Field, data: &[u8], coding: &mut [u8], block_size: usize) {
    let k = data.len() / block_size;
    assert_eq!(data.len(), k * block_size, "data is not a whole number of blocks");
    assert_eq!(coding.len(), 2 * block_size, "RAID-6 needs exactly two coding blocks");

    let block = |i: usize| &data[i * block_size..(i + 1) * block_size];
    let (p, q) = coding.split_at_mut(block_size);

    p.copy_from_slice(block(0));
    for i in 1..k {
        region_xor(block(i), p);
    }

    q.copy_from_slice(block(k - 1));
    let mut scratch = vec![0u8; block_size];
    for i in (0..k - 1).rev() {
        field.region_multiply(q, &mut scratch, 2, false);
        region_xor(block(i), &mut scratch);
        q.copy_from_slice(&scratch);
    }
}
