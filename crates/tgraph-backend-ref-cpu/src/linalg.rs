//! Dense linear algebra kernels of the reference interpreter.

use tgraph_rs::backend::spec::{
    BackendError, BackendResult, SolveTriangularSpec, TriangularTranspose,
};

use crate::cpu::{CpuTensor, TensorData};

/// Vector/matrix product for operands of rank 1 or 2.
pub fn dot(lhs: &CpuTensor, rhs: &CpuTensor) -> BackendResult<CpuTensor> {
    let lhs_dims = lhs.dims()?;
    let rhs_dims = rhs.dims()?;
    let (m, k) = match lhs_dims.as_slice() {
        [k] => (1, *k),
        [m, k] => (*m, *k),
        _ => return Err(BackendError::execution("dot expects rank 1 or 2 operands")),
    };
    let (k_rhs, n) = match rhs_dims.as_slice() {
        [k] => (*k, 1),
        [k, n] => (*k, *n),
        _ => return Err(BackendError::execution("dot expects rank 1 or 2 operands")),
    };
    if k != k_rhs {
        return Err(BackendError::execution(format!(
            "dot contracting extents differ: {k} vs {k_rhs}"
        )));
    }

    let a = lhs.data.to_f64_vec();
    let b = rhs.data.to_f64_vec();
    let mut out = vec![0.0f64; m * n];
    for i in 0..m {
        for p in 0..k {
            let scale = a[i * k + p];
            for j in 0..n {
                out[i * n + j] += scale * b[p * n + j];
            }
        }
    }

    let out_dims = dot_output_dims(&lhs_dims, &rhs_dims);
    Ok(CpuTensor::new(
        lhs.dtype(),
        &out_dims,
        TensorData::from_f64(lhs.dtype(), out),
    ))
}

/// Output dims of `dot`: vector operands drop their axis.
pub fn dot_output_dims(lhs_dims: &[usize], rhs_dims: &[usize]) -> Vec<usize> {
    let mut dims = Vec::with_capacity(2);
    if lhs_dims.len() == 2 {
        dims.push(lhs_dims[0]);
    }
    if rhs_dims.len() == 2 {
        dims.push(rhs_dims[1]);
    }
    dims
}

/// Places 2-D blocks along the diagonal of a zero matrix.
pub fn block_diag(blocks: &[CpuTensor]) -> BackendResult<CpuTensor> {
    let first = blocks
        .first()
        .ok_or_else(|| BackendError::execution("block_diag needs at least one block"))?;
    let dtype = first.dtype();
    let mut shapes = Vec::with_capacity(blocks.len());
    for block in blocks {
        match block.dims()?.as_slice() {
            [rows, cols] => shapes.push((*rows, *cols)),
            other => {
                return Err(BackendError::execution(format!(
                    "block_diag blocks must be matrices, got dims {other:?}"
                )))
            }
        }
    }
    let rows: usize = shapes.iter().map(|(r, _)| r).sum();
    let cols: usize = shapes.iter().map(|(_, c)| c).sum();

    let data = if dtype.is_float() {
        let values: Vec<Vec<f64>> = blocks.iter().map(|b| b.data.to_f64_vec()).collect();
        TensorData::from_f64(dtype, place_blocks(&values, &shapes, rows, cols))
    } else {
        let values: Vec<Vec<i64>> = blocks.iter().map(|b| b.data.to_i64_vec()).collect();
        TensorData::from_i64(dtype, place_blocks(&values, &shapes, rows, cols))
    };
    Ok(CpuTensor::new(dtype, &[rows, cols], data))
}

fn place_blocks<T: Copy + Default>(
    blocks: &[Vec<T>],
    shapes: &[(usize, usize)],
    rows: usize,
    cols: usize,
) -> Vec<T> {
    let mut out = vec![T::default(); rows * cols];
    let (mut row0, mut col0) = (0, 0);
    for (values, &(r, c)) in blocks.iter().zip(shapes) {
        for i in 0..r {
            let dst = (row0 + i) * cols + col0;
            out[dst..dst + c].copy_from_slice(&values[i * c..(i + 1) * c]);
        }
        row0 += r;
        col0 += c;
    }
    out
}

/// Solves `op(A) x = b` by substitution, reading only the selected triangle of `A`.
pub fn solve_triangular(
    a: &CpuTensor,
    b: &CpuTensor,
    spec: &SolveTriangularSpec,
) -> BackendResult<CpuTensor> {
    let a_dims = a.dims()?;
    let b_dims = b.dims()?;
    let n = match a_dims.as_slice() {
        [rows, cols] if rows == cols => *rows,
        _ => {
            return Err(BackendError::execution(format!(
                "expected square matrix, got dims {a_dims:?}"
            )))
        }
    };
    let nrhs = match b_dims.as_slice() {
        [rows] if *rows == n => 1,
        [rows, cols] if *rows == n => *cols,
        _ => {
            return Err(BackendError::execution(format!(
                "shapes of a {a_dims:?} and b {b_dims:?} are incompatible"
            )))
        }
    };

    let a_values = a.data.to_f64_vec();
    let mut x = b.data.to_f64_vec();
    solve_in_place(&a_values, n, &mut x, nrhs, spec)?;
    Ok(CpuTensor::new(
        b.dtype(),
        &b_dims,
        TensorData::from_f64(b.dtype(), x),
    ))
}

/// Row-major substitution over `x` (`n x nrhs`).
pub fn solve_in_place(
    a: &[f64],
    n: usize,
    x: &mut [f64],
    nrhs: usize,
    spec: &SolveTriangularSpec,
) -> BackendResult<()> {
    let transposed = !matches!(spec.trans, TriangularTranspose::None);
    let coeff = |i: usize, j: usize| {
        if transposed {
            a[j * n + i]
        } else {
            a[i * n + j]
        }
    };
    // Forward substitution for an effectively lower system, backward otherwise.
    let forward = spec.lower != transposed;
    for step in 0..n {
        let i = if forward { step } else { n - 1 - step };
        let diag = if spec.unit_diagonal { 1.0 } else { coeff(i, i) };
        if diag == 0.0 {
            return Err(BackendError::execution(format!(
                "singular matrix: resolution failed at diagonal {i}"
            )));
        }
        let solved = if forward { 0..i } else { i + 1..n };
        for col in 0..nrhs {
            let mut acc = x[i * nrhs + col];
            for j in solved.clone() {
                acc -= coeff(i, j) * x[j * nrhs + col];
            }
            x[i * nrhs + col] = acc / diag;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use approx::assert_abs_diff_eq;

    use super::*;
    use tgraph_rs::backend::spec::DType;

    fn matrix(dims: &[usize], values: &[f64]) -> CpuTensor {
        CpuTensor::new(DType::F64, dims, TensorData::F64(Arc::from(values)))
    }

    #[test]
    fn upper_transpose_reads_upper_triangle() {
        // Lower triangle holds garbage that must be ignored.
        let a = matrix(&[2, 2], &[2.0, 1.0, 99.0, 4.0]);
        let b = matrix(&[2], &[2.0, 9.0]);
        let spec = SolveTriangularSpec {
            lower: false,
            trans: TriangularTranspose::Transpose,
            ..SolveTriangularSpec::default()
        };
        let x = solve_triangular(&a, &b, &spec).unwrap().data.to_f64_vec();
        // A^T = [[2, 0], [1, 4]]
        assert_abs_diff_eq!(x[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(x[1], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn zero_diagonal_is_singular() {
        let a = matrix(&[2, 2], &[0.0, 0.0, 1.0, 1.0]);
        let b = matrix(&[2], &[1.0, 1.0]);
        let err = solve_triangular(&a, &b, &SolveTriangularSpec::default()).unwrap_err();
        assert!(err.to_string().contains("singular"));
    }

    #[test]
    fn block_diag_offsets_blocks() {
        let a = matrix(&[1, 2], &[1.0, 2.0]);
        let b = matrix(&[2, 1], &[3.0, 4.0]);
        let out = block_diag(&[a, b]).unwrap();
        assert_eq!(out.dims().unwrap(), vec![3, 3]);
        assert_eq!(
            out.data.to_f64_vec(),
            vec![1.0, 2.0, 0.0, 0.0, 0.0, 3.0, 0.0, 0.0, 4.0]
        );
    }
}
