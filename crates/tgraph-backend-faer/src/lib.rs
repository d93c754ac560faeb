//! faer-accelerated backend.
//!
//! `dot` and `solve_triangular` run through faer kernels; every other operation (and any
//! operand layout these kernels decline) is evaluated by the reference interpreter.

use faer::linalg::matmul::matmul;
use faer::linalg::triangular_solve::{
    solve_lower_triangular_in_place, solve_unit_lower_triangular_in_place,
    solve_unit_upper_triangular_in_place, solve_upper_triangular_in_place,
};
use faer::mat::{MatMut, MatRef};
use faer::{Accum, Par};
use tgraph_backend_ref_cpu::linalg::dot_output_dims;
use tgraph_backend_ref_cpu::{CpuKernelInterceptor, CpuTensor, CpuValue, GenericCpuBackend, TensorData};
use tgraph_rs::backend::spec::{
    BackendError, BackendResult, HostValue, Instruction, Operation, PortableBackend,
    SolveTriangularSpec, TriangularTranspose,
};

fn faer_parallelism() -> Par {
    let par = faer::get_global_parallelism();
    if par.degree() == 1 {
        Par::Seq
    } else {
        par
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FaerCpuInterceptor;

impl FaerCpuInterceptor {
    pub fn new() -> Self {
        Self
    }
}

impl CpuKernelInterceptor for FaerCpuInterceptor {
    fn backend_name(&self) -> &str {
        "faer"
    }

    fn supports(&self, op: &Operation) -> bool {
        matches!(op, Operation::Dot | Operation::SolveTriangular(_))
    }

    fn try_execute(
        &self,
        instruction: &Instruction,
        inputs: &[CpuValue],
    ) -> Option<BackendResult<CpuValue>> {
        let (lhs, rhs) = match inputs {
            [CpuValue::Tensor(lhs), CpuValue::Tensor(rhs)] => (lhs, rhs),
            _ => return None,
        };
        if !lhs.dtype().is_float() || lhs.dtype() != rhs.dtype() {
            return None;
        }
        let result = match &instruction.op {
            Operation::Dot => try_dot(lhs, rhs),
            Operation::SolveTriangular(spec) => try_solve_triangular(lhs, rhs, spec),
            _ => return None,
        };
        Some(result.map(CpuValue::Tensor))
    }
}

type FaerInnerBackend = GenericCpuBackend<FaerCpuInterceptor>;

/// CPU backend whose linear algebra runs on faer.
#[derive(Clone)]
pub struct FaerPortableBackend {
    inner: FaerInnerBackend,
}

impl Default for FaerPortableBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FaerPortableBackend {
    pub fn new() -> Self {
        FaerPortableBackend {
            inner: FaerInnerBackend::with_interceptor(FaerCpuInterceptor),
        }
    }
}

impl PortableBackend for FaerPortableBackend {
    type TensorHandle = CpuValue;

    fn backend_name(&self) -> &str {
        "faer"
    }

    fn supports(&self, op: &Operation) -> bool {
        self.inner.interceptor().supports(op)
    }

    fn materialize(&self, value: HostValue) -> BackendResult<Self::TensorHandle> {
        self.inner.materialize(value)
    }

    fn to_host(&self, handle: &Self::TensorHandle) -> BackendResult<HostValue> {
        self.inner.to_host(handle)
    }

    fn execute_instruction(
        &self,
        instruction: &Instruction,
        inputs: &[Self::TensorHandle],
    ) -> BackendResult<Self::TensorHandle> {
        if !self.supports(&instruction.op) {
            log::trace!(
                target: "tgraph::backend",
                "faer: {} falls back to the interpreter",
                instruction.op.name()
            );
        }
        self.inner.execute_instruction(instruction, inputs)
    }
}

fn try_dot(lhs: &CpuTensor, rhs: &CpuTensor) -> BackendResult<CpuTensor> {
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
    let out_dims = dot_output_dims(&lhs_dims, &rhs_dims);
    let mut row_major = vec![0.0f64; m * n];
    if m > 0 && n > 0 && k > 0 {
        let a = lhs.data.to_f64_vec();
        let b = rhs.data.to_f64_vec();
        let lhs_view = MatRef::from_row_major_slice(a.as_slice(), m, k);
        let rhs_view = MatRef::from_row_major_slice(b.as_slice(), k, n);
        // C^T = B^T * A^T into a column-major (n x m) buffer is row-major C.
        let mut out_view = MatMut::from_column_major_slice_mut(row_major.as_mut_slice(), n, m);
        matmul(
            &mut out_view,
            Accum::Replace,
            rhs_view.transpose(),
            lhs_view.transpose(),
            1.0f64,
            faer_parallelism(),
        );
    }
    Ok(CpuTensor::new(
        lhs.dtype(),
        &out_dims,
        TensorData::from_f64(lhs.dtype(), row_major),
    ))
}

fn try_solve_triangular(
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

    let coeffs = a.data.to_f64_vec();
    if !spec.unit_diagonal {
        if let Some(i) = (0..n).find(|&i| coeffs[i * n + i] == 0.0) {
            return Err(BackendError::execution(format!(
                "singular matrix: resolution failed at diagonal {i}"
            )));
        }
    }

    let mut x = b.data.to_f64_vec();
    if n > 0 && nrhs > 0 {
        let a_view = MatRef::from_row_major_slice(coeffs.as_slice(), n, n);
        let transposed = !matches!(spec.trans, TriangularTranspose::None);
        let op_a = if transposed { a_view.transpose() } else { a_view };
        let rhs = MatMut::from_row_major_slice_mut(x.as_mut_slice(), n, nrhs);
        let par = faer_parallelism();
        match (spec.lower != transposed, spec.unit_diagonal) {
            (true, false) => solve_lower_triangular_in_place(op_a, rhs, par),
            (true, true) => solve_unit_lower_triangular_in_place(op_a, rhs, par),
            (false, false) => solve_upper_triangular_in_place(op_a, rhs, par),
            (false, true) => solve_unit_upper_triangular_in_place(op_a, rhs, par),
        }
    }
    Ok(CpuTensor::new(
        b.dtype(),
        &b_dims,
        TensorData::from_f64(b.dtype(), x),
    ))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use approx::assert_abs_diff_eq;
    use tgraph_rs::backend::spec::DType;

    use super::*;

    fn matrix(dims: &[usize], values: &[f64]) -> CpuTensor {
        CpuTensor::new(DType::F64, dims, TensorData::F64(Arc::from(values)))
    }

    #[test]
    fn faer_solve_matches_reference_substitution() {
        let a = matrix(&[3, 3], &[2.0, 0.0, 0.0, 1.0, 3.0, 0.0, -1.0, 0.5, 4.0]);
        let b = matrix(&[3, 2], &[2.0, 4.0, 7.0, 5.0, 3.5, 1.0]);
        for trans in [TriangularTranspose::None, TriangularTranspose::Transpose] {
            let spec = SolveTriangularSpec {
                lower: true,
                trans,
                ..SolveTriangularSpec::default()
            };
            let fast = try_solve_triangular(&a, &b, &spec).unwrap();
            let reference = tgraph_backend_ref_cpu::linalg::solve_triangular(&a, &b, &spec).unwrap();
            for (x, y) in fast.data.to_f64_vec().iter().zip(reference.data.to_f64_vec()) {
                assert_abs_diff_eq!(*x, y, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn faer_dot_handles_vector_operands() {
        let m = matrix(&[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let v = matrix(&[3], &[1.0, 0.0, -1.0]);
        let out = try_dot(&m, &v).unwrap();
        assert_eq!(out.dims().unwrap(), vec![2]);
        assert_eq!(out.data.to_f64_vec(), vec![-2.0, -2.0]);
    }
}
