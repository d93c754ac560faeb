use std::sync::Arc;

use tgraph_rs::backend::infer::reduce_axes;
use tgraph_rs::backend::ir_utils::tensor_spec_static;
use tgraph_rs::backend::shape_helpers::{
    contiguous_strides, normalize_axis, normalize_index, slice_indices, slice_len,
};
use tgraph_rs::backend::spec::{
    AllocSpec, ArgMaxSpec, BackendError, BackendResult, DType, Dimension, DimShuffleSpec,
    ElementwiseBinaryOp, ElementwiseUnaryOp, ExtentSource, HostValue, IndexEntry, IndexScalar,
    Instruction, MaxAndArgmaxSpec, Operation, PortableBackend, ReduceKind, ReduceSpec,
    ReshapeDim, ReshapeSpec, Shape, ShuffleAxis, SliceSpec, SubtensorSpec, TensorLiteral,
    TensorSpec,
};

use crate::{linalg, list};

/// Dense row-major tensor. Runtime tensors always carry fully static shapes.
#[derive(Debug, Clone, PartialEq)]
pub struct CpuTensor {
    pub spec: TensorSpec,
    pub data: TensorData,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    F32(Arc<[f32]>),
    F64(Arc<[f64]>),
    Si32(Arc<[i32]>),
    Si64(Arc<[i64]>),
    Bool(Arc<[u8]>),
}

macro_rules! map_data {
    ($data:expr, $values:ident => $body:expr) => {
        match $data {
            TensorData::F32($values) => TensorData::F32(Arc::from($body)),
            TensorData::F64($values) => TensorData::F64(Arc::from($body)),
            TensorData::Si32($values) => TensorData::Si32(Arc::from($body)),
            TensorData::Si64($values) => TensorData::Si64(Arc::from($body)),
            TensorData::Bool($values) => TensorData::Bool(Arc::from($body)),
        }
    };
}

impl TensorData {
    pub fn len(&self) -> usize {
        match self {
            TensorData::F32(values) => values.len(),
            TensorData::F64(values) => values.len(),
            TensorData::Si32(values) => values.len(),
            TensorData::Si64(values) => values.len(),
            TensorData::Bool(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_f64_vec(&self) -> Vec<f64> {
        match self {
            TensorData::F32(values) => values.iter().map(|v| f64::from(*v)).collect(),
            TensorData::F64(values) => values.to_vec(),
            TensorData::Si32(values) => values.iter().map(|v| f64::from(*v)).collect(),
            TensorData::Si64(values) => values.iter().map(|v| *v as f64).collect(),
            TensorData::Bool(values) => values.iter().map(|v| f64::from(u8::from(*v != 0))).collect(),
        }
    }

    pub fn to_i64_vec(&self) -> Vec<i64> {
        match self {
            TensorData::Si32(values) => values.iter().map(|v| i64::from(*v)).collect(),
            TensorData::Si64(values) => values.to_vec(),
            TensorData::Bool(values) => values.iter().map(|v| i64::from(*v != 0)).collect(),
            TensorData::F32(_) | TensorData::F64(_) => {
                self.to_f64_vec().into_iter().map(|v| v as i64).collect()
            }
        }
    }

    /// Builds storage of `dtype` from `f64` values, casting as needed.
    pub fn from_f64(dtype: DType, values: Vec<f64>) -> Self {
        match dtype {
            DType::F64 => TensorData::F64(Arc::from(values)),
            DType::F32 => TensorData::F32(values.into_iter().map(|v| v as f32).collect()),
            DType::Si32 => TensorData::Si32(values.into_iter().map(|v| v as i32).collect()),
            DType::Si64 => TensorData::Si64(values.into_iter().map(|v| v as i64).collect()),
            DType::I1 => TensorData::Bool(values.into_iter().map(|v| u8::from(v != 0.0)).collect()),
        }
    }

    pub fn from_i64(dtype: DType, values: Vec<i64>) -> Self {
        match dtype {
            DType::Si64 => TensorData::Si64(Arc::from(values)),
            DType::Si32 => TensorData::Si32(values.into_iter().map(|v| v as i32).collect()),
            DType::I1 => TensorData::Bool(values.into_iter().map(|v| u8::from(v != 0)).collect()),
            DType::F32 | DType::F64 => {
                Self::from_f64(dtype, values.into_iter().map(|v| v as f64).collect())
            }
        }
    }

    /// Copies the elements at `indices`, preserving the storage type exactly.
    pub fn gather(&self, indices: &[usize]) -> Self {
        map_data!(self, values => indices.iter().map(|&idx| values[idx]).collect::<Vec<_>>())
    }
}

impl CpuTensor {
    pub fn new(dtype: DType, dims: &[usize], data: TensorData) -> Self {
        Self {
            spec: tensor_spec_static(dtype, dims),
            data,
        }
    }

    pub fn scalar_i64(value: i64) -> Self {
        Self::new(DType::Si64, &[], TensorData::Si64(Arc::from(vec![value])))
    }

    pub fn dtype(&self) -> DType {
        self.spec.dtype
    }

    pub fn dims(&self) -> BackendResult<Vec<usize>> {
        static_dims(&self.spec.shape)
    }

    pub fn from_literal(literal: &TensorLiteral) -> BackendResult<Self> {
        let dims = static_dims(&literal.spec.shape)?;
        let count: usize = dims.iter().product();
        if literal.bytes.len() != count * literal.spec.dtype.size_in_bytes() {
            return Err(BackendError::execution(format!(
                "literal holds {} bytes, expected {count} {:?} elements",
                literal.bytes.len(),
                literal.spec.dtype
            )));
        }
        let data = match literal.spec.dtype {
            DType::F32 => TensorData::F32(
                literal
                    .bytes
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ),
            DType::F64 => TensorData::F64(literal.to_f64_vec().into()),
            DType::Si32 => TensorData::Si32(
                literal
                    .bytes
                    .chunks_exact(4)
                    .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ),
            DType::Si64 => TensorData::Si64(literal.to_i64_vec()?.into()),
            DType::I1 => TensorData::Bool(Arc::clone(&literal.bytes)),
        };
        Ok(Self::new(literal.spec.dtype, &dims, data))
    }

    pub fn to_literal(&self) -> TensorLiteral {
        let bytes: Vec<u8> = match &self.data {
            TensorData::F32(values) => values.iter().flat_map(|v| v.to_le_bytes()).collect(),
            TensorData::F64(values) => values.iter().flat_map(|v| v.to_le_bytes()).collect(),
            TensorData::Si32(values) => values.iter().flat_map(|v| v.to_le_bytes()).collect(),
            TensorData::Si64(values) => values.iter().flat_map(|v| v.to_le_bytes()).collect(),
            TensorData::Bool(values) => values.to_vec(),
        };
        TensorLiteral::new(self.spec.clone(), Arc::from(bytes))
    }

    /// Reads an integer rank-0 tensor.
    pub fn to_index(&self) -> BackendResult<i64> {
        if !self.dtype().is_integer() || self.data.len() != 1 {
            return Err(BackendError::execution(format!(
                "expected an integer scalar, got {:?} with {} elements",
                self.dtype(),
                self.data.len()
            )));
        }
        Ok(self.data.to_i64_vec()[0])
    }

    fn with_data(&self, dims: &[usize], data: TensorData) -> Self {
        Self::new(self.dtype(), dims, data)
    }
}

/// Handle type of the CPU backends.
#[derive(Debug, Clone, PartialEq)]
pub enum CpuValue {
    Tensor(CpuTensor),
    List(Vec<CpuTensor>),
    Tuple(Vec<CpuValue>),
}

impl CpuValue {
    pub fn as_tensor(&self) -> BackendResult<&CpuTensor> {
        match self {
            CpuValue::Tensor(tensor) => Ok(tensor),
            _ => Err(BackendError::execution("expected a tensor value")),
        }
    }

    pub fn as_list(&self) -> BackendResult<&[CpuTensor]> {
        match self {
            CpuValue::List(items) => Ok(items),
            _ => Err(BackendError::execution("expected a list value")),
        }
    }

    pub fn from_host(value: HostValue) -> BackendResult<Self> {
        Ok(match value {
            HostValue::Tensor(literal) => CpuValue::Tensor(CpuTensor::from_literal(&literal)?),
            HostValue::List(items) => CpuValue::List(
                items
                    .iter()
                    .map(CpuTensor::from_literal)
                    .collect::<BackendResult<_>>()?,
            ),
            HostValue::Tuple(items) => CpuValue::Tuple(
                items
                    .into_iter()
                    .map(CpuValue::from_host)
                    .collect::<BackendResult<_>>()?,
            ),
        })
    }

    pub fn to_host(&self) -> HostValue {
        match self {
            CpuValue::Tensor(tensor) => HostValue::Tensor(tensor.to_literal()),
            CpuValue::List(items) => HostValue::List(items.iter().map(CpuTensor::to_literal).collect()),
            CpuValue::Tuple(items) => HostValue::Tuple(items.iter().map(CpuValue::to_host).collect()),
        }
    }
}

/// Hook for accelerated kernels layered over the reference interpreter.
pub trait CpuKernelInterceptor: Send + Sync {
    fn backend_name(&self) -> &str {
        "cpu"
    }

    /// True when `op` has a native kernel in this interceptor.
    fn supports(&self, op: &Operation) -> bool {
        let _ = op;
        false
    }

    /// Returns `None` to defer to the interpreter.
    fn try_execute(
        &self,
        instruction: &Instruction,
        inputs: &[CpuValue],
    ) -> Option<BackendResult<CpuValue>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInterceptor;

impl CpuKernelInterceptor for NoopInterceptor {
    fn try_execute(
        &self,
        _instruction: &Instruction,
        _inputs: &[CpuValue],
    ) -> Option<BackendResult<CpuValue>> {
        None
    }
}

#[derive(Clone)]
pub struct GenericCpuBackend<I: CpuKernelInterceptor> {
    interceptor: Arc<I>,
}

impl<I: CpuKernelInterceptor> GenericCpuBackend<I> {
    pub fn with_interceptor(interceptor: I) -> Self {
        Self {
            interceptor: Arc::new(interceptor),
        }
    }

    pub fn with_arc(interceptor: Arc<I>) -> Self {
        Self { interceptor }
    }

    pub fn interceptor(&self) -> &I {
        self.interceptor.as_ref()
    }
}

impl GenericCpuBackend<NoopInterceptor> {
    pub fn new() -> Self {
        Self::with_interceptor(NoopInterceptor)
    }
}

impl Default for GenericCpuBackend<NoopInterceptor> {
    fn default() -> Self {
        Self::new()
    }
}

pub type CpuPortableBackend = GenericCpuBackend<NoopInterceptor>;

impl<I: CpuKernelInterceptor> PortableBackend for GenericCpuBackend<I> {
    type TensorHandle = CpuValue;

    fn backend_name(&self) -> &str {
        self.interceptor.backend_name()
    }

    fn materialize(&self, value: HostValue) -> BackendResult<Self::TensorHandle> {
        CpuValue::from_host(value)
    }

    fn to_host(&self, handle: &Self::TensorHandle) -> BackendResult<HostValue> {
        Ok(handle.to_host())
    }

    fn execute_instruction(
        &self,
        instruction: &Instruction,
        inputs: &[Self::TensorHandle],
    ) -> BackendResult<Self::TensorHandle> {
        if let Some(result) = self.interceptor.try_execute(instruction, inputs) {
            return result;
        }
        if self.interceptor.supports(&instruction.op) {
            log::trace!(
                target: "tgraph::backend",
                "{} declined {}; using the interpreter",
                self.interceptor.backend_name(),
                instruction.op.name()
            );
        }
        execute_operation(instruction, inputs)
    }
}

/// Reference evaluation of a single instruction.
pub fn execute_operation(instruction: &Instruction, inputs: &[CpuValue]) -> BackendResult<CpuValue> {
    let tensor = |index: usize| operand_tensor(inputs, index);
    let value = match &instruction.op {
        Operation::Constant(literal) => CpuValue::Tensor(CpuTensor::from_literal(literal)?),
        Operation::ElementwiseUnary(op) => CpuValue::Tensor(op_unary(tensor(0)?, *op)?),
        Operation::ElementwiseBinary(op) => {
            CpuValue::Tensor(op_binary(tensor(0)?, tensor(1)?, *op)?)
        }
        Operation::Reduce(spec) => CpuValue::Tensor(op_reduce(tensor(0)?, spec)?),
        Operation::ArgMax(spec) => CpuValue::Tensor(op_argmax(tensor(0)?, spec)?),
        Operation::MaxAndArgmax(spec) => op_max_and_argmax(tensor(0)?, spec)?,
        Operation::GetTupleElement { index } => match inputs.first() {
            Some(CpuValue::Tuple(items)) => items.get(*index).cloned().ok_or_else(|| {
                BackendError::execution(format!("tuple has no element {index}"))
            })?,
            _ => return Err(BackendError::execution("get_tuple_element expects a tuple")),
        },
        Operation::DimShuffle(spec) => CpuValue::Tensor(op_dimshuffle(tensor(0)?, spec)?),
        Operation::Alloc(spec) => CpuValue::Tensor(op_alloc(inputs, spec)?),
        Operation::Subtensor(spec) => CpuValue::Tensor(op_subtensor(inputs, spec)?),
        Operation::Reshape(spec) => CpuValue::Tensor(op_reshape(inputs, spec)?),
        Operation::ShapeOf { axis } => {
            let dims = tensor(0)?.dims()?;
            let extent = dims.get(*axis).copied().ok_or_else(|| {
                BackendError::execution(format!("axis {axis} out of range for rank {}", dims.len()))
            })?;
            CpuValue::Tensor(CpuTensor::scalar_i64(extent as i64))
        }
        Operation::Dot => CpuValue::Tensor(linalg::dot(tensor(0)?, tensor(1)?)?),
        Operation::BlockDiag => {
            let blocks = (0..inputs.len())
                .map(|index| tensor(index).cloned())
                .collect::<BackendResult<Vec<_>>>()?;
            CpuValue::Tensor(linalg::block_diag(&blocks)?)
        }
        Operation::SolveTriangular(spec) => {
            CpuValue::Tensor(linalg::solve_triangular(tensor(0)?, tensor(1)?, spec)?)
        }
        Operation::MakeList
        | Operation::ListGetItem(_)
        | Operation::ListLength
        | Operation::ListAppend { .. }
        | Operation::ListExtend { .. }
        | Operation::ListInsert { .. }
        | Operation::ListRemove { .. }
        | Operation::ListReverse { .. }
        | Operation::ListIndexOf
        | Operation::ListCount => list::execute(&instruction.op, inputs)?,
    };
    Ok(value)
}

fn op_unary(input: &CpuTensor, op: ElementwiseUnaryOp) -> BackendResult<CpuTensor> {
    let dims = input.dims()?;
    let data = if input.dtype().is_float() {
        let values = input.data.to_f64_vec();
        let out = match op {
            ElementwiseUnaryOp::Neg => values.iter().map(|x| -x).collect(),
            ElementwiseUnaryOp::Abs => values.iter().map(|x| x.abs()).collect(),
            ElementwiseUnaryOp::Exp => values.iter().map(|x| x.exp()).collect(),
            ElementwiseUnaryOp::Log => values.iter().map(|x| x.ln()).collect(),
        };
        TensorData::from_f64(input.dtype(), out)
    } else {
        let values = input.data.to_i64_vec();
        let out = match op {
            ElementwiseUnaryOp::Neg => values.iter().map(|x| x.wrapping_neg()).collect(),
            ElementwiseUnaryOp::Abs => values.iter().map(|x| x.wrapping_abs()).collect(),
            ElementwiseUnaryOp::Exp | ElementwiseUnaryOp::Log => {
                return Err(BackendError::unimplemented(
                    "elementwise_unary",
                    format!("{op:?} on {:?}", input.dtype()),
                ))
            }
        };
        TensorData::from_i64(input.dtype(), out)
    };
    Ok(input.with_data(&dims, data))
}

fn op_binary(lhs: &CpuTensor, rhs: &CpuTensor, op: ElementwiseBinaryOp) -> BackendResult<CpuTensor> {
    let lhs_dims = lhs.dims()?;
    let rhs_dims = rhs.dims()?;
    let out_dims = broadcast_shapes(&lhs_dims, &rhs_dims)?;
    let count: usize = out_dims.iter().product();
    let lhs_map = broadcast_map(&lhs_dims, &out_dims, count);
    let rhs_map = broadcast_map(&rhs_dims, &out_dims, count);

    let data = if lhs.dtype().is_float() {
        let a = lhs.data.to_f64_vec();
        let b = rhs.data.to_f64_vec();
        let out = (0..count)
            .map(|idx| {
                let (x, y) = (a[lhs_map[idx]], b[rhs_map[idx]]);
                match op {
                    ElementwiseBinaryOp::Add => x + y,
                    ElementwiseBinaryOp::Sub => x - y,
                    ElementwiseBinaryOp::Mul => x * y,
                    ElementwiseBinaryOp::Div => x / y,
                    ElementwiseBinaryOp::Maximum => nan_max(x, y),
                    ElementwiseBinaryOp::Minimum => nan_min(x, y),
                }
            })
            .collect();
        TensorData::from_f64(lhs.dtype(), out)
    } else {
        let a = lhs.data.to_i64_vec();
        let b = rhs.data.to_i64_vec();
        let mut out = Vec::with_capacity(count);
        for idx in 0..count {
            let (x, y) = (a[lhs_map[idx]], b[rhs_map[idx]]);
            out.push(match op {
                ElementwiseBinaryOp::Add => x.wrapping_add(y),
                ElementwiseBinaryOp::Sub => x.wrapping_sub(y),
                ElementwiseBinaryOp::Mul => x.wrapping_mul(y),
                ElementwiseBinaryOp::Div => x
                    .checked_div(y)
                    .ok_or_else(|| BackendError::execution("integer division by zero"))?,
                ElementwiseBinaryOp::Maximum => x.max(y),
                ElementwiseBinaryOp::Minimum => x.min(y),
            });
        }
        TensorData::from_i64(lhs.dtype(), out)
    };
    Ok(lhs.with_data(&out_dims, data))
}

fn nan_max(x: f64, y: f64) -> f64 {
    if x.is_nan() || y.is_nan() {
        f64::NAN
    } else {
        x.max(y)
    }
}

fn nan_min(x: f64, y: f64) -> f64 {
    if x.is_nan() || y.is_nan() {
        f64::NAN
    } else {
        x.min(y)
    }
}

fn op_reduce(input: &CpuTensor, spec: &ReduceSpec) -> BackendResult<CpuTensor> {
    let dims = input.dims()?;
    let axes = reduce_axes("reduce", spec, dims.len())?;
    let kept_dims: Vec<usize> = dims
        .iter()
        .enumerate()
        .map(|(axis, &size)| if axes.contains(&axis) { 1 } else { size })
        .collect();
    if spec.kind != ReduceKind::Sum && axes.iter().any(|&axis| dims[axis] == 0) {
        return Err(BackendError::execution(
            "zero-size reduction has no identity for max/min",
        ));
    }

    let out_count: usize = kept_dims.iter().product();
    let out_index = reduction_targets(&dims, &kept_dims);
    let data = if input.dtype().is_float() {
        let init = match spec.kind {
            ReduceKind::Sum => 0.0,
            ReduceKind::Max => f64::NEG_INFINITY,
            ReduceKind::Min => f64::INFINITY,
        };
        let mut acc = vec![init; out_count];
        for (idx, value) in input.data.to_f64_vec().into_iter().enumerate() {
            let slot = &mut acc[out_index[idx]];
            *slot = match spec.kind {
                ReduceKind::Sum => *slot + value,
                ReduceKind::Max => nan_max(*slot, value),
                ReduceKind::Min => nan_min(*slot, value),
            };
        }
        TensorData::from_f64(input.dtype(), acc)
    } else {
        let init = match spec.kind {
            ReduceKind::Sum => 0,
            ReduceKind::Max => i64::MIN,
            ReduceKind::Min => i64::MAX,
        };
        let mut acc = vec![init; out_count];
        for (idx, value) in input.data.to_i64_vec().into_iter().enumerate() {
            let slot = &mut acc[out_index[idx]];
            *slot = match spec.kind {
                ReduceKind::Sum => slot.wrapping_add(value),
                ReduceKind::Max => (*slot).max(value),
                ReduceKind::Min => (*slot).min(value),
            };
        }
        TensorData::from_i64(input.dtype(), acc)
    };

    let out_dims = if spec.keepdims {
        kept_dims
    } else {
        dims.iter()
            .enumerate()
            .filter(|(axis, _)| !axes.contains(axis))
            .map(|(_, &size)| size)
            .collect()
    };
    Ok(input.with_data(&out_dims, data))
}

/// Flat output slot for every input element when reduced axes collapse to extent 1.
fn reduction_targets(dims: &[usize], kept_dims: &[usize]) -> Vec<usize> {
    let count: usize = dims.iter().product();
    let kept_strides = contiguous_strides(kept_dims);
    (0..count)
        .map(|idx| {
            unravel_index(idx, dims)
                .iter()
                .zip(kept_dims)
                .zip(&kept_strides)
                .map(|((&coord, &kept), &stride)| if kept == 1 { 0 } else { coord * stride })
                .sum()
        })
        .collect()
}

/// Index of the maximum along `axis` for each lane; the first NaN wins, then the first max.
///
/// Integer inputs are compared as `i64` so large values keep exact ties.
fn argmax_lanes(input: &CpuTensor, axis: usize) -> BackendResult<(Vec<usize>, Vec<i64>)> {
    let dims = input.dims()?;
    if dims[axis] == 0 {
        return Err(BackendError::execution(
            "attempt to get argmax of an empty sequence",
        ));
    }
    if input.dtype().is_float() {
        let values = input.data.to_f64_vec();
        Ok(scan_lanes(&values, &dims, axis, |candidate: f64, current: f64| {
            !current.is_nan() && (candidate.is_nan() || candidate > current)
        }))
    } else {
        let values = input.data.to_i64_vec();
        Ok(scan_lanes(&values, &dims, axis, |candidate: i64, current: i64| {
            candidate > current
        }))
    }
}

/// Walks every lane along `axis`, keeping the first position no later element `beats`.
fn scan_lanes<T: Copy>(
    values: &[T],
    dims: &[usize],
    axis: usize,
    beats: impl Fn(T, T) -> bool,
) -> (Vec<usize>, Vec<i64>) {
    let extent = dims[axis];
    let inner: usize = dims[axis + 1..].iter().product();
    let outer: usize = dims[..axis].iter().product();
    let mut sources = Vec::with_capacity(outer * inner);
    let mut indices = Vec::with_capacity(outer * inner);
    for o in 0..outer {
        for i in 0..inner {
            let base = o * extent * inner + i;
            let mut best = 0usize;
            for k in 1..extent {
                if beats(values[base + k * inner], values[base + best * inner]) {
                    best = k;
                }
            }
            sources.push(base + best * inner);
            indices.push(best as i64);
        }
    }
    (sources, indices)
}

fn reduced_dims(dims: &[usize], axis: usize, keepdims: bool) -> Vec<usize> {
    dims.iter()
        .enumerate()
        .filter_map(|(idx, &size)| match (idx == axis, keepdims) {
            (false, _) => Some(size),
            (true, true) => Some(1),
            (true, false) => None,
        })
        .collect()
}

fn resolve_axis(axis: isize, rank: usize) -> BackendResult<usize> {
    normalize_axis(axis, rank).ok_or_else(|| {
        BackendError::execution(format!("axis {axis} out of range for rank {rank}"))
    })
}

fn op_argmax(input: &CpuTensor, spec: &ArgMaxSpec) -> BackendResult<CpuTensor> {
    let dims = input.dims()?;
    let axis = resolve_axis(spec.axis, dims.len())?;
    let (_, indices) = argmax_lanes(input, axis)?;
    Ok(CpuTensor::new(
        DType::Si64,
        &reduced_dims(&dims, axis, spec.keepdims),
        TensorData::Si64(Arc::from(indices)),
    ))
}

fn op_max_and_argmax(input: &CpuTensor, spec: &MaxAndArgmaxSpec) -> BackendResult<CpuValue> {
    let dims = input.dims()?;
    let axis = resolve_axis(spec.axis, dims.len())?;
    let (sources, indices) = argmax_lanes(input, axis)?;
    let out_dims = reduced_dims(&dims, axis, false);
    Ok(CpuValue::Tuple(vec![
        CpuValue::Tensor(input.with_data(&out_dims, input.data.gather(&sources))),
        CpuValue::Tensor(CpuTensor::new(
            DType::Si64,
            &out_dims,
            TensorData::Si64(Arc::from(indices)),
        )),
    ]))
}

fn op_dimshuffle(input: &CpuTensor, spec: &DimShuffleSpec) -> BackendResult<CpuTensor> {
    let dims = input.dims()?;
    for axis in spec.dropped_axes(dims.len()) {
        if dims[axis] != 1 {
            return Err(BackendError::execution(format!(
                "dimshuffle drops axis {axis} of extent {}",
                dims[axis]
            )));
        }
    }
    let strides = contiguous_strides(&dims);
    let out_dims: Vec<usize> = spec
        .new_order
        .iter()
        .map(|entry| match entry {
            ShuffleAxis::Axis(axis) => dims[*axis],
            ShuffleAxis::Broadcast => 1,
        })
        .collect();
    let count: usize = out_dims.iter().product();
    let sources: Vec<usize> = (0..count)
        .map(|idx| {
            unravel_index(idx, &out_dims)
                .iter()
                .zip(&spec.new_order)
                .map(|(&coord, entry)| match entry {
                    ShuffleAxis::Axis(axis) => coord * strides[*axis],
                    ShuffleAxis::Broadcast => 0,
                })
                .sum()
        })
        .collect();
    Ok(input.with_data(&out_dims, input.data.gather(&sources)))
}

fn op_alloc(inputs: &[CpuValue], spec: &AllocSpec) -> BackendResult<CpuTensor> {
    let value = operand_tensor(inputs, 0)?;
    let value_dims = value.dims()?;
    let mut target = Vec::with_capacity(spec.shape.len());
    for extent in &spec.shape {
        let size = match extent {
            ExtentSource::Static(size) => *size,
            ExtentSource::Operand(pos) => non_negative(operand_index(inputs, *pos)?, "alloc extent")?,
        };
        target.push(size);
    }
    if value_dims.len() > target.len() {
        return Err(BackendError::execution("alloc value has higher rank than its target"));
    }
    let offset = target.len() - value_dims.len();
    for (axis, &size) in value_dims.iter().enumerate() {
        if size != 1 && size != target[axis + offset] {
            return Err(BackendError::execution(format!(
                "alloc cannot broadcast extent {size} to {}",
                target[axis + offset]
            )));
        }
    }
    let count: usize = target.iter().product();
    let sources = broadcast_map(&value_dims, &target, count);
    Ok(value.with_data(&target, value.data.gather(&sources)))
}

fn op_subtensor(inputs: &[CpuValue], spec: &SubtensorSpec) -> BackendResult<CpuTensor> {
    let input = operand_tensor(inputs, 0)?;
    let dims = input.dims()?;
    if spec.indices.len() > dims.len() {
        return Err(BackendError::execution("too many indices for subtensor"));
    }
    let strides = contiguous_strides(&dims);
    let mut selections: Vec<Vec<usize>> = Vec::with_capacity(dims.len());
    let mut out_dims = Vec::with_capacity(dims.len());
    for (axis, &len) in dims.iter().enumerate() {
        match spec.indices.get(axis) {
            Some(IndexEntry::Scalar(scalar)) => {
                let index = resolve_scalar(inputs, *scalar)?;
                let normalized = normalize_index(index, len).ok_or_else(|| {
                    BackendError::execution(format!(
                        "index {index} is out of bounds for axis {axis} with size {len}"
                    ))
                })?;
                selections.push(vec![normalized]);
            }
            Some(IndexEntry::Slice(slice)) => {
                let picked = slice_positions(inputs, slice, len)?;
                out_dims.push(picked.len());
                selections.push(picked);
            }
            None => {
                out_dims.push(len);
                selections.push((0..len).collect());
            }
        }
    }
    let sel_dims: Vec<usize> = selections.iter().map(Vec::len).collect();
    let count: usize = sel_dims.iter().product();
    let sources: Vec<usize> = (0..count)
        .map(|idx| {
            unravel_index(idx, &sel_dims)
                .iter()
                .enumerate()
                .map(|(axis, &coord)| selections[axis][coord] * strides[axis])
                .sum()
        })
        .collect();
    Ok(input.with_data(&out_dims, input.data.gather(&sources)))
}

/// Positions selected by a Python-style slice over `len` elements.
pub(crate) fn slice_positions(
    inputs: &[CpuValue],
    slice: &SliceSpec,
    len: usize,
) -> BackendResult<Vec<usize>> {
    let bound = |scalar: Option<IndexScalar>| -> BackendResult<Option<i64>> {
        scalar.map(|scalar| resolve_scalar(inputs, scalar)).transpose()
    };
    let step = bound(slice.step)?;
    if step == Some(0) {
        return Err(BackendError::execution("slice step cannot be zero"));
    }
    let (start, stop, step) = slice_indices(len, bound(slice.start)?, bound(slice.stop)?, step);
    Ok((0..slice_len(start, stop, step))
        .map(|k| (start + k as i64 * step) as usize)
        .collect())
}

fn op_reshape(inputs: &[CpuValue], spec: &ReshapeSpec) -> BackendResult<CpuTensor> {
    let input = operand_tensor(inputs, 0)?;
    let count = input.data.len();
    let mut dims = Vec::with_capacity(spec.new_shape.len());
    let mut infer_at = None;
    for (axis, dim) in spec.new_shape.iter().enumerate() {
        match dim {
            ReshapeDim::Explicit(size) => dims.push(*size),
            ReshapeDim::Operand(pos) => {
                dims.push(non_negative(operand_index(inputs, *pos)?, "reshape extent")?)
            }
            ReshapeDim::Infer => {
                infer_at = Some(axis);
                dims.push(1);
            }
        }
    }
    let known: usize = dims.iter().product();
    if let Some(axis) = infer_at {
        if known == 0 || count % known != 0 {
            return Err(BackendError::execution(format!(
                "cannot reshape {count} elements into {:?}",
                spec.new_shape
            )));
        }
        dims[axis] = count / known;
    } else if known != count {
        return Err(BackendError::execution(format!(
            "cannot reshape {count} elements into {dims:?}"
        )));
    }
    Ok(input.with_data(&dims, input.data.clone()))
}

pub(crate) fn operand_tensor(inputs: &[CpuValue], index: usize) -> BackendResult<&CpuTensor> {
    inputs
        .get(index)
        .ok_or_else(|| BackendError::execution(format!("missing operand {index}")))?
        .as_tensor()
}

pub(crate) fn operand_index(inputs: &[CpuValue], index: usize) -> BackendResult<i64> {
    operand_tensor(inputs, index)?.to_index()
}

pub(crate) fn resolve_scalar(inputs: &[CpuValue], scalar: IndexScalar) -> BackendResult<i64> {
    match scalar {
        IndexScalar::Static(value) => Ok(value),
        IndexScalar::Operand(pos) => operand_index(inputs, pos),
    }
}

fn non_negative(value: i64, what: &str) -> BackendResult<usize> {
    usize::try_from(value)
        .map_err(|_| BackendError::execution(format!("{what} must be non-negative, got {value}")))
}

fn broadcast_shapes(lhs: &[usize], rhs: &[usize]) -> BackendResult<Vec<usize>> {
    let rank = lhs.len().max(rhs.len());
    let at = |dims: &[usize], idx: usize| {
        let offset = rank - dims.len();
        if idx < offset {
            1
        } else {
            dims[idx - offset]
        }
    };
    (0..rank)
        .map(|idx| match (at(lhs, idx), at(rhs, idx)) {
            (a, b) if a == b => Ok(a),
            (1, b) => Ok(b),
            (a, 1) => Ok(a),
            (a, b) => Err(BackendError::execution(format!(
                "operands could not be broadcast together: {a} vs {b}"
            ))),
        })
        .collect()
}

/// Source offset in a right-aligned, broadcast `src_dims` tensor for every output element.
fn broadcast_map(src_dims: &[usize], out_dims: &[usize], count: usize) -> Vec<usize> {
    let offset = out_dims.len() - src_dims.len();
    let strides = contiguous_strides(src_dims);
    (0..count)
        .map(|idx| {
            unravel_index(idx, out_dims)
                .iter()
                .skip(offset)
                .zip(src_dims.iter().zip(&strides))
                .map(|(&coord, (&size, &stride))| if size == 1 { 0 } else { coord * stride })
                .sum()
        })
        .collect()
}

pub(crate) fn static_dims(shape: &Shape) -> BackendResult<Vec<usize>> {
    shape
        .dims()
        .iter()
        .map(|dim| match dim {
            Dimension::Static(size) => Ok(*size),
            Dimension::Unknown => Err(BackendError::execution(
                "unknown dimension in a runtime tensor",
            )),
        })
        .collect()
}

pub(crate) fn unravel_index(mut index: usize, dims: &[usize]) -> Vec<usize> {
    let mut coords = vec![0; dims.len()];
    for (axis, dim) in dims.iter().enumerate().rev() {
        if *dim == 0 {
            return coords;
        }
        coords[axis] = index % *dim;
        index /= *dim;
    }
    coords
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f64_tensor(dims: &[usize], values: &[f64]) -> CpuTensor {
        CpuTensor::new(DType::F64, dims, TensorData::F64(Arc::from(values)))
    }

    #[test]
    fn argmax_prefers_first_nan_then_first_max() {
        let input = f64_tensor(&[2, 3], &[1.0, 3.0, 3.0, 2.0, f64::NAN, 5.0]);
        let (_, indices) = argmax_lanes(&input, 1).unwrap();
        assert_eq!(indices, vec![1, 1]);
    }

    #[test]
    fn argmax_keeps_exact_ties_for_large_integers() {
        let big = (1i64 << 53) + 1;
        let input = CpuTensor::new(
            DType::Si64,
            &[1, 3],
            TensorData::Si64(Arc::from(vec![big - 1, big, big - 1])),
        );
        let (_, indices) = argmax_lanes(&input, 1).unwrap();
        assert_eq!(indices, vec![1]);
    }

    #[test]
    fn binary_ops_broadcast_right_aligned() {
        let lhs = f64_tensor(&[2, 1], &[1.0, 2.0]);
        let rhs = f64_tensor(&[3], &[10.0, 20.0, 30.0]);
        let out = op_binary(&lhs, &rhs, ElementwiseBinaryOp::Add).unwrap();
        assert_eq!(out.dims().unwrap(), vec![2, 3]);
        assert_eq!(
            out.data.to_f64_vec(),
            vec![11.0, 21.0, 31.0, 12.0, 22.0, 32.0]
        );
    }

    #[test]
    fn literal_round_trip_keeps_integer_payload() {
        let literal = TensorLiteral::from_i64(&[3], &[i64::MAX, -1, 7]);
        let tensor = CpuTensor::from_literal(&literal).unwrap();
        assert_eq!(tensor.to_literal(), literal);
    }
}
