//! Output-type inference for every operation kind.
//!
//! [`infer_output`] is the type contract enforced by [`crate::backend::builder::GraphBuilder`]
//! and re-run by the rewriter for every node it creates.

use crate::backend::{
    error::TypeError,
    shape_helpers::{broadcast_dims, normalize_axis, normalize_index, slice_indices, slice_len},
    spec::{
        AllocSpec, DType, DimShuffleSpec, Dimension, ElementwiseUnaryOp, ExtentSource,
        IndexEntry, IndexScalar, ListIndex, Operation, ReduceSpec, ReshapeDim, ReshapeSpec,
        Shape, ShuffleAxis, SliceSpec, SubtensorSpec, TensorSpec, ValueType,
    },
};

/// Computes the output type of `op` applied to operands of the given types.
pub fn infer_output(op: &Operation, operands: &[ValueType]) -> Result<ValueType, TypeError> {
    let name = op.name();
    match op {
        Operation::Constant(literal) => {
            expect_arity(name, operands, 0)?;
            Ok(ValueType::Tensor(literal.spec.clone()))
        }
        Operation::ElementwiseUnary(kind) => {
            expect_arity(name, operands, 1)?;
            let spec = tensor_operand(name, operands, 0)?;
            let ok = match kind {
                ElementwiseUnaryOp::Neg | ElementwiseUnaryOp::Abs => spec.dtype.is_numeric(),
                ElementwiseUnaryOp::Exp | ElementwiseUnaryOp::Log => spec.dtype.is_float(),
            };
            if !ok {
                return Err(TypeError::dtype(name, format!("{:?} not supported", spec.dtype)));
            }
            Ok(ValueType::Tensor(spec.clone()))
        }
        Operation::ElementwiseBinary(_) => {
            expect_arity(name, operands, 2)?;
            let lhs = tensor_operand(name, operands, 0)?;
            let rhs = tensor_operand(name, operands, 1)?;
            if lhs.dtype != rhs.dtype {
                return Err(TypeError::dtype(
                    name,
                    format!("{:?} vs {:?}", lhs.dtype, rhs.dtype),
                ));
            }
            if !lhs.dtype.is_numeric() {
                return Err(TypeError::dtype(name, "numeric operands required"));
            }
            let dims = broadcast_dims(lhs.shape.dims(), rhs.shape.dims()).ok_or_else(|| {
                TypeError::shape(
                    name,
                    format!("{:?} vs {:?}", lhs.shape.dims(), rhs.shape.dims()),
                )
            })?;
            Ok(ValueType::Tensor(TensorSpec::new(lhs.dtype, Shape::new(dims))))
        }
        Operation::Reduce(spec) => {
            expect_arity(name, operands, 1)?;
            let input = tensor_operand(name, operands, 0)?;
            require_numeric(name, input)?;
            let axes = reduce_axes(name, spec, input.rank())?;
            Ok(ValueType::Tensor(TensorSpec::new(
                input.dtype,
                reduced_shape(&input.shape, &axes, spec.keepdims),
            )))
        }
        Operation::ArgMax(spec) => {
            expect_arity(name, operands, 1)?;
            let input = tensor_operand(name, operands, 0)?;
            require_numeric(name, input)?;
            let axis = single_axis(name, spec.axis, input.rank())?;
            Ok(ValueType::Tensor(TensorSpec::new(
                DType::Si64,
                reduced_shape(&input.shape, &[axis], spec.keepdims),
            )))
        }
        Operation::MaxAndArgmax(spec) => {
            expect_arity(name, operands, 1)?;
            let input = tensor_operand(name, operands, 0)?;
            require_numeric(name, input)?;
            let axis = single_axis(name, spec.axis, input.rank())?;
            let shape = reduced_shape(&input.shape, &[axis], false);
            Ok(ValueType::Tuple(vec![
                ValueType::Tensor(TensorSpec::new(input.dtype, shape.clone())),
                ValueType::Tensor(TensorSpec::new(DType::Si64, shape)),
            ]))
        }
        Operation::GetTupleElement { index } => {
            expect_arity(name, operands, 1)?;
            match &operands[0] {
                ValueType::Tuple(elements) => elements.get(*index).cloned().ok_or_else(|| {
                    TypeError::invalid(
                        name,
                        format!("index {index} out of range for {} elements", elements.len()),
                    )
                }),
                _ => Err(TypeError::OperandKind {
                    op: name,
                    index: 0,
                    expected: "tuple",
                }),
            }
        }
        Operation::DimShuffle(spec) => {
            expect_arity(name, operands, 1)?;
            let input = tensor_operand(name, operands, 0)?;
            dimshuffle_shape(name, spec, &input.shape)
                .map(|shape| ValueType::Tensor(TensorSpec::new(input.dtype, shape)))
        }
        Operation::Alloc(spec) => infer_alloc(name, spec, operands),
        Operation::Subtensor(spec) => infer_subtensor(name, spec, operands),
        Operation::Reshape(spec) => infer_reshape(name, spec, operands),
        Operation::ShapeOf { axis } => {
            expect_arity(name, operands, 1)?;
            let input = tensor_operand(name, operands, 0)?;
            if *axis >= input.rank() {
                return Err(TypeError::Axis {
                    op: name,
                    axis: *axis as isize,
                    rank: input.rank(),
                });
            }
            Ok(ValueType::Tensor(TensorSpec::scalar(DType::Si64)))
        }
        Operation::Dot => infer_dot(name, operands),
        Operation::BlockDiag => infer_block_diag(name, operands),
        Operation::SolveTriangular(_) => infer_solve_triangular(name, operands),
        Operation::MakeList => {
            if operands.is_empty() {
                return Err(TypeError::invalid(name, "at least one element is required"));
            }
            let mut element = tensor_operand(name, operands, 0)?.clone();
            for index in 1..operands.len() {
                let next = tensor_operand(name, operands, index)?;
                element = element.join(next).ok_or_else(|| {
                    TypeError::invalid(
                        name,
                        format!("element {index} does not share the type of element 0"),
                    )
                })?;
            }
            Ok(ValueType::List(element))
        }
        Operation::ListGetItem(index) => {
            let element = list_operand(name, operands, 0)?;
            match index {
                ListIndex::Scalar(scalar) => {
                    let referenced = usize::from(matches!(scalar, IndexScalar::Operand(_)));
                    expect_arity(name, operands, 1 + referenced)?;
                    check_index_scalar(name, operands, scalar)?;
                    Ok(ValueType::Tensor(element.clone()))
                }
                ListIndex::Slice(slice) => {
                    expect_arity(name, operands, 1 + slice.operands().count())?;
                    check_slice(name, operands, slice)?;
                    Ok(ValueType::List(element.clone()))
                }
            }
        }
        Operation::ListLength => {
            expect_arity(name, operands, 1)?;
            list_operand(name, operands, 0)?;
            Ok(ValueType::Tensor(TensorSpec::scalar(DType::Si64)))
        }
        Operation::ListAppend { .. } | Operation::ListRemove { .. } => {
            expect_arity(name, operands, 2)?;
            let element = list_operand(name, operands, 0)?;
            check_element(name, element, operands, 1)?;
            Ok(ValueType::List(element.clone()))
        }
        Operation::ListExtend { .. } => {
            expect_arity(name, operands, 2)?;
            let element = list_operand(name, operands, 0)?;
            let other = list_operand(name, operands, 1)?;
            if !element.accepts(other) {
                return Err(TypeError::dtype(
                    name,
                    format!("cannot extend list of {element:?} with list of {other:?}"),
                ));
            }
            Ok(ValueType::List(element.clone()))
        }
        Operation::ListInsert { .. } => {
            expect_arity(name, operands, 3)?;
            let element = list_operand(name, operands, 0)?;
            integer_scalar_operand(name, operands, 1)?;
            check_element(name, element, operands, 2)?;
            Ok(ValueType::List(element.clone()))
        }
        Operation::ListReverse { .. } => {
            expect_arity(name, operands, 1)?;
            let element = list_operand(name, operands, 0)?;
            Ok(ValueType::List(element.clone()))
        }
        Operation::ListIndexOf | Operation::ListCount => {
            expect_arity(name, operands, 2)?;
            let element = list_operand(name, operands, 0)?;
            check_element(name, element, operands, 1)?;
            Ok(ValueType::Tensor(TensorSpec::scalar(DType::Si64)))
        }
    }
}

/// Narrows `old` to `new`, rejecting anything that would widen or change a static extent.
pub fn refine(old: &ValueType, new: &ValueType) -> Result<ValueType, TypeError> {
    if old.accepts(new) {
        Ok(new.clone())
    } else {
        Err(TypeError::invalid(
            "refine",
            format!("{new:?} is not a refinement of {old:?}"),
        ))
    }
}

/// Output shape of a dimshuffle over `input`.
pub fn dimshuffle_shape(
    name: &'static str,
    spec: &DimShuffleSpec,
    input: &Shape,
) -> Result<Shape, TypeError> {
    let rank = input.rank();
    let mut seen = vec![false; rank];
    let mut dims = Vec::with_capacity(spec.new_order.len());
    for entry in &spec.new_order {
        match entry {
            ShuffleAxis::Axis(axis) => {
                if *axis >= rank {
                    return Err(TypeError::Axis {
                        op: name,
                        axis: *axis as isize,
                        rank,
                    });
                }
                if std::mem::replace(&mut seen[*axis], true) {
                    return Err(TypeError::invalid(
                        name,
                        format!("axis {axis} appears more than once"),
                    ));
                }
                dims.push(input.dims()[*axis]);
            }
            ShuffleAxis::Broadcast => dims.push(Dimension::Static(1)),
        }
    }
    for (axis, kept) in seen.iter().enumerate() {
        if !kept && !input.dims()[axis].is_broadcastable() {
            return Err(TypeError::invalid(
                name,
                format!(
                    "cannot drop axis {axis} of extent {:?}; only static size-1 axes may be dropped",
                    input.dims()[axis]
                ),
            ));
        }
    }
    Ok(Shape::new(dims))
}

/// Extent selected by `slice` over an axis of `dim`.
pub fn slice_extent(slice: &SliceSpec, dim: Dimension) -> Dimension {
    let static_bound = |bound: Option<IndexScalar>| match bound {
        None => Some(None),
        Some(IndexScalar::Static(value)) => Some(Some(value)),
        Some(IndexScalar::Operand(_)) => None,
    };
    match (
        dim,
        static_bound(slice.start),
        static_bound(slice.stop),
        static_bound(slice.step),
    ) {
        (Dimension::Static(len), Some(start), Some(stop), Some(step)) => {
            let (start, stop, step) = slice_indices(len, start, stop, step);
            Dimension::Static(slice_len(start, stop, step))
        }
        (Dimension::Static(1), _, _, _) if slice.start.is_none() && slice.stop.is_none() => {
            Dimension::Static(1)
        }
        _ => Dimension::Unknown,
    }
}

/// Output shape of a subtensor over `input`, assuming operand types were already checked.
pub fn subtensor_shape(
    name: &'static str,
    spec: &SubtensorSpec,
    input: &Shape,
) -> Result<Shape, TypeError> {
    if spec.indices.len() > input.rank() {
        return Err(TypeError::invalid(
            name,
            format!(
                "{} indices supplied for rank {}",
                spec.indices.len(),
                input.rank()
            ),
        ));
    }
    let mut dims = Vec::with_capacity(input.rank());
    for (axis, dim) in input.dims().iter().enumerate() {
        match spec.indices.get(axis) {
            Some(IndexEntry::Scalar(IndexScalar::Static(index))) => {
                if let Dimension::Static(len) = dim {
                    if normalize_index(*index, *len).is_none() {
                        return Err(TypeError::invalid(
                            name,
                            format!("index {index} out of bounds for axis {axis} of size {len}"),
                        ));
                    }
                }
            }
            Some(IndexEntry::Scalar(IndexScalar::Operand(_))) => {}
            Some(IndexEntry::Slice(slice)) => {
                if slice.step == Some(IndexScalar::Static(0)) {
                    return Err(TypeError::invalid(name, "slice step cannot be zero"));
                }
                dims.push(slice_extent(slice, *dim));
            }
            None => dims.push(*dim),
        }
    }
    Ok(Shape::new(dims))
}

fn infer_subtensor(
    name: &'static str,
    spec: &SubtensorSpec,
    operands: &[ValueType],
) -> Result<ValueType, TypeError> {
    let input = tensor_operand(name, operands, 0)?;
    let mut referenced = 0;
    for entry in &spec.indices {
        match entry {
            IndexEntry::Scalar(scalar) => {
                check_index_scalar(name, operands, scalar)?;
                referenced += usize::from(matches!(scalar, IndexScalar::Operand(_)));
            }
            IndexEntry::Slice(slice) => {
                check_slice(name, operands, slice)?;
                referenced += slice.operands().count();
            }
        }
    }
    expect_arity(name, operands, 1 + referenced)?;
    let shape = subtensor_shape(name, spec, &input.shape)?;
    Ok(ValueType::Tensor(TensorSpec::new(input.dtype, shape)))
}

fn infer_alloc(
    name: &'static str,
    spec: &AllocSpec,
    operands: &[ValueType],
) -> Result<ValueType, TypeError> {
    let value = tensor_operand(name, operands, 0)?;
    let mut referenced = 0;
    for extent in &spec.shape {
        if let ExtentSource::Operand(pos) = extent {
            check_operand_position(name, operands, *pos)?;
            referenced += 1;
        }
    }
    expect_arity(name, operands, 1 + referenced)?;
    let target_rank = spec.shape.len();
    if value.rank() > target_rank {
        return Err(TypeError::shape(
            name,
            format!(
                "value of rank {} does not fit target rank {target_rank}",
                value.rank()
            ),
        ));
    }
    let offset = target_rank - value.rank();
    let mut dims = Vec::with_capacity(target_rank);
    for (axis, extent) in spec.shape.iter().enumerate() {
        let source = (axis >= offset).then(|| value.shape.dims()[axis - offset]);
        let dim = match (extent, source) {
            (ExtentSource::Static(target), Some(Dimension::Static(size))) => {
                if size != 1 && size != *target {
                    return Err(TypeError::shape(
                        name,
                        format!("cannot broadcast extent {size} to {target} on axis {axis}"),
                    ));
                }
                Dimension::Static(*target)
            }
            (ExtentSource::Static(target), _) => Dimension::Static(*target),
            (ExtentSource::Operand(_), Some(Dimension::Static(size))) if size != 1 => {
                Dimension::Static(size)
            }
            (ExtentSource::Operand(_), _) => Dimension::Unknown,
        };
        dims.push(dim);
    }
    Ok(ValueType::Tensor(TensorSpec::new(value.dtype, Shape::new(dims))))
}

fn infer_reshape(
    name: &'static str,
    spec: &ReshapeSpec,
    operands: &[ValueType],
) -> Result<ValueType, TypeError> {
    let input = tensor_operand(name, operands, 0)?;
    let mut referenced = 0;
    let mut infer_count = 0;
    let mut known_product = 1usize;
    let mut all_known = true;
    for dim in &spec.new_shape {
        match dim {
            ReshapeDim::Explicit(size) => known_product = known_product.saturating_mul(*size),
            ReshapeDim::Infer => infer_count += 1,
            ReshapeDim::Operand(pos) => {
                check_operand_position(name, operands, *pos)?;
                referenced += 1;
                all_known = false;
            }
        }
    }
    expect_arity(name, operands, 1 + referenced)?;
    if infer_count > 1 {
        return Err(TypeError::invalid(name, "at most one inferred dimension"));
    }
    let input_count = input.shape.element_count();
    let inferred = match (input_count, infer_count, all_known) {
        (Some(count), 1, true) => {
            if known_product == 0 || count % known_product != 0 {
                return Err(TypeError::shape(
                    name,
                    format!("cannot infer dimension: {count} elements into {known_product}"),
                ));
            }
            Dimension::Static(count / known_product)
        }
        (Some(count), 0, true) if count != known_product => {
            return Err(TypeError::shape(
                name,
                format!("element count {count} does not match target {known_product}"),
            ));
        }
        _ => Dimension::Unknown,
    };
    let dims = spec
        .new_shape
        .iter()
        .map(|dim| match dim {
            ReshapeDim::Explicit(size) => Dimension::Static(*size),
            ReshapeDim::Infer => inferred,
            ReshapeDim::Operand(_) => Dimension::Unknown,
        })
        .collect::<Vec<_>>();
    Ok(ValueType::Tensor(TensorSpec::new(input.dtype, Shape::new(dims))))
}

fn infer_dot(name: &'static str, operands: &[ValueType]) -> Result<ValueType, TypeError> {
    expect_arity(name, operands, 2)?;
    let lhs = tensor_operand(name, operands, 0)?;
    let rhs = tensor_operand(name, operands, 1)?;
    if lhs.dtype != rhs.dtype || !lhs.dtype.is_float() {
        return Err(TypeError::dtype(
            name,
            format!("{:?} vs {:?}", lhs.dtype, rhs.dtype),
        ));
    }
    let l = lhs.shape.dims();
    let r = rhs.shape.dims();
    let (contract_l, contract_r, dims) = match (l.len(), r.len()) {
        (1, 1) => (l[0], r[0], vec![]),
        (2, 1) => (l[1], r[0], vec![l[0]]),
        (1, 2) => (l[0], r[0], vec![r[1]]),
        (2, 2) => (l[1], r[0], vec![l[0], r[1]]),
        (a, b) => {
            return Err(TypeError::shape(
                name,
                format!("unsupported ranks {a} and {b}"),
            ))
        }
    };
    if contract_l.meet(contract_r).is_none() {
        return Err(TypeError::shape(
            name,
            format!("contracting extents {contract_l:?} and {contract_r:?} differ"),
        ));
    }
    Ok(ValueType::Tensor(TensorSpec::new(lhs.dtype, Shape::new(dims))))
}

fn infer_block_diag(name: &'static str, operands: &[ValueType]) -> Result<ValueType, TypeError> {
    if operands.is_empty() {
        return Err(TypeError::invalid(name, "at least one block is required"));
    }
    let dtype = tensor_operand(name, operands, 0)?.dtype;
    let mut rows = Some(0usize);
    let mut cols = Some(0usize);
    for index in 0..operands.len() {
        let block = tensor_operand(name, operands, index)?;
        if block.dtype != dtype {
            return Err(TypeError::dtype(
                name,
                format!("block {index} is {:?}, expected {dtype:?}", block.dtype),
            ));
        }
        if block.rank() != 2 {
            return Err(TypeError::shape(
                name,
                format!("block {index} has rank {}", block.rank()),
            ));
        }
        let dims = block.shape.dims();
        rows = rows.zip(dims[0].static_size()).map(|(a, b)| a + b);
        cols = cols.zip(dims[1].static_size()).map(|(a, b)| a + b);
    }
    let to_dim = |extent: Option<usize>| extent.map_or(Dimension::Unknown, Dimension::Static);
    Ok(ValueType::Tensor(TensorSpec::new(
        dtype,
        Shape::new(vec![to_dim(rows), to_dim(cols)]),
    )))
}

fn infer_solve_triangular(
    name: &'static str,
    operands: &[ValueType],
) -> Result<ValueType, TypeError> {
    expect_arity(name, operands, 2)?;
    let a = tensor_operand(name, operands, 0)?;
    let b = tensor_operand(name, operands, 1)?;
    if a.dtype != b.dtype || !a.dtype.is_float() {
        return Err(TypeError::dtype(
            name,
            format!("{:?} vs {:?}", a.dtype, b.dtype),
        ));
    }
    if a.rank() != 2 {
        return Err(TypeError::shape(name, "coefficient matrix must be rank 2"));
    }
    let n = a.shape.dims()[0]
        .meet(a.shape.dims()[1])
        .ok_or_else(|| TypeError::shape(name, "coefficient matrix must be square"))?;
    if !(1..=2).contains(&b.rank()) {
        return Err(TypeError::shape(name, "right-hand side must be rank 1 or 2"));
    }
    let mut dims = b.shape.dims().to_vec();
    dims[0] = dims[0].meet(n).ok_or_else(|| {
        TypeError::shape(
            name,
            format!("right-hand side leading extent {:?} vs {n:?}", dims[0]),
        )
    })?;
    Ok(ValueType::Tensor(TensorSpec::new(b.dtype, Shape::new(dims))))
}

/// Normalized, de-duplicated, sorted reduction axes. Empty `axes` reduces everything.
pub fn reduce_axes(
    name: &'static str,
    spec: &ReduceSpec,
    rank: usize,
) -> Result<Vec<usize>, TypeError> {
    if spec.axes.is_empty() {
        return Ok((0..rank).collect());
    }
    let mut axes = spec
        .axes
        .iter()
        .map(|axis| single_axis(name, *axis, rank))
        .collect::<Result<Vec<_>, _>>()?;
    axes.sort_unstable();
    axes.dedup();
    Ok(axes)
}

fn single_axis(name: &'static str, axis: isize, rank: usize) -> Result<usize, TypeError> {
    normalize_axis(axis, rank).ok_or(TypeError::Axis {
        op: name,
        axis,
        rank,
    })
}

fn reduced_shape(shape: &Shape, axes: &[usize], keepdims: bool) -> Shape {
    let dims = shape
        .dims()
        .iter()
        .enumerate()
        .filter_map(|(axis, dim)| {
            if !axes.contains(&axis) {
                Some(*dim)
            } else if keepdims {
                Some(Dimension::Static(1))
            } else {
                None
            }
        })
        .collect::<Vec<_>>();
    Shape::new(dims)
}

fn expect_arity(
    name: &'static str,
    operands: &[ValueType],
    expected: usize,
) -> Result<(), TypeError> {
    if operands.len() == expected {
        Ok(())
    } else {
        Err(TypeError::Arity {
            op: name,
            expected,
            found: operands.len(),
        })
    }
}

fn tensor_operand<'a>(
    name: &'static str,
    operands: &'a [ValueType],
    index: usize,
) -> Result<&'a TensorSpec, TypeError> {
    operands
        .get(index)
        .and_then(ValueType::as_tensor)
        .ok_or(TypeError::OperandKind {
            op: name,
            index,
            expected: "tensor",
        })
}

fn list_operand<'a>(
    name: &'static str,
    operands: &'a [ValueType],
    index: usize,
) -> Result<&'a TensorSpec, TypeError> {
    operands
        .get(index)
        .and_then(ValueType::as_list_element)
        .ok_or(TypeError::OperandKind {
            op: name,
            index,
            expected: "typed list",
        })
}

fn integer_scalar_operand(
    name: &'static str,
    operands: &[ValueType],
    index: usize,
) -> Result<(), TypeError> {
    match operands.get(index).and_then(ValueType::as_tensor) {
        Some(spec) if spec.dtype.is_integer() && spec.rank() == 0 => Ok(()),
        _ => Err(TypeError::OperandKind {
            op: name,
            index,
            expected: "integer scalar",
        }),
    }
}

fn check_operand_position(
    name: &'static str,
    operands: &[ValueType],
    pos: usize,
) -> Result<(), TypeError> {
    if pos == 0 {
        return Err(TypeError::invalid(
            name,
            "operand 0 cannot be used as an index",
        ));
    }
    integer_scalar_operand(name, operands, pos)
}

fn check_index_scalar(
    name: &'static str,
    operands: &[ValueType],
    scalar: &IndexScalar,
) -> Result<(), TypeError> {
    match scalar {
        IndexScalar::Static(_) => Ok(()),
        IndexScalar::Operand(pos) => check_operand_position(name, operands, *pos),
    }
}

fn check_slice(
    name: &'static str,
    operands: &[ValueType],
    slice: &SliceSpec,
) -> Result<(), TypeError> {
    for pos in slice.operands() {
        check_operand_position(name, operands, pos)?;
    }
    Ok(())
}

fn check_element(
    name: &'static str,
    element: &TensorSpec,
    operands: &[ValueType],
    index: usize,
) -> Result<(), TypeError> {
    let value = tensor_operand(name, operands, index)?;
    if element.accepts(value) {
        Ok(())
    } else {
        Err(TypeError::dtype(
            name,
            format!("list element type {element:?} does not accept {value:?}"),
        ))
    }
}

fn require_numeric(name: &'static str, spec: &TensorSpec) -> Result<(), TypeError> {
    if spec.dtype.is_numeric() {
        Ok(())
    } else {
        Err(TypeError::dtype(name, format!("{:?} is not numeric", spec.dtype)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ir_utils::{scalar_type, tensor_type};

    #[test]
    fn refine_only_narrows() {
        let loose = tensor_type(DType::F32, &[None, Some(3)]);
        let tight = tensor_type(DType::F32, &[Some(2), Some(3)]);
        assert_eq!(refine(&loose, &tight).unwrap(), tight);
        assert!(refine(&tight, &loose).is_err());
        assert!(refine(&tight, &tensor_type(DType::F32, &[Some(4), Some(3)])).is_err());
    }

    #[test]
    fn list_index_requires_integer_scalar() {
        let list = ValueType::List(TensorSpec::scalar(DType::F64));
        let op = Operation::ListGetItem(ListIndex::Scalar(IndexScalar::Operand(1)));
        assert!(infer_output(&op, &[list.clone(), scalar_type(DType::Si64)]).is_ok());
        assert!(infer_output(&op, &[list.clone(), scalar_type(DType::F64)]).is_err());
        assert!(infer_output(&op, &[list, tensor_type(DType::Si64, &[Some(1)])]).is_err());
    }
}
