use std::sync::Arc;

use crate::backend::spec::{DType, Dimension, Shape, TensorLiteral, TensorSpec, ValueType};

/// Builds a static shape descriptor from explicit dimensions.
pub fn shape_static(dims: &[usize]) -> Shape {
    Shape::new(
        dims.iter()
            .copied()
            .map(Dimension::Static)
            .collect::<Vec<_>>(),
    )
}

/// Builds a mixed static/unknown shape descriptor.
pub fn shape_mixed(dims: &[Option<usize>]) -> Shape {
    Shape::new(
        dims.iter()
            .map(|dim| match dim {
                Some(value) => Dimension::Static(*value),
                None => Dimension::Unknown,
            })
            .collect::<Vec<_>>(),
    )
}

pub fn tensor_spec_static(dtype: DType, dims: &[usize]) -> TensorSpec {
    TensorSpec::new(dtype, shape_static(dims))
}

pub fn tensor_spec_mixed(dtype: DType, dims: &[Option<usize>]) -> TensorSpec {
    TensorSpec::new(dtype, shape_mixed(dims))
}

/// Tensor value type with the given dtype and static/unknown dims.
pub fn tensor_type(dtype: DType, dims: &[Option<usize>]) -> ValueType {
    ValueType::Tensor(tensor_spec_mixed(dtype, dims))
}

/// Typed-list value type with the given element description.
pub fn list_type(dtype: DType, dims: &[Option<usize>]) -> ValueType {
    ValueType::List(tensor_spec_mixed(dtype, dims))
}

pub fn scalar_type(dtype: DType) -> ValueType {
    ValueType::Tensor(TensorSpec::scalar(dtype))
}

/// Creates a zeroed tensor literal, or `None` when `spec` is not fully static.
pub fn tensor_literal_zeros(spec: TensorSpec) -> Option<TensorLiteral> {
    let byte_len = spec.byte_len()?;
    Some(TensorLiteral::new(
        spec,
        Arc::<[u8]>::from(vec![0u8; byte_len]),
    ))
}
